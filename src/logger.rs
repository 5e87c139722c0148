//! Fixed-capacity ring logger behind the `log` facade.
//!
//! Every record is formatted into a 128-byte slot of a 64-entry ring with
//! no allocation. Both cores log, and the IDE worker must never wait on
//! the UI while it prints, so writers only ever `try_lock` the ring; a
//! contended write is counted as dropped instead. The UI pulls entries
//! out with [`RingLogger::drain`].
//!
//! # Usage
//!
//! ```ignore
//! static LOGGER: RingLogger = RingLogger::new();
//!
//! LOGGER.install(log::LevelFilter::Debug);
//! log::warn!("drive not ready");
//! LOGGER.drain(|e| uart_print(e.message()));
//! ```

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicUsize, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Number of entries kept before the oldest is overwritten
pub const LOG_ENTRIES: usize = 64;

/// Message bytes per entry. Longer messages are truncated.
pub const MAX_MESSAGE_LEN: usize = 128;

#[derive(Clone, Copy)]
pub struct LogEntry {
    level: Level,
    module: &'static str,
    line: u32,
    message: [u8; MAX_MESSAGE_LEN],
    message_len: usize,
}

impl LogEntry {
    pub const fn new() -> Self {
        LogEntry {
            level: Level::Info,
            module: "",
            line: 0,
            message: [0; MAX_MESSAGE_LEN],
            message_len: 0,
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn module(&self) -> &'static str {
        self.module
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn message(&self) -> &str {
        // Truncation only ever cuts at a char boundary.
        core::str::from_utf8(&self.message[..self.message_len]).unwrap_or("")
    }
}

impl Default for LogEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] [{}:{}] {}", self.level, self.module, self.line, self.message())
    }
}

/// Writes into an entry's message buffer, dropping whatever does not fit.
struct SlotWriter<'a> {
    entry: &'a mut LogEntry,
    full: bool,
}

impl Write for SlotWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.full {
            return Ok(());
        }
        let room = MAX_MESSAGE_LEN - self.entry.message_len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        let start = self.entry.message_len;
        self.entry.message[start..start + take].copy_from_slice(&s.as_bytes()[..take]);
        self.entry.message_len += take;
        if take < s.len() {
            self.full = true;
        }
        Ok(())
    }
}

struct Ring {
    entries: [LogEntry; LOG_ENTRIES],
    /// Total entries ever written; slot is `write_pos % LOG_ENTRIES`
    write_pos: usize,
    read_pos: usize,
}

pub struct RingLogger {
    ring: Mutex<Ring>,
    level: AtomicUsize,
    total_logs: AtomicUsize,
    dropped_logs: AtomicUsize,
}

impl RingLogger {
    pub const fn new() -> Self {
        RingLogger {
            ring: Mutex::new(Ring {
                entries: [LogEntry::new(); LOG_ENTRIES],
                write_pos: 0,
                read_pos: 0,
            }),
            level: AtomicUsize::new(LevelFilter::Info as usize),
            total_logs: AtomicUsize::new(0),
            dropped_logs: AtomicUsize::new(0),
        }
    }

    /// Register as the global logger. Only the first call takes effect.
    pub fn install(&'static self, level: LevelFilter) -> bool {
        self.set_level(level);
        log::set_logger(self).is_ok()
    }

    /// Like [`install`](Self::install), for targets without atomic
    /// compare-and-swap.
    ///
    /// # Safety
    ///
    /// Must not race with any other logging call or logger installation;
    /// call it once, early, on a single core.
    pub unsafe fn install_racy(&'static self, level: LevelFilter) -> bool {
        self.set_level(level);
        log::set_logger_racy(self).is_ok()
    }

    pub fn set_level(&self, level: LevelFilter) {
        self.level.store(level as usize, Ordering::Relaxed);
        log::set_max_level(level);
    }

    pub fn level(&self) -> LevelFilter {
        level_from_u8(self.level.load(Ordering::Relaxed) as u8)
    }

    /// `(total, dropped)` records seen since boot
    pub fn stats(&self) -> (usize, usize) {
        (
            self.total_logs.load(Ordering::Relaxed),
            self.dropped_logs.load(Ordering::Relaxed),
        )
    }

    /// Hand every entry not yet drained to `sink`, oldest first. Entries
    /// overwritten before they were drained are skipped.
    pub fn drain<F: FnMut(&LogEntry)>(&self, mut sink: F) -> usize {
        let mut ring = self.ring.lock();
        let oldest = ring.read_pos.max(ring.write_pos.saturating_sub(LOG_ENTRIES));
        let end = ring.write_pos;
        for pos in oldest..end {
            sink(&ring.entries[pos % LOG_ENTRIES]);
        }
        ring.read_pos = end;
        end - oldest
    }
}

impl Default for RingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.total_logs.fetch_add(1, Ordering::Relaxed);

        let mut entry = LogEntry::new();
        entry.level = record.level();
        entry.module = record
            .module_path_static()
            .or_else(|| record.file_static())
            .unwrap_or("?");
        entry.line = record.line().unwrap_or(0);
        let _ = SlotWriter { entry: &mut entry, full: false }.write_fmt(*record.args());

        match self.ring.try_lock() {
            Some(mut ring) => {
                let slot = ring.write_pos % LOG_ENTRIES;
                ring.entries[slot] = entry;
                ring.write_pos += 1;
            }
            None => {
                self.dropped_logs.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn flush(&self) {}
}

/// Stored level byte to filter: 0 off up to 5 trace.
pub fn level_from_u8(value: u8) -> LevelFilter {
    match value {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::vec::Vec;

    fn emit(logger: &RingLogger, level: Level, args: fmt::Arguments) {
        logger.log(
            &Record::builder()
                .args(args)
                .level(level)
                .module_path_static(Some("ideasy::test"))
                .line(Some(7))
                .build(),
        );
    }

    #[test]
    fn drains_oldest_first_once() {
        let logger = RingLogger::new();
        logger.level.store(LevelFilter::Debug as usize, Ordering::Relaxed);
        for i in 0..3 {
            emit(&logger, Level::Info, format_args!("entry {}", i));
        }
        let mut seen = Vec::new();
        assert_eq!(logger.drain(|e| seen.push(String::from(e.message()))), 3);
        assert_eq!(seen, ["entry 0", "entry 1", "entry 2"]);
        assert_eq!(logger.drain(|_| panic!("already drained")), 0);
    }

    #[test]
    fn wraps_and_keeps_newest() {
        let logger = RingLogger::new();
        for i in 0..LOG_ENTRIES + 10 {
            emit(&logger, Level::Warn, format_args!("{}", i));
        }
        let mut first = None;
        let n = logger.drain(|e| {
            first.get_or_insert(String::from(e.message()));
        });
        assert_eq!(n, LOG_ENTRIES);
        assert_eq!(first.as_deref(), Some("10"));
        assert_eq!(logger.stats(), (LOG_ENTRIES + 10, 0));
    }

    #[test]
    fn long_messages_truncate() {
        let logger = RingLogger::new();
        let long = "é".repeat(MAX_MESSAGE_LEN);
        emit(&logger, Level::Error, format_args!("{}", long));
        logger.drain(|e| {
            assert!(e.message().len() <= MAX_MESSAGE_LEN);
            assert!(e.message().len() >= MAX_MESSAGE_LEN - 1);
            assert!(e.message().chars().all(|c| c == 'é'));
            assert_eq!((e.module(), e.line()), ("ideasy::test", 7));
        });
    }

    #[test]
    fn filtered_and_contended_records() {
        let logger = RingLogger::new();
        emit(&logger, Level::Debug, format_args!("hidden"));
        assert_eq!(logger.stats(), (0, 0));

        let held = logger.ring.lock();
        emit(&logger, Level::Error, format_args!("contended"));
        drop(held);
        assert_eq!(logger.stats(), (1, 1));
        assert_eq!(logger.drain(|_| {}), 0);
    }

    #[test]
    fn level_bytes() {
        assert_eq!(level_from_u8(0), LevelFilter::Off);
        assert_eq!(level_from_u8(4), LevelFilter::Debug);
        assert_eq!(level_from_u8(200), LevelFilter::Trace);
    }
}
