//! Sliding read window in front of the transfer engine.

use alloc::boxed::Box;
use alloc::vec;

use crate::consts::SECTOR_SIZE;
use crate::error::{IdeError, IdeResult};

pub const CACHE_SECTORS: u32 = 128;

/// One contiguous run of sectors, filled by a single engine read.
/// Empty exactly when `start` is `None`.
pub struct ReadCache {
    start: Option<u64>,
    count: u32,
    bytes: Box<[u8]>,
}

impl ReadCache {
    pub fn new() -> Self {
        ReadCache {
            start: None,
            count: 0,
            bytes: vec![0u8; CACHE_SECTORS as usize * SECTOR_SIZE].into_boxed_slice(),
        }
    }

    /// Start and length of the cached run, if any.
    pub fn window(&self) -> Option<(u64, u32)> {
        self.start.map(|s| (s, self.count))
    }

    pub fn clear(&mut self) {
        self.start = None;
        self.count = 0;
    }

    /// Drop the window if it overlaps `[lba, lba + count)`.
    pub fn invalidate_range(&mut self, lba: u64, count: u32) {
        if let Some(start) = self.start {
            let end = start + self.count as u64;
            let write_end = lba.saturating_add(count as u64);
            if write_end > start && lba < end {
                self.clear();
            }
        }
    }

    fn contains(&self, lba: u64, count: u32) -> bool {
        match self.start {
            Some(start) => lba >= start && lba + count as u64 <= start + self.count as u64,
            None => false,
        }
    }

    /// Serve `count` sectors at `lba` into `buf`.
    ///
    /// A request running past `capacity` is cut short at the end of the
    /// device; the returned byte count says how much was delivered. Large
    /// requests go straight to `fill` with the caller's buffer. `fill(lba,
    /// count, buf)` must read exactly `count` sectors.
    pub fn read<F>(
        &mut self,
        lba: u64,
        count: u32,
        buf: &mut [u8],
        capacity: u64,
        fill: F,
    ) -> IdeResult<usize>
    where
        F: FnOnce(u64, u32, &mut [u8]) -> IdeResult<usize>,
    {
        if count == 0 {
            return Ok(0);
        }
        if lba >= capacity {
            return Err(IdeError::OutOfRange);
        }
        let count = (count as u64).min(capacity - lba) as u32;
        let len = count as usize * SECTOR_SIZE;
        if buf.len() < len {
            return Err(IdeError::OutOfRange);
        }

        if count >= CACHE_SECTORS {
            return fill(lba, count, &mut buf[..len]);
        }

        if !self.contains(lba, count) {
            let fill_count = (CACHE_SECTORS as u64).min(capacity - lba) as u32;
            self.clear();
            let window = &mut self.bytes[..fill_count as usize * SECTOR_SIZE];
            fill(lba, fill_count, window)?;
            self.start = Some(lba);
            self.count = fill_count;
        }

        let offset = match self.start {
            Some(start) => (lba - start) as usize * SECTOR_SIZE,
            None => return Err(IdeError::OutOfRange),
        };
        buf[..len].copy_from_slice(&self.bytes[offset..offset + len]);
        Ok(len)
    }
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    /// Backing store whose sector `n` is filled with `n as u8`.
    fn fake_fill(calls: &mut Vec<(u64, u32)>) -> impl FnMut(u64, u32, &mut [u8]) -> IdeResult<usize> + '_ {
        move |lba, count, buf| {
            calls.push((lba, count));
            for (i, sector) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
                sector.fill((lba + i as u64) as u8);
            }
            Ok(count as usize * SECTOR_SIZE)
        }
    }

    #[test]
    fn miss_fills_window_then_hits() {
        let mut cache = ReadCache::new();
        let mut calls = Vec::new();
        let mut buf = vec![0u8; 4 * SECTOR_SIZE];

        assert_eq!(cache.read(10, 4, &mut buf, 1000, fake_fill(&mut calls)), Ok(2048));
        assert_eq!(cache.window(), Some((10, CACHE_SECTORS)));
        assert_eq!(buf[0], 10);
        assert_eq!(buf[3 * SECTOR_SIZE], 13);

        assert_eq!(cache.read(100, 4, &mut buf, 1000, fake_fill(&mut calls)), Ok(2048));
        assert_eq!(buf[0], 100);
        assert_eq!(calls, [(10, CACHE_SECTORS)]);
    }

    #[test]
    fn window_clamped_to_capacity() {
        let mut cache = ReadCache::new();
        let mut calls = Vec::new();
        let mut buf = vec![0u8; SECTOR_SIZE];
        assert!(cache.read(950, 1, &mut buf, 1000, fake_fill(&mut calls)).is_ok());
        assert_eq!(cache.window(), Some((950, 50)));
    }

    #[test]
    fn bypass_leaves_window_alone() {
        let mut cache = ReadCache::new();
        let mut calls = Vec::new();
        let mut small = vec![0u8; SECTOR_SIZE];
        cache.read(0, 1, &mut small, 10_000, fake_fill(&mut calls)).unwrap();
        let window = cache.window();

        let mut big = vec![0u8; 200 * SECTOR_SIZE];
        assert_eq!(cache.read(5000, 200, &mut big, 10_000, fake_fill(&mut calls)), Ok(200 * SECTOR_SIZE));
        assert_eq!(cache.window(), window);
        assert_eq!(calls[1], (5000, 200));
    }

    #[test]
    fn failed_fill_empties_window() {
        let mut cache = ReadCache::new();
        let mut calls = Vec::new();
        let mut buf = vec![0u8; SECTOR_SIZE];
        cache.read(0, 1, &mut buf, 1000, fake_fill(&mut calls)).unwrap();
        let r = cache.read(500, 1, &mut buf, 1000, |_, _, _| Err(IdeError::Timeout));
        assert_eq!(r, Err(IdeError::Timeout));
        assert_eq!(cache.window(), None);
    }

    #[test]
    fn boundaries() {
        let mut cache = ReadCache::new();
        let mut calls = Vec::new();
        let mut buf = vec![0u8; 2 * SECTOR_SIZE];
        assert_eq!(cache.read(1000, 1, &mut buf, 1000, fake_fill(&mut calls)), Err(IdeError::OutOfRange));
        assert_eq!(cache.read(998, 2, &mut buf, 1000, fake_fill(&mut calls)), Ok(1024));
        // Runs past the end are cut short.
        assert_eq!(cache.read(999, 2, &mut buf, 1000, fake_fill(&mut calls)), Ok(512));
        assert_eq!(cache.read(0, 0, &mut buf, 1000, fake_fill(&mut calls)), Ok(0));
    }

    #[test]
    fn invalidate_only_on_overlap() {
        let mut cache = ReadCache::new();
        let mut calls = Vec::new();
        let mut buf = vec![0u8; SECTOR_SIZE];
        cache.read(100, 1, &mut buf, 1000, fake_fill(&mut calls)).unwrap();

        cache.invalidate_range(90, 10);
        cache.invalidate_range(228, 5);
        assert_eq!(cache.window(), Some((100, CACHE_SECTORS)));

        cache.invalidate_range(227, 1);
        assert_eq!(cache.window(), None);
    }

    #[test]
    fn clear_twice_is_clear_once() {
        let mut cache = ReadCache::new();
        let mut calls = Vec::new();
        let mut buf = vec![0u8; SECTOR_SIZE];
        cache.read(0, 1, &mut buf, 1000, fake_fill(&mut calls)).unwrap();
        cache.clear();
        cache.clear();
        assert_eq!(cache.window(), None);
    }

    #[test]
    fn short_buffer_rejected() {
        let mut cache = ReadCache::new();
        let mut calls = Vec::new();
        let mut buf = vec![0u8; 100];
        assert_eq!(cache.read(0, 1, &mut buf, 1000, fake_fill(&mut calls)), Err(IdeError::OutOfRange));
        assert!(calls.is_empty());
    }
}
