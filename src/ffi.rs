//! C entry points for the USB mass-storage glue and the UI on core 0.
//!
//! Everything returning `i32` follows one convention: non-negative on
//! success (a byte count or register value), a negative `IdeError` code
//! otherwise. Calls made before [`ide_init`] report `NotReady`.

use core::panic::PanicInfo;
use core::slice;

use conquer_once::spin::OnceCell;
use ide::consts::{SECTOR_SIZE, SECTOR_WORDS};
use ide::msc;
use ide::{Controller, IdeConfig, IdeError, IdeResult};

use crate::boot;
use crate::config::StoredConfig;
use crate::logger::RingLogger;
use crate::rp2040::{self, Rp2040, SioPort};

type BoardController = Controller<SioPort, Rp2040>;

static CONTROLLER: OnceCell<BoardController> = OnceCell::uninit();
static STORED: OnceCell<StoredConfig> = OnceCell::uninit();
static LOGGER: RingLogger = RingLogger::new();

fn controller() -> IdeResult<&'static BoardController> {
    CONTROLLER.get().ok_or(IdeError::NotReady)
}

/// Snapshot layout shared with C
#[repr(C)]
pub struct IdeSnapshot {
    pub total_lba: u64,
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub write_protected: bool,
    pub supports_lba48: bool,
    pub use_lba_mode: bool,
}

extern "C" fn core1_entry() {
    let Ok(controller) = controller() else {
        return;
    };
    let stored = STORED.get().copied().unwrap_or_default();
    controller.run_with(|c| boot::startup(c, &stored));
}

/// Bring up the heap, logger and driver and start the worker on core 1.
/// `settings` points at the 16-byte stored settings block (may be null).
///
/// # Safety
///
/// Call once from core 0 before any other function here. `settings` must
/// be null or valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn ide_init(settings: *const u8, len: usize) -> i32 {
    if CONTROLLER.get().is_some() {
        return 0;
    }
    rp2040::init_heap();

    let stored = if settings.is_null() {
        StoredConfig::DEFAULT
    } else {
        StoredConfig::load(slice::from_raw_parts(settings, len))
    };
    LOGGER.install_racy(stored.level_filter());
    if let Err(e) = boot::publish(&STORED, stored, "stored settings") {
        return e.code();
    }
    let built = Controller::new(SioPort, Rp2040, IdeConfig::DEFAULT);
    if let Err(e) = boot::publish(&CONTROLLER, built, "controller") {
        return e.code();
    }
    match controller() {
        Ok(c) => {
            c.launch(|| rp2040::multicore_launch_core1(core1_entry));
            0
        }
        Err(e) => e.code(),
    }
}

unsafe fn sectors_mut<'a>(buf: *mut u8, count: u32) -> IdeResult<&'a mut [u8]> {
    if buf.is_null() {
        return Err(IdeError::OutOfRange);
    }
    Ok(slice::from_raw_parts_mut(buf, count as usize * SECTOR_SIZE))
}

unsafe fn sectors<'a>(buf: *const u8, count: u32) -> IdeResult<&'a [u8]> {
    if buf.is_null() {
        return Err(IdeError::OutOfRange);
    }
    Ok(slice::from_raw_parts(buf, count as usize * SECTOR_SIZE))
}

/// # Safety
///
/// `buf` must be valid for `count * 512` bytes.
#[no_mangle]
pub unsafe extern "C" fn ide_read_cached(lba: u32, count: u32, buf: *mut u8) -> i32 {
    msc::status_bytes(controller().and_then(|c| c.read_cached(lba as u64, count, sectors_mut(buf, count)?)))
}

/// # Safety
///
/// `buf` must be valid for `count * 512` bytes.
#[no_mangle]
pub unsafe extern "C" fn ide_read_sectors(lba: u32, count: u32, buf: *mut u8) -> i32 {
    msc::status_bytes(controller().and_then(|c| c.read_sectors(lba as u64, count, sectors_mut(buf, count)?)))
}

/// # Safety
///
/// `buf` must be valid for `count * 512` bytes.
#[no_mangle]
pub unsafe extern "C" fn ide_write_sectors(lba: u32, count: u32, buf: *const u8) -> i32 {
    msc::status_bytes(controller().and_then(|c| c.write_sectors(lba as u64, count, sectors(buf, count)?)))
}

#[no_mangle]
pub extern "C" fn ide_flush_cache() -> i32 {
    msc::status(controller().and_then(|c| c.flush_cache()))
}

/// # Safety
///
/// `out` must be null or point at a writable `IdeSnapshot`.
#[no_mangle]
pub unsafe extern "C" fn ide_get_snapshot(out: *mut IdeSnapshot) -> bool {
    let (Ok(c), false) = (controller(), out.is_null()) else {
        return false;
    };
    let snap = c.snapshot();
    out.write(IdeSnapshot {
        total_lba: snap.geometry.total_lba_sectors,
        cylinders: snap.geometry.cylinders,
        heads: snap.geometry.heads,
        sectors_per_track: snap.geometry.sectors_per_track,
        write_protected: snap.flags.write_protected,
        supports_lba48: snap.geometry.supports_lba48,
        use_lba_mode: snap.geometry.use_lba_mode,
    });
    true
}

#[no_mangle]
pub extern "C" fn ide_is_mounted() -> bool {
    controller().map(|c| c.is_mounted()).unwrap_or(false)
}

#[no_mangle]
pub extern "C" fn ide_consume_media_changed() -> bool {
    controller().map(|c| c.consume_media_changed()).unwrap_or(false)
}

#[no_mangle]
pub extern "C" fn ide_notify_media_changed() {
    if let Ok(c) = controller() {
        c.notify_media_changed();
    }
}

#[no_mangle]
pub extern "C" fn ide_unit_ready() -> bool {
    controller()
        .map(|c| msc::unit_ready(&c.snapshot(), c.is_mounted()))
        .unwrap_or(false)
}

#[no_mangle]
pub extern "C" fn ide_block_count() -> u32 {
    controller().map(|c| msc::block_count(&c.snapshot())).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn ide_reset_drive() -> i32 {
    msc::status(controller().and_then(|c| c.reset_drive()))
}

#[no_mangle]
pub extern "C" fn ide_identify_drive() -> i32 {
    msc::status(controller().and_then(|c| c.identify()))
}

/// # Safety
///
/// `words` must be null or valid for 256 `u16` writes.
#[no_mangle]
pub unsafe extern "C" fn ide_get_identify_data(words: *mut u16) -> bool {
    if words.is_null() {
        return false;
    }
    let words = &mut *(words as *mut [u16; SECTOR_WORDS]);
    controller().and_then(|c| c.get_identify_data(words)).is_ok()
}

#[no_mangle]
pub extern "C" fn ide_set_geometry(heads: u8, sectors_per_track: u8) -> bool {
    controller()
        .and_then(|c| c.set_geometry(heads, sectors_per_track))
        .is_ok()
}

#[no_mangle]
pub extern "C" fn ide_read_register(reg: u8) -> i32 {
    match controller().and_then(|c| c.read_register(reg)) {
        Ok(value) => value as i32,
        Err(e) => e.code(),
    }
}

#[no_mangle]
pub extern "C" fn ide_write_register(reg: u8, value: u8) -> i32 {
    msc::status(controller().and_then(|c| c.write_register(reg, value)))
}

/// # Safety
///
/// `out` must be null or valid for 8 byte writes.
#[no_mangle]
pub unsafe extern "C" fn ide_get_task_file(out: *mut u8) -> i32 {
    if out.is_null() {
        return IdeError::OutOfRange.code();
    }
    match controller().and_then(|c| c.read_task_file()) {
        Ok(regs) => {
            out.copy_from_nonoverlapping(regs.as_ptr(), regs.len());
            0
        }
        Err(e) => e.code(),
    }
}

#[no_mangle]
pub extern "C" fn ide_wait_until_ready(timeout_ms: u32) -> bool {
    controller()
        .and_then(|c| c.wait_until_ready(timeout_ms))
        .unwrap_or(false)
}

#[no_mangle]
pub extern "C" fn ide_set_compat_timing(enable: bool) {
    if let Ok(c) = controller() {
        c.set_compat_timing(enable);
    }
}

#[no_mangle]
pub extern "C" fn ide_get_compat_timing() -> bool {
    controller().map(|c| c.compat_timing()).unwrap_or(false)
}

#[no_mangle]
pub extern "C" fn ide_set_mounted(mounted: bool) {
    if let Ok(c) = controller() {
        c.set_mounted(mounted);
    }
}

#[no_mangle]
pub extern "C" fn ide_set_write_protected(protected: bool) {
    if let Ok(c) = controller() {
        c.set_write_protected(protected);
    }
}

#[no_mangle]
pub extern "C" fn ide_set_lba_mode(enable: bool) {
    if let Ok(c) = controller() {
        c.set_lba_mode(enable);
    }
}

#[no_mangle]
pub extern "C" fn ide_clear_geometry() {
    if let Ok(c) = controller() {
        c.clear_geometry();
    }
}

/// Pass pending log lines to `sink` as (pointer, length) pairs, oldest
/// first. Returns the number of lines.
#[no_mangle]
pub extern "C" fn ide_log_drain(sink: extern "C" fn(*const u8, usize)) -> usize {
    LOGGER.drain(|entry| {
        let msg = entry.message();
        sink(msg.as_ptr(), msg.len());
    })
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("panic: {}", info);
    loop {
        core::hint::spin_loop();
    }
}
