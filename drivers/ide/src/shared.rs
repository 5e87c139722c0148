//! State visible to both execution contexts.
//!
//! Each field has one access discipline:
//!
//! | Field                                   | Discipline |
//! |-----------------------------------------|------------|
//! | geometry, totals, LBA/LBA48 mode        | lockout    |
//! | write protect, compat timing            | lockout    |
//! | mounted                                 | atomic     |
//! | media changed (test-and-clear)          | atomic     |
//!
//! Lockout fields live in one [`DriveState`]. The worker context reads and
//! writes it directly; anyone else pauses the worker at a safe point first,
//! so a reader never sees half of a multi-field update. `mounted` is polled
//! on the host's hot path and must never wait for the worker.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::types::{DriveFlags, DriveGeometry, DriveState, Snapshot};

const NO_WORKER: usize = usize::MAX;

/// Cooperative rendezvous that parks the worker at its next safe point.
pub struct Lockout {
    gate: Mutex<()>,
    requested: AtomicBool,
    parked: AtomicBool,
    online: AtomicBool,
}

impl Lockout {
    pub const fn new() -> Self {
        Lockout {
            gate: Mutex::new(()),
            requested: AtomicBool::new(false),
            parked: AtomicBool::new(false),
            online: AtomicBool::new(false),
        }
    }

    /// Worker side: start honouring lockout requests. Must be followed by a
    /// safe point before the worker touches shared state.
    pub fn go_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    pub fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Worker side: park here while a lockout is held.
    pub fn safe_point(&self) {
        if !self.requested.load(Ordering::SeqCst) {
            return;
        }
        self.parked.store(true, Ordering::SeqCst);
        while self.requested.load(Ordering::SeqCst) {
            core::hint::spin_loop();
        }
        self.parked.store(false, Ordering::SeqCst);
    }

    /// Host side: pause the worker until the guard drops.
    pub fn hold(&self) -> LockoutGuard<'_> {
        let gate = self.gate.lock();
        self.requested.store(true, Ordering::SeqCst);
        while self.online.load(Ordering::SeqCst) && !self.parked.load(Ordering::SeqCst) {
            core::hint::spin_loop();
        }
        LockoutGuard { lockout: self, _gate: gate }
    }
}

impl Default for Lockout {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LockoutGuard<'a> {
    lockout: &'a Lockout,
    _gate: spin::MutexGuard<'a, ()>,
}

impl Drop for LockoutGuard<'_> {
    fn drop(&mut self) {
        self.lockout.requested.store(false, Ordering::SeqCst);
        // The next holder must not mistake this park for its own.
        while self.lockout.online.load(Ordering::SeqCst)
            && self.lockout.parked.load(Ordering::SeqCst)
        {
            core::hint::spin_loop();
        }
    }
}

pub struct SharedState {
    lockout: Lockout,
    drive: UnsafeCell<DriveState>,
    mounted: AtomicBool,
    media_changed: AtomicBool,
    worker: AtomicUsize,
}

// `drive` is only touched by the worker between safe points, or by a
// lockout holder while the worker is parked or offline.
unsafe impl Sync for SharedState {}

impl SharedState {
    pub const fn new() -> Self {
        SharedState {
            lockout: Lockout::new(),
            drive: UnsafeCell::new(DriveState::new()),
            mounted: AtomicBool::new(false),
            media_changed: AtomicBool::new(false),
            worker: AtomicUsize::new(NO_WORKER),
        }
    }

    pub fn lockout(&self) -> &Lockout {
        &self.lockout
    }

    /// Make `ctx` the worker context. Only the first claim succeeds.
    pub fn claim_worker(&self, ctx: usize) -> bool {
        self.worker
            .compare_exchange(NO_WORKER, ctx, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_worker(&self, ctx: usize) -> bool {
        self.worker.load(Ordering::Acquire) == ctx
    }

    pub fn worker_claimed(&self) -> bool {
        self.worker.load(Ordering::Acquire) != NO_WORKER
    }

    /// Park point for the worker; a no-op on any other context.
    pub fn safe_point(&self, ctx: usize) {
        if self.is_worker(ctx) {
            self.lockout.safe_point();
        }
    }

    /// Run `f` with exclusive access to the lockout fields.
    pub fn with<R>(&self, ctx: usize, f: impl FnOnce(&mut DriveState) -> R) -> R {
        if self.is_worker(ctx) {
            // SAFETY: the worker only gets here between safe points, and a
            // lockout holder only proceeds once the worker is parked.
            unsafe { f(&mut *self.drive.get()) }
        } else {
            let _hold = self.lockout.hold();
            // SAFETY: the gate excludes other holders and the worker is
            // parked or has not come online yet.
            unsafe { f(&mut *self.drive.get()) }
        }
    }

    pub fn drive(&self, ctx: usize) -> DriveState {
        self.with(ctx, |d| *d)
    }

    pub fn snapshot(&self, ctx: usize) -> Snapshot {
        let drive = self.drive(ctx);
        Snapshot {
            geometry: drive.geometry,
            flags: DriveFlags {
                mounted: self.is_mounted(),
                write_protected: drive.write_protected,
                compat_timing_enabled: drive.compat_timing,
                media_changed_pending: self.media_changed.load(Ordering::Acquire),
            },
        }
    }

    pub fn set_chs_geometry(&self, ctx: usize, cylinders: u16, heads: u8, sectors_per_track: u8) {
        self.with(ctx, |d| {
            d.geometry.cylinders = cylinders;
            d.geometry.heads = heads;
            d.geometry.sectors_per_track = sectors_per_track;
        })
    }

    pub fn set_total_lba(&self, ctx: usize, total: u64) {
        self.with(ctx, |d| d.geometry.total_lba_sectors = total)
    }

    pub fn set_lba_mode(&self, ctx: usize, enable: bool) {
        self.with(ctx, |d| d.geometry.use_lba_mode = enable)
    }

    pub fn set_supports_lba48(&self, ctx: usize, supported: bool) {
        self.with(ctx, |d| d.geometry.supports_lba48 = supported)
    }

    pub fn set_write_protected(&self, ctx: usize, protected: bool) {
        self.with(ctx, |d| d.write_protected = protected)
    }

    pub fn set_compat_timing(&self, ctx: usize, enable: bool) {
        self.with(ctx, |d| d.compat_timing = enable)
    }

    pub fn compat_timing(&self, ctx: usize) -> bool {
        self.with(ctx, |d| d.compat_timing)
    }

    /// Forget geometry, totals and LBA mode in one step.
    pub fn clear_geometry(&self, ctx: usize) {
        self.with(ctx, |d| {
            let lba48 = d.geometry.supports_lba48;
            d.geometry = DriveGeometry::empty();
            d.geometry.supports_lba48 = lba48;
        })
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.mounted.store(mounted, Ordering::Release);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    pub fn notify_media_changed(&self) {
        self.media_changed.store(true, Ordering::Release);
    }

    /// True exactly once per notification, whichever context asks.
    pub fn consume_media_changed(&self) -> bool {
        self.media_changed.swap(false, Ordering::AcqRel)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use crate::sim::SimPlatform;
    use alloc::sync::Arc;
    use core::sync::atomic::AtomicU32;
    use std::thread;

    /// Worker loop that keeps two lockout fields in lock-step and only
    /// offers safe points between updates.
    fn spawn_writer(shared: Arc<SharedState>, stop: Arc<AtomicBool>) -> thread::JoinHandle<u32> {
        thread::spawn(move || {
            let ctx = SimPlatform::new().context_id();
            assert!(shared.claim_worker(ctx));
            shared.lockout().go_online();
            let mut n: u32 = 0;
            while !stop.load(Ordering::SeqCst) {
                shared.safe_point(ctx);
                n = n.wrapping_add(1);
                shared.with(ctx, |d| {
                    d.geometry.cylinders = n as u16;
                    for _ in 0..50 {
                        core::hint::spin_loop();
                    }
                    d.geometry.heads = n as u8;
                    d.geometry.sectors_per_track = (n >> 8) as u8;
                });
            }
            shared.lockout().go_offline();
            n
        })
    }

    #[test]
    fn host_snapshot_never_tears() {
        let shared = Arc::new(SharedState::new());
        let stop = Arc::new(AtomicBool::new(false));
        let writer = spawn_writer(shared.clone(), stop.clone());
        let host = SimPlatform::new();

        while !shared.lockout().is_online() {
            thread::yield_now();
        }
        for _ in 0..2000 {
            let snap = shared.snapshot(host.context_id());
            let g = snap.geometry;
            assert_eq!(g.cylinders as u8, g.heads);
            assert_eq!((g.cylinders >> 8) as u8, g.sectors_per_track);
        }
        stop.store(true, Ordering::SeqCst);
        assert!(writer.join().unwrap() > 0);
    }

    #[test]
    fn host_setter_lands_whole() {
        let shared = Arc::new(SharedState::new());
        let stop = Arc::new(AtomicBool::new(false));
        let torn = Arc::new(AtomicU32::new(0));

        let reader = {
            let shared = shared.clone();
            let stop = stop.clone();
            let torn = torn.clone();
            thread::spawn(move || {
                let ctx = SimPlatform::new().context_id();
                assert!(shared.claim_worker(ctx));
                shared.lockout().go_online();
                while !stop.load(Ordering::SeqCst) {
                    shared.safe_point(ctx);
                    let g = shared.drive(ctx).geometry;
                    if g.heads as u16 != g.cylinders % 251 || g.sectors_per_track != g.heads {
                        torn.fetch_add(1, Ordering::SeqCst);
                    }
                }
                shared.lockout().go_offline();
            })
        };

        let host = SimPlatform::new().context_id();
        while !shared.lockout().is_online() {
            thread::yield_now();
        }
        for c in 0..1000u16 {
            let h = (c % 251) as u8;
            shared.set_chs_geometry(host, c, h, h);
        }
        stop.store(true, Ordering::SeqCst);
        reader.join().unwrap();
        assert_eq!(torn.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mounted_poll_does_not_wait_for_worker() {
        let shared = Arc::new(SharedState::new());
        let stop = Arc::new(AtomicBool::new(false));

        // Online worker that never reaches a safe point.
        let worker = {
            let shared = shared.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let ctx = SimPlatform::new().context_id();
                assert!(shared.claim_worker(ctx));
                shared.lockout().go_online();
                while !stop.load(Ordering::SeqCst) {
                    thread::yield_now();
                }
                shared.lockout().go_offline();
            })
        };
        while !shared.lockout().is_online() {
            thread::yield_now();
        }

        shared.set_mounted(true);
        assert!(shared.is_mounted());
        shared.notify_media_changed();
        assert!(shared.consume_media_changed());
        assert!(!shared.consume_media_changed());

        stop.store(true, Ordering::SeqCst);
        worker.join().unwrap();
    }

    #[test]
    fn media_changed_consumed_once_across_threads() {
        let shared = Arc::new(SharedState::new());
        for _ in 0..50 {
            shared.notify_media_changed();
            let hits: u32 = (0..4)
                .map(|_| {
                    let shared = shared.clone();
                    thread::spawn(move || shared.consume_media_changed() as u32)
                })
                .collect::<alloc::vec::Vec<_>>()
                .into_iter()
                .map(|h| h.join().unwrap())
                .sum();
            assert_eq!(hits, 1);
        }
    }

    #[test]
    fn worker_claim_is_exclusive() {
        let shared = SharedState::new();
        assert!(!shared.worker_claimed());
        assert!(shared.claim_worker(1));
        assert!(!shared.claim_worker(2));
        assert!(shared.is_worker(1));
        assert!(!shared.is_worker(2));
    }

    #[test]
    fn clear_geometry_keeps_capability() {
        let shared = SharedState::new();
        let ctx = 7;
        shared.set_chs_geometry(ctx, 100, 4, 63);
        shared.set_total_lba(ctx, 25_200);
        shared.set_lba_mode(ctx, true);
        shared.set_supports_lba48(ctx, true);
        shared.clear_geometry(ctx);
        let g = shared.drive(ctx).geometry;
        assert_eq!(g.capacity(), 0);
        assert!(!g.use_lba_mode);
        assert!(g.supports_lba48);
    }
}
