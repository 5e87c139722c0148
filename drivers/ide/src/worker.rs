//! Cross-context request channel.
//!
//! # Architecture
//!
//! A [`Controller`] owns the driver. One execution context becomes the
//! worker by calling [`Controller::run`]; it initializes the bus once and
//! then serves requests one at a time, in the order they were queued.
//! Every other context talks to it through [`Controller::dispatch`]:
//!
//! - from a foreign context the operation is queued (never blocking on a
//!   full queue, which yields [`IdeError::Busy`]) and the caller spins on a
//!   per-call completion flag until the worker has written the result;
//! - from the worker context itself the operation runs inline, since
//!   queueing would wait on a signal only the worker can raise.
//!
//! # Safety
//!
//! A queued [`Request`] points at a [`Job`] on the caller's stack. The
//! caller does not return until the job's completion flag is set, and the
//! worker stores that flag last, so the pointer never outlives the job.
//!
//! A request that races [`Controller::shutdown`] is completed with
//! [`IdeError::NotReady`]: the worker fails whatever is left in the queue
//! after it stops, and a submitter that finds the worker already stopped
//! fails the leftovers itself.

use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_queue::ArrayQueue;
use spin::Mutex;

use crate::bus::IdePort;
use crate::config::IdeConfig;
use crate::consts::SECTOR_WORDS;
use crate::device::{IdeDevice, Operation, Reply};
use crate::error::{IdeError, IdeResult};
use crate::platform::Platform;
use crate::shared::SharedState;
use crate::types::Snapshot;

pub const REQUEST_QUEUE_DEPTH: usize = 4;

struct Completion {
    done: AtomicBool,
    result: UnsafeCell<Option<IdeResult<Reply>>>,
}

impl Completion {
    fn new() -> Self {
        Completion {
            done: AtomicBool::new(false),
            result: UnsafeCell::new(None),
        }
    }

    fn complete(&self, result: IdeResult<Reply>) {
        // SAFETY: the waiter does not read `result` before `done` is set.
        unsafe { *self.result.get() = Some(result) };
        self.done.store(true, Ordering::Release);
    }

    fn wait<P: Platform>(&self, platform: &P) -> IdeResult<Reply> {
        while !self.done.load(Ordering::Acquire) {
            platform.relax();
        }
        // SAFETY: the worker wrote `result` before publishing `done` and
        // does not touch the job again.
        unsafe { (*self.result.get()).take() }.unwrap_or(Err(IdeError::NotReady))
    }
}

struct Job<'a> {
    op: UnsafeCell<Option<Operation<'a>>>,
    completion: Completion,
}

struct Request {
    job: NonNull<Job<'static>>,
}

// The job is pinned on the submitting stack until completion.
unsafe impl Send for Request {}

#[derive(Default)]
pub struct WorkerStats {
    enqueued: AtomicUsize,
    rejected: AtomicUsize,
    served: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub enqueued: usize,
    pub rejected: usize,
    pub served: usize,
    pub max_in_flight: usize,
}

impl WorkerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            served: self.served.load(Ordering::Relaxed),
            max_in_flight: self.max_in_flight.load(Ordering::Relaxed),
        }
    }
}

pub struct Controller<B: IdePort + Send, P: Platform> {
    device: Mutex<IdeDevice<B>>,
    config: IdeConfig,
    queue: ArrayQueue<Request>,
    shared: SharedState,
    platform: P,
    started: AtomicBool,
    halted: AtomicBool,
    stopped: AtomicBool,
    stats: WorkerStats,
}

impl<B: IdePort + Send, P: Platform> Controller<B, P> {
    pub fn new(port: B, platform: P, config: IdeConfig) -> Self {
        Controller {
            device: Mutex::new(IdeDevice::new(port, config)),
            config,
            queue: ArrayQueue::new(REQUEST_QUEUE_DEPTH),
            shared: SharedState::new(),
            platform,
            started: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stats: WorkerStats::default(),
        }
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    pub fn config(&self) -> &IdeConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn ctx(&self) -> usize {
        self.platform.context_id()
    }

    pub fn on_worker(&self) -> bool {
        self.shared.is_worker(self.ctx())
    }

    /// Start the worker once. `spawn` must arrange for [`run`](Self::run)
    /// to be called on the worker context; it is invoked by the first
    /// caller only. Calls from the worker context are ignored.
    pub fn launch<F: FnOnce()>(&self, spawn: F) -> bool {
        if self.on_worker() {
            return false;
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        spawn();
        true
    }

    pub fn run(&self) {
        self.run_with(|_| {})
    }

    /// Worker loop. `startup` runs on the worker after the bus is set up
    /// and before queued requests are served; proxies called from it run
    /// inline.
    pub fn run_with<F: FnOnce(&Self)>(&self, startup: F) {
        let ctx = self.ctx();
        if !self.shared.claim_worker(ctx) {
            log::warn!("ide: worker already running");
            return;
        }
        self.started.store(true, Ordering::Release);
        let lockout = self.shared.lockout();
        lockout.go_online();
        lockout.safe_point();

        self.device.lock().init_hardware();
        log::debug!("ide: worker online on context {}", ctx);
        startup(self);

        loop {
            if let Some(request) = self.queue.pop() {
                self.serve(request);
                continue;
            }
            if self.halted.load(Ordering::Acquire) {
                break;
            }
            lockout.safe_point();
            self.platform.relax();
        }
        lockout.go_offline();
        self.stopped.store(true, Ordering::SeqCst);
        let dropped = self.fail_pending();
        log::debug!("ide: worker stopped, {} late requests refused", dropped);
    }

    /// Let the worker loop return once the queue is empty.
    pub fn shutdown(&self) {
        self.halted.store(true, Ordering::Release);
    }

    /// Complete every queued request with `NotReady`.
    fn fail_pending(&self) -> usize {
        let mut failed = 0;
        while let Some(request) = self.queue.pop() {
            // SAFETY: see module docs.
            let job = unsafe { request.job.as_ref() };
            job.completion.complete(Err(IdeError::NotReady));
            failed += 1;
        }
        failed
    }

    fn serve(&self, request: Request) {
        // SAFETY: see module docs.
        let job = unsafe { request.job.as_ref() };
        let op = unsafe { (*job.op.get()).take() };

        let depth = self.stats.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.max_in_flight.fetch_max(depth, Ordering::AcqRel);

        let result = match op {
            Some(op) => {
                let name = op.name();
                let result = self.device.lock().execute(op, &self.shared, &self.platform);
                if let Err(e) = result {
                    log::debug!("ide: {} failed: {}", name, e.description());
                }
                result
            }
            None => Err(IdeError::NotReady),
        };

        self.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.stats.served.fetch_add(1, Ordering::Relaxed);
        job.completion.complete(result);
    }

    /// Run `op` on the worker and return its result.
    pub fn dispatch(&self, op: Operation<'_>) -> IdeResult<Reply> {
        if self.on_worker() {
            let mut device = self.device.try_lock().ok_or(IdeError::Busy)?;
            return device.execute(op, &self.shared, &self.platform);
        }
        if !self.started.load(Ordering::Acquire) || self.halted.load(Ordering::Acquire) {
            return Err(IdeError::NotReady);
        }
        self.enqueue(op)
    }

    fn enqueue(&self, op: Operation<'_>) -> IdeResult<Reply> {
        let job = Job {
            op: UnsafeCell::new(Some(op)),
            completion: Completion::new(),
        };
        let request = Request {
            job: NonNull::from(&job).cast(),
        };
        if self.queue.push(request).is_err() {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(IdeError::Busy);
        }
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        // The worker may have made its last pass over the queue before
        // this push landed.
        if self.stopped.load(Ordering::SeqCst) {
            self.fail_pending();
        }
        job.completion.wait(&self.platform)
    }

    /* ============================================================================
     * DRIVER PROXIES
     * ============================================================================ */

    pub fn read_cached(&self, lba: u64, count: u32, buf: &mut [u8]) -> IdeResult<usize> {
        self.dispatch(Operation::ReadCached { lba, count, buf })?.bytes()
    }

    pub fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> IdeResult<usize> {
        self.dispatch(Operation::ReadSectors { lba, count, buf })?.bytes()
    }

    pub fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> IdeResult<usize> {
        self.dispatch(Operation::WriteSectors { lba, count, buf })?.bytes()
    }

    /// Drop the read cache on the worker.
    pub fn flush_cache(&self) -> IdeResult<()> {
        self.dispatch(Operation::FlushCache).map(drop)
    }

    pub fn identify(&self) -> IdeResult<()> {
        self.dispatch(Operation::SendIdentify).map(drop)
    }

    pub fn get_identify_data(&self, words: &mut [u16; SECTOR_WORDS]) -> IdeResult<()> {
        self.dispatch(Operation::ReadIdentify { words }).map(drop)
    }

    pub fn reset_drive(&self) -> IdeResult<()> {
        self.dispatch(Operation::Reset).map(drop)
    }

    pub fn set_geometry(&self, heads: u8, sectors_per_track: u8) -> IdeResult<()> {
        self.dispatch(Operation::SetGeometry { heads, sectors_per_track }).map(drop)
    }

    pub fn read_register(&self, reg: u8) -> IdeResult<u8> {
        match self.dispatch(Operation::ReadRegister { reg })? {
            Reply::Register(value) => Ok(value),
            _ => Err(IdeError::DeviceError),
        }
    }

    pub fn write_register(&self, reg: u8, value: u8) -> IdeResult<()> {
        self.dispatch(Operation::WriteRegister { reg, value }).map(drop)
    }

    /// Byte 0 is always zero, bytes 1..=7 hold registers 1..=7.
    pub fn read_task_file(&self) -> IdeResult<[u8; 8]> {
        match self.dispatch(Operation::ReadTaskFile)? {
            Reply::TaskFile(regs) => Ok(regs),
            _ => Err(IdeError::DeviceError),
        }
    }

    /// Wait for BSY to clear.
    pub fn wait_until_ready(&self, timeout_ms: u32) -> IdeResult<bool> {
        self.wait(timeout_ms, false)
    }

    /// Wait for BSY to clear and DRDY to be set.
    pub fn wait_until_drive_ready(&self, timeout_ms: u32) -> IdeResult<bool> {
        self.wait(timeout_ms, true)
    }

    fn wait(&self, timeout_ms: u32, require_drdy: bool) -> IdeResult<bool> {
        match self.dispatch(Operation::WaitReady { timeout_ms, require_drdy })? {
            Reply::Ready(ready) => Ok(ready),
            _ => Err(IdeError::DeviceError),
        }
    }

    /* ============================================================================
     * SHARED STATE
     * ============================================================================ */

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot(self.ctx())
    }

    pub fn set_chs_geometry(&self, cylinders: u16, heads: u8, sectors_per_track: u8) {
        self.shared.set_chs_geometry(self.ctx(), cylinders, heads, sectors_per_track)
    }

    pub fn set_total_lba(&self, total: u64) {
        self.shared.set_total_lba(self.ctx(), total)
    }

    pub fn set_lba_mode(&self, enable: bool) {
        self.shared.set_lba_mode(self.ctx(), enable)
    }

    pub fn set_supports_lba48(&self, supported: bool) {
        self.shared.set_supports_lba48(self.ctx(), supported)
    }

    pub fn set_write_protected(&self, protected: bool) {
        self.shared.set_write_protected(self.ctx(), protected)
    }

    pub fn set_compat_timing(&self, enable: bool) {
        self.shared.set_compat_timing(self.ctx(), enable)
    }

    pub fn compat_timing(&self) -> bool {
        self.shared.compat_timing(self.ctx())
    }

    pub fn clear_geometry(&self) {
        self.shared.clear_geometry(self.ctx())
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.shared.set_mounted(mounted)
    }

    pub fn is_mounted(&self) -> bool {
        self.shared.is_mounted()
    }

    pub fn notify_media_changed(&self) {
        self.shared.notify_media_changed()
    }

    pub fn consume_media_changed(&self) -> bool {
        self.shared.consume_media_changed()
    }
}

impl Reply {
    fn bytes(self) -> IdeResult<usize> {
        match self {
            Reply::Bytes(n) => Ok(n),
            _ => Err(IdeError::DeviceError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::*;
    use crate::sim::{SimController, SimDrive, SimPlatform, SimPort, SimRig};
    use crate::config::PinMap;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use std::thread;

    fn idle_controller() -> (Arc<SimController>, crate::sim::SimHandle) {
        let drive = SimDrive::new_lba(1024, false).into_handle();
        let controller = Arc::new(Controller::new(
            SimPort::new(drive.clone(), PinMap::DEFAULT),
            SimPlatform::new(),
            IdeConfig::DEFAULT,
        ));
        (controller, drive)
    }

    #[test]
    fn requests_served_in_submission_order_one_at_a_time() {
        let rig = SimRig::start(SimDrive::new_lba(1024, false));
        let submitters: Vec<_> = (0..4u8)
            .map(|t| {
                let c = rig.controller.clone();
                thread::spawn(move || {
                    for i in 0..250u32 {
                        loop {
                            match c.write_register(ATA_REG_SECCOUNT + t, i as u8) {
                                Ok(()) => break,
                                Err(IdeError::Busy) => thread::yield_now(),
                                Err(e) => panic!("unexpected {:?}", e),
                            }
                        }
                    }
                })
            })
            .collect();
        for s in submitters {
            s.join().unwrap();
        }

        let writes = rig.drive.lock().register_writes.clone();
        assert_eq!(writes.len(), 1000);
        for t in 0..4u8 {
            let seen: Vec<u8> = writes
                .iter()
                .filter(|w| w.0 == ATA_REG_SECCOUNT + t)
                .map(|w| w.1)
                .collect();
            let expected: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
            assert_eq!(seen, expected);
        }

        let stats = rig.controller.stats();
        assert_eq!(stats.enqueued, 1000);
        assert_eq!(stats.served, 1000);
        assert_eq!(stats.max_in_flight, 1);
    }

    #[test]
    fn concurrent_launch_sets_up_hardware_once() {
        let (controller, drive) = idle_controller();
        let workers = Arc::new(spin::Mutex::new(Vec::new()));
        let launchers: Vec<_> = (0..8)
            .map(|_| {
                let c = controller.clone();
                let workers = workers.clone();
                thread::spawn(move || {
                    let runner = c.clone();
                    c.launch(|| workers.lock().push(thread::spawn(move || runner.run())))
                })
            })
            .collect();
        let launched = launchers
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(launched, 1);

        assert!(controller.read_register(ATA_REG_STATUS).is_ok());
        // A second worker loop refuses to start.
        controller.run();
        assert_eq!(drive.lock().configure_calls, 1);

        controller.shutdown();
        for w in workers.lock().drain(..) {
            w.join().unwrap();
        }
    }

    #[test]
    fn full_queue_reports_busy() {
        let (controller, _drive) = idle_controller();
        assert!(controller.launch(|| {}));

        let waiters: Vec<_> = (0..REQUEST_QUEUE_DEPTH)
            .map(|_| {
                let c = controller.clone();
                thread::spawn(move || c.read_register(ATA_REG_STATUS))
            })
            .collect();
        while controller.queue.len() < REQUEST_QUEUE_DEPTH {
            thread::yield_now();
        }
        assert_eq!(controller.read_register(ATA_REG_STATUS), Err(IdeError::Busy));
        assert_eq!(controller.stats().rejected, 1);

        // Late worker drains everything that was accepted.
        let runner = controller.clone();
        let worker = thread::spawn(move || runner.run());
        for w in waiters {
            assert!(w.join().unwrap().is_ok());
        }
        controller.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn request_racing_shutdown_is_refused() {
        let rig = SimRig::start(SimDrive::new_lba(1024, false));
        let c = rig.controller.clone();
        c.shutdown();
        while !c.stopped.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        assert_eq!(c.read_register(ATA_REG_STATUS), Err(IdeError::NotReady));

        // Queued after the worker's last pass, as if the halted check
        // had been passed just before shutdown.
        assert_eq!(c.enqueue(Operation::ReadRegister { reg: ATA_REG_STATUS }), Err(IdeError::NotReady));
        assert!(c.queue.is_empty());
        assert_eq!(c.stats().served, 0);
    }

    #[test]
    fn dispatch_before_launch_is_not_ready() {
        let (controller, _drive) = idle_controller();
        assert_eq!(controller.read_register(ATA_REG_STATUS), Err(IdeError::NotReady));
    }

    #[test]
    fn worker_context_runs_inline() {
        let results = Arc::new(spin::Mutex::new(Vec::new()));
        let seen = results.clone();
        let rig = SimRig::start_with(SimDrive::new_lba(1024, false), IdeConfig::DEFAULT, move |c| {
            assert!(c.on_worker());
            // Nothing is queued on this path.
            c.write_register(ATA_REG_LBA0, 0x99).unwrap();
            seen.lock().push(c.read_register(ATA_REG_LBA0));
            seen.lock().push(Ok(c.stats().enqueued as u8));
            // A second launch from the worker is ignored.
            seen.lock().push(Ok(c.launch(|| panic!("relaunched")) as u8));
            // Re-entry while the device is held fails fast.
            let held = c.device.lock();
            seen.lock().push(c.read_register(ATA_REG_LBA0));
            drop(held);
        });

        // Any queued call waits for the startup hook to finish.
        assert!(rig.controller.read_register(ATA_REG_STATUS).is_ok());
        assert_eq!(
            *results.lock(),
            [Ok(0x99), Ok(0), Ok(0), Err(IdeError::Busy)]
        );
    }

    #[test]
    fn every_failure_reaches_the_caller() {
        let rig = SimRig::start(SimDrive::new_lba(64, false));
        let c = &rig.controller;
        c.set_total_lba(64);
        c.set_lba_mode(true);
        c.set_write_protected(false);
        let mut buf = [0u8; 512];
        assert_eq!(c.read_sectors(64, 1, &mut buf), Err(IdeError::OutOfRange));
        assert_eq!(c.read_sectors(0, 0, &mut buf), Err(IdeError::OutOfRange));
        assert_eq!(c.set_geometry(17, 63), Err(IdeError::OutOfRange));
        rig.drive.lock().inject(crate::sim::Fault::ErrorOnNextCommand);
        assert_eq!(c.read_sectors(0, 1, &mut buf), Err(IdeError::DeviceError));
        assert_eq!(c.stats().served, 4);
    }
}
