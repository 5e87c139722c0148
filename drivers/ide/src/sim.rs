//! Simulated PATA drive and host platform.
//!
//! [`SimPort`] decodes strobe edges on the pins the bus code drives and
//! forwards them to a [`SimDrive`], which models one master drive: task
//! file with 48-bit shadow registers, PIO data phase, CHS and LBA decoding,
//! IDENTIFY and INITIALIZE DEVICE PARAMETERS. Faults can be injected
//! ahead of the next command. [`SimPlatform`] gives every host thread its
//! own context id and runs a virtual clock that only delays advance.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

use crate::bus::IdePort;
use crate::config::{IdeConfig, PinMap};
use crate::consts::*;
use crate::platform::Platform;
use crate::worker::Controller;

pub type SimHandle = Arc<Mutex<SimDrive>>;
pub type SimController = Controller<SimPort, SimPlatform>;

/// A pending fault survives a reset and fires on the next command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Next command ends at once with ERR and ABRT
    ErrorOnNextCommand,
    /// Next command leaves the drive BSY until reset
    StuckBusy,
    /// Next write takes its data, then stays BSY until reset
    BusyAfterWrite,
}

/// One command as the drive decoded it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCommand {
    pub opcode: u8,
    pub lba: u64,
    pub count: u32,
}

#[derive(Default, Clone, Copy, Debug)]
struct Reg48 {
    low: u8,
    high: u8,
}

impl Reg48 {
    // Second write of a pair pushes the first into the high half.
    fn write(&mut self, val: u8) {
        self.high = self.low;
        self.low = val;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Read { lba: u64, remaining: u32 },
    Write { lba: u64, remaining: u32 },
    Identify,
}

pub struct SimDrive {
    sectors: BTreeMap<u64, Box<[u8; SECTOR_SIZE]>>,
    total: u64,
    native: (u16, u8, u8),
    translation: (u8, u8),
    identify: [u16; SECTOR_WORDS],

    features: Reg48,
    count: Reg48,
    lba: [Reg48; 3],
    device: u8,
    status: u8,
    error: u8,

    phase: Phase,
    buf: [u8; SECTOR_SIZE],
    index: usize,
    fault: Option<Fault>,
    busy_after_write: bool,
    stuck: bool,

    pub commands: Vec<SimCommand>,
    /// Task-file writes (registers 1..=7) in bus order
    pub register_writes: Vec<(u8, u8)>,
    pub resets: u32,
    pub flushes: u32,
    pub configure_calls: u32,
    pub bus_cycles: u64,
}

impl SimDrive {
    fn new(total: u64, native: (u16, u8, u8), lba48: bool) -> Self {
        let mut drive = SimDrive {
            sectors: BTreeMap::new(),
            total,
            native,
            translation: (native.1, native.2),
            identify: [0; SECTOR_WORDS],
            features: Reg48::default(),
            count: Reg48::default(),
            lba: [Reg48::default(); 3],
            device: ATA_DEV_CHS,
            status: ATA_SR_DRDY | ATA_SR_DSC,
            error: 0,
            phase: Phase::Idle,
            buf: [0; SECTOR_SIZE],
            index: 0,
            fault: None,
            busy_after_write: false,
            stuck: false,
            commands: Vec::new(),
            register_writes: Vec::new(),
            resets: 0,
            flushes: 0,
            configure_calls: 0,
            bus_cycles: 0,
        };
        drive.build_identify(lba48);
        drive
    }

    /// LBA drive of `total` sectors with a 16-head, 63-sector default
    /// translation.
    pub fn new_lba(total: u64, lba48: bool) -> Self {
        let cylinders = (total / (16 * 63)).clamp(1, 16383) as u16;
        Self::new(total, (cylinders, 16, 63), lba48)
    }

    pub fn new_chs(cylinders: u16, heads: u8, sectors_per_track: u8) -> Self {
        let total = cylinders as u64 * heads as u64 * sectors_per_track as u64;
        Self::new(total, (cylinders, heads, sectors_per_track), false)
    }

    pub fn into_handle(self) -> SimHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn inject(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    /// Current CHS translation (heads, sectors per track).
    pub fn translation(&self) -> (u8, u8) {
        self.translation
    }

    pub fn identify_words(&self) -> &[u16; SECTOR_WORDS] {
        &self.identify
    }

    /// Content of `lba`. Sectors never written hold their own LBA.
    pub fn sector(&self, lba: u64) -> [u8; SECTOR_SIZE] {
        match self.sectors.get(&lba) {
            Some(data) => **data,
            None => blank(lba),
        }
    }

    pub fn put_sector(&mut self, lba: u64, data: &[u8]) {
        let mut sector = Box::new([0u8; SECTOR_SIZE]);
        sector.copy_from_slice(&data[..SECTOR_SIZE]);
        self.sectors.insert(lba, sector);
    }

    fn build_identify(&mut self, lba48: bool) {
        let w = &mut self.identify;
        w[ATA_IDENT_CYLINDERS] = self.native.0;
        w[ATA_IDENT_HEADS] = self.native.1 as u16;
        w[ATA_IDENT_SECTORS] = self.native.2 as u16;
        w[ATA_IDENT_CAPABILITIES] = ATA_CAP_LBA;
        let lba28 = self.total.min(0x0FFF_FFFF) as u32;
        w[ATA_IDENT_MAX_LBA] = lba28 as u16;
        w[ATA_IDENT_MAX_LBA + 1] = (lba28 >> 16) as u16;
        if lba48 {
            w[ATA_IDENT_COMMANDSETS] = ATA_CMDSET_LBA48;
            for i in 0..4 {
                w[ATA_IDENT_MAX_LBA_EXT + i] = (self.total >> (16 * i)) as u16;
            }
        }
        put_ata_string(w, ATA_IDENT_SERIAL, b"SIM0001", 20);
        put_ata_string(w, ATA_IDENT_FIRMWARE, b"1.0", 8);
        put_ata_string(w, ATA_IDENT_MODEL, b"IDEASY SIMULATED DRIVE", 40);
    }

    fn reset(&mut self) {
        self.features = Reg48::default();
        self.count = Reg48::default();
        self.lba = [Reg48::default(); 3];
        self.device = ATA_DEV_CHS;
        self.status = ATA_SR_DRDY | ATA_SR_DSC;
        self.error = 0;
        self.phase = Phase::Idle;
        self.busy_after_write = false;
        self.stuck = false;
        self.translation = (self.native.1, self.native.2);
        self.resets += 1;
    }

    fn set_error(&mut self, error: u8) {
        self.error = error;
        self.phase = Phase::Idle;
        self.status = ATA_SR_DRDY | ATA_SR_ERR;
    }

    fn read_reg(&mut self, reg: u8) -> u16 {
        match reg {
            0 => self.read_data(),
            1 => self.error as u16,
            2 => self.count.low as u16,
            3..=5 => self.lba[reg as usize - 3].low as u16,
            6 => self.device as u16,
            _ if self.stuck => ATA_SR_BSY as u16,
            _ => self.status as u16,
        }
    }

    fn write_reg(&mut self, reg: u8, value: u16) {
        if reg != ATA_REG_DATA {
            self.register_writes.push((reg, value as u8));
        }
        match reg {
            0 => self.write_data(value),
            1 => self.features.write(value as u8),
            2 => self.count.write(value as u8),
            3..=5 => self.lba[reg as usize - 3].write(value as u8),
            6 => self.device = value as u8,
            _ => self.command(value as u8),
        }
    }

    fn read_data(&mut self) -> u16 {
        let word = u16::from_le_bytes([self.buf[self.index], self.buf[self.index + 1]]);
        match self.phase {
            Phase::Identify => {
                let word = self.identify[self.index / 2];
                self.index += 2;
                if self.index == SECTOR_SIZE {
                    self.finish();
                }
                word
            }
            Phase::Read { lba, remaining } => {
                self.index += 2;
                if self.index == SECTOR_SIZE {
                    if remaining > 1 {
                        self.phase = Phase::Read { lba: lba + 1, remaining: remaining - 1 };
                        self.buf = self.sector(lba + 1);
                        self.index = 0;
                    } else {
                        self.finish();
                    }
                }
                word
            }
            _ => 0xFFFF,
        }
    }

    fn write_data(&mut self, value: u16) {
        if let Phase::Write { lba, remaining } = self.phase {
            self.buf[self.index..self.index + 2].copy_from_slice(&value.to_le_bytes());
            self.index += 2;
            if self.index == SECTOR_SIZE {
                let data = self.buf;
                self.put_sector(lba, &data);
                self.index = 0;
                if remaining > 1 {
                    self.phase = Phase::Write { lba: lba + 1, remaining: remaining - 1 };
                } else {
                    self.finish();
                    if self.busy_after_write {
                        self.stuck = true;
                    }
                }
            }
        }
    }

    fn finish(&mut self) {
        self.phase = Phase::Idle;
        self.index = 0;
        self.status = ATA_SR_DRDY | ATA_SR_DSC;
    }

    /// Address and sector count of the command being issued.
    fn decode(&self, ext: bool) -> Option<(u64, u32)> {
        if self.device & 0x40 == 0 {
            let sector = self.lba[0].low;
            let cylinder = self.lba[1].low as u64 | (self.lba[2].low as u64) << 8;
            let head = self.device & 0x0F;
            let (heads, spt) = self.translation;
            if sector == 0 || sector > spt || head >= heads {
                return None;
            }
            let lba = (cylinder * heads as u64 + head as u64) * spt as u64 + sector as u64 - 1;
            let count = match self.count.low {
                0 => 256,
                n => n as u32,
            };
            Some((lba, count))
        } else if ext {
            let lba = (0..3).fold(0u64, |acc, i| {
                acc | (self.lba[i].low as u64) << (8 * i) | (self.lba[i].high as u64) << (8 * i + 24)
            });
            let count = match (self.count.high as u32) << 8 | self.count.low as u32 {
                0 => 65536,
                n => n,
            };
            Some((lba, count))
        } else {
            let lba = self.lba[0].low as u64
                | (self.lba[1].low as u64) << 8
                | (self.lba[2].low as u64) << 16
                | ((self.device & 0x0F) as u64) << 24;
            let count = match self.count.low {
                0 => 256,
                n => n as u32,
            };
            Some((lba, count))
        }
    }

    fn command(&mut self, opcode: u8) {
        let ext = matches!(opcode, ATA_CMD_READ_PIO_EXT | ATA_CMD_WRITE_PIO_EXT);
        let transfer = matches!(
            opcode,
            ATA_CMD_READ_PIO | ATA_CMD_READ_PIO_EXT | ATA_CMD_WRITE_PIO | ATA_CMD_WRITE_PIO_EXT
        );
        let decoded = if transfer { self.decode(ext) } else { None };
        let (lba, count) = decoded.unwrap_or((0, 0));
        self.commands.push(SimCommand { opcode, lba, count });

        if self.stuck {
            return;
        }
        match self.fault.take() {
            Some(Fault::ErrorOnNextCommand) => return self.set_error(ATA_ER_ABRT),
            Some(Fault::StuckBusy) => {
                self.stuck = true;
                return;
            }
            Some(Fault::BusyAfterWrite) => self.busy_after_write = true,
            None => {}
        }

        self.error = 0;
        self.index = 0;
        match opcode {
            ATA_CMD_IDENTIFY => {
                self.phase = Phase::Identify;
                self.status = ATA_SR_DRDY | ATA_SR_DRQ;
            }
            ATA_CMD_READ_PIO | ATA_CMD_READ_PIO_EXT | ATA_CMD_WRITE_PIO | ATA_CMD_WRITE_PIO_EXT => {
                match decoded {
                    Some((lba, count)) if lba + count as u64 <= self.total => {
                        if matches!(opcode, ATA_CMD_READ_PIO | ATA_CMD_READ_PIO_EXT) {
                            self.buf = self.sector(lba);
                            self.phase = Phase::Read { lba, remaining: count };
                        } else {
                            self.phase = Phase::Write { lba, remaining: count };
                        }
                        self.status = ATA_SR_DRDY | ATA_SR_DRQ;
                    }
                    _ => self.set_error(ATA_ER_IDNF),
                }
            }
            ATA_CMD_INIT_DEV_PARAMS => {
                self.translation = ((self.device & 0x0F) + 1, self.count.low);
                self.finish();
            }
            ATA_CMD_CACHE_FLUSH | ATA_CMD_CACHE_FLUSH_EXT => {
                self.flushes += 1;
                self.finish();
            }
            _ => self.set_error(ATA_ER_ABRT),
        }
    }
}

fn blank(lba: u64) -> [u8; SECTOR_SIZE] {
    let mut out = [0u8; SECTOR_SIZE];
    for chunk in out.chunks_exact_mut(8) {
        chunk.copy_from_slice(&lba.to_le_bytes());
    }
    out
}

fn put_ata_string(words: &mut [u16], first: usize, text: &[u8], len: usize) {
    for i in 0..len / 2 {
        let hi = text.get(2 * i).copied().unwrap_or(b' ');
        let lo = text.get(2 * i + 1).copied().unwrap_or(b' ');
        words[first + i] = (hi as u16) << 8 | lo as u16;
    }
}

/// Pin-level front end of a [`SimDrive`]
pub struct SimPort {
    drive: SimHandle,
    pins: PinMap,
    out: u32,
    oe: u32,
    latched: u16,
}

impl SimPort {
    pub fn new(drive: SimHandle, pins: PinMap) -> Self {
        // Bus pull-ups hold the strobes, selects and reset inactive.
        let out = [pins.cs0, pins.cs1, pins.dior, pins.diow, pins.reset, pins.oe, pins.oe1]
            .iter()
            .fold(0, |acc, &p| acc | 1 << p);
        SimPort {
            drive,
            pins,
            out,
            oe: 0,
            latched: 0xFFFF,
        }
    }

    pub fn drive(&self) -> &SimHandle {
        &self.drive
    }

    pub fn output_level(&self, pin: u8) -> bool {
        self.out & (1 << pin) != 0
    }

    fn address(&self) -> u8 {
        ((self.out >> self.pins.a0) & 0x07) as u8
    }

    fn low(&self, pin: u8) -> bool {
        self.out & (1 << pin) == 0
    }
}

impl IdePort for SimPort {
    fn configure(&mut self, outputs: u32, inputs: u32) {
        self.oe = (self.oe | outputs) & !inputs;
        self.drive.lock().configure_calls += 1;
    }

    fn set(&mut self, mask: u32) {
        let diow = 1 << self.pins.diow;
        if mask & diow != 0 && self.low(self.pins.diow) && self.low(self.pins.cs0) {
            let data = ((self.out >> self.pins.data_base) & 0xFFFF) as u16;
            let reg = self.address();
            self.drive.lock().write_reg(reg, data);
        }
        self.out |= mask;
    }

    fn clear(&mut self, mask: u32) {
        let dior = 1 << self.pins.dior;
        let reset = 1 << self.pins.reset;
        let dior_fell = mask & dior != 0 && !self.low(self.pins.dior);
        let reset_fell = mask & reset != 0 && !self.low(self.pins.reset);
        self.out &= !mask;

        if reset_fell {
            self.drive.lock().reset();
        }
        if dior_fell && self.low(self.pins.cs0) {
            let reg = self.address();
            self.latched = self.drive.lock().read_reg(reg);
        }
    }

    fn write_masked(&mut self, mask: u32, value: u32) {
        self.out = (self.out & !mask) | (value & mask);
    }

    fn enable_output(&mut self, mask: u32) {
        self.oe |= mask;
    }

    fn disable_output(&mut self, mask: u32) {
        self.oe &= !mask;
    }

    fn read(&mut self) -> u32 {
        let data = 0xFFFFu32 << self.pins.data_base;
        if self.oe & data != 0 {
            self.out
        } else {
            (self.out & !data) | (self.latched as u32) << self.pins.data_base
        }
    }

    fn delay_cycles(&mut self, cycles: u32) {
        self.drive.lock().bus_cycles += cycles as u64;
    }
}

static NEXT_CONTEXT: AtomicUsize = AtomicUsize::new(0);

std::thread_local! {
    static CONTEXT: usize = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
}

/// Host stand-in for the board: one context per thread, virtual time.
#[derive(Default)]
pub struct SimPlatform {
    clock_us: AtomicU64,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Platform for SimPlatform {
    fn context_id(&self) -> usize {
        CONTEXT.with(|c| *c)
    }

    fn micros(&self) -> u64 {
        self.clock_us.load(Ordering::Acquire)
    }

    fn delay_us(&self, us: u32) {
        self.clock_us.fetch_add(us as u64, Ordering::AcqRel);
    }

    fn delay_ms(&self, ms: u32) {
        self.clock_us.fetch_add(ms as u64 * 1000, Ordering::AcqRel);
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

/// A controller with its worker running on a host thread. Dropping the
/// rig stops the worker.
pub struct SimRig {
    pub controller: Arc<SimController>,
    pub drive: SimHandle,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SimRig {
    pub fn start(drive: SimDrive) -> Self {
        Self::start_with(drive, IdeConfig::DEFAULT, |_| {})
    }

    pub fn start_with<F>(drive: SimDrive, config: IdeConfig, startup: F) -> Self
    where
        F: FnOnce(&SimController) + Send + 'static,
    {
        let drive = drive.into_handle();
        let controller = Arc::new(Controller::new(
            SimPort::new(drive.clone(), config.pins),
            SimPlatform::new(),
            config,
        ));
        let mut worker = None;
        let runner = controller.clone();
        controller.launch(|| {
            worker = Some(std::thread::spawn(move || runner.run_with(startup)));
        });
        SimRig {
            controller,
            drive,
            worker,
        }
    }
}

impl Drop for SimRig {
    fn drop(&mut self) {
        self.controller.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
