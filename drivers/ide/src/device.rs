//! The driver proper: bus, cache and identify buffer, owned by whichever
//! context executes operations.

use crate::bus::{IdeBus, IdePort};
use crate::cache::ReadCache;
use crate::command::AtaCommand;
use crate::config::{IdeConfig, Profile};
use crate::consts::*;
use crate::error::{IdeError, IdeResult};
use crate::identify::IdentifyData;
use crate::platform::Platform;
use crate::shared::SharedState;
use crate::transfer::Engine;

/// One unit of driver work. Buffers belong to the caller.
pub enum Operation<'a> {
    ReadCached { lba: u64, count: u32, buf: &'a mut [u8] },
    ReadSectors { lba: u64, count: u32, buf: &'a mut [u8] },
    WriteSectors { lba: u64, count: u32, buf: &'a [u8] },
    /// Select the master and send IDENTIFY DEVICE
    SendIdentify,
    /// Wait for and read the IDENTIFY block
    ReadIdentify { words: &'a mut [u16; SECTOR_WORDS] },
    Reset,
    /// Drop the read cache
    FlushCache,
    SetGeometry { heads: u8, sectors_per_track: u8 },
    ReadRegister { reg: u8 },
    WriteRegister { reg: u8, value: u8 },
    ReadTaskFile,
    WaitReady { timeout_ms: u32, require_drdy: bool },
}

impl Operation<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ReadCached { .. } => "read-cached",
            Operation::ReadSectors { .. } => "read",
            Operation::WriteSectors { .. } => "write",
            Operation::SendIdentify => "identify",
            Operation::ReadIdentify { .. } => "identify-data",
            Operation::Reset => "reset",
            Operation::FlushCache => "flush-cache",
            Operation::SetGeometry { .. } => "set-geometry",
            Operation::ReadRegister { .. } => "reg-read",
            Operation::WriteRegister { .. } => "reg-write",
            Operation::ReadTaskFile => "task-file",
            Operation::WaitReady { .. } => "wait-ready",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Done,
    Bytes(usize),
    Register(u8),
    TaskFile([u8; 8]),
    Ready(bool),
}

pub struct IdeDevice<B: IdePort> {
    bus: IdeBus<B>,
    cache: ReadCache,
    identify: Option<IdentifyData>,
    config: IdeConfig,
    initialized: bool,
}

impl<B: IdePort> IdeDevice<B> {
    pub fn new(port: B, config: IdeConfig) -> Self {
        IdeDevice {
            bus: IdeBus::new(port, config.pins, config.timing),
            cache: ReadCache::new(),
            identify: None,
            config,
            initialized: false,
        }
    }

    pub fn config(&self) -> &IdeConfig {
        &self.config
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    pub fn bus(&self) -> &IdeBus<B> {
        &self.bus
    }

    /// Last IDENTIFY block read successfully.
    pub fn identify_data(&self) -> Option<&IdentifyData> {
        self.identify.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Claim and park the bus pins. Repeated calls do nothing.
    pub fn init_hardware(&mut self) {
        if self.initialized {
            return;
        }
        self.bus.init();
        self.initialized = true;
    }

    pub fn execute<P: Platform>(
        &mut self,
        op: Operation<'_>,
        shared: &SharedState,
        platform: &P,
    ) -> IdeResult<Reply> {
        let ctx = platform.context_id();
        let state = shared.drive(ctx);
        let geometry = state.geometry;
        let profile = Profile::from_compat(state.compat_timing);
        let config = self.config;

        match op {
            Operation::ReadCached { lba, count, buf } => {
                let bus = &mut self.bus;
                let bytes = self.cache.read(lba, count, buf, geometry.capacity(), |lba, count, window| {
                    Engine::new(bus, platform, shared, &config, profile)
                        .read_sectors(&geometry, lba, count, window)
                })?;
                Ok(Reply::Bytes(bytes))
            }
            Operation::ReadSectors { lba, count, buf } => {
                let mut engine = Engine::new(&mut self.bus, platform, shared, &config, profile);
                engine.read_sectors(&geometry, lba, count, buf).map(Reply::Bytes)
            }
            Operation::WriteSectors { lba, count, buf } => {
                // Invalidate first so a failed write cannot leave stale data visible.
                self.cache.invalidate_range(lba, count);
                let mut engine = Engine::new(&mut self.bus, platform, shared, &config, profile);
                engine
                    .write_sectors(&geometry, state.write_protected, lba, count, buf)
                    .map(Reply::Bytes)
            }
            Operation::SendIdentify => {
                let mut engine = Engine::new(&mut self.bus, platform, shared, &config, profile);
                engine.issue(&AtaCommand::identify(config.identify_select_delay_us));
                Ok(Reply::Done)
            }
            Operation::ReadIdentify { words } => {
                let mut engine = Engine::new(&mut self.bus, platform, shared, &config, profile);
                engine.read_identify(words)?;
                let data = IdentifyData::new(*words);
                shared.set_supports_lba48(ctx, data.supports_lba48());
                log::debug!(
                    "ide: identified '{}', {} sectors",
                    data.model().as_str(),
                    data.capacity()
                );
                self.identify = Some(data);
                Ok(Reply::Done)
            }
            Operation::Reset => {
                self.bus.set_reset(true);
                platform.delay_ms(config.reset_pulse_ms);
                self.bus.set_reset(false);
                platform.delay_ms(config.reset_settle_ms);
                self.cache.clear();
                shared.set_mounted(false);
                log::debug!("ide: drive reset");
                Ok(Reply::Done)
            }
            Operation::FlushCache => {
                self.cache.clear();
                Ok(Reply::Done)
            }
            Operation::SetGeometry { heads, sectors_per_track } => {
                if !(1..=ATA_MAX_CHS_HEADS).contains(&heads) || sectors_per_track == 0 {
                    return Err(IdeError::OutOfRange);
                }
                let mut engine = Engine::new(&mut self.bus, platform, shared, &config, profile);
                engine.issue(&AtaCommand::set_geometry(heads, sectors_per_track));
                if !engine.wait_until_ready(config.geometry_timeout_ms) {
                    return Err(IdeError::Timeout);
                }
                let status = engine.status();
                if status & ATA_SR_ERR != 0 {
                    log::warn!("ide: drive refused {} heads / {} spt", heads, sectors_per_track);
                    return Err(IdeError::DeviceError);
                }
                // The CHS mapping changed under any cached sectors.
                self.cache.clear();
                shared.with(ctx, |d| {
                    d.geometry.heads = heads;
                    d.geometry.sectors_per_track = sectors_per_track;
                });
                Ok(Reply::Done)
            }
            Operation::ReadRegister { reg } => {
                Ok(Reply::Register(self.bus.read_register(reg & 0x07, profile)))
            }
            Operation::WriteRegister { reg, value } => {
                self.bus.write_register(reg & 0x07, value, profile);
                Ok(Reply::Done)
            }
            Operation::ReadTaskFile => {
                let mut regs = [0u8; 8];
                for (reg, slot) in regs.iter_mut().enumerate().skip(1) {
                    *slot = self.bus.read_register(reg as u8, profile);
                }
                Ok(Reply::TaskFile(regs))
            }
            Operation::WaitReady { timeout_ms, require_drdy } => {
                let mut engine = Engine::new(&mut self.bus, platform, shared, &config, profile);
                let ready = if require_drdy {
                    engine.wait_until_drive_ready(timeout_ms)
                } else {
                    engine.wait_until_ready(timeout_ms)
                };
                Ok(Reply::Ready(ready))
            }
        }
    }
}
