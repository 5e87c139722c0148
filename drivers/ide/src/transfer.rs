//! Multi-sector PIO data phase.
//!
//! A request is split into commands of at most 256 sectors (65536 with
//! LBA48). Before every sector the status register is polled until the
//! drive asks for data; ERR aborts the whole request. After the last chunk
//! the engine waits for BSY to drop. A write that never settles gets one
//! FLUSH CACHE and a longer wait before it is reported as failed.

use crate::bus::{IdeBus, IdePort};
use crate::command::{Addressing, AtaCommand, Step};
use crate::config::{IdeConfig, Profile};
use crate::consts::*;
use crate::error::{IdeError, IdeResult};
use crate::platform::Platform;
use crate::shared::SharedState;
use crate::types::DriveGeometry;

pub fn addressing(geometry: &DriveGeometry) -> Addressing {
    if !geometry.use_lba_mode {
        Addressing::Chs {
            heads: geometry.heads,
            sectors_per_track: geometry.sectors_per_track,
        }
    } else if geometry.supports_lba48 {
        Addressing::Lba48
    } else {
        Addressing::Lba28
    }
}

/// Reject a request that cannot be issued as-is.
pub fn check_range(geometry: &DriveGeometry, lba: u64, count: u32, buf_len: usize) -> IdeResult<()> {
    if count == 0 {
        return Err(IdeError::OutOfRange);
    }
    let capacity = geometry.capacity();
    let count = count as u64;
    if capacity == 0 || count > capacity || lba > capacity - count {
        return Err(IdeError::OutOfRange);
    }
    if !geometry.use_lba_mode && geometry.heads > ATA_MAX_CHS_HEADS {
        return Err(IdeError::OutOfRange);
    }
    if geometry.use_lba_mode && !geometry.supports_lba48 && lba + count > LBA28_LIMIT {
        return Err(IdeError::OutOfRange);
    }
    if (buf_len as u64) < count * SECTOR_SIZE as u64 {
        return Err(IdeError::OutOfRange);
    }
    Ok(())
}

pub struct Engine<'a, B: IdePort, P: Platform> {
    bus: &'a mut IdeBus<B>,
    platform: &'a P,
    shared: &'a SharedState,
    config: &'a IdeConfig,
    profile: Profile,
    ctx: usize,
}

impl<'a, B: IdePort, P: Platform> Engine<'a, B, P> {
    pub fn new(
        bus: &'a mut IdeBus<B>,
        platform: &'a P,
        shared: &'a SharedState,
        config: &'a IdeConfig,
        profile: Profile,
    ) -> Self {
        let ctx = platform.context_id();
        Engine {
            bus,
            platform,
            shared,
            config,
            profile,
            ctx,
        }
    }

    pub fn status(&mut self) -> u8 {
        self.bus.read_register(ATA_REG_STATUS, self.profile)
    }

    pub fn issue(&mut self, cmd: &AtaCommand) {
        for step in cmd.steps.iter() {
            match *step {
                Step::Write(reg, val) => self.bus.write_register(reg, val, self.profile),
                Step::Settle(us) => self.platform.delay_us(us),
            }
        }
    }

    fn device_error(&mut self, status: u8) -> IdeError {
        let error = self.bus.read_register(ATA_REG_ERROR, self.profile);
        log::error!("ide: status {:#04x} error {:#04x}", status, error);
        IdeError::DeviceError
    }

    /// Poll until BSY clears and DRQ is set.
    fn wait_drq(&mut self) -> IdeResult<()> {
        for _ in 0..self.config.drq_poll_budget {
            let status = self.status();
            if status & ATA_SR_ERR != 0 {
                return Err(self.device_error(status));
            }
            if status & ATA_SR_BSY == 0 {
                if status & ATA_SR_DF != 0 {
                    return Err(self.device_error(status));
                }
                if status & ATA_SR_DRQ != 0 {
                    return Ok(());
                }
            }
            self.shared.safe_point(self.ctx);
            self.platform.delay_us(self.config.drq_poll_delay_us);
        }
        log::warn!("ide: no DRQ after {} polls", self.config.drq_poll_budget);
        Err(IdeError::Timeout)
    }

    /// Poll until BSY clears or `timeout_ms` passes.
    pub fn wait_until_ready(&mut self, timeout_ms: u32) -> bool {
        let start = self.platform.micros();
        let limit = timeout_ms as u64 * 1000;
        loop {
            if self.status() & ATA_SR_BSY == 0 {
                return true;
            }
            if self.platform.micros().wrapping_sub(start) >= limit {
                return false;
            }
            self.shared.safe_point(self.ctx);
            self.platform.delay_us(self.config.ready_poll_delay_us);
        }
    }

    /// Like [`wait_until_ready`](Self::wait_until_ready), but also wants DRDY.
    pub fn wait_until_drive_ready(&mut self, timeout_ms: u32) -> bool {
        let start = self.platform.micros();
        let limit = timeout_ms as u64 * 1000;
        loop {
            let status = self.status();
            if status & ATA_SR_BSY == 0 && status & ATA_SR_DRDY != 0 {
                return true;
            }
            if self.platform.micros().wrapping_sub(start) >= limit {
                return false;
            }
            self.shared.safe_point(self.ctx);
            self.platform.delay_us(self.config.ready_poll_delay_us);
        }
    }

    pub fn read_sectors(
        &mut self,
        geometry: &DriveGeometry,
        lba: u64,
        count: u32,
        buf: &mut [u8],
    ) -> IdeResult<usize> {
        check_range(geometry, lba, count, buf.len())?;
        let addressing = addressing(geometry);
        let max = max_chunk(geometry);

        let mut remaining = count;
        let mut current = lba;
        let mut offset = 0usize;
        while remaining > 0 {
            let chunk = remaining.min(max);
            self.issue(&AtaCommand::read(addressing, current, chunk));
            for _ in 0..chunk {
                self.wait_drq()?;
                self.bus
                    .read_sector(&mut buf[offset..offset + SECTOR_SIZE], self.profile);
                offset += SECTOR_SIZE;
            }
            remaining -= chunk;
            current += chunk as u64;
        }

        if !self.wait_until_ready(self.config.ready_timeout_ms) {
            log::warn!("ide: drive busy after read of {} at {}", count, lba);
            return Err(IdeError::Timeout);
        }
        Ok(count as usize * SECTOR_SIZE)
    }

    pub fn write_sectors(
        &mut self,
        geometry: &DriveGeometry,
        write_protected: bool,
        lba: u64,
        count: u32,
        buf: &[u8],
    ) -> IdeResult<usize> {
        if write_protected {
            log::debug!("ide: write of {} at {} refused, write protected", count, lba);
            return Err(IdeError::OutOfRange);
        }
        check_range(geometry, lba, count, buf.len())?;
        let addressing = addressing(geometry);
        let max = max_chunk(geometry);

        let mut remaining = count;
        let mut current = lba;
        let mut offset = 0usize;
        while remaining > 0 {
            let chunk = remaining.min(max);
            self.issue(&AtaCommand::write(addressing, current, chunk));
            for _ in 0..chunk {
                self.wait_drq()?;
                self.bus
                    .write_sector(&buf[offset..offset + SECTOR_SIZE], self.profile);
                offset += SECTOR_SIZE;
            }
            remaining -= chunk;
            current += chunk as u64;
        }

        if !self.wait_until_ready(self.config.ready_timeout_ms) {
            log::warn!("ide: write of {} at {} did not settle, flushing", count, lba);
            self.flush_device(geometry.uses_lba48());
            if !self.wait_until_ready(self.config.flush_timeout_ms) {
                log::error!("ide: drive still busy after flush");
            }
            return Err(IdeError::Timeout);
        }
        Ok(count as usize * SECTOR_SIZE)
    }

    /// Issue FLUSH CACHE (EXT). Does not wait.
    pub fn flush_device(&mut self, lba48: bool) {
        self.issue(&AtaCommand::flush_cache(lba48));
    }

    /// Wait for the IDENTIFY data phase and read the block.
    pub fn read_identify(&mut self, words: &mut [u16; SECTOR_WORDS]) -> IdeResult<()> {
        let mut ready = false;
        for _ in 0..self.config.identify_poll_budget {
            let status = self.status();
            if status & ATA_SR_ERR != 0 {
                return Err(self.device_error(status));
            }
            if status & ATA_SR_DRQ != 0 {
                ready = true;
                break;
            }
            self.shared.safe_point(self.ctx);
            self.platform.delay_us(self.config.identify_poll_delay_us);
        }
        if !ready {
            log::warn!("ide: IDENTIFY data never became ready");
            return Err(IdeError::Timeout);
        }
        self.bus.read_identify(words, self.profile);
        Ok(())
    }
}

fn max_chunk(geometry: &DriveGeometry) -> u32 {
    if geometry.uses_lba48() {
        MAX_SECTORS_48
    } else {
        MAX_SECTORS_28
    }
}
