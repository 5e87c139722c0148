//! Register-level access to the PATA bus over GPIO.
//!
//! # Architecture
//!
//! The bus is bit-banged: address lines, chip selects and strobes are
//! plain GPIO outputs and the 16 data lines go through a pair of
//! direction-switched transceivers. [`IdePort`] is the only thing that
//! touches pins; [`IdeBus`] sequences it with the delays of a
//! [`TimingProfile`] so the same code serves both timing profiles.
//!
//! # Safety
//!
//! Nothing here can fail. A missing drive reads back whatever the
//! pull-ups give, which the status polling above this layer turns into
//! a timeout.

use crate::config::{PinMap, Profile, TimingProfile, TimingSet};
use crate::consts::*;

/// Raw GPIO access. Masks are bit-per-pin.
pub trait IdePort {
    /// Claim the pins for the bus. `outputs` are driven from now on,
    /// `inputs` start released.
    fn configure(&mut self, outputs: u32, inputs: u32);
    fn set(&mut self, mask: u32);
    fn clear(&mut self, mask: u32);
    /// Replace the output level of the pins in `mask` with `value`.
    fn write_masked(&mut self, mask: u32, value: u32);
    fn enable_output(&mut self, mask: u32);
    fn disable_output(&mut self, mask: u32);
    fn read(&mut self) -> u32;
    fn delay_cycles(&mut self, cycles: u32);
}

#[derive(Debug, Clone, Copy)]
struct Masks {
    data: u32,
    addr: u32,
    dir: u32,
    oe: u32,
    cs0: u32,
    cs1: u32,
    dior: u32,
    diow: u32,
    reset: u32,
    led: u32,
}

impl Masks {
    fn new(pins: &PinMap) -> Self {
        Masks {
            data: 0xFFFF << pins.data_base,
            addr: 0b111 << pins.a0,
            dir: bit(pins.dir) | bit(pins.dir1),
            oe: bit(pins.oe) | bit(pins.oe1),
            cs0: bit(pins.cs0),
            cs1: bit(pins.cs1),
            dior: bit(pins.dior),
            diow: bit(pins.diow),
            reset: bit(pins.reset),
            led: pins.error_led.map(bit).unwrap_or(0),
        }
    }

    fn control(&self) -> u32 {
        self.cs0 | self.cs1 | self.dior | self.diow
    }

    fn outputs(&self) -> u32 {
        self.addr | self.control() | self.dir | self.oe | self.reset | self.led
    }
}

fn bit(pin: u8) -> u32 {
    1u32.checked_shl(pin as u32).unwrap_or(0)
}

pub struct IdeBus<P: IdePort> {
    port: P,
    pins: PinMap,
    timing: TimingSet,
    masks: Masks,
}

impl<P: IdePort> IdeBus<P> {
    pub fn new(port: P, pins: PinMap, timing: TimingSet) -> Self {
        IdeBus {
            port,
            masks: Masks::new(&pins),
            pins,
            timing,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn timing(&self, profile: Profile) -> &TimingProfile {
        self.timing.get(profile)
    }

    pub fn set_timing(&mut self, timing: TimingSet) {
        self.timing = timing;
    }

    /// Configure the pins, release reset and park the bus.
    pub fn init(&mut self) {
        let m = self.masks;
        self.port.configure(m.outputs(), m.data);
        self.port.set(m.reset);
        self.idle();
        log::debug!("ide: bus configured, outputs {:#010x}", m.outputs());
    }

    /// Strobes and selects high, transceivers off, data lines released.
    pub fn idle(&mut self) {
        let m = self.masks;
        self.port.set(m.control());
        self.port.clear(m.dir);
        self.port.set(m.oe);
        self.port.disable_output(m.data);
    }

    /// Hold the drive in reset (RESET- low) or release it.
    pub fn set_reset(&mut self, asserted: bool) {
        if asserted {
            self.port.clear(self.masks.reset);
        } else {
            self.port.set(self.masks.reset);
        }
    }

    pub fn set_error_led(&mut self, on: bool) {
        if on {
            self.port.set(self.masks.led);
        } else {
            self.port.clear(self.masks.led);
        }
    }

    fn set_address(&mut self, reg: u8) {
        self.port.clear(self.masks.addr);
        self.port.set(((reg & 0x07) as u32) << self.pins.a0);
    }

    fn data_mode_in(&mut self, turnaround: u32) {
        let m = self.masks;
        self.port.set(m.oe);
        self.port.disable_output(m.data);
        self.port.clear(m.dir);
        self.port.delay_cycles(turnaround);
        self.port.clear(m.oe);
    }

    fn data_mode_out(&mut self, value: u16, setup: u32) {
        let m = self.masks;
        self.port.set(m.oe);
        self.put_data(value);
        self.port.enable_output(m.data);
        self.port.set(m.dir);
        self.port.delay_cycles(setup);
        self.port.clear(m.oe);
    }

    fn put_data(&mut self, value: u16) {
        self.port
            .write_masked(self.masks.data, (value as u32) << self.pins.data_base);
    }

    fn sample_data(&mut self) -> u16 {
        ((self.port.read() & self.masks.data) >> self.pins.data_base) as u16
    }

    /// Read one 8-bit task-file register.
    pub fn read_register(&mut self, reg: u8, profile: Profile) -> u8 {
        let t = *self.timing.get(profile);
        let m = self.masks;

        self.set_address(reg);
        self.port.set(m.dior | m.diow);
        self.data_mode_in(t.turnaround);
        self.port.clear(m.cs0);
        self.port.delay_cycles(t.reg_read_cs_setup);
        self.port.clear(m.dior);
        self.port.delay_cycles(t.reg_read_pulse);
        let value = self.sample_data() as u8;
        self.port.set(m.dior | m.cs0);
        self.idle();

        if (reg & 0x07) == ATA_REG_ERROR && m.led != 0 {
            self.set_error_led(value != 0);
        }
        value
    }

    /// Write one 8-bit task-file register.
    pub fn write_register(&mut self, reg: u8, value: u8, profile: Profile) {
        let t = *self.timing.get(profile);
        let m = self.masks;

        self.set_address(reg);
        self.data_mode_out(value as u16, t.reg_write_data_setup);
        self.port.clear(m.cs0);
        self.port.delay_cycles(t.reg_write_cs_setup);
        self.port.clear(m.diow);
        self.port.delay_cycles(t.reg_write_pulse);
        self.port.set(m.diow | m.cs0);
        self.idle();
        self.port.delay_cycles(t.reg_write_recovery);
    }

    /// Single 16-bit read of a register. Sector transfers use their own
    /// word loops below.
    pub fn read_register16(&mut self, reg: u8, profile: Profile) -> u16 {
        let t = *self.timing.get(profile);
        let m = self.masks;

        self.set_address(reg);
        self.port.set(m.dior | m.diow);
        self.data_mode_in(t.turnaround);
        self.port.clear(m.cs0);
        self.port.delay_cycles(t.word_read_cs_setup);
        self.port.clear(m.dior);
        self.port.delay_cycles(t.word_read_pulse);
        let value = self.sample_data();
        self.port.set(m.dior);
        self.port.delay_cycles(t.word_read_hold);
        self.port.set(m.cs0);
        self.idle();
        value
    }

    /// Read one sector from the data register. The drive must already be
    /// showing DRQ. Words land little-endian in `buf`.
    pub fn read_sector(&mut self, buf: &mut [u8], profile: Profile) {
        let t = *self.timing.get(profile);
        let m = self.masks;

        self.set_address(ATA_REG_DATA);
        self.data_mode_in(t.turnaround);
        self.port.clear(m.cs0);
        if t.sector_read_wash {
            let _ = self.port.read();
        }
        self.port.delay_cycles(t.sector_read_cs_setup);

        for word in buf[..SECTOR_SIZE].chunks_exact_mut(2) {
            self.port.clear(m.dior);
            self.port.delay_cycles(t.sector_read_pulse);
            let w = self.sample_data();
            word[0] = w as u8;
            word[1] = (w >> 8) as u8;
            self.port.set(m.dior);
            self.port.delay_cycles(t.sector_read_recovery);
        }

        self.port.set(m.cs0);
        self.idle();
    }

    /// Write one sector to the data register, low byte of each word first.
    pub fn write_sector(&mut self, buf: &[u8], profile: Profile) {
        let t = *self.timing.get(profile);
        let m = self.masks;

        self.set_address(ATA_REG_DATA);
        self.port.set(m.oe);
        self.port.enable_output(m.data);
        self.port.set(m.dir);
        self.port.delay_cycles(t.sector_write_buffer_setup);
        self.port.clear(m.oe);
        self.port.clear(m.cs0);
        self.port.delay_cycles(t.sector_write_cs_setup);

        for word in buf[..SECTOR_SIZE].chunks_exact(2) {
            self.put_data(u16::from_le_bytes([word[0], word[1]]));
            self.port.delay_cycles(t.sector_write_word_setup);
            self.port.clear(m.diow);
            self.port.delay_cycles(t.sector_write_pulse);
            self.port.set(m.diow);
            self.port.delay_cycles(t.sector_write_recovery);
        }

        self.port.set(m.cs0);
        self.idle();
    }

    /// Read the 256-word IDENTIFY block.
    pub fn read_identify(&mut self, words: &mut [u16; SECTOR_WORDS], profile: Profile) {
        let t = *self.timing.get(profile);
        let m = self.masks;

        self.set_address(ATA_REG_DATA);
        self.data_mode_in(t.turnaround);
        self.port.clear(m.cs0);
        let _ = self.port.read();
        self.port.delay_cycles(t.identify_cs_setup);

        for word in words.iter_mut() {
            self.port.clear(m.dior);
            self.port.delay_cycles(t.identify_pulse);
            *word = self.sample_data();
            self.port.set(m.dior);
            self.port.delay_cycles(t.identify_recovery);
        }

        self.port.set(m.cs0);
        self.idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDrive, SimPort};

    fn bus() -> (IdeBus<SimPort>, crate::sim::SimHandle) {
        let handle = SimDrive::new_lba(1024, false).into_handle();
        let mut bus = IdeBus::new(
            SimPort::new(handle.clone(), PinMap::DEFAULT),
            PinMap::DEFAULT,
            TimingSet::DEFAULT,
        );
        bus.init();
        (bus, handle)
    }

    #[test]
    fn register_round_trip() {
        let (mut bus, _) = bus();
        bus.write_register(ATA_REG_LBA1, 0x5A, Profile::Fast);
        assert_eq!(bus.read_register(ATA_REG_LBA1, Profile::Fast), 0x5A);
        bus.write_register(ATA_REG_LBA2, 0xC3, Profile::Compat);
        assert_eq!(bus.read_register(ATA_REG_LBA2, Profile::Compat), 0xC3);
    }

    #[test]
    fn idle_status_reads_ready() {
        let (mut bus, _) = bus();
        let status = bus.read_register(ATA_REG_STATUS, Profile::Fast);
        assert_eq!(status & ATA_SR_BSY, 0);
        assert_ne!(status & ATA_SR_DRDY, 0);
    }

    #[test]
    fn compat_costs_more_cycles() {
        let (mut bus, handle) = bus();
        let before = handle.lock().bus_cycles;
        bus.read_register(ATA_REG_STATUS, Profile::Fast);
        let fast = handle.lock().bus_cycles - before;

        let before = handle.lock().bus_cycles;
        bus.read_register(ATA_REG_STATUS, Profile::Compat);
        let compat = handle.lock().bus_cycles - before;
        assert!(compat > 3 * fast, "fast {} compat {}", fast, compat);
    }

    #[test]
    fn sixteen_bit_read_of_low_register() {
        let (mut bus, _) = bus();
        bus.write_register(ATA_REG_LBA0, 0x42, Profile::Fast);
        assert_eq!(bus.read_register16(ATA_REG_LBA0, Profile::Fast) & 0xFF, 0x42);
    }

    #[test]
    fn reset_line_reaches_drive() {
        let (mut bus, handle) = bus();
        bus.set_reset(true);
        bus.set_reset(false);
        assert_eq!(handle.lock().resets, 1);
    }

    #[test]
    fn error_led_follows_error_register() {
        let mut pins = PinMap::DEFAULT;
        pins.error_led = Some(28);
        let handle = SimDrive::new_lba(16, false).into_handle();
        let mut bus = IdeBus::new(SimPort::new(handle.clone(), pins), pins, TimingSet::DEFAULT);
        bus.init();

        // Unknown opcode makes the drive abort.
        bus.write_register(ATA_REG_COMMAND, 0x00, Profile::Fast);
        assert_ne!(bus.read_register(ATA_REG_ERROR, Profile::Fast), 0);
        assert!(bus.port().output_level(28));
    }
}
