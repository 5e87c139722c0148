//! Tunable parameters of the driver.
//!
//! Strobe widths and poll budgets depend on the drive and on the level
//! shifters between it and the microcontroller, so none of them are baked
//! into the bus code. All delays in [`TimingProfile`] are CPU cycles.

use serde::{Deserialize, Serialize};

/// Which set of bus timings a transaction uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    Fast,
    Compat,
}

impl Profile {
    pub fn from_compat(compat: bool) -> Self {
        if compat {
            Profile::Compat
        } else {
            Profile::Fast
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingProfile {
    /// Transceiver direction change before the data lines are sampled
    pub turnaround: u32,

    pub reg_read_cs_setup: u32,
    pub reg_read_pulse: u32,

    pub reg_write_data_setup: u32,
    pub reg_write_cs_setup: u32,
    pub reg_write_pulse: u32,
    pub reg_write_recovery: u32,

    pub word_read_cs_setup: u32,
    pub word_read_pulse: u32,
    pub word_read_hold: u32,

    pub sector_read_cs_setup: u32,
    /// Dummy sample of the input register after CS0 goes low
    pub sector_read_wash: bool,
    pub sector_read_pulse: u32,
    pub sector_read_recovery: u32,

    pub sector_write_buffer_setup: u32,
    pub sector_write_cs_setup: u32,
    pub sector_write_word_setup: u32,
    pub sector_write_pulse: u32,
    pub sector_write_recovery: u32,

    pub identify_cs_setup: u32,
    pub identify_pulse: u32,
    pub identify_recovery: u32,
}

impl TimingProfile {
    /// Short windows for drives that meet PIO mode timings.
    pub const FAST: TimingProfile = TimingProfile {
        turnaround: 20,
        reg_read_cs_setup: 20,
        reg_read_pulse: 400,
        reg_write_data_setup: 100,
        reg_write_cs_setup: 10,
        reg_write_pulse: 200,
        reg_write_recovery: 200,
        word_read_cs_setup: 50,
        word_read_pulse: 500,
        word_read_hold: 500,
        sector_read_cs_setup: 50,
        sector_read_wash: false,
        sector_read_pulse: 75,
        sector_read_recovery: 75,
        sector_write_buffer_setup: 50,
        sector_write_cs_setup: 50,
        sector_write_word_setup: 20,
        sector_write_pulse: 75,
        sector_write_recovery: 75,
        identify_cs_setup: 200,
        identify_pulse: 400,
        identify_recovery: 400,
    };

    /// Long windows for drives with slow bus electronics.
    pub const COMPAT: TimingProfile = TimingProfile {
        turnaround: 20,
        reg_read_cs_setup: 150,
        reg_read_pulse: 1200,
        reg_write_data_setup: 400,
        reg_write_cs_setup: 150,
        reg_write_pulse: 1200,
        reg_write_recovery: 1200,
        word_read_cs_setup: 200,
        word_read_pulse: 1500,
        word_read_hold: 1500,
        sector_read_cs_setup: 200,
        sector_read_wash: true,
        sector_read_pulse: 600,
        sector_read_recovery: 4000,
        sector_write_buffer_setup: 400,
        sector_write_cs_setup: 150,
        sector_write_word_setup: 100,
        sector_write_pulse: 300,
        sector_write_recovery: 300,
        identify_cs_setup: 200,
        identify_pulse: 600,
        identify_recovery: 4000,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSet {
    pub fast: TimingProfile,
    pub compat: TimingProfile,
}

impl TimingSet {
    pub const DEFAULT: TimingSet = TimingSet {
        fast: TimingProfile::FAST,
        compat: TimingProfile::COMPAT,
    };

    pub fn get(&self, profile: Profile) -> &TimingProfile {
        match profile {
            Profile::Fast => &self.fast,
            Profile::Compat => &self.compat,
        }
    }
}

/// GPIO assignment of the bus. DIR and OE drive the two 8-bit
/// transceivers; OE is active low. A1 and A2 follow A0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMap {
    pub data_base: u8,
    pub dir: u8,
    pub dir1: u8,
    pub oe: u8,
    pub oe1: u8,
    pub a0: u8,
    pub reset: u8,
    pub cs0: u8,
    pub cs1: u8,
    pub dior: u8,
    pub diow: u8,
    pub error_led: Option<u8>,
}

impl PinMap {
    pub const DEFAULT: PinMap = PinMap {
        data_base: 0,
        dir: 16,
        dir1: 17,
        oe: 18,
        oe1: 19,
        a0: 20,
        reset: 23,
        cs0: 24,
        cs1: 25,
        dior: 26,
        diow: 27,
        error_led: None,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdeConfig {
    pub timing: TimingSet,
    pub pins: PinMap,

    /// Status reads allowed while waiting for DRQ before each sector
    pub drq_poll_budget: u32,
    pub drq_poll_delay_us: u32,
    pub identify_poll_budget: u32,
    pub identify_poll_delay_us: u32,
    /// Gap between selecting the drive and issuing IDENTIFY
    pub identify_select_delay_us: u32,

    pub ready_timeout_ms: u32,
    pub ready_poll_delay_us: u32,
    /// Second ready-wait after the FLUSH issued when a write times out
    pub flush_timeout_ms: u32,
    pub geometry_timeout_ms: u32,
    pub mount_ready_timeout_ms: u32,

    pub reset_pulse_ms: u32,
    pub reset_settle_ms: u32,
}

impl IdeConfig {
    pub const DEFAULT: IdeConfig = IdeConfig {
        timing: TimingSet::DEFAULT,
        pins: PinMap::DEFAULT,
        drq_poll_budget: 1_000_000,
        drq_poll_delay_us: 10,
        identify_poll_budget: 100_000,
        identify_poll_delay_us: 50,
        identify_select_delay_us: 500,
        ready_timeout_ms: 500,
        ready_poll_delay_us: 10,
        flush_timeout_ms: 2000,
        geometry_timeout_ms: 1000,
        mount_ready_timeout_ms: 5000,
        reset_pulse_ms: 50,
        reset_settle_ms: 100,
    };
}

impl Default for IdeConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compat_windows_are_longer() {
        let f = TimingProfile::FAST;
        let c = TimingProfile::COMPAT;
        assert!(c.reg_read_pulse >= 3 * f.reg_read_pulse);
        assert!(c.reg_write_pulse >= 4 * f.reg_write_pulse);
        assert!(c.sector_read_pulse >= 4 * f.sector_read_pulse);
        assert!(c.sector_write_pulse >= 4 * f.sector_write_pulse);
        assert!(c.sector_read_wash && !f.sector_read_wash);
    }

    #[test]
    fn profile_selects_timing() {
        let set = TimingSet::DEFAULT;
        assert_eq!(set.get(Profile::from_compat(false)), &TimingProfile::FAST);
        assert_eq!(set.get(Profile::from_compat(true)), &TimingProfile::COMPAT);
    }

    #[test]
    fn config_survives_postcard() {
        let mut config = IdeConfig::DEFAULT;
        config.drq_poll_budget = 1234;
        config.timing.compat.reg_write_pulse += 5;
        let bytes = postcard::to_allocvec(&config).unwrap();
        assert_eq!(postcard::from_bytes::<IdeConfig>(&bytes).unwrap(), config);

        let bytes = postcard::to_allocvec(&Profile::Compat).unwrap();
        assert_eq!(postcard::from_bytes::<Profile>(&bytes).unwrap(), Profile::Compat);
    }
}
