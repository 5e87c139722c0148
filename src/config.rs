//! Settings persisted by the UI in flash and applied once at boot.

use ide::consts::ATA_MAX_CHS_HEADS;
use ide::{Controller, GeometryChoice, IdePort, Platform};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::logger::level_from_u8;

pub const STORED_CONFIG_MAGIC: u32 = 0x4944_4531;
pub const STORED_CONFIG_LEN: usize = 16;

/// No IORDY line wired
pub const NO_PIN: u8 = 0xFF;

/// Persisted settings, 16 bytes little-endian:
///
/// | Offset | Field              |
/// |--------|--------------------|
/// | 0      | magic `IDE1`       |
/// | 4      | write protected    |
/// | 5      | auto mount         |
/// | 6      | IORDY pin          |
/// | 7      | compat timing      |
/// | 8      | cylinders          |
/// | 10     | heads              |
/// | 11     | sectors per track  |
/// | 12     | geometry choice    |
/// | 13     | LBA mode           |
/// | 14     | log level          |
/// | 15     | reserved, zero     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConfig {
    pub write_protected: bool,
    pub auto_mount: bool,
    pub iordy_pin: Option<u8>,
    pub compat_timing: bool,
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub geometry: GeometryChoice,
    pub lba_mode: bool,
    pub log_level: u8,
}

impl StoredConfig {
    /// Settings of a board that has never saved any.
    pub const DEFAULT: StoredConfig = StoredConfig {
        write_protected: true,
        auto_mount: true,
        iordy_pin: None,
        compat_timing: false,
        cylinders: 0,
        heads: 0,
        sectors_per_track: 0,
        geometry: GeometryChoice::Lba,
        lba_mode: true,
        log_level: 3,
    };

    pub fn to_bytes(&self) -> [u8; STORED_CONFIG_LEN] {
        let mut out = [0u8; STORED_CONFIG_LEN];
        out[0..4].copy_from_slice(&STORED_CONFIG_MAGIC.to_le_bytes());
        out[4] = self.write_protected as u8;
        out[5] = self.auto_mount as u8;
        out[6] = self.iordy_pin.unwrap_or(NO_PIN);
        out[7] = self.compat_timing as u8;
        out[8..10].copy_from_slice(&self.cylinders.to_le_bytes());
        out[10] = self.heads;
        out[11] = self.sectors_per_track;
        out[12] = self.geometry.as_u8();
        out[13] = self.lba_mode as u8;
        out[14] = self.log_level;
        out
    }

    /// `None` unless the block starts with the magic.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: &[u8; STORED_CONFIG_LEN] = bytes.get(..STORED_CONFIG_LEN)?.try_into().ok()?;
        let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if magic != STORED_CONFIG_MAGIC {
            return None;
        }
        Some(StoredConfig {
            write_protected: raw[4] != 0,
            auto_mount: raw[5] != 0,
            iordy_pin: if raw[6] == NO_PIN { None } else { Some(raw[6]) },
            compat_timing: raw[7] != 0,
            cylinders: u16::from_le_bytes([raw[8], raw[9]]),
            heads: raw[10],
            sectors_per_track: raw[11],
            geometry: GeometryChoice::from_u8(raw[12]),
            lba_mode: raw[13] != 0,
            log_level: raw[14],
        })
    }

    /// Stored settings, or [`DEFAULT`](Self::DEFAULT) when the block is
    /// blank or foreign.
    pub fn load(bytes: &[u8]) -> Self {
        match Self::from_bytes(bytes) {
            Some(config) => config,
            None => {
                log::info!("config: no stored settings, using defaults");
                Self::DEFAULT
            }
        }
    }

    pub fn level_filter(&self) -> LevelFilter {
        level_from_u8(self.log_level)
    }

    pub fn manual_geometry(&self) -> (u16, u8, u8) {
        (self.cylinders, self.heads, self.sectors_per_track)
    }

    /// Push the settings into the driver's shared state. Runs before the
    /// worker serves host I/O; the auto-mount, if enabled, refines the
    /// geometry afterwards.
    pub fn apply<B: IdePort + Send, P: Platform>(&self, controller: &Controller<B, P>) {
        controller.set_write_protected(self.write_protected);
        controller.set_compat_timing(self.compat_timing);
        if (1..=ATA_MAX_CHS_HEADS).contains(&self.heads) {
            controller.set_chs_geometry(self.cylinders, self.heads, self.sectors_per_track);
        } else {
            log::warn!("config: ignoring stored geometry with {} heads", self.heads);
        }
        controller.set_lba_mode(self.lba_mode);
        log::debug!(
            "config: applied {}/{}/{} lba={} wp={} compat={}",
            self.cylinders,
            self.heads,
            self.sectors_per_track,
            self.lba_mode,
            self.write_protected,
            self.compat_timing
        );
    }
}

impl Default for StoredConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ide::sim::{SimDrive, SimRig};

    fn sample() -> StoredConfig {
        StoredConfig {
            write_protected: false,
            auto_mount: false,
            iordy_pin: Some(28),
            compat_timing: true,
            cylinders: 1024,
            heads: 16,
            sectors_per_track: 63,
            geometry: GeometryChoice::Manual,
            lba_mode: false,
            log_level: 4,
        }
    }

    #[test]
    fn byte_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[0..4], &[0x31, 0x45, 0x44, 0x49]);
        assert_eq!(&bytes[8..10], &[0x00, 0x04]);
        assert_eq!(bytes[6], 28);
        assert_eq!(bytes[12], 3);
        assert_eq!(bytes[15], 0);
        assert_eq!(StoredConfig::from_bytes(&bytes), Some(sample()));
    }

    #[test]
    fn blank_flash_gives_defaults() {
        assert_eq!(StoredConfig::from_bytes(&[0xFF; 16]), None);
        assert_eq!(StoredConfig::from_bytes(&[0x31, 0x45]), None);
        assert_eq!(StoredConfig::load(&[0xFF; 16]), StoredConfig::DEFAULT);
        assert!(StoredConfig::DEFAULT.write_protected);
    }

    #[test]
    fn apply_reaches_shared_state() {
        let rig = SimRig::start(SimDrive::new_chs(1024, 16, 63));
        sample().apply(&rig.controller);
        let snap = rig.controller.snapshot();
        assert_eq!(
            (snap.geometry.cylinders, snap.geometry.heads, snap.geometry.sectors_per_track),
            (1024, 16, 63)
        );
        assert!(!snap.geometry.use_lba_mode);
        assert!(!snap.flags.write_protected);
        assert!(rig.controller.compat_timing());
        assert_eq!(snap.capacity(), 1024 * 16 * 63);
    }

    #[test]
    fn apply_skips_geometry_with_too_many_heads() {
        let rig = SimRig::start(SimDrive::new_chs(1024, 16, 63));
        let stored = StoredConfig { heads: 32, ..sample() };
        stored.apply(&rig.controller);
        let snap = rig.controller.snapshot();
        assert_eq!(snap.geometry.heads, 0);
        assert_eq!(snap.capacity(), 0);
        assert!(!snap.flags.write_protected);
    }

    #[test]
    fn settings_survive_postcard() {
        let bytes = postcard::to_allocvec(&sample()).unwrap();
        assert_eq!(postcard::from_bytes::<StoredConfig>(&bytes).unwrap(), sample());
    }
}
