//! Decoding of the IDENTIFY DEVICE block and mount-time geometry choice.

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::consts::*;

#[derive(Clone, Copy)]
pub struct IdentifyData {
    pub words: [u16; SECTOR_WORDS],
}

impl IdentifyData {
    pub fn new(words: [u16; SECTOR_WORDS]) -> Self {
        IdentifyData { words }
    }

    /// ATA strings store two characters per word, high byte first.
    fn string<const N: usize>(&self, first_word: usize) -> String<N> {
        let mut out = String::new();
        for word in &self.words[first_word..first_word + N / 2] {
            for byte in [(word >> 8) as u8, *word as u8] {
                let c = if byte.is_ascii_graphic() || byte == b' ' {
                    byte as char
                } else {
                    ' '
                };
                let _ = out.push(c);
            }
        }
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        out
    }

    pub fn model(&self) -> String<40> {
        self.string(ATA_IDENT_MODEL)
    }

    pub fn serial(&self) -> String<20> {
        self.string(ATA_IDENT_SERIAL)
    }

    pub fn firmware(&self) -> String<8> {
        self.string(ATA_IDENT_FIRMWARE)
    }

    /// Default CHS translation (words 1, 3 and 6).
    pub fn native_geometry(&self) -> (u16, u8, u8) {
        (
            self.words[ATA_IDENT_CYLINDERS],
            self.words[ATA_IDENT_HEADS] as u8,
            self.words[ATA_IDENT_SECTORS] as u8,
        )
    }

    pub fn lba_supported(&self) -> bool {
        self.words[ATA_IDENT_CAPABILITIES] & ATA_CAP_LBA != 0
    }

    pub fn lba28_sectors(&self) -> u32 {
        self.words[ATA_IDENT_MAX_LBA] as u32 | (self.words[ATA_IDENT_MAX_LBA + 1] as u32) << 16
    }

    pub fn lba48_sectors(&self) -> u64 {
        (0..4).fold(0u64, |acc, i| {
            acc | (self.words[ATA_IDENT_MAX_LBA_EXT + i] as u64) << (16 * i)
        })
    }

    /// Command set bit only; see [`supports_lba48`](Self::supports_lba48).
    pub fn lba48_feature(&self) -> bool {
        self.words[ATA_IDENT_COMMANDSETS] & ATA_CMDSET_LBA48 != 0
    }

    /// Addressable sectors: the 48-bit count when the drive has one.
    pub fn capacity(&self) -> u64 {
        let lba48 = self.lba48_sectors();
        if self.lba48_feature() && lba48 > 0 {
            lba48
        } else {
            self.lba28_sectors() as u64
        }
    }

    pub fn supports_lba48(&self) -> bool {
        self.lba48_feature() || self.capacity() > 0x0FFF_FFFF
    }
}

/// How the drive is addressed once mounted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryChoice {
    Native,
    /// Native translation with heads doubled and cylinders halved
    Large,
    Lba,
    /// Geometry taken from stored settings
    Manual,
}

impl GeometryChoice {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => GeometryChoice::Large,
            2 => GeometryChoice::Lba,
            3 => GeometryChoice::Manual,
            _ => GeometryChoice::Native,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            GeometryChoice::Native => 0,
            GeometryChoice::Large => 1,
            GeometryChoice::Lba => 2,
            GeometryChoice::Manual => 3,
        }
    }
}

/// Bit-shift translation that keeps cylinders within BIOS limits.
pub fn large_geometry(cylinders: u16, heads: u8) -> (u16, u8) {
    (cylinders >> 1, heads.saturating_mul(2))
}

/// Geometry and mode to publish at mount time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountPlan {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub total_lba: u64,
    pub supports_lba48: bool,
    pub use_lba_mode: bool,
}

impl MountPlan {
    /// Heads the drive's INITIALIZE DEVICE PARAMETERS can express.
    pub fn programmable(&self) -> bool {
        (1..=16).contains(&self.heads) && self.sectors_per_track > 0
    }
}

/// Work out the mount geometry. `manual` is used for
/// [`GeometryChoice::Manual`]; LBA falls back to native CHS on drives
/// without LBA, and a large translation that needs more than 16 heads
/// falls back to native.
pub fn plan_mount(id: &IdentifyData, choice: GeometryChoice, manual: (u16, u8, u8)) -> MountPlan {
    let (cyl, heads, spt) = id.native_geometry();
    let mut plan = MountPlan {
        cylinders: cyl,
        heads,
        sectors_per_track: spt,
        total_lba: id.capacity(),
        supports_lba48: id.supports_lba48(),
        use_lba_mode: false,
    };

    match choice {
        GeometryChoice::Native => {}
        GeometryChoice::Large => {
            let (lcyl, lheads) = large_geometry(cyl, heads);
            if lheads <= ATA_MAX_CHS_HEADS {
                plan.cylinders = lcyl;
                plan.heads = lheads;
            } else {
                log::warn!("ide: large translation needs {} heads, using native", lheads);
            }
        }
        GeometryChoice::Lba => {
            if id.lba_supported() && plan.total_lba > 0 {
                plan.use_lba_mode = true;
            } else {
                log::warn!("ide: drive has no LBA, using native CHS");
            }
        }
        GeometryChoice::Manual => {
            let (mcyl, mheads, mspt) = manual;
            if (1..=ATA_MAX_CHS_HEADS).contains(&mheads) && mspt > 0 && mcyl > 0 {
                plan.cylinders = mcyl;
                plan.heads = mheads;
                plan.sectors_per_track = mspt;
            } else {
                log::warn!("ide: manual geometry {}/{}/{} unusable, using native", mcyl, mheads, mspt);
            }
        }
    }
    plan
}
