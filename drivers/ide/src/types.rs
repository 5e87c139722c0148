use serde::{Deserialize, Serialize};

/// Addressing geometry of the attached drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveGeometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub total_lba_sectors: u64,
    pub supports_lba48: bool,
    pub use_lba_mode: bool,
}

impl DriveGeometry {
    pub const fn empty() -> Self {
        DriveGeometry {
            cylinders: 0,
            heads: 0,
            sectors_per_track: 0,
            total_lba_sectors: 0,
            supports_lba48: false,
            use_lba_mode: false,
        }
    }

    /// Number of addressable sectors in the active addressing mode.
    /// Zero means sector I/O must be refused.
    pub fn capacity(&self) -> u64 {
        if self.use_lba_mode {
            self.total_lba_sectors
        } else {
            self.cylinders as u64 * self.heads as u64 * self.sectors_per_track as u64
        }
    }

    /// LBA48 commands are only used in LBA mode on drives that support them.
    pub fn uses_lba48(&self) -> bool {
        self.use_lba_mode && self.supports_lba48
    }
}

/// Mode and mount flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFlags {
    pub mounted: bool,
    pub write_protected: bool,
    pub compat_timing_enabled: bool,
    pub media_changed_pending: bool,
}

/// Multi-field state kept behind the lockout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveState {
    pub geometry: DriveGeometry,
    pub write_protected: bool,
    pub compat_timing: bool,
}

impl DriveState {
    /// Drives come up write protected until configuration says otherwise.
    pub const fn new() -> Self {
        DriveState {
            geometry: DriveGeometry::empty(),
            write_protected: true,
            compat_timing: false,
        }
    }
}

impl Default for DriveState {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of the shared state handed to the host context. It may be stale
/// the moment it is returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub geometry: DriveGeometry,
    pub flags: DriveFlags,
}

impl Snapshot {
    pub fn capacity(&self) -> u64 {
        self.geometry.capacity()
    }

    /// Unit is ready when mounted or when the active mode has a usable size.
    pub fn is_ready(&self) -> bool {
        self.flags.mounted || self.capacity() > 0
    }

    /// Block count as reported to a 32-bit READ CAPACITY.
    pub fn block_count_u32(&self) -> u32 {
        self.capacity().min(u32::MAX as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_follows_mode() {
        let mut g = DriveGeometry {
            cylinders: 100,
            heads: 4,
            sectors_per_track: 63,
            total_lba_sectors: 5_000_000,
            supports_lba48: true,
            use_lba_mode: false,
        };
        assert_eq!(g.capacity(), 25_200);
        assert!(!g.uses_lba48());
        g.use_lba_mode = true;
        assert_eq!(g.capacity(), 5_000_000);
        assert!(g.uses_lba48());
    }

    #[test]
    fn zero_geometry_is_not_ready() {
        let snap = Snapshot::default();
        assert_eq!(snap.capacity(), 0);
        assert!(!snap.is_ready());
    }

    #[test]
    fn block_count_clamps() {
        let mut snap = Snapshot::default();
        snap.geometry.use_lba_mode = true;
        snap.geometry.total_lba_sectors = 1 << 40;
        assert_eq!(snap.block_count_u32(), u32::MAX);
    }

    #[test]
    fn geometry_survives_postcard() {
        let g = DriveGeometry {
            cylinders: 16383,
            heads: 16,
            sectors_per_track: 63,
            total_lba_sectors: 312_581_808,
            supports_lba48: true,
            use_lba_mode: true,
        };
        let bytes = postcard::to_allocvec(&g).unwrap();
        assert_eq!(postcard::from_bytes::<DriveGeometry>(&bytes).unwrap(), g);

        let flags = DriveFlags { mounted: true, media_changed_pending: true, ..DriveFlags::default() };
        let bytes = postcard::to_allocvec(&flags).unwrap();
        assert_eq!(postcard::from_bytes::<DriveFlags>(&bytes).unwrap(), flags);
    }
}
