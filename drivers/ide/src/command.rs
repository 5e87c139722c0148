//! Task-file sequences for the commands the driver issues.

use heapless::Vec;

use crate::consts::*;

/// One step of a task-file sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Write(u8, u8),
    /// Pause before the next write, in microseconds
    Settle(u32),
}

/// How a sector range is addressed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    Chs { heads: u8, sectors_per_track: u8 },
    Lba28,
    Lba48,
}

/// Cylinder, head and 1-based sector of `lba`.
///
/// `heads` and `sectors_per_track` must be non-zero; callers check the
/// geometry before getting here.
pub fn lba_to_chs(lba: u64, heads: u8, sectors_per_track: u8) -> (u16, u8, u8) {
    let spt = sectors_per_track as u64;
    let sector = (lba % spt) as u8 + 1;
    let track = lba / spt;
    let head = (track % heads as u64) as u8;
    let cylinder = (track / heads as u64) as u16;
    (cylinder, head, sector)
}

/// A fully built register sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtaCommand {
    pub steps: Vec<Step, 12>,
    pub opcode: u8,
}

impl AtaCommand {
    fn from_steps(steps: &[Step]) -> Self {
        let mut out = Vec::new();
        let mut opcode = 0;
        for step in steps {
            if let Step::Write(ATA_REG_COMMAND, op) = *step {
                opcode = op;
            }
            // Every builder below stays well under capacity.
            let _ = out.push(*step);
        }
        AtaCommand { steps: out, opcode }
    }

    /// IDENTIFY DEVICE on the master, with a settle gap after the select.
    pub fn identify(select_delay_us: u32) -> Self {
        Self::from_steps(&[
            Step::Write(ATA_REG_HDDEVSEL, ATA_DEV_CHS),
            Step::Settle(select_delay_us),
            Step::Write(ATA_REG_COMMAND, ATA_CMD_IDENTIFY),
        ])
    }

    /// READ SECTOR(S) or READ SECTOR(S) EXT. `count` is 1..=256, or
    /// 1..=65536 for LBA48; the top value encodes as zero.
    pub fn read(addressing: Addressing, lba: u64, count: u32) -> Self {
        let opcode = match addressing {
            Addressing::Lba48 => ATA_CMD_READ_PIO_EXT,
            _ => ATA_CMD_READ_PIO,
        };
        Self::transfer(addressing, lba, count, opcode)
    }

    pub fn write(addressing: Addressing, lba: u64, count: u32) -> Self {
        let opcode = match addressing {
            Addressing::Lba48 => ATA_CMD_WRITE_PIO_EXT,
            _ => ATA_CMD_WRITE_PIO,
        };
        Self::transfer(addressing, lba, count, opcode)
    }

    fn transfer(addressing: Addressing, lba: u64, count: u32, opcode: u8) -> Self {
        match addressing {
            Addressing::Chs { heads, sectors_per_track } => {
                let (cylinder, head, sector) = lba_to_chs(lba, heads, sectors_per_track);
                Self::from_steps(&[
                    Step::Write(ATA_REG_SECCOUNT, count as u8),
                    Step::Write(ATA_REG_LBA0, sector),
                    Step::Write(ATA_REG_LBA1, cylinder as u8),
                    Step::Write(ATA_REG_LBA2, (cylinder >> 8) as u8),
                    Step::Write(ATA_REG_HDDEVSEL, ATA_DEV_CHS | (head & 0x0F)),
                    Step::Write(ATA_REG_COMMAND, opcode),
                ])
            }
            Addressing::Lba28 => Self::from_steps(&[
                Step::Write(ATA_REG_SECCOUNT, count as u8),
                Step::Write(ATA_REG_LBA0, lba as u8),
                Step::Write(ATA_REG_LBA1, (lba >> 8) as u8),
                Step::Write(ATA_REG_LBA2, (lba >> 16) as u8),
                Step::Write(ATA_REG_HDDEVSEL, ATA_DEV_LBA | ((lba >> 24) as u8 & 0x0F)),
                Step::Write(ATA_REG_COMMAND, opcode),
            ]),
            // High-order bytes go in first so they end up in the
            // "previous" half of each register pair.
            Addressing::Lba48 => Self::from_steps(&[
                Step::Write(ATA_REG_SECCOUNT, (count >> 8) as u8),
                Step::Write(ATA_REG_LBA0, (lba >> 24) as u8),
                Step::Write(ATA_REG_LBA1, (lba >> 32) as u8),
                Step::Write(ATA_REG_LBA2, (lba >> 40) as u8),
                Step::Write(ATA_REG_SECCOUNT, count as u8),
                Step::Write(ATA_REG_LBA0, lba as u8),
                Step::Write(ATA_REG_LBA1, (lba >> 8) as u8),
                Step::Write(ATA_REG_LBA2, (lba >> 16) as u8),
                Step::Write(ATA_REG_HDDEVSEL, ATA_DEV_LBA),
                Step::Write(ATA_REG_COMMAND, opcode),
            ]),
        }
    }

    /// INITIALIZE DEVICE PARAMETERS. `heads` is 1..=16.
    pub fn set_geometry(heads: u8, sectors_per_track: u8) -> Self {
        Self::from_steps(&[
            Step::Write(ATA_REG_HDDEVSEL, ATA_DEV_CHS | (heads.wrapping_sub(1) & 0x0F)),
            Step::Write(ATA_REG_SECCOUNT, sectors_per_track),
            Step::Write(ATA_REG_COMMAND, ATA_CMD_INIT_DEV_PARAMS),
        ])
    }

    pub fn flush_cache(lba48: bool) -> Self {
        let opcode = if lba48 {
            ATA_CMD_CACHE_FLUSH_EXT
        } else {
            ATA_CMD_CACHE_FLUSH
        };
        Self::from_steps(&[
            Step::Write(ATA_REG_HDDEVSEL, ATA_DEV_LBA),
            Step::Write(ATA_REG_COMMAND, opcode),
        ])
    }

    /// Register writes in issue order, settle steps dropped.
    pub fn writes(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.steps.iter().filter_map(|s| match *s {
            Step::Write(reg, val) => Some((reg, val)),
            Step::Settle(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec as StdVec;

    #[test]
    fn chs_translation() {
        assert_eq!(lba_to_chs(0, 4, 63), (0, 0, 1));
        assert_eq!(lba_to_chs(62, 4, 63), (0, 0, 63));
        assert_eq!(lba_to_chs(63, 4, 63), (0, 1, 1));
        assert_eq!(lba_to_chs(252, 4, 63), (1, 0, 1));
        assert_eq!(lba_to_chs(25_199, 4, 63), (99, 3, 63));
    }

    #[test]
    fn chs_read_registers() {
        let cmd = AtaCommand::read(
            Addressing::Chs { heads: 4, sectors_per_track: 63 },
            252 + 63 + 5,
            256,
        );
        let writes: StdVec<_> = cmd.writes().collect();
        assert_eq!(
            writes,
            [(2, 0), (3, 6), (4, 1), (5, 0), (6, 0xA1), (7, ATA_CMD_READ_PIO)]
        );
    }

    #[test]
    fn lba28_packs_top_nibble_into_device() {
        let cmd = AtaCommand::write(Addressing::Lba28, 0x0ABC_DEF1, 3);
        let writes: StdVec<_> = cmd.writes().collect();
        assert_eq!(
            writes,
            [(2, 3), (3, 0xF1), (4, 0xDE), (5, 0xBC), (6, 0xEA), (7, ATA_CMD_WRITE_PIO)]
        );
    }

    #[test]
    fn lba48_writes_high_bytes_first() {
        let cmd = AtaCommand::read(Addressing::Lba48, 0x0000_1234_5678_9ABC, 65536);
        let writes: StdVec<_> = cmd.writes().collect();
        assert_eq!(
            writes,
            [
                (2, 0x00),
                (3, 0x56),
                (4, 0x34),
                (5, 0x12),
                (2, 0x00),
                (3, 0xBC),
                (4, 0x9A),
                (5, 0x78),
                (6, 0xE0),
                (7, ATA_CMD_READ_PIO_EXT),
            ]
        );
        assert_eq!(cmd.opcode, ATA_CMD_READ_PIO_EXT);
    }

    #[test]
    fn lba48_count_word() {
        let cmd = AtaCommand::write(Addressing::Lba48, 0, 300);
        let counts: StdVec<_> = cmd.writes().filter(|w| w.0 == ATA_REG_SECCOUNT).collect();
        assert_eq!(counts, [(2, 0x01), (2, 0x2C)]);
        assert_eq!(cmd.opcode, ATA_CMD_WRITE_PIO_EXT);
    }

    #[test]
    fn geometry_and_identify() {
        let geo: StdVec<_> = AtaCommand::set_geometry(16, 63).writes().collect();
        assert_eq!(geo, [(6, 0xAF), (2, 63), (7, ATA_CMD_INIT_DEV_PARAMS)]);

        let id = AtaCommand::identify(500);
        assert_eq!(id.steps[1], Step::Settle(500));
        assert_eq!(id.opcode, ATA_CMD_IDENTIFY);
    }

    #[test]
    fn flush_opcode_by_mode() {
        assert_eq!(AtaCommand::flush_cache(true).opcode, ATA_CMD_CACHE_FLUSH_EXT);
        assert_eq!(AtaCommand::flush_cache(false).opcode, ATA_CMD_CACHE_FLUSH);
    }
}
