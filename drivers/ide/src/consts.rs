#![allow(unused)]

// ATA Status Register bits
pub const ATA_SR_BSY: u8 = 0x80;    // Busy
pub const ATA_SR_DRDY: u8 = 0x40;   // Drive ready
pub const ATA_SR_DF: u8 = 0x20;     // Drive write fault
pub const ATA_SR_DSC: u8 = 0x10;    // Drive seek complete
pub const ATA_SR_DRQ: u8 = 0x08;    // Data request ready
pub const ATA_SR_CORR: u8 = 0x04;   // Corrected data
pub const ATA_SR_IDX: u8 = 0x02;    // Index
pub const ATA_SR_ERR: u8 = 0x01;    // Error

// ATA Error Register bits
pub const ATA_ER_BBK: u8 = 0x80;    // Bad block
pub const ATA_ER_UNC: u8 = 0x40;    // Uncorrectable data
pub const ATA_ER_IDNF: u8 = 0x10;   // ID mark not found
pub const ATA_ER_ABRT: u8 = 0x04;   // Command aborted

// ATA Commands (PIO only, the bus has no DMA lines wired)
pub const ATA_CMD_READ_PIO: u8 = 0x20;
pub const ATA_CMD_READ_PIO_EXT: u8 = 0x24;
pub const ATA_CMD_WRITE_PIO: u8 = 0x30;
pub const ATA_CMD_WRITE_PIO_EXT: u8 = 0x34;
pub const ATA_CMD_INIT_DEV_PARAMS: u8 = 0x91;
pub const ATA_CMD_CACHE_FLUSH: u8 = 0xE7;
pub const ATA_CMD_CACHE_FLUSH_EXT: u8 = 0xEA;
pub const ATA_CMD_IDENTIFY: u8 = 0xEC;

// Task-file register addresses on A0..A2 with CS0 asserted
pub const ATA_REG_DATA: u8 = 0x00;
pub const ATA_REG_ERROR: u8 = 0x01;
pub const ATA_REG_FEATURES: u8 = 0x01;
pub const ATA_REG_SECCOUNT: u8 = 0x02;
pub const ATA_REG_LBA0: u8 = 0x03;      // sector number in CHS mode
pub const ATA_REG_LBA1: u8 = 0x04;      // cylinder low in CHS mode
pub const ATA_REG_LBA2: u8 = 0x05;      // cylinder high in CHS mode
pub const ATA_REG_HDDEVSEL: u8 = 0x06;
pub const ATA_REG_COMMAND: u8 = 0x07;
pub const ATA_REG_STATUS: u8 = 0x07;

// Drive/head register values (master only)
pub const ATA_DEV_CHS: u8 = 0xA0;
pub const ATA_DEV_LBA: u8 = 0xE0;

// IDENTIFY DEVICE word offsets
pub const ATA_IDENT_CYLINDERS: usize = 1;
pub const ATA_IDENT_HEADS: usize = 3;
pub const ATA_IDENT_SECTORS: usize = 6;
pub const ATA_IDENT_SERIAL: usize = 10;
pub const ATA_IDENT_FIRMWARE: usize = 23;
pub const ATA_IDENT_MODEL: usize = 27;
pub const ATA_IDENT_CAPABILITIES: usize = 49;
pub const ATA_IDENT_MAX_LBA: usize = 60;
pub const ATA_IDENT_COMMANDSETS: usize = 83;
pub const ATA_IDENT_MAX_LBA_EXT: usize = 100;

pub const ATA_CAP_LBA: u16 = 1 << 9;
pub const ATA_CMDSET_LBA48: u16 = 1 << 10;

// The drive/head register carries four head bits
pub const ATA_MAX_CHS_HEADS: u8 = 16;

pub const SECTOR_SIZE: usize = 512;
pub const SECTOR_WORDS: usize = 256;

// Largest transfer a single command can describe
pub const MAX_SECTORS_28: u32 = 256;
pub const MAX_SECTORS_48: u32 = 65536;
pub const LBA28_LIMIT: u64 = 1 << 28;
