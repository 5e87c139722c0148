//! Firmware core of the IDE to USB mass-storage bridge.
//!
//! Core 1 runs the IDE worker from [`ide::Controller`]; core 0 runs the
//! USB stack and UI and reaches the drive through the C functions in
//! `ffi`. This crate adds what the driver core leaves to the board: the
//! persisted settings, the boot-time mount, the log ring and, when built
//! for the target, the heap, panic handler and SDK bindings.
#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod boot;
pub mod config;
pub mod logger;

#[cfg(target_os = "none")]
mod ffi;
#[cfg(target_os = "none")]
pub mod rp2040;

pub use config::StoredConfig;
pub use logger::{LogEntry, RingLogger};
