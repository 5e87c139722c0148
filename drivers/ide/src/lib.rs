//! Bit-banged PATA/IDE driver core.
//!
//! The driver runs on one execution context (the worker) and is reached
//! from the other through a bounded request queue; see [`worker`]. Below
//! that sit the read cache, the multi-sector transfer engine, the task-file
//! command builders and the GPIO bus primitives. Board support plugs in
//! through [`bus::IdePort`] and [`platform::Platform`].
#![cfg_attr(not(any(test, feature = "sim")), no_std)]

extern crate alloc;

pub mod bus;
pub mod cache;
pub mod command;
pub mod config;
pub mod consts;
pub mod device;
pub mod error;
pub mod identify;
pub mod msc;
pub mod platform;
pub mod shared;
pub mod transfer;
pub mod types;
pub mod worker;

#[cfg(any(test, feature = "sim"))]
pub mod sim;


pub use bus::{IdeBus, IdePort};
pub use cache::{ReadCache, CACHE_SECTORS};
pub use config::{IdeConfig, PinMap, Profile, TimingProfile, TimingSet};
pub use device::{IdeDevice, Operation, Reply};
pub use error::{IdeError, IdeResult};
pub use identify::{plan_mount, GeometryChoice, IdentifyData, MountPlan};
pub use platform::Platform;
pub use shared::SharedState;
pub use types::{DriveFlags, DriveGeometry, DriveState, Snapshot};
pub use worker::{Controller, StatsSnapshot, REQUEST_QUEUE_DEPTH};
