//! Helpers for the mass-storage glue: unit readiness, capacity and the
//! integer status convention of the C surface.

use crate::error::{IdeError, IdeResult};
use crate::types::Snapshot;

/// TEST UNIT READY: mounted, or the active addressing mode has a size.
pub fn unit_ready(snapshot: &Snapshot, mounted: bool) -> bool {
    mounted || snapshot.capacity() > 0
}

/// READ CAPACITY (10) block count, clamped to 32 bits.
pub fn block_count(snapshot: &Snapshot) -> u32 {
    snapshot.block_count_u32()
}

/// Byte count on success, negative [`IdeError::code`] on failure.
pub fn status_bytes(result: IdeResult<usize>) -> i32 {
    match result {
        Ok(n) => n.min(i32::MAX as usize) as i32,
        Err(e) => e.code(),
    }
}

/// Zero on success, negative [`IdeError::code`] on failure.
pub fn status(result: IdeResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

/// Inverse of [`IdeError::code`], for callers holding a raw status.
pub fn error_from_code(code: i32) -> Option<IdeError> {
    [
        IdeError::OutOfRange,
        IdeError::DeviceError,
        IdeError::Timeout,
        IdeError::Busy,
        IdeError::NotReady,
    ]
    .into_iter()
    .find(|e| e.code() == code)
}
