/// IDE driver error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeError {
    /// Request exceeds device capacity, has a zero or malformed count,
    /// a caller buffer too small for it, or is a write to a protected drive
    OutOfRange,
    /// Device asserted ERR or DF in the status register
    DeviceError,
    /// Status polling exceeded its budget
    Timeout,
    /// Request channel full, or the driver is already mid-operation
    Busy,
    /// Worker has not been launched or has been shut down
    NotReady,
}

impl IdeError {
    /// Get a human-readable description of the error
    pub fn description(self) -> &'static str {
        match self {
            IdeError::OutOfRange => "IDE request out of range",
            IdeError::DeviceError => "IDE device reported an error",
            IdeError::Timeout => "IDE device timed out",
            IdeError::Busy => "IDE request channel busy",
            IdeError::NotReady => "IDE worker not running",
        }
    }

    /// Negative status code returned across the C boundary.
    pub fn code(self) -> i32 {
        match self {
            IdeError::OutOfRange => -1,
            IdeError::DeviceError => -2,
            IdeError::Timeout => -3,
            IdeError::Busy => -4,
            IdeError::NotReady => -5,
        }
    }

    /// Rejections happen before any register is touched.
    pub fn is_rejection(self) -> bool {
        matches!(self, IdeError::OutOfRange)
    }
}

impl core::fmt::Display for IdeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// Result type for IDE operations
pub type IdeResult<T> = Result<T, IdeError>;
