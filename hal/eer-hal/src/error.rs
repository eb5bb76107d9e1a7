//! Status and error model
//!
//! Every fallible operation in the HAL returns [`HalResult`]. `Ok` means the
//! requested effect was fully applied; each [`HalError`] variant names one
//! failure class shared by all peripherals.

use core::fmt;

/// Failure class of a HAL operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    /// Hardware reported a failure (bus NACK, arbitration lost, unexpected state)
    Error,
    /// The resource is occupied by another in-flight operation
    Busy,
    /// A deadline passed while waiting on hardware
    Timeout,
    /// Invalid identifier, empty buffer or value out of range
    InvalidParameter,
    /// The backend does not implement this operation or configuration
    NotSupported,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            HalError::Error => "hardware error",
            HalError::Busy => "resource busy",
            HalError::Timeout => "operation timed out",
            HalError::InvalidParameter => "invalid parameter",
            HalError::NotSupported => "not supported",
        };
        f.write_str(msg)
    }
}

/// Result type returned by every HAL operation
pub type HalResult<T> = Result<T, HalError>;

/// Flat status code covering success and every failure class
///
/// Useful where a plain code has to cross a boundary that cannot carry a
/// `Result`, e.g. a status byte reported over a debug link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Error = 1,
    Busy = 2,
    Timeout = 3,
    InvalidParameter = 4,
    NotSupported = 5,
}

impl Status {
    /// Convert back into a `Result`
    pub fn into_result(self) -> HalResult<()> {
        match self {
            Status::Ok => Ok(()),
            Status::Error => Err(HalError::Error),
            Status::Busy => Err(HalError::Busy),
            Status::Timeout => Err(HalError::Timeout),
            Status::InvalidParameter => Err(HalError::InvalidParameter),
            Status::NotSupported => Err(HalError::NotSupported),
        }
    }

    /// Check for success
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl From<HalError> for Status {
    fn from(e: HalError) -> Self {
        match e {
            HalError::Error => Status::Error,
            HalError::Busy => Status::Busy,
            HalError::Timeout => Status::Timeout,
            HalError::InvalidParameter => Status::InvalidParameter,
            HalError::NotSupported => Status::NotSupported,
        }
    }
}

impl<T> From<HalResult<T>> for Status {
    fn from(r: HalResult<T>) -> Self {
        match r {
            Ok(_) => Status::Ok,
            Err(e) => e.into(),
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = HalError;

    fn try_from(code: u8) -> Result<Self, HalError> {
        match code {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Error),
            2 => Ok(Status::Busy),
            3 => Ok(Status::Timeout),
            4 => Ok(Status::InvalidParameter),
            5 => Ok(Status::NotSupported),
            _ => Err(HalError::InvalidParameter),
        }
    }
}
