//! Unified error types for peerscan.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Nothing here is fatal: every error ends up logged and folded into the
//! roster's failure flags.

use core::fmt;

/// Why the radio refused an outbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// Vendor stack error code.
    Raw(i32),
    /// Command queue full or another operation outstanding.
    Busy,
    /// Command not valid in the current radio state.
    InvalidState,
}

/// Status code carried by an inbound radio event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattStatus {
    Ok,
    Error(u16),
}

impl GattStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, GattStatus::Ok)
    }

    pub fn into_result(self) -> Result<(), Error> {
        match self {
            GattStatus::Ok => Ok(()),
            status => Err(Error::Gatt(status)),
        }
    }
}

/// Top-level error type used across the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The radio rejected a command.
    Radio(RadioError),

    /// An event reported a non-success status.
    Gatt(GattStatus),

    /// The connected peer does not expose the Generic Access service.
    ServiceNotFound,

    /// The Device Name characteristic (0x2A00) was not found.
    CharacteristicNotFound,

    /// The Device Name characteristic is not readable.
    NotReadable,

    /// The peer returned an empty name.
    EmptyName,

    /// The event referenced a peer that is no longer in the roster.
    UnknownPeer,
}

// Convenience conversions

impl From<RadioError> for Error {
    fn from(e: RadioError) -> Self {
        Error::Radio(e)
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioError::Raw(code) => write!(f, "radio error {:#x}", code),
            RadioError::Busy => f.write_str("radio busy"),
            RadioError::InvalidState => f.write_str("invalid radio state"),
        }
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GattStatus::Ok => f.write_str("ok"),
            GattStatus::Error(code) => write!(f, "status {:#x}", code),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Radio(e) => write!(f, "{}", e),
            Error::Gatt(status) => write!(f, "gatt {}", status),
            Error::ServiceNotFound => f.write_str("generic access service not found"),
            Error::CharacteristicNotFound => f.write_str("device name characteristic not found"),
            Error::NotReadable => f.write_str("device name not readable"),
            Error::EmptyName => f.write_str("empty device name"),
            Error::UnknownPeer => f.write_str("peer not in roster"),
        }
    }
}
