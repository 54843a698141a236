//! Hardware Abstraction Error Types
//!
//! Two distinct failure channels exist in this crate:
//!
//! - [`CommErrorKind`] classifies *bus outcomes*. These are never returned as
//!   `Err`; they travel inside a [`DeviceDataResult`](crate::device::DeviceDataResult).
//! - [`HalError`] and [`BitFieldError`] describe *caller misuse* (disposed device,
//!   malformed address range, bit-field descriptor out of bounds). These are the
//!   `Err` side of every fallible call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for voltage-hal operations
pub type Result<T> = std::result::Result<T, HalError>;

// ============================================================================
// Bus outcome taxonomy
// ============================================================================

/// Structured kind of a failed bus transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommErrorKind {
    /// No response within the configured timeout (also used for cancellation)
    Timeout,
    /// Target did not acknowledge its address or a data byte
    NoAcknowledge,
    /// Arbitration loss, stuck line or similar electrical fault
    BusError,
    /// Payload arrived but failed integrity checks
    DataCorruption,
    /// CRC/PEC mismatch
    ChecksumError,
    /// Register address not defined, or access right violated
    AddressError,
    /// Malformed request framing
    ProtocolError,
    /// Device not in a state that allows bus activity
    HardwareError,
    Unknown,
}

impl CommErrorKind {
    /// Kinds the fault injector may produce
    pub const BUS_FAULTS: [CommErrorKind; 5] = [
        CommErrorKind::Timeout,
        CommErrorKind::NoAcknowledge,
        CommErrorKind::BusError,
        CommErrorKind::DataCorruption,
        CommErrorKind::ChecksumError,
    ];

    /// Whether this kind models an electrical/bus-level condition
    pub fn is_bus_fault(&self) -> bool {
        Self::BUS_FAULTS.contains(self)
    }

    /// Human readable text for display layers
    pub fn friendly_message(&self) -> &'static str {
        match self {
            CommErrorKind::Timeout => "The device did not respond in time",
            CommErrorKind::NoAcknowledge => "The device did not acknowledge the request",
            CommErrorKind::BusError => "A bus error interrupted the transfer",
            CommErrorKind::DataCorruption => "The received data was corrupted",
            CommErrorKind::ChecksumError => "The data checksum did not match",
            CommErrorKind::AddressError => "The register address is not available",
            CommErrorKind::ProtocolError => "The request was not understood by the device",
            CommErrorKind::HardwareError => "The device is not ready for communication",
            CommErrorKind::Unknown => "An unknown communication error occurred",
        }
    }
}

impl std::fmt::Display for CommErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommErrorKind::Timeout => write!(f, "TIMEOUT"),
            CommErrorKind::NoAcknowledge => write!(f, "NACK"),
            CommErrorKind::BusError => write!(f, "BUS_ERROR"),
            CommErrorKind::DataCorruption => write!(f, "DATA_CORRUPTION"),
            CommErrorKind::ChecksumError => write!(f, "CHECKSUM_ERROR"),
            CommErrorKind::AddressError => write!(f, "ADDRESS_ERROR"),
            CommErrorKind::ProtocolError => write!(f, "PROTOCOL_ERROR"),
            CommErrorKind::HardwareError => write!(f, "HARDWARE_ERROR"),
            CommErrorKind::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ============================================================================
// Bit-field codec errors
// ============================================================================

/// Bit-field codec contract violations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitFieldError {
    #[error("Buffer is empty")]
    EmptyBuffer,

    #[error("Value {value} exceeds field maximum {max}")]
    ValueOutOfRange { value: u64, max: u64 },

    #[error("Invalid bit width: {0} (expected 1..=32)")]
    InvalidBitWidth(u8),

    #[error("Invalid bit position: {0} (expected 0..=31, position + width <= 32)")]
    InvalidBitPosition(u8),
}

// ============================================================================
// Caller misuse
// ============================================================================

/// Programming-contract violations raised by devices and the data model
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HalError {
    /// Device was disposed and can no longer be used
    #[error("Device disposed: {0}")]
    Disposed(String),

    /// Requested range is empty or wraps the address space
    #[error("Invalid address range: 0x{address:04X} + {length}")]
    InvalidAddressRange { address: u32, length: usize },

    /// Lifecycle operation not allowed from the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Bit field error: {0}")]
    BitField(#[from] BitFieldError),

    #[error("Register not found: 0x{0:04X}")]
    RegisterNotFound(u32),

    #[error("Bit field not found: {register}.{field}")]
    FieldNotFound { register: String, field: String },
}

impl HalError {
    pub fn disposed(device_id: impl Into<String>) -> Self {
        HalError::Disposed(device_id.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        HalError::InvalidState(msg.into())
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        HalError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
