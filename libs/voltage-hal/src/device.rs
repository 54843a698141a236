//! Device contract
//!
//! Every register-addressable device implements [`Device`]. Lifecycle calls
//! drive the [`ConnectionState`] machine; data calls return a
//! [`DeviceDataResult`] that describes the bus outcome. The `Err` side of the
//! outer `Result` is reserved for caller misuse ([`HalError`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bytes::{bit_field, ByteOrder};
use crate::config::{CommunicationConfig, ProtocolKind};
use crate::error::{BitFieldError, CommErrorKind, HalError, Result};
use crate::register::{BitField, BitFieldValue, RegisterMap};
use crate::statistics::CommunicationStatistics;

/// Outcome of a bus transaction that already passed the misuse checks
pub type BusResult<T> = std::result::Result<T, DeviceFailure>;

// ============================================================================
// Connection state machine
// ============================================================================

/// Connection state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    /// Reserved for devices that serialize bus access
    Busy,
    Error,
    NotResponding,
    Resetting,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (from, to) if from == to => false,
            // release from anywhere
            (_, Uninitialized) => true,
            (Uninitialized | Error | NotResponding, Initializing) => true,
            (Initializing, Ready | Error) => true,
            (Ready | Error | NotResponding, Resetting) => true,
            (Resetting, Ready | Error) => true,
            (Ready, NotResponding) | (NotResponding, Ready) => true,
            (Ready, Busy) | (Busy, Ready | Error) => true,
            _ => false,
        }
    }

    /// Data operations are only allowed in this state
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Uninitialized => write!(f, "Uninitialized"),
            ConnectionState::Initializing => write!(f, "Initializing"),
            ConnectionState::Ready => write!(f, "Ready"),
            ConnectionState::Busy => write!(f, "Busy"),
            ConnectionState::Error => write!(f, "Error"),
            ConnectionState::NotResponding => write!(f, "NotResponding"),
            ConnectionState::Resetting => write!(f, "Resetting"),
        }
    }
}

/// Kind of reset requested through [`Device::reset`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetKind {
    /// Re-apply the active scenario preset and clear statistics
    Soft,
    /// Restore every register to its catalog default
    Factory,
}

impl std::fmt::Display for ResetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetKind::Soft => write!(f, "soft"),
            ResetKind::Factory => write!(f, "factory"),
        }
    }
}

// ============================================================================
// Transaction results
// ============================================================================

/// Why a bus transaction did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct DeviceFailure {
    pub kind: CommErrorKind,
    pub message: String,
    pub address: u32,
    /// Set when the caller's token fired; `kind` is then `Timeout`
    pub cancelled: bool,
}

impl DeviceFailure {
    pub fn new(address: u32, kind: CommErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            address,
            cancelled: false,
        }
    }

    /// Text suitable for end users, independent of `message`
    pub fn friendly_message(&self) -> &'static str {
        if self.cancelled {
            "The operation was cancelled"
        } else {
            self.kind.friendly_message()
        }
    }
}

/// Result of one register transaction
///
/// Only built through [`success`](Self::success), [`failure`](Self::failure)
/// and [`cancelled`](Self::cancelled).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDataResult {
    address: u32,
    data: Bytes,
    error: Option<DeviceFailure>,
    timestamp: DateTime<Utc>,
    elapsed: Duration,
}

impl DeviceDataResult {
    pub fn success(address: u32, data: impl Into<Bytes>, elapsed: Duration) -> Self {
        Self {
            address,
            data: data.into(),
            error: None,
            timestamp: Utc::now(),
            elapsed,
        }
    }

    pub fn failure(
        address: u32,
        kind: CommErrorKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            address,
            data: Bytes::new(),
            error: Some(DeviceFailure::new(address, kind, message)),
            timestamp: Utc::now(),
            elapsed,
        }
    }

    pub fn cancelled(address: u32, elapsed: Duration) -> Self {
        Self {
            address,
            data: Bytes::new(),
            error: Some(DeviceFailure {
                kind: CommErrorKind::Timeout,
                message: "operation cancelled".to_string(),
                address,
                cancelled: true,
            }),
            timestamp: Utc::now(),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.cancelled)
    }

    pub fn error_kind(&self) -> Option<CommErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn error(&self) -> Option<&DeviceFailure> {
        self.error.as_ref()
    }

    /// Payload; empty on failure
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn into_result(self) -> BusResult<Bytes> {
        match self.error {
            None => Ok(self.data),
            Some(failure) => Err(failure),
        }
    }

    /// First two payload bytes as a word
    pub fn value_u16(&self, order: ByteOrder) -> Option<u16> {
        match (self.is_success(), self.data.as_ref()) {
            (true, [b0, b1, ..]) => Some(order.u16_from_bytes([*b0, *b1])),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceDataResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            None => write!(
                f,
                "0x{:04X} OK [{}] in {:?}",
                self.address,
                hex_dump(&self.data),
                self.elapsed
            ),
            Some(failure) if failure.cancelled => write!(f, "0x{:04X} CANCELLED", self.address),
            Some(failure) => write!(f, "0x{:04X} {}", self.address, failure),
        }
    }
}

/// Static description of a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub device_type: String,
    pub protocol: ProtocolKind,
    pub address: u16,
    pub firmware_version: String,
    pub hardware_revision: String,
    pub register_count: usize,
    pub capabilities: Vec<String>,
}

/// Space separated upper-case hex
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Device trait
// ============================================================================

/// Register-addressable device
///
/// Data operations check the connection state first and never touch the bus
/// unless the device is [`ConnectionState::Ready`]. State changes are only
/// observable through the device's event sink.
#[async_trait]
pub trait Device: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn device_type(&self) -> &str;

    fn protocol(&self) -> ProtocolKind;

    /// Bus address from the current communication config
    fn address(&self) -> u16;

    // ========== Lifecycle ==========

    /// Bring the device to `Ready`; `Ok(false)` when it ended in `Error`
    async fn initialize(&self, cancel: &CancellationToken) -> Result<bool>;

    /// Stop background activity and return to `Uninitialized` (idempotent)
    async fn release(&self) -> Result<()>;

    /// Lightweight liveness check
    async fn probe(&self, cancel: &CancellationToken) -> Result<bool>;

    async fn reset(&self, kind: ResetKind, cancel: &CancellationToken) -> Result<bool>;

    // ========== Data ==========

    async fn read_register(
        &self,
        address: u32,
        length: usize,
        cancel: &CancellationToken,
    ) -> Result<DeviceDataResult>;

    async fn write_register(
        &self,
        address: u32,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<DeviceDataResult>;

    /// Write then read in one exchange
    async fn transfer(
        &self,
        write: &[u8],
        read_length: usize,
        cancel: &CancellationToken,
    ) -> Result<DeviceDataResult>;

    // ========== Configuration ==========

    fn get_device_info(&self) -> DeviceInfo;

    fn get_communication_config(&self) -> CommunicationConfig;

    fn set_communication_config(&self, config: CommunicationConfig) -> Result<()>;

    fn get_register_maps(&self) -> Arc<Vec<RegisterMap>>;

    fn statistics(&self) -> CommunicationStatistics;

    // ========== Convenience wrappers ==========

    async fn read_byte(&self, address: u32, cancel: &CancellationToken) -> Result<BusResult<u8>> {
        let result = self.read_register(address, 1, cancel).await?;
        Ok(result.into_result().and_then(|data| {
            data.first().copied().ok_or_else(|| {
                DeviceFailure::new(address, CommErrorKind::ProtocolError, "empty payload")
            })
        }))
    }

    async fn write_byte(
        &self,
        address: u32,
        value: u8,
        cancel: &CancellationToken,
    ) -> Result<DeviceDataResult> {
        self.write_register(address, &[value], cancel).await
    }

    async fn read_u16(
        &self,
        address: u32,
        order: ByteOrder,
        cancel: &CancellationToken,
    ) -> Result<BusResult<u16>> {
        let result = self.read_register(address, 2, cancel).await?;
        Ok(result.into_result().and_then(|data| match data.as_ref() {
            [b0, b1, ..] => Ok(order.u16_from_bytes([*b0, *b1])),
            _ => Err(DeviceFailure::new(
                address,
                CommErrorKind::ProtocolError,
                format!("expected 2 bytes, got {}", data.len()),
            )),
        }))
    }

    async fn write_u16(
        &self,
        address: u32,
        value: u16,
        order: ByteOrder,
        cancel: &CancellationToken,
    ) -> Result<DeviceDataResult> {
        self.write_register(address, &order.u16_to_bytes(value), cancel)
            .await
    }

    /// Issue reads one after another, in request order
    async fn read_batch(
        &self,
        requests: &[(u32, usize)],
        cancel: &CancellationToken,
    ) -> Result<Vec<DeviceDataResult>> {
        let mut results = Vec::with_capacity(requests.len());
        for (address, length) in requests {
            results.push(self.read_register(*address, *length, cancel).await?);
        }
        Ok(results)
    }

    /// Read the register at `address` and decode one field
    async fn read_bit_field(
        &self,
        address: u32,
        field: &BitField,
        cancel: &CancellationToken,
    ) -> Result<BusResult<u32>> {
        field.validate()?;
        let size = register_size(&self.get_register_maps(), address)?;
        let result = self.read_register(address, size, cancel).await?;
        match result.into_result() {
            Ok(data) => Ok(Ok(bit_field::extract(&data, field.bit_position, field.bit_width)?)),
            Err(failure) => Ok(Err(failure)),
        }
    }

    /// Read-modify-write of one field; other bits keep their current value
    async fn write_bit_field(
        &self,
        address: u32,
        field: &BitField,
        value: u32,
        cancel: &CancellationToken,
    ) -> Result<DeviceDataResult> {
        field.validate()?;
        if value as u64 > field.max_value() {
            return Err(BitFieldError::ValueOutOfRange {
                value: value as u64,
                max: field.max_value(),
            }
            .into());
        }

        let size = register_size(&self.get_register_maps(), address)?;
        let current = self.read_register(address, size, cancel).await?;
        if !current.is_success() {
            return Ok(current);
        }

        let updated = bit_field::set(current.data(), field.bit_position, field.bit_width, value)?;
        self.write_register(address, &updated, cancel).await
    }

    /// Decode every bit field of `map` from one read
    async fn read_register_fields(
        &self,
        map: &RegisterMap,
        cancel: &CancellationToken,
    ) -> Result<BusResult<HashMap<String, BitFieldValue>>> {
        let result = self
            .read_register(map.address, map.size as usize, cancel)
            .await?;
        match result.into_result() {
            Ok(data) => Ok(Ok(bit_field::parse_all(&data, &map.bit_fields)?)),
            Err(failure) => Ok(Err(failure)),
        }
    }
}

fn register_size(maps: &[RegisterMap], address: u32) -> Result<usize> {
    maps.iter()
        .find(|m| m.address == address)
        .map(|m| m.size as usize)
        .ok_or(HalError::RegisterNotFound(address))
}

// ============================================================================
// Per-device logging
// ============================================================================

/// Tagged log lines for one device
///
/// Every line carries the device id as a structured field so a subscriber can
/// route it to a per-device file.
#[derive(Debug, Clone)]
pub struct DeviceLogger {
    device_id: String,
    device_name: String,
}

impl DeviceLogger {
    pub fn new(device_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
        }
    }

    fn log(&self, level: tracing::Level, message: String) {
        let device = self.device_id.as_str();
        let device_name = self.device_name.as_str();
        if level == tracing::Level::ERROR {
            tracing::error!(device, device_name, "{}", message);
        } else if level == tracing::Level::WARN {
            tracing::warn!(device, device_name, "{}", message);
        } else if level == tracing::Level::INFO {
            tracing::info!(device, device_name, "{}", message);
        } else if level == tracing::Level::DEBUG {
            tracing::debug!(device, device_name, "{}", message);
        } else {
            tracing::trace!(device, device_name, "{}", message);
        }
    }

    pub fn log_init(&self, protocol: ProtocolKind, message: &str) {
        self.log(tracing::Level::INFO, format!("[INIT] {} - {}", protocol, message));
    }

    pub fn log_status(&self, old_state: ConnectionState, new_state: ConnectionState, reason: &str) {
        self.log(
            tracing::Level::INFO,
            format!("[STATUS] {} -> {} - {}", old_state, new_state, reason),
        );
    }

    pub fn log_config(&self, key: &str, value: &str) {
        self.log(tracing::Level::DEBUG, format!("[CONFIG] {} = {}", key, value));
    }

    pub fn log_read(&self, address: u32, data: &[u8], elapsed: Duration) {
        self.log(
            tracing::Level::DEBUG,
            format!(
                "[READ] 0x{:04X} {} bytes: [{}] in {:?}",
                address,
                data.len(),
                hex_dump(data),
                elapsed
            ),
        );
    }

    pub fn log_write(&self, address: u32, data: &[u8], elapsed: Duration) {
        self.log(
            tracing::Level::DEBUG,
            format!(
                "[WRITE] 0x{:04X} {} bytes: [{}] in {:?}",
                address,
                data.len(),
                hex_dump(data),
                elapsed
            ),
        );
    }

    pub fn log_fault(&self, address: u32, kind: CommErrorKind, message: &str) {
        self.log(
            tracing::Level::WARN,
            format!("[FAULT] 0x{:04X} {} - {}", address, kind, message),
        );
    }

    pub fn log_reset(&self, kind: ResetKind) {
        self.log(tracing::Level::INFO, format!("[RESET] {}", kind));
    }

    pub fn log_mutation(&self, changed: usize) {
        self.log(tracing::Level::TRACE, format!("[DRIFT] {} bytes changed", changed));
    }
}
