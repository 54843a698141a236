//! Voltage Hardware Abstraction Layer
//!
//! Register-level device access for VoltageEMS.
//!
//! # Architecture
//!
//! This library provides:
//! - **Bit-Field Codec**: extract/pack arbitrary bit ranges of little-endian register values
//! - **Register Data Model**: register maps, bit fields and the device-type catalog
//! - **Device Contract**: `Device` trait, connection-state machine, typed transaction results
//! - **Simulator**: `SimulatedDevice` with latency, fault injection and background drift
//! - **Statistics & Events**: per-device counters and push notifications through an injected sink
//!
//! # Error channels
//!
//! Bus outcomes (timeouts, NACKs, wrong state, unknown address) come back as a
//! failed [`DeviceDataResult`]. Caller mistakes (disposed device, empty range,
//! bad bit-field descriptor) come back as `Err(HalError)`.

pub mod bytes;
pub mod catalog;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod register;
pub mod simulator;
pub mod statistics;

// Re-export core types
pub use crate::bytes::ByteOrder;
pub use config::{
    load_config, CommunicationConfig, FaultInjectionConfig, LatencyConfig, MutationConfig,
    ProtocolKind, ProtocolSettings, SimulatorConfig,
};
pub use device::{
    hex_dump, BusResult, ConnectionState, Device, DeviceDataResult, DeviceFailure, DeviceInfo,
    DeviceLogger, ResetKind,
};
pub use error::{BitFieldError, CommErrorKind, HalError, Result};
pub use events::{
    ChannelSink, DeviceEvent, EventSink, FanoutSink, NullSink, SharedEventSink, TracingSink,
};
pub use register::{BitField, BitFieldValue, RegisterAccess, RegisterMap, RegisterType};
pub use simulator::{Scenario, SimulatedDevice};
pub use statistics::{CommunicationStatistics, StatisticsTracker};

// Cancellation signal accepted by every I/O operation
pub use tokio_util::sync::CancellationToken;
