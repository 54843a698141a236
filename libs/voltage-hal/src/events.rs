//! Device event notifications
//!
//! Devices push events into an injected [`EventSink`]. The sink is invoked on
//! the emitting operation's own task; a sink that needs another execution
//! context (UI loop, bus dispatcher) forwards the event itself, e.g. through
//! [`ChannelSink`].

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::device::ConnectionState;
use crate::error::CommErrorKind;

/// Events raised by a device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    ConnectionStateChanged {
        device_id: String,
        old: ConnectionState,
        new: ConnectionState,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    DataReceived {
        device_id: String,
        address: u32,
        data: Bytes,
        timestamp: DateTime<Utc>,
    },
    CommunicationError {
        device_id: String,
        address: Option<u32>,
        kind: CommErrorKind,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Warning {
        device_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    RegisterValueChanged {
        device_id: String,
        address: u32,
        old: u8,
        new: u8,
        timestamp: DateTime<Utc>,
    },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceEvent::ConnectionStateChanged { device_id, .. }
            | DeviceEvent::DataReceived { device_id, .. }
            | DeviceEvent::CommunicationError { device_id, .. }
            | DeviceEvent::Warning { device_id, .. }
            | DeviceEvent::RegisterValueChanged { device_id, .. } => device_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DeviceEvent::ConnectionStateChanged { timestamp, .. }
            | DeviceEvent::DataReceived { timestamp, .. }
            | DeviceEvent::CommunicationError { timestamp, .. }
            | DeviceEvent::Warning { timestamp, .. }
            | DeviceEvent::RegisterValueChanged { timestamp, .. } => *timestamp,
        }
    }

    /// Short tag used in logs and CLI output
    pub fn name(&self) -> &'static str {
        match self {
            DeviceEvent::ConnectionStateChanged { .. } => "STATE",
            DeviceEvent::DataReceived { .. } => "DATA",
            DeviceEvent::CommunicationError { .. } => "COMM_ERROR",
            DeviceEvent::Warning { .. } => "WARNING",
            DeviceEvent::RegisterValueChanged { .. } => "CHANGED",
        }
    }
}

impl std::fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::ConnectionStateChanged {
                device_id,
                old,
                new,
                reason,
                ..
            } => {
                write!(f, "[{}] {} -> {}", device_id, old, new)?;
                if let Some(reason) = reason {
                    write!(f, " ({})", reason)?;
                }
                Ok(())
            },
            DeviceEvent::DataReceived {
                device_id,
                address,
                data,
                ..
            } => write!(
                f,
                "[{}] 0x{:04X} <- {}",
                device_id,
                address,
                crate::device::hex_dump(data)
            ),
            DeviceEvent::CommunicationError {
                device_id,
                address,
                kind,
                message,
                ..
            } => match address {
                Some(addr) => write!(f, "[{}] 0x{:04X} {}: {}", device_id, addr, kind, message),
                None => write!(f, "[{}] {}: {}", device_id, kind, message),
            },
            DeviceEvent::Warning {
                device_id, message, ..
            } => write!(f, "[{}] {}", device_id, message),
            DeviceEvent::RegisterValueChanged {
                device_id,
                address,
                old,
                new,
                ..
            } => write!(
                f,
                "[{}] 0x{:04X}: 0x{:02X} -> 0x{:02X}",
                device_id, address, old, new
            ),
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Fire-and-forget event consumer
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DeviceEvent);
}

/// Shared sink handle as stored by devices
pub type SharedEventSink = Arc<dyn EventSink>;

impl<F> EventSink for F
where
    F: Fn(DeviceEvent) + Send + Sync,
{
    fn emit(&self, event: DeviceEvent) {
        self(event)
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: DeviceEvent) {}
}

/// Forwards events into a tokio channel for consumption on another task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<DeviceEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: DeviceEvent) {
        // Receiver gone means nobody listens any more
        let _ = self.tx.send(event);
    }
}

/// Writes every event to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DeviceEvent) {
        match &event {
            DeviceEvent::CommunicationError { .. } | DeviceEvent::Warning { .. } => {
                warn!("[EVENT:{}] {}", event.name(), event)
            },
            DeviceEvent::ConnectionStateChanged { .. } => info!("[EVENT:{}] {}", event.name(), event),
            _ => debug!("[EVENT:{}] {}", event.name(), event),
        }
    }
}

/// Delivers each event to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<SharedEventSink>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedEventSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: DeviceEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn warning(message: &str) -> DeviceEvent {
        DeviceEvent::Warning {
            device_id: "dev".to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink: SharedEventSink = Arc::new(move |event: DeviceEvent| {
            seen_clone.lock().push(event.name());
        });

        sink.emit(warning("a"));
        assert_eq!(*seen.lock(), vec!["WARNING"]);
    }

    #[test]
    fn test_channel_sink_tolerates_closed_receiver() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(warning("first"));
        assert_eq!(rx.try_recv().unwrap().device_id(), "dev");

        drop(rx);
        sink.emit(warning("dropped"));
    }

    #[test]
    fn test_fanout_delivers_to_all() {
        let (a, mut rx_a) = ChannelSink::channel();
        let (b, mut rx_b) = ChannelSink::channel();
        let fanout = FanoutSink::new().with(Arc::new(a)).with(Arc::new(b));

        fanout.emit(warning("both"));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_display_register_change() {
        let event = DeviceEvent::RegisterValueChanged {
            device_id: "sim".to_string(),
            address: 0x1030,
            old: 0x0D,
            new: 0x09,
            timestamp: Utc::now(),
        };
        assert_eq!(event.to_string(), "[sim] 0x1030: 0x0D -> 0x09");
    }
}
