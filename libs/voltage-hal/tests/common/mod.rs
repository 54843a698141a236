//! Shared helpers for simulator integration tests

#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use voltage_hal::{
    ChannelSink, ConnectionState, DeviceEvent, LatencyConfig, MutationConfig, SimulatedDevice,
    SimulatorConfig,
};

/// No latency, no faults, no drift, fixed seed
pub fn quiet_config() -> SimulatorConfig {
    SimulatorConfig {
        device_id: "sim-test".to_string(),
        latency: LatencyConfig::none(),
        mutation: MutationConfig {
            enabled: false,
            period_ms: 1000,
        },
        seed: Some(7),
        ..Default::default()
    }
}

pub fn device_with_events(
    config: SimulatorConfig,
) -> (SimulatedDevice, UnboundedReceiver<DeviceEvent>) {
    let (sink, rx) = ChannelSink::channel();
    let device = SimulatedDevice::new(config, Arc::new(sink)).unwrap();
    (device, rx)
}

/// Everything emitted so far
pub fn drain(rx: &mut UnboundedReceiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn state_changes(events: &[DeviceEvent]) -> Vec<(ConnectionState, ConnectionState)> {
    events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::ConnectionStateChanged { old, new, .. } => Some((*old, *new)),
            _ => None,
        })
        .collect()
}

/// `(old, new)` of every value change at `address`, in emission order
pub fn changes_at(events: &[DeviceEvent], address: u32) -> Vec<(u8, u8)> {
    events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::RegisterValueChanged {
                address: a,
                old,
                new,
                ..
            } if *a == address => Some((*old, *new)),
            _ => None,
        })
        .collect()
}
