//! Lifecycle, state guard and data-path tests for the simulated device

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

mod common;

use std::time::Duration;

use common::{changes_at, device_with_events, drain, quiet_config, state_changes};
use voltage_hal::catalog::{addr, ENV_SENSOR_DEVICE_ID};
use voltage_hal::{
    BitField, ByteOrder, CancellationToken, CommErrorKind, CommunicationConfig, ConnectionState,
    Device, DeviceEvent, FaultInjectionConfig, HalError, LatencyConfig, ProtocolKind,
    ProtocolSettings, ResetKind, SimulatorConfig,
};

use ConnectionState::*;

// ============================================================================
// State machine
// ============================================================================

#[tokio::test]
async fn test_initialize_reaches_ready() {
    let (device, mut rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();

    assert!(device.initialize(&cancel).await.unwrap());

    let events = drain(&mut rx);
    assert_eq!(
        state_changes(&events),
        vec![(Uninitialized, Initializing), (Initializing, Ready)]
    );
    // Normal preset enables continuous measurement
    assert_eq!(changes_at(&events, addr::CONTROL), vec![(0x00, 0x05)]);

    // initialise on a ready device is a no-op
    assert!(device.initialize(&cancel).await.unwrap());
    assert!(state_changes(&drain(&mut rx)).is_empty());
}

#[tokio::test]
async fn test_operations_require_ready_and_never_touch_registers() {
    let (device, mut rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    let locks_before = device.register_lock_count();

    let read = device.read_register(addr::CONTROL, 1, &cancel).await.unwrap();
    let write = device.write_register(addr::CONTROL, &[0x01], &cancel).await.unwrap();
    let word = device
        .read_u16(addr::TEMPERATURE, ByteOrder::LittleEndian, &cancel)
        .await
        .unwrap();

    assert_eq!(read.error_kind(), Some(CommErrorKind::HardwareError));
    assert_eq!(write.error_kind(), Some(CommErrorKind::HardwareError));
    assert_eq!(word.unwrap_err().kind, CommErrorKind::HardwareError);
    assert_eq!(device.register_lock_count(), locks_before);

    let stats = device.statistics();
    assert_eq!(stats.total_transactions, 3);
    assert_eq!(stats.failed_transactions, 3);

    let errors = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, DeviceEvent::CommunicationError { .. }))
        .count();
    assert_eq!(errors, 3);
}

#[tokio::test]
async fn test_release_is_idempotent_and_blocks_io() {
    let (device, mut rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();
    drain(&mut rx);

    device.release().await.unwrap();
    device.release().await.unwrap();
    assert_eq!(state_changes(&drain(&mut rx)), vec![(Ready, Uninitialized)]);

    let locks_before = device.register_lock_count();
    let read = device.read_register(addr::STATUS, 1, &cancel).await.unwrap();
    assert_eq!(read.error_kind(), Some(CommErrorKind::HardwareError));
    assert_eq!(device.register_lock_count(), locks_before);
}

#[tokio::test]
async fn test_reset_requires_started_device() {
    let (device, _rx) = device_with_events(quiet_config());
    let err = device
        .reset(ResetKind::Soft, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HalError::InvalidState(_)));
}

#[tokio::test]
async fn test_identification_fault_ends_in_error_until_reset() {
    let mut config = quiet_config();
    config.fault_injection = FaultInjectionConfig {
        enabled: true,
        probability: 1.0,
    };
    let (device, mut rx) = device_with_events(config);
    let cancel = CancellationToken::new();

    assert!(!device.initialize(&cancel).await.unwrap());
    let events = drain(&mut rx);
    assert_eq!(
        state_changes(&events),
        vec![(Uninitialized, Initializing), (Initializing, Error)]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, DeviceEvent::CommunicationError { kind, .. } if kind.is_bus_fault())));

    device
        .set_fault_injection(FaultInjectionConfig {
            enabled: false,
            probability: 0.0,
        })
        .unwrap();
    assert!(device.reset(ResetKind::Soft, &cancel).await.unwrap());
    assert_eq!(
        state_changes(&drain(&mut rx)),
        vec![(Error, Resetting), (Resetting, Ready)]
    );
}

#[tokio::test]
async fn test_probe_tracks_responsiveness() {
    let (device, mut rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();
    assert!(device.probe(&cancel).await.unwrap());
    drain(&mut rx);

    let always = FaultInjectionConfig {
        enabled: true,
        probability: 1.0,
    };
    device.set_fault_injection(always).unwrap();
    assert!(!device.probe(&cancel).await.unwrap());
    assert_eq!(state_changes(&drain(&mut rx)), vec![(Ready, NotResponding)]);

    let read = device.read_register(addr::STATUS, 1, &cancel).await.unwrap();
    assert_eq!(read.error_kind(), Some(CommErrorKind::HardwareError));

    device
        .set_fault_injection(FaultInjectionConfig::default())
        .unwrap();
    assert!(device.probe(&cancel).await.unwrap());
    assert_eq!(state_changes(&drain(&mut rx)), vec![(NotResponding, Ready)]);
}

#[tokio::test]
async fn test_dispose_is_final_and_idempotent() {
    let (device, mut rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();
    drain(&mut rx);

    device.dispose().await;
    device.dispose().await;
    assert!(device.is_disposed());
    assert_eq!(state_changes(&drain(&mut rx)), vec![(Ready, Uninitialized)]);

    let err = device.read_register(addr::STATUS, 1, &cancel).await.unwrap_err();
    assert_eq!(err, HalError::Disposed("sim-test".to_string()));
    assert!(matches!(
        device.initialize(&cancel).await,
        Err(HalError::Disposed(_))
    ));
    device.release().await.unwrap();
}

// ============================================================================
// Data path
// ============================================================================

#[tokio::test]
async fn test_read_temperature_word() {
    let (device, mut rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();
    drain(&mut rx);

    let raw = device
        .read_u16(addr::TEMPERATURE, ByteOrder::LittleEndian, &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw, 6500);

    let map = device
        .get_register_maps()
        .iter()
        .find(|m| m.address == addr::TEMPERATURE)
        .cloned()
        .unwrap();
    assert!((map.apply_scaling(raw as f64) - 25.0).abs() < 1e-9);

    let events = drain(&mut rx);
    assert!(matches!(
        &events[..],
        [DeviceEvent::DataReceived { address, data, .. }]
            if *address == addr::TEMPERATURE && data.as_ref() == [0x64, 0x19]
    ));

    let stats = device.statistics();
    assert_eq!(stats.successful_transactions, 1);
    assert_eq!(stats.bytes_received, 2);
}

#[tokio::test]
async fn test_address_errors_and_misuse() {
    let (device, _rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();

    let missing = device.read_register(0x2000, 1, &cancel).await.unwrap();
    assert_eq!(missing.error_kind(), Some(CommErrorKind::AddressError));

    // Range runs off the end of the defined space
    let partial = device.read_register(addr::REVISION, 2, &cancel).await.unwrap();
    assert_eq!(partial.error_kind(), Some(CommErrorKind::AddressError));

    let read_only = device.write_byte(addr::COUNTER, 0x10, &cancel).await.unwrap();
    assert_eq!(read_only.error_kind(), Some(CommErrorKind::AddressError));

    assert!(matches!(
        device.read_register(addr::CONTROL, 0, &cancel).await,
        Err(HalError::InvalidAddressRange { length: 0, .. })
    ));
    assert!(matches!(
        device.write_register(u32::MAX, &[1, 2], &cancel).await,
        Err(HalError::InvalidAddressRange { .. })
    ));
}

#[tokio::test]
async fn test_bit_field_read_modify_write() {
    let (device, _rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();
    // CONTROL back to its documented 0x00
    device.reset(ResetKind::Factory, &cancel).await.unwrap();

    let mode = BitField::new("MODE", 2, 2, "Operating mode");
    let written = device
        .write_bit_field(addr::CONTROL, &mode, 2, &cancel)
        .await
        .unwrap();
    assert!(written.is_success());

    let value = device
        .read_bit_field(addr::CONTROL, &mode, &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value, 2);
    // bits 0, 1 and 4..7 untouched
    assert_eq!(device.read_byte(addr::CONTROL, &cancel).await.unwrap().unwrap(), 0x08);

    assert!(matches!(
        device.write_bit_field(addr::CONTROL, &mode, 4, &cancel).await,
        Err(HalError::BitField(_))
    ));
    assert!(matches!(
        device.read_bit_field(0x1003, &mode, &cancel).await,
        Err(HalError::RegisterNotFound(0x1003))
    ));
}

#[tokio::test]
async fn test_register_fields_decode_labels() {
    let (device, _rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();

    let maps = device.get_register_maps();
    let int_config = maps.iter().find(|m| m.address == addr::INT_CONFIG).unwrap();
    let fields = device
        .read_register_fields(int_config, &cancel)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(fields["INT_ENABLE"].raw_value, 1);
    assert_eq!(fields["INT_LATCH"].raw_value, 0);
    assert_eq!(fields["INT_SOURCE"].label(), Some("DataReady"));
    assert_eq!(fields["INT_POLARITY"].description, "value: 0");
}

#[tokio::test]
async fn test_transfer_uses_big_endian_pointer() {
    let (device, mut rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();
    drain(&mut rx);

    let result = device
        .transfer(&[0x10, 0x30, 0x0D], 2, &cancel)
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.address(), addr::INT_CONFIG);
    assert_eq!(result.data().as_ref(), [0x0D, 0x78]);
    assert_eq!(changes_at(&drain(&mut rx), addr::INT_CONFIG), vec![(0x09, 0x0D)]);

    let id = device.transfer(&[0x10, 0xFE], 1, &cancel).await.unwrap();
    assert_eq!(id.data().as_ref(), [ENV_SENSOR_DEVICE_ID]);

    let short = device.transfer(&[0x10], 1, &cancel).await.unwrap();
    assert_eq!(short.error_kind(), Some(CommErrorKind::ProtocolError));
}

#[tokio::test]
async fn test_transfer_checks_state_before_framing() {
    let (device, _rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();

    let result = device.transfer(&[0x10], 1, &cancel).await.unwrap();
    assert_eq!(result.error_kind(), Some(CommErrorKind::HardwareError));

    device.initialize(&cancel).await.unwrap();
    let result = device.transfer(&[0x10], 1, &cancel).await.unwrap();
    assert_eq!(result.error_kind(), Some(CommErrorKind::ProtocolError));
    assert_eq!(device.statistics().failed_transactions, 2);
}

#[tokio::test]
async fn test_read_batch_keeps_request_order() {
    let (device, mut rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();
    drain(&mut rx);

    let requests = [(addr::DEVICE_ID, 1), (0x3000, 1), (addr::REVISION, 1)];
    let results = device.read_batch(&requests, &cancel).await.unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].data().as_ref(), [ENV_SENSOR_DEVICE_ID]);
    assert_eq!(results[1].error_kind(), Some(CommErrorKind::AddressError));
    assert_eq!(results[2].data().as_ref(), [0x12]);

    let order: Vec<u32> = drain(&mut rx)
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::DataReceived { address, .. } => Some(*address),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![addr::DEVICE_ID, addr::REVISION]);
}

#[tokio::test]
async fn test_injected_faults_are_results_not_errors() {
    let (device, mut rx) = device_with_events(quiet_config());
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();
    device
        .set_fault_injection(FaultInjectionConfig {
            enabled: true,
            probability: 1.0,
        })
        .unwrap();
    drain(&mut rx);

    for _ in 0..10 {
        let result = device.write_byte(addr::INT_CONFIG, 0x0F, &cancel).await.unwrap();
        let kind = result.error_kind().unwrap();
        assert!(kind.is_bus_fault(), "{kind}");
        assert!(!result.is_cancelled());
    }

    // nothing reached the register map
    assert_eq!(device.register_snapshot()[&addr::INT_CONFIG], 0x09);
    let events = drain(&mut rx);
    assert!(changes_at(&events, addr::INT_CONFIG).is_empty());
    assert_eq!(device.statistics().failed_transactions, 10);
}

// ============================================================================
// Cancellation and timeouts
// ============================================================================

fn slow_config(latency_ms: u64) -> SimulatorConfig {
    SimulatorConfig {
        latency: LatencyConfig {
            min_ms: latency_ms,
            max_ms: latency_ms,
        },
        ..quiet_config()
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_latency_leaves_registers_untouched() {
    let (device, mut rx) = device_with_events(slow_config(200));
    device.initialize(&CancellationToken::new()).await.unwrap();
    drain(&mut rx);
    let locks_before = device.register_lock_count();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let result = device
        .write_register(addr::INT_CONFIG, &[0x0D], &cancel)
        .await
        .unwrap();
    assert!(result.is_cancelled());
    assert_eq!(result.error_kind(), Some(CommErrorKind::Timeout));
    assert_eq!(device.register_lock_count(), locks_before);
    assert!(changes_at(&drain(&mut rx), addr::INT_CONFIG).is_empty());

    // an already cancelled token never sleeps
    let read = device.read_register(addr::STATUS, 1, &cancel).await.unwrap();
    assert!(read.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_initialize_returns_to_uninitialized() {
    let (device, mut rx) = device_with_events(slow_config(100));
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(!device.initialize(&cancel).await.unwrap());
    assert_eq!(
        state_changes(&drain(&mut rx)),
        vec![(Uninitialized, Initializing), (Initializing, Uninitialized)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_latency_beyond_timeout_is_timeout_failure() {
    let (device, _rx) = device_with_events(slow_config(5));
    let cancel = CancellationToken::new();
    device.initialize(&cancel).await.unwrap();

    let mut config = device.get_communication_config();
    config.timeout_ms = 2;
    device.set_communication_config(config).unwrap();

    let result = device.read_register(addr::STATUS, 1, &cancel).await.unwrap();
    assert_eq!(result.error_kind(), Some(CommErrorKind::Timeout));
    assert!(!result.is_cancelled());
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_communication_config_roundtrip_and_validation() {
    let (device, _rx) = device_with_events(quiet_config());
    assert_eq!(device.protocol(), ProtocolKind::Smbus);
    assert_eq!(device.address(), 0x40);

    let i2c = CommunicationConfig {
        settings: ProtocolSettings::I2c {
            ten_bit_addressing: false,
            clock_stretching: true,
        },
        device_address: 0x48,
        ..Default::default()
    };
    device.set_communication_config(i2c.clone()).unwrap();
    assert_eq!(device.get_communication_config(), i2c);
    assert_eq!(device.protocol(), ProtocolKind::I2c);

    let bad = CommunicationConfig {
        device_address: 0x200,
        ..i2c
    };
    assert!(matches!(
        device.set_communication_config(bad),
        Err(HalError::InvalidConfig { .. })
    ));
    assert_eq!(device.address(), 0x48);
}

#[tokio::test]
async fn test_device_info() {
    let (device, _rx) = device_with_events(quiet_config());
    let info = device.get_device_info();

    assert_eq!(info.id, "sim-test");
    assert_eq!(info.device_type, "EnvironmentalSensor");
    assert_eq!(info.firmware_version, "2.1.0");
    assert_eq!(info.register_count, device.get_register_maps().len());
    assert!(info.capabilities.iter().any(|c| c == "factory_reset"));
}
