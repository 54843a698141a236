//! Device-type catalog
//!
//! Register maps and documented power-on defaults for the device types the
//! simulator can emulate. This table is the only persisted "schema" of the
//! crate: addresses, sizes and access rights are defined here in code.

use std::collections::BTreeMap;

use crate::error::{HalError, Result};
use crate::register::{BitField, RegisterAccess, RegisterMap, RegisterType};

/// Register addresses of the environmental sensor controller
pub mod addr {
    pub const CONTROL: u32 = 0x1000;
    pub const STATUS: u32 = 0x1001;
    pub const TEMPERATURE: u32 = 0x1002;
    pub const HUMIDITY: u32 = 0x1004;
    pub const CONFIG: u32 = 0x1010;
    pub const SAMPLE_RATE: u32 = 0x1011;
    pub const CALIBRATION: u32 = 0x1020;
    pub const INT_CONFIG: u32 = 0x1030;
    pub const THRESHOLD_HIGH: u32 = 0x1031;
    pub const COUNTER: u32 = 0x10F0;
    pub const DEVICE_ID: u32 = 0x10FE;
    pub const REVISION: u32 = 0x10FF;
}

/// STATUS register bit positions
pub mod status_bits {
    pub const READY: u8 = 0;
    pub const BUSY: u8 = 1;
    pub const ERROR: u8 = 2;
    pub const DATA_READY: u8 = 3;
    pub const OVERRUN: u8 = 4;
    pub const ALERT: u8 = 5;
}

/// Identity byte reported at [`addr::DEVICE_ID`]
pub const ENV_SENSOR_DEVICE_ID: u8 = 0xA5;

/// Register maps plus per-byte defaults for one device type
#[derive(Debug, Clone)]
pub struct DeviceDefinition {
    pub device_type: String,
    pub firmware_version: String,
    pub hardware_revision: String,
    pub register_maps: Vec<RegisterMap>,
    defaults: BTreeMap<u32, u8>,
    identity: (u32, u8),
}

impl DeviceDefinition {
    fn new(device_type: &str, firmware_version: &str, hardware_revision: &str) -> Self {
        Self {
            device_type: device_type.to_string(),
            firmware_version: firmware_version.to_string(),
            hardware_revision: hardware_revision.to_string(),
            register_maps: Vec::new(),
            defaults: BTreeMap::new(),
            identity: (0, 0),
        }
    }

    /// Append a register and its default bytes (lowest address first)
    fn register(mut self, map: RegisterMap, default_bytes: &[u8]) -> Self {
        debug_assert_eq!(map.size as usize, default_bytes.len(), "{}", map.name);
        for (offset, byte) in default_bytes.iter().enumerate() {
            self.defaults.insert(map.address + offset as u32, *byte);
        }
        self.register_maps.push(map);
        self
    }

    fn identity(mut self, address: u32, value: u8) -> Self {
        self.identity = (address, value);
        self
    }

    /// Factory default of every defined byte address
    pub fn default_values(&self) -> &BTreeMap<u32, u8> {
        &self.defaults
    }

    pub fn default_value(&self, address: u32) -> Option<u8> {
        self.defaults.get(&address).copied()
    }

    /// Address and expected value of the identity register
    pub fn identity_register(&self) -> (u32, u8) {
        self.identity
    }

    /// Register whose address range covers `address`
    pub fn register_containing(&self, address: u32) -> Option<&RegisterMap> {
        self.register_maps.iter().find(|m| m.contains(address))
    }

    pub fn register_by_name(&self, name: &str) -> Option<&RegisterMap> {
        self.register_maps
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// Validate every map and check that ranges do not overlap
    pub fn validate(&self) -> Result<()> {
        let mut claimed: BTreeMap<u32, &str> = BTreeMap::new();
        for map in &self.register_maps {
            map.validate()?;
            for address in map.address_range() {
                if let Some(owner) = claimed.insert(address, &map.name) {
                    return Err(HalError::invalid_config(
                        map.name.clone(),
                        format!("address 0x{:04X} already used by {}", address, owner),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn labels(entries: &[(u32, &str)]) -> BTreeMap<u32, String> {
    entries
        .iter()
        .map(|(value, label)| (*value, (*label).to_string()))
        .collect()
}

/// Environmental sensor controller (temperature/humidity, SMBus-style)
pub fn environmental_sensor() -> DeviceDefinition {
    use RegisterAccess::*;
    use RegisterType::*;

    DeviceDefinition::new("EnvironmentalSensor", "2.1.0", "B")
        .register(
            RegisterMap::new(addr::CONTROL, "CONTROL", Control, 1, ReadWrite)
                .with_description("Measurement control")
                .with_bit_field(BitField::flag("ENABLE", 0, "Measurement enable"))
                .with_bit_field(
                    BitField::new("MODE", 2, 2, "Operating mode").with_labels(labels(&[
                        (0, "Idle"),
                        (1, "Continuous"),
                        (2, "Single"),
                        (3, "Burst"),
                    ])),
                )
                .with_bit_field(BitField::flag("IRQ_ENABLE", 4, "Interrupt output enable"))
                .with_bit_field(BitField::flag("SOFT_RESET", 7, "Self-clearing reset request")),
            &[0x00],
        )
        .register(
            RegisterMap::new(addr::STATUS, "STATUS", Status, 1, ReadOnly)
                .with_description("Device status flags")
                .with_bit_field(BitField::flag("READY", status_bits::READY, "Device ready"))
                .with_bit_field(BitField::flag("BUSY", status_bits::BUSY, "Conversion running"))
                .with_bit_field(BitField::flag("ERROR", status_bits::ERROR, "Internal error"))
                .with_bit_field(BitField::flag(
                    "DATA_READY",
                    status_bits::DATA_READY,
                    "New sample available",
                ))
                .with_bit_field(BitField::flag("OVERRUN", status_bits::OVERRUN, "Sample overwritten"))
                .with_bit_field(BitField::flag("ALERT", status_bits::ALERT, "Threshold exceeded")),
            &[0x01],
        )
        .register(
            RegisterMap::new(addr::TEMPERATURE, "TEMPERATURE", Data, 2, ReadOnly)
                .with_description("Temperature sample, little-endian")
                .with_scaling(0.01, -40.0, "°C")
                .with_bit_field(BitField::new("RAW", 0, 16, "Raw temperature counts")),
            // 6500 counts = 25.00 °C
            &[0x64, 0x19],
        )
        .register(
            RegisterMap::new(addr::HUMIDITY, "HUMIDITY", Data, 2, ReadOnly)
                .with_description("Relative humidity sample, little-endian")
                .with_scaling(0.01, 0.0, "%RH")
                .with_bit_field(BitField::new("RAW", 0, 16, "Raw humidity counts")),
            // 4500 counts = 45.00 %RH
            &[0x94, 0x11],
        )
        .register(
            RegisterMap::new(addr::CONFIG, "CONFIG", Configuration, 1, ReadWrite)
                .with_description("Conversion configuration")
                .with_bit_field(
                    BitField::new("RESOLUTION", 0, 2, "ADC resolution").with_labels(labels(&[
                        (0, "9-bit"),
                        (1, "10-bit"),
                        (2, "11-bit"),
                        (3, "12-bit"),
                    ])),
                )
                .with_bit_field(BitField::new("AVERAGING", 2, 3, "Samples averaged (2^n)"))
                .with_bit_field(BitField::flag("ALERT_POLARITY", 5, "Alert pin active high")),
            &[0x23],
        )
        .register(
            RegisterMap::new(addr::SAMPLE_RATE, "SAMPLE_RATE", Configuration, 1, ReadWrite)
                .with_description("Samples per second")
                .with_scaling(1.0, 0.0, "Hz"),
            &[0x0A],
        )
        .register(
            RegisterMap::new(addr::CALIBRATION, "CALIBRATION", Calibration, 4, WriteOnce)
                .with_description("Factory trim, gain in 1/1000 and signed offset")
                .with_bit_field(BitField::new("GAIN", 0, 16, "Gain x1000"))
                .with_bit_field(BitField::new("OFFSET", 16, 16, "Offset counts")),
            &[0xE8, 0x03, 0x00, 0x00],
        )
        .register(
            RegisterMap::new(addr::INT_CONFIG, "INT_CONFIG", Configuration, 1, ReadWrite)
                .with_description("Interrupt pin configuration")
                .with_bit_field(BitField::flag("INT_ENABLE", 0, "Interrupt enable"))
                .with_bit_field(BitField::flag("INT_POLARITY", 1, "Active high"))
                .with_bit_field(BitField::flag("INT_LATCH", 2, "Latched until status read"))
                .with_bit_field(
                    BitField::new("INT_SOURCE", 3, 2, "Interrupt source").with_labels(labels(&[
                        (0, "None"),
                        (1, "DataReady"),
                        (2, "Threshold"),
                        (3, "Fault"),
                    ])),
                ),
            &[0x09],
        )
        .register(
            RegisterMap::new(addr::THRESHOLD_HIGH, "THRESHOLD_HIGH", Configuration, 1, ReadWrite)
                .with_description("Alert threshold, whole degrees above -40 °C")
                .with_scaling(1.0, -40.0, "°C"),
            &[0x78],
        )
        .register(
            RegisterMap::new(addr::COUNTER, "COUNTER", Data, 1, ReadOnly)
                .with_description("Free-running conversion counter"),
            &[0x00],
        )
        .register(
            RegisterMap::new(addr::DEVICE_ID, "DEVICE_ID", Identity, 1, ReadOnly)
                .with_description("Part identifier"),
            &[ENV_SENSOR_DEVICE_ID],
        )
        .register(
            RegisterMap::new(addr::REVISION, "REVISION", Identity, 1, ReadOnly)
                .with_description("Silicon revision")
                .with_bit_field(BitField::new("MINOR", 0, 4, "Minor revision"))
                .with_bit_field(BitField::new("MAJOR", 4, 4, "Major revision")),
            &[0x12],
        )
        .identity(addr::DEVICE_ID, ENV_SENSOR_DEVICE_ID)
}
