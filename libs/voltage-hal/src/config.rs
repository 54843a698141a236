//! Communication and simulator configuration
//!
//! Protocol-specific settings are a tagged enum rather than a string-keyed
//! bag, so each protocol's options are checked at deserialization time.
//! Only the `Custom` protocol carries free-form parameters, read through
//! typed accessors with caller-supplied defaults.
//!
//! Simulator configuration loads through figment with the priority:
//! environment (`REGSIM_` prefix, `__` as separator) > file > defaults.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HalError, Result};
use crate::simulator::Scenario;

/// Environment variable prefix for simulator overrides
pub const ENV_PREFIX: &str = "REGSIM_";

// ============================================================================
// Protocol settings
// ============================================================================

/// Bus protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    I2c,
    Spi,
    Smbus,
    OneWire,
    Uart,
    Custom,
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolKind::I2c => write!(f, "I2C"),
            ProtocolKind::Spi => write!(f, "SPI"),
            ProtocolKind::Smbus => write!(f, "SMBus"),
            ProtocolKind::OneWire => write!(f, "1-Wire"),
            ProtocolKind::Uart => write!(f, "UART"),
            ProtocolKind::Custom => write!(f, "Custom"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

fn default_true() -> bool {
    true
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_stop_bits() -> u8 {
    1
}

/// Per-protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum ProtocolSettings {
    I2c {
        #[serde(default)]
        ten_bit_addressing: bool,
        #[serde(default = "default_true")]
        clock_stretching: bool,
    },
    Spi {
        /// CPOL/CPHA mode 0..=3
        #[serde(default)]
        mode: u8,
        #[serde(default)]
        chip_select: u8,
        #[serde(default)]
        lsb_first: bool,
    },
    Smbus {
        /// Packet error checking
        #[serde(default)]
        pec_enabled: bool,
    },
    OneWire {
        #[serde(default)]
        overdrive: bool,
    },
    Uart {
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default)]
        parity: Parity,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
    Custom {
        name: String,
        #[serde(default)]
        params: BTreeMap<String, serde_json::Value>,
    },
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        ProtocolSettings::Smbus { pec_enabled: false }
    }
}

impl ProtocolSettings {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            ProtocolSettings::I2c { .. } => ProtocolKind::I2c,
            ProtocolSettings::Spi { .. } => ProtocolKind::Spi,
            ProtocolSettings::Smbus { .. } => ProtocolKind::Smbus,
            ProtocolSettings::OneWire { .. } => ProtocolKind::OneWire,
            ProtocolSettings::Uart { .. } => ProtocolKind::Uart,
            ProtocolSettings::Custom { .. } => ProtocolKind::Custom,
        }
    }

    fn custom_param(&self, key: &str) -> Option<&serde_json::Value> {
        match self {
            ProtocolSettings::Custom { params, .. } => params.get(key),
            _ => None,
        }
    }
}

// ============================================================================
// Communication config
// ============================================================================

/// Link-level configuration of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    pub settings: ProtocolSettings,
    pub device_address: u16,
    pub bus_speed_hz: u32,
    pub timeout_ms: u64,
    pub retry_count: u8,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            settings: ProtocolSettings::default(),
            device_address: 0x40,
            bus_speed_hz: 100_000,
            timeout_ms: 1000,
            retry_count: 3,
        }
    }
}

impl CommunicationConfig {
    pub fn protocol(&self) -> ProtocolKind {
        self.settings.kind()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Custom parameter as `u64`, or `default` if absent or of another type
    pub fn custom_u64(&self, key: &str, default: u64) -> u64 {
        self.settings
            .custom_param(key)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(default)
    }

    pub fn custom_f64(&self, key: &str, default: f64) -> f64 {
        self.settings
            .custom_param(key)
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(default)
    }

    pub fn custom_bool(&self, key: &str, default: bool) -> bool {
        self.settings
            .custom_param(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(default)
    }

    pub fn custom_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.settings
            .custom_param(key)
            .and_then(serde_json::Value::as_str)
            .unwrap_or(default)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(HalError::invalid_config("timeout_ms", "must be greater than 0"));
        }
        if self.bus_speed_hz == 0 {
            return Err(HalError::invalid_config("bus_speed_hz", "must be greater than 0"));
        }

        match &self.settings {
            ProtocolSettings::I2c {
                ten_bit_addressing, ..
            } => {
                let limit = if *ten_bit_addressing { 0x3FF } else { 0x7F };
                if self.device_address > limit {
                    return Err(HalError::invalid_config(
                        "device_address",
                        format!(
                            "0x{:X} exceeds I2C address limit 0x{:X}",
                            self.device_address, limit
                        ),
                    ));
                }
            },
            ProtocolSettings::Smbus { .. } => {
                if self.device_address > 0x7F {
                    return Err(HalError::invalid_config(
                        "device_address",
                        format!("0x{:X} exceeds SMBus 7-bit address", self.device_address),
                    ));
                }
            },
            ProtocolSettings::Spi { mode, .. } => {
                if *mode > 3 {
                    return Err(HalError::invalid_config("settings.mode", "SPI mode must be 0..=3"));
                }
            },
            ProtocolSettings::Uart {
                baud_rate,
                stop_bits,
                ..
            } => {
                if *baud_rate == 0 {
                    return Err(HalError::invalid_config("settings.baud_rate", "must be greater than 0"));
                }
                if !(1..=2).contains(stop_bits) {
                    return Err(HalError::invalid_config("settings.stop_bits", "must be 1 or 2"));
                }
            },
            ProtocolSettings::Custom { name, .. } => {
                if name.trim().is_empty() {
                    return Err(HalError::invalid_config("settings.name", "custom protocol needs a name"));
                }
            },
            ProtocolSettings::OneWire { .. } => {},
        }
        Ok(())
    }
}

// ============================================================================
// Simulator config
// ============================================================================

/// Simulated bus latency window, drawn uniformly per transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self { min_ms: 1, max_ms: 5 }
    }
}

impl LatencyConfig {
    /// No simulated delay at all
    pub fn none() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultInjectionConfig {
    pub enabled: bool,
    /// Per-transaction fault probability in `[0, 1]`
    pub probability: f64,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probability: 0.05,
        }
    }
}

/// Background register drift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    pub enabled: bool,
    pub period_ms: u64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 2000,
        }
    }
}

impl MutationConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Full configuration of one simulated device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub device_id: String,
    pub name: String,
    pub latency: LatencyConfig,
    pub fault_injection: FaultInjectionConfig,
    pub mutation: MutationConfig,
    pub scenario: Scenario,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
    pub communication: CommunicationConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            device_id: "sim-001".to_string(),
            name: "Simulated Environmental Sensor".to_string(),
            latency: LatencyConfig::default(),
            fault_injection: FaultInjectionConfig::default(),
            mutation: MutationConfig::default(),
            scenario: Scenario::default(),
            seed: None,
            communication: CommunicationConfig::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(HalError::invalid_config("device_id", "must not be empty"));
        }
        if self.latency.min_ms > self.latency.max_ms {
            return Err(HalError::invalid_config(
                "latency",
                format!(
                    "min_ms ({}) greater than max_ms ({})",
                    self.latency.min_ms, self.latency.max_ms
                ),
            ));
        }
        let p = self.fault_injection.probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(HalError::invalid_config(
                "fault_injection.probability",
                format!("{} not in [0, 1]", p),
            ));
        }
        if self.mutation.period_ms == 0 {
            return Err(HalError::invalid_config("mutation.period_ms", "must be greater than 0"));
        }
        self.communication.validate()
    }
}

/// Load simulator configuration
///
/// Priority (highest to lowest):
/// 1. Environment variables (`REGSIM_LATENCY__MAX_MS=10`)
/// 2. Config file (yaml/yml/toml/json by extension), if given
/// 3. Default values
pub fn load_config(path: Option<&Path>) -> Result<SimulatorConfig> {
    let mut figment = Figment::from(Serialized::defaults(SimulatorConfig::default()));

    if let Some(path) = path {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| HalError::invalid_config("file", "config file must have an extension"))?;

        figment = match extension {
            "toml" => figment.merge(Toml::file(path)),
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            "json" => figment.merge(Json::file(path)),
            _ => {
                return Err(HalError::invalid_config(
                    "file",
                    format!("unsupported config file format: {}", extension),
                ))
            },
        };
        debug!("Loading simulator config from {}", path.display());
    }

    let config: SimulatorConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| HalError::invalid_config("file", e.to_string()))?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        SimulatorConfig::default().validate().unwrap();
        assert_eq!(CommunicationConfig::default().protocol(), ProtocolKind::Smbus);
    }

    #[test]
    fn test_address_limits() {
        let mut cfg = CommunicationConfig {
            settings: ProtocolSettings::I2c {
                ten_bit_addressing: false,
                clock_stretching: true,
            },
            device_address: 0x80,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        cfg.settings = ProtocolSettings::I2c {
            ten_bit_addressing: true,
            clock_stretching: true,
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cfg = CommunicationConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(HalError::InvalidConfig { .. })));
    }

    #[test]
    fn test_custom_accessors_fall_back_to_defaults() {
        let mut params = BTreeMap::new();
        params.insert("frame_gap_us".to_string(), serde_json::json!(250));
        params.insert("crc".to_string(), serde_json::json!(true));
        params.insert("label".to_string(), serde_json::json!("lab-bench"));
        let cfg = CommunicationConfig {
            settings: ProtocolSettings::Custom {
                name: "bench".to_string(),
                params,
            },
            ..Default::default()
        };

        assert_eq!(cfg.protocol(), ProtocolKind::Custom);
        assert_eq!(cfg.custom_u64("frame_gap_us", 0), 250);
        assert!(cfg.custom_bool("crc", false));
        assert_eq!(cfg.custom_str("label", "none"), "lab-bench");
        // Wrong type and missing key both yield the default
        assert_eq!(cfg.custom_u64("label", 7), 7);
        assert!((cfg.custom_f64("missing", 1.5) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_probability_out_of_range() {
        let mut cfg = SimulatorConfig::default();
        cfg.fault_injection.probability = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
device_id: bench-7
latency:
  min_ms: 0
  max_ms: 0
fault_injection:
  enabled: true
  probability: 0.25
scenario: high_temperature
communication:
  device_address: 68
  settings:
    protocol: i2c
    ten_bit_addressing: false
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.device_id, "bench-7");
        assert_eq!(cfg.latency, LatencyConfig::none());
        assert!(cfg.fault_injection.enabled);
        assert_eq!(cfg.scenario, Scenario::HighTemperature);
        assert_eq!(cfg.communication.protocol(), ProtocolKind::I2c);
        assert_eq!(cfg.communication.device_address, 0x44);
        // Untouched sections keep their defaults
        assert_eq!(cfg.mutation, MutationConfig::default());
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }
}
