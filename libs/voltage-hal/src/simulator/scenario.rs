//! Scenario presets
//!
//! A scenario is a named set of register values written at initialisation
//! and on every soft reset, plus the targets the background drift pulls the
//! sensor registers towards.

use serde::{Deserialize, Serialize};

use crate::catalog::{addr, status_bits};

/// Operating scenario of a simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    #[default]
    Normal,
    HighTemperature,
    SensorFault,
    LowPower,
}

const READY: u8 = 1 << status_bits::READY;
const ERROR: u8 = 1 << status_bits::ERROR;
const ALERT: u8 = 1 << status_bits::ALERT;

/// Raw temperature counts for a value in °C (scale 0.01, offset -40)
const fn temperature_counts(celsius: u16) -> u16 {
    (celsius + 40) * 100
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Normal,
        Scenario::HighTemperature,
        Scenario::SensorFault,
        Scenario::LowPower,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "normal" => Some(Scenario::Normal),
            "high_temperature" | "hot" => Some(Scenario::HighTemperature),
            "sensor_fault" | "fault" => Some(Scenario::SensorFault),
            "low_power" => Some(Scenario::LowPower),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Normal => "normal",
            Scenario::HighTemperature => "high_temperature",
            Scenario::SensorFault => "sensor_fault",
            Scenario::LowPower => "low_power",
        }
    }

    /// Byte writes applied by initialise and soft reset
    pub fn preset(&self) -> Vec<(u32, u8)> {
        let (control, status, temperature, humidity, sample_rate) = match self {
            // ENABLE + MODE=Continuous
            Scenario::Normal => (0x05, READY, temperature_counts(25), 4500u16, 0x0A),
            Scenario::HighTemperature => (0x05, READY | ALERT, temperature_counts(85), 3000, 0x0A),
            Scenario::SensorFault => (0x01, READY | ERROR, 0xFFFF, 0, 0x0A),
            // ENABLE + MODE=Single
            Scenario::LowPower => (0x09, READY, temperature_counts(20), 5000, 0x01),
        };

        let [t0, t1] = temperature.to_le_bytes();
        let [h0, h1] = humidity.to_le_bytes();
        vec![
            (addr::CONTROL, control),
            (addr::STATUS, status),
            (addr::TEMPERATURE, t0),
            (addr::TEMPERATURE + 1, t1),
            (addr::HUMIDITY, h0),
            (addr::HUMIDITY + 1, h1),
            (addr::SAMPLE_RATE, sample_rate),
        ]
    }

    /// Temperature the drift pulls towards; `None` freezes the sensor
    pub fn temperature_target(&self) -> Option<u16> {
        match self {
            Scenario::Normal => Some(temperature_counts(25)),
            Scenario::HighTemperature => Some(temperature_counts(85)),
            Scenario::SensorFault => None,
            Scenario::LowPower => Some(temperature_counts(20)),
        }
    }

    pub fn humidity_target(&self) -> Option<u16> {
        match self {
            Scenario::Normal => Some(4500),
            Scenario::HighTemperature => Some(3000),
            Scenario::SensorFault => None,
            Scenario::LowPower => Some(5000),
        }
    }

    /// Whether the STATUS error flag stays latched
    pub fn latches_error(&self) -> bool {
        matches!(self, Scenario::SensorFault)
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
