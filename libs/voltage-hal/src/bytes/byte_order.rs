//! Byte order for multi-byte register words
//!
//! Registers on the simulated bus are byte addressed. When two consecutive
//! register bytes form a 16-bit word, the caller picks how they combine:
//!
//! - `LittleEndian` (BA): byte at the lower address is the LSB, matching the
//!   bit-field codec's buffer convention
//! - `BigEndian` (AB): byte at the lower address is the MSB, the usual wire
//!   order for SMBus/I2C sensor words

use serde::{Deserialize, Serialize};

/// Order of the two bytes of a 16-bit register word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Lower address holds the least significant byte
    #[default]
    LittleEndian,
    /// Lower address holds the most significant byte
    BigEndian,
}

impl ByteOrder {
    /// Parse common textual forms ("LE", "BA", "little_endian", ...)
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        match normalized.as_str() {
            "LE" | "BA" | "LITTLE" | "LITTLE_ENDIAN" | "LITTLEENDIAN" => Some(Self::LittleEndian),
            "BE" | "AB" | "BIG" | "BIG_ENDIAN" | "BIGENDIAN" => Some(Self::BigEndian),
            _ => None,
        }
    }

    /// Get descriptive name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LittleEndian => "BA (Little-Endian)",
            Self::BigEndian => "AB (Big-Endian)",
        }
    }

    /// Combine two register bytes (in address order) into a word
    pub fn u16_from_bytes(&self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::LittleEndian => u16::from_le_bytes(bytes),
            Self::BigEndian => u16::from_be_bytes(bytes),
        }
    }

    /// Split a word into two register bytes (in address order)
    pub fn u16_to_bytes(&self, value: u16) -> [u8; 2] {
        match self {
            Self::LittleEndian => value.to_le_bytes(),
            Self::BigEndian => value.to_be_bytes(),
        }
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
