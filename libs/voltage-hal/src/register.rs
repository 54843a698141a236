//! Register map data model
//!
//! Immutable description of a device's register space. Definitions are built
//! once by the device-type catalog and shared read-only; the only sanctioned
//! change is swapping a bit field's label map for a new one.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bytes::bit_field::{max_value, validate_descriptor};
use crate::error::{BitFieldError, HalError, Result};

/// Functional role of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    Control,
    Status,
    Data,
    Configuration,
    Calibration,
    Identity,
}

impl std::fmt::Display for RegisterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterType::Control => write!(f, "CONTROL"),
            RegisterType::Status => write!(f, "STATUS"),
            RegisterType::Data => write!(f, "DATA"),
            RegisterType::Configuration => write!(f, "CONFIG"),
            RegisterType::Calibration => write!(f, "CALIBRATION"),
            RegisterType::Identity => write!(f, "IDENTITY"),
        }
    }
}

/// Access rights seen from the bus master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
    /// Writable once until the next factory reset
    WriteOnce,
}

impl RegisterAccess {
    pub fn is_readable(&self) -> bool {
        !matches!(self, RegisterAccess::WriteOnly)
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, RegisterAccess::ReadOnly)
    }
}

// ============================================================================
// Bit fields
// ============================================================================

/// Named sub-range of bits within a register value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitField {
    pub name: String,
    /// LSB = 0
    pub bit_position: u8,
    /// 1..=32
    pub bit_width: u8,
    #[serde(default)]
    pub description: String,
    /// Value → label, replaced wholesale never edited in place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Arc<BTreeMap<u32, String>>>,
}

impl BitField {
    pub fn new(
        name: impl Into<String>,
        bit_position: u8,
        bit_width: u8,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            bit_position,
            bit_width,
            description: description.into(),
            labels: None,
        }
    }

    /// Single-bit flag
    pub fn flag(name: impl Into<String>, bit: u8, description: impl Into<String>) -> Self {
        Self::new(name, bit, 1, description)
    }

    /// Builder form of [`BitField::replace_labels`]
    pub fn with_labels(mut self, labels: BTreeMap<u32, String>) -> Self {
        self.replace_labels(labels);
        self
    }

    /// Swap in a new label map
    pub fn replace_labels(&mut self, labels: BTreeMap<u32, String>) {
        self.labels = Some(Arc::new(labels));
    }

    pub fn label_for(&self, value: u32) -> Option<&str> {
        self.labels
            .as_deref()
            .and_then(|labels| labels.get(&value))
            .map(String::as_str)
    }

    /// Largest raw value this field can hold
    pub fn max_value(&self) -> u64 {
        max_value(self.bit_width)
    }

    /// One past the highest bit covered
    pub fn end_bit(&self) -> u16 {
        self.bit_position as u16 + self.bit_width as u16
    }

    pub fn validate(&self) -> std::result::Result<(), BitFieldError> {
        validate_descriptor(self.bit_position, self.bit_width)
    }
}

/// Decoded snapshot of one bit field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BitFieldValue {
    pub field: BitField,
    pub raw_value: u32,
    /// Label from the field's map, or `"value: N"`
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl BitFieldValue {
    /// Label from the field's map, if the raw value has one
    pub fn label(&self) -> Option<&str> {
        self.field.label_for(self.raw_value)
    }
}

// ============================================================================
// Register maps
// ============================================================================

/// Static definition of one register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterMap {
    pub address: u32,
    pub name: String,
    pub register_type: RegisterType,
    /// Size in bytes; the register occupies `address..address + size`
    pub size: u8,
    pub access: RegisterAccess,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bit_fields: Vec<BitField>,
}

impl RegisterMap {
    pub fn new(
        address: u32,
        name: impl Into<String>,
        register_type: RegisterType,
        size: u8,
        access: RegisterAccess,
    ) -> Self {
        Self {
            address,
            name: name.into(),
            register_type,
            size,
            access,
            scale: None,
            offset: None,
            unit: None,
            description: String::new(),
            bit_fields: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_scaling(mut self, scale: f64, offset: f64, unit: impl Into<String>) -> Self {
        self.scale = Some(scale);
        self.offset = Some(offset);
        self.unit = Some(unit.into());
        self
    }

    pub fn with_bit_field(mut self, field: BitField) -> Self {
        self.bit_fields.push(field);
        self
    }

    /// Byte addresses covered by this register
    pub fn address_range(&self) -> Range<u32> {
        self.address..self.address.saturating_add(self.size as u32)
    }

    pub fn contains(&self, address: u32) -> bool {
        self.address_range().contains(&address)
    }

    pub fn bit_field(&self, name: &str) -> Option<&BitField> {
        self.bit_fields.iter().find(|f| f.name == name)
    }

    pub fn bit_field_mut(&mut self, name: &str) -> Option<&mut BitField> {
        self.bit_fields.iter_mut().find(|f| f.name == name)
    }

    /// Engineering value for a raw reading (`raw * scale + offset`)
    pub fn apply_scaling(&self, raw: f64) -> f64 {
        match self.scale {
            Some(scale) => raw * scale + self.offset.unwrap_or(0.0),
            None => raw + self.offset.unwrap_or(0.0),
        }
    }

    /// Check size and bit-field layout
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(HalError::invalid_config(
                format!("{}.size", self.name),
                "register size must be at least one byte",
            ));
        }

        let available_bits = self.size as u16 * 8;
        for field in &self.bit_fields {
            field.validate()?;
            if field.end_bit() > available_bits {
                return Err(HalError::invalid_config(
                    format!("{}.{}", self.name, field.name),
                    format!(
                        "field ends at bit {} but register has {} bits",
                        field.end_bit(),
                        available_bits
                    ),
                ));
            }
        }
        Ok(())
    }
}
