//! Bit-field codec for byte-oriented register values
//!
//! Register payloads are little-endian: `buffer[0]` is the least significant
//! byte. Up to the first 8 bytes form a `u64` window; a field is addressed by
//! `(bit_position, bit_width)` with LSB = bit 0.
//!
//! Descriptor rules (shared by every function here):
//! - `bit_width` in `1..=32`
//! - `bit_position` in `0..=31` and `bit_position + bit_width <= 32`
//!
//! All arithmetic runs on `u64` so that a 32-bit wide mask never overflows
//! and shifted values never sign-extend.
//!
//! # Examples
//! ```
//! use voltage_hal::bytes::{extract, set};
//!
//! let reg = [0x00u8];
//! let updated = set(&reg, 2, 2, 2).unwrap();
//! assert_eq!(updated, vec![0b0000_1000]);
//! assert_eq!(extract(&updated, 2, 2).unwrap(), 2);
//! ```

use std::collections::HashMap;

use crate::error::BitFieldError;
use crate::register::{BitField, BitFieldValue};

/// Maximum number of buffer bytes interpreted as one integer
pub const WINDOW_BYTES: usize = 8;

/// Maximum field width
pub const MAX_BIT_WIDTH: u8 = 32;

type CodecResult<T> = std::result::Result<T, BitFieldError>;

/// Validate a `(bit_position, bit_width)` descriptor
pub fn validate_descriptor(bit_position: u8, bit_width: u8) -> CodecResult<()> {
    if bit_width == 0 || bit_width > MAX_BIT_WIDTH {
        return Err(BitFieldError::InvalidBitWidth(bit_width));
    }
    if bit_position >= MAX_BIT_WIDTH || bit_position as u16 + bit_width as u16 > MAX_BIT_WIDTH as u16
    {
        return Err(BitFieldError::InvalidBitPosition(bit_position));
    }
    Ok(())
}

/// Unshifted all-ones mask for a width (width already validated)
#[inline]
fn width_mask(bit_width: u8) -> u64 {
    (1u64 << bit_width) - 1
}

/// Largest value that fits in `bit_width` bits
#[inline]
pub fn max_value(bit_width: u8) -> u64 {
    if bit_width >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_width) - 1
    }
}

/// Interpret the first (up to) 8 bytes as a little-endian integer
#[inline]
fn read_window(buffer: &[u8]) -> u64 {
    buffer
        .iter()
        .take(WINDOW_BYTES)
        .enumerate()
        .fold(0u64, |acc, (i, &byte)| acc | ((byte as u64) << (8 * i)))
}

/// Write the window back over the first (up to) 8 bytes
#[inline]
fn write_window(buffer: &mut [u8], window: u64) {
    for (i, byte) in buffer.iter_mut().take(WINDOW_BYTES).enumerate() {
        *byte = (window >> (8 * i)) as u8;
    }
}

/// Build the positioned mask for a field
///
/// # Examples
/// ```
/// use voltage_hal::bytes::create_mask;
///
/// assert_eq!(create_mask(4, 4).unwrap(), 0xF0);
/// assert_eq!(create_mask(0, 32).unwrap(), 0xFFFF_FFFF);
/// ```
pub fn create_mask(bit_position: u8, bit_width: u8) -> CodecResult<u32> {
    validate_descriptor(bit_position, bit_width)?;
    Ok((width_mask(bit_width) << bit_position) as u32)
}

/// Extract a field from a little-endian buffer
pub fn extract(buffer: &[u8], bit_position: u8, bit_width: u8) -> CodecResult<u32> {
    if buffer.is_empty() {
        return Err(BitFieldError::EmptyBuffer);
    }
    validate_descriptor(bit_position, bit_width)?;

    let window = read_window(buffer);
    Ok(((window >> bit_position) & width_mask(bit_width)) as u32)
}

/// Extract a field and sign-extend it from its top bit
pub fn extract_signed(buffer: &[u8], bit_position: u8, bit_width: u8) -> CodecResult<i32> {
    let unsigned = extract(buffer, bit_position, bit_width)? as u64;
    let sign_bit = 1u64 << (bit_width - 1);
    if unsigned & sign_bit != 0 {
        Ok((unsigned | !width_mask(bit_width)) as i64 as i32)
    } else {
        Ok(unsigned as i32)
    }
}

/// Return a copy of `buffer` with the field replaced by `new_value`
///
/// The output is widened with zero bytes when the field reaches past the end
/// of the input.
pub fn set(buffer: &[u8], bit_position: u8, bit_width: u8, new_value: u32) -> CodecResult<Vec<u8>> {
    let mut out = buffer.to_vec();
    set_in_place(&mut out, bit_position, bit_width, new_value)?;
    Ok(out)
}

/// In-place variant of [`set`]
pub fn set_in_place(
    buffer: &mut Vec<u8>,
    bit_position: u8,
    bit_width: u8,
    new_value: u32,
) -> CodecResult<()> {
    validate_descriptor(bit_position, bit_width)?;

    let max = width_mask(bit_width);
    if new_value as u64 > max {
        return Err(BitFieldError::ValueOutOfRange {
            value: new_value as u64,
            max,
        });
    }

    let needed = (bit_position as usize + bit_width as usize).div_ceil(8);
    if buffer.len() < needed {
        buffer.resize(needed, 0);
    }

    let window = read_window(buffer);
    let cleared = window & !(max << bit_position);
    write_window(buffer, cleared | ((new_value as u64) << bit_position));
    Ok(())
}

/// Decode every field of a register in one pass
pub fn parse_all(
    buffer: &[u8],
    bit_fields: &[BitField],
) -> CodecResult<HashMap<String, BitFieldValue>> {
    let captured_at = chrono::Utc::now();
    let mut values = HashMap::with_capacity(bit_fields.len());

    for field in bit_fields {
        let raw_value = extract(buffer, field.bit_position, field.bit_width)?;
        let description = field
            .label_for(raw_value)
            .map(str::to_string)
            .unwrap_or_else(|| format!("value: {}", raw_value));

        values.insert(
            field.name.clone(),
            BitFieldValue {
                field: field.clone(),
                raw_value,
                description,
                timestamp: captured_at,
            },
        );
    }

    Ok(values)
}

/// Apply a sequence of field updates to one buffer
///
/// Updates run in order; when fields overlap the last write wins.
pub fn build(original: &[u8], updates: &[(&BitField, u32)]) -> CodecResult<Vec<u8>> {
    let mut out = original.to_vec();
    for (field, value) in updates {
        set_in_place(&mut out, field.bit_position, field.bit_width, *value)?;
    }
    Ok(out)
}

/// Test a single bit of a register value
///
/// # Examples
/// ```
/// use voltage_hal::bytes::is_bit_set;
///
/// let value = 0b1010_1100u32;
/// assert!(!is_bit_set(value, 0));
/// assert!(is_bit_set(value, 2));
/// assert!(is_bit_set(value, 3));
/// ```
#[inline]
pub fn is_bit_set(value: u32, bit_position: u8) -> bool {
    debug_assert!(bit_position < 32, "Bit index out of range: {}", bit_position);
    bit_position < 32 && (value >> bit_position) & 1 == 1
}

/// Return `value` with one bit forced on or off
#[inline]
pub fn set_bit(value: u32, bit_position: u8, on: bool) -> u32 {
    debug_assert!(bit_position < 32, "Bit index out of range: {}", bit_position);
    if bit_position >= 32 {
        return value;
    }
    if on {
        value | (1 << bit_position)
    } else {
        value & !(1 << bit_position)
    }
}

/// Return `value` with one bit cleared
#[inline]
pub fn clear_bit(value: u32, bit_position: u8) -> u32 {
    set_bit(value, bit_position, false)
}

/// Return `value` with one bit inverted
#[inline]
pub fn toggle_bit(value: u32, bit_position: u8) -> u32 {
    set_bit(value, bit_position, !is_bit_set(value, bit_position))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_extract_basic() {
        let data = [0b1011_0101, 0b1100_1100];

        assert_eq!(extract(&data, 2, 4).unwrap(), 0b1101);
        // Spans two bytes
        assert_eq!(extract(&data, 4, 8).unwrap(), 0b1100_1011);
    }

    #[test]
    fn test_extract_full_width() {
        let data = [0x78, 0x56, 0x34, 0x12, 0xFF];
        assert_eq!(extract(&data, 0, 32).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_extract_ignores_bytes_past_window() {
        let mut data = vec![0u8; 12];
        data[9] = 0xFF;
        assert_eq!(extract(&data, 0, 32).unwrap(), 0);
    }

    #[test]
    fn test_extract_empty_buffer() {
        assert_eq!(extract(&[], 0, 1), Err(BitFieldError::EmptyBuffer));
    }

    #[test]
    fn test_short_buffer_reads_zero_high_bits() {
        assert_eq!(extract(&[0xFF], 4, 8).unwrap(), 0x0F);
    }

    #[test]
    fn test_extract_signed() {
        assert_eq!(extract_signed(&[0b0000_1111], 0, 4).unwrap(), -1);
        assert_eq!(extract_signed(&[0b0000_0111], 0, 4).unwrap(), 7);
        assert_eq!(
            extract_signed(&[0x00, 0x00, 0x00, 0x80], 0, 32).unwrap(),
            i32::MIN
        );
    }

    #[test]
    fn test_descriptor_validation() {
        assert_eq!(create_mask(0, 0), Err(BitFieldError::InvalidBitWidth(0)));
        assert_eq!(create_mask(0, 33), Err(BitFieldError::InvalidBitWidth(33)));
        assert_eq!(create_mask(32, 1), Err(BitFieldError::InvalidBitPosition(32)));
        assert_eq!(create_mask(30, 4), Err(BitFieldError::InvalidBitPosition(30)));
        assert_eq!(create_mask(31, 1).unwrap(), 0x8000_0000);
        assert_eq!(create_mask(2, 2).unwrap(), 0b1100);
    }

    #[test]
    fn test_set_example_register() {
        // CONTROL register starts at 0x00, MODE field is bits 2..=3
        let original = [0x00u8];
        let updated = set(&original, 2, 2, 2).unwrap();

        assert_eq!(extract(&updated, 2, 2).unwrap(), 2);
        for bit in [0u8, 1, 4, 5, 6, 7] {
            assert!(!is_bit_set(updated[0] as u32, bit), "bit {} changed", bit);
        }
        assert_eq!(original, [0x00], "input must not be mutated");
    }

    #[test]
    fn test_set_preserves_other_bits() {
        let original = [0xFF, 0xFF, 0xFF, 0xFF];
        let updated = set(&original, 5, 7, 0).unwrap();
        let expected_mask = create_mask(5, 7).unwrap();
        let before = u32::from_le_bytes(original);
        let after = u32::from_le_bytes([updated[0], updated[1], updated[2], updated[3]]);
        assert_eq!(after, before & !expected_mask);
    }

    #[test]
    fn test_set_rejects_overflow() {
        assert_eq!(
            set(&[0u8], 0, 3, 8),
            Err(BitFieldError::ValueOutOfRange { value: 8, max: 7 })
        );
        assert!(set(&[0u8, 0, 0, 0], 0, 32, u32::MAX).is_ok());
    }

    #[test]
    fn test_set_widens_short_buffer() {
        let updated = set(&[0xAA], 12, 4, 0xF).unwrap();
        assert_eq!(updated, vec![0xAA, 0xF0]);
    }

    #[test]
    fn test_set_is_idempotent() {
        let original = [0x5A, 0xC3];
        let once = set(&original, 3, 6, 0x2B).unwrap();
        let twice = set(&once, 3, 6, 0x2B).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_set_extract_roundtrip_sweep() {
        let buffer = [0xA5, 0x5A, 0x3C, 0xC3];
        for width in 1..=32u8 {
            for position in 0..=(32 - width) {
                let value = (max_value(width) as u32) & 0x9E37_79B9;
                let updated = set(&buffer, position, width, value).unwrap();
                assert_eq!(extract(&updated, position, width).unwrap(), value);

                let mask = create_mask(position, width).unwrap();
                let before = u32::from_le_bytes(buffer);
                let after =
                    u32::from_le_bytes([updated[0], updated[1], updated[2], updated[3]]);
                assert_eq!(before & !mask, after & !mask, "pos={} width={}", position, width);
            }
        }
    }

    #[test]
    fn test_parse_all_uses_labels() {
        let mut labels = BTreeMap::new();
        labels.insert(2, "Single".to_string());
        let mode = BitField::new("MODE", 2, 2, "Operating mode").with_labels(labels);
        let enable = BitField::new("ENABLE", 0, 1, "Enable");

        let values = parse_all(&[0b0000_1001], &[mode, enable]).unwrap();
        assert_eq!(values["MODE"].raw_value, 2);
        assert_eq!(values["MODE"].description, "Single");
        assert_eq!(values["ENABLE"].raw_value, 1);
        assert_eq!(values["ENABLE"].description, "value: 1");
    }

    #[test]
    fn test_build_last_write_wins() {
        let wide = BitField::new("WIDE", 0, 8, "");
        let low = BitField::new("LOW", 0, 4, "");

        let out = build(&[0x00], &[(&wide, 0xFF), (&low, 0x3)]).unwrap();
        assert_eq!(out, vec![0xF3]);

        let out = build(&[0x00], &[(&low, 0x3), (&wide, 0xFF)]).unwrap();
        assert_eq!(out, vec![0xFF]);
    }

    #[test]
    fn test_bit_helpers() {
        assert_eq!(set_bit(0, 3, true), 0b1000);
        assert_eq!(set_bit(0b1000, 3, false), 0);
        assert_eq!(clear_bit(0xFF, 0), 0xFE);
        assert_eq!(toggle_bit(0b1000, 3), 0);
        assert_eq!(toggle_bit(0, 31), 0x8000_0000);
    }
}
