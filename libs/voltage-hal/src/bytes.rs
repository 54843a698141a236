//! Binary data processing utilities
//!
//! Bit-field extraction/packing over little-endian register buffers and
//! byte order handling for 16-bit register words.
//!
//! # Design Principles
//!
//! - **Pure**: No device state, every function is deterministic
//! - **Copy-on-write**: `set`/`build` return new buffers, `set_in_place` is opt-in
//! - **Loud contracts**: Malformed descriptors and oversized values are errors

pub mod bit_field;
pub mod byte_order;

pub use bit_field::*;
pub use byte_order::ByteOrder;
