//! Encoders and decoders for the two framings a node speaks
//!
//! - [`frame`]: the fixed 222-byte native frame carried over LoRa
//! - [`wire`]: tag-value records exchanged with the phone over BLE

pub mod frame;
pub mod wire;

pub use frame::{decode_frame, encode_frame, NATIVE_FRAME_LEN};
pub use wire::{
    extract_length_delimited, extract_varint, FieldIter, FieldValue, TagWriter, WireKind,
};
