//! # Encoding Module
//!
//! Binary encoding primitives shared by the table metadata format, the block
//! manifest, and page payload framing:
//!
//! - `varint`: 7-bit continuation vint/vlong encoding
//! - `wire`: cursor-based reader/writer speaking vint, vlong, utf and
//!   byte-array fields
//!
//! All formats built on these primitives are little-endian at the byte level
//! and self-delimiting, so readers never need out-of-band lengths.

pub mod varint;
pub mod wire;

pub use varint::{decode_vint, decode_vlong, encode_vint, encode_vlong, vint_len, vlong_len};
pub use wire::{WireReader, WireWriter};
