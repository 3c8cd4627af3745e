//! # Wire Reader and Writer
//!
//! Buffer-level primitives for BrinDB's binary formats. `WireWriter` appends
//! to a growable byte buffer; `WireReader` walks a borrowed slice with a
//! cursor. Both speak the same vocabulary:
//!
//! - `vint` / `vlong`: variable-length integers (see [`super::varint`])
//! - `u8`: raw byte
//! - `utf`: vint length followed by UTF-8 bytes
//! - `byte_array`: vint length followed by raw bytes
//!
//! Every multi-byte structure in the table metadata and manifest formats is
//! expressed in these terms, so the two ends cannot drift apart.
//!
//! ## Error Handling
//!
//! Writes cannot fail (the target is an in-memory buffer). Reads return
//! `eyre::Result`; truncated input and invalid UTF-8 are corruption errors
//! surfaced with a message naming the field being read.

use eyre::{ensure, eyre, Result};

use super::varint::{decode_vint, decode_vlong, encode_vint, encode_vlong, MAX_VLONG_SIZE};

#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_vint(&mut self, value: i32) {
        let mut scratch = [0u8; MAX_VLONG_SIZE];
        let written = encode_vint(value, &mut scratch);
        self.buf.extend_from_slice(&scratch[..written]);
    }

    pub fn write_vlong(&mut self, value: i64) {
        let mut scratch = [0u8; MAX_VLONG_SIZE];
        let written = encode_vlong(value, &mut scratch);
        self.buf.extend_from_slice(&scratch[..written]);
    }

    pub fn write_utf(&mut self, value: &str) {
        self.write_byte_array(value.as_bytes());
    }

    pub fn write_byte_array(&mut self, bytes: &[u8]) {
        self.write_vint(bytes.len() as i32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn read_u8(&mut self, field: &str) -> Result<u8> {
        ensure!(
            self.pos < self.buf.len(),
            "unexpected end of data reading {}",
            field
        );
        let value = self.buf[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_vint(&mut self, field: &str) -> Result<i32> {
        let (value, read) = decode_vint(&self.buf[self.pos..])
            .map_err(|e| eyre!("unexpected end of data reading {}: {}", field, e))?;
        self.pos += read;
        Ok(value)
    }

    pub fn read_vlong(&mut self, field: &str) -> Result<i64> {
        let (value, read) = decode_vlong(&self.buf[self.pos..])
            .map_err(|e| eyre!("unexpected end of data reading {}: {}", field, e))?;
        self.pos += read;
        Ok(value)
    }

    pub fn read_raw(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        ensure!(
            self.pos + len <= self.buf.len(),
            "unexpected end of data reading {}: need {} bytes, {} available",
            field,
            len,
            self.buf.len() - self.pos
        );
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_byte_array(&mut self, field: &str) -> Result<Vec<u8>> {
        let len = self.read_vint(field)?;
        ensure!(len >= 0, "negative length reading {}: {}", field, len);
        Ok(self.read_raw(len as usize, field)?.to_vec())
    }

    pub fn read_utf(&mut self, field: &str) -> Result<String> {
        let len = self.read_vint(field)?;
        ensure!(len >= 0, "negative length reading {}: {}", field, len);
        let bytes = self.read_raw(len as usize, field)?;
        let value = std::str::from_utf8(bytes)
            .map_err(|e| eyre!("invalid UTF-8 reading {}: {}", field, e))?;
        Ok(value.to_string())
    }
}
