//! # File-Backed Index Page Store
//!
//! Directory-based implementation of [`IndexDataStorage`]: every immutable
//! data page lives in its own `<page_id>.page` file, written through the
//! aligned writer so the on-disk footprint honors direct-I/O alignment.
//!
//! ## File Format
//!
//! ```text
//! +--------------------+ Offset 0
//! | PageFileHeader     |  64 bytes, zerocopy, little-endian
//! +--------------------+ Offset 64
//! | Payload            |  entry_count entries, wire-encoded
//! +--------------------+
//! | Zero padding       |  up to the next alignment boundary
//! +--------------------+
//! ```
//!
//! ### Header Layout
//!
//! ```text
//! Offset  Size  Description
//! 0       16    Magic: "BrinDB Page\x00\x00\x00\x00\x00"
//! 16      4     Version: 1
//! 20      4     Flags: 0
//! 24      8     Page id (must match the file name)
//! 32      4     Entry count
//! 36      4     Payload length in bytes
//! 40      8     CRC64-ECMA of the payload
//! 48      16    Reserved
//! ```
//!
//! The payload length in the header is the logical length; readers ignore the
//! trailing zero padding the aligned writer appends. The CRC covers only the
//! payload, so padding never affects validation.
//!
//! ## Recovery
//!
//! `open` lists `*.page` files to rebuild the page directory and resumes page
//! id assignment above the largest id found. Pages dropped by a checkpoint
//! are deleted from the filesystem immediately.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{bail, ensure, Result, WrapErr};
use std::io::Write;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{PAGE_FILE_EXTENSION, PAGE_FILE_HEADER_SIZE};
use crate::encoding::{WireReader, WireWriter};

use super::{AlignedBlockWriter, IndexDataStorage, UNALLOCATED_PAGE};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

pub const PAGE_FILE_MAGIC: &[u8; 16] = b"BrinDB Page\x00\x00\x00\x00\x00";
pub const PAGE_FILE_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageFileHeader {
    magic: [u8; 16],
    version: U32,
    flags: U32,
    page_id: U64,
    entry_count: U32,
    payload_len: U32,
    checksum: U64,
    reserved: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<PageFileHeader>() == PAGE_FILE_HEADER_SIZE);

impl PageFileHeader {
    fn new(page_id: u64, entry_count: u32, payload: &[u8]) -> Self {
        Self {
            magic: *PAGE_FILE_MAGIC,
            version: U32::new(PAGE_FILE_VERSION),
            flags: U32::new(0),
            page_id: U64::new(page_id),
            entry_count: U32::new(entry_count),
            payload_len: U32::new(payload.len() as u32),
            checksum: U64::new(CRC64.checksum(payload)),
            reserved: [0u8; 16],
        }
    }

    fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= PAGE_FILE_HEADER_SIZE,
            "buffer too small for PageFileHeader: {} < {}",
            bytes.len(),
            PAGE_FILE_HEADER_SIZE
        );
        Self::ref_from_bytes(&bytes[..PAGE_FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse PageFileHeader: {:?}", e))
    }
}

/// Encodes and decodes a single `(key, value)` entry in a page payload.
pub trait EntryCodec<K, V>: Send + Sync {
    fn encode_entry(&self, key: &K, value: &V, out: &mut WireWriter);

    fn decode_entry(&self, input: &mut WireReader<'_>) -> Result<(K, V)>;
}

/// Codec for opaque byte keys and values, the shape secondary index entries
/// arrive in.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesEntryCodec;

impl EntryCodec<Vec<u8>, Vec<u8>> for BytesEntryCodec {
    fn encode_entry(&self, key: &Vec<u8>, value: &Vec<u8>, out: &mut WireWriter) {
        out.write_byte_array(key);
        out.write_byte_array(value);
    }

    fn decode_entry(&self, input: &mut WireReader<'_>) -> Result<(Vec<u8>, Vec<u8>)> {
        let key = input.read_byte_array("entry key")?;
        let value = input.read_byte_array("entry value")?;
        Ok((key, value))
    }
}

pub struct FileIndexStorage<K, V, C> {
    dir: PathBuf,
    codec: C,
    next_page_id: AtomicU64,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C: EntryCodec<K, V>> FileIndexStorage<K, V, C> {
    /// Opens (creating if needed) a page directory, rebuilding the page id
    /// sequence from the files present.
    pub fn open<P: AsRef<Path>>(dir: P, codec: C) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("failed to create page directory '{}'", dir.display()))?;

        let mut max_page_id = UNALLOCATED_PAGE;
        let mut recovered = 0usize;
        for entry in std::fs::read_dir(&dir)
            .wrap_err_with(|| format!("failed to list page directory '{}'", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PAGE_FILE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(page_id) = stem.parse::<u64>() else {
                continue;
            };
            max_page_id = max_page_id.max(page_id);
            recovered += 1;
        }
        if recovered > 0 {
            tracing::info!(
                dir = %dir.display(),
                pages = recovered,
                next_page_id = max_page_id + 1,
                "recovered index page directory"
            );
        }

        Ok(Self {
            dir,
            codec,
            next_page_id: AtomicU64::new(max_page_id + 1),
            _marker: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn page_path(&self, page_id: u64) -> PathBuf {
        self.dir.join(format!("{}.{}", page_id, PAGE_FILE_EXTENSION))
    }
}

impl<K, V, C> IndexDataStorage<K, V> for FileIndexStorage<K, V, C>
where
    K: Send + Sync,
    V: Send + Sync,
    C: EntryCodec<K, V>,
{
    fn create_data_page(&self, entries: Vec<(K, V)>) -> Result<u64> {
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);

        let mut payload = WireWriter::new();
        for (key, value) in &entries {
            self.codec.encode_entry(key, value, &mut payload);
        }
        let payload = payload.into_bytes();
        let header = PageFileHeader::new(page_id, entries.len() as u32, &payload);

        let path = self.page_path(page_id);
        let mut writer = AlignedBlockWriter::create(&path)
            .wrap_err_with(|| format!("failed to open page file '{}'", path.display()))?;
        let write = |writer: &mut AlignedBlockWriter| {
            writer.write_all(header.as_bytes())?;
            writer.write_all(&payload)
        };
        write(&mut writer)
            .and_then(|_| writer.close())
            .wrap_err_with(|| format!("failed to write page file '{}'", path.display()))?;

        tracing::debug!(page_id, entries = entries.len(), bytes = payload.len(), "created data page");
        Ok(page_id)
    }

    fn load_data_page(&self, page_id: u64) -> Result<Vec<(K, V)>> {
        let path = self.page_path(page_id);
        let data = std::fs::read(&path)
            .wrap_err_with(|| format!("failed to read page file '{}'", path.display()))?;

        let header = PageFileHeader::from_bytes(&data)?;
        if header.magic != *PAGE_FILE_MAGIC || header.version.get() != PAGE_FILE_VERSION {
            bail!("corrupted index page '{}': bad magic or version", path.display());
        }
        if header.page_id.get() != page_id {
            bail!(
                "corrupted index page '{}': header page id {} does not match",
                path.display(),
                header.page_id.get()
            );
        }
        let payload_len = header.payload_len.get() as usize;
        ensure!(
            data.len() >= PAGE_FILE_HEADER_SIZE + payload_len,
            "corrupted index page '{}': truncated payload",
            path.display()
        );
        let payload = &data[PAGE_FILE_HEADER_SIZE..PAGE_FILE_HEADER_SIZE + payload_len];
        if CRC64.checksum(payload) != header.checksum.get() {
            bail!("corrupted index page '{}': checksum mismatch", path.display());
        }

        let mut reader = WireReader::new(payload);
        let entry_count = header.entry_count.get() as usize;
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            entries.push(self.codec.decode_entry(&mut reader)?);
        }
        Ok(entries)
    }

    fn drop_data_page(&self, page_id: u64) -> Result<()> {
        let path = self.page_path(page_id);
        std::fs::remove_file(&path)
            .wrap_err_with(|| format!("failed to drop page file '{}'", path.display()))
    }
}
