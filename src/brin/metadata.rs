//! # Block Range Index Manifest
//!
//! A checkpoint of the block range index is described by a manifest listing
//! one entry per block, in chain order:
//!
//! ```text
//! vint  block count
//! per block:
//!   vlong block id
//!   u8    has_min_key (0 = head block)
//!   if has_min_key: byte_array min_key
//!   vlong page id       (0 = never persisted)
//!   vint  size          (entry count of the persisted page)
//! ```
//!
//! The head block is the single entry with no `min_key`. Booting an index
//! from a manifest rebuilds the block map and chain without touching any data
//! page; pages load lazily afterwards.
//!
//! Comparing two manifests yields the pages the older checkpoint referenced
//! that the newer one no longer does — the reclamation list a caller executes
//! once the new checkpoint is durable (see
//! [`crate::index::PostCheckpointAction`]).

use eyre::{ensure, Result};

use crate::encoding::{WireReader, WireWriter};
use crate::storage::UNALLOCATED_PAGE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMetadata<K> {
    pub block_id: u64,
    /// `None` identifies the head block.
    pub min_key: Option<K>,
    pub page_id: u64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockRangeIndexMetadata<K> {
    /// Blocks in chain (ascending key) order; the head comes first.
    pub blocks: Vec<BlockMetadata<K>>,
}

impl<K> BlockRangeIndexMetadata<K> {
    /// Pages this checkpoint references that `next_checkpoint` no longer
    /// does. Safe to reclaim once `next_checkpoint` is durable.
    pub fn superseded_pages(&self, next_checkpoint: &Self) -> Vec<u64> {
        let mut superseded: Vec<u64> = self
            .blocks
            .iter()
            .map(|b| b.page_id)
            .filter(|&page_id| {
                page_id != UNALLOCATED_PAGE
                    && !next_checkpoint.blocks.iter().any(|b| b.page_id == page_id)
            })
            .collect();
        superseded.sort_unstable();
        superseded.dedup();
        superseded
    }
}

impl BlockRangeIndexMetadata<Vec<u8>> {
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_vint(self.blocks.len() as i32);
        for block in &self.blocks {
            writer.write_vlong(block.block_id as i64);
            match &block.min_key {
                Some(min_key) => {
                    writer.write_u8(1);
                    writer.write_byte_array(min_key);
                }
                None => writer.write_u8(0),
            }
            writer.write_vlong(block.page_id as i64);
            writer.write_vint(block.size as i32);
        }
        writer.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(bytes);
        let count = reader.read_vint("block count")?;
        ensure!(count >= 0, "corrupted index manifest: negative block count");
        let mut blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let block_id = reader.read_vlong("block id")? as u64;
            let min_key = match reader.read_u8("min key marker")? {
                0 => None,
                1 => Some(reader.read_byte_array("min key")?),
                other => eyre::bail!("corrupted index manifest: min key marker {}", other),
            };
            let page_id = reader.read_vlong("page id")? as u64;
            let size = reader.read_vint("block size")?;
            ensure!(size >= 0, "corrupted index manifest: negative block size");
            blocks.push(BlockMetadata {
                block_id,
                min_key,
                page_id,
                size: size as usize,
            });
        }
        Ok(Self { blocks })
    }
}
