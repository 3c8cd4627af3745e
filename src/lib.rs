//! # BrinDB - Block Range Index Storage Core
//!
//! BrinDB is the index-and-persistence core of an embedded SQL engine: a
//! block range index for secondary lookups, a concurrent key-to-page map for
//! the primary-key path, and direct-I/O page persistence underneath both.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        SQL Execution (external)          │
//! ├────────────────────┬────────────────────┤
//! │  KeyToPageIndex    │  BlockRangeIndex   │
//! │  (PK -> page id)   │  (secondary index) │
//! ├────────────────────┴────────────────────┤
//! │   IndexDataStorage (immutable pages)     │
//! ├─────────────────────────────────────────┤
//! │   AlignedBlockWriter (direct I/O)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Mutations enter the block range index, update its in-memory structure and
//! are persisted at checkpoint time by writing new immutable pages through
//! the data storage, which in turn writes sector-aligned, padded batches.
//! Checkpoints produce a manifest; recovery rebuilds the index from the
//! manifest without loading a single page, and pages stream back in lazily
//! on first access.
//!
//! ## Concurrency
//!
//! All index structures are safe under parallel callers: the block range
//! index splits blocks under concurrent readers, the key-to-page map offers
//! a per-key linearizable compare-and-set, and checkpoints run without
//! quiescing mutations.
//!
//! ## Module Overview
//!
//! - [`brin`]: block range index, blocks, checkpoint manifest
//! - [`index`]: key-to-page contract, log sequence numbers, post-checkpoint
//!   reclamation
//! - [`storage`]: aligned writer, page store trait and implementations
//! - [`schema`]: table metadata and its binary format
//! - [`encoding`]: varint and wire primitives shared by every format
//! - [`config`]: tuning constants

pub mod brin;
pub mod config;
pub mod encoding;
pub mod index;
pub mod schema;
pub mod storage;

pub use brin::{BlockRangeIndex, BlockRangeIndexMetadata};
pub use index::{ConcurrentKeyToPageMap, KeyToPageIndex, LogSequenceNumber, PostCheckpointAction};
pub use schema::Table;
pub use storage::{
    AlignedBlockWriter, BytesEntryCodec, FileIndexStorage, IndexDataStorage, MemoryIndexStorage,
};
