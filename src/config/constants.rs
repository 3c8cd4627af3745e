//! # BrinDB Configuration Constants
//!
//! This module centralizes tuning constants, grouping interdependent values
//! together and documenting their relationships. Constants that depend on
//! each other are co-located to prevent mismatch bugs.
//!
//! ```text
//! FALLBACK_ALIGNMENT (4096 bytes)
//!       │
//!       └─> Used when the filesystem block size cannot be detected or is
//!           not a power of two. Direct I/O requires every submitted write
//!           to be a multiple of the device's logical block size, so this
//!           must stay a conservative upper bound of common sector sizes.
//!
//! DEFAULT_BATCH_BLOCKS (1)
//!       │
//!       └─> Batch size of the aligned writer is alignment * batch_blocks;
//!           its staging buffer is twice that, leaving room for trailing
//!           padding.
//!
//! PAGE_FILE_HEADER_SIZE (64 bytes)
//!       │
//!       └─> Fixed-size zerocopy header at the start of every .page file.
//!           A compile-time assertion in storage::index_file ties the struct
//!           layout to this value.
//!
//! KEY_TO_PAGE_SHARD_COUNT (64)
//!       │
//!       └─> Lock shards of the concurrent key-to-page map. Must be a power
//!           of two so shard selection reduces to a mask.
//! ```

/// Soft cap on entries per block in the block range index. A block may exceed
/// this transiently while a split is in progress.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 1000;

/// Alignment used when the filesystem block size cannot be detected.
pub const FALLBACK_ALIGNMENT: usize = 4096;

/// Default number of alignment-sized blocks batched per write by the aligned
/// writer.
pub const DEFAULT_BATCH_BLOCKS: usize = 1;

/// Size of the fixed header at the start of every index page file.
pub const PAGE_FILE_HEADER_SIZE: usize = 64;

/// Extension of immutable index data page files.
pub const PAGE_FILE_EXTENSION: &str = "page";

/// Number of lock shards in the concurrent key-to-page map.
pub const KEY_TO_PAGE_SHARD_COUNT: usize = 64;

/// Estimated bookkeeping bytes per key-to-page entry, added to the key length
/// for used-memory accounting.
pub const KEY_TO_PAGE_ENTRY_OVERHEAD: u64 = 24;

const _: () = assert!(KEY_TO_PAGE_SHARD_COUNT.is_power_of_two());
const _: () = assert!(FALLBACK_ALIGNMENT.is_power_of_two());
const _: () = assert!(DEFAULT_BATCH_BLOCKS >= 1);
