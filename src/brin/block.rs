//! # Block
//!
//! A block is a contiguous range of sorted `(key, value)` entries persisted
//! as a single immutable data page. The block range index owns its blocks and
//! links them into a singly linked chain in ascending key order; the chain is
//! redundant with the block map but survives splits, so readers traverse it
//! while the map mutates underneath them.
//!
//! A block's entry list is resident only while `loaded` is set. Unloaded
//! blocks keep the id of their last persisted page and reload lazily on first
//! access. `dirty` marks divergence between the resident entries and the
//! persisted page. The pin count tracks in-flight operations that must keep
//! the entries resident.
//!
//! Blocks are never destroyed in place: checkpoint pruning detaches them
//! (empty entry list, chain link preserved) so that concurrent chain walkers
//! pass through without observing a torn state.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::UNALLOCATED_PAGE;

pub type BlockId = u64;

pub struct Block<K, V> {
    block_id: BlockId,
    min_key: Option<K>,
    pin_count: AtomicU32,
    pub(crate) data: Arc<RwLock<BlockData<K, V>>>,
}

pub(crate) struct BlockData<K, V> {
    pub entries: Vec<(K, V)>,
    pub loaded: bool,
    pub dirty: bool,
    pub page_id: u64,
    pub size: usize,
    pub next: Option<Arc<Block<K, V>>>,
    pub detached: bool,
}

impl<K, V> Block<K, V> {
    /// Fresh head block of an empty index: resident, empty, nothing
    /// persisted yet.
    pub(crate) fn new_head(block_id: BlockId) -> Self {
        Self {
            block_id,
            min_key: None,
            pin_count: AtomicU32::new(0),
            data: Arc::new(RwLock::new(BlockData {
                entries: Vec::new(),
                loaded: true,
                dirty: false,
                page_id: UNALLOCATED_PAGE,
                size: 0,
                next: None,
                detached: false,
            })),
        }
    }

    /// Upper half of a split: resident and dirty, no page persisted yet.
    pub(crate) fn for_split(
        block_id: BlockId,
        min_key: K,
        entries: Vec<(K, V)>,
        next: Option<Arc<Block<K, V>>>,
    ) -> Self {
        let size = entries.len();
        Self {
            block_id,
            min_key: Some(min_key),
            pin_count: AtomicU32::new(0),
            data: Arc::new(RwLock::new(BlockData {
                entries,
                loaded: true,
                dirty: true,
                page_id: UNALLOCATED_PAGE,
                size,
                next,
                detached: false,
            })),
        }
    }

    /// Block rebuilt from a checkpoint manifest: entries are loaded lazily
    /// from the recorded page on first access.
    pub(crate) fn from_manifest(
        block_id: BlockId,
        min_key: Option<K>,
        page_id: u64,
        size: usize,
        next: Option<Arc<Block<K, V>>>,
    ) -> Self {
        Self {
            block_id,
            min_key,
            pin_count: AtomicU32::new(0),
            data: Arc::new(RwLock::new(BlockData {
                entries: Vec::new(),
                // a block that never reached a checkpoint has nothing to load
                loaded: page_id == UNALLOCATED_PAGE,
                dirty: false,
                page_id,
                size,
                next,
                detached: false,
            })),
        }
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Lower bound of this block's key range; `None` for the head block,
    /// which receives keys below any other block's `min_key`.
    pub fn min_key(&self) -> Option<&K> {
        self.min_key.as_ref()
    }

    pub fn is_head(&self) -> bool {
        self.min_key.is_none()
    }

    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin called on unpinned block");
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }
}

impl<K, V> std::fmt::Debug for Block<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("block_id", &self.block_id)
            .field("head", &self.min_key.is_none())
            .field("pin_count", &self.pin_count.load(Ordering::Relaxed))
            .finish()
    }
}
