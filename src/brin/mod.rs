//! # Block Range Index
//!
//! In-memory sorted map of block-head keys to blocks, each block owning a
//! lazily loaded, sorted run of `(key, value)` entries persisted as one
//! immutable data page. This is the structure behind secondary indexes:
//! point lookups, range scans and mutations run concurrently while blocks
//! split under load, unload under memory pressure, and checkpoint to storage.
//!
//! ## Structure
//!
//! ```text
//! blocks:  BTreeMap<min_key, Arc<Block>>        (head kept aside)
//! chain:   head -> block -> block -> ...        (ascending key order)
//! ```
//!
//! The map accelerates lookups; the chain is the source of truth. A lookup
//! floors the search key to the greatest block whose `min_key` is strictly
//! below it (falling back to the head) and then walks `next` to the right.
//! Starting strictly below matters: after a split on a duplicate-key
//! boundary, entries for one key can span adjacent blocks, and the walk must
//! approach them from the left to collect every one.
//!
//! ## Splits
//!
//! An insert that pushes a block past `max_block_size` cuts the entry run in
//! half (lower half keeps the extra entry on odd counts), chains the new
//! upper block after the current one, and publishes it in the block map. If
//! the map already holds a block under the same `min_key`, the new block
//! stays chain-only; duplicate map keys never displace one another. Readers
//! walking the chain observe either the pre-split block or the pair; both
//! states cover the same entries in the same order.
//!
//! ## Checkpoints
//!
//! `checkpoint` walks the chain with hand-over-hand locking, persisting every
//! dirty block through the data storage and emitting one manifest entry per
//! block. The coupling guarantees the manifest is a valid boot image even
//! while splits interleave: a block that splits after it was serialized has
//! its full pre-split run captured in its page, and the split-off twin is not
//! walked. Empty, unpinned non-head blocks are pruned during the same walk;
//! their key slot is released and the predecessor's range extends over the
//! gap.
//!
//! ## Locking
//!
//! The block map and each block body have separate locks; block locks are
//! only ever acquired in chain order, and the map lock is only taken while
//! holding at most the splitting/pruned block's lock, so lock ordering is
//! acyclic. Lazy loads take the block lock exclusively; concurrent loaders of
//! one block coordinate through it so a page is read once.

mod block;
mod metadata;

pub use block::{Block, BlockId};
pub use metadata::{BlockMetadata, BlockRangeIndexMetadata};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::index::LogSequenceNumber;
use crate::storage::{IndexDataStorage, UNALLOCATED_PAGE};

use block::BlockData;

pub struct BlockRangeIndex<K, V, S> {
    max_block_size: usize,
    storage: Arc<S>,
    head: RwLock<Arc<Block<K, V>>>,
    blocks: RwLock<BTreeMap<K, Arc<Block<K, V>>>>,
    block_count: AtomicU64,
    block_id_seq: AtomicU64,
    checkpoint_lock: Mutex<()>,
    pinned_checkpoints: Mutex<HashMap<LogSequenceNumber, (u32, BlockRangeIndexMetadata<K>)>>,
}

impl<K, V, S> BlockRangeIndex<K, V, S>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
    S: IndexDataStorage<K, V>,
{
    /// Creates an empty index over `storage`. `max_block_size` is the soft
    /// cap on entries per block; a block may exceed it transiently while a
    /// split is in progress.
    pub fn new(max_block_size: usize, storage: Arc<S>) -> Self {
        assert!(max_block_size >= 1, "max_block_size must be >= 1");
        Self {
            max_block_size,
            storage,
            head: RwLock::new(Arc::new(Block::new_head(1))),
            blocks: RwLock::new(BTreeMap::new()),
            block_count: AtomicU64::new(1),
            block_id_seq: AtomicU64::new(2),
            checkpoint_lock: Mutex::new(()),
            pinned_checkpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Number of live blocks, head included.
    pub fn num_blocks(&self) -> u64 {
        self.block_count.load(Ordering::SeqCst)
    }

    /// Inserts an entry. A key may map to multiple values; entries with equal
    /// keys keep insertion order.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        let mut block = self.locate_start(&key);
        loop {
            let mut data = block.data.write();
            if data.detached {
                // pruned under us, the map no longer knows this block
                drop(data);
                block = self.locate_start(&key);
                continue;
            }
            if let Some(next) = data.next.clone() {
                // a concurrent split may have moved the key range right
                if next.min_key().is_some_and(|mk| *mk <= key) {
                    drop(data);
                    block = next;
                    continue;
                }
            }
            if !data.loaded {
                self.load_block(&block, &mut data)?;
            }
            let at = data.entries.partition_point(|(k, _)| k <= &key);
            data.entries.insert(at, (key, value));
            data.size = data.entries.len();
            data.dirty = true;
            if data.size > self.max_block_size {
                self.split_block(&block, &mut data);
            }
            return Ok(());
        }
    }

    /// Returns every value stored under `key`, in insertion order.
    pub fn search(&self, key: &K) -> Result<Vec<V>> {
        let mut result = Vec::new();
        let mut block = self.locate_start(key);
        loop {
            let next = {
                let data = self.read_block(&block)?;
                let lo = data.entries.partition_point(|(k, _)| k < key);
                let hi = data.entries.partition_point(|(k, _)| k <= key);
                for (_, v) in &data.entries[lo..hi] {
                    result.push(v.clone());
                }
                data.next.clone()
            };
            match next {
                // entries for one key may continue in the successor
                Some(n) if n.min_key().is_some_and(|mk| mk <= key) => block = n,
                _ => break,
            }
        }
        Ok(result)
    }

    /// Lazily streams the values of every entry with `lo <= key <= hi`, in
    /// key order. Blocks are visited one at a time, loading on demand.
    pub fn range_search(&self, lo: &K, hi: &K) -> RangeScan<'_, K, V, S> {
        RangeScan {
            index: self,
            lo: lo.clone(),
            hi: hi.clone(),
            current: Some(self.locate_start(lo)),
            buffered: Vec::new().into_iter(),
        }
    }

    /// Convenience wrapper collecting [`Self::range_search`] into a vector.
    pub fn range_query(&self, lo: &K, hi: &K) -> Result<Vec<V>> {
        self.range_search(lo, hi).collect()
    }

    /// Removes the first entry matching `(key, value)`. Returns whether an
    /// entry was removed; absence is not an error. Emptied non-head blocks
    /// keep their boundary until the next checkpoint prunes them.
    pub fn delete(&self, key: &K, value: &V) -> Result<bool> {
        let mut block = self.locate_start(key);
        loop {
            let mut data = block.data.write();
            if data.detached {
                drop(data);
                block = self.locate_start(key);
                continue;
            }
            if !data.loaded {
                self.load_block(&block, &mut data)?;
            }
            let lo = data.entries.partition_point(|(k, _)| k < key);
            let hi = data.entries.partition_point(|(k, _)| k <= key);
            if let Some(off) = data.entries[lo..hi].iter().position(|(_, v)| v == value) {
                data.entries.remove(lo + off);
                data.size = data.entries.len();
                data.dirty = true;
                return Ok(true);
            }
            let next = data.next.clone();
            drop(data);
            match next {
                Some(n) if n.min_key().is_some_and(|mk| *mk <= *key) => block = n,
                _ => return Ok(false),
            }
        }
    }

    /// Persists every dirty block and returns the manifest describing the
    /// on-disk state. Runs concurrently with reads and mutations: each block
    /// is locked only while it is serialized, and mutations resume behind the
    /// walk. Empty, unpinned non-head blocks are pruned on the way.
    pub fn checkpoint(&self) -> Result<BlockRangeIndexMetadata<K>> {
        let _serialize_checkpoints = self.checkpoint_lock.lock();
        let mut manifest = Vec::new();

        let head = self.head.read().clone();
        let mut prev_block = head;
        let mut prev = prev_block.data.write_arc();
        self.persist_block(&prev_block, &mut prev, &mut manifest)?;

        loop {
            let Some(cur_block) = prev.next.clone() else {
                break;
            };
            let mut cur = cur_block.data.write_arc();
            if cur.size == 0 && !cur_block.is_pinned() {
                // prune: the predecessor's range extends over the gap; the
                // chain link survives on the detached block for walkers
                // already holding it
                prev.next = cur.next.clone();
                cur.detached = true;
                cur.entries = Vec::new();
                cur.loaded = true;
                cur.dirty = false;
                drop(cur);
                self.remove_from_block_map(&cur_block);
                self.block_count.fetch_sub(1, Ordering::SeqCst);
                tracing::debug!(block_id = cur_block.block_id(), "pruned empty block at checkpoint");
                continue;
            }
            self.persist_block(&cur_block, &mut cur, &mut manifest)?;
            prev = cur;
            prev_block = cur_block;
        }
        drop(prev);

        tracing::debug!(blocks = manifest.len(), "block range index checkpoint complete");
        Ok(BlockRangeIndexMetadata { blocks: manifest })
    }

    /// Takes a checkpoint and pins it under `sequence_number`: its pages are
    /// excluded from [`Self::reclaimable_pages`] until
    /// [`Self::unpin_checkpoint`] releases them.
    pub fn checkpoint_pinned(
        &self,
        sequence_number: LogSequenceNumber,
    ) -> Result<BlockRangeIndexMetadata<K>> {
        let metadata = self.checkpoint()?;
        let mut pinned = self.pinned_checkpoints.lock();
        match pinned.entry(sequence_number) {
            hashbrown::hash_map::Entry::Occupied(mut entry) => {
                let (count, stored) = entry.get_mut();
                *count += 1;
                *stored = metadata.clone();
            }
            hashbrown::hash_map::Entry::Vacant(entry) => {
                entry.insert((1, metadata.clone()));
            }
        }
        Ok(metadata)
    }

    pub fn unpin_checkpoint(&self, sequence_number: LogSequenceNumber) {
        let mut pinned = self.pinned_checkpoints.lock();
        match pinned.get_mut(&sequence_number) {
            Some((count, _)) if *count > 1 => *count -= 1,
            Some(_) => {
                pinned.remove(&sequence_number);
            }
            None => {
                tracing::warn!(%sequence_number, "unpin of unknown checkpoint ignored");
            }
        }
    }

    /// Pages of `previous` superseded by `current` that no pinned checkpoint
    /// still references; safe to reclaim once `current` is durable.
    pub fn reclaimable_pages(
        &self,
        previous: &BlockRangeIndexMetadata<K>,
        current: &BlockRangeIndexMetadata<K>,
    ) -> Vec<u64> {
        let superseded = previous.superseded_pages(current);
        let pinned = self.pinned_checkpoints.lock();
        superseded
            .into_iter()
            .filter(|page_id| {
                !pinned
                    .values()
                    .any(|(_, metadata)| metadata.blocks.iter().any(|b| b.page_id == *page_id))
            })
            .collect()
    }

    /// Drops the entry lists of every clean, unpinned block that has a
    /// persisted page to reload from. Dirty or pinned blocks stay resident.
    pub fn unload_all_blocks(&self) {
        let mut block = Some(self.head.read().clone());
        let mut unloaded = 0u64;
        while let Some(b) = block {
            let mut data = b.data.write();
            if data.loaded
                && !data.dirty
                && !data.detached
                && !b.is_pinned()
                && data.page_id != UNALLOCATED_PAGE
            {
                data.entries = Vec::new();
                data.loaded = false;
                unloaded += 1;
            }
            block = data.next.clone();
        }
        tracing::debug!(unloaded, "unloaded block entry lists");
    }

    /// Rebuilds the block map and chain from a checkpoint manifest without
    /// loading any entries; blocks load lazily on first access.
    pub fn boot(&self, metadata: &BlockRangeIndexMetadata<K>) -> Result<()> {
        if let Some(first) = metadata.blocks.first() {
            ensure!(
                first.min_key.is_none(),
                "corrupted index manifest: first block is not the head"
            );
        }

        let mut map = BTreeMap::new();
        let mut head: Option<Arc<Block<K, V>>> = None;
        let mut max_id = 0u64;
        let mut next: Option<Arc<Block<K, V>>> = None;
        // manifest entries are in chain order; build back to front so each
        // block is created with its successor in hand
        for bm in metadata.blocks.iter().rev() {
            ensure!(
                bm.page_id != UNALLOCATED_PAGE || bm.size == 0,
                "corrupted index manifest: block {} has {} entries but no page",
                bm.block_id,
                bm.size
            );
            let block = Arc::new(Block::from_manifest(
                bm.block_id,
                bm.min_key.clone(),
                bm.page_id,
                bm.size,
                next.clone(),
            ));
            max_id = max_id.max(bm.block_id);
            match &bm.min_key {
                None => {
                    ensure!(
                        head.is_none(),
                        "corrupted index manifest: more than one head block"
                    );
                    head = Some(block.clone());
                }
                Some(k) => {
                    // walking backwards, the leftmost duplicate ends up
                    // owning the map slot
                    map.insert(k.clone(), block.clone());
                }
            }
            next = Some(block);
        }

        let count = metadata.blocks.len().max(1) as u64;
        let head = match head {
            Some(h) => h,
            None => Arc::new(Block::new_head(max_id + 1)),
        };
        let next_seq = max_id.max(head.block_id()) + 1;

        let old_head = {
            let mut head_slot = self.head.write();
            let mut blocks = self.blocks.write();
            let old = head_slot.clone();
            *head_slot = head;
            *blocks = map;
            self.block_count.store(count, Ordering::SeqCst);
            self.block_id_seq.store(next_seq, Ordering::SeqCst);
            old
        };
        self.detach_chain(old_head);

        tracing::info!(blocks = count, "booted block range index from manifest");
        Ok(())
    }

    /// Discards every entry and resets the index to a single empty head
    /// block. Pages already persisted are left to the caller to reclaim.
    pub fn truncate(&self) {
        let old_head = {
            let mut head_slot = self.head.write();
            let mut blocks = self.blocks.write();
            let old = head_slot.clone();
            *head_slot = Arc::new(Block::new_head(
                self.block_id_seq.fetch_add(1, Ordering::SeqCst),
            ));
            blocks.clear();
            self.block_count.store(1, Ordering::SeqCst);
            old
        };
        self.detach_chain(old_head);
    }

    // Marks a replaced chain detached so in-flight walkers drain over empty
    // blocks and mutators retry through the block map.
    fn detach_chain(&self, chain_head: Arc<Block<K, V>>) {
        let mut block = Some(chain_head);
        while let Some(b) = block {
            let mut data = b.data.write();
            data.entries = Vec::new();
            data.size = 0;
            data.loaded = true;
            data.dirty = false;
            data.detached = true;
            block = data.next.clone();
        }
    }

    fn locate_start(&self, key: &K) -> Arc<Block<K, V>> {
        {
            let blocks = self.blocks.read();
            // strictly below: blocks whose min_key equals the search key are
            // approached from the left so duplicates spanning a split
            // boundary are all visited
            if let Some((_, block)) = blocks.range::<K, _>(..key).next_back() {
                return block.clone();
            }
        }
        self.head.read().clone()
    }

    /// Shared read access to a block's entries, loading them first if needed.
    /// Concurrent loaders coordinate through the block lock: one performs the
    /// I/O, the rest observe the installed entries.
    fn read_block<'a>(
        &self,
        block: &'a Block<K, V>,
    ) -> Result<RwLockReadGuard<'a, BlockData<K, V>>> {
        {
            let data = block.data.read();
            if data.loaded {
                return Ok(data);
            }
        }
        let mut data = block.data.write();
        if !data.loaded {
            self.load_block(block, &mut data)?;
        }
        Ok(RwLockWriteGuard::downgrade(data))
    }

    fn load_block(&self, block: &Block<K, V>, data: &mut BlockData<K, V>) -> Result<()> {
        debug_assert!(!data.loaded);
        if data.page_id == UNALLOCATED_PAGE {
            data.loaded = true;
            return Ok(());
        }
        block.pin();
        let loaded = self.storage.load_data_page(data.page_id);
        block.unpin();
        let entries = loaded.wrap_err_with(|| {
            format!(
                "failed to load data page {} for block {}",
                data.page_id,
                block.block_id()
            )
        })?;
        data.size = entries.len();
        data.entries = entries;
        data.loaded = true;
        Ok(())
    }

    // Caller holds the block's write lock; the entry run exceeds
    // max_block_size by exactly one.
    fn split_block(&self, block: &Block<K, V>, data: &mut BlockData<K, V>) {
        let mid = data.entries.len().div_ceil(2);
        let upper = data.entries.split_off(mid);
        let new_min = upper[0].0.clone();
        let new_id = self.block_id_seq.fetch_add(1, Ordering::SeqCst);
        let new_block = Arc::new(Block::for_split(
            new_id,
            new_min.clone(),
            upper,
            data.next.clone(),
        ));

        data.size = data.entries.len();
        data.dirty = true;
        data.next = Some(new_block.clone());

        let mut blocks = self.blocks.write();
        // a block with this min_key may already exist after a split on a
        // duplicate-key boundary; the newcomer stays chain-only
        blocks.entry(new_min).or_insert(new_block);
        drop(blocks);
        self.block_count.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(
            block_id = block.block_id(),
            new_block_id = new_id,
            "split overflowing block"
        );
    }

    fn persist_block(
        &self,
        block: &Block<K, V>,
        data: &mut BlockData<K, V>,
        manifest: &mut Vec<BlockMetadata<K>>,
    ) -> Result<()> {
        if data.dirty {
            debug_assert!(data.loaded);
            let page_id = self
                .storage
                .create_data_page(data.entries.clone())
                .wrap_err_with(|| {
                    format!("failed to persist entries of block {}", block.block_id())
                })?;
            data.page_id = page_id;
            data.dirty = false;
        }
        manifest.push(BlockMetadata {
            block_id: block.block_id(),
            min_key: block.min_key().cloned(),
            page_id: data.page_id,
            size: data.size,
        });
        Ok(())
    }

    fn remove_from_block_map(&self, block: &Arc<Block<K, V>>) {
        let Some(min_key) = block.min_key() else {
            return;
        };
        let mut blocks = self.blocks.write();
        // a chain-only twin shares this min_key; only the slot owner leaves
        if blocks.get(min_key).is_some_and(|b| Arc::ptr_eq(b, block)) {
            blocks.remove(min_key);
        }
    }
}

impl<K, V, S> Drop for BlockRangeIndex<K, V, S> {
    fn drop(&mut self) {
        // sever the chain iteratively so a long index does not recurse
        // through every block's destructor
        let mut block = Some(self.head.get_mut().clone());
        while let Some(b) = block {
            block = b.data.write().next.take();
        }
    }
}

/// Lazy streaming cursor over a key range; see
/// [`BlockRangeIndex::range_search`].
pub struct RangeScan<'a, K, V, S> {
    index: &'a BlockRangeIndex<K, V, S>,
    lo: K,
    hi: K,
    current: Option<Arc<Block<K, V>>>,
    buffered: std::vec::IntoIter<V>,
}

impl<K, V, S> Iterator for RangeScan<'_, K, V, S>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
    S: IndexDataStorage<K, V>,
{
    type Item = Result<V>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.lo > self.hi {
            return None;
        }
        loop {
            if let Some(value) = self.buffered.next() {
                return Some(Ok(value));
            }
            let block = self.current.take()?;
            if block.min_key().is_some_and(|mk| *mk > self.hi) {
                return None;
            }
            let data = match self.index.read_block(&block) {
                Ok(data) => data,
                Err(e) => return Some(Err(e)),
            };
            let from = data.entries.partition_point(|(k, _)| *k < self.lo);
            let to = data.entries.partition_point(|(k, _)| *k <= self.hi);
            let values: Vec<V> = data.entries[from..to]
                .iter()
                .map(|(_, v)| v.clone())
                .collect();
            self.current = data.next.clone();
            drop(data);
            self.buffered = values.into_iter();
        }
    }
}
