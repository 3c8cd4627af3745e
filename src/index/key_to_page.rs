//! # Lock-Sharded Key-to-Page Map
//!
//! In-memory implementation of [`KeyToPageIndex`] backed by 64 independent
//! hash map shards, each behind its own `RwLock`. A single global lock would
//! serialize every statement on the primary-key path; sharding spreads
//! unrelated keys over independent locks, so contention only arises between
//! operations on keys that hash to the same shard.
//!
//! ```text
//! ConcurrentKeyToPageMap
//! ├── Shard 0:  RwLock<HashMap<key, page_id>>
//! ├── Shard 1:  RwLock<HashMap<key, page_id>>
//! ├── ...
//! └── Shard 63: RwLock<HashMap<key, page_id>>
//! ```
//!
//! The conditional put takes the shard's write lock, so compare-and-set is
//! linearizable per key. Scanners copy a snapshot shard by shard without
//! blocking writers; the snapshot is sorted, so scans come back in ascending
//! key order whenever the primary-key encoding is order-preserving.
//!
//! The mapping itself is volatile: it is rebuilt from table data at startup
//! (`require_load_at_startup`), so checkpoints only record pin bookkeeping
//! and hand back no reclamation work.

use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::config::{KEY_TO_PAGE_ENTRY_OVERHEAD, KEY_TO_PAGE_SHARD_COUNT};
use crate::schema::column_types;

use super::{
    IndexOperation, KeyToPageIndex, KeyToPageScanner, LogSequenceNumber, PostCheckpointAction,
};

pub struct ConcurrentKeyToPageMap {
    shards: Vec<RwLock<HashMap<Vec<u8>, u64>>>,
    hasher: hashbrown::DefaultHashBuilder,
    entry_count: AtomicU64,
    used_memory: AtomicU64,
    pinned_checkpoints: Mutex<HashMap<LogSequenceNumber, u32>>,
}

impl ConcurrentKeyToPageMap {
    pub fn new() -> Self {
        Self {
            shards: (0..KEY_TO_PAGE_SHARD_COUNT)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            hasher: hashbrown::DefaultHashBuilder::default(),
            entry_count: AtomicU64::new(0),
            used_memory: AtomicU64::new(0),
            pinned_checkpoints: Mutex::new(HashMap::new()),
        }
    }

    fn shard(&self, key: &[u8]) -> &RwLock<HashMap<Vec<u8>, u64>> {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) & (KEY_TO_PAGE_SHARD_COUNT - 1);
        &self.shards[index]
    }

    fn account_insert(&self, key: &[u8]) {
        self.entry_count.fetch_add(1, Ordering::AcqRel);
        self.used_memory
            .fetch_add(key.len() as u64 + KEY_TO_PAGE_ENTRY_OVERHEAD, Ordering::AcqRel);
    }

    fn account_remove(&self, key: &[u8]) {
        self.entry_count.fetch_sub(1, Ordering::AcqRel);
        self.used_memory
            .fetch_sub(key.len() as u64 + KEY_TO_PAGE_ENTRY_OVERHEAD, Ordering::AcqRel);
    }
}

impl Default for ConcurrentKeyToPageMap {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyToPageIndex for ConcurrentKeyToPageMap {
    fn used_memory(&self) -> u64 {
        self.used_memory.load(Ordering::Acquire)
    }

    fn require_load_at_startup(&self) -> bool {
        true
    }

    fn size(&self) -> u64 {
        self.entry_count.load(Ordering::Acquire)
    }

    fn start(&self, sequence_number: LogSequenceNumber, created: bool) -> Result<()> {
        tracing::debug!(%sequence_number, created, "key-to-page map started");
        Ok(())
    }

    fn checkpoint(
        &self,
        sequence_number: LogSequenceNumber,
        pin: bool,
    ) -> Result<Vec<PostCheckpointAction>> {
        if pin {
            *self
                .pinned_checkpoints
                .lock()
                .entry(sequence_number)
                .or_insert(0) += 1;
        }
        // nothing persisted: the mapping is rebuilt from table data at boot
        Ok(Vec::new())
    }

    fn unpin_checkpoint(&self, sequence_number: LogSequenceNumber) -> Result<()> {
        let mut pinned = self.pinned_checkpoints.lock();
        match pinned.get_mut(&sequence_number) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                pinned.remove(&sequence_number);
            }
            None => {
                tracing::warn!(%sequence_number, "unpin of unknown checkpoint ignored");
            }
        }
        Ok(())
    }

    fn put(&self, key: &[u8], page: u64) {
        let mut shard = self.shard(key).write();
        if shard.insert(key.to_vec(), page).is_none() {
            self.account_insert(key);
        }
    }

    fn put_if(&self, key: &[u8], new_page: u64, expected_page: Option<u64>) -> bool {
        let mut shard = self.shard(key).write();
        match (shard.get_mut(key), expected_page) {
            (None, None) => {
                shard.insert(key.to_vec(), new_page);
                self.account_insert(key);
                true
            }
            (Some(current), Some(expected)) if *current == expected => {
                *current = new_page;
                true
            }
            _ => false,
        }
    }

    fn contains_key(&self, key: &[u8]) -> bool {
        self.shard(key).read().contains_key(key)
    }

    fn get(&self, key: &[u8]) -> Option<u64> {
        self.shard(key).read().get(key).copied()
    }

    fn remove(&self, key: &[u8]) -> Option<u64> {
        let mut shard = self.shard(key).write();
        let removed = shard.remove(key);
        if removed.is_some() {
            self.account_remove(key);
        }
        removed
    }

    fn is_sorted_ascending(&self, pk_types: &[i32]) -> bool {
        // only byte-order-preserving encodings scan in logical order
        pk_types.iter().all(|&t| {
            matches!(
                t,
                column_types::STRING | column_types::NOTNULL_STRING | column_types::BYTEARRAY
            )
        })
    }

    fn scanner(&self, operation: &IndexOperation) -> Result<KeyToPageScanner> {
        let mut snapshot: Vec<(Vec<u8>, u64)> = Vec::new();
        for shard in &self.shards {
            let shard = shard.read();
            snapshot.extend(
                shard
                    .iter()
                    .filter(|(key, _)| operation.accepts(key))
                    .map(|(key, page)| (key.clone(), *page)),
            );
        }
        snapshot.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
        Ok(Box::new(snapshot.into_iter()))
    }

    fn truncate(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
        self.entry_count.store(0, Ordering::Release);
        self.used_memory.store(0, Ordering::Release);
    }

    fn drop_data(&self) -> Result<()> {
        self.truncate();
        Ok(())
    }

    fn close(&self) {}
}
