//! # Storage Module
//!
//! The persistence layer under the index structures:
//!
//! - `aligned`: direct-I/O block writer producing sector-aligned batches
//! - `index_file`: file-per-page store for immutable index data pages
//! - the [`IndexDataStorage`] trait, the contract both index structures
//!   persist through
//!
//! ## Page Model
//!
//! A data page is an immutable, ordered list of key-value entries identified
//! by a 64-bit id. Ids are assigned monotonically by the store; zero is
//! reserved for "unallocated" and is never returned. Once `create_data_page`
//! returns, the page is readable through `load_data_page` for the lifetime of
//! the store; durability across restarts is the business of the checkpoint
//! protocol layered above (see `brin`).
//!
//! ## Implementations
//!
//! - [`MemoryIndexStorage`]: heap-backed store for tests and volatile
//!   indexes.
//! - [`index_file::FileIndexStorage`]: directory of `<page_id>.page` files,
//!   each written through the aligned writer with CRC-validated framing.

mod aligned;
mod index_file;

pub use aligned::AlignedBlockWriter;
pub use index_file::{BytesEntryCodec, EntryCodec, FileIndexStorage, PageFileHeader};

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{eyre, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

/// Page id reserved for "no page allocated yet".
pub const UNALLOCATED_PAGE: u64 = 0;

/// Abstract store of immutable index data pages.
///
/// Both operations may fail with a storage error; implementations never
/// retry. `create_data_page` returns a fresh id strictly greater than any id
/// previously returned by the same store.
pub trait IndexDataStorage<K, V>: Send + Sync {
    fn create_data_page(&self, entries: Vec<(K, V)>) -> Result<u64>;

    fn load_data_page(&self, page_id: u64) -> Result<Vec<(K, V)>>;

    /// Reclaims a page superseded by a later checkpoint. Dropping an unknown
    /// page is an error: reclaim lists are computed from manifests and must
    /// not drift from the store.
    fn drop_data_page(&self, page_id: u64) -> Result<()>;
}

/// Heap-backed page store.
///
/// Used by unit tests and as the backing store of volatile indexes that are
/// rebuilt at boot.
pub struct MemoryIndexStorage<K, V> {
    pages: Mutex<HashMap<u64, Vec<(K, V)>>>,
    next_page_id: AtomicU64,
}

impl<K, V> MemoryIndexStorage<K, V> {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            next_page_id: AtomicU64::new(UNALLOCATED_PAGE + 1),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }
}

impl<K, V> Default for MemoryIndexStorage<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> IndexDataStorage<K, V> for MemoryIndexStorage<K, V>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn create_data_page(&self, entries: Vec<(K, V)>) -> Result<u64> {
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);
        self.pages.lock().insert(page_id, entries);
        Ok(page_id)
    }

    fn load_data_page(&self, page_id: u64) -> Result<Vec<(K, V)>> {
        self.pages
            .lock()
            .get(&page_id)
            .cloned()
            .ok_or_else(|| eyre!("no such data page: {}", page_id))
    }

    fn drop_data_page(&self, page_id: u64) -> Result<()> {
        self.pages
            .lock()
            .remove(&page_id)
            .map(|_| ())
            .ok_or_else(|| eyre!("no such data page: {}", page_id))
    }
}
