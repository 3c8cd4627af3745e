//! # Index Module
//!
//! The primary-key access path and its checkpoint protocol:
//!
//! - [`KeyToPageIndex`]: contract mapping primary-key bytes to the id of the
//!   data page holding the row; the hot lookup path of every statement.
//! - [`ConcurrentKeyToPageMap`]: lock-sharded in-memory implementation.
//! - [`LogSequenceNumber`]: position in the write-ahead log a checkpoint is
//!   taken at.
//! - [`PostCheckpointAction`]: deferred reclamation work a checkpoint hands
//!   back to the caller, to be executed only after the checkpoint is
//!   durable.
//! - [`IndexOperation`]: the shapes of index access a scanner supports.

mod key_to_page;

pub use key_to_page::ConcurrentKeyToPageMap;

use std::path::PathBuf;

use eyre::{Result, WrapErr};

use crate::storage::IndexDataStorage;

/// Position in the write-ahead log: ledger id plus offset within the ledger.
/// Totally ordered; checkpoints are identified by the sequence number they
/// were taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogSequenceNumber {
    pub ledger_id: i64,
    pub offset: i64,
}

impl LogSequenceNumber {
    /// Sentinel ordering before every real log position.
    pub const START_OF_TIME: LogSequenceNumber = LogSequenceNumber {
        ledger_id: -1,
        offset: -1,
    };

    pub fn new(ledger_id: i64, offset: i64) -> Self {
        Self { ledger_id, offset }
    }

    pub fn after(&self, other: &LogSequenceNumber) -> bool {
        self > other
    }
}

impl std::fmt::Display for LogSequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.ledger_id, self.offset)
    }
}

/// Deferred reclamation handed back by a checkpoint. The caller runs these
/// only after the checkpoint that produced them is durable; running them
/// earlier can destroy the pages a crash recovery would need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCheckpointAction {
    /// Drop a data page superseded by a newer checkpoint.
    DropIndexPage { page_id: u64 },
    /// Delete a file that no checkpoint references anymore.
    DeleteFile { path: PathBuf },
}

impl PostCheckpointAction {
    pub fn execute<K, V, S: IndexDataStorage<K, V>>(&self, storage: &S) -> Result<()> {
        match self {
            PostCheckpointAction::DropIndexPage { page_id } => storage
                .drop_data_page(*page_id)
                .wrap_err_with(|| format!("post-checkpoint drop of page {} failed", page_id)),
            PostCheckpointAction::DeleteFile { path } => std::fs::remove_file(path)
                .wrap_err_with(|| format!("post-checkpoint delete of '{}' failed", path.display())),
        }
    }

    /// Reclamation list for the pages an older manifest references that the
    /// newer one no longer does.
    pub fn drop_pages(superseded: Vec<u64>) -> Vec<PostCheckpointAction> {
        superseded
            .into_iter()
            .map(|page_id| PostCheckpointAction::DropIndexPage { page_id })
            .collect()
    }
}

/// Access shape a scanner is asked to serve. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOperation {
    FullScan,
    Seek {
        key: Vec<u8>,
    },
    Range {
        min: Option<Vec<u8>>,
        max: Option<Vec<u8>>,
    },
}

impl IndexOperation {
    pub fn accepts(&self, key: &[u8]) -> bool {
        match self {
            IndexOperation::FullScan => true,
            IndexOperation::Seek { key: wanted } => wanted.as_slice() == key,
            IndexOperation::Range { min, max } => {
                min.as_deref().is_none_or(|lo| key >= lo)
                    && max.as_deref().is_none_or(|hi| key <= hi)
            }
        }
    }
}

/// Snapshot cursor over `(key, page_id)` pairs.
pub type KeyToPageScanner = Box<dyn Iterator<Item = (Vec<u8>, u64)> + Send>;

/// Concurrent map from primary-key bytes to data page id.
///
/// All data-plane operations are safe under concurrent callers, and the
/// conditional put is linearizable per key. Scanners observe a point-in-time
/// snapshot and never block writers.
pub trait KeyToPageIndex: Send + Sync {
    fn used_memory(&self) -> u64;

    /// Whether the caller must rebuild the mapping from table data at boot.
    fn require_load_at_startup(&self) -> bool;

    fn size(&self) -> u64;

    fn start(&self, sequence_number: LogSequenceNumber, created: bool) -> Result<()>;

    /// Persists whatever the implementation keeps durable and returns the
    /// reclamation work for the caller. `pin` protects the checkpoint's
    /// pages from reclamation until [`Self::unpin_checkpoint`].
    fn checkpoint(
        &self,
        sequence_number: LogSequenceNumber,
        pin: bool,
    ) -> Result<Vec<PostCheckpointAction>>;

    fn unpin_checkpoint(&self, sequence_number: LogSequenceNumber) -> Result<()>;

    /// Unconditional set.
    fn put(&self, key: &[u8], page: u64);

    /// Compare-and-set: applies `new_page` only if the current mapping equals
    /// `expected_page` (`None` = only insert if absent). Returns whether the
    /// update was applied; on `false` the mapping is untouched.
    fn put_if(&self, key: &[u8], new_page: u64, expected_page: Option<u64>) -> bool;

    fn contains_key(&self, key: &[u8]) -> bool;

    fn get(&self, key: &[u8]) -> Option<u64>;

    fn remove(&self, key: &[u8]) -> Option<u64>;

    /// Whether keys of these primary-key column types scan in ascending key
    /// order (their byte encoding sorts like their logical values).
    fn is_sorted_ascending(&self, pk_types: &[i32]) -> bool;

    /// Point-in-time snapshot of the entries accepted by `operation`, in
    /// ascending key order whenever [`Self::is_sorted_ascending`] holds.
    fn scanner(&self, operation: &IndexOperation) -> Result<KeyToPageScanner>;

    fn truncate(&self);

    fn drop_data(&self) -> Result<()>;

    fn close(&self);
}
