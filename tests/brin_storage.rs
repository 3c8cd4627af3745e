//! # Block Range Index Storage Tests
//!
//! End-to-end coverage of the index/storage seam:
//! 1. Split, checkpoint, unload and boot over in-memory storage
//! 2. The same cycle over the file-backed page store, including a real
//!    close-and-reopen of the page directory and a manifest round-trip
//!    through its binary form
//! 3. Page reclamation across successive checkpoints
//! 4. Parallel writers and readers while blocks split and checkpoint

use std::sync::Arc;

use brindb::brin::BlockRangeIndexMetadata;
use brindb::storage::{BytesEntryCodec, FileIndexStorage};
use brindb::{BlockRangeIndex, IndexDataStorage, MemoryIndexStorage, PostCheckpointAction};
use tempfile::tempdir;

#[test]
fn split_checkpoint_unload_boot_cycle() {
    let storage = Arc::new(MemoryIndexStorage::new());
    let index = BlockRangeIndex::new(2, storage.clone());

    index.put(1, "a".to_string()).unwrap();
    index.put(2, "b".to_string()).unwrap();
    index.put(3, "c".to_string()).unwrap();

    let metadata = index.checkpoint().unwrap();
    assert_eq!(metadata.blocks.len() as u64, index.num_blocks());
    assert_eq!(index.num_blocks(), 2);

    index.unload_all_blocks();
    assert_eq!(index.search(&1).unwrap(), vec!["a"]);
    assert_eq!(index.search(&2).unwrap(), vec!["b"]);
    assert_eq!(index.search(&3).unwrap(), vec!["c"]);
    assert_eq!(index.num_blocks(), 2);

    let after_boot: BlockRangeIndex<i32, String, _> = BlockRangeIndex::new(2, storage);
    after_boot.boot(&metadata).unwrap();
    assert_eq!(after_boot.search(&1).unwrap(), vec!["a"]);
    assert_eq!(after_boot.search(&2).unwrap(), vec!["b"]);
    assert_eq!(after_boot.search(&3).unwrap(), vec!["c"]);
    assert_eq!(after_boot.num_blocks(), 2);
}

#[test]
fn file_backed_index_survives_reopen() {
    let dir = tempdir().unwrap();
    let pages_dir = dir.path().join("pages");

    let key = |i: u32| format!("key{:05}", i).into_bytes();
    let value = |i: u32| format!("value{:05}", i).into_bytes();

    let manifest_bytes;
    {
        let storage = Arc::new(FileIndexStorage::open(&pages_dir, BytesEntryCodec).unwrap());
        let index = BlockRangeIndex::new(8, storage);
        for i in 0..100 {
            index.put(key(i), value(i)).unwrap();
        }
        let metadata = index.checkpoint().unwrap();
        manifest_bytes = metadata.serialize();
    }

    // a fresh process: reopen the page directory, boot from the manifest
    let storage = Arc::new(FileIndexStorage::open(&pages_dir, BytesEntryCodec).unwrap());
    let index: BlockRangeIndex<Vec<u8>, Vec<u8>, _> = BlockRangeIndex::new(8, storage);
    let metadata = BlockRangeIndexMetadata::deserialize(&manifest_bytes).unwrap();
    index.boot(&metadata).unwrap();

    for i in 0..100 {
        assert_eq!(index.search(&key(i)).unwrap(), vec![value(i)]);
    }
    assert!(index.search(&key(100)).unwrap().is_empty());

    let in_range: Vec<Vec<u8>> = index
        .range_query(&key(10), &key(19))
        .unwrap();
    assert_eq!(in_range.len(), 10);
    assert_eq!(in_range[0], value(10));
    assert_eq!(in_range[9], value(19));

    // the rebooted index keeps accepting writes and checkpoints
    index.put(key(100), value(100)).unwrap();
    let next = index.checkpoint().unwrap();
    assert_eq!(next.blocks.len() as u64, index.num_blocks());
}

#[test]
fn superseded_pages_are_reclaimable_through_post_checkpoint_actions() {
    let dir = tempdir().unwrap();
    let storage = Arc::new(FileIndexStorage::open(dir.path(), BytesEntryCodec).unwrap());
    let index = BlockRangeIndex::new(4, storage.clone());

    for i in 0..40u32 {
        index
            .put(format!("k{:03}", i).into_bytes(), vec![i as u8])
            .unwrap();
    }
    let first = index.checkpoint().unwrap();

    for i in 0..10u32 {
        index
            .put(format!("k{:03}", i).into_bytes(), vec![0xFF, i as u8])
            .unwrap();
    }
    let second = index.checkpoint().unwrap();

    let superseded = first.superseded_pages(&second);
    assert!(!superseded.is_empty());
    for action in PostCheckpointAction::drop_pages(superseded) {
        action.execute(storage.as_ref()).unwrap();
    }

    // every page the new manifest references is still loadable
    for block in &second.blocks {
        let entries = storage.load_data_page(block.page_id).unwrap();
        assert_eq!(entries.len(), block.size);
    }
    // and the index still answers from the surviving pages
    index.unload_all_blocks();
    for i in 0..10u32 {
        let found = index.search(&format!("k{:03}", i).into_bytes()).unwrap();
        assert_eq!(found.len(), 2, "k{:03} has original and overwrite", i);
    }
}

#[test]
fn deletes_empty_blocks_then_checkpoint_prunes_and_reboots() {
    let storage = Arc::new(MemoryIndexStorage::new());
    let index = BlockRangeIndex::new(2, storage.clone());

    for i in 0..20 {
        index.put(i, format!("v{}", i)).unwrap();
    }
    for i in 5..15 {
        assert!(index.delete(&i, &format!("v{}", i)).unwrap());
    }
    let metadata = index.checkpoint().unwrap();

    let rebooted: BlockRangeIndex<i32, String, _> = BlockRangeIndex::new(2, storage);
    rebooted.boot(&metadata).unwrap();
    for i in 0..20 {
        let expected: Vec<String> = if (5..15).contains(&i) {
            Vec::new()
        } else {
            vec![format!("v{}", i)]
        };
        assert_eq!(rebooted.search(&i).unwrap(), expected);
    }
}

#[test]
fn concurrent_load_after_unload_reads_each_page_once_per_block() {
    use std::thread;

    let storage = Arc::new(MemoryIndexStorage::new());
    let index = Arc::new(BlockRangeIndex::new(4, storage));
    for i in 0..64 {
        index.put(i, format!("v{}", i)).unwrap();
    }
    index.checkpoint().unwrap();
    index.unload_all_blocks();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let index = index.clone();
            thread::spawn(move || {
                for i in 0..64 {
                    assert_eq!(index.search(&i).unwrap(), vec![format!("v{}", i)]);
                }
            })
        })
        .collect();
    for r in readers {
        r.join().unwrap();
    }
}

#[test]
fn parallel_writers_with_checkpoints_lose_nothing() {
    use std::thread;

    let dir = tempdir().unwrap();
    let storage = Arc::new(FileIndexStorage::open(dir.path(), BytesEntryCodec).unwrap());
    let index = Arc::new(BlockRangeIndex::new(8, storage.clone()));

    let writers: Vec<_> = (0..4u32)
        .map(|t| {
            let index = index.clone();
            thread::spawn(move || {
                for i in 0..200u32 {
                    let key = format!("w{}-{:04}", t, i).into_bytes();
                    index.put(key, vec![t as u8, i as u8]).unwrap();
                }
            })
        })
        .collect();
    let checkpointer = {
        let index = index.clone();
        thread::spawn(move || {
            for _ in 0..10 {
                index.checkpoint().unwrap();
            }
        })
    };
    for w in writers {
        w.join().unwrap();
    }
    checkpointer.join().unwrap();

    let metadata = index.checkpoint().unwrap();
    let rebooted: BlockRangeIndex<Vec<u8>, Vec<u8>, _> = BlockRangeIndex::new(8, storage);
    rebooted.boot(&metadata).unwrap();
    for t in 0..4u32 {
        for i in 0..200u32 {
            let key = format!("w{}-{:04}", t, i).into_bytes();
            assert_eq!(
                rebooted.search(&key).unwrap(),
                vec![vec![t as u8, i as u8]],
                "missing entry for thread {} iteration {}",
                t,
                i
            );
        }
    }
}
