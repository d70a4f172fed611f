//! Per-open file handles with staged dirty chunks.
//!
//! Writes never touch the chunk store directly. Each touched chunk gets a
//! full 1 MiB staging buffer inside the handle; everything is hashed and
//! committed in one pass when the handle is released.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use junknas_core::{Manifest, CHUNK_SIZE};

/// State of one open file. Single-owner; the kernel hands each request the
/// handle id it got back from open/create.
pub struct FileHandle {
    /// Manifest path of the opened file.
    pub meta_path: PathBuf,
    /// Current in-memory view, mutated by write/truncate.
    pub manifest: Manifest,
    /// Immutable snapshot of the manifest hashes at open, with duplicates.
    /// Release diffs this against the final state to move refcounts.
    pub orig_hashes: Vec<String>,
    /// Staged chunk buffers by index; each exactly `CHUNK_SIZE` long.
    pub dirty: HashMap<u64, Vec<u8>>,
    /// Whether anything changed since open.
    pub modified: bool,
}

impl FileHandle {
    pub fn new(meta_path: PathBuf, manifest: Manifest) -> Self {
        let orig_hashes = manifest.hash_list();
        Self {
            meta_path,
            manifest,
            orig_hashes,
            dirty: HashMap::new(),
            modified: false,
        }
    }

    /// Drop staged buffers at or beyond `first_dropped` (truncate shrink).
    pub fn drop_dirty_from(&mut self, first_dropped: u64) {
        self.dirty.retain(|idx, _| *idx < first_dropped);
    }

    /// Dirty chunk indices in ascending order, for deterministic commits.
    pub fn dirty_indices(&self) -> Vec<u64> {
        let mut indices: Vec<u64> = self.dirty.keys().copied().collect();
        indices.sort_unstable();
        indices
    }
}

/// Process-wide table of open handles keyed by an opaque id.
pub struct HandleTable {
    next_fh: AtomicU64,
    handles: Mutex<HashMap<u64, FileHandle>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, handle: FileHandle) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap().insert(fh, handle);
        fh
    }

    pub fn with_mut<T>(
        &self,
        fh: u64,
        f: impl FnOnce(&mut FileHandle) -> T,
    ) -> Option<T> {
        let mut map = self.handles.lock().unwrap();
        map.get_mut(&fh).map(f)
    }

    pub fn remove(&self, fh: u64) -> Option<FileHandle> {
        self.handles.lock().unwrap().remove(&fh)
    }
}

/// Allocate a zeroed staging buffer for one chunk.
pub fn zero_chunk() -> Vec<u8> {
    vec![0u8; CHUNK_SIZE]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_table_insert_and_remove() {
        let table = HandleTable::new();
        let fh = table.insert(FileHandle::new(PathBuf::from("/x"), Manifest::empty()));
        assert!(table.with_mut(fh, |h| h.modified = true).is_some());
        assert!(table.remove(fh).unwrap().modified);
        assert!(table.remove(fh).is_none());
    }

    #[test]
    fn test_orig_snapshot_taken_at_construction() {
        let mut manifest = Manifest::empty();
        manifest.set_chunk(0, "a".repeat(64));
        let mut handle = FileHandle::new(PathBuf::from("/x"), manifest);

        handle.manifest.set_chunk(1, "b".repeat(64));
        assert_eq!(handle.orig_hashes, vec!["a".repeat(64)]);
    }

    #[test]
    fn test_drop_dirty_from() {
        let mut handle = FileHandle::new(PathBuf::from("/x"), Manifest::empty());
        handle.dirty.insert(0, zero_chunk());
        handle.dirty.insert(3, zero_chunk());
        handle.drop_dirty_from(1);
        assert!(handle.dirty.contains_key(&0));
        assert!(!handle.dirty.contains_key(&3));
    }
}
