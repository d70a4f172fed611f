//! Reference-count index driving chunk garbage collection.
//!
//! One ASCII-integer file per live chunk under
//! `<primary>/.jnk/refs/<aa>/<hash>.ref`, mutated under an exclusive
//! advisory file lock. Absence of a refcount file means *unknown*, not
//! zero: decrements against an absent record are discarded so a chunk is
//! never deleted on guesswork.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use fs2::FileExt;
use junknas_core::INTERNAL_DIR;
use tracing::debug;

use crate::chunk_store::{ChunkStore, StoreError};

const REFS_SUBDIR: &str = "refs";

/// Refcount index rooted at the primary backing dir. Holds the chunk store
/// so a count reaching zero can unlink the chunk from every root.
pub struct RefIndex {
    refs_dir: PathBuf,
    store: Arc<ChunkStore>,
}

impl RefIndex {
    pub fn open(store: Arc<ChunkStore>) -> Result<Self, StoreError> {
        let refs_dir = store.primary().join(INTERNAL_DIR).join(REFS_SUBDIR);
        fs::create_dir_all(&refs_dir)?;
        Ok(Self { refs_dir, store })
    }

    fn ref_path(&self, hash_hex: &str) -> PathBuf {
        self.refs_dir
            .join(&hash_hex[..2])
            .join(format!("{hash_hex}.ref"))
    }

    /// Current refcount, or `None` when no record exists (unknown).
    pub fn count(&self, hash_hex: &str) -> Option<u64> {
        let text = fs::read_to_string(self.ref_path(hash_hex)).ok()?;
        text.trim().parse().ok()
    }

    /// Apply a single signed delta to a chunk's refcount.
    ///
    /// Flow: open-create, lock exclusive, read. A decrement that finds an
    /// empty fresh record unwinds (unlink the empty file, succeed) instead
    /// of deleting chunks based on unknown state. A count reaching zero
    /// removes the record and unlinks the chunk from every store root.
    pub fn apply_delta(&self, hash_hex: &str, delta: i64) -> Result<(), StoreError> {
        if delta == 0 {
            return Ok(());
        }

        let path = self.ref_path(hash_hex);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;

        let had_record = file.metadata()?.len() > 0;
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        let current: i64 = text.trim().parse().unwrap_or(0).max(0);

        if delta < 0 && !had_record {
            let _ = fs2::FileExt::unlock(&file);
            drop(file);
            let _ = fs::remove_file(&path);
            return Ok(());
        }

        let next = (current + delta).max(0);

        if next == 0 {
            let _ = fs2::FileExt::unlock(&file);
            drop(file);
            let _ = fs::remove_file(&path);
            self.store.remove(hash_hex);
            debug!(chunk = &hash_hex[..12], "refcount hit zero, chunk deleted");
            return Ok(());
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(format!("{next}\n").as_bytes())?;
        file.sync_all()?;
        let _ = fs2::FileExt::unlock(&file);
        Ok(())
    }

    /// Apply the refcount changes implied by rewriting a manifest whose
    /// hash multiset was `orig` and is now `new`.
    ///
    /// Both lists keep duplicates (a file referencing one chunk at several
    /// indices holds it that many times). Sort both, walk in parallel, and
    /// apply one combined delta per distinct hash — correct under index
    /// rearrangement and same-chunk dedup in O(|orig| + |new|).
    pub fn apply_diff(&self, orig: &[String], new: &[String]) -> Result<(), StoreError> {
        let mut old_sorted: Vec<&str> = orig.iter().map(String::as_str).collect();
        let mut new_sorted: Vec<&str> = new.iter().map(String::as_str).collect();
        old_sorted.sort_unstable();
        new_sorted.sort_unstable();

        let (mut i, mut j) = (0usize, 0usize);
        while i < old_sorted.len() || j < new_sorted.len() {
            let cur = match (old_sorted.get(i), new_sorted.get(j)) {
                (Some(o), Some(n)) => {
                    if o <= n {
                        *o
                    } else {
                        *n
                    }
                }
                (Some(o), None) => *o,
                (None, Some(n)) => *n,
                (None, None) => break,
            };

            let mut old_count = 0i64;
            while i < old_sorted.len() && old_sorted[i] == cur {
                old_count += 1;
                i += 1;
            }
            let mut new_count = 0i64;
            while j < new_sorted.len() && new_sorted[j] == cur {
                new_count += 1;
                j += 1;
            }

            self.apply_delta(cur, new_count - old_count)?;
        }
        Ok(())
    }

}
