//! Sharded content-addressed chunk files.
//!
//! Layout per backing root: `<root>/.jnk/chunks/sha256/<aa>/<hash>` where
//! `<aa>` is the first two hex chars of the hash. New chunks go to the
//! backing roots round-robin; lookups scan every root.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use junknas_core::{is_hex64, sha256_hex, CHUNK_SIZE, INTERNAL_DIR};
use tracing::{debug, warn};

const STORE_SUBDIR: &str = "chunks/sha256";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("chunk not found: {0}")]
    NotFound(String),
    #[error("chunk integrity fault: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("invalid chunk hash: {0}")]
    InvalidHash(String),
}

/// Multi-root content-addressed chunk store.
pub struct ChunkStore {
    roots: Vec<PathBuf>,
    quota_bytes: u64,
    rr_next: AtomicUsize,
}

impl ChunkStore {
    /// Open a store over the given backing roots, creating the shard layout.
    /// The first root is the primary. `quota_bytes == 0` means unlimited.
    pub fn open(roots: Vec<PathBuf>, quota_bytes: u64) -> Result<Self, StoreError> {
        assert!(!roots.is_empty(), "chunk store needs at least one root");
        for root in &roots {
            fs::create_dir_all(root.join(INTERNAL_DIR).join(STORE_SUBDIR))?;
        }
        Ok(Self {
            roots,
            quota_bytes,
            rr_next: AtomicUsize::new(0),
        })
    }

    /// The primary backing root (hosts manifests and the refcount index).
    pub fn primary(&self) -> &Path {
        &self.roots[0]
    }

    /// Configured quota in bytes; 0 means unlimited.
    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Path a chunk would occupy inside `root`.
    pub fn chunk_path_in(root: &Path, hash_hex: &str) -> PathBuf {
        root.join(INTERNAL_DIR)
            .join(STORE_SUBDIR)
            .join(&hash_hex[..2])
            .join(hash_hex)
    }

    /// Locate an existing chunk file across roots.
    pub fn find(&self, hash_hex: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| Self::chunk_path_in(root, hash_hex))
            .find(|p| p.is_file())
    }

    /// Whether any root holds the chunk.
    pub fn has(&self, hash_hex: &str) -> bool {
        self.find(hash_hex).is_some()
    }

    /// Store a chunk under its hash unless some root already has it.
    ///
    /// Quota is a soft cap checked only for new unique chunks: the put is
    /// admitted iff the resulting total stays within the quota. The write
    /// goes through `<path>.tmp` + fsync + rename and never overwrites.
    pub fn put_if_absent(&self, hash_hex: &str, data: &[u8]) -> Result<(), StoreError> {
        if !is_hex64(hash_hex) {
            return Err(StoreError::InvalidHash(hash_hex.to_string()));
        }
        if self.has(hash_hex) {
            return Ok(());
        }

        if self.quota_bytes != 0 {
            let used = self.usage_bytes()?;
            if used + data.len() as u64 > self.quota_bytes {
                warn!(
                    used,
                    quota = self.quota_bytes,
                    chunk = &hash_hex[..12],
                    "chunk store quota exceeded"
                );
                return Err(StoreError::QuotaExceeded);
            }
        }

        let target = self.rr_next.fetch_add(1, Ordering::Relaxed) % self.roots.len();
        let path = Self::chunk_path_in(&self.roots[target], hash_hex);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }

        debug!(chunk = &hash_hex[..12], root = target, len = data.len(), "stored chunk");
        Ok(())
    }

    /// Read a chunk and verify its contents hash to its name.
    ///
    /// A mismatch (tampered or truncated file) is an integrity fault; the
    /// caller surfaces it as `EIO` and never sees the bad bytes.
    pub fn read_verified(&self, hash_hex: &str) -> Result<Vec<u8>, StoreError> {
        let path = self
            .find(hash_hex)
            .ok_or_else(|| StoreError::NotFound(hash_hex.to_string()))?;

        let mut file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len > CHUNK_SIZE as u64 {
            return Err(StoreError::Integrity {
                expected: hash_hex.to_string(),
                actual: format!("oversized chunk file ({len} bytes)"),
            });
        }

        let mut data = Vec::with_capacity(len as usize);
        file.read_to_end(&mut data)?;

        let actual = sha256_hex(&data);
        if actual != hash_hex {
            warn!(expected = hash_hex, actual = %actual, "chunk integrity fault");
            return Err(StoreError::Integrity {
                expected: hash_hex.to_string(),
                actual,
            });
        }
        Ok(data)
    }

    /// Remove a chunk from every root. Missing files are ignored.
    pub fn remove(&self, hash_hex: &str) {
        for root in &self.roots {
            let _ = fs::remove_file(Self::chunk_path_in(root, hash_hex));
        }
    }

    /// Total bytes of chunk files across all roots, by walking every shard
    /// directory. Simple and correct; revalidated on every quota check.
    pub fn usage_bytes(&self) -> Result<u64, StoreError> {
        let mut total = 0u64;
        for root in &self.roots {
            let store_root = root.join(INTERNAL_DIR).join(STORE_SUBDIR);
            let shards = match fs::read_dir(&store_root) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for shard in shards.flatten() {
                let Ok(files) = fs::read_dir(shard.path()) else {
                    continue;
                };
                for file in files.flatten() {
                    if let Ok(meta) = file.metadata() {
                        if meta.is_file() {
                            total += meta.len();
                        }
                    }
                }
            }
        }
        Ok(total)
    }
}
