//! Text manifest codec.
//!
//! A manifest is the only durable per-file metadata:
//!
//! ```text
//! size 3145728
//! chunk 0 9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! chunk 2 2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae
//! ```
//!
//! A missing chunk index denotes a sparse hole that reads as zeros. Only
//! lines matching the two shapes above are parsed; anything else is skipped.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::{hash::is_hex64, CHUNK_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt manifest: {0}")]
    Corrupt(String),
}

/// Parsed per-file manifest: logical size plus ordered chunk hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Byte length of the logical file.
    pub size: u64,
    /// Hash per chunk index; `None` marks a sparse hole.
    pub chunks: Vec<Option<String>>,
}

impl Manifest {
    /// Create an empty manifest (size 0, no chunks).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of chunk slots a file of `size` bytes spans.
    pub fn needed_chunks(size: u64) -> u64 {
        size.div_ceil(CHUNK_SIZE as u64)
    }

    /// Parse manifest text. The `size` header must be first and well formed;
    /// malformed chunk lines are skipped.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| ManifestError::Corrupt("empty manifest".into()))?;

        let size = header
            .strip_prefix("size ")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| ManifestError::Corrupt(format!("bad size header: {header:?}")))?;

        let mut chunks: Vec<Option<String>> = Vec::new();
        for line in lines {
            let Some(rest) = line.strip_prefix("chunk ") else {
                continue;
            };
            let mut parts = rest.split_whitespace();
            let Some(idx) = parts.next().and_then(|v| v.parse::<usize>().ok()) else {
                continue;
            };
            let Some(hash) = parts.next() else { continue };
            if parts.next().is_some() || !is_hex64(hash) {
                continue;
            }
            if idx >= chunks.len() {
                chunks.resize(idx + 1, None);
            }
            chunks[idx] = Some(hash.to_ascii_lowercase());
        }

        Ok(Self { size, chunks })
    }

    /// Render back to the text format. Sparse slots are omitted.
    pub fn render(&self) -> String {
        let mut out = format!("size {}\n", self.size);
        for (idx, hash) in self.chunks.iter().enumerate() {
            if let Some(hash) = hash {
                out.push_str(&format!("chunk {idx} {hash}\n"));
            }
        }
        out
    }

    /// Load and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Write atomically: `<path>.tmp`, fsync, rename.
    pub fn store(&self, path: &Path) -> Result<(), ManifestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("__jnkmeta.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(self.render().as_bytes())?;
        file.sync_all()?;
        drop(file);
        if let Err(err) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    /// All present hashes, in index order, duplicates preserved.
    ///
    /// A file referencing the same chunk at several indices must hold that
    /// many refcounts, so callers diff these as multisets.
    pub fn hash_list(&self) -> Vec<String> {
        self.chunks.iter().flatten().cloned().collect()
    }

    /// Drop all hash entries at or beyond `first_dropped`.
    pub fn drop_chunks_from(&mut self, first_dropped: u64) {
        for slot in self.chunks.iter_mut().skip(first_dropped as usize) {
            *slot = None;
        }
    }

    /// Record `hash` at chunk index `idx`, growing the table as needed.
    pub fn set_chunk(&mut self, idx: u64, hash: String) {
        let idx = idx as usize;
        if idx >= self.chunks.len() {
            self.chunks.resize(idx + 1, None);
        }
        self.chunks[idx] = Some(hash);
    }

    /// Hash at chunk index `idx`, if committed.
    pub fn chunk(&self, idx: u64) -> Option<&str> {
        self.chunks.get(idx as usize)?.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let hash_a = "a".repeat(64);
        let hash_b = "b".repeat(64);
        let text = format!("size 2097152\nchunk 0 {hash_a}\nchunk 1 {hash_b}\n");
        let manifest = Manifest::parse(&text).unwrap();
        assert_eq!(manifest.size, 2097152);
        assert_eq!(manifest.chunk(0), Some(hash_a.as_str()));
        assert_eq!(manifest.chunk(1), Some(hash_b.as_str()));
        assert_eq!(manifest.render(), text);
    }

    #[test]
    fn test_parse_sparse_indices() {
        let hash = "c".repeat(64);
        let text = format!("size 3145728\nchunk 2 {hash}\n");
        let manifest = Manifest::parse(&text).unwrap();
        assert_eq!(manifest.chunks.len(), 3);
        assert_eq!(manifest.chunk(0), None);
        assert_eq!(manifest.chunk(1), None);
        assert_eq!(manifest.chunk(2), Some(hash.as_str()));
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let hash = "d".repeat(64);
        let text = format!(
            "size 100\ngarbage\nchunk x {hash}\nchunk 0 nothex\nchunk 0 {hash} extra\nchunk 0 {hash}\n"
        );
        let manifest = Manifest::parse(&text).unwrap();
        assert_eq!(manifest.hash_list(), vec![hash]);
    }

    #[test]
    fn test_parse_bad_header_is_corrupt() {
        assert!(matches!(
            Manifest::parse("chunk 0 aa\n"),
            Err(ManifestError::Corrupt(_))
        ));
        assert!(matches!(
            Manifest::parse("size banana\n"),
            Err(ManifestError::Corrupt(_))
        ));
        assert!(matches!(Manifest::parse(""), Err(ManifestError::Corrupt(_))));
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.__jnkmeta");

        let mut manifest = Manifest::empty();
        manifest.size = 42;
        manifest.set_chunk(0, "e".repeat(64));
        manifest.store(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        // No temp file left behind
        assert!(!path.with_extension("__jnkmeta.tmp").exists());
    }

    #[test]
    fn test_hash_list_preserves_duplicates() {
        let hash = "f".repeat(64);
        let mut manifest = Manifest::empty();
        manifest.set_chunk(0, hash.clone());
        manifest.set_chunk(1, hash.clone());
        assert_eq!(manifest.hash_list(), vec![hash.clone(), hash]);
    }

    #[test]
    fn test_needed_chunks() {
        assert_eq!(Manifest::needed_chunks(0), 0);
        assert_eq!(Manifest::needed_chunks(1), 1);
        assert_eq!(Manifest::needed_chunks(CHUNK_SIZE as u64), 1);
        assert_eq!(Manifest::needed_chunks(CHUNK_SIZE as u64 + 1), 2);
    }

    #[test]
    fn test_drop_chunks_from() {
        let mut manifest = Manifest::empty();
        manifest.set_chunk(0, "a".repeat(64));
        manifest.set_chunk(1, "b".repeat(64));
        manifest.set_chunk(2, "c".repeat(64));
        manifest.drop_chunks_from(1);
        assert_eq!(manifest.hash_list(), vec!["a".repeat(64)]);
    }
}
