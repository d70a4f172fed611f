//! Core types shared by every junkNAS crate.
//!
//! A file on a junkNAS mount is a sequence of fixed-size chunks addressed by
//! the SHA-256 of their contents, plus a per-file manifest mapping chunk
//! index to hash. This crate holds the pieces everything else builds on:
//! the hash helpers, the manifest codec, and the `"10G"`-style size parser.

pub mod hash;
pub mod manifest;
pub mod size;

pub use hash::{from_hex, is_hex64, sha256, sha256_hex, to_hex, Hash};
pub use manifest::{Manifest, ManifestError};
pub use size::parse_storage_size;

/// Fixed chunk size. Every chunk buffer is exactly this long; the final
/// chunk of a file is zero-padded up to it before hashing.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Suffix appended to a logical file name to form its manifest path.
pub const META_SUFFIX: &str = ".__jnkmeta";

/// Reserved directory name holding chunk and refcount storage.
pub const INTERNAL_DIR: &str = ".jnk";
