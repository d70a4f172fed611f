//! On-disk chunk storage for junkNAS.
//!
//! Two pieces live here:
//!
//! - [`ChunkStore`]: content-addressed chunk files, sharded 256 ways by the
//!   first two hex chars of the hash, striped round-robin across multiple
//!   backing roots, with a soft byte quota.
//! - [`RefIndex`]: per-chunk refcount files under the primary root that
//!   decide when a chunk can be deleted.

pub mod chunk_store;
pub mod refcount;

pub use chunk_store::{ChunkStore, StoreError};
pub use refcount::RefIndex;
