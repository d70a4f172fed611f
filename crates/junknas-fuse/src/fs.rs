//! Path-based filesystem core.
//!
//! User view: `/foo/bar.txt`. Backing dir: directories are passthrough,
//! a regular file is a manifest at `<backing>/foo/bar.txt.__jnkmeta`, and
//! its bytes live in the chunk store addressed by hash.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use junknas_core::{sha256_hex, Manifest, ManifestError, CHUNK_SIZE, INTERNAL_DIR, META_SUFFIX};
use junknas_store::{ChunkStore, RefIndex, StoreError};
use tracing::{debug, warn};

use crate::handle::{zero_chunk, FileHandle, HandleTable};

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("invalid path")]
    InvalidPath,
    #[error("not found")]
    NotFound,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotDirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("corrupt manifest")]
    CorruptManifest,
    #[error("integrity fault")]
    Integrity,
    #[error("out of space")]
    OutOfSpace,
    #[error("bad file handle")]
    BadHandle,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Errno for the fuser adapter.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::InvalidPath => libc::EINVAL,
            FsError::NotFound => libc::ENOENT,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::CorruptManifest | FsError::Integrity => libc::EIO,
            FsError::OutOfSpace => libc::ENOSPC,
            FsError::BadHandle => libc::EBADF,
            FsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => FsError::NotFound,
            StoreError::Integrity { .. } | StoreError::InvalidHash(_) => FsError::Integrity,
            StoreError::QuotaExceeded => FsError::OutOfSpace,
            StoreError::Io(io) => FsError::Io(io),
        }
    }
}

impl From<ManifestError> for FsError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Corrupt(_) => FsError::CorruptManifest,
            ManifestError::Io(io) => {
                if io.kind() == std::io::ErrorKind::NotFound {
                    FsError::NotFound
                } else {
                    FsError::Io(io)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    Directory,
    File,
}

/// What getattr reports for an entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryAttr {
    pub kind: EntryKind,
    pub size: u64,
}

/// statfs figures, in blocks of `block_size`.
#[derive(Debug, Clone, Copy)]
pub struct FsStats {
    pub block_size: u32,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
}

/// Reject user paths that touch internal naming: `.`/`..` components, the
/// `.jnk` store dir, and anything containing the manifest suffix.
pub fn is_safe_user_path(path: &str) -> bool {
    if !path.starts_with('/') {
        return false;
    }
    if path == "/" {
        return true;
    }
    path[1..].split('/').all(|comp| {
        !comp.is_empty()
            && comp != "."
            && comp != ".."
            && comp != INTERNAL_DIR
            && !comp.contains(META_SUFFIX)
    })
}

/// The filesystem core shared by the fuser adapter and the web service.
pub struct JunkFs {
    backing_dir: PathBuf,
    store: Arc<ChunkStore>,
    refs: RefIndex,
    handles: HandleTable,
}

impl JunkFs {
    /// Open over an existing chunk store. The backing dir (primary root)
    /// hosts the manifests and passthrough directories.
    pub fn new(store: Arc<ChunkStore>) -> Result<Self, FsError> {
        let backing_dir = store.primary().to_path_buf();
        fs::create_dir_all(&backing_dir)?;
        let refs = RefIndex::open(store.clone())?;
        Ok(Self {
            backing_dir,
            store,
            refs,
            handles: HandleTable::new(),
        })
    }

    /// Map a user path to `(real_path, manifest_path)`.
    fn resolve(&self, path: &str) -> Result<(PathBuf, PathBuf), FsError> {
        if !is_safe_user_path(path) {
            return Err(FsError::InvalidPath);
        }
        let rel = path.trim_start_matches('/');
        let real = self.backing_dir.join(rel);
        let meta = if rel.is_empty() {
            PathBuf::new()
        } else {
            self.backing_dir.join(format!("{rel}{META_SUFFIX}"))
        };
        Ok((real, meta))
    }

    // ------------------------------------------------------------------
    // Directory operations
    // ------------------------------------------------------------------

    pub fn getattr(&self, path: &str) -> Result<EntryAttr, FsError> {
        let (real, meta) = self.resolve(path)?;

        if path == "/" || real.is_dir() {
            return Ok(EntryAttr {
                kind: EntryKind::Directory,
                size: 0,
            });
        }
        if meta.is_file() {
            let manifest = Manifest::load(&meta)?;
            return Ok(EntryAttr {
                kind: EntryKind::File,
                size: manifest.size,
            });
        }
        Err(FsError::NotFound)
    }

    /// Logical directory listing: `.jnk` hidden, manifest suffix stripped.
    pub fn readdir(&self, path: &str) -> Result<Vec<(String, EntryKind)>, FsError> {
        let (real, _) = self.resolve(path)?;
        let entries = fs::read_dir(&real).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                FsError::NotFound
            } else {
                FsError::Io(err)
            }
        })?;

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == INTERNAL_DIR {
                continue;
            }
            if let Some(logical) = name.strip_suffix(META_SUFFIX) {
                out.push((logical.to_string(), EntryKind::File));
                continue;
            }
            if name.contains(META_SUFFIX) {
                // Transient rename residue; never part of the logical view.
                continue;
            }
            let kind = if entry.path().is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            out.push((name, kind));
        }
        out.sort();
        Ok(out)
    }

    pub fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let (real, _) = self.resolve(path)?;
        if path == "/" {
            return Err(FsError::InvalidPath);
        }
        fs::create_dir_all(real.parent().ok_or(FsError::InvalidPath)?)?;
        fs::create_dir(&real)?;
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> Result<(), FsError> {
        let (real, _) = self.resolve(path)?;
        if !real.is_dir() {
            return Err(FsError::NotDirectory);
        }
        fs::remove_dir(&real).map_err(|err| match err.raw_os_error() {
            Some(code) if code == libc::ENOTEMPTY => FsError::NotEmpty,
            _ => FsError::Io(err),
        })
    }

    // ------------------------------------------------------------------
    // File lifecycle
    // ------------------------------------------------------------------

    /// Create a file: empty manifest on disk, handle with empty snapshot.
    pub fn create(&self, path: &str) -> Result<u64, FsError> {
        let (real, meta) = self.resolve(path)?;
        if meta.as_os_str().is_empty() {
            return Err(FsError::InvalidPath);
        }
        if real.is_dir() {
            return Err(FsError::IsDirectory);
        }

        let manifest = Manifest::empty();
        manifest.store(&meta)?;
        Ok(self.handles.insert(FileHandle::new(meta, manifest)))
    }

    /// Open an existing file; loads the manifest and snapshots its hashes.
    pub fn open(&self, path: &str) -> Result<u64, FsError> {
        let (real, meta) = self.resolve(path)?;
        if real.is_dir() {
            return Err(FsError::IsDirectory);
        }
        if !meta.is_file() {
            return Err(FsError::NotFound);
        }
        let manifest = Manifest::load(&meta)?;
        Ok(self.handles.insert(FileHandle::new(meta, manifest)))
    }

    pub fn read(&self, fh: u64, offset: u64, len: usize) -> Result<Vec<u8>, FsError> {
        self.handles
            .with_mut(fh, |handle| self.read_locked(handle, offset, len))
            .ok_or(FsError::BadHandle)?
    }

    fn read_locked(
        &self,
        handle: &mut FileHandle,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FsError> {
        if offset >= handle.manifest.size {
            return Ok(Vec::new());
        }
        let len = len.min((handle.manifest.size - offset) as usize);
        let mut out = vec![0u8; len];

        let mut done = 0usize;
        while done < len {
            let abs = offset + done as u64;
            let idx = abs / CHUNK_SIZE as u64;
            let in_off = (abs % CHUNK_SIZE as u64) as usize;
            let want = (len - done).min(CHUNK_SIZE - in_off);

            if let Some(buf) = handle.dirty.get(&idx) {
                out[done..done + want].copy_from_slice(&buf[in_off..in_off + want]);
                done += want;
                continue;
            }

            match handle.manifest.chunk(idx) {
                // Missing hash denotes a sparse hole that reads as zeros,
                // and `out` is already zeroed.
                None => {}
                Some(hash) => {
                    let data = self.store.read_verified(hash)?;
                    // A chunk file may be shorter than the full window;
                    // bytes beyond its length read as zeros.
                    if in_off < data.len() {
                        let avail = data.len() - in_off;
                        let take = want.min(avail);
                        out[done..done + take].copy_from_slice(&data[in_off..in_off + take]);
                    }
                }
            }
            done += want;
        }

        Ok(out)
    }

    pub fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        self.handles
            .with_mut(fh, |handle| self.write_locked(handle, offset, data))
            .ok_or(FsError::BadHandle)?
    }

    fn write_locked(
        &self,
        handle: &mut FileHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<usize, FsError> {
        let mut done = 0usize;
        while done < data.len() {
            let abs = offset + done as u64;
            let idx = abs / CHUNK_SIZE as u64;
            let in_off = (abs % CHUNK_SIZE as u64) as usize;
            let want = (data.len() - done).min(CHUNK_SIZE - in_off);

            if !handle.dirty.contains_key(&idx) {
                // First touch of this chunk: stage its current contents
                // (store read, zero-padded) or a zero buffer.
                let mut buf = zero_chunk();
                if let Some(hash) = handle.manifest.chunk(idx) {
                    let existing = self.store.read_verified(hash)?;
                    buf[..existing.len()].copy_from_slice(&existing);
                }
                handle.dirty.insert(idx, buf);
            }

            let buf = handle.dirty.get_mut(&idx).expect("staged above");
            buf[in_off..in_off + want].copy_from_slice(&data[done..done + want]);
            handle.modified = true;
            done += want;
        }

        let end = offset + data.len() as u64;
        if end > handle.manifest.size {
            handle.manifest.size = end;
            handle.modified = true;
        }
        Ok(data.len())
    }

    /// Shrink drops hashes and staged buffers past the end; grow is a
    /// sparse size bump only.
    pub fn truncate(&self, fh: u64, new_size: u64) -> Result<(), FsError> {
        self.handles
            .with_mut(fh, |handle| {
                if new_size < handle.manifest.size {
                    let needed = Manifest::needed_chunks(new_size);
                    handle.manifest.drop_chunks_from(needed);
                    handle.drop_dirty_from(needed);
                    handle.manifest.size = new_size;
                    handle.modified = true;
                } else if new_size > handle.manifest.size {
                    handle.manifest.size = new_size;
                    handle.modified = true;
                }
            })
            .ok_or(FsError::BadHandle)
    }

    /// Commit staged chunks, rewrite the manifest, then settle refcounts.
    ///
    /// The manifest rewrite is the linearization point: if it fails, the
    /// refcounts stay untouched. A failed chunk put aborts the whole close.
    pub fn release(&self, fh: u64) -> Result<(), FsError> {
        let mut handle = self.handles.remove(fh).ok_or(FsError::BadHandle)?;

        for idx in handle.dirty_indices() {
            let buf = handle.dirty.get(&idx).expect("index from table");
            let hash = sha256_hex(buf);
            self.store.put_if_absent(&hash, buf)?;
            handle.manifest.set_chunk(idx, hash);
            handle.modified = true;
        }
        handle.dirty.clear();

        if handle.modified {
            if let Err(err) = handle.manifest.store(&handle.meta_path) {
                warn!(
                    meta = %handle.meta_path.display(),
                    %err,
                    "manifest rewrite failed, refcounts left untouched"
                );
                return Err(err.into());
            }
            let new_hashes = handle.manifest.hash_list();
            self.refs.apply_diff(&handle.orig_hashes, &new_hashes)?;
            debug!(meta = %handle.meta_path.display(), size = handle.manifest.size, "released");
        }
        Ok(())
    }

    /// Drop all references held by the file, then remove the manifest.
    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        let (_, meta) = self.resolve(path)?;
        if !meta.is_file() {
            return Err(FsError::NotFound);
        }

        if let Ok(manifest) = Manifest::load(&meta) {
            self.refs.apply_diff(&manifest.hash_list(), &[])?;
        }
        fs::remove_file(&meta)?;
        Ok(())
    }

    /// Files rename their manifest; directories rename as a whole subtree.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let (from_real, from_meta) = self.resolve(from)?;
        let (to_real, to_meta) = self.resolve(to)?;

        if from_real.is_dir() {
            if let Some(parent) = to_real.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&from_real, &to_real)?;
            return Ok(());
        }

        if !from_meta.is_file() {
            return Err(FsError::NotFound);
        }
        if let Some(parent) = to_meta.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from_meta, &to_meta)?;
        Ok(())
    }

    /// Quota-aware statfs: with a quota set, total/free derive from it and
    /// current chunk usage; otherwise report the backing filesystem.
    pub fn statfs(&self) -> Result<FsStats, FsError> {
        let quota = self.store.quota_bytes();
        if quota != 0 {
            let used = self.store.usage_bytes()?;
            let free = quota.saturating_sub(used);
            let bs = 4096u64;
            return Ok(FsStats {
                block_size: bs as u32,
                blocks: quota / bs,
                blocks_free: free / bs,
                blocks_available: free / bs,
            });
        }
        backing_statvfs(&self.backing_dir)
    }
}

fn backing_statvfs(path: &Path) -> Result<FsStats, FsError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path =
        CString::new(path.as_os_str().as_bytes()).map_err(|_| FsError::InvalidPath)?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(FsError::Io(std::io::Error::last_os_error()));
    }
    Ok(FsStats {
        block_size: stat.f_frsize as u32,
        blocks: stat.f_blocks as u64,
        blocks_free: stat.f_bfree as u64,
        blocks_available: stat.f_bavail as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_hygiene() {
        assert!(is_safe_user_path("/"));
        assert!(is_safe_user_path("/foo/bar.txt"));
        assert!(!is_safe_user_path("foo"));
        assert!(!is_safe_user_path("/foo/../bar"));
        assert!(!is_safe_user_path("/./foo"));
        assert!(!is_safe_user_path("/.jnk"));
        assert!(!is_safe_user_path("/a/.jnk/b"));
        assert!(!is_safe_user_path("/file.__jnkmeta"));
        assert!(!is_safe_user_path("/file.__jnkmeta.bak"));
        assert!(!is_safe_user_path("/a//b"));
    }

    #[test]
    fn test_resolve_rejects_unsafe() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Arc::new(ChunkStore::open(vec![dir.path().to_path_buf()], 0).unwrap());
        let fs = JunkFs::new(store).unwrap();
        assert!(matches!(fs.getattr("/../etc"), Err(FsError::InvalidPath)));
        assert!(matches!(fs.create("/x.__jnkmeta"), Err(FsError::InvalidPath)));
    }
}
