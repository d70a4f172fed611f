//! fuser shim: maps kernel inodes and file handles onto [`JunkFs`] paths.
//!
//! Deliberately disabled surfaces: symlinks, xattrs, chmod/chown, device
//! and FIFO nodes, ioctls, hardlinks. fuser's defaults answer those with
//! `ENOSYS`, which is exactly the contract.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use junknas_core::CHUNK_SIZE;
use tracing::{debug, info};

use crate::fs::{EntryAttr, EntryKind, FsError, JunkFs};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

/// Bidirectional inode ↔ path table. The kernel speaks inodes; the core
/// speaks paths.
struct InodeTable {
    next: AtomicU64,
    to_path: RwLock<HashMap<u64, String>>,
    to_ino: RwLock<HashMap<String, u64>>,
}

impl InodeTable {
    fn new() -> Self {
        let mut to_path = HashMap::new();
        let mut to_ino = HashMap::new();
        to_path.insert(ROOT_INO, "/".to_string());
        to_ino.insert("/".to_string(), ROOT_INO);
        Self {
            next: AtomicU64::new(2),
            to_path: RwLock::new(to_path),
            to_ino: RwLock::new(to_ino),
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.to_path.read().unwrap().get(&ino).cloned()
    }

    fn get_or_create(&self, path: &str) -> u64 {
        if let Some(ino) = self.to_ino.read().unwrap().get(path) {
            return *ino;
        }
        let ino = self.next.fetch_add(1, Ordering::SeqCst);
        self.to_path.write().unwrap().insert(ino, path.to_string());
        self.to_ino.write().unwrap().insert(path.to_string(), ino);
        ino
    }

    fn forget_subtree(&self, path: &str) {
        let mut to_path = self.to_path.write().unwrap();
        let mut to_ino = self.to_ino.write().unwrap();
        let prefix = format!("{path}/");
        let doomed: Vec<String> = to_ino
            .keys()
            .filter(|p| *p == path || p.starts_with(&prefix))
            .cloned()
            .collect();
        for p in doomed {
            if let Some(ino) = to_ino.remove(&p) {
                to_path.remove(&ino);
            }
        }
    }

    fn rename_subtree(&self, old_path: &str, new_path: &str) {
        let mut to_path = self.to_path.write().unwrap();
        let mut to_ino = self.to_ino.write().unwrap();

        let prefix = format!("{old_path}/");
        let moved: Vec<(String, u64)> = to_ino
            .iter()
            .filter(|(p, _)| *p == old_path || p.starts_with(&prefix))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();
        if moved.is_empty() {
            return;
        }

        // Anything previously living at the destination is replaced.
        let new_prefix = format!("{new_path}/");
        let replaced: Vec<String> = to_ino
            .keys()
            .filter(|p| *p == new_path || p.starts_with(&new_prefix))
            .cloned()
            .collect();
        for path in replaced {
            if let Some(ino) = to_ino.remove(&path) {
                to_path.remove(&ino);
            }
        }

        for (old, ino) in moved {
            to_ino.remove(&old);
            let suffix = old.strip_prefix(old_path).unwrap_or("");
            let renamed = format!("{new_path}{suffix}");
            to_ino.insert(renamed.clone(), ino);
            to_path.insert(ino, renamed);
        }
    }
}

/// fuser adapter over the shared filesystem core.
pub struct JnkFuse {
    fs: Arc<JunkFs>,
    inodes: InodeTable,
}

impl JnkFuse {
    pub fn new(fs: Arc<JunkFs>) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
        }
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, i32> {
        let parent_path = self.inodes.path_of(parent).ok_or(libc::ENOENT)?;
        let name = name.to_str().ok_or(libc::EINVAL)?;
        if parent_path == "/" {
            Ok(format!("/{name}"))
        } else {
            Ok(format!("{parent_path}/{name}"))
        }
    }

    fn build_attr(&self, ino: u64, entry: &EntryAttr) -> FileAttr {
        let now = SystemTime::now();
        let (kind, perm, nlink) = match entry.kind {
            EntryKind::Directory => (FileType::Directory, 0o755, 2),
            EntryKind::File => (FileType::RegularFile, 0o644, 1),
        };
        FileAttr {
            ino,
            size: entry.size,
            blocks: entry.size.div_ceil(512),
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind,
            perm,
            nlink,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: CHUNK_SIZE as u32,
            flags: 0,
        }
    }

    fn attr_for_path(&self, path: &str) -> Result<(u64, FileAttr), i32> {
        let entry = self.fs.getattr(path).map_err(|e| e.errno())?;
        let ino = self.inodes.get_or_create(path);
        Ok((ino, self.build_attr(ino, &entry)))
    }
}

impl Filesystem for JnkFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.attr_for_path(&path) {
            Ok((_ino, attr)) => reply.entry(&TTL, &attr, 0),
            Err(code) => reply.error(code),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.attr_for_path(&path) {
            Ok((_ino, attr)) => reply.attr(&TTL, &attr),
            Err(code) => reply.error(code),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if let Some(new_size) = size {
            // Truncate requires an open handle.
            let Some(fh) = fh else {
                return reply.error(libc::EACCES);
            };
            if let Err(err) = self.fs.truncate(fh, new_size) {
                return reply.error(err.errno());
            }
        }
        let Some(path) = self.inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.attr_for_path(&path) {
            Ok((_ino, mut attr)) => {
                if let Some(new_size) = size {
                    // The manifest is rewritten on release; report the
                    // handle's view now.
                    attr.size = new_size;
                }
                reply.attr(&TTL, &attr)
            }
            Err(code) => reply.error(code),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        if let Err(err) = self.fs.mkdir(&path) {
            return reply.error(err.errno());
        }
        match self.attr_for_path(&path) {
            Ok((_ino, attr)) => reply.entry(&TTL, &attr, 0),
            Err(code) => reply.error(code),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.fs.unlink(&path) {
            Ok(()) => {
                self.inodes.forget_subtree(&path);
                reply.ok()
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.fs.rmdir(&path) {
            Ok(()) => {
                self.inodes.forget_subtree(&path);
                reply.ok()
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        let to = match self.child_path(newparent, newname) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        match self.fs.rename(&from, &to) {
            Ok(()) => {
                self.inodes.rename_subtree(&from, &to);
                reply.ok()
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.fs.open(&path) {
            Ok(fh) => reply.opened(fh, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(code) => return reply.error(code),
        };
        let fh = match self.fs.create(&path) {
            Ok(fh) => fh,
            Err(err) => return reply.error(err.errno()),
        };
        match self.attr_for_path(&path) {
            Ok((_ino, attr)) => reply.created(&TTL, &attr, 0, fh, 0),
            Err(code) => reply.error(code),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            return reply.error(libc::EINVAL);
        }
        match self.fs.read(fh, offset as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(err.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            return reply.error(libc::EINVAL);
        }
        match self.fs.write(fh, offset as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(FsError::BadHandle) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let listing = match self.fs.readdir(&path) {
            Ok(listing) => listing,
            Err(err) => return reply.error(err.errno()),
        };

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ROOT_INO, FileType::Directory, "..".to_string()),
        ];
        for (name, kind) in listing {
            let child = if path == "/" {
                format!("/{name}")
            } else {
                format!("{path}/{name}")
            };
            let child_ino = self.inodes.get_or_create(&child);
            let file_type = match kind {
                EntryKind::Directory => FileType::Directory,
                EntryKind::File => FileType::RegularFile,
            };
            entries.push((child_ino, file_type, name));
        }

        for (i, (entry_ino, file_type, name)) in
            entries.into_iter().enumerate().skip(offset as usize)
        {
            if reply.add(entry_ino, (i + 1) as i64, file_type, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        match self.fs.statfs() {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.blocks_free,
                stats.blocks_available,
                0,
                0,
                stats.block_size,
                255,
                stats.block_size,
            ),
            Err(err) => reply.error(err.errno()),
        }
    }
}


/// Mount the filesystem in the background; dropping the returned session
/// unmounts it.
pub fn mount(
    fs: Arc<JunkFs>,
    mountpoint: &Path,
) -> std::io::Result<fuser::BackgroundSession> {
    std::fs::create_dir_all(mountpoint)?;
    let options = [
        MountOption::FSName("junknas".to_string()),
        MountOption::AutoUnmount,
    ];
    info!(mountpoint = %mountpoint.display(), "mounting filesystem");
    let session = fuser::spawn_mount2(JnkFuse::new(fs), mountpoint, &options)?;
    debug!("filesystem mounted");
    Ok(session)
}
