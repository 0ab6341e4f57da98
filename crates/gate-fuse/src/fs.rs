//! FUSE passthrough filesystem enforcing broker-issued locks.
//!
//! Every mutating operation acquires a write lock for the path(s) it
//! touches before doing the real I/O and releases it afterward; open
//! acquires a lock whose mode matches the requested access and binds it to
//! the resulting file handle so `read`/`write`/`flush`/`release` can find it
//! again without talking to the broker a second time.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow, FUSE_ROOT_ID,
};
use gate_client::{AcquireOutcome, BrokerClient};
use gate_core::Mode;
use log::{debug, error, warn};

use crate::error::AdapterError;

const ATTR_TTL: Duration = Duration::from_secs(1);
const BLOCK_SIZE: u32 = 512;

struct HandleState {
    lock_id: Option<String>,
    path: String,
    file: File,
}

/// Mount-time options, mirroring the environment-configurable knobs of the
/// original broker-client/mount pairing.
pub struct MountOptions {
    pub root: PathBuf,
    pub owner: String,
    pub lease_ms: u64,
    pub acquire_timeout_ms: Option<u64>,
    pub max_hold_ms: Option<u64>,
    pub release_on_flush: bool,
}

pub struct GateFs {
    root: PathBuf,
    client: BrokerClient,
    owner: String,
    lease_ms: u64,
    acquire_timeout_ms: Option<u64>,
    max_hold_ms: Option<u64>,
    release_on_flush: bool,

    inode_to_path: Mutex<HashMap<u64, String>>,
    path_to_inode: Mutex<HashMap<String, u64>>,
    next_inode: Mutex<u64>,
    next_fh: Mutex<u64>,
    handles: Mutex<HashMap<u64, HandleState>>,
}

impl GateFs {
    pub fn new(client: BrokerClient, opts: MountOptions) -> Self {
        let mut inode_to_path = HashMap::new();
        let mut path_to_inode = HashMap::new();
        inode_to_path.insert(FUSE_ROOT_ID, ".".to_string());
        path_to_inode.insert(".".to_string(), FUSE_ROOT_ID);

        Self {
            root: opts.root,
            client,
            owner: opts.owner,
            lease_ms: opts.lease_ms,
            acquire_timeout_ms: opts.acquire_timeout_ms,
            max_hold_ms: opts.max_hold_ms,
            release_on_flush: opts.release_on_flush,
            inode_to_path: Mutex::new(inode_to_path),
            path_to_inode: Mutex::new(path_to_inode),
            next_inode: Mutex::new(FUSE_ROOT_ID + 1),
            next_fh: Mutex::new(0),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn join_path(parent: &str, name: &str) -> String {
        if parent == "." {
            name.to_string()
        } else {
            format!("{parent}/{name}")
        }
    }

    fn get_path(&self, ino: u64) -> Option<String> {
        self.inode_to_path.lock().unwrap().get(&ino).cloned()
    }

    fn get_or_create_inode(&self, path: &str) -> u64 {
        let mut path_to_inode = self.path_to_inode.lock().unwrap();
        if let Some(&ino) = path_to_inode.get(path) {
            return ino;
        }
        let mut next = self.next_inode.lock().unwrap();
        let ino = *next;
        *next += 1;
        path_to_inode.insert(path.to_string(), ino);
        self.inode_to_path.lock().unwrap().insert(ino, path.to_string());
        ino
    }

    /// The lock key for a path is the same relative string used to address
    /// it on disk: the root itself is keyed `"."`, matching the original
    /// implementation's `_lock_key`.
    fn full_path(&self, path_key: &str) -> PathBuf {
        if path_key == "." {
            self.root.clone()
        } else {
            self.root.join(path_key)
        }
    }

    fn is_write_flags(flags: i32) -> bool {
        let write_flags = libc::O_WRONLY | libc::O_RDWR | libc::O_TRUNC | libc::O_APPEND;
        (flags & write_flags) != 0
    }

    fn acquire(&self, path_key: &str, mode: Mode) -> Result<String, AdapterError> {
        let outcome = self.client.acquire(
            path_key,
            mode,
            &self.owner,
            self.acquire_timeout_ms,
            self.lease_ms,
            self.max_hold_ms,
        )?;
        match outcome {
            AcquireOutcome::Granted(lock) => Ok(lock.lock_id),
            AcquireOutcome::TimedOut => Err(AdapterError::Broker(gate_client::ClientError::TimedOut)),
        }
    }

    /// Acquire write locks across several paths in ascending sorted order,
    /// so two operations racing over the same path set never deadlock.
    fn acquire_multi(&self, mut paths: Vec<String>) -> Result<Vec<String>, AdapterError> {
        paths.sort_unstable();
        paths.dedup();
        let mut lock_ids = Vec::with_capacity(paths.len());
        for path in &paths {
            lock_ids.push(self.acquire(path, Mode::Write)?);
        }
        Ok(lock_ids)
    }

    fn release(&self, lock_id: &str) {
        if let Err(e) = self.client.release(lock_id, &self.owner) {
            warn!("release of {lock_id} failed: {e}");
        }
    }

    fn release_multi(&self, lock_ids: &[String]) {
        for lock_id in lock_ids.iter().rev() {
            self.release(lock_id);
        }
    }

    fn heartbeat(&self, lock_id: &str) {
        if let Err(e) = self.client.heartbeat(lock_id, &self.owner, self.lease_ms) {
            warn!("heartbeat of {lock_id} failed: {e}");
        }
    }

    /// Pops a handle's bookkeeping, closes its fd, and releases its lock
    /// (if any). Used by both `flush` (when `release_on_flush` is set) and
    /// `release`.
    fn finalize_handle(&self, fh: u64, reason: &str) {
        let state = self.handles.lock().unwrap().remove(&fh);
        if let Some(state) = state {
            debug!(
                "finalize fh={fh} path={:?} reason={reason} lock_id={:?}",
                state.path, state.lock_id
            );
            if let Some(lock_id) = state.lock_id {
                self.release(&lock_id);
            }
        }
    }

    fn attr_from_metadata(ino: u64, meta: &fs::Metadata) -> FileAttr {
        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else {
            FileType::RegularFile
        };
        let size = meta.len();
        FileAttr {
            ino,
            size,
            blocks: (size + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64,
            atime: UNIX_EPOCH + Duration::from_secs(meta.atime().max(0) as u64),
            mtime: UNIX_EPOCH + Duration::from_secs(meta.mtime().max(0) as u64),
            ctime: UNIX_EPOCH + Duration::from_secs(meta.ctime().max(0) as u64),
            crtime: UNIX_EPOCH + Duration::from_secs(meta.ctime().max(0) as u64),
            kind,
            perm: (meta.permissions().mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn lookup_attr(&self, ino: u64, path_key: &str) -> Result<FileAttr, i32> {
        let full = self.full_path(path_key);
        match fs::symlink_metadata(&full) {
            Ok(meta) => Ok(Self::attr_from_metadata(ino, &meta)),
            Err(e) => Err(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }
}

impl Filesystem for GateFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_string_lossy();
        let parent_path = match self.get_path(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let path = Self::join_path(&parent_path, &name);
        let ino = self.get_or_create_inode(&path);
        match self.lookup_attr(ino, &path) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let path = match self.get_path(ino) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        match self.lookup_attr(ino, &path) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.get_path(ino) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };

        let lock_id = match self.acquire(&path, Mode::Write) {
            Ok(id) => id,
            Err(e) => return reply.error(e.to_errno()),
        };

        let result = (|| -> std::io::Result<()> {
            let full = self.full_path(&path);
            if let Some(mode) = mode {
                fs::set_permissions(&full, fs::Permissions::from_mode(mode))?;
            }
            if uid.is_some() || gid.is_some() {
                let uid = uid.map(nix_uid).unwrap_or(None);
                let gid = gid.map(nix_gid).unwrap_or(None);
                unsafe {
                    let c_path = std::ffi::CString::new(full.as_os_str().as_bytes()).unwrap();
                    libc::chown(
                        c_path.as_ptr(),
                        uid.unwrap_or(u32::MAX),
                        gid.unwrap_or(u32::MAX),
                    );
                }
            }
            if atime.is_some() || mtime.is_some() {
                let times = [timespec_for(atime), timespec_for(mtime)];
                let c_path = std::ffi::CString::new(full.as_os_str().as_bytes()).unwrap();
                let rc = unsafe {
                    libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0)
                };
                if rc != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            if let Some(size) = size {
                if let Some(fh) = fh {
                    if let Some(state) = self.handles.lock().unwrap().get(&fh) {
                        state.file.set_len(size)?;
                        return Ok(());
                    }
                }
                let file = OpenOptions::new().write(true).open(&full)?;
                file.set_len(size)?;
            }
            Ok(())
        })();

        self.release(&lock_id);

        if let Err(e) = result {
            return reply.error(e.raw_os_error().unwrap_or(libc::EIO));
        }
        match self.lookup_attr(ino, &path) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: fuser::ReplyData) {
        let path = match self.get_path(ino) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        match fs::read_link(self.full_path(&path)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let name = name.to_string_lossy();
        let parent_path = match self.get_path(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let path = Self::join_path(&parent_path, &name);

        let lock_id = match self.acquire(&path, Mode::Write) {
            Ok(id) => id,
            Err(e) => return reply.error(e.to_errno()),
        };
        let full = self.full_path(&path);
        let result = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&full);
        self.release(&lock_id);

        match result {
            Ok(_) => {
                let ino = self.get_or_create_inode(&path);
                match self.lookup_attr(ino, &path) {
                    Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
                    Err(errno) => reply.error(errno),
                }
            }
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = name.to_string_lossy();
        let parent_path = match self.get_path(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let path = Self::join_path(&parent_path, &name);

        let lock_id = match self.acquire(&path, Mode::Write) {
            Ok(id) => id,
            Err(e) => return reply.error(e.to_errno()),
        };
        let full = self.full_path(&path);
        let result = fs::create_dir(&full).and_then(|_| {
            fs::set_permissions(&full, fs::Permissions::from_mode(mode))
        });
        self.release(&lock_id);

        match result {
            Ok(_) => {
                let ino = self.get_or_create_inode(&path);
                match self.lookup_attr(ino, &path) {
                    Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
                    Err(errno) => reply.error(errno),
                }
            }
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_string_lossy();
        let parent_path = match self.get_path(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let path = Self::join_path(&parent_path, &name);

        let lock_id = match self.acquire(&path, Mode::Write) {
            Ok(id) => id,
            Err(e) => return reply.error(e.to_errno()),
        };
        let result = fs::remove_file(self.full_path(&path));
        self.release(&lock_id);

        match result {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_string_lossy();
        let parent_path = match self.get_path(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let path = Self::join_path(&parent_path, &name);

        let lock_id = match self.acquire(&path, Mode::Write) {
            Ok(id) => id,
            Err(e) => return reply.error(e.to_errno()),
        };
        let result = fs::remove_dir(self.full_path(&path));
        self.release(&lock_id);

        match result {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        link: &Path,
        reply: ReplyEntry,
    ) {
        let name = name.to_string_lossy();
        let parent_path = match self.get_path(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let path = Self::join_path(&parent_path, &name);
        let target_key = link.to_string_lossy().to_string();

        let lock_ids = match self.acquire_multi(vec![path.clone(), target_key]) {
            Ok(ids) => ids,
            Err(e) => return reply.error(e.to_errno()),
        };
        let result = std::os::unix::fs::symlink(link, self.full_path(&path));
        self.release_multi(&lock_ids);

        match result {
            Ok(_) => {
                let ino = self.get_or_create_inode(&path);
                match self.lookup_attr(ino, &path) {
                    Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
                    Err(errno) => reply.error(errno),
                }
            }
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name = name.to_string_lossy();
        let newname = newname.to_string_lossy();
        let parent_path = match self.get_path(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let new_parent_path = match self.get_path(newparent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let old_path = Self::join_path(&parent_path, &name);
        let new_path = Self::join_path(&new_parent_path, &newname);

        let lock_ids = match self.acquire_multi(vec![old_path.clone(), new_path.clone()]) {
            Ok(ids) => ids,
            Err(e) => return reply.error(e.to_errno()),
        };
        let result = fs::rename(self.full_path(&old_path), self.full_path(&new_path));
        self.release_multi(&lock_ids);

        match result {
            Ok(_) => {
                let mut path_to_inode = self.path_to_inode.lock().unwrap();
                if let Some(ino) = path_to_inode.remove(&old_path) {
                    path_to_inode.insert(new_path.clone(), ino);
                    self.inode_to_path.lock().unwrap().insert(ino, new_path.clone());
                }
                reply.ok();
            }
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let newname = newname.to_string_lossy();
        let target_path = match self.get_path(ino) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let new_parent_path = match self.get_path(newparent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let new_path = Self::join_path(&new_parent_path, &newname);

        let lock_ids = match self.acquire_multi(vec![target_path.clone(), new_path.clone()]) {
            Ok(ids) => ids,
            Err(e) => return reply.error(e.to_errno()),
        };
        let result = fs::hard_link(self.full_path(&target_path), self.full_path(&new_path));
        self.release_multi(&lock_ids);

        match result {
            Ok(_) => match self.lookup_attr(ino, &target_path) {
                Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
                Err(errno) => reply.error(errno),
            },
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.get_path(ino) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let mode = if Self::is_write_flags(flags) {
            Mode::Write
        } else {
            Mode::Read
        };

        let lock_id = match self.acquire(&path, mode) {
            Ok(id) => id,
            Err(e) => return reply.error(e.to_errno()),
        };

        let mut options = OpenOptions::new();
        options.read(true);
        if mode == Mode::Write {
            options.write(true);
        }
        match options.open(self.full_path(&path)) {
            Ok(file) => {
                let mut next_fh = self.next_fh.lock().unwrap();
                *next_fh += 1;
                let fh = *next_fh;
                drop(next_fh);
                self.handles.lock().unwrap().insert(
                    fh,
                    HandleState {
                        lock_id: Some(lock_id),
                        path,
                        file,
                    },
                );
                reply.opened(fh, 0);
            }
            Err(e) => {
                self.release(&lock_id);
                reply.error(e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = name.to_string_lossy();
        let parent_path = match self.get_path(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let path = Self::join_path(&parent_path, &name);

        let lock_id = match self.acquire(&path, Mode::Write) {
            Ok(id) => id,
            Err(e) => return reply.error(e.to_errno()),
        };

        let opened = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(self.full_path(&path));

        match opened {
            Ok(file) => {
                let ino = self.get_or_create_inode(&path);
                let mut next_fh = self.next_fh.lock().unwrap();
                *next_fh += 1;
                let fh = *next_fh;
                drop(next_fh);
                self.handles.lock().unwrap().insert(
                    fh,
                    HandleState {
                        lock_id: Some(lock_id),
                        path: path.clone(),
                        file,
                    },
                );
                match self.lookup_attr(ino, &path) {
                    Ok(attr) => reply.created(&ATTR_TTL, &attr, 0, fh, 0),
                    Err(errno) => reply.error(errno),
                }
            }
            Err(e) => {
                self.release(&lock_id);
                reply.error(e.raw_os_error().unwrap_or(libc::EIO));
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let handles = self.handles.lock().unwrap();
        let Some(state) = handles.get(&fh) else {
            return reply.error(libc::EBADF);
        };
        let mut buf = vec![0u8; size as usize];
        match state.file.read_at(&mut buf, offset as u64) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let lock_id = {
            let handles = self.handles.lock().unwrap();
            handles.get(&fh).and_then(|s| s.lock_id.clone())
        };
        if let Some(lock_id) = &lock_id {
            self.heartbeat(lock_id);
        }

        let handles = self.handles.lock().unwrap();
        let Some(state) = handles.get(&fh) else {
            return reply.error(libc::EBADF);
        };
        match state.file.write_at(data, offset as u64) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        if self.release_on_flush {
            self.finalize_handle(fh, "flush");
            return reply.ok();
        }
        let lock_id = {
            let handles = self.handles.lock().unwrap();
            handles.get(&fh).and_then(|s| s.lock_id.clone())
        };
        if let Some(lock_id) = lock_id {
            self.heartbeat(&lock_id);
        }
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.finalize_handle(fh, "release");
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        let lock_id = {
            let handles = self.handles.lock().unwrap();
            handles.get(&fh).and_then(|s| s.lock_id.clone())
        };
        if let Some(lock_id) = lock_id {
            self.heartbeat(&lock_id);
        }
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.get_path(ino) {
            Some(_) => reply.opened(0, 0),
            None => reply.error(libc::ENOENT),
        }
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.get_path(ino) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let full = self.full_path(&path);
        let entries = match fs::read_dir(&full) {
            Ok(it) => it,
            Err(e) => return reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
        };

        let mut all: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let child_path = Self::join_path(&path, &name);
            let child_ino = self.get_or_create_inode(&child_path);
            let kind = match entry.file_type() {
                Ok(ft) if ft.is_dir() => FileType::Directory,
                Ok(ft) if ft.is_symlink() => FileType::Symlink,
                _ => FileType::RegularFile,
            };
            all.push((child_ino, kind, name));
        }

        for (i, (child_ino, kind, name)) in all.iter().enumerate().skip(offset as usize) {
            if reply.add(*child_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path = match self.get_path(ino) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let full = self.full_path(&path);
        let c_path = std::ffi::CString::new(full.as_os_str().as_bytes()).unwrap();
        let ok = unsafe { libc::access(c_path.as_ptr(), mask) } == 0;
        if ok {
            reply.ok();
        } else {
            reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EACCES));
        }
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: fuser::ReplyStatfs) {
        let path = self.get_path(ino).unwrap_or_else(|| ".".to_string());
        let full = self.full_path(&path);
        let c_path = std::ffi::CString::new(full.as_os_str().as_bytes()).unwrap();
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
        }
        reply.statfs(
            stat.f_blocks as u64,
            stat.f_bfree as u64,
            stat.f_bavail as u64,
            stat.f_files as u64,
            stat.f_ffree as u64,
            stat.f_bsize as u32,
            stat.f_namemax as u32,
            stat.f_frsize as u32,
        );
    }
}

fn nix_uid(v: u32) -> Option<u32> {
    Some(v)
}

fn nix_gid(v: u32) -> Option<u32> {
    Some(v)
}

/// Converts a `setattr` time argument to the `timespec` `utimensat` expects:
/// an absent argument leaves that timestamp unchanged (`UTIME_OMIT`), and
/// `TimeOrNow::Now` asks the kernel to stamp the current time (`UTIME_NOW`),
/// matching the original's `os.utime(path, (atime, mtime))` /
/// `os.utime(path, None)` split.
fn timespec_for(value: Option<TimeOrNow>) -> libc::timespec {
    match value {
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        Some(TimeOrNow::Now) => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        },
        Some(TimeOrNow::SpecificTime(t)) => {
            let dur = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
            libc::timespec {
                tv_sec: dur.as_secs() as libc::time_t,
                tv_nsec: dur.subsec_nanos() as i64,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_core::{GateConfig, LockStore};
    use std::sync::Arc;

    /// Spins up a real broker on a loopback port backed by an in-memory
    /// store, the same way `gate-broker`'s own wire-protocol tests do, so
    /// the adapter's lock-protocol helpers are exercised against the real
    /// HTTP contract rather than a stub.
    fn spawn_broker(rt: &tokio::runtime::Runtime) -> gate_client::BrokerEndpoint {
        rt.block_on(async {
            let store = Arc::new(LockStore::open_in_memory().unwrap());
            let config = GateConfig::default();
            let state = gate_broker::AppState::new(store, config);
            let app = gate_broker::build_router(state);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            gate_client::BrokerEndpoint {
                host: addr.ip().to_string(),
                port: addr.port(),
            }
        })
    }

    fn fs_for(endpoint: gate_client::BrokerEndpoint, owner: &str) -> GateFs {
        let client = BrokerClient::new(endpoint).unwrap();
        GateFs::new(
            client,
            MountOptions {
                root: PathBuf::from("/tmp/gate-fuse-test-root"),
                owner: owner.to_string(),
                lease_ms: 60_000,
                acquire_timeout_ms: Some(200),
                max_hold_ms: None,
                release_on_flush: true,
            },
        )
    }

    #[test]
    fn write_flags_detects_every_writey_combination() {
        assert!(GateFs::is_write_flags(libc::O_WRONLY));
        assert!(GateFs::is_write_flags(libc::O_RDWR));
        assert!(GateFs::is_write_flags(libc::O_TRUNC));
        assert!(GateFs::is_write_flags(libc::O_APPEND));
        assert!(!GateFs::is_write_flags(libc::O_RDONLY));
    }

    #[test]
    fn join_path_treats_root_specially() {
        assert_eq!(GateFs::join_path(".", "a.txt"), "a.txt");
        assert_eq!(GateFs::join_path("dir", "a.txt"), "dir/a.txt");
    }

    #[test]
    fn acquire_multi_sorts_and_dedups_before_locking() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let endpoint = spawn_broker(&rt);
        let fs = fs_for(endpoint, "mount-a");

        let lock_ids = fs
            .acquire_multi(vec!["z".into(), "a".into(), "a".into()])
            .unwrap();
        // Sorted + deduped: exactly two locks, for "a" then "z".
        assert_eq!(lock_ids.len(), 2);
        fs.release_multi(&lock_ids);
    }

    #[test]
    fn same_mount_owner_reenters_without_blocking_itself() {
        // The adapter uses one stable owner per mount; two overlapping opens
        // of the same path from that mount must not self-deadlock, per the
        // reentrancy-interaction rule.
        let rt = tokio::runtime::Runtime::new().unwrap();
        let endpoint = spawn_broker(&rt);
        let fs = fs_for(endpoint, "host-a:123");

        let first = fs.acquire("shared.txt", Mode::Write).unwrap();
        let second = fs.acquire("shared.txt", Mode::Write).unwrap();
        assert_eq!(first, second, "reentrant acquire must return the same lock id");
        fs.release(&second);
        fs.release(&first);
    }

    #[test]
    fn distinct_mount_owners_block_each_other() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let endpoint = spawn_broker(&rt);
        let fs_a = fs_for(endpoint.clone(), "host-a:1");
        let fs_b = fs_for(endpoint.clone(), "host-b:2");

        let lock = fs_a.acquire("contended.txt", Mode::Write).unwrap();
        let err = fs_b
            .acquire("contended.txt", Mode::Write)
            .expect_err("second owner must time out while the first holds the write lock");
        assert_eq!(err.to_errno(), libc::ETIMEDOUT);
        fs_a.release(&lock);
    }
}
