// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Bridge inode-addressed FUSE callbacks onto path-addressed operations.
// Author: Lukas Bower

#[cfg(feature = "fuse")]
use std::collections::HashMap;
#[cfg(feature = "fuse")]
use std::ffi::{OsStr, OsString};
#[cfg(feature = "fuse")]
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;
#[cfg(feature = "fuse")]
use std::path::PathBuf;
#[cfg(feature = "fuse")]
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(not(feature = "fuse"))]
use anyhow::anyhow;
use anyhow::{Context, Result};
use log::info;
#[cfg(feature = "fuse")]
use log::warn;

use crate::config::MountConfig;
#[cfg(feature = "fuse")]
use crate::error::FsError;
#[cfg(feature = "fuse")]
use crate::handle::OpenFileHandle;
#[cfg(feature = "fuse")]
use crate::mode::{type_bits_for, FILE_TYPE_MASK};
#[cfg(feature = "fuse")]
use crate::ops::{child_path, DirEntryStat, TimeSetting};
use crate::ops::Operations;

#[cfg(feature = "fuse")]
const ROOT_INODE: u64 = 1;
#[cfg(feature = "fuse")]
const TTL: Duration = Duration::from_secs(1);
/// Logged in place of the path of a file that is only reachable by handle.
#[cfg(feature = "fuse")]
const DETACHED_PATH: &str = "/";

/// Create the mount point directory if it does not exist yet.
pub fn prepare_mountpoint(at: &Path) -> Result<()> {
    std::fs::create_dir_all(at)
        .with_context(|| format!("create mount directory {}", at.display()))?;
    Ok(())
}

/// Translate mount settings into `fuser` mount options.
///
/// Pass-through `-o` names follow mount(8); unknown names are forwarded as
/// custom options.
#[cfg(feature = "fuse")]
#[must_use]
pub fn mount_options(config: &MountConfig) -> Vec<fuser::MountOption> {
    let mut options = vec![fuser::MountOption::FSName(config.fsname.clone())];
    if config.auto_unmount {
        options.push(fuser::MountOption::AutoUnmount);
    }
    if config.allow_other {
        options.push(fuser::MountOption::AllowOther);
    }
    for raw in &config.options {
        for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            let option = parse_mount_option(name);
            if !options.contains(&option) {
                options.push(option);
            }
        }
    }
    options
}

#[cfg(feature = "fuse")]
fn parse_mount_option(name: &str) -> fuser::MountOption {
    use fuser::MountOption;

    if let Some(fsname) = name.strip_prefix("fsname=") {
        return MountOption::FSName(fsname.to_owned());
    }
    if let Some(subtype) = name.strip_prefix("subtype=") {
        return MountOption::Subtype(subtype.to_owned());
    }
    match name {
        "ro" => MountOption::RO,
        "rw" => MountOption::RW,
        "allow_other" => MountOption::AllowOther,
        "allow_root" => MountOption::AllowRoot,
        "auto_unmount" => MountOption::AutoUnmount,
        "default_permissions" => MountOption::DefaultPermissions,
        "dev" => MountOption::Dev,
        "nodev" => MountOption::NoDev,
        "suid" => MountOption::Suid,
        "nosuid" => MountOption::NoSuid,
        "exec" => MountOption::Exec,
        "noexec" => MountOption::NoExec,
        "atime" => MountOption::Atime,
        "noatime" => MountOption::NoAtime,
        "sync" => MountOption::Sync,
        "async" => MountOption::Async,
        "dirsync" => MountOption::DirSync,
        other => MountOption::CUSTOM(other.to_owned()),
    }
}

/// Mount `ops` at `at` and serve requests until the filesystem is unmounted.
pub fn mount<O: Operations + 'static>(ops: O, at: &Path, config: &MountConfig) -> Result<()> {
    #[cfg(feature = "fuse")]
    {
        let options = mount_options(config);
        info!("mounting {} at {} ({options:?})", config.fsname, at.display());
        let filesystem = PureDataFuse::new(ops);
        fuser::mount2(filesystem, at, &options)
            .with_context(|| format!("mount {}", at.display()))?;
        info!("unmounted {}", at.display());
        Ok(())
    }
    #[cfg(not(feature = "fuse"))]
    {
        let _ = ops;
        info!("refusing to mount {} at {}", config.fsname, at.display());
        Err(anyhow!(
            "fuse support disabled; rebuild puredatafs with --features fuse or use --check"
        ))
    }
}

#[cfg(feature = "fuse")]
struct PureDataFuse<O: Operations> {
    ops: O,
    inodes: InodeTable,
    handles: HashMap<u64, OpenFileHandle>,
    next_handle: u64,
}

#[cfg(feature = "fuse")]
impl<O: Operations> PureDataFuse<O> {
    fn new(ops: O) -> Self {
        Self {
            ops,
            inodes: InodeTable::new(),
            handles: HashMap::new(),
            next_handle: 1,
        }
    }

    fn path_of(&self, inode: u64) -> Result<PathBuf, i32> {
        self.inodes
            .path_for(inode)
            .map(Path::to_path_buf)
            .ok_or(libc::ENOENT)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<PathBuf, i32> {
        self.path_of(parent).map(|path| child_path(&path, name))
    }

    /// Stat a freshly created or looked-up path and register its inode.
    fn entry_for(&mut self, path: &Path) -> Result<fuser::FileAttr, FsError> {
        let metadata = self.ops.getattr(path)?;
        let inode = self.inodes.insert(path);
        Ok(attr_from(inode, &metadata))
    }

    /// Path and session handle for a callback that carries an `fh`.
    ///
    /// An open handle outlives its path (unlink, rename over it), so the
    /// handle wins and the path only has to resolve when there is none.
    fn session(&self, inode: u64, fh: u64) -> Result<(PathBuf, Option<&OpenFileHandle>), i32> {
        match self.handles.get(&fh) {
            Some(handle) => {
                let path = self
                    .path_of(inode)
                    .unwrap_or_else(|_| PathBuf::from(DETACHED_PATH));
                Ok((path, Some(handle)))
            }
            None => self.path_of(inode).map(|path| (path, None)),
        }
    }

    fn store_handle(&mut self, handle: OpenFileHandle) -> u64 {
        let fh = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.handles.insert(fh, handle);
        fh
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_setattr(
        &self,
        path: &Path,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
    ) -> Result<(), FsError> {
        if let Some(mode) = mode {
            self.ops.chmod(path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.ops.chown(path, uid, gid)?;
        }
        if let Some(size) = size {
            self.ops.truncate(path, size)?;
        }
        if atime.is_some() || mtime.is_some() {
            self.ops
                .utimens(path, time_setting(atime), time_setting(mtime))?;
        }
        Ok(())
    }
}

#[cfg(feature = "fuse")]
fn time_setting(value: Option<fuser::TimeOrNow>) -> TimeSetting {
    match value {
        None => TimeSetting::Omit,
        Some(fuser::TimeOrNow::Now) => TimeSetting::Now,
        Some(fuser::TimeOrNow::SpecificTime(time)) => TimeSetting::At(time),
    }
}

#[cfg(feature = "fuse")]
fn file_kind(mode: u32) -> fuser::FileType {
    match mode & FILE_TYPE_MASK {
        bits if bits == libc::S_IFDIR as u32 => fuser::FileType::Directory,
        bits if bits == libc::S_IFLNK as u32 => fuser::FileType::Symlink,
        bits if bits == libc::S_IFIFO as u32 => fuser::FileType::NamedPipe,
        bits if bits == libc::S_IFSOCK as u32 => fuser::FileType::Socket,
        bits if bits == libc::S_IFBLK as u32 => fuser::FileType::BlockDevice,
        bits if bits == libc::S_IFCHR as u32 => fuser::FileType::CharDevice,
        _ => fuser::FileType::RegularFile,
    }
}

#[cfg(feature = "fuse")]
fn attr_from(inode: u64, metadata: &std::fs::Metadata) -> fuser::FileAttr {
    use std::os::unix::fs::MetadataExt;

    fuser::FileAttr {
        ino: inode,
        size: metadata.size(),
        blocks: metadata.blocks(),
        atime: metadata.accessed().unwrap_or(UNIX_EPOCH),
        mtime: metadata.modified().unwrap_or(UNIX_EPOCH),
        ctime: ctime_of(metadata),
        crtime: metadata.created().unwrap_or(UNIX_EPOCH),
        kind: file_kind(metadata.mode()),
        perm: (metadata.mode() & 0o7777) as u16,
        nlink: metadata.nlink() as u32,
        uid: metadata.uid(),
        gid: metadata.gid(),
        rdev: metadata.rdev() as u32,
        blksize: metadata.blksize() as u32,
        flags: 0,
    }
}

#[cfg(feature = "fuse")]
fn ctime_of(metadata: &std::fs::Metadata) -> SystemTime {
    use std::os::unix::fs::MetadataExt;

    let secs = metadata.ctime();
    let nanos = u32::try_from(metadata.ctime_nsec()).unwrap_or(0);
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs.unsigned_abs(), nanos)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(u64::from(nanos))
    }
}

#[cfg(feature = "fuse")]
impl<O: Operations> fuser::Filesystem for PureDataFuse<O> {
    fn destroy(&mut self) {
        if !self.handles.is_empty() {
            warn!("closing {} handles left open at unmount", self.handles.len());
        }
        self.handles.clear();
    }

    fn forget(&mut self, _req: &fuser::Request<'_>, inode: u64, nlookup: u64) {
        self.inodes.forget(inode, nlookup);
    }

    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.entry_for(&path) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let path = match self.path_of(inode) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.getattr(&path) {
            Ok(metadata) => reply.attr(&TTL, &attr_from(inode, &metadata)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let path = match self.path_of(inode) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        if let Err(err) = self.apply_setattr(&path, mode, uid, gid, size, atime, mtime) {
            reply.error(err.errno());
            return;
        }
        match self.ops.getattr(&path) {
            Ok(metadata) => reply.attr(&TTL, &attr_from(inode, &metadata)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readlink(&mut self, _req: &fuser::Request<'_>, inode: u64, reply: fuser::ReplyData) {
        let path = match self.path_of(inode) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.readlink(&path) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let result = self
            .ops
            .mknod(&path, mode, u64::from(rdev))
            .and_then(|()| self.entry_for(&path));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let result = self
            .ops
            .mkdir(&path, mode)
            .and_then(|()| self.entry_for(&path));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.unlink(&path) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.rmdir(&path) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: fuser::ReplyEntry,
    ) {
        let path = match self.child_of(parent, link_name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let result = self
            .ops
            .symlink(target, &path)
            .and_then(|()| self.entry_for(&path));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        // Exchange and no-replace renames have no path-level counterpart.
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let paths = self
            .child_of(parent, name)
            .and_then(|from| self.child_of(newparent, newname).map(|to| (from, to)));
        let (from, to) = match paths {
            Ok(paths) => paths,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.rename(&from, &to) {
            Ok(()) => {
                self.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn link(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        newparent: u64,
        newname: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let paths = self
            .path_of(inode)
            .and_then(|from| self.child_of(newparent, newname).map(|to| (from, to)));
        let (from, to) = match paths {
            Ok(paths) => paths,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let result = self
            .ops
            .link(&from, &to)
            .and_then(|()| self.entry_for(&to));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn open(&mut self, _req: &fuser::Request<'_>, inode: u64, flags: i32, reply: fuser::ReplyOpen) {
        let path = match self.path_of(inode) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.open(&path, flags) {
            Ok(handle) => {
                let fh = self.store_handle(handle);
                reply.opened(fh, 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let (path, handle) = match self.session(inode, fh) {
            Ok(session) => session,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        match self.ops.read(&path, &mut buf, offset, handle) {
            Ok(count) => reply.data(&buf[..count]),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        let (path, handle) = match self.session(inode, fh) {
            Ok(session) => session,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.ops.write(&path, data, offset, handle) {
            Ok(count) => reply.written(count as u32),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        if let Some(handle) = self.handles.remove(&fh) {
            let path = self
                .path_of(inode)
                .unwrap_or_else(|_| PathBuf::from(DETACHED_PATH));
            let _ = self.ops.release(&path, handle);
        }
        reply.ok();
    }

    fn fsync(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        fh: u64,
        datasync: bool,
        reply: fuser::ReplyEmpty,
    ) {
        let (path, handle) = match self.session(inode, fh) {
            Ok(session) => session,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.fsync(&path, datasync, handle) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let path = match self.path_of(inode) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let start = u64::try_from(offset).unwrap_or(0);
        let mut index = 0u64;
        let ops = &self.ops;
        let mut filler = |name: &OsStr, stat: &DirEntryStat| {
            index += 1;
            if index <= start {
                return false;
            }
            let kind = if stat.mode == 0 {
                ops.getattr(&child_path(&path, name))
                    .map(|metadata| file_kind(type_bits_for(metadata.file_type())))
                    .unwrap_or(fuser::FileType::RegularFile)
            } else {
                file_kind(stat.mode)
            };
            reply.add(stat.ino, index as i64, kind, name)
        };
        match ops.readdir(&path, &mut filler) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn statfs(&mut self, _req: &fuser::Request<'_>, inode: u64, reply: fuser::ReplyStatfs) {
        let path = self.path_of(inode).unwrap_or_else(|_| PathBuf::from("/"));
        match self.ops.statfs(&path) {
            Ok(stat) => reply.statfs(
                stat.blocks() as u64,
                stat.blocks_free() as u64,
                stat.blocks_available() as u64,
                stat.files() as u64,
                stat.files_free() as u64,
                stat.block_size() as u32,
                stat.name_max() as u32,
                stat.fragment_size() as u32,
            ),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: fuser::ReplyEmpty,
    ) {
        let path = match self.path_of(inode) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.setxattr(&path, name, value, flags) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        name: &OsStr,
        size: u32,
        reply: fuser::ReplyXattr,
    ) {
        let path = match self.path_of(inode) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let mut buf = vec![0u8; size as usize];
        match self.ops.getxattr(&path, name, &mut buf) {
            Ok(count) if size == 0 => reply.size(count as u32),
            Ok(count) => reply.data(&buf[..count]),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn listxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        size: u32,
        reply: fuser::ReplyXattr,
    ) {
        let path = match self.path_of(inode) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let mut buf = vec![0u8; size as usize];
        match self.ops.listxattr(&path, &mut buf) {
            Ok(count) if size == 0 => reply.size(count as u32),
            Ok(count) => reply.data(&buf[..count]),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn removexattr(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let path = match self.path_of(inode) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.removexattr(&path, name) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn access(&mut self, _req: &fuser::Request<'_>, inode: u64, mask: i32, reply: fuser::ReplyEmpty) {
        let path = match self.path_of(inode) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.access(&path, mask) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let handle = match self.ops.create(&path, mode, flags) {
            Ok(handle) => handle,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };
        match self.entry_for(&path) {
            Ok(attr) => {
                let fh = self.store_handle(handle);
                reply.created(&TTL, &attr, 0, fh, 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn fallocate(
        &mut self,
        _req: &fuser::Request<'_>,
        inode: u64,
        fh: u64,
        offset: i64,
        length: i64,
        mode: i32,
        reply: fuser::ReplyEmpty,
    ) {
        let (path, handle) = match self.session(inode, fh) {
            Ok(session) => session,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.ops.fallocate(&path, mode, offset, length, handle) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn copy_file_range(
        &mut self,
        _req: &fuser::Request<'_>,
        ino_in: u64,
        fh_in: u64,
        offset_in: i64,
        ino_out: u64,
        fh_out: u64,
        offset_out: i64,
        len: u64,
        flags: u32,
        reply: fuser::ReplyWrite,
    ) {
        let sessions = self
            .session(ino_in, fh_in)
            .and_then(|source| self.session(ino_out, fh_out).map(|dest| (source, dest)));
        let ((path_in, handle_in), (path_out, handle_out)) = match sessions {
            Ok(sessions) => sessions,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        let result = self.ops.copy_file_range(
            &path_in,
            handle_in,
            offset_in,
            &path_out,
            handle_out,
            offset_out,
            len,
            flags,
        );
        match result {
            Ok(count) => reply.written(u32::try_from(count).unwrap_or(u32::MAX)),
            Err(err) => reply.error(err.errno()),
        }
    }
}

/// Two-way map between FUSE inode numbers and virtual paths.
#[cfg(feature = "fuse")]
#[derive(Debug, Default)]
struct InodeTable {
    by_inode: HashMap<u64, PathBuf>,
    by_path: HashMap<PathBuf, u64>,
    lookups: HashMap<u64, u64>,
    next_inode: u64,
}

#[cfg(feature = "fuse")]
impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            by_inode: HashMap::new(),
            by_path: HashMap::new(),
            lookups: HashMap::new(),
            next_inode: ROOT_INODE + 1,
        };
        table.by_inode.insert(ROOT_INODE, PathBuf::from("/"));
        table.by_path.insert(PathBuf::from("/"), ROOT_INODE);
        table
    }

    /// Register `path` and count one kernel lookup against its inode.
    fn insert(&mut self, path: &Path) -> u64 {
        let inode = match self.by_path.get(path) {
            Some(existing) => *existing,
            None => {
                let inode = self.next_inode;
                self.next_inode = self.next_inode.saturating_add(1);
                self.by_inode.insert(inode, path.to_path_buf());
                self.by_path.insert(path.to_path_buf(), inode);
                inode
            }
        };
        *self.lookups.entry(inode).or_insert(0) += 1;
        inode
    }

    /// Drop `nlookup` kernel references; the mapping goes with the last one.
    fn forget(&mut self, inode: u64, nlookup: u64) {
        if inode == ROOT_INODE {
            return;
        }
        let Some(count) = self.lookups.get_mut(&inode) else {
            return;
        };
        *count = count.saturating_sub(nlookup);
        if *count > 0 {
            return;
        }
        self.lookups.remove(&inode);
        if let Some(path) = self.by_inode.remove(&inode) {
            self.by_path.remove(&path);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.by_inode.len()
    }

    fn path_for(&self, inode: u64) -> Option<&Path> {
        self.by_inode.get(&inode).map(PathBuf::as_path)
    }

    fn remove(&mut self, path: &Path) {
        if let Some(inode) = self.by_path.remove(path) {
            self.by_inode.remove(&inode);
            self.lookups.remove(&inode);
        }
    }

    /// Move `from` and everything below it to `to`, keeping inode numbers.
    fn rename(&mut self, from: &Path, to: &Path) {
        self.remove(to);
        let moved: Vec<(PathBuf, u64)> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, inode)| (path.clone(), *inode))
            .collect();
        for (old, inode) in moved {
            let new = match old.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => {
                    let mut joined = OsString::from(to.as_os_str()).into_vec();
                    joined.push(b'/');
                    joined.extend_from_slice(rest.as_os_str().as_bytes());
                    PathBuf::from(OsString::from_vec(joined))
                }
                Err(_) => continue,
            };
            self.by_path.remove(&old);
            self.by_path.insert(new.clone(), inode);
            self.by_inode.insert(inode, new);
        }
    }
}
