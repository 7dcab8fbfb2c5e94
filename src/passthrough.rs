// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Forward every filesystem primitive to the real directory tree.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Passthrough dispatcher.
//!
//! Each operation translates its virtual path(s) under the [`MountRoot`],
//! widens the requested mode where it creates an entry or changes
//! permissions, then issues the matching OS call. OS failures are returned
//! with their original errno.

use std::ffi::OsStr;
use std::fs::{self, DirBuilder, File, Metadata, OpenOptions, Permissions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use log::{debug, trace};
use nix::dir::{Dir, Type};
use nix::fcntl::OFlag;
use nix::sys::stat::{Mode, SFlag, UtimensatFlags};
use nix::sys::statvfs::{statvfs, Statvfs};
use nix::unistd::AccessFlags;

use crate::error::{FsError, FsResult};
use crate::handle::{Descriptor, OpenFileHandle};
use crate::mode::{file_type_bits, sanitize, FILE_TYPE_MASK};
use crate::ops::{DirEntryStat, DirFiller, Operations, TimeSetting};
use crate::sys;
use crate::translate::MountRoot;

/// Passthrough filesystem over a fixed mount root.
#[derive(Debug, Clone)]
pub struct PureDataFs {
    root: MountRoot,
}

impl PureDataFs {
    /// Serve the tree under `root`.
    #[must_use]
    pub fn new(root: MountRoot) -> Self {
        Self { root }
    }

    /// Mount root backing this filesystem.
    #[must_use]
    pub fn root(&self) -> &MountRoot {
        &self.root
    }

    fn real(&self, path: &Path) -> FsResult<PathBuf> {
        self.root.translate(path)
    }

    fn open_read(&self, path: &Path) -> FsResult<File> {
        Ok(OpenOptions::new().read(true).open(self.real(path)?)?)
    }

    fn open_write(&self, path: &Path) -> FsResult<File> {
        Ok(OpenOptions::new().write(true).open(self.real(path)?)?)
    }
}

fn traced<T>(op: &str, path: &Path, result: FsResult<T>) -> FsResult<T> {
    if let Err(err) = &result {
        debug!("{op} {} failed: errno {} ({err})", path.display(), err.errno());
    }
    result
}

fn open_options(flags: i32) -> OpenOptions {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => options.write(true),
        libc::O_RDWR => options.read(true).write(true),
        _ => options.read(true),
    };
    options.custom_flags(flags & !libc::O_ACCMODE);
    options
}

fn permission_mode(mode: u32) -> Mode {
    Mode::from_bits_truncate((mode & !FILE_TYPE_MASK) as libc::mode_t)
}

fn entry_type_bits(kind: Option<Type>) -> u32 {
    let bits = match kind {
        Some(Type::Fifo) => libc::S_IFIFO,
        Some(Type::CharacterDevice) => libc::S_IFCHR,
        Some(Type::Directory) => libc::S_IFDIR,
        Some(Type::BlockDevice) => libc::S_IFBLK,
        Some(Type::File) => libc::S_IFREG,
        Some(Type::Symlink) => libc::S_IFLNK,
        Some(Type::Socket) => libc::S_IFSOCK,
        None => 0,
    };
    bits as u32
}

#[cfg(target_os = "linux")]
fn allocate(file: &File, offset: i64, length: i64) -> FsResult<()> {
    use std::os::fd::AsRawFd;

    nix::fcntl::posix_fallocate(
        file.as_raw_fd(),
        offset as libc::off_t,
        length as libc::off_t,
    )?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn allocate(_file: &File, _offset: i64, _length: i64) -> FsResult<()> {
    Err(FsError::NotSupported)
}

#[cfg(target_os = "linux")]
fn copy_range(
    source: &File,
    mut offset_in: i64,
    dest: &File,
    mut offset_out: i64,
    len: usize,
    flags: u32,
) -> FsResult<usize> {
    // The kernel defines no copy flags yet.
    if flags != 0 {
        return Err(FsError::from_raw(libc::EINVAL));
    }
    let copied = nix::fcntl::copy_file_range(
        source,
        Some(&mut offset_in),
        dest,
        Some(&mut offset_out),
        len,
    )?;
    Ok(copied)
}

#[cfg(not(target_os = "linux"))]
fn copy_range(
    _source: &File,
    _offset_in: i64,
    _dest: &File,
    _offset_out: i64,
    _len: usize,
    _flags: u32,
) -> FsResult<usize> {
    Err(FsError::NotSupported)
}

impl Operations for PureDataFs {
    fn getattr(&self, path: &Path) -> FsResult<Metadata> {
        trace!("getattr {}", path.display());
        let result = self
            .real(path)
            .and_then(|real| Ok(fs::symlink_metadata(real)?));
        traced("getattr", path, result)
    }

    fn access(&self, path: &Path, mask: i32) -> FsResult<()> {
        trace!("access {} mask {mask:#o}", path.display());
        let result = self.real(path).and_then(|real| {
            nix::unistd::access(real.as_path(), AccessFlags::from_bits_truncate(mask))?;
            Ok(())
        });
        traced("access", path, result)
    }

    fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        trace!("readlink {}", path.display());
        let result = self.real(path).and_then(|real| Ok(fs::read_link(real)?));
        traced("readlink", path, result)
    }

    fn readdir(&self, path: &Path, filler: &mut DirFiller<'_>) -> FsResult<()> {
        trace!("readdir {}", path.display());
        let result = self.real(path).and_then(|real| {
            // Dropping `dir` closes the real directory on every return below.
            let mut dir = Dir::open(
                real.as_path(),
                OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
                Mode::empty(),
            )?;
            for entry in dir.iter() {
                let entry = entry?;
                let stat = DirEntryStat {
                    ino: entry.ino(),
                    mode: entry_type_bits(entry.file_type()),
                };
                let name = OsStr::from_bytes(entry.file_name().to_bytes());
                if filler(name, &stat) {
                    break;
                }
            }
            Ok(())
        });
        traced("readdir", path, result)
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> FsResult<()> {
        trace!("mknod {} mode {mode:#o} rdev {rdev}", path.display());
        let mode = sanitize(mode);
        let result = self.real(path).and_then(|real| {
            let kind = file_type_bits(mode);
            if kind == libc::S_IFREG as u32 {
                // Portable regular-file creation; the descriptor closes on drop.
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(mode & !FILE_TYPE_MASK)
                    .open(&real)?;
            } else if kind == libc::S_IFIFO as u32 {
                nix::unistd::mkfifo(real.as_path(), permission_mode(mode))?;
            } else {
                nix::sys::stat::mknod(
                    real.as_path(),
                    SFlag::from_bits_truncate(kind as libc::mode_t),
                    permission_mode(mode),
                    rdev as libc::dev_t,
                )?;
            }
            Ok(())
        });
        traced("mknod", path, result)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        trace!("mkdir {} mode {mode:#o}", path.display());
        let mode = sanitize(mode);
        let result = self.real(path).and_then(|real| {
            DirBuilder::new()
                .mode(mode & !FILE_TYPE_MASK)
                .create(real)?;
            Ok(())
        });
        traced("mkdir", path, result)
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        trace!("unlink {}", path.display());
        let result = self.real(path).and_then(|real| Ok(fs::remove_file(real)?));
        traced("unlink", path, result)
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        trace!("rmdir {}", path.display());
        let result = self.real(path).and_then(|real| Ok(fs::remove_dir(real)?));
        traced("rmdir", path, result)
    }

    fn symlink(&self, target: &Path, link: &Path) -> FsResult<()> {
        trace!("symlink {} -> {}", link.display(), target.display());
        let result = (|| -> FsResult<()> {
            // Relative targets resolve against the link's directory and are
            // stored verbatim; absolute ones name a virtual path.
            let target = if target.is_absolute() {
                self.real(target)?
            } else {
                target.to_path_buf()
            };
            let link = self.real(link)?;
            std::os::unix::fs::symlink(target, link)?;
            Ok(())
        })();
        traced("symlink", link, result)
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        trace!("rename {} -> {}", from.display(), to.display());
        let result = (|| -> FsResult<()> {
            let real_from = self.real(from)?;
            let real_to = self.real(to)?;
            fs::rename(real_from, real_to)?;
            Ok(())
        })();
        traced("rename", from, result)
    }

    fn link(&self, from: &Path, to: &Path) -> FsResult<()> {
        trace!("link {} -> {}", to.display(), from.display());
        let result = (|| -> FsResult<()> {
            let real_from = self.real(from)?;
            let real_to = self.real(to)?;
            fs::hard_link(real_from, real_to)?;
            Ok(())
        })();
        traced("link", from, result)
    }

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        trace!("chmod {} mode {mode:#o}", path.display());
        let mode = sanitize(mode);
        let result = self.real(path).and_then(|real| {
            fs::set_permissions(real, Permissions::from_mode(mode & !FILE_TYPE_MASK))?;
            Ok(())
        });
        traced("chmod", path, result)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        trace!("chown {} uid {uid:?} gid {gid:?}", path.display());
        let result = self.real(path).and_then(|real| {
            std::os::unix::fs::lchown(real, uid, gid)?;
            Ok(())
        });
        traced("chown", path, result)
    }

    fn truncate(&self, path: &Path, size: u64) -> FsResult<()> {
        trace!("truncate {} size {size}", path.display());
        let result = self.real(path).and_then(|real| {
            let size = libc::off_t::try_from(size).map_err(|_| FsError::from_raw(libc::EFBIG))?;
            nix::unistd::truncate(real.as_path(), size)?;
            Ok(())
        });
        traced("truncate", path, result)
    }

    fn utimens(&self, path: &Path, atime: TimeSetting, mtime: TimeSetting) -> FsResult<()> {
        trace!("utimens {} atime {atime:?} mtime {mtime:?}", path.display());
        let result = self.real(path).and_then(|real| {
            nix::sys::stat::utimensat(
                None,
                real.as_path(),
                &atime.to_timespec(),
                &mtime.to_timespec(),
                UtimensatFlags::NoFollowSymlink,
            )?;
            Ok(())
        });
        traced("utimens", path, result)
    }

    fn open(&self, path: &Path, flags: i32) -> FsResult<OpenFileHandle> {
        trace!("open {} flags {flags:#o}", path.display());
        let result = self.real(path).and_then(|real| {
            let file = open_options(flags).open(real)?;
            Ok(OpenFileHandle::new(file))
        });
        traced("open", path, result)
    }

    fn create(&self, path: &Path, mode: u32, flags: i32) -> FsResult<OpenFileHandle> {
        trace!("create {} mode {mode:#o} flags {flags:#o}", path.display());
        let mode = sanitize(mode);
        let result = self.real(path).and_then(|real| {
            // OpenOptions refuses create(true) with read-only access; pass
            // O_CREAT as a raw flag instead.
            let file = open_options(flags | libc::O_CREAT)
                .mode(mode & !FILE_TYPE_MASK)
                .open(real)?;
            Ok(OpenFileHandle::new(file))
        });
        traced("create", path, result)
    }

    fn read(
        &self,
        path: &Path,
        buf: &mut [u8],
        offset: u64,
        handle: Option<&OpenFileHandle>,
    ) -> FsResult<usize> {
        trace!("read {} offset {offset} size {}", path.display(), buf.len());
        let result = Descriptor::resolve(handle, || self.open_read(path))
            .and_then(|descriptor| Ok(descriptor.file().read_at(buf, offset)?));
        traced("read", path, result)
    }

    fn write(
        &self,
        path: &Path,
        data: &[u8],
        offset: u64,
        handle: Option<&OpenFileHandle>,
    ) -> FsResult<usize> {
        trace!("write {} offset {offset} size {}", path.display(), data.len());
        let result = Descriptor::resolve(handle, || self.open_write(path))
            .and_then(|descriptor| Ok(descriptor.file().write_at(data, offset)?));
        traced("write", path, result)
    }

    fn statfs(&self, path: &Path) -> FsResult<Statvfs> {
        trace!("statfs {}", path.display());
        let result = self
            .real(path)
            .and_then(|real| Ok(statvfs(real.as_path())?));
        traced("statfs", path, result)
    }

    fn release(&self, path: &Path, handle: OpenFileHandle) -> FsResult<()> {
        trace!("release {}", path.display());
        drop(handle);
        Ok(())
    }

    fn fsync(&self, path: &Path, datasync: bool, _handle: Option<&OpenFileHandle>) -> FsResult<()> {
        trace!("fsync {} datasync {datasync}", path.display());
        Ok(())
    }

    fn fallocate(
        &self,
        path: &Path,
        mode: i32,
        offset: i64,
        length: i64,
        handle: Option<&OpenFileHandle>,
    ) -> FsResult<()> {
        trace!(
            "fallocate {} mode {mode:#x} offset {offset} length {length}",
            path.display()
        );
        if mode != 0 {
            return traced("fallocate", path, Err(FsError::NotSupported));
        }
        let result = Descriptor::resolve(handle, || self.open_write(path))
            .and_then(|descriptor| allocate(descriptor.file(), offset, length));
        traced("fallocate", path, result)
    }

    fn setxattr(&self, path: &Path, name: &OsStr, value: &[u8], flags: i32) -> FsResult<()> {
        trace!("setxattr {} {:?}", path.display(), name);
        let result = self
            .real(path)
            .and_then(|real| sys::lsetxattr(&real, name, value, flags));
        traced("setxattr", path, result)
    }

    fn getxattr(&self, path: &Path, name: &OsStr, buf: &mut [u8]) -> FsResult<usize> {
        trace!("getxattr {} {:?} size {}", path.display(), name, buf.len());
        let result = self
            .real(path)
            .and_then(|real| sys::lgetxattr(&real, name, buf));
        traced("getxattr", path, result)
    }

    fn listxattr(&self, path: &Path, buf: &mut [u8]) -> FsResult<usize> {
        trace!("listxattr {} size {}", path.display(), buf.len());
        let result = self.real(path).and_then(|real| sys::llistxattr(&real, buf));
        traced("listxattr", path, result)
    }

    fn removexattr(&self, path: &Path, name: &OsStr) -> FsResult<()> {
        trace!("removexattr {} {:?}", path.display(), name);
        let result = self
            .real(path)
            .and_then(|real| sys::lremovexattr(&real, name));
        traced("removexattr", path, result)
    }

    fn copy_file_range(
        &self,
        path_in: &Path,
        handle_in: Option<&OpenFileHandle>,
        offset_in: i64,
        path_out: &Path,
        handle_out: Option<&OpenFileHandle>,
        offset_out: i64,
        len: usize,
        flags: u32,
    ) -> FsResult<usize> {
        trace!(
            "copy_file_range {}@{offset_in} -> {}@{offset_out} len {len}",
            path_in.display(),
            path_out.display()
        );
        let result = (|| -> FsResult<usize> {
            let source = Descriptor::resolve(handle_in, || self.open_read(path_in))?;
            // A failed destination open drops, and so closes, `source`.
            let dest = Descriptor::resolve(handle_out, || self.open_write(path_out))?;
            copy_range(source.file(), offset_in, dest.file(), offset_out, len, flags)
        })();
        traced("copy_file_range", path_in, result)
    }
}
