// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Path-addressed filesystem primitives served by the mount.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::ffi::{OsStr, OsString};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::sys::statvfs::Statvfs;
use nix::sys::time::TimeSpec;

use crate::error::FsResult;
use crate::handle::OpenFileHandle;

/// Minimal metadata synthesized for a directory listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntryStat {
    /// Inode number reported by the real directory.
    pub ino: u64,
    /// File-type bits of the real entry, zero when the type is unknown.
    pub mode: u32,
}

/// Requested value for one timestamp of a timestamp update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSetting {
    /// Leave the timestamp unchanged.
    Omit,
    /// Set the timestamp to the current time.
    Now,
    /// Set the timestamp to an explicit time.
    At(SystemTime),
}

impl TimeSetting {
    pub(crate) fn to_timespec(self) -> TimeSpec {
        match self {
            Self::Omit => TimeSpec::new(0, libc::UTIME_OMIT),
            Self::Now => TimeSpec::new(0, libc::UTIME_NOW),
            Self::At(time) => match time.duration_since(UNIX_EPOCH) {
                Ok(since) => TimeSpec::new(
                    since.as_secs() as libc::time_t,
                    since.subsec_nanos() as libc::c_long,
                ),
                Err(before) => {
                    let before = before.duration();
                    let mut secs = -(before.as_secs() as libc::time_t);
                    let mut nanos = before.subsec_nanos() as libc::c_long;
                    if nanos > 0 {
                        secs -= 1;
                        nanos = 1_000_000_000 - nanos;
                    }
                    TimeSpec::new(secs, nanos)
                }
            },
        }
    }
}

/// Listing callback: receives each entry name and its synthesized metadata,
/// returns `true` once it cannot accept further entries.
pub type DirFiller<'a> = dyn FnMut(&OsStr, &DirEntryStat) -> bool + 'a;

/// One method per filesystem primitive, addressed by virtual path.
///
/// Implementations hold only immutable configuration; every call is
/// self-contained and safe to run concurrently with any other.
pub trait Operations: Send + Sync {
    /// Metadata of the entry itself; symlinks are not followed.
    fn getattr(&self, path: &Path) -> FsResult<Metadata>;

    /// Check accessibility with an `access(2)` mask.
    fn access(&self, path: &Path, mask: i32) -> FsResult<()>;

    /// Target of a symbolic link.
    fn readlink(&self, path: &Path) -> FsResult<PathBuf>;

    /// Feed every entry of a directory to `filler`, stopping early when it
    /// reports a full buffer.
    fn readdir(&self, path: &Path, filler: &mut DirFiller<'_>) -> FsResult<()>;

    /// Create a regular file, FIFO or special node according to `mode`.
    fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> FsResult<()>;

    /// Create a directory.
    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()>;

    /// Remove a non-directory entry.
    fn unlink(&self, path: &Path) -> FsResult<()>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &Path) -> FsResult<()>;

    /// Create a symbolic link at `link` pointing at `target`.
    fn symlink(&self, target: &Path, link: &Path) -> FsResult<()>;

    /// Rename `from` to `to`.
    fn rename(&self, from: &Path, to: &Path) -> FsResult<()>;

    /// Create a hard link `to` referring to `from`.
    fn link(&self, from: &Path, to: &Path) -> FsResult<()>;

    /// Change permission bits.
    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()>;

    /// Change ownership without following symlinks; `None` keeps the id.
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()>;

    /// Set a file's length.
    fn truncate(&self, path: &Path, size: u64) -> FsResult<()>;

    /// Update access and modification times without following symlinks.
    fn utimens(&self, path: &Path, atime: TimeSetting, mtime: TimeSetting) -> FsResult<()>;

    /// Open an existing file with caller-supplied `open(2)` flags.
    fn open(&self, path: &Path, flags: i32) -> FsResult<OpenFileHandle>;

    /// Create and open a file with caller-supplied flags.
    fn create(&self, path: &Path, mode: u32, flags: i32) -> FsResult<OpenFileHandle>;

    /// Positioned read into `buf`; returns the byte count.
    fn read(
        &self,
        path: &Path,
        buf: &mut [u8],
        offset: u64,
        handle: Option<&OpenFileHandle>,
    ) -> FsResult<usize>;

    /// Positioned write of `data`; returns the byte count.
    fn write(
        &self,
        path: &Path,
        data: &[u8],
        offset: u64,
        handle: Option<&OpenFileHandle>,
    ) -> FsResult<usize>;

    /// Statistics of the filesystem holding `path`.
    fn statfs(&self, path: &Path) -> FsResult<Statvfs>;

    /// Close a session handle.
    fn release(&self, path: &Path, handle: OpenFileHandle) -> FsResult<()>;

    /// Flush file contents.
    fn fsync(&self, path: &Path, datasync: bool, handle: Option<&OpenFileHandle>) -> FsResult<()>;

    /// Reserve space for a byte range.
    fn fallocate(
        &self,
        path: &Path,
        mode: i32,
        offset: i64,
        length: i64,
        handle: Option<&OpenFileHandle>,
    ) -> FsResult<()>;

    /// Set an extended attribute on the entry itself.
    fn setxattr(&self, path: &Path, name: &OsStr, value: &[u8], flags: i32) -> FsResult<()>;

    /// Read an extended attribute into `buf`; an empty buffer asks for the
    /// size only.
    fn getxattr(&self, path: &Path, name: &OsStr, buf: &mut [u8]) -> FsResult<usize>;

    /// List extended attribute names into `buf`; an empty buffer asks for the
    /// size only.
    fn listxattr(&self, path: &Path, buf: &mut [u8]) -> FsResult<usize>;

    /// Remove an extended attribute from the entry itself.
    fn removexattr(&self, path: &Path, name: &OsStr) -> FsResult<()>;

    /// Copy `len` bytes between two files; returns the bytes copied.
    #[allow(clippy::too_many_arguments)]
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
    ) -> FsResult<usize>;
}

/// Join a directory's virtual path and an entry name.
#[must_use]
pub fn child_path(parent: &Path, name: &OsStr) -> PathBuf {
    let mut joined = OsString::from(parent.as_os_str());
    if parent.as_os_str() != "/" {
        joined.push("/");
    }
    joined.push(name);
    PathBuf::from(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn child_paths_never_double_the_separator() {
        assert_eq!(child_path(Path::new("/"), OsStr::new("a")), PathBuf::from("/a"));
        assert_eq!(
            child_path(Path::new("/a/b"), OsStr::new("c")),
            PathBuf::from("/a/b/c")
        );
    }

    #[test]
    fn time_settings_encode_special_values() {
        assert_eq!(TimeSetting::Omit.to_timespec().tv_nsec(), libc::UTIME_OMIT);
        assert_eq!(TimeSetting::Now.to_timespec().tv_nsec(), libc::UTIME_NOW);
        let at = UNIX_EPOCH + Duration::new(1_700_000_000, 250);
        let spec = TimeSetting::At(at).to_timespec();
        assert_eq!(spec.tv_sec(), 1_700_000_000);
        assert_eq!(spec.tv_nsec(), 250);
    }

    #[test]
    fn times_before_the_epoch_normalise_nanoseconds() {
        let at = UNIX_EPOCH - Duration::new(1, 250_000_000);
        let spec = TimeSetting::At(at).to_timespec();
        assert_eq!(spec.tv_sec(), -2);
        assert_eq!(spec.tv_nsec(), 750_000_000);
    }
}
