// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Raw wrappers for the no-follow extended attribute calls.
// Author: Lukas Bower
#![allow(unsafe_code)]

use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{FsError, FsResult};

fn c_string(bytes: &[u8]) -> FsResult<CString> {
    CString::new(bytes).map_err(|_| FsError::from_raw(libc::EINVAL))
}

fn c_path(path: &Path) -> FsResult<CString> {
    c_string(path.as_os_str().as_bytes())
}

fn c_name(name: &OsStr) -> FsResult<CString> {
    c_string(name.as_bytes())
}

#[cfg(target_os = "linux")]
mod imp {
    use super::*;

    pub(crate) fn lsetxattr(path: &Path, name: &OsStr, value: &[u8], flags: i32) -> FsResult<()> {
        let path = c_path(path)?;
        let name = c_name(name)?;
        // SAFETY: path and name are NUL-terminated and `value` is valid for
        // `value.len()` bytes.
        let rc = unsafe {
            libc::lsetxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                flags,
            )
        };
        if rc != 0 {
            return Err(FsError::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn lgetxattr(path: &Path, name: &OsStr, buf: &mut [u8]) -> FsResult<usize> {
        let path = c_path(path)?;
        let name = c_name(name)?;
        let target = if buf.is_empty() {
            std::ptr::null_mut()
        } else {
            buf.as_mut_ptr().cast()
        };
        // SAFETY: `target` is null with a zero size or points at `buf.len()`
        // writable bytes.
        let size = unsafe { libc::lgetxattr(path.as_ptr(), name.as_ptr(), target, buf.len()) };
        if size < 0 {
            return Err(FsError::last_os_error());
        }
        Ok(size as usize)
    }

    pub(crate) fn llistxattr(path: &Path, buf: &mut [u8]) -> FsResult<usize> {
        let path = c_path(path)?;
        let target = if buf.is_empty() {
            std::ptr::null_mut()
        } else {
            buf.as_mut_ptr().cast()
        };
        // SAFETY: as for lgetxattr.
        let size = unsafe { libc::llistxattr(path.as_ptr(), target, buf.len()) };
        if size < 0 {
            return Err(FsError::last_os_error());
        }
        Ok(size as usize)
    }

    pub(crate) fn lremovexattr(path: &Path, name: &OsStr) -> FsResult<()> {
        let path = c_path(path)?;
        let name = c_name(name)?;
        // SAFETY: both arguments are NUL-terminated strings.
        let rc = unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) };
        if rc != 0 {
            return Err(FsError::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::*;

    pub(crate) fn lsetxattr(path: &Path, name: &OsStr, _value: &[u8], _flags: i32) -> FsResult<()> {
        c_path(path)?;
        c_name(name)?;
        Err(FsError::NotSupported)
    }

    pub(crate) fn lgetxattr(path: &Path, name: &OsStr, _buf: &mut [u8]) -> FsResult<usize> {
        c_path(path)?;
        c_name(name)?;
        Err(FsError::NotSupported)
    }

    pub(crate) fn llistxattr(path: &Path, _buf: &mut [u8]) -> FsResult<usize> {
        c_path(path)?;
        Err(FsError::NotSupported)
    }

    pub(crate) fn lremovexattr(path: &Path, name: &OsStr) -> FsResult<()> {
        c_path(path)?;
        c_name(name)?;
        Err(FsError::NotSupported)
    }
}

pub(crate) use imp::*;
