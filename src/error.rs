// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error taxonomy for passthrough operations and errno mapping.
// Author: Lukas Bower

use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Errors returned by passthrough operations.
///
/// Every variant maps onto a single errno via [`FsError::errno`], which is the
/// value handed back to the kernel. OS failures keep their original code.
#[derive(Debug, Error)]
pub enum FsError {
    /// The translated path would not fit the path buffer.
    #[error("translated path of {len} bytes exceeds the {limit} byte path buffer")]
    PathTooLong {
        /// Length the joined path would have, including the trailing NUL.
        len: usize,
        /// Capacity of the path buffer.
        limit: usize,
    },
    /// A virtual path did not start with the separator.
    #[error("virtual path {0:?} is not absolute")]
    NotAbsolute(String),
    /// The requested operation mode is not supported.
    #[error("operation not supported")]
    NotSupported,
    /// The underlying OS call failed.
    #[error(transparent)]
    Os(#[from] io::Error),
}

impl FsError {
    /// Numeric errno reported to the caller for this error.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::PathTooLong { .. } => libc::ENAMETOOLONG,
            Self::NotAbsolute(_) => libc::EINVAL,
            Self::NotSupported => libc::EOPNOTSUPP,
            Self::Os(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// Build an OS error from a raw errno value.
    #[must_use]
    pub fn from_raw(code: i32) -> Self {
        Self::Os(io::Error::from_raw_os_error(code))
    }

    /// Capture the calling thread's current errno.
    #[must_use]
    pub fn last_os_error() -> Self {
        Self::Os(io::Error::last_os_error())
    }
}

impl From<Errno> for FsError {
    fn from(errno: Errno) -> Self {
        Self::from_raw(errno as i32)
    }
}

/// Result alias used by every passthrough operation.
pub type FsResult<T> = Result<T, FsError>;
