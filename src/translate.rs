// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Map virtual mount paths onto real paths under the mount root.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use crate::error::{FsError, FsResult};

/// Capacity of the path buffer handed to the OS, including the trailing NUL.
pub const PATH_CAPACITY: usize = libc::PATH_MAX as usize;

/// Real directory backing the mount.
///
/// Built once at startup and shared read-only by every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRoot {
    root: PathBuf,
    capacity: usize,
}

impl MountRoot {
    /// Build a mount root using the default path buffer capacity.
    pub fn new(root: impl Into<PathBuf>) -> FsResult<Self> {
        Self::with_capacity(root, PATH_CAPACITY)
    }

    /// Build a mount root with an explicit path buffer capacity.
    pub fn with_capacity(root: impl Into<PathBuf>, capacity: usize) -> FsResult<Self> {
        let mut bytes = root.into().into_os_string().into_vec();
        if bytes.first() != Some(&b'/') {
            return Err(FsError::NotAbsolute(
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }
        while bytes.len() > 1 && bytes.ends_with(b"/") {
            bytes.pop();
        }
        let len = bytes.len() + 1;
        if len > capacity {
            return Err(FsError::PathTooLong { len, limit: capacity });
        }
        Ok(Self {
            root: PathBuf::from(OsString::from_vec(bytes)),
            capacity,
        })
    }

    /// Real directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path buffer capacity enforced by [`MountRoot::translate`].
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Translate a virtual path into the matching real path.
    ///
    /// `/` maps to the root itself; any other path is appended verbatim, with
    /// no separator inserted since the virtual path already carries one.
    pub fn translate(&self, virtual_path: &Path) -> FsResult<PathBuf> {
        let suffix = virtual_path.as_os_str().as_bytes();
        if suffix.first() != Some(&b'/') {
            return Err(FsError::NotAbsolute(
                virtual_path.to_string_lossy().into_owned(),
            ));
        }
        if suffix == b"/" {
            return Ok(self.root.clone());
        }
        let root = self.root.as_os_str().as_bytes();
        // A root of "/" would otherwise produce "//name".
        let prefix: &[u8] = if root == b"/" { b"" } else { root };
        let len = prefix.len() + suffix.len() + 1;
        if len > self.capacity {
            return Err(FsError::PathTooLong {
                len,
                limit: self.capacity,
            });
        }
        let mut joined = Vec::with_capacity(len - 1);
        joined.extend_from_slice(prefix);
        joined.extend_from_slice(suffix);
        Ok(PathBuf::from(OsString::from_vec(joined)))
    }
}
