// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Session file handles and per-call descriptor resolution.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use crate::error::FsResult;

/// Descriptor owned by one open/create ... release session.
///
/// Dropping the handle closes the descriptor, so release retires it exactly
/// once by taking it by value.
#[derive(Debug)]
pub struct OpenFileHandle {
    file: File,
}

impl OpenFileHandle {
    pub(crate) fn new(file: File) -> Self {
        Self { file }
    }

    /// Borrow the underlying file.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl AsFd for OpenFileHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for OpenFileHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Descriptor used by a single I/O call.
///
/// Either borrowed from the caller's session or opened for this call alone; a
/// transient descriptor is closed when the value drops, on every exit path.
#[derive(Debug)]
pub(crate) enum Descriptor<'a> {
    Session(&'a File),
    Transient(File),
}

impl<'a> Descriptor<'a> {
    /// Prefer the session handle; otherwise open transiently via `open`.
    pub(crate) fn resolve<F>(handle: Option<&'a OpenFileHandle>, open: F) -> FsResult<Self>
    where
        F: FnOnce() -> FsResult<File>,
    {
        match handle {
            Some(handle) => Ok(Self::Session(handle.file())),
            None => open().map(Self::Transient),
        }
    }

    pub(crate) fn file(&self) -> &File {
        match self {
            Self::Session(file) => file,
            Self::Transient(file) => file,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsError;

    #[test]
    fn session_handle_wins_over_transient_open() {
        let file = tempfile::tempfile().expect("tempfile");
        let handle = OpenFileHandle::new(file);
        let descriptor = Descriptor::resolve(Some(&handle), || {
            panic!("transient open must not run when a session handle exists")
        })
        .expect("resolve");
        assert!(!descriptor.is_transient());
        assert_eq!(descriptor.file().as_raw_fd(), handle.as_raw_fd());
    }

    #[test]
    fn missing_handle_opens_transiently_and_propagates_errors() {
        let descriptor =
            Descriptor::resolve(None, || Ok(tempfile::tempfile()?)).expect("resolve");
        assert!(descriptor.is_transient());

        let err = Descriptor::resolve(None, || Err(FsError::from_raw(libc::ENOENT)))
            .expect_err("open failure");
        assert_eq!(err.errno(), libc::ENOENT);
    }
}
