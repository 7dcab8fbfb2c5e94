// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Library root for the puredatafs passthrough filesystem.
// Author: Lukas Bower
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Passthrough filesystem exposing a source directory at a mount point.
//!
//! Every operation is forwarded to the matching path under the source
//! directory. Creation and explicit permission changes always end up with
//! read, write and execute bits set for owner, group and other.

/// Startup configuration loader.
pub mod config;
/// Error taxonomy and errno mapping.
pub mod error;
/// Session handles and transient descriptors.
pub mod handle;
/// Permission sanitizing.
pub mod mode;
/// FUSE glue.
pub mod mount;
/// Path-addressed operation trait.
pub mod ops;
/// Passthrough dispatcher.
pub mod passthrough;
mod sys;
/// Virtual to real path translation.
pub mod translate;

pub use error::{FsError, FsResult};
pub use handle::OpenFileHandle;
pub use ops::{DirEntryStat, Operations, TimeSetting};
pub use passthrough::PureDataFs;
pub use translate::MountRoot;
