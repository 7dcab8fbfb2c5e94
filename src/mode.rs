// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Permission-bit sanitizing and file-type bit helpers.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs::FileType;
use std::os::unix::fs::FileTypeExt;

/// Owner, group and other read/write/execute bits.
pub const OPEN_PERMISSIONS: u32 = 0o777;

/// Mask selecting the file-type bits of a mode.
pub const FILE_TYPE_MASK: u32 = libc::S_IFMT as u32;

/// Force full read/write/execute access for owner, group and other.
///
/// Applied before every creation and explicit permission change. Restrictive
/// requests are widened on purpose: the mount exposes an unrestricted view.
#[must_use]
pub fn sanitize(mode: u32) -> u32 {
    mode | OPEN_PERMISSIONS
}

/// File-type bits of `mode`.
#[must_use]
pub fn file_type_bits(mode: u32) -> u32 {
    mode & FILE_TYPE_MASK
}

/// File-type mode bits matching a real entry's type.
#[must_use]
pub fn type_bits_for(file_type: FileType) -> u32 {
    let bits = if file_type.is_dir() {
        libc::S_IFDIR
    } else if file_type.is_symlink() {
        libc::S_IFLNK
    } else if file_type.is_fifo() {
        libc::S_IFIFO
    } else if file_type.is_socket() {
        libc::S_IFSOCK
    } else if file_type.is_block_device() {
        libc::S_IFBLK
    } else if file_type.is_char_device() {
        libc::S_IFCHR
    } else {
        libc::S_IFREG
    };
    bits as u32
}
