// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load and validate puredatafs startup configuration.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use log::LevelFilter;
use serde::Deserialize;

use crate::translate::MountRoot;

/// Environment variable naming the source directory.
pub const SOURCE_ENV: &str = "PUREDATAFS_SOURCE";
/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PUREDATAFS_CONFIG";
/// Filesystem name reported to the kernel when none is configured.
pub const DEFAULT_FSNAME: &str = "puredatafs";

/// Parsed TOML configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Source directory exposed by the mount.
    pub source: Option<PathBuf>,
    /// Log filter level.
    pub log_level: Option<String>,
    /// Mount settings.
    #[serde(default)]
    pub mount: MountSection,
}

/// `[mount]` table of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSection {
    /// Filesystem name shown in the mount table.
    pub fsname: Option<String>,
    /// Unmount automatically when the process exits.
    pub auto_unmount: Option<bool>,
    /// Let users other than the mounting user access the mount.
    pub allow_other: Option<bool>,
    /// Extra pass-through mount options.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Values supplied on the command line, taking precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--source` flag.
    pub source: Option<PathBuf>,
    /// `--log-level` flag.
    pub log_level: Option<String>,
    /// `-o` option lists.
    pub options: Vec<String>,
}

/// Settings handed to the mount glue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Filesystem name shown in the mount table.
    pub fsname: String,
    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
    /// Let users other than the mounting user access the mount.
    pub allow_other: bool,
    /// Pass-through mount options, file entries first.
    pub options: Vec<String>,
}

/// Fully resolved startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PureDataConfig {
    /// Source directory exposed by the mount.
    pub source: PathBuf,
    /// Explicit log level, if any.
    pub log_level: Option<LevelFilter>,
    /// Mount settings.
    pub mount: MountConfig,
}

impl PureDataConfig {
    /// Merge file, command line and environment into one configuration.
    ///
    /// The source directory is taken from the command line, then the file,
    /// then `env_source`; it is mandatory.
    pub fn resolve(
        file: ConfigFile,
        overrides: Overrides,
        env_source: Option<OsString>,
    ) -> Result<Self> {
        let source = overrides
            .source
            .or(file.source)
            .or_else(|| env_source.filter(|value| !value.is_empty()).map(PathBuf::from))
            .ok_or_else(|| {
                anyhow!("no source directory configured; pass --source, set `source` in the config file or export {SOURCE_ENV}")
            })?;
        let log_level = overrides
            .log_level
            .or(file.log_level)
            .map(|level| parse_level(&level))
            .transpose()?;
        let fsname = file
            .mount
            .fsname
            .unwrap_or_else(|| DEFAULT_FSNAME.to_owned());
        if fsname.trim().is_empty() {
            return Err(anyhow!("mount.fsname must not be empty"));
        }
        let mut options = file.mount.options;
        options.extend(overrides.options);
        for option in &options {
            if option.as_bytes().contains(&0) {
                return Err(anyhow!("mount option {option:?} contains NUL byte"));
            }
        }
        Ok(Self {
            source,
            log_level,
            mount: MountConfig {
                fsname,
                auto_unmount: file.mount.auto_unmount.unwrap_or(true),
                allow_other: file.mount.allow_other.unwrap_or(false),
                options,
            },
        })
    }

    /// Validate the source directory and build the mount root from it.
    pub fn mount_root(&self) -> Result<MountRoot> {
        validate_source(&self.source)
    }
}

fn parse_level(value: &str) -> Result<LevelFilter> {
    LevelFilter::from_str(value.trim()).map_err(|_| anyhow!("invalid log level {value:?}"))
}

/// Check that `source` is an absolute, existing directory that fits the path
/// buffer, and wrap it as a [`MountRoot`].
pub fn validate_source(source: &Path) -> Result<MountRoot> {
    if !source.is_absolute() {
        return Err(anyhow!("source {} must be absolute", source.display()));
    }
    if source.as_os_str().as_bytes().contains(&0) {
        return Err(anyhow!("source contains NUL byte"));
    }
    let metadata = fs::metadata(source)
        .with_context(|| format!("failed to stat source {}", source.display()))?;
    if !metadata.is_dir() {
        return Err(anyhow!("source {} is not a directory", source.display()));
    }
    MountRoot::new(source).with_context(|| format!("invalid source {}", source.display()))
}

/// Parse configuration text.
pub fn parse_config(text: &str) -> Result<ConfigFile> {
    toml::from_str(text).context("invalid puredatafs config TOML")
}

/// Load a configuration file from disk.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read puredatafs config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("in {}", path.display()))
}
