// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for the puredatafs mount tool.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! CLI entry point for the puredatafs passthrough filesystem.

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, LevelFilter};
use nix::sys::stat::{umask, Mode};
use puredatafs::config::{
    load_config, ConfigFile, Overrides, PureDataConfig, CONFIG_ENV, SOURCE_ENV,
};
use puredatafs::{mount, PureDataFs};

#[derive(Debug, Parser)]
#[command(
    author = "Lukas Bower",
    version,
    about = "Expose a directory at a mount point with fully open permissions"
)]
struct Cli {
    /// Path to the puredatafs config TOML.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source directory to expose.
    #[arg(long, value_name = "DIR")]
    source: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and prepare the mount point without mounting.
    #[arg(long, default_value_t = false)]
    check: bool,

    /// Comma-separated mount options, as for mount(8).
    #[arg(short = 'o', value_name = "OPTIONS")]
    options: Vec<String>,

    /// Mount point on the host filesystem.
    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let file = match resolve_config_path(cli.config) {
        Some(path) => load_config(&path)?,
        None => ConfigFile::default(),
    };
    let overrides = Overrides {
        source: cli.source,
        log_level: cli.log_level,
        options: cli.options,
    };
    let config = PureDataConfig::resolve(file, overrides, env::var_os(SOURCE_ENV))?;
    init_logging(config.log_level);

    let root = config.mount_root()?;
    info!("source {}", root.path().display());

    // Creation modes are already widened; the process umask must not narrow them.
    let _ = umask(Mode::empty());

    if cli.check {
        mount::prepare_mountpoint(&cli.mountpoint)?;
        info!(
            "check ok: {} -> {} ({:?})",
            root.path().display(),
            cli.mountpoint.display(),
            config.mount
        );
        return Ok(());
    }
    mount::mount(PureDataFs::new(root), &cli.mountpoint, &config.mount)
}

fn resolve_config_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    if cli_path.is_some() {
        return cli_path;
    }
    let value = env::var(CONFIG_ENV).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn init_logging(level: Option<LevelFilter>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.init();
}
