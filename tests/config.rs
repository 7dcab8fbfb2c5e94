// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate puredatafs configuration parsing and precedence.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use puredatafs::config::{
    load_config, parse_config, validate_source, ConfigFile, Overrides, PureDataConfig,
    DEFAULT_FSNAME,
};
use tempfile::TempDir;

#[test]
fn parses_a_full_config_file() {
    let file = parse_config(
        r#"
source = "/srv/data"
log_level = "debug"

[mount]
fsname = "scratch"
auto_unmount = false
allow_other = true
options = ["noatime", "nodev"]
"#,
    )
    .expect("parse");
    assert_eq!(file.source.as_deref(), Some(Path::new("/srv/data")));
    assert_eq!(file.log_level.as_deref(), Some("debug"));
    assert_eq!(file.mount.fsname.as_deref(), Some("scratch"));
    assert_eq!(file.mount.auto_unmount, Some(false));
    assert_eq!(file.mount.allow_other, Some(true));
    assert_eq!(file.mount.options, ["noatime", "nodev"]);
}

#[test]
fn empty_file_is_all_defaults() {
    assert_eq!(parse_config("").expect("parse"), ConfigFile::default());
}

#[test]
fn unknown_keys_are_rejected() {
    assert!(parse_config("sauce = \"/srv\"").is_err());
    assert!(parse_config("[mount]\nreadonly = true").is_err());
}

#[test]
fn defaults_apply_when_only_a_source_is_known() {
    let config = PureDataConfig::resolve(
        ConfigFile::default(),
        Overrides::default(),
        Some(OsString::from("/from/env")),
    )
    .expect("resolve");
    assert_eq!(config.source, PathBuf::from("/from/env"));
    assert_eq!(config.log_level, None);
    assert_eq!(config.mount.fsname, DEFAULT_FSNAME);
    assert!(config.mount.auto_unmount);
    assert!(!config.mount.allow_other);
    assert!(config.mount.options.is_empty());
}

#[test]
fn command_line_beats_file_beats_environment() {
    let file = parse_config("source = \"/from/file\"\nlog_level = \"warn\"").expect("parse");
    let env = Some(OsString::from("/from/env"));

    let config = PureDataConfig::resolve(file.clone(), Overrides::default(), env.clone())
        .expect("resolve");
    assert_eq!(config.source, PathBuf::from("/from/file"));
    assert_eq!(config.log_level, Some(LevelFilter::Warn));

    let overrides = Overrides {
        source: Some(PathBuf::from("/from/cli")),
        log_level: Some("trace".to_owned()),
        options: Vec::new(),
    };
    let config = PureDataConfig::resolve(file, overrides, env).expect("resolve");
    assert_eq!(config.source, PathBuf::from("/from/cli"));
    assert_eq!(config.log_level, Some(LevelFilter::Trace));
}

#[test]
fn missing_source_is_an_error() {
    let err = PureDataConfig::resolve(ConfigFile::default(), Overrides::default(), None)
        .expect_err("no source");
    assert!(err.to_string().contains("no source directory"));

    let err = PureDataConfig::resolve(
        ConfigFile::default(),
        Overrides::default(),
        Some(OsString::new()),
    )
    .expect_err("empty env source");
    assert!(err.to_string().contains("no source directory"));
}

#[test]
fn invalid_settings_are_rejected() {
    let overrides = Overrides {
        source: Some(PathBuf::from("/srv")),
        log_level: Some("chatty".to_owned()),
        options: Vec::new(),
    };
    assert!(PureDataConfig::resolve(ConfigFile::default(), overrides, None).is_err());

    let file = parse_config("source = \"/srv\"\n[mount]\nfsname = \"  \"").expect("parse");
    assert!(PureDataConfig::resolve(file, Overrides::default(), None).is_err());
}

#[test]
fn command_line_options_follow_file_options() {
    let file = parse_config("source = \"/srv\"\n[mount]\noptions = [\"noatime\"]").expect("parse");
    let overrides = Overrides {
        options: vec!["ro,nodev".to_owned()],
        ..Overrides::default()
    };
    let config = PureDataConfig::resolve(file, overrides, None).expect("resolve");
    assert_eq!(config.mount.options, ["noatime", "ro,nodev"]);
}

#[test]
fn load_config_reads_from_disk() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("puredatafs.toml");
    fs::write(&path, "source = \"/srv\"\n").expect("write");
    let file = load_config(&path).expect("load");
    assert_eq!(file.source.as_deref(), Some(Path::new("/srv")));

    assert!(load_config(&dir.path().join("absent.toml")).is_err());
    fs::write(&path, "source = ").expect("write");
    assert!(load_config(&path).is_err());
}

#[test]
fn validate_source_requires_an_absolute_directory() {
    let dir = TempDir::new().expect("tempdir");
    let root = validate_source(dir.path()).expect("valid source");
    assert_eq!(root.path(), dir.path());

    let mut trailing = dir.path().as_os_str().to_owned();
    trailing.push("/");
    let root = validate_source(Path::new(&trailing)).expect("trailing slash");
    assert_eq!(root.path(), dir.path());

    assert!(validate_source(Path::new("relative/dir")).is_err());
    assert!(validate_source(&dir.path().join("absent")).is_err());
    let file = dir.path().join("file");
    fs::write(&file, b"").expect("write");
    assert!(validate_source(&file).is_err());
}
