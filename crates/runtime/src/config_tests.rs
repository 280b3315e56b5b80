// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::*;

fn parse(args: &[&str]) -> Config {
    Config::parse_from(std::iter::once("hutch").chain(args.iter().copied()))
}

#[test]
fn defaults() {
    let config = parse(&[]);
    assert!(!config.debug);
    assert!(!config.daemon);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.log_format, "text");
    assert_eq!(config.nvram_file, PathBuf::from("hutch-nvram.json"));
    assert!(config.script.is_none());
    config.validate().unwrap();
}

#[test]
fn debug_overrides_log_level() {
    let config = parse(&["--debug", "--log-level", "warn"]);
    assert_eq!(config.effective_log_level(), "debug");
    let config = parse(&["--log-level", "warn"]);
    assert_eq!(config.effective_log_level(), "warn");
}

#[test]
fn positional_script_argument() {
    let config = parse(&["--name", "kitchen-lamp", "app.js"]);
    assert_eq!(config.name.as_deref(), Some("kitchen-lamp"));
    assert_eq!(config.script, Some(PathBuf::from("app.js")));
}

#[test]
fn invalid_log_format_rejected() {
    let config = parse(&["--log-format", "xml"]);
    assert!(config.validate().is_err());
}

#[test]
fn missing_script_file_rejected() {
    let config = parse(&["/definitely/not/a/file.js"]);
    assert!(config.validate().is_err());
}
