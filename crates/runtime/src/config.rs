// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Scripted device runtime for the distributed-object bus.
#[derive(Debug, Parser)]
#[command(name = "hutch", version, about)]
pub struct Config {
    /// Enable verbose runtime debug output.
    #[arg(long, env = "HUTCH_DEBUG")]
    pub debug: bool,

    /// Detach from the terminal and run in the background.
    #[arg(long, env = "HUTCH_DAEMON")]
    pub daemon: bool,

    /// Append logs to this file instead of stderr.
    #[arg(long, env = "HUTCH_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Path of the file backing NVRAM storage.
    #[arg(long, env = "HUTCH_NVRAM_FILE", default_value = "hutch-nvram.json")]
    pub nvram_file: PathBuf,

    /// Device name announced over About.
    #[arg(long, env = "HUTCH_NAME")]
    pub name: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "HUTCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "HUTCH_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Script file to install into NVRAM before starting.
    pub script: Option<PathBuf>,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid log format: {}", self.log_format);
        }
        if let Some(script) = &self.script {
            if !script.exists() {
                anyhow::bail!("script file not found: {}", script.display());
            }
        }
        Ok(())
    }

    /// Effective log level: `--debug` overrides `--log-level`.
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
