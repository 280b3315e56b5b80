// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hutch::bus::loopback::LoopbackNet;
use hutch::config::Config;
use hutch::engine::InertEngine;
use hutch::error::CoreError;
use hutch::nvram::FileNvram;
use hutch::runtime::Runtime;
use hutch::storage;

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --debug / --log-level > RUST_LOG > default ("info").
    let filter = if config.effective_log_level() == "info" {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.effective_log_level()))
    } else {
        EnvFilter::try_new(config.effective_log_level())
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match (&config.log_file, config.log_format.as_str()) {
        (Some(path), format) => match std::fs::File::create(path) {
            Ok(file) => {
                let writer = Arc::new(file);
                if format == "json" {
                    fmt::fmt().with_env_filter(filter).with_writer(writer).json().try_init()
                } else {
                    fmt::fmt().with_env_filter(filter).with_writer(writer).try_init()
                }
            }
            Err(e) => {
                eprintln!("error: cannot open log file: {e}");
                fmt::fmt().with_env_filter(filter).try_init()
            }
        },
        (None, "json") => fmt::fmt().with_env_filter(filter).json().try_init(),
        (None, _) => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

fn run(config: &Config) -> anyhow::Result<CoreError> {
    let mut nvram = Box::new(FileNvram::open(&config.nvram_file)?);

    // A script named on the command line is installed before starting.
    if let Some(path) = &config.script {
        let body = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_owned());
        storage::install(nvram.as_mut(), &name, &body)?;
        info!(name = %name, len = body.len(), "installed script from command line");
    }

    let net = LoopbackNet::new();
    let bus = net.endpoint();
    let triggers = bus.triggers();
    let mut runtime = Runtime::new(
        Box::new(bus),
        nvram,
        Box::new(InertEngine),
        triggers,
        config.name.clone(),
    );
    Ok(runtime.run())
}

fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }
    init_tracing(&config);

    if config.daemon {
        // Process supervision is the service manager's job on this target.
        warn!("--daemon requested; running in foreground under supervision");
    }

    match run(&config) {
        Ok(CoreError::Restart) => {
            info!("restart requested");
            std::process::exit(0);
        }
        Ok(status) => {
            error!(status = %status, "runtime exited");
            std::process::exit(status.exit_code());
        }
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}
