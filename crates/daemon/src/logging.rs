//! Logging setup
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (default: `conductor=info`)
//! - `CONDUCTOR_LOG_FORMAT`: `json` for structured output, anything else is pretty
//! - `CONDUCTOR_LOG_DIR`: also write JSON records to a daily rolling file there

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "conductor=info";
const LOG_FILE_PREFIX: &str = "conductor.log";

/// Flushes the rolling file writer when dropped; keep it alive in main
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

pub fn init() -> Result<LogGuard> {
    let log_format = std::env::var("CONDUCTOR_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to create env filter")?;

    let (file_layer, file_guard) = match std::env::var("CONDUCTOR_LOG_DIR") {
        Ok(dir) => {
            let dir = shellexpand::tilde(&dir).into_owned();
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);
    let installed = match log_format.as_str() {
        // Production: JSON structured logging
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.context("Failed to install tracing subscriber")?;

    Ok(LogGuard { _file: file_guard })
}
