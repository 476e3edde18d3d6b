//! Logging setup
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (default: `retrieval=info`)
//! - `RETRIEVAL_LOG_FORMAT`: `pretty` (default) or `json`
//!
//! # Example
//!
//! ```text
//! RUST_LOG=retrieval=debug RETRIEVAL_LOG_FORMAT=json \
//!     retrieval-grid --log-file run.log run experiments/experiment2.toml
//! ```

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Prefix match: covers retrieval_core, retrieval_infra_* and the binary
const DEFAULT_FILTER: &str = "retrieval=info";

/// Initialize the global subscriber
///
/// Logs go to stderr, or to `log_file` when given. The returned guard must be
/// held until exit so buffered file output is flushed.
pub fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to create env filter")?;
    let json = std::env::var("RETRIEVAL_LOG_FORMAT").is_ok_and(|f| f == "json");

    let (writer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let dir = dir.unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .context("--log-file must name a file")?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer), Some(guard))
        }
        None => (
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stderr),
            None,
        ),
    };
    let ansi = log_file.is_none();

    let layer = if json {
        // Production: JSON structured logging
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_ansi(ansi).with_writer(writer).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
