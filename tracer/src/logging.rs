//! Console and file logging for the CLI.
//!
//! Writes to stderr and to `rpki-tracer.log` (truncated at start). `RUST_LOG`
//! takes precedence over the `--verbose` default.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "rpki-tracer.log";

/// Keep alive until exit; dropping it flushes the file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

pub fn default_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

pub fn init_logging(log_dir: &Path, verbose: bool) -> io::Result<LoggingGuard> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(LOG_FILE), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false).with_target(false);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr).with_target(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    tracing_subscriber::registry().with(env_filter).with(file_layer).with(console_layer).init();

    Ok(LoggingGuard { _file_guard: file_guard })
}
