//! Global tracing subscriber and panic hook.

// External crates
use anyhow::{Context, Result};
use std::any::Any;
use std::io::IsTerminal;
use std::panic;
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*, registry::Registry};

/// Level used when neither `--log-level` nor `RUST_LOG` is set. Keeps a
/// successful run quiet on stderr.
const DEFAULT_LOG_LEVEL: &str = "warn";

/// Install the global subscriber.
///
/// - `level` (from `--log-level`) wins over `RUST_LOG`, which wins over `warn`.
/// - Output goes to stderr through a non-blocking writer; keep the returned guard
///   alive until exit so buffered lines are flushed.
/// - `json` switches the human readable format for one JSON object per line.
pub fn init_tracing(level: Option<&str>, json: bool) -> Result<WorkerGuard> {
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = match level {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log level directive {directives:?}"))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
    };

    let fmt_layer = (!json).then(|| {
        fmt::layer()
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(non_blocking_writer.clone())
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_writer(non_blocking_writer.clone())
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    });

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(json_layer)
        .with(ErrorLayer::default());

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;
    Ok(guard)
}

/// Report panics through tracing, then hand over to the previously installed
/// hook so the usual message still reaches stderr whatever the log filter.
pub fn init_panic_handler() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %payload_message(panic_info.payload()),
            location = %location,
            "Application panicked!"
        );

        previous(panic_info);
    }));
}

fn payload_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "Unknown panic"
    }
}
