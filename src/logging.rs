use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, info, metadata::LevelFilter, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

const TRACE_FILE_PREFIX: &str = "sensor-bridge.log";

fn stdout_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn install(trace_files: Option<(Level, PathBuf)>) {
    let stdout = tracing_subscriber::fmt::layer().with_filter(stdout_filter());

    let files = trace_files.as_ref().map(|(level, dir)| {
        tracing_subscriber::fmt::layer()
            .with_writer(RollingFileAppender::new(
                Rotation::DAILY,
                dir,
                TRACE_FILE_PREFIX,
            ))
            .with_ansi(false)
            .with_filter(LevelFilter::from(*level))
    });

    tracing_subscriber::registry().with(stdout).with(files).init();

    match trace_files {
        Some((level, dir)) => debug!(%level, ?dir, "Tracing to stdout and daily files"),
        None => debug!("Tracing to stdout"),
    }
}

/// Initialize tracing.
///
/// Stdout is filtered by `RUST_LOG` (default `info`).
/// If a directory is given, traces at or above the level also go to daily rolling files there.
///
/// Only the first call does anything, so tests may call this freely.
pub async fn init(trace_files: Option<(Level, PathBuf)>) {
    static INITIALIZED: Mutex<bool> = Mutex::const_new(false);

    let mut initialized = INITIALIZED.lock().await;
    if *initialized {
        return;
    }

    install(trace_files);
    *initialized = true;

    info!("Logging initialized");
}
