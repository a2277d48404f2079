//! tracing subscriber setup for the monitor binary.
//!
//! Three output styles: JSON lines, a bare compact format when journald is
//! already stamping each line, and a compact console format whose prefix
//! carries local time and the sensor's short hostname.

use crate::config::LoggingConfig;
use crate::AppError;
use chrono::{DateTime, Local};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStyle {
    Json,
    /// journald adds timestamp and hostname itself
    Journald,
    Console,
}

impl LogStyle {
    pub fn select(format: &str, under_journald: bool) -> Self {
        match format {
            "json" => LogStyle::Json,
            _ if under_journald => LogStyle::Journald,
            _ => LogStyle::Console,
        }
    }
}

fn under_journald() -> bool {
    std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok()
}

/// Filter directive when `RUST_LOG` is unset. `--verbose` wins over config.
pub fn default_directive(config: &LoggingConfig, verbose: bool) -> &str {
    if verbose {
        "trace"
    } else {
        &config.level
    }
}

/// Console line prefix: `2025-12-10 18:09:43.150 [sensor1]`.
pub struct SensorTimer {
    hostname: String,
}

impl SensorTimer {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.split('.').next().unwrap_or(hostname).to_string(),
        }
    }

    fn local() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self::new(&hostname)
    }

    pub fn stamp(&self, at: DateTime<Local>) -> String {
        format!(
            "{}.{:03} [{}]",
            at.format("%Y-%m-%d %H:%M:%S"),
            at.timestamp_subsec_millis(),
            self.hostname
        )
    }
}

impl FormatTime for SensorTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", self.stamp(Local::now()))
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<(), AppError> {
    let directive = default_directive(config, verbose);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let installed = match LogStyle::select(&config.format, under_journald()) {
        LogStyle::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(false)
            .try_init(),
        LogStyle::Journald => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_names(false)
            .without_time()
            .compact()
            .try_init(),
        LogStyle::Console => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_names(false)
            .with_timer(SensorTimer::local())
            .compact()
            .try_init(),
    };
    installed.map_err(|e| AppError::Config(format!("cannot install log subscriber: {}", e)))
}
