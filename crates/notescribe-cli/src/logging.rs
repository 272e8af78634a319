//! Subscriber setup.
//!
//! Environment variables take precedence over the `logging:` block:
//!
//! - `LOG_FORMAT`: `json` or `text`
//! - `LOG_FILE`: path of a daily-rotated log file (disables console output)
//! - `LOG_ANSI`: `true`/`false`, overrides colour detection on the console
//! - `RUST_LOG`: standard env filter, replaces the configured level

use std::path::{Path, PathBuf};

use notescribe_core::config::LogFormat;
use notescribe_core::{defaults, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATES: &[&str] = &[
    "notescribe",
    "notescribe_core",
    "notescribe_vault",
    "notescribe_inference",
    "notescribe_jobs",
];

/// Map a configured level name onto a `tracing` directive.
fn directive_level(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
}

/// Default filter: the configured level for our crates, `warn` elsewhere.
pub fn default_filter(level: &str) -> String {
    let level = directive_level(level);
    std::iter::once("warn".to_string())
        .chain(CRATES.iter().map(|c| format!("{}={}", c, level)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. The returned guard must live until exit
/// so buffered file output is flushed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let json = match std::env::var(defaults::ENV_LOG_FORMAT) {
        Ok(v) => v.eq_ignore_ascii_case("json"),
        Err(_) => config.format == LogFormat::Json,
    };
    let log_file = std::env::var(defaults::ENV_LOG_FILE)
        .ok()
        .map(PathBuf::from)
        .or_else(|| config.file.clone());
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let level = if verbose { "debug" } else { config.level.as_str() };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let registry = tracing_subscriber::registry().with(env_filter);

    match log_file {
        Some(file) => {
            let path = file.as_path();
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("notescribe.log");
            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            if json {
                registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                    .init();
            } else {
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(log_ansi.unwrap_or(false));
                registry.with(layer).init();
            }
            Some(guard)
        }
        None => {
            if json {
                registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            } else {
                let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
                if let Some(ansi) = log_ansi {
                    layer = layer.with_ansi(ansi);
                }
                registry.with(layer).init();
            }
            None
        }
    }
}
