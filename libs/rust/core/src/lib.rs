//! Core shared utilities for the model serving services.

use anyhow::Result;
use once_cell::sync::OnceCell;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub mod metrics;
pub mod settings;

pub use metrics::ServiceMetrics;
pub use settings::{load_settings, settings_builder};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Owns the process-wide log sink. Dropping it flushes the file writer, so keep
/// it alive in `main` until shutdown.
#[must_use = "dropping the guard closes the log sink"]
pub struct LogGuard {
    file: Option<WorkerGuard>,
    service: String,
}

impl LogGuard {
    pub fn has_file_sink(&self) -> bool { self.file.is_some() }

    pub fn shutdown(self) {
        info!(target: "serving_core", service = %self.service, "log sink closing");
        drop(self);
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Install the global subscriber: stdout (text or JSON lines when `SERVE_JSON_LOG=1`)
/// plus an optional daily-rolling JSON file sink under `log_dir`.
///
/// A second call is a no-op and returns a guard without a file sink.
pub fn init_tracing(service: &str, log_dir: Option<&Path>) -> Result<LogGuard> {
    let mut file_guard = None;
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let stdout_layer = if env_flag("SERVE_JSON_LOG") {
            fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false).boxed()
        } else {
            fmt::layer().with_target(true).with_thread_ids(false).with_line_number(true).boxed()
        };
        let file_layer = match log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = tracing_appender::rolling::daily(dir, format!("{service}.log"));
                let (writer, guard) = tracing_appender::non_blocking(appender);
                file_guard = Some(guard);
                Some(fmt::layer().json().flatten_event(true).with_ansi(false).with_writer(writer))
            }
            None => None,
        };
        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .with(env_filter)
            .try_init()?;
        Ok(())
    })?;
    info!(target: "serving_core", service, file_sink = file_guard.is_some(), "tracing initialized");
    Ok(LogGuard { file: file_guard, service: service.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let first = init_tracing("core-test", None).unwrap();
        let second = init_tracing("core-test", None).unwrap();
        assert!(!first.has_file_sink());
        assert!(!second.has_file_sink());
        second.shutdown();
    }
}
