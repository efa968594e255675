//! # Structured Logging Module
//!
//! Environment-aware structured logging for walk runs. Human-readable console
//! output by default, one JSON object per event when `BOOM_LOG_FORMAT=json`.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let format = log_format(std::env::var("BOOM_LOG_FORMAT").ok().as_deref());
        let filter = || {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)))
        };

        let console = match format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter())
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter())
                .boxed(),
        };

        // A global subscriber may already be installed by an embedding host or a test harness
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = format == LogFormat::Json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("BOOM_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        "test" => "warn".to_string(),
        _ => "debug".to_string(),
    }
}

fn log_format(value: Option<&str>) -> LogFormat {
    match value {
        Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

/// Log structured data for walk lifecycle operations
pub fn log_walk_operation(
    operation: &str,
    archive: &str,
    input_id: &str,
    position: u64,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        archive = %archive,
        input_id = %input_id,
        position = position,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🚶 WALK_OPERATION"
    );
}

/// Log the per-taxon scheduling decision
pub fn log_taxon_decision(
    group_key: &str,
    squid: Option<&str>,
    occurrence_id: Option<i64>,
    record_count: usize,
    will_compute: bool,
    tasks: usize,
) {
    tracing::info!(
        group_key = %group_key,
        squid = squid,
        occurrence_id = occurrence_id,
        record_count = record_count,
        will_compute = will_compute,
        tasks = tasks,
        "🧬 TAXON_DECISION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("test"), "warn");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_log_format_selection() {
        assert_eq!(log_format(Some("JSON")), LogFormat::Json);
        assert_eq!(log_format(Some("pretty")), LogFormat::Pretty);
        assert_eq!(log_format(None), LogFormat::Pretty);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_walk_operation("resume", "Heuchera", "/data/h.csv", 0, None);
    }
}
