//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to both console and a
//! JSON log file, for following pipeline executions and long-running
//! migration jobs after the fact.

use crate::config::ConfigManager;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once, and never panics if another global
/// subscriber is already installed.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let log_level = get_log_level(&environment);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(env_filter(&log_level));

        let log_dir = PathBuf::from("log");
        if let Err(e) = fs::create_dir_all(&log_dir) {
            // No file output; console logging still works
            let _ = tracing_subscriber::registry().with(console_layer).try_init();
            tracing::warn!(error = %e, "Could not create log directory, logging to console only");
            return;
        }

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_path = log_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = tracing_subscriber::registry().with(console_layer).with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(env_filter(&log_level)),
        );

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_path.display(),
            "🔧 STRUCTURED LOGGING: Initialized with file output"
        );

        // The writer must outlive every log call in the process
        std::mem::forget(guard);
    });
}

/// RUST_LOG wins over the environment default
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" | "staging" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for pipeline executions
pub fn log_pipeline_operation(
    operation: &str,
    execution_id: Option<&str>,
    file_identity: Option<&str>,
    state: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        execution_id = execution_id,
        file_identity = file_identity,
        state = state,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 PIPELINE_OPERATION"
    );
}

/// Log structured data for migration jobs
pub fn log_migration_operation(
    operation: &str,
    job_id: &str,
    status: &str,
    progress_percentage: Option<f64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        status = %status,
        progress_percentage = progress_percentage,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🚚 MIGRATION_OPERATION"
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
