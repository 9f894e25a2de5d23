//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and to a JSON log file,
//! so request lifecycles can be traced across batches after the fact.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::state_machine::RequestStatus;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
/// Safe to call more than once; an already installed global subscriber is
/// left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let log_dir = PathBuf::from("log");
        let file_layer_dir = fs::create_dir_all(&log_dir).ok().map(|_| log_dir.clone());

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("dispatch.{environment}.{pid}.{timestamp}.log");

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(build_filter(&log_level));

        let (file_layer, guard) = match &file_layer_dir {
            Some(dir) => {
                let appender = tracing_appender::rolling::never(dir, &log_filename);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(build_filter(&log_level));
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        let log_file = file_layer_dir
            .as_ref()
            .map(|dir| dir.join(&log_filename).display().to_string())
            .unwrap_or_else(|| "disabled".to_string());
        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_file,
            "Structured logging initialized"
        );

        // The file writer flushes for as long as its guard lives.
        if let Some(guard) = guard {
            std::mem::forget(guard);
        }
    });
}

/// `RUST_LOG` wins over the environment default
fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn get_environment() -> String {
    std::env::var("DISPATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log one request status transition
pub fn log_request_transition(
    request_id: &str,
    from: RequestStatus,
    to: RequestStatus,
    worker_type: Option<&str>,
    details: Option<&str>,
) {
    tracing::info!(
        request_id = %request_id,
        from = %from,
        to = %to,
        worker_type = worker_type,
        details = details,
        "REQUEST_TRANSITION"
    );
}

/// Log the outcome of one batch handled by a consumer
pub fn log_batch_operation(
    operation: &str,
    queue: &str,
    count: usize,
    status: &str,
    duration_ms: Option<u64>,
) {
    tracing::info!(
        operation = %operation,
        queue = %queue,
        count = count,
        status = %status,
        duration_ms = duration_ms,
        "BATCH_OPERATION"
    );
}
