//! # Structured Logging
//!
//! JSON (or human readable) `tracing` output plus a task-local correlation
//! id that follows one pipeline run across every `.await`.

use crate::types::{Error, Result, Severity};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use uuid::Uuid;

tokio::task_local! {
    static CORRELATION_ID: String;
}

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive when `RUST_LOG` is unset (trace, debug, info, ...)
    pub level: String,
    pub service_name: String,
    pub json_format: bool,
    /// Directory for a daily rotated log file, in addition to stdout
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "terrafix".to_string(),
            json_format: true,
            log_dir: None,
        }
    }
}

/// Keeps the background file writer alive. Drop it last.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber. Calling it twice is a no-op.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<LoggingGuard> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(LoggingGuard { _file: None });
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,reqwest=warn", config.level)));

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
    });

    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(true));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        Error::configuration(format!("Failed to set global subscriber: {}", e))
    })?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(LoggingGuard { _file: guard })
}

pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Runs `fut` with `correlation_id` visible to [`current_correlation_id`].
pub async fn with_correlation_id<F: Future>(correlation_id: String, fut: F) -> F::Output {
    CORRELATION_ID.scope(correlation_id, fut).await
}

/// Correlation id of the enclosing pipeline run, if any.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

/// Logs an error at the level matching its severity
pub fn log_structured_error(error: &Error) {
    use tracing::{error, info, warn};

    let correlation_id = error.correlation_id.as_deref().unwrap_or("unknown");
    let stage = error.stage.map(|s| s.as_str()).unwrap_or("none");
    let failure_hash = error.failure_hash.as_deref().unwrap_or("none");

    match error.severity {
        Severity::Critical | Severity::Major => {
            error!(
                error_id = %error.id,
                error_kind = error.kind.label(),
                correlation_id = %correlation_id,
                stage = %stage,
                failure_hash = %failure_hash,
                retryable = error.retryable,
                context = ?error.context,
                "{}", error.message
            );
        }
        Severity::Minor => {
            warn!(
                error_id = %error.id,
                error_kind = error.kind.label(),
                correlation_id = %correlation_id,
                stage = %stage,
                failure_hash = %failure_hash,
                retryable = error.retryable,
                "{}", error.message
            );
        }
        Severity::Info => {
            info!(
                error_kind = error.kind.label(),
                correlation_id = %correlation_id,
                stage = %stage,
                "{}", error.message
            );
        }
    }
}
