//! # Error Handling Framework
//!
//! Cross-cutting pieces shared by every TerraFix crate:
//!
//! - a closed error taxonomy with per-kind retry classification
//! - one retry policy with exponential backoff, jitter and cancellation
//! - structured JSON logging with task-local correlation ids
//! - metrics, both global (`metrics` facade) and in-process snapshots
//! - degraded-mode tracking and shutdown signalling
//! - secret redaction for anything that gets logged or persisted

pub mod context;
pub mod fallback;
pub mod logging;
pub mod monitoring;
pub mod retry;
pub mod sanitization;
pub mod supervisor;
pub mod types;

pub use context::{ErrorContext, WithContext};
pub use fallback::{DegradedInfo, DegradedMode};
pub use logging::{
    current_correlation_id, init_logging, log_structured_error, new_correlation_id,
    with_correlation_id, LoggingConfig, LoggingGuard,
};
pub use monitoring::{install_prometheus_exporter, MetricsCollector, MetricsSnapshot, TimingSummary};
pub use retry::{RetryConfig, RetryOutcome, RetryPolicy};
pub use sanitization::{redact_secrets, redact_url};
pub use supervisor::{wait_for_os_signal, HealthStatus, ShutdownController, ShutdownSignal};
pub use types::{
    Error, ErrorKind, GenerationFault, PublishFault, ResolutionFault, Result, Severity, SourceFault,
};
