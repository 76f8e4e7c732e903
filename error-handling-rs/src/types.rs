//! # Error Types
//!
//! One error struct for every crate of the remediation pipeline. The
//! [`ErrorKind`] taxonomy is closed: each pipeline stage has its own fault
//! enum and [`ErrorKind::is_retryable`] gives the default classification by
//! exhaustive match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types_rs::Stage;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use uuid::Uuid;

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Minor,
    #[default]
    Major,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Minor => write!(f, "MINOR"),
            Severity::Major => write!(f, "MAJOR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Faults talking to the compliance failure source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SourceFault {
    #[error("authentication rejected")]
    Authentication,
    #[error("rate limited")]
    RateLimited,
    #[error("network failure")]
    Network,
    #[error("server error")]
    Server,
    #[error("malformed payload")]
    MalformedPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ResolutionFault {
    #[error("resource not found")]
    NotFound,
    #[error("repository unavailable")]
    RepositoryUnavailable,
    #[error("parse warning")]
    ParseWarning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum GenerationFault {
    #[error("generator throttled")]
    Throttled,
    #[error("generator unavailable")]
    Unavailable,
    #[error("malformed generator output")]
    MalformedOutput,
    #[error("authentication rejected")]
    Authentication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum PublishFault {
    #[error("conflicting update")]
    Conflict,
    #[error("rate limited")]
    RateLimited,
    #[error("authentication rejected")]
    Authentication,
    #[error("network failure")]
    Network,
    #[error("request rejected")]
    Rejected,
}

/// Categorizes errors by the part of the pipeline that produced them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Source(SourceFault),
    Resolution(ResolutionFault),
    Generation(GenerationFault),
    /// Generated configuration failed validation
    Validation,
    Publish(PublishFault),
    /// Claim store connectivity
    StateStore,
    /// A local rate limiter did not grant a token in time
    RateLimited,
    Configuration,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Default retry classification for this kind.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::Source(fault) => match fault {
                SourceFault::RateLimited | SourceFault::Network | SourceFault::Server => true,
                SourceFault::Authentication | SourceFault::MalformedPayload => false,
            },
            ErrorKind::Resolution(fault) => match fault {
                ResolutionFault::RepositoryUnavailable => true,
                ResolutionFault::NotFound | ResolutionFault::ParseWarning => false,
            },
            ErrorKind::Generation(fault) => match fault {
                GenerationFault::Throttled | GenerationFault::Unavailable => true,
                GenerationFault::MalformedOutput | GenerationFault::Authentication => false,
            },
            ErrorKind::Publish(fault) => match fault {
                PublishFault::Conflict | PublishFault::RateLimited | PublishFault::Network => true,
                PublishFault::Authentication | PublishFault::Rejected => false,
            },
            ErrorKind::StateStore | ErrorKind::RateLimited | ErrorKind::Timeout => true,
            ErrorKind::Validation
            | ErrorKind::Configuration
            | ErrorKind::Cancelled
            | ErrorKind::Internal => false,
        }
    }

    /// Stable dotted label used in metrics, results and persisted errors.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Source(SourceFault::Authentication) => "source.authentication",
            ErrorKind::Source(SourceFault::RateLimited) => "source.rate_limited",
            ErrorKind::Source(SourceFault::Network) => "source.network",
            ErrorKind::Source(SourceFault::Server) => "source.server",
            ErrorKind::Source(SourceFault::MalformedPayload) => "source.malformed_payload",
            ErrorKind::Resolution(ResolutionFault::NotFound) => "resolution.not_found",
            ErrorKind::Resolution(ResolutionFault::RepositoryUnavailable) => {
                "resolution.repository_unavailable"
            }
            ErrorKind::Resolution(ResolutionFault::ParseWarning) => "resolution.parse_warning",
            ErrorKind::Generation(GenerationFault::Throttled) => "generation.throttled",
            ErrorKind::Generation(GenerationFault::Unavailable) => "generation.unavailable",
            ErrorKind::Generation(GenerationFault::MalformedOutput) => "generation.malformed_output",
            ErrorKind::Generation(GenerationFault::Authentication) => "generation.authentication",
            ErrorKind::Validation => "validation",
            ErrorKind::Publish(PublishFault::Conflict) => "publish.conflict",
            ErrorKind::Publish(PublishFault::RateLimited) => "publish.rate_limited",
            ErrorKind::Publish(PublishFault::Authentication) => "publish.authentication",
            ErrorKind::Publish(PublishFault::Network) => "publish.network",
            ErrorKind::Publish(PublishFault::Rejected) => "publish.rejected",
            ErrorKind::StateStore => "state_store",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Source(fault) => write!(f, "Source Error ({})", fault),
            ErrorKind::Resolution(fault) => write!(f, "Resolution Error ({})", fault),
            ErrorKind::Generation(fault) => write!(f, "Generation Error ({})", fault),
            ErrorKind::Validation => write!(f, "Validation Error"),
            ErrorKind::Publish(fault) => write!(f, "Publish Error ({})", fault),
            ErrorKind::StateStore => write!(f, "State Store Error"),
            ErrorKind::RateLimited => write!(f, "Rate Limit Error"),
            ErrorKind::Configuration => write!(f, "Configuration Error"),
            ErrorKind::Timeout => write!(f, "Timeout Error"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
            ErrorKind::Internal => write!(f, "Internal Error"),
        }
    }
}

/// Core error type for the remediation pipeline
///
/// `Clone` drops the opaque `cause` and `backtrace`; structured metadata is
/// preserved.
#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    pub id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// Pipeline stage that raised the error
    pub stage: Option<Stage>,
    pub failure_hash: Option<String>,
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    #[serde(skip)]
    pub cause: Option<Box<dyn StdError + Send + Sync>>,
    #[serde(skip)]
    pub backtrace: Option<Backtrace>,
    /// Whether a retry may succeed
    pub retryable: bool,
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kind: self.kind,
            message: self.message.clone(),
            timestamp: self.timestamp,
            severity: self.severity,
            stage: self.stage,
            failure_hash: self.failure_hash.clone(),
            correlation_id: self.correlation_id.clone(),
            context: self.context.clone(),
            cause: None,
            backtrace: None,
            retryable: self.retryable,
        }
    }
}

impl Error {
    /// Creates a new error; retryability defaults to the kind's classification
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            severity: Severity::default(),
            stage: None,
            failure_hash: None,
            correlation_id: crate::logging::current_correlation_id(),
            context: serde_json::Map::new(),
            cause: None,
            backtrace: Some(Backtrace::capture()),
            retryable: kind.is_retryable(),
        }
    }

    pub fn source_fault<S: Into<String>>(fault: SourceFault, message: S) -> Self {
        Self::new(ErrorKind::Source(fault), message)
    }

    pub fn resolution<S: Into<String>>(fault: ResolutionFault, message: S) -> Self {
        Self::new(ErrorKind::Resolution(fault), message)
    }

    pub fn generation<S: Into<String>>(fault: GenerationFault, message: S) -> Self {
        Self::new(ErrorKind::Generation(fault), message)
    }

    pub fn publish<S: Into<String>>(fault: PublishFault, message: S) -> Self {
        Self::new(ErrorKind::Publish(fault), message)
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn state_store<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::StateStore, message)
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Configuration, message).severity(Severity::Critical)
    }

    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Cancelled, message).severity(Severity::Info)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn failure_hash<S: Into<String>>(mut self, hash: S) -> Self {
        self.failure_hash = Some(hash.into());
        self
    }

    pub fn correlation_id<S: Into<String>>(mut self, id: S) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Adds context information to the error
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Chains this error with its cause
    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Overrides the kind's classification: retry may succeed
    pub fn transient(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Overrides the kind's classification: never retry
    pub fn permanent(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// One-line `label: message` form, secrets redacted.
    pub fn summary(&self) -> String {
        crate::sanitization::redact_secrets(&format!("{}: {}", self.kind.label(), self.message))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind, self.message)?;

        if let Some(stage) = &self.stage {
            write!(f, " [Stage: {}]", stage)?;
        }

        if let Some(correlation_id) = &self.correlation_id {
            write!(f, " [CorrelationID: {}]", correlation_id)?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, format!("I/O error: {}", err)).cause(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Internal, format!("JSON error: {}", err)).cause(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Internal
        };

        let transient = err.is_timeout()
            || err.is_connect()
            || err.status().map_or(false, |s| s.is_server_error());

        let message = crate::sanitization::redact_secrets(&format!("HTTP request error: {}", err));
        let mut error = Self::new(kind, message).cause(err);
        if transient {
            error = error.transient();
        }
        error
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::state_store(format!("claim store error: {}", err)).cause(err)
    }
}
