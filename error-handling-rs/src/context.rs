//! # Error Context Handling
//!
//! Attaching pipeline context (failure hash, stage, correlation id) to errors
//! and converting foreign errors into classified ones.

use crate::types::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use shared_types_rs::Stage;
use std::error::Error as StdError;
use std::fmt;

/// Identity of one pipeline run, stamped onto every error it raises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub failure_hash: String,
    pub correlation_id: String,
    pub stage: Option<Stage>,
}

impl ErrorContext {
    pub fn new<H: Into<String>, C: Into<String>>(failure_hash: H, correlation_id: C) -> Self {
        Self {
            failure_hash: failure_hash.into(),
            correlation_id: correlation_id.into(),
            stage: None,
        }
    }

    pub fn at(&self, stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            ..self.clone()
        }
    }

    /// Fills in fields the error does not carry yet.
    pub fn apply(&self, mut error: Error) -> Error {
        if error.failure_hash.is_none() {
            error.failure_hash = Some(self.failure_hash.clone());
        }
        if error.correlation_id.is_none() {
            error.correlation_id = Some(self.correlation_id.clone());
        }
        if error.stage.is_none() {
            error.stage = self.stage;
        }
        error
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failure {} [{}]", self.failure_hash, self.correlation_id)?;
        if let Some(stage) = self.stage {
            write!(f, " at {}", stage)?;
        }
        Ok(())
    }
}

/// Classify a foreign error while propagating it.
pub trait WithContext<T> {
    /// Wraps the error as `kind` with `operation` prefixed to its message.
    fn with_kind<S: Into<String>>(self, kind: ErrorKind, operation: S) -> Result<T>;

    /// Stamps pipeline context onto an error.
    fn in_context(self, ctx: &ErrorContext) -> Result<T>;
}

impl<T, E> WithContext<T> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn with_kind<S: Into<String>>(self, kind: ErrorKind, operation: S) -> Result<T> {
        self.map_err(|err| {
            let operation = operation.into();
            Error::new(kind, format!("{}: {}", operation, err))
                .context("operation", operation)
                .cause(err)
        })
    }

    fn in_context(self, ctx: &ErrorContext) -> Result<T> {
        self.map_err(|err| {
            let boxed: Box<dyn StdError + Send + Sync> = Box::new(err);
            match boxed.downcast::<Error>() {
                Ok(ours) => ctx.apply(*ours),
                Err(other) => ctx.apply(Error::internal(other.to_string())),
            }
        })
    }
}
