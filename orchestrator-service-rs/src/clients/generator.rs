//! HTTP client for the external fix generator.
//!
//! The generator is an opaque model service. It receives the failure and the
//! resolved Terraform context and answers either with a `RemediationFix`
//! JSON document or with text wrapping one in a fenced block. Whatever comes
//! back is schema-checked before it goes any further.

use async_trait::async_trait;
use error_handling_rs::{redact_secrets, Error, GenerationFault, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use shared_types_rs::{Failure, RemediationFix};
use std::time::Duration;
use tracing::{debug, info};

use super::{build_http_client, error_excerpt};
use crate::collaborators::{FixGenerator, ResolvedContext};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Fields of a wrapper object that may hold the model's text answer.
const TEXT_FIELDS: [&str; 4] = ["text", "completion", "content", "output"];

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex"));

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    failure: &'a Failure,
    repository: &'a str,
    file_path: &'a str,
    file_content: &'a str,
    resource: &'a shared_types_rs::ResourceMatch,
}

pub struct HttpFixGenerator {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpFixGenerator {
    pub fn new(url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_http_client(REQUEST_TIMEOUT)?,
            url: url.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn from_config(config: &config_rs::ServiceConfig) -> Result<Self> {
        Self::new(&config.fix_generator_url, config.fix_generator_token.clone())
    }
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let message = format!("Fix generator returned {}: {}", status, body);
    let error = match status.as_u16() {
        429 | 503 => Error::generation(GenerationFault::Throttled, message),
        401 | 403 => Error::generation(GenerationFault::Authentication, message),
        500..=599 => Error::generation(GenerationFault::Unavailable, message),
        _ => Error::generation(GenerationFault::Unavailable, message).permanent(),
    };
    error.context("status", status.as_u16())
}

fn malformed(message: impl Into<String>) -> Error {
    Error::generation(GenerationFault::MalformedOutput, message)
}

/// Text of the first JSON object in `text`: a fenced block if there is one,
/// else the outermost braces.
fn extract_json(text: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(text) {
        return caps.get(1).map(|m| m.as_str());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parses and schema-checks a generator answer.
pub fn parse_fix(body: &str) -> Result<RemediationFix> {
    let fix = match serde_json::from_str::<RemediationFix>(body) {
        Ok(fix) => fix,
        Err(direct) => {
            let text = match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(map)) => TEXT_FIELDS
                    .iter()
                    .find_map(|field| map.get(*field).and_then(Value::as_str).map(str::to_string))
                    .ok_or_else(|| malformed(format!("Fix does not match schema: {}", direct)))?,
                Ok(Value::String(text)) => text,
                _ => body.to_string(),
            };
            let json = extract_json(&text).ok_or_else(|| malformed("No JSON object in generator output"))?;
            serde_json::from_str::<RemediationFix>(json)
                .map_err(|e| malformed(format!("Fix does not match schema: {}", e)))?
        }
    };

    if fix.updated_config.trim().is_empty() {
        return Err(malformed("Fix has an empty updated_config"));
    }
    Ok(fix)
}

#[async_trait]
impl FixGenerator for HttpFixGenerator {
    async fn generate_fix(&self, failure: &Failure, context: &ResolvedContext) -> Result<RemediationFix> {
        let request = GenerateRequest {
            failure,
            repository: &context.repository,
            file_path: &context.repo_path,
            file_content: &context.file_content,
            resource: &context.resource,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            Error::generation(
                GenerationFault::Unavailable,
                redact_secrets(&format!("Fix generator request failed: {}", e)),
            )
            .cause(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = error_excerpt(response).await;
            return Err(status_error(status, &body));
        }

        let body = response.text().await.map_err(|e| {
            Error::generation(GenerationFault::Unavailable, format!("Fix generator body unreadable: {}", e))
                .cause(e)
        })?;
        debug!(bytes = body.len(), "Received fix generator answer");

        let fix = parse_fix(&body)?;
        info!(
            confidence = fix.confidence.as_str(),
            changed = fix.changed_attributes.len(),
            "Generated fix"
        );
        Ok(fix)
    }
}
