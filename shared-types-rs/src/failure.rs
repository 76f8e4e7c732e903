// shared-types-rs/src/failure.rs
// Compliance failures as reported by the failure source

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// One detected compliance violation.
///
/// Field names on the wire follow the failure source's payload
/// (`test_id`, `failure_reason`, `failed_at`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(rename = "test_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub test_name: String,
    pub resource_arn: String,
    pub resource_type: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub framework: String,
    #[serde(rename = "failure_reason", alias = "reason", default)]
    pub reason: String,
    #[serde(default)]
    pub current_state: Map<String, Value>,
    #[serde(default)]
    pub required_state: Map<String, Value>,
    #[serde(
        rename = "failed_at",
        alias = "detected_at",
        default = "epoch",
        deserialize_with = "lenient_timestamp"
    )]
    pub detected_at: DateTime<Utc>,
}

impl Failure {
    /// Deduplication identity. Excludes the detection timestamp so that
    /// repeated detections of the same condition collapse to one claim.
    pub fn hash(&self) -> String {
        failure_hash(&self.id, &self.resource_arn)
    }

    /// Human readable name, falling back to the id when the source sent none.
    pub fn display_name(&self) -> &str {
        if self.test_name.trim().is_empty() {
            &self.id
        } else {
            &self.test_name
        }
    }
}

/// Hex encoded SHA-256 of `"{id}-{resource_arn}"`.
pub fn failure_hash(id: &str, resource_arn: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}-{}", id, resource_arn).as_bytes());
    hex::encode(hasher.finalize())
}

fn default_severity() -> String {
    "medium".to_string()
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

// Unparseable timestamps sort before every real detection instead of
// rejecting the whole failure.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(epoch))
}
