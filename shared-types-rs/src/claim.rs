// shared-types-rs/src/claim.rs
// Claim records tracked by the claim store

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Longest error summary persisted on a claim, in characters.
pub const MAX_ERROR_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::InProgress => "in_progress",
            ClaimStatus::Completed => "completed",
            ClaimStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClaimStatus::Completed | ClaimStatus::Failed)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an atomic set-if-absent claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed(ClaimStatus),
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

/// One row per failure hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub hash: String,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ttl_secs: u64,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub failure_id: Option<String>,
    #[serde(default)]
    pub resource_arn: Option<String>,
    /// Correlation id of the run that took the claim
    #[serde(default)]
    pub owner: Option<String>,
}

impl ClaimRecord {
    /// Fresh `pending` record as written by a successful claim.
    pub fn new(hash: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            hash: hash.into(),
            status: ClaimStatus::Pending,
            created_at: now,
            updated_at: now,
            ttl_secs: ttl.as_secs().max(1),
            pr_url: None,
            last_error: None,
            failure_id: None,
            resource_arn: None,
            owner: None,
        }
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner.as_deref() == Some(owner)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + ChronoDuration::seconds(self.ttl_secs as i64)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Whether the record is older than `retention`, regardless of status.
    pub fn is_older_than(&self, retention: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at)
            .to_std()
            .map(|age| age >= retention)
            .unwrap_or(false)
    }

    /// Merge a status transition into the record. Fields absent from the
    /// update keep their previous values.
    pub fn apply(&mut self, status: ClaimStatus, update: &StatusUpdate) {
        self.status = status;
        self.updated_at = Utc::now();
        if let Some(url) = &update.pr_url {
            self.pr_url = Some(url.clone());
        }
        if let Some(err) = &update.last_error {
            self.last_error = Some(truncate_error(err));
        }
        if let Some(id) = &update.failure_id {
            self.failure_id = Some(id.clone());
        }
        if let Some(arn) = &update.resource_arn {
            self.resource_arn = Some(arn.clone());
        }
    }
}

/// Optional fields carried alongside a status change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub pr_url: Option<String>,
    pub last_error: Option<String>,
    pub failure_id: Option<String>,
    pub resource_arn: Option<String>,
}

impl StatusUpdate {
    pub fn pr_url(mut self, url: impl Into<String>) -> Self {
        self.pr_url = Some(url.into());
        self
    }

    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn failure(mut self, id: impl Into<String>, arn: impl Into<String>) -> Self {
        self.failure_id = Some(id.into());
        self.resource_arn = Some(arn.into());
        self
    }
}

/// Counts by status across the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStats {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

impl ClaimStats {
    pub fn record(&mut self, status: ClaimStatus) {
        match status {
            ClaimStatus::Pending => self.pending += 1,
            ClaimStatus::InProgress => self.in_progress += 1,
            ClaimStatus::Completed => self.completed += 1,
            ClaimStatus::Failed => self.failed += 1,
        }
        self.total += 1;
    }
}

fn truncate_error(err: &str) -> String {
    if err.chars().count() <= MAX_ERROR_LEN {
        err.to_string()
    } else {
        err.chars().take(MAX_ERROR_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_merges_and_truncates() {
        let mut record = ClaimRecord::new("abc", Duration::from_secs(60));
        record.apply(
            ClaimStatus::InProgress,
            &StatusUpdate::default().failure("t1", "arn:x:s3:::bucket-a"),
        );
        record.apply(ClaimStatus::Failed, &StatusUpdate::default().last_error("x".repeat(5000)));

        assert_eq!(record.status, ClaimStatus::Failed);
        assert_eq!(record.failure_id.as_deref(), Some("t1"));
        assert_eq!(record.last_error.as_ref().map(|e| e.len()), Some(MAX_ERROR_LEN));
        assert!(record.pr_url.is_none());
    }

    #[test]
    fn records_without_owner_still_deserialize() {
        let record = ClaimRecord::new("abc", Duration::from_secs(60)).owned_by("run-1");
        assert!(record.is_owned_by("run-1"));
        assert!(!record.is_owned_by("run-2"));

        let mut json = serde_json::to_value(&record).unwrap();
        json.as_object_mut().unwrap().remove("owner");
        let legacy: ClaimRecord = serde_json::from_value(json).unwrap();
        assert!(legacy.owner.is_none());
        assert!(!legacy.is_owned_by("run-1"));
    }

    #[test]
    fn expiry_and_retention() {
        let record = ClaimRecord::new("abc", Duration::from_secs(60));
        let now = record.created_at;
        assert!(!record.is_expired_at(now));
        assert!(record.is_expired_at(now + ChronoDuration::seconds(61)));
        assert!(record.is_older_than(Duration::from_secs(10), now + ChronoDuration::seconds(11)));
        assert!(!record.is_older_than(Duration::from_secs(10), now));
    }

    #[test]
    fn stats_serialize_camel_case() {
        let mut stats = ClaimStats::default();
        stats.record(ClaimStatus::InProgress);
        stats.record(ClaimStatus::Completed);
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["inProgress"], 1);
        assert_eq!(json["total"], 2);
    }
}
