// shared-types-rs/src/pipeline.rs
// Pipeline stages and the per-run result

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Ordered steps of one failure's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Claim,
    Resolve,
    Generate,
    Validate,
    Publish,
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Claim,
        Stage::Resolve,
        Stage::Generate,
        Stage::Validate,
        Stage::Publish,
        Stage::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Claim => "claim",
            Stage::Resolve => "resolve",
            Stage::Generate => "generate",
            Stage::Validate => "validate",
            Stage::Publish => "publish",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal record of one pipeline run. Feeds metrics and status only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub failure_hash: String,
    pub correlation_id: String,
    pub success: bool,
    /// Another caller already owned the claim; nothing ran.
    pub skipped: bool,
    pub pr_url: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub duration_by_stage: BTreeMap<Stage, Duration>,
    pub retries_by_stage: BTreeMap<Stage, u32>,
    pub warnings: Vec<String>,
}

impl ProcessingResult {
    pub fn new(failure_hash: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            failure_hash: failure_hash.into(),
            correlation_id: correlation_id.into(),
            ..Default::default()
        }
    }

    pub fn record_stage(&mut self, stage: Stage, elapsed: Duration, retries: u32) {
        *self.duration_by_stage.entry(stage).or_default() += elapsed;
        if retries > 0 {
            *self.retries_by_stage.entry(stage).or_default() += retries;
        }
    }

    pub fn total_retries(&self) -> u32 {
        self.retries_by_stage.values().sum()
    }

    pub fn total_duration(&self) -> Duration {
        self.duration_by_stage.values().sum()
    }
}
