// shared-types-rs/src/remediation.rs
// Resolver output and generated fixes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A block from the same file as a matched resource, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub kind: String,
    pub labels: Vec<String>,
    pub raw: String,
}

/// Providers, variables, outputs and module calls visible next to a
/// matched resource. Passed through to the fix generator uninterpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleContext {
    pub providers: Vec<ContextBlock>,
    pub variables: Vec<ContextBlock>,
    pub outputs: Vec<ContextBlock>,
    pub modules: Vec<ContextBlock>,
}

impl ModuleContext {
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
            && self.variables.is_empty()
            && self.outputs.is_empty()
            && self.modules.is_empty()
    }
}

/// Which rule located the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Arn,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMatch {
    /// Path relative to the resolver root.
    pub file_path: PathBuf,
    pub resource_type: String,
    pub resource_name: String,
    pub raw_block: String,
    /// 1-based line of the block header.
    pub line: usize,
    pub matched_by: MatchKind,
    pub module_context: ModuleContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown confidence level: {0}")]
pub struct ParseConfidenceError(pub String);

impl FromStr for Confidence {
    type Err = ParseConfidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            other => Err(ParseConfidenceError(other.to_string())),
        }
    }
}

/// Output of the external fix generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationFix {
    pub updated_config: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub changed_attributes: Vec<String>,
    pub confidence: Confidence,
}
