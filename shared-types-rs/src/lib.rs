//! # Shared Types
//!
//! Data model passed between the remediation pipeline crates: compliance
//! failures and their dedup identity, claim records, resolver output, fixes
//! and the per-run processing result.

pub mod claim;
pub mod failure;
pub mod pipeline;
pub mod remediation;

pub use claim::{ClaimOutcome, ClaimRecord, ClaimStats, ClaimStatus, StatusUpdate, MAX_ERROR_LEN};
pub use failure::{failure_hash, Failure};
pub use pipeline::{ProcessingResult, Stage};
pub use remediation::{
    Confidence, ContextBlock, MatchKind, ModuleContext, ParseConfidenceError, RemediationFix,
    ResourceMatch,
};
