//! # Collaborators
//!
//! Interfaces of the external systems the pipeline talks to. Concrete HTTP,
//! git and terraform implementations live in [`crate::clients`]; tests swap
//! in fakes or mocks. Everything is bundled into [`Collaborators`] and handed
//! to the orchestrator and service explicitly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claim_store_rs::ClaimStore;
use error_handling_rs::Result;
use serde::Serialize;
use shared_types_rs::{Failure, RemediationFix, ResourceMatch};
use tempfile::TempDir;

/// Source of failing compliance checks.
#[async_trait]
pub trait FailureSource: Send + Sync {
    /// Failures detected at or after `since`, across all pages.
    async fn fetch_failures(&self, since: DateTime<Utc>) -> Result<Vec<Failure>>;
}

/// Everything the fix generator gets to see about the failing resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedContext {
    /// `owner/name` of the repository holding the resource
    pub repository: String,
    pub resource: ResourceMatch,
    /// Full text of the file declaring the resource
    pub file_content: String,
    /// Path of that file from the repository root, `/` separated
    pub repo_path: String,
    /// Directory of that file inside the checkout
    #[serde(skip)]
    pub module_dir: PathBuf,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FixGenerator: Send + Sync {
    async fn generate_fix(&self, failure: &Failure, context: &ResolvedContext) -> Result<RemediationFix>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub labels: Vec<String>,
}

/// Git forge holding the Terraform repositories.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostingService: Send + Sync {
    async fn default_branch(&self, repo: &str) -> Result<String>;

    /// Creates `branch` at the head of `base`.
    async fn create_branch(&self, repo: &str, branch: &str, base: &str) -> Result<BranchOutcome>;

    /// URL of the open review request whose head is `branch`, if any.
    async fn find_review_request(&self, repo: &str, branch: &str) -> Result<Option<String>>;

    async fn commit_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<()>;

    /// Opens the review request and returns its URL.
    async fn open_review_request(&self, repo: &str, request: &ReviewRequest) -> Result<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Content after formatting
    pub content: String,
    pub warnings: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Validator: Send + Sync {
    /// Checks `content` as if it replaced `file_name` inside `module_dir`.
    async fn validate(&self, content: &str, file_name: &str, module_dir: &Path)
        -> Result<ValidationOutcome>;
}

/// A local copy of a repository. The directory lives as long as the value.
#[derive(Debug)]
pub struct Checkout {
    pub root: PathBuf,
    _dir: Option<TempDir>,
}

impl Checkout {
    /// Checkout owning a temporary directory, removed on drop.
    pub fn temporary(dir: TempDir) -> Self {
        Self {
            root: dir.path().to_path_buf(),
            _dir: Some(dir),
        }
    }

    /// Checkout of an existing directory that is left in place.
    pub fn existing(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _dir: None,
        }
    }
}

#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    async fn checkout(&self, repo: &str) -> Result<Checkout>;
}

/// External systems wired into one pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn FailureSource>,
    pub generator: Arc<dyn FixGenerator>,
    pub hosting: Arc<dyn HostingService>,
    /// `None` skips validation with a warning
    pub validator: Option<Arc<dyn Validator>>,
    pub repositories: Arc<dyn RepositoryProvider>,
    pub claims: Arc<dyn ClaimStore>,
}
