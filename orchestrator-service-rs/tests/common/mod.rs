//! In-memory fakes of every collaborator, shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claim_store_rs::{ClaimStore, InMemoryClaimStore};
use config_rs::RepoMapping;
use error_handling_rs::{
    DegradedMode, Error, MetricsCollector, PublishFault, Result, RetryConfig, RetryPolicy,
};
use orchestrator_service::{
    BranchOutcome, Checkout, Collaborators, FailureSource, FixGenerator, HostingService,
    Orchestrator, PipelineSettings, RepositoryProvider, ResolvedContext, ReviewRequest,
    ValidationOutcome, Validator,
};
use parking_lot::Mutex;
use serde_json::json;
use shared_types_rs::{
    ClaimOutcome, ClaimRecord, ClaimStats, ClaimStatus, Confidence, Failure, RemediationFix,
    StatusUpdate,
};
use tempfile::TempDir;

pub const BUCKET_TF: &str = r#"resource "aws_s3_bucket" "a" {
  bucket = "bucket-a"
}
"#;

pub fn failure(id: &str, arn: &str, resource_type: &str) -> Failure {
    serde_json::from_value(json!({
        "test_id": id,
        "test_name": format!("Encryption check {}", id),
        "resource_arn": arn,
        "resource_type": resource_type,
        "severity": "high",
        "framework": "SOC2",
        "failure_reason": "bucket is not encrypted",
        "failed_at": "2026-01-01T00:00:00Z"
    }))
    .unwrap()
}

pub fn bucket_failure(id: &str) -> Failure {
    failure(id, "arn:x:s3:::bucket-a", "S3::Bucket")
}

pub fn fix() -> RemediationFix {
    RemediationFix {
        updated_config: "resource \"aws_s3_bucket\" \"a\" {\n  bucket = \"bucket-a\"\n  # encrypted\n}\n"
            .to_string(),
        explanation: "Enable default encryption".to_string(),
        changed_attributes: vec!["server_side_encryption_configuration".to_string()],
        confidence: Confidence::High,
    }
}

/// Repository with one bucket under `infra/`.
pub fn terraform_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("infra")).unwrap();
    std::fs::write(dir.path().join("infra/s3.tf"), BUCKET_TF).unwrap();
    dir
}

#[derive(Default)]
pub struct FakeSource {
    pub failures: Mutex<Vec<Failure>>,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn with(failures: Vec<Failure>) -> Self {
        Self {
            failures: Mutex::new(failures),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FailureSource for FakeSource {
    async fn fetch_failures(&self, _since: DateTime<Utc>) -> Result<Vec<Failure>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.failures.lock().clone())
    }
}

/// What the generator does on a given call.
pub enum Step {
    Fix,
    Fail(Error),
    Panic,
    Hang,
    Sleep(Duration),
}

/// Plays `script` in order, then keeps returning the fix.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub script: Mutex<VecDeque<Step>>,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixGenerator for ScriptedGenerator {
    async fn generate_fix(&self, _failure: &Failure, context: &ResolvedContext) -> Result<RemediationFix> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(context.file_content.contains("bucket-a"));
        let step = self.script.lock().pop_front().unwrap_or(Step::Fix);
        match step {
            Step::Fix => Ok(fix()),
            Step::Fail(error) => Err(error),
            Step::Panic => panic!("generator exploded"),
            Step::Hang => std::future::pending().await,
            Step::Sleep(d) => {
                tokio::time::sleep(d).await;
                Ok(fix())
            }
        }
    }
}

/// A forge kept in memory. Opening a second review request for the same
/// head is a conflict, as on the real thing.
#[derive(Default)]
pub struct FakeHosting {
    pub branches: Mutex<HashSet<String>>,
    pub commits: Mutex<Vec<(String, String, String)>>,
    pub requests: Mutex<Vec<(ReviewRequest, String)>>,
    pub open_calls: AtomicUsize,
}

impl FakeHosting {
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HostingService for FakeHosting {
    async fn default_branch(&self, _repo: &str) -> Result<String> {
        Ok("main".to_string())
    }

    async fn create_branch(&self, _repo: &str, branch: &str, _base: &str) -> Result<BranchOutcome> {
        if self.branches.lock().insert(branch.to_string()) {
            Ok(BranchOutcome::Created)
        } else {
            Ok(BranchOutcome::AlreadyExists)
        }
    }

    async fn find_review_request(&self, _repo: &str, branch: &str) -> Result<Option<String>> {
        Ok(self
            .requests
            .lock()
            .iter()
            .find(|(r, _)| r.head == branch)
            .map(|(_, url)| url.clone()))
    }

    async fn commit_file(
        &self,
        _repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        _message: &str,
    ) -> Result<()> {
        self.commits
            .lock()
            .push((branch.to_string(), path.to_string(), content.to_string()));
        Ok(())
    }

    async fn open_review_request(&self, repo: &str, request: &ReviewRequest) -> Result<String> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let mut requests = self.requests.lock();
        if requests.iter().any(|(r, _)| r.head == request.head) {
            return Err(Error::publish(PublishFault::Conflict, "A pull request already exists"));
        }
        let url = format!("https://github.com/{}/pull/{}", repo, requests.len() + 1);
        requests.push((request.clone(), url.clone()));
        Ok(url)
    }
}

pub struct RejectingValidator;

#[async_trait]
impl Validator for RejectingValidator {
    async fn validate(&self, _content: &str, _file: &str, _dir: &Path) -> Result<ValidationOutcome> {
        Err(Error::validation("terraform validate failed: Unsupported argument"))
    }
}

pub struct FixedRepository(pub PathBuf);

#[async_trait]
impl RepositoryProvider for FixedRepository {
    async fn checkout(&self, _repo: &str) -> Result<Checkout> {
        Ok(Checkout::existing(self.0.clone()))
    }
}

/// In-memory claims that can be switched to failing.
pub struct FlakyClaims {
    inner: InMemoryClaimStore,
    pub down: AtomicBool,
    /// Stores the next claim but reports a timeout to the caller
    pub drop_claim_reply: AtomicBool,
}

impl FlakyClaims {
    pub fn new() -> Self {
        Self {
            inner: InMemoryClaimStore::new(Duration::from_secs(3600)),
            down: AtomicBool::new(false),
            drop_claim_reply: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(Error::state_store("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClaimStore for FlakyClaims {
    async fn try_claim(&self, hash: &str, owner: &str, ttl: Duration) -> Result<ClaimOutcome> {
        self.check()?;
        let outcome = self.inner.try_claim(hash, owner, ttl).await?;
        if self.drop_claim_reply.swap(false, Ordering::SeqCst) {
            return Err(Error::state_store("Redis SET NX timed out"));
        }
        Ok(outcome)
    }
    async fn update_status(&self, hash: &str, status: ClaimStatus, update: StatusUpdate) -> Result<()> {
        self.check()?;
        self.inner.update_status(hash, status, update).await
    }
    async fn get(&self, hash: &str) -> Result<Option<ClaimRecord>> {
        self.check()?;
        self.inner.get(hash).await
    }
    async fn list_by_status(&self, status: ClaimStatus) -> Result<Vec<ClaimRecord>> {
        self.check()?;
        self.inner.list_by_status(status).await
    }
    async fn stats(&self) -> Result<ClaimStats> {
        self.check()?;
        self.inner.stats().await
    }
    async fn cleanup_expired(&self, retention: Duration) -> Result<usize> {
        self.check()?;
        self.inner.cleanup_expired(retention).await
    }
    async fn ping(&self) -> Result<()> {
        self.check()
    }
    fn backend(&self) -> &'static str {
        "flaky"
    }
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_retries,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter_factor: 0.0,
        operation_timeout: None,
    })
}

/// One orchestrator wired to fakes, with handles on each of them.
pub struct Harness {
    pub repo: TempDir,
    pub source: Arc<FakeSource>,
    pub generator: Arc<ScriptedGenerator>,
    pub hosting: Arc<FakeHosting>,
    pub claims: Arc<dyn ClaimStore>,
    pub metrics: Arc<MetricsCollector>,
    pub store_health: Arc<DegradedMode>,
    pub orchestrator: Arc<Orchestrator>,
}

pub struct HarnessBuilder {
    steps: Vec<Step>,
    failures: Vec<Failure>,
    claims: Option<Arc<dyn ClaimStore>>,
    validator: Option<Arc<dyn Validator>>,
    max_retries: u32,
    degraded_after: u32,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            failures: Vec::new(),
            claims: None,
            validator: None,
            max_retries: 3,
            degraded_after: 3,
        }
    }
}

impl HarnessBuilder {
    pub fn steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    pub fn failures(mut self, failures: Vec<Failure>) -> Self {
        self.failures = failures;
        self
    }

    pub fn claims(mut self, claims: Arc<dyn ClaimStore>) -> Self {
        self.claims = Some(claims);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn degraded_after(mut self, n: u32) -> Self {
        self.degraded_after = n;
        self
    }

    pub fn build(self) -> Harness {
        let repo = terraform_repo();
        let source = Arc::new(FakeSource::with(self.failures));
        let generator = Arc::new(ScriptedGenerator::new(self.steps));
        let hosting = Arc::new(FakeHosting::default());
        let claims = self
            .claims
            .unwrap_or_else(|| Arc::new(InMemoryClaimStore::new(Duration::from_secs(3600))));
        let metrics = Arc::new(MetricsCollector::new());
        let store_health = Arc::new(DegradedMode::new("claim_store", self.degraded_after));

        let collaborators = Collaborators {
            source: source.clone(),
            generator: generator.clone(),
            hosting: hosting.clone(),
            validator: self.validator,
            repositories: Arc::new(FixedRepository(repo.path().to_path_buf())),
            claims: claims.clone(),
        };
        let mut mapping = BTreeMap::new();
        mapping.insert("default".to_string(), "org/infra".to_string());
        let orchestrator = Arc::new(Orchestrator::new(
            collaborators,
            PipelineSettings {
                repo_mapping: RepoMapping::new(mapping),
                terraform_path: "infra".to_string(),
                claim_ttl: Duration::from_secs(3600),
            },
            fast_retry(self.max_retries),
            metrics.clone(),
            store_health.clone(),
        ));

        Harness {
            repo,
            source,
            generator,
            hosting,
            claims,
            metrics,
            store_health,
            orchestrator,
        }
    }
}

/// Polls `condition` every 10 ms for up to ten seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
