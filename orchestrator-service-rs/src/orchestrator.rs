//! # Orchestrator
//!
//! Drives one failure through `claim → resolve → generate → validate →
//! publish → finalize`. Every stage runs under the shared [`RetryPolicy`];
//! only retryable errors are retried and only at stage granularity. A run
//! that fails after claiming records `failed` on the claim; one that never
//! claimed leaves the store untouched.

use std::future::Future;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::{Duration, Instant};

use config_rs::RepoMapping;
use error_handling_rs::{
    log_structured_error, new_correlation_id, with_correlation_id, DegradedMode, Error, ErrorContext,
    ErrorKind, GenerationFault, MetricsCollector, PublishFault, ResolutionFault, Result, RetryPolicy,
    ShutdownSignal,
};
use metrics::counter;
use resource_resolver_rs::ResourceResolver;
use shared_types_rs::{ClaimOutcome, ClaimStatus, Failure, ProcessingResult, RemediationFix, Stage, StatusUpdate};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::collaborators::{
    BranchOutcome, Checkout, Collaborators, ResolvedContext, ReviewRequest, ValidationOutcome,
};
use crate::naming;

/// Recorded on claims whose run was interrupted by shutdown.
pub const CANCELLED_REASON: &str = "cancelled during shutdown";

/// Per-deployment knobs of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub repo_mapping: RepoMapping,
    /// Terraform root inside each checkout
    pub terraform_path: String,
    /// Lifetime of a claim; a crashed run is retried after it expires
    pub claim_ttl: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &config_rs::ServiceConfig) -> Self {
        Self {
            repo_mapping: config.github_repo_mapping.clone(),
            terraform_path: config.terraform_path.clone(),
            claim_ttl: config.retention(),
        }
    }
}

pub struct Orchestrator {
    collaborators: Collaborators,
    settings: PipelineSettings,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
    store_health: Arc<DegradedMode>,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        settings: PipelineSettings,
        retry: RetryPolicy,
        metrics: Arc<MetricsCollector>,
        store_health: Arc<DegradedMode>,
    ) -> Self {
        Self {
            collaborators,
            settings,
            retry,
            metrics,
            store_health,
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Runs the whole pipeline for `failure`. Never panics on collaborator
    /// errors; the outcome is reported in the returned result.
    pub async fn process(&self, failure: &Failure, cancel: &ShutdownSignal) -> ProcessingResult {
        let hash = failure.hash();
        let correlation_id = new_correlation_id();
        let span = info_span!(
            "pipeline",
            correlation_id = %correlation_id,
            failure_hash = %hash,
            test_id = %failure.id,
        );

        with_correlation_id(
            correlation_id.clone(),
            self.run(failure, hash, correlation_id, cancel).instrument(span),
        )
        .await
    }

    async fn run(
        &self,
        failure: &Failure,
        hash: String,
        correlation_id: String,
        cancel: &ShutdownSignal,
    ) -> ProcessingResult {
        let mut result = ProcessingResult::new(&hash, &correlation_id);
        let ctx = ErrorContext::new(&hash, &correlation_id);
        info!(
            test = %failure.display_name(),
            resource_arn = %failure.resource_arn,
            resource_type = %failure.resource_type,
            "Processing failure"
        );

        // Claim
        let claims = self.collaborators.claims.clone();
        let ttl = self.settings.claim_ttl;
        let claimed = self
            .stage(Stage::Claim, &ctx, cancel, &mut result, || {
                claims.try_claim(&hash, &correlation_id, ttl)
            })
            .await;
        match claimed {
            Ok(ClaimOutcome::Claimed) => {
                self.store_health.record_success();
                self.metrics.increment_labeled("terrafix_claims_total", "outcome", "claimed");
            }
            Ok(ClaimOutcome::AlreadyClaimed(status)) => {
                self.store_health.record_success();
                self.metrics.increment_labeled("terrafix_claims_total", "outcome", "already_claimed");
                info!(status = %status, "Failure already claimed, skipping");
                result.skipped = true;
                result.success = true;
                self.record_outcome("skipped", None);
                return result;
            }
            Err(error) => {
                if error.kind == ErrorKind::StateStore {
                    self.store_health.record_failure(&error.summary());
                }
                self.fail(&mut result, &error);
                return result;
            }
        }

        self.update_status(
            &hash,
            ClaimStatus::InProgress,
            StatusUpdate::default().failure(&failure.id, &failure.resource_arn),
        )
        .await;

        let outcome = self.remediate(failure, &ctx, cancel, &mut result).await;

        // Finalize
        let started = Instant::now();
        match outcome {
            Ok(url) => {
                self.update_status(&hash, ClaimStatus::Completed, StatusUpdate::default().pr_url(&url))
                    .await;
                result.success = true;
                result.pr_url = Some(url.clone());
                self.record_outcome("success", None);
                info!(pr_url = %url, "Remediation published");
            }
            Err(error) => {
                let reason = if error.is_cancelled() {
                    CANCELLED_REASON.to_string()
                } else {
                    error.summary()
                };
                self.update_status(&hash, ClaimStatus::Failed, StatusUpdate::default().last_error(reason))
                    .await;
                self.fail(&mut result, &error);
            }
        }
        let elapsed = started.elapsed();
        result.record_stage(Stage::Finalize, elapsed, 0);
        self.metrics.record_stage(Stage::Finalize, elapsed);

        info!(
            success = result.success,
            retries = result.total_retries(),
            duration_ms = %result.total_duration().as_millis(),
            "Pipeline finished"
        );
        result
    }

    /// Resolve, generate, validate and publish. Returns the review URL.
    async fn remediate(
        &self,
        failure: &Failure,
        ctx: &ErrorContext,
        cancel: &ShutdownSignal,
        result: &mut ProcessingResult,
    ) -> Result<String> {
        let (_checkout, context) = self
            .stage(Stage::Resolve, ctx, cancel, result, || self.resolve(failure))
            .await?;
        info!(
            repository = %context.repository,
            file = %context.repo_path,
            resource = %format!("{}.{}", context.resource.resource_type, context.resource.resource_name),
            line = context.resource.line,
            "Resolved resource"
        );

        let generator = self.collaborators.generator.clone();
        let fix = self
            .stage(Stage::Generate, ctx, cancel, result, || generator.generate_fix(failure, &context))
            .await?;
        if fix.updated_config.trim().is_empty() {
            return Err(ctx.at(Stage::Generate).apply(Error::generation(
                GenerationFault::MalformedOutput,
                "Generator returned an empty configuration",
            )));
        }

        let validated = match self.collaborators.validator.clone() {
            Some(validator) => {
                let file_name = file_name_of(&context.resource.file_path);
                self.stage(Stage::Validate, ctx, cancel, result, || {
                    validator.validate(&fix.updated_config, &file_name, &context.module_dir)
                })
                .await?
            }
            None => {
                result.record_stage(Stage::Validate, Duration::ZERO, 0);
                ValidationOutcome {
                    content: fix.updated_config.clone(),
                    warnings: vec!["no validator configured; validation skipped".to_string()],
                }
            }
        };
        for warning in &validated.warnings {
            warn!(warning = %warning, "Validation warning");
        }
        result.warnings.extend(validated.warnings.iter().cloned());

        self.stage(Stage::Publish, ctx, cancel, result, || {
            self.publish(failure, &context, &fix, &validated.content)
        })
        .await
    }

    async fn resolve(&self, failure: &Failure) -> Result<(Checkout, ResolvedContext)> {
        let repository = self
            .settings
            .repo_mapping
            .repo_for(&failure.resource_arn)
            .ok_or_else(|| {
                Error::resolution(
                    ResolutionFault::NotFound,
                    format!("No repository mapped for {}", failure.resource_arn),
                )
            })?
            .to_string();

        let checkout = self.collaborators.repositories.checkout(&repository).await?;
        let tf_root = checkout.root.join(&self.settings.terraform_path);
        if !tf_root.is_dir() {
            return Err(Error::resolution(
                ResolutionFault::NotFound,
                format!(
                    "Terraform path {} not found in {}",
                    self.settings.terraform_path, repository
                ),
            ));
        }

        let arn = failure.resource_arn.clone();
        let resource_type = failure.resource_type.clone();
        let root = tf_root.clone();
        let (resource, file_content) = tokio::task::spawn_blocking(move || -> Result<_> {
            let index = ResourceResolver::new(root).index()?;
            let found = index.find(&arn, &resource_type)?;
            let content = index
                .source(&found.file_path)
                .map(str::to_string)
                .unwrap_or_else(|| found.raw_block.clone());
            Ok((found, content))
        })
        .await
        .map_err(|e| Error::internal(format!("Resolver task failed: {}", e)))??;

        let module_dir = tf_root
            .join(&resource.file_path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| tf_root.clone());
        let repo_path = repo_relative_path(&self.settings.terraform_path, &resource.file_path);

        Ok((
            checkout,
            ResolvedContext {
                repository,
                resource,
                file_content,
                repo_path,
                module_dir,
            },
        ))
    }

    /// Publishes `content` for `failure`. Safe to call more than once and
    /// from racing instances: an open review request for the failure's
    /// branch is returned instead of opening another.
    pub async fn publish(
        &self,
        failure: &Failure,
        context: &ResolvedContext,
        fix: &RemediationFix,
        content: &str,
    ) -> Result<String> {
        let hosting = &self.collaborators.hosting;
        let repo = context.repository.as_str();
        let branch = naming::branch_name(failure);

        if let Some(url) = hosting.find_review_request(repo, &branch).await? {
            info!(branch = %branch, url = %url, "Review request already open");
            return Ok(url);
        }

        let base = hosting.default_branch(repo).await?;
        match hosting.create_branch(repo, &branch, &base).await? {
            BranchOutcome::Created => debug!(branch = %branch, base = %base, "Created branch"),
            BranchOutcome::AlreadyExists => info!(branch = %branch, "Reusing existing branch"),
        }

        hosting
            .commit_file(repo, &branch, &context.repo_path, content, &naming::commit_message(failure))
            .await?;

        let request = ReviewRequest {
            title: naming::review_title(failure),
            body: naming::review_body(failure, fix, &context.repo_path),
            head: branch.clone(),
            base,
            labels: naming::labels(failure),
        };
        match hosting.open_review_request(repo, &request).await {
            Ok(url) => Ok(url),
            Err(error) if error.kind == ErrorKind::Publish(PublishFault::Conflict) => {
                match hosting.find_review_request(repo, &branch).await? {
                    Some(url) => {
                        info!(branch = %branch, url = %url, "Lost review request race, using existing");
                        Ok(url)
                    }
                    None => Err(error),
                }
            }
            Err(error) => Err(error),
        }
    }

    /// Marks a claim failed outside a pipeline run, e.g. after a worker
    /// panic or a forced abort.
    pub async fn mark_failed(&self, failure: &Failure, reason: &str) {
        self.update_status(
            &failure.hash(),
            ClaimStatus::Failed,
            StatusUpdate::default()
                .failure(&failure.id, &failure.resource_arn)
                .last_error(reason),
        )
        .await;
    }

    async fn stage<T, F, Fut>(
        &self,
        stage: Stage,
        ctx: &ErrorContext,
        cancel: &ShutdownSignal,
        result: &mut ProcessingResult,
        op: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = self.retry.retry(stage.as_str(), cancel, op).await;
        result.record_stage(stage, outcome.elapsed, outcome.retries);
        self.metrics.record_stage(stage, outcome.elapsed);
        if outcome.retries > 0 {
            debug!(stage = %stage, retries = outcome.retries, backoff_ms = %outcome.backoff_total.as_millis(), "Stage needed retries");
        }
        outcome.result.map_err(|e| ctx.at(stage).apply(e))
    }

    async fn update_status(&self, hash: &str, status: ClaimStatus, update: StatusUpdate) {
        if let Err(e) = self.collaborators.claims.update_status(hash, status, update).await {
            warn!(status = %status, error = %e.summary(), "Failed to update claim status");
        }
    }

    fn fail(&self, result: &mut ProcessingResult, error: &Error) {
        log_structured_error(error);
        result.success = false;
        result.error_kind = Some(error.kind.label().to_string());
        result.error_message = Some(error.summary());
        self.record_outcome("failed", Some(error.kind.label()));
    }

    fn record_outcome(&self, outcome: &'static str, error_kind: Option<&'static str>) {
        counter!(
            "terrafix_pipeline_results_total",
            1,
            "outcome" => outcome,
            "error_kind" => error_kind.unwrap_or("none")
        );
        self.metrics.increment_labeled("terrafix_pipeline_results", "outcome", outcome);
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main.tf".to_string())
}

/// `/`-separated path of `file` (relative to the terraform root) from the
/// repository root.
fn repo_relative_path(terraform_path: &str, file: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(terraform_path).join(file).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }
    parts.join("/")
}
