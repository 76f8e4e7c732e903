// orchestrator-service-rs/src/main.rs
// TerraFix entry point. `run` (the default) wires configuration, clients, the
// pipeline, the poll loop and the HTTP surface, then waits for a shutdown
// signal. The other subcommands are one-shot operator tools.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use claim_store_rs::ClaimStore;
use config_rs::ServiceConfig;
use error_handling_rs::{
    init_logging, install_prometheus_exporter, redact_url, wait_for_os_signal, DegradedMode,
    MetricsCollector, RetryPolicy, ShutdownController, ShutdownSignal,
};
use orchestrator_service::cli::{self, Cli, Command};
use orchestrator_service::clients::{
    GitCheckout, GitHubHosting, HttpFixGenerator, TerraformValidator, VantaFailureSource,
};
use orchestrator_service::{
    http, AppState, Collaborators, Orchestrator, PipelineSettings, RateLimiters, Service,
    ServiceSettings, ServiceStats, Validator,
};
use shared_types_rs::Failure;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::load().context("invalid configuration")?;
    let _logging = init_logging(Some(config.logging_config())).context("failed to initialize logging")?;

    match cli.command() {
        Command::Run => run(config).await,
        Command::ProcessOnce { failure_json } => process_once(config, &failure_json).await,
        Command::Stats => stats(config).await,
        Command::Cleanup { retention_days } => cleanup(config, retention_days).await,
    }
}

/// Everything one pipeline run needs, built from configuration.
struct Pipeline {
    orchestrator: Arc<Orchestrator>,
    claims: Arc<dyn ClaimStore>,
    limiters: RateLimiters,
    metrics: Arc<MetricsCollector>,
    store_health: Arc<DegradedMode>,
}

async fn connect_claims(config: &ServiceConfig) -> anyhow::Result<Arc<dyn ClaimStore>> {
    let claims = claim_store_rs::connect(&config.redis_url, &config.state_key_prefix, config.retention())?;
    match claims.ping().await {
        Ok(()) => info!(backend = claims.backend(), "Claim store reachable"),
        Err(e) => warn!(backend = claims.backend(), error = %e.summary(), "Claim store unreachable at startup"),
    }
    Ok(claims)
}

async fn build_pipeline(config: &ServiceConfig) -> anyhow::Result<Pipeline> {
    let limiters = RateLimiters::from_config(config);
    let claims = connect_claims(config).await?;

    let validator: Arc<dyn Validator> = Arc::new(TerraformValidator::from_config(config));
    let collaborators = Collaborators {
        source: Arc::new(VantaFailureSource::from_config(config, limiters.clone())?),
        generator: Arc::new(HttpFixGenerator::from_config(config)?),
        hosting: Arc::new(GitHubHosting::from_config(config)?),
        validator: Some(validator),
        repositories: Arc::new(GitCheckout::from_config(config)),
        claims: claims.clone(),
    };

    let metrics = Arc::new(MetricsCollector::new());
    let store_health = Arc::new(DegradedMode::new("claim_store", config.degraded_after_store_failures));
    let orchestrator = Arc::new(Orchestrator::new(
        collaborators,
        PipelineSettings::from_config(config),
        RetryPolicy::new(config.retry_config()),
        metrics.clone(),
        store_health.clone(),
    ));

    Ok(Pipeline {
        orchestrator,
        claims,
        limiters,
        metrics,
        store_health,
    })
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        vanta = %config.vanta_base_url,
        github = %config.github_api_url,
        claim_store = %redact_url(&config.redis_url),
        workers = config.max_concurrent_workers,
        poll_interval_secs = config.poll_interval_seconds,
        "Starting TerraFix"
    );

    if let Some(addr) = config.metrics_socket_addr()? {
        install_prometheus_exporter(addr)?;
    }

    let pipeline = build_pipeline(&config).await?;
    let stats = Arc::new(ServiceStats::new());
    let stop = ShutdownController::new("stop");

    let state = Arc::new(AppState::new(
        pipeline.claims,
        pipeline.store_health.clone(),
        stats.clone(),
        pipeline.metrics.clone(),
        stop.signal(),
    ));
    let http_task = tokio::spawn(http::serve(state, config.http_addr()?, stop.signal()));

    let service = Service::start(
        pipeline.orchestrator,
        pipeline.limiters,
        ServiceSettings::from_config(&config),
        stats,
        pipeline.store_health,
        pipeline.metrics,
    );
    let service_task = tokio::spawn(service.run(stop.signal()));

    wait_for_os_signal().await;
    info!("Shutdown requested");
    stop.trigger();

    match service_task.await {
        Ok(report) => info!(drained = report.drained, aborted = report.aborted, "Pipeline stopped"),
        Err(e) => error!(error = %e, "Service task failed"),
    }
    match http_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP task failed"),
    }

    info!("TerraFix stopped");
    Ok(())
}

async fn process_once(config: ServiceConfig, path: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let failure: Failure =
        serde_json::from_str(&raw).with_context(|| format!("invalid failure JSON in {}", path.display()))?;
    info!(test_id = %failure.id, resource_arn = %failure.resource_arn, "Processing single failure");

    let pipeline = build_pipeline(&config).await?;
    let result = pipeline
        .orchestrator
        .process(&failure, &ShutdownSignal::never())
        .await;

    if result.skipped {
        println!("Failure was already processed (skipped)");
    } else if let Some(url) = &result.pr_url {
        println!("Created pull request: {}", url);
    }
    if !result.success {
        anyhow::bail!(
            "failed to process failure: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn stats(config: ServiceConfig) -> anyhow::Result<()> {
    let claims = connect_claims(&config).await?;
    let stats = claims.stats().await.context("cannot read claim statistics")?;

    println!("Claim store statistics ({}):", claims.backend());
    println!("  Total:       {}", stats.total);
    println!("  Pending:     {}", stats.pending);
    println!("  In progress: {}", stats.in_progress);
    println!("  Completed:   {}", stats.completed);
    println!("  Failed:      {}", stats.failed);
    Ok(())
}

async fn cleanup(config: ServiceConfig, retention_days: Option<u64>) -> anyhow::Result<()> {
    let claims = connect_claims(&config).await?;
    let retention = cli::retention(retention_days, config.retention());
    let removed = claims
        .cleanup_expired(retention)
        .await
        .context("claim cleanup failed")?;

    println!("Removed {} claims older than {} days", removed, retention.as_secs() / 86_400);
    Ok(())
}
