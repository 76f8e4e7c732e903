//! # TerraFix orchestrator service
//!
//! Polls failing compliance tests, claims each failure exactly once, locates
//! the Terraform resource behind it, asks the fix generator for a patch,
//! validates the patch and opens a review request with it.
//!
//! [`service::Service`] runs the poll loop and feeds a bounded
//! [`worker_pool::WorkerPool`]; each worker drives one failure through
//! [`orchestrator::Orchestrator`]. External systems sit behind the traits in
//! [`collaborators`]. The `terrafix` binary's subcommands live in [`cli`].

pub mod cli;
pub mod clients;
pub mod collaborators;
pub mod http;
pub mod naming;
pub mod orchestrator;
pub mod rate_limiter;
pub mod service;
pub mod worker_pool;

pub use collaborators::{
    BranchOutcome, Checkout, Collaborators, FailureSource, FixGenerator, HostingService,
    RepositoryProvider, ResolvedContext, ReviewRequest, ValidationOutcome, Validator,
};
pub use http::AppState;
pub use orchestrator::{Orchestrator, PipelineSettings, CANCELLED_REASON};
pub use rate_limiter::{RateLimiters, TokenBucket};
pub use service::{CycleReport, Service, ServiceSettings, ServiceStats, StatsSnapshot};
pub use worker_pool::{ShutdownReport, WorkerPool};
