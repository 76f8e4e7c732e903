//! # Claim Store
//!
//! Atomic set-if-absent claims with a time to live. A claim is the only
//! deduplication primitive of the pipeline: for any failure hash at most one
//! caller ever observes [`ClaimOutcome::Claimed`] until the claim expires.
//!
//! Two backends share the [`ClaimStore`] trait: Redis for deployments with
//! more than one instance, and an in-process map for tests and single-node
//! runs (`memory://`).

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use error_handling_rs::Result;
use shared_types_rs::{ClaimOutcome, ClaimRecord, ClaimStats, ClaimStatus, StatusUpdate};
use std::sync::Arc;
use std::time::Duration;

pub use memory::InMemoryClaimStore;
pub use redis_store::RedisClaimStore;

/// URL scheme selecting the in-process backend.
pub const MEMORY_URL: &str = "memory://";

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Atomically creates a `pending` claim held by `owner` unless one exists
    /// and has not expired. A live claim already held by `owner` reports
    /// `Claimed` again, so a retry after a lost reply keeps its claim.
    async fn try_claim(&self, hash: &str, owner: &str, ttl: Duration) -> Result<ClaimOutcome>;

    /// Best-effort status transition. Creates the record if it has expired
    /// in the meantime.
    async fn update_status(&self, hash: &str, status: ClaimStatus, update: StatusUpdate)
        -> Result<()>;

    async fn get(&self, hash: &str) -> Result<Option<ClaimRecord>>;

    /// Full scan; claim volume is small.
    async fn list_by_status(&self, status: ClaimStatus) -> Result<Vec<ClaimRecord>>;

    async fn stats(&self) -> Result<ClaimStats>;

    /// Removes claims older than `retention` regardless of status. Returns
    /// how many were removed.
    async fn cleanup_expired(&self, retention: Duration) -> Result<usize>;

    async fn ping(&self) -> Result<()>;

    fn backend(&self) -> &'static str;
}

/// Builds the backend named by `url`. Redis connects lazily, so an
/// unreachable server does not fail startup.
pub fn connect(url: &str, key_prefix: &str, default_ttl: Duration) -> Result<Arc<dyn ClaimStore>> {
    if url.trim() == MEMORY_URL {
        return Ok(Arc::new(InMemoryClaimStore::new(default_ttl)));
    }
    Ok(Arc::new(RedisClaimStore::new(url, key_prefix, default_ttl)?))
}
