//! In-process claim store.
//!
//! Each claim lives in a `DashMap` shard; `entry()` holds the shard lock
//! across the check and the insert, which makes `try_claim` linearizable
//! within one process.

use crate::ClaimStore;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use error_handling_rs::Result;
use shared_types_rs::{ClaimOutcome, ClaimRecord, ClaimStats, ClaimStatus, StatusUpdate};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Slot {
    record: ClaimRecord,
    created: Instant,
    expires: Instant,
}

impl Slot {
    fn new(record: ClaimRecord, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            record,
            created: now,
            expires: now + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires
    }
}

#[derive(Debug)]
pub struct InMemoryClaimStore {
    claims: DashMap<String, Slot>,
    default_ttl: Duration,
}

impl InMemoryClaimStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            claims: DashMap::new(),
            default_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    fn live_records(&self) -> Vec<ClaimRecord> {
        let now = Instant::now();
        self.claims
            .iter()
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.record.clone())
            .collect()
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn try_claim(&self, hash: &str, owner: &str, ttl: Duration) -> Result<ClaimOutcome> {
        let now = Instant::now();
        let fresh = || Slot::new(ClaimRecord::new(hash, ttl).owned_by(owner), ttl);
        let outcome = match self.claims.entry(hash.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get();
                if !slot.is_live(now) {
                    occupied.insert(fresh());
                    ClaimOutcome::Claimed
                } else if slot.record.is_owned_by(owner) {
                    ClaimOutcome::Claimed
                } else {
                    ClaimOutcome::AlreadyClaimed(slot.record.status)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh());
                ClaimOutcome::Claimed
            }
        };
        debug!(failure_hash = %hash, outcome = ?outcome, "try_claim");
        Ok(outcome)
    }

    async fn update_status(
        &self,
        hash: &str,
        status: ClaimStatus,
        update: StatusUpdate,
    ) -> Result<()> {
        let now = Instant::now();
        let mut slot = self
            .claims
            .entry(hash.to_string())
            .or_insert_with(|| Slot::new(ClaimRecord::new(hash, self.default_ttl), self.default_ttl));

        if !slot.is_live(now) {
            *slot = Slot::new(ClaimRecord::new(hash, self.default_ttl), self.default_ttl);
        }
        slot.record.apply(status, &update);
        let ttl = Duration::from_secs(slot.record.ttl_secs);
        slot.expires = now + ttl;
        Ok(())
    }

    async fn get(&self, hash: &str) -> Result<Option<ClaimRecord>> {
        let now = Instant::now();
        Ok(self
            .claims
            .get(hash)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.record.clone()))
    }

    async fn list_by_status(&self, status: ClaimStatus) -> Result<Vec<ClaimRecord>> {
        Ok(self
            .live_records()
            .into_iter()
            .filter(|record| record.status == status)
            .collect())
    }

    async fn stats(&self) -> Result<ClaimStats> {
        let mut stats = ClaimStats::default();
        for record in self.live_records() {
            stats.record(record.status);
        }
        Ok(stats)
    }

    async fn cleanup_expired(&self, retention: Duration) -> Result<usize> {
        let now = Instant::now();
        let before = self.claims.len();
        self.claims
            .retain(|_, slot| slot.is_live(now) && now.duration_since(slot.created) < retention);
        Ok(before.saturating_sub(self.claims.len()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);
    const OWNER: &str = "run-1";

    #[tokio::test]
    async fn concurrent_claims_yield_exactly_one_winner() {
        let store = Arc::new(InMemoryClaimStore::new(TTL));
        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let owner = format!("run-{}", i);
                    store.try_claim("hash-1", &owner, TTL).await.unwrap()
                })
            })
            .collect();

        let outcomes = futures::future::join_all(tasks).await;
        let claimed = outcomes
            .iter()
            .filter(|o| o.as_ref().unwrap().is_claimed())
            .count();
        assert_eq!(claimed, 1);
        assert_eq!(outcomes.len() - claimed, 63);
    }

    #[tokio::test]
    async fn already_claimed_reports_current_status() {
        let store = InMemoryClaimStore::new(TTL);
        assert_eq!(store.try_claim("h", OWNER, TTL).await.unwrap(), ClaimOutcome::Claimed);
        store
            .update_status("h", ClaimStatus::Completed, StatusUpdate::default().pr_url("https://pr/1"))
            .await
            .unwrap();

        assert_eq!(
            store.try_claim("h", "run-2", TTL).await.unwrap(),
            ClaimOutcome::AlreadyClaimed(ClaimStatus::Completed)
        );
        let record = store.get("h").await.unwrap().unwrap();
        assert_eq!(record.pr_url.as_deref(), Some("https://pr/1"));
    }

    #[tokio::test]
    async fn owner_can_repeat_its_claim() {
        let store = InMemoryClaimStore::new(TTL);
        assert_eq!(store.try_claim("h", OWNER, TTL).await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(store.try_claim("h", OWNER, TTL).await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(
            store.try_claim("h", "run-2", TTL).await.unwrap(),
            ClaimOutcome::AlreadyClaimed(ClaimStatus::Pending)
        );
        let record = store.get("h").await.unwrap().unwrap();
        assert_eq!(record.owner.as_deref(), Some(OWNER));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_claim_can_be_reclaimed() {
        let store = InMemoryClaimStore::new(TTL);
        store.try_claim("h", OWNER, Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(store.get("h").await.unwrap().is_none());
        assert_eq!(store.try_claim("h", OWNER, TTL).await.unwrap(), ClaimOutcome::Claimed);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_removes_old_claims_regardless_of_status() {
        let store = InMemoryClaimStore::new(TTL);
        store.try_claim("old-done", OWNER, TTL).await.unwrap();
        store
            .update_status("old-done", ClaimStatus::Completed, StatusUpdate::default())
            .await
            .unwrap();
        store.try_claim("old-pending", OWNER, TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        store.try_claim("fresh", OWNER, TTL).await.unwrap();

        let removed = store.cleanup_expired(Duration::from_secs(10)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stats_and_listing() {
        let store = InMemoryClaimStore::new(TTL);
        for (hash, status) in [
            ("a", ClaimStatus::InProgress),
            ("b", ClaimStatus::Completed),
            ("c", ClaimStatus::Failed),
            ("d", ClaimStatus::Failed),
        ] {
            store.try_claim(hash, OWNER, TTL).await.unwrap();
            store.update_status(hash, status, StatusUpdate::default()).await.unwrap();
        }
        store.try_claim("e", OWNER, TTL).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            ClaimStats {
                pending: 1,
                in_progress: 1,
                completed: 1,
                failed: 2,
                total: 5
            }
        );
        let failed = store.list_by_status(ClaimStatus::Failed).await.unwrap();
        assert_eq!(failed.len(), 2);
    }

    #[tokio::test]
    async fn update_without_claim_creates_record() {
        let store = InMemoryClaimStore::new(TTL);
        store
            .update_status("ghost", ClaimStatus::Failed, StatusUpdate::default().last_error("boom"))
            .await
            .unwrap();
        let record = store.get("ghost").await.unwrap().unwrap();
        assert_eq!(record.status, ClaimStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("boom"));
    }
}
