//! Redis-backed claim store.
//!
//! Records are JSON strings under `{prefix}failure:{hash}`. `SET NX EX`
//! makes claiming atomic across every instance sharing the server; Redis
//! expiry implements the retention window.

use crate::ClaimStore;
use async_trait::async_trait;
use chrono::Utc;
use error_handling_rs::{redact_url, Error, Result};
use metrics::counter;
use redis::aio::ConnectionManager;
use shared_types_rs::{ClaimOutcome, ClaimRecord, ClaimStats, ClaimStatus, StatusUpdate};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Upper bound for a single round trip, connection setup included.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
const SCAN_COUNT: usize = 100;

pub struct RedisClaimStore {
    client: redis::Client,
    connection: Arc<AsyncMutex<Option<ConnectionManager>>>,
    key_prefix: String,
    default_ttl: Duration,
    display_url: String,
}

impl std::fmt::Debug for RedisClaimStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClaimStore")
            .field("url", &self.display_url)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisClaimStore {
    /// Validates the URL; the connection is opened on first use.
    pub fn new(url: &str, key_prefix: &str, default_ttl: Duration) -> Result<Self> {
        let display_url = redact_url(url);
        let client = redis::Client::open(url).map_err(|e| {
            Error::configuration(format!("Invalid Redis URL {}: {}", display_url, e))
        })?;
        info!(url = %display_url, prefix = %key_prefix, "Configured Redis claim store");

        Ok(Self {
            client,
            connection: Arc::new(AsyncMutex::new(None)),
            key_prefix: key_prefix.to_string(),
            default_ttl,
            display_url,
        })
    }

    pub fn key_for(&self, hash: &str) -> String {
        format!("{}failure:{}", self.key_prefix, hash)
    }

    fn scan_pattern(&self) -> String {
        format!("{}failure:*", self.key_prefix)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = bounded("connect", self.client.get_tokio_connection_manager()).await?;
        info!(url = %self.display_url, "Connected to Redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn read_record(&self, conn: &mut ConnectionManager, key: &str) -> Result<Option<ClaimRecord>> {
        let raw: Option<String> =
            bounded("GET", redis::cmd("GET").arg(key).query_async(conn)).await?;
        match raw {
            Some(json) => match serde_json::from_str::<ClaimRecord>(&json) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Unparseable claim record");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn write_record(&self, conn: &mut ConnectionManager, record: &ClaimRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let _: () = bounded(
            "SET",
            redis::cmd("SET")
                .arg(self.key_for(&record.hash))
                .arg(json)
                .arg("EX")
                .arg(record.ttl_secs.max(1))
                .query_async(conn),
        )
        .await?;
        Ok(())
    }

    async fn scan_keys(&self, conn: &mut ConnectionManager) -> Result<Vec<String>> {
        let pattern = self.scan_pattern();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = bounded(
                "SCAN",
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(conn),
            )
            .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn scan_records(&self, conn: &mut ConnectionManager) -> Result<Vec<ClaimRecord>> {
        let keys = self.scan_keys(conn).await?;
        let mut records = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(SCAN_COUNT) {
            let values: Vec<Option<String>> =
                bounded("MGET", redis::cmd("MGET").arg(chunk).query_async(conn)).await?;
            for (key, value) in chunk.iter().zip(values) {
                match value.map(|json| serde_json::from_str::<ClaimRecord>(&json)) {
                    Some(Ok(record)) => records.push(record),
                    Some(Err(e)) => warn!(key = %key, error = %e, "Skipping unparseable claim record"),
                    // Expired between SCAN and MGET
                    None => {}
                }
            }
        }
        Ok(records)
    }

    // Drops the cached connection so the next call reconnects.
    async fn reset_on_error<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            *self.connection.lock().await = None;
        }
        result
    }
}

// Applies the round-trip bound and maps Redis errors into the state-store kind.
async fn bounded<T, F>(operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(OPERATION_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            counter!("terrafix_claim_store_errors_total", 1, "operation" => operation);
            Err(Error::from(e).context("operation", operation))
        }
        Err(_) => {
            counter!("terrafix_claim_store_errors_total", 1, "operation" => operation);
            Err(Error::state_store(format!(
                "Redis {} timed out after {:?}",
                operation, OPERATION_TIMEOUT
            )))
        }
    }
}

impl RedisClaimStore {
    async fn claim(&self, hash: &str, owner: &str, ttl: Duration) -> Result<ClaimOutcome> {
        let mut conn = self.connection().await?;
        let record = ClaimRecord::new(hash, ttl).owned_by(owner);
        let json = serde_json::to_string(&record)?;
        let key = self.key_for(hash);

        let set: Option<String> = bounded(
            "SET NX",
            redis::cmd("SET")
                .arg(&key)
                .arg(json)
                .arg("NX")
                .arg("EX")
                .arg(record.ttl_secs)
                .query_async(&mut conn),
        )
        .await?;

        if set.is_some() {
            debug!(failure_hash = %hash, "Claimed");
            return Ok(ClaimOutcome::Claimed);
        }

        // The holder may have expired between SET and GET; report it as
        // pending rather than claiming on its behalf.
        let holder = self.read_record(&mut conn, &key).await?;
        if holder.as_ref().is_some_and(|r| r.is_owned_by(owner)) {
            debug!(failure_hash = %hash, "Claim already held by this run");
            return Ok(ClaimOutcome::Claimed);
        }
        let status = holder.map(|r| r.status).unwrap_or(ClaimStatus::Pending);
        debug!(failure_hash = %hash, status = %status, "Already claimed");
        Ok(ClaimOutcome::AlreadyClaimed(status))
    }

    async fn update(&self, hash: &str, status: ClaimStatus, update: StatusUpdate) -> Result<()> {
        let mut conn = self.connection().await?;
        let key = self.key_for(hash);
        let mut record = match self.read_record(&mut conn, &key).await? {
            Some(record) => record,
            None => {
                debug!(failure_hash = %hash, "Claim expired before update, recreating");
                ClaimRecord::new(hash, self.default_ttl)
            }
        };
        record.apply(status, &update);
        self.write_record(&mut conn, &record).await
    }

    async fn fetch(&self, hash: &str) -> Result<Option<ClaimRecord>> {
        let mut conn = self.connection().await?;
        self.read_record(&mut conn, &self.key_for(hash)).await
    }

    async fn all_records(&self) -> Result<Vec<ClaimRecord>> {
        let mut conn = self.connection().await?;
        self.scan_records(&mut conn).await
    }

    async fn remove_older_than(&self, retention: Duration) -> Result<usize> {
        let mut conn = self.connection().await?;
        let now = Utc::now();
        let stale: Vec<String> = self
            .scan_records(&mut conn)
            .await?
            .into_iter()
            .filter(|r| r.is_older_than(retention, now))
            .map(|r| self.key_for(&r.hash))
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }
        let removed: usize =
            bounded("DEL", redis::cmd("DEL").arg(&stale).query_async(&mut conn)).await?;
        info!(removed = removed, "Removed stale claims");
        Ok(removed)
    }

    async fn round_trip(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = bounded("PING", redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    async fn try_claim(&self, hash: &str, owner: &str, ttl: Duration) -> Result<ClaimOutcome> {
        let result = self.claim(hash, owner, ttl).await;
        self.reset_on_error(result).await
    }

    async fn update_status(
        &self,
        hash: &str,
        status: ClaimStatus,
        update: StatusUpdate,
    ) -> Result<()> {
        let result = self.update(hash, status, update).await;
        self.reset_on_error(result).await
    }

    async fn get(&self, hash: &str) -> Result<Option<ClaimRecord>> {
        let result = self.fetch(hash).await;
        self.reset_on_error(result).await
    }

    async fn list_by_status(&self, status: ClaimStatus) -> Result<Vec<ClaimRecord>> {
        let result = self.all_records().await;
        self.reset_on_error(result)
            .await
            .map(|records| records.into_iter().filter(|r| r.status == status).collect())
    }

    async fn stats(&self) -> Result<ClaimStats> {
        let result = self.all_records().await;
        let records = self.reset_on_error(result).await?;
        let mut stats = ClaimStats::default();
        for record in records {
            stats.record(record.status);
        }
        Ok(stats)
    }

    async fn cleanup_expired(&self, retention: Duration) -> Result<usize> {
        let result = self.remove_older_than(retention).await;
        self.reset_on_error(result).await
    }

    async fn ping(&self) -> Result<()> {
        let result = self.round_trip().await;
        self.reset_on_error(result).await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
