//! Operational HTTP surface: liveness, readiness, status and metrics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use claim_store_rs::ClaimStore;
use error_handling_rs::{DegradedMode, HealthStatus, MetricsCollector, ShutdownSignal};
use serde::Serialize;
use tracing::{info, warn};

use crate::service::ServiceStats;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependencies {
    pub claim_store: bool,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub dependencies: Dependencies,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Seconds since start
    pub uptime: u64,
    pub counts: StatusCounts,
    pub in_flight: usize,
    pub mode: &'static str,
    pub last_poll: Option<DateTime<Utc>>,
    /// Where `counts` came from: `claim_store` or `process`
    pub counts_source: &'static str,
}

pub struct AppState {
    started: Instant,
    claims: Arc<dyn ClaimStore>,
    store_health: Arc<DegradedMode>,
    stats: Arc<ServiceStats>,
    metrics: Arc<MetricsCollector>,
    stop: ShutdownSignal,
}

impl AppState {
    pub fn new(
        claims: Arc<dyn ClaimStore>,
        store_health: Arc<DegradedMode>,
        stats: Arc<ServiceStats>,
        metrics: Arc<MetricsCollector>,
        stop: ShutdownSignal,
    ) -> Self {
        Self {
            started: Instant::now(),
            claims,
            store_health,
            stats,
            metrics,
            stop,
        }
    }

    pub fn create_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(Self::health_handler))
            .route("/ready", get(Self::ready_handler))
            .route("/status", get(Self::status_handler))
            .route("/metrics", get(Self::metrics_handler))
            .with_state(self)
    }

    fn health(&self) -> HealthStatus {
        if self.stop.is_triggered() {
            HealthStatus::ShuttingDown
        } else {
            HealthStatus::Healthy
        }
    }

    async fn health_handler(State(state): State<Arc<Self>>) -> impl IntoResponse {
        Json(HealthResponse {
            status: state.health().as_str(),
        })
    }

    async fn ready_handler(State(state): State<Arc<Self>>) -> impl IntoResponse {
        let claim_store = match state.claims.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e.summary(), "Readiness check: claim store unreachable");
                false
            }
        };
        let ready = claim_store && !state.stop.is_triggered();
        let code = if ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (
            code,
            Json(ReadyResponse {
                status: if ready { "ready" } else { "not_ready" },
                dependencies: Dependencies { claim_store },
            }),
        )
    }

    async fn status_handler(State(state): State<Arc<Self>>) -> impl IntoResponse {
        let snapshot = state.stats.snapshot();
        let (counts, counts_source) = match state.claims.stats().await {
            Ok(stats) => (
                StatusCounts {
                    pending: stats.pending,
                    in_progress: stats.in_progress,
                    completed: stats.completed,
                    failed: stats.failed,
                },
                "claim_store",
            ),
            Err(e) => {
                warn!(error = %e.summary(), "Claim stats unavailable, reporting process counters");
                (
                    StatusCounts {
                        pending: 0,
                        in_progress: snapshot.in_flight as u64,
                        completed: snapshot.completed,
                        failed: snapshot.failed + snapshot.cancelled,
                    },
                    "process",
                )
            }
        };

        Json(StatusResponse {
            uptime: state.started.elapsed().as_secs(),
            counts,
            in_flight: snapshot.in_flight,
            mode: if state.store_health.is_active() {
                "read_only"
            } else {
                "normal"
            },
            last_poll: snapshot.last_poll,
            counts_source,
        })
    }

    async fn metrics_handler(State(state): State<Arc<Self>>) -> impl IntoResponse {
        Json(state.metrics.snapshot())
    }
}

/// Serves the router until `stop` fires.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr, stop: ShutdownSignal) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server listening");
    axum::serve(listener, state.create_router())
        .with_graceful_shutdown(async move { stop.triggered().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::response::Response;
    use claim_store_rs::InMemoryClaimStore;
    use error_handling_rs::{Error, Result, ShutdownController};
    use shared_types_rs::{ClaimOutcome, ClaimRecord, ClaimStats, ClaimStatus, StatusUpdate};
    use std::time::Duration;

    struct DownStore;

    #[async_trait]
    impl ClaimStore for DownStore {
        async fn try_claim(&self, _: &str, _: &str, _: Duration) -> Result<ClaimOutcome> {
            Err(Error::state_store("down"))
        }
        async fn update_status(&self, _: &str, _: ClaimStatus, _: StatusUpdate) -> Result<()> {
            Err(Error::state_store("down"))
        }
        async fn get(&self, _: &str) -> Result<Option<ClaimRecord>> {
            Err(Error::state_store("down"))
        }
        async fn list_by_status(&self, _: ClaimStatus) -> Result<Vec<ClaimRecord>> {
            Err(Error::state_store("down"))
        }
        async fn stats(&self) -> Result<ClaimStats> {
            Err(Error::state_store("down"))
        }
        async fn cleanup_expired(&self, _: Duration) -> Result<usize> {
            Err(Error::state_store("down"))
        }
        async fn ping(&self) -> Result<()> {
            Err(Error::state_store("down"))
        }
        fn backend(&self) -> &'static str {
            "down"
        }
    }

    fn state(claims: Arc<dyn ClaimStore>, stop: ShutdownSignal) -> Arc<AppState> {
        Arc::new(AppState::new(
            claims,
            Arc::new(DegradedMode::new("claim_store", 1)),
            Arc::new(ServiceStats::new()),
            Arc::new(MetricsCollector::new()),
            stop,
        ))
    }

    async fn json(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let controller = ShutdownController::new("stop");
        let s = state(Arc::new(InMemoryClaimStore::new(Duration::from_secs(60))), controller.signal());

        let (_, body) = json(AppState::health_handler(State(s.clone())).await.into_response()).await;
        assert_eq!(body["status"], "healthy");

        controller.trigger();
        let (_, body) = json(AppState::health_handler(State(s)).await.into_response()).await;
        assert_eq!(body["status"], "shutting_down");
    }

    #[tokio::test]
    async fn ready_reflects_claim_store() {
        let up = state(Arc::new(InMemoryClaimStore::new(Duration::from_secs(60))), ShutdownSignal::never());
        let (code, body) = json(AppState::ready_handler(State(up)).await.into_response()).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["dependencies"]["claimStore"], true);

        let down = state(Arc::new(DownStore), ShutdownSignal::never());
        let (code, body) = json(AppState::ready_handler(State(down)).await.into_response()).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["dependencies"]["claimStore"], false);
    }

    #[tokio::test]
    async fn status_counts_come_from_store() {
        let store = Arc::new(InMemoryClaimStore::new(Duration::from_secs(60)));
        store.try_claim("a", "run-a", Duration::from_secs(60)).await.unwrap();
        store.try_claim("b", "run-b", Duration::from_secs(60)).await.unwrap();
        store
            .update_status("b", ClaimStatus::Completed, StatusUpdate::default())
            .await
            .unwrap();

        let (_, body) = json(AppState::status_handler(State(state(store, ShutdownSignal::never()))).await.into_response()).await;
        assert_eq!(body["counts"]["pending"], 1);
        assert_eq!(body["counts"]["completed"], 1);
        assert_eq!(body["mode"], "normal");
        assert_eq!(body["countsSource"], "claim_store");
    }

    #[tokio::test]
    async fn status_falls_back_to_process_counters() {
        let s = state(Arc::new(DownStore), ShutdownSignal::never());
        s.store_health.record_failure("down");
        s.stats.set_in_flight(2);

        let (_, body) = json(AppState::status_handler(State(s)).await.into_response()).await;
        assert_eq!(body["counts"]["inProgress"], 2);
        assert_eq!(body["mode"], "read_only");
        assert_eq!(body["countsSource"], "process");
    }

    #[tokio::test]
    async fn metrics_returns_snapshot() {
        let s = state(Arc::new(InMemoryClaimStore::new(Duration::from_secs(60))), ShutdownSignal::never());
        s.metrics.increment("terrafix_failures_polled_total", 3);
        let (_, body) = json(AppState::metrics_handler(State(s)).await.into_response()).await;
        assert_eq!(body["counters"]["terrafix_failures_polled_total"], 3);
    }
}
