//! Query API -- HTTP access to the most recent alerts.
//!
//! # Routes
//!
//! - `GET /api/alerts[?limit=N]` -> JSON array of `{id, message, created_at}`,
//!   newest first. `limit` can lower the configured `recent_limit` but never
//!   raise it.
//! - `GET /health` -> `{"status": "ok"}`
//!
//! Store failures map to `500` with `{"error": "..."}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logsentinel_core::error::{PipelineError, SentinelError};
use logsentinel_core::pipeline::{HealthStatus, Pipeline};
use logsentinel_log_pipeline::AlertStore;

struct ApiState<S> {
    store: Arc<S>,
    recent_limit: usize,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            recent_limit: self.recent_limit,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    limit: Option<usize>,
}

/// Build the query router over an alert store.
pub fn router<S: AlertStore>(store: Arc<S>, recent_limit: usize) -> Router {
    Router::new()
        .route("/api/alerts", get(recent_alerts::<S>))
        .route("/health", get(health))
        .with_state(ApiState {
            store,
            recent_limit,
        })
}

async fn recent_alerts<S: AlertStore>(
    State(state): State<ApiState<S>>,
    Query(params): Query<RecentParams>,
) -> Response {
    let limit = params
        .limit
        .map_or(state.recent_limit, |l| l.min(state.recent_limit));

    match state.store.recent(limit).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to query recent alerts");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// HTTP server for the query API, managed as a pipeline module.
pub struct QueryApiServer<S: AlertStore> {
    store: Arc<S>,
    listen_addr: SocketAddr,
    recent_limit: usize,
    local_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<S: AlertStore> QueryApiServer<S> {
    pub fn new(store: Arc<S>, listen_addr: SocketAddr, recent_limit: usize) -> Self {
        Self {
            store,
            listen_addr,
            recent_limit,
            local_addr: None,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Address actually bound (resolves port 0), available after `start()`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl<S: AlertStore> Pipeline for QueryApiServer<S> {
    async fn start(&mut self) -> Result<(), SentinelError> {
        if self.task.is_some() {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let app = router(Arc::clone(&self.store), self.recent_limit);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        self.task = Some(tokio::spawn(async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "query API server failed");
            }
        }));
        self.cancel = cancel;
        self.local_addr = Some(local_addr);

        tracing::info!(listen_addr = %local_addr, "query API listening");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SentinelError> {
        let Some(task) = self.task.take() else {
            return Err(PipelineError::NotRunning.into());
        };

        self.cancel.cancel();
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "query API task ended abnormally");
        }
        self.local_addr = None;
        tracing::info!("query API stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match &self.task {
            None => HealthStatus::Unhealthy("not running".to_owned()),
            Some(task) if task.is_finished() => {
                HealthStatus::Unhealthy("server task exited".to_owned())
            }
            Some(_) => match self.store.ping().await {
                Ok(()) => HealthStatus::Healthy,
                Err(e) => HealthStatus::Degraded(format!("alert store unreachable: {e}")),
            },
        }
    }
}
