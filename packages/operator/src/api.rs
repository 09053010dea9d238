//! HTTP API
//!
//! - POST /confirmations/{hash} - observe a deposit and report its depth
//! - POST /allocations/{hash} - pay out a confirmed deposit
//! - POST /claims - issue a signed redemption claim
//! - GET /health - liveness
//! - GET /status - uptime and queue depth
//! - GET /metrics - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::metrics;
use crate::service::{BridgeService, ClaimRequest, ErrorKind, ServiceError};
use crate::store::ConfirmationStore;

/// Queue scans are capped; the status page reports at most this many
const STATUS_SCAN_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BridgeService>,
    pub store: Arc<dyn ConfirmationStore>,
    pub started: Instant,
}

impl AppState {
    pub fn new(service: Arc<BridgeService>, store: Arc<dyn ConfirmationStore>) -> Self {
        Self {
            service,
            store,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub pending_confirmations: usize,
    pub pending_allocations: usize,
}

/// Error wrapper that renders as `{code, message}`
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::Invalid => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal details stay in the logs
        let body = if kind == ErrorKind::Internal {
            ErrorBody {
                code: "INTERNAL_ERROR".to_string(),
                message: "internal error".to_string(),
            }
        } else {
            ErrorBody {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            }
        };

        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/confirmations/{hash}", post(check_confirmation))
        .route("/allocations/{hash}", post(request_allocation))
        .route("/claims", post(request_claim))
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve the API until the task is dropped
pub async fn start_api_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "API server started");
    metrics::UP.set(1.0);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn check_confirmation(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let check = state.service.submit_confirmation_check(&hash).await?;
    Ok(Json(check))
}

async fn request_allocation(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state.service.request_allocation(&hash).await?;
    Ok(Json(receipt))
}

async fn request_claim(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claim = state.service.request_claim(&request).await?;
    Ok(Json(claim))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn status(State(state): State<AppState>) -> Response {
    let pending = state.store.pending(STATUS_SCAN_LIMIT, None).await;
    let unallocated = state.store.unallocated(STATUS_SCAN_LIMIT, None).await;

    match (pending, unallocated) {
        (Ok(pending), Ok(unallocated)) => Json(StatusResponse {
            status: "ok".to_string(),
            uptime_seconds: state.started.elapsed().as_secs(),
            pending_confirmations: pending.len(),
            pending_allocations: unallocated.len(),
        })
        .into_response(),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Status query failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    code: e.code().to_string(),
                    message: "store unavailable".to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
