//! HTTP routes
//!
//! Thin axum layer over the access broker. Every failure surfaces as a
//! structured `{error, code}` body with a status in the right fault
//! class; internal detail (driver errors, signatures, reasons a token
//! was rejected) never leaves the process.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::broker::{DestroyResponse, RedeemRequest, RedeemResponse, SessionSummary};
use crate::context::AppContext;
use crate::db::{sessions::now_rfc3339, SessionStatus};
use crate::error::GatewayError;
use crate::metrics::MetricsSnapshot;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::DuplicateSession(_) => StatusCode::CONFLICT,
            GatewayError::ProvisioningFailed(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ProvisioningTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::PoolExhausted(_) | GatewayError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Config(_) | GatewayError::Io(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // 5xx detail stays in the logs; the caller gets the class only
        let message = if status.is_server_error() {
            self.classification().replace('_', " ")
        } else {
            self.to_string()
        };
        (
            status,
            Json(ErrorBody {
                error: message,
                code: self.classification(),
            }),
        )
            .into_response()
    }
}

/// Build the gateway router.
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/request", post(redeem))
        .route("/sessions", get(list_sessions))
        .route("/destroy", post(destroy))
        .with_state(ctx)
}

#[derive(Serialize)]
struct BannerResponse {
    message: &'static str,
    endpoints: [&'static str; 5],
}

async fn root() -> Json<BannerResponse> {
    Json(BannerResponse {
        message: "Welcome to boxgate",
        endpoints: [
            "/request - Redeem an invite for a new box",
            "/sessions - List sessions",
            "/destroy - Destroy a session",
            "/metrics - Counter snapshot",
            "/health - Health check",
        ],
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: now_rfc3339(),
    })
}

async fn metrics(State(ctx): State<Arc<AppContext>>) -> Json<MetricsSnapshot> {
    Json(ctx.metrics.snapshot())
}

/// POST /request - redeem an invite token for a box
async fn redeem(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, GatewayError> {
    let response = ctx.broker.redeem(&request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    status: Option<SessionStatus>,
}

/// GET /sessions?status= - list sessions, newest first
async fn list_sessions(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SessionSummary>>, GatewayError> {
    let sessions = ctx.broker.list(params.status).await?;
    Ok(Json(sessions))
}

#[derive(Debug, Deserialize)]
struct DestroyRequestBody {
    session_id: String,
}

/// POST /destroy - idempotent explicit destruction
async fn destroy(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<DestroyRequestBody>,
) -> Result<Json<DestroyResponse>, GatewayError> {
    let response = ctx.broker.destroy(&body.session_id).await?;
    Ok(Json(response))
}
