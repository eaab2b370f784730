//! HTTP admission surface.

use crate::{error::BridgeError, service::BridgeService, types::SwapRequest};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;

/// Builds the API router.
pub fn router(service: Arc<BridgeService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/swap", post(initiate_swap))
        .route("/api/swap/{request_id}", get(swap_status))
        .route("/api/queue/status", get(queue_status))
        .route("/api/stats", get(stats))
        .with_state(service)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BridgeError::Validation(_) => StatusCode::BAD_REQUEST,
            BridgeError::DuplicateRequest(_) => StatusCode::CONFLICT,
            BridgeError::SwapNotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

async fn health(State(service): State<Arc<BridgeService>>) -> Response {
    match service.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn initiate_swap(
    State(service): State<Arc<BridgeService>>,
    Json(request): Json<SwapRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.initiate_swap(request).await?))
}

async fn swap_status(
    State(service): State<Arc<BridgeService>>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.swap_status(&request_id).await?))
}

async fn queue_status(State(service): State<Arc<BridgeService>>) -> impl IntoResponse {
    Json(service.queue_status())
}

async fn stats(
    State(service): State<Arc<BridgeService>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(service.statistics().await?))
}
