//! REST API handlers for creative selection, reporting and operational endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use optimizer_analytics::CampaignPerformance;
use optimizer_core::types::{
    Alert, BanditAlgorithm, BayesianResult, Event, RevenueEstimate, RevenueSummary, UserFeatures,
};
use optimizer_core::OptimizerError;
use optimizer_engine::{CreativeEngine, SelectionDecision, TestConclusion};
use optimizer_rl::RebalanceReport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Maximum campaign id length accepted in paths.
const MAX_ID_LEN: usize = 256;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CreativeEngine>,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Debug, Default, Deserialize)]
pub struct SelectRequest {
    /// Falls back to the configured default algorithm.
    #[serde(default)]
    pub algorithm: Option<BanditAlgorithm>,
    #[serde(default)]
    pub user_features: Option<UserFeatures>,
    /// Fixed seed for reproducible draws.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BayesianQuery {
    pub baseline: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PerformanceQuery {
    pub window_minutes: Option<i64>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// Engine error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub OptimizerError);

impl From<OptimizerError> for ApiError {
    fn from(err: OptimizerError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            OptimizerError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            OptimizerError::InvalidConfiguration(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_configuration")
            }
            OptimizerError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            OptimizerError::DataUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "data_unavailable")
            }
            OptimizerError::PartialFailure { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "partial_failure")
            }
            OptimizerError::Config(_)
            | OptimizerError::Serialization(_)
            | OptimizerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        metrics::counter!("api.errors", "code" => code).increment(1);

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            match &self.0 {
                OptimizerError::PartialFailure { .. } => self.0.to_string(),
                _ => "Internal processing error".to_string(),
            }
        } else {
            warn!(error = %self.0, status = status.as_u16(), "Request rejected");
            self.0.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

fn validate_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(ApiError(OptimizerError::InvalidInput(
            "campaign id must be 1-256 characters".to_string(),
        )));
    }
    Ok(())
}

/// POST /v1/campaigns/:campaign_id/select: choose a creative for one request.
pub async fn handle_select(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    Json(request): Json<SelectRequest>,
) -> Result<Json<SelectionDecision>, ApiError> {
    validate_id(&campaign_id)?;
    let algorithm = request
        .algorithm
        .unwrap_or_else(|| state.engine.default_algorithm());

    let decision = state
        .engine
        .select_ad_seeded(
            &campaign_id,
            algorithm,
            request.user_features.as_ref(),
            request.seed,
        )
        .await?;
    metrics::counter!("api.selections").increment(1);
    Ok(Json(decision))
}

/// POST /v1/events: record an impression, click or conversion.
pub async fn handle_record_event(
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> Result<StatusCode, ApiError> {
    state.engine.record_event(event).await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /v1/campaigns/:campaign_id/performance
pub async fn handle_performance(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    Query(query): Query<PerformanceQuery>,
) -> Result<Json<CampaignPerformance>, ApiError> {
    validate_id(&campaign_id)?;
    let performance = state
        .engine
        .get_campaign_performance(&campaign_id, query.window_minutes)
        .await?;
    Ok(Json(performance))
}

/// GET /v1/campaigns/:campaign_id/revenue
pub async fn handle_campaign_revenue(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<RevenueEstimate>, ApiError> {
    validate_id(&campaign_id)?;
    let estimate = state
        .engine
        .get_campaign_revenue(&campaign_id, window.start, window.end)
        .await?;
    Ok(Json(estimate))
}

/// GET /v1/revenue: totals across all campaigns.
pub async fn handle_revenue_summary(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<RevenueSummary>, ApiError> {
    let summary = state
        .engine
        .get_revenue_summary(window.start, window.end)
        .await?;
    Ok(Json(summary))
}

/// GET /v1/campaigns/:campaign_id/bayesian
pub async fn handle_bayesian(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    Query(query): Query<BayesianQuery>,
) -> Result<Json<Vec<BayesianResult>>, ApiError> {
    validate_id(&campaign_id)?;
    let results = state
        .engine
        .get_bayesian_analysis(&campaign_id, query.baseline.as_deref())
        .await?;
    Ok(Json(results))
}

/// GET /v1/campaigns/:campaign_id/alerts
pub async fn handle_alerts(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    validate_id(&campaign_id)?;
    let alerts = state.engine.get_alerts(&campaign_id).await?;
    Ok(Json(alerts))
}

/// POST /v1/campaigns/:campaign_id/rebalance
pub async fn handle_rebalance(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<Json<RebalanceReport>, ApiError> {
    validate_id(&campaign_id)?;
    let report = state.engine.rebalance(&campaign_id).await?;
    Ok(Json(report))
}

/// POST /v1/campaigns/:campaign_id/conclude
pub async fn handle_conclude(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<Json<TestConclusion>, ApiError> {
    validate_id(&campaign_id)?;
    let conclusion = state.engine.conclude_test(&campaign_id).await?;
    Ok(Json(conclusion))
}

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: 200 once the campaign store answers.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.engine.ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live: Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
