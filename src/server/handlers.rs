use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::location::{BatchOutcome, CacheStats, Candidates};
use crate::rate_gate::GateSnapshot;

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub(super) struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

// ─── GET /api/resolve ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ResolveQuery {
    pub q: Option<String>,
}

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResolveQuery>,
) -> Result<Response, ApiError> {
    let query = params.q.as_deref().unwrap_or("").trim();
    if query.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing 'q' parameter"));
    }

    state.api_gate.wait_for_next_call().await;
    let start = Instant::now();
    let result = state.resolver.resolve_one(query).await;
    debug!("GET /api/resolve '{}' in {:?}", query, start.elapsed());

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(result)).into_response())
}

// ─── POST /api/resolve/batch ─────────────────────────────────────

/// Either `{primary, secondary}` or `{candidates}` (first = primary).
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct BatchRequest {
    pub primary: Option<String>,
    pub secondary: Vec<String>,
    pub candidates: Option<Vec<String>>,
}

impl BatchRequest {
    fn into_candidates(self) -> Candidates {
        match self.candidates {
            Some(list) if self.primary.is_none() && self.secondary.is_empty() => {
                Candidates::from_list(list)
            }
            Some(list) => {
                let mut secondary = self.secondary;
                secondary.extend(list);
                Candidates {
                    primary: self.primary,
                    secondary,
                }
            }
            None => Candidates {
                primary: self.primary,
                secondary: self.secondary,
            },
        }
    }
}

pub async fn resolve_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchRequest>,
) -> Result<Json<BatchOutcome>, ApiError> {
    let candidates = body.into_candidates();
    if candidates.distinct().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No candidates given"));
    }

    state.api_gate.wait_for_next_call().await;
    let start = Instant::now();
    let outcome = state.resolver.resolve_batch(&candidates).await;
    debug!(
        "POST /api/resolve/batch ({} candidates) in {:?}",
        outcome.results.len(),
        start.elapsed()
    );
    Ok(Json(outcome))
}

// ─── Cache admin ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub cache: CacheStats,
    pub gates: Vec<GateSnapshot>,
}

pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let cache = state
        .resolver
        .cache_stats()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let gates = vec![
        state.resolver.gate().snapshot().await,
        state.api_gate.snapshot().await,
    ];
    Ok(Json(StatsResponse { cache, gates }))
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub removed: u64,
}

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Result<Json<ClearResponse>, ApiError> {
    let removed = state
        .resolver
        .clear_cache()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(ClearResponse { removed }))
}

