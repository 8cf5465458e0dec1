// Chain-reaction observability routes

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use mimir_engine::{ChainReactionHandler, ReactionLogEntry};

use crate::common::ApiError;

/// App state
#[derive(Clone)]
pub struct AppState {
    pub reactions: Arc<ChainReactionHandler>,
}

/// Query parameters for the reaction log
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReactionLogParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// Create reaction routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/reactions/log", get(reaction_log))
        .route("/api/v1/reactions/enable", post(enable_reactions))
        .route("/api/v1/reactions/disable", post(disable_reactions))
        .with_state(state)
}

/// GET /api/v1/reactions/log - Most recent reaction outcomes, newest first
#[utoipa::path(
    get,
    path = "/api/v1/reactions/log",
    params(
        ("limit" = Option<usize>, Query, description = "Max entries (default 100)")
    ),
    responses(
        (status = 200, description = "Reaction log entries")
    ),
    tag = "reactions"
)]
pub async fn reaction_log(
    State(state): State<AppState>,
    Query(params): Query<ReactionLogParams>,
) -> Result<Json<Vec<ReactionLogEntry>>, ApiError> {
    Ok(Json(state.reactions.log(params.limit)))
}

/// POST /api/v1/reactions/enable - Turn the reaction system on
#[utoipa::path(
    post,
    path = "/api/v1/reactions/enable",
    responses((status = 200, description = "Reactions enabled")),
    tag = "reactions"
)]
pub async fn enable_reactions(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.reactions.set_enabled(true);
    Json(serde_json::json!({ "enabled": true }))
}

/// POST /api/v1/reactions/disable - Turn the reaction system off
#[utoipa::path(
    post,
    path = "/api/v1/reactions/disable",
    responses((status = 200, description = "Reactions disabled")),
    tag = "reactions"
)]
pub async fn disable_reactions(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.reactions.set_enabled(false);
    Json(serde_json::json!({ "enabled": false }))
}
