//! Read-only show endpoints.

use axum::{extract::State, Json};
use meander_core::{ActiveState, ShowError};
use std::sync::Arc;

use crate::{
    models::{show_error, ApiError},
    AppState,
};

/// GET /show-state - Current active state
pub async fn get_show_state(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActiveState>, ApiError> {
    state
        .runtime
        .active_state()
        .map(Json)
        .ok_or_else(|| show_error(&ShowError::NoShowLoaded))
}

/// GET /show-graph - The loaded show in its canonical package form
pub async fn get_show_graph(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .runtime
        .graph()
        .map(|graph| Json(graph.to_json_value()))
        .ok_or_else(|| show_error(&ShowError::NoShowLoaded))
}
