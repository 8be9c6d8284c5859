//! Operator transitions.

use axum::{extract::State, Json};
use meander_core::ActiveState;
use std::sync::Arc;

use crate::{
    models::{show_error, ApiError},
    AppState,
};

/// POST /advance - Manual advance (skips a running vote)
pub async fn advance(State(state): State<Arc<AppState>>) -> Result<Json<ActiveState>, ApiError> {
    let active = state.runtime.advance().map_err(|e| show_error(&e))?;
    log::info!("[HTTP] Manual advance to '{}'", active.id);
    Ok(Json(active))
}

/// POST /reset - Back to the initial state
pub async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<ActiveState>, ApiError> {
    let active = state.runtime.reset().map_err(|e| show_error(&e))?;
    Ok(Json(active))
}
