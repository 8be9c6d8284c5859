//! Show package upload.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use meander_core::ShowError;
use std::sync::Arc;

use crate::{
    models::{show_error, ShowUploaded, ValidationErrorResponse},
    AppState,
};

/// POST /show - Replace the running show
///
/// The body is a show package in either supported format. A rejected
/// package leaves the previous show running and is also broadcast to
/// viewers as `validationError`.
pub async fn upload_show(State(state): State<Arc<AppState>>, body: String) -> Response {
    match state.runtime.load_package(&body) {
        Ok(active) => {
            let show_id = state
                .runtime
                .graph()
                .map(|g| g.show_id().to_string())
                .unwrap_or_default();
            Json(ShowUploaded {
                show_id,
                state: active,
            })
            .into_response()
        }
        Err(ShowError::InvalidGraph(e)) => (
            StatusCode::BAD_REQUEST,
            Json(ValidationErrorResponse::from_graph_error(&e)),
        )
            .into_response(),
        Err(e) => show_error(&e).into_response(),
    }
}
