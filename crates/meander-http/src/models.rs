//! API request and response models.

use axum::{http::StatusCode, Json};
use meander_core::{ActiveState, GraphError, ShowError};
use serde::{Deserialize, Serialize};

// =============================================================================
// Votes
// =============================================================================

/// Body of `POST /vote`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub show_id: String,
    pub fork_id: String,
    pub choice_index: usize,
    pub device_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteAccepted {
    pub fork_id: String,
    pub choice_index: usize,
}

// =============================================================================
// Show upload
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowUploaded {
    pub show_id: String,
    pub state: ActiveState,
}

/// Returned when an uploaded package fails validation.
#[derive(Debug, Serialize)]
pub struct ValidationErrorResponse {
    pub error: String,
    pub message: String,
    pub issues: Vec<String>,
}

impl ValidationErrorResponse {
    pub fn from_graph_error(err: &GraphError) -> Self {
        Self {
            error: "invalid_show".to_string(),
            message: err.to_string(),
            issues: err.issues().iter().map(ToString::to_string).collect(),
        }
    }
}

// =============================================================================
// Error Response
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }

    pub fn no_show() -> Self {
        Self::new("ERR_NO_SHOW_FOUND", "No show loaded")
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("bad_request", message)
    }

    pub fn conflict(message: &str) -> Self {
        Self::new("conflict", message)
    }

    pub fn rate_limited(message: &str) -> Self {
        Self::new("rate_limited", message)
    }
}

/// Error half of every handler result.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a runtime error onto its HTTP status.
pub fn show_error(err: &ShowError) -> ApiError {
    let message = err.to_string();
    match err {
        ShowError::NoShowLoaded => (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse::no_show())),
        ShowError::StaleVote { .. } | ShowError::StaleShow { .. } | ShowError::AlreadyActive { .. } => {
            (StatusCode::CONFLICT, Json(ErrorResponse::conflict(&message)))
        }
        ShowError::InvalidGraph(_) | ShowError::InvalidChoice { .. } | ShowError::NotAFork(_) => {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::bad_request(&message)))
        }
    }
}
