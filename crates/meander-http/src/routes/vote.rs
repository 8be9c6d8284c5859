//! Audience ballots.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::StatusCode,
    Json,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::{
    models::{show_error, ApiError, ErrorResponse, VoteAccepted, VoteRequest},
    AppState,
};

/// POST /vote - Record a ballot for the active fork
pub async fn submit_vote(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<VoteAccepted>), ApiError> {
    let ip = connect_info
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if !state.rate_limiter.check(ip) {
        log::debug!("[HTTP] Vote from {} rate limited", ip);
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::rate_limited(&format!(
                "Too many votes, try again in {}s",
                state.rate_limiter.window().as_secs()
            ))),
        ));
    }

    let Json(req) = body.map_err(|rejection| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request(&rejection.body_text())),
        )
    })?;

    if req.device_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request("deviceId must not be empty")),
        ));
    }

    state
        .runtime
        .submit_ballot(&req.show_id, &req.fork_id, req.choice_index, &req.device_id)
        .map_err(|e| {
            log::debug!("[HTTP] Vote from {} rejected: {}", ip, e);
            show_error(&e)
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(VoteAccepted {
            fork_id: req.fork_id,
            choice_index: req.choice_index,
        }),
    ))
}
