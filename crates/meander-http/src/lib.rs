//! HTTP API server for Meander.
//!
//! Provides the REST endpoints and the WebSocket push channel in front of a
//! [`ShowRuntime`].
//!
//! # Endpoints
//!
//! - `GET /show-state` - current active state
//! - `GET /show-graph` - loaded show package
//! - `POST /show` - upload a show package
//! - `POST /vote` - audience ballot, rate limited per client IP
//! - `POST /advance`, `POST /reset` - operator transitions
//! - `GET /ws` - push channel
//!
//! # Usage
//!
//! ```ignore
//! use meander_http::{start_server, AppState};
//!
//! let state = Arc::new(AppState::new(runtime, RateLimiter::new(6, Duration::from_secs(10))));
//! start_server(state, "0.0.0.0:8080".parse()?).await?;
//! ```

mod models;
mod rate_limit;
mod routes;
mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use meander_core::ShowRuntime;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use models::*;
pub use rate_limit::RateLimiter;

/// Shared application state for HTTP handlers.
pub struct AppState {
    /// The show runtime every route talks to.
    pub runtime: Arc<ShowRuntime>,
    /// Per-IP limiter for `POST /vote`.
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(runtime: Arc<ShowRuntime>, rate_limiter: RateLimiter) -> Self {
        Self {
            runtime,
            rate_limiter,
        }
    }
}

/// Build the router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Show
        .route("/show-state", get(routes::state::get_show_state))
        .route("/show-graph", get(routes::state::get_show_graph))
        .route("/show", post(routes::show::upload_show))
        // Audience
        .route("/vote", post(routes::vote::submit_vote))
        // Operator
        .route("/advance", post(routes::control::advance))
        .route("/reset", post(routes::control::reset))
        // WebSocket
        .route("/ws", get(websocket::ws_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Start the HTTP server on `addr` and run until Ctrl-C.
pub async fn start_server(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!(
        "HTTP API server starting on http://{}:{}",
        addr.ip(),
        addr.port()
    );
    serve(listener, state, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    // Keep the limiter's table bounded to recently active clients
    let pruner_state = Arc::clone(&state);
    let pruner = tokio::spawn(async move {
        let period = pruner_state.rate_limiter.window().max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            pruner_state.rate_limiter.prune();
        }
    });

    let app = router(state);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    pruner.abort();
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down HTTP server");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use futures::{SinkExt, StreamExt};
    use meander_core::{MemoryStore, OscPublisher, RuntimeOptions};
    use serde_json::{json, Value};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    const SHOW: &str = r#"{
        "showId": "gala",
        "initialStateId": "intro",
        "states": {
            "intro": { "type": "scene", "name": "Opening", "nextStateId": "f1" },
            "f1": { "type": "fork", "countdownSeconds": 1, "choices": [
                { "label": "Left", "nextStateId": "a" },
                { "label": "Right", "nextStateId": "b" }
            ]},
            "a": { "type": "scene" },
            "b": { "type": "scene" }
        }
    }"#;

    fn app_state() -> Arc<AppState> {
        let runtime = ShowRuntime::new(
            Arc::new(MemoryStore::new()),
            OscPublisher::noop(),
            RuntimeOptions {
                settle_delay: Duration::from_millis(50),
                ..RuntimeOptions::default()
            },
        );
        Arc::new(AppState::new(
            Arc::new(runtime),
            RateLimiter::new(6, Duration::from_secs(10)),
        ))
    }

    fn app(state: &Arc<AppState>) -> Router {
        router(Arc::clone(state)).layer(MockConnectInfo(SocketAddr::from(([10, 1, 2, 3], 4000))))
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn upload(state: &Arc<AppState>, package: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/show")
            .body(Body::from(package.to_string()))
            .unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn vote(fork: &str, choice: usize, device: &str) -> Value {
        json!({ "showId": "gala", "forkId": fork, "choiceIndex": choice, "deviceId": device })
    }

    #[tokio::test]
    async fn test_no_show_is_503() {
        let state = app_state();
        let (status, body) = send(app(&state), "GET", "/show-state", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "ERR_NO_SHOW_FOUND");

        let (status, _) = send(app(&state), "GET", "/show-graph", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = send(app(&state), "POST", "/advance", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = send(app(&state), "POST", "/vote", Some(vote("f1", 0, "d"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_upload_then_query() {
        let state = app_state();
        let (status, body) = upload(&state, SHOW).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "showId": "gala", "state": { "id": "intro", "type": "scene" } }));

        let (status, body) = send(app(&state), "GET", "/show-state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "id": "intro", "type": "scene" }));

        let (_, graph) = send(app(&state), "GET", "/show-graph", None).await;
        assert_eq!(graph["showId"], "gala");
        assert_eq!(graph["states"]["f1"]["choices"][1]["nextStateId"], "b");
    }

    #[tokio::test]
    async fn test_invalid_upload_is_400_and_keeps_show() {
        let state = app_state();
        upload(&state, SHOW).await;
        let mut sub = state.runtime.hub().subscribe();
        while sub.try_recv().is_some() {}

        let (status, body) = upload(
            &state,
            r#"{ "initialStateId": "x", "states": { "x": { "type": "fork", "choices": [] } } }"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_show");
        assert_eq!(body["issues"].as_array().unwrap().len(), 1);
        assert_eq!(state.runtime.graph().unwrap().show_id(), "gala");
        assert_eq!(sub.try_recv().unwrap().event_type(), "validationError");
    }

    #[tokio::test]
    async fn test_manual_transitions() {
        let state = app_state();
        upload(&state, SHOW).await;
        let (status, body) = send(app(&state), "POST", "/advance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "id": "f1", "type": "fork" }));
        let (_, body) = send(app(&state), "POST", "/advance", None).await;
        assert_eq!(body["id"], "a");
        let (_, body) = send(app(&state), "POST", "/reset", None).await;
        assert_eq!(body["id"], "intro");
    }

    #[tokio::test]
    async fn test_vote_responses() {
        let state = app_state();
        upload(&state, SHOW).await;

        // fork not on stage yet
        let (status, _) = send(app(&state), "POST", "/vote", Some(vote("f1", 0, "d1"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        state.runtime.advance().unwrap();
        let (status, body) = send(app(&state), "POST", "/vote", Some(vote("f1", 1, "d1"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({ "forkId": "f1", "choiceIndex": 1 }));
        assert_eq!(state.runtime.tally().ballot_count("f1"), 1);

        let (status, _) = send(app(&state), "POST", "/vote", Some(vote("f1", 2, "d1"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let stale = json!({ "showId": "old", "forkId": "f1", "choiceIndex": 0, "deviceId": "d2" });
        let (status, _) = send(app(&state), "POST", "/vote", Some(stale)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let missing = json!({ "showId": "gala", "forkId": "f1" });
        let (status, body) = send(app(&state), "POST", "/vote", Some(missing)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_vote_rate_limit() {
        let state = app_state();
        upload(&state, SHOW).await;
        state.runtime.advance().unwrap();
        for i in 0..6 {
            let (status, _) =
                send(app(&state), "POST", "/vote", Some(vote("f1", 0, &format!("d{i}")))).await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }
        let (status, body) = send(app(&state), "POST", "/vote", Some(vote("f1", 0, "d7"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "rate_limited");
        assert_eq!(state.runtime.tally().ballot_count("f1"), 6);
    }

    async fn next_event<S>(ws: &mut S) -> Value
    where
        S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for event")
                .expect("socket closed")
                .unwrap();
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_push_channel() {
        let state = app_state();
        state.runtime.load_package(SHOW).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, Arc::clone(&state), async {
            let _ = stop_rx.await;
        }));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();

        // snapshot replay
        assert_eq!(
            next_event(&mut ws).await,
            json!({ "type": "showLoaded", "payload": { "showId": "gala" } })
        );
        assert_eq!(
            next_event(&mut ws).await,
            json!({ "type": "stateChanged", "payload": { "id": "intro", "type": "scene" } })
        );

        state.runtime.advance().unwrap();
        assert_eq!(next_event(&mut ws).await["payload"]["id"], "f1");

        // garbage is ignored, the connection stays up
        ws.send(WsMessage::Text("{\"type\":\"dance\"}".into()))
            .await
            .unwrap();
        ws.send(WsMessage::Text(
            json!({ "type": "startVote", "payload": { "forkId": "f1" } }).to_string(),
        ))
        .await
        .unwrap();

        assert_eq!(
            next_event(&mut ws).await,
            json!({ "type": "voteTick", "payload": { "forkId": "f1", "remainingSeconds": 0 } })
        );
        assert_eq!(
            next_event(&mut ws).await,
            json!({ "type": "voteResult", "payload": { "forkId": "f1", "counts": [0, 0], "winnerIndex": 0 } })
        );
        assert_eq!(next_event(&mut ws).await["payload"]["id"], "a");

        ws.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.runtime.hub().subscriber_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscriber not released");

        let _ = stop_tx.send(());
        server.abort();
    }

    #[tokio::test]
    async fn test_start_vote_message_for_inactive_fork_is_ignored() {
        let state = app_state();
        state.runtime.load_package(SHOW).unwrap();
        websocket::handle_client_message(
            &state.runtime,
            1,
            r#"{"type":"startVote","payload":{"forkId":"f1"}}"#,
        );
        assert!(!state.runtime.session().is_active());
        websocket::handle_client_message(&state.runtime, 1, "not json");
        assert!(!state.runtime.session().is_active());
    }
}
