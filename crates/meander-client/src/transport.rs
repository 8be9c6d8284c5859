//! Transports used by the sync agent.
//!
//! - [`PushConnector`] opens the push channel and yields decoded events
//! - [`SnapshotSource`] fetches the current state for polling fallback
//!
//! [`WsConnector`] and [`HttpSnapshotSource`] talk to a `meander serve`
//! instance; tests substitute in-memory fakes.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use meander_core::{ActiveState, BroadcastEvent};
use reqwest::StatusCode;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{ClientError, Result};

/// Stream of push events. Ends (or yields an error) when the channel drops.
pub type EventStream = BoxStream<'static, Result<BroadcastEvent>>;

#[async_trait]
pub trait PushConnector: Send + Sync + 'static {
    /// Open the push channel.
    async fn connect(&self) -> Result<EventStream>;
}

#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetch the active state. `Ok(None)` means the server has no show loaded.
    async fn fetch(&self) -> Result<Option<ActiveState>>;
}

/// Split a server base URL into scheme and the rest.
fn split_base(server_url: &str) -> Result<(&str, &str)> {
    let trimmed = server_url.trim_end_matches('/');
    trimmed
        .split_once("://")
        .filter(|(scheme, rest)| !rest.is_empty() && matches!(*scheme, "http" | "https"))
        .ok_or_else(|| ClientError::InvalidUrl(server_url.to_string()))
}

/// WebSocket push channel at `<server>/ws`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Build from an `http://` or `https://` server URL.
    pub fn new(server_url: &str) -> Result<Self> {
        let (scheme, rest) = split_base(server_url)?;
        let ws_scheme = if scheme == "https" { "wss" } else { "ws" };
        Ok(Self {
            url: format!("{ws_scheme}://{rest}/ws"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self) -> Result<EventStream> {
        let (stream, _) = connect_async(self.url.as_str()).await?;
        log::info!("[CLIENT] Push channel connected to {}", self.url);

        let events = stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<BroadcastEvent>(&text) {
                    Ok(event) => Some(Ok(event)),
                    Err(e) => {
                        log::warn!("[CLIENT] Ignoring malformed event: {}", e);
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(ClientError::from(e))),
            }
        });
        Ok(events.boxed())
    }
}

/// Polls `GET <server>/show-state`.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotSource {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let (scheme, rest) = split_base(server_url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{scheme}://{rest}/show-state"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<Option<ActiveState>> {
        let response = self.client.get(&self.url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<ActiveState>().await?)),
            StatusCode::SERVICE_UNAVAILABLE => Ok(None),
            other => Err(ClientError::Status(other.as_u16())),
        }
    }
}
