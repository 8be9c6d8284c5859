//! Wire events exchanged over the push channel.
//!
//! - [`BroadcastEvent`] - server to client, tagged `{ "type", "payload" }`
//! - [`ClientMessage`] - client to server
//!
//! The JSON shape is the same regardless of transport (WebSocket, polling
//! snapshot, replay on subscribe). Events are plain values; consumers clone
//! what they need.

use serde::{Deserialize, Serialize};

use crate::graph::ActiveState;

/// Event fanned out to every connected viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// The active state moved.
    StateChanged(ActiveState),

    /// A new show graph replaced the previous one.
    #[serde(rename_all = "camelCase")]
    ShowLoaded { show_id: String },

    /// One second of a fork countdown elapsed.
    #[serde(rename_all = "camelCase")]
    VoteTick { fork_id: String, remaining_seconds: u32 },

    /// A fork vote was tallied.
    #[serde(rename_all = "camelCase")]
    VoteResult {
        fork_id: String,
        counts: Vec<u32>,
        winner_index: usize,
    },

    /// An uploaded show package was rejected.
    ValidationError(serde_json::Value),
}

impl BroadcastEvent {
    /// Wire name of the event, as found in the `type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            BroadcastEvent::StateChanged(_) => "stateChanged",
            BroadcastEvent::ShowLoaded { .. } => "showLoaded",
            BroadcastEvent::VoteTick { .. } => "voteTick",
            BroadcastEvent::VoteResult { .. } => "voteResult",
            BroadcastEvent::ValidationError(_) => "validationError",
        }
    }

    /// Serialize to the JSON text sent over the push channel.
    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Message a viewer or operator console sends over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Ask the server to open voting on the given fork.
    #[serde(rename_all = "camelCase")]
    StartVote { fork_id: String },
}
