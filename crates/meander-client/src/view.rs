//! Local view of the show, as a viewer displays it.
//!
//! [`ViewModel`] folds push events and polled snapshots into one
//! [`ViewState`]. Applying the same state twice (push and poll racing, or a
//! replay after reconnect) is a no-op: the model remembers the id of the
//! last applied state and ignores a repeat until a different show loads.

use meander_core::{ActiveState, BroadcastEvent};
use serde::Serialize;

/// A running fork countdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Countdown {
    pub fork_id: String,
    pub remaining_seconds: u32,
}

/// The outcome of the last fork vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub fork_id: String,
    pub counts: Vec<u32>,
    pub winner_index: usize,
}

/// What the viewer currently shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub show_id: Option<String>,
    pub active: Option<ActiveState>,
    pub countdown: Option<Countdown>,
    pub last_result: Option<VoteOutcome>,
    /// Payload of the last rejected show upload.
    pub validation_error: Option<serde_json::Value>,
    /// Neither push nor polling could reach the server; `active` is the
    /// last known good state.
    pub stale: bool,
}

#[derive(Debug, Default)]
pub struct ViewModel {
    state: ViewState,
    last_applied_state_id: Option<String>,
}

impl ViewModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    /// Fold one push event into the view. Returns whether the view changed.
    pub fn apply_event(&mut self, event: &BroadcastEvent) -> bool {
        match event {
            BroadcastEvent::StateChanged(active) => self.apply_state(active),
            BroadcastEvent::ShowLoaded { show_id } => {
                if self.state.show_id.as_deref() == Some(show_id.as_str()) {
                    return false;
                }
                self.state.show_id = Some(show_id.clone());
                self.state.countdown = None;
                self.state.last_result = None;
                self.state.validation_error = None;
                self.last_applied_state_id = None;
                true
            }
            BroadcastEvent::VoteTick {
                fork_id,
                remaining_seconds,
            } => {
                let countdown = Some(Countdown {
                    fork_id: fork_id.clone(),
                    remaining_seconds: *remaining_seconds,
                });
                if self.state.countdown == countdown {
                    return false;
                }
                self.state.countdown = countdown;
                true
            }
            BroadcastEvent::VoteResult {
                fork_id,
                counts,
                winner_index,
            } => {
                self.state.countdown = None;
                self.state.last_result = Some(VoteOutcome {
                    fork_id: fork_id.clone(),
                    counts: counts.clone(),
                    winner_index: *winner_index,
                });
                true
            }
            BroadcastEvent::ValidationError(payload) => {
                self.state.validation_error = Some(payload.clone());
                true
            }
        }
    }

    /// Apply a polled snapshot.
    pub fn apply_snapshot(&mut self, active: &ActiveState) -> bool {
        self.apply_state(active)
    }

    /// Flag or clear the stale marker. Returns whether it changed.
    pub fn set_stale(&mut self, stale: bool) -> bool {
        if self.state.stale == stale {
            return false;
        }
        self.state.stale = stale;
        true
    }

    fn apply_state(&mut self, active: &ActiveState) -> bool {
        if self.last_applied_state_id.as_deref() == Some(active.id.as_str()) {
            return false;
        }
        self.last_applied_state_id = Some(active.id.clone());
        self.state.active = Some(active.clone());
        self.state.countdown = None;
        true
    }
}
