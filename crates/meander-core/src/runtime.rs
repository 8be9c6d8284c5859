//! The show runtime: one coordinator over sequencer, ballot box, vote
//! session and broadcast hub.
//!
//! Transports (HTTP routes, the WebSocket channel, the CLI) talk to a
//! [`ShowRuntime`] only. It enforces the cross-component rules: any manual
//! transition or new show aborts a running countdown first, and ballots are
//! only recorded for the fork that is currently on stage.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::error::{GraphError, Result, ShowError};
use crate::events::BroadcastEvent;
use crate::graph::{ActiveState, NodeKind, ShowGraph};
use crate::hub::{BroadcastHub, DEFAULT_QUEUE_CAPACITY};
use crate::osc::OscPublisher;
use crate::sequencer::Sequencer;
use crate::store::StateStore;
use crate::tally::VoteTally;
use crate::vote_session::{Started, VoteSession, DEFAULT_SETTLE_DELAY};

/// Countdown used for forks that do not declare their own.
pub const DEFAULT_COUNTDOWN_SECONDS: u32 = 15;

/// Tunables for a [`ShowRuntime`].
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub default_countdown_seconds: u32,
    pub settle_delay: Duration,
    pub queue_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            default_countdown_seconds: DEFAULT_COUNTDOWN_SECONDS,
            settle_delay: DEFAULT_SETTLE_DELAY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

pub struct ShowRuntime {
    sequencer: Arc<Sequencer>,
    tally: Arc<VoteTally>,
    session: VoteSession,
    hub: Arc<BroadcastHub>,
    default_countdown_seconds: u32,
}

impl ShowRuntime {
    pub fn new(store: Arc<dyn StateStore>, osc: OscPublisher, options: RuntimeOptions) -> Self {
        let hub = Arc::new(BroadcastHub::new(options.queue_capacity, osc));
        let sequencer = Arc::new(Sequencer::new(store, Arc::clone(&hub)));
        let tally = Arc::new(VoteTally::new());
        let session = VoteSession::new(
            Arc::clone(&sequencer),
            Arc::clone(&tally),
            Arc::clone(&hub),
            options.settle_delay,
        );
        Self {
            sequencer,
            tally,
            session,
            hub,
            default_countdown_seconds: options.default_countdown_seconds,
        }
    }

    /// Resume from the store. See [`Sequencer::restore`].
    pub fn restore(&self) -> Option<ActiveState> {
        self.sequencer.restore()
    }

    /// Replace the running show with `graph`.
    pub fn load_show(&self, graph: ShowGraph) -> Result<ActiveState> {
        self.session.abort();
        self.tally.clear_all();
        self.sequencer.load_show(graph)
    }

    /// Parse, validate and load an uploaded show package.
    ///
    /// An invalid package is broadcast as `validationError` and the
    /// previous show keeps running.
    pub fn load_package(&self, json: &str) -> Result<ActiveState> {
        match ShowGraph::from_json(json) {
            Ok(graph) => self.load_show(graph),
            Err(e) => {
                self.reject_upload(&e);
                Err(e.into())
            }
        }
    }

    /// Broadcast a rejected upload to every viewer.
    pub fn reject_upload(&self, error: &GraphError) {
        log::warn!("[RUNTIME] Rejected show upload: {}", error);
        self.hub
            .publish(BroadcastEvent::ValidationError(validation_payload(error)));
    }

    /// Manual advance; aborts a running countdown first.
    ///
    /// Ballots cast on a fork that is left this way are discarded, so a
    /// later visit of the same fork starts with an empty box.
    pub fn advance(&self) -> Result<ActiveState> {
        self.session.abort();
        let leaving = self.sequencer.active_state();
        let result = self.sequencer.advance();
        self.discard_ballots(leaving);
        result
    }

    /// Back to the initial state. Discards ballots like [`advance`](Self::advance).
    pub fn reset(&self) -> Result<ActiveState> {
        self.session.abort();
        let leaving = self.sequencer.active_state();
        let result = self.sequencer.reset();
        self.discard_ballots(leaving);
        result
    }

    fn discard_ballots(&self, left: Option<ActiveState>) {
        if let Some(state) = left.filter(|s| s.kind == NodeKind::Fork) {
            let discarded = self.tally.ballot_count(&state.id);
            self.tally.clear(&state.id);
            if discarded > 0 {
                log::info!(
                    "[RUNTIME] Discarded {} ballot(s) for skipped fork '{}'",
                    discarded,
                    state.id
                );
            }
        }
    }

    /// Open voting on `fork_id`, which must be the active fork.
    ///
    /// The countdown is the fork's own, or the configured default.
    pub fn start_vote(&self, fork_id: &str) -> Result<Started> {
        let (_, node) = self.sequencer.active_node().ok_or(ShowError::NoShowLoaded)?;
        if node.id != fork_id {
            return Err(ShowError::StaleVote {
                fork_id: fork_id.to_string(),
                active_id: node.id,
            });
        }
        if node.kind() != NodeKind::Fork {
            return Err(ShowError::NotAFork(node.id));
        }
        let duration = node
            .countdown_seconds()
            .unwrap_or(self.default_countdown_seconds);
        self.session.start(fork_id, duration)
    }

    /// Record one device's ballot.
    ///
    /// Checked in order: a show is loaded, `show_id` is the loaded show,
    /// `fork_id` is the active fork, `choice_index` is in range. Ballots are
    /// accepted whenever the fork is on stage, before or during its countdown,
    /// and are dropped when the fork is left.
    pub fn submit_ballot(
        &self,
        show_id: &str,
        fork_id: &str,
        choice_index: usize,
        device_id: &str,
    ) -> Result<()> {
        let (graph, node) = self.sequencer.active_node().ok_or(ShowError::NoShowLoaded)?;
        if graph.show_id() != show_id {
            return Err(ShowError::StaleShow {
                got: show_id.to_string(),
                loaded: graph.show_id().to_string(),
            });
        }
        if node.id != fork_id {
            return Err(ShowError::StaleVote {
                fork_id: fork_id.to_string(),
                active_id: node.id,
            });
        }
        if node.kind() != NodeKind::Fork {
            return Err(ShowError::NotAFork(node.id));
        }
        let choice_count = node.choices().len();
        if choice_index >= choice_count {
            return Err(ShowError::InvalidChoice {
                fork_id: fork_id.to_string(),
                choice_index,
                choice_count,
            });
        }
        self.tally.record_ballot(fork_id, device_id, choice_index);
        Ok(())
    }

    pub fn active_state(&self) -> Option<ActiveState> {
        self.sequencer.active_state()
    }

    pub fn graph(&self) -> Option<Arc<ShowGraph>> {
        self.sequencer.graph()
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn tally(&self) -> &VoteTally {
        &self.tally
    }

    pub fn session(&self) -> &VoteSession {
        &self.session
    }
}

impl std::fmt::Debug for ShowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShowRuntime")
            .field("sequencer", &self.sequencer)
            .field("session", &self.session)
            .field("hub", &self.hub)
            .finish()
    }
}

fn validation_payload(error: &GraphError) -> serde_json::Value {
    let issues: Vec<String> = error.issues().iter().map(ToString::to_string).collect();
    json!({
        "message": error.to_string(),
        "issues": issues,
    })
}
