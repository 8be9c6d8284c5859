//! Fork countdowns.
//!
//! A [`VoteSession`] runs at most one countdown at a time. The countdown is
//! a tokio task that ticks once per second, publishing `voteTick` and an
//! OSC countdown cue, then waits a short settle delay so ballots that were
//! in flight at zero still count, and finally resolves:
//!
//! 1. tally the fork's ballots
//! 2. publish `voteResult`
//! 3. ask the sequencer to follow the winning choice
//! 4. clear the fork's ballots and release the session
//!
//! Resolution runs under the session lock, so [`VoteSession::abort`] either
//! wins entirely (no result) or waits for the resolve to finish.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::error::{Result, ShowError};
use crate::events::BroadcastEvent;
use crate::hub::BroadcastHub;
use crate::sequencer::Sequencer;
use crate::tally::VoteTally;

/// Default grace window between the last tick and resolution.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

const TICK: Duration = Duration::from_secs(1);

/// A started countdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub fork_id: String,
    pub duration_seconds: u32,
    /// When the last tick fires; resolution follows after the settle delay.
    pub deadline: Instant,
}

struct ActiveSession {
    fork_id: String,
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    active: Option<ActiveSession>,
    next_generation: u64,
}

struct Shared {
    slot: Mutex<Slot>,
    sequencer: Arc<Sequencer>,
    tally: Arc<VoteTally>,
    hub: Arc<BroadcastHub>,
    settle_delay: Duration,
}

/// Single-slot vote countdown driver.
pub struct VoteSession {
    shared: Arc<Shared>,
}

impl VoteSession {
    pub fn new(
        sequencer: Arc<Sequencer>,
        tally: Arc<VoteTally>,
        hub: Arc<BroadcastHub>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::default()),
                sequencer,
                tally,
                hub,
                settle_delay,
            }),
        }
    }

    /// Start a countdown of `duration_seconds` for `fork_id`.
    ///
    /// Fails with [`ShowError::AlreadyActive`] while another session runs;
    /// the running session is left untouched. Must be called from within a
    /// tokio runtime.
    pub fn start(&self, fork_id: &str, duration_seconds: u32) -> Result<Started> {
        let mut slot = self.shared.slot.lock().expect("Vote session lock poisoned");
        if let Some(active) = &slot.active {
            return Err(ShowError::AlreadyActive {
                fork_id: active.fork_id.clone(),
            });
        }

        let generation = slot.next_generation;
        slot.next_generation += 1;

        let cue_name = self
            .shared
            .sequencer
            .graph()
            .and_then(|g| g.node(fork_id).map(|n| n.display_name().to_string()))
            .unwrap_or_else(|| fork_id.to_string());

        let now = Instant::now();
        let deadline = now + TICK * duration_seconds;
        let task = tokio::spawn(run_countdown(
            Arc::clone(&self.shared),
            fork_id.to_string(),
            cue_name,
            duration_seconds,
            now,
            generation,
        ));

        slot.active = Some(ActiveSession {
            fork_id: fork_id.to_string(),
            generation,
            task,
        });
        log::info!(
            "[VOTE] Countdown started for '{}' ({}s)",
            fork_id,
            duration_seconds
        );

        Ok(Started {
            fork_id: fork_id.to_string(),
            duration_seconds,
            deadline,
        })
    }

    /// Cancel the running countdown without a result.
    ///
    /// The fork's ballots are discarded. Returns the aborted fork id.
    pub fn abort(&self) -> Option<String> {
        let active = self
            .shared
            .slot
            .lock()
            .expect("Vote session lock poisoned")
            .active
            .take()?;
        active.task.abort();
        self.shared.tally.clear(&active.fork_id);
        log::info!("[VOTE] Countdown for '{}' aborted", active.fork_id);
        Some(active.fork_id)
    }

    /// Fork of the running countdown, if any.
    pub fn active_fork(&self) -> Option<String> {
        self.shared
            .slot
            .lock()
            .expect("Vote session lock poisoned")
            .active
            .as_ref()
            .map(|a| a.fork_id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.active_fork().is_some()
    }
}

impl Drop for VoteSession {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.shared.slot.lock() {
            if let Some(active) = slot.active.take() {
                active.task.abort();
            }
        }
    }
}

impl std::fmt::Debug for VoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteSession")
            .field("active_fork", &self.active_fork())
            .field("settle_delay", &self.shared.settle_delay)
            .finish_non_exhaustive()
    }
}

async fn run_countdown(
    shared: Arc<Shared>,
    fork_id: String,
    cue_name: String,
    duration_seconds: u32,
    started_at: Instant,
    generation: u64,
) {
    let mut ticks = interval_at(started_at + TICK, TICK);
    for remaining in (0..duration_seconds).rev() {
        ticks.tick().await;
        shared.hub.publish(BroadcastEvent::VoteTick {
            fork_id: fork_id.clone(),
            remaining_seconds: remaining,
        });
        shared.hub.osc().fork_countdown(&cue_name, remaining);
    }

    tokio::time::sleep(shared.settle_delay).await;
    shared.resolve(&fork_id, generation);
}

impl Shared {
    fn resolve(&self, fork_id: &str, generation: u64) {
        let mut slot = self.slot.lock().expect("Vote session lock poisoned");
        match &slot.active {
            Some(active) if active.generation == generation => {}
            // aborted while the timer was firing
            _ => return,
        }

        let choice_count = self
            .sequencer
            .graph()
            .and_then(|g| g.node(fork_id).map(|n| n.choices().len()));

        match choice_count {
            Some(count) if count > 0 => {
                let result = self.tally.tally(fork_id, count);
                log::info!(
                    "[VOTE] '{}' resolved: counts {:?}, winner {}",
                    fork_id,
                    result.counts,
                    result.winner_index
                );
                self.hub.publish(BroadcastEvent::VoteResult {
                    fork_id: fork_id.to_string(),
                    counts: result.counts,
                    winner_index: result.winner_index,
                });
                match self.sequencer.advance_to_choice(fork_id, result.winner_index) {
                    Ok(_) => {}
                    Err(e @ (ShowError::StaleVote { .. } | ShowError::InvalidChoice { .. })) => {
                        log::warn!("[VOTE] Dropping result for '{}': {}", fork_id, e);
                    }
                    Err(e) => log::error!("[VOTE] Failed to apply result for '{}': {}", fork_id, e),
                }
            }
            _ => log::warn!(
                "[VOTE] '{}' is not a fork of the loaded show, dropping result",
                fork_id
            ),
        }

        self.tally.clear(fork_id);
        slot.active = None;
    }
}
