//! In-memory ballot box.
//!
//! One ballot per `(fork, device)`: a later ballot from the same device
//! replaces the earlier one. Ballots for a fork are dropped with
//! [`VoteTally::clear`] once its vote session resolves or aborts, so a
//! fork revisited through a cycle starts from an empty box.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

/// One device's recorded choice for a fork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub fork_id: String,
    pub device_id: String,
    pub choice_index: usize,
    pub submitted_at: SystemTime,
}

/// Outcome of counting a fork's ballots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyResult {
    /// Ballots per choice, indexed like the fork's choice list.
    pub counts: Vec<u32>,
    /// Choice with the most ballots; the lowest index wins a tie and an
    /// empty ballot box yields 0.
    pub winner_index: usize,
}

/// Thread-safe ballot box keyed by fork, then device.
#[derive(Debug, Default)]
pub struct VoteTally {
    ballots: Mutex<HashMap<String, HashMap<String, Ballot>>>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or replace a device's ballot. The choice index is not range
    /// checked here; callers validate it against the fork first.
    pub fn record_ballot(&self, fork_id: &str, device_id: &str, choice_index: usize) {
        let ballot = Ballot {
            fork_id: fork_id.to_string(),
            device_id: device_id.to_string(),
            choice_index,
            submitted_at: SystemTime::now(),
        };
        let mut ballots = self.ballots.lock().expect("Tally lock poisoned");
        let replaced = ballots
            .entry(fork_id.to_string())
            .or_default()
            .insert(device_id.to_string(), ballot);
        if let Some(previous) = replaced {
            log::debug!(
                "[TALLY] Device {} re-voted on {}: {} -> {}",
                device_id,
                fork_id,
                previous.choice_index,
                choice_index
            );
        }
    }

    /// Count the ballots for a fork with `choice_count` choices.
    ///
    /// Ballots outside `0..choice_count` are ignored.
    pub fn tally(&self, fork_id: &str, choice_count: usize) -> TallyResult {
        let mut counts = vec![0u32; choice_count];
        {
            let ballots = self.ballots.lock().expect("Tally lock poisoned");
            if let Some(fork) = ballots.get(fork_id) {
                for ballot in fork.values() {
                    if let Some(count) = counts.get_mut(ballot.choice_index) {
                        *count += 1;
                    }
                }
            }
        }

        let mut winner_index = 0;
        for (index, count) in counts.iter().enumerate() {
            if *count > counts[winner_index] {
                winner_index = index;
            }
        }

        TallyResult {
            counts,
            winner_index,
        }
    }

    /// Drop every ballot for a fork.
    pub fn clear(&self, fork_id: &str) {
        let mut ballots = self.ballots.lock().expect("Tally lock poisoned");
        ballots.remove(fork_id);
    }

    /// Drop every ballot for every fork.
    pub fn clear_all(&self) {
        let mut ballots = self.ballots.lock().expect("Tally lock poisoned");
        ballots.clear();
    }

    /// Number of devices with a live ballot for the fork.
    pub fn ballot_count(&self, fork_id: &str) -> usize {
        let ballots = self.ballots.lock().expect("Tally lock poisoned");
        ballots.get(fork_id).map(HashMap::len).unwrap_or(0)
    }

    /// The live ballot for a device, if any.
    pub fn ballot(&self, fork_id: &str, device_id: &str) -> Option<Ballot> {
        let ballots = self.ballots.lock().expect("Tally lock poisoned");
        ballots.get(fork_id)?.get(device_id).cloned()
    }
}
