//! The authoritative show sequencer.
//!
//! The [`Sequencer`] owns the single "current active state". Every mutation
//! (`load_show`, `advance`, `advance_to_choice`, `reset`) runs under one
//! write lock, persists the new state and publishes the matching event
//! before the lock is released, so subscribers observe transitions in the
//! order they happened.
//!
//! Persistence failures are logged; the in-memory state stays authoritative.

use std::sync::{Arc, RwLock};

use crate::error::{Result, ShowError};
use crate::events::BroadcastEvent;
use crate::graph::{ActiveState, Node, NodeKind, ShowGraph};
use crate::hub::BroadcastHub;
use crate::store::{self, StateStore, ACTIVE_STATE_KEY, SHOW_KEY};

#[derive(Default)]
struct SequencerState {
    graph: Option<Arc<ShowGraph>>,
    active: Option<ActiveState>,
}

/// Thread-safe show sequencer.
pub struct Sequencer {
    state: RwLock<SequencerState>,
    store: Arc<dyn StateStore>,
    hub: Arc<BroadcastHub>,
}

impl Sequencer {
    /// Create a sequencer with no show loaded.
    pub fn new(store: Arc<dyn StateStore>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            state: RwLock::new(SequencerState::default()),
            store,
            hub,
        }
    }

    /// Resume from the persisted show and active state, if any.
    ///
    /// Publishes `showLoaded` and `stateChanged` so the hub snapshot is
    /// primed for the first subscribers. Returns the resumed state.
    pub fn restore(&self) -> Option<ActiveState> {
        let graph_json: Option<serde_json::Value> =
            match store::get_json(self.store.as_ref(), SHOW_KEY) {
                Ok(value) => value,
                Err(e) => {
                    log::error!("[SEQUENCER] Failed to read persisted show: {}", e);
                    return None;
                }
            };
        let graph = match graph_json.map(ShowGraph::from_value)? {
            Ok(graph) => Arc::new(graph),
            Err(e) => {
                log::error!("[SEQUENCER] Persisted show is invalid: {}", e);
                return None;
            }
        };

        let persisted: Option<ActiveState> =
            store::get_json(self.store.as_ref(), ACTIVE_STATE_KEY).unwrap_or_else(|e| {
                log::warn!("[SEQUENCER] Failed to read persisted active state: {}", e);
                None
            });

        let active = match persisted {
            Some(state) => match graph.node(&state.id) {
                Some(node) => node.active_state(),
                None => {
                    log::warn!(
                        "[SEQUENCER] Persisted state '{}' is not in show '{}', resuming at the initial state",
                        state.id,
                        graph.show_id()
                    );
                    graph.initial_state()
                }
            },
            None => graph.initial_state(),
        };

        let mut guard = self.state.write().expect("Sequencer lock poisoned");
        guard.graph = Some(Arc::clone(&graph));
        guard.active = Some(active.clone());
        self.persist_active(&active);
        log::info!(
            "[SEQUENCER] Resumed show '{}' at '{}'",
            graph.show_id(),
            active.id
        );
        self.hub.publish(BroadcastEvent::ShowLoaded {
            show_id: graph.show_id().to_string(),
        });
        self.emit_state(&graph, &active);
        Some(active)
    }

    /// Replace the show and jump to its initial state.
    ///
    /// Emits `showLoaded` then `stateChanged`.
    pub fn load_show(&self, graph: ShowGraph) -> Result<ActiveState> {
        let active = graph.initial_state();
        let graph = Arc::new(graph);

        let mut guard = self.state.write().expect("Sequencer lock poisoned");
        guard.graph = Some(Arc::clone(&graph));
        guard.active = Some(active.clone());

        if let Err(e) = store::put_json(self.store.as_ref(), SHOW_KEY, &graph.to_json_value()) {
            log::error!("[SEQUENCER] Failed to persist show: {}", e);
        }
        self.persist_active(&active);

        log::info!(
            "[SEQUENCER] Loaded show '{}' ({} states), starting at '{}'",
            graph.show_id(),
            graph.len(),
            active.id
        );
        self.hub.publish(BroadcastEvent::ShowLoaded {
            show_id: graph.show_id().to_string(),
        });
        self.emit_state(&graph, &active);
        Ok(active)
    }

    /// Manual advance.
    ///
    /// A scene moves to its successor (or stays put without one); a fork
    /// moves to its first choice.
    pub fn advance(&self) -> Result<ActiveState> {
        let mut guard = self.state.write().expect("Sequencer lock poisoned");
        let (graph, current) = Self::loaded(&guard)?;

        let target = match graph.node(&current.id).and_then(Node::default_successor) {
            Some(next) => next.to_string(),
            None => {
                log::debug!(
                    "[SEQUENCER] '{}' has no successor, staying put",
                    current.id
                );
                current.id
            }
        };
        Ok(self.transition(&mut guard, &graph, &target))
    }

    /// Vote-driven advance from `fork_id` to the target of `choice_index`.
    ///
    /// Fails with [`ShowError::StaleVote`] if `fork_id` is no longer the
    /// active state and [`ShowError::InvalidChoice`] if the index is out of range.
    pub fn advance_to_choice(&self, fork_id: &str, choice_index: usize) -> Result<ActiveState> {
        let mut guard = self.state.write().expect("Sequencer lock poisoned");
        let (graph, current) = Self::loaded(&guard)?;

        if current.id != fork_id {
            return Err(ShowError::StaleVote {
                fork_id: fork_id.to_string(),
                active_id: current.id,
            });
        }
        let node = graph
            .node(fork_id)
            .ok_or_else(|| ShowError::NotAFork(fork_id.to_string()))?;
        if node.kind() != NodeKind::Fork {
            return Err(ShowError::NotAFork(fork_id.to_string()));
        }
        let choices = node.choices();
        let choice = choices.get(choice_index).ok_or(ShowError::InvalidChoice {
            fork_id: fork_id.to_string(),
            choice_index,
            choice_count: choices.len(),
        })?;

        log::info!(
            "[SEQUENCER] Fork '{}' resolved to choice {} ('{}')",
            fork_id,
            choice_index,
            choice.label
        );
        let target = choice.next_id.clone();
        Ok(self.transition(&mut guard, &graph, &target))
    }

    /// Jump back to the initial state.
    pub fn reset(&self) -> Result<ActiveState> {
        let mut guard = self.state.write().expect("Sequencer lock poisoned");
        let (graph, _) = Self::loaded(&guard)?;
        let target = graph.initial_node_id().to_string();
        log::info!("[SEQUENCER] Reset to '{}'", target);
        Ok(self.transition(&mut guard, &graph, &target))
    }

    /// The current active state, or `None` before any show is loaded.
    pub fn active_state(&self) -> Option<ActiveState> {
        self.state
            .read()
            .expect("Sequencer lock poisoned")
            .active
            .clone()
    }

    /// The loaded graph.
    pub fn graph(&self) -> Option<Arc<ShowGraph>> {
        self.state
            .read()
            .expect("Sequencer lock poisoned")
            .graph
            .clone()
    }

    pub fn show_id(&self) -> Option<String> {
        self.graph().map(|g| g.show_id().to_string())
    }

    /// The loaded graph together with the active node.
    pub fn active_node(&self) -> Option<(Arc<ShowGraph>, Node)> {
        let guard = self.state.read().expect("Sequencer lock poisoned");
        let graph = guard.graph.clone()?;
        let node = graph.node(&guard.active.as_ref()?.id)?.clone();
        Some((graph, node))
    }

    fn loaded(state: &SequencerState) -> Result<(Arc<ShowGraph>, ActiveState)> {
        match (&state.graph, &state.active) {
            (Some(graph), Some(active)) => Ok((Arc::clone(graph), active.clone())),
            _ => Err(ShowError::NoShowLoaded),
        }
    }

    fn transition(
        &self,
        state: &mut SequencerState,
        graph: &ShowGraph,
        target: &str,
    ) -> ActiveState {
        // Graph validation guarantees every edge target exists.
        let active = match graph.node(target) {
            Some(node) => node.active_state(),
            None => graph.initial_state(),
        };
        state.active = Some(active.clone());
        self.persist_active(&active);
        self.emit_state(graph, &active);
        active
    }

    fn persist_active(&self, active: &ActiveState) {
        if let Err(e) = store::put_json(self.store.as_ref(), ACTIVE_STATE_KEY, active) {
            log::error!("[SEQUENCER] Failed to persist active state: {}", e);
        }
    }

    fn emit_state(&self, graph: &ShowGraph, active: &ActiveState) {
        let cue_name = graph
            .node(&active.id)
            .map(Node::display_name)
            .unwrap_or(active.id.as_str())
            .to_string();
        self.hub.publish_state_change(active.clone(), &cue_name);
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("active", &self.active_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::sample_graph;
    use crate::hub::Subscription;
    use crate::osc::OscPublisher;
    use crate::store::MemoryStore;

    fn sequencer() -> (Sequencer, Arc<MemoryStore>, Subscription) {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(BroadcastHub::new(64, OscPublisher::noop()));
        let sub = hub.subscribe();
        (Sequencer::new(store.clone(), hub), store, sub)
    }

    fn drain(sub: &mut Subscription) -> Vec<BroadcastEvent> {
        let mut events = Vec::new();
        while let Some(e) = sub.try_recv() {
            events.push(e);
        }
        events
    }

    #[test]
    fn test_operations_before_load_fail() {
        let (seq, _, _) = sequencer();
        assert!(seq.active_state().is_none());
        assert!(matches!(seq.advance(), Err(ShowError::NoShowLoaded)));
        assert!(matches!(seq.reset(), Err(ShowError::NoShowLoaded)));
        assert!(matches!(
            seq.advance_to_choice("f1", 0),
            Err(ShowError::NoShowLoaded)
        ));
    }

    #[test]
    fn test_load_show_starts_at_initial_and_emits_in_order() {
        let (seq, _, mut sub) = sequencer();
        let state = seq.load_show(sample_graph()).unwrap();
        assert_eq!(state.id, "intro");
        assert_eq!(seq.active_state(), Some(state.clone()));
        assert_eq!(
            drain(&mut sub),
            vec![
                BroadcastEvent::ShowLoaded {
                    show_id: "test-show".into()
                },
                BroadcastEvent::StateChanged(state),
            ]
        );
    }

    #[test]
    fn test_manual_advance_walks_scene_then_first_choice() {
        let (seq, _, _) = sequencer();
        seq.load_show(sample_graph()).unwrap();
        let fork = seq.advance().unwrap();
        assert_eq!(fork.id, "f1");
        assert_eq!(fork.kind, NodeKind::Fork);
        assert_eq!(seq.advance().unwrap().id, "a");
        assert_eq!(seq.advance().unwrap().id, "end");
    }

    #[test]
    fn test_advance_without_successor_is_idempotent() {
        let (seq, _, mut sub) = sequencer();
        seq.load_show(sample_graph()).unwrap();
        for _ in 0..3 {
            seq.advance().unwrap();
        }
        drain(&mut sub);
        let first = seq.advance().unwrap();
        let second = seq.advance().unwrap();
        assert_eq!(first.id, "end");
        assert_eq!(first, second);
        assert_eq!(seq.active_state(), Some(second.clone()));
        // staying put still re-announces the same state
        assert_eq!(
            drain(&mut sub),
            vec![
                BroadcastEvent::StateChanged(first),
                BroadcastEvent::StateChanged(second)
            ]
        );
    }

    #[test]
    fn test_advance_to_choice() {
        let (seq, _, _) = sequencer();
        seq.load_show(sample_graph()).unwrap();
        seq.advance().unwrap();
        let state = seq.advance_to_choice("f1", 1).unwrap();
        assert_eq!(state.id, "b");
    }

    #[test]
    fn test_stale_vote_leaves_state_untouched() {
        let graph = ShowGraph::new(
            "s",
            "f1",
            vec![
                Node::fork("f1", &[("x", "f2"), ("y", "f2")]),
                Node::fork("f2", &[("x", "f1"), ("y", "f1")]),
            ],
        )
        .unwrap();
        let (seq, _, _) = sequencer();
        seq.load_show(graph).unwrap();
        seq.advance().unwrap();
        assert_eq!(seq.active_state().unwrap().id, "f2");

        let err = seq.advance_to_choice("f1", 1).unwrap_err();
        assert!(matches!(err, ShowError::StaleVote { .. }));
        assert_eq!(seq.active_state().unwrap().id, "f2");
    }

    #[test]
    fn test_invalid_choice() {
        let (seq, _, _) = sequencer();
        seq.load_show(sample_graph()).unwrap();
        seq.advance().unwrap();
        let err = seq.advance_to_choice("f1", 2).unwrap_err();
        assert!(matches!(
            err,
            ShowError::InvalidChoice {
                choice_index: 2,
                choice_count: 2,
                ..
            }
        ));
        assert_eq!(seq.active_state().unwrap().id, "f1");
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let (seq, _, mut sub) = sequencer();
        seq.load_show(sample_graph()).unwrap();
        seq.advance().unwrap();
        seq.advance().unwrap();
        drain(&mut sub);
        let state = seq.reset().unwrap();
        assert_eq!(state.id, "intro");
        assert_eq!(drain(&mut sub), vec![BroadcastEvent::StateChanged(state)]);
    }

    #[test]
    fn test_every_transition_is_persisted() {
        let (seq, store, _) = sequencer();
        seq.load_show(sample_graph()).unwrap();
        seq.advance().unwrap();
        let persisted: ActiveState = store::get_json(store.as_ref(), ACTIVE_STATE_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(persisted.id, "f1");
    }

    #[test]
    fn test_restart_resumes_at_last_state() {
        let store = Arc::new(MemoryStore::new());
        {
            let hub = Arc::new(BroadcastHub::new(8, OscPublisher::noop()));
            let seq = Sequencer::new(store.clone(), hub);
            seq.load_show(sample_graph()).unwrap();
            seq.advance().unwrap();
            seq.advance_to_choice("f1", 1).unwrap();
        }

        let hub = Arc::new(BroadcastHub::new(8, OscPublisher::noop()));
        let seq = Sequencer::new(store, hub.clone());
        let resumed = seq.restore().unwrap();
        assert_eq!(resumed.id, "b");
        assert_eq!(seq.show_id().as_deref(), Some("test-show"));

        let mut late = hub.subscribe();
        assert_eq!(
            late.try_recv(),
            Some(BroadcastEvent::ShowLoaded {
                show_id: "test-show".into()
            })
        );
        assert_eq!(late.try_recv(), Some(BroadcastEvent::StateChanged(resumed)));
    }

    #[test]
    fn test_restore_with_unknown_state_falls_back_to_initial() {
        let store = Arc::new(MemoryStore::new());
        store::put_json(store.as_ref(), SHOW_KEY, &sample_graph().to_json_value()).unwrap();
        store::put_json(
            store.as_ref(),
            ACTIVE_STATE_KEY,
            &ActiveState {
                id: "deleted".into(),
                kind: NodeKind::Scene,
            },
        )
        .unwrap();
        let hub = Arc::new(BroadcastHub::new(8, OscPublisher::noop()));
        let seq = Sequencer::new(store, hub);
        assert_eq!(seq.restore().unwrap().id, "intro");
    }

    #[test]
    fn test_restore_with_empty_store() {
        let (seq, _, _) = sequencer();
        assert!(seq.restore().is_none());
        assert!(seq.active_state().is_none());
    }
}
