//! Fan-out of [`BroadcastEvent`]s to push-channel subscribers.
//!
//! Every subscriber owns a bounded queue. Delivery is `try_send`, so a
//! subscriber that stops reading never blocks the others: once its queue is
//! full (or its receiver is gone) it is disconnected and removed.
//!
//! New subscribers first receive the last `showLoaded` and `stateChanged`
//! events, so a late joiner sees the current state without waiting for the
//! next transition. State changes are also forwarded to the OSC publisher.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::events::BroadcastEvent;
use crate::graph::ActiveState;
use crate::osc::OscPublisher;

/// Default per-subscriber queue length.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Identifier handed out by [`BroadcastHub::subscribe`].
pub type SubscriberId = u64;

/// Receiving side of one subscriber's queue.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<BroadcastEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event. `None` once the hub dropped this subscriber.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<BroadcastEvent> {
        self.rx.try_recv().ok()
    }
}

struct HubInner {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, mpsc::Sender<BroadcastEvent>>,
    last_show_loaded: Option<BroadcastEvent>,
    last_state: Option<BroadcastEvent>,
}

/// Broadcast hub shared by the sequencer, vote session and push transports.
pub struct BroadcastHub {
    inner: Mutex<HubInner>,
    capacity: usize,
    osc: OscPublisher,
}

impl BroadcastHub {
    /// Create a hub with the given per-subscriber queue length.
    ///
    /// The capacity is raised to 2 if smaller so the replayed snapshot always fits.
    pub fn new(capacity: usize, osc: OscPublisher) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                next_id: 1,
                subscribers: HashMap::new(),
                last_show_loaded: None,
                last_state: None,
            }),
            capacity: capacity.max(2),
            osc,
        }
    }

    /// OSC publisher used for show-control cues.
    pub fn osc(&self) -> &OscPublisher {
        &self.osc
    }

    /// Register a new subscriber and replay the current snapshot to it.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut inner = self.inner.lock().expect("Hub lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;

        for event in [&inner.last_show_loaded, &inner.last_state]
            .into_iter()
            .flatten()
        {
            // Fresh queue with capacity >= 2 cannot be full here.
            let _ = tx.try_send(event.clone());
        }

        inner.subscribers.insert(id, tx);
        log::debug!(
            "[HUB] Subscriber {} joined ({} connected)",
            id,
            inner.subscribers.len()
        );
        Subscription { id, rx }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut inner = self.inner.lock().expect("Hub lock poisoned");
        if inner.subscribers.remove(&id).is_some() {
            log::debug!(
                "[HUB] Subscriber {} left ({} connected)",
                id,
                inner.subscribers.len()
            );
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("Hub lock poisoned").subscribers.len()
    }

    /// Deliver an event to every live subscriber.
    ///
    /// `stateChanged` events are also cued over OSC using the node id as
    /// cue name; use [`publish_state_change`](Self::publish_state_change)
    /// to cue with a display name.
    pub fn publish(&self, event: BroadcastEvent) {
        let cue = match &event {
            BroadcastEvent::StateChanged(state) => Some((state.kind, state.id.clone())),
            _ => None,
        };
        self.deliver(event);
        if let Some((kind, name)) = cue {
            self.osc.state_changed(kind, &name);
        }
    }

    /// Publish a state change and cue it over OSC under `cue_name`.
    pub fn publish_state_change(&self, state: ActiveState, cue_name: &str) {
        let kind = state.kind;
        self.deliver(BroadcastEvent::StateChanged(state));
        self.osc.state_changed(kind, cue_name);
    }

    fn deliver(&self, event: BroadcastEvent) {
        let mut inner = self.inner.lock().expect("Hub lock poisoned");
        match &event {
            BroadcastEvent::ShowLoaded { .. } => inner.last_show_loaded = Some(event.clone()),
            BroadcastEvent::StateChanged(_) => inner.last_state = Some(event.clone()),
            _ => {}
        }

        let mut dropped = Vec::new();
        for (id, tx) in inner.subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!(
                        "[HUB] Subscriber {} is not keeping up, disconnecting",
                        id
                    );
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            inner.subscribers.remove(&id);
        }
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
