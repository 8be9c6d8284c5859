//! The viewer-side sync agent.
//!
//! Two tasks cooperate through one [`SyncStatus`] watch channel:
//!
//! - the push task connects the push channel, reconnecting with exponential
//!   backoff after a failure or a drop
//! - the poll task waits out a fallback delay whenever push is not
//!   connected, then polls the snapshot endpoint until push comes back
//!
//! Whether the view is fed by push or by polling is decided by the single
//! `connected` flag, so the two never drive the view at the same time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use meander_core::BroadcastEvent;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::transport::{PushConnector, SnapshotSource};
use crate::view::{ViewModel, ViewState};

/// Push channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Connection {
    Disconnected,
    /// `attempt` 0 is the initial connect, 1.. are reconnects.
    Connecting { attempt: u32 },
    Connected,
}

/// Connection state plus the orthogonal polling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub connection: Connection,
    pub polling: bool,
    /// Every backoff attempt failed; polling keeps the view fresh while push
    /// is retried slowly.
    pub push_exhausted: bool,
}

impl SyncStatus {
    pub fn is_connected(&self) -> bool {
        self.connection == Connection::Connected
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            connection: Connection::Disconnected,
            polling: false,
            push_exhausted: false,
        }
    }
}

/// Timing of reconnects and polling.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Delay before the first reconnect; doubles on each further attempt.
    pub backoff_base: Duration,
    /// Backoff attempts per disconnection before push counts as exhausted.
    pub max_attempts: u32,
    /// Retry period for push once the backoff attempts are used up.
    pub exhausted_retry: Duration,
    /// How long push may stay down before polling starts.
    pub fallback_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            max_attempts: 5,
            exhausted_retry: Duration::from_secs(30),
            fallback_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
        }
    }
}

struct Shared {
    status_tx: watch::Sender<SyncStatus>,
    view_tx: watch::Sender<ViewState>,
    model: Mutex<ViewModel>,
}

impl Shared {
    fn is_connected(&self) -> bool {
        self.status_tx.borrow().is_connected()
    }

    fn set_connection(&self, connection: Connection) {
        self.status_tx.send_if_modified(|status| {
            let changed = status.connection != connection;
            status.connection = connection;
            changed
        });
    }

    fn update_status(&self, f: impl FnOnce(&mut SyncStatus)) {
        self.status_tx.send_if_modified(|status| {
            let before = *status;
            f(status);
            *status != before
        });
    }

    fn update_view(&self, f: impl FnOnce(&mut ViewModel) -> bool) {
        let mut model = self.model.lock().expect("View lock poisoned");
        if f(&mut model) {
            self.view_tx.send_replace(model.state().clone());
        }
    }

    fn apply_event(&self, event: &BroadcastEvent) {
        self.update_view(|model| model.apply_event(event));
    }
}

/// Keeps a local [`ViewState`] in sync with a Meander server.
///
/// Dropping the agent stops both background tasks.
pub struct ClientSyncAgent {
    status_rx: watch::Receiver<SyncStatus>,
    view_rx: watch::Receiver<ViewState>,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientSyncAgent {
    /// Start syncing. Must be called from within a tokio runtime.
    pub fn spawn(
        push: impl PushConnector,
        snapshots: impl SnapshotSource,
        config: AgentConfig,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(SyncStatus::default());
        let (view_tx, view_rx) = watch::channel(ViewState::default());
        let shared = Arc::new(Shared {
            status_tx,
            view_tx,
            model: Mutex::new(ViewModel::new()),
        });

        let tasks = vec![
            tokio::spawn(run_push(Arc::clone(&shared), push, config.clone())),
            tokio::spawn(run_poll(shared, snapshots, config)),
        ];

        Self {
            status_rx,
            view_rx,
            tasks,
        }
    }

    /// Connection status updates.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// View updates.
    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.view_rx.clone()
    }

    pub fn current_view(&self) -> ViewState {
        self.view_rx.borrow().clone()
    }

    pub fn current_status(&self) -> SyncStatus {
        *self.status_rx.borrow()
    }

    /// Stop both background tasks.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ClientSyncAgent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_push(shared: Arc<Shared>, connector: impl PushConnector, config: AgentConfig) {
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            let delay = if attempt > config.max_attempts {
                if attempt == config.max_attempts + 1 {
                    log::warn!(
                        "[CLIENT] Push channel unreachable after {} attempts, relying on polling",
                        config.max_attempts
                    );
                    shared.update_status(|s| s.push_exhausted = true);
                }
                config.exhausted_retry
            } else {
                config.backoff_base * 2u32.saturating_pow(attempt - 1)
            };
            log::info!("[CLIENT] Reconnecting in {:?} (attempt {})", delay, attempt);
            tokio::time::sleep(delay).await;
        }

        shared.set_connection(Connection::Connecting { attempt });
        match connector.connect().await {
            Ok(mut events) => {
                shared.update_status(|s| {
                    s.connection = Connection::Connected;
                    s.push_exhausted = false;
                });
                shared.update_view(|model| model.set_stale(false));

                while let Some(event) = events.next().await {
                    match event {
                        Ok(event) => shared.apply_event(&event),
                        Err(e) => {
                            log::warn!("[CLIENT] Push channel error: {}", e);
                            break;
                        }
                    }
                }

                log::warn!("[CLIENT] Push channel dropped");
                shared.set_connection(Connection::Disconnected);
                attempt = 1;
            }
            Err(e) => {
                log::warn!("[CLIENT] Push connect failed: {}", e);
                shared.set_connection(Connection::Disconnected);
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

async fn run_poll(shared: Arc<Shared>, source: impl SnapshotSource, config: AgentConfig) {
    let mut status_rx = shared.status_tx.subscribe();
    loop {
        if status_rx.wait_for(|s| !s.is_connected()).await.is_err() {
            return;
        }

        // Give push a head start before falling back
        let connected = tokio::select! {
            _ = tokio::time::sleep(config.fallback_delay) => false,
            result = status_rx.wait_for(|s| s.is_connected()) => result.is_ok(),
        };
        if connected {
            continue;
        }

        log::info!("[CLIENT] Push channel down, polling every {:?}", config.poll_interval);
        shared.update_status(|s| s.polling = true);

        let mut ticks = tokio::time::interval(config.poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = async { drop(status_rx.wait_for(|s| s.is_connected()).await) } => break,
                _ = ticks.tick() => poll_once(&shared, &source).await,
            }
        }

        shared.update_status(|s| s.polling = false);
        log::info!("[CLIENT] Push channel back, polling stopped");
    }
}

async fn poll_once(shared: &Shared, source: &impl SnapshotSource) {
    let result = source.fetch().await;
    if shared.is_connected() {
        // push took over while the request was in flight
        return;
    }
    match result {
        Ok(Some(active)) => shared.update_view(|model| {
            let applied = model.apply_snapshot(&active);
            model.set_stale(false) | applied
        }),
        Ok(None) => shared.update_view(|model| model.set_stale(false)),
        Err(e) => {
            log::warn!("[CLIENT] Snapshot poll failed: {}", e);
            shared.update_view(|model| model.set_stale(true));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, Result};
    use crate::transport::EventStream;
    use async_trait::async_trait;
    use meander_core::{ActiveState, NodeKind};
    use std::collections::VecDeque;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn state(id: &str) -> ActiveState {
        ActiveState {
            id: id.into(),
            kind: NodeKind::Scene,
        }
    }

    enum Script {
        Fail,
        Connect(mpsc::UnboundedReceiver<Result<BroadcastEvent>>),
    }

    /// Push connector that plays a script, then fails forever.
    #[derive(Clone)]
    struct FakePush {
        script: Arc<Mutex<VecDeque<Script>>>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl FakePush {
        fn new(script: Vec<Script>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                attempts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn attempt_offsets(&self, t0: Instant) -> Vec<u64> {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .map(|t| t.duration_since(t0).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl PushConnector for FakePush {
        async fn connect(&self) -> Result<EventStream> {
            self.attempts.lock().unwrap().push(Instant::now());
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Script::Connect(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                })
                .boxed()),
                Some(Script::Fail) | None => Err(ClientError::Status(502)),
            }
        }
    }

    /// Snapshot source returning a fixed answer after an optional delay.
    #[derive(Clone)]
    struct FakeSnapshots {
        answer: Arc<Mutex<Option<ActiveState>>>,
        fail: bool,
        delay: Duration,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    impl FakeSnapshots {
        fn new(answer: Option<ActiveState>) -> Self {
            Self {
                answer: Arc::new(Mutex::new(answer)),
                fail: false,
                delay: Duration::ZERO,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(None)
            }
        }

        fn call_offsets(&self, t0: Instant) -> Vec<u64> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|t| t.duration_since(t0).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl SnapshotSource for FakeSnapshots {
        async fn fetch(&self) -> Result<Option<ActiveState>> {
            self.calls.lock().unwrap().push(Instant::now());
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ClientError::Status(500));
            }
            Ok(self.answer.lock().unwrap().clone())
        }
    }

    fn live_channel() -> (mpsc::UnboundedSender<Result<BroadcastEvent>>, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Script::Connect(rx))
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_push_feeds_view_and_never_polls() {
        let (tx, script) = live_channel();
        let push = FakePush::new(vec![script]);
        let snapshots = FakeSnapshots::new(Some(state("polled")));
        let agent = ClientSyncAgent::spawn(push, snapshots.clone(), AgentConfig::default());

        tx.send(Ok(BroadcastEvent::ShowLoaded {
            show_id: "gala".into(),
        }))
        .unwrap();
        tx.send(Ok(BroadcastEvent::StateChanged(state("intro"))))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(agent.current_status().is_connected());
        assert!(!agent.current_status().polling);
        assert_eq!(agent.current_view().active, Some(state("intro")));
        assert_eq!(agent.current_view().show_id.as_deref(), Some("gala"));
        assert!(snapshots.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_then_slows_down() {
        let push = FakePush::new(vec![]);
        let t0 = Instant::now();
        let agent = ClientSyncAgent::spawn(
            push.clone(),
            FakeSnapshots::new(None),
            AgentConfig::default(),
        );

        tokio::time::sleep(Duration::from_secs(45)).await;
        // initial connect, then 1s, 2s, 4s, 8s, 16s apart
        assert_eq!(push.attempt_offsets(t0), vec![0, 1, 3, 7, 15, 31]);
        let status = agent.current_status();
        assert_eq!(status.connection, Connection::Disconnected);
        assert!(status.push_exhausted);
        assert!(status.polling);

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(push.attempt_offsets(t0), vec![0, 1, 3, 7, 15, 31, 61, 91]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_returns_after_exhaustion() {
        let (tx, script) = live_channel();
        let mut steps: Vec<Script> = (0..6).map(|_| Script::Fail).collect();
        steps.push(script);
        let push = FakePush::new(steps);
        let snapshots = FakeSnapshots::new(Some(state("polled")));
        let t0 = Instant::now();
        let agent = ClientSyncAgent::spawn(push.clone(), snapshots.clone(), AgentConfig::default());

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(agent.current_status().push_exhausted);
        assert!(agent.current_status().polling);

        // server back; the slow retry at 61s takes over from polling
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(push.attempt_offsets(t0).last(), Some(&61));
        let status = agent.current_status();
        assert!(status.is_connected());
        assert!(!status.push_exhausted);
        assert!(!status.polling);

        let polls = snapshots.calls.lock().unwrap().len();
        tx.send(Ok(BroadcastEvent::StateChanged(state("live"))))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(agent.current_view().active, Some(state("live")));
        assert_eq!(snapshots.calls.lock().unwrap().len(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_starts_after_fallback_delay() {
        let push = FakePush::new(vec![]);
        let snapshots = FakeSnapshots::new(Some(state("intro")));
        let t0 = Instant::now();
        let agent = ClientSyncAgent::spawn(push, snapshots.clone(), AgentConfig::default());

        tokio::time::sleep(Duration::from_millis(9500)).await;
        assert_eq!(snapshots.call_offsets(t0), vec![5, 7, 9]);
        assert_eq!(agent.current_view().active, Some(state("intro")));
        assert!(agent.current_status().polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_reconnect_stops_polling() {
        // fails at 0s, 1s, 3s; connects at 7s; polls at 5s and would poll again at 8s
        let (tx, script) = live_channel();
        let push = FakePush::new(vec![Script::Fail, Script::Fail, Script::Fail, script]);
        let snapshots = FakeSnapshots::new(Some(state("intro")));
        let config = AgentConfig {
            poll_interval: Duration::from_secs(3),
            ..AgentConfig::default()
        };
        let t0 = Instant::now();
        let agent = ClientSyncAgent::spawn(push.clone(), snapshots.clone(), config);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(push.attempt_offsets(t0), vec![0, 1, 3, 7]);
        assert_eq!(snapshots.call_offsets(t0), vec![5]);
        assert!(agent.current_status().is_connected());
        assert!(!agent.current_status().polling);

        tx.send(Ok(BroadcastEvent::StateChanged(state("next"))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(agent.current_view().active, Some(state("next")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_answer_arriving_after_connect_is_dropped() {
        // push fails at 0s and 1s, connects at 3s; the poll sent at 2s answers at 3.5s
        let (tx, script) = live_channel();
        let push = FakePush::new(vec![Script::Fail, Script::Fail, script]);
        let snapshots = FakeSnapshots {
            delay: Duration::from_millis(1500),
            ..FakeSnapshots::new(Some(state("old")))
        };
        let config = AgentConfig {
            fallback_delay: Duration::from_secs(2),
            ..AgentConfig::default()
        };
        let agent = ClientSyncAgent::spawn(push, snapshots.clone(), config);

        tx.send(Ok(BroadcastEvent::StateChanged(state("live"))))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(snapshots.calls.lock().unwrap().len(), 1);
        assert_eq!(agent.current_view().active, Some(state("live")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_goes_stale_but_keeps_last_state() {
        let (tx, script) = live_channel();
        let push = FakePush::new(vec![script]);
        let agent = ClientSyncAgent::spawn(push, FakeSnapshots::failing(), AgentConfig::default());

        tx.send(Ok(BroadcastEvent::StateChanged(state("intro"))))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!agent.current_view().stale);

        // server goes away
        drop(tx);
        tokio::time::sleep(Duration::from_secs(10)).await;
        let view = agent.current_view();
        assert!(view.stale);
        assert_eq!(view.active, Some(state("intro")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_watch_only_fires_on_change() {
        let (tx, script) = live_channel();
        let push = FakePush::new(vec![script]);
        let agent = ClientSyncAgent::spawn(push, FakeSnapshots::new(None), AgentConfig::default());
        let mut view = agent.view();

        tx.send(Ok(BroadcastEvent::StateChanged(state("a")))).unwrap();
        view.changed().await.unwrap();
        view.borrow_and_update();

        tx.send(Ok(BroadcastEvent::StateChanged(state("a")))).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!view.has_changed().unwrap());
    }
}
