//! Meander Client - keeps a viewer in sync with a Meander show server.
//!
//! The [`ClientSyncAgent`] follows the server's push channel, reconnects
//! with exponential backoff when it drops, and falls back to polling the
//! snapshot endpoint while push is unavailable. The resulting
//! [`ViewState`] degrades to the last known good state instead of going
//! blank when the network is gone.
//!
//! # Usage
//!
//! ```ignore
//! use meander_client::{AgentConfig, ClientSyncAgent, HttpSnapshotSource, WsConnector};
//!
//! let agent = ClientSyncAgent::spawn(
//!     WsConnector::new("http://stage.local:8080")?,
//!     HttpSnapshotSource::new("http://stage.local:8080", Duration::from_secs(2))?,
//!     AgentConfig::default(),
//! );
//! let mut view = agent.view();
//! while view.changed().await.is_ok() {
//!     println!("{:?}", view.borrow().active);
//! }
//! ```

pub mod agent;
pub mod error;
pub mod transport;
pub mod view;

pub use agent::{AgentConfig, ClientSyncAgent, Connection, SyncStatus};
pub use error::{ClientError, Result};
pub use transport::{EventStream, HttpSnapshotSource, PushConnector, SnapshotSource, WsConnector};
pub use view::{Countdown, ViewModel, ViewState, VoteOutcome};
