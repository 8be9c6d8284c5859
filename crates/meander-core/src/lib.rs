//! Meander Core - show sequencing and real-time broadcast for live performances.
//!
//! This crate provides the authoritative server-side engine:
//!
//! - **Graph** - Show packages normalized into an immutable scene/fork graph
//! - **Sequencer** - The single current active state, persisted on every move
//! - **Tally** - One ballot per device per fork, deterministic winner
//! - **Vote Session** - Cancellable fork countdowns with a settle window
//! - **Hub** - Fan-out of wire events to push-channel subscribers
//! - **OSC** - Cues for lighting and audio desks over UDP
//! - **Store** - Key-value durability for the show and active state
//! - **Runtime** - The coordinator transports talk to
//!
//! # Architecture
//!
//! All mutations go through [`ShowRuntime`], which owns the [`Sequencer`],
//! the [`VoteTally`], the [`VoteSession`] and the [`BroadcastHub`]. Every
//! transition is persisted through a [`StateStore`] and emitted as a
//! [`BroadcastEvent`] while the sequencer lock is held, so subscribers see
//! events in mutation order.

pub mod error;
pub mod events;
pub mod graph;
pub mod hub;
pub mod osc;
pub mod runtime;
pub mod sequencer;
pub mod store;
pub mod tally;
pub mod vote_session;

// Re-export main types for convenience
pub use error::{GraphError, GraphIssue, Result, ShowError, StoreError};
pub use events::{BroadcastEvent, ClientMessage};
pub use graph::{ActiveState, Choice, Node, NodeBody, NodeKind, ShowGraph};
pub use hub::{BroadcastHub, SubscriberId, Subscription, DEFAULT_QUEUE_CAPACITY};
pub use osc::{OscPublisher, OscTarget};
pub use runtime::{RuntimeOptions, ShowRuntime, DEFAULT_COUNTDOWN_SECONDS};
pub use sequencer::Sequencer;
pub use store::{FileStore, MemoryStore, StateStore};
pub use tally::{Ballot, TallyResult, VoteTally};
pub use vote_session::{Started, VoteSession, DEFAULT_SETTLE_DELAY};
