//! Error types for meander-core.

use thiserror::Error;

/// Result type alias for sequencer and runtime operations.
pub type Result<T> = std::result::Result<T, ShowError>;

/// Errors surfaced by the sequencer, vote session and runtime.
#[derive(Debug, Error)]
pub enum ShowError {
    /// An operation needed a loaded show but none is loaded.
    #[error("No show loaded")]
    NoShowLoaded,

    /// The uploaded show failed validation; the previous show keeps running.
    #[error("Invalid show graph: {0}")]
    InvalidGraph(#[from] GraphError),

    /// A vote resolved against a fork that is no longer the active state.
    #[error("Stale vote for fork '{fork_id}' (active state is '{active_id}')")]
    StaleVote { fork_id: String, active_id: String },

    /// The choice index is outside the fork's choice list.
    #[error("Invalid choice {choice_index} for fork '{fork_id}' ({choice_count} choices)")]
    InvalidChoice {
        fork_id: String,
        choice_index: usize,
        choice_count: usize,
    },

    /// A vote session is already running.
    #[error("Vote session already active for fork '{fork_id}'")]
    AlreadyActive { fork_id: String },

    /// The vote targets a show other than the one currently loaded.
    #[error("Vote for show '{got}' but show '{loaded}' is loaded")]
    StaleShow { got: String, loaded: String },

    /// The referenced node exists but is not a fork.
    #[error("Node '{0}' is not a fork")]
    NotAFork(String),
}

/// A single problem found while validating a show package.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphIssue {
    #[error("initial state '{0}' does not exist")]
    MissingInitial(String),

    #[error("show has no states")]
    Empty,

    #[error("state '{from}' points at unknown state '{to}'")]
    DanglingReference { from: String, to: String },

    #[error("state id '{0}' is defined more than once")]
    DuplicateId(String),

    #[error("fork '{id}' has {count} choices, at least 2 are required")]
    TooFewChoices { id: String, count: usize },

    #[error("state keyed '{key}' declares id '{id}'")]
    KeyMismatch { key: String, id: String },

    #[error("a state has an empty id")]
    EmptyId,
}

/// Errors produced while parsing or validating a show package.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The package is not valid JSON or does not match either show format.
    #[error("malformed show package: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The package parsed but describes an inconsistent graph.
    #[error("{} validation issue(s): {}", .0.len(), join_issues(.0))]
    Invalid(Vec<GraphIssue>),
}

impl GraphError {
    /// All issues found, empty for malformed packages.
    pub fn issues(&self) -> &[GraphIssue] {
        match self {
            GraphError::Invalid(issues) => issues,
            GraphError::Malformed(_) => &[],
        }
    }
}

fn join_issues(issues: &[GraphIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from the key-value state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
