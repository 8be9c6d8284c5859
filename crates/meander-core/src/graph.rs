//! Show graph model and package normalization.
//!
//! A show is a directed graph of [`Node`]s. Scenes have at most one
//! successor, forks present two or more [`Choice`]s. Uploaded packages
//! come in two shapes:
//!
//! - the id-keyed map form: `{"initialStateId": "a", "states": {"a": {...}}}`
//! - the legacy array form: `{"states": [{"id": "a", ...}]}`, where the
//!   initial state defaults to the first element
//!
//! Both are normalized here into a single [`ShowGraph`]. Once built, a graph
//! is never mutated; loading a new show replaces the whole `Arc<ShowGraph>`.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphIssue};

/// Kind of a show node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Scene,
    Fork,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Scene => "scene",
            NodeKind::Fork => "fork",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The node currently live in the performance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveState {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
}

/// One option offered by a fork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    #[serde(rename = "nextStateId", alias = "nextId")]
    pub next_id: String,
}

/// Kind-specific payload of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeBody {
    Scene {
        #[serde(
            rename = "nextStateId",
            alias = "next",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        next: Option<String>,
    },
    Fork {
        choices: Vec<Choice>,
        #[serde(
            rename = "countdownSeconds",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        countdown_seconds: Option<u32>,
    },
}

/// A single show node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub body: NodeBody,
}

impl Node {
    /// Build a scene node.
    pub fn scene(id: impl Into<String>, next: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: None,
            body: NodeBody::Scene {
                next: next.map(str::to_string),
            },
        }
    }

    /// Build a fork node from `(label, target)` pairs.
    pub fn fork(id: impl Into<String>, choices: &[(&str, &str)]) -> Self {
        Self {
            id: id.into(),
            name: None,
            body: NodeBody::Fork {
                choices: choices
                    .iter()
                    .map(|(label, next)| Choice {
                        label: label.to_string(),
                        next_id: next.to_string(),
                    })
                    .collect(),
                countdown_seconds: None,
            },
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the fork countdown. No effect on scenes.
    pub fn with_countdown(mut self, seconds: u32) -> Self {
        if let NodeBody::Fork {
            countdown_seconds, ..
        } = &mut self.body
        {
            *countdown_seconds = Some(seconds);
        }
        self
    }

    pub fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Scene { .. } => NodeKind::Scene,
            NodeBody::Fork { .. } => NodeKind::Fork,
        }
    }

    /// Name used for show-control cues; falls back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Fork choices, empty for scenes.
    pub fn choices(&self) -> &[Choice] {
        match &self.body {
            NodeBody::Fork { choices, .. } => choices,
            NodeBody::Scene { .. } => &[],
        }
    }

    /// Countdown declared on a fork, if any.
    pub fn countdown_seconds(&self) -> Option<u32> {
        match &self.body {
            NodeBody::Fork {
                countdown_seconds, ..
            } => *countdown_seconds,
            NodeBody::Scene { .. } => None,
        }
    }

    /// Target used by a manual advance: the scene successor, or the first
    /// choice of a fork.
    pub fn default_successor(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Scene { next } => next.as_deref(),
            NodeBody::Fork { choices, .. } => choices.first().map(|c| c.next_id.as_str()),
        }
    }

    pub fn active_state(&self) -> ActiveState {
        ActiveState {
            id: self.id.clone(),
            kind: self.kind(),
        }
    }

    fn targets(&self) -> Vec<&str> {
        match &self.body {
            NodeBody::Scene { next } => next.iter().map(String::as_str).collect(),
            NodeBody::Fork { choices, .. } => choices.iter().map(|c| c.next_id.as_str()).collect(),
        }
    }
}

/// A validated, immutable show graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowGraph {
    show_id: String,
    initial_node_id: String,
    nodes: HashMap<String, Node>,
}

impl ShowGraph {
    /// Build and validate a graph from already-parsed nodes.
    pub fn new(
        show_id: impl Into<String>,
        initial_node_id: impl Into<String>,
        nodes: Vec<Node>,
    ) -> Result<Self, GraphError> {
        let initial_node_id = initial_node_id.into();
        let mut issues = Vec::new();
        let mut map = HashMap::with_capacity(nodes.len());

        if nodes.is_empty() {
            issues.push(GraphIssue::Empty);
        }

        for node in nodes {
            if node.id.is_empty() {
                issues.push(GraphIssue::EmptyId);
                continue;
            }
            if let NodeBody::Fork { choices, .. } = &node.body {
                if choices.len() < 2 {
                    issues.push(GraphIssue::TooFewChoices {
                        id: node.id.clone(),
                        count: choices.len(),
                    });
                }
            }
            if map.contains_key(&node.id) {
                issues.push(GraphIssue::DuplicateId(node.id.clone()));
                continue;
            }
            map.insert(node.id.clone(), node);
        }

        if !map.is_empty() && !map.contains_key(&initial_node_id) {
            issues.push(GraphIssue::MissingInitial(initial_node_id.clone()));
        }

        let mut dangling: Vec<GraphIssue> = map
            .values()
            .flat_map(|node| {
                node.targets()
                    .into_iter()
                    .filter(|to| !map.contains_key(*to))
                    .map(|to| GraphIssue::DanglingReference {
                        from: node.id.clone(),
                        to: to.to_string(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        // HashMap iteration order is random; keep error output stable.
        dangling.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        issues.extend(dangling);

        if !issues.is_empty() {
            return Err(GraphError::Invalid(issues));
        }

        Ok(Self {
            show_id: show_id.into(),
            initial_node_id,
            nodes: map,
        })
    }

    /// Parse and validate a show package in either supported format.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let package: RawPackage = serde_json::from_str(json)?;
        let show_id = package
            .show_id
            .clone()
            .unwrap_or_else(|| derive_show_id(json));
        package.normalize(show_id)
    }

    /// Parse and validate a show package from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, GraphError> {
        let text = value.to_string();
        Self::from_json(&text)
    }

    pub fn show_id(&self) -> &str {
        &self.show_id
    }

    pub fn initial_node_id(&self) -> &str {
        &self.initial_node_id
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Active state for the initial node.
    pub fn initial_state(&self) -> ActiveState {
        // Validation guarantees the initial node exists.
        self.nodes
            .get(&self.initial_node_id)
            .map(Node::active_state)
            .unwrap_or_else(|| ActiveState {
                id: self.initial_node_id.clone(),
                kind: NodeKind::Scene,
            })
    }

    /// Canonical id-keyed package form, suitable for persistence and for
    /// `GET /show-graph`.
    pub fn to_json_value(&self) -> serde_json::Value {
        let states: BTreeMap<&str, &Node> =
            self.nodes.iter().map(|(id, n)| (id.as_str(), n)).collect();
        serde_json::json!({
            "showId": self.show_id,
            "initialStateId": self.initial_node_id,
            "states": states,
        })
    }
}

impl Serialize for ShowGraph {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_value().serialize(serializer)
    }
}

fn derive_show_id(json: &str) -> String {
    let mut hasher = DefaultHasher::new();
    json.hash(&mut hasher);
    format!("show-{:016x}", hasher.finish())
}

// ============================================================================
// Raw package formats
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPackage {
    #[serde(default)]
    show_id: Option<String>,
    #[serde(default, alias = "initialNodeId")]
    initial_state_id: Option<String>,
    states: RawStates,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStates {
    Map(BTreeMap<String, RawState>),
    List(Vec<RawState>),
}

#[derive(Debug, Deserialize)]
struct RawState {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    body: NodeBody,
}

impl RawPackage {
    fn normalize(self, show_id: String) -> Result<ShowGraph, GraphError> {
        let mut issues = Vec::new();
        let (initial, nodes) = match self.states {
            RawStates::Map(states) => {
                let nodes: Vec<Node> = states
                    .into_iter()
                    .map(|(key, raw)| {
                        let id = match raw.id {
                            Some(id) if id != key => {
                                issues.push(GraphIssue::KeyMismatch {
                                    key: key.clone(),
                                    id,
                                });
                                key
                            }
                            _ => key,
                        };
                        Node {
                            id,
                            name: raw.name,
                            body: raw.body,
                        }
                    })
                    .collect();
                (self.initial_state_id, nodes)
            }
            RawStates::List(states) => {
                let nodes: Vec<Node> = states
                    .into_iter()
                    .map(|raw| Node {
                        id: raw.id.unwrap_or_default(),
                        name: raw.name,
                        body: raw.body,
                    })
                    .collect();
                let initial = self
                    .initial_state_id
                    .or_else(|| nodes.first().map(|n| n.id.clone()));
                (initial, nodes)
            }
        };

        let initial = initial.unwrap_or_default();
        match ShowGraph::new(show_id, initial, nodes) {
            Ok(graph) if issues.is_empty() => Ok(graph),
            Ok(_) => Err(GraphError::Invalid(issues)),
            Err(GraphError::Invalid(more)) => {
                issues.extend(more);
                Err(GraphError::Invalid(issues))
            }
            Err(e) => Err(e),
        }
    }
}
