//! Core types for declarative resource graphs

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

/// Resolved input or output properties of a resource
pub type Properties = serde_json::Map<String, Value>;

/// Placeholder rendered in place of secret values
pub const REDACTED: &str = "[secret]";

/// Logical name of a resource node, unique within a graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Pointer from an input property to another node's output property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub node: NodeId,
    pub output: String,
}

impl Reference {
    pub fn new(node: impl Into<NodeId>, output: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.output)
    }
}

/// One piece of an interpolated string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn reference(node: impl Into<NodeId>, output: impl Into<String>) -> Self {
        Self::Ref(Reference::new(node, output))
    }
}

/// A declared input property value
///
/// Literals are known when the graph is built. References, and any list, map
/// or template containing one, only become concrete once the referenced node
/// has been created.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Literal(Value),
    Ref(Reference),
    List(Vec<Input>),
    Map(IndexMap<String, Input>),
    Template(Vec<Segment>),
}

impl Input {
    /// Create a literal input
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Create a reference to another node's output
    pub fn reference(node: impl Into<NodeId>, output: impl Into<String>) -> Self {
        Self::Ref(Reference::new(node, output))
    }

    /// Create an interpolated string
    pub fn template(segments: Vec<Segment>) -> Self {
        Self::Template(segments)
    }

    /// All references embedded in this input, in declaration order
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(reference) => out.push(reference),
            Self::List(items) => items.iter().for_each(|item| item.collect_references(out)),
            Self::Map(entries) => entries
                .values()
                .for_each(|item| item.collect_references(out)),
            Self::Template(segments) => out.extend(segments.iter().filter_map(|s| match s {
                Segment::Ref(reference) => Some(reference),
                Segment::Text(_) => None,
            })),
        }
    }

    /// Substitute references using `lookup`
    ///
    /// Returns `None` when any embedded reference is not known yet.
    pub fn materialize<F>(&self, lookup: &F) -> Option<Value>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Ref(reference) => lookup(reference),
            Self::List(items) => items
                .iter()
                .map(|item| item.materialize(lookup))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Self::Map(entries) => entries
                .iter()
                .map(|(key, item)| item.materialize(lookup).map(|v| (key.clone(), v)))
                .collect::<Option<Properties>>()
                .map(Value::Object),
            Self::Template(segments) => {
                let mut rendered = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => rendered.push_str(text),
                        Segment::Ref(reference) => {
                            rendered.push_str(&render_scalar(&lookup(reference)?));
                        }
                    }
                }
                Some(Value::String(rendered))
            }
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<Reference> for Input {
    fn from(reference: Reference) -> Self {
        Self::Ref(reference)
    }
}

/// Render a value for splicing into a string
///
/// Strings are inserted raw, everything else as JSON text.
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Lifecycle of a node during one reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Planned,
    InProgress,
    Created,
    Failed,
    DeletePending,
    DeleteInProgress,
    Deleted,
}

impl LifecycleState {
    /// Check whether moving to `next` is a legal transition
    ///
    /// Unchanged nodes settle directly from `Planned` to `Created`, and any
    /// state that has not finished yet may fail.
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::{
            Created, DeleteInProgress, DeletePending, Deleted, Failed, InProgress, Pending, Planned,
        };
        matches!(
            (self, next),
            (Pending, Planned)
                | (Planned, InProgress | Created | Failed)
                | (InProgress, Created | Failed)
                | (Created, DeletePending)
                | (DeletePending, DeleteInProgress | Failed)
                | (DeleteInProgress, Deleted | Failed)
        )
    }

    /// Check if no further transition is expected in this pass
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Created | Self::Deleted | Self::Failed)
    }

    /// Check if the state represents a successful outcome
    pub fn is_success(self) -> bool {
        matches!(self, Self::Created | Self::Deleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Created => "created",
            Self::Failed => "failed",
            Self::DeletePending => "delete_pending",
            Self::DeleteInProgress => "delete_in_progress",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a reconciliation pass does to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
    Noop,
}

impl Action {
    /// Check if the action calls a provider
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Noop)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Noop => "no-op",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub failed: usize,
    pub no_change: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of nodes processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.failed + self.no_change
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.replaced += other.replaced;
        self.deleted += other.deleted;
        self.failed += other.failed;
        self.no_change += other.no_change;
    }

    /// Count one finished node
    pub fn add_result(&mut self, action: Action, state: LifecycleState) {
        if state == LifecycleState::Failed {
            self.failed += 1;
            return;
        }
        match action {
            Action::Create => self.created += 1,
            Action::Update => self.updated += 1,
            Action::Replace => self.replaced += 1,
            Action::Delete => self.deleted += 1,
            Action::Noop => self.no_change += 1,
        }
    }
}
