//! Dependency planner - turns a validated graph plus the prior state into a
//! levelled plan

use crate::diff::{self, PropertyChange};
use crate::graph::{Graph, topological_levels};
use crate::provider::{ReplacementStrategy, SchemaCatalog};
use crate::state::{PendingDelete, StateDocument, StateRecord};
use crate::types::{Action, NodeId, Reference};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::HashMap;

/// One planned step for a node still in the declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    pub node: NodeId,
    pub resource_type: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<PropertyChange>,
    /// Action depends on values that are unknown until upstream nodes run
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deferred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<ReplacementStrategy>,
    /// Id of the existing instance, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Why an instance is being destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOrigin {
    /// Node was removed from the declaration
    Removed,
    /// Old instance of a node replaced create-before-delete in this pass
    Replaced,
    /// Left over from an earlier pass
    Pending,
}

/// An instance scheduled for destruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteEntry {
    pub node: NodeId,
    pub resource_type: String,
    pub provider_id: String,
    pub dependencies: Vec<NodeId>,
    pub origin: DeleteOrigin,
}

impl DeleteEntry {
    pub fn from_record(node: &NodeId, record: &StateRecord, origin: DeleteOrigin) -> Self {
        Self {
            node: node.clone(),
            resource_type: record.resource_type.clone(),
            provider_id: record.provider_id.clone(),
            dependencies: record.dependencies.clone(),
            origin,
        }
    }

    pub fn from_pending(pending: &PendingDelete) -> Self {
        Self {
            node: pending.node.clone(),
            resource_type: pending.resource_type.clone(),
            provider_id: pending.provider_id.clone(),
            dependencies: pending.dependencies.clone(),
            origin: DeleteOrigin::Pending,
        }
    }

    pub fn to_pending(&self) -> PendingDelete {
        PendingDelete {
            node: self.node.clone(),
            resource_type: self.resource_type.clone(),
            provider_id: self.provider_id.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

/// Counts of planned actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl DiffSummary {
    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }
}

/// Levelled plan for one reconciliation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    /// Every declared node, by dependency level
    pub levels: Vec<Vec<Operation>>,
    /// Instances to destroy after all levels ran
    pub deletions: Vec<DeleteEntry>,
}

impl Plan {
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.levels.iter().flatten()
    }

    pub fn get(&self, node: &str) -> Option<&Operation> {
        self.operations().find(|op| op.node.as_str() == node)
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary {
            delete: self.deletions.len(),
            ..DiffSummary::default()
        };
        for op in self.operations() {
            match op.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Replace => summary.replace += 1,
                Action::Delete => summary.delete += 1,
                Action::Noop => summary.unchanged += 1,
            }
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.summary().has_changes()
    }

    /// Planned deletions grouped by reverse dependency level
    pub fn deletion_levels(&self) -> Vec<Vec<&DeleteEntry>> {
        deletion_levels(&self.deletions)
            .into_iter()
            .map(|level| level.into_iter().map(|i| &self.deletions[i]).collect())
            .collect()
    }

    /// Replace secret values in every property change
    pub fn redact_secrets(&mut self) {
        self.levels
            .iter_mut()
            .flatten()
            .flat_map(|op| op.changes.iter_mut())
            .for_each(PropertyChange::redact);
    }
}

/// Order deletions so dependents go before their dependencies
///
/// Returns indexes into `entries`. An instance waits for every other entry
/// whose recorded dependencies name it.
pub fn deletion_levels(entries: &[DeleteEntry]) -> Vec<Vec<usize>> {
    let blockers: IndexMap<usize, IndexSet<usize>> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let waits_for = entries
                .iter()
                .enumerate()
                .filter(|(j, other)| *j != i && other.dependencies.contains(&entry.node))
                .map(|(j, _)| j)
                .collect();
            (i, waits_for)
        })
        .collect();

    match topological_levels(&blockers) {
        Ok(levels) => levels,
        Err(stuck) => {
            log::warn!(
                "recorded dependencies of {} deletions form a cycle, deleting one at a time",
                stuck.len()
            );
            (0..entries.len()).rev().map(|i| vec![i]).collect()
        }
    }
}

/// Compute the plan for a pass
pub fn plan(graph: &Graph, state: &StateDocument, schemas: &SchemaCatalog) -> Plan {
    let mut actions: HashMap<&NodeId, Action> = HashMap::with_capacity(graph.len());
    let mut levels = Vec::with_capacity(graph.levels().len());

    for level in graph.levels() {
        let mut ops = Vec::with_capacity(level.len());
        for id in level {
            let Some(node) = graph.get(id.as_str()) else {
                continue;
            };
            let prior = state.record(id.as_str());
            let schema = schemas.schema_for(&node.resource_type);

            // Outputs are only known for upstream nodes this pass leaves alone
            let lookup = |r: &Reference| match actions.get(&r.node) {
                Some(Action::Noop) => state.record(r.node.as_str())?.output(&r.output),
                _ => None,
            };
            let diff = diff::plan_node(node, schema, prior, lookup);

            log::debug!(
                "plan {id}: {}{}",
                diff.action,
                if diff.deferred { " (deferred)" } else { "" }
            );
            actions.insert(id, diff.action);
            ops.push(Operation {
                node: id.clone(),
                resource_type: node.resource_type.clone(),
                action: diff.action,
                changes: diff.changes,
                deferred: diff.deferred,
                replacement: (diff.action == Action::Replace)
                    .then(|| schema.effective_replacement()),
                provider_id: prior.map(|r| r.provider_id.clone()),
            });
        }
        levels.push(ops);
    }

    let mut deletions: Vec<DeleteEntry> = state
        .resources
        .iter()
        .filter(|(id, _)| !graph.contains(id.as_str()))
        .map(|(id, record)| DeleteEntry::from_record(id, record, DeleteOrigin::Removed))
        .collect();
    deletions.extend(state.pending_deletes.iter().map(DeleteEntry::from_pending));

    Plan { levels, deletions }
}
