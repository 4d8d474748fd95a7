//! Per-node diff policy
//!
//! Compares a node's declared inputs with the snapshot recorded after its last
//! apply and decides what to do with it. The same comparison runs twice: at
//! plan time, where inputs fed by changing upstream nodes are still unknown,
//! and again at execution time with every input resolved.

use crate::graph::ResourceNode;
use crate::provider::ResourceSchema;
use crate::state::StateRecord;
use crate::types::{Action, Properties, REDACTED, Reference};
use serde::Serialize;
use serde_json::Value;

/// New value of a property as far as the planner can tell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PlannedValue {
    Known(Value),
    /// Depends on an upstream output that does not exist yet
    Unknown,
    /// Property was dropped from the declaration
    Absent,
}

impl PlannedValue {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// A single property difference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyChange {
    pub property: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    pub new: PlannedValue,
    pub forces_replacement: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub secret: bool,
}

impl PropertyChange {
    /// Hide the values of a secret property
    pub fn redact(&mut self) {
        if !self.secret {
            return;
        }
        if self.old.is_some() {
            self.old = Some(Value::String(REDACTED.to_string()));
        }
        if let PlannedValue::Known(value) = &mut self.new {
            *value = Value::String(REDACTED.to_string());
        }
    }
}

/// Outcome of diffing one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDiff {
    pub action: Action,
    pub changes: Vec<PropertyChange>,
    /// Decision depends on unknown values and is re-checked at execution
    pub deferred: bool,
}

/// Diff a node at plan time
///
/// `lookup` returns the value of an upstream output when it is already known
/// (the upstream node is not changing in this pass).
pub fn plan_node<F>(
    node: &ResourceNode,
    schema: &ResourceSchema,
    prior: Option<&StateRecord>,
    lookup: F,
) -> NodeDiff
where
    F: Fn(&Reference) -> Option<Value>,
{
    let planned = node
        .inputs
        .iter()
        .map(|(property, input)| {
            let value = input
                .materialize(&lookup)
                .map_or(PlannedValue::Unknown, PlannedValue::Known);
            (property.clone(), value)
        })
        .collect();
    compare(node, schema, prior, planned)
}

/// Diff a node at execution time, with all inputs resolved
pub fn decide(
    node: &ResourceNode,
    schema: &ResourceSchema,
    prior: Option<&StateRecord>,
    resolved: &Properties,
) -> NodeDiff {
    let planned = resolved
        .iter()
        .map(|(property, value)| (property.clone(), PlannedValue::Known(value.clone())))
        .collect();
    compare(node, schema, prior, planned)
}

fn compare(
    node: &ResourceNode,
    schema: &ResourceSchema,
    prior: Option<&StateRecord>,
    planned: Vec<(String, PlannedValue)>,
) -> NodeDiff {
    let Some(prior) = prior else {
        let changes = planned
            .into_iter()
            .map(|(property, new)| PropertyChange {
                secret: node.is_secret(&property),
                property,
                old: None,
                new,
                forces_replacement: false,
            })
            .collect();
        return NodeDiff {
            action: Action::Create,
            changes,
            deferred: false,
        };
    };

    let forces = |property: &str| {
        node.replace_on_changes.contains(property) || !schema.is_updatable(property)
    };

    let mut changes = Vec::new();

    if prior.resource_type != node.resource_type {
        changes.push(PropertyChange {
            property: "type".to_string(),
            old: Some(Value::String(prior.resource_type.clone())),
            new: PlannedValue::Known(Value::String(node.resource_type.clone())),
            forces_replacement: true,
            secret: false,
        });
    }

    for (property, new) in &planned {
        let old = prior.inputs.get(property);
        if let (PlannedValue::Known(value), Some(old)) = (new, old)
            && value == old
        {
            continue;
        }
        changes.push(PropertyChange {
            property: property.clone(),
            old: old.cloned(),
            new: new.clone(),
            forces_replacement: forces(property),
            secret: node.is_secret(property),
        });
    }

    for (property, old) in &prior.inputs {
        if planned.iter().any(|(p, _)| p == property) {
            continue;
        }
        changes.push(PropertyChange {
            property: property.clone(),
            old: Some(old.clone()),
            new: PlannedValue::Absent,
            forces_replacement: forces(property),
            secret: prior.secrets.contains(property),
        });
    }

    let known_replacement = changes
        .iter()
        .any(|c| c.forces_replacement && !c.new.is_unknown());
    let has_unknown = changes.iter().any(|c| c.new.is_unknown());

    let (action, deferred) = if changes.is_empty() {
        (Action::Noop, false)
    } else if known_replacement {
        (Action::Replace, false)
    } else {
        (Action::Update, has_unknown)
    };

    NodeDiff {
        action,
        changes,
        deferred,
    }
}
