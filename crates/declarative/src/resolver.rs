//! Output resolver
//!
//! Every node gets one `watch` slot. The coordinator publishes a node's
//! outputs once its provider call succeeds (or fails it), and any number of
//! dependents waiting on that node wake up from the same publication.

use crate::error::NodeError;
use crate::types::{Input, NodeId, Properties, Reference};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Ready(Arc<Properties>),
    Failed,
}

/// Broadcast point for node outputs within one pass
#[derive(Debug)]
pub struct OutputResolver {
    slots: HashMap<NodeId, watch::Sender<Slot>>,
}

impl OutputResolver {
    pub fn new<'a, I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = &'a NodeId>,
    {
        let slots = nodes
            .into_iter()
            .map(|id| (id.clone(), watch::Sender::new(Slot::Pending)))
            .collect();
        Self { slots }
    }

    /// Make a node's outputs visible to every waiter
    ///
    /// Publication is single-shot; returns `false` if the node was already
    /// settled or is unknown.
    pub fn publish(&self, node: &NodeId, outputs: Properties) -> bool {
        self.settle(node, Slot::Ready(Arc::new(outputs)))
    }

    /// Wake every waiter with an upstream failure
    pub fn fail(&self, node: &NodeId) -> bool {
        self.settle(node, Slot::Failed)
    }

    fn settle(&self, node: &NodeId, next: Slot) -> bool {
        let Some(sender) = self.slots.get(node) else {
            log::warn!("resolver has no slot for {node}");
            return false;
        };
        sender.send_if_modified(|slot| {
            if matches!(slot, Slot::Pending) {
                *slot = next;
                true
            } else {
                false
            }
        })
    }

    pub fn is_resolved(&self, node: &str) -> bool {
        self.slots
            .get(node)
            .is_some_and(|sender| matches!(*sender.borrow(), Slot::Ready(_)))
    }

    /// Wait until `node` is created and return all its outputs
    pub async fn await_node(&self, node: &NodeId) -> Result<Arc<Properties>, NodeError> {
        let sender = self
            .slots
            .get(node)
            .ok_or_else(|| NodeError::internal(format!("no resolver slot for '{node}'")))?;
        let mut receiver = sender.subscribe();
        let settled = receiver
            .wait_for(|slot| !matches!(slot, Slot::Pending))
            .await
            .map_err(|_| NodeError::internal(format!("resolver for '{node}' was dropped")))?
            .clone();

        match settled {
            Slot::Ready(outputs) => Ok(outputs),
            Slot::Failed | Slot::Pending => Err(NodeError::UpstreamFailed { node: node.clone() }),
        }
    }

    /// Wait for a single output property
    pub async fn await_output(&self, node: &NodeId, output: &str) -> Result<Value, NodeError> {
        let outputs = self.await_node(node).await?;
        outputs
            .get(output)
            .cloned()
            .ok_or_else(|| NodeError::MissingOutput {
                node: node.clone(),
                output: output.to_string(),
            })
    }

    /// Materialize an input tree, waiting for each embedded reference
    pub async fn resolve_input(&self, input: &Input) -> Result<Value, NodeError> {
        let mut values: HashMap<&Reference, Value> = HashMap::new();
        for reference in input.references() {
            if !values.contains_key(reference) {
                let value = self.await_output(&reference.node, &reference.output).await?;
                values.insert(reference, value);
            }
        }
        input
            .materialize(&|r: &Reference| values.get(r).cloned())
            .ok_or_else(|| NodeError::internal("reference left unresolved"))
    }

    /// Materialize every input property of a node
    pub async fn resolve_properties(
        &self,
        inputs: &IndexMap<String, Input>,
    ) -> Result<Properties, NodeError> {
        let mut resolved = Properties::new();
        for (property, input) in inputs {
            resolved.insert(property.clone(), self.resolve_input(input).await?);
        }
        Ok(resolved)
    }
}
