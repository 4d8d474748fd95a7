//! Resource graph model
//!
//! A [`GraphBuilder`] collects nodes, references and ordering hints. Calling
//! [`GraphBuilder::validate`] checks every reference, rejects cycles and
//! freezes the result into an immutable [`Graph`] with its dependency levels
//! precomputed.

use crate::error::GraphError;
use crate::types::{Input, NodeId};
use indexmap::map::Entry;
use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeSet, VecDeque};
use std::hash::Hash;

/// A declared unit of infrastructure
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub id: NodeId,
    /// Provider type tag, e.g. `aws:ec2/Vpc`
    pub resource_type: String,
    pub inputs: IndexMap<String, Input>,
    /// Ordering-only dependencies that carry no data
    pub depends_on: Vec<NodeId>,
    /// Properties that force replacement regardless of the provider schema
    pub replace_on_changes: BTreeSet<String>,
    /// Properties whose values must never be displayed
    pub secrets: BTreeSet<String>,
}

impl ResourceNode {
    pub fn new(
        id: impl Into<NodeId>,
        resource_type: impl Into<String>,
        inputs: IndexMap<String, Input>,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            inputs,
            depends_on: Vec::new(),
            replace_on_changes: BTreeSet::new(),
            secrets: BTreeSet::new(),
        }
    }

    pub fn depend_on(&mut self, target: impl Into<NodeId>) -> &mut Self {
        let target = target.into();
        if !self.depends_on.contains(&target) {
            self.depends_on.push(target);
        }
        self
    }

    pub fn replace_on_change(&mut self, property: impl Into<String>) -> &mut Self {
        self.replace_on_changes.insert(property.into());
        self
    }

    pub fn mark_secret(&mut self, property: impl Into<String>) -> &mut Self {
        self.secrets.insert(property.into());
        self
    }

    pub fn is_secret(&self, property: &str) -> bool {
        self.secrets.contains(property)
    }
}

/// Collects a declaration before validation
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: IndexMap<NodeId, ResourceNode>,
    exports: IndexMap<String, Input>,
    secret_exports: BTreeSet<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node. Ids must be unique.
    pub fn add_node(
        &mut self,
        id: impl Into<NodeId>,
        resource_type: impl Into<String>,
        inputs: IndexMap<String, Input>,
    ) -> Result<&mut ResourceNode, GraphError> {
        match self.nodes.entry(id.into()) {
            Entry::Occupied(entry) => Err(GraphError::DuplicateNode(entry.key().clone())),
            Entry::Vacant(entry) => {
                let node = ResourceNode::new(entry.key().clone(), resource_type, inputs);
                Ok(entry.insert(node))
            }
        }
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(id)
    }

    /// Feed `to.output` into `from.property`
    pub fn add_reference(
        &mut self,
        from: &str,
        property: impl Into<String>,
        to: impl Into<NodeId>,
        output: impl Into<String>,
    ) -> Result<(), GraphError> {
        let node = self.existing(from)?;
        node.inputs
            .insert(property.into(), Input::reference(to, output));
        Ok(())
    }

    /// Order `from` after `to` without passing any data
    pub fn depends_on(&mut self, from: &str, to: impl Into<NodeId>) -> Result<(), GraphError> {
        self.existing(from)?.depend_on(to);
        Ok(())
    }

    /// Declare a named stack output
    pub fn export(&mut self, name: impl Into<String>, input: impl Into<Input>) -> &mut Self {
        self.exports.insert(name.into(), input.into());
        self
    }

    /// Hide an export's value unless explicitly requested
    pub fn mark_export_secret(&mut self, name: impl Into<String>) -> &mut Self {
        self.secret_exports.insert(name.into());
        self
    }

    fn existing(&mut self, id: &str) -> Result<&mut ResourceNode, GraphError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(NodeId::from(id)))
    }

    /// Check references and acyclicity, then freeze the graph
    pub fn validate(self) -> Result<Graph, GraphError> {
        let mut dependencies: IndexMap<NodeId, IndexSet<NodeId>> =
            IndexMap::with_capacity(self.nodes.len());

        for (id, node) in &self.nodes {
            let mut deps = IndexSet::new();
            let edges = node
                .inputs
                .iter()
                .flat_map(|(property, input)| {
                    input
                        .references()
                        .into_iter()
                        .map(move |r| (property.as_str(), &r.node))
                })
                .chain(node.depends_on.iter().map(|target| ("depends_on", target)));

            for (property, target) in edges {
                if !self.nodes.contains_key(target) {
                    return Err(GraphError::UnknownReference {
                        from: id.clone(),
                        property: property.to_string(),
                        target: target.clone(),
                    });
                }
                if target == id {
                    return Err(GraphError::Cycle {
                        nodes: vec![id.clone()],
                    });
                }
                deps.insert(target.clone());
            }
            dependencies.insert(id.clone(), deps);
        }

        for (name, input) in &self.exports {
            if let Some(missing) = input
                .references()
                .into_iter()
                .find(|r| !self.nodes.contains_key(&r.node))
            {
                return Err(GraphError::UnknownExportReference {
                    name: name.clone(),
                    target: missing.node.clone(),
                });
            }
        }

        let levels =
            topological_levels(&dependencies).map_err(|nodes| GraphError::Cycle { nodes })?;

        // an input that reads a secret output is itself secret
        let mut nodes = self.nodes;
        for id in levels.iter().flatten() {
            let inherited: Vec<String> = nodes.get(id).map_or_else(Vec::new, |node| {
                node.inputs
                    .iter()
                    .filter(|(property, input)| {
                        !node.is_secret(property)
                            && input.references().into_iter().any(|r| {
                                nodes
                                    .get(&r.node)
                                    .is_some_and(|upstream| upstream.is_secret(&r.output))
                            })
                    })
                    .map(|(property, _)| property.clone())
                    .collect()
            });
            if let Some(node) = nodes.get_mut(id) {
                for property in inherited {
                    log::debug!("{id}.{property} reads a secret output");
                    node.mark_secret(property);
                }
            }
        }

        let mut dependents: IndexMap<NodeId, Vec<NodeId>> = IndexMap::new();
        for (id, deps) in &dependencies {
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(id.clone());
            }
        }

        log::debug!(
            "validated graph: {} nodes in {} levels",
            nodes.len(),
            levels.len()
        );

        Ok(Graph {
            nodes,
            dependencies,
            dependents,
            levels,
            exports: self.exports,
            secret_exports: self.secret_exports,
        })
    }
}

/// A validated, immutable resource graph
#[derive(Debug, Default)]
pub struct Graph {
    nodes: IndexMap<NodeId, ResourceNode>,
    dependencies: IndexMap<NodeId, IndexSet<NodeId>>,
    dependents: IndexMap<NodeId, Vec<NodeId>>,
    levels: Vec<Vec<NodeId>>,
    exports: IndexMap<String, Input>,
    secret_exports: BTreeSet<String>,
}

impl Graph {
    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies (references plus `depends_on`)
    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &NodeId> {
        self.dependencies.get(id).into_iter().flatten()
    }

    /// Nodes that directly depend on `id`
    pub fn dependents(&self, id: &str) -> impl Iterator<Item = &NodeId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Every node reachable through dependents of `id`
    pub fn transitive_dependents(&self, id: &str) -> IndexSet<NodeId> {
        let mut seen = IndexSet::new();
        let mut queue: VecDeque<&NodeId> = self.dependents(id).collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.dependents(next.as_str()));
            }
        }
        seen
    }

    /// Dependency levels; ties keep declaration order
    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    pub fn exports(&self) -> &IndexMap<String, Input> {
        &self.exports
    }

    /// An export is secret when marked so or when it reads a secret property
    pub fn is_secret_export(&self, name: &str) -> bool {
        self.secret_exports.contains(name)
            || self.exports.get(name).is_some_and(|input| {
                input.references().into_iter().any(|r| {
                    self.get(r.node.as_str())
                        .is_some_and(|node| node.is_secret(&r.output))
                })
            })
    }

    /// Distinct resource types in declaration order
    pub fn resource_types(&self) -> IndexSet<&str> {
        self.nodes
            .values()
            .map(|node| node.resource_type.as_str())
            .collect()
    }
}

/// Compute topological levels using Kahn's algorithm
///
/// `deps` maps each key to the keys it depends on; dependencies outside the
/// map are ignored. Keys within a level keep their order in `deps`. On failure
/// the keys lying on a cycle are returned.
pub(crate) fn topological_levels<K>(deps: &IndexMap<K, IndexSet<K>>) -> Result<Vec<Vec<K>>, Vec<K>>
where
    K: Hash + Eq + Clone,
{
    let mut in_degree: IndexMap<&K, usize> = deps.keys().map(|key| (key, 0)).collect();
    let mut dependents: IndexMap<&K, Vec<&K>> = IndexMap::new();

    for (key, key_deps) in deps {
        for dep in key_deps.iter().filter(|dep| deps.contains_key(*dep)) {
            if let Some(degree) = in_degree.get_mut(key) {
                *degree += 1;
            }
            dependents.entry(dep).or_default().push(key);
        }
    }

    let mut levels = Vec::new();
    let mut current: Vec<&K> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(key, _)| *key)
        .collect();
    let mut processed = 0;

    while !current.is_empty() {
        current.sort_by_key(|key| deps.get_index_of(*key));
        processed += current.len();

        let mut next = Vec::new();
        for key in &current {
            for dependent in dependents.get(*key).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(*dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }

        levels.push(current.iter().map(|key| (*key).clone()).collect());
        current = next;
    }

    if processed != deps.len() {
        let stuck: IndexSet<&K> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(key, _)| *key)
            .collect();
        // nodes merely downstream of a cycle are stuck too
        return Err(stuck
            .iter()
            .filter(|key| on_cycle(**key, &stuck, &dependents))
            .map(|key| (*key).clone())
            .collect());
    }

    Ok(levels)
}

/// Whether `start` can reach itself through stuck dependents
fn on_cycle<K>(start: &K, stuck: &IndexSet<&K>, dependents: &IndexMap<&K, Vec<&K>>) -> bool
where
    K: Hash + Eq,
{
    let mut seen: IndexSet<&K> = IndexSet::new();
    let mut stack = vec![start];
    while let Some(key) = stack.pop() {
        for next in dependents.get(key).into_iter().flatten() {
            if *next == start {
                return true;
            }
            if stuck.contains(*next) && seen.insert(*next) {
                stack.push(*next);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(entries: &[(&str, Input)]) -> IndexMap<String, Input> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn ids(level: &[NodeId]) -> Vec<&str> {
        level.iter().map(NodeId::as_str).collect()
    }

    fn vpc_graph() -> GraphBuilder {
        let mut builder = GraphBuilder::new();
        builder
            .add_node("vpc", "aws:ec2/Vpc", inputs(&[("cidrBlock", "10.0.0.0/16".into())]))
            .unwrap();
        builder
            .add_node(
                "subnet",
                "aws:ec2/Subnet",
                inputs(&[("vpcId", Input::reference("vpc", "id"))]),
            )
            .unwrap();
        builder
            .add_node(
                "sg",
                "aws:ec2/SecurityGroup",
                inputs(&[("vpcId", Input::reference("vpc", "id"))]),
            )
            .unwrap();
        builder
    }

    #[test]
    fn test_vpc_levels() {
        let graph = vpc_graph().validate().unwrap();
        let levels = graph.levels();
        assert_eq!(levels.len(), 2);
        assert_eq!(ids(&levels[0]), vec!["vpc"]);
        assert_eq!(ids(&levels[1]), vec!["subnet", "sg"]);
    }

    #[test]
    fn test_levels_follow_declaration_order() {
        let mut builder = GraphBuilder::new();
        for id in ["zeta", "alpha", "mid"] {
            builder.add_node(id, "test:t/T", IndexMap::new()).unwrap();
        }
        let first = builder.validate().unwrap();

        let mut builder = GraphBuilder::new();
        for id in ["zeta", "alpha", "mid"] {
            builder.add_node(id, "test:t/T", IndexMap::new()).unwrap();
        }
        let second = builder.validate().unwrap();

        assert_eq!(ids(&first.levels()[0]), vec!["zeta", "alpha", "mid"]);
        assert_eq!(first.levels(), second.levels());
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut builder = GraphBuilder::new();
        builder.add_node("vpc", "aws:ec2/Vpc", IndexMap::new()).unwrap();
        let err = builder
            .add_node("vpc", "aws:ec2/Vpc", IndexMap::new())
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode(NodeId::from("vpc")));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let mut builder = GraphBuilder::new();
        builder
            .add_node(
                "subnet",
                "aws:ec2/Subnet",
                inputs(&[("vpcId", Input::reference("vpc", "id"))]),
            )
            .unwrap();
        let err = builder.validate().unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownReference {
                from: NodeId::from("subnet"),
                property: "vpcId".to_string(),
                target: NodeId::from("vpc"),
            }
        );
    }

    #[test]
    fn test_unknown_depends_on_rejected() {
        let mut builder = GraphBuilder::new();
        builder.add_node("app", "test:t/T", IndexMap::new()).unwrap();
        builder.depends_on("app", "db").unwrap();
        assert!(matches!(
            builder.validate(),
            Err(GraphError::UnknownReference { property, .. }) if property == "depends_on"
        ));
    }

    #[test]
    fn test_add_reference_requires_source_node() {
        let mut builder = GraphBuilder::new();
        let err = builder
            .add_reference("subnet", "vpcId", "vpc", "id")
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownNode(NodeId::from("subnet")));
    }

    #[test]
    fn test_cycle_detected() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", "test:t/T", IndexMap::new()).unwrap();
        builder.add_node("b", "test:t/T", IndexMap::new()).unwrap();
        builder.add_node("c", "test:t/T", IndexMap::new()).unwrap();
        builder.add_reference("a", "x", "b", "id").unwrap();
        builder.add_reference("b", "x", "a", "id").unwrap();

        match builder.validate() {
            Err(GraphError::Cycle { nodes }) => {
                assert_eq!(ids(&nodes), vec!["a", "b"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_excludes_downstream_nodes() {
        let mut builder = GraphBuilder::new();
        for id in ["a", "b", "c", "d"] {
            builder.add_node(id, "test:t/T", IndexMap::new()).unwrap();
        }
        builder.add_reference("a", "x", "b", "id").unwrap();
        builder.add_reference("b", "x", "a", "id").unwrap();
        builder.add_reference("c", "x", "a", "id").unwrap();
        builder.depends_on("d", "c").unwrap();

        match builder.validate() {
            Err(GraphError::Cycle { nodes }) => {
                assert_eq!(ids(&nodes), vec!["a", "b"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_secret_follows_references() {
        let mut builder = GraphBuilder::new();
        builder
            .add_node("vpc", "aws:ec2/Vpc", inputs(&[("cidrBlock", "10.0.0.0/16".into())]))
            .unwrap()
            .mark_secret("cidrBlock");
        builder
            .add_node(
                "subnet",
                "aws:ec2/Subnet",
                inputs(&[
                    ("cidrBlock", Input::reference("vpc", "cidrBlock")),
                    ("vpcId", Input::reference("vpc", "id")),
                ]),
            )
            .unwrap();
        builder
            .add_node(
                "route",
                "aws:ec2/Route",
                inputs(&[("destination", Input::reference("subnet", "cidrBlock"))]),
            )
            .unwrap();
        let graph = builder.validate().unwrap();

        let subnet = graph.get("subnet").unwrap();
        assert!(subnet.is_secret("cidrBlock"));
        assert!(!subnet.is_secret("vpcId"));
        assert!(graph.get("route").unwrap().is_secret("destination"));
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", "test:t/T", IndexMap::new()).unwrap();
        builder.depends_on("a", "a").unwrap();
        assert_eq!(
            builder.validate().unwrap_err(),
            GraphError::Cycle {
                nodes: vec![NodeId::from("a")]
            }
        );
    }

    #[test]
    fn test_export_unknown_node_rejected() {
        let mut builder = vpc_graph();
        builder.export("dbEndpoint", Input::reference("db", "endpoint"));
        assert!(matches!(
            builder.validate(),
            Err(GraphError::UnknownExportReference { name, .. }) if name == "dbEndpoint"
        ));
    }

    #[test]
    fn test_transitive_dependents() {
        let mut builder = vpc_graph();
        builder
            .add_node(
                "instance",
                "aws:ec2/Instance",
                inputs(&[("subnetId", Input::reference("subnet", "id"))]),
            )
            .unwrap();
        let graph = builder.validate().unwrap();

        let dependents = graph.transitive_dependents("vpc");
        let mut names: Vec<&str> = dependents.iter().map(NodeId::as_str).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["instance", "sg", "subnet"]);
        assert!(graph.transitive_dependents("instance").is_empty());
    }

    #[test]
    fn test_duplicate_references_count_once() {
        let mut builder = GraphBuilder::new();
        builder.add_node("vpc", "aws:ec2/Vpc", IndexMap::new()).unwrap();
        builder
            .add_node(
                "subnet",
                "aws:ec2/Subnet",
                inputs(&[
                    ("vpcId", Input::reference("vpc", "id")),
                    ("vpcArn", Input::reference("vpc", "arn")),
                ]),
            )
            .unwrap();
        builder.depends_on("subnet", "vpc").unwrap();
        let graph = builder.validate().unwrap();

        assert_eq!(graph.dependencies("subnet").count(), 1);
        assert_eq!(graph.levels().len(), 2);
    }
}
