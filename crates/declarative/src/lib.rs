//! # Declarative
//!
//! A reconciliation engine for declarative resource graphs.
//!
//! This crate takes a set of declared resource nodes, works out a safe order
//! to create, update, replace and delete them, feeds the outputs of one node
//! into the inputs of another once they exist, and converges real
//! infrastructure toward the declaration through pluggable providers.
//!
//! ## Core Concepts
//!
//! - **Graph**: nodes, references between their properties and ordering hints,
//!   validated into dependency levels ([`GraphBuilder`], [`Graph`])
//! - **Plan**: per-node actions computed from the graph and the prior state
//!   ([`Plan`], [`planner::plan`])
//! - **Provider**: the capability that actually creates and destroys
//!   resources of a type ([`Provider`], [`ProviderRegistry`])
//! - **State**: the durable record of what was applied ([`StateStore`])
//! - **Reconciler**: drives one pass from plan to committed state
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     AutoConfirm, FileStateStore, GraphBuilder, Input, ProviderRegistry, Reconciler,
//! };
//! use indexmap::IndexMap;
//! use std::sync::Arc;
//!
//! let mut builder = GraphBuilder::new();
//! builder.add_node("vpc", "aws:ec2/Vpc", IndexMap::new())?;
//! let mut subnet = IndexMap::new();
//! subnet.insert("vpcId".to_string(), Input::reference("vpc", "id"));
//! builder.add_node("subnet", "aws:ec2/Subnet", subnet)?;
//! let graph = builder.validate()?;
//!
//! let mut providers = ProviderRegistry::new();
//! providers.register("aws", Arc::new(MyAwsProvider::default()));
//!
//! let engine = Reconciler::new(
//!     Arc::new(providers),
//!     Arc::new(FileStateStore::new("state.json")),
//! );
//! let report = engine.reconcile(graph, &mut AutoConfirm).await?;
//! ```
//!
//! ## Observer Traits
//!
//! - [`ProgressCallback`]: Receives progress updates from worker tasks
//! - [`ConfirmCallback`]: Decides whether a plan is executed
//!
//! This allows the crate to be used without hard dependencies on
//! specific UI frameworks or prompt libraries.

pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{
    AutoConfirm, AutoDecline, ConfirmCallback, LogProgress, NoProgress, Phase, ProgressCallback,
};
pub use diff::{PlannedValue, PropertyChange};
pub use engine::{PassReport, PreparedPass, Reconciler};
pub use error::{Error, ErrorCategory, GraphError, NodeError, ProviderError, Result, StateError};
pub use executor::{ExecuteOptions, NodeOutcome};
pub use graph::{Graph, GraphBuilder, ResourceNode};
pub use planner::{DeleteEntry, DeleteOrigin, DiffSummary, Operation, Plan};
pub use provider::{
    Applied, Provider, ProviderRegistry, ReplacementStrategy, ResourceSchema, SchemaCatalog,
    UpdatableProperties,
};
pub use retry::RetryConfig;
pub use state::{FileStateStore, MemoryStateStore, StateDocument, StateRecord, StateStore};
pub use types::{
    Action, ExecuteSummary, Input, LifecycleState, NodeId, Properties, REDACTED, Reference,
    Segment,
};
