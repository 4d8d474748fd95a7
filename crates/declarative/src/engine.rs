//! Reconciliation engine - one pass from declaration to committed state

use crate::context::{ConfirmCallback, NoProgress, ProgressCallback};
use crate::error::{Error, Result};
use crate::executor::{Coordinator, ExecuteOptions, NodeOutcome};
use crate::graph::Graph;
use crate::planner::{self, Plan};
use crate::provider::{ProviderRegistry, SchemaCatalog};
use crate::state::{StateDocument, StateStore};
use crate::types::{ExecuteSummary, Reference};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A planned pass waiting to be executed
#[derive(Debug)]
pub struct PreparedPass {
    pub graph: Arc<Graph>,
    pub state: Arc<StateDocument>,
    pub schemas: Arc<SchemaCatalog>,
    pub plan: Plan,
}

impl PreparedPass {
    /// The plan with every secret value replaced
    pub fn redacted_plan(&self) -> Plan {
        let mut plan = self.plan.clone();
        plan.redact_secrets();
        plan
    }
}

/// Outcome of an executed pass
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub success: bool,
    pub cancelled: bool,
    pub summary: ExecuteSummary,
    pub nodes: Vec<NodeOutcome>,
    pub deletions: Vec<NodeOutcome>,
}

impl PassReport {
    fn new(nodes: Vec<NodeOutcome>, deletions: Vec<NodeOutcome>, cancelled: bool) -> Self {
        let mut summary = ExecuteSummary::default();
        for outcome in nodes.iter().chain(&deletions) {
            summary.add_result(outcome.action, outcome.state);
        }
        Self {
            success: summary.is_success(),
            cancelled,
            summary,
            nodes,
            deletions,
        }
    }

    /// Every node or instance that ended in `Failed`
    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.nodes
            .iter()
            .chain(&self.deletions)
            .filter(|outcome| !outcome.is_success())
    }

    pub fn outcome(&self, node: &str) -> Option<&NodeOutcome> {
        self.nodes.iter().find(|outcome| outcome.node.as_str() == node)
    }
}

/// Drives reconciliation passes against one state store
pub struct Reconciler {
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn StateStore>,
    options: ExecuteOptions,
    progress: Arc<dyn ProgressCallback>,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(providers: Arc<ProviderRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self {
            providers,
            store,
            options: ExecuteOptions::default(),
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops scheduling new operations when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Load state, describe every declared type and compute the plan
    pub async fn prepare(&self, graph: Graph) -> Result<PreparedPass> {
        let state = self.store.load()?;
        let schemas = self.providers.describe_all(graph.resource_types()).await?;
        let plan = planner::plan(&graph, &state, &schemas);

        let summary = plan.summary();
        log::info!(
            "Plan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            summary.create,
            summary.update,
            summary.replace,
            summary.delete,
            summary.unchanged
        );

        Ok(PreparedPass {
            graph: Arc::new(graph),
            state: Arc::new(state),
            schemas: Arc::new(schemas),
            plan,
        })
    }

    /// Execute a prepared pass and commit the resulting state
    ///
    /// Node failures do not make this return `Err`; they are listed in the
    /// report. The state is committed even when the pass partially failed.
    pub async fn execute(&self, pass: PreparedPass) -> Result<PassReport> {
        let execution = Coordinator::new(
            Arc::clone(&pass.graph),
            pass.state,
            pass.schemas,
            Arc::clone(&self.providers),
        )
        .with_options(self.options.clone())
        .with_progress(Arc::clone(&self.progress))
        .with_cancellation(self.cancel.clone())
        .run(&pass.plan)
        .await;

        let mut state = execution.state;
        resolve_exports(&pass.graph, &mut state);
        state.touch();
        self.store.commit(&state)?;

        let report = PassReport::new(execution.nodes, execution.deletions, execution.cancelled);
        if report.success {
            log::info!("Pass complete: {} change(s)", report.summary.total_changes());
        } else {
            log::warn!(
                "Pass finished with {} failure(s){}",
                report.summary.failed,
                if report.cancelled { " after cancellation" } else { "" }
            );
        }
        Ok(report)
    }

    /// Plan, ask for confirmation when something would change, then execute
    ///
    /// Returns `None` when the confirmation was declined.
    pub async fn reconcile(
        &self,
        graph: Graph,
        confirm: &mut dyn ConfirmCallback,
    ) -> Result<Option<PassReport>> {
        let pass = self.prepare(graph).await?;
        if pass.plan.has_changes() {
            let accepted = confirm
                .confirm(&pass.redacted_plan())
                .map_err(|e| Error::Confirm(e.to_string()))?;
            if !accepted {
                log::info!("Pass declined, nothing changed");
                return Ok(None);
            }
        }
        self.execute(pass).await.map(Some)
    }
}

/// Recompute stack exports from the records of this pass
///
/// Exports whose nodes have no record (failed or never created) are dropped.
fn resolve_exports(graph: &Graph, state: &mut StateDocument) {
    let mut exports = IndexMap::new();
    let mut secret = BTreeSet::new();

    for (name, input) in graph.exports() {
        let lookup = |r: &Reference| {
            state
                .record(r.node.as_str())
                .and_then(|record| record.output(&r.output))
        };
        match input.materialize(&lookup) {
            Some(value) => {
                exports.insert(name.clone(), value);
                if graph.is_secret_export(name) {
                    secret.insert(name.clone());
                }
            }
            None => {
                let missing: Vec<&str> = input
                    .references()
                    .into_iter()
                    .map(|r| r.node.as_str())
                    .filter(|node| state.record(node).is_none())
                    .collect();
                log::warn!(
                    "Export '{name}' unresolved, no record for {}",
                    missing.join(", ")
                );
            }
        }
    }

    state.exports = exports;
    state.secret_exports = secret;
}
