//! Execution coordinator - runs a plan level by level on a bounded worker pool
//!
//! Creates, updates and replacements run first, in dependency order. Every
//! destroy (removed nodes, superseded instances, leftovers from earlier
//! passes) runs afterwards in reverse dependency order. Each node's status is
//! written by one task at a time; the working copy of the state document is
//! only touched by the coordinator loop.

use crate::context::{NoProgress, Phase, ProgressCallback};
use crate::diff;
use crate::error::{NodeError, ProviderError};
use crate::graph::{Graph, ResourceNode};
use crate::planner::{DeleteEntry, DeleteOrigin, Operation, Plan, deletion_levels};
use crate::provider::{ProviderRegistry, ReplacementStrategy, SchemaCatalog};
use crate::resolver::OutputResolver;
use crate::retry::{self, RetryCallback, RetryConfig, RetryOutcome};
use crate::state::{StateDocument, StateRecord};
use crate::types::{Action, LifecycleState, NodeId, Properties};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum provider calls in flight
    pub jobs: usize,
    pub retry: RetryConfig,
    /// Per-call timeout; expiry counts as a transient failure
    pub timeout: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Final status of one node or deleted instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeOutcome {
    pub node: NodeId,
    pub resource_type: String,
    pub action: Action,
    pub state: LifecycleState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct Execution {
    /// Declared nodes, in declaration order
    pub nodes: Vec<NodeOutcome>,
    pub deletions: Vec<NodeOutcome>,
    /// Prior state plus every successful operation
    pub state: StateDocument,
    pub cancelled: bool,
}

// ============================================================================
// Node status
// ============================================================================

#[derive(Debug)]
struct NodeStatus {
    state: LifecycleState,
    action: Action,
    attempts: u32,
    provider_id: Option<String>,
    error: Option<NodeError>,
}

#[derive(Debug)]
struct StatusCell {
    node: NodeId,
    resource_type: String,
    status: Mutex<NodeStatus>,
}

impl StatusCell {
    fn new(
        node: NodeId,
        resource_type: String,
        action: Action,
        state: LifecycleState,
        provider_id: Option<String>,
    ) -> Self {
        Self {
            node,
            resource_type,
            status: Mutex::new(NodeStatus {
                state,
                action,
                attempts: 0,
                provider_id,
                error: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeStatus> {
        match self.status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn state(&self) -> LifecycleState {
        self.lock().state
    }

    fn action(&self) -> Action {
        self.lock().action
    }

    fn set_action(&self, action: Action) {
        self.lock().action = action;
    }

    fn add_attempts(&self, attempts: u32) {
        self.lock().attempts += attempts;
    }

    fn transition(&self, next: LifecycleState) -> bool {
        let mut status = self.lock();
        if !status.state.can_transition_to(next) {
            log::error!(
                "illegal lifecycle transition for {}: {} -> {next}",
                self.node,
                status.state
            );
            return false;
        }
        log::trace!("{}: {} -> {next}", self.node, status.state);
        status.state = next;
        true
    }

    fn succeed(&self, next: LifecycleState, provider_id: String) {
        if self.transition(next) {
            self.lock().provider_id = Some(provider_id);
        }
    }

    fn fail(&self, error: NodeError) {
        if self.transition(LifecycleState::Failed) {
            log::debug!("{} failed: {error}", self.node);
            self.lock().error = Some(error);
        }
    }

    fn outcome(&self) -> NodeOutcome {
        let status = self.lock();
        NodeOutcome {
            node: self.node.clone(),
            resource_type: self.resource_type.clone(),
            action: status.action,
            state: status.state,
            attempts: status.attempts,
            provider_id: status.provider_id.clone(),
            error: status.error.clone(),
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

enum RecordChange {
    Keep,
    Upsert(StateRecord),
    Remove,
}

/// What a forward operation changed
struct Converged {
    node: NodeId,
    record: RecordChange,
    /// Old instance to destroy in the deletion phase
    superseded: Option<DeleteEntry>,
}

impl Converged {
    fn keep(node: &NodeId) -> Self {
        Self {
            node: node.clone(),
            record: RecordChange::Keep,
            superseded: None,
        }
    }
}

struct Deletions {
    entries: Vec<DeleteEntry>,
    cells: Vec<StatusCell>,
}

/// Routes retry notifications for one node to the progress callback
struct NodeRetry<'a> {
    node: &'a NodeId,
    progress: &'a dyn ProgressCallback,
}

impl RetryCallback for NodeRetry<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration) {
        self.progress
            .on_retry(self.node, attempt, max_attempts, error, delay);
    }
}

struct Shared {
    graph: Arc<Graph>,
    prior: Arc<StateDocument>,
    schemas: Arc<SchemaCatalog>,
    providers: Arc<ProviderRegistry>,
    resolver: OutputResolver,
    statuses: IndexMap<NodeId, StatusCell>,
    options: ExecuteOptions,
    progress: Arc<dyn ProgressCallback>,
    cancel: CancellationToken,
}

/// Runs one plan against the providers
pub struct Coordinator {
    graph: Arc<Graph>,
    prior: Arc<StateDocument>,
    schemas: Arc<SchemaCatalog>,
    providers: Arc<ProviderRegistry>,
    options: ExecuteOptions,
    progress: Arc<dyn ProgressCallback>,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(
        graph: Arc<Graph>,
        prior: Arc<StateDocument>,
        schemas: Arc<SchemaCatalog>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            graph,
            prior,
            schemas,
            providers,
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

    /// Execute `plan`; never fails as a whole, failures are per node
    pub async fn run(self, plan: &Plan) -> Execution {
        let planned: HashMap<&NodeId, &Operation> =
            plan.operations().map(|op| (&op.node, op)).collect();

        let statuses = self
            .graph
            .nodes()
            .map(|node| {
                let op = planned.get(&node.id);
                let cell = StatusCell::new(
                    node.id.clone(),
                    node.resource_type.clone(),
                    op.map_or(Action::Noop, |op| op.action),
                    LifecycleState::Pending,
                    op.and_then(|op| op.provider_id.clone()),
                );
                cell.transition(LifecycleState::Planned);
                (node.id.clone(), cell)
            })
            .collect();

        let shared = Arc::new(Shared {
            resolver: OutputResolver::new(self.graph.nodes().map(|node| &node.id)),
            graph: self.graph,
            prior: self.prior,
            schemas: self.schemas,
            providers: self.providers,
            statuses,
            options: self.options,
            progress: self.progress,
            cancel: self.cancel,
        });
        let semaphore = Arc::new(Semaphore::new(shared.options.jobs.max(1)));
        let mut working = (*shared.prior).clone();

        let superseded = shared
            .run_forward(plan, &semaphore, &mut working)
            .await;

        let mut entries = plan.deletions.clone();
        entries.extend(superseded);
        let deletions = shared
            .run_deletions(entries, &semaphore, &mut working)
            .await;

        Execution {
            nodes: shared.statuses.values().map(StatusCell::outcome).collect(),
            deletions: deletions.cells.iter().map(StatusCell::outcome).collect(),
            state: working,
            cancelled: shared.cancel.is_cancelled(),
        }
    }
}

impl Shared {
    async fn run_forward(
        self: &Arc<Self>,
        plan: &Plan,
        semaphore: &Arc<Semaphore>,
        working: &mut StateDocument,
    ) -> Vec<DeleteEntry> {
        let mut superseded = Vec::new();

        for (index, level) in plan.levels.iter().enumerate() {
            self.progress.on_level_start(Phase::Apply, index, level.len());
            let mut tasks = JoinSet::new();

            for op in level {
                let Some(cell) = self.statuses.get(&op.node) else {
                    continue;
                };
                if let Some(upstream) = self.failed_dependency(&op.node) {
                    self.fail(cell, NodeError::UpstreamFailed { node: upstream });
                    self.report(cell);
                    continue;
                }
                if op.action == Action::Noop {
                    let converged = self.settle_planned_noop(op, cell);
                    apply_record(working, converged);
                    self.report(cell);
                    continue;
                }
                if self.cancel.is_cancelled() {
                    self.fail(cell, NodeError::Cancelled);
                    self.report(cell);
                    continue;
                }

                let shared = Arc::clone(self);
                let semaphore = Arc::clone(semaphore);
                let op = op.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    if shared.cancel.is_cancelled() {
                        if let Some(cell) = shared.statuses.get(&op.node) {
                            shared.fail(cell, NodeError::Cancelled);
                        }
                        return Converged::keep(&op.node);
                    }
                    shared.converge(&op).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(converged) => {
                        if let Some(cell) = self.statuses.get(&converged.node) {
                            self.report(cell);
                        }
                        superseded.extend(apply_record(working, converged));
                    }
                    Err(e) => log::error!("apply task aborted: {e}"),
                }
            }

            for op in level {
                if let Some(cell) = self.statuses.get(&op.node)
                    && !cell.state().is_terminal()
                {
                    self.fail(cell, NodeError::internal("operation task did not finish"));
                    self.report(cell);
                }
            }
        }

        superseded
    }

    async fn run_deletions(
        self: &Arc<Self>,
        entries: Vec<DeleteEntry>,
        semaphore: &Arc<Semaphore>,
        working: &mut StateDocument,
    ) -> Arc<Deletions> {
        let order = deletion_levels(&entries);
        let cells = entries
            .iter()
            .map(|entry| {
                let cell = StatusCell::new(
                    entry.node.clone(),
                    entry.resource_type.clone(),
                    Action::Delete,
                    LifecycleState::Created,
                    Some(entry.provider_id.clone()),
                );
                cell.transition(LifecycleState::DeletePending);
                cell
            })
            .collect();
        let deletions = Arc::new(Deletions { entries, cells });

        for (index, level) in order.iter().enumerate() {
            self.progress.on_level_start(Phase::Delete, index, level.len());
            let mut tasks = JoinSet::new();

            for &i in level {
                let cell = &deletions.cells[i];
                if let Some(blocker) = self.deletion_blocker(&deletions, i) {
                    cell.fail(NodeError::UpstreamFailed { node: blocker });
                    self.report(cell);
                    continue;
                }
                if self.cancel.is_cancelled() {
                    cell.fail(NodeError::Cancelled);
                    self.report(cell);
                    continue;
                }

                let shared = Arc::clone(self);
                let semaphore = Arc::clone(semaphore);
                let deletions = Arc::clone(&deletions);
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    if shared.cancel.is_cancelled() {
                        deletions.cells[i].fail(NodeError::Cancelled);
                    } else {
                        shared.destroy(&deletions, i).await;
                    }
                    i
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(i) => self.report(&deletions.cells[i]),
                    Err(e) => log::error!("destroy task aborted: {e}"),
                }
            }

            for &i in level {
                let cell = &deletions.cells[i];
                if !cell.state().is_terminal() {
                    cell.fail(NodeError::internal("destroy task did not finish"));
                    self.report(cell);
                }
            }
        }

        for (entry, cell) in deletions.entries.iter().zip(&deletions.cells) {
            match (cell.state(), entry.origin) {
                (LifecycleState::Deleted, DeleteOrigin::Removed) => {
                    working.resources.shift_remove(&entry.node);
                }
                (LifecycleState::Deleted, DeleteOrigin::Pending) => {
                    working.pending_deletes.retain(|pending| {
                        pending.node != entry.node || pending.provider_id != entry.provider_id
                    });
                }
                (LifecycleState::Deleted, DeleteOrigin::Replaced) => {}
                (_, DeleteOrigin::Replaced) => working.pending_deletes.push(entry.to_pending()),
                _ => {}
            }
        }

        deletions
    }

    fn report(&self, cell: &StatusCell) {
        self.progress
            .on_node_complete(&cell.node, cell.action(), cell.state());
    }

    fn fail(&self, cell: &StatusCell, error: NodeError) {
        cell.fail(error);
        self.resolver.fail(&cell.node);
    }

    fn failed_dependency(&self, id: &NodeId) -> Option<NodeId> {
        self.graph
            .dependencies(id.as_str())
            .find(|dep| {
                self.statuses
                    .get(*dep)
                    .is_some_and(|cell| cell.state() == LifecycleState::Failed)
            })
            .cloned()
    }

    /// A deletion waits for every instance that still depends on it
    fn deletion_blocker(&self, deletions: &Deletions, index: usize) -> Option<NodeId> {
        let target = &deletions.entries[index].node;
        let failed_deletion = deletions
            .entries
            .iter()
            .zip(&deletions.cells)
            .enumerate()
            .find(|(j, (entry, cell))| {
                *j != index
                    && entry.dependencies.contains(target)
                    && cell.state() == LifecycleState::Failed
            })
            .map(|(_, (entry, _))| entry.node.clone());

        failed_deletion.or_else(|| {
            self.prior
                .resources
                .iter()
                .find(|(id, record)| {
                    record.dependencies.contains(target)
                        && self
                            .statuses
                            .get(*id)
                            .is_some_and(|cell| cell.state() == LifecycleState::Failed)
                })
                .map(|(id, _)| id.clone())
        })
    }

    fn settle_planned_noop(&self, op: &Operation, cell: &StatusCell) -> Converged {
        match (self.graph.get(op.node.as_str()), self.prior.record(op.node.as_str())) {
            (Some(node), Some(record)) => self.settle_unchanged(node, cell, record),
            _ => {
                self.fail(cell, NodeError::internal("no-op planned without a prior record"));
                Converged::keep(&op.node)
            }
        }
    }

    /// Publish recorded outputs for a node that needs no provider call
    fn settle_unchanged(
        &self,
        node: &ResourceNode,
        cell: &StatusCell,
        record: &StateRecord,
    ) -> Converged {
        cell.set_action(Action::Noop);
        self.resolver.publish(&node.id, record.outputs.clone());
        cell.succeed(LifecycleState::Created, record.provider_id.clone());

        let dependencies = self.dependencies_of(node);
        if record.dependencies == dependencies && record.secrets == node.secrets {
            return Converged::keep(&node.id);
        }
        let mut refreshed = record.clone();
        refreshed.dependencies = dependencies;
        refreshed.secrets = node.secrets.clone();
        Converged {
            node: node.id.clone(),
            record: RecordChange::Upsert(refreshed),
            superseded: None,
        }
    }

    fn dependencies_of(&self, node: &ResourceNode) -> Vec<NodeId> {
        self.graph
            .dependencies(node.id.as_str())
            .cloned()
            .collect()
    }

    async fn converge(&self, op: &Operation) -> Converged {
        let id = &op.node;
        let (Some(node), Some(cell)) = (self.graph.get(id.as_str()), self.statuses.get(id)) else {
            log::error!("{id} is not part of this pass");
            return Converged::keep(id);
        };

        let resolved = match self.resolver.resolve_properties(&node.inputs).await {
            Ok(resolved) => resolved,
            Err(error) => {
                self.fail(cell, error);
                return Converged::keep(id);
            }
        };

        let prior = self.prior.record(id.as_str());
        let schema = self.schemas.schema_for(&node.resource_type);
        let decision = diff::decide(node, schema, prior, &resolved);
        if decision.action != op.action {
            log::debug!("{id}: planned {} resolved to {}", op.action, decision.action);
        }
        cell.set_action(decision.action);
        if !cell.transition(LifecycleState::InProgress) {
            return Converged::keep(id);
        }
        self.progress.on_node_start(id, decision.action);

        match (decision.action, prior) {
            (Action::Noop, Some(record)) => self.settle_unchanged(node, cell, record),
            (Action::Update, Some(record)) => {
                self.apply(node, cell, resolved, Some(&record.provider_id))
                    .await
            }
            (Action::Replace, Some(record)) => match schema.effective_replacement() {
                ReplacementStrategy::CreateBeforeDelete => {
                    let mut converged = self.apply(node, cell, resolved, None).await;
                    if cell.state() == LifecycleState::Created {
                        converged.superseded = Some(DeleteEntry::from_record(
                            id,
                            record,
                            DeleteOrigin::Replaced,
                        ));
                    }
                    converged
                }
                ReplacementStrategy::DeleteBeforeCreate => {
                    self.replace_delete_first(node, cell, record, resolved)
                        .await
                }
            },
            _ => self.apply(node, cell, resolved, None).await,
        }
    }

    async fn apply(
        &self,
        node: &ResourceNode,
        cell: &StatusCell,
        resolved: Properties,
        prior_id: Option<&str>,
    ) -> Converged {
        let Some(provider) = self.providers.provider_for(&node.resource_type) else {
            self.fail(
                cell,
                NodeError::NoProvider {
                    resource_type: node.resource_type.clone(),
                },
            );
            return Converged::keep(&node.id);
        };

        let outcome = self
            .call(&node.id, || {
                provider.apply(&node.resource_type, &resolved, prior_id)
            })
            .await;
        cell.add_attempts(outcome.attempts);

        let applied = match outcome.result {
            Ok(applied) => applied,
            Err(error) => {
                if outcome.cancelled {
                    log::info!("{}: retries abandoned after cancellation", node.id);
                }
                self.fail(cell, error.into());
                return Converged::keep(&node.id);
            }
        };

        let mut outputs = applied.outputs;
        outputs
            .entry("id")
            .or_insert_with(|| Value::String(applied.provider_id.clone()));
        self.resolver.publish(&node.id, outputs.clone());
        cell.succeed(LifecycleState::Created, applied.provider_id.clone());

        Converged {
            node: node.id.clone(),
            record: RecordChange::Upsert(StateRecord {
                resource_type: node.resource_type.clone(),
                inputs: resolved,
                outputs,
                provider_id: applied.provider_id,
                dependencies: self.dependencies_of(node),
                secrets: node.secrets.clone(),
            }),
            superseded: None,
        }
    }

    /// Destroy the old instance, then create the new one
    async fn replace_delete_first(
        &self,
        node: &ResourceNode,
        cell: &StatusCell,
        record: &StateRecord,
        resolved: Properties,
    ) -> Converged {
        let Some(provider) = self.providers.provider_for(&record.resource_type) else {
            self.fail(
                cell,
                NodeError::NoProvider {
                    resource_type: record.resource_type.clone(),
                },
            );
            return Converged::keep(&node.id);
        };

        let destroyed = self
            .call(&node.id, || {
                provider.destroy(&record.resource_type, &record.provider_id)
            })
            .await;
        cell.add_attempts(destroyed.attempts);
        if let Err(error) = destroyed.result {
            self.fail(cell, error.into());
            return Converged::keep(&node.id);
        }

        let mut converged = self.apply(node, cell, resolved, None).await;
        if matches!(converged.record, RecordChange::Keep) {
            // the old instance is gone even though the new one failed
            converged.record = RecordChange::Remove;
        }
        converged
    }

    async fn destroy(&self, deletions: &Deletions, index: usize) {
        let entry = &deletions.entries[index];
        let cell = &deletions.cells[index];
        let Some(provider) = self.providers.provider_for(&entry.resource_type) else {
            cell.fail(NodeError::NoProvider {
                resource_type: entry.resource_type.clone(),
            });
            return;
        };

        if !cell.transition(LifecycleState::DeleteInProgress) {
            return;
        }
        self.progress.on_node_start(&entry.node, Action::Delete);

        let outcome = self
            .call(&entry.node, || {
                provider.destroy(&entry.resource_type, &entry.provider_id)
            })
            .await;
        cell.add_attempts(outcome.attempts);
        match outcome.result {
            Ok(()) => {
                cell.transition(LifecycleState::Deleted);
            }
            Err(error) => cell.fail(error.into()),
        }
    }

    /// One provider call with timeout and retry
    async fn call<T, F, Fut>(&self, node: &NodeId, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let timeout = self.options.timeout;
        let callback = NodeRetry {
            node,
            progress: self.progress.as_ref(),
        };
        retry::with_retry(&self.options.retry, &self.cancel, &callback, || {
            let call = operation();
            async move {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                        Err(ProviderError::transient(format!(
                            "operation timed out after {limit:?}"
                        )))
                    }),
                    None => call.await,
                }
            }
        })
        .await
    }
}

fn apply_record(working: &mut StateDocument, converged: Converged) -> Option<DeleteEntry> {
    match converged.record {
        RecordChange::Keep => {}
        RecordChange::Upsert(record) => {
            working.resources.insert(converged.node, record);
        }
        RecordChange::Remove => {
            working.resources.shift_remove(&converged.node);
        }
    }
    converged.superseded
}
