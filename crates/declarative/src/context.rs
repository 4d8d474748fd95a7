//! Observer traits
//!
//! These traits allow the declarative crate to be used without
//! depending on a specific terminal UI or prompt library.

use crate::error::ProviderError;
use crate::planner::Plan;
use crate::types::{Action, LifecycleState, NodeId};
use anyhow::Result;
use std::time::Duration;

/// Which half of a pass is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Creates, updates and replacements in dependency order
    Apply,
    /// Deletions in reverse dependency order
    Delete,
}

/// Progress callback for execution operations
///
/// Called concurrently from worker tasks, so implementations must be
/// thread-safe. Every method has an empty default.
pub trait ProgressCallback: Send + Sync {
    /// Called when a level starts
    fn on_level_start(&self, _phase: Phase, _level: usize, _count: usize) {}

    /// Called once a node's references are resolved and its provider call begins
    fn on_node_start(&self, _node: &NodeId, _action: Action) {}

    /// Called before backing off after a transient failure
    fn on_retry(
        &self,
        _node: &NodeId,
        _attempt: u32,
        _max_attempts: u32,
        _error: &ProviderError,
        _delay: Duration,
    ) {
    }

    /// Called when a node reaches a terminal state
    fn on_node_complete(&self, _node: &NodeId, _action: Action, _state: LifecycleState) {}
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask whether `plan` should be executed
    fn confirm(&mut self, plan: &Plan) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {}

/// Progress callback that forwards to the `log` facade
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_level_start(&self, phase: Phase, level: usize, count: usize) {
        log::info!("{phase:?} level {level}: {count} operation(s)");
    }

    fn on_node_start(&self, node: &NodeId, action: Action) {
        log::info!("{action} {node}");
    }

    fn on_retry(
        &self,
        node: &NodeId,
        attempt: u32,
        max_attempts: u32,
        error: &ProviderError,
        delay: Duration,
    ) {
        log::warn!(
            "{node}: attempt {attempt}/{max_attempts} failed: {error}. Retrying in {:.1}s",
            delay.as_secs_f64()
        );
    }

    fn on_node_complete(&self, node: &NodeId, action: Action, state: LifecycleState) {
        log::info!("{action} {node}: {state}");
    }
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _plan: &Plan) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _plan: &Plan) -> Result<bool> {
        Ok(false)
    }
}
