//! Progress indicators for infragraph CLI.
//!
//! Bridges the engine's [`ProgressCallback`] to an indicatif bar. Lines for
//! finished changes, retries and failures are printed above the bar.

use colored::Colorize;
use declarative::{Action, LifecycleState, NodeId, Phase, ProgressCallback, ProviderError};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Progress bar over every operation of a pass
pub struct TerminalProgress {
    pb: ProgressBar,
}

impl TerminalProgress {
    pub fn new(total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        Self { pb }
    }

    /// Draws nothing; used for `--json` and `--quiet`
    pub fn hidden() -> Self {
        Self {
            pb: ProgressBar::hidden(),
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }

    fn line(&self, text: String) {
        if self.pb.is_hidden() {
            return;
        }
        self.pb.suspend(|| println!("  {text}"));
    }
}

/// Past tense for completed actions
fn done(action: Action) -> &'static str {
    match action {
        Action::Create => "created",
        Action::Update => "updated",
        Action::Replace => "replaced",
        Action::Delete => "deleted",
        Action::Noop => "unchanged",
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_level_start(&self, phase: Phase, level: usize, count: usize) {
        log::debug!("{phase:?} level {level}: {count} operation(s)");
    }

    fn on_node_start(&self, node: &NodeId, action: Action) {
        self.pb.set_message(format!("{action} {node}"));
    }

    fn on_retry(
        &self,
        node: &NodeId,
        attempt: u32,
        max_attempts: u32,
        error: &ProviderError,
        delay: Duration,
    ) {
        self.line(format!(
            "{} {node}: attempt {attempt}/{max_attempts} failed ({error}), retrying in {:.1}s",
            "⚠".yellow(),
            delay.as_secs_f64()
        ));
    }

    fn on_node_complete(&self, node: &NodeId, action: Action, state: LifecycleState) {
        self.pb.inc(1);
        if state == LifecycleState::Failed {
            self.line(format!("{} {action} {node}", "✗".red()));
        } else if action.is_change() {
            self.line(format!("{} {node} {}", "✓".green(), done(action).dimmed()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_wording() {
        assert_eq!(done(Action::Create), "created");
        assert_eq!(done(Action::Replace), "replaced");
        assert_eq!(done(Action::Noop), "unchanged");
    }

    #[test]
    fn test_hidden_bar_counts() {
        let progress = TerminalProgress::hidden();
        let node = NodeId::from("vpc");
        progress.on_node_start(&node, Action::Create);
        progress.on_node_complete(&node, Action::Create, LifecycleState::Created);
        progress.on_node_complete(&node, Action::Delete, LifecycleState::Failed);
        assert_eq!(progress.pb.position(), 2);
        progress.finish();
    }
}
