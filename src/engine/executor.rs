//! Execution UI - confirmation prompt and pass report

use anyhow::Result;
use colored::Colorize;
use declarative::{ConfirmCallback, ExecuteSummary, NodeOutcome, PassReport, Plan};
use serde::Serialize;

/// Prompts on the terminal before a pass changes anything
pub struct DialoguerConfirm {
    prompt: String,
}

impl DialoguerConfirm {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Default for DialoguerConfirm {
    fn default() -> Self {
        Self::new("Continue?")
    }
}

impl ConfirmCallback for DialoguerConfirm {
    fn confirm(&mut self, plan: &Plan) -> Result<bool> {
        use dialoguer::Confirm;

        let summary = plan.summary();
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "{} ({} change(s))",
                self.prompt,
                summary.total_changes()
            ))
            .default(true)
            .interact()?;

        Ok(confirmed)
    }
}

/// Print one JSON document to stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn failure_line(outcome: &NodeOutcome) -> String {
    let reason = outcome
        .error
        .as_ref()
        .map_or_else(|| "failed".to_string(), ToString::to_string);
    let attempts = if outcome.attempts > 1 {
        format!(" after {} attempts", outcome.attempts)
    } else {
        String::new()
    };
    format!(
        "{} {} ({}){attempts}: {reason}",
        outcome.action, outcome.node, outcome.resource_type
    )
}

/// Print failures followed by the summary
pub fn print_report(report: &PassReport, verb: &str) {
    let failures: Vec<&NodeOutcome> = report.failures().collect();
    if !failures.is_empty() {
        println!();
        println!("  {} {}", "✗".red(), "Failures".bold());
        for outcome in failures {
            println!("    • {}", failure_line(outcome));
            if let Some(error) = &outcome.error {
                println!("      {}", error.category().advice().dimmed());
            }
        }
    }
    if report.cancelled {
        println!();
        println!(
            "  {} Interrupted - operations already started were allowed to finish",
            "⚠".yellow()
        );
    }
    print_summary(&report.summary, verb);
}

/// Print final summary
pub fn print_summary(summary: &ExecuteSummary, verb: &str) {
    println!();
    if summary.is_success() {
        println!("  {} {verb} complete!", "✓".green().bold());
    } else {
        println!("  {} {verb} finished with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.replaced > 0 {
        println!("    • {} resources replaced", summary.replaced);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.no_change > 0 {
        println!("    • {} resources unchanged", summary.no_change);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{Action, LifecycleState, NodeError, NodeId, ProviderError};

    fn outcome(attempts: u32, error: Option<NodeError>) -> NodeOutcome {
        NodeOutcome {
            node: NodeId::from("subnet"),
            resource_type: "aws:ec2/Subnet".to_string(),
            action: Action::Create,
            state: LifecycleState::Failed,
            attempts,
            provider_id: None,
            error,
        }
    }

    #[test]
    fn test_failure_line_with_error() {
        let error = NodeError::from(ProviderError::permanent("InvalidCidr"));
        let line = failure_line(&outcome(1, Some(error.clone())));
        assert_eq!(line, format!("create subnet (aws:ec2/Subnet): {error}"));
    }

    #[test]
    fn test_failure_line_mentions_attempts() {
        let line = failure_line(&outcome(4, None));
        assert_eq!(line, "create subnet (aws:ec2/Subnet) after 4 attempts: failed");
    }

    #[test]
    fn test_default_prompt() {
        assert_eq!(DialoguerConfirm::default().prompt, "Continue?");
    }
}
