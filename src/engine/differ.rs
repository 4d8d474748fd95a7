//! Plan display - levelled operations with property diffs

use colored::{ColoredString, Colorize};
use declarative::{
    Action, DeleteOrigin, Operation, Plan, PlannedValue, PropertyChange, ReplacementStrategy,
};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use crate::ui;

/// Plan symbol for an action
pub fn symbol(action: Action) -> &'static str {
    match action {
        Action::Create => "+",
        Action::Update => "~",
        Action::Replace => "-/+",
        Action::Delete => "-",
        Action::Noop => " ",
    }
}

fn colored_symbol(action: Action) -> ColoredString {
    let s = symbol(action);
    match action {
        Action::Create => s.green(),
        Action::Update => s.yellow(),
        Action::Replace => s.magenta(),
        Action::Delete => s.red(),
        Action::Noop => s.dimmed(),
    }
}

fn planned(value: &PlannedValue) -> String {
    match value {
        PlannedValue::Known(value) => ui::format_value(value),
        PlannedValue::Unknown => "(known after apply)".to_string(),
        PlannedValue::Absent => "(removed)".to_string(),
    }
}

/// One-line description of a property change, without colors
pub fn change_text(change: &PropertyChange) -> String {
    let body = match (&change.old, &change.new) {
        (None, new) => format!("{} = {}", change.property, planned(new)),
        (Some(old), PlannedValue::Absent) => {
            format!("{}: {} (removed)", change.property, ui::format_value(old))
        }
        (Some(old), new) => format!(
            "{}: {} → {}",
            change.property,
            ui::format_value(old),
            planned(new)
        ),
    };
    if change.forces_replacement {
        format!("{body} # forces replacement")
    } else {
        body
    }
}

/// Line diff for multi-line string changes
///
/// Returns nothing unless both sides are known strings and one spans lines.
pub fn text_diff(change: &PropertyChange) -> Vec<(ChangeTag, String)> {
    let (Some(Value::String(old)), PlannedValue::Known(Value::String(new))) =
        (&change.old, &change.new)
    else {
        return Vec::new();
    };
    if !old.contains('\n') && !new.contains('\n') {
        return Vec::new();
    }

    TextDiff::from_lines(old.as_str(), new.as_str())
        .iter_all_changes()
        .filter(|c| c.tag() != ChangeTag::Equal)
        .map(|c| (c.tag(), c.value().trim_end_matches('\n').to_string()))
        .collect()
}

fn change_symbol(change: &PropertyChange) -> ColoredString {
    match (&change.old, &change.new) {
        (None, _) => "+".green(),
        (Some(_), PlannedValue::Absent) => "-".red(),
        _ => "~".yellow(),
    }
}

fn display_operation(op: &Operation) {
    let mut note = String::new();
    if op.deferred {
        note.push_str(" (depends on values known after apply)");
    }
    if let Some(strategy) = op.replacement {
        note.push_str(&format!(" [{}]", strategy_label(strategy)));
    }
    println!(
        "│   {} {} {}{}",
        colored_symbol(op.action),
        op.node.as_str().bold(),
        format!("({})", op.resource_type).dimmed(),
        note.dimmed()
    );

    for change in &op.changes {
        let line = change_text(change);
        let line = if change.forces_replacement {
            line.magenta()
        } else {
            line.normal()
        };
        println!("│       {} {}", change_symbol(change), line);

        for (tag, text) in text_diff(change) {
            match tag {
                ChangeTag::Delete => println!("│         {}", format!("- {text}").red()),
                ChangeTag::Insert => println!("│         {}", format!("+ {text}").green()),
                ChangeTag::Equal => {}
            }
        }
    }
}

fn strategy_label(strategy: ReplacementStrategy) -> &'static str {
    match strategy {
        ReplacementStrategy::CreateBeforeDelete => "create before delete",
        ReplacementStrategy::DeleteBeforeCreate => "delete before create",
    }
}

fn origin_label(origin: DeleteOrigin) -> &'static str {
    match origin {
        DeleteOrigin::Removed => "no longer declared",
        DeleteOrigin::Replaced => "superseded by replacement",
        DeleteOrigin::Pending => "left over from an earlier pass",
    }
}

/// Display a plan in a user-friendly format
pub fn display_plan(plan: &Plan) {
    let summary = plan.summary();
    if !summary.has_changes() {
        println!();
        println!("  {} No changes needed", "✓".green());
        if summary.unchanged > 0 {
            ui::dim(&format!("{} up to date", ui::count(summary.unchanged, "resource")));
        }
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Execution Plan".bold()
    );
    println!("│");

    for (index, level) in plan.levels.iter().enumerate() {
        let changing: Vec<&Operation> = level.iter().filter(|op| op.action.is_change()).collect();
        if changing.is_empty() {
            continue;
        }
        println!("│ {}", format!("Level {index}").bold());
        for op in changing {
            display_operation(op);
        }
        println!("│");
    }

    let deletion_levels = plan.deletion_levels();
    if !deletion_levels.is_empty() {
        println!("│ {}", "Deletions".bold());
        for entry in deletion_levels.into_iter().flatten() {
            println!(
                "│   {} {} {} {}",
                colored_symbol(Action::Delete),
                entry.node.as_str().bold(),
                format!("({} {})", entry.resource_type, entry.provider_id).dimmed(),
                format!("- {}", origin_label(entry.origin)).dimmed()
            );
        }
        println!("│");
    }

    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Plan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.replace.to_string().magenta(),
        summary.delete.to_string().red(),
        summary.unchanged
    );
    println!("└─────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(old: Option<Value>, new: PlannedValue) -> PropertyChange {
        PropertyChange {
            property: "cidrBlock".to_string(),
            old,
            new,
            forces_replacement: false,
            secret: false,
        }
    }

    #[test]
    fn test_symbols() {
        assert_eq!(symbol(Action::Create), "+");
        assert_eq!(symbol(Action::Update), "~");
        assert_eq!(symbol(Action::Replace), "-/+");
        assert_eq!(symbol(Action::Delete), "-");
    }

    #[test]
    fn test_change_text_added() {
        let c = change(None, PlannedValue::Known(json!("10.0.0.0/16")));
        assert_eq!(change_text(&c), r#"cidrBlock = "10.0.0.0/16""#);
    }

    #[test]
    fn test_change_text_modified_and_forced() {
        let mut c = change(
            Some(json!("10.0.0.0/16")),
            PlannedValue::Known(json!("10.1.0.0/16")),
        );
        c.forces_replacement = true;
        assert_eq!(
            change_text(&c),
            r#"cidrBlock: "10.0.0.0/16" → "10.1.0.0/16" # forces replacement"#
        );
    }

    #[test]
    fn test_change_text_unknown_and_removed() {
        let unknown = change(Some(json!("vpc-1")), PlannedValue::Unknown);
        assert_eq!(change_text(&unknown), r#"cidrBlock: "vpc-1" → (known after apply)"#);

        let removed = change(Some(json!(true)), PlannedValue::Absent);
        assert_eq!(change_text(&removed), "cidrBlock: true (removed)");
    }

    #[test]
    fn test_change_text_redacted() {
        let mut c = change(
            Some(json!("hunter2")),
            PlannedValue::Known(json!("hunter3")),
        );
        c.secret = true;
        c.redact();
        assert_eq!(change_text(&c), r#"cidrBlock: "[secret]" → "[secret]""#);
    }

    #[test]
    fn test_text_diff_multiline() {
        let c = change(
            Some(json!("#!/bin/sh\necho one\n")),
            PlannedValue::Known(json!("#!/bin/sh\necho two\n")),
        );
        assert_eq!(
            text_diff(&c),
            vec![
                (ChangeTag::Delete, "echo one".to_string()),
                (ChangeTag::Insert, "echo two".to_string()),
            ]
        );
    }

    #[test]
    fn test_text_diff_single_line_is_empty() {
        let c = change(Some(json!("a")), PlannedValue::Known(json!("b")));
        assert!(text_diff(&c).is_empty());
        let unknown = change(Some(json!("a\nb")), PlannedValue::Unknown);
        assert!(text_diff(&unknown).is_empty());
    }
}
