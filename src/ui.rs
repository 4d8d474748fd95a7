use colored::Colorize;
use serde_json::Value;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Value Formatting
// ============================================================================

/// Longest value shown inline before truncating
pub const MAX_INLINE: usize = 60;

/// Render a JSON value on one line for display
///
/// Strings are quoted, compound values use compact JSON.
pub fn format_value(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    };
    truncate(&rendered, MAX_INLINE)
}

/// Truncate a string for display, keeping the start
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = text.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// Pluralize a count: `1 resource`, `3 resources`
pub fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_value_scalars() {
        assert_eq!(format_value(&json!("10.0.0.0/16")), "\"10.0.0.0/16\"");
        assert_eq!(format_value(&json!(5432)), "5432");
        assert_eq!(format_value(&json!(true)), "true");
        assert_eq!(format_value(&Value::Null), "null");
    }

    #[test]
    fn test_format_value_compound() {
        assert_eq!(format_value(&json!(["a", "b"])), r#"["a","b"]"#);
        assert_eq!(format_value(&json!({"Name": "web"})), r#"{"Name":"web"}"#);
    }

    #[test]
    fn test_format_value_truncates() {
        let long = "x".repeat(100);
        let shown = format_value(&json!(long));
        assert_eq!(shown.chars().count(), MAX_INLINE);
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("exact", 5), "exact");
        assert_eq!(truncate("subnet-0123456789", 10), "subnet-...");
        assert_eq!(truncate("test", 3), "...");
        assert_eq!(truncate("", 10), "");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("ááááá", 4), "á...");
    }

    #[test]
    fn test_count() {
        assert_eq!(count(1, "resource"), "1 resource");
        assert_eq!(count(0, "resource"), "0 resources");
        assert_eq!(count(3, "change"), "3 changes");
    }
}
