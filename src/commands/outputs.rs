//! `outputs` - print the stack exports resolved by the last pass

use anyhow::Result;
use declarative::{FileStateStore, REDACTED, StateDocument, StateStore};
use indexmap::IndexMap;
use serde_json::Value;

use super::Outcome;
use crate::Context;
use crate::config::Loaded;
use crate::engine;
use crate::ui;

/// Exports with secret values hidden unless `show_secrets`
pub fn visible_exports(state: &StateDocument, show_secrets: bool) -> IndexMap<String, Value> {
    state
        .exports
        .iter()
        .map(|(name, value)| {
            let value = if !show_secrets && state.secret_exports.contains(name) {
                Value::String(REDACTED.to_string())
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

pub fn run(ctx: &Context, json: bool, show_secrets: bool) -> Result<Outcome> {
    let loaded = Loaded::load(&ctx.file)?;
    let state = FileStateStore::new(loaded.state_path()).load()?;
    let exports = visible_exports(&state, show_secrets);

    if json {
        engine::print_json(&exports)?;
        return Ok(Outcome::Success);
    }

    if exports.is_empty() {
        ui::info("No outputs recorded. Run apply first.");
        return Ok(Outcome::Success);
    }

    ui::header("Outputs");
    for (name, value) in &exports {
        let shown = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        ui::kv(name, &shown);
    }
    Ok(Outcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> StateDocument {
        let mut state = StateDocument::default();
        state.exports.insert("vpcId".to_string(), json!("vpc-1"));
        state
            .exports
            .insert("dbPassword".to_string(), json!("hunter2"));
        state.secret_exports.insert("dbPassword".to_string());
        state
    }

    #[test]
    fn test_secrets_redacted_by_default() {
        let exports = visible_exports(&state(), false);
        assert_eq!(exports["vpcId"], json!("vpc-1"));
        assert_eq!(exports["dbPassword"], json!(REDACTED));
    }

    #[test]
    fn test_show_secrets() {
        let exports = visible_exports(&state(), true);
        assert_eq!(exports["dbPassword"], json!("hunter2"));
    }

    #[test]
    fn test_order_preserved() {
        let names: Vec<String> = visible_exports(&state(), false).into_keys().collect();
        assert_eq!(names, vec!["vpcId", "dbPassword"]);
    }
}
