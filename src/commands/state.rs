//! `state list` - show what the state file records

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use declarative::{FileStateStore, StateDocument, StateStore};
use serde::Serialize;

use super::Outcome;
use crate::Context;
use crate::config::Loaded;
use crate::engine;
use crate::ui;

/// One recorded instance
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ResourceRow {
    pub node: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub provider_id: String,
    pub dependencies: Vec<String>,
    /// Superseded by a replacement, destroy still outstanding
    pub pending_delete: bool,
}

#[derive(Debug, Serialize)]
struct Listing<'a> {
    serial: u64,
    last_updated: String,
    resources: &'a [ResourceRow],
}

pub fn rows(state: &StateDocument) -> Vec<ResourceRow> {
    let live = state.resources.iter().map(|(node, record)| ResourceRow {
        node: node.to_string(),
        resource_type: record.resource_type.clone(),
        provider_id: record.provider_id.clone(),
        dependencies: record.dependencies.iter().map(ToString::to_string).collect(),
        pending_delete: false,
    });
    let pending = state.pending_deletes.iter().map(|pending| ResourceRow {
        node: pending.node.to_string(),
        resource_type: pending.resource_type.clone(),
        provider_id: pending.provider_id.clone(),
        dependencies: pending.dependencies.iter().map(ToString::to_string).collect(),
        pending_delete: true,
    });
    live.chain(pending).collect()
}

pub fn list(ctx: &Context, json: bool) -> Result<Outcome> {
    let loaded = Loaded::load(&ctx.file)?;
    let state = FileStateStore::new(loaded.state_path()).load()?;
    let rows = rows(&state);
    let last_updated = state
        .last_updated
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    if json {
        engine::print_json(&Listing {
            serial: state.serial,
            last_updated,
            resources: &rows,
        })?;
        return Ok(Outcome::Success);
    }

    if rows.is_empty() {
        ui::info("State is empty");
        return Ok(Outcome::Success);
    }

    ui::header(&format!("Resources ({})", rows.len()));
    ui::dim(&format!("serial {}, updated {last_updated}", state.serial));
    println!();
    for row in &rows {
        let marker = if row.pending_delete {
            " pending delete".red().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<24} {:<32} {}{marker}",
            row.node.bold(),
            row.resource_type.dimmed(),
            row.provider_id
        );
    }
    Ok(Outcome::Success)
}
