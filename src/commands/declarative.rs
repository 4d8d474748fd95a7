//! Declarative commands
//!
//! - `plan` - Preview what apply would change
//! - `apply` - Converge providers onto the declaration
//! - `destroy` - Delete everything recorded in state

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{
    ConfirmCallback, FileStateStore, Graph, LogProgress, PassReport, ProgressCallback,
    ProviderRegistry, Reconciler,
};
use std::sync::Arc;
use tokio::signal;

use super::Outcome;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::config::Loaded;
use crate::engine::{self, DialoguerConfirm};
use crate::progress::TerminalProgress;
use crate::ui;

/// Everything a pass needs, built from the declaration
struct Session {
    loaded: Loaded,
    reconciler: Reconciler,
}

impl Session {
    fn open(ctx: &Context, jobs: Option<usize>) -> Result<Self> {
        let loaded = Loaded::load(&ctx.file)?;
        let state_path = loaded.state_path();
        log::debug!("State file: {}", state_path.display());

        let providers: ProviderRegistry = loaded.declaration.providers();
        let reconciler = Reconciler::new(
            Arc::new(providers),
            Arc::new(FileStateStore::new(state_path)),
        )
        .with_options(loaded.declaration.execute_options(jobs));

        Ok(Self { loaded, reconciler })
    }

    fn graph(&self) -> Result<Graph> {
        self.loaded
            .declaration
            .graph()
            .with_context(|| format!("Invalid declaration {}", self.loaded.path.display()))
    }
}

/// Show what apply would change
pub async fn plan(ctx: &Context, json: bool) -> Result<Outcome> {
    let session = Session::open(ctx, None)?;
    let graph = session.graph()?;
    let pass = session.reconciler.prepare(graph).await?;
    let plan = pass.redacted_plan();

    if json {
        engine::print_json(&plan)?;
    } else {
        engine::display_plan(&plan);
    }
    Ok(Outcome::Success)
}

/// Plan, confirm and converge
pub async fn apply(ctx: &Context, args: ApplyArgs) -> Result<Outcome> {
    let session = Session::open(ctx, args.jobs)?;
    let graph = session.graph()?;
    run_pass(ctx, session.reconciler, graph, args.yes, args.json, "Apply").await
}

/// Delete every recorded resource in reverse dependency order
pub async fn destroy(ctx: &Context, yes: bool, json: bool) -> Result<Outcome> {
    let session = Session::open(ctx, None)?;
    run_pass(ctx, session.reconciler, Graph::default(), yes, json, "Destroy").await
}

async fn run_pass(
    ctx: &Context,
    reconciler: Reconciler,
    graph: Graph,
    yes: bool,
    json: bool,
    verb: &str,
) -> Result<Outcome> {
    let pass = reconciler.prepare(graph).await?;
    let plan = pass.redacted_plan();
    if !json {
        engine::display_plan(&plan);
    }

    if plan.has_changes() && !yes {
        let mut prompt = DialoguerConfirm::default();
        if !prompt.confirm(&plan)? {
            println!();
            println!("  {} Aborted", "✗".red());
            return Ok(Outcome::Success);
        }
    }

    let total = plan.levels.iter().map(Vec::len).sum::<usize>() + plan.deletions.len();
    let bar = Arc::new(if json || ctx.quiet || ctx.verbose > 0 {
        TerminalProgress::hidden()
    } else {
        TerminalProgress::new(total)
    });
    // with -v the log lines replace the bar
    let progress: Arc<dyn ProgressCallback> = if ctx.verbose > 0 {
        Arc::new(LogProgress)
    } else {
        bar.clone()
    };
    let reconciler = reconciler.with_progress(progress);

    let token = reconciler.cancellation_token();
    let watcher = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, waiting for in-flight operations");
            token.cancel();
        }
    });

    let result = reconciler.execute(pass).await;
    watcher.abort();
    bar.finish();
    let report = result?;

    if json {
        engine::print_json(&report)?;
    } else {
        engine::print_report(&report, verb);
        if report.cancelled {
            ui::warn("State was saved; run apply again to finish");
        }
    }
    Ok(outcome(&report))
}

fn outcome(report: &PassReport) -> Outcome {
    if report.success {
        Outcome::Success
    } else {
        Outcome::NodeFailures
    }
}
