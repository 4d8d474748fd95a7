mod cli;
mod commands;
mod config;
mod engine;
mod interpolate;
mod progress;
mod providers;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, StateCommand};
use commands::Outcome;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub file: PathBuf,
    pub verbose: u8,
    pub quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        file: cli.file,
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match run(&ctx, cli.command).await {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(ctx: &Context, command: Command) -> Result<Outcome> {
    match command {
        Command::Plan { json } => commands::declarative::plan(ctx, json).await,
        Command::Apply(args) => commands::declarative::apply(ctx, args).await,
        Command::Destroy { yes, json } => commands::declarative::destroy(ctx, yes, json).await,
        Command::Outputs { json, show_secrets } => commands::outputs::run(ctx, json, show_secrets),
        Command::State(StateCommand::List { json }) => commands::state::list(ctx, json),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "infragraph", &mut io::stdout());
            Ok(Outcome::Success)
        }
    }
}
