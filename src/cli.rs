use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::DEFAULT_FILE;

#[derive(Parser)]
#[command(name = "infragraph")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge declared infrastructure onto its providers", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Declaration file
    #[arg(short, long, global = true, env = "INFRAGRAPH_FILE", default_value = DEFAULT_FILE)]
    pub file: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Plan, confirm and converge the declaration
    Apply(ApplyArgs),

    /// Delete every resource recorded in state
    Destroy {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print resolved stack exports
    Outputs {
        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Reveal secret exports
        #[arg(long)]
        show_secrets: bool,
    },

    /// Inspect recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Print the pass report as JSON
    #[arg(long)]
    pub json: bool,

    /// Max in-flight provider operations (overrides settings.jobs)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}
