//! CLI argument definitions and parsing structures
//!
//! This module defines the command-line interface structure using clap,
//! including the main `Cli` struct and the subcommand enum.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ablator - tool-server ablation experiments across models
#[derive(Parser, Debug)]
#[command(name = "ablator")]
#[command(about = "Run tool-calling ablation experiments against configured tool servers")]
#[command(long_about = r#"
ablator runs an ablation definition: a list of phases, each a sequence of
queries and @tool directives, repeated for every model and iteration. Tool
outputs are captured per scenario and a run summary is written next to the
definition.

EXAMPLES:
  # Save a definition and check it
  ablator import ./search-tools.json
  ablator validate search-tools

  # Execute every directive without calling a model
  ablator run search-tools --dry-run --arg topic=rust

  # Inspect past runs
  ablator runs search-tools
  ablator totals search-tools --json

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > config file > defaults
  Config file is discovered by searching upward from CWD for .ablator/config.toml
  Use --config to specify an explicit config file path

INTERRUPTING:
  Ctrl-C stops the run at the next command boundary. A tool call that does
  not return offers a force stop, which restarts the owning tool server.
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// State directory (overrides ABLATOR_HOME)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Directory tools write their outputs to
    #[arg(long, global = true)]
    pub outputs_dir: Option<PathBuf>,

    /// Per tool call timeout in seconds; -1 for no practical limit
    #[arg(long, global = true, allow_negative_numbers = true)]
    pub tool_timeout: Option<i64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List saved ablations
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a saved ablation definition
    Show {
        name: String,

        /// Print the stored definition document
        #[arg(long)]
        json: bool,
    },

    /// Import a definition file into the ablations directory
    Import {
        file: PathBuf,

        /// Replace an existing ablation with the same name
        #[arg(long)]
        force: bool,
    },

    /// Validate a saved ablation or a definition file
    Validate {
        /// Ablation name, or path to a definition file
        target: String,
    },

    /// Delete an ablation and all of its runs
    Delete { name: String },

    /// Run an ablation
    Run {
        name: String,

        /// Argument value, repeatable
        #[arg(long = "arg", value_name = "NAME=VALUE", value_parser = parse_key_value)]
        args: Vec<(String, String)>,

        /// Execute directives only; queries are not sent to a model
        #[arg(long)]
        dry_run: bool,

        /// Print the run summary as JSON instead of streaming progress
        #[arg(long)]
        json: bool,
    },

    /// List the stored runs of an ablation
    Runs {
        name: String,

        #[arg(long)]
        json: bool,
    },

    /// Aggregate totals over every run of an ablation
    Totals {
        name: String,

        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Short name used in error reports
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::Show { .. } => "show",
            Self::Import { .. } => "import",
            Self::Validate { .. } => "validate",
            Self::Delete { .. } => "delete",
            Self::Run { .. } => "run",
            Self::Runs { .. } => "runs",
            Self::Totals { .. } => "totals",
        }
    }
}

/// Parse `NAME=VALUE`. The value may itself contain `=`.
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("argument name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}
