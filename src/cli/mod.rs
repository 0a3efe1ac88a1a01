//! Command-line interface for ablator
//!
//! ## Module Structure
//!
//! - `args`: CLI argument definitions and parsing structures (clap)
//! - `run`: Main entry point and command dispatch
//! - `commands`: Command implementations
//! - `prompt`: Terminal force-stop prompter

pub mod args;
mod commands;
mod prompt;
mod run;

pub use args::{Cli, Commands};
pub use prompt::TerminalPrompter;
pub use run::run;
