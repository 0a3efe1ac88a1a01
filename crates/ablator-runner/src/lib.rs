//! Process execution for command-backed tool servers
//!
//! All process execution goes through [`CommandSpec`] to ensure argv-style
//! invocation. Children are started in their own process group so a server
//! restart can tear down everything a tool spawned.

pub mod command_spec;
pub mod error;
pub mod process;

#[cfg(unix)]
mod unix;

pub use command_spec::CommandSpec;
pub use error::RunnerError;
pub use process::{ProcessOutput, ProcessRunner};
