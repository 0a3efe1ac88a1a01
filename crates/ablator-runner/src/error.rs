//! Error types for the runner

use thiserror::Error;

/// Process execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Process I/O failed: {reason}")]
    Io { reason: String },

    #[error("Execution timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}
