//! Exit code constants and error mapping for ablator.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `INVALID_DEFINITION` | Ablation definition rejected by validation |
//! | 4 | `NOT_FOUND` | Ablation or run does not exist |
//! | 5 | `RUN_FAILED` | Run finished but at least one scenario failed |
//! | 10 | `TOOL_TIMEOUT` | A tool call timed out |
//! | 11 | `FORCE_STOPPED` | A tool call was force stopped |
//! | 130 | `CANCELLED` | Run was cancelled by the user |

use crate::error::{AblatorError, GateError, StoreError};

/// Exit codes matching the documented exit code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: Self = Self(0);
    pub const INTERNAL: Self = Self(1);
    pub const CLI_ARGS: Self = Self(2);
    pub const INVALID_DEFINITION: Self = Self(3);
    pub const NOT_FOUND: Self = Self(4);
    pub const RUN_FAILED: Self = Self(5);
    pub const TOOL_TIMEOUT: Self = Self(10);
    pub const FORCE_STOPPED: Self = Self(11);
    pub const CANCELLED: Self = Self(130);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        Self(code)
    }
}

impl AblatorError {
    /// Map an error to its CLI exit code.
    #[must_use]
    pub const fn to_exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::CLI_ARGS,
            Self::Definition(_) => ExitCode::INVALID_DEFINITION,
            Self::Store(StoreError::NotFound { .. } | StoreError::RunNotFound { .. }) => {
                ExitCode::NOT_FOUND
            }
            Self::Gate(GateError::Timeout { .. }) => ExitCode::TOOL_TIMEOUT,
            Self::Gate(GateError::ForceStopped { .. }) => ExitCode::FORCE_STOPPED,
            Self::Cancelled => ExitCode::CANCELLED,
            _ => ExitCode::INTERNAL,
        }
    }
}
