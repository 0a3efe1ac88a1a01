//! ablator - tool-server ablation experiments across models
//!
//! An ablation is a saved experiment: phases of queries and `@tool`
//! directives, repeated for every model and iteration, with hooks that fire
//! around tool calls. ablator runs every scenario in order, isolates the
//! outputs directory per scenario and records a run summary.
//!
//! ablator can be used in two ways:
//! - **CLI**: `ablator run <name> --dry-run` executes directives against the
//!   tool servers in `.ablator/config.toml`
//! - **Library**: embed [`ExperimentScheduler`] with your own [`AgentLoop`]
//!   to drive model-backed queries
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use ablator::{
//!     AblationStore, CliArgs, Config, ExperimentScheduler, FixedPrompter,
//!     OutputSnapshotStore, ToolCallGate, registry_from_config,
//! };
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::discover(&CliArgs::default())?;
//! let gate = ToolCallGate::new(
//!     registry_from_config(&config),
//!     Arc::new(config.clone()),
//!     Arc::new(FixedPrompter { confirm: true }),
//! );
//! let store = AblationStore::new(config.ablations_dir());
//! let scheduler =
//!     ExperimentScheduler::new(gate, store.clone(), OutputSnapshotStore::new(config.outputs_dir()));
//! let run = scheduler.run(&store.load("search-tools")?, &BTreeMap::new()).await?;
//! println!("{} {}", run.id, run.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! | Component | Crate |
//! |-----------|-------|
//! | [`ToolCallGate`] | `ablator-gate` |
//! | [`HookEngine`] | `ablator-hooks` |
//! | [`SessionStateMachine`] | `ablator-session` |
//! | [`OutputSnapshotStore`] | `ablator-snapshot` |
//! | [`ExperimentScheduler`] | `ablator-orchestrator` |

pub mod cli;

// ============================================================================
// Public API
// ============================================================================

/// Configuration with discovery and precedence: CLI > config file > defaults.
pub use ablator_config::{CliArgs, Config, ConfigBuilder};

/// Library error type with user-facing reporting and exit code mapping.
pub use ablator_utils::error::{AblatorError, ErrorCategory, UserFriendlyError};

/// Exit codes matching the documented exit code table.
pub use ablator_utils::exit_codes::ExitCode;

pub use ablator_utils::types::{
    AblationDefinition, AblationRun, AblationRunStatus, Hook, ModelRef, Phase, RunResult,
    RunStatus,
};

pub use ablator_gate::{
    CallOrigin, FixedPrompter, ForceStopPrompter, GateOptions, GatePreferences, ServerRegistry,
    StaticPreferences, ToolCallGate, ToolResult, ToolServer, registry_from_config,
};
pub use ablator_hooks::HookEngine;
pub use ablator_orchestrator::{
    AblationStore, AgentLoop, ExperimentScheduler, ProgressEvent, TurnOutcome, TurnRequest,
};
pub use ablator_session::{ChatStore, FileChatStore, SessionState, SessionStateMachine};
pub use ablator_snapshot::OutputSnapshotStore;

// ============================================================================
// Component crates
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
#[doc(hidden)]
pub use ablator_utils::test_support;

#[doc(hidden)]
pub use ablator_utils::{atomic_write, directive, error, exit_codes, logging, paths, types};

pub use ablator_config as config;
pub use ablator_gate as gate;
pub use ablator_hooks as hooks;
pub use ablator_orchestrator as orchestrator;
pub use ablator_runner as runner;
pub use ablator_session as session;
pub use ablator_snapshot as snapshot;

/// Returns the ablator version
#[must_use]
pub fn ablator_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
