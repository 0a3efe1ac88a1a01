//! Ablation orchestration
//!
//! - `definition`: parsing, validation and argument resolution
//! - `placeholders`: `{{name}}` extraction and substitution
//! - `store`: definitions and runs on disk
//! - `scheduler`: [`ExperimentScheduler`], which runs every
//!   (iteration, model, phase) scenario in order
//! - `progress`: events streamed while a run executes
//! - `report`: markdown summaries and dry-run tool logs
//! - `agent`: the [`AgentLoop`] seam for model-backed queries
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use ablator_gate::{FixedPrompter, StaticPreferences, ToolCallGate, ServerRegistry};
//! use ablator_orchestrator::{AblationStore, ExperimentScheduler};
//! use ablator_snapshot::OutputSnapshotStore;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let gate = ToolCallGate::new(
//!     ServerRegistry::new(),
//!     Arc::new(StaticPreferences::default()),
//!     Arc::new(FixedPrompter { confirm: false }),
//! );
//! let store = AblationStore::new("ablations");
//! let scheduler = ExperimentScheduler::new(gate, store.clone(), OutputSnapshotStore::new("outputs"));
//! let run = scheduler.run(&store.load("search-tools")?, &BTreeMap::new()).await?;
//! println!("{} scenarios", run.results.len());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod definition;
pub mod placeholders;
pub mod progress;
pub mod report;
pub mod scheduler;
pub mod store;

pub use agent::{AgentLoop, TurnOutcome, TurnRequest};
pub use definition::{
    parse_definition, resolve_arguments, validate_definition, validate_directives,
};
pub use placeholders::{
    PlaceholderWarning, apply_arguments, extract_placeholders, substitute, substitute_directive,
    validate_placeholders,
};
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSender, progress_channel};
pub use scheduler::{ABORT_RUN_KEY, ExperimentScheduler};
pub use store::{AblationStore, AblationTotals};
