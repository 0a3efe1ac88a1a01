//! Tool-call execution and abort coordination
//!
//! [`ToolCallGate`] runs every tool call under a timeout while polling a
//! user abort flag. When an abort has been pending for the countdown, the
//! user is asked (one prompt at a time, process-wide) whether to force stop;
//! a confirmed stop restarts the owning tool server.

pub mod abort;
pub mod command_server;
pub mod gate;
pub mod invoker;
pub mod preferences;
pub mod prompt;
pub mod server;
pub mod types;

pub use abort::{AbortMachine, AbortPoll, AbortSignal, AbortState, PromptGuard, PromptMutex};
pub use command_server::{CommandToolServer, registry_from_config};
pub use gate::ToolCallGate;
pub use invoker::{HookInvoker, ToolHooks};
pub use preferences::{
    GateOptions, GatePreferences, StaticPreferences, UNLIMITED_TIMEOUT, effective_timeout,
};
pub use prompt::{FixedPrompter, ForceStopPrompter};
pub use server::{ServerRegistry, ToolServer};
pub use types::{CallOrigin, IntoToolResult, ToolContent, ToolDescriptor, ToolResult};
