use std::fmt;
use std::io;
use thiserror::Error;

/// Library-level error type with rich context and user-friendly reporting.
///
/// `AblatorError` is the umbrella error returned by ablator library operations.
/// Each component owns a focused error enum; this type unifies them for
/// callers that do not care which layer failed.
///
/// # Error Categories
///
/// | Category | Description |
/// |----------|-------------|
/// | `Config` | Configuration file or CLI argument errors |
/// | `Definition` | Invalid ablation definitions (rejected before a run starts) |
/// | `Gate` | Tool call failures: not found, timeout, force stop, hook failure |
/// | `Session` | Illegal conversation state transitions |
/// | `Snapshot` | Outputs directory isolation failures |
/// | `Store` | Definition/run persistence failures |
///
/// # Exit Code Mapping
///
/// Use [`to_exit_code()`](Self::to_exit_code) to map errors to CLI exit codes.
///
/// Library code returns `AblatorError` and does NOT call `std::process::exit()`.
#[derive(Error, Debug)]
pub enum AblatorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid ablation definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Tool call error: {0}")]
    Gate(#[from] GateError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Output snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Ablation run was cancelled")]
    Cancelled,
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Definition,
    ToolExecution,
    Session,
    FileSystem,
    Cancellation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Definition => write!(f, "Ablation Definition"),
            Self::ToolExecution => write!(f, "Tool Execution"),
            Self::Session => write!(f, "Session"),
            Self::FileSystem => write!(f, "File System"),
            Self::Cancellation => write!(f, "Cancellation"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },
}

/// Errors raised by the tool call gate.
///
/// `Timeout` and `ExecutionError` are non-fatal: they are handed back to the
/// model as a structured tool result. `ForceStopped`, `NotFound` and
/// `HookExecution` end the current turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("No connected tool server provides tool '{tool}'")]
    NotFound { tool: String },

    #[error("Tool '{tool}' failed: {reason}")]
    ExecutionError { tool: String, reason: String },

    #[error("Tool '{tool}' timed out after {timeout_ms} ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("Tool '{tool}' was force stopped (server '{server}' restarted: {recovered})")]
    ForceStopped {
        tool: String,
        server: String,
        recovered: bool,
    },

    #[error("Hook '{hook}' for tool '{tool}' failed: {reason}")]
    HookExecution {
        hook: String,
        tool: String,
        reason: String,
    },
}

impl GateError {
    /// Whether this error must end the current turn instead of being shown to the model.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::ForceStopped { .. } | Self::HookExecution { .. }
        )
    }

    /// Name of the tool the error refers to.
    #[must_use]
    pub fn tool(&self) -> &str {
        match self {
            Self::NotFound { tool }
            | Self::ExecutionError { tool, .. }
            | Self::Timeout { tool, .. }
            | Self::ForceStopped { tool, .. }
            | Self::HookExecution { tool, .. } => tool,
        }
    }
}

/// Ablation definition validation errors (`InvalidDefinition`).
///
/// Raised before any run starts; a run never begins with an invalid definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Ablation name '{name}' is invalid: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Ablation has no phases")]
    NoPhases,

    #[error("Ablation has no models and is not a dry run")]
    NoModels,

    #[error("Duplicate phase name '{name}'")]
    DuplicatePhase { name: String },

    #[error("Duplicate model '{provider}/{model}'")]
    DuplicateModel { provider: String, model: String },

    #[error("Run count must be at least 1, got {runs}")]
    InvalidRuns { runs: u32 },

    #[error("Hook #{index} is invalid: {reason}")]
    InvalidHook { index: usize, reason: String },

    #[error("Invalid directive '{command}': {reason}")]
    InvalidDirective { command: String, reason: String },

    #[error("Required argument '{name}' has no value")]
    MissingArgument { name: String },

    #[error("Attachment argument '{name}' points to a missing file: {path}")]
    AttachmentNotFound { name: String, path: String },

    #[error("Failed to parse ablation definition: {reason}")]
    Parse { reason: String },
}

/// Session state machine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Cannot {operation} while session is {state}")]
    InvalidTransition { operation: String, state: String },

    #[error("Rewind index {index} is beyond the message log length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Session '{id}' not found")]
    NotFound { id: String },

    #[error("Failed to persist session '{id}': {reason}")]
    Persist { id: String, reason: String },
}

/// Output snapshot (stash/capture/unstash) errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Outputs are already stashed at {path}")]
    AlreadyStashed { path: String },
}

impl SnapshotError {
    /// Wrap an IO error with the path it occurred at.
    pub fn io(path: impl AsRef<std::path::Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Ablation/run persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Ablation '{name}' not found")]
    NotFound { name: String },

    #[error("Ablation '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("Run '{run_id}' not found for ablation '{name}'")]
    RunNotFound { name: String, run_id: String },

    #[error("Failed to read or write {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to (de)serialize {path}: {reason}")]
    Serialize { path: String, reason: String },
}

impl UserFriendlyError for AblatorError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(err) => err.user_message(),
            Self::Definition(err) => err.user_message(),
            Self::Gate(err) => err.user_message(),
            Self::Session(err) => err.user_message(),
            Self::Snapshot(err) => format!("Could not isolate the outputs directory: {err}"),
            Self::Store(err) => err.user_message(),
            Self::Io(err) => format!("File system operation failed: {err}"),
            Self::Cancelled => "The ablation run was cancelled before it finished".to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(err) => err.context(),
            Self::Definition(err) => err.context(),
            Self::Gate(err) => err.context(),
            Self::Snapshot(_) => Some(
                "Outputs are restored from the run stash even when a run fails; check the run directory for a leftover .outputs-stash".to_string(),
            ),
            Self::Cancelled => {
                Some("Results recorded before cancellation were saved with the run".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(err) => err.suggestions(),
            Self::Definition(err) => err.suggestions(),
            Self::Gate(err) => err.suggestions(),
            Self::Store(err) => err.suggestions(),
            Self::Io(_) | Self::Snapshot(_) => vec![
                "Check file permissions on the outputs and ablations directories".to_string(),
                "Ensure there is enough free disk space".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Definition(_) => ErrorCategory::Definition,
            Self::Gate(_) => ErrorCategory::ToolExecution,
            Self::Session(_) => ErrorCategory::Session,
            Self::Snapshot(_) | Self::Store(_) | Self::Io(_) => ErrorCategory::FileSystem,
            Self::Cancelled => ErrorCategory::Cancellation,
        }
    }
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => format!("The configuration file is invalid: {reason}"),
            Self::InvalidValue { key, value } => {
                format!("Configuration value for '{key}' is invalid: {value}")
            }
            Self::NotFound { path } => format!("Configuration file not found: {path}"),
        }
    }

    fn context(&self) -> Option<String> {
        Some(
            "Configuration is loaded from .ablator/config.toml (searched upward from the current directory) or ABLATOR_HOME".to_string(),
        )
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec!["Check the TOML syntax of the configuration file".to_string()],
            Self::InvalidValue { key, .. } => vec![format!("Fix the value of '{key}'")],
            Self::NotFound { .. } => {
                vec!["Pass an existing file with --config or remove the flag".to_string()]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

impl UserFriendlyError for DefinitionError {
    fn user_message(&self) -> String {
        format!("The ablation definition was rejected: {self}")
    }

    fn context(&self) -> Option<String> {
        Some("Definitions are validated before any scenario runs".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidName { .. } => vec![
                "Use only ASCII letters, digits, dots, dashes and underscores".to_string(),
            ],
            Self::DuplicatePhase { .. } => vec!["Give every phase a unique name".to_string()],
            Self::DuplicateModel { .. } => {
                vec!["List each provider/model pair only once".to_string()]
            }
            Self::InvalidHook { .. } => vec![
                "Each hook needs exactly one of 'before' or 'after' and a '@tool' run directive"
                    .to_string(),
            ],
            Self::InvalidDirective { .. } => {
                vec!["Directives look like: @tool <name> {\"arg\": \"value\"}".to_string()]
            }
            Self::MissingArgument { name } => vec![format!("Pass --arg {name}=<value>")],
            Self::NoModels => vec!["Add a model or set \"dryRun\": true".to_string()],
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Definition
    }
}

impl UserFriendlyError for GateError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Timeout { .. } => Some(
                "Timeouts are reported to the model as a tool error; the conversation continues"
                    .to_string(),
            ),
            Self::ForceStopped { .. } => {
                Some("The owning tool server was restarted to recover".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound { .. } => {
                vec!["Check the configured tool servers and their tool names".to_string()]
            }
            Self::Timeout { .. } => vec![
                "Raise [gate] tool_timeout_secs, or set it to -1 for no practical limit"
                    .to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::ToolExecution
    }
}

impl UserFriendlyError for SessionError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        None
    }

    fn suggestions(&self) -> Vec<String> {
        Vec::new()
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Session
    }
}

impl UserFriendlyError for StoreError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        None
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound { .. } => vec!["Run `ablator list` to see saved ablations".to_string()],
            Self::AlreadyExists { .. } => {
                vec!["Delete the existing ablation or pick another name".to_string()]
            }
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::FileSystem
    }
}

impl AblatorError {
    /// Format the error for terminal display with context and suggestions.
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut out = format!("Error [{}]: {}", self.category(), self.user_message());
        if let Some(context) = self.context() {
            out.push_str(&format!("\n  Context: {context}"));
        }
        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            out.push_str("\n  Suggestions:");
            for suggestion in suggestions {
                out.push_str(&format!("\n    - {suggestion}"));
            }
        }
        out
    }
}
