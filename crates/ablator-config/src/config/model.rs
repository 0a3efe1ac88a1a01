use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-call tool timeout in seconds
pub const DEFAULT_TOOL_TIMEOUT_SECS: i64 = 300;

/// Tool timeout value meaning "no practical limit"
pub const UNLIMITED_TOOL_TIMEOUT_SECS: i64 = -1;

/// Default abort-flag poll interval in milliseconds
pub const DEFAULT_ABORT_POLL_MS: u64 = 500;

/// Default countdown before a force-stop is offered, in seconds
pub const DEFAULT_FORCE_STOP_COUNTDOWN_SECS: u64 = 15;

/// Default agent-loop iteration cap per turn
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// Source of a configuration value.
///
/// Precedence: CLI arguments > config file > programmatic > built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// Value provided via CLI argument (highest precedence).
    Cli,
    /// Value loaded from configuration file.
    Config,
    /// Value set through [`ConfigBuilder`](crate::ConfigBuilder).
    Programmatic,
    /// Built-in default.
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Config => write!(f, "config"),
            Self::Programmatic => write!(f, "programmatic"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Configuration for ablator.
///
/// `Config` provides hierarchical configuration with discovery and precedence:
/// CLI arguments > config file > built-in defaults.
///
/// # Discovery
///
/// Use [`Config::discover()`] for CLI-like behavior that:
/// - Searches for `.ablator/config.toml` upward from the current directory
/// - Falls back to `config.toml` inside `ABLATOR_HOME` (or `~/.ablator`)
/// - Applies built-in defaults for unspecified values
///
/// # Configuration File Format
///
/// ```toml
/// [gate]
/// tool_timeout_secs = 300        # -1 for no practical limit
/// abort_poll_ms = 500
/// force_stop_countdown_secs = 15
///
/// [paths]
/// outputs_dir = "outputs"
/// ablations_dir = "ablations"
/// chats_dir = "chats"
///
/// [defaults]
/// max_iterations = 20
/// verbose = false
///
/// [servers.files.tools.write_file]
/// command = ["python3", "tools/write_file.py"]
/// description = "Write a file into the outputs directory"
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory relative paths in `[paths]` resolve against.
    pub home: PathBuf,
    /// Tool-call gate timing.
    pub gate: GateSettings,
    /// Storage locations.
    pub paths: PathsConfig,
    /// Default values for run settings.
    pub defaults: Defaults,
    /// Command-backed tool servers keyed by server name.
    pub servers: BTreeMap<String, ServerConfig>,
    /// Source attribution for each setting (reported by `effective_config`).
    pub source_attribution: HashMap<String, ConfigSource>,
}

/// `[gate]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GateSettings {
    pub tool_timeout_secs: Option<i64>,
    pub abort_poll_ms: Option<u64>,
    pub force_stop_countdown_secs: Option<u64>,
}

impl GateSettings {
    /// Built-in gate defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            tool_timeout_secs: Some(DEFAULT_TOOL_TIMEOUT_SECS),
            abort_poll_ms: Some(DEFAULT_ABORT_POLL_MS),
            force_stop_countdown_secs: Some(DEFAULT_FORCE_STOP_COUNTDOWN_SECS),
        }
    }
}

/// `[paths]` section. Relative paths resolve against [`Config::home`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    pub outputs_dir: Option<PathBuf>,
    pub ablations_dir: Option<PathBuf>,
    pub chats_dir: Option<PathBuf>,
}

/// `[defaults]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    pub max_iterations: Option<u32>,
    pub verbose: Option<bool>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            verbose: Some(false),
        }
    }
}

/// One `[servers.<name>]` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub tools: BTreeMap<String, ToolCommandConfig>,
}

/// A tool backed by a local command: arguments arrive on stdin as JSON and
/// stdout is the tool result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCommandConfig {
    /// argv; the first element is the program
    pub command: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Config {
    /// Per-call tool timeout in seconds as configured (`-1` = unlimited).
    #[must_use]
    pub fn tool_timeout_secs(&self) -> i64 {
        self.gate
            .tool_timeout_secs
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS)
    }

    #[must_use]
    pub fn abort_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gate.abort_poll_ms.unwrap_or(DEFAULT_ABORT_POLL_MS))
    }

    #[must_use]
    pub fn force_stop_countdown(&self) -> Duration {
        Duration::from_secs(
            self.gate
                .force_stop_countdown_secs
                .unwrap_or(DEFAULT_FORCE_STOP_COUNTDOWN_SECS),
        )
    }

    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.defaults.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS)
    }

    #[must_use]
    pub fn verbose(&self) -> bool {
        self.defaults.verbose.unwrap_or(false)
    }

    /// Directory the tools write artifacts into; snapshotted per scenario.
    #[must_use]
    pub fn outputs_dir(&self) -> PathBuf {
        self.resolve(self.paths.outputs_dir.as_deref(), "outputs")
    }

    /// Root of saved ablation definitions and their runs.
    #[must_use]
    pub fn ablations_dir(&self) -> PathBuf {
        self.resolve(self.paths.ablations_dir.as_deref(), "ablations")
    }

    /// Where persisted chat sessions live.
    #[must_use]
    pub fn chats_dir(&self) -> PathBuf {
        self.resolve(self.paths.chats_dir.as_deref(), "chats")
    }

    fn resolve(&self, configured: Option<&Path>, default_name: &str) -> PathBuf {
        match configured {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.home.join(path),
            None => self.home.join(default_name),
        }
    }
}
