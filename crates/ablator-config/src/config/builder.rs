use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use ablator_utils::error::ConfigError;
use ablator_utils::paths::ablator_home;

use super::{Config, ConfigSource, Defaults, GateSettings, PathsConfig, ServerConfig, ToolCommandConfig};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// Use this when embedding ablator without relying on environment
    /// variables or config files.
    ///
    /// ```rust,no_run
    /// use ablator_config::Config;
    /// use std::time::Duration;
    ///
    /// let config = Config::builder()
    ///     .home("/tmp/ablator")
    ///     .tool_timeout_secs(60)
    ///     .abort_poll_interval(Duration::from_millis(250))
    ///     .build()
    ///     .expect("valid config");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for programmatic configuration.
///
/// All values set via the builder are attributed to
/// [`ConfigSource::Programmatic`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    home: Option<PathBuf>,
    tool_timeout_secs: Option<i64>,
    abort_poll_interval: Option<Duration>,
    force_stop_countdown: Option<Duration>,
    outputs_dir: Option<PathBuf>,
    ablations_dir: Option<PathBuf>,
    chats_dir: Option<PathBuf>,
    max_iterations: Option<u32>,
    verbose: Option<bool>,
    servers: BTreeMap<String, ServerConfig>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Base directory for relative paths (defaults to the ablator home).
    #[must_use]
    pub fn home(mut self, path: impl Into<PathBuf>) -> Self {
        self.home = Some(path.into());
        self
    }

    /// Per-call tool timeout; `-1` means no practical limit.
    #[must_use]
    pub const fn tool_timeout_secs(mut self, secs: i64) -> Self {
        self.tool_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub const fn abort_poll_interval(mut self, interval: Duration) -> Self {
        self.abort_poll_interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn force_stop_countdown(mut self, countdown: Duration) -> Self {
        self.force_stop_countdown = Some(countdown);
        self
    }

    #[must_use]
    pub fn outputs_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs_dir = Some(path.into());
        self
    }

    #[must_use]
    pub fn ablations_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.ablations_dir = Some(path.into());
        self
    }

    #[must_use]
    pub fn chats_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.chats_dir = Some(path.into());
        self
    }

    #[must_use]
    pub const fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Register a command-backed tool on `server`.
    #[must_use]
    pub fn tool_command<I, S>(mut self, server: &str, tool: &str, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers
            .entry(server.to_string())
            .or_default()
            .tools
            .insert(
                tool.to_string(),
                ToolCommandConfig {
                    command: command.into_iter().map(Into::into).collect(),
                    description: None,
                },
            );
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<Config, ConfigError> {
        let mut source_attribution = HashMap::new();
        let mut mark = |key: &str, set: bool| {
            let source = if set {
                ConfigSource::Programmatic
            } else {
                ConfigSource::Default
            };
            source_attribution.insert(key.to_string(), source);
        };

        mark("home", self.home.is_some());
        mark("tool_timeout_secs", self.tool_timeout_secs.is_some());
        mark("abort_poll_ms", self.abort_poll_interval.is_some());
        mark(
            "force_stop_countdown_secs",
            self.force_stop_countdown.is_some(),
        );
        mark("outputs_dir", self.outputs_dir.is_some());
        mark("ablations_dir", self.ablations_dir.is_some());
        mark("chats_dir", self.chats_dir.is_some());
        mark("max_iterations", self.max_iterations.is_some());
        mark("verbose", self.verbose.is_some());
        mark("servers", !self.servers.is_empty());

        let defaults_gate = GateSettings::with_defaults();
        let gate = GateSettings {
            tool_timeout_secs: self.tool_timeout_secs.or(defaults_gate.tool_timeout_secs),
            abort_poll_ms: self
                .abort_poll_interval
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .or(defaults_gate.abort_poll_ms),
            force_stop_countdown_secs: self
                .force_stop_countdown
                .map(|d| d.as_secs())
                .or(defaults_gate.force_stop_countdown_secs),
        };

        let builtin = Defaults::default();
        let config = Config {
            home: self.home.unwrap_or_else(ablator_home),
            gate,
            paths: PathsConfig {
                outputs_dir: self.outputs_dir,
                ablations_dir: self.ablations_dir,
                chats_dir: self.chats_dir,
            },
            defaults: Defaults {
                max_iterations: self.max_iterations.or(builtin.max_iterations),
                verbose: self.verbose.or(builtin.verbose),
            },
            servers: self.servers,
            source_attribution,
        };

        config.validate()?;
        Ok(config)
    }
}
