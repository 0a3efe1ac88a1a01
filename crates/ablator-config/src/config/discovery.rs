use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use ablator_utils::error::ConfigError;
use ablator_utils::paths::{STATE_DIR_NAME, ablator_home};

use super::{CliArgs, Config, ConfigSource, Defaults, GateSettings, PathsConfig, ServerConfig};

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    gate: Option<GateSettings>,
    paths: Option<PathsConfig>,
    defaults: Option<Defaults>,
    #[serde(default)]
    servers: BTreeMap<String, ServerConfig>,
}

const CONFIG_FILE_NAME: &str = "config.toml";

impl Config {
    /// Discover and load configuration with precedence: CLI > file > defaults
    ///
    /// Uses the current working directory for config file discovery when no
    /// explicit path is provided in `cli_args`.
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory.
    ///
    /// This is the path-driven variant used by tests to avoid process-global state.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self> {
        let mut source_attribution = HashMap::new();

        let mut gate = GateSettings::with_defaults();
        let mut paths = PathsConfig::default();
        let mut defaults = Defaults::default();
        let mut servers = BTreeMap::new();

        for key in [
            "tool_timeout_secs",
            "abort_poll_ms",
            "force_stop_countdown_secs",
            "max_iterations",
            "verbose",
            "home",
        ] {
            source_attribution.insert(key.to_string(), ConfigSource::Default);
        }

        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound {
                        path: explicit.display().to_string(),
                    }
                    .into());
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir),
        };

        let mut home = ablator_home();

        if let Some(path) = &config_path {
            let file_config = Self::load_config_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;
            tracing::debug!(path = %path.display(), "Loaded configuration file");

            if let Some(dir) = path.parent() {
                home = dir.to_path_buf();
                source_attribution.insert("home".to_string(), ConfigSource::Config);
            }

            if let Some(file_gate) = file_config.gate {
                if file_gate.tool_timeout_secs.is_some() {
                    gate.tool_timeout_secs = file_gate.tool_timeout_secs;
                    source_attribution.insert("tool_timeout_secs".to_string(), ConfigSource::Config);
                }
                if file_gate.abort_poll_ms.is_some() {
                    gate.abort_poll_ms = file_gate.abort_poll_ms;
                    source_attribution.insert("abort_poll_ms".to_string(), ConfigSource::Config);
                }
                if file_gate.force_stop_countdown_secs.is_some() {
                    gate.force_stop_countdown_secs = file_gate.force_stop_countdown_secs;
                    source_attribution
                        .insert("force_stop_countdown_secs".to_string(), ConfigSource::Config);
                }
            }

            if let Some(file_paths) = file_config.paths {
                if file_paths.outputs_dir.is_some() {
                    paths.outputs_dir = file_paths.outputs_dir;
                    source_attribution.insert("outputs_dir".to_string(), ConfigSource::Config);
                }
                if file_paths.ablations_dir.is_some() {
                    paths.ablations_dir = file_paths.ablations_dir;
                    source_attribution.insert("ablations_dir".to_string(), ConfigSource::Config);
                }
                if file_paths.chats_dir.is_some() {
                    paths.chats_dir = file_paths.chats_dir;
                    source_attribution.insert("chats_dir".to_string(), ConfigSource::Config);
                }
            }

            if let Some(file_defaults) = file_config.defaults {
                if file_defaults.max_iterations.is_some() {
                    defaults.max_iterations = file_defaults.max_iterations;
                    source_attribution.insert("max_iterations".to_string(), ConfigSource::Config);
                }
                if file_defaults.verbose.is_some() {
                    defaults.verbose = file_defaults.verbose;
                    source_attribution.insert("verbose".to_string(), ConfigSource::Config);
                }
            }

            if !file_config.servers.is_empty() {
                servers = file_config.servers;
                source_attribution.insert("servers".to_string(), ConfigSource::Config);
            }
        }

        // CLI overrides
        if let Some(cli_home) = &cli_args.home {
            home = cli_home.clone();
            source_attribution.insert("home".to_string(), ConfigSource::Cli);
        }
        if let Some(outputs_dir) = &cli_args.outputs_dir {
            paths.outputs_dir = Some(outputs_dir.clone());
            source_attribution.insert("outputs_dir".to_string(), ConfigSource::Cli);
        }
        if let Some(timeout) = cli_args.tool_timeout_secs {
            gate.tool_timeout_secs = Some(timeout);
            source_attribution.insert("tool_timeout_secs".to_string(), ConfigSource::Cli);
        }
        if let Some(verbose) = cli_args.verbose {
            defaults.verbose = Some(verbose);
            source_attribution.insert("verbose".to_string(), ConfigSource::Cli);
        }

        let config = Self {
            home,
            gate,
            paths,
            defaults,
            servers,
            source_attribution,
        };

        config.validate()?;

        Ok(config)
    }

    /// Find a config file for `start_dir`.
    ///
    /// Walks up the directory tree looking for `.ablator/config.toml`, stopping
    /// at repository root markers (.git, .hg, .svn) or the filesystem root,
    /// then falls back to `config.toml` in the ablator home directory.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current_dir = Some(start_dir);

        while let Some(dir) = current_dir {
            let config_path = dir.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME);
            if config_path.is_file() {
                return Some(config_path);
            }

            if dir.join(".git").exists() || dir.join(".hg").exists() || dir.join(".svn").exists()
            {
                break;
            }

            current_dir = dir.parent();
        }

        let home_config = ablator_home().join(CONFIG_FILE_NAME);
        home_config.is_file().then_some(home_config)
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).map_err(|e| {
            anyhow::Error::from(ConfigError::InvalidFile(format!(
                "{}: {}",
                path.display(),
                e.message()
            )))
        })
    }

    /// Discover configuration from environment and filesystem with no CLI overrides.
    pub fn discover_from_env_and_fs() -> Result<Self> {
        Self::discover(&CliArgs::default())
    }
}
