//! Configuration management for ablator
//!
//! Hierarchical configuration with discovery and precedence:
//! CLI > file > defaults. TOML files carry `[gate]`, `[paths]`, `[defaults]`
//! and `[servers.*]` sections.

mod builder;
mod cli_args;
mod discovery;
mod model;
mod sources;
mod validation;

pub use builder::ConfigBuilder;
pub use cli_args::CliArgs;
pub use model::*;

#[cfg(test)]
mod tests {
    use super::*;
    use ablator_utils::paths::with_isolated_home;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_config_file(dir: &Path, content: &str) -> PathBuf {
        let state_dir = dir.join(".ablator");
        fs::create_dir_all(&state_dir).unwrap();
        let config_path = state_dir.join("config.toml");
        fs::write(&config_path, content).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_without_file() {
        let home = TempDir::new().unwrap();
        let _home = with_isolated_home(home.path());
        let project = TempDir::new().unwrap();
        fs::create_dir(project.path().join(".git")).unwrap();

        let config = Config::discover_from(project.path(), &CliArgs::default()).unwrap();
        assert_eq!(config.tool_timeout_secs(), DEFAULT_TOOL_TIMEOUT_SECS);
        assert_eq!(config.abort_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.force_stop_countdown(), Duration::from_secs(15));
        assert_eq!(config.max_iterations(), 20);
        assert_eq!(config.home, home.path());
        assert_eq!(config.outputs_dir(), home.path().join("outputs"));
        assert_eq!(
            config.source_attribution.get("tool_timeout_secs"),
            Some(&ConfigSource::Default)
        );
    }

    #[test]
    fn test_discovery_walks_upward_and_cli_wins() {
        let home = TempDir::new().unwrap();
        let _home = with_isolated_home(home.path());
        let project = TempDir::new().unwrap();
        fs::create_dir(project.path().join(".git")).unwrap();
        let config_path = create_test_config_file(
            project.path(),
            r#"
[gate]
tool_timeout_secs = -1
abort_poll_ms = 250

[paths]
outputs_dir = "out"

[servers.files.tools.write_file]
command = ["sh", "-c", "cat > /dev/null"]
description = "Write a file"
"#,
        );
        let nested = project.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        let cli = CliArgs {
            tool_timeout_secs: Some(30),
            ..CliArgs::default()
        };
        let config = Config::discover_from(&nested, &cli).unwrap();

        assert_eq!(config.home, config_path.parent().unwrap());
        assert_eq!(config.tool_timeout_secs(), 30);
        assert_eq!(
            config.source_attribution.get("tool_timeout_secs"),
            Some(&ConfigSource::Cli)
        );
        assert_eq!(config.abort_poll_interval(), Duration::from_millis(250));
        assert_eq!(
            config.outputs_dir(),
            project.path().join(".ablator").join("out")
        );
        assert_eq!(config.servers["files"].tools["write_file"].command[0], "sh");

        let effective = config.effective_config();
        assert_eq!(effective["abort_poll_ms"], ("250".to_string(), "config".to_string()));
    }

    #[test]
    fn test_unlimited_timeout_is_valid() {
        let config = Config::builder()
            .home("/tmp/ablator")
            .tool_timeout_secs(UNLIMITED_TOOL_TIMEOUT_SECS)
            .build()
            .unwrap();
        assert_eq!(config.tool_timeout_secs(), -1);
        assert_eq!(
            config.source_attribution.get("tool_timeout_secs"),
            Some(&ConfigSource::Programmatic)
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(Config::builder().tool_timeout_secs(0).build().is_err());
        assert!(Config::builder().tool_timeout_secs(-5).build().is_err());
        assert!(
            Config::builder()
                .abort_poll_interval(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(Config::builder().max_iterations(0).build().is_err());
        assert!(
            Config::builder()
                .tool_command("s", "t", Vec::<String>::new())
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let home = TempDir::new().unwrap();
        let _home = with_isolated_home(home.path());
        let project = TempDir::new().unwrap();
        fs::create_dir(project.path().join(".git")).unwrap();
        create_test_config_file(project.path(), "[gate]\ntool_timeout = 5\n");

        let err = Config::discover_from(project.path(), &CliArgs::default()).unwrap_err();
        assert!(format!("{err:#}").contains("config"));
    }

    #[test]
    fn test_explicit_missing_config_errors() {
        let cli = CliArgs {
            config_path: Some(PathBuf::from("/definitely/not/here.toml")),
            ..CliArgs::default()
        };
        let err = Config::discover_from(Path::new("/"), &cli).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
