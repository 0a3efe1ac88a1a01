//! A tool server whose tools are local commands.
//!
//! Each tool is an argv list from `[servers.<name>.tools.<tool>]`. Arguments
//! are written to the child's stdin as a JSON object and stdout becomes the
//! text result. A non-zero exit is a tool failure carrying stderr.

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ablator_config::{Config, ToolCommandConfig};
use ablator_runner::{CommandSpec, ProcessRunner, RunnerError};

use crate::server::{ServerRegistry, ToolServer};
use crate::types::{ToolContent, ToolDescriptor};

/// Environment variable telling tools where to write artifacts
pub const OUTPUTS_DIR_ENV: &str = "ABLATOR_OUTPUTS_DIR";

/// Environment variable carrying the invoked tool name
pub const TOOL_NAME_ENV: &str = "ABLATOR_TOOL";

#[derive(Debug, Clone)]
pub struct CommandToolServer {
    name: String,
    tools: BTreeMap<String, ToolCommandConfig>,
    runner: ProcessRunner,
    outputs_dir: Option<PathBuf>,
}

impl CommandToolServer {
    #[must_use]
    pub fn new(name: impl Into<String>, tools: BTreeMap<String, ToolCommandConfig>) -> Self {
        Self {
            name: name.into(),
            tools,
            runner: ProcessRunner::default(),
            outputs_dir: None,
        }
    }

    /// Export `dir` to every tool as `ABLATOR_OUTPUTS_DIR`; tool processes
    /// also run with it as their working directory.
    #[must_use]
    pub fn with_outputs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.outputs_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    fn spec_for(&self, tool: &str) -> anyhow::Result<CommandSpec> {
        let config = self
            .tools
            .get(tool)
            .with_context(|| format!("server '{}' has no tool '{tool}'", self.name))?;
        let mut spec = CommandSpec::from_argv(&config.command)?.env(TOOL_NAME_ENV, tool);
        if let Some(dir) = &self.outputs_dir {
            spec = spec.env(OUTPUTS_DIR_ENV, dir).cwd(dir);
        }
        Ok(spec)
    }
}

#[async_trait]
impl ToolServer for CommandToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|(name, config)| ToolDescriptor {
                name: name.clone(),
                description: config.description.clone(),
            })
            .collect()
    }

    async fn request(
        &self,
        tool: &str,
        args: Value,
        timeout: Duration,
    ) -> anyhow::Result<Vec<ToolContent>> {
        let spec = self.spec_for(tool)?;
        let stdin = serde_json::to_vec(&args).context("Failed to encode tool arguments")?;

        if let Some(dir) = &self.outputs_dir {
            ablator_utils::paths::ensure_dir_all(dir)
                .with_context(|| format!("Failed to create outputs dir {}", dir.display()))?;
        }

        let output = match self.runner.run(&spec, Some(stdin), timeout).await {
            Ok(output) => output,
            Err(RunnerError::Timeout { timeout_ms }) => {
                bail!("tool process timed out after {timeout_ms} ms")
            }
            Err(e) => return Err(e.into()),
        };

        if !output.success() {
            let stderr = output.stderr_string();
            match output.exit_code {
                Some(code) => bail!("tool exited with status {code}: {}", stderr.trim()),
                None => bail!("tool was terminated by a signal"),
            }
        }

        Ok(vec![ToolContent::text(output.stdout_string())])
    }

    async fn restart(&self) -> anyhow::Result<()> {
        let terminated = self.runner.terminate_all().await;
        tracing::info!(server = %self.name, terminated, "Restarted command tool server");
        Ok(())
    }
}

/// Build a registry of command tool servers from `[servers]` in `config`.
#[must_use]
pub fn registry_from_config(config: &Config) -> ServerRegistry {
    let outputs_dir = config.outputs_dir();
    config
        .servers
        .iter()
        .fold(ServerRegistry::new(), |registry, (name, server)| {
            let server = CommandToolServer::new(name.clone(), server.tools.clone())
                .with_outputs_dir(outputs_dir.clone());
            registry.with_server(Arc::new(server))
        })
}
