use ablator_utils::error::ConfigError;

use super::{Config, UNLIMITED_TOOL_TIMEOUT_SECS};

fn invalid(key: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    }
}

impl Config {
    /// Validate configuration values
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(timeout) = self.gate.tool_timeout_secs
            && timeout != UNLIMITED_TOOL_TIMEOUT_SECS
            && timeout <= 0
        {
            return Err(invalid(
                "tool_timeout_secs",
                format!("{timeout} (must be positive, or -1 for no limit)"),
            ));
        }

        if let Some(poll_ms) = self.gate.abort_poll_ms {
            if poll_ms == 0 {
                return Err(invalid("abort_poll_ms", "must be greater than 0"));
            }
            if poll_ms > 60_000 {
                return Err(invalid("abort_poll_ms", "exceeds maximum of 60000 ms"));
            }
        }

        if let Some(countdown) = self.gate.force_stop_countdown_secs
            && countdown > 3600
        {
            return Err(invalid(
                "force_stop_countdown_secs",
                "exceeds maximum of 3600 seconds",
            ));
        }

        if let Some(max_iterations) = self.defaults.max_iterations
            && max_iterations == 0
        {
            return Err(invalid("max_iterations", "must be greater than 0"));
        }

        for (server_name, server) in &self.servers {
            for (tool_name, tool) in &server.tools {
                if tool.command.first().is_none_or(|program| program.trim().is_empty()) {
                    return Err(invalid(
                        &format!("servers.{server_name}.tools.{tool_name}.command"),
                        "must name a program",
                    ));
                }
            }
        }

        Ok(())
    }
}
