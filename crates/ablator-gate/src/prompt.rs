//! Force-stop confirmation seam.

use async_trait::async_trait;

/// Asks the user whether a stuck tool call should be force stopped.
///
/// The gate guarantees at most one outstanding call to this across the process.
#[async_trait]
pub trait ForceStopPrompter: Send + Sync {
    /// Return true to stop the call and restart `server`.
    async fn confirm_force_stop(&self, tool: &str, server: &str) -> bool;
}

/// Prompter with a fixed answer, for headless runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompter {
    pub confirm: bool,
}

#[async_trait]
impl ForceStopPrompter for FixedPrompter {
    async fn confirm_force_stop(&self, tool: &str, server: &str) -> bool {
        tracing::info!(tool, server, confirm = self.confirm, "Force stop answered without prompting");
        self.confirm
    }
}
