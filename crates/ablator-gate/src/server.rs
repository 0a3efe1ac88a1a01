//! Tool server seam and the tool-name registry.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{ToolContent, ToolDescriptor};

/// A connected tool server.
///
/// The transport is the implementor's business; the gate only needs to send
/// a request and, when a call is force stopped, restart the server.
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn name(&self) -> &str;

    fn tools(&self) -> Vec<ToolDescriptor>;

    async fn request(
        &self,
        tool: &str,
        args: Value,
        timeout: Duration,
    ) -> anyhow::Result<Vec<ToolContent>>;

    /// Tear down and reconnect. Called after a confirmed force stop.
    async fn restart(&self) -> anyhow::Result<()>;
}

/// Maps tool names to the server that provides them.
///
/// When two servers advertise the same tool the first registered wins.
#[derive(Clone, Default)]
pub struct ServerRegistry {
    servers: Vec<Arc<dyn ToolServer>>,
    by_tool: BTreeMap<String, usize>,
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("servers", &self.server_names())
            .field("tools", &self.by_tool.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, server: Arc<dyn ToolServer>) {
        let index = self.servers.len();
        for tool in server.tools() {
            if let Some(existing) = self.by_tool.get(&tool.name) {
                tracing::warn!(
                    tool = %tool.name,
                    server = %server.name(),
                    kept = %self.servers[*existing].name(),
                    "Tool provided by more than one server; keeping the first"
                );
                continue;
            }
            self.by_tool.insert(tool.name, index);
        }
        self.servers.push(server);
    }

    #[must_use]
    pub fn with_server(mut self, server: Arc<dyn ToolServer>) -> Self {
        self.register(server);
        self
    }

    #[must_use]
    pub fn server_for(&self, tool: &str) -> Option<Arc<dyn ToolServer>> {
        self.by_tool
            .get(tool)
            .map(|index| Arc::clone(&self.servers[*index]))
    }

    #[must_use]
    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Every routable tool name, sorted.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.by_tool.keys().cloned().collect()
    }
}
