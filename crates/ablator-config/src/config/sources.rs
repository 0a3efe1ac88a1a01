use std::collections::BTreeMap;

use super::{Config, ConfigSource};

impl Config {
    /// Effective configuration as `key -> (value, source)` for display.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let source = |key: &str| {
            self.source_attribution
                .get(key)
                .unwrap_or(&ConfigSource::Default)
                .to_string()
        };

        let mut entries = BTreeMap::new();
        let mut add = |key: &str, value: String| {
            entries.insert(key.to_string(), (value, source(key)));
        };

        add("home", self.home.display().to_string());
        add("tool_timeout_secs", self.tool_timeout_secs().to_string());
        add(
            "abort_poll_ms",
            self.abort_poll_interval().as_millis().to_string(),
        );
        add(
            "force_stop_countdown_secs",
            self.force_stop_countdown().as_secs().to_string(),
        );
        add("max_iterations", self.max_iterations().to_string());
        add("verbose", self.verbose().to_string());
        add("outputs_dir", self.outputs_dir().display().to_string());
        add("ablations_dir", self.ablations_dir().display().to_string());
        add("chats_dir", self.chats_dir().display().to_string());
        add(
            "servers",
            self.servers.keys().cloned().collect::<Vec<_>>().join(", "),
        );

        entries
    }
}
