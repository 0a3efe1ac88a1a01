use std::path::PathBuf;

/// Configuration overrides supplied on the command line.
///
/// Every field is optional; `None` leaves the file or default value in place.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Explicit config file (`--config`); disables discovery
    pub config_path: Option<PathBuf>,
    /// State directory override (`--home`)
    pub home: Option<PathBuf>,
    pub outputs_dir: Option<PathBuf>,
    pub tool_timeout_secs: Option<i64>,
    pub verbose: Option<bool>,
}
