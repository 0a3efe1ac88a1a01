//! Ablation definitions and their runs on disk.
//!
//! ```text
//! <ablations_dir>/<name>/ablation.json
//! <ablations_dir>/<name>/runs/<run-id>/run.json
//! <ablations_dir>/<name>/runs/<run-id>/run.md
//! <ablations_dir>/<name>/runs/<run-id>/<model|dry-run>/<phase>/[run-N/]...
//! ```

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ablator_utils::atomic_write::write_json_atomic;
use ablator_utils::error::StoreError;
use ablator_utils::paths::ensure_dir_all;
use ablator_utils::types::{AblationDefinition, AblationRun, RunStatus};

use crate::report::{render_run_markdown, write_markdown};

pub const DEFINITION_FILE: &str = "ablation.json";
pub const RUN_FILE: &str = "run.json";
pub const RUN_REPORT_FILE: &str = "run.md";

fn io_error(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn serialize_error(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::Serialize {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Aggregates over every stored run of one ablation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AblationTotals {
    pub runs: usize,
    pub scenarios: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: usize,
    pub total_tokens: u64,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AblationStore {
    root: PathBuf,
}

impl AblationStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn ablation_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    #[must_use]
    pub fn definition_path(&self, name: &str) -> PathBuf {
        self.ablation_dir(name).join(DEFINITION_FILE)
    }

    #[must_use]
    pub fn runs_dir(&self, name: &str) -> PathBuf {
        self.ablation_dir(name).join("runs")
    }

    #[must_use]
    pub fn run_dir(&self, name: &str, run_id: &str) -> PathBuf {
        self.runs_dir(name).join(run_id)
    }

    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.definition_path(name).is_file()
    }

    /// Names of every stored ablation, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join(DEFINITION_FILE).is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn load(&self, name: &str) -> Result<AblationDefinition, StoreError> {
        let path = self.definition_path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_str(&content).map_err(|e| serialize_error(&path, e))
    }

    fn write_definition(&self, definition: &AblationDefinition) -> Result<PathBuf, StoreError> {
        let path = self.definition_path(&definition.name);
        write_json_atomic(&path, definition).map_err(|e| io_error(&path, e))?;
        Ok(path)
    }

    /// Store a new definition; fails if the name is taken.
    pub fn create(&self, definition: &AblationDefinition) -> Result<PathBuf, StoreError> {
        if self.exists(&definition.name) {
            return Err(StoreError::AlreadyExists {
                name: definition.name.clone(),
            });
        }
        let path = self.write_definition(definition)?;
        tracing::info!(ablation = %definition.name, path = %path.display(), "Created ablation");
        Ok(path)
    }

    /// Replace an existing definition, stamping `updated`.
    pub fn update(&self, definition: &AblationDefinition) -> Result<AblationDefinition, StoreError> {
        let existing = self.load(&definition.name)?;
        let mut updated = definition.clone();
        updated.created = existing.created;
        updated.updated = Some(Utc::now());
        self.write_definition(&updated)?;
        Ok(updated)
    }

    /// Remove a definition together with all of its runs.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        if !self.exists(name) {
            return Err(StoreError::NotFound {
                name: name.to_string(),
            });
        }
        let dir = self.ablation_dir(name);
        fs::remove_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        tracing::info!(ablation = %name, "Deleted ablation");
        Ok(())
    }

    /// Create the directory for a new run.
    pub fn create_run_dir(&self, name: &str, run_id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.run_dir(name, run_id);
        ensure_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(dir)
    }

    /// Write `run.json` and `run.md` for `run`.
    pub fn save_run(&self, run: &AblationRun) -> Result<PathBuf, StoreError> {
        let dir = self.run_dir(&run.ablation, &run.id);
        let json_path = dir.join(RUN_FILE);
        write_json_atomic(&json_path, run).map_err(|e| io_error(&json_path, e))?;

        let md_path = dir.join(RUN_REPORT_FILE);
        write_markdown(&md_path, &render_run_markdown(run)).map_err(|e| io_error(&md_path, e))?;
        tracing::debug!(ablation = %run.ablation, run = %run.id, results = run.results.len(), "Saved run");
        Ok(json_path)
    }

    pub fn load_run(&self, name: &str, run_id: &str) -> Result<AblationRun, StoreError> {
        let path = self.run_dir(name, run_id).join(RUN_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::RunNotFound {
                    name: name.to_string(),
                    run_id: run_id.to_string(),
                });
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_str(&content).map_err(|e| serialize_error(&path, e))
    }

    /// Every stored run of `name`, oldest first. Unreadable runs are skipped.
    pub fn list_runs(&self, name: &str) -> Result<Vec<AblationRun>, StoreError> {
        if !self.exists(name) {
            return Err(StoreError::NotFound {
                name: name.to_string(),
            });
        }
        let runs_dir = self.runs_dir(name);
        let entries = match fs::read_dir(&runs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&runs_dir, e)),
        };

        let mut runs = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let Some(run_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match self.load_run(name, &run_id) {
                Ok(run) => runs.push(run),
                Err(StoreError::RunNotFound { .. }) => {}
                Err(e) => tracing::warn!(ablation = %name, run = %run_id, error = %e, "Skipping unreadable run"),
            }
        }
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(runs)
    }

    pub fn totals(&self, name: &str) -> Result<AblationTotals, StoreError> {
        let runs = self.list_runs(name)?;
        Ok(runs.iter().fold(AblationTotals::default(), |mut totals, run| {
            totals.runs += 1;
            totals.scenarios += run.results.len();
            totals.completed += run.count(RunStatus::Completed);
            totals.failed += run.count(RunStatus::Failed);
            totals.skipped += run.count(RunStatus::Skipped);
            totals.aborted += run.count(RunStatus::Aborted);
            totals.total_tokens += run.total_tokens;
            totals.total_duration_ms += run.total_duration_ms;
            totals
        }))
    }
}
