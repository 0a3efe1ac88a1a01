//! Shared fixtures for integration tests
//!
//! Included with `#[path = "test_support/mod.rs"] mod test_support;` so each
//! test binary compiles its own copy.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use ablator::gate::{ToolContent, ToolDescriptor};
use ablator::{
    AblationDefinition, AblationStore, AgentLoop, ExperimentScheduler, FixedPrompter,
    OutputSnapshotStore, ServerRegistry, StaticPreferences, ToolCallGate, ToolServer, TurnOutcome,
    TurnRequest,
};

/// Tool server whose behaviour is picked by tool name.
///
/// - `echo`: returns its arguments as JSON text
/// - `write_output`: writes `{"path", "content"}` under the outputs dir
/// - `fail`: the server errors
/// - `error_result`: returns `{"status": "error"}`
/// - `abort`: returns `{"abortRun": true}`
/// - `hang`: never answers
/// - `notify`, `audit`: return `ok`
pub struct ScriptedServer {
    outputs_dir: PathBuf,
    calls: Mutex<Vec<(String, Value)>>,
    restarts: AtomicUsize,
}

impl ScriptedServer {
    pub fn new(outputs_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            outputs_dir: outputs_dir.into(),
            calls: Mutex::new(Vec::new()),
            restarts: AtomicUsize::new(0),
        })
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(tool, _)| tool).collect()
    }
}

#[async_trait]
impl ToolServer for ScriptedServer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        [
            "echo",
            "write_output",
            "fail",
            "error_result",
            "abort",
            "hang",
            "notify",
            "audit",
        ]
        .into_iter()
        .map(|name| ToolDescriptor {
            name: name.to_string(),
            description: None,
        })
        .collect()
    }

    async fn request(
        &self,
        tool: &str,
        args: Value,
        _timeout: Duration,
    ) -> Result<Vec<ToolContent>> {
        self.calls
            .lock()
            .unwrap()
            .push((tool.to_string(), args.clone()));
        let text = match tool {
            "echo" => args.to_string(),
            "write_output" => {
                let rel = args["path"].as_str().unwrap_or("out.txt");
                let path = self.outputs_dir.join(rel);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, args["content"].as_str().unwrap_or(""))?;
                json!({"status": "success", "path": rel}).to_string()
            }
            "fail" => anyhow::bail!("scripted failure"),
            "error_result" => json!({"status": "error"}).to_string(),
            "abort" => json!({"abortRun": true}).to_string(),
            "hang" => std::future::pending().await,
            _ => "ok".to_string(),
        };
        Ok(vec![ToolContent::text(text)])
    }

    async fn restart(&self) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Agent that records each turn and never calls tools.
///
/// A query containing `ABORT` for a model named in `abort_for` asks the
/// scheduler to abandon the rest of that model's phases.
#[derive(Default)]
pub struct ScriptedAgent {
    pub abort_for: Vec<String>,
    turns: Mutex<Vec<(String, String)>>,
}

impl ScriptedAgent {
    pub fn aborting_for(models: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            abort_for: models.iter().map(ToString::to_string).collect(),
            turns: Mutex::new(Vec::new()),
        })
    }

    /// (model, query) pairs in call order
    pub fn turns(&self) -> Vec<(String, String)> {
        self.turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentLoop for ScriptedAgent {
    async fn run_turn(&self, request: TurnRequest<'_>) -> Result<TurnOutcome> {
        self.turns
            .lock()
            .unwrap()
            .push((request.model.model.clone(), request.query.to_string()));
        request
            .session
            .push_assistant(format!("answer to {}", request.query), 10, 5)?;
        Ok(TurnOutcome {
            input_tokens: 10,
            output_tokens: 5,
            abort_run: request.query.contains("ABORT")
                && self.abort_for.contains(&request.model.model),
        })
    }
}

/// Isolated ablations and outputs directories.
pub struct Workspace {
    pub temp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root().join("outputs")
    }

    pub fn store(&self) -> AblationStore {
        AblationStore::new(self.root().join("ablations"))
    }

    pub fn server(&self) -> Arc<ScriptedServer> {
        ScriptedServer::new(self.outputs_dir())
    }

    pub fn scheduler(&self, server: &Arc<ScriptedServer>) -> ExperimentScheduler {
        ExperimentScheduler::new(
            gate(server),
            self.store(),
            OutputSnapshotStore::new(self.outputs_dir()),
        )
    }

    /// Save `definition` so the scheduler can write runs next to it.
    pub fn save(&self, definition: &AblationDefinition) {
        self.store().create(definition).unwrap();
    }
}

pub fn gate(server: &Arc<ScriptedServer>) -> ToolCallGate {
    ToolCallGate::new(
        ServerRegistry::new().with_server(Arc::clone(server) as Arc<dyn ToolServer>),
        Arc::new(StaticPreferences::default()),
        Arc::new(FixedPrompter { confirm: true }),
    )
}

/// `"phase/model/iteration=status"` for every recorded result, in order.
pub fn outcome_table(run: &ablator::AblationRun) -> Vec<String> {
    run.results
        .iter()
        .map(|r| {
            let iteration = r.iteration.map(|i| format!("#{i}")).unwrap_or_default();
            format!(
                "{}/{}{iteration}={}",
                r.model.as_deref().unwrap_or("-"),
                r.phase,
                r.status
            )
        })
        .collect()
}
