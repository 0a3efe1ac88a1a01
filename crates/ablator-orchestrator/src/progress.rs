//! Progress events streamed while a run executes.

use serde::Serialize;
use tokio::sync::mpsc;

use ablator_utils::types::{RunResult, RunStatus};

/// One event on the progress channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    /// A scenario or one of its commands started
    #[serde(rename_all = "camelCase")]
    Progress {
        phase: String,
        model: Option<String>,
        run_index: u32,
        command_index: Option<usize>,
        total_commands: usize,
        status: RunStatus,
        message: Option<String>,
    },
    /// A scenario finished
    Result { result: RunResult },
    #[serde(rename_all = "camelCase")]
    Error {
        phase: Option<String>,
        model: Option<String>,
        message: String,
        duration_ms: u64,
    },
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

#[must_use]
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_events_are_tagged() {
        let event = ProgressEvent::Progress {
            phase: "p1".into(),
            model: Some("openai/gpt".into()),
            run_index: 1,
            command_index: Some(0),
            total_commands: 2,
            status: RunStatus::Running,
            message: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("progress"));
        assert_eq!(value["runIndex"], json!(1));
        assert_eq!(value["status"], json!("running"));

        let error = ProgressEvent::Error {
            phase: None,
            model: None,
            message: "boom".into(),
            duration_ms: 3,
        };
        assert_eq!(serde_json::to_value(&error).unwrap()["type"], json!("error"));
    }
}
