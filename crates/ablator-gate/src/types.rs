//! Tool call payload types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ablator_utils::error::GateError;

/// Maximum characters kept by [`ToolResult::preview`]
pub const PREVIEW_CHARS: usize = 2048;

/// Who is asking for a tool call.
///
/// Internal calls come from hooks: they are not logged as user calls and
/// auto-stop on abort instead of prompting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrigin {
    User,
    Internal,
}

/// A tool advertised by a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One content block of a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
    Json { json: Value },
}

impl ToolContent {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    fn as_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Json { json } => json.to_string(),
        }
    }
}

/// Result of a tool call as seen by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    #[must_use]
    pub fn success(content: Vec<ToolContent>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// An error result the model can read and react to.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: true,
        }
    }

    /// All content blocks joined by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The result parsed as JSON, if the whole text is a JSON document.
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        if let [ToolContent::Json { json }] = self.content.as_slice() {
            return Some(json.clone());
        }
        serde_json::from_str(self.text().trim()).ok()
    }

    /// Text truncated to [`PREVIEW_CHARS`] characters.
    #[must_use]
    pub fn preview(&self) -> String {
        let text = self.text();
        if text.chars().count() <= PREVIEW_CHARS {
            return text;
        }
        let truncated: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{truncated}\n... [truncated]")
    }
}

/// Conversion of non-fatal gate errors into a result the model can read.
pub trait IntoToolResult {
    fn into_tool_result(self) -> ToolResult;
}

impl IntoToolResult for GateError {
    fn into_tool_result(self) -> ToolResult {
        let payload = serde_json::json!({
            "error": match &self {
                GateError::Timeout { .. } => "timeout",
                GateError::ExecutionError { .. } => "execution_error",
                GateError::NotFound { .. } => "not_found",
                GateError::ForceStopped { .. } => "force_stopped",
                GateError::HookExecution { .. } => "hook_failed",
            },
            "tool": self.tool(),
            "message": self.to_string(),
        });
        ToolResult {
            content: vec![ToolContent::Json { json: payload }],
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_parses_text_result() {
        let result = ToolResult::success(vec![ToolContent::text(r#" {"status": "success"} "#)]);
        assert_eq!(result.json(), Some(json!({"status": "success"})));

        let plain = ToolResult::success(vec![ToolContent::text("wrote 3 files")]);
        assert_eq!(plain.json(), None);
    }

    #[test]
    fn test_timeout_becomes_readable_error() {
        let result = GateError::Timeout {
            tool: "search".to_string(),
            timeout_ms: 1500,
        }
        .into_tool_result();
        assert!(result.is_error);
        let json = result.json().unwrap();
        assert_eq!(json["error"], "timeout");
        assert_eq!(json["tool"], "search");
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(PREVIEW_CHARS + 10);
        let preview = ToolResult::success(vec![ToolContent::text(long)]).preview();
        assert!(preview.ends_with("[truncated]"));
    }

    #[test]
    fn test_content_serialization_is_tagged() {
        let text = serde_json::to_value(ToolContent::text("hi")).unwrap();
        assert_eq!(text, json!({"type": "text", "text": "hi"}));
    }
}
