use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use ablator_utils::types::ModelRef;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool that produced this message (tool role only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool call made over the local IPC channel rather than a tool server
    #[serde(default)]
    pub is_ipc: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[must_use]
    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>, is_ipc: bool) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            is_ipc,
            ..Self::new(Role::Tool, content)
        }
    }

    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
            is_ipc: false,
            timestamp: Utc::now(),
        }
    }
}

/// Token usage of one model call, keyed by the index of the message it produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub message_index: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Counters derived from the message log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounters {
    pub tool_use_count: usize,
    pub ipc_call_count: usize,
    pub round_trips: usize,
}

impl SessionCounters {
    /// Recount from `messages` alone.
    #[must_use]
    pub fn from_messages(messages: &[ChatMessage]) -> Self {
        messages
            .iter()
            .fold(Self::default(), |mut counters, message| {
                match message.role {
                    Role::Tool if message.is_ipc => counters.ipc_call_count += 1,
                    Role::Tool => counters.tool_use_count += 1,
                    Role::Assistant => counters.round_trips += 1,
                    Role::System | Role::User => {}
                }
                counters
            })
    }
}

/// Everything needed to restore a session verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBundle {
    pub id: String,
    pub model: ModelRef,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub usage: Vec<TokenUsage>,
    #[serde(default)]
    pub counters: SessionCounters,
}

impl SessionBundle {
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.usage.iter().map(TokenUsage::total).sum()
    }

    #[must_use]
    pub fn metadata(&self, ended_at: DateTime<Utc>) -> SessionMetadata {
        SessionMetadata {
            id: self.id.clone(),
            model: self.model.clone(),
            started_at: self.started_at,
            ended_at,
            message_count: self.messages.len(),
            round_trips: self.counters.round_trips,
            tool_use_count: self.counters.tool_use_count,
            ipc_call_count: self.counters.ipc_call_count,
            total_tokens: self.total_tokens(),
        }
    }
}

/// Summary returned when a persisted session ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub id: String,
    pub model: ModelRef,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub message_count: usize,
    pub round_trips: usize,
    pub tool_use_count: usize,
    pub ipc_call_count: usize,
    pub total_tokens: u64,
}
