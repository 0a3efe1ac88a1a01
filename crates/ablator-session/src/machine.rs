use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use ablator_utils::error::SessionError;
use ablator_utils::types::ModelRef;

use crate::message::{ChatMessage, SessionBundle, SessionCounters, SessionMetadata, TokenUsage};
use crate::store::ChatStore;

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

fn new_session_id() -> String {
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("chat-{}-{seq}", Utc::now().format("%Y%m%d-%H%M%S-%3f"))
}

/// Where the machine is in a conversation's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Paused,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Owns one conversation at a time.
///
/// ```text
/// Idle --start--> Active --pause--> Paused --resume--> Active
///   ^               |                  |
///   +---end/discard-+----discard-------+
/// ```
pub struct SessionStateMachine {
    state: SessionState,
    bundle: Option<SessionBundle>,
    store: Option<Arc<dyn ChatStore>>,
}

impl fmt::Debug for SessionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStateMachine")
            .field("state", &self.state)
            .field("session", &self.bundle.as_ref().map(|b| b.id.as_str()))
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    /// A machine that never persists.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SessionState::Idle,
            bundle: None,
            store: None,
        }
    }

    #[must_use]
    pub fn with_store(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.bundle.as_ref().map(|b| b.id.as_str())
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        self.bundle.as_ref().map_or(&[], |b| b.messages.as_slice())
    }

    #[must_use]
    pub fn counters(&self) -> SessionCounters {
        self.bundle.as_ref().map(|b| b.counters).unwrap_or_default()
    }

    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.bundle.as_ref().map_or(0, SessionBundle::total_tokens)
    }

    fn invalid(&self, operation: &str) -> SessionError {
        SessionError::InvalidTransition {
            operation: operation.to_string(),
            state: self.state.to_string(),
        }
    }

    fn active_bundle(&mut self, operation: &str) -> Result<&mut SessionBundle, SessionError> {
        if self.state != SessionState::Active {
            return Err(self.invalid(operation));
        }
        let state = self.state.to_string();
        self.bundle.as_mut().ok_or(SessionError::InvalidTransition {
            operation: operation.to_string(),
            state,
        })
    }

    /// Begin a conversation, or continue a stored one when `resume_id` is given.
    pub fn start(
        &mut self,
        model: ModelRef,
        servers: Vec<String>,
        tools: Vec<String>,
        resume_id: Option<&str>,
    ) -> Result<String, SessionError> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("start"));
        }

        let bundle = match resume_id {
            Some(id) => {
                let store = self
                    .store
                    .as_ref()
                    .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
                let mut bundle = store.load(id)?;
                bundle.model = model;
                bundle.servers = servers;
                bundle.tools = tools;
                bundle
            }
            None => SessionBundle {
                id: new_session_id(),
                model,
                servers,
                tools,
                started_at: Utc::now(),
                messages: Vec::new(),
                usage: Vec::new(),
                counters: SessionCounters::default(),
            },
        };

        let id = bundle.id.clone();
        tracing::debug!(session = %id, model = %bundle.model.display_name(), resumed = resume_id.is_some(), "Session started");
        self.bundle = Some(bundle);
        self.state = SessionState::Active;
        Ok(id)
    }

    /// Append a message and keep the counters in step.
    pub fn push(&mut self, message: ChatMessage) -> Result<usize, SessionError> {
        let bundle = self.active_bundle("add a message")?;
        bundle.messages.push(message);
        bundle.counters = SessionCounters::from_messages(&bundle.messages);
        Ok(bundle.messages.len() - 1)
    }

    /// Append a model reply produced by one round trip.
    pub fn push_assistant(
        &mut self,
        content: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<usize, SessionError> {
        let index = self.push(ChatMessage::assistant(content))?;
        let bundle = self.active_bundle("record usage")?;
        bundle.usage.push(TokenUsage {
            message_index: index,
            input_tokens,
            output_tokens,
        });
        Ok(index)
    }

    /// Park the conversation, handing the caller everything needed to resume.
    pub fn pause(&mut self) -> Result<SessionBundle, SessionError> {
        if self.state != SessionState::Active {
            return Err(self.invalid("pause"));
        }
        let bundle = self.bundle.take().ok_or_else(|| self.invalid("pause"))?;
        tracing::debug!(session = %bundle.id, "Session paused");
        self.state = SessionState::Paused;
        Ok(bundle)
    }

    /// Restore a bundle from [`pause`](Self::pause) exactly as it was.
    pub fn resume(&mut self, bundle: SessionBundle) -> Result<(), SessionError> {
        if self.state == SessionState::Active {
            return Err(self.invalid("resume"));
        }
        tracing::debug!(session = %bundle.id, "Session resumed");
        self.bundle = Some(bundle);
        self.state = SessionState::Active;
        Ok(())
    }

    /// Keep messages `[0, index)` and recount everything from what is left.
    pub fn rewind_to_index(&mut self, index: usize) -> Result<(), SessionError> {
        let bundle = self.active_bundle("rewind")?;
        let len = bundle.messages.len();
        if index > len {
            return Err(SessionError::IndexOutOfRange { index, len });
        }
        bundle.messages.truncate(index);
        bundle.usage.retain(|usage| usage.message_index < index);
        bundle.counters = SessionCounters::from_messages(&bundle.messages);
        tracing::debug!(session = %bundle.id, index, "Session rewound");
        Ok(())
    }

    /// Finish the conversation. Persists and returns metadata only when at
    /// least one model round trip happened.
    pub fn end(&mut self) -> Result<Option<SessionMetadata>, SessionError> {
        if self.state != SessionState::Active {
            return Err(self.invalid("end"));
        }
        let bundle = self.bundle.take().ok_or_else(|| self.invalid("end"))?;
        self.state = SessionState::Idle;

        if bundle.counters.round_trips == 0 {
            tracing::debug!(session = %bundle.id, "Session ended without round trips; not persisted");
            return Ok(None);
        }
        if let Some(store) = &self.store {
            store.save(&bundle)?;
        }
        Ok(Some(bundle.metadata(Utc::now())))
    }

    /// Drop the conversation from any state without persisting.
    pub fn discard(&mut self) {
        if let Some(bundle) = self.bundle.take() {
            tracing::debug!(session = %bundle.id, "Session discarded");
        }
        self.state = SessionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChatStore;
    use proptest::prelude::*;

    fn model() -> ModelRef {
        ModelRef::new("openai", "gpt-test")
    }

    fn started(store: Option<Arc<MemoryChatStore>>) -> SessionStateMachine {
        let mut machine = match store {
            Some(store) => SessionStateMachine::with_store(store),
            None => SessionStateMachine::new(),
        };
        machine
            .start(model(), vec!["files".into()], vec!["read".into()], None)
            .unwrap();
        machine
    }

    #[test]
    fn test_illegal_transitions() {
        let mut machine = SessionStateMachine::new();
        assert!(matches!(
            machine.pause(),
            Err(SessionError::InvalidTransition { .. })
        ));
        assert!(machine.end().is_err());
        assert!(machine.rewind_to_index(0).is_err());
        assert!(machine.push(ChatMessage::user("x")).is_err());

        machine.start(model(), Vec::new(), Vec::new(), None).unwrap();
        let err = machine
            .start(model(), Vec::new(), Vec::new(), None)
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                operation: "start".into(),
                state: "active".into()
            }
        );
    }

    #[test]
    fn test_end_without_round_trip_leaves_no_trace() {
        let store = Arc::new(MemoryChatStore::new());
        let mut machine = started(Some(Arc::clone(&store)));
        machine.push(ChatMessage::user("hello?")).unwrap();

        assert_eq!(machine.end().unwrap(), None);
        assert_eq!(machine.state(), SessionState::Idle);
        assert!(store.is_empty());
    }

    #[test]
    fn test_end_persists_after_round_trip() {
        let store = Arc::new(MemoryChatStore::new());
        let mut machine = started(Some(Arc::clone(&store)));
        machine.push(ChatMessage::user("list files")).unwrap();
        machine.push_assistant("calling tool", 100, 20).unwrap();
        machine.push(ChatMessage::tool("read", "a.txt", false)).unwrap();
        machine.push_assistant("done", 150, 10).unwrap();

        let metadata = machine.end().unwrap().unwrap();
        assert_eq!(metadata.round_trips, 2);
        assert_eq!(metadata.tool_use_count, 1);
        assert_eq!(metadata.total_tokens, 280);
        assert_eq!(store.load(&metadata.id).unwrap().messages.len(), 4);
    }

    #[test]
    fn test_resume_from_store() {
        let store = Arc::new(MemoryChatStore::new());
        let mut machine = started(Some(Arc::clone(&store)));
        machine.push(ChatMessage::user("q")).unwrap();
        machine.push_assistant("a", 1, 1).unwrap();
        let id = machine.end().unwrap().unwrap().id;

        let resumed = machine
            .start(model(), Vec::new(), Vec::new(), Some(&id))
            .unwrap();
        assert_eq!(resumed, id);
        assert_eq!(machine.messages().len(), 2);

        machine.discard();
        assert!(matches!(
            machine.start(model(), Vec::new(), Vec::new(), Some("chat-missing")),
            Err(SessionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_pause_resume_is_verbatim() {
        let mut machine = started(None);
        machine.push(ChatMessage::user("q")).unwrap();
        machine.push_assistant("a", 5, 6).unwrap();
        machine.push(ChatMessage::tool("ipc_status", "{}", true)).unwrap();

        let bundle = machine.pause().unwrap();
        assert_eq!(machine.state(), SessionState::Paused);
        assert!(machine.messages().is_empty());

        let snapshot = bundle.clone();
        machine.resume(bundle).unwrap();
        assert_eq!(machine.state(), SessionState::Active);
        assert_eq!(machine.messages(), snapshot.messages.as_slice());
        assert_eq!(machine.counters(), snapshot.counters);
        assert_eq!(machine.total_tokens(), 11);
    }

    #[test]
    fn test_rewind_recounts() {
        let mut machine = started(None);
        machine.push(ChatMessage::user("q")).unwrap(); // 0
        machine.push_assistant("call", 10, 1).unwrap(); // 1
        machine.push(ChatMessage::tool("read", "x", false)).unwrap(); // 2
        machine.push(ChatMessage::tool("ipc", "y", true)).unwrap(); // 3
        machine.push_assistant("more", 20, 2).unwrap(); // 4
        machine.push(ChatMessage::tool("write", "z", false)).unwrap(); // 5

        machine.rewind_to_index(4).unwrap();
        assert_eq!(
            machine.counters(),
            SessionCounters {
                tool_use_count: 1,
                ipc_call_count: 1,
                round_trips: 1
            }
        );
        assert_eq!(machine.total_tokens(), 11);

        assert_eq!(
            machine.rewind_to_index(9),
            Err(SessionError::IndexOutOfRange { index: 9, len: 4 })
        );
    }

    fn message_strategy() -> impl Strategy<Value = ChatMessage> {
        prop_oneof![
            Just(ChatMessage::user("u")),
            Just(ChatMessage::assistant("a")),
            any::<bool>().prop_map(|ipc| ChatMessage::tool("t", "r", ipc)),
        ]
    }

    proptest! {
        #[test]
        fn prop_rewind_tool_count_matches_retained_slice(
            messages in prop::collection::vec(message_strategy(), 0..40),
            cut in 0usize..40,
        ) {
            let mut machine = started(None);
            for message in &messages {
                machine.push(message.clone()).unwrap();
            }
            let k = cut.min(messages.len());
            machine.rewind_to_index(k).unwrap();

            let expected = messages[..k]
                .iter()
                .filter(|m| m.role == crate::message::Role::Tool && !m.is_ipc)
                .count();
            prop_assert_eq!(machine.counters().tool_use_count, expected);
            prop_assert_eq!(machine.messages().len(), k);
        }
    }
}
