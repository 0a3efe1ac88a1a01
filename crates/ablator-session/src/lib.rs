//! Conversation sessions
//!
//! [`SessionStateMachine`] owns the message log of one model conversation and
//! its derived counters. Sessions can be parked with [`SessionStateMachine::pause`]
//! and restored verbatim, rewound to an earlier message, and persisted through a
//! [`ChatStore`] once at least one model round trip happened.

pub mod machine;
pub mod message;
pub mod store;

pub use machine::{SessionState, SessionStateMachine};
pub use message::{ChatMessage, Role, SessionBundle, SessionCounters, SessionMetadata, TokenUsage};
pub use store::{ChatStore, FileChatStore, MemoryChatStore};
