//! Hook engine: runs `@tool` directives before or after matching tool calls.
//!
//! Hooks fire in definition order (top-level hooks, then phase-local hooks)
//! and every matching hook fires. Tool calls made by a hook never trigger
//! hooks themselves.

pub mod engine;
pub mod matcher;

pub use engine::{HookEngine, HookFiring};
pub use matcher::submatch;
