//! User abort detection and the force-stop countdown.
//!
//! ```text
//! Idle --flag set--> AbortDetected --> Counting --elapsed--> PromptShown --confirm--> Stopped
//!  ^                                      |                       |
//!  +------------- flag cleared -----------+<------- decline ------+
//! ```
//!
//! The abort flag is set from outside (Ctrl-C, a UI button). Every in-flight
//! call polls it with its own [`AbortMachine`]; only the confirmation prompt
//! is shared, through [`PromptMutex`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Externally settable abort request flag. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State of one call's abort machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortState {
    Idle,
    AbortDetected,
    Counting { since: Instant },
    PromptShown,
    Stopped,
}

impl fmt::Display for AbortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AbortDetected => write!(f, "abort_detected"),
            Self::Counting { .. } => write!(f, "counting"),
            Self::PromptShown => write!(f, "prompt_shown"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// What the poll loop should do after observing the flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortPoll {
    Wait,
    CountdownElapsed,
}

/// Per-call abort state machine.
#[derive(Debug)]
pub struct AbortMachine {
    state: AbortState,
    countdown: Duration,
}

impl AbortMachine {
    #[must_use]
    pub const fn new(countdown: Duration) -> Self {
        Self {
            state: AbortState::Idle,
            countdown,
        }
    }

    #[must_use]
    pub const fn state(&self) -> AbortState {
        self.state
    }

    fn transition(&mut self, next: AbortState) {
        tracing::debug!(from = %self.state, to = %next, "Abort machine transition");
        self.state = next;
    }

    /// Feed one poll observation of the abort flag.
    ///
    /// An elapsed countdown keeps reporting [`AbortPoll::CountdownElapsed`]
    /// without restarting, so a call waiting for the prompt mutex does not
    /// lose its place.
    pub fn observe(&mut self, aborted: bool, now: Instant) -> AbortPoll {
        match self.state {
            AbortState::Idle if aborted => {
                self.transition(AbortState::AbortDetected);
                self.transition(AbortState::Counting { since: now });
                AbortPoll::Wait
            }
            AbortState::AbortDetected | AbortState::Counting { .. } if !aborted => {
                self.transition(AbortState::Idle);
                AbortPoll::Wait
            }
            AbortState::Counting { since } if now.duration_since(since) >= self.countdown => {
                AbortPoll::CountdownElapsed
            }
            _ => AbortPoll::Wait,
        }
    }

    /// The flag was cleared while waiting for the prompt mutex.
    pub fn reset(&mut self) {
        self.transition(AbortState::Idle);
    }

    pub fn prompt_shown(&mut self) {
        self.transition(AbortState::PromptShown);
    }

    /// The user declined: start over, a fresh countdown begins on the next poll.
    pub fn declined(&mut self) {
        self.transition(AbortState::Idle);
    }

    pub fn stopped(&mut self) {
        self.transition(AbortState::Stopped);
    }
}

/// Process-wide mutex ensuring at most one force-stop prompt is visible.
///
/// Shared by every clone of the gate.
#[derive(Debug, Clone, Default)]
pub struct PromptMutex {
    lock: Arc<Mutex<()>>,
    holders: Arc<AtomicUsize>,
}

/// Held while a prompt is shown (or an internal call auto-stops).
#[derive(Debug)]
pub struct PromptGuard {
    _guard: OwnedMutexGuard<()>,
    holders: Arc<AtomicUsize>,
}

impl Drop for PromptGuard {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PromptMutex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the mutex if nobody holds it.
    #[must_use]
    pub fn try_acquire(&self) -> Option<PromptGuard> {
        let guard = Arc::clone(&self.lock).try_lock_owned().ok()?;
        self.holders.fetch_add(1, Ordering::SeqCst);
        Some(PromptGuard {
            _guard: guard,
            holders: Arc::clone(&self.holders),
        })
    }

    /// Current number of holders; never more than one.
    #[must_use]
    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::SeqCst)
    }
}
