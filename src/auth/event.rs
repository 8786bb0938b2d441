use std::sync::atomic::{AtomicBool, Ordering};

use super::state::AuthState;

/// A state transition delivered to observers.
///
/// The state can always be inspected with [`peek`](Self::peek); [`take`](Self::take)
/// hands it out only once across every clone of the surrounding `Arc`, so
/// navigation-style reactions do not fire again when an observer re-subscribes
/// and receives the latest event a second time.
///
/// # Example
/// ```
/// use unchained::auth::{AuthState, StateEvent};
///
/// let event = StateEvent::new(1, AuthState::StartNewLogin);
/// assert_eq!(event.take(), Some(AuthState::StartNewLogin));
/// assert_eq!(event.take(), None);
/// assert_eq!(event.peek(), AuthState::StartNewLogin);
/// ```
#[derive(Debug)]
pub struct StateEvent {
    seq: u64,
    state: AuthState,
    consumed: AtomicBool,
}

impl StateEvent {
    pub fn new(seq: u64, state: AuthState) -> Self {
        Self {
            seq,
            state,
            consumed: AtomicBool::new(false),
        }
    }

    /// Monotonic transition counter; the initial state is `0`.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn peek(&self) -> AuthState {
        self.state
    }

    pub fn take(&self) -> Option<AuthState> {
        if self.consumed.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(self.state)
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }
}
