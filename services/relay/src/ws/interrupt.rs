//! Barge-in state for one session.
//!
//! The client pump is the only writer and the upstream pump the only reader,
//! so the state is kept in a single atomic flag.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptState {
    Active,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptEvent {
    /// The client sent `interrupt`.
    InterruptReceived,
    /// The client sent `audio`.
    AudioReceived,
}

/// What the caller must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Tell the client its interrupt was processed.
    Acknowledge,
    /// Output was suppressed and is now forwarded again.
    Resumed,
    Unchanged,
}

impl InterruptState {
    pub fn next(self, event: InterruptEvent) -> (InterruptState, Transition) {
        match (self, event) {
            // A repeated interrupt is acknowledged again.
            (_, InterruptEvent::InterruptReceived) => {
                (InterruptState::Interrupted, Transition::Acknowledge)
            }
            (InterruptState::Interrupted, InterruptEvent::AudioReceived) => {
                (InterruptState::Active, Transition::Resumed)
            }
            (InterruptState::Active, InterruptEvent::AudioReceived) => {
                (InterruptState::Active, Transition::Unchanged)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct InterruptController {
    interrupted: AtomicBool,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> InterruptState {
        if self.interrupted.load(Ordering::Acquire) {
            InterruptState::Interrupted
        } else {
            InterruptState::Active
        }
    }

    pub fn apply(&self, event: InterruptEvent) -> Transition {
        let (next, transition) = self.state().next(event);
        self.interrupted
            .store(next == InterruptState::Interrupted, Ordering::Release);
        transition
    }

    /// Whether generated output for the current turn reaches the client.
    pub fn should_forward(&self) -> bool {
        self.state() == InterruptState::Active
    }
}
