// Basic state machine: caller-owned state values, no timing, fixed history ring

use crate::config::fsm::{BASIC_HISTORY_CAPACITY, MANUAL_TRIGGER, NO_STATE};
use crate::storage::RingBuffer;
use crate::utility::current_timestamp_ms;
use serde::Serialize;

/// State for [`BasicStateMachine`]
pub trait SimpleState {
    fn name(&self) -> &str;
    fn on_enter(&mut self) {}
    fn on_exit(&mut self) {}
    fn tick(&mut self, _dt: f32) {}
}

impl<T: SimpleState + ?Sized> SimpleState for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn on_enter(&mut self) {
        (**self).on_enter()
    }

    fn on_exit(&mut self) {
        (**self).on_exit()
    }

    fn tick(&mut self, dt: f32) {
        (**self).tick(dt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasicTransitionRecord {
    pub timestamp_ms: u64,
    pub from: String,
    pub to: String,
    pub trigger: String,
}

pub struct BasicStateMachine<S: SimpleState> {
    current: Option<S>,
    previous: Option<S>,
    history: RingBuffer<BasicTransitionRecord>,
}

impl<S: SimpleState> BasicStateMachine<S> {
    pub fn new() -> Self {
        Self {
            current: None,
            previous: None,
            history: RingBuffer::new(BASIC_HISTORY_CAPACITY),
        }
    }

    /// Exit the current state, enter `state`, and record the change with `trigger`.
    /// Setting the first state is recorded too, from `<None>`.
    pub fn set_state(&mut self, mut state: S, trigger: &str) {
        let from = match self.current.as_mut() {
            Some(current) => {
                current.on_exit();
                current.name().to_string()
            }
            None => NO_STATE.to_string(),
        };
        let to = state.name().to_string();

        state.on_enter();
        self.previous = self.current.replace(state);

        tracing::trace!(trigger, "{} -> {}", from, to);
        self.history.push(BasicTransitionRecord {
            timestamp_ms: current_timestamp_ms(),
            from,
            to,
            trigger: trigger.to_string(),
        });
    }

    pub fn set_state_manual(&mut self, state: S) {
        self.set_state(state, MANUAL_TRIGGER);
    }

    pub fn tick(&mut self, dt: f32) {
        if let Some(current) = self.current.as_mut() {
            current.tick(dt);
        }
    }

    pub fn current(&self) -> Option<&S> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut S> {
        self.current.as_mut()
    }

    pub fn previous(&self) -> Option<&S> {
        self.previous.as_ref()
    }

    pub fn current_state_name(&self) -> Option<&str> {
        self.current.as_ref().map(|state| state.name())
    }

    /// Oldest first, at most 32 entries
    pub fn history(&self) -> Vec<BasicTransitionRecord> {
        self.history.to_vec()
    }
}

impl<S: SimpleState> Default for BasicStateMachine<S> {
    fn default() -> Self {
        Self::new()
    }
}
