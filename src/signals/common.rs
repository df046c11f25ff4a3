// Engine-lifecycle signals shared by every game built on the bus

use super::signal::{Signal, SignalHandler};
use serde::{Deserialize, Serialize};

// === Lifecycle ===

/// Core systems are up and the first scene may start
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameReady;
impl Signal for GameReady {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneLoadStarted {
    pub scene_name: String,
    pub estimated_load_time: f32,
}
impl Signal for SceneLoadStarted {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneLoadCompleted {
    pub scene_name: String,
    pub actual_load_time: f32,
}
impl Signal for SceneLoadCompleted {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GamePaused {
    pub is_paused: bool,
}
impl Signal for GamePaused {}

// === State machines ===

/// Published by gameplay code that wants other systems to observe an owner's
/// state machine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateChanged {
    pub owner: String,
    pub previous_state: Option<String>,
    pub current_state: String,
    /// Seconds spent in the previous state
    pub state_time: f32,
}
impl Signal for StateChanged {}

// === Debug ===

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// Log line routed through the bus so any system can surface it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogDebugEvent {
    pub category: String,
    pub message: String,
    pub level: LogLevel,
}
impl Signal for LogDebugEvent {}

/// Forwards `LogDebugEvent` signals to `tracing`
pub struct DebugLogForwarder;

impl SignalHandler<LogDebugEvent> for DebugLogForwarder {
    fn on_signal(&self, signal: &LogDebugEvent) -> anyhow::Result<()> {
        match signal.level {
            LogLevel::Info => tracing::info!(category = %signal.category, "{}", signal.message),
            LogLevel::Warning => tracing::warn!(category = %signal.category, "{}", signal.message),
            LogLevel::Error => tracing::error!(category = %signal.category, "{}", signal.message),
        }
        Ok(())
    }
}
