//! Engine-agnostic game systems: a typed signal bus with emission tracking,
//! and a state machine framework with timed, cancellable transitions.

macro_rules! debug_log {
    ($($arg:tt)*) => {
        if cfg!(feature = "debug_logs") {
            tracing::debug!($($arg)*);
        }
    };
}

pub mod config;  // Centralized configuration constants + loadable CoreConfig
pub mod context;  // Process-wide context (registry + bus lifecycle)
pub mod error;
pub mod fsm;  // State machines (enhanced + basic)
pub mod services;  // Typed service registry
pub mod signals;  // Signal bus, channels, performance tracker
pub mod storage;
pub mod utility;

pub use config::{BusConfig, CoreConfig, MachineConfig, MachineFlags, TrackerConfig};
pub use context::CoreContext;
pub use error::{ConfigError, CoreError, CoreResult};
pub use fsm::{
    BasicStateMachine, CancellationToken, MachineEvent, SimpleState, State, StateContext,
    StateInfo, StateMachine, TransitionData, TransitionRecord, TransitionStatus,
};
pub use services::ServiceRegistry;
pub use signals::{
    AnySignal, Callback, ChannelInfo, PerformanceTracker, Signal, SignalBus, SignalChannel,
    SignalEmitter, SignalHandler,
};
