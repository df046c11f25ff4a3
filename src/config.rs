/// Centralized configuration for the signal bus, tracker and state machines
///
/// Constants live in the per-subsystem modules below and are the defaults for
/// `CoreConfig`, which can also be loaded from JSON at startup.

use crate::error::ConfigError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Signal bus / tracker constants
pub mod signals {
    /// Recent emissions kept for the report
    pub const MAX_RECENT_SIGNALS: usize = 100;

    /// Emissions slower than this are flagged and logged (milliseconds)
    pub const SLOW_SIGNAL_THRESHOLD_MS: f64 = 1.0;

    /// Records listed at the end of a detailed report
    pub const REPORT_RECENT_COUNT: usize = 5;
}

/// State machine constants
pub mod fsm {
    /// Transition records kept by the enhanced machine
    pub const DEFAULT_HISTORY_CAPACITY: usize = 30;

    /// Transition records kept by the basic machine (fixed)
    pub const BASIC_HISTORY_CAPACITY: usize = 32;

    /// Deferred changes requested from hooks that may chain before we give up
    pub const MAX_CHAINED_TRANSITIONS: usize = 16;

    /// Placeholder name for "no state" in basic history records
    pub const NO_STATE: &str = "<None>";

    /// Trigger recorded by `BasicStateMachine::set_state_manual`
    pub const MANUAL_TRIGGER: &str = "Manual";
}

bitflags! {
    /// Optional state machine behaviors
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MachineFlags: u8 {
        /// Keep a ring of transition records
        const HISTORY = 1 << 0;
        /// Fire MachineEvent to listeners
        const TRANSITION_EVENTS = 1 << 1;
        /// Log every transition through debug_log!
        const VERBOSE = 1 << 2;
        /// Consult can_transition_to / can_be_interrupted_by
        const ENFORCE_GUARDS = 1 << 3;
    }
}

impl Default for MachineFlags {
    fn default() -> Self {
        MachineFlags::HISTORY | MachineFlags::TRANSITION_EVENTS
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub bus: BusConfig,
    pub tracker: TrackerConfig,
    pub machine: MachineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Debug-log every emission
    pub log_signals: bool,
    /// Start with the performance tracker enabled
    pub tracking_enabled: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_signals: false,
            tracking_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub max_recent_signals: usize,
    pub slow_signal_threshold_ms: f64,
    pub report_recent_count: usize,
    /// Record `file:line` of each emit call (debug builds by default)
    pub capture_call_origin: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_recent_signals: signals::MAX_RECENT_SIGNALS,
            slow_signal_threshold_ms: signals::SLOW_SIGNAL_THRESHOLD_MS,
            report_recent_count: signals::REPORT_RECENT_COUNT,
            capture_call_origin: cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub flags: MachineFlags,
    pub history_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            flags: MachineFlags::default(),
            history_capacity: fsm::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl MachineConfig {
    pub fn with_flags(mut self, flags: MachineFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

impl CoreConfig {
    /// Parse and validate a JSON document; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracker.max_recent_signals == 0 {
            return Err(ConfigError::Invalid("tracker.max_recent_signals must be > 0".into()));
        }
        let threshold = self.tracker.slow_signal_threshold_ms;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tracker.slow_signal_threshold_ms must be a non-negative number, got {}",
                threshold
            )));
        }
        if self.machine.flags.contains(MachineFlags::HISTORY) && self.machine.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "machine.history_capacity must be > 0 when history is enabled".into(),
            ));
        }
        Ok(())
    }
}
