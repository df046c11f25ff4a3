// Typed publish/subscribe signal bus
//
// Architecture:
// - SignalChannel<S>: ordered callbacks + handlers for one signal type
// - SignalBus: TypeId -> channel registry, channels created on demand
// - PerformanceTracker: brackets every emission, per-type aggregates + recent ring

mod bus;
mod channel;
pub mod common;
mod signal;
mod tracker;

pub use bus::SignalBus;
pub use channel::{ChannelInfo, ErasedChannel, SignalChannel};
pub use signal::{callback, AnySignal, Callback, Signal, SignalEmitter, SignalHandler};
pub use tracker::{EmissionRecord, EmissionToken, PerformanceTracker, SignalStats};
