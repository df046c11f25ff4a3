// Signal marker trait, subscriber types and the erased views used by the bus

use super::channel::{ChannelInfo, ErasedChannel, SignalChannel};
use super::tracker::PerformanceTracker;
use crate::utility::short_type_name_of;
use std::any::{Any, TypeId};
use std::panic::Location;
use std::sync::Arc;

/// Marker for values that can travel over the bus.
///
/// The concrete type is the routing key: every `Damaged` emission reaches the
/// `Damaged` channel and nothing else.
///
/// ```
/// use gamecore::Signal;
///
/// #[derive(Debug, Default)]
/// struct Damaged { amount: i32 }
/// impl Signal for Damaged {}
/// ```
pub trait Signal: Any + Send + Sync {}

/// Closure subscriber. Identity is the `Arc` allocation, so keep a clone around
/// to unsubscribe later.
pub type Callback<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// Wrap a closure as a [`Callback`]
pub fn callback<S, F>(f: F) -> Callback<S>
where
    S: Signal,
    F: Fn(&S) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Object subscriber. Returning `Err` is logged by the channel and does not stop
/// delivery to the remaining subscribers.
pub trait SignalHandler<S: Signal>: Send + Sync {
    fn on_signal(&self, signal: &S) -> anyhow::Result<()>;
}

/// Type-erased view of a signal value
pub trait AnySignal: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn signal_type(&self) -> TypeId;
    fn signal_name(&self) -> &'static str;

    /// Build an empty channel for this signal's concrete type
    fn create_channel(&self, tracker: &Arc<PerformanceTracker>) -> Arc<dyn ErasedChannel>;
}

impl<S: Signal> AnySignal for S {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn signal_type(&self) -> TypeId {
        TypeId::of::<S>()
    }

    fn signal_name(&self) -> &'static str {
        short_type_name_of::<S>()
    }

    fn create_channel(&self, tracker: &Arc<PerformanceTracker>) -> Arc<dyn ErasedChannel> {
        Arc::new(SignalChannel::<S>::new(ChannelInfo::runtime::<S>(), Arc::clone(tracker)))
    }
}

/// Emission capability published to the service registry, so code can emit
/// without naming the concrete bus type.
pub trait SignalEmitter: Send + Sync {
    /// Emit an erased signal on behalf of the call at `origin`; returns the
    /// number of subscribers notified
    fn emit_signal_at(&self, signal: &dyn AnySignal, origin: &'static Location<'static>) -> usize;

    #[track_caller]
    fn emit_signal(&self, signal: &dyn AnySignal) -> usize {
        self.emit_signal_at(signal, Location::caller())
    }
}

impl dyn SignalEmitter {
    #[track_caller]
    pub fn emit<S: Signal>(&self, signal: S) -> usize {
        self.emit_signal_at(&signal, Location::caller())
    }
}

/// Pointer identity of two subscriber handles (ignores vtable metadata)
pub(crate) fn same_subscriber<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
