// Per-type signal channel: ordered callback and handler lists with fault isolation

use super::signal::{same_subscriber, Callback, Signal, SignalHandler};
use super::tracker::PerformanceTracker;
use crate::error::CoreError;
use crate::utility::short_type_name_of;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Arc;

/// Presentation metadata for a channel (debug views, reports)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub category: String,
    pub description: String,
    /// Hex color, e.g. "#FFFFFF"
    pub color: String,
}

impl ChannelInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: "General".to_string(),
            description: String::new(),
            color: "#FFFFFF".to_string(),
        }
    }

    /// Metadata for a channel created on demand by the bus
    pub fn runtime<S: Signal>() -> Self {
        let signal = short_type_name_of::<S>();
        Self {
            name: format!("{}Channel", signal),
            category: "Runtime".to_string(),
            description: format!("Runtime channel for {} signals", signal),
            color: "#FFFFFF".to_string(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}

/// Capabilities shared by every channel regardless of its signal type
pub trait ErasedChannel: Send + Sync {
    fn signal_type(&self) -> TypeId;
    fn signal_name(&self) -> &'static str;
    fn info(&self) -> &ChannelInfo;
    fn subscriber_count(&self) -> usize;

    /// Drop every subscriber
    fn clear(&self);

    /// Emit a value whose type is only known at runtime. A value of the wrong
    /// type is logged and delivered to nobody.
    fn emit_erased(&self, signal: &dyn Any, origin: Option<&'static Location<'static>>) -> usize;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Mailbox for one signal type
pub struct SignalChannel<S: Signal> {
    info: ChannelInfo,
    callbacks: RwLock<Vec<Callback<S>>>,
    handlers: RwLock<Vec<Arc<dyn SignalHandler<S>>>>,
    tracker: Arc<PerformanceTracker>,
}

impl<S: Signal> SignalChannel<S> {
    pub fn new(info: ChannelInfo, tracker: Arc<PerformanceTracker>) -> Self {
        Self {
            info,
            callbacks: RwLock::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
            tracker,
        }
    }

    // === Subscription ===

    /// Add a callback; already-subscribed callbacks are ignored
    pub fn subscribe(&self, callback: Callback<S>) -> bool {
        let mut callbacks = self.callbacks.write();
        if callbacks.iter().any(|existing| same_subscriber(existing, &callback)) {
            return false;
        }
        callbacks.push(callback);
        true
    }

    pub fn unsubscribe(&self, callback: &Callback<S>) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|existing| !same_subscriber(existing, callback));
        callbacks.len() != before
    }

    /// Add a handler object; already-subscribed handlers are ignored
    pub fn subscribe_handler(&self, handler: Arc<dyn SignalHandler<S>>) -> bool {
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|existing| same_subscriber(existing, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    pub fn unsubscribe_handler(&self, handler: &Arc<dyn SignalHandler<S>>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|existing| !same_subscriber(existing, handler));
        handlers.len() != before
    }

    /// Take over another channel's subscribers (appended after our own)
    pub fn adopt_subscribers(&self, other: &SignalChannel<S>) {
        for callback in other.callbacks.read().iter() {
            self.subscribe(Arc::clone(callback));
        }
        for handler in other.handlers.read().iter() {
            self.subscribe_handler(Arc::clone(handler));
        }
    }

    // === Emission ===

    /// Deliver `signal` to every callback, then every handler, in subscription
    /// order. Returns the number of subscribers notified, including any that
    /// faulted.
    #[track_caller]
    pub fn emit(&self, signal: &S) -> usize {
        self.dispatch(signal, Some(Location::caller()))
    }

    pub(crate) fn dispatch(&self, signal: &S, origin: Option<&'static Location<'static>>) -> usize {
        let token = self.tracker.begin_emission(origin);

        // Snapshot so subscribers can (un)subscribe or emit while we iterate
        let callbacks: Vec<Callback<S>> = self.callbacks.read().clone();
        let handlers: Vec<Arc<dyn SignalHandler<S>>> = self.handlers.read().clone();

        for callback in &callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(signal))) {
                tracing::error!(
                    channel = %self.info.name,
                    "signal callback for {} panicked: {}",
                    self.signal_name(),
                    panic_message(payload.as_ref())
                );
            }
        }

        for handler in &handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.on_signal(signal))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(
                        channel = %self.info.name,
                        "signal handler for {} failed: {:#}",
                        self.signal_name(),
                        err
                    );
                }
                Err(payload) => {
                    tracing::error!(
                        channel = %self.info.name,
                        "signal handler for {} panicked: {}",
                        self.signal_name(),
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        let notified = callbacks.len() + handlers.len();
        self.tracker
            .end_emission(token, TypeId::of::<S>(), self.signal_name(), notified);
        notified
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl<S: Signal + Default> SignalChannel<S> {
    /// Emit a default-constructed signal
    #[track_caller]
    pub fn emit_empty(&self) -> usize {
        self.dispatch(&S::default(), Some(Location::caller()))
    }
}

impl<S: Signal> ErasedChannel for SignalChannel<S> {
    fn signal_type(&self) -> TypeId {
        TypeId::of::<S>()
    }

    fn signal_name(&self) -> &'static str {
        short_type_name_of::<S>()
    }

    fn info(&self) -> &ChannelInfo {
        &self.info
    }

    fn subscriber_count(&self) -> usize {
        self.callback_count() + self.handler_count()
    }

    fn clear(&self) {
        self.callbacks.write().clear();
        self.handlers.write().clear();
    }

    fn emit_erased(&self, signal: &dyn Any, origin: Option<&'static Location<'static>>) -> usize {
        match signal.downcast_ref::<S>() {
            Some(typed) => self.dispatch(typed, origin),
            None => {
                let err = CoreError::SignalTypeMismatch {
                    expected: short_type_name_of::<S>(),
                    actual: "<unknown>",
                };
                tracing::error!(channel = %self.info.name, "{}", err);
                0
            }
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Best-effort text of a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
