// Signal bus: one channel per signal type, created on demand
//
// Channels live in a DashMap keyed by TypeId. The map guard is never held while
// subscribers run, so callbacks may emit, subscribe or even reset the bus.

use super::channel::{ChannelInfo, ErasedChannel, SignalChannel};
use super::signal::{AnySignal, Callback, Signal, SignalEmitter, SignalHandler};
use super::tracker::PerformanceTracker;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::services::ServiceRegistry;
use crate::utility::short_type_name_of;
use crossbeam_queue::SegQueue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::TypeId;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Signal queued from another thread, delivered on the next flush
struct QueuedSignal {
    signal: Box<dyn AnySignal>,
    origin: &'static Location<'static>,
}

pub struct SignalBus {
    channels: DashMap<TypeId, Arc<dyn ErasedChannel>>,
    queued: SegQueue<QueuedSignal>,
    tracker: Arc<PerformanceTracker>,
    log_signals: AtomicBool,
}

impl SignalBus {
    pub fn new(config: &CoreConfig) -> Self {
        let tracker = Arc::new(PerformanceTracker::new(config.tracker.clone()));
        tracker.set_enabled(config.bus.tracking_enabled);
        Self {
            channels: DashMap::new(),
            queued: SegQueue::new(),
            tracker,
            log_signals: AtomicBool::new(config.bus.log_signals),
        }
    }

    /// Publish this bus to the registry under `SignalBus` and `dyn SignalEmitter`
    pub fn register_services(self: &Arc<Self>, registry: &ServiceRegistry) {
        registry.register::<SignalBus>(Arc::clone(self), true);
        let emitter: Arc<dyn SignalEmitter> = Arc::clone(self) as Arc<dyn SignalEmitter>;
        registry.register::<dyn SignalEmitter>(emitter, true);
        tracing::debug!("signal bus registered with service registry");
    }

    // === Channels ===

    /// Typed channel lookup, optionally creating it
    pub fn channel<S: Signal>(&self, create_if_missing: bool) -> Option<Arc<SignalChannel<S>>> {
        let type_id = TypeId::of::<S>();
        let erased = if create_if_missing {
            self.channels
                .entry(type_id)
                .or_insert_with(|| {
                    tracing::debug!("created runtime channel for {}", short_type_name_of::<S>());
                    Arc::new(SignalChannel::<S>::new(
                        ChannelInfo::runtime::<S>(),
                        Arc::clone(&self.tracker),
                    ))
                })
                .value()
                .clone()
        } else {
            self.channels.get(&type_id)?.value().clone()
        };
        downcast_channel::<S>(erased)
    }

    /// Pre-register a channel with metadata.
    ///
    /// If `S` already has a channel it is kept (and returned) unless
    /// `override_existing` is set, in which case the new channel replaces it and
    /// inherits its subscribers.
    pub fn register_channel<S: Signal>(
        &self,
        info: ChannelInfo,
        override_existing: bool,
    ) -> Option<Arc<SignalChannel<S>>> {
        let erased = match self.channels.entry(TypeId::of::<S>()) {
            Entry::Occupied(mut entry) => {
                if override_existing {
                    let replacement = Arc::new(SignalChannel::<S>::new(info, Arc::clone(&self.tracker)));
                    if let Some(previous) = downcast_channel::<S>(Arc::clone(entry.get())) {
                        replacement.adopt_subscribers(&previous);
                    }
                    tracing::debug!("replaced channel for {}", short_type_name_of::<S>());
                    entry.insert(replacement.clone());
                    replacement as Arc<dyn ErasedChannel>
                } else {
                    tracing::warn!(
                        "channel for {} already registered ({}), keeping the original",
                        short_type_name_of::<S>(),
                        entry.get().info().name
                    );
                    Arc::clone(entry.get())
                }
            }
            Entry::Vacant(entry) => {
                let channel: Arc<dyn ErasedChannel> =
                    Arc::new(SignalChannel::<S>::new(info, Arc::clone(&self.tracker)));
                entry.insert(Arc::clone(&channel));
                channel
            }
        };
        downcast_channel::<S>(erased)
    }

    pub fn has_channel<S: Signal>(&self) -> bool {
        self.channels.contains_key(&TypeId::of::<S>())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Metadata of every live channel, sorted by name
    pub fn channel_infos(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<ChannelInfo> =
            self.channels.iter().map(|entry| entry.value().info().clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn subscriber_count<S: Signal>(&self) -> usize {
        self.channels
            .get(&TypeId::of::<S>())
            .map(|entry| entry.value().subscriber_count())
            .unwrap_or(0)
    }

    // === Emission ===

    /// Emit `signal` to every subscriber of its type. Never fails: an unknown
    /// type gets a fresh (empty) channel.
    #[track_caller]
    pub fn emit<S: Signal>(&self, signal: S) -> usize {
        self.emit_at(&signal, Location::caller())
    }

    #[track_caller]
    pub fn emit_ref<S: Signal>(&self, signal: &S) -> usize {
        self.emit_at(signal, Location::caller())
    }

    /// Emit a default-constructed `S`
    #[track_caller]
    pub fn emit_empty<S: Signal + Default>(&self) -> usize {
        self.emit_at(&S::default(), Location::caller())
    }

    fn emit_at<S: Signal>(&self, signal: &S, origin: &'static Location<'static>) -> usize {
        if self.log_signals.load(Ordering::Relaxed) {
            tracing::debug!(origin = %origin, "emit {}", short_type_name_of::<S>());
        }
        match self.channel::<S>(true) {
            Some(channel) => channel.dispatch(signal, Some(origin)),
            None => 0,
        }
    }

    /// Emit a signal whose type is only known at runtime
    #[track_caller]
    pub fn emit_any(&self, signal: &dyn AnySignal) -> usize {
        self.emit_any_at(signal, Location::caller())
    }

    fn emit_any_at(&self, signal: &dyn AnySignal, origin: &'static Location<'static>) -> usize {
        if self.log_signals.load(Ordering::Relaxed) {
            tracing::debug!(origin = %origin, "emit {}", signal.signal_name());
        }
        let channel = self
            .channels
            .entry(signal.signal_type())
            .or_insert_with(|| signal.create_channel(&self.tracker))
            .value()
            .clone();
        channel.emit_erased(signal.as_any(), Some(origin))
    }

    /// Queue a signal for delivery on the next `flush_queued`. Safe to call from
    /// any thread.
    #[track_caller]
    pub fn enqueue<S: Signal>(&self, signal: S) {
        self.queued.push(QueuedSignal {
            signal: Box::new(signal),
            origin: Location::caller(),
        });
    }

    /// Deliver every queued signal in FIFO order. Signals queued by subscribers
    /// during the flush wait for the next one.
    pub fn flush_queued(&self) -> usize {
        let pending = self.queued.len();
        let mut delivered = 0;
        for _ in 0..pending {
            let Some(queued) = self.queued.pop() else {
                break;
            };
            self.emit_any_at(queued.signal.as_ref(), queued.origin);
            delivered += 1;
        }
        delivered
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    // === Subscription ===

    pub fn subscribe<S: Signal>(&self, callback: Callback<S>) -> bool {
        self.subscribe_with(callback, true)
    }

    /// Subscribe a callback. With `create_if_missing == false` and no channel
    /// for `S`, nothing happens.
    pub fn subscribe_with<S: Signal>(&self, callback: Callback<S>, create_if_missing: bool) -> bool {
        match self.channel::<S>(create_if_missing) {
            Some(channel) => channel.subscribe(callback),
            None => false,
        }
    }

    pub fn unsubscribe<S: Signal>(&self, callback: &Callback<S>) -> bool {
        match self.channel::<S>(false) {
            Some(channel) => channel.unsubscribe(callback),
            None => false,
        }
    }

    pub fn subscribe_handler<S: Signal>(&self, handler: Arc<dyn SignalHandler<S>>) -> bool {
        self.subscribe_handler_with(handler, true)
    }

    pub fn subscribe_handler_with<S: Signal>(
        &self,
        handler: Arc<dyn SignalHandler<S>>,
        create_if_missing: bool,
    ) -> bool {
        match self.channel::<S>(create_if_missing) {
            Some(channel) => channel.subscribe_handler(handler),
            None => false,
        }
    }

    pub fn unsubscribe_handler<S: Signal>(&self, handler: &Arc<dyn SignalHandler<S>>) -> bool {
        match self.channel::<S>(false) {
            Some(channel) => channel.unsubscribe_handler(handler),
            None => false,
        }
    }

    // === Lifecycle / instrumentation ===

    /// Drop every channel, subscriber and queued signal; zero the tracker
    pub fn reset(&self) {
        for entry in self.channels.iter() {
            entry.value().clear();
        }
        self.channels.clear();
        while self.queued.pop().is_some() {}
        self.tracker.reset();
        tracing::debug!("signal bus reset");
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn set_tracking_enabled(&self, enabled: bool) {
        self.tracker.set_enabled(enabled);
    }

    pub fn set_log_signals(&self, enabled: bool) {
        self.log_signals.store(enabled, Ordering::Relaxed);
    }

    pub fn advance_frame(&self) -> u64 {
        self.tracker.advance_frame()
    }

    pub fn generate_report(&self, detailed: bool) -> String {
        self.tracker.generate_report(detailed)
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(&CoreConfig::default())
    }
}

impl SignalEmitter for SignalBus {
    fn emit_signal_at(&self, signal: &dyn AnySignal, origin: &'static Location<'static>) -> usize {
        self.emit_any_at(signal, origin)
    }
}

fn downcast_channel<S: Signal>(erased: Arc<dyn ErasedChannel>) -> Option<Arc<SignalChannel<S>>> {
    let name = erased.signal_name();
    match erased.into_any().downcast::<SignalChannel<S>>() {
        Ok(channel) => Some(channel),
        Err(_) => {
            let err = CoreError::SignalTypeMismatch {
                expected: short_type_name_of::<S>(),
                actual: name,
            };
            tracing::error!("{}", err);
            None
        }
    }
}
