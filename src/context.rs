// Process-wide context: owns the service registry and the signal bus
//
// Hosts either keep a CoreContext themselves or park one in the global slot.
// Lifecycle: new -> begin_frame (every frame) -> on_scene_unloaded -> shutdown.

use crate::config::CoreConfig;
use crate::services::ServiceRegistry;
use crate::signals::common::{DebugLogForwarder, LogDebugEvent};
use crate::signals::{SignalBus, SignalHandler};
use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use std::sync::Arc;

pub struct CoreContext {
    config: CoreConfig,
    services: Arc<ServiceRegistry>,
    bus: Arc<SignalBus>,
}

impl CoreContext {
    pub fn new(config: CoreConfig) -> Self {
        let services = Arc::new(ServiceRegistry::new());
        let bus = Arc::new(SignalBus::new(&config));
        bus.register_services(&services);
        Self::install_debug_forwarder(&bus);

        tracing::info!(
            tracking = config.bus.tracking_enabled,
            log_signals = config.bus.log_signals,
            "core context initialized"
        );
        Self { config, services, bus }
    }

    fn install_debug_forwarder(bus: &SignalBus) {
        let forwarder: Arc<dyn SignalHandler<LogDebugEvent>> = Arc::new(DebugLogForwarder);
        bus.subscribe_handler(forwarder);
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<SignalBus> {
        &self.bus
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Call once per frame before gameplay: bumps the tracker frame and
    /// delivers signals enqueued from other threads. Returns the delivered count.
    pub fn begin_frame(&self) -> usize {
        self.bus.advance_frame();
        self.bus.flush_queued()
    }

    /// Drops every channel and subscriber; the debug forwarder is reinstalled
    pub fn on_scene_unloaded(&self) {
        self.bus.reset();
        Self::install_debug_forwarder(&self.bus);
        tracing::debug!("scene unloaded, signal bus cleared");
    }

    pub fn shutdown(&self) {
        self.bus.reset();
        self.services.reset();
        tracing::info!("core context shut down");
    }
}

impl Default for CoreContext {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

// === Global slot ===

static GLOBAL_CONTEXT: Lazy<ArcSwapOption<CoreContext>> = Lazy::new(ArcSwapOption::empty);

/// Install the global context. A second call keeps the first context.
pub fn init_global(config: CoreConfig) -> Arc<CoreContext> {
    if let Some(existing) = GLOBAL_CONTEXT.load_full() {
        tracing::warn!("global core context already initialized, keeping existing");
        return existing;
    }
    let context = Arc::new(CoreContext::new(config));
    let previous = GLOBAL_CONTEXT.compare_and_swap(&None::<Arc<CoreContext>>, Some(Arc::clone(&context)));
    match &*previous {
        // Lost a race with another initializer
        Some(winner) => Arc::clone(winner),
        None => context,
    }
}

pub fn global() -> Option<Arc<CoreContext>> {
    GLOBAL_CONTEXT.load_full()
}

/// Shut down and clear the global context; false if none was installed
pub fn shutdown_global() -> bool {
    match GLOBAL_CONTEXT.swap(None) {
        Some(context) => {
            context.shutdown();
            true
        }
        None => false,
    }
}
