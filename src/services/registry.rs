// Typed service registry
// Lookup by type only; services are handed out as Arc clones

use crate::error::{CoreError, CoreResult};
use crate::utility::short_type_name_of;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

struct ServiceEntry {
    name: &'static str,
    /// Always an `Arc<T>` for the `T` this entry is keyed by
    instance: Box<dyn Any + Send + Sync>,
}

/// Thread-safe map from a service type (possibly a trait object) to its instance
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<TypeId, ServiceEntry>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `instance` as the provider of `T`.
    ///
    /// A second registration for the same `T` is ignored with a warning unless
    /// `override_existing` is set.
    pub fn register<T>(&self, instance: Arc<T>, override_existing: bool) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        let name = short_type_name_of::<T>();

        if !override_existing && self.services.contains_key(&type_id) {
            tracing::warn!("service {} already registered, keeping the original", name);
            return false;
        }

        self.services.insert(
            type_id,
            ServiceEntry {
                name,
                instance: Box::new(instance),
            },
        );
        tracing::debug!("registered service {}", name);
        true
    }

    /// Fetch the provider of `T`, failing loudly if none is registered
    pub fn get<T>(&self) -> CoreResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.try_get::<T>()
            .ok_or(CoreError::ServiceNotFound(short_type_name_of::<T>()))
    }

    pub fn try_get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let entry = self.services.get(&TypeId::of::<T>())?;
        entry.value().instance.downcast_ref::<Arc<T>>().cloned()
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn unregister<T: ?Sized + 'static>(&self) -> bool {
        self.services.remove(&TypeId::of::<T>()).is_some()
    }

    /// Drop every registration
    pub fn reset(&self) {
        self.services.clear();
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Names of registered service types, sorted
    pub fn service_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.services.iter().map(|e| e.value().name).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Clock: Send + Sync {
        fn now(&self) -> u64;
    }

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now(&self) -> u64 {
            self.0
        }
    }

    struct AudioMixer {
        volume: f32,
    }

    #[test]
    fn test_register_and_get() {
        let registry = ServiceRegistry::new();
        let mixer = Arc::new(AudioMixer { volume: 0.8 });
        assert!(registry.register(Arc::clone(&mixer), false));

        let found = registry.get::<AudioMixer>().unwrap();
        assert!(Arc::ptr_eq(&found, &mixer));
        assert_eq!(found.volume, 0.8);
        assert!(registry.contains::<AudioMixer>());
    }

    #[test]
    fn test_missing_service_fails_loudly() {
        let registry = ServiceRegistry::new();
        match registry.get::<AudioMixer>() {
            Err(CoreError::ServiceNotFound(name)) => assert_eq!(name, "AudioMixer"),
            other => panic!("expected ServiceNotFound, got {:?}", other.map(|_| ())),
        }
        assert!(registry.try_get::<AudioMixer>().is_none());
    }

    #[test]
    fn test_trait_object_services() {
        let registry = ServiceRegistry::new();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(42));
        registry.register::<dyn Clock>(clock, false);

        assert_eq!(registry.get::<dyn Clock>().unwrap().now(), 42);
        assert!(!registry.contains::<FixedClock>());
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(AudioMixer { volume: 0.1 }), false);
        assert!(!registry.register(Arc::new(AudioMixer { volume: 0.9 }), false));
        assert_eq!(registry.get::<AudioMixer>().unwrap().volume, 0.1);

        assert!(registry.register(Arc::new(AudioMixer { volume: 0.9 }), true));
        assert_eq!(registry.get::<AudioMixer>().unwrap().volume, 0.9);
    }

    #[test]
    fn test_unregister_and_reset() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(AudioMixer { volume: 1.0 }), false);
        registry.register::<dyn Clock>(Arc::new(FixedClock(1)), false);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.service_names(), vec!["AudioMixer", "Clock"]);

        assert!(registry.unregister::<AudioMixer>());
        assert!(!registry.unregister::<AudioMixer>());
        registry.reset();
        assert!(registry.is_empty());
    }
}
