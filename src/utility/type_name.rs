// Small helpers for naming types in logs and downcasting trait objects

use std::any::Any;
use std::time::{SystemTime, UNIX_EPOCH};

/// Upcast to `dyn Any` through a trait object's vtable.
///
/// Blanket-implemented for every `'static` type, so any trait that lists it as a
/// supertrait can be downcast back to its concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Strip the module path (and generic arguments) from a full type name.
/// `game::combat::Damaged` -> `Damaged`
pub fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Short name of `T`
pub fn short_type_name_of<T: ?Sized>() -> &'static str {
    short_type_name(std::any::type_name::<T>())
}

/// Milliseconds since the Unix epoch (0 if the clock is before it)
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
