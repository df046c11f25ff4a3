// Service registry: typed lookup the core publishes itself into

mod registry;

pub use registry::ServiceRegistry;
