//! Class Instrumentation Layer

pub mod config;
pub mod interceptors;
pub mod loader;

pub use config::{InstrumentationConfiguration, InstrumentationConfigurationBuilder};
pub use interceptors::Interceptors;
pub use loader::{InstrumentedClass, InstrumentingClassLoader, MethodSlot, ResolvedMethod, Routing};
