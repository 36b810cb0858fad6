pub mod registry;
pub mod types;

pub use registry::LazyLoader;
pub use types::{LoadError, ModuleState, ModuleValue};
