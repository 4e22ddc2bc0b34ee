//! Serialization of mutating operations per resource class.

mod resource_lock;

pub use resource_lock::{ResourceGuard, ResourceLock};
