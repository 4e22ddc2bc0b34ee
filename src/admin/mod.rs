//! Administrative operations over both VPN stacks and the outcome taxonomy
//! they report.

mod error;
mod orchestrator;

pub use error::AdminError;
pub use orchestrator::{CREDENTIALS_LOCK, LifecycleOrchestrator, PROFILES_LOCK};
