//! Privileged command execution against the host.
//!
//! The control process runs inside a container without direct host access.
//! Commands reach the host either by exec into an already-running privileged
//! container, or by launching a short-lived privileged container that binds
//! host paths and joins the host PID namespace.
//!
//! - [`PrivilegedExecutor`]: timeout, exit-status policy, logging and audit
//! - [`ContainerEngine`]: the engine seam, implemented by [`DockerEngine`]
//!   (Docker Engine API) and [`LocalEngine`] (runs argv on this host)

mod command;
mod docker;
mod engine;
mod executor;
mod local;

pub use command::CommandLine;
pub use docker::DockerEngine;
pub use engine::{ContainerEngine, EngineError, EphemeralSpec, RawOutput};
#[cfg(test)]
pub use engine::MockContainerEngine;
pub use executor::{ExecMode, ExecutionError, ExecutionResult, PrivilegedExecutor};
pub use local::{LocalEngine, run_process};
