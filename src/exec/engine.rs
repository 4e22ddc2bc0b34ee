use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from the engine transport, before exit-status policy is applied.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("container engine unreachable: {0}")]
    Unreachable(String),

    #[error("container engine rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("could not launch command: {0}")]
    Launch(String),

    #[error("output stream failed: {0}")]
    Stream(String),
}

/// Short-lived privileged container parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralSpec {
    pub image: String,
    /// `host_path:container_path` bind mounts
    pub binds: Vec<String>,
    /// Join the host PID namespace
    pub host_pid: bool,
}

/// What came back from the engine: combined output and, when the engine
/// reports it, the exit status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub output: String,
    pub exit_code: Option<i64>,
}

/// Container engine seam. One instance is created at startup and shared.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn ping(&self) -> Result<(), EngineError>;

    /// Exec `argv` inside the running `container`, collecting attached
    /// stdout/stderr until the stream closes, then the exit status.
    async fn exec_attached(&self, container: &str, argv: &[String])
    -> Result<RawOutput, EngineError>;

    /// Run `argv` in a new privileged container built from `spec`, wait for
    /// it to exit, collect its logs and remove it.
    async fn run_ephemeral(
        &self,
        spec: &EphemeralSpec,
        argv: &[String],
    ) -> Result<RawOutput, EngineError>;

    async fn restart_container(
        &self,
        container: &str,
        stop_timeout: Duration,
    ) -> Result<(), EngineError>;
}
