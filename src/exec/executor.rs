use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use super::command::CommandLine;
use super::engine::{ContainerEngine, EngineError, EphemeralSpec, RawOutput};
use super::local::run_process;
use crate::security::{AuditAction, AuditLog, AuditRecord};

/// Where a privileged command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecMode {
    /// Exec inside an already-running privileged container.
    Attach { container: String },
    /// Launch a short-lived privileged container.
    Ephemeral(EphemeralSpec),
}

impl ExecMode {
    fn label(&self) -> &'static str {
        match self {
            ExecMode::Attach { .. } => "attach",
            ExecMode::Ephemeral(_) => "ephemeral",
        }
    }

    fn target(&self) -> &str {
        match self {
            ExecMode::Attach { container } => container,
            ExecMode::Ephemeral(spec) => &spec.image,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Combined stdout/stderr
    pub output: String,
    pub exit_code: Option<i64>,
    pub elapsed: Duration,
}

/// Failure of the privileged path. `Display` never includes the command
/// line or its output; use [`ExecutionError::detail`] for operator logs.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("container engine is unavailable")]
    Connection(String),

    #[error("privileged command could not be started")]
    Create(String),

    #[error("privileged command timed out after {}s; its effect is unknown", .0.as_secs())]
    Timeout(Duration),

    #[error("privileged command exited with status {exit_code}")]
    Runtime { exit_code: i64, output: String },
}

impl ExecutionError {
    pub fn detail(&self) -> Option<&str> {
        match self {
            ExecutionError::Connection(d) | ExecutionError::Create(d) => Some(d),
            ExecutionError::Runtime { output, .. } => Some(output),
            ExecutionError::Timeout(_) => None,
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            ExecutionError::Timeout(_) => AuditAction::TimedOut,
            _ => AuditAction::Failed,
        }
    }
}

impl From<EngineError> for ExecutionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unreachable(_) | EngineError::Stream(_) => {
                ExecutionError::Connection(err.to_string())
            }
            EngineError::Rejected { .. } | EngineError::Launch(_) => {
                ExecutionError::Create(err.to_string())
            }
        }
    }
}

/// Runs privileged commands with a bound, an exit-status policy, and an
/// audit entry per invocation.
pub struct PrivilegedExecutor {
    engine: Arc<dyn ContainerEngine>,
    audit: Option<Arc<AuditLog>>,
}

impl PrivilegedExecutor {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Run `command` in `mode`, failing with `Timeout` once `timeout` elapses.
    ///
    /// A non-zero exit status is `Runtime` in both modes. When the engine
    /// cannot report a status the command is treated as successful.
    pub async fn execute(
        &self,
        command: &CommandLine,
        mode: &ExecMode,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        info!(
            mode = mode.label(),
            on = mode.target(),
            "Executing privileged command: {}",
            command
        );

        let started = Instant::now();
        let run = async {
            match mode {
                ExecMode::Attach { container } => {
                    self.engine.exec_attached(container, command.argv()).await
                }
                ExecMode::Ephemeral(spec) => {
                    self.engine.run_ephemeral(spec, command.argv()).await
                }
            }
        };
        let outcome = match tokio::time::timeout(timeout, run).await {
            Err(_) => Err(ExecutionError::Timeout(timeout)),
            Ok(result) => result.map_err(ExecutionError::from).and_then(check_status),
        };
        let elapsed = started.elapsed();

        if let Ok(ref result) = outcome
            && result.exit_code.is_none()
        {
            warn!(
                mode = mode.label(),
                "Engine did not report an exit status for {}",
                command.program()
            );
        }

        self.record(command, mode.label(), mode.target(), &outcome, elapsed);
        outcome.map(|raw| ExecutionResult {
            output: raw.output,
            exit_code: raw.exit_code,
            elapsed,
        })
    }

    /// Restart a container through the engine.
    pub async fn restart_container(
        &self,
        container: &str,
        stop_timeout: Duration,
        timeout: Duration,
    ) -> Result<(), ExecutionError> {
        info!(container, "Restarting container");
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            timeout,
            self.engine.restart_container(container, stop_timeout),
        )
        .await
        {
            Err(_) => Err(ExecutionError::Timeout(timeout)),
            Ok(result) => result.map_err(ExecutionError::from),
        };

        let argv = vec![
            "restart".to_string(),
            format!("--time={}", stop_timeout.as_secs()),
            container.to_string(),
        ];
        let (action, detail) = match outcome {
            Ok(()) => (AuditAction::Restarted, None),
            Err(ref e) => {
                warn!(container, "Container restart failed: {} ({:?})", e, e.detail());
                (e.audit_action(), e.detail().map(str::to_string))
            }
        };
        self.audit(AuditRecord {
            action,
            mode: "engine",
            target: container,
            command: &argv,
            exit_code: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
            detail,
        });
        outcome
    }

    /// Run a command as a child of the control process itself.
    pub async fn run_host(
        &self,
        command: &CommandLine,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        info!(mode = "host", "Executing host command: {}", command);

        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, run_process(command.argv())).await {
            Err(_) => Err(ExecutionError::Timeout(timeout)),
            Ok(Err(e)) => Err(ExecutionError::Create(e.to_string())),
            Ok(Ok(raw)) => check_status(raw),
        };
        let elapsed = started.elapsed();

        self.record(command, "host", command.program(), &outcome, elapsed);
        outcome.map(|raw| ExecutionResult {
            output: raw.output,
            exit_code: raw.exit_code,
            elapsed,
        })
    }

    fn record(
        &self,
        command: &CommandLine,
        mode: &str,
        target: &str,
        outcome: &Result<RawOutput, ExecutionError>,
        elapsed: Duration,
    ) {
        let (action, exit_code, detail) = match outcome {
            Ok(raw) => (AuditAction::Executed, raw.exit_code, None),
            Err(e) => {
                warn!(
                    mode,
                    on = target,
                    "Privileged command {} failed: {} ({})",
                    command.program(),
                    e,
                    e.detail().unwrap_or("no detail")
                );
                let code = match e {
                    ExecutionError::Runtime { exit_code, .. } => Some(*exit_code),
                    _ => None,
                };
                (e.audit_action(), code, Some(e.to_string()))
            }
        };

        self.audit(AuditRecord {
            action,
            mode,
            target,
            command: command.argv(),
            exit_code,
            elapsed_ms: elapsed.as_millis() as u64,
            detail,
        });
    }

    fn audit(&self, record: AuditRecord<'_>) {
        if let Some(ref audit) = self.audit
            && let Err(e) = audit.append(record)
        {
            warn!("Failed to append audit entry: {}", e);
        }
    }
}

fn check_status(raw: RawOutput) -> Result<RawOutput, ExecutionError> {
    match raw.exit_code {
        Some(code) if code != 0 => Err(ExecutionError::Runtime {
            exit_code: code,
            output: raw.output,
        }),
        _ => Ok(raw),
    }
}
