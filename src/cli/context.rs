//! Shared startup for commands that touch the VPN hosts: connect the
//! engine once, open the audit log, wire the orchestrator.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::admin::{AdminError, LifecycleOrchestrator};
use crate::config::{Config, EngineKind};
use crate::exec::{ContainerEngine, DockerEngine, LocalEngine, PrivilegedExecutor};
use crate::security::AuditLog;

pub async fn connect_engine(config: &Config) -> Result<Arc<dyn ContainerEngine>> {
    match config.engine.kind {
        EngineKind::Docker => {
            let engine = DockerEngine::connect(config.engine.docker_socket.as_deref())
                .await
                .context("Failed to connect to the Docker engine")?;
            info!("Connected to Docker engine");
            Ok(Arc::new(engine))
        }
        EngineKind::Local => {
            debug!("Using local engine");
            Ok(Arc::new(LocalEngine))
        }
    }
}

pub async fn orchestrator(config: &Config) -> Result<Arc<LifecycleOrchestrator>> {
    let engine = connect_engine(config).await?;
    let audit = Arc::new(AuditLog::new(config.paths.audit_log()));
    let executor = Arc::new(PrivilegedExecutor::new(engine).with_audit(audit));
    Ok(Arc::new(LifecycleOrchestrator::new(config, executor)?))
}

/// Convert for the terminal. Operators get the command output that API
/// clients never see.
pub fn report(err: AdminError) -> anyhow::Error {
    let detail = match err {
        AdminError::Execution(ref e) => e.detail().map(|d| d.trim().to_string()),
        _ => None,
    };
    match detail {
        Some(detail) if !detail.is_empty() => {
            anyhow::anyhow!("{}\n--- command output ---\n{}", err, detail)
        }
        _ => anyhow::Error::new(err),
    }
}
