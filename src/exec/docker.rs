use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions,
    RestartContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::engine::{ContainerEngine, EngineError, EphemeralSpec, RawOutput};

/// Seconds the HTTP client waits on a single engine request.
const ENGINE_REQUEST_TIMEOUT_SECS: u64 = 120;

const ROLE_LABEL: &str = "io.vpnctl.role";

/// Docker Engine API client, held for the life of the process.
pub struct DockerEngine {
    docker: Docker,
    containers: Arc<dyn ContainerLifecycle>,
}

impl DockerEngine {
    /// Connect to the engine, negotiate the API version and ping it.
    ///
    /// `socket` overrides the default (DOCKER_HOST or /var/run/docker.sock).
    pub async fn connect(socket: Option<&str>) -> Result<Self, EngineError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(
                path,
                ENGINE_REQUEST_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(classify)?;

        let docker = docker.negotiate_version().await.map_err(classify)?;
        let engine = Self {
            containers: Arc::new(BollardLifecycle {
                docker: docker.clone(),
            }),
            docker,
        };
        engine.ping().await?;
        Ok(engine)
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<(), EngineError> {
        self.docker.ping().await.map_err(classify)?;
        Ok(())
    }

    async fn exec_attached(
        &self,
        container: &str,
        argv: &[String],
    ) -> Result<RawOutput, EngineError> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    privileged: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(classify)?;

        let mut output = String::new();
        if let StartExecResults::Attached {
            output: mut stream, ..
        } = self.docker.start_exec(&exec.id, None).await.map_err(classify)?
        {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| EngineError::Stream(e.to_string()))?;
                output.push_str(&chunk.to_string());
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await.map_err(classify)?;
        Ok(RawOutput {
            output,
            exit_code: inspect.exit_code,
        })
    }

    async fn run_ephemeral(
        &self,
        spec: &EphemeralSpec,
        argv: &[String],
    ) -> Result<RawOutput, EngineError> {
        run_to_completion(&self.containers, spec, argv).await
    }

    async fn restart_container(
        &self,
        container: &str,
        stop_timeout: Duration,
    ) -> Result<(), EngineError> {
        self.docker
            .restart_container(
                container,
                Some(RestartContainerOptions {
                    t: stop_timeout.as_secs() as isize,
                }),
            )
            .await
            .map_err(classify)
    }
}

/// The container calls an ephemeral run is made of.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
trait ContainerLifecycle: Send + Sync {
    /// Create the container and return its id.
    async fn create(&self, spec: &EphemeralSpec, argv: &[String]) -> Result<String, EngineError>;

    async fn start(&self, id: &str) -> Result<(), EngineError>;

    /// Block until the container stops and return its exit status.
    async fn wait(&self, id: &str) -> Result<Option<i64>, EngineError>;

    async fn logs(&self, id: &str) -> Result<String, EngineError>;

    /// Force-remove the container.
    async fn remove(&self, id: &str) -> Result<(), EngineError>;
}

/// Create, start, wait, collect logs. The container is removed on every
/// path: inline once it was created, or from a detached task if the future
/// is dropped first (the executor's timeout).
async fn run_to_completion(
    containers: &Arc<dyn ContainerLifecycle>,
    spec: &EphemeralSpec,
    argv: &[String],
) -> Result<RawOutput, EngineError> {
    let id = containers.create(spec, argv).await?;
    debug!("Created ephemeral container {}", short_id(&id));

    let mut cleanup = RemoveOnDrop::new(containers.clone(), id.clone());
    let outcome = run_created(containers.as_ref(), &id).await;
    cleanup.disarm();
    remove_logged(containers.as_ref(), &id).await;

    outcome
}

async fn run_created(
    containers: &dyn ContainerLifecycle,
    id: &str,
) -> Result<RawOutput, EngineError> {
    containers.start(id).await?;
    let exit_code = containers.wait(id).await?;
    let output = containers.logs(id).await?;
    Ok(RawOutput { output, exit_code })
}

async fn remove_logged(containers: &dyn ContainerLifecycle, id: &str) {
    match containers.remove(id).await {
        Ok(()) => debug!("Removed ephemeral container {}", short_id(id)),
        Err(e) => warn!("Failed to remove ephemeral container {}: {}", short_id(id), e),
    }
}

/// Hands removal to a detached task when dropped while armed.
struct RemoveOnDrop {
    target: Option<(Arc<dyn ContainerLifecycle>, String)>,
}

impl RemoveOnDrop {
    fn new(containers: Arc<dyn ContainerLifecycle>, id: String) -> Self {
        Self {
            target: Some((containers, id)),
        }
    }

    fn disarm(&mut self) {
        self.target = None;
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let Some((containers, id)) = self.target.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_logged(containers.as_ref(), &id).await;
                });
            }
            Err(_) => warn!(
                "No runtime to remove ephemeral container {}; left to the engine",
                short_id(&id)
            ),
        }
    }
}

struct BollardLifecycle {
    docker: Docker,
}

#[async_trait]
impl ContainerLifecycle for BollardLifecycle {
    async fn create(&self, spec: &EphemeralSpec, argv: &[String]) -> Result<String, EngineError> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(argv.to_vec()),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: Some(HashMap::from([(
                ROLE_LABEL.to_string(),
                "privileged-exec".to_string(),
            )])),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                pid_mode: spec.host_pid.then(|| "host".to_string()),
                privileged: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(classify)?;
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(classify)
    }

    async fn wait(&self, id: &str) -> Result<Option<i64>, EngineError> {
        let mut exit_code = None;
        let mut wait = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        while let Some(item) = wait.next().await {
            match item {
                Ok(response) => exit_code = Some(response.status_code),
                Err(BollardError::DockerContainerWaitError { code, .. }) => {
                    exit_code = Some(code)
                }
                Err(e) => return Err(classify(e)),
            }
        }
        Ok(exit_code)
    }

    async fn logs(&self, id: &str) -> Result<String, EngineError> {
        let mut output = String::new();
        let mut logs = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(chunk) = logs.next().await {
            let chunk = chunk.map_err(|e| EngineError::Stream(e.to_string()))?;
            output.push_str(&chunk.to_string());
        }
        Ok(output)
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(classify)
    }
}

fn classify(err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Rejected {
            status: status_code,
            message,
        },
        other => EngineError::Unreachable(other.to_string()),
    }
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}
