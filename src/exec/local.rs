use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;

use super::engine::{ContainerEngine, EngineError, EphemeralSpec, RawOutput};

/// Run an argv as a child of this process and collect its output.
///
/// stdout comes first, then stderr. The child is killed if the returned
/// future is dropped, so callers bound it with `tokio::time::timeout`.
pub async fn run_process(argv: &[String]) -> std::io::Result<RawOutput> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command")
    })?;

    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    let mut combined = String::with_capacity(stdout.len() + stderr.len());
    combined.push_str(&stdout);
    combined.push_str(&stderr);

    Ok(RawOutput {
        output: combined,
        exit_code: output.status.code().map(i64::from),
    })
}

/// Engine for installs where the control process already runs on the host.
///
/// Attach and ephemeral modes both run the argv directly; container names
/// are treated as systemd units for restarts.
#[derive(Debug, Default, Clone)]
pub struct LocalEngine;

#[async_trait]
impl ContainerEngine for LocalEngine {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn ping(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn exec_attached(
        &self,
        _container: &str,
        argv: &[String],
    ) -> Result<RawOutput, EngineError> {
        run_process(argv)
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))
    }

    async fn run_ephemeral(
        &self,
        _spec: &EphemeralSpec,
        argv: &[String],
    ) -> Result<RawOutput, EngineError> {
        run_process(argv)
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))
    }

    async fn restart_container(
        &self,
        container: &str,
        _stop_timeout: Duration,
    ) -> Result<(), EngineError> {
        let argv = vec![
            "systemctl".to_string(),
            "restart".to_string(),
            container.to_string(),
        ];
        let raw = run_process(&argv)
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))?;
        match raw.exit_code {
            Some(0) => Ok(()),
            code => Err(EngineError::Launch(format!(
                "systemctl restart {} exited with {:?}",
                container, code
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn collects_stdout_and_stderr() {
        let raw = run_process(&argv(&["sh", "-c", "echo out; echo err >&2"]))
            .await
            .unwrap();
        assert_eq!(raw.exit_code, Some(0));
        assert!(raw.output.contains("out"));
        assert!(raw.output.contains("err"));
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let raw = run_process(&argv(&["sh", "-c", "exit 3"])).await.unwrap();
        assert_eq!(raw.exit_code, Some(3));
    }

    #[tokio::test]
    async fn missing_program_is_launch_error() {
        let err = LocalEngine
            .exec_attached("ignored", &argv(&["/nonexistent/vpnctl-test-binary"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Launch(_)));
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        assert!(run_process(&[]).await.is_err());
    }
}
