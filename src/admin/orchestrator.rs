use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::AdminError;
use crate::concurrency::ResourceLock;
use crate::config::Config;
use crate::exec::{CommandLine, PrivilegedExecutor};
use crate::security::{InvalidInput, validate_client_name};
use crate::store::{CreatedProfile, CredentialStore, OpenVpnProfile, ProfileStore};

pub const CREDENTIALS_LOCK: &str = "credentials";
pub const PROFILES_LOCK: &str = "profiles";

/// Entry point for every administrative operation, shared by the HTTP
/// handlers and the CLI.
pub struct LifecycleOrchestrator {
    executor: Arc<PrivilegedExecutor>,
    credentials: CredentialStore,
    profiles: ProfileStore,
    ipsec_container: String,
    ipsec_stop_timeout: Duration,
    engine_timeout: Duration,
    openvpn_restart: CommandLine,
    host_timeout: Duration,
}

impl LifecycleOrchestrator {
    /// Wire the stores to `executor`, with cross-process locks under the
    /// runtime directory.
    pub fn new(config: &Config, executor: Arc<PrivilegedExecutor>) -> Result<Self> {
        let lock = |class: &str| {
            let path = config.paths.resource_lock(class);
            ResourceLock::with_file(class, &path)
                .with_context(|| format!("Failed to prepare lock file {}", path.display()))
        };

        let openvpn_restart = CommandLine::from_argv(&config.openvpn.restart_command)
            .context("openvpn.restart_command must not be empty")?;

        Ok(Self {
            credentials: CredentialStore::new(
                executor.clone(),
                lock(CREDENTIALS_LOCK)?,
                &config.ipsec,
                config.engine.exec_timeout(),
            ),
            profiles: ProfileStore::new(
                executor.clone(),
                lock(PROFILES_LOCK)?,
                &config.openvpn,
                config.engine.ephemeral_timeout(),
            ),
            ipsec_container: config.ipsec.container.clone(),
            ipsec_stop_timeout: Duration::from_secs(config.ipsec.restart_stop_timeout_secs),
            engine_timeout: config.engine.exec_timeout(),
            openvpn_restart,
            host_timeout: config.engine.host_timeout(),
            executor,
        })
    }

    pub fn engine_name(&self) -> &'static str {
        self.executor.engine_name()
    }

    pub async fn list_ipsec_users(&self) -> Result<Vec<String>, AdminError> {
        self.credentials.list().await
    }

    /// Returns the password written (generated when `password` is `None`).
    pub async fn add_ipsec_user(
        &self,
        username: &str,
        password: Option<&str>,
    ) -> Result<String, AdminError> {
        self.credentials.add(username, password).await
    }

    pub async fn remove_ipsec_user(&self, username: &str) -> Result<(), AdminError> {
        self.credentials.remove(username).await
    }

    pub async fn list_openvpn_profiles(
        &self,
        include_content: bool,
    ) -> Result<Vec<OpenVpnProfile>, AdminError> {
        self.profiles.list(include_content)
    }

    pub async fn create_openvpn_profile(&self, name: &str) -> Result<CreatedProfile, AdminError> {
        self.profiles.create(name).await
    }

    /// Create several profiles in order.
    ///
    /// Every name is validated before anything runs. A failure after at
    /// least one success becomes `PartialFailure` naming what was created;
    /// a failure on the first name is returned as is.
    pub async fn create_openvpn_profiles(
        &self,
        names: &[String],
    ) -> Result<Vec<CreatedProfile>, AdminError> {
        if names.is_empty() {
            return Err(InvalidInput("at least one client name is required".into()).into());
        }
        let mut seen = HashSet::new();
        for name in names {
            validate_client_name(name)?;
            if !seen.insert(name.as_str()) {
                return Err(
                    InvalidInput(format!("duplicate client_name '{}' in request", name)).into(),
                );
            }
        }

        let mut created = Vec::with_capacity(names.len());
        for name in names {
            match self.profiles.create(name).await {
                Ok(profile) => created.push(profile),
                Err(e) if created.is_empty() => return Err(e),
                Err(e) => {
                    warn!(
                        "Batch create stopped at {} after {} profile(s): {}",
                        name,
                        created.len(),
                        e
                    );
                    return Err(AdminError::PartialFailure {
                        completed: created
                            .iter()
                            .map(|c: &CreatedProfile| c.profile.client_name.clone())
                            .collect(),
                        failed: format!("creating '{}' failed: {}", name, e),
                    });
                }
            }
        }
        Ok(created)
    }

    /// Returns the revocation output.
    pub async fn delete_openvpn_profile(&self, name: &str) -> Result<String, AdminError> {
        self.profiles.delete(name).await
    }

    pub async fn restart_ipsec(&self) -> Result<(), AdminError> {
        self.executor
            .restart_container(
                &self.ipsec_container,
                self.ipsec_stop_timeout,
                self.engine_timeout,
            )
            .await?;
        info!("IPSec container {} restarted", self.ipsec_container);
        Ok(())
    }

    /// Returns the restart command's output.
    pub async fn restart_openvpn(&self) -> Result<String, AdminError> {
        let result = self
            .executor
            .run_host(&self.openvpn_restart, self.host_timeout)
            .await?;
        info!("OpenVPN service restarted");
        Ok(result.output)
    }

    /// IPSec first, then OpenVPN; stops at the first failure.
    pub async fn restart_all(&self) -> Result<(), AdminError> {
        self.restart_ipsec().await?;
        if let Err(e) = self.restart_openvpn().await {
            return Err(AdminError::PartialFailure {
                completed: vec![format!("IPSec container {} restarted", self.ipsec_container)],
                failed: format!("OpenVPN service restart failed: {}", e),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ContainerEngine, EngineError, LocalEngine, MockContainerEngine};
    use crate::paths::Paths;
    use std::fs;
    use std::path::Path;

    fn test_config(dir: &Path, restart_command: &[&str]) -> Config {
        let mut config = Config::default();
        config.paths = Paths {
            config_dir: dir.join("config"),
            state_dir: dir.join("state"),
            runtime_dir: Some(dir.join("run")),
        };
        config.ipsec.secrets_file = dir.join("chap-secrets").display().to_string();
        config.openvpn.profile_dir = dir.join("profiles").display().to_string();
        config.openvpn.script = dir.join("openvpn.sh").display().to_string();
        config.openvpn.poll_interval_ms = 20;
        config.openvpn.settle_timeout_ms = 300;
        config.openvpn.restart_command = restart_command.iter().map(|s| s.to_string()).collect();
        fs::create_dir_all(dir.join("profiles")).unwrap();
        config
    }

    fn orchestrator(config: &Config, engine: Arc<dyn ContainerEngine>) -> LifecycleOrchestrator {
        LifecycleOrchestrator::new(config, Arc::new(PrivilegedExecutor::new(engine))).unwrap()
    }

    /// Provisioning stand-in that refuses client names starting with "bad".
    fn write_script(dir: &Path) {
        let body = format!(
            r#"#!/bin/bash
dir='{}'
case "$2" in bad*) echo "refusing $2" >&2; exit 1 ;; esac
case "$1" in
  --addclient) echo "client $2" > "$dir/$2.ovpn" ;;
  --revoke) echo "revoked $2" ;;
esac
"#,
            dir.join("profiles").display()
        );
        fs::write(dir.join("openvpn.sh"), body).unwrap();
    }

    #[tokio::test]
    async fn rejected_requests_make_no_privileged_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), &["true"]);
        fs::write(tmp.path().join("profiles/taken.ovpn"), "x").unwrap();
        fs::write(tmp.path().join("profiles/client.ovpn"), "x").unwrap();

        let mut engine = MockContainerEngine::new();
        engine.expect_exec_attached().times(0);
        engine.expect_run_ephemeral().times(0);
        engine.expect_restart_container().times(0);
        let admin = orchestrator(&config, Arc::new(engine));

        let cases = [
            admin.add_ipsec_user("bad user", None).await.unwrap_err(),
            admin.remove_ipsec_user("").await.unwrap_err(),
            admin.create_openvpn_profile("../x").await.unwrap_err(),
            admin.create_openvpn_profile("taken").await.unwrap_err(),
            admin.delete_openvpn_profile("client").await.unwrap_err(),
            admin.delete_openvpn_profile("carol").await.unwrap_err(),
        ];
        let categories: Vec<_> = cases.iter().map(AdminError::category).collect();
        assert_eq!(
            categories,
            vec!["validation", "validation", "validation", "conflict", "protected", "not_found"]
        );
    }

    #[tokio::test]
    async fn batch_validates_every_name_first() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), &["true"]);
        let admin = orchestrator(&config, Arc::new(MockContainerEngine::new()));

        let names = vec!["fine".to_string(), "not fine".to_string()];
        let err = admin.create_openvpn_profiles(&names).await.unwrap_err();
        assert_eq!(err.category(), "validation");

        let dupes = vec!["same".to_string(), "same".to_string()];
        let err = admin.create_openvpn_profiles(&dupes).await.unwrap_err();
        assert_eq!(err.category(), "validation");

        assert!(admin.list_openvpn_profiles(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_reports_partial_failure() {
        let tmp = tempfile::tempdir().unwrap();
        write_script(tmp.path());
        let config = test_config(tmp.path(), &["true"]);
        let admin = orchestrator(&config, Arc::new(LocalEngine));

        let names: Vec<String> = ["ann", "ben", "bad_one", "zoe"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        match admin.create_openvpn_profiles(&names).await.unwrap_err() {
            AdminError::PartialFailure { completed, failed } => {
                assert_eq!(completed, vec!["ann", "ben"]);
                assert!(failed.contains("bad_one"));
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }

        let listed: Vec<_> = admin
            .list_openvpn_profiles(false)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.client_name)
            .collect();
        assert_eq!(listed, vec!["ann", "ben"]);
    }

    #[tokio::test]
    async fn batch_failing_on_first_name_is_plain_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_script(tmp.path());
        let config = test_config(tmp.path(), &["true"]);
        let admin = orchestrator(&config, Arc::new(LocalEngine));

        let names = vec!["bad".to_string(), "ok".to_string()];
        let err = admin.create_openvpn_profiles(&names).await.unwrap_err();
        assert_eq!(err.category(), "execution");
        assert!(admin.list_openvpn_profiles(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ipsec_user_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), &["true"]);
        fs::write(tmp.path().join("chap-secrets"), "").unwrap();
        let admin = orchestrator(&config, Arc::new(LocalEngine));

        let password = admin.add_ipsec_user("alice", None).await.unwrap();
        assert!(!password.is_empty());
        assert_eq!(admin.list_ipsec_users().await.unwrap(), vec!["alice"]);
        admin.remove_ipsec_user("alice").await.unwrap();
        assert!(admin.list_ipsec_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restart_all_runs_both_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), &["sh", "-c", "echo restarted"]);
        let mut engine = MockContainerEngine::new();
        engine
            .expect_restart_container()
            .times(1)
            .returning(|_, stop| {
                assert_eq!(stop, Duration::from_secs(5));
                Ok(())
            });
        let admin = orchestrator(&config, Arc::new(engine));

        admin.restart_all().await.unwrap();
        assert_eq!(admin.restart_openvpn().await.unwrap().trim(), "restarted");
    }

    #[tokio::test]
    async fn restart_all_stops_at_ipsec_failure() {
        let tmp = tempfile::tempdir().unwrap();
        // Would fail loudly if it ran.
        let config = test_config(tmp.path(), &["false"]);
        let mut engine = MockContainerEngine::new();
        engine
            .expect_restart_container()
            .times(1)
            .returning(|_, _| Err(EngineError::Unreachable("connection refused".into())));
        let admin = orchestrator(&config, Arc::new(engine));

        let err = admin.restart_all().await.unwrap_err();
        assert_eq!(err.category(), "execution");
    }

    #[tokio::test]
    async fn restart_all_reports_openvpn_failure_as_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), &["false"]);
        let mut engine = MockContainerEngine::new();
        engine
            .expect_restart_container()
            .times(1)
            .returning(|_, _| Ok(()));
        let admin = orchestrator(&config, Arc::new(engine));

        let err = admin.restart_all().await.unwrap_err();
        assert_eq!(err.category(), "partial_failure");
    }

    #[test]
    fn empty_restart_command_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), &[]);
        let executor = Arc::new(PrivilegedExecutor::new(Arc::new(LocalEngine)));
        assert!(LifecycleOrchestrator::new(&config, executor).is_err());
    }
}
