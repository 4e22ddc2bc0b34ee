use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::admin::AdminError;
use crate::concurrency::ResourceLock;
use crate::config::OpenVpnConfig;
use crate::exec::{CommandLine, EphemeralSpec, ExecMode, PrivilegedExecutor};
use crate::security::validate_client_name;

const PROFILE_EXT: &str = "ovpn";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenVpnProfile {
    pub client_name: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedProfile {
    pub profile: OpenVpnProfile,
    /// Output of the provisioning script
    pub output: String,
}

/// OpenVPN client profiles: `<profile_dir>/<client>.ovpn` files produced
/// and revoked by the provisioning script in an ephemeral container.
///
/// The directory is the only source of truth. Mutations hold the profiles
/// lock for their full duration.
pub struct ProfileStore {
    executor: Arc<PrivilegedExecutor>,
    lock: ResourceLock,
    mode: ExecMode,
    profile_dir: PathBuf,
    script: String,
    protected_client: String,
    timeout: Duration,
    poll_interval: Duration,
    settle_timeout: Duration,
}

impl ProfileStore {
    pub fn new(
        executor: Arc<PrivilegedExecutor>,
        lock: ResourceLock,
        config: &OpenVpnConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            lock,
            mode: ExecMode::Ephemeral(EphemeralSpec {
                image: config.helper_image.clone(),
                binds: config.binds.clone(),
                host_pid: config.host_pid,
            }),
            profile_dir: config.profile_dir(),
            script: config.script.clone(),
            protected_client: config.protected_client.clone(),
            timeout,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            settle_timeout: Duration::from_millis(config.settle_timeout_ms),
        }
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.profile_dir.join(format!("{}.{}", name, PROFILE_EXT))
    }

    /// Scan the profile directory, sorted by client name. A directory that
    /// does not exist yet holds no profiles.
    pub fn list(&self, include_content: bool) -> Result<Vec<OpenVpnProfile>, AdminError> {
        let entries = match fs::read_dir(&self.profile_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Profile directory {} not found", self.profile_dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AdminError::io(
                    format!("read profile directory {}", self.profile_dir.display()),
                    e,
                ));
            }
        };

        let mut profiles = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PROFILE_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let metadata = match fs::metadata(&path) {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let content = if include_content {
                fs::read_to_string(&path).ok()
            } else {
                None
            };
            profiles.push(OpenVpnProfile {
                client_name: name.to_string(),
                file_size: metadata.len(),
                file_path: path,
                content,
            });
        }

        profiles.sort_by(|a, b| a.client_name.cmp(&b.client_name));
        Ok(profiles)
    }

    /// Provision a client and wait for its profile file to settle.
    pub async fn create(&self, name: &str) -> Result<CreatedProfile, AdminError> {
        validate_client_name(name)?;
        let path = self.profile_path(name);

        let _guard = self
            .lock
            .acquire()
            .await
            .map_err(|e| AdminError::io("acquire profiles lock", e))?;

        if path.exists() {
            return Err(AdminError::Conflict(format!(
                "OpenVPN profile '{}' already exists",
                name
            )));
        }

        let cmd = CommandLine::new("bash")
            .arg(&self.script)
            .arg("--addclient")
            .arg(name);
        let result = self.executor.execute(&cmd, &self.mode, self.timeout).await?;

        let Some(size) = wait_for_settle(&path, self.poll_interval, self.settle_timeout).await
        else {
            warn!(
                "Provisioning for {} finished but {} never appeared",
                name,
                path.display()
            );
            return Err(AdminError::MissingArtifact(format!(
                "profile file not found for '{}' after provisioning",
                name
            )));
        };

        let content = fs::read_to_string(&path)
            .map_err(|e| AdminError::io(format!("read {}", path.display()), e))?;
        info!("Created OpenVPN profile {} ({} bytes)", name, size);

        Ok(CreatedProfile {
            profile: OpenVpnProfile {
                client_name: name.to_string(),
                file_path: path,
                file_size: content.len() as u64,
                content: Some(content),
            },
            output: result.output,
        })
    }

    /// Revoke a client's certificate and remove its profile file.
    /// Returns the revocation script output.
    pub async fn delete(&self, name: &str) -> Result<String, AdminError> {
        if name == self.protected_client {
            return Err(AdminError::Protected(format!(
                "OpenVPN profile '{}' is protected and cannot be deleted",
                name
            )));
        }
        validate_client_name(name)?;
        let path = self.profile_path(name);

        let _guard = self
            .lock
            .acquire()
            .await
            .map_err(|e| AdminError::io("acquire profiles lock", e))?;

        if !path.exists() {
            return Err(AdminError::NotFound(format!(
                "OpenVPN profile '{}' not found",
                name
            )));
        }

        let cmd = CommandLine::new("bash")
            .arg(&self.script)
            .arg("--revoke")
            .arg(name);
        let result = self.executor.execute(&cmd, &self.mode, self.timeout).await?;

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} already removed by the revoke script", path.display());
            }
            Err(e) => {
                warn!("Revoked {} but could not remove {}: {}", name, path.display(), e);
                return Err(AdminError::PartialFailure {
                    completed: vec![format!("certificate for '{}' revoked", name)],
                    failed: format!("profile file removal failed: {}", e),
                });
            }
        }

        info!("Deleted OpenVPN profile {}", name);
        Ok(result.output)
    }
}

/// Poll until `path` exists with a non-zero size that is unchanged across
/// two consecutive polls, or `limit` elapses. Returns the final size if the
/// file exists at that point.
async fn wait_for_settle(path: &Path, interval: Duration, limit: Duration) -> Option<u64> {
    let started = Instant::now();
    let mut last = None;
    loop {
        let size = fs::metadata(path).ok().map(|m| m.len());
        if let Some(size) = size
            && size > 0
            && last == Some(size)
        {
            return Some(size);
        }
        last = size;
        if started.elapsed() >= limit {
            break;
        }
        sleep(interval).await;
    }

    let size = fs::metadata(path).ok().map(|m| m.len());
    if size.is_some() {
        debug!("{} did not settle within {:?}", path.display(), limit);
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ContainerEngine, LocalEngine, MockContainerEngine};

    /// Stand-in for the provisioning script: writes or deletes
    /// `<dir>/<name>.ovpn` and echoes what it did.
    fn write_stub_script(dir: &Path) -> PathBuf {
        let script = dir.join("openvpn.sh");
        let body = format!(
            r#"#!/bin/bash
set -e
dir='{}'
case "$1" in
  --addclient)
    printf 'client\ndev tun\nremote vpn.example.com 1194\n' > "$dir/$2.ovpn"
    echo "Client $2 added"
    ;;
  --revoke)
    echo "Certificate for client $2 revoked"
    ;;
  *)
    exit 2
    ;;
esac
"#,
            dir.display()
        );
        fs::write(&script, body).unwrap();
        script
    }

    fn store_with(engine: Arc<dyn ContainerEngine>, dir: &Path, script: &Path) -> ProfileStore {
        let config = OpenVpnConfig {
            profile_dir: dir.display().to_string(),
            script: script.display().to_string(),
            poll_interval_ms: 20,
            settle_timeout_ms: 500,
            ..Default::default()
        };
        ProfileStore::new(
            Arc::new(PrivilegedExecutor::new(engine)),
            ResourceLock::in_process("profiles"),
            &config,
            Duration::from_secs(10),
        )
    }

    fn local_store(dir: &Path) -> ProfileStore {
        let script = write_stub_script(dir);
        store_with(Arc::new(LocalEngine), dir, &script)
    }

    #[tokio::test]
    async fn create_then_list() {
        let tmp = tempfile::tempdir().unwrap();
        let store = local_store(tmp.path());

        let created = store.create("bob_2").await.unwrap();
        assert_eq!(created.profile.client_name, "bob_2");
        assert_eq!(created.profile.file_path, tmp.path().join("bob_2.ovpn"));
        assert!(created.profile.content.as_deref().unwrap().contains("remote"));
        assert!(created.output.contains("Client bob_2 added"));

        let listed = store.list(false).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].client_name, "bob_2");
        assert!(listed[0].file_size > 0);
        assert!(listed[0].content.is_none());

        let with_content = store.list(true).unwrap();
        assert_eq!(with_content[0].content, created.profile.content);
    }

    #[tokio::test]
    async fn list_is_sorted_and_ignores_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = local_store(tmp.path());
        fs::write(tmp.path().join("zed.ovpn"), "z").unwrap();
        fs::write(tmp.path().join("amy.ovpn"), "a").unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(tmp.path().join("dir.ovpn")).unwrap();

        let names: Vec<_> = store
            .list(false)
            .unwrap()
            .into_iter()
            .map(|p| p.client_name)
            .collect();
        assert_eq!(names, vec!["amy", "zed"]);
    }

    #[test]
    fn missing_profile_directory_lists_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_with(
            Arc::new(MockContainerEngine::new()),
            &tmp.path().join("not-yet"),
            Path::new("/unused"),
        );
        assert!(store.list(true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_existing_is_conflict_without_engine_call() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("dave.ovpn"), "existing").unwrap();
        let store = store_with(
            Arc::new(MockContainerEngine::new()),
            tmp.path(),
            Path::new("/unused"),
        );

        let err = store.create("dave").await.unwrap_err();
        assert_eq!(err.category(), "conflict");
    }

    #[tokio::test]
    async fn invalid_names_never_reach_the_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_with(
            Arc::new(MockContainerEngine::new()),
            tmp.path(),
            Path::new("/unused"),
        );

        let long = "a".repeat(65);
        for name in ["", "a b", "../etc/passwd", "x;id", "名前", long.as_str()] {
            assert_eq!(store.create(name).await.unwrap_err().category(), "validation");
            assert_eq!(store.delete(name).await.unwrap_err().category(), "validation");
        }
    }

    #[tokio::test]
    async fn protected_and_missing_profiles_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("client.ovpn"), "default").unwrap();
        let store = store_with(
            Arc::new(MockContainerEngine::new()),
            tmp.path(),
            Path::new("/unused"),
        );

        let err = store.delete("client").await.unwrap_err();
        assert_eq!(err.category(), "protected");
        assert!(tmp.path().join("client.ovpn").exists());

        let err = store.delete("carol").await.unwrap_err();
        assert_eq!(err.category(), "not_found");
    }

    #[tokio::test]
    async fn delete_revokes_and_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = local_store(tmp.path());
        store.create("erin").await.unwrap();

        let output = store.delete("erin").await.unwrap();
        assert!(output.contains("revoked"));
        assert!(!tmp.path().join("erin.ovpn").exists());
        assert!(store.list(false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn removal_failure_after_revoke_is_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let store = local_store(tmp.path());
        // A directory in place of the profile: revocation succeeds,
        // remove_file does not.
        fs::create_dir(tmp.path().join("hank.ovpn")).unwrap();

        match store.delete("hank").await.unwrap_err() {
            AdminError::PartialFailure { completed, failed } => {
                assert_eq!(completed, vec!["certificate for 'hank' revoked"]);
                assert!(failed.starts_with("profile file removal failed"));
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn script_that_writes_nothing_is_missing_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("noop.sh");
        fs::write(&script, "#!/bin/bash\necho nothing to do\n").unwrap();
        let store = store_with(Arc::new(LocalEngine), tmp.path(), &script);

        let err = store.create("frank").await.unwrap_err();
        assert_eq!(err.category(), "execution");
        assert!(err.to_string().contains("profile file not found"));
    }

    #[tokio::test]
    async fn failing_script_is_execution_error() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("fail.sh");
        fs::write(&script, "#!/bin/bash\necho 'easyrsa: error' >&2\nexit 1\n").unwrap();
        let store = store_with(Arc::new(LocalEngine), tmp.path(), &script);

        let err = store.create("gina").await.unwrap_err();
        assert_eq!(err.category(), "execution");
        assert!(!err.to_string().contains("easyrsa"));
    }

    #[tokio::test]
    async fn settle_waits_for_late_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("slow.ovpn");
        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(60)).await;
            fs::write(&writer_path, "client\nremote vpn.example.com 1194\n").unwrap();
        });

        let size = wait_for_settle(&path, Duration::from_millis(20), Duration::from_secs(2))
            .await
            .unwrap();
        writer.await.unwrap();
        assert_eq!(size, 35);
    }

    #[tokio::test]
    async fn settle_gives_up_on_absent_file() {
        let tmp = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let size = wait_for_settle(
            &tmp.path().join("never.ovpn"),
            Duration::from_millis(10),
            Duration::from_millis(100),
        )
        .await;
        assert!(size.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
