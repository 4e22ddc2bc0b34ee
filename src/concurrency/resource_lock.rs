//! One mutual-exclusion scope per resource class (IPSec credentials,
//! OpenVPN profiles).
//!
//! Two layers: an in-process `tokio::sync::Mutex` so concurrent requests in
//! the server queue up without blocking runtime threads, and an optional
//! advisory file lock (fs2 flock) so the CLI and the server also serialize
//! against each other.

use fs2::FileExt;
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Clone)]
pub struct ResourceLock {
    name: String,
    local: Arc<Mutex<()>>,
    path: Option<PathBuf>,
}

/// RAII guard; releases the file lock, then the in-process lock, on drop.
pub struct ResourceGuard {
    file: Option<File>,
    _local: OwnedMutexGuard<()>,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

impl ResourceLock {
    /// Lock that only serializes within this process.
    pub fn in_process(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local: Arc::new(Mutex::new(())),
            path: None,
        }
    }

    /// Lock that also takes an exclusive flock on `path`.
    pub fn with_file(name: impl Into<String>, path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            name: name.into(),
            local: Arc::new(Mutex::new(())),
            path: Some(path),
        })
    }

    /// Wait until the resource is free.
    pub async fn acquire(&self) -> io::Result<ResourceGuard> {
        let local = self.local.clone().lock_owned().await;

        let file = match self.path.clone() {
            Some(path) => {
                let file = tokio::task::spawn_blocking(move || -> io::Result<File> {
                    let file = File::create(&path)?;
                    file.lock_exclusive()?;
                    Ok(file)
                })
                .await
                .map_err(io::Error::other)??;
                Some(file)
            }
            None => None,
        };

        debug!("Acquired {} lock", self.name);
        Ok(ResourceGuard {
            file,
            _local: local,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_and_release() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = ResourceLock::with_file("profiles", tmp.path().join("profiles.lock")).unwrap();

        let guard = lock.acquire().await.unwrap();
        drop(guard);

        let _guard2 = lock.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn acquire_waits_while_held() {
        let lock = ResourceLock::in_process("credentials");

        let guard = lock.acquire().await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(100), lock.acquire()).await;
        assert!(waiting.is_err());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), lock.acquire())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn file_lock_excludes_other_handles() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("credentials.lock");

        // Separate handles on the same file model two processes.
        let first = ResourceLock::with_file("credentials", &path).unwrap();
        let second = ResourceLock::with_file("credentials", &path).unwrap();

        let guard = first.acquire().await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(100), second.acquire()).await;
        assert!(waiting.is_err());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), second.acquire())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_tasks_serialize() {
        let lock = ResourceLock::in_process("profiles");
        let inside = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                tokio::spawn(async move {
                    let _guard = lock.acquire().await.unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
