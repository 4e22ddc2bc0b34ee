use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::admin::AdminError;
use crate::concurrency::ResourceLock;
use crate::config::IpsecConfig;
use crate::exec::{CommandLine, ExecMode, PrivilegedExecutor};
use crate::security::validate::escape_sed_pattern;
use crate::security::{generate_secret, validate_secret, validate_username};

/// Appends its first positional argument as one line to the file named by
/// the second. The script text never contains caller input.
const APPEND_LINE_SCRIPT: &str = r#"printf '%s\n' "$1" >> "$2""#;

/// IPSec accounts in the CHAP secrets file inside the IPSec container.
///
/// Records are `<username> <tag> <password> *`, one per line. Mutations hold
/// the credentials lock for their full duration.
pub struct CredentialStore {
    executor: Arc<PrivilegedExecutor>,
    lock: ResourceLock,
    mode: ExecMode,
    secrets_file: String,
    protocol_tag: String,
    timeout: Duration,
}

impl CredentialStore {
    pub fn new(
        executor: Arc<PrivilegedExecutor>,
        lock: ResourceLock,
        config: &IpsecConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            lock,
            mode: ExecMode::Attach {
                container: config.container.clone(),
            },
            secrets_file: config.secrets_file.clone(),
            protocol_tag: config.protocol_tag.clone(),
            timeout,
        }
    }

    /// Usernames in file order. Comments and blank lines are skipped.
    pub async fn list(&self) -> Result<Vec<String>, AdminError> {
        let cmd = CommandLine::new("cat").arg(&self.secrets_file);
        let result = self.executor.execute(&cmd, &self.mode, self.timeout).await?;
        Ok(parse_usernames(&result.output))
    }

    /// Append a record and return the password written, generating one
    /// when `password` is `None` or empty. Existing records are not checked.
    pub async fn add(&self, username: &str, password: Option<&str>) -> Result<String, AdminError> {
        validate_username(username)?;
        let password = match password.filter(|p| !p.is_empty()) {
            Some(p) => {
                validate_secret(p)?;
                p.to_string()
            }
            None => generate_secret(),
        };

        let line = format!("{} {} {} *", username, self.protocol_tag, password);
        let cmd = CommandLine::new("sh")
            .arg("-c")
            .arg(APPEND_LINE_SCRIPT)
            .arg("sh")
            .secret_arg(line)
            .arg(&self.secrets_file);

        let _guard = self
            .lock
            .acquire()
            .await
            .map_err(|e| AdminError::io("acquire credentials lock", e))?;
        self.executor.execute(&cmd, &self.mode, self.timeout).await?;

        info!("Added IPSec user {}", username);
        Ok(password)
    }

    /// Delete every record whose first field is `username`, using the same
    /// field splitting as [`list`](Self::list). Deleting an absent user
    /// succeeds.
    pub async fn remove(&self, username: &str) -> Result<(), AdminError> {
        validate_username(username)?;
        let cmd = CommandLine::new("sed")
            .arg("-E")
            .arg("-i")
            .arg(format!(
                "/^[[:space:]]*{}([[:space:]]|$)/d",
                escape_sed_pattern(username)
            ))
            .arg(&self.secrets_file);

        let _guard = self
            .lock
            .acquire()
            .await
            .map_err(|e| AdminError::io("acquire credentials lock", e))?;
        let result = self.executor.execute(&cmd, &self.mode, self.timeout).await?;
        debug!("sed finished in {:?}", result.elapsed);

        info!("Removed IPSec user {}", username);
        Ok(())
    }
}

fn parse_usernames(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
