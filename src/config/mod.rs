use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub ipsec: IpsecConfig,

    #[serde(default)]
    pub openvpn: OpenVpnConfig,

    /// `server.api_key` as written in the file, before `${VAR}` expansion
    #[serde(skip)]
    raw_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// Shared secret expected in `Authorization: Bearer` or `X-API-Key`.
    /// Supports `${ENV_VAR}` expansion. When unset every request is rejected
    /// unless `allow_unauthenticated` is true.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub allow_unauthenticated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" (default) or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Docker Engine API over the local socket
    Docker,
    /// Run commands directly on this host (bare-metal installs)
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_kind")]
    pub kind: EngineKind,

    /// Docker socket path; defaults to DOCKER_HOST or /var/run/docker.sock
    #[serde(default)]
    pub docker_socket: Option<String>,

    /// Bound for attach-mode execs, in seconds
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Bound for ephemeral containers, in seconds
    #[serde(default = "default_exec_timeout")]
    pub ephemeral_timeout_secs: u64,

    /// Bound for host commands (service restarts), in seconds
    #[serde(default = "default_host_timeout")]
    pub host_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpsecConfig {
    /// Name of the long-running privileged IPSec container
    #[serde(default = "default_ipsec_container")]
    pub container: String,

    /// Secrets file path inside the container
    #[serde(default = "default_secrets_file")]
    pub secrets_file: String,

    /// Second field written on every secrets line
    #[serde(default = "default_protocol_tag")]
    pub protocol_tag: String,

    #[serde(default = "default_restart_stop_timeout")]
    pub restart_stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenVpnConfig {
    /// Directory holding `<client>.ovpn` files, shared with the host
    #[serde(default = "default_profile_dir")]
    pub profile_dir: String,

    /// Provisioning script on the host (`--addclient` / `--revoke`)
    #[serde(default = "default_script")]
    pub script: String,

    /// Image used for ephemeral privileged containers
    #[serde(default = "default_helper_image")]
    pub helper_image: String,

    /// Host paths bound into ephemeral containers (`host:container`)
    #[serde(default = "default_binds")]
    pub binds: Vec<String>,

    /// Join the host PID namespace
    #[serde(default = "default_true")]
    pub host_pid: bool,

    /// Profile that can never be deleted
    #[serde(default = "default_protected_client")]
    pub protected_client: String,

    /// Upper bound for the profile file to appear after provisioning
    #[serde(default = "default_settle_timeout")]
    pub settle_timeout_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Host command restarting the OpenVPN unit
    #[serde(default = "default_restart_command")]
    pub restart_command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            api_key: None,
            allow_unauthenticated: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: default_engine_kind(),
            docker_socket: None,
            exec_timeout_secs: default_exec_timeout(),
            ephemeral_timeout_secs: default_exec_timeout(),
            host_timeout_secs: default_host_timeout(),
        }
    }
}

impl Default for IpsecConfig {
    fn default() -> Self {
        Self {
            container: default_ipsec_container(),
            secrets_file: default_secrets_file(),
            protocol_tag: default_protocol_tag(),
            restart_stop_timeout_secs: default_restart_stop_timeout(),
        }
    }
}

impl Default for OpenVpnConfig {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
            script: default_script(),
            helper_image: default_helper_image(),
            binds: default_binds(),
            host_pid: default_true(),
            protected_client: default_protected_client(),
            settle_timeout_ms: default_settle_timeout(),
            poll_interval_ms: default_poll_interval(),
            restart_command: default_restart_command(),
        }
    }
}

impl EngineConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn ephemeral_timeout(&self) -> Duration {
        Duration::from_secs(self.ephemeral_timeout_secs)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.host_timeout_secs)
    }
}

impl OpenVpnConfig {
    /// Profile directory with `~` expanded
    pub fn profile_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.profile_dir).to_string())
    }
}

// Default value functions
fn default_port() -> u16 {
    8080
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_engine_kind() -> EngineKind {
    EngineKind::Docker
}
fn default_exec_timeout() -> u64 {
    60
}
fn default_host_timeout() -> u64 {
    30
}
fn default_ipsec_container() -> String {
    "ipsec-mobify-server".to_string()
}
fn default_secrets_file() -> String {
    "/etc/ppp/chap-secrets".to_string()
}
fn default_protocol_tag() -> String {
    "l2tpd".to_string()
}
fn default_restart_stop_timeout() -> u64 {
    5
}
fn default_profile_dir() -> String {
    "/root".to_string()
}
fn default_script() -> String {
    "/root/openvpn.sh".to_string()
}
fn default_helper_image() -> String {
    "ubuntu:latest".to_string()
}
fn default_binds() -> Vec<String> {
    vec![
        "/root:/root".to_string(),
        "/etc/openvpn:/etc/openvpn".to_string(),
    ]
}
fn default_true() -> bool {
    true
}
fn default_protected_client() -> String {
    "client".to_string()
}
fn default_settle_timeout() -> u64 {
    10_000
}
fn default_poll_interval() -> u64 {
    200
}
fn default_restart_command() -> Vec<String> {
    ["systemctl", "restart", "openvpn-server@server.service"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// Load from an explicit file (`--config`), or the default location,
    /// creating a commented template on first run.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => paths.config_file(),
        };

        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, DEFAULT_CONFIG_TEMPLATE)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Created default config at {}", path.display());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.paths = paths;

        Ok(config)
    }

    /// Parse TOML content and expand environment references.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.expand_env_vars();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&self.for_disk())?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    fn expand_env_vars(&mut self) {
        self.raw_api_key = self.server.api_key.clone();
        if let Some(ref mut key) = self.server.api_key {
            *key = expand_env(key);
        }
    }

    /// Copy with env references restored, so saving never writes an
    /// expanded secret back to the file.
    fn for_disk(&self) -> Self {
        let mut config = self.clone();
        if let (Some(raw), Some(current)) = (&self.raw_api_key, &self.server.api_key)
            && expand_env(raw) == *current
        {
            config.server.api_key = Some(raw.clone());
        }
        config
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["server", "port"] => Ok(self.server.port.to_string()),
            ["server", "bind"] => Ok(self.server.bind.clone()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            ["engine", "kind"] => Ok(match self.engine.kind {
                EngineKind::Docker => "docker".to_string(),
                EngineKind::Local => "local".to_string(),
            }),
            ["engine", "exec_timeout_secs"] => Ok(self.engine.exec_timeout_secs.to_string()),
            ["engine", "ephemeral_timeout_secs"] => {
                Ok(self.engine.ephemeral_timeout_secs.to_string())
            }
            ["engine", "host_timeout_secs"] => Ok(self.engine.host_timeout_secs.to_string()),
            ["ipsec", "container"] => Ok(self.ipsec.container.clone()),
            ["ipsec", "secrets_file"] => Ok(self.ipsec.secrets_file.clone()),
            ["openvpn", "profile_dir"] => Ok(self.openvpn.profile_dir.clone()),
            ["openvpn", "script"] => Ok(self.openvpn.script.clone()),
            ["openvpn", "helper_image"] => Ok(self.openvpn.helper_image.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["server", "port"] => self.server.port = value.parse()?,
            ["server", "bind"] => self.server.bind = value.to_string(),
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "format"] => self.logging.format = value.to_string(),
            ["engine", "kind"] => {
                self.engine.kind = match value {
                    "docker" => EngineKind::Docker,
                    "local" => EngineKind::Local,
                    other => anyhow::bail!("engine.kind must be docker or local, got {}", other),
                }
            }
            ["engine", "exec_timeout_secs"] => self.engine.exec_timeout_secs = value.parse()?,
            ["engine", "ephemeral_timeout_secs"] => {
                self.engine.ephemeral_timeout_secs = value.parse()?
            }
            ["engine", "host_timeout_secs"] => self.engine.host_timeout_secs = value.parse()?,
            ["ipsec", "container"] => self.ipsec.container = value.to_string(),
            ["ipsec", "secrets_file"] => self.ipsec.secrets_file = value.to_string(),
            ["openvpn", "profile_dir"] => self.openvpn.profile_dir = value.to_string(),
            ["openvpn", "script"] => self.openvpn.script = value.to_string(),
            ["openvpn", "helper_image"] => self.openvpn.helper_image = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }
}

fn expand_env(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else if let Some(var_name) = s.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}

/// Default config template with helpful comments (used for first-time setup)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# vpnctl configuration
# Auto-created on first run. Edit as needed.

[server]
port = 8080
bind = "127.0.0.1"
# Required: requests must send `Authorization: Bearer <key>` or `X-API-Key: <key>`
# api_key = "${VPNCTL_API_KEY}"

[logging]
level = "info"
# format = "json"

[engine]
# docker: exec into / launch privileged containers through the Docker socket
# local:  run commands directly on this host
kind = "docker"
# docker_socket = "/var/run/docker.sock"
exec_timeout_secs = 60
ephemeral_timeout_secs = 60

[ipsec]
container = "ipsec-mobify-server"
secrets_file = "/etc/ppp/chap-secrets"
protocol_tag = "l2tpd"
restart_stop_timeout_secs = 5

[openvpn]
profile_dir = "/root"
script = "/root/openvpn.sh"
helper_image = "ubuntu:latest"
binds = ["/root:/root", "/etc/openvpn:/etc/openvpn"]
host_pid = true
# settle_timeout_ms = 10000
# poll_interval_ms = 200
# restart_command = ["systemctl", "restart", "openvpn-server@server.service"]
"#;
