//! Append-only, hash-chained audit log of privileged executions.
//!
//! Stored at `<state_dir>/vpnctl.audit.jsonl`. This is the operator
//! channel: unlike the tracing output, entries carry the full, unredacted
//! argument vector of every privileged command.
//!
//! # Format
//!
//! One JSON object per line (JSONL). Each entry includes:
//!
//! | Field | Description |
//! |-------|-------------|
//! | `ts` | ISO 8601 timestamp |
//! | `action` | `executed`, `failed`, `timed_out`, `restarted` |
//! | `mode` | `attach`, `ephemeral`, `host` or `engine` |
//! | `target` | container name, image, or unit |
//! | `command` | full argv |
//! | `exit_code` | remote exit status when known |
//! | `prev_entry_sha256` | SHA-256 of the previous JSONL line (chain link) |
//!
//! # Chain Integrity
//!
//! The first entry uses `000...000` (64 zeros) as `prev_entry_sha256`.
//! Every subsequent entry hashes the raw bytes of the previous line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The hash used for the first entry in the chain (no predecessor).
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Bytes read from the end of the log when looking for the last line.
const TAIL_WINDOW: u64 = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: String,
    pub action: AuditAction,
    pub mode: String,
    pub target: String,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub elapsed_ms: u64,
    pub prev_entry_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Command ran and exited successfully.
    Executed,
    /// Command could not run, or exited non-zero.
    Failed,
    /// Command exceeded its bound; its effect is unknown.
    TimedOut,
    /// A container was restarted through the engine.
    Restarted,
    /// Previous audit entry corrupted, new chain segment started.
    ChainRecovery,
}

/// One privileged invocation as seen by the audit channel.
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub action: AuditAction,
    pub mode: &'a str,
    pub target: &'a str,
    pub command: &'a [String],
    pub exit_code: Option<i64>,
    pub elapsed_ms: u64,
    pub detail: Option<String>,
}

/// Handle on the audit file. Appends are serialized so the chain stays
/// linear when requests execute concurrently.
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a new entry.
    ///
    /// Reads only the tail of the existing log to find the last line for
    /// the chain hash, so the cost does not grow with the log. Other
    /// processes may append to the same file, so the hash is never cached.
    /// If the last line is corrupted, a `ChainRecovery` entry is inserted
    /// first to record the break point.
    pub fn append(&self, record: AuditRecord<'_>) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("audit log lock poisoned"))?;

        let prev_hash = match last_line(&self.path)? {
            None => GENESIS_HASH.to_string(),
            Some(line) if parses_as_entry(&line) => sha256_hex(&line),
            Some(line) => {
                let recovery = AuditEntry {
                    ts: chrono::Utc::now().to_rfc3339(),
                    action: AuditAction::ChainRecovery,
                    mode: "audit".to_string(),
                    target: String::new(),
                    command: Vec::new(),
                    exit_code: None,
                    elapsed_ms: 0,
                    prev_entry_sha256: sha256_hex(&line),
                    detail: Some(format!(
                        "Previous entry corrupted ({} bytes), new chain segment",
                        line.len()
                    )),
                };
                let recovery_json = serde_json::to_string(&recovery)
                    .context("Failed to serialize recovery entry")?;
                append_line(&self.path, &recovery_json)?;
                sha256_hex(recovery_json.as_bytes())
            }
        };

        let entry = AuditEntry {
            ts: chrono::Utc::now().to_rfc3339(),
            action: record.action,
            mode: record.mode.to_string(),
            target: record.target.to_string(),
            command: record.command.to_vec(),
            exit_code: record.exit_code,
            elapsed_ms: record.elapsed_ms,
            prev_entry_sha256: prev_hash,
            detail: record.detail,
        };

        let json = serde_json::to_string(&entry).context("Failed to serialize audit entry")?;
        append_line(&self.path, &json)
    }

    /// Read and parse all entries. Corrupted lines are skipped.
    pub fn read(&self) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).context("Failed to read audit log")?;
        Ok(content
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
            .collect())
    }

    /// Verify the hash chain.
    ///
    /// Returns the indices where `prev_entry_sha256` does not match the
    /// previous line. An empty vector means the chain is intact.
    pub fn verify(&self) -> Result<Vec<usize>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).context("Failed to read audit log")?;
        let lines: Vec<&str> = content.lines().filter(|l| !l.is_empty()).collect();
        let parsed: Vec<Option<AuditEntry>> = lines
            .iter()
            .map(|line| serde_json::from_str(line).ok())
            .collect();

        let mut broken = Vec::new();
        for (i, entry) in parsed.iter().enumerate() {
            let Some(entry) = entry else {
                broken.push(i);
                continue;
            };
            let expected = if i == 0 {
                GENESIS_HASH.to_string()
            } else {
                sha256_hex(lines[i - 1].as_bytes())
            };
            if entry.prev_entry_sha256 != expected {
                broken.push(i);
            }
        }

        Ok(broken)
    }
}

/// Last line of the file without its terminator, read backwards in growing
/// chunks. `None` for a missing or empty file, or an empty last line.
fn last_line(path: &Path) -> Result<Option<Vec<u8>>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context("Failed to open audit log"),
    };
    let len = file.metadata().context("Failed to stat audit log")?.len();

    let mut window = TAIL_WINDOW;
    loop {
        let start = len.saturating_sub(window);
        file.seek(SeekFrom::Start(start))
            .context("Failed to seek audit log")?;
        let mut tail = Vec::new();
        (&mut file)
            .take(len - start)
            .read_to_end(&mut tail)
            .context("Failed to read audit log")?;

        let mut body = tail.as_slice();
        if let Some(rest) = body.strip_suffix(b"\n") {
            body = rest.strip_suffix(b"\r").unwrap_or(rest);
        }
        match body.iter().rposition(|&b| b == b'\n') {
            Some(pos) => return Ok(non_empty(&body[pos + 1..])),
            None if start == 0 => return Ok(non_empty(body)),
            None => window = window.saturating_mul(2),
        }
    }
}

fn non_empty(line: &[u8]) -> Option<Vec<u8>> {
    (!line.is_empty()).then(|| line.to_vec())
}

fn parses_as_entry(line: &[u8]) -> bool {
    serde_json::from_slice::<AuditEntry>(line).is_ok()
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open audit log")?;
    writeln!(file, "{}", line).context("Failed to write audit entry")?;
    Ok(())
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
