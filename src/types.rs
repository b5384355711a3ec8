//! Data model for the batch SSH execution engine: hosts, credentials,
//! per-session configuration, and the outcome types streamed back to a
//! caller.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// A secret byte string that is zeroed on drop (best-effort memory hygiene).
/// `Debug` and `Display` are both redacted — secrets must never reach a log
/// line, an event, or an error message.
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            // SAFETY: plain volatile-ish best-effort zeroing; no allocator
            // guarantees are assumed beyond "don't optimize this away".
            unsafe { std::ptr::write_volatile(byte, 0) };
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<redacted>)")
    }
}

/// Authentication material for a batch run. Built once per batch from UI
/// config, shared by reference across all sessions, and loaded lazily by the
/// key material loader on first use.
#[derive(Clone)]
pub enum AuthMaterial {
    Password {
        secret: Secret,
    },
    OpensshKey {
        path: PathBuf,
        passphrase: Option<Secret>,
    },
    PpkKey {
        path: PathBuf,
        passphrase: Option<Secret>,
    },
}

impl fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMaterial::Password { .. } => write!(f, "AuthMaterial::Password(<redacted>)"),
            AuthMaterial::OpensshKey { path, .. } => {
                write!(f, "AuthMaterial::OpensshKey({path:?}, <redacted>)")
            }
            AuthMaterial::PpkKey { path, .. } => {
                write!(f, "AuthMaterial::PpkKey({path:?}, <redacted>)")
            }
        }
    }
}

impl AuthMaterial {
    /// The invariant from the data model: key variants require a non-empty
    /// path, the password variant requires a non-empty secret.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            AuthMaterial::Password { secret } if secret.is_empty() => {
                Err("password must be non-empty".to_string())
            }
            AuthMaterial::OpensshKey { path, .. } | AuthMaterial::PpkKey { path, .. }
                if path.as_os_str().is_empty() =>
            {
                Err("key path must be non-empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// An identifiable target. Immutable once handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub ip: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl HostEntry {
    pub fn vehicle_id(&self) -> Option<String> {
        self.metadata.get("vehicle_id").cloned()
    }
}

/// Per-session parameters derived from the batch template and the target
/// host. `target`/`username`/`auth` are resolved by the caller before
/// construction; this struct carries only the knobs the executor needs.
#[derive(Clone)]
pub struct SessionConfig {
    pub port: u16,
    pub username: String,
    pub auth: AuthMaterial,
    pub connect_timeout_secs: u64,
    pub keep_alive_interval_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_base_ms: u64,
    pub compression_enabled: bool,
    pub compression_level: Option<u8>,
}

impl SessionConfig {
    /// Merge a host's per-host overrides (currently: port) onto a template.
    pub fn merged_for_host(template: &SessionConfig, host: &HostEntry) -> SessionConfig {
        let mut cfg = template.clone();
        if let Some(port) = host.port {
            cfg.port = port;
        }
        cfg
    }
}

/// A template `SessionConfig` without a concrete target, as carried in a
/// `BatchRequest`.
#[derive(Clone)]
pub struct SessionConfigTemplate {
    pub default_port: u16,
    pub username: String,
    pub auth: AuthMaterial,
    pub connect_timeout_secs: u64,
    pub keep_alive_interval_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_base_ms: u64,
    pub compression_enabled: bool,
    pub compression_level: Option<u8>,
}

impl SessionConfigTemplate {
    pub fn to_session_config(&self, host: &HostEntry) -> SessionConfig {
        SessionConfig {
            port: host.port.unwrap_or(self.default_port),
            username: self.username.clone(),
            auth: self.auth.clone(),
            connect_timeout_secs: self.connect_timeout_secs,
            keep_alive_interval_secs: self.keep_alive_interval_secs,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay_base_ms: self.reconnect_delay_base_ms,
            compression_enabled: self.compression_enabled,
            compression_level: self.compression_level,
        }
    }
}

/// The outcome of one successful command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub host: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    pub timestamp: String,
}

/// `{kind, message, retryable}` — `retryable` is derived from `kind` and
/// never reconsidered once computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// Per-host terminal record: either a populated `result` or a populated
/// `error`, never both, never neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub host: String,
    pub timestamp: String,
    pub result: Option<CommandResult>,
    pub error: Option<ErrorDescriptor>,
}

impl BatchOutcome {
    pub fn success(result: CommandResult) -> Self {
        Self {
            host: result.host.clone(),
            timestamp: result.timestamp.clone(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(host: impl Into<String>, timestamp: String, error: ErrorDescriptor) -> Self {
        Self {
            host: host.into(),
            timestamp,
            result: None,
            error: Some(error),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// `{completed, total, host}` — monotonically non-decreasing `completed` per
/// batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub completed: usize,
    pub total: usize,
    pub host: String,
}

/// The immutable input to the batch scheduler.
#[derive(Clone)]
pub struct BatchRequest {
    pub hosts: Vec<HostEntry>,
    pub config_template: SessionConfigTemplate,
    pub command: String,
    pub max_concurrent: usize,
    pub retry_failed_hosts: bool,
    pub retry_interval_secs: u64,
    pub retry_max_attempts: u32,
    pub skip_validation: bool,
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn timestamp_now() -> String {
    now_iso8601()
}
