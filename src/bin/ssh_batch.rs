#![deny(clippy::unwrap_used)]

//! Demonstration CLI driving the batch SSH execution engine from a JSON
//! request file, in the spirit of the ancestor server's own `main.rs`
//! bootstrap (dotenv, then `tracing_subscriber` with an env filter). Not
//! part of the engine's public contract — a real UI is expected to call
//! [`ssh_engine::execute_batch_commands`] directly rather than shell out to
//! this binary.
//!
//! Usage: `ssh-batch <request.json>` — a `BatchRequest`-shaped JSON document
//! (see `ssh_engine::types` for the wire shape); events print to stdout as
//! newline-delimited JSON as they arrive.

use std::collections::HashMap;
use std::path::PathBuf;

use dotenv::dotenv;
use serde::Deserialize;
use tracing::{error, info};

use ssh_engine::events::BatchEvent;
use ssh_engine::types::{AuthMaterial, BatchRequest, HostEntry, Secret, SessionConfigTemplate};

#[derive(Deserialize)]
struct RequestFile {
    hosts: Vec<HostSpec>,
    username: String,
    auth: AuthSpec,
    command: String,
    #[serde(default)]
    max_concurrent: Option<usize>,
    #[serde(default)]
    connect_timeout_secs: Option<u64>,
    #[serde(default)]
    reconnect_attempts: Option<u32>,
    #[serde(default)]
    reconnect_delay_base_ms: Option<u64>,
    #[serde(default)]
    retry_failed_hosts: bool,
    #[serde(default)]
    retry_interval_secs: Option<u64>,
    #[serde(default)]
    retry_max_attempts: u32,
    #[serde(default)]
    default_port: Option<u16>,
}

#[derive(Deserialize)]
struct HostSpec {
    ip: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum AuthSpec {
    Password { password: String },
    OpensshKey { path: PathBuf, passphrase: Option<String> },
    PpkKey { path: PathBuf, passphrase: Option<String> },
}

impl From<AuthSpec> for AuthMaterial {
    fn from(spec: AuthSpec) -> Self {
        match spec {
            AuthSpec::Password { password } => AuthMaterial::Password {
                secret: Secret::from(password),
            },
            AuthSpec::OpensshKey { path, passphrase } => AuthMaterial::OpensshKey {
                path,
                passphrase: passphrase.map(Secret::from),
            },
            AuthSpec::PpkKey { path, passphrase } => AuthMaterial::PpkKey {
                path,
                passphrase: passphrase.map(Secret::from),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .ok_or("usage: ssh-batch <request.json>")?;
    let raw = std::fs::read_to_string(&path)?;
    let request_file: RequestFile = serde_json::from_str(&raw)?;

    let config_template = SessionConfigTemplate {
        default_port: request_file.default_port.unwrap_or(22),
        username: request_file.username,
        auth: request_file.auth.into(),
        connect_timeout_secs: ssh_engine::config::resolve_connect_timeout(
            request_file.connect_timeout_secs,
        ),
        keep_alive_interval_secs: ssh_engine::config::DEFAULT_KEEP_ALIVE_INTERVAL_SECS,
        reconnect_attempts: request_file.reconnect_attempts.unwrap_or(3),
        reconnect_delay_base_ms: ssh_engine::config::resolve_reconnect_delay_base_ms(
            request_file.reconnect_delay_base_ms,
        ),
        compression_enabled: false,
        compression_level: None,
    };

    let hosts: Vec<HostEntry> = request_file
        .hosts
        .into_iter()
        .map(|h| HostEntry {
            ip: h.ip,
            port: h.port,
            hostname: h.hostname,
            metadata: h.metadata,
        })
        .collect();

    let max_concurrent = ssh_engine::config::resolve_max_concurrent(request_file.max_concurrent);
    info!(
        "dispatching {} host(s) with max_concurrent={}",
        hosts.len(),
        max_concurrent
    );

    let request = BatchRequest {
        hosts,
        config_template,
        command: request_file.command,
        max_concurrent,
        retry_failed_hosts: request_file.retry_failed_hosts,
        retry_interval_secs: ssh_engine::config::resolve_retry_interval(
            request_file.retry_interval_secs,
        ),
        retry_max_attempts: request_file.retry_max_attempts,
        skip_validation: false,
    };

    let (cancel, mut rx, handle) = ssh_engine::execute_batch_commands(request);

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, cancelling batch");
            ssh_engine::cancel_command_execution(&ctrl_c_cancel);
        }
    });

    while let Some(event) = rx.recv().await {
        match event {
            BatchEvent::Progress(progress) => {
                println!(
                    "{}",
                    serde_json::to_string(&progress).unwrap_or_else(|_| "{}".to_string())
                );
            }
            BatchEvent::Result(outcome) => {
                println!(
                    "{}",
                    serde_json::to_string(&outcome).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
    }

    let outcomes = handle.await?;
    let failures = outcomes.iter().filter(|o| o.error.is_some()).count();
    if failures > 0 {
        error!("{failures} of {} host(s) failed", outcomes.len());
        std::process::exit(1);
    }

    Ok(())
}
