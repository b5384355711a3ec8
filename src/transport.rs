//! Session transport seam: "open a session, authenticate, run one command"
//! behind a trait, so the machinery above it — the Session Executor's
//! validation/key-loading steps (C3), the Batch Scheduler (C5), the Retry
//! Orchestrator (C6), cancellation (C8) — can be exercised by tests without
//! opening a real socket. [`RusshSessionOpener`] is the production
//! implementation and the only one wired into the public entry points in
//! `lib.rs`; a stub implementing the same trait is how the integration
//! tests under `tests/` drive the scheduler deterministically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, client};
use tracing::{debug, warn};

use crate::auth::LoadedKey;
use crate::auth::strategy::{AuthStrategy, PasswordAuth, PrivateKeyAuth};
use crate::cancel::CancelToken;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::types::{AuthMaterial, HostEntry, SessionConfig};

/// The result of running one command inside one session, as handed back to
/// [`crate::client::execute`]. `exit_status` is only ever populated when the
/// remote side actually reported `exit-status`/`exit-signal` — a session
/// that never gets that far is an `Err`, not a fabricated completion.
pub struct SessionOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: i32,
}

/// Opens a session against `host`, authenticates per `config.auth`, and runs
/// `command` to completion (or until `cancel` fires). Implementations are
/// expected to honor every suspension point named in spec.md §4.3 against
/// `cancel`.
#[async_trait]
pub trait SessionOpener: Send + Sync {
    async fn run(
        &self,
        host: &HostEntry,
        config: &SessionConfig,
        command: &str,
        cancel: &CancelToken,
        loaded_key: Option<&LoadedKey>,
    ) -> Result<SessionOutput, String>;
}

/// `russh` client handler. Accepts all host keys — host-key TOFU persistence
/// is out of scope (spec.md §1 Non-goals); a production deployment layering
/// this engine under a UI is expected to supply its own verifying handler if
/// it wants one, but the engine core does not implement that policy.
#[derive(Clone, Copy, Default)]
pub struct SshHandler;

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

fn build_client_config(cfg: &SessionConfig) -> Arc<client::Config> {
    let compression = if cfg.compression_enabled {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: Some(Duration::from_secs(cfg.keep_alive_interval_secs)),
        keepalive_interval: Some(Duration::from_secs(cfg.keep_alive_interval_secs)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// The production transport: a real `russh` SSH session per call, with the
/// intra-session reconnect policy (C4) wrapped around the connect+
/// authenticate step.
#[derive(Clone, Copy, Default)]
pub struct RusshSessionOpener;

#[async_trait]
impl SessionOpener for RusshSessionOpener {
    async fn run(
        &self,
        host: &HostEntry,
        config: &SessionConfig,
        command: &str,
        cancel: &CancelToken,
        loaded_key: Option<&LoadedKey>,
    ) -> Result<SessionOutput, String> {
        let retry_policy = RetryPolicy::new(
            config.reconnect_attempts,
            Duration::from_millis(config.reconnect_delay_base_ms),
        );

        let handle = retry_policy
            .run(cancel, || connect_and_authenticate(host, config, loaded_key))
            .await;

        let handle = match handle {
            RetryOutcome::Succeeded(handle) => handle,
            RetryOutcome::Cancelled => return Err("cancelled".to_string()),
            RetryOutcome::Exhausted(message) => return Err(message),
        };

        run_command(host, config, command, cancel, handle).await
    }
}

async fn connect_and_authenticate(
    host: &HostEntry,
    config: &SessionConfig,
    loaded_key: Option<&LoadedKey>,
) -> Result<client::Handle<SshHandler>, String> {
    let client_config = build_client_config(config);
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    let target = (host.ip.as_str(), config.port);

    let connect_future = client::connect(client_config, target, SshHandler);
    let mut handle = tokio::time::timeout(connect_timeout, connect_future)
        .await
        .map_err(|_| format!("connect timeout after {:?}", connect_timeout))?
        .map_err(|e| format!("failed to connect: {e}"))?;

    let authenticated = match &config.auth {
        AuthMaterial::Password { secret } => {
            PasswordAuth { password: secret }
                .authenticate(&mut handle, &config.username)
                .await?
        }
        AuthMaterial::OpensshKey { .. } | AuthMaterial::PpkKey { .. } => {
            let key = loaded_key.ok_or_else(|| "failed to load private key: not loaded".to_string())?;
            PrivateKeyAuth { key }
                .authenticate(&mut handle, &config.username)
                .await?
        }
    };

    if !authenticated {
        return Err("authentication failed: no authentication methods succeeded".to_string());
    }

    Ok(handle)
}

async fn run_command(
    host: &HostEntry,
    config: &SessionConfig,
    command: &str,
    cancel: &CancelToken,
    handle: client::Handle<SshHandler>,
) -> Result<SessionOutput, String> {
    let channel = tokio::select! {
        result = handle.channel_open_session() => result,
        _ = cancel.cancelled() => return Err("cancelled".to_string()),
    };

    let mut channel = channel.map_err(|e| format!("failed to open channel: {e}"))?;

    let exec_result = tokio::select! {
        result = channel.exec(true, command) => result,
        _ = cancel.cancelled() => {
            let _ = channel.close().await;
            return Err("cancelled".to_string());
        }
    };

    if let Err(e) = exec_result {
        return Err(format!("failed to execute command: {e}"));
    }

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status: Option<i32> = None;
    let idle_timeout = Duration::from_secs(config.keep_alive_interval_secs.max(1) * 4);

    loop {
        let next = tokio::select! {
            msg = channel.wait() => Ok(msg),
            _ = tokio::time::sleep(idle_timeout) => Err("keep-alive timeout: no output received"),
            _ = cancel.cancelled() => {
                let _ = channel.close().await;
                return Err("cancelled".to_string());
            }
        };

        let msg = match next {
            Ok(msg) => msg,
            Err(timeout_msg) => {
                let _ = channel.close().await;
                return Err(timeout_msg.to_string());
            }
        };

        match msg {
            Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                exit_status = Some(code as i32);
            }
            Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                exit_status = Some(128 + signal_number(&signal_name));
            }
            Some(ChannelMsg::Eof) => {
                if exit_status.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) => break,
            Some(_) => {}
            None => break,
        }
    }

    let _ = channel.close().await;

    // The remote side is only a `RemoteNonZero` success once it has actually
    // reported an exit status. A channel that closes beforehand (dropped
    // connection mid-command, server-side kill) is a connection failure,
    // not a completed command with a fabricated code.
    let Some(exit_status) = exit_status else {
        warn!(
            "host {} closed the channel without reporting an exit status",
            host.ip
        );
        return Err("connection reset: channel closed before an exit status arrived".to_string());
    };

    debug!(
        "command on {} finished with exit status {}",
        host.ip, exit_status
    );

    Ok(SessionOutput {
        stdout,
        stderr,
        exit_status,
    })
}

fn signal_number(name: &russh::Sig) -> i32 {
    use russh::Sig;
    match name {
        Sig::HUP => 1,
        Sig::INT => 2,
        Sig::QUIT => 3,
        Sig::ILL => 4,
        Sig::ABRT => 6,
        Sig::FPE => 8,
        Sig::KILL => 9,
        Sig::SEGV => 11,
        Sig::PIPE => 13,
        Sig::ALRM => 14,
        Sig::TERM => 15,
        Sig::USR1 => 10,
        Sig::USR2 => 12,
        Sig::Custom(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_mapping_matches_posix_numbers() {
        assert_eq!(signal_number(&russh::Sig::TERM), 15);
        assert_eq!(signal_number(&russh::Sig::KILL), 9);
        assert_eq!(signal_number(&russh::Sig::HUP), 1);
    }
}
