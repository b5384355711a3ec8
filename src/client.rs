//! Session Executor (C3): validate the command, load key material, then
//! hand off to a [`SessionOpener`] to open one SSH session, authenticate,
//! and run one command, producing a structured [`BatchOutcome`].
//!
//! One command = one session; the executor never holds a session alive
//! across commands. Every suspension point before the handoff — the
//! already-cancelled check — and every suspension point inside the opener
//! itself (connect, handshake, authentication, channel open, command write,
//! output read, channel close) checks the [`CancelToken`] via `tokio::select!`
//! against the underlying future, mirroring the timeout-racing pattern the
//! ancestor server used for `execute_ssh_command`. The opener is injected so
//! this orchestration can be exercised against a stub transport in tests
//! (see `tests/`) without ever opening a socket.

use crate::auth::KeyCache;
use crate::cancel::CancelToken;
use crate::error::classify;
use crate::transport::SessionOpener;
use crate::types::{BatchOutcome, CommandResult, HostEntry, SessionConfigTemplate, timestamp_now};
use crate::validator::CommandValidator;

/// Execute `command` on `host` via `opener`. `skip_validation` bypasses the
/// external command validator entirely (spec.md §4.3 step 1).
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    host: &HostEntry,
    template: &SessionConfigTemplate,
    command: &str,
    cancel: &CancelToken,
    key_cache: &KeyCache,
    validator: &dyn CommandValidator,
    skip_validation: bool,
    opener: &dyn SessionOpener,
) -> BatchOutcome {
    let timestamp = timestamp_now();

    if !skip_validation
        && let Err(reason) = validator.validate(command)
    {
        return BatchOutcome::failure(
            host.ip.clone(),
            timestamp,
            classify(&format!("command rejected: {reason}")),
        );
    }

    let config = template.to_session_config(host);

    if let Err(invariant) = config.auth.validate() {
        return BatchOutcome::failure(
            host.ip.clone(),
            timestamp,
            classify(&format!("malformed key: {invariant}")),
        );
    }

    let loaded_key = match key_cache.load(&config.auth).await {
        Ok(key) => key,
        Err(descriptor) => {
            return BatchOutcome::failure(host.ip.clone(), timestamp, descriptor);
        }
    };

    if cancel.is_tripped() {
        return BatchOutcome::failure(host.ip.clone(), timestamp, classify("cancelled"));
    }

    match opener
        .run(host, &config, command, cancel, loaded_key.as_deref())
        .await
    {
        Ok(output) => BatchOutcome::success(CommandResult {
            host: host.ip.clone(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status: output.exit_status,
            vehicle_id: host.vehicle_id(),
            timestamp,
        }),
        Err(message) => BatchOutcome::failure(host.ip.clone(), timestamp, classify(&message)),
    }
}
