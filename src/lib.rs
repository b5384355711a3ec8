//! Batch SSH execution engine.
//!
//! Opens bounded-concurrency SSH sessions against a host fleet, runs one
//! command per host, classifies failures into a closed error taxonomy, and
//! retries according to policy — streaming progress and per-host results
//! back to the caller as they land rather than buffering a whole batch.
//!
//! This crate is the execution core only: it has no opinion about how a
//! command list, a host fleet, or a credential came to exist. A caller
//! (a desktop UI, a CLI, an operator script) supplies a [`types::BatchRequest`]
//! and drains a [`events::BatchEvent`] stream.

pub mod audit;
pub mod auth;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod transport;
pub mod types;
pub mod validator;

use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::auth::KeyCache;
use crate::cancel::CancelToken;
use crate::events::{BatchEvent, EventReceiver};
use crate::transport::{RusshSessionOpener, SessionOpener};
use crate::types::{BatchOutcome, BatchRequest, HostEntry, SessionConfigTemplate};
use crate::validator::{CommandValidator, PermissiveValidator};

/// Run one command on one host and wait for the single outcome. A thin
/// wrapper over the scheduler for callers that don't need a whole batch —
/// e.g. a "test connection" action in a UI.
pub async fn execute_ssh_command(
    host: HostEntry,
    template: SessionConfigTemplate,
    command: String,
) -> BatchOutcome {
    let cancel = CancelToken::new();
    let key_cache = KeyCache::new();
    client::execute(
        &host,
        &template,
        &command,
        &cancel,
        &key_cache,
        &PermissiveValidator,
        false,
        &RusshSessionOpener,
    )
    .await
}

/// Run a full batch: fan out `request.command` across `request.hosts` with
/// bounded concurrency, retrying per `request.retry_*` fields. Returns a
/// [`CancelToken`] the caller can trip to stop the batch early (see
/// [`cancel_command_execution`]) and an [`EventReceiver`] that streams
/// progress and per-host results as they complete; the returned `JoinHandle`
/// resolves to the final, input-ordered `Vec<BatchOutcome>` once every host
/// has a terminal outcome.
pub fn execute_batch_commands(
    request: BatchRequest,
) -> (
    CancelToken,
    EventReceiver,
    tokio::task::JoinHandle<Vec<BatchOutcome>>,
) {
    execute_batch_commands_with(request, Arc::new(PermissiveValidator))
}

/// Like [`execute_batch_commands`], but with a caller-supplied command
/// validator instead of the permissive default (spec.md §9: the engine core
/// does not hard-code a validation rule set).
pub fn execute_batch_commands_with(
    request: BatchRequest,
    validator: Arc<dyn CommandValidator>,
) -> (
    CancelToken,
    EventReceiver,
    tokio::task::JoinHandle<Vec<BatchOutcome>>,
) {
    execute_batch_commands_with_audit(request, validator, Arc::new(TracingAuditSink))
}

/// Like [`execute_batch_commands_with`], but with a caller-supplied audit
/// sink instead of the `tracing`-backed default (spec.md §6: the core emits
/// one audit record per batch start, one per host completion, and one per
/// batch end; the sink itself is an external collaborator).
pub fn execute_batch_commands_with_audit(
    request: BatchRequest,
    validator: Arc<dyn CommandValidator>,
    audit: Arc<dyn AuditSink>,
) -> (
    CancelToken,
    EventReceiver,
    tokio::task::JoinHandle<Vec<BatchOutcome>>,
) {
    execute_batch_commands_with_opener(request, validator, audit, Arc::new(RusshSessionOpener))
}

/// Like [`execute_batch_commands_with_audit`], but with a caller-supplied
/// [`SessionOpener`] instead of the real `russh`-backed transport. This is
/// the seam the integration tests under `tests/` use to drive the scheduler
/// and orchestrator against a stub transport without a real socket.
pub fn execute_batch_commands_with_opener(
    request: BatchRequest,
    validator: Arc<dyn CommandValidator>,
    audit: Arc<dyn AuditSink>,
    opener: Arc<dyn SessionOpener>,
) -> (
    CancelToken,
    EventReceiver,
    tokio::task::JoinHandle<Vec<BatchOutcome>>,
) {
    let cancel = CancelToken::new();
    let (tx, rx) = crate::events::channel();
    let key_cache = Arc::new(KeyCache::new());

    let task_cancel = cancel.clone();
    let host_count = request.hosts.len();
    info!(
        "starting batch of {} host(s), max_concurrent={}",
        host_count, request.max_concurrent
    );

    let handle = tokio::spawn(async move {
        let outcomes = orchestrator::run(
            &request,
            &task_cancel,
            &key_cache,
            &validator,
            &audit,
            &opener,
            &tx,
        )
        .await;
        drop(tx);
        outcomes
    });

    (cancel, rx, handle)
}

/// Trip a batch's cancellation token. Cooperative: in-flight sessions finish
/// their current suspension point and report `Cancelled`; hosts not yet
/// dispatched are marked `Cancelled` without ever opening a connection.
pub fn cancel_command_execution(cancel: &CancelToken) {
    cancel.trip();
}

/// Drain every event from `rx` into a `Vec`, for callers (tests, simple
/// scripts) that don't want to hold a channel open across an `.await` loop
/// of their own.
pub async fn collect_events(mut rx: EventReceiver) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
