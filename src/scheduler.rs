//! Batch Scheduler (C5): bounded-concurrency fan-out of one command across
//! a host fleet.
//!
//! The concurrency primitive is a `tokio::sync::Semaphore` sized to
//! `max_concurrent`, the same pattern a `BatchProcessor` in the reference
//! pack used for capping parallel work. Dispatch order is the input host
//! order; completion order is unspecified. Final results are re-sorted back
//! to input order before being returned, while the event stream reports
//! completions as they actually happen.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

use crate::audit::AuditSink;
use crate::auth::KeyCache;
use crate::cancel::CancelToken;
use crate::client;
use crate::events::{BatchEvent, EventSender, emit};
use crate::transport::SessionOpener;
use crate::types::{BatchOutcome, HostEntry, ProgressRecord, SessionConfigTemplate};
use crate::validator::CommandValidator;

/// Run `command` against every host in `hosts`, at most `max_concurrent` at
/// a time, streaming [`BatchEvent`]s on `events` as each host completes, and
/// returning the full result set re-ordered to match `hosts`.
///
/// A `max_concurrent` of zero is treated as one pool slot, rather than
/// blocking forever on a permit that can never be issued.
#[allow(clippy::too_many_arguments)]
pub async fn run_round(
    hosts: &[HostEntry],
    template: &SessionConfigTemplate,
    command: &str,
    max_concurrent: usize,
    cancel: &CancelToken,
    key_cache: &Arc<KeyCache>,
    validator: &Arc<dyn CommandValidator>,
    audit: &Arc<dyn AuditSink>,
    skip_validation: bool,
    opener: &Arc<dyn SessionOpener>,
    events: &EventSender,
) -> Vec<BatchOutcome> {
    let total = hosts.len();
    if total == 0 {
        return Vec::new();
    }

    let permits = max_concurrent.max(1);
    let semaphore = Arc::new(Semaphore::new(permits));
    let completed = Arc::new(AtomicUsize::new(0));
    let mut join_set = JoinSet::new();

    for (index, host) in hosts.iter().cloned().enumerate() {
        if cancel.is_tripped() {
            let outcome = BatchOutcome::failure(
                host.ip.clone(),
                crate::types::timestamp_now(),
                crate::error::classify("cancelled"),
            );
            report(events, audit, &completed, total, outcome.clone());
            join_set.spawn(async move { (index, outcome) });
            continue;
        }

        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let key_cache = Arc::clone(key_cache);
        let validator = Arc::clone(validator);
        let audit = Arc::clone(audit);
        let opener = Arc::clone(opener);
        let template = template.clone();
        let command = command.to_string();
        let events = events.clone();
        let completed = Arc::clone(&completed);

        join_set.spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit,
                _ = cancel.cancelled() => {
                    let outcome = BatchOutcome::failure(
                        host.ip.clone(),
                        crate::types::timestamp_now(),
                        crate::error::classify("cancelled"),
                    );
                    report(&events, &audit, &completed, total, outcome.clone());
                    return (index, outcome);
                }
            };

            let outcome = match permit {
                Ok(_permit) => {
                    client::execute(
                        &host,
                        &template,
                        &command,
                        &cancel,
                        &key_cache,
                        validator.as_ref(),
                        skip_validation,
                        opener.as_ref(),
                    )
                    .await
                }
                Err(_) => BatchOutcome::failure(
                    host.ip.clone(),
                    crate::types::timestamp_now(),
                    crate::error::classify("cancelled"),
                ),
            };

            report(&events, &audit, &completed, total, outcome.clone());
            (index, outcome)
        });
    }

    let mut ordered: Vec<Option<BatchOutcome>> = vec![None; total];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, outcome)) => ordered[index] = Some(outcome),
            Err(join_err) => {
                error!("scheduler worker task panicked: {join_err}");
            }
        }
    }

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| {
            outcome.unwrap_or_else(|| {
                BatchOutcome::failure(
                    hosts[index].ip.clone(),
                    crate::types::timestamp_now(),
                    crate::error::classify("internal: worker task terminated abnormally"),
                )
            })
        })
        .collect()
}

fn report(
    events: &EventSender,
    audit: &Arc<dyn AuditSink>,
    completed: &AtomicUsize,
    total: usize,
    outcome: BatchOutcome,
) {
    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;

    let detail = match &outcome.error {
        Some(error) => format!("kind={:?} retryable={}", error.kind, error.retryable),
        None => format!(
            "exit_status={}",
            outcome.result.as_ref().map(|r| r.exit_status).unwrap_or(-1)
        ),
    };
    audit.record(
        crate::audit::AuditLevel::Info,
        "host_completed",
        &format!("host={} {detail}", outcome.host),
        None,
    );

    emit(events, BatchEvent::Result(outcome.clone()));
    emit(
        events,
        BatchEvent::Progress(ProgressRecord {
            completed: done,
            total,
            host: outcome.host,
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullAuditSink;
    use crate::transport::RusshSessionOpener;
    use crate::types::{AuthMaterial, Secret};
    use crate::validator::PermissiveValidator;
    use std::collections::HashMap;

    fn template() -> SessionConfigTemplate {
        SessionConfigTemplate {
            default_port: 22,
            username: "admin".to_string(),
            auth: AuthMaterial::Password {
                secret: Secret::from("x"),
            },
            connect_timeout_secs: 1,
            keep_alive_interval_secs: 1,
            reconnect_attempts: 0,
            reconnect_delay_base_ms: 10,
            compression_enabled: false,
            compression_level: None,
        }
    }

    fn host(ip: &str) -> HostEntry {
        HostEntry {
            ip: ip.to_string(),
            port: None,
            hostname: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn empty_host_list_returns_immediately() {
        let cancel = CancelToken::new();
        let cache = Arc::new(KeyCache::new());
        let validator: Arc<dyn CommandValidator> = Arc::new(PermissiveValidator);
        let audit: Arc<dyn AuditSink> = Arc::new(NullAuditSink);
        let opener: Arc<dyn SessionOpener> = Arc::new(RusshSessionOpener);
        let (tx, _rx) = crate::events::channel();

        let outcomes = run_round(
            &[],
            &template(),
            "echo hi",
            4,
            &cancel,
            &cache,
            &validator,
            &audit,
            false,
            &opener,
            &tx,
        )
        .await;

        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn pre_cancelled_token_yields_cancelled_outcomes_for_every_host() {
        let cancel = CancelToken::new();
        cancel.trip();
        let cache = Arc::new(KeyCache::new());
        let validator: Arc<dyn CommandValidator> = Arc::new(PermissiveValidator);
        let audit: Arc<dyn AuditSink> = Arc::new(NullAuditSink);
        let opener: Arc<dyn SessionOpener> = Arc::new(RusshSessionOpener);
        let (tx, _rx) = crate::events::channel();
        let hosts = vec![host("10.0.0.1"), host("10.0.0.2"), host("10.0.0.3")];

        let outcomes = run_round(
            &hosts,
            &template(),
            "echo hi",
            2,
            &cancel,
            &cache,
            &validator,
            &audit,
            false,
            &opener,
            &tx,
        )
        .await;

        assert_eq!(outcomes.len(), 3);
        for (outcome, host) in outcomes.iter().zip(hosts.iter()) {
            assert_eq!(outcome.host, host.ip);
            assert_eq!(outcome.error_kind(), Some(crate::error::ErrorKind::Cancelled));
        }
    }

    #[tokio::test]
    async fn results_are_returned_in_input_host_order() {
        let cancel = CancelToken::new();
        cancel.trip();
        let cache = Arc::new(KeyCache::new());
        let validator: Arc<dyn CommandValidator> = Arc::new(PermissiveValidator);
        let audit: Arc<dyn AuditSink> = Arc::new(NullAuditSink);
        let opener: Arc<dyn SessionOpener> = Arc::new(RusshSessionOpener);
        let (tx, _rx) = crate::events::channel();
        let hosts = vec![
            host("10.0.0.9"),
            host("10.0.0.1"),
            host("10.0.0.5"),
        ];

        let outcomes = run_round(
            &hosts,
            &template(),
            "echo hi",
            8,
            &cancel,
            &cache,
            &validator,
            &audit,
            false,
            &opener,
            &tx,
        )
        .await;

        let order: Vec<&str> = outcomes.iter().map(|o| o.host.as_str()).collect();
        assert_eq!(order, vec!["10.0.0.9", "10.0.0.1", "10.0.0.5"]);
    }
}
