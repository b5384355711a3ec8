//! Retry Orchestrator (C6): batch-level re-submission of failed hosts across
//! rounds, distinct from the intra-session connect retry in
//! [`crate::retry`].
//!
//! Runs [`crate::scheduler::run_round`] once, then — while
//! `retry_failed_hosts` is set — keeps re-submitting the subset of hosts
//! whose latest outcome is still retryable and still under
//! `retry_max_attempts`, sleeping `retry_interval_secs` between rounds. A
//! `retry_max_attempts` of zero means unbounded retries, which is worth a
//! single startup warning since it can retry forever against a host that is
//! simply misconfigured.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::audit::{AuditLevel, AuditSink};
use crate::auth::KeyCache;
use crate::cancel::CancelToken;
use crate::events::EventSender;
use crate::scheduler;
use crate::transport::SessionOpener;
use crate::types::{BatchOutcome, BatchRequest};
use crate::validator::CommandValidator;

/// Drive a full batch to completion, including retry rounds. Returns the
/// final outcome for every host named in `request.hosts`, one entry each,
/// in input order.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    request: &BatchRequest,
    cancel: &CancelToken,
    key_cache: &Arc<KeyCache>,
    validator: &Arc<dyn CommandValidator>,
    audit: &Arc<dyn AuditSink>,
    opener: &Arc<dyn SessionOpener>,
    events: &EventSender,
) -> Vec<BatchOutcome> {
    if request.retry_failed_hosts && request.retry_max_attempts == 0 {
        warn!(
            "retry_failed_hosts is set with retry_max_attempts = 0: failed hosts will be retried \
             indefinitely until cancelled"
        );
    }

    audit.record(
        AuditLevel::Info,
        "batch_start",
        &format!(
            "{} host(s), max_concurrent={}",
            request.hosts.len(),
            request.max_concurrent
        ),
        None,
    );

    let mut latest: HashMap<String, BatchOutcome> = HashMap::new();
    let mut attempts: HashMap<String, u32> = HashMap::new();

    let mut pending = request.hosts.clone();

    loop {
        if pending.is_empty() || cancel.is_tripped() {
            break;
        }

        let round = scheduler::run_round(
            &pending,
            &request.config_template,
            &request.command,
            request.max_concurrent,
            cancel,
            key_cache,
            validator,
            audit,
            request.skip_validation,
            opener,
            events,
        )
        .await;

        for outcome in round {
            *attempts.entry(outcome.host.clone()).or_insert(0) += 1;
            latest.insert(outcome.host.clone(), outcome);
        }

        if !request.retry_failed_hosts || cancel.is_tripped() {
            break;
        }

        pending = pending
            .into_iter()
            .filter(|host| should_retry(&latest, &attempts, &host.ip, request.retry_max_attempts))
            .collect();

        if pending.is_empty() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(request.retry_interval_secs)) => {}
            _ = cancel.cancelled() => break,
        }
    }

    let outcomes: Vec<BatchOutcome> = request
        .hosts
        .iter()
        .map(|host| {
            latest.get(&host.ip).cloned().unwrap_or_else(|| {
                BatchOutcome::failure(
                    host.ip.clone(),
                    crate::types::timestamp_now(),
                    crate::error::classify("cancelled"),
                )
            })
        })
        .collect();

    let failures = outcomes.iter().filter(|o| o.error.is_some()).count();
    audit.record(
        AuditLevel::Info,
        "batch_end",
        &format!("{} of {} host(s) failed", failures, outcomes.len()),
        None,
    );

    outcomes
}

fn should_retry(
    latest: &HashMap<String, BatchOutcome>,
    attempts: &HashMap<String, u32>,
    host_ip: &str,
    retry_max_attempts: u32,
) -> bool {
    let Some(outcome) = latest.get(host_ip) else {
        return false;
    };
    let Some(error) = &outcome.error else {
        return false;
    };
    if !error.retryable {
        return false;
    }
    if retry_max_attempts == 0 {
        return true;
    }
    // `attempts` counts rounds already executed, including the initial
    // attempt, so the cap bounds *retries* (spec.md §8 Scenario C: 1 initial
    // + retry_max_attempts retries = retry_max_attempts + 1 total rounds).
    // Retrying is allowed while the rounds already run haven't yet used up
    // the retry budget.
    attempts.get(host_ip).copied().unwrap_or(0) <= retry_max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorDescriptor;

    fn outcome(kind: crate::error::ErrorKind, retryable: bool) -> BatchOutcome {
        BatchOutcome::failure(
            "10.0.0.1",
            crate::types::timestamp_now(),
            ErrorDescriptor {
                kind,
                message: "x".to_string(),
                retryable,
            },
        )
    }

    #[test]
    fn does_not_retry_successful_outcomes() {
        let mut latest = HashMap::new();
        latest.insert(
            "10.0.0.1".to_string(),
            BatchOutcome::success(crate::types::CommandResult {
                host: "10.0.0.1".to_string(),
                stdout: String::new(),
                stderr: String::new(),
                exit_status: 0,
                vehicle_id: None,
                timestamp: crate::types::timestamp_now(),
            }),
        );
        let attempts = HashMap::new();
        assert!(!should_retry(&latest, &attempts, "10.0.0.1", 3));
    }

    #[test]
    fn does_not_retry_non_retryable_errors() {
        let mut latest = HashMap::new();
        latest.insert(
            "10.0.0.1".to_string(),
            outcome(crate::error::ErrorKind::AuthDenied, false),
        );
        let attempts = HashMap::new();
        assert!(!should_retry(&latest, &attempts, "10.0.0.1", 3));
    }

    #[test]
    fn retries_transient_errors_under_the_cap() {
        let mut latest = HashMap::new();
        latest.insert(
            "10.0.0.1".to_string(),
            outcome(crate::error::ErrorKind::NetworkTransient, true),
        );
        let mut attempts = HashMap::new();
        attempts.insert("10.0.0.1".to_string(), 1);
        assert!(should_retry(&latest, &attempts, "10.0.0.1", 3));
    }

    #[test]
    fn retries_up_to_and_including_the_final_allowed_round() {
        let mut latest = HashMap::new();
        latest.insert(
            "10.0.0.1".to_string(),
            outcome(crate::error::ErrorKind::NetworkTransient, true),
        );
        let mut attempts = HashMap::new();
        // 3 rounds already run (1 initial + 2 retries) with a cap of 3
        // retries: one more retry round is still owed.
        attempts.insert("10.0.0.1".to_string(), 3);
        assert!(should_retry(&latest, &attempts, "10.0.0.1", 3));
    }

    #[test]
    fn stops_retrying_once_attempts_reach_the_cap() {
        let mut latest = HashMap::new();
        latest.insert(
            "10.0.0.1".to_string(),
            outcome(crate::error::ErrorKind::NetworkTransient, true),
        );
        let mut attempts = HashMap::new();
        // 4 rounds already run (1 initial + 3 retries) exhausts a cap of 3
        // retries.
        attempts.insert("10.0.0.1".to_string(), 4);
        assert!(!should_retry(&latest, &attempts, "10.0.0.1", 3));
    }

    #[test]
    fn zero_max_attempts_means_unbounded_retry() {
        let mut latest = HashMap::new();
        latest.insert(
            "10.0.0.1".to_string(),
            outcome(crate::error::ErrorKind::Timeout, true),
        );
        let mut attempts = HashMap::new();
        attempts.insert("10.0.0.1".to_string(), 50);
        assert!(should_retry(&latest, &attempts, "10.0.0.1", 0));
    }
}
