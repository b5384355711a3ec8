//! Error classification for the batch SSH execution engine.
//!
//! Maps any failure — an I/O error, a `russh` error, a pre-flight validation
//! rejection, a key-load failure — to a closed [`ErrorKind`] plus a
//! `retryable` flag. Classification is pure, deterministic, and never
//! inspects a stack trace, only message text and the typed `cause` supplied
//! by the call site.
//!
//! # Priority
//!
//! Rules are evaluated in the order listed on [`ErrorKind`]'s variants.
//! Validation rejections and key-material failures are checked first because
//! they are definitive; authentication denial next; then the transient
//! network/timeout buckets; cancellation; and finally an `Unknown` catch-all
//! that is *retryable* by design — a transient mystery should not be given up
//! on after a single attempt.
//!
//! Phrase lists include both English and Russian wording, mirroring fleets
//! that mix locales across `sshd` builds and PAM modules.

use crate::types::ErrorDescriptor;

/// The closed set of failure causes the engine distinguishes.
///
/// `RemoteNonZero` is intentionally absent: a command that ran and exited
/// non-zero is reported through `CommandResult`, never through this
/// classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    CommandValidation,
    KeyMaterial,
    AuthDenied,
    NetworkTransient,
    Timeout,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Whether a fresh attempt may plausibly succeed. A pure function of the
    /// kind alone — this is never reconsidered once computed.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkTransient | ErrorKind::Timeout | ErrorKind::Unknown
        )
    }
}

/// Phrases that mark a command as rejected by a pre-flight safety check.
/// The engine does not own this policy (see [`crate::validator::CommandValidator`]);
/// this list only recognizes a rejection's own wording when it surfaces as a
/// plain error string.
const VALIDATION_ERRORS: &[&str] = &[
    "validation rejected",
    "command rejected",
    "disallowed command",
    "blocked by policy",
    "команда отклонена",
];

const KEY_MATERIAL_ERRORS: &[&str] = &[
    "failed to load private key",
    "failed to load ppk",
    "no such file or directory",
    "key file not found",
    "malformed key",
    "invalid key format",
    "unsupported ppk version",
    "incorrect passphrase",
    "bad passphrase",
    "mac mismatch",
    "ключ не найден",
    "неверный пароль",
];

const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "key authentication failed",
    "agent authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
    "отказано в доступе",
    "неверные учетные данные",
];

const TIMEOUT_ERRORS: &[&str] = &[
    "connection timed out",
    "connect timeout",
    "timeout",
    "timed out",
    "keepalive timeout",
    "тайм-аут",
];

const NETWORK_TRANSIENT_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "handshake failed",
    "failed to connect",
    "broken pipe",
    "would block",
    "name resolution",
    "dns",
    "соединение отклонено",
    "сеть недоступна",
];

const CANCELLED_ERRORS: &[&str] = &["cancelled", "canceled", "отменено"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify a failure message (plus an optional human-readable cause prefix,
/// e.g. from a typed `russh::Error`) into an [`ErrorDescriptor`].
///
/// First match wins, evaluated in the order: validation, key material,
/// auth denial, network transient, timeout, cancellation, unknown.
pub fn classify(message: &str) -> ErrorDescriptor {
    let lower = message.to_lowercase();

    let kind = if contains_any(&lower, VALIDATION_ERRORS) {
        ErrorKind::CommandValidation
    } else if contains_any(&lower, KEY_MATERIAL_ERRORS) {
        ErrorKind::KeyMaterial
    } else if contains_any(&lower, AUTH_ERRORS) {
        ErrorKind::AuthDenied
    } else if contains_any(&lower, NETWORK_TRANSIENT_ERRORS) {
        ErrorKind::NetworkTransient
    } else if contains_any(&lower, TIMEOUT_ERRORS) {
        ErrorKind::Timeout
    } else if contains_any(&lower, CANCELLED_ERRORS) {
        ErrorKind::Cancelled
    } else {
        ErrorKind::Unknown
    };

    ErrorDescriptor {
        kind,
        message: remediation_message(kind, message),
        retryable: kind.retryable(),
    }
}

/// Build the user-visible message, appending a short remediation hint.
/// Never echoes secret bytes — callers must not pass credential material in
/// as part of `message`.
fn remediation_message(kind: ErrorKind, message: &str) -> String {
    let hint = match kind {
        ErrorKind::CommandValidation => "the command was rejected by pre-flight validation",
        ErrorKind::KeyMaterial => "check the key path and passphrase",
        ErrorKind::AuthDenied => "check the username and credentials",
        ErrorKind::NetworkTransient => "the host may be temporarily unreachable; will retry",
        ErrorKind::Timeout => "the operation timed out; will retry",
        ErrorKind::Cancelled => "the batch was cancelled",
        ErrorKind::Unknown => "unrecognized failure; treated as transient",
    };
    format!("{message} ({hint})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_is_deterministic() {
        let a = classify("Connection refused");
        let b = classify("Connection refused");
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.retryable, b.retryable);
    }

    #[test]
    fn retryable_is_total_function_of_kind() {
        for kind in [
            ErrorKind::CommandValidation,
            ErrorKind::KeyMaterial,
            ErrorKind::AuthDenied,
            ErrorKind::NetworkTransient,
            ErrorKind::Timeout,
            ErrorKind::Cancelled,
            ErrorKind::Unknown,
        ] {
            assert_eq!(kind.retryable(), kind.retryable());
        }
    }

    #[test]
    fn auth_denied_not_retryable() {
        let d = classify("Permission denied (publickey)");
        assert_eq!(d.kind, ErrorKind::AuthDenied);
        assert!(!d.retryable);
    }

    #[test]
    fn network_transient_is_retryable() {
        let d = classify("Connection refused by server");
        assert_eq!(d.kind, ErrorKind::NetworkTransient);
        assert!(d.retryable);
    }

    #[test]
    fn timeout_is_retryable() {
        let d = classify("Connect timeout after 30s");
        assert_eq!(d.kind, ErrorKind::Timeout);
        assert!(d.retryable);
    }

    #[test]
    fn key_material_not_retryable() {
        let d = classify("Failed to load private key: No such file or directory");
        assert_eq!(d.kind, ErrorKind::KeyMaterial);
        assert!(!d.retryable);
    }

    #[test]
    fn cancelled_not_retryable() {
        let d = classify("operation cancelled");
        assert_eq!(d.kind, ErrorKind::Cancelled);
        assert!(!d.retryable);
    }

    #[test]
    fn unknown_is_conservatively_retryable() {
        let d = classify("something bizarre happened");
        assert_eq!(d.kind, ErrorKind::Unknown);
        assert!(d.retryable);
    }

    #[test]
    fn auth_takes_precedence_over_network_wording() {
        // Mirrors the ancestor classifier's documented precedence rule.
        let d = classify("Connection timeout during authentication failed");
        assert_eq!(d.kind, ErrorKind::AuthDenied);
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(classify("PERMISSION DENIED").kind, ErrorKind::AuthDenied);
        assert_eq!(
            classify("CONNECTION REFUSED").kind,
            ErrorKind::NetworkTransient
        );
    }

    #[test]
    fn validation_rejection_is_not_retried() {
        let d = classify("command rejected: contains forbidden verb");
        assert_eq!(d.kind, ErrorKind::CommandValidation);
        assert!(!d.retryable);
    }

    #[test]
    fn message_never_contains_raw_secret_when_caller_is_disciplined() {
        let d = classify("Password authentication failed");
        assert!(!d.message.contains("hunter2"));
    }
}
