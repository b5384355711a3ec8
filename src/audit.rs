//! Audit sink hook: an injectable record of who ran what, where.
//!
//! Kept deliberately thin and fire-and-forget, in the same spirit as the
//! `AuthStrategy` trait object the ancestor server used to let the caller
//! plug in behavior without the core depending on a concrete implementation.
//! A failing audit sink must never affect batch progress — callers that need
//! delivery guarantees are expected to buffer and retry inside their own
//! implementation.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Info,
    Warn,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, level: AuditLevel, action: &str, details: &str, user: Option<&str>);
}

/// Routes audit events through `tracing`. The engine's default when a
/// caller supplies no sink of their own.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, level: AuditLevel, action: &str, details: &str, user: Option<&str>) {
        let user = user.unwrap_or("unknown");
        match level {
            AuditLevel::Info => {
                tracing::info!(target: "audit", action, details, user, "audit event")
            }
            AuditLevel::Warn => warn!(target: "audit", action, details, user, "audit event"),
        }
    }
}

/// Discards every event. Useful for tests that don't want audit noise.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _level: AuditLevel, _action: &str, _details: &str, _user: Option<&str>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_without_panicking() {
        NullAuditSink.record(AuditLevel::Info, "batch_start", "3 hosts", Some("alice"));
    }

    #[test]
    fn tracing_sink_accepts_without_panicking() {
        TracingAuditSink.record(AuditLevel::Warn, "batch_cancel", "cancelled by user", None);
    }
}
