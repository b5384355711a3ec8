//! Process-wide cooperative cancellation shared by all in-flight sessions of
//! one batch run.
//!
//! Built directly on `tokio_util::sync::CancellationToken` — the same crate
//! the ancestor server uses to cancel long-running async commands — but only
//! the three operations spec.md names are exposed past the wrapper:
//! `trip()`, `is_tripped()`, and an async `cancelled()` wait so a worker can
//! abandon a sleep promptly instead of polling.

use tokio_util::sync::CancellationToken;

/// One token per batch run. Tripping it after the batch has returned is a
/// no-op; the token is not reusable across runs — construct a fresh
/// `CancelToken` for each `execute_batch_commands` call.
#[derive(Clone, Default)]
pub struct CancelToken(CancellationToken);

impl CancelToken {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    /// Idempotent: tripping an already-tripped token is a no-op.
    pub fn trip(&self) {
        self.0.cancel();
    }

    /// Lock-free read.
    pub fn is_tripped(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves as soon as `trip()` is called. Workers `select!` on this
    /// alongside their I/O futures and sleeps so cancellation is observed at
    /// every suspension point.
    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }

    /// A child token that is tripped whenever this one is, but can also be
    /// tripped independently — unused by the engine today but kept for
    /// symmetry with the underlying primitive and future per-session scoping.
    #[allow(dead_code)]
    pub fn child(&self) -> CancelToken {
        Self(self.0.child_token())
    }
}
