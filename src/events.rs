//! Event Channel (C7): the streaming interface between the scheduler and
//! whatever is driving the batch (a UI, the demonstration binary, a test).
//!
//! Built on `tokio::sync::mpsc`, the same channel primitive the ancestor
//! server reached for whenever it needed to hand work between tasks. A
//! dropped receiver is not an error — the scheduler keeps running to
//! completion, it just stops being observed, matching spec.md §4.7's
//! explicit instruction that a consumer walking away must not abort a batch.

use crate::types::{BatchOutcome, ProgressRecord};

#[derive(Debug, Clone)]
pub enum BatchEvent {
    Progress(ProgressRecord),
    Result(BatchOutcome),
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<BatchEvent>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<BatchEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Send an event, ignoring a dropped receiver. `send` on an `UnboundedSender`
/// only fails when every receiver has been dropped, which is an expected
/// shutdown path here, not a fault.
pub fn emit(sender: &EventSender, event: BatchEvent) {
    let _ = sender.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, classify};

    #[test]
    fn emit_after_receiver_dropped_does_not_panic() {
        let (tx, rx) = channel();
        drop(rx);
        emit(
            &tx,
            BatchEvent::Progress(ProgressRecord {
                completed: 1,
                total: 1,
                host: "10.0.0.1".to_string(),
            }),
        );
    }

    #[tokio::test]
    async fn events_arrive_in_send_order() {
        let (tx, mut rx) = channel();
        emit(
            &tx,
            BatchEvent::Progress(ProgressRecord {
                completed: 0,
                total: 2,
                host: "10.0.0.1".to_string(),
            }),
        );
        let descriptor = classify("connection refused");
        assert_eq!(descriptor.kind, ErrorKind::NetworkTransient);
        emit(
            &tx,
            BatchEvent::Result(crate::types::BatchOutcome::failure(
                "10.0.0.1",
                crate::types::timestamp_now(),
                descriptor,
            )),
        );
        drop(tx);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, BatchEvent::Progress(_)));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, BatchEvent::Result(_)));
        assert!(rx.recv().await.is_none());
    }
}
