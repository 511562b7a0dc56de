//! Pending WS-RPC correlation map.
//!
//! One entry per in-flight `call()`, keyed by correlation id. `DashMap` gives us a
//! concurrent map without an async lock on the hot insert/remove path (`spec.md` §5:
//! "the pending-calls map is the only hot shared structure in a session"). Each value is
//! a one-shot, single-consumer mailbox — exactly the "non-blocking send on the producer"
//! shape the concurrency model calls for.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

pub struct PendingCalls {
    next_id: AtomicU64,
    slots: DashMap<u64, oneshot::Sender<serde_json::Value>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: DashMap::new(),
        }
    }

    /// Allocate a fresh correlation id and register its mailbox.
    pub fn register(&self) -> (u64, oneshot::Receiver<serde_json::Value>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.slots.insert(id, tx);
        (id, rx)
    }

    /// Deliver a response. Matches scenario 5 in `spec.md` §8: a response for an id that
    /// already timed out (and was removed) is silently dropped, never a panic.
    pub fn resolve(&self, id: u64, value: serde_json::Value) -> bool {
        match self.slots.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    /// Remove a slot without delivering anything (timeout path, or disconnect drain).
    pub fn cancel(&self, id: u64) {
        self.slots.remove(&id);
    }

    /// Drain every pending call; used on disconnect so each caller observes
    /// `Disconnected` rather than hanging forever (`spec.md` §5, §4.1 reconnect step 4).
    /// Dropping the sender makes the matching receiver resolve to `RecvError`.
    pub fn drain(&self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn out_of_order_responses_reach_the_right_caller() {
        // spec.md §8 scenario 4
        let pending = PendingCalls::new();
        let (id_a, rx_a) = pending.register();
        let (id_b, rx_b) = pending.register();

        assert!(pending.resolve(id_b, serde_json::json!({"id": id_b})));
        assert!(pending.resolve(id_a, serde_json::json!({"id": id_a})));

        let got_a = rx_a.await.unwrap();
        let got_b = rx_b.await.unwrap();
        assert_eq!(got_a["id"], id_a);
        assert_eq!(got_b["id"], id_b);
    }

    #[tokio::test]
    async fn late_response_after_timeout_is_dropped_without_panic() {
        // spec.md §8 scenario 5
        let pending = PendingCalls::new();
        let (id, _rx) = pending.register();
        pending.cancel(id);
        assert!(!pending.resolve(id, serde_json::json!({})));
    }

    #[tokio::test]
    async fn drain_causes_receivers_to_observe_disconnect() {
        let pending = PendingCalls::new();
        let (_id, rx) = pending.register();
        pending.drain();
        assert!(rx.await.is_err());
    }
}
