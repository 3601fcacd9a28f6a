//! Correlation of response envelopes back to waiting callers
//!
//! Each in-flight request owns a one-shot slot keyed by its correlation id.
//! The slot is registered before the request is published, so a response
//! arriving arbitrarily early always finds it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::domain::{Response, RpcError};

/// The value a pending slot resolves to: a response, or a local error
/// injected by cancellation or disposal
pub type SlotResult = Result<Response, RpcError>;

/// Receiving half of a pending slot
pub type PendingSlot = oneshot::Receiver<SlotResult>;

/// Concurrent map from correlation id to pending slot
#[derive(Default)]
pub struct PendingResponses {
    pending: DashMap<String, oneshot::Sender<SlotResult>>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for a request id
    ///
    /// A duplicate id is a caller bug and is rejected rather than silently
    /// replacing the existing slot.
    pub fn register(&self, id: &str) -> Result<PendingSlot, RpcError> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RpcError::InvalidArgument(format!(
                "Duplicate request id: {}",
                id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Fulfill a slot with a response
    ///
    /// Returns false when the id has no slot (stale response after a
    /// timeout, cancellation, or disposal) or the waiter is gone.
    pub fn complete(&self, id: &str, response: Response) -> bool {
        match self.pending.remove(id) {
            Some((_, tx)) => {
                if tx.send(Ok(response)).is_err() {
                    debug!(id, "Waiter gone before response delivery");
                    false
                } else {
                    true
                }
            }
            None => {
                warn!(id, "Response for unknown or expired correlation id");
                false
            }
        }
    }

    /// Best-effort removal of a slot that is no longer awaited
    pub fn remove(&self, id: &str) {
        self.pending.remove(id);
    }

    /// Fail every outstanding slot and clear the map
    ///
    /// Returns the number of slots cancelled.
    pub fn cancel_all(&self, reason: impl Fn() -> RpcError) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(reason()));
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_complete() {
        let registry = PendingResponses::new();
        let slot = registry.register("id-1").unwrap();
        assert_eq!(registry.len(), 1);

        assert!(registry.complete("id-1", Response::success("id-1", Some(json!(42)))));
        assert!(registry.is_empty());

        let response = slot.await.unwrap().unwrap();
        assert_eq!(response.result.unwrap(), json!(42));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = PendingResponses::new();
        let _slot = registry.register("id-1").unwrap();
        assert!(matches!(
            registry.register("id-1"),
            Err(RpcError::InvalidArgument(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_complete_unknown_id_returns_false() {
        let registry = PendingResponses::new();
        assert!(!registry.complete("nope", Response::success("nope", None)));
    }

    #[test]
    fn test_remove_is_best_effort() {
        let registry = PendingResponses::new();
        let _slot = registry.register("id-1").unwrap();
        registry.remove("id-1");
        registry.remove("id-1");
        assert!(registry.is_empty());
        assert!(!registry.complete("id-1", Response::success("id-1", None)));
    }

    #[tokio::test]
    async fn test_cancel_all_fails_every_slot() {
        let registry = PendingResponses::new();
        let slot_a = registry.register("a").unwrap();
        let slot_b = registry.register("b").unwrap();

        let cancelled = registry.cancel_all(|| RpcError::Disposed);
        assert_eq!(cancelled, 2);
        assert!(registry.is_empty());

        assert!(matches!(slot_a.await.unwrap(), Err(RpcError::Disposed)));
        assert!(matches!(slot_b.await.unwrap(), Err(RpcError::Disposed)));
    }
}
