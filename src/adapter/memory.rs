//! In-process pub/sub for tests and single-process embedders
//!
//! [`InMemoryBroker`] plays the role of the message broker: every payload
//! published on a channel fans out to all of that channel's subscribers,
//! mirroring Redis pub/sub semantics. [`InMemoryPubSub`] is the per-owner
//! adapter, so each client or server keeps its own logical connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::domain::RpcError;
use crate::port::{MessageCallback, PubSubTransport};

#[derive(Default)]
struct BrokerInner {
    /// channel -> subscribers, each tagged with the owning adapter's token
    channels: DashMap<String, Vec<(u64, MessageCallback)>>,
    next_token: AtomicU64,
}

/// Shared in-process message bus
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new logical connection to this broker
    pub fn connect(&self) -> InMemoryPubSub {
        InMemoryPubSub {
            broker: self.clone(),
            token: self.inner.next_token.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Number of subscribers currently registered on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    fn deliver(&self, channel: &str, payload: &[u8]) {
        // Clone the callbacks out before invoking them so a callback that
        // triggers another publish never re-enters the map under a guard.
        let callbacks: Vec<MessageCallback> = match self.inner.channels.get(channel) {
            Some(subs) => subs.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return,
        };
        for callback in callbacks {
            callback(channel, payload);
        }
    }
}

/// One logical connection to an [`InMemoryBroker`]
pub struct InMemoryPubSub {
    broker: InMemoryBroker,
    token: u64,
}

#[async_trait]
impl PubSubTransport for InMemoryPubSub {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), RpcError> {
        self.broker.deliver(channel, payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str, callback: MessageCallback) -> Result<(), RpcError> {
        let mut subs = self
            .broker
            .inner
            .channels
            .entry(channel.to_string())
            .or_default();
        subs.push((self.token, callback));
        debug!(channel, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), RpcError> {
        if let Some(mut subs) = self.broker.inner.channels.get_mut(channel) {
            subs.retain(|(token, _)| *token != self.token);
        }
        debug!(channel, "Unsubscribed");
        Ok(())
    }
}
