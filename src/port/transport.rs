//! Transport port: the publish/subscribe primitive the fabric runs on

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::RpcError;

/// Callback invoked for every message delivered on a subscribed channel
///
/// Invoked from the transport's dispatch loop: implementations must not
/// block. Hand anything slow off to a task.
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// A thin capability layer over a pub/sub primitive
///
/// One adapter instance owns one logical connection, shared by the owning
/// client or server. Reconnection is the adapter's business; transient
/// failures surface as [`RpcError::Connection`] and are not retried here.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Publish a payload; completes once the transport has accepted it
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), RpcError>;

    /// Install a callback for a channel; completes once the subscription is
    /// active
    async fn subscribe(&self, channel: &str, callback: MessageCallback) -> Result<(), RpcError>;

    /// Remove the channel's callback; completes when quiescent
    async fn unsubscribe(&self, channel: &str) -> Result<(), RpcError>;
}
