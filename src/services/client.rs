//! Client side of the RPC fabric
//!
//! One client owns one response channel for its whole lifetime and
//! multiplexes every in-flight request over it, keyed by correlation id.
//! The response subscription is installed lazily on the first request; a
//! notification never needs it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RpcConfig;
use crate::domain::envelope::coerce_result;
use crate::domain::{channels, Request, Response, RpcError};
use crate::port::{MessageCallback, PubSubTransport};
use crate::services::correlation::{PendingResponses, PendingSlot};

/// RPC client over a pub/sub transport
pub struct RpcClient<T: PubSubTransport> {
    transport: Arc<T>,
    config: RpcConfig,
    response_channel: String,
    pending: Arc<PendingResponses>,
    subscribe_lock: Mutex<()>,
    listening: AtomicBool,
    disposed: AtomicBool,
}

impl<T: PubSubTransport + 'static> RpcClient<T> {
    /// Create a client; no subscription is installed until the first request
    pub fn new(transport: Arc<T>, config: RpcConfig) -> Self {
        let response_channel = channels::response_channel(&config.channel_prefix);
        debug!(response_channel, "Created RPC client");
        Self {
            transport,
            config,
            response_channel,
            pending: Arc::new(PendingResponses::new()),
            subscribe_lock: Mutex::new(()),
            listening: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// The response channel owned by this client
    pub fn response_channel(&self) -> &str {
        &self.response_channel
    }

    /// Send a request and coerce the result into `R`
    pub async fn send_request<R: DeserializeOwned>(
        &self,
        channel: &str,
        method: &str,
        params: Option<Value>,
        timeout_ms: Option<u64>,
        cancel: Option<CancellationToken>,
    ) -> Result<R, RpcError> {
        let raw = self
            .send_request_raw(channel, method, params, timeout_ms, cancel)
            .await?;
        coerce_result(raw.unwrap_or(Value::Null))
    }

    /// Send a request and return the raw result value
    pub async fn send_request_raw(
        &self,
        channel: &str,
        method: &str,
        params: Option<Value>,
        timeout_ms: Option<u64>,
        cancel: Option<CancellationToken>,
    ) -> Result<Option<Value>, RpcError> {
        self.check_disposed()?;
        validate_target(channel, method)?;
        self.ensure_subscribed().await?;

        let timeout_ms = timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let request = Request::new(
            method,
            params,
            self.response_channel.clone(),
            Some(timeout_ms),
        );

        // The slot goes in before the publish so a response that beats the
        // publish's own return always finds somewhere to land.
        let slot = self.pending.register(&request.id)?;
        let bytes = match request.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pending.remove(&request.id);
                return Err(e);
            }
        };
        let request_channel = channels::request_channel(&self.config.channel_prefix, channel);
        if let Err(e) = self.transport.publish(&request_channel, &bytes).await {
            self.pending.remove(&request.id);
            return Err(e);
        }
        debug!(id = %request.id, method, channel = %request_channel, "Published request");

        let response = self
            .await_response(slot, &request.id, timeout_ms, cancel)
            .await?;

        if response.success {
            Ok(response.result)
        } else {
            match response.error {
                Some(detail) => Err(RpcError::from_error_detail(&detail, method)),
                None => Err(RpcError::Unknown(
                    "Failure response carried no error record".to_string(),
                )),
            }
        }
    }

    /// Publish a fire-and-forget notification
    ///
    /// Returns once the transport has accepted the message; no response is
    /// ever expected and no slot is registered.
    pub async fn send_notification(
        &self,
        channel: &str,
        method: &str,
        params: Option<Value>,
        cancel: Option<CancellationToken>,
    ) -> Result<(), RpcError> {
        self.check_disposed()?;
        validate_target(channel, method)?;
        if let Some(token) = &cancel {
            if token.is_cancelled() {
                return Err(RpcError::Cancelled("Notification cancelled".to_string()));
            }
        }

        let request = Request::notification(method, params);
        let bytes = request.to_bytes()?;
        let request_channel = channels::request_channel(&self.config.channel_prefix, channel);
        self.transport.publish(&request_channel, &bytes).await?;
        debug!(method, channel = %request_channel, "Published notification");
        Ok(())
    }

    /// Fail all outstanding requests and release the response subscription
    ///
    /// Idempotent; any call after the first is a no-op. Subsequent requests
    /// are rejected with [`RpcError::Disposed`].
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let cancelled = self.pending.cancel_all(|| RpcError::Disposed);
        if cancelled > 0 {
            debug!(cancelled, "Failed outstanding requests on dispose");
        }

        if self.listening.load(Ordering::Acquire) {
            if let Err(e) = self.transport.unsubscribe(&self.response_channel).await {
                warn!(error = %e, "Failed to unsubscribe response channel on dispose");
            }
        }
        debug!(response_channel = %self.response_channel, "Disposed RPC client");
    }

    /// Number of requests currently awaiting a response
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn check_disposed(&self) -> Result<(), RpcError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(RpcError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Install the response subscription on first use
    ///
    /// Double-checked: the flag skips the mutex on the hot path, the
    /// re-check under the mutex keeps concurrent first requests from
    /// subscribing twice.
    async fn ensure_subscribed(&self) -> Result<(), RpcError> {
        if self.listening.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.subscribe_lock.lock().await;
        if self.listening.load(Ordering::Acquire) {
            return Ok(());
        }

        let pending = self.pending.clone();
        let callback: MessageCallback = Arc::new(move |channel, payload| {
            match Response::from_bytes(payload) {
                Ok(response) => {
                    let id = response.id.clone();
                    if !pending.complete(&id, response) {
                        debug!(channel, id, "Dropped response with no pending slot");
                    }
                }
                // One bad message must not poison the channel.
                Err(e) => warn!(channel, error = %e, "Ignoring undecodable response"),
            }
        });

        self.transport
            .subscribe(&self.response_channel, callback)
            .await?;
        self.listening.store(true, Ordering::Release);
        debug!(response_channel = %self.response_channel, "Response subscription active");
        Ok(())
    }

    /// Wait on a slot with a deadline, linked with caller cancellation
    ///
    /// Every exit path detaches the slot; a response racing the detach is
    /// simply dropped by the listener.
    async fn await_response(
        &self,
        slot: PendingSlot,
        id: &str,
        timeout_ms: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<Response, RpcError> {
        let deadline = Duration::from_millis(timeout_ms);
        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        self.pending.remove(id);
                        return Err(RpcError::Cancelled("Request cancelled by caller".to_string()));
                    }
                    outcome = tokio::time::timeout(deadline, slot) => outcome,
                }
            }
            None => tokio::time::timeout(deadline, slot).await,
        };

        match outcome {
            Err(_) => {
                self.pending.remove(id);
                Err(RpcError::Timeout(timeout_ms))
            }
            Ok(Err(_)) => {
                self.pending.remove(id);
                Err(RpcError::Cancelled(
                    "Pending slot dropped before completion".to_string(),
                ))
            }
            Ok(Ok(result)) => {
                self.pending.remove(id);
                result
            }
        }
    }
}

fn validate_target(channel: &str, method: &str) -> Result<(), RpcError> {
    if channel.is_empty() {
        return Err(RpcError::InvalidArgument(
            "Channel must not be empty".to_string(),
        ));
    }
    if method.is_empty() {
        return Err(RpcError::InvalidArgument(
            "Method must not be empty".to_string(),
        ));
    }
    Ok(())
}
