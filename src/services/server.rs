//! Server side of the RPC fabric
//!
//! The transport callback does nothing but hand the raw payload to a
//! spawned dispatch task; everything slow (waiting for a permit, running
//! the handler, publishing the response) happens off the transport's
//! dispatch loop.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RpcConfig;
use crate::domain::envelope::recover_response_channel;
use crate::domain::{channels, Request, Response, RpcError};
use crate::port::{MessageCallback, PubSubTransport, RpcHandler};

/// RPC server over a pub/sub transport
pub struct RpcServer<T: PubSubTransport> {
    context: DispatchContext<T>,
    listening: DashMap<String, ()>,
    disposed: AtomicBool,
}

impl<T: PubSubTransport + 'static> RpcServer<T> {
    pub fn new(transport: Arc<T>, config: RpcConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_requests));
        Self {
            context: DispatchContext {
                transport,
                config,
                handlers: Arc::new(DashMap::new()),
                permits,
            },
            listening: DashMap::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Install a handler for every method it supports
    ///
    /// Lookup is case-insensitive; registering a method twice replaces the
    /// earlier handler.
    pub fn register_handler(&self, handler: Arc<dyn RpcHandler>) {
        for method in handler.supported_methods() {
            let replaced = self
                .context
                .handlers
                .insert(method.to_lowercase(), handler.clone())
                .is_some();
            if replaced {
                debug!(method, "Replaced handler registration");
            } else {
                debug!(method, "Registered handler");
            }
        }
    }

    /// Subscribe to the request channel of every named logical channel
    ///
    /// Channels already in the listening set are skipped. A subscription
    /// failure removes that channel from the set and surfaces the error;
    /// channels subscribed earlier in the same call stay active.
    pub async fn start_listening<I, S>(&self, channels_to_serve: I) -> Result<(), RpcError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.check_disposed()?;
        for channel in channels_to_serve {
            let channel = channel.as_ref();
            if channel.is_empty() {
                return Err(RpcError::InvalidArgument(
                    "Channel must not be empty".to_string(),
                ));
            }
            let request_channel =
                channels::request_channel(&self.context.config.channel_prefix, channel);
            if self.listening.contains_key(&request_channel) {
                continue;
            }

            self.listening.insert(request_channel.clone(), ());
            let callback = self.context.dispatch_callback();
            if let Err(e) = self
                .context
                .transport
                .subscribe(&request_channel, callback)
                .await
            {
                self.listening.remove(&request_channel);
                return Err(e);
            }
            info!(channel = %request_channel, "Listening for requests");
        }
        Ok(())
    }

    /// Unsubscribe every channel in the listening set
    pub async fn stop_listening(&self) {
        let subscribed: Vec<String> = self.listening.iter().map(|e| e.key().clone()).collect();
        for request_channel in subscribed {
            self.listening.remove(&request_channel);
            if let Err(e) = self.context.transport.unsubscribe(&request_channel).await {
                warn!(channel = %request_channel, error = %e, "Failed to unsubscribe");
            } else {
                info!(channel = %request_channel, "Stopped listening");
            }
        }
    }

    /// Stop listening and shut the permit pool
    ///
    /// Dispatch tasks still waiting for a permit drop their message;
    /// handlers already running are left to finish.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_listening().await;
        self.context.permits.close();
        debug!("Disposed RPC server");
    }

    /// Number of channels currently being served
    pub fn listening_count(&self) -> usize {
        self.listening.len()
    }

    fn check_disposed(&self) -> Result<(), RpcError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(RpcError::Disposed)
        } else {
            Ok(())
        }
    }
}

/// Everything a dispatch task needs, cheap to clone into it
struct DispatchContext<T: PubSubTransport> {
    transport: Arc<T>,
    config: RpcConfig,
    handlers: Arc<DashMap<String, Arc<dyn RpcHandler>>>,
    permits: Arc<Semaphore>,
}

impl<T: PubSubTransport> Clone for DispatchContext<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            handlers: self.handlers.clone(),
            permits: self.permits.clone(),
        }
    }
}

impl<T: PubSubTransport + 'static> DispatchContext<T> {
    /// The transport-facing callback: copy the payload, spawn, return
    fn dispatch_callback(&self) -> MessageCallback {
        let context = self.clone();
        Arc::new(move |_channel, payload| {
            let context = context.clone();
            let payload = payload.to_vec();
            tokio::spawn(async move {
                context.dispatch(payload).await;
            });
        })
    }

    async fn dispatch(self, payload: Vec<u8>) {
        // The permit is the backpressure point: at the cap, this task waits
        // while the transport keeps accepting messages.
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Permit pool closed, dropping inbound message");
                return;
            }
        };

        let request = match Request::from_bytes(&payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Failed to decode inbound request");
                if let Some(response_channel) = recover_response_channel(&payload) {
                    let detail =
                        e.to_error_detail(self.config.include_stack_trace_in_errors);
                    self.publish_response(&response_channel, &Response::failure("", detail))
                        .await;
                }
                return;
            }
        };

        let is_notification = request.is_notification();
        debug!(id = %request.id, method = %request.method, is_notification, "Dispatching request");

        let outcome = match self.invoke_handler(&request).await {
            Some(outcome) => outcome,
            // Deadline overrun publishes nothing: timeouts are the client's
            // to detect, against its own requested value.
            None => return,
        };

        if is_notification {
            if let Err(e) = outcome {
                // Nothing to publish for a notification; the error stops here.
                debug!(method = %request.method, error = %e, "Notification handler failed");
            }
            return;
        }

        let response = match outcome {
            Ok(result) => Response::success(request.id.clone(), Some(result)),
            Err(e) => Response::failure(
                request.id.clone(),
                e.to_error_detail(self.config.include_stack_trace_in_errors),
            ),
        };
        self.publish_response(&request.response_channel, &response)
            .await;
    }

    /// Look up the handler and run it under a deadline
    ///
    /// The deadline is the server default, tightened by a smaller advisory
    /// timeout from the request. A handler that outlives it is dropped and
    /// its cancellation token fired, and `None` comes back: an overrun is
    /// not a wire outcome, so nothing is published for it and the caller's
    /// own timeout covers the silence.
    async fn invoke_handler(&self, request: &Request) -> Option<Result<Value, RpcError>> {
        let handler = match self
            .handlers
            .get(&request.method.to_lowercase())
            .map(|e| e.value().clone())
        {
            Some(handler) => handler,
            None => return Some(Err(RpcError::MethodNotFound(request.method.clone()))),
        };

        let deadline_ms = match request.timeout_ms {
            Some(advisory) if advisory > 0 && advisory < self.config.default_timeout_ms => advisory,
            _ => self.config.default_timeout_ms,
        };

        let cancel = CancellationToken::new();
        let invocation = AssertUnwindSafe(handler.handle(
            &request.method,
            request.parameters.clone(),
            cancel.clone(),
        ))
        .catch_unwind();

        match tokio::time::timeout(Duration::from_millis(deadline_ms), invocation).await {
            Err(_) => {
                cancel.cancel();
                warn!(method = %request.method, deadline_ms, "Handler exceeded deadline, dropping request");
                None
            }
            Ok(Err(panic)) => {
                warn!(method = %request.method, "Handler panicked");
                Some(Err(RpcError::Internal {
                    message: panic_message(panic),
                    details: Some(Value::String("panic".to_string())),
                }))
            }
            Ok(Ok(result)) => Some(result),
        }
    }

    async fn publish_response(&self, channel: &str, response: &Response) {
        // Never publish to an empty response channel.
        if channel.is_empty() {
            return;
        }
        match response.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.transport.publish(channel, &bytes).await {
                    // There is nowhere left to report this.
                    warn!(channel, error = %e, "Failed to publish response");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode response"),
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Handler panicked".to_string()
    }
}
