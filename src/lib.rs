//! # redis-rpc: RPC over Redis-style pub/sub channels
//!
//! A request/response and fire-and-forget RPC fabric layered on a
//! publish/subscribe primitive. Clients invoke named methods on servers
//! identified only by a logical channel name; neither side knows the
//! other's network address.
//!
//! ## Architecture
//!
//! A request travels `client -> {prefix}:request:{channel} -> server`; the
//! response comes back on a channel owned by exactly one client,
//! `{prefix}:response:{host}:{pid}:{token}`. Correlation ids tie the two
//! envelopes together, so one client multiplexes any number of in-flight
//! requests over its single response channel. A request with an empty
//! response channel is a notification: the server runs the handler and
//! publishes nothing.
//!
//! Delivery is at-most-once with no retries anywhere: a lost message, a
//! server restart mid-handler, or a client restart mid-wait all surface as
//! a timeout on the caller.
//!
//! ## Client example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use redis_rpc::{RpcClient, RpcConfig, adapter::RedisPubSub};
//! use serde_json::json;
//!
//! let config = RpcConfig::default();
//! let transport = Arc::new(RedisPubSub::connect(&config).await?);
//! let client = RpcClient::new(transport, config);
//!
//! let sum: i64 = client
//!     .send_request("calculator", "Add", Some(json!({ "a": 10, "b": 5 })), None, None)
//!     .await?;
//! ```
//!
//! ## Server example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use redis_rpc::{RpcServer, RpcConfig, adapter::RedisPubSub};
//!
//! let config = RpcConfig::default();
//! let transport = Arc::new(RedisPubSub::connect(&config).await?);
//! let server = RpcServer::new(transport, config);
//!
//! server.register_handler(Arc::new(CalculatorHandler::new()));
//! server.start_listening(["calculator"]).await?;
//! ```

pub mod adapter;
pub mod config;
pub mod domain;
pub mod port;
pub mod services;

pub use config::RpcConfig;
pub use domain::{coerce_result, ErrorDetail, Request, Response, RpcError};
pub use port::{MessageCallback, PubSubTransport, RpcHandler};
pub use services::{PendingResponses, RpcClient, RpcServer};

// Handler implementors need the same token type the server hands out.
pub use tokio_util::sync::CancellationToken;
