//! Shared test handlers for integration tests

// Each test binary compiles its own copy; not every binary uses every item.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use redis_rpc::{RpcError, RpcHandler};

#[derive(Deserialize)]
struct BinaryParams {
    a: i64,
    b: i64,
}

/// Calculator service used by most scenarios
///
/// `Sleep` waits for `{ "ms": n }` before returning, `Panic` panics with its
/// string parameter, `Echo` returns its parameters unchanged.
#[derive(Default)]
pub struct CalculatorHandler {
    invocations: AtomicUsize,
}

impl CalculatorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn binary_params(params: Option<Value>) -> Result<BinaryParams, RpcError> {
        serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
            RpcError::InvalidParameters {
                message: format!("Expected {{a, b}}: {}", e),
                details: None,
            }
        })
    }
}

#[async_trait]
impl RpcHandler for CalculatorHandler {
    fn supported_methods(&self) -> Vec<String> {
        ["Add", "Subtract", "Divide", "Sleep", "Panic", "Echo"]
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    async fn handle(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        match method {
            "Add" => {
                let p = Self::binary_params(params)?;
                Ok(json!(p.a + p.b))
            }
            "Subtract" => {
                let p = Self::binary_params(params)?;
                Ok(json!(p.a - p.b))
            }
            "Divide" => {
                let p = Self::binary_params(params)?;
                if p.b == 0 {
                    return Err(RpcError::InvalidParameters {
                        message: "Division by zero is not allowed".to_string(),
                        details: Some(json!({ "Dividend": p.a, "Divisor": p.b })),
                    });
                }
                Ok(json!(p.a / p.b))
            }
            "Sleep" => {
                let ms = params
                    .as_ref()
                    .and_then(|p| p.get("ms"))
                    .and_then(Value::as_u64)
                    .unwrap_or(1000);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!("done")),
                    _ = cancel.cancelled() => Err(RpcError::Cancelled("Sleep interrupted".to_string())),
                }
            }
            "Panic" => {
                let message = params
                    .and_then(|p| p.as_str().map(str::to_owned))
                    .unwrap_or_else(|| "deliberate test panic".to_string());
                panic!("{}", message);
            }
            "Echo" => Ok(params.unwrap_or(Value::Null)),
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }
}

/// Handler that records the highest number of concurrently running
/// invocations it ever observed
#[derive(Default)]
pub struct ConcurrencyProbeHandler {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcHandler for ConcurrencyProbeHandler {
    fn supported_methods(&self) -> Vec<String> {
        vec!["Probe".to_string()]
    }

    async fn handle(
        &self,
        _method: &str,
        params: Option<Value>,
        _cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        // Hold the permit long enough for the queue to pile up behind it.
        tokio::time::sleep(Duration::from_millis(25)).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(params.unwrap_or(Value::Null))
    }
}

/// Handler answering a fixed set of methods with a fixed string, for
/// registration-precedence tests
pub struct FixedReplyHandler {
    methods: Vec<String>,
    reply: String,
}

impl FixedReplyHandler {
    pub fn new(methods: &[&str], reply: &str) -> Self {
        Self {
            methods: methods.iter().map(|m| m.to_string()).collect(),
            reply: reply.to_string(),
        }
    }
}

#[async_trait]
impl RpcHandler for FixedReplyHandler {
    fn supported_methods(&self) -> Vec<String> {
        self.methods.clone()
    }

    async fn handle(
        &self,
        _method: &str,
        _params: Option<Value>,
        _cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        Ok(json!(self.reply))
    }
}

/// Counts raw payloads delivered on a channel; used to assert that the
/// server publishes nothing for notifications.
pub fn counting_callback(counter: Arc<AtomicUsize>) -> redis_rpc::MessageCallback {
    Arc::new(move |_channel, _payload| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}
