//! Wire envelopes for requests and responses
//!
//! Both envelopes travel as UTF-8 JSON with camelCase field names and
//! null-valued optional fields omitted. `parameters` and `result` are kept
//! as raw [`Value`]s on the wire boundary; callers coerce them into concrete
//! types at the last possible moment with [`coerce_result`] or
//! [`Request::params_as`].

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::error::RpcError;

/// A single method invocation, immutable once built
///
/// An empty `responseChannel` marks the request as a notification: the
/// server invokes the handler but publishes nothing back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parameters: Option<Value>,
    #[serde(rename = "responseChannel", default)]
    pub response_channel: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "timeoutMs", skip_serializing_if = "Option::is_none", default)]
    pub timeout_ms: Option<u64>,
}

impl Request {
    /// Create a request with a fresh correlation id and timestamp
    pub fn new(
        method: impl Into<String>,
        parameters: Option<Value>,
        response_channel: String,
        timeout_ms: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            parameters,
            response_channel,
            timestamp: Utc::now().to_rfc3339(),
            timeout_ms,
        }
    }

    /// Create a fire-and-forget notification (empty response channel)
    pub fn notification(method: impl Into<String>, parameters: Option<Value>) -> Self {
        Self::new(method, parameters, String::new(), None)
    }

    pub fn is_notification(&self) -> bool {
        self.response_channel.is_empty()
    }

    /// Decode the parameter value into a concrete type
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        let value = self.parameters.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| RpcError::InvalidParameters {
            message: format!("Failed to decode parameters: {}", e),
            details: None,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RpcError> {
        serde_json::to_vec(self).map_err(RpcError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RpcError> {
        serde_json::from_slice(bytes).map_err(RpcError::from)
    }
}

/// Wire error record carried by failure responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<Value>,
    #[serde(
        rename = "stackTrace",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub stack_trace: Option<String>,
}

/// The outcome of a request, immutable once built
///
/// `success` is true iff `result` is set and `error` is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub timestamp: String,
}

impl Response {
    pub fn success(id: impl Into<String>, result: Option<Value>) -> Self {
        Self {
            id: id.into(),
            success: true,
            result,
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn failure(id: impl Into<String>, error: ErrorDetail) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(error),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RpcError> {
        serde_json::to_vec(self).map_err(RpcError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RpcError> {
        serde_json::from_slice(bytes).map_err(RpcError::from)
    }
}

/// Coerce a raw result value into a caller-chosen type
///
/// Primitives and complex types alike go through the retained JSON tree, so
/// a response decoded untyped can be re-cast later without touching the wire.
pub fn coerce_result<T: DeserializeOwned>(raw: Value) -> Result<T, RpcError> {
    serde_json::from_value(raw).map_err(RpcError::from)
}

/// Last-resort scan of an undecodable request for its response channel
///
/// Used by the server to report a decode failure back to the caller when the
/// envelope is malformed but the payload is still JSON.
pub fn recover_response_channel(bytes: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .and_then(|v| {
            v.get("responseChannel")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .filter(|channel| !channel.is_empty())
}
