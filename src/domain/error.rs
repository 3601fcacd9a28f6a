//! Error taxonomy for RPC operations and its mapping to wire error codes

use serde_json::Value;
use thiserror::Error;

use crate::domain::envelope::ErrorDetail;

/// Stable wire error codes
pub const UNKNOWN: i32 = 0;
pub const METHOD_NOT_FOUND: i32 = 1001;
pub const INVALID_PARAMETERS: i32 = 1002;
pub const INTERNAL_ERROR: i32 = 1003;
pub const TIMEOUT: i32 = 1004;
pub const SERIALIZATION_ERROR: i32 = 1005;
pub const CONNECTION_ERROR: i32 = 1006;

/// Error type for RPC operations
///
/// The first group of variants maps one-to-one onto the wire error codes;
/// the second group is local to a process and never leaves it.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {message}")]
    InvalidParameters {
        message: String,
        details: Option<Value>,
    },

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        details: Option<Value>,
    },

    #[error("Unknown error: {0}")]
    Unknown(String),

    // Local-only kinds, not part of the wire taxonomy.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Instance has been disposed")]
    Disposed,

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl RpcError {
    /// Shorthand for an `InvalidParameters` error without details
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            message: message.into(),
            details: None,
        }
    }

    /// Shorthand for an `Internal` error without details
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            details: None,
        }
    }

    /// The wire code for this error kind
    ///
    /// Local-only kinds fall back to `UNKNOWN`; they are not expected to be
    /// transmitted in the first place.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::MethodNotFound(_) => METHOD_NOT_FOUND,
            RpcError::InvalidParameters { .. } => INVALID_PARAMETERS,
            RpcError::Timeout(_) => TIMEOUT,
            RpcError::Json(_) | RpcError::Serialization(_) => SERIALIZATION_ERROR,
            RpcError::Connection(_) => CONNECTION_ERROR,
            RpcError::Internal { .. } => INTERNAL_ERROR,
            RpcError::Unknown(_)
            | RpcError::InvalidArgument(_)
            | RpcError::Disposed
            | RpcError::Cancelled(_) => UNKNOWN,
        }
    }

    /// Build the wire error record for a failure response
    ///
    /// `stackTrace` is captured only when the owning server has
    /// `IncludeStackTraceInErrors` enabled.
    pub fn to_error_detail(&self, include_stack_trace: bool) -> ErrorDetail {
        let details = match self {
            RpcError::InvalidParameters { details, .. } => details.clone(),
            RpcError::Internal { details, .. } => details.clone(),
            RpcError::Timeout(timeout_ms) => {
                Some(serde_json::json!({ "timeoutMs": timeout_ms }))
            }
            _ => None,
        };

        let stack_trace = if include_stack_trace {
            Some(std::backtrace::Backtrace::force_capture().to_string())
        } else {
            None
        };

        ErrorDetail {
            code: self.code(),
            message: self.to_string(),
            details,
            stack_trace,
        }
    }

    /// Reconstitute a typed error from a wire error record
    ///
    /// `method` is the name from the call site; the wire `details` value is a
    /// structured object and is never used as a method name.
    pub fn from_error_detail(detail: &ErrorDetail, method: &str) -> Self {
        match detail.code {
            METHOD_NOT_FOUND => RpcError::MethodNotFound(method.to_string()),
            INVALID_PARAMETERS => RpcError::InvalidParameters {
                message: detail.message.clone(),
                details: detail.details.clone(),
            },
            TIMEOUT => {
                let timeout_ms = detail
                    .details
                    .as_ref()
                    .and_then(|d| d.get("timeoutMs"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                RpcError::Timeout(timeout_ms)
            }
            SERIALIZATION_ERROR => RpcError::Serialization(detail.message.clone()),
            CONNECTION_ERROR => RpcError::Connection(detail.message.clone()),
            INTERNAL_ERROR => RpcError::Internal {
                message: detail.message.clone(),
                details: detail.details.clone(),
            },
            _ => RpcError::Unknown(detail.message.clone()),
        }
    }
}
