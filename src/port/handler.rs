//! Handler port: the contract between the server and user code

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::RpcError;

/// A handler for one or more RPC methods
///
/// The server matches inbound method names against [`supported_methods`]
/// case-insensitively. `params` is the decoded parameter value exactly as it
/// appeared on the wire (or `None`); destructuring it is the handler's
/// choice, see [`crate::domain::Request::params_as`].
///
/// [`supported_methods`]: RpcHandler::supported_methods
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Method names this handler serves
    fn supported_methods(&self) -> Vec<String>;

    /// Execute one method invocation
    ///
    /// `cancel` fires when the server-side deadline for this request
    /// expires; long-running handlers should watch it and wind down
    /// promptly. The returned value must be JSON-serializable; use
    /// `Value::Null` for methods with nothing to report.
    async fn handle(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: CancellationToken,
    ) -> Result<Value, RpcError>;
}
