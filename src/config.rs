//! Configuration for clients, servers, and transport adapters
//!
//! Keys deserialize from the PascalCase names used in configuration
//! documents (`ConnectionString`, `DefaultTimeoutMs`, ...); unset keys take
//! the documented defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::channels::DEFAULT_PREFIX;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RpcConfig {
    /// Transport endpoint, `host:port`
    pub connection_string: String,
    /// Default per-request deadline in milliseconds
    pub default_timeout_ms: u64,
    /// Server permit-pool size
    pub max_concurrent_requests: usize,
    /// Channel namespace
    pub channel_prefix: String,
    /// Include a stack trace in failure responses
    pub include_stack_trace_in_errors: bool,
    /// Transport-specific database index
    pub database: i64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connection_string: "localhost:6379".to_string(),
            default_timeout_ms: 30_000,
            max_concurrent_requests: 100,
            channel_prefix: DEFAULT_PREFIX.to_string(),
            include_stack_trace_in_errors: false,
            database: 0,
        }
    }
}

impl RpcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = connection_string.into();
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    pub fn with_stack_traces(mut self) -> Self {
        self.include_stack_trace_in_errors = true;
        self
    }

    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
