//! Channel naming conventions
//!
//! Request channels are shared rendezvous points; response channels are
//! owned by exactly one client and carry its process identity plus a random
//! token so concurrent clients on one host never collide.

use uuid::Uuid;

/// Default channel namespace
pub const DEFAULT_PREFIX: &str = "redis-rpc";

/// The shared request channel for a logical service channel
pub fn request_channel(prefix: &str, channel: &str) -> String {
    format!("{}:request:{}", prefix, channel)
}

/// A fresh, unique response channel for one client instance
pub fn response_channel(prefix: &str) -> String {
    format!(
        "{}:response:{}:{}:{}",
        prefix,
        machine_name(),
        std::process::id(),
        Uuid::new_v4().simple()
    )
}

fn machine_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}
