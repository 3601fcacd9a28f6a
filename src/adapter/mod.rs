//! Transport adapters

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{InMemoryBroker, InMemoryPubSub};

#[cfg(feature = "redis")]
pub use redis::RedisPubSub;
