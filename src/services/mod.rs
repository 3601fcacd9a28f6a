//! Client and server service implementations

pub mod client;
pub mod correlation;
pub mod server;

pub use client::RpcClient;
pub use correlation::PendingResponses;
pub use server::RpcServer;
