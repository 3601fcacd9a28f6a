//! Port definitions: the seams between the core and its collaborators

pub mod handler;
pub mod transport;

pub use handler::RpcHandler;
pub use transport::{MessageCallback, PubSubTransport};
