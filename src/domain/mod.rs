//! Domain types: wire envelopes, error taxonomy, channel naming

pub mod channels;
pub mod envelope;
pub mod error;

pub use envelope::{coerce_result, recover_response_channel, ErrorDetail, Request, Response};
pub use error::RpcError;
