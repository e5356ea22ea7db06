//! Line-delimited JSON-RPC envelopes, method registry and dispatch
//!
//! Transport independent: both the stream and the HTTP transport decode into
//! the same [`envelope::Request`] and hand it to the same [`dispatcher::Dispatcher`].

pub mod dispatcher;
pub mod envelope;
pub mod registry;
