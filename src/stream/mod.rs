//! Persistent-connection transport: one TCP connection per client session,
//! one JSON envelope per line, many sequential calls per connection
//!
//! ```text
//! -> {"jsonrpc":"2.0","method":"ping","params":[],"id":1}
//! <- {"jsonrpc":"2.0","id":1,"result":"pong"}
//! ->                       (empty line closes the session)
//! ```

mod listener;
mod session;

pub use listener::{bind_reusable, StreamServer};
pub use session::{CloseReason, Session, SessionError, SessionState};

pub(crate) const STREAM_TARGET: &str = "control_rpc::stream";

/// Longest accepted request line, terminator included.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;
