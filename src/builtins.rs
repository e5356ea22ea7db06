//! Methods available on every server regardless of the loaded control module

use std::io::{self, Write};

use serde_json::Value;

use crate::errors::MethodError;
use crate::rpc::registry::{Arity, Registry};
use crate::shutdown::ShutdownSignal;

pub const PING: &str = "ping";
pub const PRINT: &str = "print";
pub const STOP: &str = "stop";

pub fn register_builtins(registry: &mut Registry, shutdown: &ShutdownSignal) {
    registry.register_fn(PING, Arity::Exact(0), |_| Ok(Value::from("pong")));
    registry.register_fn(PRINT, Arity::Exact(1), print_message);

    // stop only flips the signal; the listener tears itself down after this
    // call has returned and its response has been written.
    let shutdown = shutdown.clone();
    registry.register_fn(STOP, Arity::Exact(0), move |_| {
        shutdown.trigger("stop method");
        Ok(Value::Null)
    });
}

fn print_message(params: &[Value]) -> Result<Value, MethodError> {
    let text = match params.first() {
        Some(Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None => return Err(MethodError::invalid_argument(0, "missing")),
    };

    let mut stderr = io::stderr().lock();
    writeln!(stderr, "{text}")
        .map_err(|err| MethodError::failed(format!("failed to write message: {err}")))?;
    Ok(Value::Null)
}
