//! Request dispatch
//!
//! Resolves a decoded request against the [`Registry`], checks its arguments,
//! invokes the method and turns the outcome into a response envelope. Every
//! per-call failure, including a panicking method, is recovered here so the
//! transport that owns the connection keeps serving.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{DecodeError, DispatchError, MethodError};
use crate::rpc::{
    envelope::{Request, Response},
    registry::Registry,
};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    debug: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, debug: bool) -> Self {
        Self { registry, debug }
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn dispatch(&self, request: &Request) -> Response {
        let outcome = self.invoke(request);

        debug!(
            method = %request.method,
            id = %request.id,
            outcome = if outcome.is_ok() { "success" } else { "failure" },
            "rpc call audited"
        );

        match outcome {
            Ok(result) => Response::success(request.id.clone(), result),
            Err(err) => self.failure_response(request.id.clone(), &err),
        }
    }

    /// Runs the call and keeps the failure typed.
    pub fn invoke(&self, request: &Request) -> Result<Value, DispatchError> {
        let method = self.registry.resolve(&request.method)?;
        let params = positional_params(request.params.as_ref())?;

        let arity = method.arity();
        if !arity.accepts(params.len()) {
            return Err(DispatchError::ArityMismatch {
                method: request.method.clone(),
                expected: arity,
                given: params.len(),
            });
        }

        match panic::catch_unwind(AssertUnwindSafe(|| method.call(params))) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(MethodError::InvalidArgument { index, message })) => {
                Err(DispatchError::InvalidArgument {
                    method: request.method.clone(),
                    index,
                    message,
                })
            }
            Ok(Err(MethodError::Failed(message))) => Err(DispatchError::InvocationFailure {
                method: request.method.clone(),
                message,
            }),
            Err(payload) => Err(DispatchError::InvocationFailure {
                method: request.method.clone(),
                message: format!("panicked: {}", panic_message(payload.as_ref())),
            }),
        }
    }

    pub fn failure_response(&self, id: Value, err: &DispatchError) -> Response {
        warn!(kind = err.kind(), error = %err, "rpc call failed");
        Response::failure(id, self.traceback(err))
    }

    pub fn decode_failure_response(&self, id: Value, err: &DecodeError) -> Response {
        warn!(error = %err, "rpc request could not be decoded");
        Response::failure(id, self.traceback(err))
    }

    fn traceback(&self, err: &dyn std::error::Error) -> Option<String> {
        if !self.debug {
            return None;
        }

        let mut trace = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push_str("\ncaused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        Some(trace)
    }
}

fn positional_params(params: Option<&Value>) -> Result<&[Value], DispatchError> {
    match params {
        None | Some(Value::Null) => Ok(&[][..]),
        Some(Value::Array(values)) => Ok(values.as_slice()),
        Some(other) => Err(DispatchError::InvalidParams {
            kind: json_kind(other),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::rpc::registry::{arg, Arity};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_fn("zero", Arity::Exact(0), |_| Ok(json!("nothing")));
        registry.register_fn("double", Arity::Exact(1), |params| {
            let value: i64 = arg(params, 0)?;
            Ok(json!(value * 2))
        });
        registry.register_fn("sum", Arity::Any, |params| {
            let mut total = 0.0;
            for index in 0..params.len() {
                total += arg::<f64>(params, index)?;
            }
            Ok(json!(total))
        });
        registry.register_fn("fails", Arity::Exact(0), |_| {
            Err(MethodError::failed("sensor offline"))
        });
        registry.register_fn("panics", Arity::Exact(0), |_| panic!("controller bug"));
        registry
    }

    fn dispatcher(debug: bool) -> Dispatcher {
        Dispatcher::new(Arc::new(registry()), debug)
    }

    fn request(method: &str, params: Option<Value>, id: Value) -> Request {
        Request {
            jsonrpc: Some(json!("2.0")),
            method: method.to_string(),
            params,
            id,
        }
    }

    #[test]
    fn zero_one_and_n_arity_calls_return_results() {
        let dispatcher = dispatcher(false);

        let zero = dispatcher.dispatch(&request("zero", None, json!(1)));
        assert_eq!(zero.result(), Some(&json!("nothing")));

        let one = dispatcher.dispatch(&request("double", Some(json!([21])), json!(2)));
        assert_eq!(one.result(), Some(&json!(42)));

        let many = dispatcher.dispatch(&request("sum", Some(json!([1, 2.5, 3])), json!(3)));
        assert_eq!(many.result(), Some(&json!(6.5)));
        assert!(many.error().is_none());
    }

    #[test]
    fn null_params_invoke_without_arguments() {
        let response = dispatcher(false).dispatch(&request("zero", Some(Value::Null), json!(4)));
        assert_eq!(response.result(), Some(&json!("nothing")));
    }

    #[test]
    fn unknown_method_yields_generic_error() {
        let response = dispatcher(false).dispatch(&request("nosuch", Some(json!([])), json!(2)));

        assert!(response.result().is_none());
        assert_eq!(response.error(), Some("Internal server error"));
        assert_eq!(response.id(), &json!(2));
        assert_eq!(
            serde_json::to_string(&response).expect("serialize"),
            r#"{"id":2,"error":"Internal server error"}"#
        );
    }

    #[test]
    fn invoke_keeps_failures_tagged() {
        let dispatcher = dispatcher(false);

        let err = dispatcher
            .invoke(&request("double", Some(json!([1, 2])), json!(1)))
            .expect_err("too many arguments");
        assert!(matches!(
            err,
            DispatchError::ArityMismatch {
                expected: Arity::Exact(1),
                given: 2,
                ..
            }
        ));

        let err = dispatcher
            .invoke(&request("double", Some(json!(["x"])), json!(1)))
            .expect_err("string argument");
        assert!(matches!(err, DispatchError::InvalidArgument { index: 0, .. }));

        let err = dispatcher
            .invoke(&request("zero", Some(json!({"a": 1})), json!(1)))
            .expect_err("object params");
        assert!(matches!(err, DispatchError::InvalidParams { kind: "object" }));

        let err = dispatcher
            .invoke(&request("fails", None, json!(1)))
            .expect_err("method failure");
        assert!(matches!(err, DispatchError::InvocationFailure { .. }));
    }

    #[test]
    fn panicking_method_becomes_error_response() {
        let dispatcher = dispatcher(true);
        let response = dispatcher.dispatch(&request("panics", None, json!(6)));

        assert_eq!(response.error(), Some("Internal server error"));
        let Response::Failure(failure) = response else {
            panic!("expected failure response");
        };
        let traceback = failure.traceback.expect("debug traceback");
        assert!(traceback.contains("controller bug"));

        let next = dispatcher.dispatch(&request("zero", None, json!(7)));
        assert_eq!(next.result(), Some(&json!("nothing")));
    }

    #[test]
    fn traceback_only_in_debug_mode() {
        let quiet = dispatcher(false).dispatch(&request("fails", None, json!(1)));
        let Response::Failure(quiet) = quiet else {
            panic!("expected failure response");
        };
        assert!(quiet.traceback.is_none());

        let verbose = dispatcher(true).dispatch(&request("fails", None, json!(1)));
        let Response::Failure(verbose) = verbose else {
            panic!("expected failure response");
        };
        assert!(verbose
            .traceback
            .as_deref()
            .is_some_and(|trace| trace.contains("sensor offline")));
    }

    #[test]
    fn decode_failure_echoes_salvaged_id() {
        let err = DecodeError::MissingMethod { id: Some(json!(11)) };
        let response = dispatcher(false).decode_failure_response(json!(11), &err);
        assert_eq!(response.id(), &json!(11));
        assert!(response.is_error());
    }
}
