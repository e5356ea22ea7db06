use std::{io, net::SocketAddr};

use serde_json::Value;
use thiserror::Error;

use crate::rpc::registry::Arity;

/// Failure reported by a registered method while it runs.
#[derive(Debug, Error)]
pub enum MethodError {
    #[error("argument {index}: {message}")]
    InvalidArgument { index: usize, message: String },
    #[error("{0}")]
    Failed(String),
}

impl MethodError {
    pub fn invalid_argument(index: usize, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            index,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Why a decoded request did not produce a result.
///
/// The wire format collapses every variant into the same generic message; the
/// variants only survive internally and in debug tracebacks.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("method not found: {method}")]
    MethodNotFound { method: String },
    #[error("{method}() takes {expected} but {given} were given")]
    ArityMismatch {
        method: String,
        expected: Arity,
        given: usize,
    },
    #[error("params must be an array or null, got {kind}")]
    InvalidParams { kind: &'static str },
    #[error("{method}() invalid argument {index}: {message}")]
    InvalidArgument {
        method: String,
        index: usize,
        message: String,
    },
    #[error("{method}() failed: {message}")]
    InvocationFailure { method: String, message: String },
}

impl DispatchError {
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MethodNotFound { .. } => "method_not_found",
            Self::ArityMismatch { .. } => "arity_mismatch",
            Self::InvalidParams { .. } => "invalid_params",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::InvocationFailure { .. } => "invocation_failure",
        }
    }
}

/// A request line that could not be turned into a request.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("request line is not valid UTF-8")]
    Utf8,
    #[error("request line is not valid JSON: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
    },
    #[error("request is not a JSON object")]
    NotAnObject,
    #[error("request has no method name")]
    MissingMethod { id: Option<Value> },
    #[error("request envelope is malformed: {source}")]
    Malformed {
        id: Option<Value>,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// The request `id`, when enough of the envelope survived to recover it.
    pub fn salvaged_id(&self) -> Option<&Value> {
        match self {
            Self::MissingMethod { id } | Self::Malformed { id, .. } => id.as_ref(),
            Self::Utf8 | Self::Json { .. } | Self::NotAnObject => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind TCP listener at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to read listener address: {source}")]
    LocalAddr {
        #[source]
        source: io::Error,
    },
    #[error("http server failed: {source}")]
    Http {
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("invalid response line: {source}")]
    Codec {
        #[from]
        source: serde_json::Error,
    },
    #[error("server closed the connection")]
    ConnectionClosed,
}
