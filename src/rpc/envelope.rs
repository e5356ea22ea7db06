//! Wire envelopes of the line-delimited protocol and their codec
//!
//! One request or response per line, UTF-8, terminated by a single `\n`. An
//! empty line is not an envelope: it asks the server to close the session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;

pub const JSONRPC_VERSION: &str = "2.0";
pub const INTERNAL_SERVER_ERROR: &str = "Internal server error";
pub const LINE_TERMINATOR: u8 = b'\n';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Echoed by clients but never interpreted, so any JSON value is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Vec<Value>, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: Some(Value::from(JSONRPC_VERSION)),
            method: method.into(),
            params: Some(Value::Array(params)),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuccessResponse {
    pub jsonrpc: String,
    pub id: Value,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub id: Value,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Exactly one of `result` or `error`, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Success(SuccessResponse),
    Failure(ErrorResponse),
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self::Success(SuccessResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        })
    }

    pub fn failure(id: Value, traceback: Option<String>) -> Self {
        Self::Failure(ErrorResponse {
            id,
            error: INTERNAL_SERVER_ERROR.to_string(),
            traceback,
        })
    }

    pub fn id(&self) -> &Value {
        match self {
            Self::Success(response) => &response.id,
            Self::Failure(response) => &response.id,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Success(response) => Some(&response.result),
            Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failure(response) => Some(&response.error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// True for the session terminator: a line that is empty once the end-of-line
/// and surrounding whitespace are stripped.
pub fn is_terminator(line: &str) -> bool {
    line.trim().is_empty()
}

pub fn decode_line(line: &str) -> Result<Request, DecodeError> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|source| DecodeError::Json { source })?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<Request, DecodeError> {
    let Some(object) = value.as_object() else {
        return Err(DecodeError::NotAnObject);
    };

    let id = object.get("id").cloned();
    let has_method = object
        .get("method")
        .and_then(Value::as_str)
        .is_some_and(|method| !method.trim().is_empty());
    if !has_method {
        return Err(DecodeError::MissingMethod { id });
    }

    serde_json::from_value(value).map_err(|source| DecodeError::Malformed { id, source })
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(LINE_TERMINATOR);
    Ok(bytes)
}

pub fn encode_request(request: &Request) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(request)?;
    bytes.push(LINE_TERMINATOR);
    Ok(bytes)
}
