//! Axum handler for the HTTP variant

use std::sync::Arc;

use axum::{body::Bytes, extract::State, Json};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::rpc::{
    dispatcher::Dispatcher,
    envelope::{decode_value, Response},
};
use crate::AppState;

pub async fn control_endpoint(State(state): State<AppState>, body: Bytes) -> Json<Response> {
    let request = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => decode_value(payload),
        Err(source) => Err(DecodeError::Json { source }),
    };

    let response = match request {
        Ok(request) => {
            let id = request.id.clone();
            let dispatcher = Arc::clone(&state.dispatcher);
            match tokio::task::spawn_blocking(move || dispatcher.dispatch(&request)).await {
                Ok(response) => response,
                Err(_) => Response::failure(id, None),
            }
        }
        Err(err) => reject(&state.dispatcher, &err),
    };

    Json(response)
}

fn reject(dispatcher: &Dispatcher, err: &DecodeError) -> Response {
    let id = err.salvaged_id().cloned().unwrap_or(Value::Null);
    dispatcher.decode_failure_response(id, err)
}
