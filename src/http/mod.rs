//! HTTP transport: one JSON envelope per POST, same dispatcher as the stream transport
//!
//! Each call pays for its own connection; prefer the stream transport for
//! controllers that call many times per simulation.

pub mod handlers;

use std::net::SocketAddr;

use tracing::info;

use crate::errors::ServerError;
use crate::shutdown::ShutdownSignal;
use crate::stream::bind_reusable;
use crate::{build_app, AppState};

/// Serves the HTTP variant at `path` until shutdown is signalled.
pub async fn serve(
    addr: SocketAddr,
    path: &str,
    state: AppState,
    shutdown: ShutdownSignal,
) -> Result<(), ServerError> {
    let listener = bind_reusable(addr)?;
    let endpoint = listener
        .local_addr()
        .map_err(|source| ServerError::LocalAddr { source })?;
    info!(endpoint = %format!("http://{endpoint}{path}"), "http listener active");

    axum::serve(listener, build_app(state, path).into_make_service())
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(|source| ServerError::Http { source })?;

    info!("http listener closed");
    Ok(())
}
