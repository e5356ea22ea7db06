use std::{io, time::Instant};

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{debug, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` wins; otherwise debug mode selects `debug`, else `info`.
pub fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    debug!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "request summary"
    );

    if !status.is_success() {
        warn!(method = %method, path = %path, status = status.as_u16(), "request rejected");
    }

    response
}
