use std::sync::Arc;

use axum::{middleware, routing::post, Router};

pub mod builtins;
pub mod client;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod rpc;
pub mod shutdown;
pub mod stream;

use domain::modules::ControlModule;
use rpc::{dispatcher::Dispatcher, registry::Registry};
use shutdown::ShutdownSignal;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

/// Built-ins first, then the module functions matching `prefix`; a module
/// function with a built-in's name replaces it.
pub fn build_registry(module: &ControlModule, prefix: &str, shutdown: &ShutdownSignal) -> Registry {
    let mut registry = Registry::new();
    builtins::register_builtins(&mut registry, shutdown);
    registry.register_matching(module.functions(), prefix);
    registry
}

pub fn build_app(state: AppState, path: &str) -> Router {
    Router::new()
        .route(path, post(http::handlers::control_endpoint))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::modules;

    fn app_with(prefix: &str, debug: bool, shutdown: &ShutdownSignal) -> Router {
        let module = modules::lookup("controlfunctions").expect("shipped module");
        let registry = build_registry(module, prefix, shutdown);
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), debug));
        build_app(AppState::new(dispatcher), "/control")
    }

    fn app() -> Router {
        app_with("control_", false, &ShutdownSignal::new())
    }

    fn post_control(body: &'static str) -> Request<Body> {
        Request::builder()
            .uri("/control")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("request build")
    }

    async fn body_string(response: axum::response::Response) -> String {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        String::from_utf8(body.to_vec()).expect("utf8 body")
    }

    #[test]
    fn registry_applies_prefix_to_module_functions_only() {
        let module = modules::lookup("controlfunctions").expect("shipped module");
        let registry = build_registry(module, "keras_", &ShutdownSignal::new());

        assert_eq!(
            registry.names(),
            vec!["keras_test_numpy", "ping", "print", "stop"]
        );
    }

    #[tokio::test]
    async fn http_ping_returns_pong() {
        let response = app()
            .oneshot(post_control(
                r#"{"jsonrpc":"2.0","method":"ping","params":[],"id":1}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#
        );
    }

    #[tokio::test]
    async fn http_unknown_method_returns_generic_error() {
        let response = app()
            .oneshot(post_control(
                r#"{"jsonrpc":"2.0","method":"nosuch","params":[],"id":2}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"id":2,"error":"Internal server error"}"#
        );
    }

    #[tokio::test]
    async fn http_print_returns_null_result() {
        let response = app()
            .oneshot(post_control(
                r#"{"jsonrpc":"2.0","method":"print","params":["Wow"],"id":3}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(
            body_string(response).await,
            r#"{"jsonrpc":"2.0","id":3,"result":null}"#
        );
    }

    #[tokio::test]
    async fn http_uses_its_own_prefix() {
        let response = app()
            .oneshot(post_control(
                r#"{"jsonrpc":"2.0","method":"keras_test_numpy","params":[{"feature":[1],"rows":1,"cols":1}],"id":4}"#,
            ))
            .await
            .expect("request execution");

        let body_json: serde_json::Value =
            serde_json::from_str(&body_string(response).await).expect("valid json response");
        assert_eq!(body_json["error"], "Internal server error");

        let response = app()
            .oneshot(post_control(
                r#"{"jsonrpc":"2.0","method":"control_flowrate","params":[0,0,[40,30],[],[],[],false,[],2,0,true,0,null],"id":5}"#,
            ))
            .await
            .expect("request execution");

        let body_json: serde_json::Value =
            serde_json::from_str(&body_string(response).await).expect("valid json response");
        assert_eq!(body_json["id"], 5);
        assert_eq!(body_json["result"][0][0], 40.0);
    }

    #[tokio::test]
    async fn http_malformed_body_returns_null_id_error() {
        let response = app()
            .oneshot(post_control("{"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"id":null,"error":"Internal server error"}"#
        );
    }

    #[tokio::test]
    async fn http_debug_mode_adds_traceback() {
        let response = app_with("control_", true, &ShutdownSignal::new())
            .oneshot(post_control(
                r#"{"jsonrpc":"2.0","method":"print","params":[],"id":6}"#,
            ))
            .await
            .expect("request execution");

        let body_json: serde_json::Value =
            serde_json::from_str(&body_string(response).await).expect("valid json response");
        assert_eq!(body_json["id"], 6);
        assert!(body_json["traceback"]
            .as_str()
            .is_some_and(|trace| trace.contains("print()")));
    }

    #[tokio::test]
    async fn http_stop_triggers_shutdown() {
        let shutdown = ShutdownSignal::new();
        let response = app_with("control_", false, &shutdown)
            .oneshot(post_control(
                r#"{"jsonrpc":"2.0","method":"stop","params":null,"id":7}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(
            body_string(response).await,
            r#"{"jsonrpc":"2.0","id":7,"result":null}"#
        );
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn get_is_not_allowed() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/control")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn other_paths_are_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .method("POST")
                    .body(Body::from(r#"{"method":"ping","id":1}"#))
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
