pub mod v1;

use axum::{
    Json, Router,
    http::{HeaderName, HeaderValue},
    routing::get,
};
use serde_json::{Value, json};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    handlers::websocket::scan_websocket_handler,
    infra::{app_state::AppState, tenant::TENANT_HEADER},
};

/// Full application router: versioned API, WebSocket feed and health check.
pub fn create_router(state: AppState) -> Router {
    let cors_layer = cors_layer(&state);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/scans/{id}", get(scan_websocket_handler))
        .nest("/api/v1", v1::create_v1_router())
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .cors
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::list([
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static(TENANT_HEADER),
        ]))
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
