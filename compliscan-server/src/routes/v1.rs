use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    handlers::{
        events::scan_events_handler,
        scans::{
            cancel_scan_handler, get_report_handler, get_scan_handler,
            list_scans_handler, retry_scan_handler, submit_scan_handler,
        },
    },
    infra::app_state::AppState,
};

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route(
            "/scans",
            post(submit_scan_handler).get(list_scans_handler),
        )
        .route("/scans/{id}", get(get_scan_handler))
        .route("/scans/{id}/cancel", post(cancel_scan_handler))
        .route("/scans/{id}/retry", post(retry_scan_handler))
        .route("/scans/{id}/report", get(get_report_handler))
        .route("/scans/{id}/events", get(scan_events_handler))
}
