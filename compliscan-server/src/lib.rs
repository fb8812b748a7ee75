//! HTTP, WebSocket and SSE surface for compliscan.
//!
//! The binary in `main.rs` loads configuration, builds the runtime through
//! [`infra::startup`] and serves [`routes::create_router`].

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
