//! Warden process host.
//!
//! Wires the push bridge, log watcher, authorization gate, rule engine and
//! store together and exposes a local control API plus an SSE stream for the
//! presentation layer.

pub mod api;
pub mod api_sse;
pub mod background;
pub mod config;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use warden_api::SessionProvider;
use warden_bridge::EventBridge;
use warden_exec::Executor;
use warden_rules::ModerationEngine;
use warden_store::SqliteStore;
use warden_types::EventBus;
use warden_watcher::ActivityWatcher;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Rule engine; also owns the authorization gate.
    pub engine: ModerationEngine,
    /// Push pipeline connection.
    pub bridge: EventBridge,
    /// Local log watcher. `None` when no log directory is configured.
    pub watcher: Option<ActivityWatcher>,
    /// The operator's platform session.
    pub session: Arc<dyn SessionProvider>,
    /// Executor shared by every platform call, for its counters.
    pub executor: Executor,
    /// Durable records, events and rules.
    pub store: SqliteStore,
    /// Fan-out of every normalized activity event.
    pub bus: EventBus,
}

/// Maximum request body size (256 KiB). Rule definitions are small.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api::get_status_handler))
        .route("/api/session", get(api::get_session_handler))
        .route("/api/connection/connect", post(api::connect_handler))
        .route("/api/connection/disconnect", post(api::disconnect_handler))
        .route("/api/connection/reconnect", post(api::reconnect_handler))
        .route(
            "/api/rules",
            get(api::list_rules_handler).post(api::save_rule_handler),
        )
        .route("/api/rules/{ruleId}", delete(api::delete_rule_handler))
        .route(
            "/api/groups/{groupId}/check",
            post(api::check_user_handler),
        )
        .route(
            "/api/groups/{groupId}/process",
            post(api::process_group_handler),
        )
        .route(
            "/api/history",
            get(api::get_history_handler).delete(api::clear_history_handler),
        )
        .route("/api/audit", get(api::get_audit_handler))
        .route(
            "/api/permissions/refresh",
            post(api::refresh_permissions_handler),
        )
        .route("/events/stream", get(api_sse::get_event_stream_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
