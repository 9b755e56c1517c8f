//! Control API handlers.

use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use warden_auth::{AuthError, GroupAction, RejectionAuditEntry};
use warden_bridge::{BridgeError, ConnectionStatus};
use warden_exec::ExecError;
use warden_rules::{EngineError, RuleMatch, SweepSummary};
use warden_types::{EnforcementRecord, RuleDefinition, Subject};

/// Largest number of persisted records one history request returns.
const MAX_HISTORY_LIMIT: usize = 1000;

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The platform rate-limited us or the engine is cooling down.
    #[error("too many requests: {message}")]
    TooManyRequests {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// A platform call failed.
    #[error("upstream error: {0}")]
    BadGateway(String),

    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalServerError(msg) => {
                tracing::error!(error = %msg, "internal server error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({ "error": self.to_string() }));

        match self {
            ApiError::TooManyRequests {
                retry_after_secs: Some(secs),
                ..
            } => (status, [(header::RETRY_AFTER, secs.to_string())], body).into_response(),
            _ => (status, body).into_response(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Forbidden(err.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Denied(e) => e.into(),
            e @ (EngineError::InvalidRule { .. }
            | EngineError::InvalidPattern { .. }
            | EngineError::MissingSubject) => ApiError::BadRequest(e.to_string()),
            EngineError::RuleNotFound(id) => ApiError::NotFound(format!("rule {id}")),
            EngineError::CoolingDown { remaining } => ApiError::TooManyRequests {
                message: format!("cooling down for another {}s", remaining.as_secs()),
                retry_after_secs: Some(remaining.as_secs().max(1)),
            },
            EngineError::Api(e) => e.into(),
            EngineError::Persist(e) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<ExecError> for ApiError {
    fn from(err: ExecError) -> Self {
        if err.is_rate_limited() {
            return ApiError::TooManyRequests {
                message: err.to_string(),
                retry_after_secs: err.retry_after().map(|d| d.as_secs().max(1)),
            };
        }
        match err.root() {
            ExecError::NotFound(what) => ApiError::NotFound(what.clone()),
            _ => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::AlreadyConnected
            | BridgeError::ConnectInFlight
            | BridgeError::Superseded => ApiError::Conflict(err.to_string()),
            BridgeError::InvalidUrl(_) => ApiError::BadRequest(err.to_string()),
            BridgeError::TokenUnavailable(_) | BridgeError::Connection(_) => {
                ApiError::BadGateway(err.to_string())
            }
        }
    }
}

/// Handler for `GET /api/status`.
pub async fn get_status_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let stats = state.executor.stats();
    let watcher = state.watcher.as_ref().map(|w| {
        json!({
            "running": w.is_running(),
            "session": w.session(),
        })
    });

    Json(json!({
        "connection": state.bridge.status(),
        "engine": state.engine.status(),
        "watcher": watcher,
        "allowedGroups": state.engine.gate().allowed_groups().len(),
        "executor": {
            "calls": stats.calls,
            "failures": stats.failures,
            "strategyFailures": stats.strategy_failures,
            "fallbackSuccesses": stats.fallback_successes,
        },
    }))
}

/// Response body for `GET /api/session`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub allowed_groups: Vec<String>,
}

/// Handler for `GET /api/session`.
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<SessionResponse> {
    let allowed_groups = state
        .engine
        .gate()
        .allowed_groups()
        .into_iter()
        .map(|g| g.as_str().to_string())
        .collect();
    Json(SessionResponse {
        authenticated: state.session.is_authenticated(),
        user_id: state.session.user_id(),
        allowed_groups,
    })
}

/// Handler for `POST /api/connection/connect`.
pub async fn connect_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    state.bridge.connect().await?;
    Ok(Json(state.bridge.status()))
}

/// Handler for `POST /api/connection/disconnect`.
pub async fn disconnect_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<ConnectionStatus> {
    state.bridge.disconnect().await;
    Json(state.bridge.status())
}

/// Handler for `POST /api/connection/reconnect`.
pub async fn reconnect_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    state.bridge.force_reconnect().await?;
    Ok(Json(state.bridge.status()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupQuery {
    pub group_id: Option<String>,
}

/// Handler for `GET /api/rules`.
pub async fn list_rules_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<GroupQuery>,
) -> Result<Json<Vec<RuleDefinition>>, ApiError> {
    Ok(Json(state.engine.rules(query.group_id.as_deref())?))
}

/// Handler for `POST /api/rules`.
///
/// Creates the rule or replaces the one with the same id.
pub async fn save_rule_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(definition): Json<RuleDefinition>,
) -> Result<Json<RuleDefinition>, ApiError> {
    let saved = state.engine.save_rule(definition).await?;
    tracing::info!(rule_id = %saved.id, group_id = %saved.group_id, "rule saved");
    Ok(Json(saved))
}

/// Handler for `DELETE /api/rules/{ruleId}`.
pub async fn delete_rule_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(rule_id): Path<String>,
) -> Result<Json<RuleDefinition>, ApiError> {
    let removed = state.engine.delete_rule(&rule_id).await?;
    tracing::info!(rule_id = %removed.id, "rule deleted");
    Ok(Json(removed))
}

/// Response body for a dry-run evaluation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub group_id: String,
    pub user_id: String,
    pub matched: Option<RuleMatch>,
}

/// Handler for `POST /api/groups/{groupId}/check`.
///
/// Evaluates the supplied subject without acting on it.
pub async fn check_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(group_id): Path<String>,
    Json(subject): Json<Subject>,
) -> Result<Json<CheckResponse>, ApiError> {
    let matched = state.engine.check_user(&subject, &group_id)?;
    Ok(Json(CheckResponse {
        group_id,
        user_id: subject.user_id,
        matched,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessQuery {
    /// Process this one join request instead of sweeping the group.
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

/// Handler for `POST /api/groups/{groupId}/process`.
///
/// Without `userId`, sweeps the group's pending join requests and returns a
/// [`SweepSummary`]. With it, processes that single request and returns the
/// resulting record, if any.
pub async fn process_group_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(group_id): Path<String>,
    Query(query): Query<ProcessQuery>,
) -> Result<Response, ApiError> {
    match query.user_id {
        Some(user_id) => {
            let record: Option<EnforcementRecord> = state
                .engine
                .process_pending_request(&group_id, &user_id, query.display_name.as_deref())
                .await?;
            Ok(Json(json!({ "record": record })).into_response())
        }
        None => {
            let summary: SweepSummary = state
                .engine
                .process_all_pending_requests(Some(&group_id))
                .await?;
            Ok(Json(summary).into_response())
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySource {
    /// The engine's bounded in-memory history.
    #[default]
    Memory,
    /// Persisted records, including those from earlier runs.
    Store,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub group_id: Option<String>,
    #[serde(default)]
    pub source: HistorySource,
    pub limit: Option<usize>,
}

/// Handler for `GET /api/history`. Newest first.
pub async fn get_history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<EnforcementRecord>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let records = match query.source {
        HistorySource::Memory => {
            let mut records = state.engine.history(query.group_id.as_deref())?;
            records.truncate(limit);
            records
        }
        HistorySource::Store => {
            let gate = state.engine.gate();
            if let Some(group_id) = query.group_id.as_deref() {
                gate.validate_access(group_id, GroupAction::ViewAuditLog)?;
            }
            let store = state.store.clone();
            let group_id = query.group_id;
            let records = tokio::task::spawn_blocking(move || {
                store.recent_enforcements(group_id.as_deref(), limit)
            })
            .await
            .map_err(|e| ApiError::InternalServerError(format!("history task failed: {e}")))?
            .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
            gate.filter_authorized_data(records, |r| Some(r.group_id.as_str()))
        }
    };
    Ok(Json(records))
}

/// Handler for `DELETE /api/history`.
///
/// Clears the in-memory history only; persisted records are kept.
pub async fn clear_history_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let cleared = state.engine.clear_history();
    tracing::info!(cleared, "enforcement history cleared");
    Json(json!({ "cleared": cleared }))
}

/// Handler for `GET /api/audit`.
pub async fn get_audit_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<RejectionAuditEntry>> {
    Json(state.engine.gate().audit_log())
}

/// Handler for `POST /api/permissions/refresh`.
pub async fn refresh_permissions_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let groups = state.engine.refresh_permissions().await?;
    Ok(Json(json!({ "groups": groups })))
}
