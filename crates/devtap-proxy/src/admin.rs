//! Admin API
//!
//! Mounted under `/__devtap`: chaos config CRUD, preset application,
//! statistics, traffic log queries, and page session views. Configuration
//! errors surface as 400 with the prior state untouched; unknown ids as 404.

use crate::ingest;
use crate::server::ProxyState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use devtap_chaos::{ChaosConfig, ChaosError, ChaosRule};
use devtap_core::{EntryKind, LogFilter};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Build the `/__devtap` router
pub fn router() -> Router<Arc<ProxyState>> {
    Router::new()
        .route("/health", get(health))
        .route("/script", get(instrument_script))
        .route("/event", post(ingest::ingest_event))
        .route("/chaos/config", get(get_config).put(put_config))
        .route("/chaos/enabled", get(engine_enabled).put(set_engine_enabled))
        .route("/chaos/rules", post(add_rule))
        .route("/chaos/rules/{id}", delete(remove_rule))
        .route("/chaos/rules/{id}/enable", post(enable_rule))
        .route("/chaos/rules/{id}/disable", post(disable_rule))
        .route("/chaos/presets", get(list_presets))
        .route("/chaos/preset/{name}", post(apply_preset))
        .route("/chaos/stats", get(chaos_stats).delete(reset_chaos_stats))
        .route("/logs", get(query_logs).delete(clear_logs))
        .route("/logs/stats", get(log_stats))
        .route("/sessions", get(list_sessions))
        .route("/sessions/active", get(active_sessions))
        .route("/sessions/{id}", get(get_session))
}

async fn instrument_script() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "application/javascript")],
        crate::inject::script_source(),
    )
}

async fn engine_enabled(State(state): State<Arc<ProxyState>>) -> Json<serde_json::Value> {
    Json(json!({"enabled": state.engine.is_enabled()}))
}

/// Body accepted by `PUT /__devtap/chaos/enabled`
#[derive(Debug, Deserialize)]
pub struct EnabledBody {
    /// Whether the engine participates in requests
    pub enabled: bool,
}

async fn set_engine_enabled(
    State(state): State<Arc<ProxyState>>,
    Json(body): Json<EnabledBody>,
) -> StatusCode {
    state.engine.set_enabled(body.enabled);
    StatusCode::NO_CONTENT
}

async fn active_sessions(State(state): State<Arc<ProxyState>>) -> Response {
    Json(state.tracker.get_active_sessions()).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "service": "devtap-proxy"}))
}

async fn get_config(State(state): State<Arc<ProxyState>>) -> Json<ChaosConfig> {
    Json(state.engine.config())
}

async fn put_config(
    State(state): State<Arc<ProxyState>>,
    Json(config): Json<ChaosConfig>,
) -> Response {
    match state.engine.set_config(config) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => chaos_error(err),
    }
}

async fn add_rule(State(state): State<Arc<ProxyState>>, Json(rule): Json<ChaosRule>) -> Response {
    match state.engine.add_rule(rule) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => chaos_error(err),
    }
}

async fn remove_rule(State(state): State<Arc<ProxyState>>, Path(id): Path<String>) -> Response {
    match state.engine.remove_rule(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => chaos_error(err),
    }
}

async fn enable_rule(State(state): State<Arc<ProxyState>>, Path(id): Path<String>) -> Response {
    match state.engine.enable_rule(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => chaos_error(err),
    }
}

async fn disable_rule(State(state): State<Arc<ProxyState>>, Path(id): Path<String>) -> Response {
    match state.engine.disable_rule(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => chaos_error(err),
    }
}

async fn list_presets(State(state): State<Arc<ProxyState>>) -> Json<serde_json::Value> {
    let presets: Vec<_> = state
        .presets
        .list_with_description()
        .into_iter()
        .map(|(name, description)| json!({"name": name, "description": description}))
        .collect();
    Json(json!({ "presets": presets }))
}

async fn apply_preset(State(state): State<Arc<ProxyState>>, Path(name): Path<String>) -> Response {
    let Some(preset) = state.presets.get(&name) else {
        return chaos_error(ChaosError::UnknownPreset(name));
    };
    match state.engine.set_config(preset.config) {
        Ok(()) => Json(json!({"applied": preset.name, "description": preset.description}))
            .into_response(),
        Err(err) => chaos_error(err),
    }
}

async fn chaos_stats(State(state): State<Arc<ProxyState>>) -> Response {
    Json(state.engine.stats()).into_response()
}

async fn reset_chaos_stats(State(state): State<Arc<ProxyState>>) -> StatusCode {
    state.engine.reset_stats();
    StatusCode::NO_CONTENT
}

/// Query parameters accepted by `GET /__devtap/logs`
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// Comma-separated entry kinds (e.g. `http,error`)
    pub kind: Option<String>,
    /// Comma-separated HTTP methods
    pub method: Option<String>,
    /// URL substring
    pub url: Option<String>,
    /// Comma-separated status codes
    pub status: Option<String>,
    /// RFC 3339 lower time bound
    pub since: Option<DateTime<Utc>>,
    /// RFC 3339 upper time bound
    pub until: Option<DateTime<Utc>>,
    /// Maximum entries returned
    pub limit: Option<usize>,
    /// Comma-separated interaction types
    pub interaction_type: Option<String>,
    /// Comma-separated mutation types
    pub mutation_type: Option<String>,
}

impl LogsQuery {
    /// Convert the query string form into a [`LogFilter`]
    pub fn into_filter(self) -> LogFilter {
        LogFilter {
            kinds: self.kind.as_deref().map(parse_kinds).unwrap_or_default(),
            methods: self.method.as_deref().map(split_list).unwrap_or_default(),
            url_contains: self.url,
            status_codes: self
                .status
                .as_deref()
                .map(|list| split_list(list).iter().filter_map(|s| s.parse().ok()).collect())
                .unwrap_or_default(),
            since: self.since,
            until: self.until,
            limit: self.limit.unwrap_or(0),
            interaction_types: self
                .interaction_type
                .as_deref()
                .map(split_list)
                .unwrap_or_default(),
            mutation_types: self.mutation_type.as_deref().map(split_list).unwrap_or_default(),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(String::from)
        .collect()
}

fn parse_kinds(raw: &str) -> Vec<EntryKind> {
    split_list(raw)
        .into_iter()
        .filter_map(|name| serde_json::from_value(serde_json::Value::String(name)).ok())
        .collect()
}

async fn query_logs(
    State(state): State<Arc<ProxyState>>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let entries = state.logger.query(&query.into_filter());
    Json(json!({"count": entries.len(), "entries": entries})).into_response()
}

async fn clear_logs(State(state): State<Arc<ProxyState>>) -> StatusCode {
    state.logger.clear();
    StatusCode::NO_CONTENT
}

async fn log_stats(State(state): State<Arc<ProxyState>>) -> Response {
    Json(state.logger.stats()).into_response()
}

async fn list_sessions(State(state): State<Arc<ProxyState>>) -> Response {
    Json(state.tracker.all_summaries()).into_response()
}

async fn get_session(State(state): State<Arc<ProxyState>>, Path(id): Path<String>) -> Response {
    match state.tracker.get_session(&id) {
        Some(session) => Json(session).into_response(),
        None => (StatusCode::NOT_FOUND, format!("unknown session: {id}")).into_response(),
    }
}

/// Map a chaos error onto the right status code
fn chaos_error(err: ChaosError) -> Response {
    let status = match err {
        ChaosError::UnknownRule(_) | ChaosError::UnknownPreset(_) => StatusCode::NOT_FOUND,
        ChaosError::InvalidPattern { .. } | ChaosError::Config(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}
