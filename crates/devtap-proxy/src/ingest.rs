//! Instrumentation event ingest
//!
//! The browser-side script posts `{type, data, url}` frames to
//! `POST /__devtap/event`, keyed by the per-tab session cookie. Each
//! recognized frame becomes a traffic log entry, routes through the page
//! tracker, and is relayed to the overlay sidecar. Malformed frames are
//! rejected with 400 and leave no trace.

use crate::server::ProxyState;
use crate::session_cookie;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use devtap_core::{
    CaptureFrame, CaptureMarker, CustomLog, DesignFeedback, DesignSnapshot, DesignTokens,
    ExecutionRecord, FrontendError, InteractionEvent, LogEntry, MutationEvent, PanelMessage,
    PerformanceMetrics, ResponseRecord, Screenshot, SessionError, Sketch,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// One frame posted by the instrumentation script
#[derive(Debug, Deserialize)]
pub struct EventFrame {
    /// Frame type, matching a log entry kind
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Type-specific payload
    #[serde(default)]
    pub data: Value,
    /// Page URL the frame originated on
    #[serde(default)]
    pub url: Option<String>,
}

/// `POST /__devtap/event`
pub async fn ingest_event(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    Json(frame): Json<EventFrame>,
) -> StatusCode {
    let browser_session = session_cookie(&headers);
    let url = frame.url.clone().unwrap_or_default();
    let data = &frame.data;

    if !data.is_object() && !data.is_null() {
        return StatusCode::BAD_REQUEST;
    }

    let entry = match frame.frame_type.as_str() {
        "error" => {
            let error = FrontendError {
                timestamp: Utc::now(),
                message: str_field(data, "message").unwrap_or_else(|| "unknown error".to_string()),
                source: str_field(data, "source"),
                line: u32_field(data, "line"),
                column: u32_field(data, "column"),
                stack: str_field(data, "stack"),
                url: url.clone(),
                browser_session: browser_session.clone(),
            };
            state.tracker.track_error(
                browser_session.as_deref(),
                &url,
                SessionError {
                    message: error.message.clone(),
                    source: error.source.clone(),
                    line: error.line,
                    timestamp: error.timestamp,
                },
            );
            LogEntry::Error(error)
        }
        "performance" => {
            if let Some(title) = str_field(data, "title") {
                state.tracker.update_title(browser_session.as_deref(), &url, &title);
            }
            let metrics = PerformanceMetrics {
                timestamp: Utc::now(),
                url: url.clone(),
                dom_content_loaded_ms: f64_field(data, "domContentLoadedMs"),
                load_event_ms: f64_field(data, "loadEventMs"),
                first_paint_ms: f64_field(data, "firstPaintMs"),
                first_contentful_paint_ms: f64_field(data, "firstContentfulPaintMs"),
                ttfb_ms: f64_field(data, "ttfbMs"),
                browser_session: browser_session.clone(),
            };
            state
                .tracker
                .track_performance(browser_session.as_deref(), &url, metrics.clone());
            LogEntry::Performance(metrics)
        }
        "custom_log" => LogEntry::Custom(CustomLog {
            timestamp: Utc::now(),
            level: str_field(data, "level").unwrap_or_else(|| "log".to_string()),
            message: str_field(data, "message").unwrap_or_default(),
            data: data.get("data").cloned().unwrap_or(Value::Null),
        }),
        "execution" => LogEntry::Execution(ExecutionRecord {
            timestamp: Utc::now(),
            script: str_field(data, "script").unwrap_or_default(),
            result: data.get("result").cloned().unwrap_or(Value::Null),
            error: str_field(data, "error"),
        }),
        "screenshot" => LogEntry::Screenshot(Screenshot {
            timestamp: Utc::now(),
            url: url.clone(),
            description: str_field(data, "description"),
            data_size: u64_field(data, "dataSize").unwrap_or(0),
            format: str_field(data, "format").unwrap_or_else(|| "png".to_string()),
        }),
        "response" => LogEntry::Response(ResponseRecord {
            timestamp: Utc::now(),
            url: url.clone(),
            status: u32_field(data, "status").unwrap_or(0) as u16,
            body_preview: str_field(data, "bodyPreview").unwrap_or_default(),
        }),
        "interaction" => {
            let event = InteractionEvent {
                timestamp: Utc::now(),
                interaction_type: str_field(data, "interactionType")
                    .unwrap_or_else(|| "unknown".to_string()),
                selector: str_field(data, "selector"),
                url: url.clone(),
                browser_session: browser_session.clone(),
                detail: data.get("detail").cloned().unwrap_or(Value::Null),
            };
            state
                .tracker
                .track_interaction(browser_session.as_deref(), &url, event.clone());
            LogEntry::Interaction(event)
        }
        "mutation" => {
            let event = MutationEvent {
                timestamp: Utc::now(),
                mutation_type: str_field(data, "mutationType")
                    .unwrap_or_else(|| "unknown".to_string()),
                selector: str_field(data, "selector"),
                added: u32_field(data, "added").unwrap_or(0),
                removed: u32_field(data, "removed").unwrap_or(0),
                url: url.clone(),
                browser_session: browser_session.clone(),
            };
            state
                .tracker
                .track_mutation(browser_session.as_deref(), &url, event.clone());
            LogEntry::Mutation(event)
        }
        "panel_message" => LogEntry::PanelMessage(PanelMessage {
            timestamp: Utc::now(),
            panel: str_field(data, "panel").unwrap_or_else(|| "default".to_string()),
            message: data.get("message").cloned().unwrap_or(Value::Null),
        }),
        "sketch" => LogEntry::Sketch(Sketch {
            timestamp: Utc::now(),
            url: url.clone(),
            name: str_field(data, "name"),
            data: data.get("data").cloned().unwrap_or(Value::Null),
        }),
        "capture_started" | "capture_stopped" => {
            let marker = CaptureMarker {
                timestamp: Utc::now(),
                capture_id: str_field(data, "captureId").unwrap_or_default(),
                url: url.clone(),
            };
            if frame.frame_type == "capture_started" {
                LogEntry::CaptureStarted(marker)
            } else {
                LogEntry::CaptureStopped(marker)
            }
        }
        "capture_frame" => LogEntry::CaptureFrame(CaptureFrame {
            timestamp: Utc::now(),
            capture_id: str_field(data, "captureId").unwrap_or_default(),
            sequence: u64_field(data, "sequence").unwrap_or(0),
            data_size: u64_field(data, "dataSize").unwrap_or(0),
        }),
        "design_tokens" => LogEntry::DesignTokens(DesignTokens {
            timestamp: Utc::now(),
            url: url.clone(),
            tokens: data.get("tokens").cloned().unwrap_or(Value::Null),
        }),
        "design_snapshot" => LogEntry::DesignSnapshot(DesignSnapshot {
            timestamp: Utc::now(),
            url: url.clone(),
            node_count: u64_field(data, "nodeCount").unwrap_or(0),
            data_size: u64_field(data, "dataSize").unwrap_or(0),
        }),
        "design_feedback" => LogEntry::DesignFeedback(DesignFeedback {
            timestamp: Utc::now(),
            url: url.clone(),
            target: str_field(data, "target"),
            comment: str_field(data, "comment").unwrap_or_default(),
        }),
        other => {
            debug!(frame_type = other, "Rejected unknown instrumentation frame");
            return StatusCode::BAD_REQUEST;
        }
    };

    if let Some(overlay) = &state.overlay {
        if let Ok(payload) = serde_json::to_value(&entry) {
            overlay.notify_event(payload);
        }
    }
    state.logger.log(entry);

    StatusCode::ACCEPTED
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(String::from)
}

fn f64_field(data: &Value, key: &str) -> Option<f64> {
    data.get(key).and_then(Value::as_f64)
}

fn u32_field(data: &Value, key: &str) -> Option<u32> {
    data.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

fn u64_field(data: &Value, key: &str) -> Option<u64> {
    data.get(key).and_then(Value::as_u64)
}
