//! Typed traffic log entries
//!
//! Everything the proxy observes and everything the browser instrumentation
//! reports lands in the traffic log as a [`LogEntry`]. The union is tagged by
//! entry kind so queries can filter cheaply before touching variant fields,
//! and every variant carries its own timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Discriminator for the log entry union
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A proxied HTTP exchange
    Http,
    /// A frontend (browser) error
    Error,
    /// Page performance metrics
    Performance,
    /// A custom log frame from the instrumentation
    Custom,
    /// A screenshot capture
    Screenshot,
    /// A script execution record
    Execution,
    /// A recorded response body
    Response,
    /// A user interaction (click, scroll, input, ...)
    Interaction,
    /// A DOM mutation
    Mutation,
    /// A message from the devtool panel
    PanelMessage,
    /// A freehand sketch/annotation
    Sketch,
    /// Continuous capture started
    CaptureStarted,
    /// One frame of a continuous capture
    CaptureFrame,
    /// Continuous capture stopped
    CaptureStopped,
    /// Extracted design tokens
    DesignTokens,
    /// A design snapshot of the rendered page
    DesignSnapshot,
    /// Design feedback anchored to a page element
    DesignFeedback,
}

/// One proxied HTTP request/response pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpExchange {
    /// Unique exchange ID
    pub id: String,
    /// When the request completed
    pub timestamp: DateTime<Utc>,
    /// Request method
    pub method: String,
    /// Full request URL
    pub url: String,
    /// Response status code (0 when the upstream never answered)
    pub status: u16,
    /// Wall-clock duration, including injected chaos
    pub duration_ms: u64,
    /// Response content type, when present
    pub content_type: Option<String>,
    /// Request body size in bytes
    pub request_size: u64,
    /// Response body size in bytes, before chaos mutation
    pub response_size: u64,
    /// Selected request headers
    pub request_headers: HashMap<String, String>,
    /// Upstream error, if the round trip failed
    pub error: Option<String>,
    /// Names of chaos rules applied to this exchange
    pub chaos_applied: Vec<String>,
    /// Browser tab session cookie, when present
    pub browser_session: Option<String>,
}

impl HttpExchange {
    /// Create an exchange record with a fresh ID and the current time
    pub fn new(method: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            method: method.into(),
            url: url.into(),
            status,
            duration_ms: 0,
            content_type: None,
            request_size: 0,
            response_size: 0,
            request_headers: HashMap::new(),
            error: None,
            chaos_applied: Vec::new(),
            browser_session: None,
        }
    }
}

/// A JavaScript error reported by the instrumentation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendError {
    /// When the error fired
    pub timestamp: DateTime<Utc>,
    /// Error message
    pub message: String,
    /// Script source URL, when known
    pub source: Option<String>,
    /// Source line
    pub line: Option<u32>,
    /// Source column
    pub column: Option<u32>,
    /// Stack trace, when captured
    pub stack: Option<String>,
    /// Page URL the error fired on
    pub url: String,
    /// Browser tab session cookie
    pub browser_session: Option<String>,
}

/// Navigation timing metrics for one page load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// When the metrics were reported
    pub timestamp: DateTime<Utc>,
    /// Page URL
    pub url: String,
    /// DOMContentLoaded relative to navigation start
    pub dom_content_loaded_ms: Option<f64>,
    /// Load event relative to navigation start
    pub load_event_ms: Option<f64>,
    /// First paint
    pub first_paint_ms: Option<f64>,
    /// First contentful paint
    pub first_contentful_paint_ms: Option<f64>,
    /// Time to first byte
    pub ttfb_ms: Option<f64>,
    /// Browser tab session cookie
    pub browser_session: Option<String>,
}

/// A custom log frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomLog {
    /// When the frame was posted
    pub timestamp: DateTime<Utc>,
    /// Log level as reported (log, info, warn, error)
    pub level: String,
    /// Message text
    pub message: String,
    /// Arbitrary structured payload
    pub data: serde_json::Value,
}

/// A screenshot capture record (pixel data lives outside the ring)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    /// When the screenshot was taken
    pub timestamp: DateTime<Utc>,
    /// Page URL
    pub url: String,
    /// Optional caller-supplied description
    pub description: Option<String>,
    /// Encoded image size in bytes
    pub data_size: u64,
    /// Image format (png, jpeg, webp)
    pub format: String,
}

/// A script executed in the page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// When execution finished
    pub timestamp: DateTime<Utc>,
    /// The executed script
    pub script: String,
    /// Serialized result value
    pub result: serde_json::Value,
    /// Execution error, when the script threw
    pub error: Option<String>,
}

/// A captured response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// When the response was captured
    pub timestamp: DateTime<Utc>,
    /// Request URL
    pub url: String,
    /// Response status
    pub status: u16,
    /// Truncated body preview
    pub body_preview: String,
}

/// A user interaction event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// When the interaction happened
    pub timestamp: DateTime<Utc>,
    /// Interaction type (click, scroll, input, keypress, ...)
    pub interaction_type: String,
    /// CSS selector of the target element
    pub selector: Option<String>,
    /// Page URL
    pub url: String,
    /// Browser tab session cookie
    pub browser_session: Option<String>,
    /// Type-specific detail payload
    pub detail: serde_json::Value,
}

/// A DOM mutation event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEvent {
    /// When the mutation was observed
    pub timestamp: DateTime<Utc>,
    /// Mutation type (child_list, attributes, character_data)
    pub mutation_type: String,
    /// CSS selector of the mutated node
    pub selector: Option<String>,
    /// Nodes added
    pub added: u32,
    /// Nodes removed
    pub removed: u32,
    /// Page URL
    pub url: String,
    /// Browser tab session cookie
    pub browser_session: Option<String>,
}

/// A message relayed from the devtool panel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelMessage {
    /// When the message was posted
    pub timestamp: DateTime<Utc>,
    /// Originating panel name
    pub panel: String,
    /// Message payload
    pub message: serde_json::Value,
}

/// A freehand sketch drawn over the page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sketch {
    /// When the sketch was submitted
    pub timestamp: DateTime<Utc>,
    /// Page URL
    pub url: String,
    /// Sketch name
    pub name: Option<String>,
    /// Stroke/path payload
    pub data: serde_json::Value,
}

/// Start/stop marker for a continuous capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureMarker {
    /// When the capture state changed
    pub timestamp: DateTime<Utc>,
    /// Capture session ID
    pub capture_id: String,
    /// Page URL
    pub url: String,
}

/// One frame in a continuous capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureFrame {
    /// When the frame was captured
    pub timestamp: DateTime<Utc>,
    /// Capture session ID
    pub capture_id: String,
    /// Frame sequence number within the capture
    pub sequence: u64,
    /// Encoded frame size in bytes
    pub data_size: u64,
}

/// Design tokens extracted from the rendered page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignTokens {
    /// When the tokens were extracted
    pub timestamp: DateTime<Utc>,
    /// Page URL
    pub url: String,
    /// Token payload (colors, typography, spacing)
    pub tokens: serde_json::Value,
}

/// A structural snapshot of the rendered page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignSnapshot {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Page URL
    pub url: String,
    /// Number of DOM nodes captured
    pub node_count: u64,
    /// Serialized snapshot size in bytes
    pub data_size: u64,
}

/// Design feedback anchored to a page element
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignFeedback {
    /// When the feedback was left
    pub timestamp: DateTime<Utc>,
    /// Page URL
    pub url: String,
    /// CSS selector of the annotated element
    pub target: Option<String>,
    /// Feedback text
    pub comment: String,
}

/// One entry in the traffic log
///
/// The serialized form is tagged with `kind`, matching [`EntryKind`], so
/// downstream consumers (the overlay UI, the admin API) can dispatch without
/// trying every variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    /// A proxied HTTP exchange
    Http(HttpExchange),
    /// A frontend error
    Error(FrontendError),
    /// Page performance metrics
    Performance(PerformanceMetrics),
    /// A custom log frame
    Custom(CustomLog),
    /// A screenshot capture
    Screenshot(Screenshot),
    /// A script execution record
    Execution(ExecutionRecord),
    /// A captured response body
    Response(ResponseRecord),
    /// A user interaction
    Interaction(InteractionEvent),
    /// A DOM mutation
    Mutation(MutationEvent),
    /// A devtool panel message
    PanelMessage(PanelMessage),
    /// A freehand sketch
    Sketch(Sketch),
    /// Continuous capture started
    CaptureStarted(CaptureMarker),
    /// One continuous-capture frame
    CaptureFrame(CaptureFrame),
    /// Continuous capture stopped
    CaptureStopped(CaptureMarker),
    /// Extracted design tokens
    DesignTokens(DesignTokens),
    /// A design snapshot
    DesignSnapshot(DesignSnapshot),
    /// Design feedback
    DesignFeedback(DesignFeedback),
}

impl LogEntry {
    /// The entry's kind discriminator
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Http(_) => EntryKind::Http,
            Self::Error(_) => EntryKind::Error,
            Self::Performance(_) => EntryKind::Performance,
            Self::Custom(_) => EntryKind::Custom,
            Self::Screenshot(_) => EntryKind::Screenshot,
            Self::Execution(_) => EntryKind::Execution,
            Self::Response(_) => EntryKind::Response,
            Self::Interaction(_) => EntryKind::Interaction,
            Self::Mutation(_) => EntryKind::Mutation,
            Self::PanelMessage(_) => EntryKind::PanelMessage,
            Self::Sketch(_) => EntryKind::Sketch,
            Self::CaptureStarted(_) => EntryKind::CaptureStarted,
            Self::CaptureFrame(_) => EntryKind::CaptureFrame,
            Self::CaptureStopped(_) => EntryKind::CaptureStopped,
            Self::DesignTokens(_) => EntryKind::DesignTokens,
            Self::DesignSnapshot(_) => EntryKind::DesignSnapshot,
            Self::DesignFeedback(_) => EntryKind::DesignFeedback,
        }
    }

    /// The timestamp carried by the entry's variant
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Http(e) => e.timestamp,
            Self::Error(e) => e.timestamp,
            Self::Performance(e) => e.timestamp,
            Self::Custom(e) => e.timestamp,
            Self::Screenshot(e) => e.timestamp,
            Self::Execution(e) => e.timestamp,
            Self::Response(e) => e.timestamp,
            Self::Interaction(e) => e.timestamp,
            Self::Mutation(e) => e.timestamp,
            Self::PanelMessage(e) => e.timestamp,
            Self::Sketch(e) => e.timestamp,
            Self::CaptureStarted(e) | Self::CaptureStopped(e) => e.timestamp,
            Self::CaptureFrame(e) => e.timestamp,
            Self::DesignTokens(e) => e.timestamp,
            Self::DesignSnapshot(e) => e.timestamp,
            Self::DesignFeedback(e) => e.timestamp,
        }
    }

    /// The URL carried by the entry, for URL-substring filtering
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Http(e) => Some(&e.url),
            Self::Error(e) => Some(&e.url),
            Self::Performance(e) => Some(&e.url),
            Self::Response(e) => Some(&e.url),
            Self::Interaction(e) => Some(&e.url),
            Self::Mutation(e) => Some(&e.url),
            Self::Screenshot(e) => Some(&e.url),
            Self::Sketch(e) => Some(&e.url),
            Self::CaptureStarted(e) | Self::CaptureStopped(e) => Some(&e.url),
            Self::DesignTokens(e) => Some(&e.url),
            Self::DesignSnapshot(e) => Some(&e.url),
            Self::DesignFeedback(e) => Some(&e.url),
            Self::Custom(_) | Self::Execution(_) | Self::PanelMessage(_) | Self::CaptureFrame(_) => {
                None
            }
        }
    }
}
