//! # devtap Core
//!
//! Shared models and state for the devtap intercepting proxy.
//!
//! This crate provides the pieces every other devtap crate builds on:
//!
//! - **Traffic log entries**: a strongly-typed union of everything the proxy
//!   and the browser instrumentation can report ([`LogEntry`])
//! - **Traffic logger**: a fixed-capacity in-memory ring that ingests entries
//!   from many tasks and answers filtered queries ([`TrafficLogger`])
//! - **Page tracking**: per-browser-tab session state resolved from the
//!   instrumentation cookie with URL fallback ([`PageTracker`])
//!
//! Nothing here persists across restarts; the ring and the session table are
//! bounded in-memory structures sized at construction.

pub mod entry;
pub mod error;
pub mod logger;
pub mod session;
pub mod tracker;

pub use entry::{
    CaptureFrame, CaptureMarker, CustomLog, DesignFeedback, DesignSnapshot, DesignTokens,
    EntryKind, ExecutionRecord, FrontendError, HttpExchange, InteractionEvent, LogEntry,
    MutationEvent, PanelMessage, PerformanceMetrics, ResponseRecord, Screenshot, Sketch,
};
pub use error::{Error, Result};
pub use logger::{LogFilter, LoggerStats, TrafficLogger};
pub use session::{
    NavigationRecord, PageSession, PageSessionSummary, ResourceRecord, SessionError,
};
pub use tracker::{HttpRequestInfo, PageTracker, PageTrackerConfig};
