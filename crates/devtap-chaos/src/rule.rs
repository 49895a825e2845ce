//! Chaos rule and configuration model
//!
//! The JSON field names here are the external contract: configs posted to the
//! admin API and shipped in presets use camelCase keys and the snake_case
//! `type` values of [`ChaosKind`].

use serde::{Deserialize, Serialize};

/// Default stale delay: three hours
pub const DEFAULT_STALE_DELAY_MS: u64 = 3 * 60 * 60 * 1000;
/// Default slow-drip chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
/// Default truncation fraction when the configured one is out of range
pub const DEFAULT_TRUNCATE_PERCENT: f64 = 0.5;
/// Default reorder batch size
pub const DEFAULT_REORDER_MIN_REQUESTS: usize = 2;
/// Default reorder max wait in milliseconds
pub const DEFAULT_REORDER_MAX_WAIT_MS: u64 = 1000;

/// The failure modes a rule can inject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaosKind {
    /// Sleep before the response begins
    Latency,
    /// Bandwidth cap; maps to slow-drip pacing
    Bandwidth,
    /// Drop the connection with no bytes written
    PacketLoss,
    /// Close the connection mid-body after a threshold
    Disconnect,
    /// Delay the close after the last byte
    SlowClose,
    /// Write the body in small paced chunks
    SlowDrip,
    /// Never respond; hold until the client gives up
    Timeout,
    /// Very long sleep before responding
    Stale,
    /// Hold the response in the reorder queue
    OutOfOrder,
    /// Replace the response with a chosen status and body
    HttpError,
    /// `http_error` specialized to 429
    RateLimit,
    /// Random bit mutation in the body
    BitFlip,
    /// Cut the body after a fraction of its size
    Truncate,
    /// Malform a JSON payload
    CorruptJson,
    /// Omit the terminal chunk of a chunked body
    ChunkedAbort,
    /// Advertise Content-Length but send fewer bytes
    PartialBody,
    /// Inject many extra response headers
    HeaderBomb,
}

/// How much the proxy logs for chaos decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggingMode {
    /// No chaos logging
    Off,
    /// Log only requests with a non-empty match set
    Matched,
    /// Log every request decision
    #[default]
    All,
}

/// One declarative failure rule
///
/// Matching criteria (URL regex, method whitelist, probability) select
/// requests; the remaining fields parameterize the rule's kind and are
/// ignored by other kinds. [`ChaosRule::normalize`] folds out-of-range
/// parameters back to documented defaults; only a bad URL regex is a hard
/// error, surfaced when the rule is admitted to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChaosRule {
    /// Unique id within a config
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Failure mode
    #[serde(rename = "type")]
    pub kind: ChaosKind,
    /// Disabled rules never match
    pub enabled: bool,
    /// URL regex tested against the full URL (empty = match all)
    pub url_pattern: String,
    /// Method whitelist (empty = any)
    pub methods: Vec<String>,
    /// Per-rule probability in [0, 1]
    pub probability: f64,
    /// Minimum injected latency
    pub min_latency_ms: u64,
    /// Maximum injected latency
    pub max_latency_ms: u64,
    /// Latency jitter, applied in ±jitter
    pub jitter_ms: u64,
    /// Pacing budget for slow-drip / bandwidth
    pub bytes_per_ms: f64,
    /// Slow-drip chunk size in bytes
    pub chunk_size: usize,
    /// Disconnect threshold as a fraction of the body
    pub drop_after_percent: f64,
    /// Disconnect threshold in absolute bytes
    pub drop_after_bytes: u64,
    /// Stale-response sleep
    pub stale_delay_ms: u64,
    /// Reorder batch size
    pub reorder_min_requests: usize,
    /// Reorder max wait before a partial batch flushes
    pub reorder_max_wait_ms: u64,
    /// Candidate status codes for error injection
    pub error_codes: Vec<u16>,
    /// Body for injected errors (empty = canonical reason phrase)
    pub error_message: String,
    /// Fraction of the body to let through before truncating
    pub truncate_percent: f64,
}

impl Default for ChaosRule {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            kind: ChaosKind::Latency,
            enabled: true,
            url_pattern: String::new(),
            methods: Vec::new(),
            probability: 1.0,
            min_latency_ms: 0,
            max_latency_ms: 0,
            jitter_ms: 0,
            bytes_per_ms: 0.0,
            chunk_size: 0,
            drop_after_percent: 0.0,
            drop_after_bytes: 0,
            stale_delay_ms: 0,
            reorder_min_requests: 0,
            reorder_max_wait_ms: 0,
            error_codes: Vec::new(),
            error_message: String::new(),
            truncate_percent: 0.0,
        }
    }
}

impl ChaosRule {
    /// A rule of the given kind with everything else defaulted
    pub fn new(id: impl Into<String>, kind: ChaosKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            ..Default::default()
        }
    }

    /// Fold out-of-range parameters back to their documented defaults
    pub fn normalize(&mut self) {
        self.probability = self.probability.clamp(0.0, 1.0);

        if self.max_latency_ms <= self.min_latency_ms {
            self.max_latency_ms = self.min_latency_ms + 1;
        }

        if self.truncate_percent <= 0.0 || self.truncate_percent > 1.0 {
            self.truncate_percent = DEFAULT_TRUNCATE_PERCENT;
        }
        self.drop_after_percent = self.drop_after_percent.clamp(0.0, 1.0);

        if self.bytes_per_ms <= 0.0 {
            self.bytes_per_ms = 1.0;
        }
        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.stale_delay_ms == 0 {
            self.stale_delay_ms = DEFAULT_STALE_DELAY_MS;
        }
        if self.reorder_min_requests == 0 {
            self.reorder_min_requests = DEFAULT_REORDER_MIN_REQUESTS;
        }
        if self.reorder_max_wait_ms == 0 {
            self.reorder_max_wait_ms = DEFAULT_REORDER_MAX_WAIT_MS;
        }

        if self.error_codes.is_empty() {
            self.error_codes = match self.kind {
                ChaosKind::RateLimit => vec![429],
                _ => vec![500],
            };
        }
        if self.kind == ChaosKind::RateLimit {
            self.error_codes = vec![429];
        }
    }

    /// Whether the rule's method whitelist admits `method`
    pub fn matches_method(&self, method: &str) -> bool {
        self.methods.is_empty()
            || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Whether the rule injects a fabricated error response
    pub fn is_error_kind(&self) -> bool {
        matches!(self.kind, ChaosKind::HttpError | ChaosKind::RateLimit)
    }
}

/// A full chaos configuration: rules plus global knobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChaosConfig {
    /// Rules, evaluated in declaration order
    pub rules: Vec<ChaosRule>,
    /// Probability gate applied before any rule; 0 or ≥ 1 disables the gate
    pub global_odds: f64,
    /// RNG seed; 0 seeds from the wall clock
    pub seed: u64,
    /// Chaos decision logging
    pub logging_mode: LoggingMode,
}

impl ChaosConfig {
    /// A config holding the given rules, gate disabled
    pub fn with_rules(rules: Vec<ChaosRule>) -> Self {
        Self {
            rules,
            ..Default::default()
        }
    }
}
