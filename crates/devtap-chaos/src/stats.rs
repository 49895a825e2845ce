//! Lock-free chaos statistics

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters for chaos activity
///
/// Every counter is an atomic add; snapshots are taken without stopping
/// writers, so a snapshot is consistent per-counter, not across counters.
#[derive(Debug, Default)]
pub struct ChaosStats {
    total_requests: AtomicU64,
    affected_requests: AtomicU64,
    latency_injected_ms: AtomicU64,
    errors_injected: AtomicU64,
    drops_injected: AtomicU64,
    truncations: AtomicU64,
    reorders: AtomicU64,
}

impl ChaosStats {
    /// Count one request seen by the engine
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one request with a non-empty match set
    pub fn record_affected(&self) {
        self.affected_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Accumulate injected latency
    pub fn record_latency(&self, ms: u64) {
        self.latency_injected_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Count one fabricated error response
    pub fn record_error(&self) {
        self.errors_injected.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one dropped/aborted connection
    pub fn record_drop(&self) {
        self.drops_injected.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one truncated body
    pub fn record_truncation(&self) {
        self.truncations.fetch_add(1, Ordering::Relaxed);
    }

    /// Count reordered responses
    pub fn record_reorders(&self, released: u64) {
        self.reorders.fetch_add(released, Ordering::Relaxed);
    }

    /// Requests seen so far
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Requests with at least one rule applied
    pub fn affected_requests(&self) -> u64 {
        self.affected_requests.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self, rule_applied: HashMap<String, u64>) -> ChaosStatsSnapshot {
        ChaosStatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            affected_requests: self.affected_requests.load(Ordering::Relaxed),
            latency_injected_ms: self.latency_injected_ms.load(Ordering::Relaxed),
            errors_injected: self.errors_injected.load(Ordering::Relaxed),
            drops_injected: self.drops_injected.load(Ordering::Relaxed),
            truncations: self.truncations.load(Ordering::Relaxed),
            reorders: self.reorders.load(Ordering::Relaxed),
            rule_applied,
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.affected_requests.store(0, Ordering::Relaxed);
        self.latency_injected_ms.store(0, Ordering::Relaxed);
        self.errors_injected.store(0, Ordering::Relaxed);
        self.drops_injected.store(0, Ordering::Relaxed);
        self.truncations.store(0, Ordering::Relaxed);
        self.reorders.store(0, Ordering::Relaxed);
    }
}

/// Serializable view of [`ChaosStats`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosStatsSnapshot {
    /// Requests seen
    pub total_requests: u64,
    /// Requests with a non-empty match set
    pub affected_requests: u64,
    /// Cumulative injected latency in milliseconds
    pub latency_injected_ms: u64,
    /// Fabricated error responses
    pub errors_injected: u64,
    /// Dropped/aborted connections
    pub drops_injected: u64,
    /// Truncated bodies
    pub truncations: u64,
    /// Responses released out of order
    pub reorders: u64,
    /// Times each rule was applied, keyed by rule id
    pub rule_applied: HashMap<String, u64>,
}
