//! Bounded in-memory traffic logger
//!
//! The logger is a fixed-capacity ring of [`LogEntry`] slots. Writers reserve
//! a slot wait-free with an atomic head increment, then store the entry under
//! a write lock held only for the slot assignment; readers take the read lock
//! and scan. Overwriting a slot releases the prior entry. Nothing here ever
//! blocks on I/O, so the locks are `parking_lot` rather than tokio's.

use crate::entry::{EntryKind, LogEntry};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default ring capacity
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Criteria for querying the traffic log
///
/// A filter matches an entry when ALL non-empty criteria hold. Kind is tested
/// first, then the timestamp range, then variant-specific fields: `methods`
/// and `status_codes` only ever match HTTP exchanges, `interaction_types`
/// only interactions, `mutation_types` only mutations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    /// Entry kinds to include (empty = any)
    #[serde(default)]
    pub kinds: Vec<EntryKind>,
    /// HTTP methods to include (empty = any)
    #[serde(default)]
    pub methods: Vec<String>,
    /// Substring the entry URL must contain
    #[serde(default)]
    pub url_contains: Option<String>,
    /// HTTP status codes to include (empty = any)
    #[serde(default)]
    pub status_codes: Vec<u16>,
    /// Only entries at or after this instant
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Only entries at or before this instant
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Maximum entries to return (0 = unlimited)
    #[serde(default)]
    pub limit: usize,
    /// Interaction types to include (empty = any)
    #[serde(default)]
    pub interaction_types: Vec<String>,
    /// Mutation types to include (empty = any)
    #[serde(default)]
    pub mutation_types: Vec<String>,
}

impl LogFilter {
    /// Test whether an entry satisfies every non-empty criterion
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&entry.kind()) {
            return false;
        }

        let ts = entry.timestamp();
        if let Some(since) = self.since {
            if ts < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if ts > until {
                return false;
            }
        }

        if let Some(pattern) = &self.url_contains {
            match entry.url() {
                Some(url) if url.contains(pattern.as_str()) => {}
                _ => return false,
            }
        }

        if !self.methods.is_empty() {
            match entry {
                LogEntry::Http(e) if self.methods.iter().any(|m| m.eq_ignore_ascii_case(&e.method)) => {}
                _ => return false,
            }
        }

        if !self.status_codes.is_empty() {
            match entry {
                LogEntry::Http(e) if self.status_codes.contains(&e.status) => {}
                _ => return false,
            }
        }

        if !self.interaction_types.is_empty() {
            match entry {
                LogEntry::Interaction(e) if self.interaction_types.contains(&e.interaction_type) => {}
                _ => return false,
            }
        }

        if !self.mutation_types.is_empty() {
            match entry {
                LogEntry::Mutation(e) if self.mutation_types.contains(&e.mutation_type) => {}
                _ => return false,
            }
        }

        true
    }

    /// True when the filter constrains ordering-sensitive output
    fn wants_chronological(&self) -> bool {
        self.limit > 0 || self.since.is_some() || self.until.is_some()
    }
}

/// Occupancy statistics for the ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerStats {
    /// Entries ever logged (monotonic until `clear`)
    pub total_entries: usize,
    /// Entries currently held in the ring
    pub available_entries: usize,
    /// Ring capacity
    pub max_size: usize,
    /// Entries overwritten by wrap-around
    pub dropped: usize,
}

/// Fixed-capacity ring of traffic log entries
///
/// Safe for many concurrent writers and readers: slot reservation is a single
/// atomic increment, the write lock is held only for one slot store, and
/// queries share the read lock.
pub struct TrafficLogger {
    slots: RwLock<Vec<Option<LogEntry>>>,
    head: AtomicUsize,
    max_size: usize,
}

impl Default for TrafficLogger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl TrafficLogger {
    /// Create a logger holding at most `max_size` entries
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            slots: RwLock::new(vec![None; max_size]),
            head: AtomicUsize::new(0),
            max_size,
        }
    }

    /// Ring capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Append an entry, overwriting the oldest slot once the ring is full
    pub fn log(&self, entry: LogEntry) {
        let seq = self.head.fetch_add(1, Ordering::AcqRel);
        let mut slots = self.slots.write();
        slots[seq % self.max_size] = Some(entry);
    }

    /// Return entries matching the filter
    ///
    /// The scan walks slots oldest-first in reservation order. After the ring
    /// has wrapped, concurrent writers can leave that order slightly out of
    /// timestamp order, so whenever `limit` or a time bound is set the result
    /// is re-sorted chronologically; with a `limit`, the most recent matches
    /// are kept.
    pub fn query(&self, filter: &LogFilter) -> Vec<LogEntry> {
        let head = self.head.load(Ordering::Acquire);
        let slots = self.slots.read();

        let available = head.min(self.max_size);
        let oldest = head - available;

        let mut out = Vec::new();
        for seq in oldest..head {
            if let Some(entry) = &slots[seq % self.max_size] {
                if filter.matches(entry) {
                    out.push(entry.clone());
                }
            }
        }
        drop(slots);

        if filter.wants_chronological() {
            out.sort_by_key(LogEntry::timestamp);
            if filter.limit > 0 && out.len() > filter.limit {
                out.drain(..out.len() - filter.limit);
            }
        }

        out
    }

    /// Current occupancy statistics
    pub fn stats(&self) -> LoggerStats {
        let total = self.head.load(Ordering::Acquire);
        LoggerStats {
            total_entries: total,
            available_entries: total.min(self.max_size),
            max_size: self.max_size,
            dropped: total.saturating_sub(self.max_size),
        }
    }

    /// Drop every entry and reset the counters
    pub fn clear(&self) {
        let mut slots = self.slots.write();
        slots.iter_mut().for_each(|slot| *slot = None);
        self.head.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{CustomLog, HttpExchange, InteractionEvent};
    use chrono::Duration;

    fn http(method: &str, url: &str, status: u16) -> LogEntry {
        LogEntry::Http(HttpExchange::new(method, url, status))
    }

    #[test]
    fn test_ring_never_exceeds_capacity() {
        let logger = TrafficLogger::new(10);
        for i in 0..25 {
            logger.log(http("GET", &format!("http://localhost/{i}"), 200));
        }

        let entries = logger.query(&LogFilter::default());
        assert_eq!(entries.len(), 10);

        let stats = logger.stats();
        assert_eq!(stats.total_entries, 25);
        assert_eq!(stats.available_entries, 10);
        assert_eq!(stats.max_size, 10);
        assert_eq!(stats.dropped, 15);
    }

    #[test]
    fn test_wrap_keeps_newest() {
        let logger = TrafficLogger::new(3);
        for i in 0..5 {
            logger.log(http("GET", &format!("http://localhost/{i}"), 200));
        }

        let urls: Vec<String> = logger
            .query(&LogFilter::default())
            .into_iter()
            .filter_map(|e| e.url().map(String::from))
            .collect();
        assert_eq!(
            urls,
            vec!["http://localhost/2", "http://localhost/3", "http://localhost/4"]
        );
    }

    #[test]
    fn test_filter_by_kind_and_method() {
        let logger = TrafficLogger::new(10);
        logger.log(http("GET", "http://localhost/a", 200));
        logger.log(http("POST", "http://localhost/b", 201));
        logger.log(LogEntry::Custom(CustomLog {
            timestamp: Utc::now(),
            level: "info".to_string(),
            message: "hello".to_string(),
            data: serde_json::Value::Null,
        }));

        let filter = LogFilter {
            kinds: vec![EntryKind::Http],
            methods: vec!["post".to_string()],
            ..Default::default()
        };
        let entries = logger.query(&filter);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url(), Some("http://localhost/b"));
    }

    #[test]
    fn test_method_filter_excludes_non_http() {
        let logger = TrafficLogger::new(10);
        logger.log(LogEntry::Custom(CustomLog {
            timestamp: Utc::now(),
            level: "info".to_string(),
            message: "hello".to_string(),
            data: serde_json::Value::Null,
        }));

        let filter = LogFilter {
            methods: vec!["GET".to_string()],
            ..Default::default()
        };
        assert!(logger.query(&filter).is_empty());
    }

    #[test]
    fn test_filter_by_status_and_url() {
        let logger = TrafficLogger::new(10);
        logger.log(http("GET", "http://localhost/api/users", 500));
        logger.log(http("GET", "http://localhost/api/users", 200));
        logger.log(http("GET", "http://localhost/static/app.js", 500));

        let filter = LogFilter {
            status_codes: vec![500],
            url_contains: Some("/api/".to_string()),
            ..Default::default()
        };
        let entries = logger.query(&filter);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_time_range_and_limit_sort_chronologically() {
        let logger = TrafficLogger::new(10);
        let base = Utc::now();

        // Insert out of timestamp order.
        for offset in [3i64, 1, 4, 2] {
            let mut exchange = HttpExchange::new("GET", format!("http://localhost/{offset}"), 200);
            exchange.timestamp = base + Duration::seconds(offset);
            logger.log(LogEntry::Http(exchange));
        }

        let filter = LogFilter {
            since: Some(base),
            limit: 3,
            ..Default::default()
        };
        let entries = logger.query(&filter);
        assert_eq!(entries.len(), 3);
        let urls: Vec<&str> = entries.iter().filter_map(LogEntry::url).collect();
        assert_eq!(
            urls,
            vec!["http://localhost/2", "http://localhost/3", "http://localhost/4"]
        );
    }

    #[test]
    fn test_interaction_type_filter() {
        let logger = TrafficLogger::new(10);
        for ty in ["click", "scroll", "click"] {
            logger.log(LogEntry::Interaction(InteractionEvent {
                timestamp: Utc::now(),
                interaction_type: ty.to_string(),
                selector: None,
                url: "http://localhost/".to_string(),
                browser_session: None,
                detail: serde_json::Value::Null,
            }));
        }

        let filter = LogFilter {
            interaction_types: vec!["click".to_string()],
            ..Default::default()
        };
        assert_eq!(logger.query(&filter).len(), 2);
    }

    #[test]
    fn test_clear_resets_everything() {
        let logger = TrafficLogger::new(5);
        for _ in 0..8 {
            logger.log(http("GET", "http://localhost/x", 200));
        }
        logger.clear();

        assert!(logger.query(&LogFilter::default()).is_empty());
        let stats = logger.stats();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.available_entries, 0);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_concurrent_writers_stay_bounded() {
        use std::sync::Arc;

        let logger = Arc::new(TrafficLogger::new(64));
        let mut handles = Vec::new();
        for t in 0..8 {
            let logger = Arc::clone(&logger);
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    logger.log(http("GET", &format!("http://localhost/{t}/{i}"), 200));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("writer thread");
        }

        let stats = logger.stats();
        assert_eq!(stats.total_entries, 4000);
        assert_eq!(stats.available_entries, 64);
        assert!(logger.query(&LogFilter::default()).len() <= 64);
    }
}
