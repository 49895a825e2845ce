//! Shared-state behavior under many writers
//!
//! The ring logger and the page tracker both take concurrent traffic from
//! every request task; these tests hammer them from real threads and check
//! the bounds and counters hold.

use devtap_core::{
    HttpExchange, HttpRequestInfo, InteractionEvent, LogEntry, LogFilter, PageTracker,
    PageTrackerConfig, TrafficLogger,
};
use std::sync::Arc;

fn document(url: &str, sid: &str) -> HttpRequestInfo {
    HttpRequestInfo {
        method: "GET".to_string(),
        url: url.to_string(),
        status: 200,
        content_type: Some("text/html".to_string()),
        accept: None,
        requested_with: None,
        referer: None,
        browser_session: Some(sid.to_string()),
    }
}

#[test]
fn ring_survives_writer_and_reader_contention() {
    let logger = Arc::new(TrafficLogger::new(128));

    let mut handles = Vec::new();
    for t in 0..4 {
        let logger = Arc::clone(&logger);
        handles.push(std::thread::spawn(move || {
            for i in 0..1000 {
                logger.log(LogEntry::Http(HttpExchange::new(
                    "GET",
                    format!("http://localhost/{t}/{i}"),
                    200,
                )));
            }
        }));
    }
    for _ in 0..2 {
        let logger = Arc::clone(&logger);
        handles.push(std::thread::spawn(move || {
            for _ in 0..200 {
                // Every entry a reader sees must be fully formed.
                for entry in logger.query(&LogFilter::default()) {
                    assert!(entry.url().is_some());
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("thread");
    }

    let stats = logger.stats();
    assert_eq!(stats.total_entries, 4000);
    assert_eq!(stats.available_entries, 128);
    assert_eq!(stats.dropped, 4000 - 128);
}

#[test]
fn same_session_appends_serialize() {
    let tracker = Arc::new(PageTracker::default());
    tracker.track_http_request(&document("http://localhost/home", "sid-a"));

    let mut handles = Vec::new();
    for t in 0..8 {
        let tracker = Arc::clone(&tracker);
        handles.push(std::thread::spawn(move || {
            for i in 0..100 {
                tracker.track_interaction(
                    Some("sid-a"),
                    "http://localhost/home",
                    InteractionEvent {
                        timestamp: chrono::Utc::now(),
                        interaction_type: format!("click-{t}-{i}"),
                        selector: None,
                        url: "http://localhost/home".to_string(),
                        browser_session: Some("sid-a".to_string()),
                        detail: serde_json::Value::Null,
                    },
                );
            }
        }));
    }
    for handle in handles {
        handle.join().expect("thread");
    }

    let session = tracker.get_session("page-1").expect("session");
    // 800 total appends, retained slice capped, lifetime counter exact.
    assert_eq!(session.interaction_count, 800);
    assert_eq!(session.interactions.len(), 200);
}

#[test]
fn session_table_stays_bounded_under_churn() {
    let tracker = Arc::new(PageTracker::new(PageTrackerConfig {
        max_sessions: 10,
        ..Default::default()
    }));

    let mut handles = Vec::new();
    for t in 0..4 {
        let tracker = Arc::clone(&tracker);
        handles.push(std::thread::spawn(move || {
            for i in 0..50 {
                tracker.track_http_request(&document(
                    &format!("http://localhost/{t}/{i}"),
                    &format!("sid-{t}-{i}"),
                ));
            }
        }));
    }
    for handle in handles {
        handle.join().expect("thread");
    }

    assert!(tracker.session_count() <= 10);
    // The survivors are queryable and well-formed.
    for summary in tracker.all_summaries() {
        assert!(summary.id.starts_with("page-"));
        assert_eq!(summary.navigation_count, 1);
    }
}
