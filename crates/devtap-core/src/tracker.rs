//! Page session tracking
//!
//! The tracker groups proxied HTTP traffic and instrumentation events into
//! per-browser-tab [`PageSession`]s. The per-tab cookie minted by the
//! instrumentation script is authoritative; normalized-URL matching is the
//! fallback for first requests that arrive before the cookie exists. Events
//! that resolve to no session are dropped silently.

use crate::entry::{InteractionEvent, MutationEvent, PerformanceMetrics};
use crate::session::{NavigationRecord, PageSession, PageSessionSummary, ResourceRecord, SessionError};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// File extensions that mark a GET request as a sub-resource
const RESOURCE_EXTENSIONS: &[&str] = &[
    "js", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "ttf", "eot", "json",
    "xml", "txt", "webp", "mp4", "webm", "mp3", "wav",
];

/// Path fragments that mark a request as an API call, never a document
const API_PATH_MARKERS: &[&str] =
    &["/api/", "/v1/", "/v2/", "/v3/", "/graphql", "/rest/", "/_api/", "/ajax/"];

/// Tracker sizing and timing knobs
#[derive(Debug, Clone)]
pub struct PageTrackerConfig {
    /// Sessions retained before LRU eviction kicks in
    pub max_sessions: usize,
    /// Inactivity window after which a session reports inactive
    pub session_timeout: chrono::Duration,
}

impl Default for PageTrackerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 50,
            session_timeout: chrono::Duration::minutes(5),
        }
    }
}

/// The slice of a proxied exchange the tracker needs
///
/// Built by the proxy from the request/response pair; classification reads
/// the content type and a handful of request headers.
#[derive(Debug, Clone)]
pub struct HttpRequestInfo {
    /// Request method
    pub method: String,
    /// Full request URL
    pub url: String,
    /// Response status
    pub status: u16,
    /// Response content type
    pub content_type: Option<String>,
    /// Request `Accept` header
    pub accept: Option<String>,
    /// Request `X-Requested-With` header
    pub requested_with: Option<String>,
    /// Request `Referer` header
    pub referer: Option<String>,
    /// Per-tab session cookie value
    pub browser_session: Option<String>,
}

impl HttpRequestInfo {
    /// Classify the exchange as a top-level document or a sub-resource.
    ///
    /// HTML content types and `.html` URLs are documents; JSON content
    /// types, API-shaped paths, XHR markers, and JSON-preferring `Accept`
    /// headers are not. What remains is a document only when it is a GET
    /// without a resource file extension.
    pub fn is_document(&self) -> bool {
        let content_type = self.content_type.as_deref().unwrap_or("");
        if content_type.contains("text/html") {
            return true;
        }

        let path = url_path(&self.url);
        if path.ends_with(".html") {
            return true;
        }

        if content_type.contains("application/json") || content_type.contains("text/json") {
            return false;
        }
        if API_PATH_MARKERS.iter().any(|marker| path.contains(marker)) {
            return false;
        }
        if self
            .requested_with
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
        {
            return false;
        }
        if let Some(accept) = self.accept.as_deref() {
            if accept.contains("application/json") && !accept.contains("text/html") {
                return false;
            }
        }

        if !self.method.eq_ignore_ascii_case("GET") {
            return false;
        }
        match path.rsplit_once('.') {
            Some((_, ext)) => !RESOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
            None => true,
        }
    }
}

/// Groups traffic and browser events into per-tab sessions
///
/// Shared maps are guarded by `RwLock`; each session has its own mutex so
/// concurrent appends to the same session serialize without a global lock.
pub struct PageTracker {
    config: PageTrackerConfig,
    sessions: RwLock<HashMap<String, Arc<Mutex<PageSession>>>>,
    by_browser_session: RwLock<HashMap<String, String>>,
    by_url: RwLock<HashMap<String, String>>,
    next_id: AtomicU64,
}

impl Default for PageTracker {
    fn default() -> Self {
        Self::new(PageTrackerConfig::default())
    }
}

impl PageTracker {
    /// Create a tracker with the given sizing
    pub fn new(config: PageTrackerConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            by_browser_session: RwLock::new(HashMap::new()),
            by_url: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of sessions currently tracked
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Snapshot one session by id
    pub fn get_session(&self, id: &str) -> Option<PageSession> {
        let handle = self.sessions.read().get(id).cloned()?;
        let session = handle.lock().clone();
        Some(session)
    }

    /// Summaries of every tracked session, oldest first
    pub fn all_summaries(&self) -> Vec<PageSessionSummary> {
        let now = Utc::now();
        let mut summaries: Vec<PageSessionSummary> = self
            .sessions
            .read()
            .values()
            .map(|handle| handle.lock().summary(now, self.config.session_timeout))
            .collect();
        summaries.sort_by_key(|summary| summary.start_time);
        summaries
    }

    /// Summaries of sessions with activity inside the timeout window
    pub fn get_active_sessions(&self) -> Vec<PageSessionSummary> {
        self.all_summaries().into_iter().filter(|s| s.active).collect()
    }

    /// Route a proxied HTTP exchange into the session table
    pub fn track_http_request(&self, info: &HttpRequestInfo) {
        if info.is_document() {
            self.track_document(info);
        } else {
            self.track_resource(info);
        }
    }

    /// Attach a frontend error to its session
    pub fn track_error(&self, browser_session: Option<&str>, url: &str, error: SessionError) {
        if let Some(handle) = self.resolve(browser_session, url) {
            let mut session = handle.lock();
            session.push_error(error);
            session.last_activity = Utc::now();
        }
    }

    /// Record the latest performance metrics on a session
    pub fn track_performance(
        &self,
        browser_session: Option<&str>,
        url: &str,
        metrics: PerformanceMetrics,
    ) {
        if let Some(handle) = self.resolve(browser_session, url) {
            let mut session = handle.lock();
            session.performance = Some(metrics);
            session.last_activity = Utc::now();
        }
    }

    /// Append an interaction to its session (bounded FIFO)
    pub fn track_interaction(
        &self,
        browser_session: Option<&str>,
        url: &str,
        event: InteractionEvent,
    ) {
        if let Some(handle) = self.resolve(browser_session, url) {
            let mut session = handle.lock();
            session.push_interaction(event);
            session.last_activity = Utc::now();
        }
    }

    /// Append a DOM mutation to its session (bounded FIFO)
    pub fn track_mutation(&self, browser_session: Option<&str>, url: &str, event: MutationEvent) {
        if let Some(handle) = self.resolve(browser_session, url) {
            let mut session = handle.lock();
            session.push_mutation(event);
            session.last_activity = Utc::now();
        }
    }

    /// Update the document title on a session, when one resolves
    pub fn update_title(&self, browser_session: Option<&str>, url: &str, title: &str) {
        if let Some(handle) = self.resolve(browser_session, url) {
            let mut session = handle.lock();
            session.page_title = Some(title.to_string());
            session.last_activity = Utc::now();
        }
    }

    /// Resolve a session: cookie first, normalized URL second, else none
    fn resolve(&self, browser_session: Option<&str>, url: &str) -> Option<Arc<Mutex<PageSession>>> {
        if let Some(cookie) = browser_session {
            // Index guards drop before the sessions lock; eviction takes the
            // locks in the opposite order.
            let id = self.by_browser_session.read().get(cookie).cloned();
            if let Some(id) = id {
                return self.sessions.read().get(&id).cloned();
            }
        }
        let id = self.by_url.read().get(&normalize_url(url)).cloned();
        if let Some(id) = id {
            return self.sessions.read().get(&id).cloned();
        }
        None
    }

    fn track_document(&self, info: &HttpRequestInfo) {
        let navigation = NavigationRecord {
            url: info.url.clone(),
            status: info.status,
            timestamp: Utc::now(),
        };
        let document = ResourceRecord {
            url: info.url.clone(),
            method: info.method.clone(),
            status: info.status,
            content_type: info.content_type.clone(),
            timestamp: Utc::now(),
        };

        // A known browser session navigates in place; anything else is a
        // fresh tab.
        let existing = info
            .browser_session
            .as_deref()
            .and_then(|cookie| self.by_browser_session.read().get(cookie).cloned())
            .and_then(|id| self.sessions.read().get(&id).cloned());

        if let Some(handle) = existing {
            let old_url;
            let id;
            {
                let mut session = handle.lock();
                old_url = normalize_url(&session.url);
                id = session.id.clone();
                session.navigate(navigation, document);
            }
            let mut by_url = self.by_url.write();
            if by_url.get(&old_url).is_some_and(|mapped| *mapped == id) {
                by_url.remove(&old_url);
            }
            by_url.insert(normalize_url(&info.url), id);
            return;
        }

        let id = format!("page-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        debug!(session = %id, url = %info.url, "New page session");

        let mut session =
            PageSession::new(id.clone(), info.url.clone(), info.browser_session.clone());
        session.navigations.push(navigation);
        session.document_request = Some(document);

        self.sessions
            .write()
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        if let Some(cookie) = &info.browser_session {
            self.by_browser_session.write().insert(cookie.clone(), id.clone());
        }
        self.by_url.write().insert(normalize_url(&info.url), id);

        self.evict_over_capacity();
    }

    fn track_resource(&self, info: &HttpRequestInfo) {
        let target = self
            .resolve_by_referer(info.referer.as_deref())
            .or_else(|| self.most_recent_active_with_origin(&info.url));

        let Some(handle) = target else {
            debug!(url = %info.url, "Resource matched no session; dropped");
            return;
        };

        handle.lock().attach_resource(ResourceRecord {
            url: info.url.clone(),
            method: info.method.clone(),
            status: info.status,
            content_type: info.content_type.clone(),
            timestamp: Utc::now(),
        });
    }

    fn resolve_by_referer(&self, referer: Option<&str>) -> Option<Arc<Mutex<PageSession>>> {
        let referer = referer?;
        let id = self.by_url.read().get(&normalize_url(referer)).cloned()?;
        self.sessions.read().get(&id).cloned()
    }

    /// Fallback attribution: the most recently active session whose current
    /// document shares the resource's scheme+host. Two cookie-less tabs on
    /// one origin can misattribute here; the most-recent rule is deliberate.
    fn most_recent_active_with_origin(&self, url: &str) -> Option<Arc<Mutex<PageSession>>> {
        let origin = url_origin(url)?;
        let now = Utc::now();

        let sessions = self.sessions.read();
        let mut best: Option<(chrono::DateTime<Utc>, Arc<Mutex<PageSession>>)> = None;
        for handle in sessions.values() {
            let session = handle.lock();
            if !session.is_active(now, self.config.session_timeout) {
                continue;
            }
            if url_origin(&session.url).as_deref() != Some(origin.as_str()) {
                continue;
            }
            if best.as_ref().is_none_or(|(ts, _)| session.last_activity > *ts) {
                best = Some((session.last_activity, Arc::clone(handle)));
            }
        }
        best.map(|(_, handle)| handle)
    }

    /// LRU-by-creation eviction down to the configured maximum
    fn evict_over_capacity(&self) {
        let mut sessions = self.sessions.write();
        while sessions.len() > self.config.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, handle)| handle.lock().start_time)
                .map(|(id, _)| id.clone());
            let Some(id) = oldest else { break };
            sessions.remove(&id);
            self.by_browser_session.write().retain(|_, mapped| *mapped != id);
            self.by_url.write().retain(|_, mapped| *mapped != id);
            debug!(session = %id, "Evicted oldest page session");
        }
    }
}

/// Normalize a URL for index lookups: drop the fragment, drop the trailing
/// slash. Unparseable input is used as-is, trimmed.
pub fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => raw.trim().trim_end_matches('/').to_string(),
    }
}

fn url_path(raw: &str) -> String {
    url::Url::parse(raw)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| raw.split(['?', '#']).next().unwrap_or(raw).to_string())
}

fn url_origin(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}://{}:{}", parsed.scheme(), host, port)),
        None => Some(format!("{}://{}", parsed.scheme(), host)),
    }
}
