//! Per-browser-tab session state
//!
//! A [`PageSession`] aggregates one tab's history: document navigations, the
//! resources each document pulled in, frontend errors, the latest performance
//! metrics, and bounded interaction/mutation streams. Sessions are created
//! and mutated by the [`crate::tracker::PageTracker`].

use crate::entry::{InteractionEvent, MutationEvent, PerformanceMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cap on retained interactions per session (FIFO beyond this)
pub const MAX_INTERACTIONS: usize = 200;
/// Cap on retained mutations per session (FIFO beyond this)
pub const MAX_MUTATIONS: usize = 100;
/// Cap on retained errors per session (FIFO beyond this)
pub const MAX_ERRORS: usize = 100;

/// One document navigation within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationRecord {
    /// Document URL
    pub url: String,
    /// Response status of the document request
    pub status: u16,
    /// When the navigation completed
    pub timestamp: DateTime<Utc>,
}

/// One sub-resource request attached to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource URL
    pub url: String,
    /// Request method
    pub method: String,
    /// Response status
    pub status: u16,
    /// Response content type, when present
    pub content_type: Option<String>,
    /// When the request completed
    pub timestamp: DateTime<Utc>,
}

/// A frontend error retained on the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionError {
    /// Error message
    pub message: String,
    /// Script source URL, when known
    pub source: Option<String>,
    /// Source line
    pub line: Option<u32>,
    /// When the error fired
    pub timestamp: DateTime<Utc>,
}

/// State for one browser tab
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSession {
    /// Monotonic `page-N` identifier
    pub id: String,
    /// Current document URL
    pub url: String,
    /// Opaque per-tab cookie minted by the instrumentation, when seen
    pub browser_session: Option<String>,
    /// Last reported document title
    pub page_title: Option<String>,
    /// When the session was created
    pub start_time: DateTime<Utc>,
    /// When the session last saw any event
    pub last_activity: DateTime<Utc>,
    /// Ordered document navigations
    pub navigations: Vec<NavigationRecord>,
    /// Most recent document request
    pub document_request: Option<ResourceRecord>,
    /// Resources loaded by the current document (reset on navigation)
    pub resources: Vec<ResourceRecord>,
    /// Recent frontend errors (bounded)
    pub errors: Vec<SessionError>,
    /// Latest performance metrics
    pub performance: Option<PerformanceMetrics>,
    /// Recent interactions (bounded FIFO)
    pub interactions: Vec<InteractionEvent>,
    /// Recent DOM mutations (bounded FIFO)
    pub mutations: Vec<MutationEvent>,
    /// Interactions ever seen, including those shifted out
    pub interaction_count: u64,
    /// Mutations ever seen, including those shifted out
    pub mutation_count: u64,
    /// Errors ever seen, including those shifted out
    pub error_count: u64,
    /// Resources ever attached, across navigations
    pub resource_count: u64,
}

impl PageSession {
    /// Create a fresh session for a first document request
    pub fn new(id: String, url: String, browser_session: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            url,
            browser_session,
            page_title: None,
            start_time: now,
            last_activity: now,
            navigations: Vec::new(),
            document_request: None,
            resources: Vec::new(),
            errors: Vec::new(),
            performance: None,
            interactions: Vec::new(),
            mutations: Vec::new(),
            interaction_count: 0,
            mutation_count: 0,
            error_count: 0,
            resource_count: 0,
        }
    }

    /// Whether the session saw activity within `timeout`
    pub fn is_active(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now - self.last_activity < timeout
    }

    /// Append an interaction, shifting out the oldest at the cap
    ///
    /// `interaction_count` advances unconditionally and can exceed the
    /// retained slice length.
    pub fn push_interaction(&mut self, event: InteractionEvent) {
        if self.interactions.len() >= MAX_INTERACTIONS {
            self.interactions.remove(0);
        }
        self.interactions.push(event);
        self.interaction_count += 1;
    }

    /// Append a mutation, shifting out the oldest at the cap
    pub fn push_mutation(&mut self, event: MutationEvent) {
        if self.mutations.len() >= MAX_MUTATIONS {
            self.mutations.remove(0);
        }
        self.mutations.push(event);
        self.mutation_count += 1;
    }

    /// Append an error, shifting out the oldest at the cap
    pub fn push_error(&mut self, error: SessionError) {
        if self.errors.len() >= MAX_ERRORS {
            self.errors.remove(0);
        }
        self.errors.push(error);
        self.error_count += 1;
    }

    /// Record a document navigation: the URL moves, the navigation list
    /// grows by one, and the resource list resets for the new document.
    pub fn navigate(&mut self, navigation: NavigationRecord, document: ResourceRecord) {
        self.url = navigation.url.clone();
        self.navigations.push(navigation);
        self.document_request = Some(document);
        self.resources.clear();
        self.last_activity = Utc::now();
    }

    /// Attach a sub-resource to the current document
    pub fn attach_resource(&mut self, resource: ResourceRecord) {
        self.resources.push(resource);
        self.resource_count += 1;
        self.last_activity = Utc::now();
    }

    /// Lightweight projection for list views
    pub fn summary(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> PageSessionSummary {
        PageSessionSummary {
            id: self.id.clone(),
            url: self.url.clone(),
            browser_session: self.browser_session.clone(),
            page_title: self.page_title.clone(),
            start_time: self.start_time,
            last_activity: self.last_activity,
            active: self.is_active(now, timeout),
            navigation_count: self.navigations.len(),
            resource_count: self.resources.len(),
            error_count: self.error_count,
            interaction_count: self.interaction_count,
            mutation_count: self.mutation_count,
        }
    }
}

/// Projection of a session without its heavy arrays
///
/// Use this for list endpoints so response size stays bounded no matter how
/// busy the tab was.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSessionSummary {
    /// Session identifier
    pub id: String,
    /// Current document URL
    pub url: String,
    /// Per-tab cookie, when seen
    pub browser_session: Option<String>,
    /// Last reported document title
    pub page_title: Option<String>,
    /// When the session was created
    pub start_time: DateTime<Utc>,
    /// When the session last saw any event
    pub last_activity: DateTime<Utc>,
    /// Recomputed activity flag
    pub active: bool,
    /// Number of document navigations
    pub navigation_count: usize,
    /// Resources on the current document
    pub resource_count: usize,
    /// Errors ever seen
    pub error_count: u64,
    /// Interactions ever seen
    pub interaction_count: u64,
    /// Mutations ever seen
    pub mutation_count: u64,
}
