//! Overlay sidecar notifier
//!
//! Relays events to a local overlay UI process over plain JSON POSTs, one
//! endpoint per event family. Strictly fire-and-forget: sends happen on a
//! spawned task and every transport error is logged and swallowed, never
//! surfaced to the request path.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Fire-and-forget client for the overlay sidecar
#[derive(Debug, Clone)]
pub struct OverlayNotifier {
    base_url: String,
    client: reqwest::Client,
}

impl OverlayNotifier {
    /// Notifier posting to `base_url` (e.g. `http://127.0.0.1:9321`)
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Relay a log-entry event to `/event`
    pub fn notify_event(&self, payload: Value) {
        self.post("/event", payload);
    }

    /// Relay a typed notification to `/type`
    pub fn notify_type(&self, payload: Value) {
        self.post("/type", payload);
    }

    /// Relay a key/value update to `/key`
    pub fn notify_key(&self, payload: Value) {
        self.post("/key", payload);
    }

    fn post(&self, path: &str, payload: Value) {
        let url = format!("{}{}", self.base_url, path);
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(err) = client.post(&url).json(&payload).send().await {
                debug!(%url, error = %err, "Overlay notify failed; dropping event");
            }
        });
    }
}
