//! Proxy server assembly

use crate::overlay::OverlayNotifier;
use devtap_chaos::{ChaosConfig, ChaosEngine, PresetCatalog};
use devtap_core::{PageTracker, PageTrackerConfig, Result, TrafficLogger};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Everything needed to stand up a proxy server
#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// Upstream origin requests are relayed to (scheme://host[:port])
    pub upstream: String,
    /// Overlay sidecar base URL, when a sidecar is running
    pub overlay_url: Option<String>,
    /// Traffic log ring capacity
    pub max_log_entries: usize,
    /// Page sessions retained before LRU eviction
    pub max_sessions: usize,
    /// Inactivity window before a session reports inactive
    pub session_timeout: Duration,
    /// Splice the instrumentation script into HTML documents
    pub inject_script: bool,
}

impl Default for ProxyServerConfig {
    fn default() -> Self {
        Self {
            upstream: "http://127.0.0.1:8080".to_string(),
            overlay_url: None,
            max_log_entries: devtap_core::logger::DEFAULT_MAX_ENTRIES,
            max_sessions: 50,
            session_timeout: Duration::from_secs(300),
            inject_script: true,
        }
    }
}

/// Shared state behind every handler
pub struct ProxyState {
    /// Chaos rule engine
    pub engine: Arc<ChaosEngine>,
    /// Traffic log ring
    pub logger: Arc<TrafficLogger>,
    /// Page session tracker
    pub tracker: Arc<PageTracker>,
    /// Overlay sidecar notifier, when configured
    pub overlay: Option<OverlayNotifier>,
    /// Preset catalog for the admin API
    pub presets: PresetCatalog,
    /// Upstream base origin, no trailing slash
    pub upstream: String,
    /// Upstream HTTP client
    pub client: reqwest::Client,
    /// Whether HTML documents get the instrumentation script
    pub inject_script: bool,
}

/// The devtap proxy server
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Build a server with a fresh engine from the given chaos config
    pub fn new(config: ProxyServerConfig, chaos: ChaosConfig) -> Result<Self> {
        let engine = ChaosEngine::new(chaos)
            .map_err(|err| devtap_core::Error::config(err.to_string()))?;
        Ok(Self::with_engine(config, Arc::new(engine)))
    }

    /// Build a server around an existing engine
    pub fn with_engine(config: ProxyServerConfig, engine: Arc<ChaosEngine>) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();

        let overlay = config.overlay_url.as_deref().map(OverlayNotifier::new);
        if let Some(url) = &config.overlay_url {
            info!(overlay = %url, "Overlay notifier enabled");
        }

        let tracker = PageTracker::new(PageTrackerConfig {
            max_sessions: config.max_sessions,
            session_timeout: chrono::Duration::from_std(config.session_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        });

        let state = Arc::new(ProxyState {
            engine,
            logger: Arc::new(TrafficLogger::new(config.max_log_entries)),
            tracker: Arc::new(tracker),
            overlay,
            presets: PresetCatalog::new(),
            upstream: config.upstream.trim_end_matches('/').to_string(),
            client,
            inject_script: config.inject_script,
        });

        Self { state }
    }

    /// The shared state, for embedding and tests
    pub fn state(&self) -> Arc<ProxyState> {
        Arc::clone(&self.state)
    }

    /// Assemble the axum router: admin + ingest under `/__devtap`, the
    /// relay as the fallback for everything else.
    pub fn router(&self) -> Router {
        Router::new()
            .nest("/__devtap", crate::admin::router())
            .fallback(crate::forward::proxy_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_builds_with_defaults() {
        let server =
            ProxyServer::new(ProxyServerConfig::default(), ChaosConfig::default()).expect("server");
        let state = server.state();
        assert!(state.engine.is_enabled());
        assert_eq!(state.upstream, "http://127.0.0.1:8080");
        assert!(state.overlay.is_none());
        let _router = server.router();
    }

    #[test]
    fn test_upstream_trailing_slash_stripped() {
        let config = ProxyServerConfig {
            upstream: "http://127.0.0.1:9000/".to_string(),
            ..Default::default()
        };
        let server = ProxyServer::new(config, ChaosConfig::default()).expect("server");
        assert_eq!(server.state().upstream, "http://127.0.0.1:9000");
    }
}
