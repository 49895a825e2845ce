//! # devtap Proxy Server
//!
//! The HTTP surface of devtap: an axum server that relays every request to a
//! configured upstream origin while the chaos engine shapes the response
//! path, the traffic logger records the exchange, and the page tracker
//! groups browser activity into per-tab sessions.
//!
//! Besides the catch-all relay, the server mounts `/__devtap/` for the
//! instrumentation event ingest and the admin API (chaos config, log
//! queries, session views), and optionally relays events to a local overlay
//! sidecar.

pub mod admin;
pub mod forward;
pub mod ingest;
pub mod inject;
pub mod overlay;
pub mod server;

pub use overlay::OverlayNotifier;
pub use server::{ProxyServer, ProxyServerConfig, ProxyState};

/// Cookie minted per browser tab by the instrumentation script
pub const SESSION_COOKIE: &str = "__devtool_sid";

/// Extract the tab session cookie from a Cookie header value
pub(crate) fn session_cookie(headers: &http::HeaderMap) -> Option<String> {
    let cookies = headers.get(http::header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}
