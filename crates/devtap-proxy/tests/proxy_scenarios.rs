//! End-to-end proxy scenarios against a real upstream
//!
//! Each test stands up an upstream axum app and a devtap proxy on ephemeral
//! ports and drives them with reqwest.

use axum::http::header::CONTENT_TYPE;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use devtap_chaos::{ChaosConfig, ChaosKind, ChaosRule};
use devtap_core::{EntryKind, LogFilter};
use devtap_proxy::{ProxyServer, ProxyServerConfig, ProxyState};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const HOME_HTML: &str = "<html><head><title>home</title></head><body>home</body></html>";
const ABOUT_HTML: &str = "<html><head><title>about</title></head><body>about</body></html>";

async fn spawn_app(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

struct Upstream {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

async fn spawn_upstream() -> Upstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new()
        .route(
            "/x",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "upstream-ok"
                }
            }),
        )
        .route(
            "/data",
            get(|| async { ([(CONTENT_TYPE, "application/octet-stream")], "0123456789ABCDEF") }),
        )
        .route("/home", get(|| async { Html(HOME_HTML) }))
        .route("/about", get(|| async { Html(ABOUT_HTML) }))
        .route(
            "/api/x",
            get(|| async { ([(CONTENT_TYPE, "application/json")], r#"{"ok":true}"#) }),
        )
        .route(
            "/app.js",
            get(|| async { ([(CONTENT_TYPE, "text/javascript")], "console.log(1)") }),
        );
    let addr = spawn_app(app).await;
    Upstream { addr, hits }
}

async fn spawn_proxy(upstream: SocketAddr, chaos: ChaosConfig) -> (String, Arc<ProxyState>) {
    let config = ProxyServerConfig {
        upstream: format!("http://{upstream}"),
        ..Default::default()
    };
    let server = ProxyServer::new(config, chaos).expect("proxy server");
    let state = server.state();
    let addr = spawn_app(server.router()).await;
    (format!("http://{addr}"), state)
}

fn rule(id: &str, kind: ChaosKind) -> ChaosRule {
    ChaosRule::new(id, kind)
}

#[tokio::test]
async fn passthrough_relays_and_logs() {
    let upstream = spawn_upstream().await;
    let (base, state) = spawn_proxy(upstream.addr, ChaosConfig::default()).await;

    let response = reqwest::get(format!("{base}/x")).await.expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.expect("body"), "upstream-ok");
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 1);

    let entries = state.logger.query(&LogFilter {
        kinds: vec![EntryKind::Http],
        ..Default::default()
    });
    assert_eq!(entries.len(), 1);
    let url = entries[0].url().expect("url");
    assert!(url.ends_with("/x"), "unexpected log url {url}");
}

#[tokio::test]
async fn http_error_rule_skips_upstream() {
    let upstream = spawn_upstream().await;
    let mut error_rule = rule("err", ChaosKind::HttpError);
    error_rule.error_codes = vec![503];
    error_rule.error_message = "down".to_string();
    let (base, state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![error_rule])).await;

    let response = reqwest::get(format!("{base}/x")).await.expect("request");
    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.expect("body"), "down");

    // Upstream was never called.
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 0);
    let stats = state.engine.stats();
    assert_eq!(stats.errors_injected, 1);
    assert_eq!(stats.affected_requests, 1);
}

#[tokio::test]
async fn truncation_caps_the_body_at_half() {
    let upstream = spawn_upstream().await;
    let mut truncate = rule("trunc", ChaosKind::Truncate);
    truncate.truncate_percent = 0.5;
    let (base, state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![truncate])).await;

    let response = reqwest::get(format!("{base}/data")).await.expect("request");
    assert_eq!(response.status(), 200);
    let body = response.bytes().await.expect("body");
    assert_eq!(&body[..], b"01234567");

    assert_eq!(state.engine.stats().truncations, 1);
}

#[tokio::test]
async fn reorder_releases_a_full_batch() {
    let upstream = spawn_upstream().await;
    let mut reorder = rule("ooo", ChaosKind::OutOfOrder);
    reorder.reorder_min_requests = 3;
    reorder.reorder_max_wait_ms = 500;
    let (base, state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![reorder])).await;

    let client = reqwest::Client::new();
    let started = Instant::now();
    let (a, b, c) = tokio::join!(
        client.get(format!("{base}/x")).send(),
        client.get(format!("{base}/x")).send(),
        client.get(format!("{base}/x")).send(),
    );
    let elapsed = started.elapsed();

    for response in [a.expect("a"), b.expect("b"), c.expect("c")] {
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.expect("body"), "upstream-ok");
    }
    assert!(elapsed < Duration::from_secs(3), "batch took {elapsed:?}");
    assert_eq!(state.engine.stats().reorders, 3);
}

#[tokio::test]
async fn partial_batch_releases_after_max_wait() {
    let upstream = spawn_upstream().await;
    let mut reorder = rule("ooo", ChaosKind::OutOfOrder);
    reorder.reorder_min_requests = 5;
    reorder.reorder_max_wait_ms = 200;
    let (base, state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![reorder])).await;

    let response = reqwest::get(format!("{base}/x")).await.expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(state.engine.stats().reorders, 1);
}

#[tokio::test]
async fn sessions_group_documents_and_resources() {
    let upstream = spawn_upstream().await;
    let (base, state) = spawn_proxy(upstream.addr, ChaosConfig::default()).await;

    let client = reqwest::Client::new();

    let get = |path: &str, referer: Option<String>| {
        let client = client.clone();
        let url = format!("{base}{path}");
        async move {
            let mut req = client.get(url).header("Cookie", "__devtool_sid=A");
            if let Some(referer) = referer {
                req = req.header("Referer", referer);
            }
            req.send().await.expect("request")
        }
    };

    get("/home", None).await;
    get("/api/x", Some(format!("{base}/home"))).await;

    // The API call landed on /home's resources before the next navigation.
    let session = state.tracker.get_session("page-1").expect("session");
    assert_eq!(session.resources.len(), 1);
    assert!(session.resources[0].url.ends_with("/api/x"));

    get("/about", None).await;
    get("/app.js", Some(format!("{base}/about"))).await;

    let session = state.tracker.get_session("page-1").expect("session");
    assert_eq!(state.tracker.session_count(), 1);
    assert_eq!(session.navigations.len(), 2);
    assert!(session.navigations[0].url.ends_with("/home"));
    assert!(session.navigations[1].url.ends_with("/about"));
    assert_eq!(session.resources.len(), 1);
    assert!(session.resources[0].url.ends_with("/app.js"));
}

#[tokio::test]
async fn html_documents_get_the_instrumentation_script() {
    let upstream = spawn_upstream().await;
    let (base, _state) = spawn_proxy(upstream.addr, ChaosConfig::default()).await;

    let body = reqwest::get(format!("{base}/home"))
        .await
        .expect("request")
        .text()
        .await
        .expect("body");

    let script_at = body.find("<script>").expect("script injected");
    let head_close = body.find("</head>").expect("head close");
    assert!(script_at < head_close, "script must land before </head>");

    // Non-HTML bodies stay untouched.
    let js = reqwest::get(format!("{base}/app.js"))
        .await
        .expect("request")
        .text()
        .await
        .expect("body");
    assert_eq!(js, "console.log(1)");
}

#[tokio::test]
async fn packet_loss_aborts_before_any_byte() {
    let upstream = spawn_upstream().await;
    let loss = rule("loss", ChaosKind::PacketLoss);
    let (base, state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![loss])).await;

    // The reset can land before or after the status line is parsed.
    match reqwest::get(format!("{base}/x")).await {
        Ok(response) => assert!(response.bytes().await.is_err(), "body read must fail"),
        Err(_) => {}
    }
    assert_eq!(state.engine.stats().drops_injected, 1);
}

#[tokio::test]
async fn disconnect_drops_mid_body() {
    let upstream = spawn_upstream().await;
    let mut disconnect = rule("cut", ChaosKind::Disconnect);
    disconnect.drop_after_percent = 0.5;
    let (base, state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![disconnect])).await;

    let response = reqwest::get(format!("{base}/data")).await.expect("headers arrive");
    let body = response.bytes().await;
    assert!(body.is_err(), "body read must fail mid-stream");
    assert_eq!(state.engine.stats().drops_injected, 1);
}

#[tokio::test]
async fn latency_rule_delays_the_response() {
    let upstream = spawn_upstream().await;
    let mut latency = rule("lat", ChaosKind::Latency);
    latency.min_latency_ms = 150;
    latency.max_latency_ms = 200;
    let (base, state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![latency])).await;

    let started = Instant::now();
    let response = reqwest::get(format!("{base}/x")).await.expect("request");
    assert_eq!(response.status(), 200);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(state.engine.stats().latency_injected_ms >= 150);
}

#[tokio::test]
async fn timeout_rule_holds_until_the_client_gives_up() {
    let upstream = spawn_upstream().await;
    let timeout = rule("hold", ChaosKind::Timeout);
    let (base, _state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![timeout])).await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .expect("client");
    let result = client.get(format!("{base}/x")).send().await;
    assert!(result.expect_err("must time out").is_timeout());
    assert_eq!(upstream.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn corrupt_json_breaks_the_payload() {
    let upstream = spawn_upstream().await;
    let corrupt = rule("garble", ChaosKind::CorruptJson);
    let (base, _state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![corrupt])).await;

    let body = reqwest::get(format!("{base}/api/x"))
        .await
        .expect("request")
        .bytes()
        .await
        .expect("body");
    assert!(serde_json::from_slice::<serde_json::Value>(&body).is_err());
}

#[tokio::test]
async fn header_bomb_pads_the_response() {
    let upstream = spawn_upstream().await;
    let bomb = rule("bomb", ChaosKind::HeaderBomb);
    let (base, _state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![bomb])).await;

    let response = reqwest::get(format!("{base}/x")).await.expect("request");
    assert!(response.headers().contains_key("x-chaos-pad-0"));
    assert!(response.headers().contains_key("x-chaos-pad-47"));
    assert_eq!(response.text().await.expect("body"), "upstream-ok");
}

#[tokio::test]
async fn admin_bad_regex_keeps_prior_config() {
    let upstream = spawn_upstream().await;
    let keep = rule("keep", ChaosKind::Latency);
    let (base, _state) = spawn_proxy(upstream.addr, ChaosConfig::with_rules(vec![keep])).await;
    let client = reqwest::Client::new();

    let bad = serde_json::json!({
        "rules": [{"id": "bad", "name": "bad", "type": "latency", "urlPattern": "[unclosed"}]
    });
    let response = client
        .put(format!("{base}/__devtap/chaos/config"))
        .json(&bad)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);

    let config: serde_json::Value = client
        .get(format!("{base}/__devtap/chaos/config"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(config["rules"][0]["id"], "keep");
}

#[tokio::test]
async fn admin_presets_and_stats() {
    let upstream = spawn_upstream().await;
    let (base, _state) = spawn_proxy(upstream.addr, ChaosConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/__devtap/chaos/preset/mobile-3g"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);

    let config: serde_json::Value = client
        .get(format!("{base}/__devtap/chaos/config"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(config["rules"].as_array().expect("rules").len(), 3);

    let missing = client
        .post(format!("{base}/__devtap/chaos/preset/wormhole"))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), 404);

    let stats: serde_json::Value = client
        .get(format!("{base}/__devtap/chaos/stats"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert!(stats["totalRequests"].is_u64());
}

#[tokio::test]
async fn ingest_routes_events_into_log_and_session() {
    let upstream = spawn_upstream().await;
    // Overlay pointed at a dead port: failures must stay invisible.
    let config = ProxyServerConfig {
        upstream: format!("http://{}", upstream.addr),
        overlay_url: Some("http://127.0.0.1:1".to_string()),
        ..Default::default()
    };
    let server = ProxyServer::new(config, ChaosConfig::default()).expect("proxy server");
    let state = server.state();
    let addr = spawn_app(server.router()).await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    // Create a session with a document request first.
    client
        .get(format!("{base}/home"))
        .header("Cookie", "__devtool_sid=A")
        .send()
        .await
        .expect("document");

    let frame = serde_json::json!({
        "type": "error",
        "data": {"message": "boom", "source": "app.js", "line": 10},
        "url": format!("{base}/home")
    });
    let response = client
        .post(format!("{base}/__devtap/event"))
        .header("Cookie", "__devtool_sid=A")
        .json(&frame)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 202);

    let errors = state.logger.query(&LogFilter {
        kinds: vec![EntryKind::Error],
        ..Default::default()
    });
    assert_eq!(errors.len(), 1);

    let session = state.tracker.get_session("page-1").expect("session");
    assert_eq!(session.errors.len(), 1);
    assert_eq!(session.errors[0].message, "boom");

    // Unknown frame types are rejected and leave no trace.
    let before = state.logger.stats().total_entries;
    let bad = client
        .post(format!("{base}/__devtap/event"))
        .json(&serde_json::json!({"type": "wormhole", "data": {}}))
        .send()
        .await
        .expect("request");
    assert_eq!(bad.status(), 400);
    assert_eq!(state.logger.stats().total_entries, before);
}

#[tokio::test]
async fn admin_log_queries_filter_by_kind() {
    let upstream = spawn_upstream().await;
    let (base, _state) = spawn_proxy(upstream.addr, ChaosConfig::default()).await;
    let client = reqwest::Client::new();

    client.get(format!("{base}/x")).send().await.expect("request");
    client.get(format!("{base}/api/x")).send().await.expect("request");

    let logs: serde_json::Value = client
        .get(format!("{base}/__devtap/logs?kind=http&limit=10"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(logs["count"], 2);

    let sessions: serde_json::Value = client
        .get(format!("{base}/__devtap/sessions"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert!(!sessions.as_array().expect("array").is_empty());
}
