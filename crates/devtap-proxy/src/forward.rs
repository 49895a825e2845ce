//! Chaos-decorated request forwarding
//!
//! One handler relays every non-admin request to the upstream origin. Per
//! request the pipeline is: evaluate the match set exactly once, sleep any
//! injected latency, honor `timeout`/`stale` holds, park in the reorder
//! queue when asked, fabricate error responses without calling upstream,
//! otherwise round-trip and stream the body back through the shaping gates
//! (drop outermost, truncation next, drip pacing innermost).
//!
//! Client disconnects cancel the handler future, which unwinds every sleep
//! and wait point here; the shaping task notices its receiver is gone and
//! stops.

use crate::server::ProxyState;
use crate::{inject, session_cookie};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use devtap_chaos::writers::{split_chunks, Admit, DropAdmit, ShapePlan};
use devtap_chaos::{ChaosStats, LoggingMode, MatchSet};
use devtap_core::{HttpExchange, HttpRequestInfo, LogEntry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Request headers never forwarded upstream
const SKIP_REQUEST_HEADERS: &[HeaderName] = &[
    header::HOST,
    header::CONTENT_LENGTH,
    header::ACCEPT_ENCODING,
    header::CONNECTION,
];

/// Response headers never relayed back verbatim
const SKIP_RESPONSE_HEADERS: &[HeaderName] = &[
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// Catch-all relay handler
pub async fn proxy_handler(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_string(), |pq| pq.to_string());
    let upstream_url = format!("{}{}", state.upstream, path_and_query);

    let req_headers = req.headers().clone();
    let browser_session = session_cookie(&req_headers);

    // Rules, the traffic log, and the page tracker all see the URL the
    // browser sees; the upstream origin only matters for the round trip.
    let host = req_headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let full_url = format!("http://{host}{path_and_query}");

    let (_, body) = req.into_parts();
    let request_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    // The match set is evaluated exactly once, before any mutation decision.
    let match_set = state.engine.matching_rules(method.as_str(), &full_url);
    log_decision(&state, &match_set, method.as_str(), &full_url);

    let delay = state.engine.latency_delay(&match_set);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if match_set.wants_timeout() {
        // Held until the client gives up; the dropped future is the exit.
        return std::future::pending::<Response>().await;
    }

    if let Some(stale) = match_set.stale_delay() {
        tokio::time::sleep(stale).await;
    }

    if let Some((min_requests, max_wait)) = match_set.reorder_params() {
        let ticket = state.engine.reorder().enqueue(min_requests, max_wait);
        if let Some(rank) = ticket.wait().await {
            debug!(rank, url = %full_url, "Released from reorder queue");
        }
    }

    // Fabricated errors short-circuit the upstream entirely.
    if let Some((status, body)) = state.engine.error_response(&match_set) {
        let exchange = build_exchange(
            &method,
            &full_url,
            status,
            started,
            Some("text/plain; charset=utf-8"),
            request_bytes.len(),
            body.len(),
            &req_headers,
            None,
            &match_set,
            browser_session.clone(),
        );
        record_exchange(&state, exchange, &req_headers, browser_session);
        return fabricate_error(status, &body);
    }

    // Upstream round trip.
    let upstream_result = state
        .client
        .request(method.clone(), &upstream_url)
        .headers(forwardable_request_headers(&req_headers))
        .header(header::ACCEPT_ENCODING, "identity")
        .body(request_bytes.to_vec())
        .send()
        .await;

    let upstream = match upstream_result {
        Ok(response) => response,
        Err(err) => {
            warn!(url = %upstream_url, error = %err, "Upstream request failed");
            let mut exchange = build_exchange(
                &method,
                &full_url,
                0,
                started,
                None,
                request_bytes.len(),
                0,
                &req_headers,
                Some(err.to_string()),
                &match_set,
                browser_session.clone(),
            );
            exchange.status = 502;
            record_exchange(&state, exchange, &req_headers, browser_session);
            return (StatusCode::BAD_GATEWAY, format!("upstream error: {err}")).into_response();
        }
    };

    let status = upstream.status().as_u16();
    let resp_headers = upstream.headers().clone();
    let content_type = resp_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let upstream_bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(url = %upstream_url, error = %err, "Failed to read upstream body");
            let exchange = build_exchange(
                &method,
                &full_url,
                status,
                started,
                content_type.as_deref(),
                request_bytes.len(),
                0,
                &req_headers,
                Some(err.to_string()),
                &match_set,
                browser_session.clone(),
            );
            record_exchange(&state, exchange, &req_headers, browser_session);
            return (StatusCode::BAD_GATEWAY, format!("upstream body error: {err}")).into_response();
        }
    };

    // Documents get the instrumentation script before any chaos mutation, so
    // the splice sees well-formed HTML.
    let mut body_bytes: Vec<u8> = upstream_bytes.to_vec();
    if state.inject_script && inject::is_injectable(content_type.as_deref()) {
        if let Ok(html) = std::str::from_utf8(&body_bytes) {
            body_bytes = inject::inject_script(html).into_bytes();
        }
    }

    let exchange = build_exchange(
        &method,
        &full_url,
        status,
        started,
        content_type.as_deref(),
        request_bytes.len(),
        body_bytes.len(),
        &req_headers,
        None,
        &match_set,
        browser_session.clone(),
    );
    record_exchange(&state, exchange, &req_headers, browser_session);

    let plan = state.engine.shape_plan(&match_set);
    state.engine.apply_corruption(&plan, &mut body_bytes);
    let body = Bytes::from(body_bytes);

    let mut response = Response::builder().status(status);
    for (name, value) in &resp_headers {
        if SKIP_RESPONSE_HEADERS.contains(name) {
            continue;
        }
        response = response.header(name, value);
    }
    if plan.header_bomb {
        for (name, value) in state.engine.bomb_headers() {
            if let (Ok(name), Ok(value)) =
                (HeaderName::try_from(name), HeaderValue::try_from(value))
            {
                response = response.header(name, value);
            }
        }
    }
    if plan.partial_body {
        // Advertise the full length while the gates send less.
        response = response.header(header::CONTENT_LENGTH, body.len());
    }

    let stats = state.engine.stats_handle();
    let shaped = if plan.is_noop() {
        Body::from(body)
    } else {
        shaped_body(body, plan, stats)
    };

    response
        .body(shaped)
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// Fabricate an error response for an `http_error`/`rate_limit` rule
fn fabricate_error(status: u16, body: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body.to_string(),
    )
        .into_response()
}

/// Stream a buffered body through the shaping gates on a spawned task
///
/// Gate order is fixed: the drop gate sees raw bytes first, truncation caps
/// what survives, drip pacing delays each surviving chunk. A client
/// disconnect drops the receiver and the task stops at its next send.
fn shaped_body(body: Bytes, plan: ShapePlan, stats: Arc<ChaosStats>) -> Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(4);

    tokio::spawn(async move {
        if plan.packet_loss {
            stats.record_drop();
            let _ = tx.send(Err(abort_error())).await;
            return;
        }

        let expected = body.len();
        let mut drop_gate = plan.drop_gate(expected);
        let mut truncate_gate = plan.truncate_gate(expected);
        let chunk_size = plan.drip.map_or(16 * 1024, |drip| drip.chunk_size);

        let mut aborted = false;
        for chunk in split_chunks(&body, chunk_size) {
            let (survived, abort_after) = match drop_gate.as_mut() {
                Some(gate) => match gate.admit(chunk) {
                    DropAdmit::Forward(bytes) => (bytes, false),
                    DropAdmit::Abort(flush) => (flush, true),
                },
                None => (chunk, false),
            };

            let out = match truncate_gate.as_mut() {
                Some(gate) => match gate.admit(survived) {
                    Admit::Forward(bytes) => bytes,
                    Admit::Swallow => Bytes::new(),
                },
                None => survived,
            };

            if !out.is_empty() {
                if let Some(drip) = plan.drip {
                    tokio::time::sleep(drip.delay_for(out.len())).await;
                }
                if tx.send(Ok(out)).await.is_err() {
                    return;
                }
            }

            if abort_after {
                aborted = true;
                break;
            }
        }

        if let Some(gate) = &truncate_gate {
            if gate.clipped() {
                stats.record_truncation();
            }
        }

        if aborted || plan.chunked_abort {
            stats.record_drop();
            let _ = tx.send(Err(abort_error())).await;
            return;
        }

        if let Some(delay) = plan.slow_close {
            tokio::time::sleep(delay).await;
        }
        // Dropping the sender ends the stream cleanly.
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    Body::from_stream(stream)
}

fn abort_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::ConnectionReset, "chaos: connection dropped")
}

fn forwardable_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if SKIP_REQUEST_HEADERS.contains(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn build_exchange(
    method: &http::Method,
    url: &str,
    status: u16,
    started: Instant,
    content_type: Option<&str>,
    request_size: usize,
    response_size: usize,
    req_headers: &HeaderMap,
    error: Option<String>,
    match_set: &MatchSet,
    browser_session: Option<String>,
) -> HttpExchange {
    let mut headers = HashMap::new();
    for (name, value) in req_headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), value.to_string());
        }
    }

    let mut exchange = HttpExchange::new(method.as_str(), url, status);
    exchange.duration_ms = started.elapsed().as_millis() as u64;
    exchange.content_type = content_type.map(String::from);
    exchange.request_size = request_size as u64;
    exchange.response_size = response_size as u64;
    exchange.request_headers = headers;
    exchange.error = error;
    exchange.chaos_applied = match_set.rule_ids();
    exchange.browser_session = browser_session;
    exchange
}

/// Log the exchange and route it through the page tracker
fn record_exchange(
    state: &Arc<ProxyState>,
    exchange: HttpExchange,
    req_headers: &HeaderMap,
    browser_session: Option<String>,
) {
    let header_str = |name: header::HeaderName| {
        req_headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };

    let info = HttpRequestInfo {
        method: exchange.method.clone(),
        url: exchange.url.clone(),
        status: exchange.status,
        content_type: exchange.content_type.clone(),
        accept: header_str(header::ACCEPT),
        requested_with: header_str(HeaderName::from_static("x-requested-with")),
        referer: header_str(header::REFERER),
        browser_session,
    };

    state.tracker.track_http_request(&info);
    state.logger.log(LogEntry::Http(exchange));
}

fn log_decision(state: &Arc<ProxyState>, match_set: &MatchSet, method: &str, url: &str) {
    match state.engine.logging_mode() {
        LoggingMode::Off => {}
        LoggingMode::Matched => {
            if !match_set.is_empty() {
                debug!(method, url, rules = ?match_set.rule_ids(), "Chaos applied");
            }
        }
        LoggingMode::All => {
            debug!(method, url, matched = match_set.len(), "Chaos decision");
        }
    }
}
