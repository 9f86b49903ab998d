// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the powgate filter service.
//!
//! The service answers as an external authorization server: the gateway
//! forwards the original request line and headers, and a 200 lets the request
//! through while anything else is returned to the client as-is.

use crate::challenge::ProofHeaders;
use crate::cidr::Allowlist;
use crate::config::MetricsConfig;
use crate::decision::{BlockReason, ChallengeReason, Decision, Filter, RequestMeta};
use crate::metrics;
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use powgate_common::wire::{HEADER_BASE, HEADER_GRANT, HEADER_NONCE, HEADER_TIMESTAMP};
use powgate_common::Rejection;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Original client address as seen by the edge proxy.
pub const HEADER_EXTERNAL_ADDRESS: &str = "x-envoy-external-address";
pub const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
pub const HEADER_FILTER_NAME: &str = "x-filter-name";

/// Shared application state.
pub struct AppState {
    pub filter: Filter,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Decision request for callers that cannot forward the original request.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub ip: String,
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub grant: Option<String>,
    #[serde(default)]
    pub proof: Option<ProofHeaders>,
}

/// Decision response. A rejection body is flattened in when not allowed.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant: Option<String>,
    #[serde(flatten)]
    pub rejection: Option<Rejection>,
}

impl From<Decision> for CheckResponse {
    fn from(decision: Decision) -> Self {
        let rejection = rejection(&decision).map(|(_, body)| body);
        match decision {
            Decision::Allow(reason) => CheckResponse {
                allowed: true,
                reason: Some(reason.as_str()),
                grant: None,
                rejection: None,
            },
            Decision::AllowWithGrant { token, .. } => CheckResponse {
                allowed: true,
                reason: Some("verified"),
                grant: Some(token),
                rejection: None,
            },
            Decision::Blocked { reason } => CheckResponse {
                allowed: false,
                reason: Some(reason.as_str()),
                grant: None,
                rejection,
            },
            _ => CheckResponse {
                allowed: false,
                reason: None,
                grant: None,
                rejection,
            },
        }
    }
}

/// Router with every endpoint of the service.
pub fn router(state: Arc<AppState>, metrics: &MetricsConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/check", post(check));
    if metrics.enabled {
        router = router.route(&metrics.path, get(export_metrics));
    }
    router
        .fallback(authorize)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(HEADER_FILTER_NAME),
            HeaderValue::from_static("powgate"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "powgate-filter",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus text exposition.
pub async fn export_metrics() -> Response {
    match metrics::render() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(error) => {
            warn!(%error, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Decide on a request described as JSON.
///
/// Always answers 200 for a well-formed request so the caller can read the
/// verdict from the body.
pub async fn check(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    let client_addr = match req.ip.parse() {
        Ok(ip) => ip,
        Err(_) => {
            warn!(ip = %req.ip, "Invalid IP address format");
            return (
                StatusCode::BAD_REQUEST,
                Json(CheckResponse {
                    allowed: false,
                    reason: Some("invalid IP address format"),
                    grant: None,
                    rejection: None,
                }),
            );
        }
    };

    let meta = RequestMeta {
        client_addr,
        host: req.host,
        path: req.path,
        grant: req.grant,
        proof: req.proof,
    };
    let decision = state.filter.decide(&meta).await;
    debug!(ip = %req.ip, outcome = decision.outcome(), "Check answered");
    (StatusCode::OK, Json(CheckResponse::from(decision)))
}

/// Decide on a forwarded request (ext_authz HTTP model).
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let snapshot = state.filter.snapshot();
    let Some(client_addr) = client_addr(&headers, peer, &snapshot.trusted_proxies) else {
        warn!(path = %uri.path(), "Cannot determine client address");
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "cannot determine client address".to_string(),
                code: "BAD_REQUEST",
            }),
        )
            .into_response();
    };

    let host = header_str(&headers, header::HOST.as_str())
        .or_else(|| uri.host())
        .unwrap_or_default()
        .to_string();
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let meta = RequestMeta {
        client_addr,
        host,
        path,
        grant: header_str(&headers, HEADER_GRANT).map(str::to_string),
        proof: proof_headers(&headers),
    };
    let decision = state.filter.decide(&meta).await;
    debug!(
        client = %meta.client_addr,
        host = %meta.host,
        path = %meta.path,
        outcome = decision.outcome(),
        "Request decided"
    );
    decision.into_response()
}

impl IntoResponse for Decision {
    fn into_response(self) -> Response {
        if let Some((status, body)) = rejection(&self) {
            let mut response = (status, Json(&body)).into_response();
            if let Rejection::RateLimited { retry_after_secs, .. } = body {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            }
            return response;
        }
        match self {
            Decision::AllowWithGrant { token, .. } => (StatusCode::OK, [(HEADER_GRANT, token)]).into_response(),
            _ => StatusCode::OK.into_response(),
        }
    }
}

/// Status and body for a decision that stops the request.
pub fn rejection(decision: &Decision) -> Option<(StatusCode, Rejection)> {
    match decision {
        Decision::Allow(_) | Decision::AllowWithGrant { .. } => None,
        Decision::Challenge { challenge, reason } => Some((
            StatusCode::TOO_MANY_REQUESTS,
            Rejection::PowRequired(challenge.body(challenge_message(*reason))),
        )),
        Decision::RateLimited { retry_after } => Some((
            StatusCode::TOO_MANY_REQUESTS,
            Rejection::RateLimited {
                message: "rate limit exceeded".to_string(),
                retry_after_secs: retry_after_secs(*retry_after),
            },
        )),
        Decision::Blocked { reason } => Some((
            StatusCode::FORBIDDEN,
            Rejection::Blocked {
                message: match reason {
                    BlockReason::UnknownHost => "no policy for this host".to_string(),
                    BlockReason::NoRoute => "no policy for this path".to_string(),
                },
            },
        )),
    }
}

fn challenge_message(reason: ChallengeReason) -> String {
    match reason {
        ChallengeReason::Required => "proof of work required".to_string(),
        ChallengeReason::Rejected(verification) => {
            format!("proof rejected ({verification}), solve the new challenge")
        }
    }
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Client address for a request arriving from `peer`.
///
/// Forwarding headers are only believed when the peer is a trusted proxy:
/// first the edge proxy's external address, then the rightmost
/// `x-forwarded-for` hop outside the trusted set. Any other peer is the
/// client itself, whatever it claims.
pub fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &Allowlist) -> Option<IpAddr> {
    let peer = peer?.ip();
    if !trusted.contains(peer) {
        return Some(peer);
    }
    header_str(headers, HEADER_EXTERNAL_ADDRESS)
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| forwarded_client(headers, trusted))
        .or(Some(peer))
}

/// Walk `x-forwarded-for` from the right. Hops left of an unparseable entry
/// are ignored; when every hop is trusted the leftmost one is the client.
fn forwarded_client(headers: &HeaderMap, trusted: &Allowlist) -> Option<IpAddr> {
    let values = headers
        .get_all(HEADER_FORWARDED_FOR)
        .iter()
        .map(|v| v.to_str().ok())
        .collect::<Option<Vec<_>>>()?;

    let mut leftmost = None;
    for hop in values.iter().rev().flat_map(|v| v.rsplit(',')) {
        let ip: IpAddr = hop.trim().parse().ok()?;
        if !trusted.contains(ip) {
            return Some(ip);
        }
        leftmost = Some(ip);
    }
    leftmost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::AnchorRing;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use powgate_common::{format_nonce, Anchor, ChallengeBody, Puzzle};
    use tower::ServiceExt;

    const CONFIG: &str = r#"
difficulty: 500
whitelist: [46.3.240.0/24]
trusted_proxies: [10.0.0.0/8]
mempool_upstream_name: https://mempool.space
unmatched: block
virtual_hosts:
  - host: httpbin.org
    routes:
      - path: /*
        rate_limit: { unit: minute, requests_per_unit: 10 }
      - path: /ip
        rate_limit: { unit: minute, requests_per_unit: 3 }
"#;

    const PROXY: [u8; 4] = [10, 0, 0, 2];
    const STRANGER: [u8; 4] = [198, 51, 100, 7];

    async fn app_behind(peer: [u8; 4]) -> Router {
        let config = Config::from_yaml(CONFIG).unwrap();
        let ring = Arc::new(AnchorRing::new(2));
        ring.push(Anchor::from_bytes([0x5a; 32])).await;
        let state = Arc::new(AppState {
            filter: Filter::new(&config, ring).unwrap(),
        });
        router(state, &config.metrics).layer(MockConnectInfo(SocketAddr::from((peer, 40000))))
    }

    /// Requests arrive through the trusted edge proxy.
    async fn app() -> Router {
        app_behind(PROXY).await
    }

    fn trusted() -> Allowlist {
        Allowlist::new(vec!["10.0.0.0/8".parse().unwrap()])
    }

    fn forwarded(client: &str, uri: &str) -> axum::http::request::Builder {
        Request::builder()
            .uri(uri)
            .header("host", "httpbin.org")
            .header(HEADER_FORWARDED_FOR, format!("{client}, 10.0.0.1"))
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[HEADER_FILTER_NAME], "powgate");
        let body = json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "powgate-filter");
    }

    #[tokio::test]
    async fn test_unsolved_request_gets_challenge() {
        let response = app()
            .await
            .oneshot(forwarded("203.0.113.1", "/ip?x=1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json(response).await;
        assert_eq!(body["code"], "POW_REQUIRED");
        assert_eq!(body["difficulty"], 500);
        assert_eq!(body["path"], "/ip");
        assert_eq!(body["current"], "5a".repeat(32));
    }

    #[tokio::test]
    async fn test_whitelisted_and_blocked() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(forwarded("46.3.240.5", "/ip").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("host", "other.org")
                    .header(HEADER_EXTERNAL_ADDRESS, "203.0.113.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json(response).await["code"], "BLOCKED");
    }

    #[tokio::test]
    async fn test_solve_and_receive_grant() {
        let app = app().await;
        let response = app
            .clone()
            .oneshot(forwarded("203.0.113.1", "/get").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let Rejection::PowRequired(ChallengeBody {
            current,
            difficulty,
            timestamp,
            path,
            ..
        }) = serde_json::from_value::<Rejection>(json(response).await).unwrap()
        else {
            panic!("expected a challenge");
        };

        let puzzle = Puzzle::new(&current, timestamp, &path, difficulty);
        let nonce = (0u64..).find(|n| puzzle.accepts(*n)).unwrap();
        let response = app
            .clone()
            .oneshot(
                forwarded("203.0.113.1", "/get")
                    .header(HEADER_NONCE, format_nonce(nonce))
                    .header(HEADER_TIMESTAMP, timestamp.to_string())
                    .header(HEADER_BASE, current.to_hex())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let grant = response.headers()[HEADER_GRANT].to_str().unwrap().to_string();

        let response = app
            .oneshot(
                forwarded("203.0.113.1", "/anything")
                    .header(HEADER_GRANT, grant)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_partial_proof_is_rechallenged() {
        let response = app()
            .await
            .oneshot(
                forwarded("203.0.113.1", "/ip")
                    .header(HEADER_NONCE, format_nonce(7))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json(response).await;
        assert_eq!(body["code"], "POW_REQUIRED");
        assert!(body["message"].as_str().unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let app = app_behind(STRANGER).await;
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/ip").header("host", "httpbin.org").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
            assert!(response.headers().get(header::RETRY_AFTER).is_none());
        }

        let response = app
            .oneshot(Request::builder().uri("/ip").header("host", "httpbin.org").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = response.headers()[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!((1..=60).contains(&retry));
        let body = json(response).await;
        assert_eq!(body["code"], "RATE_LIMITED");
        assert_eq!(body["retry_after_secs"], retry);
    }

    #[tokio::test]
    async fn test_check_endpoint() {
        let app = app().await;
        let request = |body: serde_json::Value| {
            Request::builder()
                .method("POST")
                .uri("/check")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let response = app
            .clone()
            .oneshot(request(serde_json::json!({"ip": "46.3.240.1", "host": "httpbin.org", "path": "/ip"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["allowed"], true);
        assert_eq!(body["reason"], "whitelisted");

        let response = app
            .clone()
            .oneshot(request(serde_json::json!({"ip": "203.0.113.9", "host": "httpbin.org", "path": "/ip"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["allowed"], false);
        assert_eq!(body["code"], "POW_REQUIRED");

        let response = app
            .clone()
            .oneshot(request(serde_json::json!({"ip": "203.0.113.9", "host": "other.org", "path": "/"})))
            .await
            .unwrap();
        let body = json(response).await;
        assert_eq!(body["allowed"], false);
        assert_eq!(body["code"], "BLOCKED");
        assert_eq!(body["reason"], "unknown_host");

        let response = app
            .oneshot(request(serde_json::json!({"ip": "nope", "host": "httpbin.org", "path": "/"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_untrusted_peer_cannot_claim_another_address() {
        let app = app_behind(STRANGER).await;
        let spoofed = |name: &'static str| {
            Request::builder()
                .uri("/ip")
                .header("host", "httpbin.org")
                .header(name, "46.3.240.5")
                .body(Body::empty())
                .unwrap()
        };

        let mut codes = Vec::new();
        for i in 0..20 {
            let name = if i % 2 == 0 { HEADER_FORWARDED_FOR } else { HEADER_EXTERNAL_ADDRESS };
            let response = app.clone().oneshot(spoofed(name)).await.unwrap();
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS, "request {i}");
            codes.push(json(response).await["code"].as_str().unwrap().to_string());
        }
        assert!(codes[..3].iter().all(|c| c == "POW_REQUIRED"));
        assert!(codes[3..].iter().all(|c| c == "RATE_LIMITED"));
    }

    #[tokio::test]
    async fn test_forwarded_clients_are_limited_separately() {
        let app = app().await;
        for client in ["203.0.113.1", "203.0.113.2"] {
            for _ in 0..3 {
                let response = app.clone().oneshot(forwarded(client, "/ip").body(Body::empty()).unwrap()).await.unwrap();
                assert_eq!(json(response).await["code"], "POW_REQUIRED");
            }
        }
        let response = app.oneshot(forwarded("203.0.113.1", "/ip").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(json(response).await["code"], "RATE_LIMITED");
    }

    #[test]
    fn test_client_addr_ignores_headers_from_untrusted_peer() {
        let peer = Some(SocketAddr::from(([192, 0, 2, 1], 5000)));
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_FORWARDED_FOR, HeaderValue::from_static("46.3.240.5"));
        headers.insert(HEADER_EXTERNAL_ADDRESS, HeaderValue::from_static("46.3.240.5"));

        assert_eq!(client_addr(&headers, peer, &trusted()), Some("192.0.2.1".parse().unwrap()));
        assert_eq!(client_addr(&headers, peer, &Allowlist::default()), Some("192.0.2.1".parse().unwrap()));
        assert_eq!(client_addr(&headers, None, &trusted()), None);
    }

    #[test]
    fn test_client_addr_behind_trusted_proxy() {
        let peer = Some(SocketAddr::from((PROXY, 5000)));
        let trusted = trusted();
        let mut headers = HeaderMap::new();
        assert_eq!(client_addr(&headers, peer, &trusted), Some("10.0.0.2".parse().unwrap()));

        // Rightmost untrusted hop; anything left of it is client-supplied
        headers.insert(
            HEADER_FORWARDED_FOR,
            HeaderValue::from_static("46.3.240.5, 2001:db8::5, 10.0.0.1"),
        );
        assert_eq!(client_addr(&headers, peer, &trusted), Some("2001:db8::5".parse().unwrap()));

        headers.append(HEADER_FORWARDED_FOR, HeaderValue::from_static("198.51.100.9"));
        assert_eq!(client_addr(&headers, peer, &trusted), Some("198.51.100.9".parse().unwrap()));

        headers.insert(HEADER_FORWARDED_FOR, HeaderValue::from_static("10.0.0.7, 10.0.0.1"));
        assert_eq!(client_addr(&headers, peer, &trusted), Some("10.0.0.7".parse().unwrap()));

        headers.insert(HEADER_FORWARDED_FOR, HeaderValue::from_static("46.3.240.5, junk, 10.0.0.1"));
        assert_eq!(client_addr(&headers, peer, &trusted), Some("10.0.0.2".parse().unwrap()));

        headers.insert(HEADER_EXTERNAL_ADDRESS, HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_addr(&headers, peer, &trusted), Some("198.51.100.2".parse().unwrap()));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(40)), 40);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
