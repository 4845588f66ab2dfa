//! RFC 8484 DNS-over-HTTPS GET/POST handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use serde::Deserialize;

use crate::drivers::logs::Transport;
use crate::resolver::{ClientContext, Resolver};

const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// `/dns-query` (GET and POST) bound to one resolver, ready to merge into
/// a larger router.
pub fn router(resolver: Arc<Resolver>) -> Router {
    Router::new()
        .route("/dns-query", get(handle_get).post(handle_post))
        .with_state(resolver)
}

#[derive(Debug, Deserialize)]
pub struct DohGetParams {
    pub dns: Option<String>,
}

fn dns_message_response(bytes: Vec<u8>, status: StatusCode) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)],
        bytes,
    )
        .into_response()
}

/// `POST /dns-query` (and `/`): `Content-Type: application/dns-message`
/// body is the raw query.
pub async fn handle_post(
    State(resolver): State<Arc<Resolver>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != DNS_MESSAGE_CONTENT_TYPE {
        return (StatusCode::BAD_REQUEST, "expected application/dns-message").into_response();
    }
    respond(resolver, addr, body.to_vec()).await
}

/// `GET /dns-query?dns=<base64url>`.
pub async fn handle_get(
    State(resolver): State<Arc<Resolver>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<DohGetParams>,
) -> Response {
    let Some(encoded) = params.dns else {
        return (StatusCode::BAD_REQUEST, "missing dns query parameter").into_response();
    };
    let Ok(query_bytes) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(encoded.as_bytes()) else {
        return (StatusCode::BAD_REQUEST, "invalid base64url dns parameter").into_response();
    };
    respond(resolver, addr, query_bytes).await
}

async fn respond(resolver: Arc<Resolver>, addr: SocketAddr, query_bytes: Vec<u8>) -> Response {
    let client = ClientContext {
        address: addr.ip().to_string(),
        port: addr.port(),
        transport: Transport::Doh,
    };
    let outcome = resolver.resolve(&query_bytes, client).await;
    // A SERVFAIL-bearing body still gets HTTP 200 — see DESIGN.md. 400 is
    // reserved for DoH framing errors caught above, never for a
    // resolver-level failure.
    dns_message_response(outcome.response_bytes, StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64url_roundtrips_query_bytes() {
        let query = vec![1, 2, 3, 4];
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&query);
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(encoded).unwrap();
        assert_eq!(decoded, query);
    }
}
