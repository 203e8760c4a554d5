//! WebSocket upgrade validation and the `101 Switching Protocols` response.

use axum::body::Body;
use axum::http::header::{
    CONNECTION, HOST, ORIGIN, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL,
    SEC_WEBSOCKET_VERSION, UPGRADE,
};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;
use crate::routing::WebSocketRoute;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const ID_SUFFIX_LEN: usize = 20;

/// A validated handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub accept: String,
    /// Sub-protocol echoed back to the client.
    pub protocol: Option<String>,
    pub id: String,
}

/// `base64(sha1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(GUID.as_bytes());
    STANDARD.encode(sha1.finalize())
}

/// Peer address without separators plus a random suffix.
pub fn connection_id(ip: &str) -> String {
    let mut id: String = ip.chars().filter(|c| *c != '.' && *c != ':').collect();
    id.extend(
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(char::from),
    );
    id
}

fn header<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Whether the request asks for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    header(headers, UPGRADE).eq_ignore_ascii_case("websocket")
}

/// Sub-protocols offered by the client, whitespace removed.
pub fn offered_protocols(headers: &HeaderMap) -> Vec<String> {
    header(headers, SEC_WEBSOCKET_PROTOCOL)
        .split(',')
        .map(|p| p.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Validate an upgrade against a matched route.
pub fn prepare(
    headers: &HeaderMap,
    route: &WebSocketRoute,
    versions: &[u16],
    ip: &str,
) -> Result<Accepted, HandshakeError> {
    let origin = header(headers, ORIGIN);

    if route.allow.is_empty() {
        let host = header(headers, HOST);
        if host.is_empty() || !origin.contains(host) {
            return Err(HandshakeError::Origin(origin.to_string()));
        }
    } else if !route.allow.iter().any(|a| a == "*") {
        if let Some(missing) = route.allow.iter().find(|a| !origin.contains(a.as_str())) {
            tracing::debug!(origin = %origin, expected = %missing, "Origin rejected");
            return Err(HandshakeError::Origin(origin.to_string()));
        }
    }

    let offered = offered_protocols(headers);
    if let Some(missing) = route.protocols.iter().find(|p| !offered.contains(p)) {
        return Err(HandshakeError::Protocol(missing.clone()));
    }

    let version = header(headers, SEC_WEBSOCKET_VERSION);
    match version.trim().parse::<u16>() {
        Ok(v) if versions.contains(&v) => {}
        _ => return Err(HandshakeError::Version(version.to_string())),
    }

    let key = header(headers, SEC_WEBSOCKET_KEY);
    if key.is_empty() {
        return Err(HandshakeError::MissingKey);
    }

    Ok(Accepted {
        accept: accept_key(key),
        protocol: route.protocols.first().cloned(),
        id: connection_id(ip),
    })
}

/// Build the `101` response for an accepted handshake.
pub fn switching_protocols(accepted: &Accepted) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(value) = HeaderValue::from_str(&accepted.accept) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, value);
    }
    if let Some(protocol) = accepted.protocol.as_deref() {
        if let Ok(value) = HeaderValue::from_str(protocol) {
            headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
    }

    response
}
