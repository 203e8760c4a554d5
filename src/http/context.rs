//! Per-request state shared by the dispatcher, controllers and sessions.
//!
//! # Responsibilities
//! - Derive scheme, client IP, subdomain, path segments and query pairs once
//! - Hold the append-only flag list for the request
//! - Hold the decoded body, the overflow marker and the authorized user
//!
//! # Design Decisions
//! - Built from `http::request::Parts`; the body stream stays with the dispatcher
//! - Late-bound fields use `OnceLock` so the context can be shared by `Arc`
//!   before the body is read or the user authorized

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use axum::http::header::{CONTENT_TYPE, COOKIE, HOST};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Uri};

use crate::http::multipart::UploadedFile;
use crate::routing::flags;
use crate::routing::matcher::split_path;

/// Request ID header, set by `SetRequestIdLayer` at the connection edge.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A decoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// `application/x-www-form-urlencoded` pairs in order of appearance.
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    /// Text body of a `raw` route.
    Raw(String),
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<UploadedFile>,
    },
}

pub struct RequestContext {
    request_id: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    peer: SocketAddr,
    scheme: &'static str,
    path: String,
    segments: Vec<String>,
    raw_segments: Vec<String>,
    query: Vec<(String, String)>,
    subdomain: Option<String>,
    flags: RwLock<Vec<String>>,
    body: OnceLock<RequestBody>,
    user: OnceLock<Arc<dyn Any + Send + Sync>>,
    logged: AtomicBool,
    overflow: AtomicBool,
}

impl RequestContext {
    pub fn new(parts: &Parts, peer: SocketAddr) -> Self {
        let headers = parts.headers.clone();
        let request_id = headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let scheme = match headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()) {
            Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
            _ => match parts.uri.scheme_str() {
                Some("https") => "https",
                _ => "http",
            },
        };

        let raw_path = parts.uri.path();
        let query = parts
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.host())
            .unwrap_or_default();

        Self {
            request_id,
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            peer,
            scheme,
            path: raw_path.to_lowercase(),
            segments: split_path(raw_path, true),
            raw_segments: split_path(raw_path, false),
            query,
            subdomain: subdomain_of(host),
            headers,
            flags: RwLock::new(Vec::new()),
            body: OnceLock::new(),
            user: OnceLock::new(),
            logged: AtomicBool::new(false),
            overflow: AtomicBool::new(false),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// `https` when the request or a proxy in front of us says so.
    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    /// Lowercased request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request path as received.
    pub fn raw_path(&self) -> &str {
        self.uri.path()
    }

    pub fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    /// Lowercased segments used for matching.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Case-preserved segments used for captures.
    pub fn raw_segments(&self) -> &[String] {
        &self.raw_segments
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn query_string(&self) -> &str {
        self.uri.query().unwrap_or_default()
    }

    /// Host header without the port.
    pub fn host(&self) -> &str {
        self.header(HOST.as_str()).unwrap_or_default()
    }

    pub fn hostname(&self) -> &str {
        strip_port(self.host())
    }

    pub fn subdomain(&self) -> Option<&str> {
        self.subdomain.as_deref()
    }

    pub fn content_type(&self) -> &str {
        self.header(CONTENT_TYPE.as_str()).unwrap_or_default()
    }

    /// First `x-forwarded-for` entry, else the peer address.
    pub fn ip(&self) -> String {
        self.header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.peer.ip().to_string())
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| key.trim() == name)
            .map(|(_, value)| value.trim().to_string())
    }

    pub fn is_xhr(&self) -> bool {
        self.header("x-requested-with")
            .map(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
            .unwrap_or(false)
    }

    /// Snapshot of the derived flags.
    pub fn flags(&self) -> Vec<String> {
        self.flags.read().expect("flags lock poisoned").clone()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        flags::contains(&self.flags.read().expect("flags lock poisoned"), flag)
    }

    pub(crate) fn set_flags(&self, derived: Vec<String>) {
        *self.flags.write().expect("flags lock poisoned") = derived;
    }

    /// Append a flag unless already present.
    pub(crate) fn push_flag(&self, flag: &str) {
        let mut current = self.flags.write().expect("flags lock poisoned");
        if !flags::contains(&current, flag) {
            current.push(flag.to_string());
        }
    }

    pub fn is_xss(&self) -> bool {
        self.has_flag(flags::XSS)
    }

    pub fn body(&self) -> &RequestBody {
        self.body.get().unwrap_or(&RequestBody::Empty)
    }

    pub(crate) fn set_body(&self, body: RequestBody) {
        let _ = self.body.set(body);
    }

    /// Form field from a urlencoded or multipart body.
    pub fn field(&self, name: &str) -> Option<&str> {
        let pairs = match self.body() {
            RequestBody::Form(pairs) => pairs,
            RequestBody::Multipart { fields, .. } => fields,
            _ => return None,
        };
        pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> Option<&serde_json::Value> {
        match self.body() {
            RequestBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn files(&self) -> &[UploadedFile] {
        match self.body() {
            RequestBody::Multipart { files, .. } => files,
            _ => &[],
        }
    }

    pub fn is_overflow(&self) -> bool {
        self.overflow.load(Ordering::Acquire)
    }

    pub(crate) fn mark_overflow(&self) {
        self.overflow.store(true, Ordering::Release);
    }

    pub fn is_logged(&self) -> bool {
        self.logged.load(Ordering::Acquire)
    }

    pub(crate) fn authorize(&self, logged: bool, user: Option<Arc<dyn Any + Send + Sync>>) {
        self.logged.store(logged, Ordering::Release);
        if let Some(user) = user {
            let _ = self.user.set(user);
        }
    }

    /// Authorized user, if any, downcast to `T`.
    pub fn user<T: 'static>(&self) -> Option<&T> {
        self.user.get().and_then(|user| user.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("flags", &self.flags())
            .finish()
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split_once(']').map(|(h, _)| &host[..h.len() + 1]).unwrap_or(host);
    }
    host.split(':').next().unwrap_or_default()
}

/// Labels left of the registrable domain, `www.` ignored.
///
/// `a.b.example.com` gives `a.b`; `example.com` and IP hosts give `None`.
pub fn subdomain_of(host: &str) -> Option<String> {
    let host = strip_port(host).trim().to_lowercase();
    if host.is_empty() || host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return None;
    }
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() > 2 {
        Some(labels[..labels.len() - 2].join("."))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn context(builder: axum::http::request::Builder) -> RequestContext {
        let (parts, _) = builder.body(()).unwrap().into_parts();
        RequestContext::new(&parts, "10.0.0.9:5000".parse().unwrap())
    }

    #[test]
    fn test_subdomain_extraction() {
        assert_eq!(subdomain_of("api.example.com"), Some("api".into()));
        assert_eq!(subdomain_of("a.b.example.com:8080"), Some("a.b".into()));
        assert_eq!(subdomain_of("www.example.com"), None);
        assert_eq!(subdomain_of("example.com"), None);
        assert_eq!(subdomain_of("127.0.0.1:8000"), None);
    }

    #[test]
    fn test_derived_fields() {
        let ctx = context(
            Request::get("/Users/Bob/?page=2&q=a%20b")
                .header("host", "shop.example.com")
                .header("x-forwarded-for", "1.2.3.4, 10.0.0.1")
                .header("x-forwarded-proto", "https")
                .header("cookie", "sid=abc; theme=dark")
                .header("x-requested-with", "XMLHttpRequest")
                .header(X_REQUEST_ID, "req-1"),
        );

        assert_eq!(ctx.request_id(), "req-1");
        assert_eq!(ctx.scheme(), "https");
        assert_eq!(ctx.ip(), "1.2.3.4");
        assert_eq!(ctx.path(), "/users/bob/");
        assert_eq!(ctx.segments(), ["users", "bob"]);
        assert_eq!(ctx.raw_segments(), ["Users", "Bob"]);
        assert_eq!(ctx.query_value("q"), Some("a b"));
        assert_eq!(ctx.subdomain(), Some("shop"));
        assert_eq!(ctx.cookie("theme").as_deref(), Some("dark"));
        assert!(ctx.is_xhr());
    }

    #[test]
    fn test_peer_ip_and_generated_id() {
        let ctx = context(Request::get("/"));
        assert_eq!(ctx.ip(), "10.0.0.9");
        assert_eq!(ctx.scheme(), "http");
        assert!(!ctx.request_id().is_empty());
        assert!(ctx.segments().is_empty());
    }

    #[test]
    fn test_flags_are_append_only() {
        let ctx = context(Request::get("/"));
        ctx.set_flags(vec!["get".into(), "http".into()]);
        ctx.push_flag("logged");
        ctx.push_flag("logged");
        assert_eq!(ctx.flags(), vec!["get", "http", "logged"]);
    }

    #[test]
    fn test_user_downcast() {
        let ctx = context(Request::get("/"));
        ctx.authorize(true, Some(Arc::new(42u32)));
        assert!(ctx.is_logged());
        assert_eq!(ctx.user::<u32>(), Some(&42));
        assert!(ctx.user::<String>().is_none());
    }
}
