//! Response builders.
//!
//! # Responsibilities
//! - Build the fixed-shape responses every primitive and fallback produces
//! - Apply the common headers (cache control, vary, charset)
//! - Stamp server headers on the way out
//!
//! # Design Decisions
//! - Builders never fail: header values that can't be encoded are skipped
//! - Text content types get `charset=utf-8` unless one is given

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION, PRAGMA, VARY};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};

pub const CACHE_PRIVATE: &str = "private";
pub const CACHE_NONE: &str = "private, no-cache, no-store, max-age=0";
pub const CACHE_STREAM: &str = "no-cache, no-store, max-age=0, must-revalidate";

/// Append `charset=utf-8` to textual content types lacking a charset.
pub fn with_charset(content_type: &str) -> String {
    let textual = content_type.starts_with("text/")
        || content_type.starts_with("application/json")
        || content_type.starts_with("application/javascript")
        || content_type.starts_with("application/xml");
    if textual && !content_type.contains("charset") {
        format!("{}; charset=utf-8", content_type)
    } else {
        content_type.to_string()
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}

/// Body with a content type and the default caching headers.
pub fn content(status: u16, body: impl Into<Body>, content_type: &str, extra: &HeaderMap) -> Response<Body> {
    let cache = if content_type.starts_with("application/json") {
        CACHE_NONE
    } else {
        CACHE_PRIVATE
    };

    let mut response = Response::new(body.into());
    *response.status_mut() = status_code(status);

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&with_charset(content_type)) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache));
    headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
    for (name, value) in extra {
        headers.insert(name.clone(), value.clone());
    }

    response
}

/// Headers for a long-lived streamed body.
pub fn streaming(status: u16, body: Body, content_type: &str, extra: &HeaderMap) -> Response<Body> {
    let mut response = content(status, body, content_type, extra);
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_STREAM));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// `301` or `302` to `location`.
pub fn redirect(location: &str, permanent: bool) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = if permanent {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::FOUND
    };
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(LOCATION, value);
    }
    response
}

/// Plain-text `"404: Not Found"` style page.
pub fn status_page(status: u16) -> Response<Body> {
    let code = status_code(status);
    let text = format!("{}: {}", code.as_u16(), code.canonical_reason().unwrap_or("Unknown"));
    content(code.as_u16(), text, "text/plain", &HeaderMap::new())
}

/// Completion body written after the last part of a mixed upload.
pub fn mixed_end() -> Response<Body> {
    content(200, "END", "text/plain", &HeaderMap::new())
}

/// Server identification headers added to every response.
pub fn finalize(mut response: Response<Body>, name: &str, debug: bool) -> Response<Body> {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(name) {
        headers.insert(HeaderName::from_static("x-powered-by"), value);
    }
    if debug {
        headers.insert(HeaderName::from_static("mode"), HeaderValue::from_static("debug"));
    }
    response
}
