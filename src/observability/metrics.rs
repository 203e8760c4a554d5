//! Request/response counters.
//!
//! # Responsibilities
//! - Count requests by kind and method, responses by kind and error status
//! - Track in-flight requests
//! - Mirror every increment to the `metrics` facade for Prometheus scrapes
//!
//! # Metrics
//! - `switchyard_requests_total` (counter): labelled by `kind`
//! - `switchyard_responses_total` (counter): labelled by `kind`
//! - `switchyard_pending_requests` (gauge): in-flight requests
//!
//! # Design Decisions
//! - Local atomics back the usage snapshot; the facade is fire-and-forget
//! - Pending count never goes below zero

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

/// Incoming request classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStat {
    Web,
    Xhr,
    File,
    Websocket,
    Get,
    Post,
    Put,
    Delete,
    Upload,
    Xss,
    Blocked,
}

impl RequestStat {
    const ALL: [RequestStat; 11] = [
        RequestStat::Web,
        RequestStat::Xhr,
        RequestStat::File,
        RequestStat::Websocket,
        RequestStat::Get,
        RequestStat::Post,
        RequestStat::Put,
        RequestStat::Delete,
        RequestStat::Upload,
        RequestStat::Xss,
        RequestStat::Blocked,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RequestStat::Web => "web",
            RequestStat::Xhr => "xhr",
            RequestStat::File => "file",
            RequestStat::Websocket => "websocket",
            RequestStat::Get => "get",
            RequestStat::Post => "post",
            RequestStat::Put => "put",
            RequestStat::Delete => "delete",
            RequestStat::Upload => "upload",
            RequestStat::Xss => "xss",
            RequestStat::Blocked => "blocked",
        }
    }

    /// Counter for an HTTP method, if it has one.
    pub fn for_method(method: &str) -> Option<RequestStat> {
        match method {
            "GET" => Some(RequestStat::Get),
            "POST" => Some(RequestStat::Post),
            "PUT" => Some(RequestStat::Put),
            "DELETE" => Some(RequestStat::Delete),
            _ => None,
        }
    }
}

/// Outgoing response classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStat {
    View,
    Json,
    Plain,
    Empty,
    Custom,
    Binary,
    File,
    Stream,
    Sse,
    Redirect,
    Forwarding,
    Restriction,
    Timeout,
    Websocket,
    Mmr,
    Error400,
    Error401,
    Error403,
    Error404,
    Error408,
    Error431,
    Error500,
    Error501,
}

impl ResponseStat {
    const ALL: [ResponseStat; 23] = [
        ResponseStat::View,
        ResponseStat::Json,
        ResponseStat::Plain,
        ResponseStat::Empty,
        ResponseStat::Custom,
        ResponseStat::Binary,
        ResponseStat::File,
        ResponseStat::Stream,
        ResponseStat::Sse,
        ResponseStat::Redirect,
        ResponseStat::Forwarding,
        ResponseStat::Restriction,
        ResponseStat::Timeout,
        ResponseStat::Websocket,
        ResponseStat::Mmr,
        ResponseStat::Error400,
        ResponseStat::Error401,
        ResponseStat::Error403,
        ResponseStat::Error404,
        ResponseStat::Error408,
        ResponseStat::Error431,
        ResponseStat::Error500,
        ResponseStat::Error501,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResponseStat::View => "view",
            ResponseStat::Json => "json",
            ResponseStat::Plain => "plain",
            ResponseStat::Empty => "empty",
            ResponseStat::Custom => "custom",
            ResponseStat::Binary => "binary",
            ResponseStat::File => "file",
            ResponseStat::Stream => "stream",
            ResponseStat::Sse => "sse",
            ResponseStat::Redirect => "redirect",
            ResponseStat::Forwarding => "forwarding",
            ResponseStat::Restriction => "restriction",
            ResponseStat::Timeout => "timeout",
            ResponseStat::Websocket => "websocket",
            ResponseStat::Mmr => "mmr",
            ResponseStat::Error400 => "error400",
            ResponseStat::Error401 => "error401",
            ResponseStat::Error403 => "error403",
            ResponseStat::Error404 => "error404",
            ResponseStat::Error408 => "error408",
            ResponseStat::Error431 => "error431",
            ResponseStat::Error500 => "error500",
            ResponseStat::Error501 => "error501",
        }
    }

    /// Counter for an error status served by a system route.
    pub fn error_status(code: u16) -> Option<ResponseStat> {
        match code {
            400 => Some(ResponseStat::Error400),
            401 => Some(ResponseStat::Error401),
            403 => Some(ResponseStat::Error403),
            404 => Some(ResponseStat::Error404),
            408 => Some(ResponseStat::Error408),
            431 => Some(ResponseStat::Error431),
            500 => Some(ResponseStat::Error500),
            501 => Some(ResponseStat::Error501),
            _ => None,
        }
    }
}

/// Process-wide counters, shared by `Arc`.
#[derive(Debug)]
pub struct Stats {
    requests: [AtomicU64; RequestStat::ALL.len()],
    responses: [AtomicU64; ResponseStat::ALL.len()],
    pending: AtomicUsize,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            requests: std::array::from_fn(|_| AtomicU64::new(0)),
            responses: std::array::from_fn(|_| AtomicU64::new(0)),
            pending: AtomicUsize::new(0),
        }
    }
}

impl Stats {
    pub fn request(&self, stat: RequestStat) {
        self.requests[stat as usize].fetch_add(1, Ordering::Relaxed);
        metrics::counter!("switchyard_requests_total", "kind" => stat.name()).increment(1);
    }

    pub fn response(&self, stat: ResponseStat) {
        self.responses[stat as usize].fetch_add(1, Ordering::Relaxed);
        metrics::counter!("switchyard_responses_total", "kind" => stat.name()).increment(1);
    }

    pub fn request_count(&self, stat: RequestStat) -> u64 {
        self.requests[stat as usize].load(Ordering::Relaxed)
    }

    pub fn response_count(&self, stat: ResponseStat) -> u64 {
        self.responses[stat as usize].load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Count one in-flight request until the guard drops.
    pub fn track(&self) -> PendingGuard<'_> {
        let pending = self.pending.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("switchyard_pending_requests").set(pending as f64);
        PendingGuard { stats: self }
    }

    fn release(&self) {
        let previous = self
            .pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .unwrap_or_default();
        metrics::gauge!("switchyard_pending_requests").set(previous.saturating_sub(1) as f64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pending: self.pending(),
            requests: RequestStat::ALL
                .iter()
                .map(|s| (s.name(), self.request_count(*s)))
                .collect(),
            responses: ResponseStat::ALL
                .iter()
                .map(|s| (s.name(), self.response_count(*s)))
                .collect(),
        }
    }
}

/// Decrements the pending count on drop.
#[derive(Debug)]
pub struct PendingGuard<'a> {
    stats: &'a Stats,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.stats.release();
    }
}

/// Serializable copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub pending: usize,
    pub requests: BTreeMap<&'static str, u64>,
    pub responses: BTreeMap<&'static str, u64>,
}

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}
