//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::routing::RouteDefaults;

/// Root configuration for the application server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name, sent as `X-Powered-By` and expected in `x-proxy`.
    pub name: String,

    /// Adds the `debug` flag to every request and a `Mode: debug` header.
    pub debug: bool,

    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Default body and frame limits.
    pub limits: LimitsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// WebSocket settings.
    pub websocket: WebSocketConfig,

    /// Upload storage.
    pub uploads: UploadConfig,

    /// Static file detection.
    pub static_files: StaticFilesConfig,

    /// IP and header restrictions.
    pub restrictions: RestrictionsConfig,

    /// Host redirects.
    pub redirects: Vec<RedirectConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "switchyard".to_string(),
            debug: false,
            listener: ListenerConfig::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
            websocket: WebSocketConfig::default(),
            uploads: UploadConfig::default(),
            static_files: StaticFilesConfig::default(),
            restrictions: RestrictionsConfig::default(),
            redirects: Vec::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Limits applied to routes that don't declare their own.
    pub fn route_defaults(&self) -> RouteDefaults {
        RouteDefaults {
            max_size: self.limits.request_kb * 1024,
            timeout: Duration::from_millis(self.timeouts.request_ms),
            websocket_max_size: self.limits.websocket_kb * 1024,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Default size limits, in kilobytes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body.
    pub request_kb: usize,

    /// Maximum WebSocket frame.
    pub websocket_kb: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_kb: 5,
            websocket_kb: 5,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default handler timeout in milliseconds.
    pub request_ms: u64,

    /// Time allowed for in-flight connections to drain on shutdown, in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 3000,
            shutdown_secs: 10,
        }
    }
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Accept upgrade requests.
    pub enabled: bool,

    /// Supported `Sec-WebSocket-Version` values.
    pub versions: Vec<u16>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            versions: vec![13],
        }
    }
}

/// Upload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory for multipart file parts.
    pub temp_directory: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_directory: std::env::temp_dir().join("switchyard"),
        }
    }
}

/// Static file detection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// Extensions (without the dot) that route a request to file routes.
    pub accepts: Vec<String>,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        let accepts = [
            "jpg", "png", "gif", "ico", "js", "css", "txt", "xml", "woff", "woff2", "ttf", "eot",
            "svg", "zip", "rar", "pdf", "docx", "xlsx", "doc", "xls", "html", "htm", "appcache",
            "map", "ogg", "mp4", "mp3", "webp", "webm", "swf", "package", "json", "md",
        ];
        Self {
            accepts: accepts.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// IP and header restrictions. Header maps go from header name to regex patterns.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RestrictionsConfig {
    pub allowed_ips: Vec<String>,
    pub blocked_ips: Vec<String>,
    pub allowed_headers: BTreeMap<String, Vec<String>>,
    pub blocked_headers: BTreeMap<String, Vec<String>>,
}

/// Host-level redirect.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedirectConfig {
    /// `scheme://host` to match.
    pub from: String,

    /// Target origin, e.g. `https://example.com`.
    pub to: String,

    /// Append the request path and query to the target.
    #[serde(default = "default_true")]
    pub preserve_path: bool,

    /// 301 instead of 302.
    #[serde(default)]
    pub permanent: bool,
}

fn default_true() -> bool {
    true
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
