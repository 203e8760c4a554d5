//! Switchyard: an HTTP application server dispatch core.
//!
//! Routes requests to flag-aware handlers, runs each request through a
//! lifecycle that always ends in exactly one response, and keeps WebSocket
//! connections grouped in per-route registries.

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;
pub mod websocket;

pub use app::{Application, ApplicationBuilder, Usage};
pub use config::ServerConfig;
pub use error::{AppError, DispatchError, RouteError};
pub use http::{Controller, Dispatcher, HttpServer, RequestContext};
pub use lifecycle::Shutdown;
pub use routing::{handler, Params, RouteOptions, WebSocketOptions};
