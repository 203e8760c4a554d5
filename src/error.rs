//! Error taxonomy for the dispatch core.
//!
//! # Design Decisions
//! - Registration problems surface as `RouteError` at start-up, never at request time
//! - `AppError` is the only error application code hands back; the dispatcher
//!   converts it into a `#500` (or `#501`) dispatch
//! - `DispatchError` means "drop the transport": hyper closes the connection
//!   when the service future resolves to an error

use std::io;

use thiserror::Error;

/// Invalid route declaration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("mixed route cannot contain dynamic path: {0}")]
    MixedDynamic(String),

    #[error("multipart mishmash, mmr and upload declared together: {0}")]
    MixedUpload(String),

    #[error("malformed route template: {0}")]
    Template(String),
}

/// Failure while reading or decoding a request body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("body stream failed: {0}")]
    Stream(String),

    #[error("part exceeds {0} bytes")]
    Overflow(usize),

    #[error("multipart boundary missing from content type")]
    MissingBoundary,

    #[error("malformed multipart payload: {0}")]
    Multipart(String),

    #[error("I/O error while storing upload: {0}")]
    Io(#[from] io::Error),
}

/// Rejected WebSocket upgrade.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("origin {0:?} is not allowed")]
    Origin(String),

    #[error("required sub-protocol {0:?} was not offered")]
    Protocol(String),

    #[error("unsupported websocket version {0:?}")]
    Version(String),

    #[error("sec-websocket-key header missing")]
    MissingKey,

    #[error("no websocket route matches {0}")]
    NoRoute(String),

    #[error("websocket support is disabled")]
    Disabled,

    #[error("connection cannot be upgraded")]
    NotUpgradable,
}

/// Error raised inside a live WebSocket session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("maximum request length exceeded ({size} > {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("JSON parser: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("{0}")]
    Message(String),
}

/// Error returned by handlers, partial hooks and file routes.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Message(String),

    #[error("not implemented")]
    NotImplemented,

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Body(#[from] BodyError),
}

impl AppError {
    /// Build a plain message error.
    pub fn msg(message: impl Into<String>) -> Self {
        AppError::Message(message.into())
    }

    /// System route that should answer this error.
    pub fn system_route(&self) -> &'static str {
        match self {
            AppError::NotImplemented => "#501",
            _ => "#500",
        }
    }
}

/// Connection-level outcome; the transport is destroyed without a response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request rejected by restrictions")]
    Restricted,

    #[error("request blocked: no route accepts {method} {path}")]
    Blocked { method: String, path: String },

    #[error("controller canceled without responding")]
    Canceled,

    #[error("websocket upgrade rejected: {0}")]
    Upgrade(#[from] HandshakeError),

    #[error("body stream failed: {0}")]
    Body(#[from] BodyError),
}
