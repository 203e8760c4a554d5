//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper http1, request-id + trace layers)
//!     → dispatcher.rs (request lifecycle)
//!         → context.rs (per-request state)
//!         → body.rs / multipart.rs (body collection and decoding)
//!         → controller.rs (handler surface, single response slot)
//!         → response.rs (response builders, common headers)
//!     → Send to client
//! ```

pub mod body;
pub mod context;
pub mod controller;
pub mod dispatcher;
pub mod multipart;
pub mod response;
pub mod server;

pub use context::{RequestBody, RequestContext, X_REQUEST_ID};
pub use controller::{Controller, EventStream, MixedStream, ResponseSlot, ViewRenderer};
pub use dispatcher::Dispatcher;
pub use multipart::{BufferedDecoder, MultipartDecoder, UploadedFile};
pub use server::HttpServer;
