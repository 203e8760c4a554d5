//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route declaration (start-up or hot injection):
//!     template + flags + options
//!     → matcher.rs (parse template, shape priority)
//!     → flags.rs (normalize flags, flag priority)
//!     → router.rs (insert, stable sort by priority)
//!
//! Request lookup:
//!     split path + subdomain + derived flags
//!     → router.rs (scan sorted routes)
//!     → matcher.rs (structural path match)
//!     → flags.rs (tri-state flag compare)
//!     → Return: first MATCH, plus "unauthorized" marker
//! ```
//!
//! # Design Decisions
//! - Registry is an explicit value, never a process-wide singleton
//! - Priority is fixed at registration time
//! - First match wins (ordered by priority, ties by registration order)

pub mod flags;
pub mod handler;
pub mod matcher;
pub mod router;

pub use handler::{
    authorizer, handler, initializer, partial, AppResult, Authorization, Authorizer,
    FileValidator, Handler, Params, PartialHook, PrefixFn, RouteFilter, SocketInitializer,
    XssDetector,
};
pub use matcher::Template;
pub use router::{
    is_static_path, FileRoute, Lookup, Redirect, RouteDefaults, RouteOptions, RouteRegistry,
    WebRoute, WebSocketOptions, WebSocketRoute,
};
