//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher, controllers, connection registries produce:
//!     → metrics.rs (request/response counters, pending gauge)
//!     → events.rs (lifecycle events to registered observers)
//!     → errors.rs (bounded log of application errors)
//!     → logging.rs (structured tracing output)
//!
//! Consumers:
//!     → Usage snapshot (Application::usage)
//!     → Metrics endpoint (Prometheus scrape)
//!     → stdout
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every event via the request context
//! - Counters are atomic increments; observers run inline

pub mod errors;
pub mod events;
pub mod logging;
pub mod metrics;

pub use errors::{ErrorEntry, ErrorLog};
pub use events::{LifecycleEvent, LifecycleObserver, Notifier, TracingObserver};
pub use metrics::{RequestStat, ResponseStat, Stats, StatsSnapshot};
