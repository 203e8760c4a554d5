//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (HTTP or upgrade):
//!     → restrictions.rs (client IP, header patterns)
//!     → violation: count `restriction`, drop the connection
//!     → otherwise: continue to redirects and routing
//! ```
//!
//! # Design Decisions
//! - Fail closed: a violation never reaches application code
//! - Restrictions are rebuilt on config reload and swapped atomically

pub mod restrictions;

pub use restrictions::{Restrictions, Violation};
