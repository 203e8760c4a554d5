//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (wait for a capacity slot, accept)
//!     → connection.rs (open until the connection task ends)
//!     → Hand off to HTTP layer
//!
//! Shutdown:
//!     stop accepting → ConnectionTracker::drain(deadline)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionTracker, LiveConnection};
pub use listener::{Accepted, CapacitySlot, Listener, ListenerError};
