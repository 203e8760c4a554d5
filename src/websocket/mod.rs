//! WebSocket subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request
//!     → handshake.rs (origin, protocol, version, key; 101 response)
//!     → registry.rs (get-or-create registry for the resolved key)
//!     → session.rs (socket task: frames in, commands out)
//!     → frame.rs (classify incoming, encode outgoing)
//! ```
//!
//! # Design Decisions
//! - Framing is delegated to tokio-tungstenite
//! - One registry per resolved path + flags, created once and initialized once
//! - Sessions outlive the upgrade request; the socket task owns the stream

pub mod frame;
pub mod handshake;
pub mod registry;
pub mod session;

pub use frame::{Payload, PayloadKind};
pub use handshake::Accepted;
pub use registry::{
    registry_key, ConnectionHub, ConnectionRegistry, NoopListener, RegistryUsage, SocketListener,
};
pub use session::{Command, SessionHandle};
