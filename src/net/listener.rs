//! Bounded TCP accept.
//!
//! # Responsibilities
//! - Bind the configured listener address
//! - Hold one capacity slot per open connection
//! - Stop accepting (without failing) while every slot is taken

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::schema::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    #[error("listener capacity closed")]
    Closed,
}

/// One accepted connection and the capacity slot it occupies.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub slot: CapacitySlot,
}

/// Returned to the listener when dropped.
#[derive(Debug)]
pub struct CapacitySlot {
    _permit: OwnedSemaphorePermit,
}

/// TCP listener capped at `listener.max_connections` open connections.
pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind {
            address: config.bind_address.clone(),
            source,
        };
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            bind_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        let socket = TcpListener::bind(addr).await.map_err(bind_error)?;
        Ok(Self::from_tcp(socket, config.max_connections))
    }

    /// Wrap a socket that is already bound, e.g. to an ephemeral port.
    pub fn from_tcp(socket: TcpListener, capacity: usize) -> Self {
        if let Ok(address) = socket.local_addr() {
            tracing::info!(address = %address, capacity, "Listening");
        }
        Self {
            socket,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot, then for the next client.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;

        tracing::trace!(peer = %peer, free_slots = self.slots.available_permits(), "Client accepted");
        Ok(Accepted {
            stream,
            peer,
            slot: CapacitySlot { _permit: permit },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
