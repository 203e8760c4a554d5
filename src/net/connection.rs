//! Live connection registry for graceful shutdown.
//!
//! # Responsibilities
//! - Number connections for log correlation
//! - Count open connections
//! - Let shutdown wait for the count to reach zero, up to a deadline

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Shared {
    open: AtomicUsize,
    sequence: AtomicU64,
    idle: Notify,
}

/// Counts open connections; cloned into every connection task.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    shared: Arc<Shared>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection from `peer`; it stays open until the handle drops.
    pub fn open(&self, peer: SocketAddr) -> LiveConnection {
        self.shared.open.fetch_add(1, Ordering::SeqCst);
        let number = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(connection = number, peer = %peer, "Connection opened");
        LiveConnection {
            shared: Arc::clone(&self.shared),
            number,
            peer,
        }
    }

    pub fn open_count(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Resolve once no connection is open.
    pub async fn idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.open_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait for open connections to finish, giving up after `deadline`.
    ///
    /// Returns `false` when some were still open at the deadline.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let open = self.open_count();
        if open == 0 {
            return true;
        }
        tracing::info!(open, deadline_secs = deadline.as_secs(), "Waiting for open connections");
        if tokio::time::timeout(deadline, self.idle()).await.is_ok() {
            return true;
        }
        tracing::warn!(open = self.open_count(), "Connections still open at shutdown deadline");
        false
    }
}

/// An open connection; closes its tracker entry on drop.
#[derive(Debug)]
pub struct LiveConnection {
    shared: Arc<Shared>,
    number: u64,
    peer: SocketAddr,
}

impl LiveConnection {
    /// Sequence number, unique per tracker.
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        if self.shared.open.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.idle.notify_waiters();
        }
        tracing::trace!(connection = self.number, peer = %self.peer, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn test_open_and_close_counts() {
        let tracker = ConnectionTracker::new();
        let a = tracker.open(peer());
        let b = tracker.open(peer());
        assert_eq!(tracker.open_count(), 2);
        assert_ne!(a.number(), b.number());

        drop(a);
        assert_eq!(tracker.open_count(), 1);
        drop(b);
        assert_eq!(tracker.open_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_returns_when_last_connection_closes() {
        let tracker = ConnectionTracker::new();
        let live = tracker.open(peer());

        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.drain(Duration::from_secs(5)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(live);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_stops_at_deadline() {
        let tracker = ConnectionTracker::new();
        let _live = tracker.open(peer());
        assert!(!tracker.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_drain_without_connections() {
        assert!(ConnectionTracker::new().drain(Duration::ZERO).await);
    }
}
