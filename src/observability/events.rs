//! Lifecycle events and their observers.
//!
//! Observers are registered at build time and called synchronously on the
//! task that produced the event. Keep them cheap.

use std::sync::Arc;

use crate::http::context::RequestContext;

/// Something that happened to a request or WebSocket connection.
#[derive(Debug)]
pub enum LifecycleEvent<'a> {
    RequestBegin {
        ctx: &'a RequestContext,
    },
    /// `status` is `None` when the request was canceled without a response.
    RequestEnd {
        ctx: &'a RequestContext,
        status: Option<u16>,
    },
    /// A handler is about to run.
    Controller {
        ctx: &'a RequestContext,
        route: &'a str,
    },
    WebSocketOpen {
        key: &'a str,
        id: &'a str,
    },
    WebSocketClose {
        key: &'a str,
        id: &'a str,
    },
    WebSocketError {
        key: &'a str,
        id: Option<&'a str>,
        error: &'a str,
    },
    WebSocketSend {
        key: &'a str,
        recipients: usize,
    },
}

pub trait LifecycleObserver: Send + Sync {
    fn notify(&self, event: &LifecycleEvent<'_>);
}

/// Fan-out to every registered observer.
#[derive(Clone, Default)]
pub struct Notifier {
    observers: Arc<Vec<Arc<dyn LifecycleObserver>>>,
}

impl Notifier {
    pub fn new(observers: Vec<Arc<dyn LifecycleObserver>>) -> Self {
        Self {
            observers: Arc::new(observers),
        }
    }

    pub fn notify(&self, event: LifecycleEvent<'_>) {
        for observer in self.observers.iter() {
            observer.notify(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Writes every event to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn notify(&self, event: &LifecycleEvent<'_>) {
        match event {
            LifecycleEvent::RequestBegin { ctx } => tracing::debug!(
                request_id = %ctx.request_id(),
                method = %ctx.method(),
                path = %ctx.raw_path(),
                "Request begin"
            ),
            LifecycleEvent::RequestEnd { ctx, status } => tracing::debug!(
                request_id = %ctx.request_id(),
                status = ?status,
                "Request end"
            ),
            LifecycleEvent::Controller { ctx, route } => tracing::debug!(
                request_id = %ctx.request_id(),
                route = %route,
                "Controller"
            ),
            LifecycleEvent::WebSocketOpen { key, id } => {
                tracing::debug!(key = %key, connection_id = %id, "WebSocket open")
            }
            LifecycleEvent::WebSocketClose { key, id } => {
                tracing::debug!(key = %key, connection_id = %id, "WebSocket close")
            }
            LifecycleEvent::WebSocketError { key, id, error } => {
                tracing::debug!(key = %key, connection_id = ?id, error = %error, "WebSocket error")
            }
            LifecycleEvent::WebSocketSend { key, recipients } => {
                tracing::trace!(key = %key, recipients = recipients, "WebSocket send")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl LifecycleObserver for Recorder {
        fn notify(&self, event: &LifecycleEvent<'_>) {
            if let LifecycleEvent::WebSocketOpen { key, id } = event {
                self.0.lock().unwrap().push(format!("{}:{}", key, id));
            }
        }
    }

    #[test]
    fn test_fan_out() {
        let recorder = Arc::new(Recorder::default());
        let notifier = Notifier::new(vec![
            recorder.clone() as Arc<dyn LifecycleObserver>,
            Arc::new(TracingObserver),
        ]);
        notifier.notify(LifecycleEvent::WebSocketOpen { key: "/a/", id: "x" });
        assert_eq!(notifier.len(), 2);
        assert_eq!(*recorder.0.lock().unwrap(), vec!["/a/:x".to_string()]);
    }
}
