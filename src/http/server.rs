//! HTTP server: accept loop and per-connection service stack.
//!
//! # Responsibilities
//! - Accept connections through the bounded listener
//! - Serve each connection with hyper's HTTP/1.1 stack, upgrades enabled
//! - Wrap the dispatcher in request-id and trace middleware
//! - Stop accepting on shutdown and drain live connections
//!
//! # Data Flow
//! ```text
//! Listener::accept (capacity slot held for the connection)
//!     → http1 connection (with_upgrades)
//!     → SetRequestId → PropagateRequestId → Trace
//!     → ConnectionService → Dispatcher::handle
//!     → Ok(response) written / Err(DispatchError) drops the connection
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tower::{Service, ServiceBuilder};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::app::Application;
use crate::error::DispatchError;
use crate::http::dispatcher::Dispatcher;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::{Accepted, ConnectionTracker, Listener, ListenerError};

/// Tower service bound to one accepted connection.
#[derive(Clone)]
struct ConnectionService {
    dispatcher: Dispatcher,
    peer: SocketAddr,
}

impl Service<Request<Incoming>> for ConnectionService {
    type Response = Response<Body>;
    type Error = DispatchError;
    type Future = BoxFuture<'static, Result<Response<Body>, DispatchError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Incoming>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        let peer = self.peer;
        Box::pin(async move {
            let result = dispatcher.handle(request.map(Body::new), peer).await;
            if let Err(e) = &result {
                tracing::debug!(peer = %peer, error = %e, "Dropping connection");
            }
            result
        })
    }
}

/// HTTP server for the application.
pub struct HttpServer {
    dispatcher: Dispatcher,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new(app: Arc<Application>) -> Self {
        Self {
            dispatcher: Dispatcher::new(app),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ListenerError> {
        let app = Arc::clone(self.dispatcher.app());
        let config = app.config();

        let temp_dir = &config.uploads.temp_directory;
        if let Err(e) = tokio::fs::create_dir_all(temp_dir).await {
            tracing::warn!(path = %temp_dir.display(), error = %e, "Upload directory unavailable");
        }

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, name = %config.name, "HTTP server starting");
        }

        let mut stop = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => self.spawn_connection(accepted, shutdown.subscribe()),
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        drop(listener);
        tracing::info!("HTTP server stopped accepting");

        let deadline = Duration::from_secs(app.config().timeouts.shutdown_secs);
        self.tracker.drain(deadline).await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_connection(&self, accepted: Accepted, mut stop: ShutdownSignal) {
        let Accepted { stream, peer, slot } = accepted;
        let live = self.tracker.open(peer);
        let service = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .service(ConnectionService {
                dispatcher: self.dispatcher.clone(),
                peer,
            });

        tokio::spawn(async move {
            let _slot = slot;
            let connection = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
                .with_upgrades();
            tokio::pin!(connection);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = stop.recv() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };

            if let Err(e) = result {
                tracing::debug!(connection = live.number(), peer = %peer, error = %e, "Connection ended with error");
            }
            drop(live);
        });
    }
}
