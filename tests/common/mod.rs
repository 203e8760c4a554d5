//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};

use switchyard::config::ServerConfig;
use switchyard::net::Listener;
use switchyard::{Application, DispatchError, Dispatcher, HttpServer, Shutdown};

pub const PEER: &str = "127.0.0.1:40000";

pub fn peer() -> SocketAddr {
    PEER.parse().unwrap()
}

/// Default configuration with the upload directory in place.
pub fn config() -> ServerConfig {
    let config = ServerConfig::default();
    std::fs::create_dir_all(&config.uploads.temp_directory).unwrap();
    config
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("host", "localhost")
        .body(Body::empty())
        .unwrap()
}

pub fn request(method: &str, path: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("host", "localhost")
        .header("content-type", content_type)
        .body(body.into())
        .unwrap()
}

pub fn post(path: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    request("POST", path, content_type, body)
}

/// Run one request through a fresh dispatcher.
pub async fn dispatch(app: &Arc<Application>, request: Request<Body>) -> Result<Response<Body>, DispatchError> {
    Dispatcher::new(Arc::clone(app)).handle(request, peer()).await
}

pub async fn text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Status and body of a request that must produce a response.
pub async fn call(app: &Arc<Application>, request: Request<Body>) -> (u16, String) {
    let response = dispatch(app, request).await.expect("request dropped");
    let status = response.status().as_u16();
    (status, text(response).await)
}

/// Serve `app` on an ephemeral port.
pub async fn serve(app: Arc<Application>) -> (SocketAddr, Shutdown) {
    let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, 64);
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(app);
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, stop).await;
    });
    (addr, shutdown)
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
