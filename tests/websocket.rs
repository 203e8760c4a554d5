//! End-to-end tests over a real listener: HTTP/1.1 and WebSocket sessions.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::{config, eventually, serve};
use switchyard::error::SessionError;
use switchyard::http::RequestContext;
use switchyard::observability::RequestStat;
use switchyard::routing::{authorizer, initializer, Authorization};
use switchyard::websocket::{ConnectionRegistry, Payload, SessionHandle, SocketListener};
use switchyard::{handler, Application, RouteOptions, WebSocketOptions};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relays messages to everyone but the sender and records errors.
#[derive(Default)]
struct Relay {
    errors: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Vec<String>>>,
}

impl SocketListener for Relay {
    fn on_message(&self, registry: &ConnectionRegistry, client: &SessionHandle, message: Payload) {
        registry.send(message, None, &[client.id().to_string()]);
    }

    fn on_close(&self, _registry: &ConnectionRegistry, client: &SessionHandle) {
        self.closed.lock().unwrap().push(client.id().to_string());
    }

    fn on_error(&self, _registry: &ConnectionRegistry, error: &SessionError, _client: Option<&SessionHandle>) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

async fn connect(addr: std::net::SocketAddr, path: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{}{}", addr, path)).await.unwrap();
    client
}

async fn next_text(client: &mut Client) -> String {
    let message = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("no message")
        .expect("stream ended")
        .unwrap();
    message.to_text().unwrap().to_string()
}

fn online(app: &Application, key: &str) -> usize {
    app.hub().get(key).map(|r| r.online()).unwrap_or(0)
}

#[tokio::test]
async fn test_plain_request_over_tcp() {
    let app = Application::builder(config())
        .route(
            "/",
            handler(|ctl, _| async move {
                ctl.plain("home");
                Ok(())
            }),
            RouteOptions::new(),
        )
        .build()
        .unwrap();
    let (addr, shutdown) = serve(app).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();

    assert!(raw.starts_with("HTTP/1.1 200"));
    assert!(raw.to_lowercase().contains("x-request-id:"));
    assert!(raw.ends_with("home"));
    shutdown.trigger();
}

#[tokio::test]
async fn test_blocked_request_drops_connection() {
    let app = Application::builder(config()).build().unwrap();
    let (addr, shutdown) = serve(Arc::clone(&app)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n{}")
        .await
        .unwrap();
    let mut raw = String::new();
    let _ = stream.read_to_string(&mut raw).await;

    assert!(!raw.starts_with("HTTP/1.1 2"));
    assert_eq!(app.stats().request_count(RequestStat::Blocked), 1);
    shutdown.trigger();
}

#[tokio::test]
async fn test_messages_relay_between_clients() {
    let relay = Relay::default();
    let closed = Arc::clone(&relay.closed);
    let relay = Arc::new(Mutex::new(Some(relay)));

    let app = Application::builder(config())
        .websocket(
            "/live/",
            initializer(move |_registry, _params| {
                relay.lock().unwrap().take().unwrap_or_default()
            }),
            WebSocketOptions::new().allow(["*"]),
        )
        .build()
        .unwrap();
    let (addr, shutdown) = serve(Arc::clone(&app)).await;

    let mut alice = connect(addr, "/live/").await;
    let mut bob = connect(addr, "/live/").await;
    assert!(eventually(|| online(&app, "/live/") == 2).await);

    alice.send(Message::text("hello")).await.unwrap();
    assert_eq!(next_text(&mut bob).await, "hello");

    bob.close(None).await.unwrap();
    assert!(eventually(|| online(&app, "/live/") == 1).await);
    assert!(eventually(|| closed.lock().unwrap().len() == 1).await);

    let registry = app.hub().get("/live/").unwrap();
    assert_eq!(registry.broadcast("to all"), 1);
    assert_eq!(next_text(&mut alice).await, "to all");

    shutdown.trigger();
}

#[tokio::test]
async fn test_oversized_frame_is_reported_not_fatal() {
    let relay = Relay::default();
    let errors = Arc::clone(&relay.errors);
    let relay = Arc::new(Mutex::new(Some(relay)));

    let app = Application::builder(config())
        .websocket(
            "/small/",
            initializer(move |_registry, _params| {
                relay.lock().unwrap().take().unwrap_or_default()
            }),
            WebSocketOptions::new().allow(["*"]).max_size(4),
        )
        .build()
        .unwrap();
    let (addr, shutdown) = serve(Arc::clone(&app)).await;

    let mut sender = connect(addr, "/small/").await;
    let mut receiver = connect(addr, "/small/").await;
    assert!(eventually(|| online(&app, "/small/") == 2).await);

    sender.send(Message::text("0123456789")).await.unwrap();
    assert!(eventually(|| errors.lock().unwrap().len() == 1).await);
    assert!(errors.lock().unwrap()[0].contains("10 > 4"));

    sender.send(Message::text("ok")).await.unwrap();
    assert_eq!(next_text(&mut receiver).await, "ok");

    shutdown.trigger();
}

#[tokio::test]
async fn test_json_socket_closes_on_plain_text() {
    let app = Application::builder(config())
        .websocket(
            "/events/",
            initializer(|_registry, _params| Relay::default()),
            WebSocketOptions::new().flags(["json"]).allow(["*"]),
        )
        .build()
        .unwrap();
    let (addr, shutdown) = serve(Arc::clone(&app)).await;

    let mut client = connect(addr, "/events/").await;
    assert!(eventually(|| online(&app, "/events/") == 1).await);

    client.send(Message::text("not json")).await.unwrap();
    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());
    assert!(eventually(|| online(&app, "/events/") == 0).await);

    shutdown.trigger();
}

#[tokio::test]
async fn test_membership_selects_registry() {
    let app = Application::builder(config())
        .authorizer(authorizer(|ctx: Arc<RequestContext>| async move {
            match ctx.header("authorization") {
                Some("token") => Authorization::logged(1u64),
                _ => Authorization::unlogged(),
            }
        }))
        .websocket(
            "/room/",
            initializer(|_registry, _params| Relay::default()),
            WebSocketOptions::new().flags(["logged"]).allow(["*"]),
        )
        .websocket(
            "/room/",
            initializer(|_registry, _params| Relay::default()),
            WebSocketOptions::new().flags(["unlogged"]).allow(["*"]),
        )
        .build()
        .unwrap();
    let (addr, shutdown) = serve(Arc::clone(&app)).await;

    let mut signed = format!("ws://{}/room/", addr).into_client_request().unwrap();
    signed
        .headers_mut()
        .insert("authorization", "token".parse().unwrap());
    let (_member, _) = connect_async(signed).await.unwrap();
    let _guest = connect(addr, "/room/").await;

    assert!(eventually(|| online(&app, "/room/#logged") == 1).await);
    assert!(eventually(|| online(&app, "/room/#unlogged") == 1).await);
    assert_eq!(app.usage().registries.len(), 2);

    shutdown.trigger();
}

#[tokio::test]
async fn test_broadcast_stays_within_membership_registry() {
    let app = Application::builder(config())
        .authorizer(authorizer(|ctx: Arc<RequestContext>| async move {
            match ctx.header("authorization") {
                Some("token") => Authorization::logged(1u64),
                _ => Authorization::unlogged(),
            }
        }))
        .websocket(
            "/room/",
            initializer(|_registry, _params| Relay::default()),
            WebSocketOptions::new().flags(["logged"]).allow(["*"]),
        )
        .websocket(
            "/room/",
            initializer(|_registry, _params| Relay::default()),
            WebSocketOptions::new().flags(["unlogged"]).allow(["*"]),
        )
        .build()
        .unwrap();
    let (addr, shutdown) = serve(Arc::clone(&app)).await;

    let mut signed = format!("ws://{}/room/", addr).into_client_request().unwrap();
    signed
        .headers_mut()
        .insert("authorization", "token".parse().unwrap());
    let (mut member, _) = connect_async(signed).await.unwrap();
    let mut guest = connect(addr, "/room/").await;
    assert!(eventually(|| online(&app, "/room/#logged") == 1).await);
    assert!(eventually(|| online(&app, "/room/#unlogged") == 1).await);

    let members = app.hub().get("/room/#logged").unwrap();
    assert_eq!(members.broadcast("members only"), 1);
    assert_eq!(next_text(&mut member).await, "members only");
    let leaked = tokio::time::timeout(Duration::from_millis(200), guest.next()).await;
    assert!(leaked.is_err());

    let guests = app.hub().get("/room/#unlogged").unwrap();
    assert_eq!(guests.broadcast("guests"), 1);
    assert_eq!(next_text(&mut guest).await, "guests");

    shutdown.trigger();
}

#[tokio::test]
async fn test_unknown_socket_route_is_refused() {
    let app = Application::builder(config())
        .websocket(
            "/live/",
            initializer(|_registry, _params| Relay::default()),
            WebSocketOptions::new().allow(["*"]),
        )
        .build()
        .unwrap();
    let (addr, shutdown) = serve(app).await;

    assert!(connect_async(format!("ws://{}/other/", addr)).await.is_err());
    shutdown.trigger();
}

#[tokio::test]
async fn test_origin_must_match_host_without_allow_list() {
    let app = Application::builder(config())
        .websocket(
            "/live/",
            initializer(|_registry, _params| Relay::default()),
            WebSocketOptions::new(),
        )
        .build()
        .unwrap();
    let (addr, shutdown) = serve(app).await;

    let mut foreign = format!("ws://{}/live/", addr).into_client_request().unwrap();
    foreign
        .headers_mut()
        .insert("origin", "http://evil.example".parse().unwrap());
    assert!(connect_async(foreign).await.is_err());

    let mut local = format!("ws://{}/live/", addr).into_client_request().unwrap();
    local
        .headers_mut()
        .insert("origin", format!("http://{}", addr).parse().unwrap());
    assert!(connect_async(local).await.is_ok());

    shutdown.trigger();
}
