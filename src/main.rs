//! Switchyard demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────▶ net::Listener ──▶ http::server ──▶ http::dispatcher
//!                                                      │
//!                       ┌──────────────────────────────┼──────────────────┐
//!                       ▼                              ▼                  ▼
//!                routing::router               http::controller    websocket::registry
//!             (flags, templates)           (one response slot)    (sessions per key)
//!
//!     Cross-cutting: config (reload), security (restrictions),
//!                    observability (tracing, stats, errors), lifecycle (shutdown)
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use clap::Parser;
use serde_json::json;

use switchyard::config::{load_config, ConfigWatcher, ServerConfig};
use switchyard::lifecycle::{spawn_signal_handler, Shutdown};
use switchyard::net::Listener;
use switchyard::observability::{logging, metrics};
use switchyard::routing::{handler, initializer, RouteOptions, WebSocketOptions};
use switchyard::websocket::{ConnectionRegistry, Payload, SessionHandle, SocketListener};
use switchyard::{AppError, Application, HttpServer};

#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(about = "HTTP application server dispatch core", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Reload the configuration file when it changes.
    #[arg(short, long)]
    watch: bool,

    /// Force debug mode.
    #[arg(long)]
    debug: bool,
}

/// Relays every message to the other clients of the registry.
struct Chat;

impl SocketListener for Chat {
    fn on_open(&self, registry: &ConnectionRegistry, client: &SessionHandle) {
        client.send(json!({ "type": "welcome", "id": client.id(), "online": registry.online() }));
    }

    fn on_message(&self, registry: &ConnectionRegistry, client: &SessionHandle, message: Payload) {
        registry.send(message, None, &[client.id().to_string()]);
    }
}

fn build(config: ServerConfig) -> Result<Arc<Application>, switchyard::RouteError> {
    let app = Application::builder(config)
        .route(
            "/",
            handler(|ctl, _| async move {
                ctl.plain("switchyard");
                Ok(())
            }),
            RouteOptions::new(),
        )
        .route(
            "/api/echo/",
            handler(|ctl, _| async move {
                let body = ctl.context().json().cloned().unwrap_or_default();
                ctl.json(&json!({ "echo": body }))?;
                Ok(())
            }),
            RouteOptions::new().flags(["json"]),
        )
        .route(
            "/api/users/{id}/",
            handler(|ctl, params| async move {
                let id: u64 = params
                    .parse(0)
                    .ok_or_else(|| AppError::msg("user id must be numeric"))?;
                ctl.json(&json!({ "id": id }))?;
                Ok(())
            }),
            RouteOptions::new(),
        )
        .route(
            "#404",
            handler(|ctl, _| async move {
                ctl.json(&json!({ "error": "not found" }))?;
                Ok(())
            }),
            RouteOptions::new(),
        )
        .route(
            "#500",
            handler(|ctl, _| async move {
                ctl.json(&json!({ "error": "internal error" }))?;
                Ok(())
            }),
            RouteOptions::new(),
        )
        .websocket(
            "/live/",
            initializer(|_registry, _params| Chat),
            WebSocketOptions::new().flags(["json"]).allow(["*"]),
        )
        .build()?;

    let weak: Weak<Application> = Arc::downgrade(&app);
    app.inject(move |routes| {
        routes.add_web_route(
            "/usage/",
            handler(move |ctl, _| {
                let app = weak.clone();
                async move {
                    match app.upgrade() {
                        Some(app) => ctl.json(&app.usage())?,
                        None => ctl.status_page(503),
                    };
                    Ok(())
                }
            }),
            RouteOptions::new(),
        )?;
        Ok(())
    })?;

    Ok(app)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    config.debug |= cli.debug;

    logging::init_tracing(Some(&config.observability.log_level), config.debug);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let app = build(config)?;

    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::start(path)?;
            let app = Arc::clone(&app);
            tokio::spawn(async move {
                while let Some(mut next) = updates.recv().await {
                    let running = app.config().listener.clone();
                    if next.listener.bind_address != running.bind_address {
                        tracing::warn!(
                            running = %running.bind_address,
                            requested = %next.listener.bind_address,
                            "Listener changes require a restart"
                        );
                    }
                    next.listener = running;
                    app.apply_config(next);
                }
            });
            Some(watcher)
        }
        _ => None,
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    HttpServer::new(app).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
