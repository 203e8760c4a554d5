//! Request lifecycle: from parsed head to exactly one response.
//!
//! # Data Flow
//! ```text
//! Request head
//!     → upgrade? → restrictions → authorize → WebSocket route → 101 + session task
//!     → host redirect (forwarding)
//!     → restrictions (violation drops the connection)
//!     → static extension? → file routes
//!     → route filter (rejection drops the connection, panic → #500)
//!     → derive flags, notify request-begin
//!     → GET/OPTIONS/DELETE → prepare
//!     → POST/PUT → relaxed lookup → body (buffered / form-data / mixed) → prepare
//!     → anything else (HEAD, PATCH, ...) → blocked
//!     → prepare: authorize → strict lookup → execute
//!     → execute: partial barrier → handler, raced against the route timeout
//!     → notify request-end
//! ```
//!
//! # Design Decisions
//! - One `ResponseSlot` per request; every retry (#500, #408) writes into it,
//!   so the first write wins and later ones are dropped
//! - Handlers run on their own task; a panic becomes `AppError::Panic` and a
//!   timed-out task is aborted
//! - A `DispatchError` tells the server to drop the connection

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Method, Request, Response};
use futures_util::future::join_all;
use futures_util::{FutureExt, StreamExt};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::app::Application;
use crate::config::ServerConfig;
use crate::error::{AppError, BodyError, DispatchError, HandshakeError};
use crate::http::body;
use crate::http::context::{RequestBody, RequestContext};
use crate::http::controller::{Controller, ResponseSlot};
use crate::http::multipart::{self, DecodeLimits};
use crate::http::response;
use crate::observability::events::{LifecycleEvent, Notifier};
use crate::observability::metrics::{RequestStat, ResponseStat};
use crate::routing::flags::{self, Encoding, RequestTraits};
use crate::routing::{is_static_path, AppResult, Authorization, Params, PartialHook, RouteRegistry, WebRoute};
use crate::websocket::frame::looks_like_json;
use crate::websocket::handshake;
use crate::websocket::registry::registry_key;
use crate::websocket::session::{self, SessionHandle};

/// Drives requests against the application's current state.
#[derive(Clone)]
pub struct Dispatcher {
    app: Arc<Application>,
}

enum Step {
    Respond(Response<Body>),
    Redispatch,
}

impl Dispatcher {
    pub fn new(app: Arc<Application>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    /// Handle one request.
    pub async fn handle(
        &self,
        request: Request<Body>,
        peer: SocketAddr,
    ) -> Result<Response<Body>, DispatchError> {
        let config = self.app.config();
        let (mut parts, body) = request.into_parts();
        let ctx = Arc::new(RequestContext::new(&parts, peer));

        if handshake::is_upgrade_request(&parts.headers) {
            return self.upgrade(&mut parts, ctx, &config).await;
        }

        let routes = self.app.routes();
        let stats = self.app.stats();

        if routes.has_redirects() {
            if let Some(redirect) = routes.redirect_for(ctx.scheme(), ctx.host()) {
                let location = redirect.location(ctx.path_and_query());
                stats.response(ResponseStat::Forwarding);
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    location = %location,
                    status = redirect.status(),
                    "Host redirect"
                );
                return Ok(response::redirect(&location, redirect.permanent));
            }
        }

        self.restrict(&ctx)?;

        if is_static_path(ctx.path(), &config.static_files.accepts) {
            let response = self.serve_file(&routes, &ctx).await;
            return Ok(response::finalize(response, &config.name, config.debug));
        }

        let _pending = stats.track();
        stats.request(RequestStat::Web);
        let admitted = self.admit(&ctx)?;

        let query = ctx.query_string();
        let xss = !query.is_empty() && self.app.xss().is_some_and(|detect| detect(query));
        let prefix = self.app.prefix().and_then(|prefix| prefix(&ctx));
        let referer = routes.check_referer()
            && ctx
                .header("referer")
                .is_some_and(|r| !r.is_empty() && r.contains(ctx.host()));

        ctx.set_flags(flags::derive(&RequestTraits {
            method: ctx.method().as_str(),
            scheme: ctx.scheme(),
            content_type: ctx.content_type(),
            proxy: ctx.header("x-proxy") == Some(config.name.as_str()),
            accept: ctx.header("accept").unwrap_or_default(),
            debug: config.debug,
            prefix: prefix.as_deref(),
            xhr: ctx.is_xhr(),
            xss,
            referer,
        }));

        if ctx.is_xhr() {
            stats.request(RequestStat::Xhr);
        }
        if xss {
            stats.request(RequestStat::Xss);
        }

        let notifier = self.app.notifier();
        notifier.notify(LifecycleEvent::RequestBegin { ctx: &ctx });

        let result = if admitted {
            self.lifecycle(&routes, &ctx, body).await
        } else {
            self.fallback(&routes, &ctx, "#500", 500).await
        };

        notifier.notify(LifecycleEvent::RequestEnd {
            ctx: &ctx,
            status: result.as_ref().ok().map(|r| r.status().as_u16()),
        });

        if !ctx.files().is_empty() {
            tokio::spawn(remove_uploads(ctx.files().to_vec()));
        }

        result.map(|r| response::finalize(r, &config.name, config.debug))
    }

    fn restrict(&self, ctx: &RequestContext) -> Result<(), DispatchError> {
        let restrictions = self.app.restrictions();
        if restrictions.is_empty() {
            return Ok(());
        }
        let ip = ctx.ip();
        if let Err(violation) = restrictions.check(&ip, ctx.headers()) {
            self.app.stats().response(ResponseStat::Restriction);
            tracing::warn!(
                request_id = %ctx.request_id(),
                ip = %ip,
                violation = %violation,
                "Request restricted"
            );
            return Err(DispatchError::Restricted);
        }
        Ok(())
    }

    /// Run the route filter. `Ok(false)` means it panicked and the request
    /// goes to `#500`; a rejection drops the connection.
    fn admit(&self, ctx: &RequestContext) -> Result<bool, DispatchError> {
        let Some(filter) = self.app.route_filter() else {
            return Ok(true);
        };
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| filter(ctx))) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.app.stats().request(RequestStat::Blocked);
                Err(blocked(ctx))
            }
            Err(panic) => {
                let error = AppError::Panic(panic_text(panic.as_ref()));
                self.app.errors().report("route_filter", Some(ctx.raw_path()), &error);
                Ok(false)
            }
        }
    }

    async fn authorize(&self, ctx: &Arc<RequestContext>) -> Option<Authorization> {
        let authorizer = self.app.authorizer()?;
        let auth = match std::panic::AssertUnwindSafe(authorizer(Arc::clone(ctx)))
            .catch_unwind()
            .await
        {
            Ok(auth) => auth,
            Err(panic) => {
                let error = AppError::Panic(panic_text(panic.as_ref()));
                self.app.errors().report("authorize", Some(ctx.raw_path()), &error);
                Authorization::unlogged()
            }
        };
        ctx.authorize(auth.logged, auth.user.clone());
        ctx.push_flag(if auth.logged { flags::LOGGED } else { flags::UNLOGGED });
        Some(auth)
    }

    async fn lifecycle(
        &self,
        routes: &RouteRegistry,
        ctx: &Arc<RequestContext>,
        body: Body,
    ) -> Result<Response<Body>, DispatchError> {
        let stats = self.app.stats();
        let method = ctx.method();

        if method == Method::GET || method == Method::OPTIONS {
            stats.request(RequestStat::Get);
            return self.prepare(routes, ctx, None).await;
        }
        if method == Method::DELETE {
            stats.request(RequestStat::Delete);
            return self.prepare(routes, ctx, None).await;
        }
        if (method == Method::POST || method == Method::PUT) && routes.body_required() {
            return self.receive(routes, ctx, body).await;
        }

        stats.request(RequestStat::Blocked);
        Err(blocked(ctx))
    }

    /// Pick a candidate route for a body request and decode the body for it.
    async fn receive(
        &self,
        routes: &RouteRegistry,
        ctx: &Arc<RequestContext>,
        body: Body,
    ) -> Result<Response<Body>, DispatchError> {
        let stats = self.app.stats();
        let lookup = routes.lookup(ctx.segments(), ctx.subdomain(), &ctx.flags(), true);
        let Some(route) = lookup.route else {
            stats.request(RequestStat::Blocked);
            return Err(blocked(ctx));
        };

        match flags::encoding(ctx.content_type()) {
            Encoding::Multipart => {
                stats.request(RequestStat::Upload);
                self.receive_form_data(routes, ctx, route, body).await
            }
            Encoding::Mixed => {
                stats.request(RequestStat::Upload);
                self.receive_mixed(routes, ctx, route, body).await
            }
            Encoding::Buffered => {
                stats.request(if ctx.method() == Method::PUT {
                    RequestStat::Put
                } else {
                    RequestStat::Post
                });
                self.receive_buffered(routes, ctx, route, body).await
            }
        }
    }

    fn limits(&self, route: &WebRoute) -> DecodeLimits {
        DecodeLimits {
            max_size: route.max_size,
            temp_dir: self.app.config().uploads.temp_directory.clone(),
            xss: self.app.xss().cloned(),
        }
    }

    fn detect_xss(&self, ctx: &RequestContext, text: &str) -> bool {
        if ctx.is_xss() {
            return false;
        }
        match self.app.xss() {
            Some(detect) if detect(text) => {
                ctx.push_flag(flags::XSS);
                self.app.stats().request(RequestStat::Xss);
                true
            }
            _ => false,
        }
    }

    async fn receive_buffered(
        &self,
        routes: &RouteRegistry,
        ctx: &Arc<RequestContext>,
        route: Arc<WebRoute>,
        body: Body,
    ) -> Result<Response<Body>, DispatchError> {
        let collected = body::collect(body, route.max_size).await?;

        if collected.overflow {
            ctx.mark_overflow();
            tracing::debug!(request_id = %ctx.request_id(), limit = route.max_size, "Request body too large");
            return self.fallback(routes, ctx, "#431", 431).await;
        }
        if collected.is_empty() {
            return self.prepare(routes, ctx, Some(route)).await;
        }

        let text = collected.text();
        let decoded = if route.is_raw() {
            if self.detect_xss(ctx, &text) {
                return self.fallback(routes, ctx, "#400", 400).await;
            }
            RequestBody::Raw(text)
        } else if route.is_json() || ctx.has_flag(flags::JSON) {
            if !looks_like_json(&text) {
                return self.fallback(routes, ctx, "#400", 400).await;
            }
            match serde_json::from_str(&text) {
                Ok(value) => RequestBody::Json(value),
                Err(e) => {
                    tracing::debug!(request_id = %ctx.request_id(), error = %e, "Malformed JSON body");
                    return self.fallback(routes, ctx, "#400", 400).await;
                }
            }
        } else {
            if !ctx.content_type().contains("x-www-form-urlencoded") {
                return self.fallback(routes, ctx, "#400", 400).await;
            }
            if self.detect_xss(ctx, &text) {
                return self.fallback(routes, ctx, "#400", 400).await;
            }
            RequestBody::Form(body::parse_form(&collected.bytes))
        };

        ctx.set_body(decoded);
        self.prepare(routes, ctx, Some(route)).await
    }

    async fn receive_form_data(
        &self,
        routes: &RouteRegistry,
        ctx: &Arc<RequestContext>,
        route: Arc<WebRoute>,
        body: Body,
    ) -> Result<Response<Body>, DispatchError> {
        let boundary = match multipart::boundary(ctx.content_type()) {
            Ok(boundary) => boundary,
            Err(_) => return self.fallback(routes, ctx, "#400", 400).await,
        };

        let decoded = match self.app.decoder().decode(body, boundary, self.limits(&route)).await {
            Ok(decoded) => decoded,
            Err(BodyError::Stream(e)) => return Err(BodyError::Stream(e).into()),
            Err(e) => {
                tracing::debug!(request_id = %ctx.request_id(), error = %e, "Malformed multipart body");
                return self.fallback(routes, ctx, "#400", 400).await;
            }
        };

        if decoded.overflow {
            ctx.mark_overflow();
            return self.fallback(routes, ctx, "#431", 431).await;
        }
        if decoded.xss {
            remove_uploads(decoded.files).await;
            ctx.push_flag(flags::XSS);
            self.app.stats().request(RequestStat::Xss);
            return self.fallback(routes, ctx, "#400", 400).await;
        }

        ctx.set_body(RequestBody::Multipart {
            fields: decoded.fields,
            files: decoded.files,
        });
        self.prepare(routes, ctx, Some(route)).await
    }

    /// Run the route's handler once per part, then answer `END`.
    ///
    /// Mixed uploads skip authorization, partial hooks and the route timeout.
    async fn receive_mixed(
        &self,
        routes: &RouteRegistry,
        ctx: &Arc<RequestContext>,
        route: Arc<WebRoute>,
        body: Body,
    ) -> Result<Response<Body>, DispatchError> {
        let boundary = match multipart::boundary(ctx.content_type()) {
            Ok(boundary) => boundary,
            Err(_) => return self.fallback(routes, ctx, "#400", 400).await,
        };

        let mut parts = self
            .app
            .decoder()
            .decode_mixed(body, boundary, self.limits(&route));
        let (slot, rx) = ResponseSlot::new();

        while let Some(part) = parts.next().await {
            let part = match part {
                Ok(part) => part,
                Err(BodyError::Overflow(limit)) => {
                    ctx.mark_overflow();
                    tracing::debug!(request_id = %ctx.request_id(), limit, "Mixed part too large");
                    return self.fallback(routes, ctx, "#431", 431).await;
                }
                Err(BodyError::Stream(e)) => return Err(BodyError::Stream(e).into()),
                Err(e) => {
                    tracing::debug!(request_id = %ctx.request_id(), error = %e, "Malformed mixed body");
                    return self.fallback(routes, ctx, "#400", 400).await;
                }
            };

            let controller = Controller::new(
                Arc::clone(&route),
                Arc::clone(ctx),
                Arc::clone(&slot),
                Arc::clone(self.app.stats()),
                self.app.renderer().cloned(),
                Some(part),
            );
            self.app.notifier().notify(LifecycleEvent::Controller {
                ctx,
                route: &route.name,
            });
            let handler = Arc::clone(&route.handler);
            let joined = tokio::spawn(handler(controller, Params::default())).await;

            if let Some(error) = failure(joined) {
                self.app.errors().report(&route.name, Some(ctx.raw_path()), &error);
                if slot.is_done() {
                    break;
                }
                let (name, status) = system_fallback(&error);
                return self.fallback(routes, ctx, name, status).await;
            }
        }

        slot.respond(response::mixed_end());
        rx.await.map_err(|_| DispatchError::Canceled)
    }

    /// Authorize, resolve the final route and execute it.
    async fn prepare(
        &self,
        routes: &RouteRegistry,
        ctx: &Arc<RequestContext>,
        preselected: Option<Arc<WebRoute>>,
    ) -> Result<Response<Body>, DispatchError> {
        if self.authorize(ctx).await.is_some() {
            let lookup = routes.lookup(ctx.segments(), ctx.subdomain(), &ctx.flags(), false);
            return match lookup.route {
                Some(route) => self.execute(routes, ctx, Some(route), 200).await,
                None if lookup.unauthorized => self.fallback(routes, ctx, "#401", 401).await,
                None => self.fallback(routes, ctx, "#404", 404).await,
            };
        }

        let route = match preselected {
            Some(route) => Some(route),
            None => {
                routes
                    .lookup(ctx.segments(), ctx.subdomain(), &ctx.flags(), false)
                    .route
            }
        };

        match route {
            Some(route) => self.execute(routes, ctx, Some(route), 200).await,
            None if ctx.is_xss() => self.fallback(routes, ctx, "#400", 400).await,
            None => self.fallback(routes, ctx, "#404", 404).await,
        }
    }

    async fn fallback(
        &self,
        routes: &RouteRegistry,
        ctx: &Arc<RequestContext>,
        name: &str,
        status: u16,
    ) -> Result<Response<Body>, DispatchError> {
        self.execute(routes, ctx, routes.lookup_system(name), status).await
    }

    /// Run `route` (or write a plain status page when there is none) and
    /// follow error and timeout re-dispatches until a response exists.
    async fn execute(
        &self,
        routes: &RouteRegistry,
        ctx: &Arc<RequestContext>,
        route: Option<Arc<WebRoute>>,
        status: u16,
    ) -> Result<Response<Body>, DispatchError> {
        let stats = self.app.stats();
        let (slot, mut rx) = ResponseSlot::new();
        let mut route = route;
        let mut status = status;

        loop {
            if status >= 400 && route.as_ref().map_or(true, |r| r.is_system()) {
                if let Some(stat) = ResponseStat::error_status(status) {
                    stats.response(stat);
                }
            }

            let Some(current) = route.take() else {
                slot.respond(response::status_page(status));
                return rx.await.map_err(|_| DispatchError::Canceled);
            };

            let controller = Controller::new(
                Arc::clone(&current),
                Arc::clone(ctx),
                Arc::clone(&slot),
                Arc::clone(stats),
                self.app.renderer().cloned(),
                None,
            );
            controller.set_status(status);

            let params = Params::new(current.template.captures(ctx.raw_segments()));
            let mut task = Some(tokio::spawn(run_controller(
                controller.clone(),
                routes.partials_for(&current),
                params,
                self.app.notifier().clone(),
            )));
            let mut timer = (!current.timeout.is_zero() && status != 408)
                .then(|| Box::pin(tokio::time::sleep(current.timeout)));

            let step = loop {
                tokio::select! {
                    biased;

                    response = &mut rx => match response {
                        Ok(response) => break Step::Respond(response),
                        Err(_) => return Err(DispatchError::Canceled),
                    },

                    joined = join(&mut task) => {
                        task = None;
                        match failure(joined) {
                            None => {
                                if slot.is_done() {
                                    continue;
                                }
                                if controller.is_canceled() {
                                    return Err(DispatchError::Canceled);
                                }
                                if current.is_system() {
                                    slot.respond(response::status_page(status));
                                    continue;
                                }
                                if timer.is_some() {
                                    continue;
                                }
                                tracing::debug!(
                                    request_id = %ctx.request_id(),
                                    route = %current.name,
                                    "Handler finished without responding"
                                );
                                return Err(DispatchError::Canceled);
                            }
                            Some(error) => {
                                self.app.errors().report(&current.name, Some(ctx.raw_path()), &error);
                                if slot.is_done() {
                                    continue;
                                }
                                if current.is_system() {
                                    slot.respond(response::status_page(status));
                                    continue;
                                }
                                let (name, code) = system_fallback(&error);
                                route = routes.lookup_system(name);
                                status = code;
                                break Step::Redispatch;
                            }
                        }
                    }

                    _ = expire(&mut timer) => {
                        timer = None;
                        stats.response(ResponseStat::Timeout);
                        controller.cancel();
                        if slot.is_done() {
                            continue;
                        }
                        tracing::warn!(
                            request_id = %ctx.request_id(),
                            route = %current.name,
                            timeout_ms = current.timeout.as_millis() as u64,
                            "Handler timed out"
                        );
                        if let Some(handle) = task.take() {
                            handle.abort();
                        }
                        route = routes.lookup_system("#408");
                        status = 408;
                        break Step::Redispatch;
                    }
                }
            };

            match step {
                Step::Respond(response) => return Ok(response),
                Step::Redispatch => continue,
            }
        }
    }

    async fn serve_file(&self, routes: &RouteRegistry, ctx: &Arc<RequestContext>) -> Response<Body> {
        let stats = self.app.stats();
        stats.request(RequestStat::File);

        let Some(file) = routes.file_routes().iter().find(|f| (f.validator)(ctx)) else {
            return response::status_page(404);
        };
        let route = Arc::clone(&file.route);

        let (slot, rx) = ResponseSlot::new();
        let controller = Controller::new(
            Arc::clone(&route),
            Arc::clone(ctx),
            Arc::clone(&slot),
            Arc::clone(stats),
            self.app.renderer().cloned(),
            None,
        );
        let handler = Arc::clone(&route.handler);
        let task = tokio::spawn(handler(controller.clone(), Params::default()));

        match tokio::time::timeout(route.timeout, task).await {
            Ok(joined) => {
                if let Some(error) = failure(joined) {
                    self.app.errors().report(&route.name, Some(ctx.raw_path()), &error);
                    slot.respond(response::status_page(500));
                } else {
                    slot.respond(response::status_page(404));
                }
            }
            Err(_) => {
                stats.response(ResponseStat::Timeout);
                controller.cancel();
                slot.respond(response::status_page(408));
            }
        }

        rx.await.unwrap_or_else(|_| response::status_page(500))
    }

    async fn upgrade(
        &self,
        parts: &mut Parts,
        ctx: Arc<RequestContext>,
        config: &ServerConfig,
    ) -> Result<Response<Body>, DispatchError> {
        self.app.stats().request(RequestStat::Websocket);
        self.restrict(&ctx)?;

        if !config.websocket.enabled {
            return Err(HandshakeError::Disabled.into());
        }

        let routes = self.app.routes();
        ctx.set_flags(vec![ctx.scheme().to_string()]);
        let relax = self.authorize(&ctx).await.is_none();

        let lookup = routes.lookup_websocket(ctx.segments(), ctx.subdomain(), &ctx.flags(), relax);
        let Some(route) = lookup.route else {
            tracing::debug!(
                request_id = %ctx.request_id(),
                path = %ctx.raw_path(),
                unauthorized = lookup.unauthorized,
                "No WebSocket route"
            );
            return Err(HandshakeError::NoRoute(ctx.raw_path().to_string()).into());
        };

        let accepted = handshake::prepare(ctx.headers(), &route, &config.websocket.versions, &ctx.ip())
            .inspect_err(|e| {
                tracing::debug!(request_id = %ctx.request_id(), route = %route.name, error = %e, "Handshake rejected");
            })?;

        let Some(on_upgrade) = parts.extensions.remove::<OnUpgrade>() else {
            return Err(HandshakeError::NotUpgradable.into());
        };

        let key = registry_key(ctx.raw_path(), &route.flags);
        let (registry, _) = self.app.hub().get_or_create(&key, &route.name, ctx.raw_path());
        let params = Params::new(route.template.captures(ctx.raw_segments()));
        let initializer = Arc::clone(&route.initializer);
        let handle = Arc::clone(&registry);
        registry.initialize(move || initializer(handle, params));

        let response = handshake::switching_protocols(&accepted);
        self.app.stats().response(ResponseStat::Websocket);

        let id = accepted.id;
        let (kind, max_size) = (route.kind, route.max_size);
        tokio::spawn(async move {
            let upgraded = match on_upgrade.await {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "WebSocket upgrade failed");
                    return;
                }
            };
            let stream = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
            let (session, commands) = SessionHandle::new(id, kind, max_size, ctx);
            registry.attach(&session);
            session::run(stream, session, commands, registry).await;
        });

        Ok(response)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("app", &self.app).finish()
    }
}

/// Partial barrier, then the handler.
async fn run_controller(
    controller: Controller,
    partials: Vec<PartialHook>,
    params: Params,
    notifier: Notifier,
) -> AppResult {
    if !partials.is_empty() {
        let joined = join_all(partials.iter().map(|hook| tokio::spawn(hook(controller.clone())))).await;
        for result in joined {
            if let Some(error) = failure(result) {
                return Err(error);
            }
        }
    }

    if controller.is_canceled() || controller.is_responded() {
        return Ok(());
    }

    notifier.notify(LifecycleEvent::Controller {
        ctx: controller.context(),
        route: &controller.route().name,
    });

    let handler = Arc::clone(&controller.route().handler);
    handler(controller, params).await
}

async fn join(task: &mut Option<JoinHandle<AppResult>>) -> Result<AppResult, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// The error carried by a finished task, if any.
fn failure(joined: Result<AppResult, JoinError>) -> Option<AppError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(error),
        Err(join) if join.is_panic() => Some(AppError::Panic(panic_text(join.into_panic().as_ref()))),
        Err(_) => Some(AppError::msg("handler task cancelled")),
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn system_fallback(error: &AppError) -> (&'static str, u16) {
    match error.system_route() {
        "#501" => ("#501", 501),
        name => (name, 500),
    }
}

fn blocked(ctx: &RequestContext) -> DispatchError {
    tracing::debug!(
        request_id = %ctx.request_id(),
        method = %ctx.method(),
        path = %ctx.raw_path(),
        "Request blocked"
    );
    DispatchError::Blocked {
        method: ctx.method().to_string(),
        path: ctx.raw_path().to_string(),
    }
}

async fn remove_uploads(files: Vec<multipart::UploadedFile>) {
    for file in files {
        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %file.path.display(), error = %e, "Failed to remove upload");
            }
        }
    }
}
