//! Shared server state and the route declaration surface.
//!
//! # Responsibilities
//! - Own the route registry, config, restrictions, hooks and shared sinks
//! - Swap routes (hot injection) and config (reload) atomically
//! - Report a usage snapshot
//!
//! # Data Flow
//! ```text
//! ApplicationBuilder (routes, hooks, observers, redirects)
//!     → build(): registry sorted, restrictions compiled, hub created
//!     → Arc<Application> shared by dispatcher, server, config watcher
//!
//! inject(f):  clone registry → f(&mut clone) → store
//! apply_config(cfg): store config → rebuild restrictions → re-apply redirects
//! ```
//!
//! # Design Decisions
//! - Requests load one registry snapshot at start and keep it to the end
//! - Route limits are resolved at registration, so a reload never rewrites routes

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::config::{RedirectConfig, ServerConfig};
use crate::error::RouteError;
use crate::http::controller::ViewRenderer;
use crate::http::multipart::{BufferedDecoder, MultipartDecoder};
use crate::observability::errors::ErrorLog;
use crate::observability::events::{LifecycleObserver, Notifier, TracingObserver};
use crate::observability::metrics::{Stats, StatsSnapshot};
use crate::routing::{
    Authorizer, FileValidator, Handler, PartialHook, PrefixFn, RouteFilter, RouteOptions,
    RouteRegistry, SocketInitializer, WebSocketOptions, XssDetector,
};
use crate::security::Restrictions;
use crate::websocket::{ConnectionHub, RegistryUsage};

/// Everything a request needs besides the request itself.
pub struct Application {
    config: ArcSwap<ServerConfig>,
    routes: ArcSwap<RouteRegistry>,
    restrictions: ArcSwap<Restrictions>,
    inject_lock: Mutex<()>,
    redirects: Vec<RedirectConfig>,
    authorizer: Option<Authorizer>,
    filter: Option<RouteFilter>,
    xss: Option<XssDetector>,
    prefix: Option<PrefixFn>,
    renderer: Option<Arc<dyn ViewRenderer>>,
    decoder: Arc<dyn MultipartDecoder>,
    hub: ConnectionHub,
    stats: Arc<Stats>,
    errors: Arc<ErrorLog>,
    notifier: Notifier,
}

/// Point-in-time view of traffic, routes and live WebSocket registries.
#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub stats: StatsSnapshot,
    pub web_routes: usize,
    pub websocket_routes: usize,
    pub file_routes: usize,
    pub redirects: bool,
    pub registries: Vec<RegistryUsage>,
    pub errors: usize,
}

impl Application {
    pub fn builder(config: ServerConfig) -> ApplicationBuilder {
        ApplicationBuilder::new(config)
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.load_full()
    }

    /// Registry snapshot; later injections don't affect it.
    pub fn routes(&self) -> Arc<RouteRegistry> {
        self.routes.load_full()
    }

    pub fn restrictions(&self) -> Arc<Restrictions> {
        self.restrictions.load_full()
    }

    pub fn authorizer(&self) -> Option<&Authorizer> {
        self.authorizer.as_ref()
    }

    pub fn route_filter(&self) -> Option<&RouteFilter> {
        self.filter.as_ref()
    }

    pub fn xss(&self) -> Option<&XssDetector> {
        self.xss.as_ref()
    }

    pub fn prefix(&self) -> Option<&PrefixFn> {
        self.prefix.as_ref()
    }

    pub fn renderer(&self) -> Option<&Arc<dyn ViewRenderer>> {
        self.renderer.as_ref()
    }

    pub fn decoder(&self) -> &Arc<dyn MultipartDecoder> {
        &self.decoder
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn errors(&self) -> &Arc<ErrorLog> {
        &self.errors
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Change routes at runtime.
    ///
    /// `f` edits a copy of the current registry; the copy replaces it only
    /// when `f` succeeds.
    pub fn inject<F>(&self, f: F) -> Result<(), RouteError>
    where
        F: FnOnce(&mut RouteRegistry) -> Result<(), RouteError>,
    {
        let _guard = self.inject_lock.lock().expect("inject lock poisoned");
        let mut next = RouteRegistry::clone(&self.routes.load());
        f(&mut next)?;
        self.routes.store(Arc::new(next));
        tracing::info!("Routes injected");
        Ok(())
    }

    /// Swap in a reloaded configuration.
    pub fn apply_config(&self, config: ServerConfig) {
        self.restrictions
            .store(Arc::new(Restrictions::from_config(&config.restrictions)));

        let configured = config.redirects.clone();
        self.config.store(Arc::new(config));

        let result = self.inject(|routes| {
            routes.clear_redirects();
            apply_redirects(routes, self.redirects.iter().chain(configured.iter()));
            Ok(())
        });
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to re-apply redirects");
        }

        tracing::info!("Configuration applied");
    }

    pub fn usage(&self) -> Usage {
        let routes = self.routes.load();
        Usage {
            stats: self.stats.snapshot(),
            web_routes: routes.web_routes().len(),
            websocket_routes: routes.websocket_routes().len(),
            file_routes: routes.file_routes().len(),
            redirects: routes.has_redirects(),
            registries: self.hub.usage(),
            errors: self.errors.len(),
        }
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.load();
        f.debug_struct("Application")
            .field("name", &self.config.load().name)
            .field("web_routes", &routes.web_routes().len())
            .field("websocket_routes", &routes.websocket_routes().len())
            .field("registries", &self.hub.len())
            .finish()
    }
}

fn apply_redirects<'a>(routes: &mut RouteRegistry, redirects: impl Iterator<Item = &'a RedirectConfig>) {
    for redirect in redirects {
        routes.add_redirect(&redirect.from, &redirect.to, redirect.preserve_path, redirect.permanent);
    }
}

/// Collects declarations; the first registration error is returned by [`build`].
///
/// [`build`]: ApplicationBuilder::build
pub struct ApplicationBuilder {
    config: ServerConfig,
    routes: RouteRegistry,
    redirects: Vec<RedirectConfig>,
    authorizer: Option<Authorizer>,
    filter: Option<RouteFilter>,
    xss: Option<XssDetector>,
    prefix: Option<PrefixFn>,
    renderer: Option<Arc<dyn ViewRenderer>>,
    decoder: Arc<dyn MultipartDecoder>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    error: Option<RouteError>,
}

impl ApplicationBuilder {
    pub fn new(config: ServerConfig) -> Self {
        let routes = RouteRegistry::new(config.route_defaults());
        Self {
            config,
            routes,
            redirects: Vec::new(),
            authorizer: None,
            filter: None,
            xss: None,
            prefix: None,
            renderer: None,
            decoder: Arc::new(BufferedDecoder),
            observers: vec![Arc::new(TracingObserver)],
            error: None,
        }
    }

    fn record(&mut self, result: Result<(), RouteError>) {
        if let Err(e) = result {
            tracing::error!(error = %e, "Route registration failed");
            self.error.get_or_insert(e);
        }
    }

    /// Register an HTTP route (`[sub]/path/{id}/`, or `#404` style system routes).
    pub fn route(mut self, template: &str, handler: Handler, options: RouteOptions) -> Self {
        let result = self.routes.add_web_route(template, handler, options).map(|_| ());
        self.record(result);
        self
    }

    pub fn websocket(
        mut self,
        template: &str,
        initializer: SocketInitializer,
        options: WebSocketOptions,
    ) -> Self {
        let result = self
            .routes
            .add_websocket_route(template, initializer, options)
            .map(|_| ());
        self.record(result);
        self
    }

    pub fn file_route(mut self, name: &str, validator: FileValidator, handler: Handler) -> Self {
        self.routes.add_file_route(name, validator, handler);
        self
    }

    pub fn partial(mut self, name: &str, hook: PartialHook) -> Self {
        self.routes.add_partial(name, hook);
        self
    }

    pub fn global_partial(mut self, hook: PartialHook) -> Self {
        self.routes.add_global_partial(hook);
        self
    }

    /// Redirect `from` (`scheme://host`) to `to`. Configured redirects win on conflict.
    pub fn redirect(mut self, from: &str, to: &str, preserve_path: bool, permanent: bool) -> Self {
        self.redirects.push(RedirectConfig {
            from: from.to_string(),
            to: to.to_string(),
            preserve_path,
            permanent,
        });
        self
    }

    pub fn authorizer(mut self, authorizer: Authorizer) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Checked after restrictions, before anything else looks at the request.
    pub fn route_filter(mut self, filter: RouteFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn xss_detector(mut self, detector: XssDetector) -> Self {
        self.xss = Some(detector);
        self
    }

    pub fn prefix(mut self, prefix: PrefixFn) -> Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn ViewRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn MultipartDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(mut self) -> Result<Arc<Application>, RouteError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        apply_redirects(
            &mut self.routes,
            self.redirects.iter().chain(self.config.redirects.iter()),
        );

        let stats = Arc::new(Stats::default());
        let errors = Arc::new(ErrorLog::default());
        let notifier = Notifier::new(self.observers);
        let hub = ConnectionHub::new(Arc::clone(&stats), Arc::clone(&errors), notifier.clone());
        let restrictions = Restrictions::from_config(&self.config.restrictions);

        tracing::info!(
            name = %self.config.name,
            web_routes = self.routes.web_routes().len(),
            websocket_routes = self.routes.websocket_routes().len(),
            "Application built"
        );

        Ok(Arc::new(Application {
            config: ArcSwap::from_pointee(self.config),
            routes: ArcSwap::from_pointee(self.routes),
            restrictions: ArcSwap::from_pointee(restrictions),
            inject_lock: Mutex::new(()),
            redirects: self.redirects,
            authorizer: self.authorizer,
            filter: self.filter,
            xss: self.xss,
            prefix: self.prefix,
            renderer: self.renderer,
            decoder: self.decoder,
            hub,
            stats,
            errors,
            notifier,
        }))
    }
}
