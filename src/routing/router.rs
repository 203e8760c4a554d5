//! Route registry and lookup.
//!
//! # Responsibilities
//! - Store web routes, WebSocket routes, file routes, partial hooks and redirects
//! - Derive route priority at registration time and keep both route lists sorted
//! - First-match lookup with subdomain, path and flag checks
//! - Direct redirect lookup keyed by `scheme://host`
//!
//! # Design Decisions
//! - The registry is a plain value owned by the application and swapped as a
//!   whole on hot injection; lookups never lock
//! - Routes are `Arc`ed so a cloned registry shares them
//! - Sorting is stable: equal priorities keep registration order, and the
//!   first MATCH shadows every later route with an overlapping template

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RouteError;
use crate::routing::flags::{self, FlagMatch};
use crate::routing::handler::{FileValidator, Handler, PartialHook, SocketInitializer};
use crate::routing::matcher::Template;
use crate::websocket::frame::PayloadKind;

/// Limits applied to routes that don't declare their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDefaults {
    /// Maximum request body in bytes.
    pub max_size: usize,
    pub timeout: Duration,
    /// Maximum WebSocket frame in bytes.
    pub websocket_max_size: usize,
}

impl Default for RouteDefaults {
    fn default() -> Self {
        Self {
            max_size: 5 * 1024,
            timeout: Duration::from_millis(3000),
            websocket_max_size: 5 * 1024,
        }
    }
}

/// Optional settings for a web route.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    name: Option<String>,
    flags: Vec<String>,
    max_size: Option<usize>,
    timeout: Option<Duration>,
    partials: Option<Vec<String>>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in logs and the error sink. Defaults to the template.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// Maximum body size in bytes.
    pub fn max_size(mut self, bytes: usize) -> Self {
        self.max_size = Some(bytes);
        self
    }

    /// Handler timeout; zero disables the timer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Named partial hooks run before this route's handler.
    pub fn partials<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partials = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// Optional settings for a WebSocket route.
#[derive(Debug, Clone, Default)]
pub struct WebSocketOptions {
    name: Option<String>,
    flags: Vec<String>,
    protocols: Vec<String>,
    allow: Vec<String>,
    max_size: Option<usize>,
}

impl WebSocketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Flags, including the payload markers `json`, `binary` and `raw`.
    pub fn flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// Sub-protocols the client must offer.
    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Origin allow-list; `*` allows any origin.
    pub fn allow<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Maximum frame size in bytes.
    pub fn max_size(mut self, bytes: usize) -> Self {
        self.max_size = Some(bytes);
        self
    }
}

/// A registered HTTP route.
pub struct WebRoute {
    pub name: String,
    pub template: Template,
    pub subdomain: Option<Vec<String>>,
    pub priority: i32,
    pub flags: Vec<String>,
    pub max_size: usize,
    pub timeout: Duration,
    pub partials: Option<Vec<String>>,
    /// Restricted to `logged` or `unlogged` requests.
    pub membership: bool,
    pub handler: Handler,
}

impl WebRoute {
    pub fn is_system(&self) -> bool {
        self.template.is_system()
    }

    pub fn is_json(&self) -> bool {
        flags::contains(&self.flags, flags::JSON)
    }

    pub fn is_raw(&self) -> bool {
        flags::contains(&self.flags, flags::RAW)
    }

    pub fn is_mixed(&self) -> bool {
        flags::contains(&self.flags, flags::MIXED)
    }
}

impl std::fmt::Debug for WebRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRoute")
            .field("name", &self.name)
            .field("template", &self.template.source())
            .field("priority", &self.priority)
            .field("flags", &self.flags)
            .finish()
    }
}

/// A registered WebSocket route.
pub struct WebSocketRoute {
    pub name: String,
    pub template: Template,
    pub subdomain: Option<Vec<String>>,
    pub priority: i32,
    /// Flags without the payload markers.
    pub flags: Vec<String>,
    pub protocols: Vec<String>,
    pub allow: Vec<String>,
    pub max_size: usize,
    pub kind: PayloadKind,
    pub membership: bool,
    pub initializer: SocketInitializer,
}

impl std::fmt::Debug for WebSocketRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketRoute")
            .field("name", &self.name)
            .field("template", &self.template.source())
            .field("priority", &self.priority)
            .field("flags", &self.flags)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A route for static-looking requests, offered in registration order.
#[derive(Clone)]
pub struct FileRoute {
    pub validator: FileValidator,
    /// Catch-all route carrying the handler, name and default timeout.
    pub route: Arc<WebRoute>,
}

/// Host-level redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub target: String,
    pub preserve_path: bool,
    pub permanent: bool,
}

impl Redirect {
    /// Location header for a request with the given path and query.
    pub fn location(&self, path_and_query: &str) -> String {
        if self.preserve_path {
            format!("{}{}", self.target, path_and_query)
        } else {
            self.target.clone()
        }
    }

    pub fn status(&self) -> u16 {
        if self.permanent {
            301
        } else {
            302
        }
    }
}

/// Result of a route lookup.
#[derive(Debug)]
pub struct Lookup<R> {
    pub route: Option<Arc<R>>,
    /// Some candidate rejected the request for its authorization state.
    pub unauthorized: bool,
}

/// Holds every route kind plus redirects.
#[derive(Clone, Default)]
pub struct RouteRegistry {
    defaults: RouteDefaults,
    web: Vec<Arc<WebRoute>>,
    websockets: Vec<Arc<WebSocketRoute>>,
    files: Vec<FileRoute>,
    partials: HashMap<String, PartialHook>,
    global_partials: Vec<PartialHook>,
    redirects: HashMap<String, Redirect>,
    body_required: bool,
    check_referer: bool,
}

/// Split `[a,b]/path` into subdomain labels and the remaining template.
fn split_subdomain(template: &str) -> (Option<Vec<String>>, &str) {
    let template = template.trim();
    match template.find(']') {
        Some(index) if index > 0 && template.starts_with('[') => {
            let labels = template[1..index]
                .trim()
                .to_lowercase()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            (Some(labels), &template[index + 1..])
        }
        _ => (None, template),
    }
}

/// Both absent match; otherwise the route's labels must contain the request's.
fn subdomain_matches(request: Option<&str>, route: Option<&[String]>) -> bool {
    match (request, route) {
        (None, None) => true,
        (Some(request), Some(route)) => route.iter().any(|label| label == request),
        _ => false,
    }
}

fn redirect_key(host: &str) -> String {
    host.trim().trim_end_matches('/').to_lowercase()
}

impl RouteRegistry {
    pub fn new(defaults: RouteDefaults) -> Self {
        Self {
            defaults,
            ..Default::default()
        }
    }

    pub fn defaults(&self) -> RouteDefaults {
        self.defaults
    }

    /// Register an HTTP route.
    pub fn add_web_route(
        &mut self,
        template: &str,
        handler: Handler,
        options: RouteOptions,
    ) -> Result<&mut Self, RouteError> {
        let (subdomain, path) = split_subdomain(template);
        let parsed = Template::parse(path)?;
        let normalized = flags::normalize(&options.flags);

        if normalized.has(flags::MIXED) {
            if parsed.has_captures() {
                return Err(RouteError::MixedDynamic(template.to_string()));
            }
            if options.flags.iter().any(|f| f.eq_ignore_ascii_case(flags::UPLOAD)) {
                return Err(RouteError::MixedUpload(template.to_string()));
            }
        }

        let mut priority = parsed.priority() + normalized.priority_delta;
        if subdomain.is_some() {
            priority += 2;
        }

        self.body_required |= normalized.body_required;
        self.check_referer |= normalized.check_referer;

        let route = WebRoute {
            name: options.name.unwrap_or_else(|| template.trim().to_string()),
            template: parsed,
            subdomain,
            priority,
            flags: normalized.flags,
            max_size: options.max_size.unwrap_or(self.defaults.max_size),
            timeout: options.timeout.unwrap_or(self.defaults.timeout),
            partials: options.partials,
            membership: normalized.membership,
            handler,
        };

        tracing::debug!(
            route = %route.name,
            priority = route.priority,
            flags = ?route.flags,
            "Web route registered"
        );

        self.web.push(Arc::new(route));
        self.web.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(self)
    }

    /// Register a WebSocket route.
    pub fn add_websocket_route(
        &mut self,
        template: &str,
        initializer: SocketInitializer,
        options: WebSocketOptions,
    ) -> Result<&mut Self, RouteError> {
        let (subdomain, path) = split_subdomain(template);
        let parsed = Template::parse(path)?;

        let mut kind = PayloadKind::Text;
        let mut route_flags: Vec<String> = Vec::new();
        for flag in &options.flags {
            let flag = flag.trim().to_lowercase();
            match flag.as_str() {
                flags::JSON => kind = PayloadKind::Json,
                "binary" => kind = PayloadKind::Binary,
                flags::RAW => kind = PayloadKind::Text,
                "" => {}
                _ if !route_flags.contains(&flag) => route_flags.push(flag),
                _ => {}
            }
        }

        let mut priority = parsed.priority() + route_flags.len() as i32 * 2;
        if subdomain.is_some() {
            priority += 2;
        }

        let membership = route_flags
            .iter()
            .any(|f| f == flags::LOGGED || f == flags::UNLOGGED);

        let route = WebSocketRoute {
            name: options.name.unwrap_or_else(|| template.trim().to_string()),
            template: parsed,
            subdomain,
            priority,
            flags: route_flags,
            protocols: options.protocols,
            allow: options.allow,
            max_size: options.max_size.unwrap_or(self.defaults.websocket_max_size),
            kind,
            membership,
            initializer,
        };

        tracing::debug!(
            route = %route.name,
            priority = route.priority,
            flags = ?route.flags,
            "WebSocket route registered"
        );

        self.websockets.push(Arc::new(route));
        self.websockets.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(self)
    }

    /// Register a redirect from `scheme://host` to `target`. Re-registration replaces.
    pub fn add_redirect(
        &mut self,
        from: &str,
        target: &str,
        preserve_path: bool,
        permanent: bool,
    ) -> &mut Self {
        self.redirects.insert(
            redirect_key(from),
            Redirect {
                target: target.trim().trim_end_matches('/').to_string(),
                preserve_path,
                permanent,
            },
        );
        self
    }

    /// Drop every redirect; used before re-applying configured redirects.
    pub fn clear_redirects(&mut self) -> &mut Self {
        self.redirects.clear();
        self
    }

    pub fn add_file_route(
        &mut self,
        name: impl Into<String>,
        validator: FileValidator,
        handler: Handler,
    ) -> &mut Self {
        let route = WebRoute {
            name: name.into(),
            template: Template::any(),
            subdomain: None,
            priority: 0,
            flags: Vec::new(),
            max_size: self.defaults.max_size,
            timeout: self.defaults.timeout,
            partials: None,
            membership: false,
            handler,
        };
        self.files.push(FileRoute {
            validator,
            route: Arc::new(route),
        });
        self
    }

    /// Register a named partial hook that routes opt into.
    pub fn add_partial(&mut self, name: impl Into<String>, hook: PartialHook) -> &mut Self {
        self.partials.insert(name.into(), hook);
        self
    }

    /// Register a partial hook that runs before every handler.
    pub fn add_global_partial(&mut self, hook: PartialHook) -> &mut Self {
        self.global_partials.push(hook);
        self
    }

    /// Remove every web route whose template source equals `template`.
    pub fn remove_web_route(&mut self, template: &str) -> usize {
        let (_, path) = split_subdomain(template);
        let path = path.trim();
        let before = self.web.len();
        self.web.retain(|r| r.template.source() != path);
        before - self.web.len()
    }

    /// Whether any route consumes a request body.
    pub fn body_required(&self) -> bool {
        self.body_required
    }

    pub fn check_referer(&self) -> bool {
        self.check_referer
    }

    pub fn has_redirects(&self) -> bool {
        !self.redirects.is_empty()
    }

    pub fn web_routes(&self) -> &[Arc<WebRoute>] {
        &self.web
    }

    pub fn websocket_routes(&self) -> &[Arc<WebSocketRoute>] {
        &self.websockets
    }

    pub fn file_routes(&self) -> &[FileRoute] {
        &self.files
    }

    /// Find the first web route that accepts the request.
    pub fn lookup<S: AsRef<str>, F: AsRef<str>>(
        &self,
        path: &[S],
        subdomain: Option<&str>,
        request_flags: &[F],
        relax_membership: bool,
    ) -> Lookup<WebRoute> {
        let mut unauthorized = false;

        for route in &self.web {
            if !subdomain_matches(subdomain, route.subdomain.as_deref()) {
                continue;
            }
            if !route.template.matches(path, false) {
                continue;
            }

            match flags::compare(request_flags, &route.flags, relax_membership) {
                FlagMatch::Match => {
                    return Lookup {
                        route: Some(Arc::clone(route)),
                        unauthorized,
                    }
                }
                FlagMatch::Forbidden => unauthorized = true,
                FlagMatch::NoMatch => {}
            }
        }

        Lookup {
            route: None,
            unauthorized,
        }
    }

    /// Find a `#name` system route on path alone.
    pub fn lookup_system(&self, name: &str) -> Option<Arc<WebRoute>> {
        let key = [name.to_lowercase()];
        self.web
            .iter()
            .find(|route| route.template.matches(&key, true))
            .cloned()
    }

    /// Find the first WebSocket route that accepts the upgrade.
    pub fn lookup_websocket<S: AsRef<str>, F: AsRef<str>>(
        &self,
        path: &[S],
        subdomain: Option<&str>,
        request_flags: &[F],
        relax_membership: bool,
    ) -> Lookup<WebSocketRoute> {
        let mut unauthorized = false;

        for route in &self.websockets {
            if !subdomain_matches(subdomain, route.subdomain.as_deref()) {
                continue;
            }
            if !route.template.matches(path, false) {
                continue;
            }
            if route.flags.is_empty() {
                return Lookup {
                    route: Some(Arc::clone(route)),
                    unauthorized,
                };
            }

            match flags::compare(request_flags, &route.flags, relax_membership) {
                FlagMatch::Match => {
                    return Lookup {
                        route: Some(Arc::clone(route)),
                        unauthorized,
                    }
                }
                FlagMatch::Forbidden => unauthorized = true,
                FlagMatch::NoMatch => {}
            }
        }

        Lookup {
            route: None,
            unauthorized,
        }
    }

    /// Redirect registered for `scheme://host`.
    pub fn redirect_for(&self, scheme: &str, host: &str) -> Option<&Redirect> {
        self.redirects
            .get(&redirect_key(&format!("{}://{}", scheme, host)))
    }

    /// Hooks that must complete before `route`'s handler runs.
    ///
    /// Global hooks first, then the route's named hooks that exist.
    pub fn partials_for(&self, route: &WebRoute) -> Vec<PartialHook> {
        let mut hooks: Vec<PartialHook> = self.global_partials.clone();
        if let Some(names) = &route.partials {
            for name in names {
                match self.partials.get(name) {
                    Some(hook) => hooks.push(Arc::clone(hook)),
                    None => tracing::trace!(route = %route.name, partial = %name, "Unknown partial skipped"),
                }
            }
        }
        hooks
    }
}

/// Whether the last segment of `path` carries one of the `accepts` extensions.
pub fn is_static_path(path: &str, accepts: &[String]) -> bool {
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rfind('.') {
        Some(index) if index + 1 < last.len() => {
            let ext = last[index + 1..].to_lowercase();
            accepts.iter().any(|a| a.trim_start_matches('.') == ext)
        }
        _ => false,
    }
}
