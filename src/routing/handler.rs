//! Application callback types bound to routes.

use std::any::Any;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::AppError;
use crate::http::context::RequestContext;
use crate::http::controller::Controller;
use crate::websocket::registry::{ConnectionRegistry, SocketListener};

/// Result every application callback resolves to.
pub type AppResult = Result<(), AppError>;

/// Main route handler, invoked with the positional path captures.
pub type Handler = Arc<dyn Fn(Controller, Params) -> BoxFuture<'static, AppResult> + Send + Sync>;

/// Pre-handler hook; every applicable hook completes before the handler starts.
pub type PartialHook = Arc<dyn Fn(Controller) -> BoxFuture<'static, AppResult> + Send + Sync>;

/// Runs once per connection registry and returns the listener that receives
/// its open/message/close/error notifications.
pub type SocketInitializer =
    Arc<dyn Fn(Arc<ConnectionRegistry>, Params) -> Arc<dyn SocketListener> + Send + Sync>;

/// Decides whether a file route handles a static-looking request.
pub type FileValidator = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Authorization callback, invoked at most once per request or handshake.
pub type Authorizer =
    Arc<dyn Fn(Arc<RequestContext>) -> BoxFuture<'static, Authorization> + Send + Sync>;

/// XSS predicate applied to query strings and bodies.
pub type XssDetector = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Produces the request prefix that becomes a `#prefix` flag.
pub type PrefixFn = Arc<dyn Fn(&RequestContext) -> Option<String> + Send + Sync>;

/// Admits a request before flag derivation; `false` drops the connection.
pub type RouteFilter = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Outcome of the authorization callback.
#[derive(Clone, Default)]
pub struct Authorization {
    pub logged: bool,
    pub user: Option<Arc<dyn Any + Send + Sync>>,
}

impl Authorization {
    pub fn logged(user: impl Any + Send + Sync) -> Self {
        Self {
            logged: true,
            user: Some(Arc::new(user)),
        }
    }

    pub fn unlogged() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorization")
            .field("logged", &self.logged)
            .field("user", &self.user.is_some())
            .finish()
    }
}

/// Positional path captures, in template order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<String>);

impl Params {
    pub fn new(values: Vec<String>) -> Self {
        Self(values)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    /// Parse the capture at `index` into `T`.
    pub fn parse<T: FromStr>(&self, index: usize) -> Option<T> {
        self.get(index).and_then(|v| v.parse().ok())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Controller, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult> + Send + 'static,
{
    Arc::new(move |controller, params| f(controller, params).boxed())
}

/// Wrap an async closure as a [`PartialHook`].
pub fn partial<F, Fut>(f: F) -> PartialHook
where
    F: Fn(Controller) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult> + Send + 'static,
{
    Arc::new(move |controller| f(controller).boxed())
}

/// Wrap an async closure as an [`Authorizer`].
pub fn authorizer<F, Fut>(f: F) -> Authorizer
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Authorization> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Wrap a closure as a [`SocketInitializer`].
pub fn initializer<F, L>(f: F) -> SocketInitializer
where
    F: Fn(Arc<ConnectionRegistry>, Params) -> L + Send + Sync + 'static,
    L: SocketListener + 'static,
{
    Arc::new(move |registry, params| Arc::new(f(registry, params)) as Arc<dyn SocketListener>)
}
