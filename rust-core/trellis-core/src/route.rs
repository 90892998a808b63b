//! # Route Metadata
//!
//! A [`Route`] binds a method and compiled pattern to a handler and the
//! ordered hook aliases that wrap it. Routes are created by the
//! [`RouteTable`](crate::table::RouteTable) during bootstrap and never mutated
//! afterwards.

use crate::context::Context;
use crate::pattern::CompiledPattern;
use crate::router::Method;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a route handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Context>> + Send>>;

/// Route handler
///
/// Takes the context produced by the before-dispatch pipeline and returns it,
/// normally with a response set.
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`Handler`]
///
/// # Example
///
/// ```ignore
/// let show = handler(|mut ctx| async move {
///     let id = ctx.param("id").unwrap_or_default().to_string();
///     ctx.respond(Response::text(id));
///     Ok(ctx)
/// });
/// ```
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Context>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Optional per-route settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOptions {
    /// Name used for reverse routing
    pub name: Option<String>,
    /// Hook aliases applied after the group hooks
    pub hooks: Vec<String>,
}

impl RouteOptions {
    /// Empty options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the route
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a hook alias
    #[must_use]
    pub fn hook(mut self, alias: impl Into<String>) -> Self {
        self.hooks.push(alias.into());
        self
    }
}

/// A registered route
#[derive(Clone)]
pub struct Route {
    /// HTTP method (or `Method::Any`)
    pub method: Method,
    /// Compiled effective pattern (group prefixes included)
    pub pattern: CompiledPattern,
    /// Effective hook aliases, group hooks first, duplicates removed
    pub hooks: Vec<String>,
    /// Optional route name
    pub name: Option<String>,
    pub(crate) handler: Handler,
}

impl Route {
    /// Effective pattern text
    #[must_use]
    pub fn path(&self) -> &str {
        self.pattern.raw()
    }

    /// Whether this route accepts the given request method
    #[must_use]
    pub fn accepts(&self, method: Method) -> bool {
        self.method == Method::Any || self.method == method
    }

    /// The route handler
    #[must_use]
    pub fn handler(&self) -> Handler {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.raw())
            .field("params", &self.pattern.params())
            .field("hooks", &self.hooks)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
