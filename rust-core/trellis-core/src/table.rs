//! # Route Table
//!
//! Bootstrap-time route registration with nested group scopes.
//!
//! Each `begin_group` pushes a [`ScopeFrame`] carrying a path prefix and hook
//! aliases. Routes registered inside a group get the concatenated prefix of
//! every active frame and the ordered union of their hooks (outer to inner),
//! followed by the route's own hooks.
//!
//! The merged view of the frame stack is memoized and only recomputed after a
//! push or pop, so registering N routes under M nested groups folds the stack
//! once instead of N times.

use crate::error::{Error, Result};
use crate::pattern::{normalize_path, CompiledPattern};
use crate::route::{Handler, Route, RouteOptions};
use crate::router::{Method, Router};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// One level of group nesting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFrame {
    /// Path prefix contributed by this group
    pub prefix: String,
    /// Hook aliases, insertion order kept, duplicates removed
    pub hooks: Vec<String>,
    /// Nesting depth (1 for the outermost group)
    pub depth: usize,
}

/// Effective prefix and hooks of all active frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedScope {
    /// Concatenated prefix (empty outside any group)
    pub prefix: String,
    /// Ordered union of frame hooks, outer to inner
    pub hooks: Vec<String>,
}

/// Mutable route registry used during bootstrap
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
    frames: Vec<ScopeFrame>,
    merged: Option<Arc<MergedScope>>,
    names: HashSet<String>,
}

impl RouteTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a group scope
    pub fn begin_group<I, S>(&mut self, prefix: &str, hooks: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut frame_hooks = Vec::new();
        for hook in hooks {
            push_unique(&mut frame_hooks, hook.into());
        }
        let depth = self.frames.len() + 1;
        debug!(prefix = %prefix, hooks = ?frame_hooks, depth, "Entering route group");

        self.frames.push(ScopeFrame {
            prefix: prefix.to_string(),
            hooks: frame_hooks,
            depth,
        });
        self.merged = None;
    }

    /// Leave the innermost group scope
    ///
    /// # Errors
    ///
    /// Returns `Error::GroupUnderflow` when no group is open. This is a
    /// bootstrap bug and should abort startup.
    pub fn end_group(&mut self) -> Result<()> {
        let frame = self.frames.pop().ok_or(Error::GroupUnderflow)?;
        debug!(prefix = %frame.prefix, depth = frame.depth, "Leaving route group");
        self.merged = None;
        Ok(())
    }

    /// Run `build` inside a group, closing it even when `build` fails
    ///
    /// # Errors
    ///
    /// Propagates any error from `build` or from closing the group.
    pub fn group<I, S, F>(&mut self, prefix: &str, hooks: I, build: F) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.begin_group(prefix, hooks);
        let built = build(self);
        let closed = self.end_group();
        built.and(closed)
    }

    /// Current nesting depth
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Active frames, outermost first
    #[must_use]
    pub fn frames(&self) -> &[ScopeFrame] {
        &self.frames
    }

    /// Merged view of the active frames
    ///
    /// Returns the same `Arc` until the next `begin_group`/`end_group`.
    pub fn merged_scope(&mut self) -> Arc<MergedScope> {
        if let Some(merged) = &self.merged {
            return Arc::clone(merged);
        }

        let merged = Arc::new(self.frames.iter().fold(
            MergedScope::default(),
            |mut acc, frame| {
                acc.prefix = join_prefix(&acc.prefix, &frame.prefix);
                for hook in &frame.hooks {
                    push_unique(&mut acc.hooks, hook.clone());
                }
                acc
            },
        ));
        self.merged = Some(Arc::clone(&merged));
        merged
    }

    /// Register a route with extra per-route hooks
    ///
    /// # Errors
    ///
    /// Returns a registration error if the effective pattern does not compile.
    pub fn register<I, S>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
        extra_hooks: I,
    ) -> Result<Arc<Route>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = RouteOptions {
            name: None,
            hooks: extra_hooks.into_iter().map(Into::into).collect(),
        };
        self.register_with(method, pattern, handler, options)
    }

    /// Register a route with full options
    ///
    /// # Errors
    ///
    /// - Pattern compilation errors (`InvalidRoutePattern`, `InvalidParamName`, `DuplicateParam`)
    /// - `Error::DuplicateRouteName` when the name is already taken
    pub fn register_with(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
        options: RouteOptions,
    ) -> Result<Arc<Route>> {
        let scope = self.merged_scope();
        let effective = normalize_path(&format!("{}/{}", scope.prefix, pattern));
        let compiled = CompiledPattern::compile(&effective)?;

        let mut hooks = scope.hooks.clone();
        for hook in options.hooks {
            push_unique(&mut hooks, hook);
        }

        if let Some(name) = &options.name {
            if !self.names.insert(name.clone()) {
                return Err(Error::DuplicateRouteName { name: name.clone() });
            }
        }

        let route = Arc::new(Route {
            method,
            pattern: compiled,
            hooks,
            name: options.name,
            handler,
        });

        debug!(
            method = %route.method,
            pattern = %route.path(),
            hooks = ?route.hooks,
            "Route registered"
        );
        self.routes.push(Arc::clone(&route));
        Ok(route)
    }

    /// Convenience method to add a GET route
    ///
    /// # Errors
    ///
    /// See [`RouteTable::register_with`].
    pub fn get(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>> {
        self.register_with(Method::Get, path, handler, RouteOptions::default())
    }

    /// Convenience method to add a POST route
    ///
    /// # Errors
    ///
    /// See [`RouteTable::register_with`].
    pub fn post(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>> {
        self.register_with(Method::Post, path, handler, RouteOptions::default())
    }

    /// Convenience method to add a PUT route
    ///
    /// # Errors
    ///
    /// See [`RouteTable::register_with`].
    pub fn put(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>> {
        self.register_with(Method::Put, path, handler, RouteOptions::default())
    }

    /// Convenience method to add a DELETE route
    ///
    /// # Errors
    ///
    /// See [`RouteTable::register_with`].
    pub fn delete(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>> {
        self.register_with(Method::Delete, path, handler, RouteOptions::default())
    }

    /// Convenience method to add a route matching every method
    ///
    /// # Errors
    ///
    /// See [`RouteTable::register_with`].
    pub fn any(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>> {
        self.register_with(Method::Any, path, handler, RouteOptions::default())
    }

    /// Routes registered so far
    #[must_use]
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// End the bootstrap phase and produce the read-only matcher
    ///
    /// # Errors
    ///
    /// Returns `Error::UnclosedGroup` if a group was never closed.
    pub fn freeze(self, base_path: &str) -> Result<Router> {
        if !self.frames.is_empty() {
            return Err(Error::UnclosedGroup {
                depth: self.frames.len(),
            });
        }
        info!(routes_count = self.routes.len(), "Route table frozen");
        Ok(Router::new(self.routes, base_path))
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn join_prefix(outer: &str, inner: &str) -> String {
    let inner = inner.trim_matches('/');
    if inner.is_empty() {
        outer.to_string()
    } else {
        format!("{outer}/{inner}")
    }
}
