//! # Application
//!
//! Bootstrap-phase builder. Routes and hooks are registered here; `boot`
//! freezes them into a [`Dispatcher`] and no registration is possible after.

use crate::bootstrap::{BootstrapCache, CacheSource};
use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::hooks::HookRegistry;
use crate::table::RouteTable;
use crate::VERSION;
use tracing::{info, warn};

/// Cache entry name for the route manifest
pub const ROUTES_ARTIFACT: &str = "routes";

/// Application under construction
#[derive(Debug)]
pub struct Application {
    routes: RouteTable,
    hooks: HookRegistry,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    /// Create an application with the built-in hook classes defined
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(HookRegistry::with_builtin_classes())
    }

    /// Create an application around an existing hook registry
    #[must_use]
    pub fn with_registry(hooks: HookRegistry) -> Self {
        Self {
            routes: RouteTable::new(),
            hooks,
        }
    }

    /// Route table for registration
    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    /// Hook registry for registration
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// Register routes inside a scoped group
    ///
    /// # Errors
    ///
    /// Propagates registration errors from `build`.
    pub fn group<I, S, F>(&mut self, prefix: &str, hooks: I, build: F) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(&mut RouteTable) -> Result<()>,
    {
        self.routes.group(prefix, hooks, build)
    }

    /// End the bootstrap phase
    ///
    /// Freezes the route table with the configured base path, checks every
    /// route hook alias, and publishes the route manifest to the bootstrap
    /// cache when one is configured. Cache problems are logged, never fatal.
    ///
    /// # Errors
    ///
    /// - `Error::UnclosedGroup` if a group is still open
    /// - `Error::UnknownHookAlias` if a route references an unregistered hook
    pub fn boot(self, config: &AppConfig) -> Result<Dispatcher> {
        let router = self.routes.freeze(&config.routing.base_path)?;
        let dispatcher = Dispatcher::new(router, self.hooks)?;

        if let Some(cache) = BootstrapCache::from_config(&config.bootstrap) {
            publish_manifest(&cache, &dispatcher);
        }

        info!(
            routes_count = dispatcher.router().len(),
            base_path = %dispatcher.router().base_path(),
            "Application booted"
        );
        Ok(dispatcher)
    }
}

fn publish_manifest(cache: &BootstrapCache, dispatcher: &Dispatcher) {
    let manifest = dispatcher.router().manifest();
    match cache.get_or_build(ROUTES_ARTIFACT, VERSION, || Ok(manifest.clone())) {
        Ok(cached) if cached.source == CacheSource::Hit && cached.value != manifest => {
            warn!(
                cache_dir = %cache.dir().display(),
                "Cached route manifest differs from this worker's routes; refreshing"
            );
            if let Err(e) = cache.store(ROUTES_ARTIFACT, VERSION, &manifest) {
                warn!(error = %e, "Failed to refresh route manifest");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Bootstrap cache unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootstrapConfig;
    use crate::database::{DatabasePool, DbValue};
    use crate::dispatcher::RequestState;
    use crate::error::Error;
    use crate::hooks::{hook_params, HookEvent};
    use crate::middleware::{CORS, TIMING};
    use crate::pool::{PoolConfig, PoolKey};
    use crate::request::Request;
    use crate::response::Response;
    use crate::route::{handler, RouteOptions};
    use crate::router::{Method, RouteManifest};
    use serde_json::json;

    fn build_app() -> Application {
        let mut app = Application::new();
        app.hooks_mut()
            .register_global_class("timing", TIMING, HookEvent::AfterDispatch, 100, hook_params(json!({})))
            .unwrap();
        app.hooks_mut()
            .register_class(
                "cors",
                CORS,
                HookEvent::AfterDispatch,
                0,
                hook_params(json!({ "allow_origin": "https://app.example" })),
            )
            .unwrap();

        app.group("/api", ["cors"], |routes| {
            routes.register_with(
                Method::Get,
                "/users/:id:",
                handler(|mut ctx| async move {
                    let id = ctx.param("id").unwrap_or_default().to_string();
                    ctx.respond(Response::json_value(&json!({ "id": id })));
                    Ok(ctx)
                }),
                RouteOptions::new().name("user"),
            )?;
            Ok(())
        })
        .unwrap();
        app
    }

    #[tokio::test]
    async fn test_boot_and_dispatch_with_base_path() {
        let mut config = AppConfig::default();
        config.routing.base_path = "/app".to_string();
        let dispatcher = build_app().boot(&config).unwrap();

        let out = dispatcher.dispatch(Request::get("/app/api/users/9")).await;
        assert_eq!(out.state, RequestState::Completed);
        assert!(out.response.body.contains("\"9\""));
        assert_eq!(
            out.response.header("access-control-allow-origin"),
            Some("https://app.example")
        );
        assert!(out.response.header("x-response-time").is_some());
        assert_eq!(
            dispatcher.router().url_for("user", &[("id", "9")]).unwrap(),
            "/app/api/users/9"
        );
    }

    #[test]
    fn test_boot_rejects_unclosed_group_and_unknown_alias() {
        let mut app = Application::new();
        app.routes_mut().begin_group("/admin", ["auth"]);
        assert!(matches!(
            app.boot(&AppConfig::default()),
            Err(Error::UnclosedGroup { depth: 1 })
        ));

        let mut app = Application::new();
        app.routes_mut()
            .register(
                Method::Get,
                "/",
                handler(|ctx| async move { Ok(ctx) }),
                ["auth"],
            )
            .unwrap();
        assert!(matches!(
            app.boot(&AppConfig::default()),
            Err(Error::UnknownHookAlias { .. })
        ));
    }

    #[test]
    fn test_boot_publishes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            bootstrap: BootstrapConfig {
                cache_dir: Some(dir.path().to_path_buf()),
                ..BootstrapConfig::default()
            },
            ..AppConfig::default()
        };

        let dispatcher = build_app().boot(&config).unwrap();
        let cache = BootstrapCache::from_config(&config.bootstrap).unwrap();
        let cached: RouteManifest = cache.load(ROUTES_ARTIFACT, VERSION).unwrap().unwrap();
        assert_eq!(cached, dispatcher.router().manifest());
        assert_eq!(cached.routes[0].pattern, "/api/users/:id:");
        assert_eq!(cached.routes[0].hooks, ["cors"]);

        // a worker with a different route table refreshes the manifest
        let other = Application::new().boot(&config).unwrap();
        let refreshed: RouteManifest = cache.load(ROUTES_ARTIFACT, VERSION).unwrap().unwrap();
        assert_eq!(refreshed, other.router().manifest());
    }

    #[tokio::test]
    async fn test_handler_uses_pooled_connection() {
        let pool = DatabasePool::new(crate::database::SqlxConnector);
        let key = PoolKey::from("main");
        pool.configure(key.clone(), "sqlite::memory:", PoolConfig::with_max_size(1))
            .unwrap();

        let mut app = Application::new();
        let handler_pool = pool.clone();
        let handler_key = key.clone();
        app.routes_mut()
            .get(
                "/answer",
                handler(move |mut ctx| {
                    let pool = handler_pool.clone();
                    let key = handler_key.clone();
                    async move {
                        let mut conn = pool.acquire(&key)?;
                        let row = conn
                            .ensure_connected()
                            .await?
                            .fetch_one("SELECT 42 AS answer")
                            .await?;
                        let answer = match row.get("answer") {
                            Some(DbValue::Int(n)) => *n,
                            _ => 0,
                        };
                        ctx.respond(Response::text(answer.to_string()));
                        Ok(ctx)
                    }
                }),
            )
            .unwrap();

        let dispatcher = app.boot(&AppConfig::default()).unwrap();
        assert_eq!(pool.stats(&key).unwrap().live, 0);

        let out = dispatcher.dispatch(Request::get("/answer")).await;
        assert_eq!(out.response.body, "42");
        let stats = pool.stats(&key).unwrap();
        assert_eq!((stats.live, stats.idle), (1, 1));
    }
}
