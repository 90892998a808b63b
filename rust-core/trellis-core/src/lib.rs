//! # Trellis Core
//!
//! Request-dispatch core for the Trellis web framework.
//! Decides, for every inbound request, which handler runs, in what order the
//! cross-cutting hooks execute, and how pooled database connections are shared.
//!
//! ## Architecture
//!
//! Registration happens once, in a bootstrap phase ([`Application`]). Booting
//! freezes the route table into a read-only [`Router`] and hands it, with the
//! [`HookRegistry`], to a [`Dispatcher`] that serves requests without further
//! mutation of either.
//!
//! ```text
//! request -> Router::match_target -> before-dispatch hooks -> handler -> after-dispatch hooks
//!                  |                         |                   |
//!                  +-> on-not-found          +-> halt            +-> on-error
//! ```
//!
//! ## Modules
//!
//! - `pattern` - Route pattern compilation (`/users/:id:`)
//! - `table` - Route registration with nested group scopes
//! - `router` - First-match route matching and reverse routing
//! - `route` - Route and handler types
//! - `hooks` - Priority-ordered hook registry and pipelines
//! - `middleware` - Built-in hook classes (logging, timing, CORS, rate limiting)
//! - `dispatcher` - Request lifecycle state machine
//! - `context` - Per-request state threaded through hooks and handlers
//! - `request` / `response` - HTTP request and response values
//! - `pool` - Keyed pool of lazily-opened connections
//! - `database` - SQLx connector for the pool (SQLite, PostgreSQL)
//! - `bootstrap` - Cross-worker bootstrap cache
//! - `app` - Application builder
//! - `server` - HTTP server built on Hyper
//! - `config` - TOML configuration
//! - `telemetry` - Tracing subscriber setup
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod app;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod middleware;
pub mod pattern;
pub mod pool;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod table;
pub mod telemetry;

pub use app::Application;
pub use bootstrap::{BootstrapCache, CacheSource, Cached};
pub use config::{AppConfig, LogConfig, ServerConfig};
pub use context::Context;
pub use database::{DatabasePool, DbHandle, DbValue, SqlxConnector};
pub use dispatcher::{DispatchStats, Dispatched, Dispatcher, RequestState};
pub use error::{Error, Result};
pub use hooks::{hook_params, Flow, Hook, HookEvent, HookParams, HookRegistry, HookScope};
pub use middleware::{CorsHook, RateLimitHook, RequestLogHook, TimingHook};
pub use pattern::CompiledPattern;
pub use pool::{
    ConnectionPool, Connector, ExhaustionPolicy, IdlePolicy, PoolConfig, PoolKey, PoolStats,
    PooledConnection,
};
pub use request::Request;
pub use response::Response;
pub use route::{handler, Handler, Route, RouteOptions};
pub use router::{Match, Method, Params, RouteManifest, Router};
pub use server::Server;
pub use table::RouteTable;
pub use telemetry::init_tracing;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
