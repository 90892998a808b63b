//! # Error Handling
//!
//! Centralized error types for the Trellis core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Errors fall into a few classes:
//!
//! - **Registration** errors are fatal at bootstrap and must abort startup
//! - **`RouteNotFound`** is an expected outcome routed to `on-not-found`
//! - **`HookFault`** is recovered at the dispatcher boundary and becomes a 500
//! - **`PoolExhausted`** is retryable and never conflated with I/O failures

use crate::router::Method;
use thiserror::Error;

/// Result type alias for Trellis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Trellis runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A parameter name does not follow the identifier grammar
    #[error("Invalid parameter name '{name}' in route pattern {pattern}")]
    InvalidParamName {
        /// The pattern containing the parameter
        pattern: String,
        /// The offending name
        name: String,
    },

    /// The same parameter name appears twice in one pattern
    #[error("Duplicate parameter '{name}' in route pattern {pattern}")]
    DuplicateParam {
        /// The pattern containing the parameter
        pattern: String,
        /// The repeated name
        name: String,
    },

    /// `end_group` was called with no open group
    #[error("end_group called without a matching begin_group")]
    GroupUnderflow,

    /// The route table was frozen while groups were still open
    #[error("{depth} route group(s) left open at the end of bootstrap")]
    UnclosedGroup {
        /// Number of frames still on the stack
        depth: usize,
    },

    /// Two routes were registered under the same name
    #[error("Duplicate route name: {name}")]
    DuplicateRouteName {
        /// The repeated name
        name: String,
    },

    /// Reverse routing referenced an unknown route name
    #[error("Unknown route name: {name}")]
    UnknownRouteName {
        /// The requested name
        name: String,
    },

    /// Reverse routing was missing a parameter value
    #[error("Missing parameter '{param}' for route {name}")]
    MissingRouteParam {
        /// The route name
        name: String,
        /// The parameter without a value
        param: String,
    },

    /// A hook alias was registered twice
    #[error("Duplicate hook alias: {alias}")]
    DuplicateHookAlias {
        /// The repeated alias
        alias: String,
    },

    /// A route references a hook alias that was never registered
    #[error("Route {route} references unknown hook alias '{alias}'")]
    UnknownHookAlias {
        /// The unresolved alias
        alias: String,
        /// The route pattern referencing it
        route: String,
    },

    /// No hook binding is registered under the alias
    #[error("Unknown hook: {alias}")]
    UnknownHook {
        /// The requested alias
        alias: String,
    },

    /// A class-kind hook binding named a class with no registered factory
    #[error("Unknown hook class: {class}")]
    UnknownHookClass {
        /// The class name
        class: String,
    },

    /// An unknown lifecycle event or method name was parsed
    #[error("Unknown {kind}: {value}")]
    UnknownName {
        /// What was being parsed ("event", "method", ...)
        kind: &'static str,
        /// The rejected value
        value: String,
    },

    /// Router failed to match the requested path
    #[error("No route found for {method} {path}")]
    RouteNotFound {
        /// The request method
        method: Method,
        /// The normalized path that wasn't matched
        path: String,
    },

    /// A hook or handler failed while processing a request
    #[error("Hook fault in '{alias}' during {stage}: {message}")]
    HookFault {
        /// Alias of the failing binding (`handler` for the route handler)
        alias: String,
        /// Lifecycle event name, or `handler`
        stage: String,
        /// Rendered failure
        message: String,
    },

    /// All connections for a pool key are leased out
    #[error("Pool '{key}' exhausted: {max_size} connection(s) in use")]
    PoolExhausted {
        /// The pool key
        key: String,
        /// Configured capacity
        max_size: usize,
    },

    /// No pool has been configured under the key
    #[error("Unknown pool: {key}")]
    UnknownPool {
        /// The requested key
        key: String,
    },

    /// A connection was returned to a pool that does not own it
    #[error("Connection {id} is not registered with this pool manager")]
    UnknownConnection {
        /// Identity token of the connection
        id: u64,
    },

    /// Database error
    #[error("Database error: {message}")]
    Database {
        /// Error message from database
        message: String,
    },

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// The cross-worker bootstrap cache could not be read or written
    #[error("Bootstrap cache error at {path}: {message}")]
    BootstrapCache {
        /// The cache file involved
        path: String,
        /// What went wrong
        message: String,
    },

    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },
}

impl Error {
    /// Whether this error belongs to the bootstrap-time registration class
    #[must_use]
    pub const fn is_registration(&self) -> bool {
        matches!(
            self,
            Self::InvalidRoutePattern { .. }
                | Self::InvalidParamName { .. }
                | Self::DuplicateParam { .. }
                | Self::GroupUnderflow
                | Self::UnclosedGroup { .. }
                | Self::DuplicateRouteName { .. }
                | Self::DuplicateHookAlias { .. }
                | Self::UnknownHookAlias { .. }
                | Self::UnknownHookClass { .. }
        )
    }

    /// Whether the caller may retry the operation unchanged
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookEvent;

    #[test]
    fn test_route_not_found_error() {
        let err = Error::RouteNotFound {
            method: Method::Get,
            path: "/unknown".to_string(),
        };
        assert!(err.to_string().contains("GET /unknown"));
        assert!(!err.is_registration());
    }

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::BindError {
            address: "0.0.0.0:8000".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:8000"));
    }

    #[test]
    fn test_pool_exhausted_is_retryable() {
        let err = Error::PoolExhausted {
            key: "sqlite:app".to_string(),
            max_size: 2,
        };
        assert!(err.is_retryable());
        assert!(!Error::Database {
            message: "connection refused".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_registration_classification() {
        assert!(Error::GroupUnderflow.is_registration());
        assert!(Error::InvalidParamName {
            pattern: "/users/:1id:".to_string(),
            name: "1id".to_string(),
        }
        .is_registration());
        let fault = Error::HookFault {
            alias: "auth".to_string(),
            stage: HookEvent::BeforeDispatch.to_string(),
            message: "boom".to_string(),
        };
        assert!(!fault.is_registration());
        assert!(fault.to_string().contains("during before-dispatch"));
    }
}
