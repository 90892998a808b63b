//! # Router
//!
//! First-match route resolution over the frozen route table.
//!
//! Routes are tried in registration order and the first structural match
//! wins. Registration order is part of the contract: register static and more
//! specific routes before catch-all patterns.
//!
//! Request targets are normalized once (query and fragment stripped, base
//! path removed, slashes collapsed) and the resulting [`RequestTarget`] is
//! carried on the request context so later lookups never re-parse.

use crate::error::{Error, Result};
use crate::pattern::{normalize_path, Piece};
use crate::route::Route;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
    /// Route-side wildcard accepting every method
    Any,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Any => "ANY",
        };
        f.write_str(name)
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "ANY" | "*" => Ok(Self::Any),
            _ => Err(Error::UnknownName {
                kind: "method",
                value: s.to_string(),
            }),
        }
    }
}

/// Normalized `(method, path)` pair for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// Request method
    pub method: Method,
    /// Normalized path, base path removed
    pub path: String,
}

/// Path parameters in capture order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Get a parameter by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate `(name, value)` pairs in capture order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of captured parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameters were captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy into a HashMap
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        self.0.iter().cloned().collect()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Params {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Matched route with extracted parameters
#[derive(Debug, Clone)]
pub struct Match {
    /// The matched route
    pub route: Arc<Route>,
    /// Extracted path parameters
    pub params: Params,
}

/// One route in a [`RouteManifest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// HTTP method
    pub method: Method,
    /// Effective pattern
    pub pattern: String,
    /// Parameter names in capture order
    pub params: Vec<String>,
    /// Effective hook aliases
    pub hooks: Vec<String>,
    /// Route name, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Serializable listing of the route table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteManifest {
    /// Configured base path
    pub base_path: String,
    /// Routes in registration order
    pub routes: Vec<RouteEntry>,
}

/// Frozen, read-only route matcher
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<Arc<Route>>,
    names: HashMap<String, usize>,
    base_path: String,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(Vec::new(), "/")
    }
}

impl Router {
    /// Build a router over routes in registration order
    ///
    /// Normally obtained from [`RouteTable::freeze`](crate::table::RouteTable::freeze).
    #[must_use]
    pub fn new(routes: Vec<Arc<Route>>, base_path: &str) -> Self {
        let names = routes
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.name.clone().map(|n| (n, i)))
            .collect();
        let base_path = normalize_path(base_path);

        info!(
            routes_count = routes.len(),
            base_path = %base_path,
            "Routing table loaded"
        );

        Self {
            routes,
            names,
            base_path,
        }
    }

    /// Routes in registration order
    #[must_use]
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Configured base path (`/` when none)
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Normalize a raw request target
    ///
    /// Strips the query string and fragment, collapses slashes to the
    /// canonical leading-slash form and removes the base path.
    #[must_use]
    pub fn normalize(&self, raw_uri: &str) -> String {
        let path = raw_uri.split(['?', '#']).next().unwrap_or_default();
        let path = normalize_path(path);

        if self.base_path == "/" {
            return path;
        }
        if let Some(rest) = path.strip_prefix(self.base_path.as_str()) {
            if rest.is_empty() {
                return "/".to_string();
            }
            if rest.starts_with('/') {
                return rest.to_string();
            }
        }
        path
    }

    /// Normalize a method and raw target into a [`RequestTarget`]
    #[must_use]
    pub fn target(&self, method: Method, raw_uri: &str) -> RequestTarget {
        RequestTarget {
            method,
            path: self.normalize(raw_uri),
        }
    }

    /// Match an already-normalized target
    ///
    /// # Errors
    ///
    /// Returns `Error::RouteNotFound` if no route matches
    pub fn match_target(&self, target: &RequestTarget) -> Result<Match> {
        for route in &self.routes {
            if !route.accepts(target.method) {
                continue;
            }
            if let Some(captures) = route.pattern.captures(&target.path) {
                let params: Params = captures.into_iter().collect();
                debug!(
                    method = %target.method,
                    path = %target.path,
                    route_pattern = %route.path(),
                    path_params = ?params,
                    "Route matched"
                );
                return Ok(Match {
                    route: Arc::clone(route),
                    params,
                });
            }
        }

        debug!(method = %target.method, path = %target.path, "No route matched");
        Err(Error::RouteNotFound {
            method: target.method,
            path: target.path.clone(),
        })
    }

    /// Normalize and match in one step
    ///
    /// # Errors
    ///
    /// Returns `Error::RouteNotFound` if no route matches
    pub fn match_route(&self, method: Method, raw_uri: &str) -> Result<Match> {
        self.match_target(&self.target(method, raw_uri))
    }

    /// Build a URL for a named route
    ///
    /// # Errors
    ///
    /// - `Error::UnknownRouteName` if no route carries the name
    /// - `Error::MissingRouteParam` if a parameter has no value
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String> {
        let route = self
            .names
            .get(name)
            .map(|&i| &self.routes[i])
            .ok_or_else(|| Error::UnknownRouteName {
                name: name.to_string(),
            })?;

        let mut path = String::new();
        for piece in route.pattern.pieces() {
            match piece {
                Piece::Literal(text) => path.push_str(text),
                Piece::Param { name: param, .. } => {
                    let value = params
                        .iter()
                        .find(|(k, _)| *k == param.as_str())
                        .map(|(_, v)| *v)
                        .ok_or_else(|| Error::MissingRouteParam {
                            name: name.to_string(),
                            param: param.clone(),
                        })?;
                    path.push_str(value);
                }
            }
        }

        if self.base_path == "/" {
            Ok(path)
        } else if path == "/" {
            Ok(self.base_path.clone())
        } else {
            Ok(format!("{}{}", self.base_path, path))
        }
    }

    /// Serializable listing of every route
    #[must_use]
    pub fn manifest(&self) -> RouteManifest {
        RouteManifest {
            base_path: self.base_path.clone(),
            routes: self
                .routes
                .iter()
                .map(|r| RouteEntry {
                    method: r.method,
                    pattern: r.path().to_string(),
                    params: r.pattern.params().to_vec(),
                    hooks: r.hooks.clone(),
                    name: r.name.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{handler, RouteOptions};
    use crate::table::RouteTable;

    fn noop() -> crate::route::Handler {
        handler(|ctx| async move { Ok(ctx) })
    }

    fn router(base_path: &str, build: impl FnOnce(&mut RouteTable)) -> Router {
        let mut table = RouteTable::new();
        build(&mut table);
        table.freeze(base_path).unwrap()
    }

    #[test]
    fn test_basic_routing() {
        let r = router("/", |t| {
            t.get("/", noop()).unwrap();
            t.get("/users", noop()).unwrap();
            t.post("/users", noop()).unwrap();
        });

        assert_eq!(r.match_route(Method::Get, "/").unwrap().route.path(), "/");
        let m = r.match_route(Method::Post, "/users").unwrap();
        assert_eq!(m.route.method, Method::Post);
        assert!(m.params.is_empty());
    }

    #[test]
    fn test_path_parameters() {
        let r = router("/", |t| {
            t.get("/users/:id:", noop()).unwrap();
            t.get("/users/:user_id:/posts/:post_id:", noop()).unwrap();
        });

        let m = r.match_route(Method::Get, "/users/123").unwrap();
        assert_eq!(m.params.get("id"), Some("123"));

        let m = r.match_route(Method::Get, "/users/456/posts/789").unwrap();
        assert_eq!(m.params.get("user_id"), Some("456"));
        assert_eq!(m.params.get("post_id"), Some("789"));
        assert_eq!(
            m.params.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            ["user_id", "post_id"]
        );
    }

    #[test]
    fn test_first_registered_route_wins() {
        let r = router("/", |t| {
            t.register_with(
                Method::Get,
                "/users/:id:",
                noop(),
                RouteOptions::new().name("first"),
            )
            .unwrap();
            t.register_with(
                Method::Get,
                "/users/me",
                noop(),
                RouteOptions::new().name("second"),
            )
            .unwrap();
        });

        let m = r.match_route(Method::Get, "/users/me").unwrap();
        assert_eq!(m.route.name.as_deref(), Some("first"));
        assert_eq!(m.params.get("id"), Some("me"));
    }

    #[test]
    fn test_param_does_not_swallow_deeper_segments() {
        let r = router("/", |t| {
            t.register(Method::Get, "/users/:id:", noop(), ["auth"]).unwrap();
            t.get("/users/:id:/edit", noop()).unwrap();
        });

        let m = r.match_route(Method::Get, "/users/42/edit").unwrap();
        assert_eq!(m.route.path(), "/users/:id:/edit");
        assert_eq!(m.params.get("id"), Some("42"));
    }

    #[test]
    fn test_catch_all_registered_last() {
        let r = router("/", |t| {
            t.get("/docs/index", noop()).unwrap();
            t.get("/docs/:rest*:", noop()).unwrap();
        });

        assert!(r
            .match_route(Method::Get, "/docs/index")
            .unwrap()
            .params
            .is_empty());
        let m = r.match_route(Method::Get, "/docs/guide/intro").unwrap();
        assert_eq!(m.params.get("rest"), Some("guide/intro"));
    }

    #[test]
    fn test_route_not_found() {
        let r = Router::default();
        let err = r.match_route(Method::Get, "/nonexistent").unwrap_err();
        assert!(matches!(err, Error::RouteNotFound { .. }));
    }

    #[test]
    fn test_method_not_allowed() {
        let r = router("/", |t| {
            t.get("/users", noop()).unwrap();
        });
        assert!(r.match_route(Method::Post, "/users").is_err());
    }

    #[test]
    fn test_any_method_route() {
        let r = router("/", |t| {
            t.any("/health", noop()).unwrap();
        });
        assert!(r.match_route(Method::Delete, "/health").is_ok());
        assert!(r.match_route(Method::Options, "/health").is_ok());
    }

    #[test]
    fn test_normalization() {
        let r = router("/app", |_| {});
        assert_eq!(r.normalize("/app/users//42/?x=1#frag"), "/users/42");
        assert_eq!(r.normalize("/app"), "/");
        assert_eq!(r.normalize("/app/"), "/");
        assert_eq!(r.normalize("/application"), "/application");
        assert_eq!(r.normalize(""), "/");
        assert_eq!(Router::default().normalize("users"), "/users");
    }

    #[test]
    fn test_base_path_is_stripped_before_matching() {
        let r = router("/app/", |t| {
            t.get("/users/:id:", noop()).unwrap();
        });
        let m = r.match_route(Method::Get, "/app/users/9?full=1").unwrap();
        assert_eq!(m.params.get("id"), Some("9"));
    }

    #[test]
    fn test_url_for() {
        let r = router("/app", |t| {
            t.register_with(
                Method::Get,
                "/users/:id:/posts/:post:",
                noop(),
                RouteOptions::new().name("posts.show"),
            )
            .unwrap();
            t.register_with(Method::Get, "/", noop(), RouteOptions::new().name("home"))
                .unwrap();
        });

        assert_eq!(
            r.url_for("posts.show", &[("post", "3"), ("id", "7")]).unwrap(),
            "/app/users/7/posts/3"
        );
        assert_eq!(r.url_for("home", &[]).unwrap(), "/app");
        assert!(matches!(
            r.url_for("posts.show", &[("id", "7")]),
            Err(Error::MissingRouteParam { .. })
        ));
        assert!(matches!(
            r.url_for("missing", &[]),
            Err(Error::UnknownRouteName { .. })
        ));
    }

    #[test]
    fn test_manifest_lists_routes_in_order() {
        let r = router("/", |t| {
            t.get("/a", noop()).unwrap();
            t.register(Method::Post, "/b/:id:", noop(), ["csrf"]).unwrap();
        });
        let manifest = r.manifest();
        assert_eq!(manifest.routes.len(), 2);
        assert_eq!(manifest.routes[1].params, ["id"]);
        assert_eq!(manifest.routes[1].hooks, ["csrf"]);

        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains(r#""method":"POST""#));
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("*".parse::<Method>().unwrap(), Method::Any);
        assert!("BREW".parse::<Method>().is_err());
        assert_eq!(Method::Patch.to_string(), "PATCH");
    }
}
