//! # Request Context
//!
//! The value threaded through the hook pipeline and the handler.
//!
//! A context is built once per request. It owns the request, the normalized
//! target computed by the router, the matched parameters and route, a free-form
//! attribute map hooks use to pass data downstream, and the response slot.

use crate::request::{generate_request_id, Request};
use crate::response::Response;
use crate::route::Route;
use crate::router::{Match, Method, Params, RequestTarget};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-request state passed to hooks and handlers
#[derive(Debug, Clone)]
pub struct Context {
    request: Request,
    target: RequestTarget,
    request_id: String,
    params: Params,
    route: Option<Arc<Route>>,
    attributes: Map<String, Value>,
    response: Option<Response>,
    fault: Option<String>,
    started_at: Instant,
}

impl Context {
    /// Create a context for a request whose target was already normalized
    ///
    /// Reuses an incoming `x-request-id` header or generates a new id.
    #[must_use]
    pub fn new(mut request: Request, target: RequestTarget) -> Self {
        let request_id = match request.header("x-request-id") {
            Some(id) => id.to_string(),
            None => {
                let id = generate_request_id();
                request.set_header("x-request-id", &id);
                id
            }
        };

        Self {
            request,
            target,
            request_id,
            params: Params::default(),
            route: None,
            attributes: Map::new(),
            response: None,
            fault: None,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn bind_match(&mut self, matched: Match) {
        self.params = matched.params;
        self.route = Some(matched.route);
    }

    pub(crate) fn set_fault(&mut self, message: String) {
        self.fault = Some(message);
    }

    /// The inbound request
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// Mutable access to the inbound request
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Normalized `(method, path)` computed once at request start
    #[must_use]
    pub const fn target(&self) -> &RequestTarget {
        &self.target
    }

    /// Request method
    #[must_use]
    pub const fn method(&self) -> Method {
        self.target.method
    }

    /// Normalized request path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.target.path
    }

    /// Request id (from `x-request-id` or generated)
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Matched path parameter
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// All matched path parameters
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// The matched route, if matching succeeded
    #[must_use]
    pub const fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    /// Read an attribute set by an earlier hook
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Set an attribute for later hooks and the handler
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// All attributes
    #[must_use]
    pub const fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Set the response
    pub fn respond(&mut self, response: Response) {
        self.response = Some(response);
    }

    /// Current response, if one was set
    #[must_use]
    pub const fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Mutable access to the current response
    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    /// Remove and return the response
    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Fault message while the `on-error` pipeline runs
    #[must_use]
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Time since the context was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    #[cfg(test)]
    pub(crate) fn for_test(uri: &str) -> Self {
        let request = Request::get(uri);
        let target = crate::router::Router::default().target(Method::Get, uri);
        Self::new(request, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_generates_request_id() {
        let ctx = Context::for_test("/users?x=1");
        assert!(!ctx.request_id().is_empty());
        assert_eq!(ctx.request().header("x-request-id"), Some(ctx.request_id()));
        assert_eq!(ctx.path(), "/users");
    }

    #[test]
    fn test_keeps_incoming_request_id() {
        let mut headers = HashMap::new();
        headers.insert("x-request-id".to_string(), "req-1".to_string());
        let request = Request::new(Method::Get, "/", headers, None);
        let target = crate::router::Router::default().target(Method::Get, "/");
        assert_eq!(Context::new(request, target).request_id(), "req-1");
    }

    #[test]
    fn test_attributes_and_response() {
        let mut ctx = Context::for_test("/");
        ctx.set_attribute("user", "ada");
        ctx.set_attribute("attempts", 3);
        assert_eq!(ctx.attribute("user"), Some(&Value::from("ada")));
        assert_eq!(ctx.attributes().len(), 2);

        assert!(ctx.response().is_none());
        ctx.respond(Response::text("hi"));
        if let Some(resp) = ctx.response_mut() {
            resp.set_header("x-extra", "1");
        }
        let resp = ctx.take_response().unwrap();
        assert_eq!(resp.header("x-extra"), Some("1"));
        assert!(ctx.response().is_none());
    }
}
