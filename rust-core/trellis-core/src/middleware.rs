//! # Built-in Hooks
//!
//! Hook classes for the cross-cutting concerns most applications need:
//! request logging, timing, CORS and rate limiting.
//!
//! Each hook is a shared instance, so it keeps no per-request state of its
//! own. Whether a hook runs before or after the handler is decided by the
//! event it is bound to; the hooks tell the two apart by whether the context
//! already carries a response.
//!
//! | Class         | Typical event     | Params                                          |
//! |---------------|-------------------|-------------------------------------------------|
//! | `request-log` | both              | `headers` (bool)                                |
//! | `timing`      | both              |                                                 |
//! | `cors`        | `after-dispatch`  | `allow_origin`, `allow_methods`, `allow_headers` |
//! | `rate-limit`  | `before-dispatch` | `capacity`, `refill_per_sec`                    |

use crate::context::Context;
use crate::hooks::{Flow, Hook, HookParams, HookRegistry};
use crate::response::Response;
use crate::router::Method;
use anyhow::Context as _;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Class name of [`RequestLogHook`]
pub const REQUEST_LOG: &str = "request-log";
/// Class name of [`TimingHook`]
pub const TIMING: &str = "timing";
/// Class name of [`CorsHook`]
pub const CORS: &str = "cors";
/// Class name of [`RateLimitHook`]
pub const RATE_LIMIT: &str = "rate-limit";

const TIMING_OFFSET_KEY: &str = "timing.offset_us";

/// Define every built-in hook class on a registry
pub fn define_builtin_classes(registry: &mut HookRegistry) {
    registry.define_class(REQUEST_LOG, RequestLogHook::from_params);
    registry.define_class(TIMING, |_: &HookParams| Ok(TimingHook));
    registry.define_class(CORS, CorsHook::from_params);
    registry.define_class(RATE_LIMIT, RateLimitHook::from_params);
}

fn str_param(params: &HookParams, key: &str) -> anyhow::Result<Option<String>> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .with_context(|| format!("param '{key}' must be a string")),
    }
}

fn u64_param(params: &HookParams, key: &str) -> anyhow::Result<Option<u64>> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .with_context(|| format!("param '{key}' must be a non-negative integer")),
    }
}

/// Logs request start and completion
#[derive(Debug, Default)]
pub struct RequestLogHook {
    log_headers: bool,
}

impl RequestLogHook {
    /// Create a new logging hook
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable header logging
    #[must_use]
    pub const fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }

    fn from_params(params: &HookParams) -> anyhow::Result<Self> {
        let log_headers = match params.get("headers") {
            None => false,
            Some(value) => value.as_bool().context("param 'headers' must be a bool")?,
        };
        Ok(Self { log_headers })
    }
}

impl Hook for RequestLogHook {
    fn handle(&self, ctx: &mut Context, _params: &HookParams) -> anyhow::Result<Flow> {
        match ctx.response() {
            None if self.log_headers => info!(
                method = %ctx.method(),
                path = %ctx.path(),
                request_id = %ctx.request_id(),
                headers = ?ctx.request().headers(),
                "Request received"
            ),
            None => info!(
                method = %ctx.method(),
                path = %ctx.path(),
                request_id = %ctx.request_id(),
                "Request received"
            ),
            Some(response) => info!(
                method = %ctx.method(),
                path = %ctx.path(),
                status = response.status,
                request_id = %ctx.request_id(),
                "Response sent"
            ),
        }
        Ok(Flow::Continue)
    }

    fn name(&self) -> &'static str {
        "RequestLogHook"
    }
}

/// Measures time spent between its two bindings and reports `x-response-time`
///
/// Bound only after dispatch, it reports time since the request started.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimingHook;

impl Hook for TimingHook {
    fn handle(&self, ctx: &mut Context, _params: &HookParams) -> anyhow::Result<Flow> {
        let now_us = u64::try_from(ctx.elapsed().as_micros()).unwrap_or(u64::MAX);

        if ctx.response().is_none() {
            ctx.set_attribute(TIMING_OFFSET_KEY, now_us);
            return Ok(Flow::Continue);
        }

        let offset = ctx
            .attribute(TIMING_OFFSET_KEY)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        let duration_us = now_us.saturating_sub(offset);
        debug!(
            method = %ctx.method(),
            path = %ctx.path(),
            duration_us,
            "Request timing"
        );
        if let Some(response) = ctx.response_mut() {
            response.set_header("x-response-time", &format!("{duration_us}us"));
        }
        Ok(Flow::Continue)
    }

    fn name(&self) -> &'static str {
        "TimingHook"
    }
}

/// Adds Cross-Origin Resource Sharing headers
///
/// Before dispatch it answers `OPTIONS` preflight requests directly and halts.
#[derive(Debug, Clone)]
pub struct CorsHook {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsHook {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization".to_string(),
        }
    }
}

impl CorsHook {
    /// Create a new CORS hook with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed origin
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    /// Get the Access-Control-Allow-Origin header value
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.allow_origin
    }

    fn from_params(params: &HookParams) -> anyhow::Result<Self> {
        let mut hook = Self::new();
        if let Some(origin) = str_param(params, "allow_origin")? {
            hook = hook.allow_origin(origin);
        }
        if let Some(methods) = str_param(params, "allow_methods")? {
            hook = hook.allow_methods(methods);
        }
        if let Some(headers) = str_param(params, "allow_headers")? {
            hook = hook.allow_headers(headers);
        }
        Ok(hook)
    }

    fn apply(&self, response: &mut Response) {
        response.set_header("Access-Control-Allow-Origin", &self.allow_origin);
        response.set_header("Access-Control-Allow-Methods", &self.allow_methods);
        response.set_header("Access-Control-Allow-Headers", &self.allow_headers);
    }
}

impl Hook for CorsHook {
    fn handle(&self, ctx: &mut Context, _params: &HookParams) -> anyhow::Result<Flow> {
        if let Some(response) = ctx.response_mut() {
            self.apply(response);
            return Ok(Flow::Continue);
        }

        if ctx.method() == Method::Options {
            let mut preflight = Response::default().with_status(204);
            self.apply(&mut preflight);
            ctx.respond(preflight);
            return Ok(Flow::Halt);
        }
        Ok(Flow::Continue)
    }

    fn name(&self) -> &'static str {
        "CorsHook"
    }
}

/// Token bucket rate limiter keyed by the `x-client-ip` header
pub struct RateLimitHook {
    /// Maximum burst capacity
    capacity: u64,
    /// Tokens refilled per second
    refill_per_sec: u64,
    /// Per-key buckets
    state: Mutex<Buckets>,
}

/// Idle buckets are swept at most this often
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Buckets {
    by_key: HashMap<String, Bucket>,
    last_sweep: Instant,
}

struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

impl RateLimitHook {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(Buckets {
                by_key: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn from_params(params: &HookParams) -> anyhow::Result<Self> {
        let capacity = u64_param(params, "capacity")?.unwrap_or(60);
        let refill_per_sec = u64_param(params, "refill_per_sec")?.unwrap_or(1);
        anyhow::ensure!(capacity > 0, "param 'capacity' must be at least 1");
        Ok(Self::new(capacity, refill_per_sec))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn refill_since(&self, bucket: &Bucket, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        (elapsed.as_secs_f64() * self.refill_per_sec as f64) as u64
    }

    fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // a bucket that has refilled to capacity is indistinguishable from a new one
        if self.refill_per_sec > 0 && now.saturating_duration_since(state.last_sweep) >= SWEEP_INTERVAL {
            state
                .by_key
                .retain(|_, b| b.tokens.saturating_add(self.refill_since(b, now)) < self.capacity);
            state.last_sweep = now;
        }

        let bucket = state.by_key.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });
        let refill = self.refill_since(bucket, now);
        if refill > 0 {
            bucket.tokens = bucket.tokens.saturating_add(refill).min(self.capacity);
            bucket.last_refill = now;
        }
        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }
}

impl Hook for RateLimitHook {
    fn handle(&self, ctx: &mut Context, _params: &HookParams) -> anyhow::Result<Flow> {
        let key = ctx.request().header("x-client-ip").unwrap_or("unknown");
        if self.allow(key) {
            return Ok(Flow::Continue);
        }

        debug!(client = %key, path = %ctx.path(), "Rate limit exceeded");
        ctx.respond(Response::error(429, "Rate limit exceeded"));
        Ok(Flow::Halt)
    }

    fn name(&self) -> &'static str {
        "RateLimitHook"
    }
}
