//! # Dispatcher
//!
//! Drives a request through the lifecycle:
//!
//! ```text
//! Matched -> HooksRunning -> HandlerRunning -> Completed
//!                 |                |
//!                 +--> Halted      +--> Failed
//! (no match) -> NotFound
//! ```
//!
//! A halt is a successful short-circuit: the context's response is returned
//! as-is and neither the handler nor the after-dispatch hooks run. Faults from
//! hooks or the handler (errors and panics alike) are logged with the failing
//! alias, passed through the `on-error` pipeline and end as a 500 unless an
//! error hook responds.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::hooks::{panic_message, HookEvent, HookRegistry, PipelineOutcome};
use crate::request::Request;
use crate::response::Response;
use crate::route::Route;
use crate::router::Router;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const HANDLER_STAGE: &str = "handler";

/// Where a request ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestState {
    /// A route matched
    Matched,
    /// Before-dispatch hooks are running
    HooksRunning,
    /// The handler is running
    HandlerRunning,
    /// The handler finished and after-dispatch hooks ran
    Completed,
    /// A before-dispatch hook halted the pipeline
    Halted,
    /// No route matched
    NotFound,
    /// A hook or the handler faulted
    Failed,
}

impl RequestState {
    /// Whether the request reached a final state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Halted | Self::NotFound | Self::Failed
        )
    }
}

/// Outcome of dispatching one request
#[derive(Debug)]
pub struct Dispatched {
    /// Terminal state
    pub state: RequestState,
    /// Final context (after hooks, handler and error handling); its
    /// response slot holds the same response as `response`
    pub context: Context,
    /// Response to send
    pub response: Response,
}

impl Dispatched {
    fn settle(state: RequestState, mut context: Context, fallback: impl FnOnce() -> Response) -> Self {
        let response = context.response().cloned().unwrap_or_else(fallback);
        context.respond(response.clone());
        Self {
            state,
            context,
            response,
        }
    }
}

/// Snapshot of dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Requests that ran the handler to completion
    pub completed: u64,
    /// Requests short-circuited by a hook
    pub halted: u64,
    /// Requests with no matching route
    pub not_found: u64,
    /// Requests that ended in a fault
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    halted: AtomicU64,
    not_found: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(&self, state: RequestState) {
        let counter = match state {
            RequestState::Completed => &self.completed,
            RequestState::Halted => &self.halted,
            RequestState::NotFound => &self.not_found,
            RequestState::Failed => &self.failed,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            completed: self.completed.load(Ordering::Relaxed),
            halted: self.halted.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Request dispatcher over a frozen router and hook registry
///
/// Cheap to clone; clones share the router, registry (and its cached hook
/// instances) and counters.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    router: Arc<Router>,
    hooks: Arc<HookRegistry>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Create a dispatcher
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownHookAlias` if a route references an alias the
    /// registry does not know.
    pub fn new(router: Router, hooks: HookRegistry) -> Result<Self> {
        hooks.validate_routes(&router)?;
        info!(
            routes_count = router.len(),
            hooks_count = hooks.len(),
            "Dispatcher ready"
        );
        Ok(Self {
            router: Arc::new(router),
            hooks: Arc::new(hooks),
            counters: Arc::new(Counters::default()),
        })
    }

    /// The router
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The hook registry
    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Dispatch a request to completion
    ///
    /// Never fails: every outcome, including faults, is expressed as a
    /// response and a terminal [`RequestState`].
    pub async fn dispatch(&self, request: Request) -> Dispatched {
        let target = self.router.target(request.method, request.uri());
        let mut ctx = Context::new(request, target);

        let dispatched = match self.router.match_target(ctx.target()) {
            Ok(matched) => {
                let route = Arc::clone(&matched.route);
                ctx.bind_match(matched);
                debug!(request_id = %ctx.request_id(), state = ?RequestState::Matched, "Dispatching");
                self.run_route(&route, ctx).await
            }
            Err(Error::RouteNotFound { .. }) => self.not_found(ctx),
            Err(e) => {
                let fault = Error::HookFault {
                    alias: "router".to_string(),
                    stage: "match".to_string(),
                    message: e.to_string(),
                };
                self.fail(ctx, &[], &fault)
            }
        };

        self.counters.record(dispatched.state);
        dispatched
    }

    async fn run_route(&self, route: &Arc<Route>, mut ctx: Context) -> Dispatched {
        debug!(request_id = %ctx.request_id(), state = ?RequestState::HooksRunning, "Running hooks");
        match self
            .hooks
            .run_pipeline(HookEvent::BeforeDispatch, &route.hooks, &mut ctx)
        {
            Ok(PipelineOutcome::Completed) => {}
            Ok(PipelineOutcome::Halted { alias }) => {
                let halted = Dispatched::settle(RequestState::Halted, ctx, Response::default);
                info!(
                    request_id = %halted.context.request_id(),
                    alias = %alias,
                    status = halted.response.status,
                    "Request halted by hook"
                );
                return halted;
            }
            Err(fault) => return self.fail(ctx, &route.hooks, &fault),
        }

        debug!(request_id = %ctx.request_id(), state = ?RequestState::HandlerRunning, "Running handler");
        let snapshot = ctx.clone();
        let mut ctx = match tokio::spawn((route.handler())(ctx)).await {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => {
                let fault = handler_fault(format!("{e:#}"));
                return self.fail(snapshot, &route.hooks, &fault);
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!(
                        "handler panicked: {}",
                        panic_message(join_err.into_panic().as_ref())
                    )
                } else {
                    "handler task was cancelled".to_string()
                };
                return self.fail(snapshot, &route.hooks, &handler_fault(message));
            }
        };

        if ctx.response().is_none() {
            ctx.respond(Response::default());
        }

        match self
            .hooks
            .run_pipeline(HookEvent::AfterDispatch, &route.hooks, &mut ctx)
        {
            Ok(PipelineOutcome::Completed) => {}
            Ok(PipelineOutcome::Halted { alias }) => {
                debug!(request_id = %ctx.request_id(), alias = %alias, "After-dispatch hooks stopped early");
            }
            Err(fault) => return self.fail(ctx, &route.hooks, &fault),
        }

        Dispatched::settle(RequestState::Completed, ctx, Response::default)
    }

    fn not_found(&self, mut ctx: Context) -> Dispatched {
        match self.hooks.run_pipeline(HookEvent::OnNotFound, &[], &mut ctx) {
            Ok(_) => {
                let missed = Dispatched::settle(RequestState::NotFound, ctx, Response::not_found);
                debug!(
                    request_id = %missed.context.request_id(),
                    method = %missed.context.method(),
                    path = %missed.context.path(),
                    status = missed.response.status,
                    "Request not found"
                );
                missed
            }
            Err(fault) => self.fail(ctx, &[], &fault),
        }
    }

    fn fail(&self, mut ctx: Context, route_hooks: &[String], fault: &Error) -> Dispatched {
        match fault {
            Error::HookFault {
                alias,
                stage,
                message,
            } => error!(
                request_id = %ctx.request_id(),
                alias = %alias,
                stage = %stage,
                error = %message,
                "Hook fault"
            ),
            other => error!(request_id = %ctx.request_id(), error = %other, "Request failed"),
        }

        ctx.set_fault(fault.to_string());
        ctx.take_response();

        if let Err(nested) = self
            .hooks
            .run_pipeline(HookEvent::OnError, route_hooks, &mut ctx)
        {
            warn!(
                request_id = %ctx.request_id(),
                error = %nested,
                "Error hook failed; sending default error response"
            );
            ctx.take_response();
        }

        Dispatched::settle(RequestState::Failed, ctx, Response::server_error)
    }
}

fn handler_fault(message: String) -> Error {
    Error::HookFault {
        alias: HANDLER_STAGE.to_string(),
        stage: HANDLER_STAGE.to_string(),
        message,
    }
}
