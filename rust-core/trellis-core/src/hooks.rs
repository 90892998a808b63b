//! # Hook Registry
//!
//! Named, priority-ordered hooks bound to lifecycle events.
//!
//! A binding is either a **callback** (a closure) or a **class** (a factory
//! registered under a class name and instantiated lazily with bound params).
//! Class instances are created on first resolution and cached for the life of
//! the registry, so they are shared by every request the worker handles.
//!
//! Bindings for one event run in `(priority, registration order)` order, lower
//! priority first. Global bindings run for every request; route-scoped
//! bindings run only when the matched route lists their alias.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::router::Router;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Lifecycle events hooks can bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    /// After matching, before the handler
    BeforeDispatch,
    /// After the handler produced a response
    AfterDispatch,
    /// No route matched the request
    OnNotFound,
    /// A hook or the handler failed
    OnError,
}

impl HookEvent {
    /// Every event, in lifecycle order
    pub const ALL: [Self; 4] = [
        Self::BeforeDispatch,
        Self::AfterDispatch,
        Self::OnNotFound,
        Self::OnError,
    ];

    /// Stable identifier
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeforeDispatch => "before-dispatch",
            Self::AfterDispatch => "after-dispatch",
            Self::OnNotFound => "on-not-found",
            Self::OnError => "on-error",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| Error::UnknownName {
                kind: "event",
                value: s.to_string(),
            })
    }
}

/// Construction parameters bound to a hook
pub type HookParams = Map<String, Value>;

/// Convert a JSON object into [`HookParams`]; anything else yields no params
#[must_use]
pub fn hook_params(value: Value) -> HookParams {
    match value {
        Value::Object(map) => map,
        _ => HookParams::new(),
    }
}

/// What the pipeline does after a hook returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next hook (or the handler)
    Continue,
    /// Stop here; the context is the final, already-handled result
    Halt,
}

/// Hook implemented as a type, instantiated from a registered class factory
pub trait Hook: Send + Sync {
    /// Process the request context
    ///
    /// Instances are shared across requests; per-request state belongs in the
    /// context, not in `self`.
    ///
    /// # Errors
    ///
    /// Any error becomes a hook fault handled by the dispatcher.
    fn handle(&self, ctx: &mut Context, params: &HookParams) -> anyhow::Result<Flow>;

    /// Hook name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Callback-kind hook
pub type HookCallback = Arc<dyn Fn(&mut Context) -> anyhow::Result<Flow> + Send + Sync>;

/// Factory building a class-kind hook from its bound params
pub type HookFactory = Arc<dyn Fn(&HookParams) -> anyhow::Result<Arc<dyn Hook>> + Send + Sync>;

/// Which requests a binding applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookScope {
    /// Every request reaching the event
    Global,
    /// Only requests whose route lists the alias
    Route,
}

enum HookKind {
    Callback(HookCallback),
    Class {
        class: String,
        factory: HookFactory,
        instance: Mutex<Option<Arc<dyn Hook>>>,
    },
}

/// A resolved binding, ready to invoke
#[derive(Clone)]
pub enum Resolved {
    /// Callback binding
    Callback(HookCallback),
    /// Cached class instance
    Instance(Arc<dyn Hook>),
}

/// A registered hook
pub struct HookBinding {
    alias: String,
    event: HookEvent,
    priority: i32,
    seq: u64,
    scope: HookScope,
    params: HookParams,
    kind: HookKind,
}

impl HookBinding {
    /// Unique alias
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Bound event
    #[must_use]
    pub const fn event(&self) -> HookEvent {
        self.event
    }

    /// Priority (lower runs first)
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Scope of the binding
    #[must_use]
    pub const fn scope(&self) -> HookScope {
        self.scope
    }

    /// Bound construction params
    #[must_use]
    pub const fn params(&self) -> &HookParams {
        &self.params
    }

    /// Whether the binding is class-kind
    #[must_use]
    pub const fn is_class(&self) -> bool {
        matches!(self.kind, HookKind::Class { .. })
    }

    /// Whether a class-kind binding already holds its instance
    #[must_use]
    pub fn is_instantiated(&self) -> bool {
        match &self.kind {
            HookKind::Callback(_) => false,
            HookKind::Class { instance, .. } => lock(instance).is_some(),
        }
    }

    /// Resolve to something invokable, instantiating a class on first use
    ///
    /// Construction happens under the instance lock, so a class is built at
    /// most once even when workers race on the first request.
    ///
    /// # Errors
    ///
    /// Returns `Error::HookFault` when the factory fails or panics; the next
    /// resolution tries again.
    pub fn resolve(&self) -> Result<Resolved> {
        match &self.kind {
            HookKind::Callback(callback) => Ok(Resolved::Callback(Arc::clone(callback))),
            HookKind::Class {
                class,
                factory,
                instance,
            } => {
                let mut slot = lock(instance);
                if let Some(hook) = slot.as_ref() {
                    return Ok(Resolved::Instance(Arc::clone(hook)));
                }
                let reason = match catch_unwind(AssertUnwindSafe(|| factory(&self.params))) {
                    Ok(Ok(hook)) => Ok(hook),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
                };
                let hook = reason.map_err(|reason| Error::HookFault {
                    alias: self.alias.clone(),
                    stage: self.event.to_string(),
                    message: format!("failed to construct {class}: {reason}"),
                })?;
                debug!(alias = %self.alias, class = %class, "Hook instance created");
                *slot = Some(Arc::clone(&hook));
                Ok(Resolved::Instance(hook))
            }
        }
    }

    fn invoke(&self, ctx: &mut Context) -> Result<Flow> {
        let resolved = self.resolve()?;
        let outcome = catch_unwind(AssertUnwindSafe(|| match &resolved {
            Resolved::Callback(callback) => callback(ctx),
            Resolved::Instance(hook) => hook.handle(ctx, &self.params),
        }));

        let message = match outcome {
            Ok(Ok(flow)) => return Ok(flow),
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => format!("hook panicked: {}", panic_message(panic.as_ref())),
        };
        Err(Error::HookFault {
            alias: self.alias.clone(),
            stage: self.event.to_string(),
            message,
        })
    }
}

impl fmt::Debug for HookBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            HookKind::Callback(_) => "callback".to_string(),
            HookKind::Class { class, .. } => format!("class:{class}"),
        };
        f.debug_struct("HookBinding")
            .field("alias", &self.alias)
            .field("event", &self.event)
            .field("priority", &self.priority)
            .field("scope", &self.scope)
            .field("kind", &kind)
            .finish_non_exhaustive()
    }
}

/// Result of running one event's pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every selected hook returned `Flow::Continue`
    Completed,
    /// A hook halted the pipeline
    Halted {
        /// Alias of the halting hook
        alias: String,
    },
}

/// Registry of hook classes and bindings
#[derive(Default)]
pub struct HookRegistry {
    classes: HashMap<String, HookFactory>,
    bindings: HashMap<String, Arc<HookBinding>>,
    by_event: HashMap<HookEvent, Vec<Arc<HookBinding>>>,
    next_seq: u64,
}

impl HookRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in hook classes defined
    #[must_use]
    pub fn with_builtin_classes() -> Self {
        let mut registry = Self::new();
        crate::middleware::define_builtin_classes(&mut registry);
        registry
    }

    /// Define a hook class under a name
    pub fn define_class<H, F>(&mut self, class: impl Into<String>, factory: F)
    where
        H: Hook + 'static,
        F: Fn(&HookParams) -> anyhow::Result<H> + Send + Sync + 'static,
    {
        let factory: HookFactory =
            Arc::new(move |params| Ok(Arc::new(factory(params)?) as Arc<dyn Hook>));
        self.classes.insert(class.into(), factory);
    }

    /// Whether a class name is defined
    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Register an anonymous global callback, returning its generated alias
    pub fn register_callback<F>(&mut self, event: HookEvent, priority: i32, callback: F) -> String
    where
        F: Fn(&mut Context) -> anyhow::Result<Flow> + Send + Sync + 'static,
    {
        let mut alias = format!("{event}#{}", self.next_seq);
        while self.bindings.contains_key(&alias) {
            self.next_seq += 1;
            alias = format!("{event}#{}", self.next_seq);
        }
        self.insert(
            alias.clone(),
            event,
            priority,
            HookScope::Global,
            HookParams::new(),
            HookKind::Callback(Arc::new(callback)),
        );
        alias
    }

    /// Register a named callback
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateHookAlias` if the alias is taken.
    pub fn register_named_callback<F>(
        &mut self,
        alias: impl Into<String>,
        event: HookEvent,
        priority: i32,
        scope: HookScope,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&mut Context) -> anyhow::Result<Flow> + Send + Sync + 'static,
    {
        let alias = self.free_alias(alias.into())?;
        self.insert(
            alias,
            event,
            priority,
            scope,
            HookParams::new(),
            HookKind::Callback(Arc::new(callback)),
        );
        Ok(())
    }

    /// Register a route-scoped class binding
    ///
    /// # Errors
    ///
    /// - `Error::DuplicateHookAlias` if the alias is taken
    /// - `Error::UnknownHookClass` if the class was never defined
    pub fn register_class(
        &mut self,
        alias: impl Into<String>,
        class: &str,
        event: HookEvent,
        priority: i32,
        params: HookParams,
    ) -> Result<()> {
        self.register_class_scoped(alias, class, event, priority, params, HookScope::Route)
    }

    /// Register a class binding that runs for every request
    ///
    /// # Errors
    ///
    /// Same as [`HookRegistry::register_class`].
    pub fn register_global_class(
        &mut self,
        alias: impl Into<String>,
        class: &str,
        event: HookEvent,
        priority: i32,
        params: HookParams,
    ) -> Result<()> {
        self.register_class_scoped(alias, class, event, priority, params, HookScope::Global)
    }

    fn register_class_scoped(
        &mut self,
        alias: impl Into<String>,
        class: &str,
        event: HookEvent,
        priority: i32,
        params: HookParams,
        scope: HookScope,
    ) -> Result<()> {
        let alias = self.free_alias(alias.into())?;
        let factory = self
            .classes
            .get(class)
            .cloned()
            .ok_or_else(|| Error::UnknownHookClass {
                class: class.to_string(),
            })?;

        self.insert(
            alias,
            event,
            priority,
            scope,
            params,
            HookKind::Class {
                class: class.to_string(),
                factory,
                instance: Mutex::new(None),
            },
        );
        Ok(())
    }

    fn free_alias(&self, alias: String) -> Result<String> {
        if self.bindings.contains_key(&alias) {
            return Err(Error::DuplicateHookAlias { alias });
        }
        Ok(alias)
    }

    fn insert(
        &mut self,
        alias: String,
        event: HookEvent,
        priority: i32,
        scope: HookScope,
        params: HookParams,
        kind: HookKind,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let binding = Arc::new(HookBinding {
            alias: alias.clone(),
            event,
            priority,
            seq,
            scope,
            params,
            kind,
        });

        let list = self.by_event.entry(event).or_default();
        // ties keep registration order: insert after every equal priority
        let at = list.partition_point(|b| b.priority <= priority);
        list.insert(at, Arc::clone(&binding));

        debug!(alias = %alias, event = %event, priority, scope = ?scope, "Hook registered");
        self.bindings.insert(alias, binding);
    }

    /// Look up a binding by alias
    #[must_use]
    pub fn binding(&self, alias: &str) -> Option<&Arc<HookBinding>> {
        self.bindings.get(alias)
    }

    /// Resolve a binding by alias
    ///
    /// # Errors
    ///
    /// - `Error::UnknownHook` if no binding has the alias
    /// - `Error::HookFault` if class construction fails
    pub fn resolve(&self, alias: &str) -> Result<Resolved> {
        self.bindings
            .get(alias)
            .ok_or_else(|| Error::UnknownHook {
                alias: alias.to_string(),
            })?
            .resolve()
    }

    /// Ordered bindings for an event
    ///
    /// Global bindings are always selected; route-scoped bindings only when
    /// their alias appears in `route_aliases`.
    pub fn pipeline<'a>(
        &'a self,
        event: HookEvent,
        route_aliases: &'a [String],
    ) -> impl Iterator<Item = &'a Arc<HookBinding>> + 'a {
        self.by_event
            .get(&event)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(move |b| {
                b.scope == HookScope::Global || route_aliases.iter().any(|a| *a == b.alias)
            })
    }

    /// Run an event's pipeline against the context
    ///
    /// Stops at the first hook returning [`Flow::Halt`]. A failing or
    /// panicking hook stops the pipeline with `Error::HookFault`; the context
    /// keeps whatever the hooks wrote before the fault.
    ///
    /// # Errors
    ///
    /// Returns `Error::HookFault` naming the failing alias and event.
    pub fn run_pipeline(
        &self,
        event: HookEvent,
        route_aliases: &[String],
        ctx: &mut Context,
    ) -> Result<PipelineOutcome> {
        for binding in self.pipeline(event, route_aliases) {
            if binding.invoke(ctx)? == Flow::Halt {
                return Ok(PipelineOutcome::Halted {
                    alias: binding.alias.clone(),
                });
            }
        }
        Ok(PipelineOutcome::Completed)
    }

    /// Check that every hook alias used by a route is registered
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownHookAlias` for the first unresolved alias.
    pub fn validate_routes(&self, router: &Router) -> Result<()> {
        for route in router.routes() {
            if let Some(alias) = route.hooks.iter().find(|a| !self.bindings.contains_key(*a)) {
                return Err(Error::UnknownHookAlias {
                    alias: alias.clone(),
                    route: format!("{} {}", route.method, route.path()),
                });
            }
        }
        Ok(())
    }

    /// Number of bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no bindings are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn trace(ctx: &mut Context, name: &str) {
        let mut seen = ctx
            .attribute("trace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !seen.is_empty() {
            seen.push(',');
        }
        seen.push_str(name);
        ctx.set_attribute("trace", seen);
    }

    fn traced(ctx: &Context) -> String {
        ctx.attribute("trace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    struct Tag {
        label: String,
    }

    impl Hook for Tag {
        fn handle(&self, ctx: &mut Context, _params: &HookParams) -> anyhow::Result<Flow> {
            trace(ctx, &self.label);
            Ok(Flow::Continue)
        }
    }

    fn registry_with_tag_class(constructed: Arc<AtomicUsize>) -> HookRegistry {
        let mut registry = HookRegistry::new();
        registry.define_class("tag", move |params| {
            constructed.fetch_add(1, Ordering::SeqCst);
            let label = params
                .get("label")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("missing label"))?;
            Ok(Tag {
                label: label.to_string(),
            })
        });
        registry
    }

    #[test]
    fn test_lower_priority_runs_first() {
        let mut registry = HookRegistry::new();
        registry
            .register_named_callback("log", HookEvent::BeforeDispatch, 5, HookScope::Global, |ctx| {
                trace(ctx, "log");
                Ok(Flow::Continue)
            })
            .unwrap();
        registry
            .register_named_callback("cors", HookEvent::BeforeDispatch, 1, HookScope::Global, |ctx| {
                trace(ctx, "cors");
                Ok(Flow::Continue)
            })
            .unwrap();

        let mut ctx = Context::for_test("/");
        let outcome = registry
            .run_pipeline(HookEvent::BeforeDispatch, &[], &mut ctx)
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed);
        assert_eq!(traced(&ctx), "cors,log");
    }

    #[test]
    fn test_equal_priorities_keep_registration_order() {
        let mut registry = HookRegistry::new();
        for name in ["a", "b", "c"] {
            registry.register_callback(HookEvent::AfterDispatch, 10, move |ctx| {
                trace(ctx, name);
                Ok(Flow::Continue)
            });
        }
        registry.register_callback(HookEvent::AfterDispatch, 0, |ctx| {
            trace(ctx, "first");
            Ok(Flow::Continue)
        });

        let mut ctx = Context::for_test("/");
        registry
            .run_pipeline(HookEvent::AfterDispatch, &[], &mut ctx)
            .unwrap();
        assert_eq!(traced(&ctx), "first,a,b,c");
    }

    #[test]
    fn test_halt_stops_pipeline() {
        let mut registry = HookRegistry::new();
        registry.register_callback(HookEvent::BeforeDispatch, 1, |ctx| {
            trace(ctx, "guard");
            Ok(Flow::Halt)
        });
        registry.register_callback(HookEvent::BeforeDispatch, 2, |ctx| {
            trace(ctx, "never");
            Ok(Flow::Continue)
        });

        let mut ctx = Context::for_test("/");
        let outcome = registry
            .run_pipeline(HookEvent::BeforeDispatch, &[], &mut ctx)
            .unwrap();
        assert!(matches!(outcome, PipelineOutcome::Halted { ref alias } if alias.starts_with("before-dispatch#")));
        assert_eq!(traced(&ctx), "guard");
    }

    #[test]
    fn test_route_scoped_bindings_need_alias() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let mut registry = registry_with_tag_class(Arc::clone(&constructed));
        registry
            .register_class(
                "audit",
                "tag",
                HookEvent::BeforeDispatch,
                0,
                hook_params(serde_json::json!({ "label": "audit" })),
            )
            .unwrap();
        registry.register_callback(HookEvent::BeforeDispatch, 5, |ctx| {
            trace(ctx, "global");
            Ok(Flow::Continue)
        });

        let mut ctx = Context::for_test("/");
        registry
            .run_pipeline(HookEvent::BeforeDispatch, &[], &mut ctx)
            .unwrap();
        assert_eq!(traced(&ctx), "global");
        assert_eq!(constructed.load(Ordering::SeqCst), 0);

        let mut ctx = Context::for_test("/");
        registry
            .run_pipeline(HookEvent::BeforeDispatch, &["audit".to_string()], &mut ctx)
            .unwrap();
        assert_eq!(traced(&ctx), "audit,global");
    }

    #[test]
    fn test_class_instance_created_once() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let mut registry = registry_with_tag_class(Arc::clone(&constructed));
        registry
            .register_global_class(
                "tagger",
                "tag",
                HookEvent::AfterDispatch,
                0,
                hook_params(serde_json::json!({ "label": "t" })),
            )
            .unwrap();

        assert!(!registry.binding("tagger").unwrap().is_instantiated());
        for _ in 0..3 {
            let mut ctx = Context::for_test("/");
            registry
                .run_pipeline(HookEvent::AfterDispatch, &[], &mut ctx)
                .unwrap();
        }
        assert!(matches!(registry.resolve("tagger"), Ok(Resolved::Instance(_))));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert!(registry.binding("tagger").unwrap().is_instantiated());
    }

    #[test]
    fn test_failed_construction_is_a_fault_and_retried() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let mut registry = registry_with_tag_class(Arc::clone(&constructed));
        registry
            .register_global_class("broken", "tag", HookEvent::BeforeDispatch, 0, HookParams::new())
            .unwrap();

        for _ in 0..2 {
            let mut ctx = Context::for_test("/");
            let err = registry
                .run_pipeline(HookEvent::BeforeDispatch, &[], &mut ctx)
                .unwrap_err();
            assert!(matches!(err, Error::HookFault { ref alias, .. } if alias == "broken"));
        }
        assert_eq!(constructed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_hook_error_and_panic_become_faults() {
        let mut registry = HookRegistry::new();
        registry
            .register_named_callback("fails", HookEvent::OnNotFound, 0, HookScope::Global, |ctx| {
                trace(ctx, "partial");
                anyhow::bail!("backend unavailable")
            })
            .unwrap();

        let mut ctx = Context::for_test("/");
        let err = registry
            .run_pipeline(HookEvent::OnNotFound, &[], &mut ctx)
            .unwrap_err();
        assert!(err.to_string().contains("backend unavailable"));
        assert!(err.to_string().contains("on-not-found"));
        assert_eq!(traced(&ctx), "partial");

        let mut registry = HookRegistry::new();
        registry.register_callback(HookEvent::OnNotFound, 0, |_| panic!("kaboom"));
        let mut ctx = Context::for_test("/");
        let err = registry
            .run_pipeline(HookEvent::OnNotFound, &[], &mut ctx)
            .unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn test_registration_errors() {
        let mut registry = HookRegistry::new();
        assert!(matches!(
            registry.register_class("x", "missing", HookEvent::OnError, 0, HookParams::new()),
            Err(Error::UnknownHookClass { .. })
        ));

        registry
            .register_named_callback("dup", HookEvent::OnError, 0, HookScope::Global, |_| {
                Ok(Flow::Continue)
            })
            .unwrap();
        assert!(matches!(
            registry.register_named_callback("dup", HookEvent::OnError, 0, HookScope::Global, |_| {
                Ok(Flow::Continue)
            }),
            Err(Error::DuplicateHookAlias { .. })
        ));
        assert!(matches!(
            registry.resolve("nope"),
            Err(Error::UnknownHook { .. })
        ));
    }

    #[test]
    fn test_generated_alias_skips_named_bindings() {
        let mut registry = HookRegistry::new();
        registry
            .register_named_callback(
                "before-dispatch#1",
                HookEvent::BeforeDispatch,
                0,
                HookScope::Global,
                |_| Ok(Flow::Continue),
            )
            .unwrap();

        let alias = registry.register_callback(HookEvent::BeforeDispatch, 0, |_| Ok(Flow::Continue));
        assert_ne!(alias, "before-dispatch#1");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.pipeline(HookEvent::BeforeDispatch, &[]).count(), 2);
        assert!(registry.binding("before-dispatch#1").is_some());
        assert!(registry.binding(&alias).is_some());
    }

    #[test]
    fn test_event_names_round_trip() {
        for event in HookEvent::ALL {
            assert_eq!(event.as_str().parse::<HookEvent>().unwrap(), event);
        }
        assert!("before".parse::<HookEvent>().is_err());
        assert_eq!(
            serde_json::to_string(&HookEvent::OnNotFound).unwrap(),
            r#""on-not-found""#
        );
    }
}
