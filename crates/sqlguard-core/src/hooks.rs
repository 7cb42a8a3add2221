//! Statement observers.
//!
//! A [`Hook`] sees every statement twice: before it is sent to the backend and
//! after the backend answered (with the already-classified error, if any).
//! [`HookChain`] runs hooks in registration order and contains their panics, so a
//! broken observer never breaks the statement it observes.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::ThreadId;
use std::time::Duration;

use crate::context::Context;
use crate::error::Error;
use crate::value::Value;

/// Observer invoked around every statement.
///
/// Both methods default to no-ops. Implementations should be fast; they run on the
/// calling thread while the statement waits.
pub trait Hook: Send + Sync {
    fn before_query(&self, ctx: &Context, sql: &str, args: &[Value]) {
        let _ = (ctx, sql, args);
    }

    fn after_query(
        &self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
        elapsed: Duration,
        err: Option<&Error>,
    ) {
        let _ = (ctx, sql, args, elapsed, err);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

// ==================== Hook chain ====================

/// Ordered, immutable list of hooks with per-call panic isolation.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Arc<[Arc<dyn Hook>]>,
}

impl HookChain {
    /// Build a chain, silently dropping `None` entries.
    pub fn new<I>(hooks: I) -> Self
    where
        I: IntoIterator<Item = Option<Arc<dyn Hook>>>,
    {
        Self {
            hooks: hooks.into_iter().flatten().collect(),
        }
    }

    pub fn from_hooks(hooks: Vec<Arc<dyn Hook>>) -> Self {
        Self {
            hooks: hooks.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn before(&self, ctx: &Context, sql: &str, args: &[Value]) {
        for (index, hook) in self.hooks.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook.before_query(ctx, sql, args)));
            if let Err(payload) = outcome {
                tracing::error!(
                    hook = index,
                    panic = panic_message(payload.as_ref()),
                    "Hook panicked in before_query; skipping"
                );
            }
        }
    }

    pub fn after(
        &self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
        elapsed: Duration,
        err: Option<&Error>,
    ) {
        for (index, hook) in self.hooks.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                hook.after_query(ctx, sql, args, elapsed, err);
            }));
            if let Err(payload) = outcome {
                tracing::error!(
                    hook = index,
                    panic = panic_message(payload.as_ref()),
                    "Hook panicked in after_query; skipping"
                );
            }
        }
    }
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookChain")
            .field("len", &self.hooks.len())
            .finish()
    }
}

// ==================== Built-in hooks ====================

const MAX_LOGGED_SQL: usize = 500;

fn trim_sql(sql: &str) -> &str {
    match sql.char_indices().nth(MAX_LOGGED_SQL) {
        Some((end, _)) => &sql[..end],
        None => sql,
    }
}

/// Settings for [`LogHook`].
#[derive(Debug, Clone, Default)]
pub struct LogHookConfig {
    /// Statements slower than this are logged at `warn`.
    pub slow_query_threshold: Option<Duration>,
    /// Include bound arguments in log events.
    pub log_args: bool,
}

/// Logs every statement through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LogHook {
    config: LogHookConfig,
}

impl LogHook {
    pub fn new(config: LogHookConfig) -> Self {
        Self { config }
    }
}

impl Hook for LogHook {
    fn after_query(
        &self,
        _ctx: &Context,
        sql: &str,
        args: &[Value],
        elapsed: Duration,
        err: Option<&Error>,
    ) {
        let sql = trim_sql(sql);
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let args = self.config.log_args.then(|| format!("{args:?}"));
        let args = args.as_deref();

        if let Some(err) = err {
            tracing::error!(sql, elapsed_ms, args, kind = %err.kind(), error = %err, "Query failed");
        } else if self
            .config
            .slow_query_threshold
            .is_some_and(|threshold| elapsed > threshold)
        {
            tracing::warn!(sql, elapsed_ms, args, "Slow query");
        } else {
            tracing::debug!(sql, elapsed_ms, args, "Query executed");
        }
    }
}

/// Receives one measurement per statement.
pub trait MetricsCollector: Send + Sync {
    fn record_query(&self, sql: &str, elapsed: Duration, success: bool);
}

/// Forwards statement timings to a [`MetricsCollector`].
#[derive(Debug)]
pub struct MetricsHook<C> {
    collector: C,
}

impl<C: MetricsCollector> MetricsHook<C> {
    pub fn new(collector: C) -> Self {
        Self { collector }
    }

    pub fn collector(&self) -> &C {
        &self.collector
    }
}

impl<C: MetricsCollector> Hook for MetricsHook<C> {
    fn after_query(
        &self,
        _ctx: &Context,
        sql: &str,
        _args: &[Value],
        elapsed: Duration,
        err: Option<&Error>,
    ) {
        self.collector.record_query(sql, elapsed, err.is_none());
    }
}

/// Span factory for [`TracingHook`].
pub trait Tracer: Send + Sync {
    type Span: Send;

    fn start_span(&self, ctx: &Context, sql: &str) -> Self::Span;

    fn end_span(&self, span: Self::Span, err: Option<&Error>);
}

/// Opens a span before each statement and closes it afterwards.
///
/// Statements run synchronously, so spans are kept per thread and closed in LIFO
/// order.
pub struct TracingHook<T: Tracer> {
    tracer: T,
    open: Mutex<HashMap<ThreadId, Vec<T::Span>>>,
}

impl<T: Tracer> TracingHook<T> {
    pub fn new(tracer: T) -> Self {
        Self {
            tracer,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }
}

impl<T: Tracer> Hook for TracingHook<T> {
    fn before_query(&self, ctx: &Context, sql: &str, _args: &[Value]) {
        let span = self.tracer.start_span(ctx, sql);
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        open.entry(std::thread::current().id()).or_default().push(span);
    }

    fn after_query(
        &self,
        _ctx: &Context,
        _sql: &str,
        _args: &[Value],
        _elapsed: Duration,
        err: Option<&Error>,
    ) {
        let span = {
            let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
            let id = std::thread::current().id();
            let span = open.get_mut(&id).and_then(Vec::pop);
            if open.get(&id).is_some_and(Vec::is_empty) {
                open.remove(&id);
            }
            span
        };
        if let Some(span) = span {
            self.tracer.end_span(span, err);
        }
    }
}

/// Groups several hooks so they can be registered as one.
///
/// Member hooks are not isolated from each other; register them separately on
/// the [`HookChain`] when that matters.
#[derive(Clone, Default)]
pub struct CompositeHook {
    hooks: Vec<Arc<dyn Hook>>,
}

impl CompositeHook {
    pub fn new(hooks: Vec<Arc<dyn Hook>>) -> Self {
        Self { hooks }
    }

    #[must_use]
    pub fn with(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

impl Hook for CompositeHook {
    fn before_query(&self, ctx: &Context, sql: &str, args: &[Value]) {
        for hook in &self.hooks {
            hook.before_query(ctx, sql, args);
        }
    }

    fn after_query(
        &self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
        elapsed: Duration,
        err: Option<&Error>,
    ) {
        for hook in &self.hooks {
            hook.after_query(ctx, sql, args, elapsed, err);
        }
    }
}
