//! The statement contract shared by [`Database`](crate::Database) and
//! [`Transaction`](crate::Transaction).

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlguard_core::{
    Context, DriverResult, Error, ErrorKind, ErrorMapper, FromValue, HookChain, RawError, Result,
    Row, Value,
};

use crate::statement::Statement;

/// Statement execution, whether or not a transaction is open.
///
/// Code written against `&dyn Executor` (or `&impl Executor`) runs unchanged on a
/// pooled connection and inside [`Database::run_in_transaction`](crate::Database::run_in_transaction).
pub trait Executor {
    /// Run a statement that returns no rows; yields the affected row count.
    fn execute(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<u64>;

    fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Vec<Row>>;

    /// Run a query expected to produce at most one row.
    ///
    /// A missing row is not an error until the caller asks for it with [`OneRow::row`].
    fn query_one(&self, ctx: &Context, sql: &str, args: &[Value]) -> OneRow;

    /// Prepare a statement bound to this executor.
    fn prepare(&self, ctx: &Context, sql: &str) -> Result<Statement<'_>>;
}

// ==================== OneRow ====================

/// Deferred result of [`Executor::query_one`].
#[must_use = "a OneRow does nothing until it is consumed"]
pub struct OneRow {
    result: Result<Option<Row>>,
    mapper: Arc<dyn ErrorMapper>,
}

impl OneRow {
    pub(crate) fn new(result: Result<Option<Row>>, mapper: Arc<dyn ErrorMapper>) -> Self {
        Self { result, mapper }
    }

    /// The row, or a `NotFound` error when the query matched nothing.
    pub fn row(self) -> Result<Row> {
        match self.result {
            Ok(Some(row)) => Ok(row),
            Ok(None) => Err(self.mapper.map(Error::Raw(RawError::NoRows))),
            Err(err) => Err(err),
        }
    }

    /// The row if there was one; zero rows is `Ok(None)`.
    pub fn optional(self) -> Result<Option<Row>> {
        self.result
    }

    /// Decode one column of the row.
    pub fn get<T: FromValue>(self, index: usize) -> Result<T> {
        self.row()?.get_as(index)
    }

    /// Whether the query failed outright (a missing row does not count).
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

impl std::fmt::Debug for OneRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneRow")
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

/// Convenience for callers that only care about the kind of a failed lookup.
pub fn is_not_found<T>(result: &Result<T>) -> bool {
    matches!(result, Err(e) if e.kind() == ErrorKind::NotFound)
}

// ==================== Pipeline ====================

/// Timeout, hooks, dispatch, classification, hooks: the path every statement takes.
#[derive(Clone, Copy)]
pub(crate) struct Pipeline<'a> {
    pub(crate) hooks: &'a HookChain,
    pub(crate) mapper: &'a dyn ErrorMapper,
    pub(crate) default_timeout: Option<Duration>,
}

impl Pipeline<'_> {
    /// Caller deadlines win; the default applies only to contexts without one.
    pub(crate) fn context(&self, ctx: &Context) -> Context {
        ctx.or_timeout(self.default_timeout)
    }

    pub(crate) fn classify(&self, err: RawError) -> Error {
        self.mapper.map(Error::Raw(err))
    }

    pub(crate) fn run<T>(
        &self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
        dispatch: impl FnOnce(&Context) -> DriverResult<T>,
    ) -> Result<T> {
        let ctx = self.context(ctx);
        self.hooks.before(&ctx, sql, args);

        let start = Instant::now();
        let raw = match ctx.err() {
            Some(done) => Err(RawError::Context(done)),
            None => dispatch(&ctx),
        };
        let elapsed = start.elapsed();

        let result = raw.map_err(|e| self.classify(e));
        self.hooks
            .after(&ctx, sql, args, elapsed, result.as_ref().err());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlguard_core::DefaultErrorMapper;

    fn mapper() -> Arc<dyn ErrorMapper> {
        Arc::new(DefaultErrorMapper::new())
    }

    #[test]
    fn test_missing_row_is_not_found_only_when_consumed() {
        let one = OneRow::new(Ok(None), mapper());
        assert!(!one.is_err());
        let err = one.row().unwrap_err();
        assert!(err.is_not_found());

        let one = OneRow::new(Ok(None), mapper());
        assert!(one.optional().unwrap().is_none());
    }

    #[test]
    fn test_query_error_passes_through() {
        let failed = Error::classified(ErrorKind::Deadlock, RawError::backend("x"));
        let one = OneRow::new(Err(failed), mapper());
        assert!(one.row().unwrap_err().is_deadlock());
    }

    #[test]
    fn test_pipeline_refuses_done_context() {
        let hooks = HookChain::default();
        let mapper = DefaultErrorMapper::new();
        let pipeline = Pipeline {
            hooks: &hooks,
            mapper: &mapper,
            default_timeout: None,
        };
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();

        let mut dispatched = false;
        let result = pipeline.run(&ctx, "SELECT 1", &[], |_| {
            dispatched = true;
            Ok(1_u64)
        });
        assert!(!dispatched);
        assert!(result.unwrap_err().is_timeout());
    }

    #[test]
    fn test_is_not_found_helper() {
        let missing: Result<()> = Err(Error::classified(ErrorKind::NotFound, RawError::NoRows));
        assert!(is_not_found(&missing));
        assert!(!is_not_found(&Ok::<_, Error>(())));
    }
}
