//! Prepared statements bound to their executor.

use sqlguard_core::{Context, PreparedStatement, Result, Row, Value};

use crate::executor::OneRow;

/// Implemented by the executors a statement can be bound to.
pub(crate) trait StatementOwner {
    fn execute_prepared(&self, ctx: &Context, stmt: &PreparedStatement, args: &[Value])
    -> Result<u64>;

    fn query_prepared(
        &self,
        ctx: &Context,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> Result<Vec<Row>>;

    fn query_one_prepared(&self, ctx: &Context, stmt: &PreparedStatement, args: &[Value])
    -> OneRow;
}

/// A prepared statement, reusable for as long as its executor lives.
///
/// Every run goes through the same hooks and error mapping as the executor's own
/// operations. A statement prepared inside a transaction fails with
/// [`Error::TransactionClosed`](sqlguard_core::Error::TransactionClosed) once that
/// transaction has ended.
pub struct Statement<'e> {
    owner: &'e dyn StatementOwner,
    prepared: PreparedStatement,
}

impl<'e> Statement<'e> {
    pub(crate) fn new(owner: &'e dyn StatementOwner, prepared: PreparedStatement) -> Self {
        Self { owner, prepared }
    }

    pub fn sql(&self) -> &str {
        self.prepared.sql()
    }

    pub fn prepared(&self) -> &PreparedStatement {
        &self.prepared
    }

    pub fn execute(&self, ctx: &Context, args: &[Value]) -> Result<u64> {
        self.owner.execute_prepared(ctx, &self.prepared, args)
    }

    pub fn query(&self, ctx: &Context, args: &[Value]) -> Result<Vec<Row>> {
        self.owner.query_prepared(ctx, &self.prepared, args)
    }

    pub fn query_one(&self, ctx: &Context, args: &[Value]) -> OneRow {
        self.owner.query_one_prepared(ctx, &self.prepared, args)
    }
}

impl std::fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("prepared", &self.prepared)
            .finish_non_exhaustive()
    }
}
