//! Driver capability contract.
//!
//! A backend plugs in by implementing [`Driver`] (the shared connection handle) and
//! [`DriverTransaction`] (one exclusive transactional session). Both report failures
//! as [`RawError`](crate::RawError); classification is the session layer's job.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::DriverResult;
use crate::row::Row;
use crate::value::Value;

/// SQL backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Mysql,
    Sqlite,
}

impl Dialect {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Keyword form used in `SET TRANSACTION ISOLATION LEVEL ...`.
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for starting a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOptions {
    /// `None` keeps the backend's default level.
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// A statement prepared on a backend session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    id: u64,
    sql: String,
    param_count: usize,
}

impl PreparedStatement {
    pub fn new(id: u64, sql: impl Into<String>, param_count: usize) -> Self {
        Self {
            id,
            sql: sql.into(),
            param_count,
        }
    }

    /// Driver-assigned identifier; drivers without server-side statements use 0.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }
}

/// Connection usage snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub open_connections: usize,
    pub in_use: usize,
    pub idle: usize,
    /// 0 means unlimited.
    pub max_open: usize,
}

/// Statement-level operations shared by connections and transactions.
pub trait DriverOps {
    /// Execute a statement and return the number of affected rows.
    fn execute(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<u64>;

    fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Vec<Row>>;

    /// First row of the result, if any. Zero rows is `Ok(None)`, not an error.
    fn query_one(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Option<Row>>;

    fn prepare(&self, ctx: &Context, sql: &str) -> DriverResult<PreparedStatement>;

    fn execute_prepared(
        &self,
        ctx: &Context,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> DriverResult<u64> {
        self.execute(ctx, stmt.sql(), args)
    }

    fn query_prepared(
        &self,
        ctx: &Context,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> DriverResult<Vec<Row>> {
        self.query(ctx, stmt.sql(), args)
    }

    fn query_one_prepared(
        &self,
        ctx: &Context,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> DriverResult<Option<Row>> {
        self.query_one(ctx, stmt.sql(), args)
    }
}

/// A shared backend handle, safe for concurrent use.
pub trait Driver: DriverOps + Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Start a transaction on an exclusive session.
    fn begin<'a>(
        &'a self,
        ctx: &Context,
        opts: &TxOptions,
    ) -> DriverResult<Box<dyn DriverTransaction + 'a>>;

    fn ping(&self, ctx: &Context) -> DriverResult<()>;

    fn stats(&self) -> PoolStats {
        PoolStats::default()
    }

    fn close(&self) -> DriverResult<()> {
        Ok(())
    }
}

/// One exclusive transactional session.
///
/// `commit` and `rollback` consume the session, so a finished transaction cannot
/// be driven again.
pub trait DriverTransaction: DriverOps {
    fn commit(self: Box<Self>, ctx: &Context) -> DriverResult<()>;

    fn rollback(self: Box<Self>, ctx: &Context) -> DriverResult<()>;
}
