//! Scripted in-memory driver for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use sqlguard_core::{
    BackendError, Context, Dialect, Driver, DriverOps, DriverResult, DriverTransaction, PoolStats,
    PreparedStatement, RawError, Row, TxOptions, Value,
};

pub(crate) type ErrorFactory = fn() -> RawError;

pub(crate) fn unique_violation() -> RawError {
    RawError::Backend(
        BackendError::new("duplicate key value violates unique constraint")
            .with_dialect(Dialect::Postgres)
            .with_sqlstate("23505"),
    )
}

pub(crate) fn connection_reset() -> RawError {
    RawError::Backend(
        BackendError::new("server closed the connection unexpectedly")
            .with_dialect(Dialect::Postgres)
            .with_sqlstate("08006"),
    )
}

/// Shared state behind [`FakeDriver`]: a statement log plus failure injection.
#[derive(Default)]
pub(crate) struct Script {
    log: Mutex<Vec<String>>,
    deadlines: Mutex<Vec<Option<Instant>>>,
    failures: Mutex<HashMap<String, ErrorFactory>>,
    rows: Mutex<HashMap<String, Vec<Row>>>,
    pub(crate) fail_begin: AtomicBool,
    pub(crate) fail_commit: AtomicBool,
    pub(crate) fail_rollback: AtomicBool,
    pub(crate) fail_ping: AtomicBool,
}

impl Script {
    pub(crate) fn log(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    pub(crate) fn deadlines(&self) -> Vec<Option<Instant>> {
        lock(&self.deadlines).clone()
    }

    pub(crate) fn fail(&self, sql: &str, err: ErrorFactory) {
        lock(&self.failures).insert(sql.to_string(), err);
    }

    pub(crate) fn returns(&self, sql: &str, rows: Vec<Row>) {
        lock(&self.rows).insert(sql.to_string(), rows);
    }

    fn record(&self, ctx: &Context, entry: String) -> DriverResult<()> {
        lock(&self.deadlines).push(ctx.deadline());
        lock(&self.log).push(entry);
        if let Some(done) = ctx.err() {
            return Err(RawError::Context(done));
        }
        Ok(())
    }

    fn dispatch(&self, ctx: &Context, prefix: &str, sql: &str) -> DriverResult<Vec<Row>> {
        self.record(ctx, format!("{prefix}{sql}"))?;
        if let Some(err) = lock(&self.failures).get(sql) {
            return Err(err());
        }
        Ok(lock(&self.rows).get(sql).cloned().unwrap_or_default())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn flag(f: &AtomicBool) -> bool {
    f.load(Ordering::SeqCst)
}

struct Ops<'a> {
    script: &'a Script,
    prefix: &'static str,
}

impl DriverOps for Ops<'_> {
    fn execute(&self, ctx: &Context, sql: &str, _args: &[Value]) -> DriverResult<u64> {
        self.script.dispatch(ctx, self.prefix, sql).map(|_| 1)
    }

    fn query(&self, ctx: &Context, sql: &str, _args: &[Value]) -> DriverResult<Vec<Row>> {
        self.script.dispatch(ctx, self.prefix, sql)
    }

    fn query_one(&self, ctx: &Context, sql: &str, _args: &[Value]) -> DriverResult<Option<Row>> {
        Ok(self
            .script
            .dispatch(ctx, self.prefix, sql)?
            .into_iter()
            .next())
    }

    fn prepare(&self, ctx: &Context, sql: &str) -> DriverResult<PreparedStatement> {
        self.script
            .record(ctx, format!("{}PREPARE {sql}", self.prefix))?;
        Ok(PreparedStatement::new(0, sql, 0))
    }
}

/// Driver whose every call is logged to a [`Script`].
#[derive(Clone, Default)]
pub(crate) struct FakeDriver {
    pub(crate) script: Arc<Script>,
}

impl FakeDriver {
    fn ops(&self) -> Ops<'_> {
        Ops {
            script: &self.script,
            prefix: "",
        }
    }
}

impl DriverOps for FakeDriver {
    fn execute(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<u64> {
        self.ops().execute(ctx, sql, args)
    }

    fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Vec<Row>> {
        self.ops().query(ctx, sql, args)
    }

    fn query_one(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Option<Row>> {
        self.ops().query_one(ctx, sql, args)
    }

    fn prepare(&self, ctx: &Context, sql: &str) -> DriverResult<PreparedStatement> {
        self.ops().prepare(ctx, sql)
    }
}

impl Driver for FakeDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn begin<'a>(
        &'a self,
        ctx: &Context,
        opts: &TxOptions,
    ) -> DriverResult<Box<dyn DriverTransaction + 'a>> {
        let entry = match opts.isolation {
            Some(level) => format!("BEGIN {}", level.as_sql()),
            None => "BEGIN".to_string(),
        };
        self.script.record(ctx, entry)?;
        if flag(&self.script.fail_begin) {
            return Err(connection_reset());
        }
        Ok(Box::new(FakeTransaction {
            ops: Ops {
                script: &self.script,
                prefix: "TX ",
            },
        }))
    }

    fn ping(&self, ctx: &Context) -> DriverResult<()> {
        self.script.record(ctx, "PING".to_string())?;
        if flag(&self.script.fail_ping) {
            return Err(connection_reset());
        }
        Ok(())
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            open_connections: 1,
            in_use: 0,
            idle: 1,
            max_open: 4,
        }
    }
}

struct FakeTransaction<'a> {
    ops: Ops<'a>,
}

impl DriverOps for FakeTransaction<'_> {
    fn execute(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<u64> {
        self.ops.execute(ctx, sql, args)
    }

    fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Vec<Row>> {
        self.ops.query(ctx, sql, args)
    }

    fn query_one(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Option<Row>> {
        self.ops.query_one(ctx, sql, args)
    }

    fn prepare(&self, ctx: &Context, sql: &str) -> DriverResult<PreparedStatement> {
        self.ops.prepare(ctx, sql)
    }
}

impl DriverTransaction for FakeTransaction<'_> {
    fn commit(self: Box<Self>, ctx: &Context) -> DriverResult<()> {
        self.ops.script.record(ctx, "COMMIT".to_string())?;
        if flag(&self.ops.script.fail_commit) {
            return Err(connection_reset());
        }
        Ok(())
    }

    fn rollback(self: Box<Self>, ctx: &Context) -> DriverResult<()> {
        self.ops.script.record(ctx, "ROLLBACK".to_string())?;
        if flag(&self.ops.script.fail_rollback) {
            return Err(connection_reset());
        }
        Ok(())
    }
}
