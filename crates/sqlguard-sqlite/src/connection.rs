//! SQLite connection implementing the sqlguard driver contract.
//!
//! One `rusqlite::Connection` is shared behind a mutex. A transaction holds the
//! mutex for its whole lifetime, so statements issued on the database handle from
//! other threads while a transaction is open wait for it (bounded by their context)
//! instead of slipping into it. The thread that opened the transaction gets an
//! immediate error instead, since waiting on itself could never succeed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use sqlguard_core::{
    BackendError, Context, Dialect, Driver, DriverOps, DriverResult, DriverTransaction,
    IsolationLevel, PoolStats, PreparedStatement, RawError, Row, TxOptions, Value,
};

use crate::convert::{column_names, params, raw_error, read_row};

/// How often a waiting caller re-checks the connection lock.
const LOCK_POLL: Duration = Duration::from_millis(2);

/// Number of virtual machine steps between cancellation checks.
const PROGRESS_STEPS: i32 = 1000;

/// Returned when a thread asks for the connection its own open transaction holds.
pub const HELD_BY_THIS_THREAD: &str =
    "sqlite connection is held by an open transaction on this thread";

/// Options parsed from a SQLite DSN (`path?mode=ro&busy_timeout=5000`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteOptions {
    pub path: String,
    pub read_only: bool,
    pub busy_timeout: Duration,
    pub foreign_keys: bool,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            read_only: false,
            busy_timeout: Duration::from_secs(5),
            foreign_keys: true,
        }
    }
}

impl SqliteOptions {
    /// Parse a DSN of the form produced by [`sqlite_dsn`](sqlguard_core::dsn::sqlite_dsn).
    ///
    /// Unknown parameters are ignored with a debug log.
    pub fn parse(dsn: &str) -> Result<Self, String> {
        let (path, query) = dsn.split_once('?').unwrap_or((dsn, ""));
        if path.is_empty() {
            return Err("sqlite DSN has an empty path".to_string());
        }
        let mut opts = Self {
            path: path.to_string(),
            ..Self::default()
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "mode" => opts.read_only = value == "ro",
                "busy_timeout" | "_busy_timeout" => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| format!("invalid busy_timeout {value:?}"))?;
                    opts.busy_timeout = Duration::from_millis(ms);
                }
                "foreign_keys" | "_foreign_keys" => {
                    opts.foreign_keys = !matches!(value, "0" | "off" | "false");
                }
                other => tracing::debug!(param = other, "Ignoring unknown sqlite DSN parameter"),
            }
        }
        Ok(opts)
    }
}

/// A SQLite database exposed as a [`Driver`].
pub struct SqliteConnection {
    conn: Mutex<Option<Connection>>,
    /// Thread that opened the transaction currently holding `conn`.
    tx_thread: Mutex<Option<ThreadId>>,
    next_statement_id: AtomicU64,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    #[tracing::instrument(level = "debug", skip(opts), fields(path = %opts.path))]
    pub fn open(opts: &SqliteOptions) -> DriverResult<Self> {
        let ctx = Context::background();
        let flags = if opts.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::default()
        };
        let conn = if opts.path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open_with_flags(&opts.path, flags)
        }
        .map_err(|e| raw_error(e, &ctx))?;

        conn.busy_timeout(opts.busy_timeout)
            .map_err(|e| raw_error(e, &ctx))?;
        let pragma = if opts.foreign_keys {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        conn.execute_batch(pragma).map_err(|e| raw_error(e, &ctx))?;

        tracing::info!(path = %opts.path, read_only = opts.read_only, "SQLite connection opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> DriverResult<Self> {
        Self::open(&SqliteOptions::default())
    }

    /// Wrap a connection configured by the caller.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            tx_thread: Mutex::new(None),
            next_statement_id: AtomicU64::new(1),
        }
    }

    /// Run several `;`-separated statements, e.g. a schema script. Hooks do not see this.
    pub fn execute_batch(&self, ctx: &Context, sql: &str) -> DriverResult<()> {
        let guard = self.lock(ctx)?;
        let conn = open_conn(&guard)?;
        guarded(conn, ctx, || conn.execute_batch(sql))
    }

    /// Acquire the connection, waiting no longer than `ctx` allows.
    ///
    /// Fails at once if the calling thread's own transaction holds it.
    fn lock(&self, ctx: &Context) -> DriverResult<MutexGuard<'_, Option<Connection>>> {
        loop {
            match self.conn.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => {
                    // A panic unwound through a transaction; its rollback already ran.
                    self.conn.clear_poison();
                    return Ok(poisoned.into_inner());
                }
                Err(TryLockError::WouldBlock) => {
                    if self.held_by_current_thread() {
                        tracing::warn!(
                            "Connection requested while this thread's transaction holds it"
                        );
                        return Err(RawError::Backend(
                            BackendError::new(HELD_BY_THIS_THREAD).with_dialect(Dialect::Sqlite),
                        ));
                    }
                    ctx.sleep(LOCK_POLL)?;
                }
            }
        }
    }

    fn held_by_current_thread(&self) -> bool {
        *lock_ignoring_poison(&self.tx_thread) == Some(thread::current().id())
    }
}

fn lock_ignoring_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn open_conn<'g>(guard: &'g MutexGuard<'_, Option<Connection>>) -> DriverResult<&'g Connection> {
    guard
        .as_ref()
        .ok_or_else(|| RawError::backend("sqlite connection is closed"))
}

/// Run `op` with a progress handler that interrupts it once `ctx` is done.
fn guarded<T>(
    conn: &Connection,
    ctx: &Context,
    op: impl FnOnce() -> rusqlite::Result<T>,
) -> DriverResult<T> {
    if let Some(done) = ctx.err() {
        return Err(RawError::Context(done));
    }
    if !ctx.can_end() {
        return op().map_err(|e| raw_error(e, ctx));
    }

    let watcher = ctx.watcher();
    conn.progress_handler(PROGRESS_STEPS, Some(move || watcher.is_done()));
    let result = op();
    conn.progress_handler(0, None::<fn() -> bool>);
    result.map_err(|e| raw_error(e, ctx))
}

fn execute_on(conn: &Connection, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<u64> {
    guarded(conn, ctx, || {
        let mut stmt = conn.prepare_cached(sql)?;
        if stmt.column_count() == 0 {
            return stmt.execute(params(args)).map(|n| n as u64);
        }
        // Row-returning statements (PRAGMA, SELECT, RETURNING) run to completion and
        // their rows are discarded.
        let before = conn.total_changes();
        let mut rows = stmt.query(params(args))?;
        while rows.next()?.is_some() {}
        Ok(conn.total_changes().saturating_sub(before))
    })
}

fn query_on(conn: &Connection, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Vec<Row>> {
    guarded(conn, ctx, || {
        let mut stmt = conn.prepare_cached(sql)?;
        let columns = column_names(&stmt);
        let mut rows = stmt.query(params(args))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_row(&columns, row)?);
        }
        Ok(out)
    })
}

fn query_one_on(
    conn: &Connection,
    ctx: &Context,
    sql: &str,
    args: &[Value],
) -> DriverResult<Option<Row>> {
    guarded(conn, ctx, || {
        let mut stmt = conn.prepare_cached(sql)?;
        let columns = column_names(&stmt);
        let mut rows = stmt.query(params(args))?;
        rows.next()?.map(|row| read_row(&columns, row)).transpose()
    })
}

fn prepare_on(
    conn: &Connection,
    ctx: &Context,
    id: u64,
    sql: &str,
) -> DriverResult<PreparedStatement> {
    guarded(conn, ctx, || {
        let stmt = conn.prepare_cached(sql)?;
        Ok(PreparedStatement::new(id, sql, stmt.parameter_count()))
    })
}

impl DriverOps for SqliteConnection {
    fn execute(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<u64> {
        let guard = self.lock(ctx)?;
        execute_on(open_conn(&guard)?, ctx, sql, args)
    }

    fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Vec<Row>> {
        let guard = self.lock(ctx)?;
        query_on(open_conn(&guard)?, ctx, sql, args)
    }

    fn query_one(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Option<Row>> {
        let guard = self.lock(ctx)?;
        query_one_on(open_conn(&guard)?, ctx, sql, args)
    }

    fn prepare(&self, ctx: &Context, sql: &str) -> DriverResult<PreparedStatement> {
        let id = self.next_statement_id.fetch_add(1, Ordering::Relaxed);
        let guard = self.lock(ctx)?;
        prepare_on(open_conn(&guard)?, ctx, id, sql)
    }
}

impl Driver for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn begin<'a>(
        &'a self,
        ctx: &Context,
        opts: &TxOptions,
    ) -> DriverResult<Box<dyn DriverTransaction + 'a>> {
        if let Some(level) = opts
            .isolation
            .filter(|level| *level != IsolationLevel::Serializable)
        {
            tracing::debug!(
                requested = level.as_sql(),
                "SQLite transactions are always serializable"
            );
        }
        let guard = self.lock(ctx)?;
        let begin = if opts.read_only {
            "BEGIN DEFERRED; PRAGMA query_only = ON"
        } else {
            "BEGIN DEFERRED"
        };
        let conn = open_conn(&guard)?;
        guarded(conn, ctx, || conn.execute_batch(begin))?;
        *lock_ignoring_poison(&self.tx_thread) = Some(thread::current().id());
        tracing::debug!(read_only = opts.read_only, "SQLite transaction started");
        Ok(Box::new(SqliteTransaction {
            guard,
            tx_thread: &self.tx_thread,
            id_source: &self.next_statement_id,
            read_only: opts.read_only,
            finished: false,
        }))
    }

    fn ping(&self, ctx: &Context) -> DriverResult<()> {
        let guard = self.lock(ctx)?;
        let conn = open_conn(&guard)?;
        guarded(conn, ctx, || conn.query_row("SELECT 1", [], |_| Ok(())))
    }

    fn stats(&self) -> PoolStats {
        let (open, in_use) = match self.conn.try_lock() {
            Ok(guard) => (usize::from(guard.is_some()), 0),
            Err(TryLockError::Poisoned(p)) => (usize::from(p.into_inner().is_some()), 0),
            Err(TryLockError::WouldBlock) => (1, 1),
        };
        PoolStats {
            open_connections: open,
            in_use,
            idle: open - in_use,
            max_open: 1,
        }
    }

    fn close(&self) -> DriverResult<()> {
        let ctx = Context::background();
        let mut guard = self.lock(&ctx)?;
        match guard.take() {
            Some(conn) => conn.close().map_err(|(conn, e)| {
                *guard = Some(conn);
                raw_error(e, &ctx)
            }),
            None => Ok(()),
        }
    }
}

/// A transaction holding the connection lock until it finishes.
struct SqliteTransaction<'a> {
    guard: MutexGuard<'a, Option<Connection>>,
    tx_thread: &'a Mutex<Option<ThreadId>>,
    id_source: &'a AtomicU64,
    read_only: bool,
    finished: bool,
}

impl SqliteTransaction<'_> {
    fn conn(&self) -> DriverResult<&Connection> {
        open_conn(&self.guard)
    }

    fn finish(&mut self, ctx: &Context, sql: &str) -> DriverResult<()> {
        let conn = open_conn(&self.guard)?;
        guarded(conn, ctx, || conn.execute_batch(sql))?;
        self.finished = true;
        if self.read_only {
            if let Err(err) = conn.execute_batch("PRAGMA query_only = OFF") {
                tracing::warn!(error = %err, "Failed to reset query_only");
            }
        }
        Ok(())
    }
}

impl DriverOps for SqliteTransaction<'_> {
    fn execute(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<u64> {
        execute_on(self.conn()?, ctx, sql, args)
    }

    fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Vec<Row>> {
        query_on(self.conn()?, ctx, sql, args)
    }

    fn query_one(&self, ctx: &Context, sql: &str, args: &[Value]) -> DriverResult<Option<Row>> {
        query_one_on(self.conn()?, ctx, sql, args)
    }

    fn prepare(&self, ctx: &Context, sql: &str) -> DriverResult<PreparedStatement> {
        let id = self.id_source.fetch_add(1, Ordering::Relaxed);
        prepare_on(self.conn()?, ctx, id, sql)
    }
}

impl DriverTransaction for SqliteTransaction<'_> {
    fn commit(mut self: Box<Self>, ctx: &Context) -> DriverResult<()> {
        self.finish(ctx, "COMMIT")
    }

    fn rollback(mut self: Box<Self>, ctx: &Context) -> DriverResult<()> {
        self.finish(ctx, "ROLLBACK")
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        // Cleared before `guard` releases the connection.
        *lock_ignoring_poison(self.tx_thread) = None;
        if self.finished {
            return;
        }
        // Reached when COMMIT or ROLLBACK failed; the lock must not be released
        // with the transaction still open.
        let Some(conn) = self.guard.as_ref() else {
            return;
        };
        if !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %err, "SQLite rollback after failed finish");
            }
        }
        if self.read_only {
            let _ = conn.execute_batch("PRAGMA query_only = OFF");
        }
    }
}
