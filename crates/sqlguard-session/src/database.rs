//! The pooled database handle.

use std::sync::Arc;
use std::time::Duration;

use sqlguard_core::{
    ChainedMapper, Context, DatabaseConfig, DefaultErrorMapper, Driver, DriverOptions,
    DriverRegistry, Error, ErrorMapper, HookChain, PoolStats, PreparedStatement, Result,
    RollbackError, Row, TxOptions, Value,
};

use crate::executor::{Executor, OneRow, Pipeline};
use crate::statement::{Statement, StatementOwner};
use crate::transaction::Transaction;

/// How long [`Database::open`] waits for the initial ping.
pub const OPEN_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// A shared, thread-safe handle over a [`Driver`].
///
/// Cloning is cheap; clones share the driver, hooks and error mapper.
#[derive(Clone)]
pub struct Database {
    driver: Arc<dyn Driver>,
    hooks: HookChain,
    mapper: Arc<dyn ErrorMapper>,
    config: Arc<DatabaseConfig>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.driver.dialect())
            .field("hooks", &self.hooks.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open the driver named by `config.driver` and verify it answers a ping.
    ///
    /// Errors are mapped by the driver's own mapper first, then the default mapper.
    #[tracing::instrument(level = "debug", skip(registry, config), fields(driver = %config.driver))]
    pub fn open(registry: &DriverRegistry, config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        if config.dsn.is_empty() {
            return Err(Error::Config("dsn must not be empty".to_string()));
        }

        let factory = registry.lookup(&config.driver)?;
        let driver = factory.open(&config)?;
        let mut db = Self::from_driver(driver, config);
        db.set_error_mapper(Arc::new(ChainedMapper::new(vec![factory.error_mapper()])));

        let ping_ctx = Context::background().with_timeout(OPEN_PING_TIMEOUT);
        if let Err(err) = db.ping(&ping_ctx) {
            tracing::warn!(error = %err, "Initial ping failed; closing driver");
            if let Err(close_err) = db.driver.close() {
                tracing::debug!(error = %close_err, "Close after failed ping also failed");
            }
            return Err(err);
        }

        tracing::info!(
            driver = %db.config.driver,
            dialect = %db.driver.dialect(),
            hooks = db.hooks.len(),
            "Database opened"
        );
        Ok(db)
    }

    /// Build the DSN from `options` with the named driver's factory, then [`open`](Self::open).
    pub fn open_with_options(
        registry: &DriverRegistry,
        driver: &str,
        options: &DriverOptions,
        config: DatabaseConfig,
    ) -> Result<Self> {
        let factory = registry.lookup(driver)?;
        let dsn = factory
            .dsn(options)
            .map_err(|e| Error::Config(format!("DSN construction failed: {e}")))?;
        Self::open(registry, config.driver(driver).dsn(dsn))
    }

    /// Wrap an already-connected driver. No ping is issued.
    pub fn from_driver(driver: Arc<dyn Driver>, config: DatabaseConfig) -> Self {
        let hooks = HookChain::from_hooks(config.hooks.clone());
        Self {
            driver,
            hooks,
            mapper: Arc::new(DefaultErrorMapper::new()),
            config: Arc::new(config),
        }
    }

    /// Replace the error mapper used by this handle and its transactions.
    pub fn set_error_mapper(&mut self, mapper: Arc<dyn ErrorMapper>) {
        self.mapper = mapper;
    }

    pub fn error_mapper(&self) -> &Arc<dyn ErrorMapper> {
        &self.mapper
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The underlying driver, for operations this handle does not wrap.
    pub fn raw(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn ping(&self, ctx: &Context) -> Result<()> {
        let pipeline = self.pipeline();
        let ctx = pipeline.context(ctx);
        if let Some(done) = ctx.err() {
            return Err(pipeline.classify(done.into()));
        }
        self.driver.ping(&ctx).map_err(|e| pipeline.classify(e))
    }

    pub fn stats(&self) -> PoolStats {
        self.driver.stats()
    }

    pub fn close(&self) -> Result<()> {
        tracing::info!(driver = %self.config.driver, "Closing database");
        self.driver.close().map_err(|e| self.pipeline().classify(e))
    }

    pub(crate) fn pipeline(&self) -> Pipeline<'_> {
        Pipeline {
            hooks: &self.hooks,
            mapper: self.mapper.as_ref(),
            default_timeout: self.config.default_timeout,
        }
    }

    pub(crate) fn mapper_handle(&self) -> Arc<dyn ErrorMapper> {
        Arc::clone(&self.mapper)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Start a transaction.
    ///
    /// The returned guard rolls back when dropped without
    /// [`commit`](Transaction::commit) or [`rollback`](Transaction::rollback).
    #[tracing::instrument(level = "debug", skip(self, ctx))]
    pub fn begin(&self, ctx: &Context, opts: &TxOptions) -> Result<Transaction<'_>> {
        let pipeline = self.pipeline();
        let ctx = pipeline.context(ctx);
        if let Some(done) = ctx.err() {
            return Err(pipeline.classify(done.into()));
        }
        let session = self
            .driver
            .begin(&ctx, opts)
            .map_err(|e| pipeline.classify(e))?;
        tracing::debug!("Transaction started");
        Ok(Transaction::new(self, session))
    }

    /// Run `body` inside a transaction.
    ///
    /// - `begin` failure: returned as is; `body` is not called.
    /// - `body` returns `Ok`: the transaction commits; a commit failure is returned.
    /// - `body` returns `Err(e)`: the transaction rolls back and `e` is returned. If the
    ///   rollback fails too, both errors come back as [`Error::Rollback`].
    /// - `body` panics: the transaction rolls back while the panic unwinds, and the
    ///   panic continues to the caller.
    ///
    /// `body` should not commit or roll back the transaction itself; if it does and
    /// then returns `Ok`, the outcome it chose stands and a warning is logged. Nesting
    /// is not supported; use [`Transaction::savepoint`] for partial rollback.
    #[tracing::instrument(level = "debug", skip(self, ctx, body))]
    pub fn run_in_transaction<T, F>(&self, ctx: &Context, opts: &TxOptions, body: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self.begin(ctx, opts)?;
        match body(&tx) {
            Ok(value) => {
                if !tx.is_active() {
                    tracing::warn!("Body already finished the transaction; skipping commit");
                    return Ok(value);
                }
                tx.commit(ctx)?;
                Ok(value)
            }
            Err(err) => {
                tracing::info!(error = %err, "Transaction body failed; rolling back");
                // The caller's context may be the reason the body failed, so the
                // rollback must not depend on it.
                match tx.rollback(&Context::background()) {
                    Ok(()) | Err(Error::TransactionClosed) => Err(err),
                    Err(rollback) => {
                        tracing::error!(error = %rollback, "Rollback failed");
                        Err(Error::Rollback(RollbackError {
                            original: Box::new(err),
                            rollback: Box::new(rollback),
                        }))
                    }
                }
            }
        }
    }

    /// Execute one prepared statement per item, all in a single transaction.
    ///
    /// Returns the total number of affected rows; any failure rolls back every item.
    pub fn batch_exec<I, F>(&self, ctx: &Context, sql: &str, items: I, mut args: F) -> Result<u64>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Vec<Value>,
    {
        self.run_in_transaction(ctx, &TxOptions::default(), |tx| {
            let stmt = tx.prepare(ctx, sql)?;
            let mut affected = 0;
            for item in items {
                affected += stmt.execute(ctx, &args(item))?;
            }
            tracing::debug!(affected, "Batch executed");
            Ok(affected)
        })
    }
}

impl Executor for Database {
    fn execute(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<u64> {
        self.pipeline()
            .run(ctx, sql, args, |ctx| self.driver.execute(ctx, sql, args))
    }

    fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        self.pipeline()
            .run(ctx, sql, args, |ctx| self.driver.query(ctx, sql, args))
    }

    fn query_one(&self, ctx: &Context, sql: &str, args: &[Value]) -> OneRow {
        let result = self
            .pipeline()
            .run(ctx, sql, args, |ctx| self.driver.query_one(ctx, sql, args));
        OneRow::new(result, self.mapper_handle())
    }

    fn prepare(&self, ctx: &Context, sql: &str) -> Result<Statement<'_>> {
        let prepared = self
            .pipeline()
            .run(ctx, sql, &[], |ctx| self.driver.prepare(ctx, sql))?;
        Ok(Statement::new(self, prepared))
    }
}

impl StatementOwner for Database {
    fn execute_prepared(
        &self,
        ctx: &Context,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> Result<u64> {
        self.pipeline().run(ctx, stmt.sql(), args, |ctx| {
            self.driver.execute_prepared(ctx, stmt, args)
        })
    }

    fn query_prepared(
        &self,
        ctx: &Context,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> Result<Vec<Row>> {
        self.pipeline().run(ctx, stmt.sql(), args, |ctx| {
            self.driver.query_prepared(ctx, stmt, args)
        })
    }

    fn query_one_prepared(
        &self,
        ctx: &Context,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> OneRow {
        let result = self.pipeline().run(ctx, stmt.sql(), args, |ctx| {
            self.driver.query_one_prepared(ctx, stmt, args)
        });
        OneRow::new(result, self.mapper_handle())
    }
}
