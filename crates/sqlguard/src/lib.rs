//! sqlguard: error classification and transaction orchestration over SQL drivers.
//!
//! Driver failures come back as a small set of [`ErrorKind`]s (duplicate key, not
//! found, deadlock, timeout, ...) no matter which backend produced them, so callers can
//! branch on meaning instead of vendor codes.
//!
//! # Quick start
//!
//! ```ignore
//! use sqlguard::prelude::*;
//!
//! let db = sqlguard::open(DatabaseConfig::new("sqlite", "app.db"))?;
//! let ctx = Context::background().with_timeout(Duration::from_secs(2));
//!
//! match db.execute(&ctx, "INSERT INTO users (email) VALUES (?1)", &["a@x".into()]) {
//!     Err(e) if e.is_duplicate_key() => println!("already registered"),
//!     other => { other?; }
//! }
//!
//! db.run_in_transaction(&ctx, &TxOptions::default(), |tx| {
//!     tx.execute(&ctx, "UPDATE accounts SET balance = balance - 10 WHERE id = 1", &[])?;
//!     tx.execute(&ctx, "UPDATE accounts SET balance = balance + 10 WHERE id = 2", &[])?;
//!     Ok(())
//! })?;
//! ```
//!
//! # Crates
//!
//! - `sqlguard-core`: error taxonomy, mappers, hooks, context, retry, driver contract
//! - `sqlguard-session`: [`Database`], [`Transaction`], [`Executor`]
//! - `sqlguard-sqlite`: the bundled SQLite driver (feature `sqlite`, on by default)

pub use sqlguard_core::{
    BackendError, CancelHandle, ChainedMapper, Classifier, CompositeHook, Context, ContextError,
    DatabaseConfig, DbError, DefaultErrorMapper, DoneWatcher, Dialect, Driver, DriverFactory, DriverOps,
    DriverOptions, DriverRegistry, DriverResult, DriverTransaction, Error, ErrorKind, ErrorMapper,
    FromValue, Hook, HookChain, IsolationLevel, LogHook, LogHookConfig, MetricsCollector,
    MetricsHook, MySqlClassifier, PoolStats, PostgresClassifier, PreparedStatement, RawError,
    Result, RetryError, RetryPolicy, RollbackError, Row, SqliteClassifier, Tracer, TracingHook,
    TxOptions, Value, classify_result, dsn_from_env, with_retry,
};
pub use sqlguard_core::{config, context, driver, dsn, error, hooks, mapper, registry, retry};
pub use sqlguard_session::{
    Database, Executor, OPEN_PING_TIMEOUT, OneRow, Statement, Transaction, is_not_found,
};

#[cfg(feature = "sqlite")]
pub use sqlguard_sqlite::{SqliteConnection, SqliteDriver, SqliteOptions};

use std::sync::Arc;

/// A registry holding every driver compiled into this build.
pub fn default_registry() -> DriverRegistry {
    #[allow(unused_mut)]
    let mut registry = DriverRegistry::new();
    #[cfg(feature = "sqlite")]
    registry.replace(Arc::new(SqliteDriver));
    registry
}

/// Open a database with the built-in drivers. See [`Database::open`].
pub fn open(config: DatabaseConfig) -> Result<Database> {
    Database::open(&default_registry(), config)
}

/// Open a database whose DSN comes from `DATABASE_URL`.
pub fn open_from_env(driver: &str) -> Result<Database> {
    let dsn = dsn_from_env()?;
    tracing::debug!(driver, "Opening database from DATABASE_URL");
    open(DatabaseConfig::new(driver, dsn))
}

/// Register an additional driver alongside the built-in ones.
pub fn registry_with(factory: Arc<dyn DriverFactory>) -> Result<DriverRegistry> {
    default_registry().with(factory)
}

pub mod prelude {
    pub use crate::{
        Context, Database, DatabaseConfig, Error, ErrorKind, Executor, Hook, IsolationLevel,
        Result, RetryPolicy, Row, Transaction, TxOptions, Value, with_retry,
    };
    pub use std::time::Duration;
}
