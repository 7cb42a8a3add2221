//! Core types and contracts for sqlguard.
//!
//! `sqlguard-core` is the **foundation layer** of the workspace. It owns everything
//! that does not need a live database session:
//!
//! - **Error taxonomy**: [`ErrorKind`], [`DbError`] (a classified error) and [`RawError`]
//!   (a driver-native failure). Classification is a type-level transition from
//!   [`Error::Raw`] to [`Error::Classified`], so a classified error can never be wrapped twice.
//! - **Error mapping**: the [`ErrorMapper`] contract, the [`DefaultErrorMapper`] with its
//!   PostgreSQL, MySQL and SQLite classifiers, and [`ChainedMapper`].
//! - **Hooks**: the [`Hook`] observer contract and the panic-isolating [`HookChain`].
//! - **Driver contract**: [`Driver`], [`DriverTransaction`] and [`DriverOps`], plus the
//!   explicit [`DriverRegistry`] used to open databases by driver name.
//! - **Cancellation**: [`Context`], carrying an optional deadline and cancel signal.
//! - **Retry**: [`RetryPolicy`] and [`with_retry`].
//!
//! Most applications should use the `sqlguard` facade; reach for `sqlguard-core` directly
//! when writing drivers, custom mappers, or hooks.

pub mod config;
pub mod context;
pub mod driver;
pub mod dsn;
pub mod error;
pub mod hooks;
pub mod mapper;
pub mod registry;
pub mod retry;
pub mod row;
pub mod value;

pub use config::DatabaseConfig;
pub use context::{CancelHandle, Context, ContextError, DoneWatcher};
pub use driver::{
    Dialect, Driver, DriverOps, DriverTransaction, IsolationLevel, PoolStats, PreparedStatement,
    TxOptions,
};
pub use dsn::{DriverOptions, dsn_from_env};
pub use error::{
    BackendError, DbError, DriverResult, Error, ErrorKind, RawError, Result, RetryError,
    RollbackError,
};
pub use hooks::{
    CompositeHook, Hook, HookChain, LogHook, LogHookConfig, MetricsCollector, MetricsHook, Tracer,
    TracingHook,
};
pub use mapper::{
    ChainedMapper, Classifier, DefaultErrorMapper, ErrorMapper, classify_result,
    mysql::MySqlClassifier, postgres::PostgresClassifier, sqlite::SqliteClassifier,
};
pub use registry::{DriverFactory, DriverRegistry};
pub use retry::{RetryPolicy, with_retry};
pub use row::Row;
pub use value::{FromValue, Value};
