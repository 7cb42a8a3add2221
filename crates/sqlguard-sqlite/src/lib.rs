//! SQLite driver for sqlguard, built on `rusqlite`.
//!
//! Register [`SqliteDriver`] with a [`DriverRegistry`](sqlguard_core::DriverRegistry)
//! and open databases by the name `"sqlite"`:
//!
//! ```ignore
//! let registry = DriverRegistry::new().with(Arc::new(SqliteDriver))?;
//! let db = Database::open(&registry, DatabaseConfig::new("sqlite", "app.db?busy_timeout=2000"))?;
//! ```
//!
//! Statements observe their [`Context`](sqlguard_core::Context): a deadline or
//! cancellation interrupts a running statement through SQLite's progress handler.

mod connection;
mod convert;

use std::sync::Arc;

use sqlguard_core::{
    DatabaseConfig, DefaultErrorMapper, Driver, DriverFactory, DriverOptions, Error,
    ErrorMapper, Result, SqliteClassifier,
};

pub use connection::{SqliteConnection, SqliteOptions};

/// Registry name of this driver.
pub const DRIVER_NAME: &str = "sqlite";

/// [`DriverFactory`] for SQLite databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl DriverFactory for SqliteDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn dsn(&self, opts: &DriverOptions) -> Result<String> {
        sqlguard_core::dsn::sqlite_dsn(opts)
    }

    fn error_mapper(&self) -> Arc<dyn ErrorMapper> {
        Arc::new(DefaultErrorMapper::with_classifiers(vec![Arc::new(
            SqliteClassifier,
        )]))
    }

    fn open(&self, config: &DatabaseConfig) -> Result<Arc<dyn Driver>> {
        let opts = SqliteOptions::parse(&config.dsn).map_err(Error::Config)?;
        if config.max_open_connections > 1 {
            tracing::debug!(
                requested = config.max_open_connections,
                "SQLite driver uses a single connection"
            );
        }
        let conn = SqliteConnection::open(&opts).map_err(|e| self.error_mapper().map(e.into()))?;
        Ok(Arc::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlguard_core::{Context, DriverRegistry, ErrorKind};

    #[test]
    fn test_factory_dsn() {
        let dsn = SqliteDriver
            .dsn(&DriverOptions::new().database("app.db").param("mode", "ro"))
            .unwrap();
        assert_eq!(dsn, "app.db?mode=ro");
        assert!(SqliteDriver.dsn(&DriverOptions::new()).is_err());
    }

    #[test]
    fn test_factory_opens_memory_database() {
        let registry = DriverRegistry::new().with(Arc::new(SqliteDriver)).unwrap();
        let factory = registry.lookup("sqlite").unwrap();
        let driver = factory
            .open(&DatabaseConfig::new("sqlite", ":memory:"))
            .unwrap();
        driver.ping(&Context::background()).unwrap();
        assert_eq!(driver.dialect(), sqlguard_core::Dialect::Sqlite);
        assert_eq!(
            driver
                .execute(&Context::background(), "CREATE TABLE t (x INTEGER)", &[])
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_unopenable_path_is_connection_failure() {
        let err = SqliteDriver
            .open(&DatabaseConfig::new(
                "sqlite",
                "/nonexistent-dir/for/sure/app.db",
            ))
            .err().expect("open should fail");
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    }

    #[test]
    fn test_bad_dsn_is_config_error() {
        let err = SqliteDriver
            .open(&DatabaseConfig::new("sqlite", "?mode=ro"))
            .err().expect("open should fail");
        assert!(matches!(err, Error::Config(_)));
    }
}
