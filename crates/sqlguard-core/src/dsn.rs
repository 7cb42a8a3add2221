//! Connection-string construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable read by [`dsn_from_env`].
pub const DATABASE_URL: &str = "DATABASE_URL";

/// Driver-neutral connection parameters.
///
/// Each [`DriverFactory`](crate::DriverFactory) turns these into its own DSN format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    pub host: String,
    /// 0 selects the backend's default port.
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database name, or file path for SQLite.
    pub database: String,
    pub ssl_mode: Option<String>,
    /// Extra driver parameters, appended in key order.
    pub extra: BTreeMap<String, String>,
}

impl DriverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn ssl_mode(mut self, mode: impl Into<String>) -> Self {
        self.ssl_mode = Some(mode.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    fn require_host_and_database(&self, driver: &str) -> Result<()> {
        if self.host.is_empty() || self.database.is_empty() {
            return Err(Error::Config(format!(
                "{driver} driver: host and database are required"
            )));
        }
        Ok(())
    }
}

/// `host=.. port=.. user=.. password=.. dbname=.. sslmode=..` (libpq keyword form).
pub fn postgres_dsn(opts: &DriverOptions) -> Result<String> {
    opts.require_host_and_database("postgres")?;
    let port = if opts.port == 0 { 5432 } else { opts.port };
    let ssl_mode = opts.ssl_mode.as_deref().unwrap_or("disable");
    let mut dsn = format!(
        "host={} port={port} user={} password={} dbname={} sslmode={ssl_mode}",
        opts.host, opts.user, opts.password, opts.database
    );
    for (k, v) in &opts.extra {
        dsn.push_str(&format!(" {k}={v}"));
    }
    Ok(dsn)
}

/// `user:password@tcp(host:port)/database?parseTime=true&..`.
pub fn mysql_dsn(opts: &DriverOptions) -> Result<String> {
    opts.require_host_and_database("mysql")?;
    let port = if opts.port == 0 { 3306 } else { opts.port };
    let mut dsn = format!(
        "{}:{}@tcp({}:{port})/{}?parseTime=true",
        opts.user, opts.password, opts.host, opts.database
    );
    for (k, v) in &opts.extra {
        dsn.push_str(&format!("&{k}={v}"));
    }
    Ok(dsn)
}

/// File path (or `:memory:`) followed by `?k=v&..` when extra parameters are set.
pub fn sqlite_dsn(opts: &DriverOptions) -> Result<String> {
    if opts.database.is_empty() {
        return Err(Error::Config(
            "sqlite driver: database (file path) is required".to_string(),
        ));
    }
    let mut dsn = opts.database.clone();
    for (i, (k, v)) in opts.extra.iter().enumerate() {
        dsn.push(if i == 0 { '?' } else { '&' });
        dsn.push_str(&format!("{k}={v}"));
    }
    Ok(dsn)
}

/// Read the DSN from `DATABASE_URL`.
pub fn dsn_from_env() -> Result<String> {
    dsn_from_env_var(DATABASE_URL)
}

pub fn dsn_from_env_var(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(dsn) if !dsn.trim().is_empty() => Ok(dsn),
        _ => Err(Error::Config(format!(
            "{name} environment variable not set"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> DriverOptions {
        DriverOptions::new()
            .host("db.internal")
            .user("app")
            .password("secret")
            .database("orders")
    }

    #[test]
    fn test_postgres_defaults() {
        let dsn = postgres_dsn(&opts()).unwrap();
        assert_eq!(
            dsn,
            "host=db.internal port=5432 user=app password=secret dbname=orders sslmode=disable"
        );
    }

    #[test]
    fn test_postgres_extras_in_key_order() {
        let dsn = postgres_dsn(
            &opts()
                .port(6432)
                .ssl_mode("require")
                .param("connect_timeout", "5")
                .param("application_name", "api"),
        )
        .unwrap();
        assert!(dsn.contains("port=6432"));
        assert!(dsn.ends_with("sslmode=require application_name=api connect_timeout=5"));
    }

    #[test]
    fn test_mysql_format() {
        let dsn = mysql_dsn(&opts().param("loc", "UTC")).unwrap();
        assert_eq!(
            dsn,
            "app:secret@tcp(db.internal:3306)/orders?parseTime=true&loc=UTC"
        );
    }

    #[test]
    fn test_sqlite_path_and_params() {
        let base = DriverOptions::new().database("/tmp/app.db");
        assert_eq!(sqlite_dsn(&base).unwrap(), "/tmp/app.db");
        let dsn = sqlite_dsn(&base.param("mode", "ro").param("cache", "shared")).unwrap();
        assert_eq!(dsn, "/tmp/app.db?cache=shared&mode=ro");
    }

    #[test]
    fn test_missing_required_fields() {
        let err = postgres_dsn(&DriverOptions::new().database("x")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(mysql_dsn(&DriverOptions::new().host("h")).is_err());
        assert!(sqlite_dsn(&DriverOptions::new()).is_err());
    }

    #[test]
    fn test_env_lookup() {
        let err = dsn_from_env_var("SQLGUARD_TEST_SURELY_UNSET_VARIABLE").unwrap_err();
        assert!(err.to_string().contains("SQLGUARD_TEST_SURELY_UNSET_VARIABLE"));
    }
}
