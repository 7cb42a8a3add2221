//! Database handle configuration.
//!
//! Durations are (de)serialized as integer milliseconds so configs can live in JSON:
//!
//! ```json
//! { "driver": "sqlite", "dsn": ":memory:", "default_timeout": 5000, "max_open_connections": 10 }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hooks::Hook;

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Settings for a database handle.
///
/// Pool sizing is handed to the driver as-is; sqlguard does not pool connections itself.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Registry name of the driver.
    pub driver: String,
    pub dsn: String,
    /// Applied to statements whose context has no deadline.
    #[serde(with = "duration_ms")]
    pub default_timeout: Option<Duration>,
    /// 0 means unlimited.
    pub max_open_connections: usize,
    pub max_idle_connections: usize,
    #[serde(with = "duration_ms")]
    pub connection_lifetime: Option<Duration>,
    #[serde(with = "duration_ms")]
    pub connection_idle_timeout: Option<Duration>,
    /// Statement hooks, in invocation order.
    #[serde(skip)]
    pub hooks: Vec<Arc<dyn Hook>>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("driver", &self.driver)
            .field("dsn", &"<redacted>")
            .field("default_timeout", &self.default_timeout)
            .field("max_open_connections", &self.max_open_connections)
            .field("max_idle_connections", &self.max_idle_connections)
            .field("connection_lifetime", &self.connection_lifetime)
            .field("connection_idle_timeout", &self.connection_idle_timeout)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl DatabaseConfig {
    pub fn new(driver: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            dsn: dsn.into(),
            ..Self::default()
        }
    }

    /// Parse a config from JSON. Hooks are never read from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid database config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = dsn.into();
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn max_open_connections(mut self, n: usize) -> Self {
        self.max_open_connections = n;
        self
    }

    pub fn max_idle_connections(mut self, n: usize) -> Self {
        self.max_idle_connections = n;
        self
    }

    pub fn connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.connection_lifetime = Some(lifetime);
        self
    }

    pub fn connection_idle_timeout(mut self, timeout: Duration) -> Self {
        self.connection_idle_timeout = Some(timeout);
        self
    }

    /// Append a hook.
    pub fn hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.driver.trim().is_empty() {
            return Err(Error::Config("driver name is required".to_string()));
        }
        if self.max_open_connections > 0 && self.max_idle_connections > self.max_open_connections
        {
            return Err(Error::Config(format!(
                "max_idle_connections ({}) exceeds max_open_connections ({})",
                self.max_idle_connections, self.max_open_connections
            )));
        }
        if self.default_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config(
                "default_timeout must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}
