//! Driver registry.
//!
//! Drivers are registered explicitly on a [`DriverRegistry`] value, which is then
//! handed to whatever opens the database. There is no process-wide registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::driver::Driver;
use crate::dsn::DriverOptions;
use crate::error::{Error, Result};
use crate::mapper::{DefaultErrorMapper, ErrorMapper};

/// Knows how to reach one kind of backend.
pub trait DriverFactory: Send + Sync {
    /// Registry key, e.g. `"sqlite"`.
    fn name(&self) -> &'static str;

    /// Build this driver's DSN from neutral options.
    fn dsn(&self, opts: &DriverOptions) -> Result<String>;

    /// Mapper consulted before the default mapper for this driver's errors.
    fn error_mapper(&self) -> Arc<dyn ErrorMapper> {
        Arc::new(DefaultErrorMapper::new())
    }

    /// Connect using `config.dsn` and the pool settings in `config`.
    fn open(&self, config: &DatabaseConfig) -> Result<Arc<dyn Driver>>;
}

/// Name → factory map.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<&'static str, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; a second registration under the same name is an error.
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) -> Result<()> {
        let name = factory.name();
        if self.factories.contains_key(name) {
            return Err(Error::Config(format!("driver {name:?} already registered")));
        }
        tracing::debug!(driver = name, "Registered driver");
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn replace(&mut self, factory: Arc<dyn DriverFactory>) -> Option<Arc<dyn DriverFactory>> {
        let name = factory.name();
        tracing::debug!(driver = name, "Replaced driver");
        self.factories.insert(name, factory)
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, factory: Arc<dyn DriverFactory>) -> Result<Self> {
        self.register(factory)?;
        Ok(self)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn DriverFactory>> {
        self.factories.get(name).cloned().ok_or_else(|| {
            Error::Config(format!(
                "unknown driver {name:?} (registered: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
