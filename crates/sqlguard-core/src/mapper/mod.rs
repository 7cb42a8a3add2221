//! Error classification.
//!
//! An [`ErrorMapper`] is a pure `Error -> Error` function. Mappers only ever touch
//! [`Error::Raw`]; every other variant, classified errors included, passes through
//! untouched, which makes mapping idempotent.
//!
//! The [`DefaultErrorMapper`] checks, in order:
//!
//! 1. [`RawError::NoRows`] → [`ErrorKind::NotFound`]
//! 2. [`RawError::Context`] → [`ErrorKind::Timeout`]
//! 3. each registered [`Classifier`]; the first match wins
//!
//! and otherwise returns the error unchanged.

use std::sync::Arc;

use crate::error::{BackendError, DbError, Error, ErrorKind, RawError, Result};

pub mod mysql;
pub mod postgres;
pub mod sqlite;

/// Translates raw driver errors into classified ones.
pub trait ErrorMapper: Send + Sync {
    fn map(&self, err: Error) -> Error;
}

impl<F> ErrorMapper for F
where
    F: Fn(Error) -> Error + Send + Sync,
{
    fn map(&self, err: Error) -> Error {
        self(err)
    }
}

/// Classify the error side of a result; `Ok` passes through.
pub fn classify_result<T>(mapper: &dyn ErrorMapper, result: Result<T>) -> Result<T> {
    result.map_err(|e| mapper.map(e))
}

/// Recognizes one backend's error codes.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` means "not mine".
    fn classify(&self, err: &BackendError) -> Option<ErrorKind>;
}

// ==================== Default mapper ====================

/// Built-in mapper for `NoRows`, context errors, and the registered classifiers.
#[derive(Clone)]
pub struct DefaultErrorMapper {
    classifiers: Vec<Arc<dyn Classifier>>,
}

impl DefaultErrorMapper {
    /// Mapper with the PostgreSQL, MySQL and SQLite classifiers, in that order.
    pub fn new() -> Self {
        Self::with_classifiers(vec![
            Arc::new(postgres::PostgresClassifier),
            Arc::new(mysql::MySqlClassifier),
            Arc::new(sqlite::SqliteClassifier),
        ])
    }

    pub fn with_classifiers(classifiers: Vec<Arc<dyn Classifier>>) -> Self {
        Self { classifiers }
    }

    /// Append a classifier, consulted after the existing ones.
    #[must_use]
    pub fn push(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifiers.push(classifier);
        self
    }

    pub fn classifier_names(&self) -> Vec<&'static str> {
        self.classifiers.iter().map(|c| c.name()).collect()
    }

    fn kind_of(&self, raw: &RawError) -> Option<ErrorKind> {
        match raw {
            RawError::NoRows => Some(ErrorKind::NotFound),
            RawError::Context(_) => Some(ErrorKind::Timeout),
            RawError::Backend(backend) => self.classifiers.iter().find_map(|c| {
                let kind = c.classify(backend)?;
                tracing::trace!(classifier = c.name(), kind = %kind, "Classified backend error");
                Some(kind)
            }),
        }
    }
}

impl Default for DefaultErrorMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DefaultErrorMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultErrorMapper")
            .field("classifiers", &self.classifier_names())
            .finish()
    }
}

impl ErrorMapper for DefaultErrorMapper {
    fn map(&self, err: Error) -> Error {
        match err {
            Error::Raw(raw) => match self.kind_of(&raw) {
                Some(kind) => Error::Classified(DbError::new(kind, raw)),
                None => Error::Raw(raw),
            },
            other => other,
        }
    }
}

// ==================== Chained mapper ====================

/// Tries mappers in order; the first one that classifies the error wins.
///
/// Errors nobody recognizes go to the fallback, a [`DefaultErrorMapper`] unless
/// replaced with [`ChainedMapper::with_fallback`].
pub struct ChainedMapper {
    mappers: Vec<Arc<dyn ErrorMapper>>,
    fallback: Arc<dyn ErrorMapper>,
}

impl ChainedMapper {
    pub fn new(mappers: Vec<Arc<dyn ErrorMapper>>) -> Self {
        Self {
            mappers,
            fallback: Arc::new(DefaultErrorMapper::new()),
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn ErrorMapper>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

impl std::fmt::Debug for ChainedMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedMapper")
            .field("mappers", &self.mappers.len())
            .finish_non_exhaustive()
    }
}

impl ErrorMapper for ChainedMapper {
    fn map(&self, err: Error) -> Error {
        if !err.is_raw() {
            return err;
        }
        let mut err = err;
        for mapper in &self.mappers {
            err = mapper.map(err);
            if !err.is_raw() {
                return err;
            }
        }
        self.fallback.map(err)
    }
}
