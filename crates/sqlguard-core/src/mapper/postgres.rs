//! PostgreSQL SQLSTATE classification.

use std::sync::OnceLock;

use regex::Regex;

use super::Classifier;
use crate::driver::Dialect;
use crate::error::{BackendError, ErrorKind};

/// SQLSTATE → kind.
pub const SQLSTATE_TABLE: &[(&str, ErrorKind)] = &[
    ("23505", ErrorKind::DuplicateKey),
    ("23503", ErrorKind::ForeignKeyViolation),
    ("23514", ErrorKind::CheckViolation),
    ("40P01", ErrorKind::Deadlock),
    ("57014", ErrorKind::Timeout),
    ("08000", ErrorKind::ConnectionFailed),
    ("08001", ErrorKind::ConnectionFailed),
    ("08003", ErrorKind::ConnectionFailed),
    ("08004", ErrorKind::ConnectionFailed),
    ("08006", ErrorKind::ConnectionFailed),
    ("08007", ErrorKind::ConnectionFailed),
    ("08P01", ErrorKind::ConnectionFailed),
];

fn sqlstate_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(r"SQLSTATE\s+([0-9A-Z]{5})") {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid SQLSTATE pattern, text matching disabled");
                None
            }
        })
        .as_ref()
}

/// Look up a SQLSTATE.
///
/// Codes outside the table still map by class: anything in class `08` is a
/// connection failure.
pub fn kind_for_sqlstate(code: &str) -> Option<ErrorKind> {
    SQLSTATE_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, kind)| *kind)
        .or_else(|| match code.get(..2) {
            Some("08") => Some(ErrorKind::ConnectionFailed),
            _ => None,
        })
}

/// Pull the last `SQLSTATE XXXXX` out of a driver message.
pub fn extract_sqlstate(message: &str) -> Option<&str> {
    sqlstate_pattern()?
        .captures_iter(message)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Classify a PostgreSQL error by its structured SQLSTATE, or one found in the text.
pub fn classify(err: &BackendError) -> Option<ErrorKind> {
    if let Some(state) = err.sqlstate.as_deref() {
        return kind_for_sqlstate(state);
    }
    extract_sqlstate(&err.message).and_then(kind_for_sqlstate)
}

/// Classifier for PostgreSQL errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresClassifier;

impl Classifier for PostgresClassifier {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn classify(&self, err: &BackendError) -> Option<ErrorKind> {
        match err.dialect {
            Some(Dialect::Postgres) | None => classify(err),
            Some(_) => None,
        }
    }
}
