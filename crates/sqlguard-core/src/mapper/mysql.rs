//! MySQL error-number classification.

use std::sync::OnceLock;

use regex::Regex;

use super::Classifier;
use crate::driver::Dialect;
use crate::error::{BackendError, ErrorKind};

/// MySQL server/client error number → kind.
pub const ERROR_NUMBER_TABLE: &[(i64, ErrorKind)] = &[
    (1062, ErrorKind::DuplicateKey),
    (1216, ErrorKind::ForeignKeyViolation),
    (1217, ErrorKind::ForeignKeyViolation),
    (1451, ErrorKind::ForeignKeyViolation),
    (1452, ErrorKind::ForeignKeyViolation),
    (3819, ErrorKind::CheckViolation),
    (1213, ErrorKind::Deadlock),
    (1205, ErrorKind::Timeout),
    (3024, ErrorKind::Timeout),
    (1045, ErrorKind::ConnectionFailed),
    (2002, ErrorKind::ConnectionFailed),
    (2003, ErrorKind::ConnectionFailed),
    (2006, ErrorKind::ConnectionFailed),
    (2013, ErrorKind::ConnectionFailed),
];

// Matches "Error 1062: ..." and "ERROR 1062 (23000): ...".
fn error_number_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(r"(?i)\berror\s+(\d{4})\b") {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid MySQL error pattern, text matching disabled");
                None
            }
        })
        .as_ref()
}

pub fn kind_for_error_number(number: i64) -> Option<ErrorKind> {
    ERROR_NUMBER_TABLE
        .iter()
        .find(|(n, _)| *n == number)
        .map(|(_, kind)| *kind)
}

pub fn extract_error_number(message: &str) -> Option<i64> {
    error_number_pattern()?
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Classify a MySQL error by its vendor code, or one found in the text.
pub fn classify(err: &BackendError) -> Option<ErrorKind> {
    if let Some(number) = err.vendor_code {
        return kind_for_error_number(number);
    }
    extract_error_number(&err.message).and_then(kind_for_error_number)
}

/// Classifier for MySQL and MariaDB errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlClassifier;

impl Classifier for MySqlClassifier {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn classify(&self, err: &BackendError) -> Option<ErrorKind> {
        match err.dialect {
            Some(Dialect::Mysql) => classify(err),
            // Untagged errors only match by text; a bare vendor code is ambiguous.
            None => extract_error_number(&err.message).and_then(kind_for_error_number),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql(code: i64) -> BackendError {
        BackendError::new("mysql failure")
            .with_dialect(Dialect::Mysql)
            .with_vendor_code(code)
    }

    #[test]
    fn test_structured_codes() {
        let c = MySqlClassifier;
        assert_eq!(c.classify(&mysql(1062)), Some(ErrorKind::DuplicateKey));
        assert_eq!(c.classify(&mysql(1452)), Some(ErrorKind::ForeignKeyViolation));
        assert_eq!(c.classify(&mysql(3819)), Some(ErrorKind::CheckViolation));
        assert_eq!(c.classify(&mysql(1213)), Some(ErrorKind::Deadlock));
        assert_eq!(c.classify(&mysql(1205)), Some(ErrorKind::Timeout));
        assert_eq!(c.classify(&mysql(2013)), Some(ErrorKind::ConnectionFailed));
        assert_eq!(c.classify(&mysql(1064)), None);
    }

    #[test]
    fn test_code_from_message() {
        let err = BackendError::new("Error 1062: Duplicate entry 'a@b.c' for key 'users.email'");
        assert_eq!(MySqlClassifier.classify(&err), Some(ErrorKind::DuplicateKey));

        let err = BackendError::new("ERROR 1213 (40001): Deadlock found when trying to get lock");
        assert_eq!(MySqlClassifier.classify(&err), Some(ErrorKind::Deadlock));
    }

    #[test]
    fn test_untagged_vendor_code_is_not_trusted() {
        let err = BackendError::new("constraint").with_vendor_code(1062);
        assert_eq!(MySqlClassifier.classify(&err), None);
    }

    #[test]
    fn test_other_dialect_is_ignored() {
        let err = BackendError::new("Error 1062: Duplicate entry").with_dialect(Dialect::Postgres);
        assert_eq!(MySqlClassifier.classify(&err), None);
    }
}
