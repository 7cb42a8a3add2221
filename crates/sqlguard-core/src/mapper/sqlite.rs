//! SQLite result-code and message classification.
//!
//! SQLite reports constraint failures through extended result codes when the
//! driver exposes them, and always through a stable message prefix.

use super::Classifier;
use crate::driver::Dialect;
use crate::error::{BackendError, ErrorKind};

/// Extended (or primary) result code → kind.
pub const RESULT_CODE_TABLE: &[(i64, ErrorKind)] = &[
    (2067, ErrorKind::DuplicateKey),        // SQLITE_CONSTRAINT_UNIQUE
    (1555, ErrorKind::DuplicateKey),        // SQLITE_CONSTRAINT_PRIMARYKEY
    (787, ErrorKind::ForeignKeyViolation),  // SQLITE_CONSTRAINT_FOREIGNKEY
    (275, ErrorKind::CheckViolation),       // SQLITE_CONSTRAINT_CHECK
    (5, ErrorKind::Deadlock),               // SQLITE_BUSY
    (6, ErrorKind::Deadlock),               // SQLITE_LOCKED
    (517, ErrorKind::Deadlock),             // SQLITE_BUSY_SNAPSHOT
    (262, ErrorKind::Deadlock),             // SQLITE_LOCKED_SHAREDCACHE
];

/// Message substring → kind.
pub const MESSAGE_TABLE: &[(&str, ErrorKind)] = &[
    ("UNIQUE constraint failed", ErrorKind::DuplicateKey),
    ("PRIMARY KEY constraint failed", ErrorKind::DuplicateKey),
    ("FOREIGN KEY constraint failed", ErrorKind::ForeignKeyViolation),
    ("CHECK constraint failed", ErrorKind::CheckViolation),
    ("database is locked", ErrorKind::Deadlock),
    ("database table is locked", ErrorKind::Deadlock),
    ("unable to open database file", ErrorKind::ConnectionFailed),
];

pub fn kind_for_result_code(code: i64) -> Option<ErrorKind> {
    RESULT_CODE_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, kind)| *kind)
}

pub fn kind_for_message(message: &str) -> Option<ErrorKind> {
    MESSAGE_TABLE
        .iter()
        .find(|(pattern, _)| message.contains(pattern))
        .map(|(_, kind)| *kind)
}

/// Classify a SQLite error by result code, then by message text.
pub fn classify(err: &BackendError) -> Option<ErrorKind> {
    err.vendor_code
        .and_then(kind_for_result_code)
        .or_else(|| kind_for_message(&err.message))
}

/// Classifier for SQLite errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteClassifier;

impl Classifier for SqliteClassifier {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn classify(&self, err: &BackendError) -> Option<ErrorKind> {
        match err.dialect {
            Some(Dialect::Sqlite) => classify(err),
            None => kind_for_message(&err.message),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_codes() {
        let c = SqliteClassifier;
        let err = |code| {
            BackendError::new("constraint")
                .with_dialect(Dialect::Sqlite)
                .with_vendor_code(code)
        };
        assert_eq!(c.classify(&err(2067)), Some(ErrorKind::DuplicateKey));
        assert_eq!(c.classify(&err(1555)), Some(ErrorKind::DuplicateKey));
        assert_eq!(c.classify(&err(787)), Some(ErrorKind::ForeignKeyViolation));
        assert_eq!(c.classify(&err(275)), Some(ErrorKind::CheckViolation));
        assert_eq!(c.classify(&err(5)), Some(ErrorKind::Deadlock));
    }

    #[test]
    fn test_message_patterns() {
        assert_eq!(
            kind_for_message("UNIQUE constraint failed: users.email"),
            Some(ErrorKind::DuplicateKey)
        );
        assert_eq!(
            kind_for_message("FOREIGN KEY constraint failed"),
            Some(ErrorKind::ForeignKeyViolation)
        );
        assert_eq!(
            kind_for_message("CHECK constraint failed: age >= 0"),
            Some(ErrorKind::CheckViolation)
        );
        assert_eq!(kind_for_message("database is locked"), Some(ErrorKind::Deadlock));
        assert_eq!(kind_for_message("no such table: users"), None);
    }

    #[test]
    fn test_unknown_code_falls_back_to_message() {
        let err = BackendError::new("UNIQUE constraint failed: t.id")
            .with_dialect(Dialect::Sqlite)
            .with_vendor_code(19);
        assert_eq!(SqliteClassifier.classify(&err), Some(ErrorKind::DuplicateKey));
    }

    #[test]
    fn test_untagged_error_matches_by_text_only() {
        let err = BackendError::new("mystery").with_vendor_code(2067);
        assert_eq!(SqliteClassifier.classify(&err), None);
        let err = BackendError::new("UNIQUE constraint failed: t.id");
        assert_eq!(SqliteClassifier.classify(&err), Some(ErrorKind::DuplicateKey));
    }
}
