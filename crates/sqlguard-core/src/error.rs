//! Error taxonomy.
//!
//! Driver calls fail with a [`RawError`]. The active [`ErrorMapper`](crate::ErrorMapper)
//! turns a raw error into a [`DbError`] carrying one [`ErrorKind`]. The two live in
//! separate variants of [`Error`], so a classified error cannot be classified again.

use std::fmt;

use serde::Serialize;

use crate::context::ContextError;
use crate::driver::Dialect;

/// Semantic error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No row matched
    NotFound,
    /// Unique or primary key violation
    DuplicateKey,
    /// Foreign key violation
    ForeignKeyViolation,
    /// CHECK constraint violation
    CheckViolation,
    /// Deadlock or lock contention
    Deadlock,
    /// Deadline, cancellation, or server-side statement timeout
    Timeout,
    /// Connection could not be established or was lost
    ConnectionFailed,
    /// Anything the mappers did not recognize
    Unclassified,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::DuplicateKey => "duplicate key",
            ErrorKind::ForeignKeyViolation => "foreign key violation",
            ErrorKind::CheckViolation => "check violation",
            ErrorKind::Deadlock => "deadlock",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== Raw errors ====================

/// A failure reported by a driver, before classification.
#[derive(Debug)]
pub enum RawError {
    /// The query produced no rows where one was required.
    NoRows,
    /// The call's context ended before or during the call.
    Context(ContextError),
    /// Anything else the backend reported.
    Backend(BackendError),
}

impl RawError {
    pub fn backend(message: impl Into<String>) -> Self {
        RawError::Backend(BackendError::new(message))
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawError::NoRows => write!(f, "no rows in result set"),
            RawError::Context(e) => write!(f, "{e}"),
            RawError::Backend(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RawError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RawError::NoRows => None,
            RawError::Context(e) => Some(e),
            RawError::Backend(e) => e.source(),
        }
    }
}

impl From<ContextError> for RawError {
    fn from(err: ContextError) -> Self {
        RawError::Context(err)
    }
}

impl From<BackendError> for RawError {
    fn from(err: BackendError) -> Self {
        RawError::Backend(err)
    }
}

/// Backend-native error details.
///
/// Drivers fill whichever structured fields their backend exposes; classifiers fall
/// back to the message text when a field is missing.
#[derive(Debug)]
pub struct BackendError {
    pub message: String,
    /// Which backend produced the error, when known.
    pub dialect: Option<Dialect>,
    /// Five-character SQLSTATE (PostgreSQL).
    pub sqlstate: Option<String>,
    /// Numeric vendor code (MySQL error number, SQLite extended result code).
    pub vendor_code: Option<i64>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            dialect: None,
            sqlstate: None,
            vendor_code: None,
            source: None,
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    pub fn with_vendor_code(mut self, code: i64) -> Self {
        self.vendor_code = Some(code);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(state) = &self.sqlstate {
            write!(f, " (SQLSTATE {state})")?;
        } else if let Some(code) = self.vendor_code {
            write!(f, " (code {code})")?;
        }
        Ok(())
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ==================== Classified errors ====================

/// A raw error annotated with its [`ErrorKind`].
#[derive(Debug)]
pub struct DbError {
    kind: ErrorKind,
    cause: RawError,
    message: Option<String>,
}

impl DbError {
    pub fn new(kind: ErrorKind, cause: RawError) -> Self {
        Self {
            kind,
            cause,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The original driver error.
    pub fn cause(&self) -> &RawError {
        &self.cause
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn into_cause(self) -> RawError {
        self.cause
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg} (cause: {})", self.kind, self.cause),
            None => write!(f, "{}: {}", self.kind, self.cause),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

// ==================== Composite errors ====================

/// A transaction body failed and the rollback that followed failed too.
#[derive(Debug)]
pub struct RollbackError {
    pub original: Box<Error>,
    pub rollback: Box<Error>,
}

impl fmt::Display for RollbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (rollback also failed: {})",
            self.original, self.rollback
        )
    }
}

/// Every attempt of a retried operation failed.
#[derive(Debug)]
pub struct RetryError {
    pub attempts: u32,
    pub last: Box<Error>,
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} attempts failed: {}", self.attempts, self.last)
    }
}

// ==================== Error ====================

/// The primary error type.
#[derive(Debug)]
pub enum Error {
    /// Error with an assigned kind.
    Classified(DbError),
    /// Driver error no mapper has seen yet, or none recognized.
    Raw(RawError),
    /// Body error plus a failed rollback.
    Rollback(RollbackError),
    /// Retries exhausted.
    Retry(RetryError),
    /// The transaction was already committed or rolled back.
    TransactionClosed,
    /// Invalid configuration or registry misuse.
    Config(String),
    /// An argument was rejected before reaching the backend.
    InvalidInput(String),
    /// A value could not be converted.
    Decode(String),
    /// Application-defined error.
    Custom(String),
}

impl Error {
    pub fn classified(kind: ErrorKind, cause: RawError) -> Self {
        Error::Classified(DbError::new(kind, cause))
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// The error's kind; `Unclassified` for anything no mapper recognized.
    ///
    /// Composite errors report the kind of the error that triggered them.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Classified(e) => e.kind(),
            Error::Rollback(e) => e.original.kind(),
            Error::Retry(e) => e.last.kind(),
            _ => ErrorKind::Unclassified,
        }
    }

    pub fn is_classified(&self) -> bool {
        matches!(self, Error::Classified(_))
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Error::Raw(_))
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_duplicate_key(&self) -> bool {
        self.kind() == ErrorKind::DuplicateKey
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        self.kind() == ErrorKind::ForeignKeyViolation
    }

    pub fn is_check_violation(&self) -> bool {
        self.kind() == ErrorKind::CheckViolation
    }

    pub fn is_deadlock(&self) -> bool {
        self.kind() == ErrorKind::Deadlock
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub fn is_connection_failed(&self) -> bool {
        self.kind() == ErrorKind::ConnectionFailed
    }

    /// Borrow the classified error, if any.
    pub fn as_db_error(&self) -> Option<&DbError> {
        match self {
            Error::Classified(e) => Some(e),
            _ => None,
        }
    }

    /// The underlying driver error, classified or not.
    pub fn raw(&self) -> Option<&RawError> {
        match self {
            Error::Classified(e) => Some(e.cause()),
            Error::Raw(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Classified(e) => write!(f, "{e}"),
            Error::Raw(e) => write!(f, "{e}"),
            Error::Rollback(e) => write!(f, "{e}"),
            Error::Retry(e) => write!(f, "{e}"),
            Error::TransactionClosed => write!(f, "transaction already committed or rolled back"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::Decode(msg) => write!(f, "decode error: {msg}"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Classified(e) => Some(e.cause()),
            Error::Raw(e) => e.source(),
            Error::Rollback(e) => Some(e.original.as_ref()),
            Error::Retry(e) => Some(e.last.as_ref()),
            _ => None,
        }
    }
}

impl From<RawError> for Error {
    fn from(err: RawError) -> Self {
        Error::Raw(err)
    }
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        Error::Classified(err)
    }
}

impl From<ContextError> for Error {
    fn from(err: ContextError) -> Self {
        Error::Raw(RawError::Context(err))
    }
}

/// Result type alias for sqlguard operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Result type returned by driver implementations.
pub type DriverResult<T> = std::result::Result<T, RawError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_kind_of_raw_is_unclassified() {
        let err = Error::from(RawError::backend("boom"));
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert!(err.is_raw());
    }

    #[test]
    fn test_classified_keeps_cause() {
        let raw = BackendError::new("duplicate key value")
            .with_dialect(Dialect::Postgres)
            .with_sqlstate("23505");
        let err = Error::classified(ErrorKind::DuplicateKey, raw.into());
        assert!(err.is_duplicate_key());
        match err.raw() {
            Some(RawError::Backend(b)) => assert_eq!(b.sqlstate.as_deref(), Some("23505")),
            other => panic!("unexpected cause {other:?}"),
        }
        assert!(err.source().is_some());
    }

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = DbError::new(ErrorKind::NotFound, RawError::NoRows).with_message("user 7");
        assert_eq!(err.to_string(), "not found: user 7 (cause: no rows in result set)");
    }

    #[test]
    fn test_composite_errors_report_original_kind() {
        let rollback = Error::Rollback(RollbackError {
            original: Box::new(Error::classified(ErrorKind::Deadlock, RawError::backend("x"))),
            rollback: Box::new(Error::Raw(RawError::backend("conn reset"))),
        });
        assert!(rollback.is_deadlock());
        assert!(rollback.to_string().contains("rollback also failed"));

        let retry = Error::Retry(RetryError {
            attempts: 3,
            last: Box::new(Error::classified(
                ErrorKind::Timeout,
                RawError::Context(ContextError::DeadlineExceeded),
            )),
        });
        assert!(retry.is_timeout());
        assert!(retry.to_string().starts_with("all 3 attempts failed"));
    }

    #[test]
    fn test_backend_source_chain() {
        let io = std::io::Error::other("socket closed");
        let err = Error::Raw(RawError::Backend(BackendError::new("lost").with_source(io)));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "socket closed");
    }
}
