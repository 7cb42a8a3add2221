//! Conversions between sqlguard values and rusqlite types.

use std::sync::Arc;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{ErrorCode, Statement};
use sqlguard_core::{BackendError, Context, ContextError, Dialect, RawError, Row, Value};

/// Borrowing adapter that binds a [`Value`] as a SQLite parameter.
pub(crate) struct Param<'a>(pub(crate) &'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;

        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(b) => ToSqlOutput::Owned(Sql::Integer(i64::from(*b))),
            Value::TinyInt(v) => ToSqlOutput::Owned(Sql::Integer(i64::from(*v))),
            Value::SmallInt(v) => ToSqlOutput::Owned(Sql::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(Sql::Integer(i64::from(*v))),
            Value::BigInt(v) | Value::Timestamp(v) => ToSqlOutput::Owned(Sql::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(Sql::Real(f64::from(*v))),
            Value::Double(v) => ToSqlOutput::Owned(Sql::Real(*v)),
            Value::Decimal(s) | Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Json(json) => ToSqlOutput::Owned(Sql::Text(json.to_string())),
        })
    }
}

pub(crate) fn params(args: &[Value]) -> impl rusqlite::Params + '_ {
    rusqlite::params_from_iter(args.iter().map(Param))
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::BigInt(i),
        ValueRef::Real(f) => Value::Double(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

pub(crate) fn column_names(stmt: &Statement<'_>) -> Arc<[String]> {
    stmt.column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into()
}

pub(crate) fn read_row(columns: &Arc<[String]>, row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut values = Vec::with_capacity(columns.len());
    for i in 0..columns.len() {
        values.push(value_from_ref(row.get_ref(i)?));
    }
    Ok(Row::new(Arc::clone(columns), values))
}

/// Translate a rusqlite failure into the driver-native error shape.
///
/// An interrupted statement is reported as the context's own error, since the
/// interrupt only ever comes from the progress handler watching that context.
pub(crate) fn raw_error(err: rusqlite::Error, ctx: &Context) -> RawError {
    if matches!(err, rusqlite::Error::QueryReturnedNoRows) {
        return RawError::NoRows;
    }
    if matches!(&err, rusqlite::Error::SqliteFailure(ffi, _) if ffi.code == ErrorCode::OperationInterrupted)
    {
        return RawError::Context(ctx.err().unwrap_or(ContextError::DeadlineExceeded));
    }

    let backend = match &err {
        rusqlite::Error::SqliteFailure(ffi, message) => {
            BackendError::new(message.clone().unwrap_or_else(|| ffi.to_string()))
                .with_vendor_code(i64::from(ffi.extended_code))
        }
        other => BackendError::new(other.to_string()),
    };
    RawError::Backend(backend.with_dialect(Dialect::Sqlite).with_source(err))
}
