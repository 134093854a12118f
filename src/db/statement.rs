// Statement Runner Support
// Query bookkeeping shared by the handlers and conversions between CellValue
// and the driver value types

use chrono::NaiveDate;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqliteValue, ValueRef};

use crate::db::traits::{CellValue, DatabaseError, DbResult};

/// Last executed statement and last failure, kept for diagnostics
#[derive(Debug, Default, Clone)]
pub struct QueryLog {
    last_query: Option<String>,
    last_error: Option<String>,
}

impl QueryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record a statement about to run
    pub fn record(&mut self, sql: &str, param_count: usize) {
        tracing::debug!(sql, params = param_count, "Executing statement");
        self.last_query = Some(sql.to_string());
    }

    /// Fold a statement result into the log
    pub fn finish<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(e) => {
                let message = match e {
                    DatabaseError::Statement(msg) => msg.clone(),
                    other => other.to_string(),
                };
                tracing::warn!(
                    sql = self.last_query.as_deref().unwrap_or_default(),
                    error = %message,
                    "Statement failed"
                );
                self.last_error = Some(message);
            }
        }
        result
    }
}

// ============================================================================
// SQLite
// ============================================================================

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            CellValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            CellValue::Bool(v) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*v))),
            CellValue::Int(v) => ToSqlOutput::Owned(SqliteValue::Integer(*v)),
            CellValue::Float(v) => ToSqlOutput::Owned(SqliteValue::Real(*v)),
            CellValue::String(s) | CellValue::DateTime(s) => {
                ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))
            }
            CellValue::Binary(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Convert a SQLite cell, which carries its own storage class
pub fn cell_from_sqlite(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(v) => CellValue::Int(v),
        ValueRef::Real(v) => CellValue::Float(v),
        ValueRef::Text(bytes) => CellValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => CellValue::Binary(bytes.to_vec()),
    }
}

// ============================================================================
// MySQL
// ============================================================================

impl From<&CellValue> for mysql_async::Value {
    fn from(value: &CellValue) -> Self {
        match value {
            CellValue::Null => mysql_async::Value::NULL,
            CellValue::Bool(v) => mysql_async::Value::Int(i64::from(*v)),
            CellValue::Int(v) => mysql_async::Value::Int(*v),
            CellValue::Float(v) => mysql_async::Value::Double(*v),
            CellValue::String(s) | CellValue::DateTime(s) => {
                mysql_async::Value::Bytes(s.as_bytes().to_vec())
            }
            CellValue::Binary(b) => mysql_async::Value::Bytes(b.clone()),
        }
    }
}

/// Positional parameters for a prepared statement
pub fn mysql_params(params: &[CellValue]) -> mysql_async::Params {
    if params.is_empty() {
        mysql_async::Params::Empty
    } else {
        mysql_async::Params::Positional(params.iter().map(mysql_async::Value::from).collect())
    }
}

/// Convert a MySQL cell. Text comes back as bytes; non-UTF-8 bytes stay binary.
pub fn cell_from_mysql(value: mysql_async::Value) -> CellValue {
    use mysql_async::Value;

    match value {
        Value::NULL => CellValue::Null,
        Value::Int(v) => CellValue::Int(v),
        Value::UInt(v) => i64::try_from(v)
            .map(CellValue::Int)
            .unwrap_or_else(|_| CellValue::String(v.to_string())),
        Value::Float(v) => CellValue::Float(f64::from(v)),
        Value::Double(v) => CellValue::Float(v),
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => CellValue::String(s),
            Err(e) => CellValue::Binary(e.into_bytes()),
        },
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let (hour, minute, second) = (u32::from(hour), u32::from(minute), u32::from(second));
            let formatted = NaiveDate::from_ymd_opt(i32::from(year), month.into(), day.into())
                .and_then(|d| d.and_hms_micro_opt(hour, minute, second, micros))
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
                .unwrap_or_else(|| {
                    format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        year, month, day, hour, minute, second
                    )
                });
            CellValue::DateTime(formatted)
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = days * 24 + u32::from(hours);
            let mut formatted = format!(
                "{}{:02}:{:02}:{:02}",
                if negative { "-" } else { "" },
                total_hours,
                minutes,
                seconds
            );
            if micros > 0 {
                formatted.push_str(&format!(".{:06}", micros));
            }
            CellValue::String(formatted)
        }
    }
}
