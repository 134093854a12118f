// Database Handler Traits
// Defines the uniform contract every engine handler implements

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::db::config::ConnectionConfig;

/// Supported handler engines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    #[default]
    Mysql,
    Sqlite,
    Mssql,
}

impl HandlerKind {
    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            HandlerKind::Mysql => "MySQL",
            HandlerKind::Sqlite => "SQLite",
            HandlerKind::Mssql => "Microsoft SQL Server",
        }
    }

    /// Configuration key for this engine
    pub fn key(&self) -> &'static str {
        match self {
            HandlerKind::Mysql => "mysql",
            HandlerKind::Sqlite => "sqlite",
            HandlerKind::Mssql => "mssql",
        }
    }

    /// Parse a configuration key. Returns `None` for unknown keys.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "mysql" => Some(HandlerKind::Mysql),
            "sqlite" => Some(HandlerKind::Sqlite),
            "mssql" => Some(HandlerKind::Mssql),
            _ => None,
        }
    }

    /// Default port for the engine
    pub fn default_port(&self) -> u16 {
        match self {
            HandlerKind::Sqlite => 0, // File-based, no port
            HandlerKind::Mssql => 1433,
            HandlerKind::Mysql => 3306,
        }
    }
}

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to a database")]
    NotConnected,

    #[error("Statement failed: {0}")]
    Statement(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation not implemented for this handler: {0}")]
    NotImplemented(&'static str),

    #[error("Schema migration failed and was rolled back: {0}")]
    Migration(String),
}

impl DatabaseError {
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, DatabaseError::NotImplemented(_))
    }

    pub fn is_statement(&self) -> bool {
        matches!(self, DatabaseError::Statement(_))
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        DatabaseError::Statement(e.to_string())
    }
}

impl From<mysql_async::Error> for DatabaseError {
    fn from(e: mysql_async::Error) -> Self {
        DatabaseError::Statement(e.to_string())
    }
}

pub type DbResult<T> = Result<T, DatabaseError>;

/// Cell value in a result row, also used for bound parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(String),
    Binary(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Integer view of the value; numeric strings are parsed
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            CellValue::Bool(v) => Some(i64::from(*v)),
            CellValue::Float(v) => Some(*v as i64),
            CellValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) | CellValue::DateTime(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Int(i64::from(v))
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::String(v)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(v: Vec<u8>) -> Self {
        CellValue::Binary(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// One result row: column name -> value, in select order
pub type Row = IndexMap<String, CellValue>;

/// Column definitions for CREATE TABLE: name -> raw type definition, in order
pub type ColumnSpec = IndexMap<String, String>;

/// Kinds of index `add_index` can create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IndexType {
    #[default]
    Index,
    Unique,
    PrimaryKey,
    FullText,
    Spatial,
}

impl IndexType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IndexType::Index => "INDEX",
            IndexType::Unique => "UNIQUE",
            IndexType::PrimaryKey => "PRIMARY KEY",
            IndexType::FullText => "FULLTEXT",
            IndexType::Spatial => "SPATIAL",
        }
    }
}

/// Table-level options for CREATE TABLE (honoured by MySQL only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    pub char_set: String,
    pub engine: String,
    pub collation: String,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            char_set: "utf8".to_string(),
            engine: "InnoDB".to_string(),
            collation: "utf8_unicode_ci".to_string(),
        }
    }
}

/// Foreign key to add to a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    pub key_name: String,
    pub self_column: String,
    pub ref_table: String,
    pub ref_column: String,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

impl ForeignKeySpec {
    pub fn new(
        key_name: impl Into<String>,
        self_column: impl Into<String>,
        ref_table: impl Into<String>,
        ref_column: impl Into<String>,
    ) -> Self {
        Self {
            key_name: key_name.into(),
            self_column: self_column.into(),
            ref_table: ref_table.into(),
            ref_column: ref_column.into(),
            on_delete: None,
            on_update: None,
        }
    }

    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = Some(action.into());
        self
    }

    pub fn on_update(mut self, action: impl Into<String>) -> Self {
        self.on_update = Some(action.into());
        self
    }
}

/// One key column of a foreign key, as reported by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub database: String,
    pub key_name: String,
    pub table: String,
    pub column: String,
    pub referenced_database: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Index information, grouped by index name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Handler trait - every engine implements the full contract.
///
/// Operations an engine cannot perform return [`DatabaseError::NotImplemented`];
/// statements the engine rejects return [`DatabaseError::Statement`].
#[async_trait::async_trait]
pub trait DatabaseHandler: Send {
    // --- Metadata ---
    /// Engine this handler talks to
    fn kind(&self) -> HandlerKind;

    /// Whether a connection is currently open
    fn is_connected(&self) -> bool;

    /// Text of the most recently executed statement
    fn get_query(&self) -> Option<&str>;

    /// Message of the most recent failed statement
    fn last_error(&self) -> Option<&str>;

    // --- Connection Management ---
    async fn connect(&mut self, config: &ConnectionConfig) -> DbResult<()>;

    /// Release the connection. Calling it twice is fine.
    async fn close(&mut self) -> DbResult<()>;

    // --- Statements ---
    /// Run a statement and return every result row
    async fn query(&mut self, sql: &str, params: &[CellValue]) -> DbResult<Vec<Row>>;

    /// Run an INSERT and return the generated key
    async fn insert(&mut self, sql: &str, params: &[CellValue]) -> DbResult<i64>;

    /// Run a statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[CellValue]) -> DbResult<u64>;

    /// Run a statement for its effect only
    async fn modify(&mut self, sql: &str, params: &[CellValue]) -> DbResult<()>;

    // --- Transactions ---
    async fn start_transaction(&mut self) -> DbResult<()>;
    async fn commit_transaction(&mut self) -> DbResult<()>;
    async fn rollback_transaction(&mut self) -> DbResult<()>;

    /// Disable autocommit when `enabled` is false. Enabling is a no-op since
    /// autocommit is on by default.
    async fn set_transaction_auto_commit(&mut self, enabled: bool) -> DbResult<()>;

    // --- Tables ---
    async fn table_exists(&mut self, table: &str) -> DbResult<bool>;
    async fn truncate_table(&mut self, table: &str) -> DbResult<()>;
    async fn create_table(
        &mut self,
        name: &str,
        columns: &ColumnSpec,
        options: &TableOptions,
    ) -> DbResult<()>;
    async fn drop_table(&mut self, table: &str) -> DbResult<()>;
    async fn add_column(&mut self, table: &str, name: &str, column_type: &str) -> DbResult<()>;
    async fn drop_column(&mut self, table: &str, name: &str) -> DbResult<()>;

    // --- Foreign Keys ---
    async fn add_foreign_key(&mut self, table: &str, key: &ForeignKeySpec) -> DbResult<()>;
    async fn drop_foreign_key(&mut self, table: &str, key_name: &str) -> DbResult<()>;
    async fn get_table_foreign_keys(&mut self, table: &str) -> DbResult<Vec<ForeignKeyInfo>>;

    // --- Indexes ---
    /// Check for the index `add_index` would create by default for `columns`
    async fn index_exists(&mut self, table: &str, columns: &[&str]) -> DbResult<bool>;
    async fn add_index(
        &mut self,
        table: &str,
        columns: &[&str],
        name: Option<&str>,
        index_type: IndexType,
    ) -> DbResult<()>;
    async fn get_table_indexes(&mut self, table: &str) -> DbResult<Vec<IndexInfo>>;
    async fn drop_index(&mut self, table: &str, name: &str) -> DbResult<()>;

    // --- Locking ---
    /// Take a WRITE lock on every listed table
    async fn lock_tables(&mut self, tables: &[&str]) -> DbResult<()>;
    async fn unlock_tables(&mut self) -> DbResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_kind_keys() {
        assert_eq!(HandlerKind::from_key("mysql"), Some(HandlerKind::Mysql));
        assert_eq!(HandlerKind::from_key(" SQLite "), Some(HandlerKind::Sqlite));
        assert_eq!(HandlerKind::from_key("mssql"), Some(HandlerKind::Mssql));
        assert_eq!(HandlerKind::from_key("oracle"), None);
        assert_eq!(HandlerKind::default(), HandlerKind::Mysql);
        assert_eq!(HandlerKind::Sqlite.key(), "sqlite");
    }

    #[test]
    fn test_index_type_sql() {
        assert_eq!(IndexType::default().as_sql(), "INDEX");
        assert_eq!(IndexType::PrimaryKey.as_sql(), "PRIMARY KEY");
        assert_eq!(IndexType::FullText.as_sql(), "FULLTEXT");
    }

    #[test]
    fn test_cell_value_conversions() {
        assert_eq!(CellValue::from(3), CellValue::Int(3));
        assert_eq!(CellValue::from("a"), CellValue::String("a".to_string()));
        assert_eq!(CellValue::from(None::<i64>), CellValue::Null);
        assert_eq!(CellValue::String(" 42".to_string()).as_i64(), Some(42));
        assert_eq!(CellValue::Null.as_i64(), None);
    }

    #[test]
    fn test_cell_value_serializes_untagged() {
        let json = serde_json::to_string(&vec![CellValue::Int(1), CellValue::Null]).unwrap();
        assert_eq!(json, "[1,null]");
    }

    #[test]
    fn test_error_predicates() {
        assert!(DatabaseError::NotImplemented("lock_tables").is_not_implemented());
        assert!(DatabaseError::Statement("x".to_string()).is_statement());
        assert!(!DatabaseError::NotConnected.is_statement());
    }

    #[test]
    fn test_foreign_key_builder() {
        let key = ForeignKeySpec::new("fk_orders_customer", "customer_id", "customers", "id")
            .on_delete("CASCADE");
        assert_eq!(key.on_delete.as_deref(), Some("CASCADE"));
        assert!(key.on_update.is_none());
    }
}
