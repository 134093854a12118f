// Database Module
// Uniform handler contract, per-engine handlers and the Database facade

pub mod config;
pub mod database;
pub mod drivers;
pub mod hooks;
pub(crate) mod migration;
pub mod sql;
pub mod statement;
pub mod traits;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::ConnectionConfig;
pub use database::{create_handler, Database};
pub use drivers::{MssqlHandler, MysqlHandler, SqliteHandler};
pub use hooks::{DatabaseHook, HookEvent, HookOutcome, Operation};
pub use statement::QueryLog;
pub use traits::{
    CellValue, ColumnSpec, DatabaseError, DatabaseHandler, DbResult, ForeignKeyInfo,
    ForeignKeySpec, HandlerKind, IndexInfo, IndexType, Row, TableOptions,
};
