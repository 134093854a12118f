// Database Handlers
// One DatabaseHandler implementation per supported engine

pub mod mssql;
pub mod mysql;
pub mod sqlite;

// Re-export handlers
pub use mssql::MssqlHandler;
pub use mysql::MysqlHandler;
pub use sqlite::SqliteHandler;
