//! Uniform relational database handlers.
//!
//! A [`Database`] picks a handler from its configuration (`mysql`, `sqlite` or
//! `mssql`), connects it, and forwards every [`DatabaseHandler`] call to it.
//! SQLite lacks several `ALTER TABLE` forms; its handler emulates them by
//! rebuilding the table inside a transaction.

pub mod db;

pub use db::{
    CellValue, ColumnSpec, ConnectionConfig, Database, DatabaseError, DatabaseHandler,
    DatabaseHook, DbResult, ForeignKeyInfo, ForeignKeySpec, HandlerKind, IndexInfo, IndexType,
    Row, TableOptions,
};
