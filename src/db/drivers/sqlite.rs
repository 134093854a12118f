// SQLite Handler
// Implements DatabaseHandler for SQLite using rusqlite

use rusqlite::{params_from_iter, Connection as RusqliteConnection, OpenFlags};
use std::path::Path;

use crate::db::config::ConnectionConfig;
use crate::db::migration::{Alteration, SchemaMigrator};
use crate::db::sql;
use crate::db::statement::{cell_from_sqlite, QueryLog};
use crate::db::traits::{
    CellValue, ColumnSpec, DatabaseError, DatabaseHandler, DbResult, ForeignKeyInfo,
    ForeignKeySpec, HandlerKind, IndexInfo, IndexType, Row, TableOptions,
};

/// Runs statements against an open SQLite connection and records them in the
/// handler's query log
pub(crate) struct SqliteRunner<'a> {
    conn: &'a RusqliteConnection,
    log: &'a mut QueryLog,
}

impl<'a> SqliteRunner<'a> {
    pub(crate) fn query(&mut self, sql: &str, params: &[CellValue]) -> DbResult<Vec<Row>> {
        self.log.record(sql, params.len());
        let result = Self::fetch_rows(self.conn, sql, params);
        self.log.finish(result)
    }

    pub(crate) fn execute(&mut self, sql: &str, params: &[CellValue]) -> DbResult<u64> {
        self.log.record(sql, params.len());
        let result = Self::run(self.conn, sql, params);
        self.log.finish(result)
    }

    pub(crate) fn insert(&mut self, sql: &str, params: &[CellValue]) -> DbResult<i64> {
        self.execute(sql, params)?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn modify(&mut self, sql: &str, params: &[CellValue]) -> DbResult<()> {
        self.execute(sql, params).map(|_| ())
    }

    /// First column of the first row as an integer, 0 when there is none
    pub(crate) fn scalar(&mut self, sql: &str, params: &[CellValue]) -> DbResult<i64> {
        let rows = self.query(sql, params)?;
        Ok(rows
            .first()
            .and_then(|row| row.get_index(0))
            .and_then(|(_, value)| value.as_i64())
            .unwrap_or(0))
    }

    fn fetch_rows(
        conn: &RusqliteConnection,
        sql: &str,
        params: &[CellValue],
    ) -> DbResult<Vec<Row>> {
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                record.insert(name.clone(), cell_from_sqlite(row.get_ref(idx)?));
            }
            records.push(record);
        }
        Ok(records)
    }

    fn run(conn: &RusqliteConnection, sql: &str, params: &[CellValue]) -> DbResult<u64> {
        let mut stmt = conn.prepare(sql)?;

        // Statements that yield rows (PRAGMA, SELECT) are stepped to completion
        if stmt.column_count() > 0 {
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            while rows.next()?.is_some() {}
            return Ok(0);
        }

        let affected = stmt.execute(params_from_iter(params.iter()))?;
        Ok(affected as u64)
    }
}

/// SQLite handler implementation
pub struct SqliteHandler {
    conn: Option<RusqliteConnection>,
    path: Option<String>,
    log: QueryLog,
}

impl SqliteHandler {
    pub fn new() -> Self {
        Self {
            conn: None,
            path: None,
            log: QueryLog::new(),
        }
    }

    /// Path of the open database file
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Extract database path from config
    fn get_database_path(config: &ConnectionConfig) -> DbResult<String> {
        let name = config.db_name.trim();
        if name.is_empty() {
            return Err(DatabaseError::Configuration("Invalid database name.".to_string()));
        }

        // Expand ~ to home directory if present
        let path = match name.strip_prefix("~/") {
            Some(rest) => match std::env::var_os("HOME") {
                Some(home) => Path::new(&home).join(rest).to_string_lossy().to_string(),
                None => name.to_string(),
            },
            None => name.to_string(),
        };

        Ok(path)
    }

    /// Open SQLite connection with foreign key enforcement on
    fn open_connection(path: &str) -> DbResult<RusqliteConnection> {
        let conn = RusqliteConnection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to open SQLite database: {}", e))
        })?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        Ok(conn)
    }

    pub(crate) fn runner(&mut self) -> DbResult<SqliteRunner<'_>> {
        let conn = self.conn.as_ref().ok_or(DatabaseError::NotConnected)?;
        Ok(SqliteRunner {
            conn,
            log: &mut self.log,
        })
    }

    /// Column definitions of a table as `name -> "TYPE [NOT] NULL"`
    pub fn table_columns(&mut self, table: &str) -> DbResult<ColumnSpec> {
        sql::validate_table_name(table)?;
        let rows = self.runner()?.query(
            r#"SELECT name, type, "notnull" FROM pragma_table_info(?) ORDER BY cid"#,
            &[CellValue::from(table)],
        )?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = row.get("name")?.as_str()?.to_string();
                let column_type = row.get("type").and_then(|v| v.as_str()).unwrap_or_default();
                let not_null = row.get("notnull").and_then(|v| v.as_i64()).unwrap_or(0) != 0;
                let nullability = if not_null { "NOT NULL" } else { "NULL" };
                let definition = format!("{} {}", column_type, nullability);
                Some((name, definition.trim().to_string()))
            })
            .collect())
    }

    fn alter(&mut self, table: &str, alteration: Alteration<'_>) -> DbResult<()> {
        let mut runner = self.runner()?;
        SchemaMigrator::new(&mut runner).alter(table, alteration)
    }

    fn index_columns(runner: &mut SqliteRunner<'_>, index: &str) -> DbResult<Vec<String>> {
        let rows = runner.query(
            "SELECT name FROM pragma_index_info(?) ORDER BY seqno",
            &[CellValue::from(index)],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(|v| v.as_str()).map(String::from))
            .collect())
    }
}

impl Default for SqliteHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseHandler for SqliteHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Sqlite
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn get_query(&self) -> Option<&str> {
        self.log.last_query()
    }

    fn last_error(&self) -> Option<&str> {
        self.log.last_error()
    }

    async fn connect(&mut self, config: &ConnectionConfig) -> DbResult<()> {
        let path = Self::get_database_path(config)?;
        let conn = Self::open_connection(&path)?;

        tracing::info!(path = %path, "Opened SQLite database");
        self.conn = Some(conn);
        self.path = Some(path);
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(error = %e, "Error while closing SQLite database");
            }
            tracing::info!(
                path = self.path.as_deref().unwrap_or_default(),
                "Closed SQLite database"
            );
        }
        Ok(())
    }

    async fn query(&mut self, sql: &str, params: &[CellValue]) -> DbResult<Vec<Row>> {
        self.runner()?.query(sql, params)
    }

    async fn insert(&mut self, sql: &str, params: &[CellValue]) -> DbResult<i64> {
        self.runner()?.insert(sql, params)
    }

    async fn execute(&mut self, sql: &str, params: &[CellValue]) -> DbResult<u64> {
        self.runner()?.execute(sql, params)
    }

    async fn modify(&mut self, sql: &str, params: &[CellValue]) -> DbResult<()> {
        self.runner()?.modify(sql, params)
    }

    async fn start_transaction(&mut self) -> DbResult<()> {
        self.runner()?.modify("BEGIN", &[])
    }

    async fn commit_transaction(&mut self) -> DbResult<()> {
        self.runner()?.modify("COMMIT", &[])
    }

    async fn rollback_transaction(&mut self) -> DbResult<()> {
        self.runner()?.modify("ROLLBACK", &[])
    }

    async fn set_transaction_auto_commit(&mut self, _enabled: bool) -> DbResult<()> {
        Err(DatabaseError::NotImplemented("set_transaction_auto_commit"))
    }

    async fn table_exists(&mut self, table: &str) -> DbResult<bool> {
        sql::validate_table_name(table)?;
        let count = self.runner()?.scalar(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[CellValue::from(table)],
        )?;
        Ok(count > 0)
    }

    async fn truncate_table(&mut self, table: &str) -> DbResult<()> {
        sql::validate_table_name(table)?;
        let mut runner = self.runner()?;
        let delete = format!("DELETE FROM {}", sql::quote_table(HandlerKind::Sqlite, table));
        runner.modify(&delete, &[])?;

        // Reset the AUTOINCREMENT counter, if the table has one
        let has_sequence = runner.scalar(
            "SELECT COUNT(*) AS count FROM sqlite_master \
             WHERE type = 'table' AND name = 'sqlite_sequence'",
            &[],
        )? > 0;
        if has_sequence {
            runner.modify("DELETE FROM sqlite_sequence WHERE name = ?", &[CellValue::from(table)])?;
        }
        Ok(())
    }

    async fn create_table(
        &mut self,
        name: &str,
        columns: &ColumnSpec,
        _options: &TableOptions,
    ) -> DbResult<()> {
        let statement = sql::create_table(HandlerKind::Sqlite, name, columns, None)?;
        self.runner()?.modify(&statement, &[])
    }

    async fn drop_table(&mut self, table: &str) -> DbResult<()> {
        let statement = sql::drop_table(HandlerKind::Sqlite, table)?;
        self.runner()?.modify(&statement, &[])
    }

    async fn add_column(&mut self, table: &str, name: &str, column_type: &str) -> DbResult<()> {
        let statement = sql::add_column(HandlerKind::Sqlite, table, name, column_type)?;
        self.runner()?.modify(&statement, &[])
    }

    async fn drop_column(&mut self, table: &str, name: &str) -> DbResult<()> {
        sql::validate_table_name(table)?;
        sql::validate_identifier(name)?;
        self.alter(table, Alteration::DropColumn(name))
    }

    async fn add_foreign_key(&mut self, table: &str, key: &ForeignKeySpec) -> DbResult<()> {
        sql::validate_table_name(table)?;
        sql::foreign_key_clause(HandlerKind::Sqlite, key)?;
        self.alter(table, Alteration::AddForeignKey(key))
    }

    async fn drop_foreign_key(&mut self, table: &str, key_name: &str) -> DbResult<()> {
        sql::validate_table_name(table)?;
        sql::validate_identifier(key_name)?;
        self.alter(table, Alteration::DropForeignKey(key_name))
    }

    async fn get_table_foreign_keys(&mut self, _table: &str) -> DbResult<Vec<ForeignKeyInfo>> {
        Err(DatabaseError::NotImplemented("get_table_foreign_keys"))
    }

    async fn index_exists(&mut self, table: &str, columns: &[&str]) -> DbResult<bool> {
        sql::index_columns(HandlerKind::Sqlite, columns)?;
        let name = sql::derive_index_name(columns);
        let indexes = self.get_table_indexes(table).await?;
        Ok(indexes.iter().any(|index| index.name == name))
    }

    async fn add_index(
        &mut self,
        table: &str,
        columns: &[&str],
        name: Option<&str>,
        index_type: IndexType,
    ) -> DbResult<()> {
        sql::validate_table_name(table)?;
        let cols = sql::index_columns(HandlerKind::Sqlite, columns)?;
        let name = sql::quote_identifier(
            HandlerKind::Sqlite,
            &sql::resolve_index_name(columns, name)?,
        );
        let table = sql::quote_table(HandlerKind::Sqlite, table);

        let statement = match index_type {
            IndexType::Index => format!("CREATE INDEX {} ON {} ( {} )", name, table, cols),
            IndexType::Unique => {
                format!("CREATE UNIQUE INDEX {} ON {} ( {} )", name, table, cols)
            }
            IndexType::PrimaryKey | IndexType::FullText | IndexType::Spatial => {
                return Err(DatabaseError::NotImplemented("add_index"));
            }
        };
        self.runner()?.modify(&statement, &[])
    }

    async fn get_table_indexes(&mut self, table: &str) -> DbResult<Vec<IndexInfo>> {
        sql::validate_table_name(table)?;
        let mut runner = self.runner()?;
        let rows = runner.query(
            r#"SELECT name, "unique" FROM pragma_index_list(?) ORDER BY name"#,
            &[CellValue::from(table)],
        )?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(name) = row.get("name").and_then(|v| v.as_str()).map(String::from) else {
                continue;
            };
            let unique = row.get("unique").and_then(|v| v.as_i64()).unwrap_or(0) != 0;
            let columns = Self::index_columns(&mut runner, &name)?;
            indexes.push(IndexInfo { name, columns, unique });
        }
        Ok(indexes)
    }

    async fn drop_index(&mut self, table: &str, name: &str) -> DbResult<()> {
        sql::validate_table_name(table)?;
        sql::validate_identifier(name)?;
        let statement = format!("DROP INDEX {}", sql::quote_identifier(HandlerKind::Sqlite, name));
        self.runner()?.modify(&statement, &[])
    }

    async fn lock_tables(&mut self, _tables: &[&str]) -> DbResult<()> {
        Err(DatabaseError::NotImplemented("lock_tables"))
    }

    async fn unlock_tables(&mut self) -> DbResult<()> {
        Err(DatabaseError::NotImplemented("unlock_tables"))
    }
}
