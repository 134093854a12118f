// MS-SQL Handler
// Placeholder so configurations naming mssql resolve to a handler; every
// statement-level operation reports NotImplemented

use crate::db::config::ConnectionConfig;
use crate::db::traits::{
    CellValue, ColumnSpec, DatabaseError, DatabaseHandler, DbResult, ForeignKeyInfo,
    ForeignKeySpec, HandlerKind, IndexInfo, IndexType, Row, TableOptions,
};

/// MS-SQL handler stub
#[derive(Debug, Default)]
pub struct MssqlHandler;

impl MssqlHandler {
    pub fn new() -> Self {
        Self
    }
}

fn unsupported<T>(operation: &'static str) -> DbResult<T> {
    Err(DatabaseError::NotImplemented(operation))
}

#[async_trait::async_trait]
impl DatabaseHandler for MssqlHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Mssql
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn get_query(&self) -> Option<&str> {
        None
    }

    fn last_error(&self) -> Option<&str> {
        None
    }

    async fn connect(&mut self, _config: &ConnectionConfig) -> DbResult<()> {
        unsupported("connect")
    }

    async fn close(&mut self) -> DbResult<()> {
        Ok(())
    }

    async fn query(&mut self, _sql: &str, _params: &[CellValue]) -> DbResult<Vec<Row>> {
        unsupported("query")
    }

    async fn insert(&mut self, _sql: &str, _params: &[CellValue]) -> DbResult<i64> {
        unsupported("insert")
    }

    async fn execute(&mut self, _sql: &str, _params: &[CellValue]) -> DbResult<u64> {
        unsupported("execute")
    }

    async fn modify(&mut self, _sql: &str, _params: &[CellValue]) -> DbResult<()> {
        unsupported("modify")
    }

    async fn start_transaction(&mut self) -> DbResult<()> {
        unsupported("start_transaction")
    }

    async fn commit_transaction(&mut self) -> DbResult<()> {
        unsupported("commit_transaction")
    }

    async fn rollback_transaction(&mut self) -> DbResult<()> {
        unsupported("rollback_transaction")
    }

    async fn set_transaction_auto_commit(&mut self, _enabled: bool) -> DbResult<()> {
        unsupported("set_transaction_auto_commit")
    }

    async fn table_exists(&mut self, _table: &str) -> DbResult<bool> {
        unsupported("table_exists")
    }

    async fn truncate_table(&mut self, _table: &str) -> DbResult<()> {
        unsupported("truncate_table")
    }

    async fn create_table(
        &mut self,
        _name: &str,
        _columns: &ColumnSpec,
        _options: &TableOptions,
    ) -> DbResult<()> {
        unsupported("create_table")
    }

    async fn drop_table(&mut self, _table: &str) -> DbResult<()> {
        unsupported("drop_table")
    }

    async fn add_column(&mut self, _table: &str, _name: &str, _column_type: &str) -> DbResult<()> {
        unsupported("add_column")
    }

    async fn drop_column(&mut self, _table: &str, _name: &str) -> DbResult<()> {
        unsupported("drop_column")
    }

    async fn add_foreign_key(&mut self, _table: &str, _key: &ForeignKeySpec) -> DbResult<()> {
        unsupported("add_foreign_key")
    }

    async fn drop_foreign_key(&mut self, _table: &str, _key_name: &str) -> DbResult<()> {
        unsupported("drop_foreign_key")
    }

    async fn get_table_foreign_keys(&mut self, _table: &str) -> DbResult<Vec<ForeignKeyInfo>> {
        unsupported("get_table_foreign_keys")
    }

    async fn index_exists(&mut self, _table: &str, _columns: &[&str]) -> DbResult<bool> {
        unsupported("index_exists")
    }

    async fn add_index(
        &mut self,
        _table: &str,
        _columns: &[&str],
        _name: Option<&str>,
        _index_type: IndexType,
    ) -> DbResult<()> {
        unsupported("add_index")
    }

    async fn get_table_indexes(&mut self, _table: &str) -> DbResult<Vec<IndexInfo>> {
        unsupported("get_table_indexes")
    }

    async fn drop_index(&mut self, _table: &str, _name: &str) -> DbResult<()> {
        unsupported("drop_index")
    }

    async fn lock_tables(&mut self, _tables: &[&str]) -> DbResult<()> {
        unsupported("lock_tables")
    }

    async fn unlock_tables(&mut self) -> DbResult<()> {
        unsupported("unlock_tables")
    }
}
