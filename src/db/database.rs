// Database Facade
// Selects a handler from configuration and forwards every contract call to it

use std::sync::Arc;

use crate::db::config::ConnectionConfig;
use crate::db::drivers::{MssqlHandler, MysqlHandler, SqliteHandler};
use crate::db::hooks::{DatabaseHook, HookEvent, HookOutcome, Operation};
use crate::db::traits::{
    CellValue, ColumnSpec, DatabaseHandler, DbResult, ForeignKeyInfo, ForeignKeySpec,
    HandlerKind, IndexInfo, IndexType, Row, TableOptions,
};

/// Build an unconnected handler for an engine
pub fn create_handler(kind: HandlerKind) -> Box<dyn DatabaseHandler> {
    match kind {
        HandlerKind::Mysql => Box::new(MysqlHandler::new()),
        HandlerKind::Sqlite => Box::new(SqliteHandler::new()),
        HandlerKind::Mssql => Box::new(MssqlHandler::new()),
    }
}

/// Single entry point owning one handler
pub struct Database {
    handler: Box<dyn DatabaseHandler>,
    hooks: Vec<Arc<dyn DatabaseHook>>,
    config: Option<ConnectionConfig>,
}

/// Notify hooks around a handler call and hand its result back untouched
macro_rules! forward {
    ($self:ident, $operation:expr, $target:expr, $call:expr) => {{
        let event = HookEvent::new($operation, $target);
        $self.notify_before(&event);
        let result = $call.await;
        $self.notify_after(&event, &result);
        result
    }};
}

impl Database {
    /// Create the configured handler and connect it
    pub async fn new(config: ConnectionConfig) -> DbResult<Self> {
        let kind = config.handler_kind()?;
        let mut handler = create_handler(kind);
        handler.connect(&config).await?;

        tracing::info!(handler = kind.display_name(), "Database ready");
        Ok(Self {
            handler,
            hooks: Vec::new(),
            config: Some(config),
        })
    }

    /// Wrap a handler built elsewhere. It is used as-is, connected or not.
    pub fn with_handler(handler: Box<dyn DatabaseHandler>) -> Self {
        Self {
            handler,
            hooks: Vec::new(),
            config: None,
        }
    }

    pub fn add_hook(&mut self, hook: Arc<dyn DatabaseHook>) {
        self.hooks.push(hook);
    }

    /// Configuration of the last successful connect
    pub fn config(&self) -> Option<&ConnectionConfig> {
        self.config.as_ref()
    }

    fn notify_before(&self, event: &HookEvent<'_>) {
        for hook in &self.hooks {
            hook.before(event);
        }
    }

    fn notify_after<T>(&self, event: &HookEvent<'_>, result: &DbResult<T>) {
        if self.hooks.is_empty() {
            return;
        }
        let outcome = match result {
            Ok(_) => HookOutcome::Succeeded,
            Err(e) => HookOutcome::Failed(e.to_string()),
        };
        for hook in &self.hooks {
            hook.after(event, &outcome);
        }
    }
}

#[async_trait::async_trait]
impl DatabaseHandler for Database {
    fn kind(&self) -> HandlerKind {
        self.handler.kind()
    }

    fn is_connected(&self) -> bool {
        self.handler.is_connected()
    }

    fn get_query(&self) -> Option<&str> {
        self.handler.get_query()
    }

    fn last_error(&self) -> Option<&str> {
        self.handler.last_error()
    }

    async fn connect(&mut self, config: &ConnectionConfig) -> DbResult<()> {
        forward!(self, Operation::Connect, None, self.handler.connect(config))?;
        self.config = Some(config.clone());
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        forward!(self, Operation::Close, None, self.handler.close())
    }

    async fn query(&mut self, sql: &str, params: &[CellValue]) -> DbResult<Vec<Row>> {
        forward!(self, Operation::Query, Some(sql), self.handler.query(sql, params))
    }

    async fn insert(&mut self, sql: &str, params: &[CellValue]) -> DbResult<i64> {
        forward!(self, Operation::Insert, Some(sql), self.handler.insert(sql, params))
    }

    async fn execute(&mut self, sql: &str, params: &[CellValue]) -> DbResult<u64> {
        forward!(self, Operation::Execute, Some(sql), self.handler.execute(sql, params))
    }

    async fn modify(&mut self, sql: &str, params: &[CellValue]) -> DbResult<()> {
        forward!(self, Operation::Modify, Some(sql), self.handler.modify(sql, params))
    }

    async fn start_transaction(&mut self) -> DbResult<()> {
        forward!(self, Operation::StartTransaction, None, self.handler.start_transaction())
    }

    async fn commit_transaction(&mut self) -> DbResult<()> {
        forward!(self, Operation::CommitTransaction, None, self.handler.commit_transaction())
    }

    async fn rollback_transaction(&mut self) -> DbResult<()> {
        forward!(self, Operation::RollbackTransaction, None, self.handler.rollback_transaction())
    }

    async fn set_transaction_auto_commit(&mut self, enabled: bool) -> DbResult<()> {
        forward!(
            self,
            Operation::SetTransactionAutoCommit,
            None,
            self.handler.set_transaction_auto_commit(enabled)
        )
    }

    async fn table_exists(&mut self, table: &str) -> DbResult<bool> {
        forward!(self, Operation::TableExists, Some(table), self.handler.table_exists(table))
    }

    async fn truncate_table(&mut self, table: &str) -> DbResult<()> {
        forward!(self, Operation::TruncateTable, Some(table), self.handler.truncate_table(table))
    }

    async fn create_table(
        &mut self,
        name: &str,
        columns: &ColumnSpec,
        options: &TableOptions,
    ) -> DbResult<()> {
        forward!(
            self,
            Operation::CreateTable,
            Some(name),
            self.handler.create_table(name, columns, options)
        )
    }

    async fn drop_table(&mut self, table: &str) -> DbResult<()> {
        forward!(self, Operation::DropTable, Some(table), self.handler.drop_table(table))
    }

    async fn add_column(&mut self, table: &str, name: &str, column_type: &str) -> DbResult<()> {
        forward!(
            self,
            Operation::AddColumn,
            Some(table),
            self.handler.add_column(table, name, column_type)
        )
    }

    async fn drop_column(&mut self, table: &str, name: &str) -> DbResult<()> {
        forward!(self, Operation::DropColumn, Some(table), self.handler.drop_column(table, name))
    }

    async fn add_foreign_key(&mut self, table: &str, key: &ForeignKeySpec) -> DbResult<()> {
        forward!(
            self,
            Operation::AddForeignKey,
            Some(table),
            self.handler.add_foreign_key(table, key)
        )
    }

    async fn drop_foreign_key(&mut self, table: &str, key_name: &str) -> DbResult<()> {
        forward!(
            self,
            Operation::DropForeignKey,
            Some(table),
            self.handler.drop_foreign_key(table, key_name)
        )
    }

    async fn get_table_foreign_keys(&mut self, table: &str) -> DbResult<Vec<ForeignKeyInfo>> {
        forward!(
            self,
            Operation::GetTableForeignKeys,
            Some(table),
            self.handler.get_table_foreign_keys(table)
        )
    }

    async fn index_exists(&mut self, table: &str, columns: &[&str]) -> DbResult<bool> {
        forward!(
            self,
            Operation::IndexExists,
            Some(table),
            self.handler.index_exists(table, columns)
        )
    }

    async fn add_index(
        &mut self,
        table: &str,
        columns: &[&str],
        name: Option<&str>,
        index_type: IndexType,
    ) -> DbResult<()> {
        forward!(
            self,
            Operation::AddIndex,
            Some(table),
            self.handler.add_index(table, columns, name, index_type)
        )
    }

    async fn get_table_indexes(&mut self, table: &str) -> DbResult<Vec<IndexInfo>> {
        forward!(
            self,
            Operation::GetTableIndexes,
            Some(table),
            self.handler.get_table_indexes(table)
        )
    }

    async fn drop_index(&mut self, table: &str, name: &str) -> DbResult<()> {
        forward!(self, Operation::DropIndex, Some(table), self.handler.drop_index(table, name))
    }

    async fn lock_tables(&mut self, tables: &[&str]) -> DbResult<()> {
        forward!(self, Operation::LockTables, None, self.handler.lock_tables(tables))
    }

    async fn unlock_tables(&mut self) -> DbResult<()> {
        forward!(self, Operation::UnlockTables, None, self.handler.unlock_tables())
    }
}
