// Database Hooks
// Observers notified around every operation the Database facade forwards

use std::fmt;

/// Handler operation being forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Close,
    Query,
    Insert,
    Execute,
    Modify,
    StartTransaction,
    CommitTransaction,
    RollbackTransaction,
    SetTransactionAutoCommit,
    TableExists,
    TruncateTable,
    CreateTable,
    DropTable,
    AddColumn,
    DropColumn,
    AddForeignKey,
    DropForeignKey,
    GetTableForeignKeys,
    IndexExists,
    AddIndex,
    GetTableIndexes,
    DropIndex,
    LockTables,
    UnlockTables,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Close => "close",
            Operation::Query => "query",
            Operation::Insert => "insert",
            Operation::Execute => "execute",
            Operation::Modify => "modify",
            Operation::StartTransaction => "start_transaction",
            Operation::CommitTransaction => "commit_transaction",
            Operation::RollbackTransaction => "rollback_transaction",
            Operation::SetTransactionAutoCommit => "set_transaction_auto_commit",
            Operation::TableExists => "table_exists",
            Operation::TruncateTable => "truncate_table",
            Operation::CreateTable => "create_table",
            Operation::DropTable => "drop_table",
            Operation::AddColumn => "add_column",
            Operation::DropColumn => "drop_column",
            Operation::AddForeignKey => "add_foreign_key",
            Operation::DropForeignKey => "drop_foreign_key",
            Operation::GetTableForeignKeys => "get_table_foreign_keys",
            Operation::IndexExists => "index_exists",
            Operation::AddIndex => "add_index",
            Operation::GetTableIndexes => "get_table_indexes",
            Operation::DropIndex => "drop_index",
            Operation::LockTables => "lock_tables",
            Operation::UnlockTables => "unlock_tables",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What is about to run: the operation and its table name or SQL text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookEvent<'a> {
    pub operation: Operation,
    pub target: Option<&'a str>,
}

impl<'a> HookEvent<'a> {
    pub fn new(operation: Operation, target: Option<&'a str>) -> Self {
        Self { operation, target }
    }
}

/// How a forwarded operation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Succeeded,
    Failed(String),
}

impl HookOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HookOutcome::Succeeded)
    }
}

/// Observer of facade operations. Hooks cannot alter arguments or results.
pub trait DatabaseHook: Send + Sync {
    fn before(&self, _event: &HookEvent<'_>) {}

    fn after(&self, _event: &HookEvent<'_>, _outcome: &HookOutcome) {}
}
