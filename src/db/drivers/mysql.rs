// MySQL Handler
// Implements DatabaseHandler for MySQL using mysql_async

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder};

use crate::db::config::ConnectionConfig;
use crate::db::sql;
use crate::db::statement::{cell_from_mysql, mysql_params, QueryLog};
use crate::db::traits::{
    CellValue, ColumnSpec, DatabaseError, DatabaseHandler, DbResult, ForeignKeyInfo,
    ForeignKeySpec, HandlerKind, IndexInfo, IndexType, Row, TableOptions,
};

const MYSQL: HandlerKind = HandlerKind::Mysql;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT CONSTRAINT_SCHEMA AS constraint_schema,
           CONSTRAINT_NAME AS constraint_name,
           TABLE_NAME AS table_name,
           COLUMN_NAME AS column_name,
           REFERENCED_TABLE_SCHEMA AS referenced_table_schema,
           REFERENCED_TABLE_NAME AS referenced_table_name,
           REFERENCED_COLUMN_NAME AS referenced_column_name
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE CONSTRAINT_SCHEMA = ? AND TABLE_NAME = ? AND REFERENCED_COLUMN_NAME IS NOT NULL
    ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
"#;

const INDEXES_QUERY: &str = r#"
    SELECT INDEX_NAME AS index_name,
           COLUMN_NAME AS column_name,
           NON_UNIQUE AS non_unique
    FROM information_schema.statistics
    WHERE table_schema = ? AND table_name = ?
    ORDER BY INDEX_NAME = 'PRIMARY' DESC, INDEX_NAME, SEQ_IN_INDEX
"#;

/// MySQL handler implementation
pub struct MysqlHandler {
    conn: Option<Conn>,
    database: String,
    log: QueryLog,
}

impl MysqlHandler {
    pub fn new() -> Self {
        Self {
            conn: None,
            database: String::new(),
            log: QueryLog::new(),
        }
    }

    /// Build connection options from config
    fn connection_opts(config: &ConnectionConfig) -> OptsBuilder {
        OptsBuilder::default()
            .ip_or_hostname(config.db_host.trim().to_string())
            .tcp_port(config.get_port())
            .user(Some(config.db_user.clone()))
            .pass(Some(config.db_pass.clone()))
            .db_name(Some(config.db_name.clone()))
    }

    /// Split an optionally qualified table name into (schema, table)
    fn schema_and_table(&self, table: &str) -> (String, String) {
        match table.split_once('.') {
            Some((schema, name)) => (schema.to_string(), name.to_string()),
            None => (self.database.clone(), table.to_string()),
        }
    }

    fn catalog_params(&self, table: &str) -> Vec<CellValue> {
        let (schema, name) = self.schema_and_table(table);
        vec![CellValue::from(schema), CellValue::from(name)]
    }

    async fn fetch_rows(
        conn: &mut Conn,
        sql: &str,
        params: &[CellValue],
    ) -> DbResult<Vec<Row>> {
        let rows: Vec<mysql_async::Row> = match protocol_for(true, params) {
            Protocol::Binary => conn.exec(sql, mysql_params(params)).await?,
            Protocol::Text => conn.query(sql).await?,
        };
        Ok(rows.into_iter().map(Self::record_from_row).collect())
    }

    async fn run(conn: &mut Conn, sql: &str, params: &[CellValue]) -> DbResult<()> {
        match protocol_for(false, params) {
            Protocol::Binary => conn.exec_drop(sql, mysql_params(params)).await?,
            Protocol::Text => conn.query_drop(sql).await?,
        }
        Ok(())
    }

    fn record_from_row(row: mysql_async::Row) -> Row {
        let columns = row.columns();
        columns
            .iter()
            .map(|column| column.name_str().into_owned())
            .zip(row.unwrap().into_iter().map(cell_from_mysql))
            .collect()
    }

    async fn run_query(&mut self, sql: &str, params: &[CellValue]) -> DbResult<Vec<Row>> {
        let conn = self.conn.as_mut().ok_or(DatabaseError::NotConnected)?;
        self.log.record(sql, params.len());
        let result = Self::fetch_rows(conn, sql, params).await;
        self.log.finish(result)
    }

    async fn run_statement(&mut self, sql: &str, params: &[CellValue]) -> DbResult<()> {
        let conn = self.conn.as_mut().ok_or(DatabaseError::NotConnected)?;
        self.log.record(sql, params.len());
        let result = Self::run(conn, sql, params).await;
        self.log.finish(result)
    }

    fn connection(&self) -> DbResult<&Conn> {
        self.conn.as_ref().ok_or(DatabaseError::NotConnected)
    }

    async fn count(&mut self, sql: &str, params: &[CellValue]) -> DbResult<i64> {
        let rows = self.run_query(sql, params).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }
}

impl Default for MysqlHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire protocol a statement is sent with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Text,
    Binary,
}

/// Row queries are always prepared: over the text protocol every cell comes
/// back as a string. Statements with neither rows nor parameters go as text,
/// since some (START TRANSACTION, LOCK TABLES) cannot be prepared.
fn protocol_for(returns_rows: bool, params: &[CellValue]) -> Protocol {
    if returns_rows || !params.is_empty() {
        Protocol::Binary
    } else {
        Protocol::Text
    }
}

/// Group catalog rows (index, column, non_unique) into one entry per index
fn group_indexes(rows: &[Row]) -> Vec<IndexInfo> {
    let mut indexes: Vec<IndexInfo> = Vec::new();
    for row in rows {
        let Some(name) = row.get("index_name").and_then(|v| v.as_str()) else {
            continue;
        };
        let column = row
            .get("column_name")
            .and_then(|v| v.as_str())
            .map(String::from);
        let unique = row.get("non_unique").and_then(|v| v.as_i64()).unwrap_or(1) == 0;

        match indexes.iter_mut().find(|index| index.name == name) {
            Some(index) => index.columns.extend(column),
            None => indexes.push(IndexInfo {
                name: name.to_string(),
                columns: column.into_iter().collect(),
                unique,
            }),
        }
    }
    indexes
}

fn foreign_key_from_row(row: &Row) -> ForeignKeyInfo {
    let field = |key: &str| {
        row.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    ForeignKeyInfo {
        database: field("constraint_schema"),
        key_name: field("constraint_name"),
        table: field("table_name"),
        column: field("column_name"),
        referenced_database: field("referenced_table_schema"),
        referenced_table: field("referenced_table_name"),
        referenced_column: field("referenced_column_name"),
    }
}

fn add_foreign_key_sql(table: &str, key: &ForeignKeySpec) -> DbResult<String> {
    sql::validate_table_name(table)?;
    Ok(format!(
        "ALTER TABLE {} ADD {}",
        sql::quote_table(MYSQL, table),
        sql::foreign_key_clause(MYSQL, key)?
    ))
}

fn add_index_sql(
    table: &str,
    columns: &[&str],
    name: Option<&str>,
    index_type: IndexType,
) -> DbResult<String> {
    sql::validate_table_name(table)?;
    let table = sql::quote_table(MYSQL, table);
    let cols = sql::index_columns(MYSQL, columns)?;
    let name = sql::quote_identifier(MYSQL, &sql::resolve_index_name(columns, name)?);

    Ok(match index_type {
        // MySQL always names the primary key PRIMARY
        IndexType::PrimaryKey => format!("ALTER TABLE {} ADD PRIMARY KEY ( {} )", table, cols),
        other => format!("ALTER TABLE {} ADD {} {} ( {} )", table, other.as_sql(), name, cols),
    })
}

fn drop_index_sql(table: &str, name: &str) -> DbResult<String> {
    sql::validate_table_name(table)?;
    sql::validate_identifier(name)?;
    let table = sql::quote_table(MYSQL, table);
    Ok(if name.eq_ignore_ascii_case("PRIMARY") {
        format!("ALTER TABLE {} DROP PRIMARY KEY", table)
    } else {
        format!("ALTER TABLE {} DROP INDEX {}", table, sql::quote_identifier(MYSQL, name))
    })
}

fn lock_tables_sql(tables: &[&str]) -> DbResult<String> {
    if tables.is_empty() {
        return Err(DatabaseError::InvalidArgument("no tables to lock".to_string()));
    }
    let mut clauses = Vec::with_capacity(tables.len());
    for table in tables {
        sql::validate_table_name(table)?;
        clauses.push(format!("{} WRITE", sql::quote_table(MYSQL, table)));
    }
    Ok(format!("LOCK TABLES {}", clauses.join(", ")))
}

#[async_trait::async_trait]
impl DatabaseHandler for MysqlHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Mysql
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
        config.validate()?;

        let conn = Conn::new(Self::connection_opts(config))
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        tracing::info!(
            host = %config.db_host,
            database = %config.db_name,
            "Connected to MySQL"
        );
        self.conn = Some(conn);
        self.database = config.db_name.clone();
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.disconnect().await {
                tracing::warn!(error = %e, "Error while disconnecting from MySQL");
            }
            tracing::info!(database = %self.database, "Closed MySQL connection");
        }
        Ok(())
    }

    async fn query(&mut self, sql: &str, params: &[CellValue]) -> DbResult<Vec<Row>> {
        self.run_query(sql, params).await
    }

    async fn insert(&mut self, sql: &str, params: &[CellValue]) -> DbResult<i64> {
        self.run_statement(sql, params).await?;
        let id = self.connection()?.last_insert_id().unwrap_or(0);
        i64::try_from(id)
            .map_err(|_| DatabaseError::Statement(format!("insert id {} out of range", id)))
    }

    async fn execute(&mut self, sql: &str, params: &[CellValue]) -> DbResult<u64> {
        self.run_statement(sql, params).await?;
        Ok(self.connection()?.affected_rows())
    }

    async fn modify(&mut self, sql: &str, params: &[CellValue]) -> DbResult<()> {
        self.run_statement(sql, params).await
    }

    async fn start_transaction(&mut self) -> DbResult<()> {
        self.run_statement("START TRANSACTION", &[]).await
    }

    async fn commit_transaction(&mut self) -> DbResult<()> {
        self.run_statement("COMMIT", &[]).await
    }

    async fn rollback_transaction(&mut self) -> DbResult<()> {
        self.run_statement("ROLLBACK", &[]).await
    }

    async fn set_transaction_auto_commit(&mut self, enabled: bool) -> DbResult<()> {
        if enabled {
            return Ok(());
        }
        self.run_statement("SET autocommit = 0", &[]).await
    }

    async fn table_exists(&mut self, table: &str) -> DbResult<bool> {
        sql::validate_table_name(table)?;
        let params = self.catalog_params(table);
        let count = self
            .count(
                "SELECT COUNT(*) AS count FROM information_schema.tables \
                 WHERE table_schema = ? AND table_name = ?",
                &params,
            )
            .await?;
        Ok(count > 0)
    }

    async fn truncate_table(&mut self, table: &str) -> DbResult<()> {
        sql::validate_table_name(table)?;
        let statement = format!("TRUNCATE TABLE {}", sql::quote_table(MYSQL, table));
        self.run_statement(&statement, &[]).await
    }

    async fn create_table(
        &mut self,
        name: &str,
        columns: &ColumnSpec,
        options: &TableOptions,
    ) -> DbResult<()> {
        let statement = sql::create_table(MYSQL, name, columns, Some(options))?;
        self.run_statement(&statement, &[]).await
    }

    async fn drop_table(&mut self, table: &str) -> DbResult<()> {
        let statement = sql::drop_table(MYSQL, table)?;
        self.run_statement(&statement, &[]).await
    }

    async fn add_column(&mut self, table: &str, name: &str, column_type: &str) -> DbResult<()> {
        let statement = sql::add_column(MYSQL, table, name, column_type)?;
        self.run_statement(&statement, &[]).await
    }

    async fn drop_column(&mut self, table: &str, name: &str) -> DbResult<()> {
        sql::validate_table_name(table)?;
        sql::validate_identifier(name)?;
        let statement = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            sql::quote_table(MYSQL, table),
            sql::quote_identifier(MYSQL, name)
        );
        self.run_statement(&statement, &[]).await
    }

    async fn add_foreign_key(&mut self, table: &str, key: &ForeignKeySpec) -> DbResult<()> {
        let statement = add_foreign_key_sql(table, key)?;
        self.run_statement(&statement, &[]).await
    }

    async fn drop_foreign_key(&mut self, table: &str, key_name: &str) -> DbResult<()> {
        sql::validate_table_name(table)?;
        sql::validate_identifier(key_name)?;
        let statement = format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            sql::quote_table(MYSQL, table),
            sql::quote_identifier(MYSQL, key_name)
        );
        self.run_statement(&statement, &[]).await
    }

    async fn get_table_foreign_keys(&mut self, table: &str) -> DbResult<Vec<ForeignKeyInfo>> {
        sql::validate_table_name(table)?;
        let params = self.catalog_params(table);
        let rows = self.run_query(FOREIGN_KEYS_QUERY, &params).await?;
        Ok(rows.iter().map(foreign_key_from_row).collect())
    }

    async fn index_exists(&mut self, table: &str, columns: &[&str]) -> DbResult<bool> {
        sql::validate_table_name(table)?;
        sql::index_columns(MYSQL, columns)?;
        let mut params = self.catalog_params(table);
        params.push(CellValue::from(sql::derive_index_name(columns)));

        let count = self
            .count(
                "SELECT COUNT(*) AS count FROM information_schema.statistics \
                 WHERE table_schema = ? AND table_name = ? AND index_name = ?",
                &params,
            )
            .await?;
        Ok(count > 0)
    }

    async fn add_index(
        &mut self,
        table: &str,
        columns: &[&str],
        name: Option<&str>,
        index_type: IndexType,
    ) -> DbResult<()> {
        let statement = add_index_sql(table, columns, name, index_type)?;
        self.run_statement(&statement, &[]).await
    }

    async fn get_table_indexes(&mut self, table: &str) -> DbResult<Vec<IndexInfo>> {
        sql::validate_table_name(table)?;
        let params = self.catalog_params(table);
        let rows = self.run_query(INDEXES_QUERY, &params).await?;
        Ok(group_indexes(&rows))
    }

    async fn drop_index(&mut self, table: &str, name: &str) -> DbResult<()> {
        let statement = drop_index_sql(table, name)?;
        self.run_statement(&statement, &[]).await
    }

    async fn lock_tables(&mut self, tables: &[&str]) -> DbResult<()> {
        let statement = lock_tables_sql(tables)?;
        self.run_statement(&statement, &[]).await
    }

    async fn unlock_tables(&mut self) -> DbResult<()> {
        self.run_statement("UNLOCK TABLES", &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_row(name: &str, column: &str, non_unique: i64) -> Row {
        let mut row = Row::new();
        row.insert("index_name".to_string(), CellValue::from(name));
        row.insert("column_name".to_string(), CellValue::from(column));
        row.insert("non_unique".to_string(), CellValue::Int(non_unique));
        row
    }

    #[test]
    fn test_handler_kind() {
        let handler = MysqlHandler::new();
        assert_eq!(handler.kind(), HandlerKind::Mysql);
        assert!(!handler.is_connected());
        assert!(handler.get_query().is_none());
    }

    #[test]
    fn test_schema_and_table() {
        let mut handler = MysqlHandler::new();
        handler.database = "app".to_string();
        let owned = |a: &str, b: &str| (a.to_string(), b.to_string());
        assert_eq!(handler.schema_and_table("users"), owned("app", "users"));
        assert_eq!(handler.schema_and_table("other.users"), owned("other", "users"));
    }

    #[test]
    fn test_add_index_sql() {
        assert_eq!(
            add_index_sql("t", &["a", "b"], None, IndexType::Index).unwrap(),
            "ALTER TABLE `t` ADD INDEX `index_a_b` ( `a`, `b` )"
        );
        assert_eq!(
            add_index_sql("t", &["email"], Some("uq_email"), IndexType::Unique).unwrap(),
            "ALTER TABLE `t` ADD UNIQUE `uq_email` ( `email` )"
        );
        assert_eq!(
            add_index_sql("t", &["id"], None, IndexType::PrimaryKey).unwrap(),
            "ALTER TABLE `t` ADD PRIMARY KEY ( `id` )"
        );
        assert!(matches!(
            add_index_sql("t", &[], None, IndexType::Index),
            Err(DatabaseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_drop_index_sql() {
        assert_eq!(
            drop_index_sql("t", "index_a").unwrap(),
            "ALTER TABLE `t` DROP INDEX `index_a`"
        );
        assert_eq!(drop_index_sql("t", "PRIMARY").unwrap(), "ALTER TABLE `t` DROP PRIMARY KEY");
        assert_eq!(
            drop_index_sql("shop.order", "index").unwrap(),
            "ALTER TABLE `shop`.`order` DROP INDEX `index`"
        );
    }

    #[test]
    fn test_add_foreign_key_sql() {
        let key = ForeignKeySpec::new("fk_orders_customer", "customer_id", "customers", "id")
            .on_delete("CASCADE");
        assert_eq!(
            add_foreign_key_sql("orders", &key).unwrap(),
            "ALTER TABLE `orders` ADD CONSTRAINT `fk_orders_customer` \
             FOREIGN KEY (`customer_id`) REFERENCES `customers` (`id`) ON DELETE CASCADE"
        );
    }

    #[test]
    fn test_lock_tables_sql() {
        assert_eq!(lock_tables_sql(&["users"]).unwrap(), "LOCK TABLES `users` WRITE");
        assert_eq!(
            lock_tables_sql(&["users", "order"]).unwrap(),
            "LOCK TABLES `users` WRITE, `order` WRITE"
        );
        assert!(matches!(lock_tables_sql(&[]), Err(DatabaseError::InvalidArgument(_))));
    }

    #[test]
    fn test_row_queries_are_always_prepared() {
        assert_eq!(protocol_for(true, &[]), Protocol::Binary);
        assert_eq!(protocol_for(true, &[CellValue::Int(1)]), Protocol::Binary);
        assert_eq!(protocol_for(false, &[CellValue::Int(1)]), Protocol::Binary);
        assert_eq!(protocol_for(false, &[]), Protocol::Text);
    }

    #[test]
    fn test_group_indexes() {
        let rows = vec![
            catalog_row("PRIMARY", "id", 0),
            catalog_row("index_a_b", "a", 1),
            catalog_row("index_a_b", "b", 1),
        ];
        let indexes = group_indexes(&rows);
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "PRIMARY");
        assert!(indexes[0].unique);
        assert_eq!(indexes[1].columns, vec!["a".to_string(), "b".to_string()]);
        assert!(!indexes[1].unique);
    }

    #[test]
    fn test_foreign_key_from_row() {
        let mut row = Row::new();
        for (key, value) in [
            ("constraint_schema", "app"),
            ("constraint_name", "fk_orders_customer"),
            ("table_name", "orders"),
            ("column_name", "customer_id"),
            ("referenced_table_schema", "app"),
            ("referenced_table_name", "customers"),
            ("referenced_column_name", "id"),
        ] {
            row.insert(key.to_string(), CellValue::from(value));
        }
        let key = foreign_key_from_row(&row);
        assert_eq!(key.key_name, "fk_orders_customer");
        assert_eq!(key.referenced_table, "customers");
        assert_eq!(key.column, "customer_id");
    }

    #[tokio::test]
    async fn test_not_connected() {
        let mut handler = MysqlHandler::new();
        assert!(matches!(handler.unlock_tables().await, Err(DatabaseError::NotConnected)));
        assert!(handler.close().await.is_ok());
    }
}
