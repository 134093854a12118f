// SQL Statement Synthesis
// Builds the DDL statements shared by the engine handlers. Identifiers are
// validated and quoted for the engine before they are spliced in; values
// always travel as parameters.

use crate::db::traits::{
    ColumnSpec, DatabaseError, DbResult, ForeignKeySpec, HandlerKind, TableOptions,
};

/// Check a column, index or key name: `[A-Za-z_][A-Za-z0-9_$]*`
pub fn validate_identifier(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidArgument(format!("invalid identifier '{}'", name)))
    }
}

/// Check a table name, which may be qualified as `schema.table`
pub fn validate_table_name(name: &str) -> DbResult<()> {
    let mut parts = name.splitn(2, '.');
    let first = parts.next().unwrap_or_default();
    match parts.next() {
        Some(second) => {
            validate_identifier(first)?;
            validate_identifier(second)
        }
        None => validate_identifier(first),
    }
    .map_err(|_| DatabaseError::InvalidArgument(format!("invalid table name '{}'", name)))
}

/// Quote one identifier for the engine: backticks on MySQL, double quotes
/// elsewhere. Embedded quote characters are doubled.
pub fn quote_identifier(kind: HandlerKind, name: &str) -> String {
    let quote = match kind {
        HandlerKind::Mysql => '`',
        HandlerKind::Sqlite | HandlerKind::Mssql => '"',
    };
    let escaped = name.replace(quote, &format!("{}{}", quote, quote));
    format!("{}{}{}", quote, escaped, quote)
}

/// Quote a table name, keeping an optional `schema.` qualifier apart
pub fn quote_table(kind: HandlerKind, name: &str) -> String {
    match name.split_once('.') {
        Some((schema, table)) => format!(
            "{}.{}",
            quote_identifier(kind, schema),
            quote_identifier(kind, table)
        ),
        None => quote_identifier(kind, name),
    }
}

/// Default index name for a column list: `index_` + columns joined by `_`
pub fn derive_index_name(columns: &[&str]) -> String {
    format!("index_{}", columns.join("_"))
}

/// Validate an index column list and join it, quoted, for a column clause
pub fn index_columns(kind: HandlerKind, columns: &[&str]) -> DbResult<String> {
    if columns.is_empty() {
        return Err(DatabaseError::InvalidArgument(
            "columns must be a non-empty list".to_string(),
        ));
    }
    let mut quoted = Vec::with_capacity(columns.len());
    for column in columns {
        validate_identifier(column)?;
        quoted.push(quote_identifier(kind, column));
    }
    Ok(quoted.join(", "))
}

/// Resolve the explicit or derived index name
pub fn resolve_index_name(columns: &[&str], name: Option<&str>) -> DbResult<String> {
    match name.filter(|n| !n.is_empty()) {
        Some(name) => {
            validate_identifier(name)?;
            Ok(name.to_string())
        }
        None => Ok(derive_index_name(columns)),
    }
}

/// `name type, name type, ...`
pub fn column_definitions(kind: HandlerKind, columns: &ColumnSpec) -> DbResult<String> {
    if columns.is_empty() {
        return Err(DatabaseError::InvalidArgument(
            "a table needs at least one column".to_string(),
        ));
    }

    let mut defs = Vec::with_capacity(columns.len());
    for (name, column_type) in columns {
        validate_identifier(name)?;
        defs.push(format!("{} {}", quote_identifier(kind, name), column_type.trim()));
    }
    Ok(defs.join(", "))
}

/// `CREATE TABLE IF NOT EXISTS`; table options are appended when given
pub fn create_table(
    kind: HandlerKind,
    name: &str,
    columns: &ColumnSpec,
    options: Option<&TableOptions>,
) -> DbResult<String> {
    validate_table_name(name)?;
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ( {} )",
        quote_table(kind, name),
        column_definitions(kind, columns)?
    );

    if let Some(options) = options {
        sql.push_str(&format!(
            " ENGINE={} DEFAULT CHARSET {} COLLATE {}",
            options.engine, options.char_set, options.collation
        ));
    }

    Ok(sql)
}

pub fn drop_table(kind: HandlerKind, table: &str) -> DbResult<String> {
    validate_table_name(table)?;
    Ok(format!("DROP TABLE IF EXISTS {}", quote_table(kind, table)))
}

pub fn add_column(
    kind: HandlerKind,
    table: &str,
    name: &str,
    column_type: &str,
) -> DbResult<String> {
    validate_table_name(table)?;
    validate_identifier(name)?;
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_table(kind, table),
        quote_identifier(kind, name),
        column_type.trim()
    ))
}

/// `CONSTRAINT k FOREIGN KEY (c) REFERENCES t (rc) [ON DELETE ..] [ON UPDATE ..]`
pub fn foreign_key_clause(kind: HandlerKind, key: &ForeignKeySpec) -> DbResult<String> {
    validate_identifier(&key.key_name)?;
    validate_identifier(&key.self_column)?;
    validate_table_name(&key.ref_table)?;
    validate_identifier(&key.ref_column)?;

    let mut clause = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_identifier(kind, &key.key_name),
        quote_identifier(kind, &key.self_column),
        quote_table(kind, &key.ref_table),
        quote_identifier(kind, &key.ref_column)
    );
    if let Some(action) = key.on_delete.as_deref().filter(|a| !a.trim().is_empty()) {
        clause.push_str(&format!(" ON DELETE {}", action.trim()));
    }
    if let Some(action) = key.on_update.as_deref().filter(|a| !a.trim().is_empty()) {
        clause.push_str(&format!(" ON UPDATE {}", action.trim()));
    }
    Ok(clause)
}

/// `INSERT INTO "t" ("a", "b") VALUES (?, ?)`
pub fn insert_row(kind: HandlerKind, table: &str, columns: &[String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_identifier(kind, c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(kind, table),
        names.join(", "),
        placeholders
    )
}
