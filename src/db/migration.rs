// SQLite Schema Migration
// Emulates ALTER TABLE operations SQLite lacks (DROP COLUMN, ADD/DROP
// FOREIGN KEY) by renaming the table away, recreating it from its edited
// CREATE TABLE text, copying the rows back and dropping the renamed copy.
// All of it runs in one transaction.

use regex::Regex;
use std::sync::LazyLock;

use crate::db::drivers::sqlite::SqliteRunner;
use crate::db::sql;
use crate::db::traits::{CellValue, DatabaseError, DbResult, ForeignKeySpec, HandlerKind, Row};

const SQLITE: HandlerKind = HandlerKind::Sqlite;

/// One lexical unit of stored SQL. Whitespace and comments land in `skip`.
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?s)(?P<skip>\s+|--[^\n]*|/\*.*?\*/)"#,
        r#"|(?P<literal>'(?:[^']|'')*'|[xX]'[^']*')"#,
        r#"|"(?P<dquoted>(?:[^"]|"")*)""#,
        r#"|`(?P<bquoted>(?:[^`]|``)*)`"#,
        r#"|\[(?P<bracketed>[^\]]*)\]"#,
        r#"|(?P<word>[A-Za-z0-9_$\x{80}-\x{10FFFF}]+)"#,
        r#"|(?P<punct>.)"#,
    ))
    .expect("static regex must compile")
});

/// The schema change to apply
#[derive(Debug, Clone, Copy)]
pub(crate) enum Alteration<'a> {
    DropColumn(&'a str),
    AddForeignKey(&'a ForeignKeySpec),
    DropForeignKey(&'a str),
}

impl Alteration<'_> {
    /// Name the live table is renamed to while it is rebuilt
    fn temp_table(&self, table: &str) -> String {
        match self {
            Alteration::DropColumn(_) => format!("{}_old", table),
            Alteration::AddForeignKey(_) | Alteration::DropForeignKey(_) => {
                format!("{}_temp", table)
            }
        }
    }

    fn dropped_column(&self) -> Option<&str> {
        match self {
            Alteration::DropColumn(column) => Some(*column),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Alteration::DropColumn(column) => format!("drop column {}", column),
            Alteration::AddForeignKey(key) => format!("add foreign key {}", key.key_name),
            Alteration::DropForeignKey(name) => format!("drop foreign key {}", name),
        }
    }
}

// ============================================================================
// Stored SQL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Quoted,
    Literal,
    Punct,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    /// Identifier text with quoting removed, or the raw text otherwise
    text: String,
    start: usize,
    end: usize,
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.starts_with(c)
    }

    fn identifier(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Word | TokenKind::Quoted => Some(self.text.as_str()),
            TokenKind::Literal | TokenKind::Punct => None,
        }
    }

    fn names(&self, name: &str) -> bool {
        self.identifier().is_some_and(|ident| ident.eq_ignore_ascii_case(name))
    }
}

fn tokenize(sql: &str) -> Vec<Token> {
    TOKEN_RE
        .captures_iter(sql)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let (kind, text) = if caps.name("skip").is_some() {
                return None;
            } else if let Some(m) = caps.name("literal") {
                (TokenKind::Literal, m.as_str().to_string())
            } else if let Some(m) = caps.name("dquoted") {
                (TokenKind::Quoted, m.as_str().replace("\"\"", "\""))
            } else if let Some(m) = caps.name("bquoted") {
                (TokenKind::Quoted, m.as_str().replace("``", "`"))
            } else if let Some(m) = caps.name("bracketed") {
                (TokenKind::Quoted, m.as_str().to_string())
            } else if let Some(m) = caps.name("word") {
                (TokenKind::Word, m.as_str().to_string())
            } else {
                (TokenKind::Punct, whole.as_str().to_string())
            };
            Some(Token {
                kind,
                text,
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// Replace comments with a space, so definitions can be rejoined on one line
fn strip_comments(sql: &str) -> String {
    TOKEN_RE.captures_iter(sql).fold(String::with_capacity(sql.len()), |mut out, caps| {
        match (caps.get(0), caps.name("skip")) {
            (Some(_), Some(skip)) if !skip.as_str().trim().is_empty() => out.push(' '),
            (Some(whole), _) => out.push_str(whole.as_str()),
            (None, _) => {}
        }
        out
    })
}

/// Skip `table [(columns)]` after a REFERENCES keyword, returning the index
/// of the first token past it
fn skip_reference(tokens: &[Token], mut i: usize) -> usize {
    i += 1;
    if tokens.get(i).is_some_and(|t| t.is_punct('.')) {
        i += 2;
    }
    if tokens.get(i).is_some_and(|t| t.is_punct('(')) {
        let mut depth = 0;
        while let Some(token) = tokens.get(i) {
            if token.is_punct('(') {
                depth += 1;
            } else if token.is_punct(')') {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            i += 1;
        }
    }
    i
}

/// Whether `column` is used in `tokens` from `from` on. Referenced tables
/// and their columns, constraint names and collation names do not count.
fn mentions_column(tokens: &[Token], from: usize, column: &str) -> bool {
    let mut i = from;
    while let Some(token) = tokens.get(i) {
        if token.is_keyword("REFERENCES") {
            i = skip_reference(tokens, i + 1);
            continue;
        }
        if token.is_keyword("CONSTRAINT") || token.is_keyword("COLLATE") {
            i += 2;
            continue;
        }
        if token.names(column) {
            return true;
        }
        i += 1;
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstraintKind {
    PrimaryKey,
    Unique,
    Check,
    ForeignKey,
}

/// One top-level entry of a CREATE TABLE body: a column or a table constraint
#[derive(Debug, Clone)]
struct Definition {
    sql: String,
    tokens: Vec<Token>,
}

impl Definition {
    fn new(sql: &str) -> Self {
        let sql = sql.trim().to_string();
        let tokens = tokenize(&sql);
        Self { sql, tokens }
    }

    fn constraint_kind(&self) -> Option<ConstraintKind> {
        let first = self.tokens.first()?;
        let keyword = if first.is_keyword("CONSTRAINT") {
            self.tokens.get(2)?
        } else {
            first
        };
        [
            ("PRIMARY", ConstraintKind::PrimaryKey),
            ("UNIQUE", ConstraintKind::Unique),
            ("CHECK", ConstraintKind::Check),
            ("FOREIGN", ConstraintKind::ForeignKey),
        ]
        .into_iter()
        .find(|(word, _)| keyword.is_keyword(word))
        .map(|(_, kind)| kind)
    }

    fn constraint_name(&self) -> Option<&str> {
        if self.tokens.first()?.is_keyword("CONSTRAINT") {
            self.tokens.get(1)?.identifier()
        } else {
            None
        }
    }

    fn column_name(&self) -> Option<&str> {
        if self.constraint_kind().is_some() || self.constraint_name().is_some() {
            return None;
        }
        self.tokens.first()?.identifier()
    }

    fn has_keyword(&self, keyword: &str) -> bool {
        self.tokens.iter().any(|t| t.is_keyword(keyword))
    }

    /// Columns listed in the first parenthesised group: the key columns of a
    /// PRIMARY KEY, UNIQUE or FOREIGN KEY constraint
    fn key_columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        let mut depth = 0;
        for token in &self.tokens {
            if token.is_punct('(') {
                depth += 1;
            } else if token.is_punct(')') {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            } else if depth == 1 {
                columns.extend(token.identifier());
            }
        }
        columns
    }

    fn keys_on(&self, column: &str) -> bool {
        self.key_columns().iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Whether the definition uses `column`, not counting a column's own name
    fn mentions(&self, column: &str) -> bool {
        let from = if self.column_name().is_some() { 1 } else { 0 };
        mentions_column(&self.tokens, from, column)
    }
}

/// A stored CREATE TABLE statement split into its definitions. Editing works
/// on the original text, so collations, CHECK constraints, generated columns
/// and table options carry over untouched.
#[derive(Debug, Clone)]
struct TableSchema {
    definitions: Vec<Definition>,
    /// Text after the closing parenthesis, e.g. `WITHOUT ROWID`
    options: String,
}

impl TableSchema {
    fn parse(create_sql: &str) -> DbResult<Self> {
        let text = strip_comments(create_sql);
        let tokens = tokenize(&text);
        let open = tokens.iter().position(|t| t.is_punct('(')).ok_or_else(|| {
            DatabaseError::Migration("table definition has no column list".to_string())
        })?;

        let mut definitions = Vec::new();
        let mut depth = 0;
        let mut start = tokens[open].end;
        for token in &tokens[open..] {
            if token.is_punct('(') {
                depth += 1;
            } else if token.is_punct(')') {
                depth -= 1;
                if depth == 0 {
                    definitions.push(Definition::new(&text[start..token.start]));
                    return Ok(Self {
                        definitions,
                        options: text[token.end..].trim().to_string(),
                    });
                }
            } else if depth == 1 && token.is_punct(',') {
                definitions.push(Definition::new(&text[start..token.start]));
                start = token.end;
            }
        }

        Err(DatabaseError::Migration(
            "unbalanced parentheses in table definition".to_string(),
        ))
    }

    fn create_sql(&self, table: &str) -> String {
        let body: Vec<&str> = self.definitions.iter().map(|d| d.sql.as_str()).collect();
        let mut sql = format!(
            "CREATE TABLE {} ( {} )",
            sql::quote_identifier(SQLITE, table),
            body.join(", ")
        );
        if !self.options.is_empty() {
            sql.push(' ');
            sql.push_str(&self.options);
        }
        sql
    }

    fn columns(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().filter_map(Definition::column_name)
    }

    fn autoincrement(&self) -> bool {
        self.definitions.iter().any(|d| d.has_keyword("AUTOINCREMENT"))
    }

    fn apply(&mut self, alteration: Alteration<'_>) -> DbResult<()> {
        match alteration {
            Alteration::DropColumn(column) => self.drop_column(column),
            Alteration::AddForeignKey(key) => self.add_foreign_key(key),
            Alteration::DropForeignKey(name) => self.drop_foreign_key(name),
        }
    }

    fn drop_column(&mut self, column: &str) -> DbResult<()> {
        let position = self
            .definitions
            .iter()
            .position(|d| d.column_name().is_some_and(|n| n.eq_ignore_ascii_case(column)))
            .ok_or_else(|| DatabaseError::Migration(format!("no such column: {}", column)))?;

        if self.columns().count() == 1 {
            return Err(DatabaseError::Migration(format!(
                "cannot drop {}, it is the only column",
                column
            )));
        }
        let dropped = &self.definitions[position];
        if dropped.has_keyword("PRIMARY") {
            return Err(DatabaseError::Migration(format!(
                "column {} is part of the primary key",
                column
            )));
        }
        if dropped.has_keyword("REFERENCES") {
            return Err(DatabaseError::Migration(format!(
                "column {} is used by a foreign key",
                column
            )));
        }

        let mut removed = vec![position];
        for (index, definition) in self.definitions.iter().enumerate() {
            if index == position {
                continue;
            }
            let conflict = match definition.constraint_kind() {
                Some(ConstraintKind::PrimaryKey) if definition.keys_on(column) => {
                    Some("the primary key".to_string())
                }
                // A UNIQUE constraint over the dropped column goes with it
                Some(ConstraintKind::Unique) if definition.keys_on(column) => {
                    removed.push(index);
                    None
                }
                Some(ConstraintKind::ForeignKey) if definition.keys_on(column) => Some(format!(
                    "foreign key {}",
                    definition.constraint_name().unwrap_or("(unnamed)")
                )),
                Some(ConstraintKind::Check) if definition.mentions(column) => {
                    Some("a CHECK constraint".to_string())
                }
                None if definition.mentions(column) => Some(format!(
                    "column {}",
                    definition.column_name().unwrap_or_default()
                )),
                _ => None,
            };
            if let Some(user) = conflict {
                return Err(DatabaseError::Migration(format!(
                    "column {} is used by {}",
                    column, user
                )));
            }
        }

        let mut index = 0;
        self.definitions.retain(|_| {
            let keep = !removed.contains(&index);
            index += 1;
            keep
        });
        Ok(())
    }

    fn add_foreign_key(&mut self, key: &ForeignKeySpec) -> DbResult<()> {
        if !self.columns().any(|c| c.eq_ignore_ascii_case(&key.self_column)) {
            return Err(DatabaseError::Migration(format!(
                "no such column: {}",
                key.self_column
            )));
        }
        let taken = self
            .definitions
            .iter()
            .any(|d| d.constraint_name().is_some_and(|n| n.eq_ignore_ascii_case(&key.key_name)));
        if taken {
            return Err(DatabaseError::Migration(format!(
                "foreign key {} already exists",
                key.key_name
            )));
        }
        self.definitions
            .push(Definition::new(&sql::foreign_key_clause(SQLITE, key)?));
        Ok(())
    }

    fn drop_foreign_key(&mut self, name: &str) -> DbResult<()> {
        let position = self
            .definitions
            .iter()
            .position(|d| {
                d.constraint_kind() == Some(ConstraintKind::ForeignKey)
                    && d.constraint_name().is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| DatabaseError::Migration(format!("no foreign key named {}", name)))?;
        self.definitions.remove(position);
        Ok(())
    }
}

// ============================================================================
// Migrator
// ============================================================================

/// An index or trigger recreated after the rebuild
#[derive(Debug, Clone, PartialEq)]
struct SchemaObject {
    name: String,
    sql: String,
}

fn text(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Rebuilds SQLite tables through a runner bound to the handler's connection
pub(crate) struct SchemaMigrator<'r, 'c> {
    runner: &'r mut SqliteRunner<'c>,
}

impl<'r, 'c> SchemaMigrator<'r, 'c> {
    pub(crate) fn new(runner: &'r mut SqliteRunner<'c>) -> Self {
        Self { runner }
    }

    /// Apply `alteration` to `table`. On failure everything is rolled back
    /// and [`DatabaseError::Migration`] is returned.
    pub(crate) fn alter(&mut self, table: &str, alteration: Alteration<'_>) -> DbResult<()> {
        if table.contains('.') {
            return Err(DatabaseError::InvalidArgument(format!(
                "cannot rebuild schema-qualified table {}",
                table
            )));
        }
        let temp = alteration.temp_table(table);

        // Both pragmas are no-ops inside a transaction, so they wrap it.
        // With foreign keys off and legacy renames on, renaming the table
        // leaves references held by other tables pointing at the original name.
        let foreign_keys = self.runner.scalar("PRAGMA foreign_keys", &[])? != 0;
        let legacy_alter = self.runner.scalar("PRAGMA legacy_alter_table", &[])? != 0;
        self.runner.modify("PRAGMA foreign_keys = OFF", &[])?;
        self.runner.modify("PRAGMA legacy_alter_table = ON", &[])?;

        let result = match self.runner.modify("BEGIN", &[]) {
            Ok(()) => match self
                .rebuild(table, &temp, alteration)
                .and_then(|_| self.runner.modify("COMMIT", &[]))
            {
                Ok(()) => Ok(()),
                Err(e) => {
                    if let Err(rollback_err) = self.runner.modify("ROLLBACK", &[]) {
                        tracing::warn!(
                            error = %rollback_err,
                            "Rollback after failed migration failed"
                        );
                    }
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        let on_off = |enabled: bool| if enabled { "ON" } else { "OFF" };
        let restored = self
            .runner
            .modify(&format!("PRAGMA legacy_alter_table = {}", on_off(legacy_alter)), &[])
            .and_then(|_| {
                self.runner
                    .modify(&format!("PRAGMA foreign_keys = {}", on_off(foreign_keys)), &[])
            });

        match result {
            Ok(()) => {
                tracing::info!(table, change = %alteration.describe(), "Rebuilt SQLite table");
                restored
            }
            Err(e) => {
                tracing::warn!(
                    table,
                    change = %alteration.describe(),
                    error = %e,
                    "Table rebuild rolled back"
                );
                let message = match e {
                    DatabaseError::Migration(msg) | DatabaseError::Statement(msg) => msg,
                    other => other.to_string(),
                };
                Err(DatabaseError::Migration(message))
            }
        }
    }

    fn rebuild(&mut self, table: &str, temp: &str, alteration: Alteration<'_>) -> DbResult<()> {
        let create_sql = self
            .stored_sql("table", table)?
            .ok_or_else(|| DatabaseError::Migration(format!("no such table: {}", table)))?;
        let mut schema = TableSchema::parse(&create_sql)?;
        schema.apply(alteration)?;

        let dropped = alteration.dropped_column();
        let columns: Vec<String> = self
            .insertable_columns(table)?
            .into_iter()
            .filter(|c| dropped.map_or(true, |d| !c.eq_ignore_ascii_case(d)))
            .collect();
        let indexes = self.explicit_indexes(table, dropped)?;
        let triggers = self.schema_objects("trigger", table)?;
        if let Some(column) = dropped {
            let used_by = triggers
                .iter()
                .find(|trigger| mentions_column(&tokenize(&trigger.sql), 0, column));
            if let Some(trigger) = used_by {
                return Err(DatabaseError::Migration(format!(
                    "column {} is used by trigger {}",
                    column, trigger.name
                )));
            }
        }
        let sequence = self.sequence_value(table)?;

        for trigger in &triggers {
            let drop = format!("DROP TRIGGER {}", sql::quote_identifier(SQLITE, &trigger.name));
            self.runner.modify(&drop, &[])?;
        }

        self.runner.modify(
            &format!(
                "ALTER TABLE {} RENAME TO {}",
                sql::quote_identifier(SQLITE, table),
                sql::quote_identifier(SQLITE, temp)
            ),
            &[],
        )?;
        self.runner.modify(&schema.create_sql(table), &[])?;
        self.copy_rows(temp, table, &columns)?;
        self.runner
            .modify(&format!("DROP TABLE {}", sql::quote_identifier(SQLITE, temp)), &[])?;

        // Indexes went away with the renamed table, triggers were dropped above
        for object in indexes.iter().chain(&triggers) {
            self.runner.modify(&object.sql, &[])?;
        }

        if schema.autoincrement() {
            if let Some(seq) = sequence {
                self.runner.modify(
                    "DELETE FROM sqlite_sequence WHERE name = ?",
                    &[CellValue::from(table)],
                )?;
                self.runner.modify(
                    "INSERT INTO sqlite_sequence (name, seq) VALUES (?, ?)",
                    &[CellValue::from(table), CellValue::Int(seq)],
                )?;
            }
        }

        let check = format!("PRAGMA foreign_key_check({})", sql::quote_identifier(SQLITE, table));
        let violations = self.runner.query(&check, &[])?;
        if !violations.is_empty() {
            return Err(DatabaseError::Migration(format!(
                "{} row(s) of {} violate a foreign key constraint",
                violations.len(),
                table
            )));
        }

        Ok(())
    }

    /// Copy every row, one parameterised INSERT per row
    fn copy_rows(&mut self, from: &str, to: &str, columns: &[String]) -> DbResult<()> {
        if columns.is_empty() {
            return Err(DatabaseError::Migration(format!(
                "{} has no stored columns to copy",
                to
            )));
        }
        let names: Vec<String> = columns
            .iter()
            .map(|c| sql::quote_identifier(SQLITE, c))
            .collect();
        let select = format!(
            "SELECT {} FROM {}",
            names.join(", "),
            sql::quote_identifier(SQLITE, from)
        );
        let rows = self.runner.query(&select, &[])?;
        let insert = sql::insert_row(SQLITE, to, columns);

        for row in rows {
            let values: Vec<CellValue> = row.into_values().collect();
            self.runner.execute(&insert, &values)?;
        }
        Ok(())
    }

    fn stored_sql(&mut self, object_type: &str, name: &str) -> DbResult<Option<String>> {
        Ok(self
            .runner
            .query(
                "SELECT sql FROM sqlite_master WHERE type = ? AND name = ?",
                &[CellValue::from(object_type), CellValue::from(name)],
            )?
            .first()
            .and_then(|row| text(row, "sql")))
    }

    /// Stored columns in order. Generated and hidden columns cannot be
    /// inserted into, so they are left out.
    fn insertable_columns(&mut self, table: &str) -> DbResult<Vec<String>> {
        Ok(self
            .runner
            .query(
                "SELECT name FROM pragma_table_xinfo(?) WHERE hidden = 0 ORDER BY cid",
                &[CellValue::from(table)],
            )?
            .iter()
            .filter_map(|row| text(row, "name"))
            .collect())
    }

    /// Indexes or triggers created explicitly on `table`
    fn schema_objects(&mut self, object_type: &str, table: &str) -> DbResult<Vec<SchemaObject>> {
        Ok(self
            .runner
            .query(
                "SELECT name, sql FROM sqlite_master \
                 WHERE type = ? AND tbl_name = ? AND sql IS NOT NULL",
                &[CellValue::from(object_type), CellValue::from(table)],
            )?
            .iter()
            .filter_map(|row| {
                Some(SchemaObject {
                    name: text(row, "name")?,
                    sql: text(row, "sql")?,
                })
            })
            .collect())
    }

    /// Explicit indexes to recreate; those keyed on a dropped column stay gone
    fn explicit_indexes(
        &mut self,
        table: &str,
        dropped: Option<&str>,
    ) -> DbResult<Vec<SchemaObject>> {
        let indexes = self.schema_objects("index", table)?;
        let Some(column) = dropped else {
            return Ok(indexes);
        };

        let mut kept = Vec::with_capacity(indexes.len());
        for index in indexes {
            let columns = self.index_column_names(&index.name)?;
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                kept.push(index);
            }
        }
        Ok(kept)
    }

    fn index_column_names(&mut self, index: &str) -> DbResult<Vec<String>> {
        Ok(self
            .runner
            .query(
                "SELECT name FROM pragma_index_info(?) ORDER BY seqno",
                &[CellValue::from(index)],
            )?
            .iter()
            .filter_map(|row| text(row, "name"))
            .collect())
    }

    /// Current AUTOINCREMENT counter of `table`, if it has one
    fn sequence_value(&mut self, table: &str) -> DbResult<Option<i64>> {
        if self.stored_sql("table", "sqlite_sequence")?.is_none() {
            return Ok(None);
        }

        Ok(self
            .runner
            .query("SELECT seq FROM sqlite_sequence WHERE name = ?", &[CellValue::from(table)])?
            .first()
            .and_then(|row| row.get("seq"))
            .and_then(|v| v.as_i64()))
    }
}
