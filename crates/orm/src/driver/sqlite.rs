//! The rusqlite storage driver.
use std::path::{Path, PathBuf};

use log::*;
use rusqlite::ToSql;

use crate::driver::{BufferedCursor, RowCursor, StorageDriver};
use crate::errors::Result;
use crate::sql::ContentValues;
use crate::value::StorageValue;

/// SQL that we run as part of opening a connection.
///
/// - Enables the busy timeout, since another process may hold the file.
/// - Enables foreign key enforcement.
/// - Sets up WAL.
const INITIAL_SQL: &str = r#"
PRAGMA busy_timeout = 1000;
PRAGMA foreign_keys = 1;
PRAGMA journal_mode = WAL;
"#;

const INSERT_TEMPLATE: &str = r#"
{%- if columns | length == 0 -%}
INSERT INTO {{ table }} DEFAULT VALUES
{%- else -%}
INSERT INTO {{ table }}({{ columns | join(sep=", ") }}) VALUES (
    {%- for c in columns -%}
    :{{ c }}{% if not loop.last %}, {% endif -%}
    {%- endfor -%}
)
{%- endif -%}
"#;

const UPDATE_TEMPLATE: &str = r#"
UPDATE {{ table }} SET
{%- for c in columns %} {{ c }} = :{{ c }}{% if not loop.last %},{% endif %}{% endfor %}
{%- if where_clause %} WHERE {{ where_clause }}{% endif -%}
"#;

const DELETE_TEMPLATE: &str = r#"
DELETE FROM {{ table }}
{%- if where_clause %} WHERE {{ where_clause }}{% endif -%}
"#;

const SELECT_TEMPLATE: &str = r#"
SELECT {% if columns | length == 0 %}*{% else %}{{ columns | join(sep=", ") }}{% endif %} FROM {{ table }}
{%- if where_clause %} WHERE {{ where_clause }}{% endif %}
{%- if order_by %} ORDER BY {{ order_by }}{% endif -%}
"#;

fn render(
    template: &str,
    table: &str,
    columns: &[&str],
    where_clause: Option<&str>,
    order_by: Option<&str>,
) -> Result<String> {
    let mut context = tera::Context::new();
    context.insert("table", table);
    context.insert("columns", columns);
    context.insert("where_clause", &where_clause.filter(|w| !w.trim().is_empty()));
    context.insert("order_by", &order_by.filter(|o| !o.trim().is_empty()));
    let stmt = tera::Tera::one_off(template, &context, false)?;
    Ok(stmt.trim().to_string())
}

/// Named parameters for a statement rendered with `:column` placeholders.
fn named_params(values: &ContentValues) -> Vec<(String, &StorageValue)> {
    values.iter().map(|(c, v)| (format!(":{}", c), v)).collect()
}

/// Runs a statement and reads every row it returns.
fn read_all(conn: &rusqlite::Connection, sql: &str) -> Result<BufferedCursor> {
    let mut statement = conn.prepare_cached(sql)?;
    let columns = statement
        .column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>();

    let mut rows = statement.query([])?;
    let mut out = vec![];
    while let Some(r) = rows.next()? {
        let mut row = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value: rusqlite::types::Value = r.get(i)?;
            row.push(StorageValue::from(value));
        }
        out.push(row);
    }

    Ok(BufferedCursor::new(columns, out))
}

/// A driver over one sqlite file.
///
/// The connection is opened on demand and dropped by [StorageDriver::close].
pub struct SqliteDriver {
    path: PathBuf,
    conn: Option<rusqlite::Connection>,
}

impl SqliteDriver {
    pub fn new(path: impl AsRef<Path>) -> SqliteDriver {
        SqliteDriver {
            path: path.as_ref().to_path_buf(),
            conn: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&mut self) -> Result<&rusqlite::Connection> {
        let conn = match self.conn.take() {
            Some(c) => c,
            None => {
                debug!("Opening database at {}", self.path.display());
                let conn = rusqlite::Connection::open(&self.path)?;
                conn.execute_batch(INITIAL_SQL)?;
                conn
            }
        };
        Ok(self.conn.insert(conn))
    }
}

impl StorageDriver for SqliteDriver {
    fn open(&mut self) -> Result<()> {
        self.connection()?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            debug!("Closing database at {}", self.path.display());
            conn.close().map_err(|(_, e)| e)?;
        }
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.connection()?.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.connection()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.connection()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        debug!("Executing: {}", sql);
        self.connection()?.execute_batch(sql)?;
        Ok(())
    }

    fn insert(&mut self, table: &str, values: &ContentValues) -> Result<i64> {
        let columns = values.columns().collect::<Vec<_>>();
        let stmt = render(INSERT_TEMPLATE, table, &columns, None, None)?;
        debug!("Insert statement for {}: {}", table, stmt);

        let names = named_params(values);
        let params = names
            .iter()
            .map(|(n, v)| (n.as_str(), *v as &dyn ToSql))
            .collect::<Vec<_>>();

        let conn = self.connection()?;
        conn.prepare_cached(&stmt)?.execute(params.as_slice())?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&mut self, table: &str, values: &ContentValues, where_clause: &str) -> Result<usize> {
        if values.is_empty() {
            return Ok(0);
        }

        let columns = values.columns().collect::<Vec<_>>();
        let stmt = render(UPDATE_TEMPLATE, table, &columns, Some(where_clause), None)?;
        debug!("Update statement for {}: {}", table, stmt);

        let names = named_params(values);
        let params = names
            .iter()
            .map(|(n, v)| (n.as_str(), *v as &dyn ToSql))
            .collect::<Vec<_>>();

        let conn = self.connection()?;
        let changed = conn.prepare_cached(&stmt)?.execute(params.as_slice())?;
        Ok(changed)
    }

    fn delete(&mut self, table: &str, where_clause: &str) -> Result<usize> {
        let stmt = render(DELETE_TEMPLATE, table, &[], Some(where_clause), None)?;
        debug!("Delete statement for {}: {}", table, stmt);
        let changed = self.connection()?.execute(&stmt, [])?;
        Ok(changed)
    }

    fn query(
        &mut self,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&str>,
    ) -> Result<Box<dyn RowCursor>> {
        let stmt = render(SELECT_TEMPLATE, table, columns, where_clause, order_by)?;
        debug!("Query for {}: {}", table, stmt);
        Ok(Box::new(read_all(self.connection()?, &stmt)?))
    }

    fn raw_query(&mut self, sql: &str) -> Result<Box<dyn RowCursor>> {
        debug!("Raw query: {}", sql);
        Ok(Box::new(read_all(self.connection()?, sql)?))
    }

    fn user_version(&mut self) -> Result<i64> {
        let version = self
            .connection()?
            .query_row("PRAGMA user_version", [], |r| r.get(0))?;
        Ok(version)
    }

    fn set_user_version(&mut self, version: i64) -> Result<()> {
        self.connection()?
            .execute_batch(&format!("PRAGMA user_version = {}", version))?;
        Ok(())
    }
}
