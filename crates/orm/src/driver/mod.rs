//! The storage driver seam.
//!
//! Everything above this module talks to storage through [StorageDriver] and reads results through [RowCursor].
//! [SqliteDriver] is the implementation backed by rusqlite.
mod sqlite;

pub use sqlite::*;

use crate::errors::{LookupError, Result};
use crate::sql::ContentValues;
use crate::value::StorageValue;

pub trait StorageDriver {
    /// Open the storage if it is not open yet.
    fn open(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn close(&mut self) -> Result<()>;

    fn begin_transaction(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Run statements which return no rows.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Insert a row, returning its rowid.
    fn insert(&mut self, table: &str, values: &ContentValues) -> Result<i64>;

    /// Update the rows matching `where_clause`, returning how many changed.
    fn update(&mut self, table: &str, values: &ContentValues, where_clause: &str) -> Result<usize>;

    fn delete(&mut self, table: &str, where_clause: &str) -> Result<usize>;

    fn query(
        &mut self,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&str>,
    ) -> Result<Box<dyn RowCursor>>;

    fn raw_query(&mut self, sql: &str) -> Result<Box<dyn RowCursor>>;

    /// The schema version recorded in the storage file.  0 for a new file.
    fn user_version(&mut self) -> Result<i64>;

    fn set_user_version(&mut self, version: i64) -> Result<()>;
}

/// A result set, walked one row at a time.
///
/// A fresh cursor is positioned before the first row.  The typed accessors read the current row and fail if the cursor
/// is not on a row or the column does not exist.
pub trait RowCursor {
    fn count(&self) -> usize;

    fn column_names(&self) -> &[String];

    fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names().iter().position(|c| c == name)
    }

    /// Move to the first row.  Returns false if there are no rows.
    fn move_to_first(&mut self) -> bool;

    /// Move to the next row.  Returns false once past the last.
    fn move_to_next(&mut self) -> bool;

    fn is_after_last(&self) -> bool;

    fn get_value(&self, column: usize) -> Result<&StorageValue>;

    fn is_null(&self, column: usize) -> Result<bool> {
        Ok(self.get_value(column)?.is_null())
    }

    fn get_integer(&self, column: usize) -> Result<Option<i64>> {
        Ok(match self.get_value(column)? {
            StorageValue::Integer(i) => Some(*i),
            StorageValue::Real(r) => Some(*r as i64),
            StorageValue::Text(t) => t.trim().parse().ok(),
            _ => None,
        })
    }

    fn get_real(&self, column: usize) -> Result<Option<f64>> {
        Ok(match self.get_value(column)? {
            StorageValue::Integer(i) => Some(*i as f64),
            StorageValue::Real(r) => Some(*r),
            StorageValue::Text(t) => t.trim().parse().ok(),
            _ => None,
        })
    }

    fn get_text(&self, column: usize) -> Result<Option<String>> {
        Ok(match self.get_value(column)? {
            StorageValue::Null => None,
            v => Some(v.to_text()),
        })
    }

    fn get_blob(&self, column: usize) -> Result<Option<Vec<u8>>> {
        Ok(match self.get_value(column)? {
            StorageValue::Blob(b) => Some(b.clone()),
            StorageValue::Text(t) => Some(t.as_bytes().to_vec()),
            _ => None,
        })
    }
}

/// A cursor over rows that were read in full up front.
///
/// Buffering keeps cursors free of any borrow of the connection, which is closed as soon as the outermost transaction
/// ends.
#[derive(Clone, Debug, Default)]
pub struct BufferedCursor {
    columns: Vec<String>,
    rows: Vec<Vec<StorageValue>>,
    /// `None` before the first row.
    position: Option<usize>,
}

impl BufferedCursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<StorageValue>>) -> BufferedCursor {
        BufferedCursor {
            columns,
            rows,
            position: None,
        }
    }

    pub fn rows(&self) -> &[Vec<StorageValue>] {
        &self.rows
    }

    /// The rows, each as column name to value pairs.
    pub fn into_maps(self) -> Vec<Vec<(String, StorageValue)>> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row.into_iter()).collect())
            .collect()
    }
}

impl RowCursor for BufferedCursor {
    fn count(&self) -> usize {
        self.rows.len()
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn move_to_first(&mut self) -> bool {
        self.position = Some(0);
        !self.rows.is_empty()
    }

    fn move_to_next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| (p + 1).min(self.rows.len()));
        self.position = Some(next);
        next < self.rows.len()
    }

    fn is_after_last(&self) -> bool {
        matches!(self.position, Some(p) if p >= self.rows.len())
    }

    fn get_value(&self, column: usize) -> Result<&StorageValue> {
        let row = self
            .position
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| LookupError::ColumnNotFound {
                column: format!("#{} (cursor is not on a row)", column),
            })?;
        row.get(column).ok_or_else(|| {
            LookupError::ColumnNotFound {
                column: format!("#{}", column),
            }
            .into()
        })
    }
}
