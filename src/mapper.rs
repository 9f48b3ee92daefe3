//! Table-to-record mapping.
//!
//! A record type declares its table and a static column table once; rows
//! are then mapped without any runtime introspection.
//!
//! ```ignore
//! #[derive(Default)]
//! struct Account {
//!     id: i64,
//!     owner: String,
//! }
//!
//! impl Entity for Account {
//!     const TABLE: &'static str = "accounts";
//!     const COLUMNS: &'static [ColumnMapping<Self>] = &[
//!         ColumnMapping::new("id", |a, v| {
//!             a.id = FromValue::from_value(v)?;
//!             Ok(())
//!         }),
//!         ColumnMapping::new("owner", |a, v| {
//!             a.owner = FromValue::from_value(v)?;
//!             Ok(())
//!         }),
//!     ];
//! }
//!
//! let accounts: Vec<Account> = find_all(&db).await?;
//! ```

use crate::db::connection::Driver;
use crate::db::cursor::Cursor;
use crate::db::executor::DbAccess;
use crate::error::{DbError, DbResult};
use crate::models::Value;

/// Assigns one column of a row to a field of `E`.
pub struct ColumnMapping<E> {
    pub column: &'static str,
    pub set: fn(&mut E, &Value) -> DbResult<()>,
}

impl<E> ColumnMapping<E> {
    pub const fn new(column: &'static str, set: fn(&mut E, &Value) -> DbResult<()>) -> Self {
        Self { column, set }
    }
}

impl<E> std::fmt::Debug for ColumnMapping<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnMapping")
            .field("column", &self.column)
            .finish_non_exhaustive()
    }
}

/// A record stored in one table.
pub trait Entity: Default + Sized + 'static {
    const TABLE: &'static str;
    const COLUMNS: &'static [ColumnMapping<Self>];

    fn columns() -> &'static [ColumnMapping<Self>] {
        Self::COLUMNS
    }
}

/// Build a record from the cursor's current row.
///
/// Column names match case-insensitively; a mapped column missing from the
/// row is an error.
pub fn map_row<E: Entity>(cursor: &Cursor) -> DbResult<E> {
    let mut entity = E::default();
    for mapping in E::columns() {
        let value = cursor.value(mapping.column).map_err(|e| match e {
            DbError::ColumnNotFound { .. } => DbError::mapping(format!(
                "Expected value for column {} of table {}",
                mapping.column,
                E::TABLE
            )),
            other => other,
        })?;
        (mapping.set)(&mut entity, value).map_err(|e| match e {
            DbError::Mapping { message } => {
                DbError::mapping(format!("{}.{}: {}", E::TABLE, mapping.column, message))
            }
            other => other,
        })?;
    }
    Ok(entity)
}

/// Map every row of a cursor.
pub fn map_rows<E: Entity>(cursor: &mut Cursor) -> DbResult<Vec<E>> {
    let mut records = Vec::new();
    while cursor.advance()? {
        records.push(map_row(cursor)?);
    }
    Ok(records)
}

/// Load every row of `E::TABLE`. The name is quoted, so it must match the
/// table's exact spelling.
pub async fn find_all<E: Entity, D: Driver>(db: &DbAccess<D>) -> DbResult<Vec<E>> {
    let table = db.pool()?.driver().quote_identifier(E::TABLE);
    let sql = format!("SELECT * FROM {}", table);
    db.execute_select(&sql, map_rows::<E>).await
}
