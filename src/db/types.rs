//! Column decoding for sqlx rows.
//!
//! Each column is first classified by its declared type name
//! ([`categorize_type`]), then decoded into a [`Value`] by trying the Rust
//! types sqlx accepts for that category. A value that matches none of them
//! falls back to text, integer, float and finally raw bytes.
//!
//! Decimals, dates, UUIDs and JSON documents are kept as text so no precision or
//! zone information is lost.

use crate::models::{DatabaseType, Value};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Uuid;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Temporal,
    Uuid,
    Unknown,
}

/// Classify a declared column type.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let name = type_name.to_lowercase();
    let name = name.as_str();

    if name.contains("decimal") || name.contains("numeric") {
        // NUMERIC affinity in SQLite stores plain reals
        return if db == DatabaseType::SQLite && name == "numeric" {
            TypeCategory::Float
        } else {
            TypeCategory::Decimal
        };
    }

    match name {
        // MySQL reports BOOLEAN columns as TINYINT, which stays an integer
        "bool" | "boolean" => return TypeCategory::Boolean,
        "real" | "float4" | "float8" => return TypeCategory::Float,
        "json" | "jsonb" => return TypeCategory::Json,
        "bytea" => return TypeCategory::Binary,
        "uuid" => return TypeCategory::Uuid,
        "name" => return TypeCategory::Text,
        _ => {}
    }

    let integer_like = name.contains("int") || name.contains("serial") || name.contains("tiny");
    if integer_like && name != "interval" && !name.contains("point") {
        TypeCategory::Integer
    } else if name.contains("float") || name.contains("double") {
        TypeCategory::Float
    } else if name.contains("blob") || name.contains("binary") {
        TypeCategory::Binary
    } else if db != DatabaseType::SQLite
        && (name == "date" || name == "datetime" || name == "year" || name.starts_with("time"))
    {
        // SQLite has no date storage class; its dates stay text
        TypeCategory::Temporal
    } else if name.contains("char") || name.contains("text") {
        TypeCategory::Text
    } else {
        TypeCategory::Unknown
    }
}

/// DECIMAL/NUMERIC in its exact textual form.
#[derive(Debug)]
pub struct RawDecimal(pub String);

fn is_decimal(type_name: &str) -> bool {
    let name = type_name.to_lowercase();
    name.contains("decimal") || name.contains("numeric")
}

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        is_decimal(ty.name())
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        Ok(Self(<&str as Decode<sqlx::MySql>>::decode(value)?.to_owned()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        is_decimal(ty.name())
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        Ok(Self(<&str as Decode<sqlx::Postgres>>::decode(value)?.to_owned()))
    }
}

/// Decode `T` at `idx`: `None` if the column does not decode as `T`,
/// `Some(Value::Null)` for SQL NULL.
fn cell<'r, R, T>(row: &'r R, idx: usize, wrap: impl FnOnce(T) -> Value) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx)
        .ok()
        .map(|v| v.map_or(Value::Null, wrap))
}

fn int<'r, R, T>(row: &'r R, idx: usize) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database> + Into<i64>,
{
    cell(row, idx, |v: T| Value::Int(v.into()))
}

/// Date/time columns as text. Zoned timestamps render as RFC 3339.
fn temporal<'r, R>(row: &'r R, idx: usize, zoned_first: bool) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    DateTime<Utc>: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
    NaiveTime: Decode<'r, R::Database> + Type<R::Database>,
{
    let zoned = || cell(row, idx, |v: DateTime<Utc>| Value::Text(v.to_rfc3339()));
    let naive = || cell(row, idx, |v: NaiveDateTime| Value::Text(v.to_string()));
    let first = if zoned_first { zoned() } else { naive() };
    first
        .or_else(|| if zoned_first { naive() } else { zoned() })
        .or_else(|| cell(row, idx, |v: NaiveDate| Value::Text(v.to_string())))
        .or_else(|| cell(row, idx, |v: NaiveTime| Value::Text(v.to_string())))
}

fn json<'r, R>(row: &'r R, idx: usize) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    serde_json::Value: Decode<'r, R::Database> + Type<R::Database>,
{
    cell(row, idx, |v: serde_json::Value| Value::Text(v.to_string()))
}

/// Last resort for columns no category decoder accepted. Expression columns
/// in SQLite carry the storage class of their value, so try every class.
fn fallback<'r, R>(row: &'r R, idx: usize) -> Value
where
    R: Row,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    cell(row, idx, Value::Text)
        .or_else(|| cell(row, idx, Value::Int))
        .or_else(|| cell(row, idx, Value::Float))
        .or_else(|| cell(row, idx, Value::Bytes))
        .unwrap_or_else(|| {
            let column = &row.columns()[idx];
            tracing::warn!(
                column = column.name(),
                type_name = column.type_info().name(),
                "Column type not decodable, returning NULL"
            );
            Value::Null
        })
}

/// Converts a database-specific row into column names and [`Value`]s.
pub trait RowToValues: Row {
    const DATABASE: DatabaseType;

    /// Decode one column; `None` defers to the generic fallback.
    fn decode_category(&self, idx: usize, category: TypeCategory) -> Option<Value>;

    fn decode_column(&self, idx: usize) -> Value;

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_values(&self) -> Vec<Value> {
        (0..self.columns().len())
            .map(|idx| self.decode_column(idx))
            .collect()
    }
}

fn category_of<R: Row>(row: &R, idx: usize, db: DatabaseType) -> TypeCategory {
    categorize_type(row.columns()[idx].type_info().name(), db)
}

impl RowToValues for MySqlRow {
    const DATABASE: DatabaseType = DatabaseType::MySQL;

    fn decode_category(&self, idx: usize, category: TypeCategory) -> Option<Value> {
        match category {
            TypeCategory::Decimal => cell(self, idx, |d: RawDecimal| Value::Text(d.0)),
            TypeCategory::Integer => int::<_, i64>(self, idx)
                .or_else(|| int::<_, i32>(self, idx))
                .or_else(|| int::<_, i16>(self, idx))
                .or_else(|| int::<_, i8>(self, idx))
                .or_else(|| int::<_, u32>(self, idx))
                .or_else(|| int::<_, u16>(self, idx))
                .or_else(|| int::<_, u8>(self, idx))
                // BIGINT UNSIGNED above i64::MAX keeps its exact digits
                .or_else(|| {
                    cell(self, idx, |v: u64| {
                        i64::try_from(v).map_or_else(|_| Value::Text(v.to_string()), Value::Int)
                    })
                }),
            TypeCategory::Boolean => cell(self, idx, Value::Bool),
            TypeCategory::Float => cell(self, idx, Value::Float)
                .or_else(|| cell(self, idx, |v: f32| Value::Float(v.into()))),
            TypeCategory::Binary => cell(self, idx, Value::Bytes),
            TypeCategory::Json => json(self, idx),
            TypeCategory::Temporal => temporal(self, idx, false),
            TypeCategory::Text | TypeCategory::Uuid | TypeCategory::Unknown => None,
        }
    }

    fn decode_column(&self, idx: usize) -> Value {
        self.decode_category(idx, category_of(self, idx, Self::DATABASE))
            .unwrap_or_else(|| fallback(self, idx))
    }
}

impl RowToValues for PgRow {
    const DATABASE: DatabaseType = DatabaseType::PostgreSQL;

    fn decode_category(&self, idx: usize, category: TypeCategory) -> Option<Value> {
        match category {
            TypeCategory::Decimal => cell(self, idx, |d: RawDecimal| Value::Text(d.0)),
            TypeCategory::Integer => int::<_, i64>(self, idx)
                .or_else(|| int::<_, i32>(self, idx))
                .or_else(|| int::<_, i16>(self, idx)),
            TypeCategory::Boolean => cell(self, idx, Value::Bool),
            TypeCategory::Float => cell(self, idx, Value::Float)
                .or_else(|| cell(self, idx, |v: f32| Value::Float(v.into()))),
            TypeCategory::Binary => cell(self, idx, Value::Bytes),
            TypeCategory::Json => json(self, idx),
            TypeCategory::Temporal => temporal(self, idx, true),
            TypeCategory::Uuid => cell(self, idx, |v: Uuid| Value::Text(v.to_string())),
            TypeCategory::Text | TypeCategory::Unknown => None,
        }
    }

    fn decode_column(&self, idx: usize) -> Value {
        self.decode_category(idx, category_of(self, idx, Self::DATABASE))
            .unwrap_or_else(|| fallback(self, idx))
    }
}

impl RowToValues for SqliteRow {
    const DATABASE: DatabaseType = DatabaseType::SQLite;

    fn decode_category(&self, idx: usize, category: TypeCategory) -> Option<Value> {
        match category {
            TypeCategory::Integer => cell(self, idx, Value::Int),
            TypeCategory::Boolean => cell(self, idx, Value::Bool),
            TypeCategory::Float | TypeCategory::Decimal => cell(self, idx, Value::Float),
            TypeCategory::Binary => cell(self, idx, Value::Bytes),
            _ => None,
        }
    }

    fn decode_column(&self, idx: usize) -> Value {
        self.decode_category(idx, category_of(self, idx, Self::DATABASE))
            .unwrap_or_else(|| fallback(self, idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;
    use sqlx::Executor;
    use sqlx::sqlite::SqliteConnection;

    #[test]
    fn test_categorize_type_integer() {
        for (name, db) in [
            ("INT", DatabaseType::MySQL),
            ("BIGINT", DatabaseType::PostgreSQL),
            ("TINYINT", DatabaseType::MySQL),
            ("INTEGER", DatabaseType::SQLite),
        ] {
            assert_eq!(categorize_type(name, db), TypeCategory::Integer, "{name}");
        }
        assert_eq!(
            categorize_type("INTERVAL", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
        assert_eq!(
            categorize_type("POINT", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::SQLite),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_text_json_binary() {
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("BLOB", DatabaseType::SQLite),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("BOOLEAN", DatabaseType::PostgreSQL),
            TypeCategory::Boolean
        );
    }

    #[test]
    fn test_categorize_type_uuid() {
        assert_eq!(
            categorize_type("UUID", DatabaseType::PostgreSQL),
            TypeCategory::Uuid
        );
        // MySQL has no UUID type; such columns are declared as CHAR(36)
        assert_eq!(
            categorize_type("CHAR", DatabaseType::MySQL),
            TypeCategory::Text
        );
    }

    #[tokio::test]
    async fn test_sqlite_row_decoding() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        conn.execute(
            "CREATE TABLE t (i INTEGER, r REAL, s TEXT, b BLOB, d DATETIME, n INTEGER)",
        )
        .await
        .unwrap();
        conn.execute("INSERT INTO t VALUES (7, 1.5, 'x', X'0102', '2024-01-02 03:04:05', NULL)")
            .await
            .unwrap();

        let rows = conn
            .fetch_all("SELECT i, r, s, b, d, n, i + 1 AS expr FROM t")
            .await
            .unwrap();
        assert_eq!(
            rows[0].column_names(),
            vec!["i", "r", "s", "b", "d", "n", "expr"]
        );
        assert_eq!(
            rows[0].to_values(),
            vec![
                Value::Int(7),
                Value::Float(1.5),
                Value::Text("x".into()),
                Value::Bytes(vec![1, 2]),
                Value::Text("2024-01-02 03:04:05".into()),
                Value::Null,
                Value::Int(8),
            ]
        );
        conn.close().await.unwrap();
    }
}
