//! Forward-only cursor over a fetched result set.

use crate::error::{DbError, DbResult};
use crate::models::{ResultSet, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Column selector: a column name or a 0-based index.
pub trait ColumnIndex {
    fn position(&self, columns: &[String]) -> DbResult<usize>;
}

impl ColumnIndex for &str {
    fn position(&self, columns: &[String]) -> DbResult<usize> {
        columns
            .iter()
            .position(|c| c == self)
            .or_else(|| columns.iter().position(|c| c.eq_ignore_ascii_case(self)))
            .ok_or_else(|| DbError::column_not_found(*self))
    }
}

impl ColumnIndex for usize {
    fn position(&self, columns: &[String]) -> DbResult<usize> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(DbError::column_not_found(format!(
                "#{} (result has {} columns)",
                self,
                columns.len()
            )))
        }
    }
}

/// Conversion out of a cell value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> DbResult<Self>;
}

fn conversion_error(value: &Value, target: &str) -> DbError {
    DbError::mapping(format!("Cannot convert {} value to {}", value.type_name(), target))
}

/// Whole floats inside the i64 range; `i64::MAX as f64` rounds up to 2^63.
fn exact_i64(v: f64) -> Option<i64> {
    let in_range = (i64::MIN as f64..i64::MAX as f64).contains(&v);
    (v.fract() == 0.0 && in_range).then_some(v as i64)
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Int(v) => Ok(*v),
            Value::Bool(v) => Ok(i64::from(*v)),
            Value::Float(v) => exact_i64(*v).ok_or_else(|| conversion_error(value, "i64")),
            Value::Text(s) => s.trim().parse().map_err(|_| conversion_error(value, "i64")),
            _ => Err(conversion_error(value, "i64")),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> DbResult<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| conversion_error(value, "i32"))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Text(s) => s.trim().parse().map_err(|_| conversion_error(value, "u64")),
            _ => {
                let wide = i64::from_value(value)?;
                u64::try_from(wide).map_err(|_| conversion_error(value, "u64"))
            }
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            Value::Text(s) => s.trim().parse().map_err(|_| conversion_error(value, "f64")),
            _ => Err(conversion_error(value, "f64")),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            Value::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Ok(true),
                "false" | "f" | "0" | "no" => Ok(false),
                _ => Err(conversion_error(value, "bool")),
            },
            _ => Err(conversion_error(value, "bool")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Null => Err(conversion_error(value, "String")),
            Value::Text(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(conversion_error(value, "bytes")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A result cursor, positioned before the first row.
///
/// Rows are consumed with [`Cursor::advance`]; values of the current row are
/// read by column name or index.
#[derive(Debug)]
pub struct Cursor {
    columns: Arc<[String]>,
    rows: std::vec::IntoIter<Vec<Value>>,
    current: Option<Vec<Value>>,
    closed: Arc<AtomicBool>,
}

impl Cursor {
    pub fn new(result: ResultSet) -> Self {
        Self::with_close_flag(result, Arc::new(AtomicBool::new(false)))
    }

    /// Cursor whose closed state is shared with its owner.
    pub(crate) fn with_close_flag(result: ResultSet, closed: Arc<AtomicBool>) -> Self {
        Self {
            columns: result.columns.into(),
            rows: result.rows.into_iter(),
            current: None,
            closed,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Move to the next row. Returns false once the rows are exhausted.
    pub fn advance(&mut self) -> DbResult<bool> {
        self.ensure_open()?;
        self.current = self.rows.next();
        Ok(self.current.is_some())
    }

    /// Raw value of a column in the current row.
    pub fn value(&self, column: impl ColumnIndex) -> DbResult<&Value> {
        self.ensure_open()?;
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| DbError::invalid_argument("Cursor is not positioned on a row"))?;
        let idx = column.position(&self.columns)?;
        row.get(idx)
            .ok_or_else(|| DbError::internal(format!("Row is missing column {}", idx)))
    }

    pub fn get<T: FromValue>(&self, column: impl ColumnIndex) -> DbResult<T> {
        T::from_value(self.value(column)?)
    }

    /// String form of a column, `None` for NULL.
    pub fn get_string(&self, column: impl ColumnIndex) -> DbResult<Option<String>> {
        self.get(column)
    }

    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.current = None;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.is_closed() {
            return Err(DbError::invalid_argument("Cursor is closed"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Cursor {
        Cursor::new(ResultSet::new(
            vec!["id".into(), "Name".into(), "score".into()],
            vec![
                vec![Value::Int(1), Value::Text("ada".into()), Value::Text("9.5".into())],
                vec![Value::Int(2), Value::Null, Value::Float(7.0)],
            ],
        ))
    }

    #[test]
    fn test_cursor_starts_before_first_row() {
        let cursor = sample();
        assert!(cursor.value("id").is_err());
    }

    #[test]
    fn test_cursor_iterates_forward() {
        let mut cursor = sample();
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.get::<i64>("id").unwrap(), 1);
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.get::<i32>(0).unwrap(), 2);
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn test_cursor_name_lookup_is_case_insensitive() {
        let mut cursor = sample();
        cursor.advance().unwrap();
        assert_eq!(cursor.get_string("name").unwrap(), Some("ada".to_string()));
        assert_eq!(cursor.get::<f64>("SCORE").unwrap(), 9.5);
        assert!(matches!(
            cursor.value("missing"),
            Err(DbError::ColumnNotFound { .. })
        ));
        assert!(cursor.value(3usize).is_err());
    }

    #[test]
    fn test_cursor_null_handling() {
        let mut cursor = sample();
        cursor.advance().unwrap();
        cursor.advance().unwrap();
        assert_eq!(cursor.get_string("Name").unwrap(), None);
        assert!(cursor.get::<String>("Name").is_err());
        assert_eq!(cursor.get::<Option<i64>>("Name").unwrap(), None);
    }

    #[test]
    fn test_cursor_closed_rejects_access() {
        let mut cursor = sample();
        cursor.advance().unwrap();
        cursor.close();
        assert!(cursor.is_closed());
        assert!(matches!(
            cursor.advance(),
            Err(DbError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_shared_close_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut cursor = Cursor::with_close_flag(ResultSet::default(), flag.clone());
        flag.store(true, Ordering::Release);
        assert!(cursor.is_closed());
        assert!(cursor.advance().is_err());
    }

    #[test]
    fn test_from_value_conversions() {
        assert_eq!(i64::from_value(&Value::Text(" 42 ".into())).unwrap(), 42);
        assert!(i32::from_value(&Value::Int(i64::MAX)).is_err());
        assert!(u64::from_value(&Value::Int(-1)).is_err());
        assert!(bool::from_value(&Value::Int(1)).unwrap());
        assert_eq!(String::from_value(&Value::Int(5)).unwrap(), "5");
        assert_eq!(Vec::<u8>::from_value(&Value::Text("ab".into())).unwrap(), b"ab");
        assert!(f64::from_value(&Value::Bytes(vec![1])).is_err());
    }

    #[test]
    fn test_float_to_integer_requires_exact_value() {
        assert_eq!(i64::from_value(&Value::Float(-3.0)).unwrap(), -3);
        assert!(i64::from_value(&Value::Float(2.5)).is_err());
        assert!(i64::from_value(&Value::Float(1e30)).is_err());
        assert!(i64::from_value(&Value::Float(-1e30)).is_err());
        assert!(i64::from_value(&Value::Float(9_223_372_036_854_775_808.0)).is_err());
        assert!(i64::from_value(&Value::Float(f64::NAN)).is_err());
        assert!(i32::from_value(&Value::Float(1e30)).is_err());
    }
}
