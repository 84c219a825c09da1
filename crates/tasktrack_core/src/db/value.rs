//! Backend-neutral statement parameters and fetched rows.
//!
//! # Invariants
//! - `Timestamp` values are always UTC.
//! - Backends without native timestamp/uuid types store them as text;
//!   typed getters on `Row` accept either representation.

use super::{DbError, DbResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// One statement parameter or fetched column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Timestamp(_) => "timestamp",
            Self::Uuid(_) => "uuid",
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One fetched row. Column names are shared by every row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at `index`, if the row is that wide.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns the value of the first column named `name`.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|column| column == name)
            .and_then(|index| self.values.get(index))
    }

    pub fn integer(&self, name: &str) -> DbResult<i64> {
        self.opt_integer(name)?.ok_or_else(|| unexpected_null(name))
    }

    pub fn opt_integer(&self, name: &str) -> DbResult<Option<i64>> {
        match self.column(name)? {
            Value::Null => Ok(None),
            Value::Integer(value) => Ok(Some(*value)),
            other => Err(type_mismatch(name, "integer", other)),
        }
    }

    pub fn text(&self, name: &str) -> DbResult<String> {
        self.opt_text(name)?.ok_or_else(|| unexpected_null(name))
    }

    pub fn opt_text(&self, name: &str) -> DbResult<Option<String>> {
        match self.column(name)? {
            Value::Null => Ok(None),
            Value::Text(value) => Ok(Some(value.clone())),
            other => Err(type_mismatch(name, "text", other)),
        }
    }

    pub fn uuid(&self, name: &str) -> DbResult<Uuid> {
        match self.column(name)? {
            Value::Uuid(value) => Ok(*value),
            Value::Text(value) => Uuid::parse_str(value).map_err(|_| {
                DbError::InvalidData(format!("invalid uuid value `{value}` in column `{name}`"))
            }),
            Value::Null => Err(unexpected_null(name)),
            other => Err(type_mismatch(name, "uuid", other)),
        }
    }

    pub fn opt_timestamp(&self, name: &str) -> DbResult<Option<DateTime<Utc>>> {
        match self.column(name)? {
            Value::Null => Ok(None),
            Value::Timestamp(value) => Ok(Some(*value)),
            Value::Text(value) => DateTime::parse_from_rfc3339(value)
                .map(|parsed| Some(parsed.with_timezone(&Utc)))
                .map_err(|_| {
                    DbError::InvalidData(format!(
                        "invalid timestamp value `{value}` in column `{name}`"
                    ))
                }),
            other => Err(type_mismatch(name, "timestamp", other)),
        }
    }

    fn column(&self, name: &str) -> DbResult<&Value> {
        self.get_by_name(name).ok_or_else(|| {
            DbError::InvalidData(format!("column `{name}` is not in the result set"))
        })
    }
}

fn unexpected_null(name: &str) -> DbError {
    DbError::InvalidData(format!("column `{name}` is unexpectedly null"))
}

fn type_mismatch(name: &str, expected: &str, actual: &Value) -> DbError {
    DbError::InvalidData(format!(
        "column `{name}` holds {} but {expected} was requested",
        actual.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::{Row, Value};
    use crate::db::DbError;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use uuid::Uuid;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let columns: Arc<[String]> = pairs.iter().map(|(name, _)| name.to_string()).collect();
        Row::new(columns, pairs.iter().map(|(_, value)| value.clone()).collect())
    }

    #[test]
    fn typed_getters_accept_text_encoded_uuid_and_timestamp() {
        let id = Uuid::new_v4();
        let row = row(&[
            ("id", Value::Text(id.to_string())),
            ("due", Value::Text("2024-03-01T10:00:00.000000Z".to_string())),
        ]);

        assert_eq!(row.uuid("id").expect("uuid"), id);
        assert_eq!(
            row.opt_timestamp("due").expect("timestamp"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn null_and_missing_columns_are_reported() {
        let row = row(&[("name", Value::Null)]);

        assert_eq!(row.opt_text("name").expect("nullable text"), None);
        assert!(matches!(row.text("name"), Err(DbError::InvalidData(_))));
        assert!(matches!(row.opt_text("absent"), Err(DbError::InvalidData(_))));
    }

    #[test]
    fn type_mismatch_is_invalid_data() {
        let row = row(&[("count", Value::Text("3".to_string()))]);

        let err = row.integer("count").expect_err("text is not an integer");
        assert!(err.to_string().contains("holds text"));
    }

    #[test]
    fn option_conversion_maps_none_to_null() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn positional_access_matches_column_order() {
        let row = row(&[("id", Value::Integer(4)), ("note", Value::Null)]);

        assert_eq!(row.len(), 2);
        assert_eq!(row.values(), [Value::Integer(4), Value::Null]);
        assert_eq!(row.get(0), Some(&Value::Integer(4)));
        assert!(row.get(1).expect("second column").is_null());
        assert!(!row.get(0).expect("first column").is_null());
        assert_eq!(row.get(2), None);
    }
}
