//! Runtime values flowing through evaluation, parameters and result rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::types::{DataType, FieldType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Record(Record),
    Closure(Arc<Closure>),
    Query(QueryRoot),
}

/// A row or anonymous object: ordered named fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Captured environment of a query, named like a compiler-generated class.
///
/// Fields whose name contains `>` hold nested closures hoisted by the host
/// compiler; they are searched when resolving captured variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    pub class_name: String,
    pub fields: Vec<ClosureField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureField {
    pub name: String,
    pub data_type: DataType,
    pub value: Value,
}

impl Closure {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: Vec::new(),
        }
    }

    /// Capture a variable whose declared type is the value's own type
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let data_type = match value.data_type() {
            DataType::Null => DataType::Object,
            other => other,
        };
        self.with_typed(name, data_type, value)
    }

    pub fn with_typed(
        mut self,
        name: impl Into<String>,
        data_type: DataType,
        value: impl Into<Value>,
    ) -> Self {
        self.fields.push(ClosureField {
            name: name.into(),
            data_type,
            value: value.into(),
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&ClosureField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Root of a deferred query over one entity set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRoot {
    pub entity: String,
    pub set: String,
}

impl Value {
    /// Natural type of the value itself, independent of any declared type
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Int,
            Value::Float(_) => DataType::Float,
            Value::String(_) => DataType::String,
            Value::Uuid(_) => DataType::Uuid,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::List(items) => DataType::Sequence(Box::new(
                items.first().map(Value::data_type).unwrap_or(DataType::Unknown),
            )),
            Value::Record(record) => DataType::Struct(
                record
                    .fields
                    .iter()
                    .map(|(name, value)| FieldType {
                        name: name.clone(),
                        data_type: value.data_type(),
                    })
                    .collect(),
            ),
            Value::Closure(closure) => DataType::Closure(closure.class_name.clone()),
            Value::Query(root) => DataType::queryable(DataType::Entity(root.entity.clone())),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Equality with numeric widening, as used by `==` in query predicates
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            _ => self == other,
        }
    }

    /// Ordering used by comparisons and sorting; `None` when the values are not comparable.
    /// Nulls sort first.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Uuid(u) => write!(f, "uuid({})", u),
            Value::Timestamp(t) => write!(f, "timestamp({})", t.to_rfc3339()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Record(record) => {
                write!(f, "{{ ")?;
                for (i, (name, value)) in record.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, value)?;
                }
                write!(f, " }}")
            }
            // Closures render by class only so captured data never leaks into shape text
            Value::Closure(closure) => write!(f, "value({})", closure.class_name),
            Value::Query(root) => write!(f, "Query<{}>", root.entity),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl From<Closure> for Value {
    fn from(v: Closure) -> Self {
        Value::Closure(Arc::new(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_with_null_defaults_to_object() {
        let closure = Closure::new("<>c__DisplayClass0_0").with("missing", Value::Null);
        assert_eq!(closure.field("missing").unwrap().data_type, DataType::Object);
    }

    #[test]
    fn test_compare_numeric_widening() {
        assert_eq!(Value::Int(2).compare(&Value::Float(1.5)), Some(Ordering::Greater));
        assert!(Value::Int(3).loose_eq(&Value::Float(3.0)));
        assert_eq!(Value::Null.compare(&Value::Int(0)), Some(Ordering::Less));
        assert_eq!(Value::String("a".into()).compare(&Value::Int(0)), None);
    }

    #[test]
    fn test_closure_renders_by_class() {
        let value = Value::from(Closure::new("<>c__DisplayClass1_0").with("secret", 42));
        assert_eq!(value.to_string(), "value(<>c__DisplayClass1_0)");
    }

    #[test]
    fn test_json_round_trip() {
        let record = Value::from(Record::new().with("Name", "Ada").with("Age", 36));
        let json = serde_json::to_string(&record).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
