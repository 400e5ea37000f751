//! Value mapping between query values and DuckDB

use chrono::DateTime;
use duckdb::types::{TimeUnit, Value as DuckValue, ValueRef};
use uuid::Uuid;

use qshape_expr::{DataType, Value};

use crate::DuckStoreError;

/// Convert a placeholder value into something DuckDB can bind
pub fn to_duck(value: &Value) -> Result<DuckValue, DuckStoreError> {
    Ok(match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(f) => DuckValue::Double(*f),
        Value::String(s) => DuckValue::Text(s.clone()),
        // Bound as text; typed placeholders are cast in the statement
        Value::Uuid(u) => DuckValue::Text(u.to_string()),
        Value::Timestamp(t) => DuckValue::Text(t.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        other => return Err(DuckStoreError::UnsupportedParameter(other.data_type())),
    })
}

/// Decode one result cell as `expected`
pub fn decode(cell: ValueRef<'_>, expected: &DataType) -> Result<Value, DuckStoreError> {
    let expected = expected.unwrap_nullable();
    Ok(match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Int(i.into()),
        ValueRef::SmallInt(i) => Value::Int(i.into()),
        ValueRef::Int(i) => Value::Int(i.into()),
        ValueRef::BigInt(i) => Value::Int(i),
        ValueRef::UTinyInt(i) => Value::Int(i.into()),
        ValueRef::USmallInt(i) => Value::Int(i.into()),
        ValueRef::UInt(i) => Value::Int(i.into()),
        ValueRef::UBigInt(i) => Value::Int(
            i64::try_from(i).map_err(|_| DuckStoreError::UnsupportedColumn(format!("{} overflows int", i)))?,
        ),
        ValueRef::HugeInt(i) => Value::Int(
            i64::try_from(i).map_err(|_| DuckStoreError::UnsupportedColumn(format!("{} overflows int", i)))?,
        ),
        ValueRef::Float(f) => Value::Float(f.into()),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| DuckStoreError::UnsupportedColumn(format!("invalid UTF-8 text: {}", e)))?;
            match expected {
                DataType::Uuid => Value::Uuid(
                    Uuid::parse_str(text)
                        .map_err(|e| DuckStoreError::UnsupportedColumn(format!("invalid uuid '{}': {}", text, e)))?,
                ),
                _ => Value::String(text.to_string()),
            }
        }
        ValueRef::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map(Value::Timestamp)
                .ok_or_else(|| DuckStoreError::UnsupportedColumn(format!("timestamp {} out of range", micros)))?
        }
        other => {
            return Err(DuckStoreError::UnsupportedColumn(format!(
                "{:?} for {}",
                other.data_type(),
                expected
            )))
        }
    })
}
