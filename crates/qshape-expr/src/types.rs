//! Static type system for query expressions

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    // Primitives
    Bool,
    Int,
    Float,
    String,
    Uuid,
    Timestamp,

    // Wrappers
    Nullable(Box<DataType>),
    Object,

    // Rows
    Entity(String),
    Struct(Vec<FieldType>),

    // Sequences
    Sequence(Box<DataType>),
    Queryable(Box<DataType>),

    // Special
    Function {
        params: Vec<DataType>,
        ret: Box<DataType>,
    },
    Closure(String),
    Null,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldType {
    pub name: String,
    pub data_type: DataType,
}

impl DataType {
    pub fn queryable(element: DataType) -> Self {
        DataType::Queryable(Box::new(element))
    }

    pub fn nullable(inner: DataType) -> Self {
        DataType::Nullable(Box::new(inner))
    }

    /// True for the deferred-query type; these subtrees are never evaluated client side.
    pub fn is_queryable(&self) -> bool {
        matches!(self, DataType::Queryable(_))
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, DataType::Queryable(_) | DataType::Sequence(_))
    }

    /// Element type of a queryable or in-memory sequence
    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            DataType::Queryable(inner) | DataType::Sequence(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn unwrap_nullable(&self) -> &DataType {
        match self {
            DataType::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.unwrap_nullable(), DataType::Int | DataType::Float)
    }

    /// Resolve the type of `member` on a value of this type
    pub fn member_type(&self, member: &str, lookup: &dyn TypeLookup) -> Option<DataType> {
        match self.unwrap_nullable() {
            DataType::Entity(entity) => lookup.property_type(entity, member),
            DataType::Struct(fields) => fields
                .iter()
                .find(|f| f.name == member)
                .map(|f| f.data_type.clone()),
            DataType::String if member == "Length" => Some(DataType::Int),
            DataType::Sequence(_) if member == "Count" => Some(DataType::Int),
            DataType::Timestamp if matches!(member, "Year" | "Month" | "Day" | "Hour" | "Minute" | "Second") => {
                Some(DataType::Int)
            }
            DataType::Unknown | DataType::Object => Some(DataType::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "bool"),
            DataType::Int => write!(f, "int"),
            DataType::Float => write!(f, "float"),
            DataType::String => write!(f, "string"),
            DataType::Uuid => write!(f, "uuid"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::Nullable(inner) => write!(f, "{}?", inner),
            DataType::Object => write!(f, "object"),
            DataType::Entity(name) => write!(f, "{}", name),
            DataType::Struct(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.data_type)?;
                }
                write!(f, "}}")
            }
            DataType::Sequence(inner) => write!(f, "Sequence<{}>", inner),
            DataType::Queryable(inner) => write!(f, "Queryable<{}>", inner),
            DataType::Function { params, ret } => {
                write!(f, "Func<")?;
                for param in params {
                    write!(f, "{}, ", param)?;
                }
                write!(f, "{}>", ret)
            }
            DataType::Closure(class) => write!(f, "{}", class),
            DataType::Null => write!(f, "null"),
            DataType::Unknown => write!(f, "?"),
        }
    }
}

/// Metadata lookups needed while building expression trees
pub trait TypeLookup {
    /// Type of a property declared on an entity type
    fn property_type(&self, entity: &str, property: &str) -> Option<DataType>;

    /// Entity type name behind a named entity set
    fn entity_set(&self, name: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoTypes;

    impl TypeLookup for NoTypes {
        fn property_type(&self, _entity: &str, _property: &str) -> Option<DataType> {
            None
        }

        fn entity_set(&self, _name: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_struct_member_type() {
        let ty = DataType::Struct(vec![FieldType {
            name: "Name".to_string(),
            data_type: DataType::String,
        }]);

        assert_eq!(ty.member_type("Name", &NoTypes), Some(DataType::String));
        assert_eq!(ty.member_type("Age", &NoTypes), None);
    }

    #[test]
    fn test_display() {
        let ty = DataType::queryable(DataType::Entity("Person".to_string()));
        assert_eq!(ty.to_string(), "Queryable<Person>");
        assert_eq!(DataType::nullable(DataType::Int).to_string(), "int?");
    }
}
