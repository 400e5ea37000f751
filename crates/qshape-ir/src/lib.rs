//! qshape Intermediate Representation (IR)
//!
//! The normalized query operation tree produced from a shape expression,
//! and the entity model it is compiled against. Both serialize
//! deterministically for fingerprinting.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use qshape_expr::{DataType, Expr, QueryRoot};

mod model;
pub use model::*;

/// A classified query: source, ordered operations, declared result shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryModel {
    pub source: QueryRoot,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<QueryOperation>,

    pub result: ResultShape,
}

impl QueryModel {
    /// Calculate fingerprint (SHA-256) of the canonical JSON form
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("IR should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Element type of the result, whether a sequence or a single value
    pub fn element_type(&self) -> &DataType {
        self.result.element_type()
    }
}

/// Query operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum QueryOperation {
    Where {
        predicate: Expr,
    },
    Select {
        selector: Expr,
    },
    OrderBy {
        key: Expr,
        #[serde(default)]
        descending: bool,
    },
    ThenBy {
        key: Expr,
        #[serde(default)]
        descending: bool,
    },
    Skip {
        count: Expr,
    },
    Take {
        count: Expr,
    },
    Distinct,
    Join {
        inner: QueryRoot,
        outer_key: Expr,
        inner_key: Expr,
        result: Expr,
    },
    Count {
        #[serde(skip_serializing_if = "Option::is_none")]
        predicate: Option<Expr>,
    },
    Any {
        #[serde(skip_serializing_if = "Option::is_none")]
        predicate: Option<Expr>,
    },
    First {
        #[serde(skip_serializing_if = "Option::is_none")]
        predicate: Option<Expr>,
        #[serde(default)]
        or_default: bool,
    },
    Single {
        #[serde(skip_serializing_if = "Option::is_none")]
        predicate: Option<Expr>,
    },
    /// Extension operation classified by a registered node type (Include, TagWith, ...)
    Custom {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        arguments: Vec<Expr>,
    },
}

impl QueryOperation {
    pub fn name(&self) -> &str {
        match self {
            QueryOperation::Where { .. } => "Where",
            QueryOperation::Select { .. } => "Select",
            QueryOperation::OrderBy { descending: false, .. } => "OrderBy",
            QueryOperation::OrderBy { descending: true, .. } => "OrderByDescending",
            QueryOperation::ThenBy { descending: false, .. } => "ThenBy",
            QueryOperation::ThenBy { descending: true, .. } => "ThenByDescending",
            QueryOperation::Skip { .. } => "Skip",
            QueryOperation::Take { .. } => "Take",
            QueryOperation::Distinct => "Distinct",
            QueryOperation::Join { .. } => "Join",
            QueryOperation::Count { .. } => "Count",
            QueryOperation::Any { .. } => "Any",
            QueryOperation::First { or_default: false, .. } => "First",
            QueryOperation::First { or_default: true, .. } => "FirstOrDefault",
            QueryOperation::Single { .. } => "Single",
            QueryOperation::Custom { name, .. } => name,
        }
    }

    /// Terminal operations collapse the sequence into a single result
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryOperation::Count { .. }
                | QueryOperation::Any { .. }
                | QueryOperation::First { .. }
                | QueryOperation::Single { .. }
        )
    }

    /// Expression arguments in declaration order; a join's inner source is not an expression
    pub fn arguments(&self) -> Vec<&Expr> {
        match self {
            QueryOperation::Where { predicate } => vec![predicate],
            QueryOperation::Select { selector } => vec![selector],
            QueryOperation::OrderBy { key, .. } | QueryOperation::ThenBy { key, .. } => vec![key],
            QueryOperation::Skip { count } | QueryOperation::Take { count } => vec![count],
            QueryOperation::Distinct => Vec::new(),
            QueryOperation::Join { outer_key, inner_key, result, .. } => vec![outer_key, inner_key, result],
            QueryOperation::Count { predicate }
            | QueryOperation::Any { predicate }
            | QueryOperation::First { predicate, .. }
            | QueryOperation::Single { predicate } => predicate.iter().collect(),
            QueryOperation::Custom { arguments, .. } => arguments.iter().collect(),
        }
    }
}

/// Declared result of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultShape {
    Sequence(DataType),
    Single(DataType),
}

impl ResultShape {
    pub fn element_type(&self) -> &DataType {
        match self {
            ResultShape::Sequence(ty) | ResultShape::Single(ty) => ty,
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, ResultShape::Single(_))
    }
}

impl fmt::Display for QueryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source.set)?;
        for op in &self.operations {
            write!(f, " | {}(", op.name())?;
            if let QueryOperation::Join { inner, .. } = op {
                write!(f, "{}, ", inner.set)?;
            }
            for (i, arg) in op.arguments().into_iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_expr::{BinOp, ParamDecl};

    fn people() -> QueryRoot {
        QueryRoot {
            entity: "Person".to_string(),
            set: "people".to_string(),
        }
    }

    fn adults(bound: &str) -> QueryModel {
        let person = DataType::Entity("Person".to_string());
        let p = Expr::parameter("p", person.clone());
        QueryModel {
            source: people(),
            operations: vec![
                QueryOperation::Where {
                    predicate: Expr::lambda(
                        vec![ParamDecl { name: "p".into(), ty: person.clone() }],
                        Expr::binary(
                            BinOp::Gt,
                            Expr::member(p, "Age", DataType::Int),
                            Expr::parameter(bound, DataType::Int),
                        ),
                    ),
                },
                QueryOperation::Take { count: Expr::constant(10) },
            ],
            result: ResultShape::Sequence(person),
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let model = adults("__min_age_0");
        assert_eq!(model.fingerprint(), model.clone().fingerprint());
        assert_ne!(model.fingerprint(), adults("__max_age_0").fingerprint());
    }

    #[test]
    fn test_json_round_trip() {
        let model = adults("__min_age_0");
        let json = serde_json::to_string(&model).unwrap();
        assert!(json.contains("\"op\":\"Where\""));

        let parsed: QueryModel = serde_json::from_str(&json).unwrap();
        assert_eq!(model, parsed);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            adults("__min_age_0").to_string(),
            "people | Where(p => (p.Age > __min_age_0)) | Take(10)"
        );
    }
}
