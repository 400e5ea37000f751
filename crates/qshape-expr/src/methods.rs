//! Well-known method identities
//!
//! Every function the pipeline reasons about gets a stable symbolic
//! identifier here. Call sites are matched by comparing identifiers.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::types::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId {
    owner: Cow<'static, str>,
    name: Cow<'static, str>,
}

impl MethodId {
    pub const fn from_static(owner: &'static str, name: &'static str) -> Self {
        Self {
            owner: Cow::Borrowed(owner),
            name: Cow::Borrowed(name),
        }
    }

    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: Cow::Owned(owner.into()),
            name: Cow::Owned(name.into()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

pub const QUERYABLE: &str = "Queryable";

// Query operators
pub const WHERE: MethodId = MethodId::from_static(QUERYABLE, "Where");
pub const SELECT: MethodId = MethodId::from_static(QUERYABLE, "Select");
pub const ORDER_BY: MethodId = MethodId::from_static(QUERYABLE, "OrderBy");
pub const ORDER_BY_DESCENDING: MethodId = MethodId::from_static(QUERYABLE, "OrderByDescending");
pub const THEN_BY: MethodId = MethodId::from_static(QUERYABLE, "ThenBy");
pub const THEN_BY_DESCENDING: MethodId = MethodId::from_static(QUERYABLE, "ThenByDescending");
pub const SKIP: MethodId = MethodId::from_static(QUERYABLE, "Skip");
pub const TAKE: MethodId = MethodId::from_static(QUERYABLE, "Take");
pub const DISTINCT: MethodId = MethodId::from_static(QUERYABLE, "Distinct");
pub const JOIN: MethodId = MethodId::from_static(QUERYABLE, "Join");
pub const COUNT: MethodId = MethodId::from_static(QUERYABLE, "Count");
pub const ANY: MethodId = MethodId::from_static(QUERYABLE, "Any");
pub const FIRST: MethodId = MethodId::from_static(QUERYABLE, "First");
pub const FIRST_OR_DEFAULT: MethodId = MethodId::from_static(QUERYABLE, "FirstOrDefault");
pub const SINGLE: MethodId = MethodId::from_static(QUERYABLE, "Single");

// Extension operators, classified by name
pub const INCLUDE: MethodId = MethodId::from_static(QUERYABLE, "Include");
pub const THEN_INCLUDE: MethodId = MethodId::from_static(QUERYABLE, "ThenInclude");
pub const TAG_WITH: MethodId = MethodId::from_static(QUERYABLE, "TagWith");

// Scalar functions
pub const MATH_POW: MethodId = MethodId::from_static("Math", "Pow");
pub const MATH_ABS: MethodId = MethodId::from_static("Math", "Abs");
pub const STRING_TO_UPPER: MethodId = MethodId::from_static("String", "ToUpper");
pub const STRING_TO_LOWER: MethodId = MethodId::from_static("String", "ToLower");
pub const STRING_CONTAINS: MethodId = MethodId::from_static("String", "Contains");
pub const STRING_STARTS_WITH: MethodId = MethodId::from_static("String", "StartsWith");

// Non-deterministic functions
pub const GUID_NEW_GUID: MethodId = MethodId::from_static("Guid", "NewGuid");
pub const DATETIME_NOW: MethodId = MethodId::from_static("DateTime", "Now");
pub const DATETIME_UTC_NOW: MethodId = MethodId::from_static("DateTime", "UtcNow");

/// Identity for a query operator called on a queryable receiver
pub fn query_operator(name: &str) -> MethodId {
    match name {
        "Where" => WHERE,
        "Select" => SELECT,
        "OrderBy" => ORDER_BY,
        "OrderByDescending" => ORDER_BY_DESCENDING,
        "ThenBy" => THEN_BY,
        "ThenByDescending" => THEN_BY_DESCENDING,
        "Skip" => SKIP,
        "Take" => TAKE,
        "Distinct" => DISTINCT,
        "Join" => JOIN,
        "Count" => COUNT,
        "Any" => ANY,
        "First" => FIRST,
        "FirstOrDefault" => FIRST_OR_DEFAULT,
        "Single" => SINGLE,
        "Include" => INCLUDE,
        "ThenInclude" => THEN_INCLUDE,
        "TagWith" => TAG_WITH,
        other => MethodId::new(QUERYABLE, other),
    }
}

pub fn is_query_operator(method: &MethodId) -> bool {
    method.owner() == QUERYABLE
}

/// Resolve a static call such as `Math.Pow(a, b)` to its identity and return type
pub fn resolve_static(owner: &str, name: &str, args: &[DataType]) -> Option<(MethodId, DataType)> {
    let resolved = match (owner, name, args.len()) {
        ("Math", "Pow", 2) => (MATH_POW, DataType::Float),
        ("Math", "Abs", 1) => (MATH_ABS, args[0].clone()),
        ("Guid", "NewGuid", 0) => (GUID_NEW_GUID, DataType::Uuid),
        ("DateTime", "Now", 0) => (DATETIME_NOW, DataType::Timestamp),
        ("DateTime", "UtcNow", 0) => (DATETIME_UTC_NOW, DataType::Timestamp),
        _ => return None,
    };
    Some(resolved)
}

/// Resolve an instance call on a scalar receiver
pub fn resolve_instance(receiver: &DataType, name: &str, args: &[DataType]) -> Option<(MethodId, DataType)> {
    let resolved = match (receiver.unwrap_nullable(), name, args.len()) {
        (DataType::String, "ToUpper", 0) => (STRING_TO_UPPER, DataType::String),
        (DataType::String, "ToLower", 0) => (STRING_TO_LOWER, DataType::String),
        (DataType::String, "Contains", 1) => (STRING_CONTAINS, DataType::Bool),
        (DataType::String, "StartsWith", 1) => (STRING_STARTS_WITH, DataType::Bool),
        _ => return None,
    };
    Some(resolved)
}
