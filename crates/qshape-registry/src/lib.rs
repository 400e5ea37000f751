//! Node classification and method translation registries
//!
//! [`QueryParser`] turns a shape expression into a [`qshape_ir::QueryModel`]
//! by classifying each query call through a [`NodeTypeProvider`].
//! [`MethodTranslatorRegistry`] lowers scalar calls into target functions.

use qshape_expr::MethodId;
use thiserror::Error;

pub mod nodes;
mod parser;
pub mod translate;
pub mod translators;

pub use nodes::{
    default_node_types, CompoundNodeTypeProvider, MethodInfoBasedNodeTypeRegistry,
    MethodNameBasedNodeTypeRegistry, NodeTypeProvider, OperationBuilder, operation,
};
pub use parser::QueryParser;
pub use translate::{MethodCall, MethodCallTranslator, MethodTranslatorRegistry, TargetExpr};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unclassified query operation: {method}")]
    UnclassifiedOperation { method: MethodId },

    #[error("Query has no queryable source: {0}")]
    MissingSource(String),

    #[error("Operation {method} expects {expected} arguments, got {actual}")]
    Arity {
        method: MethodId,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported join source: {0}")]
    UnsupportedJoinSource(String),
}
