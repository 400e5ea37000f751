//! qshape expression trees - types, values, parser and evaluator

pub mod eval;
pub mod expr;
pub mod methods;
pub mod params;
mod parser;
pub mod types;
pub mod value;

pub use eval::{EvalError, Evaluator, SequenceSource, SortKey};
pub use expr::{BinOp, Expr, ParamDecl, UnOp};
pub use methods::MethodId;
pub use params::ParameterValues;
pub use parser::{parse_query, ParseContext, SyntaxError};
pub use types::{DataType, FieldType, TypeLookup};
pub use value::{Closure, ClosureField, QueryRoot, Record, Value};
