//! Compiled-query cache
//!
//! Separates a query's shape from its captured data, caches the plan the
//! data store compiles for each shape, and runs it with the current call's
//! parameter values.
//!
//! Pipeline: tag non-deterministic calls → extract parameters → untag →
//! cache key → (miss: classify + compile) → execute.

use qshape_expr::EvalError;
use qshape_registry::ParseError;
use thiserror::Error;

pub mod compiled;
pub mod compiler;
pub mod config;
pub mod context;
pub mod evaluatable;
pub mod extract;
pub mod logging;
pub mod memory;
pub mod nondeterminism;
pub mod store;

pub use compiled::{CacheKey, CacheStats, CompiledQuery, MemoryPlanCache, NoPlanCache, PlanCache};
pub use compiler::QueryCompiler;
pub use config::{CacheConfig, Config, ConfigError, LoggingConfig};
pub use context::QueryContext;
pub use memory::MemoryStore;
pub use nondeterminism::NonDeterministicFunctions;
pub use store::{DataStore, ExecutionError, ExecutionMode, QueryExecutor, RowStream, Rows, StoreError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Failed to evaluate '{expression}' while extracting query parameters: {source}")]
    Parameterization {
        expression: String,
        source: EvalError,
    },

    #[error("Query parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    TargetCompilation(StoreError),

    #[error("Query execution failed: {0}")]
    Execution(#[source] ExecutionError),

    #[error("Sequence contains no elements")]
    EmptySequence,

    #[error("Query was cancelled")]
    Cancelled,
}
