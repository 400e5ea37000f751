//! Data store contract
//!
//! A store turns a classified [`QueryModel`] into an executor once; the
//! executor then runs any number of times against per-call parameter values.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use qshape_expr::{DataType, Value};
use qshape_ir::QueryModel;

use crate::context::QueryContext;

/// Error raised by a store while compiling. Kept boxed so callers can downcast
/// to the store's own error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

pub type ExecutionError = Box<dyn std::error::Error + Send + Sync>;

pub type Rows = Box<dyn Iterator<Item = Result<Value, ExecutionError>> + Send>;

pub type RowStream = BoxStream<'static, Result<Value, ExecutionError>>;

type SyncFn = dyn Fn(&QueryContext) -> Result<Rows, ExecutionError> + Send + Sync;
type AsyncFn = dyn Fn(&QueryContext) -> Result<RowStream, ExecutionError> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    Sync,
    Async,
}

/// Compiled, reusable entry point into the store
#[derive(Clone)]
pub enum QueryExecutor {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl QueryExecutor {
    pub fn sync<F>(run: F) -> Self
    where
        F: Fn(&QueryContext) -> Result<Rows, ExecutionError> + Send + Sync + 'static,
    {
        QueryExecutor::Sync(Arc::new(run))
    }

    pub fn streaming<F>(run: F) -> Self
    where
        F: Fn(&QueryContext) -> Result<RowStream, ExecutionError> + Send + Sync + 'static,
    {
        QueryExecutor::Async(Arc::new(run))
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            QueryExecutor::Sync(_) => ExecutionMode::Sync,
            QueryExecutor::Async(_) => ExecutionMode::Async,
        }
    }
}

impl fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryExecutor::{:?}", self.mode())
    }
}

pub trait DataStore: Send + Sync {
    /// Identity of the model this store compiles against; part of every cache key
    fn model_identity(&self) -> &str;

    fn compile(
        &self,
        query: &QueryModel,
        element_type: &DataType,
        mode: ExecutionMode,
    ) -> Result<QueryExecutor, StoreError>;
}
