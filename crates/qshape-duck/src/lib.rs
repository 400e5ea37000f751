//! DuckDB data store
//!
//! Lowers each classified query shape to one SQL statement, prepares it
//! once so DuckDB validates it, and binds the call's placeholder values on
//! every execution.

use duckdb::types::Value as DuckValue;
use duckdb::{params_from_iter, Connection};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

use qshape_cache::{DataStore, ExecutionError, ExecutionMode, QueryExecutor, RowStream, Rows, StoreError};
use qshape_expr::{DataType, MethodId, ParameterValues, Record, Value};
use qshape_ir::{Model, QueryModel};
use qshape_registry::MethodTranslatorRegistry;

pub mod convert;
pub mod sql;

pub use sql::{Cardinality, Columns, SqlQuery};

#[derive(Debug, Error)]
pub enum DuckStoreError {
    #[error(transparent)]
    Database(#[from] duckdb::Error),

    #[error("Entity set '{0}' is not part of the model")]
    UnknownEntitySet(String),

    #[error("Entity '{entity}' has no property '{property}'")]
    UnknownProperty { entity: String, property: String },

    #[error("No translator accepts method {0}")]
    UntranslatableMethod(MethodId),

    #[error("Not supported by the DuckDB store: {0}")]
    Unsupported(String),

    #[error("No value bound for parameter '{0}'")]
    UnboundParameter(String),

    #[error("Cannot bind a value of type {0}")]
    UnsupportedParameter(DataType),

    #[error("Cannot decode column: {0}")]
    UnsupportedColumn(String),

    #[error("Sequence contains no elements")]
    EmptySequence,
}

pub struct DuckStore {
    conn: Arc<Mutex<Connection>>,
    model: Model,
    identity: String,
    translators: MethodTranslatorRegistry,
}

impl DuckStore {
    pub fn new(conn: Connection, model: Model) -> Self {
        let identity = model.identity();
        Self {
            conn: Arc::new(Mutex::new(conn)),
            model,
            identity,
            translators: MethodTranslatorRegistry::with_defaults(),
        }
    }

    pub fn open_in_memory(model: Model) -> Result<Self, DuckStoreError> {
        Ok(Self::new(Connection::open_in_memory()?, model))
    }

    /// Replace the method translators used when lowering calls
    pub fn with_translators(mut self, translators: MethodTranslatorRegistry) -> Self {
        self.translators = translators;
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Run setup statements (DDL, seed data) on the store's connection
    pub fn execute_batch(&self, sql: &str) -> Result<(), DuckStoreError> {
        lock(&self.conn).execute_batch(sql)?;
        Ok(())
    }

    /// Lower a classified query without preparing it
    pub fn to_sql(&self, query: &QueryModel) -> Result<SqlQuery, DuckStoreError> {
        sql::lower(&self.model, &self.translators, query)
    }
}

impl DataStore for DuckStore {
    fn model_identity(&self) -> &str {
        &self.identity
    }

    fn compile(
        &self,
        query: &QueryModel,
        _element_type: &DataType,
        mode: ExecutionMode,
    ) -> Result<QueryExecutor, StoreError> {
        let plan = self.to_sql(query)?;
        debug!(sql = %plan.sql, parameters = ?plan.parameters, "lowered query");

        // Invalid SQL surfaces here as the raw duckdb::Error
        lock(&self.conn).prepare_cached(&plan.sql)?;

        let plan = Arc::new(plan);
        let conn = self.conn.clone();

        let executor = match mode {
            ExecutionMode::Sync => QueryExecutor::sync(move |ctx| {
                let values = bind(&plan, ctx.parameters())?;
                let rows = run(&conn, &plan, values)?;
                let rows: Rows = Box::new(rows.into_iter().map(Ok));
                Ok(rows)
            }),
            ExecutionMode::Async => QueryExecutor::streaming(move |ctx| {
                let values = bind(&plan, ctx.parameters())?;
                let conn = conn.clone();
                let plan = plan.clone();

                let rows = async move {
                    match tokio::task::spawn_blocking(move || run(&conn, &plan, values)).await {
                        Ok(rows) => rows.map_err(ExecutionError::from),
                        Err(join) => Err(ExecutionError::from(join)),
                    }
                };
                let rows: RowStream = stream::once(rows)
                    .map_ok(|rows| stream::iter(rows.into_iter().map(Ok)))
                    .try_flatten()
                    .boxed();
                Ok(rows)
            }),
        };
        Ok(executor)
    }
}

fn lock(conn: &Mutex<Connection>) -> std::sync::MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolve placeholder values in statement order
fn bind(plan: &SqlQuery, parameters: &ParameterValues) -> Result<Vec<DuckValue>, DuckStoreError> {
    plan.parameters
        .iter()
        .map(|name| {
            let value = parameters
                .get(name)
                .ok_or_else(|| DuckStoreError::UnboundParameter(name.clone()))?;
            convert::to_duck(value)
        })
        .collect()
}

fn run(conn: &Mutex<Connection>, plan: &SqlQuery, values: Vec<DuckValue>) -> Result<Vec<Value>, DuckStoreError> {
    let conn = lock(conn);
    let mut stmt = conn.prepare_cached(&plan.sql)?;
    let mut rows = stmt.query(params_from_iter(values))?;

    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        let value = match &plan.columns {
            Columns::Scalar(ty) => convert::decode(row.get_ref(0)?, ty)?,
            Columns::Record(fields) => {
                let mut record = Record::new();
                for (i, (name, ty)) in fields.iter().enumerate() {
                    record = record.with(name.clone(), convert::decode(row.get_ref(i)?, ty)?);
                }
                Value::Record(record)
            }
        };
        results.push(value);
    }

    match plan.cardinality {
        Cardinality::First { or_default: true } if results.is_empty() => Ok(vec![Value::Null]),
        Cardinality::First { .. } if results.is_empty() => Err(DuckStoreError::EmptySequence),
        _ => Ok(results),
    }
}
