//! In-memory data store
//!
//! Runs classified queries with LINQ-to-objects semantics over rows held in
//! memory. Compilation validates the query against the model once; each
//! execution scans a snapshot of the current rows.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

use qshape_expr::{
    methods, DataType, EvalError, Evaluator, Expr, ParameterValues, QueryRoot, SequenceSource, SortKey,
    TypeLookup, Value,
};
use qshape_ir::{Model, QueryModel, QueryOperation};

use crate::store::{DataStore, ExecutionMode, QueryExecutor, RowStream, Rows, StoreError};

/// Custom operations the in-memory store understands; all leave rows unchanged
const PASS_THROUGH: &[&str] = &["Include", "ThenInclude", "TagWith"];

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("Entity set '{0}' is not part of the model")]
    UnknownEntitySet(String),

    #[error("Operation '{0}' is not supported by the in-memory store")]
    UnsupportedOperation(String),
}

#[derive(Clone, Default)]
struct Tables(Arc<RwLock<HashMap<String, Vec<Value>>>>);

impl SequenceSource for Tables {
    fn scan(&self, root: &QueryRoot) -> Result<Vec<Value>, EvalError> {
        let tables = self.0.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get(&root.set).cloned().unwrap_or_default())
    }
}

pub struct MemoryStore {
    model: Arc<Model>,
    identity: String,
    tables: Tables,
}

impl MemoryStore {
    pub fn new(model: Model) -> Self {
        let identity = model.identity();
        Self {
            model: Arc::new(model),
            identity,
            tables: Tables::default(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Append rows to an entity set
    pub fn insert(&self, set: &str, rows: impl IntoIterator<Item = Value>) -> Result<(), MemoryStoreError> {
        if self.model.entity_set(set).is_none() {
            return Err(MemoryStoreError::UnknownEntitySet(set.to_string()));
        }
        let mut tables = self.tables.0.write().unwrap_or_else(PoisonError::into_inner);
        tables.entry(set.to_string()).or_default().extend(rows);
        Ok(())
    }

    fn validate(&self, query: &QueryModel) -> Result<(), MemoryStoreError> {
        let known = |root: &QueryRoot| {
            self.model
                .entity_set(&root.set)
                .map(|_| ())
                .ok_or_else(|| MemoryStoreError::UnknownEntitySet(root.set.clone()))
        };

        known(&query.source)?;
        for op in &query.operations {
            match op {
                QueryOperation::Join { inner, .. } => known(inner)?,
                QueryOperation::Custom { name, .. } if !PASS_THROUGH.contains(&name.as_str()) => {
                    return Err(MemoryStoreError::UnsupportedOperation(name.clone()));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl DataStore for MemoryStore {
    fn model_identity(&self) -> &str {
        &self.identity
    }

    fn compile(
        &self,
        query: &QueryModel,
        _element_type: &DataType,
        mode: ExecutionMode,
    ) -> Result<QueryExecutor, StoreError> {
        self.validate(query)?;

        let query = Arc::new(query.clone());
        let tables = self.tables.clone();

        let executor = match mode {
            ExecutionMode::Sync => QueryExecutor::sync(move |ctx| {
                let rows = run(&query, &tables, ctx.parameters())?;
                let rows: Rows = Box::new(rows.into_iter().map(Ok));
                Ok(rows)
            }),
            ExecutionMode::Async => QueryExecutor::streaming(move |ctx| {
                let rows = run(&query, &tables, ctx.parameters())?;
                let rows: RowStream = stream::iter(rows.into_iter().map(Ok)).boxed();
                Ok(rows)
            }),
        };
        Ok(executor)
    }
}

fn run(query: &QueryModel, tables: &Tables, parameters: &ParameterValues) -> Result<Vec<Value>, EvalError> {
    let evaluator = Evaluator::new().with_parameters(parameters).with_source(tables);

    let mut current = Value::List(tables.scan(&query.source)?);
    let mut operations = query.operations.iter().peekable();

    while let Some(op) = operations.next() {
        let Value::List(items) = current else {
            return Err(EvalError::TypeMismatch(format!(
                "{} cannot follow a terminal operation",
                op.name()
            )));
        };

        current = match op {
            QueryOperation::OrderBy { key, descending } => {
                let mut keys = vec![SortKey { selector: key, descending: *descending }];
                while let Some(QueryOperation::ThenBy { key, descending }) = operations.peek() {
                    keys.push(SortKey { selector: key, descending: *descending });
                    operations.next();
                }
                Value::List(evaluator.order(items, &keys)?)
            }
            QueryOperation::ThenBy { .. } => {
                return Err(EvalError::TypeMismatch("ThenBy requires an ordered sequence".to_string()));
            }
            QueryOperation::Join {
                inner,
                outer_key,
                inner_key,
                result,
            } => {
                let args = [
                    Expr::constant(Value::Query(inner.clone())),
                    outer_key.clone(),
                    inner_key.clone(),
                    result.clone(),
                ];
                evaluator.apply(&methods::JOIN, items, &args)?
            }
            other => {
                let args: Vec<Expr> = other.arguments().into_iter().cloned().collect();
                evaluator.apply(&methods::query_operator(other.name()), items, &args)?
            }
        };
    }

    Ok(match (query.result.is_single(), current) {
        (false, Value::List(items)) => items,
        (_, single) => vec![single],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::QueryContext;
    use qshape_expr::{BinOp, ParamDecl, Record};
    use qshape_ir::{EntityType, ResultShape};

    fn person() -> DataType {
        DataType::Entity("Person".into())
    }

    fn people() -> QueryRoot {
        QueryRoot {
            entity: "Person".into(),
            set: "people".into(),
        }
    }

    fn store() -> MemoryStore {
        let model = Model::new()
            .with_entity(
                EntityType::new("Person", "people")
                    .property("Name", DataType::String)
                    .property("Age", DataType::Int),
            )
            .with_set("people", "Person");
        let store = MemoryStore::new(model);
        store
            .insert(
                "people",
                [("Ann", 34), ("Bob", 17), ("Cid", 21)]
                    .map(|(name, age)| Value::Record(Record::new().with("Name", name).with("Age", age))),
            )
            .unwrap();
        store
    }

    fn member(name: &str, ty: DataType) -> Expr {
        Expr::lambda(
            vec![ParamDecl { name: "p".into(), ty: person() }],
            Expr::member(Expr::parameter("p", person()), name, ty),
        )
    }

    fn adults() -> QueryModel {
        let predicate = Expr::lambda(
            vec![ParamDecl { name: "p".into(), ty: person() }],
            Expr::binary(
                BinOp::Ge,
                Expr::member(Expr::parameter("p", person()), "Age", DataType::Int),
                Expr::parameter("__min_age_0", DataType::Int),
            ),
        );
        QueryModel {
            source: people(),
            operations: vec![
                QueryOperation::Where { predicate },
                QueryOperation::OrderBy {
                    key: member("Name", DataType::String),
                    descending: true,
                },
                QueryOperation::Select {
                    selector: member("Name", DataType::String),
                },
            ],
            result: ResultShape::Sequence(DataType::String),
        }
    }

    fn collect(executor: &QueryExecutor, ctx: &QueryContext) -> Vec<Value> {
        let QueryExecutor::Sync(run) = executor else {
            panic!("expected a sync executor");
        };
        run(ctx).unwrap().map(|row| row.unwrap()).collect()
    }

    #[test]
    fn test_runs_with_call_parameters() {
        let store = store();
        let executor = store.compile(&adults(), &DataType::String, ExecutionMode::Sync).unwrap();

        let mut ctx = QueryContext::new();
        ctx.add_parameter("__min_age_0", Value::Int(18));
        assert_eq!(collect(&executor, &ctx), vec![Value::from("Cid"), Value::from("Ann")]);

        let mut ctx = QueryContext::new();
        ctx.add_parameter("__min_age_0", Value::Int(30));
        assert_eq!(collect(&executor, &ctx), vec![Value::from("Ann")]);
    }

    #[test]
    fn test_terminal_operation_yields_one_row() {
        let query = QueryModel {
            source: people(),
            operations: vec![QueryOperation::Count { predicate: None }],
            result: ResultShape::Single(DataType::Int),
        };
        let executor = store().compile(&query, &DataType::Int, ExecutionMode::Sync).unwrap();
        assert_eq!(collect(&executor, &QueryContext::new()), vec![Value::Int(3)]);
    }

    #[test]
    fn test_rows_inserted_after_compile_are_visible() {
        let store = store();
        let query = QueryModel {
            source: people(),
            operations: vec![QueryOperation::Count { predicate: None }],
            result: ResultShape::Single(DataType::Int),
        };
        let executor = store.compile(&query, &DataType::Int, ExecutionMode::Sync).unwrap();
        store
            .insert("people", [Value::Record(Record::new().with("Name", "Dee").with("Age", 40))])
            .unwrap();
        assert_eq!(collect(&executor, &QueryContext::new()), vec![Value::Int(4)]);
    }

    #[test]
    fn test_unknown_custom_operation_fails_compile() {
        let query = QueryModel {
            source: people(),
            operations: vec![QueryOperation::Custom {
                name: "AsSplitQuery".into(),
                arguments: vec![],
            }],
            result: ResultShape::Sequence(person()),
        };
        let err = store().compile(&query, &person(), ExecutionMode::Sync).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MemoryStoreError>(),
            Some(MemoryStoreError::UnsupportedOperation(name)) if name == "AsSplitQuery"
        ));
    }

    #[test]
    fn test_insert_into_unknown_set() {
        assert!(matches!(
            store().insert("pets", []),
            Err(MemoryStoreError::UnknownEntitySet(_))
        ));
    }

    #[tokio::test]
    async fn test_async_mode_streams_rows() {
        use futures::TryStreamExt;

        let executor = store().compile(&adults(), &DataType::String, ExecutionMode::Async).unwrap();
        let QueryExecutor::Async(run) = executor else {
            panic!("expected a streaming executor");
        };
        let mut ctx = QueryContext::new();
        ctx.add_parameter("__min_age_0", Value::Int(21));
        let rows: Vec<Value> = run(&ctx).unwrap().try_collect().await.unwrap();
        assert_eq!(rows, vec![Value::from("Cid"), Value::from("Ann")]);
    }
}
