//! Shared fixtures for qshape-cache integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use qshape_cache::{DataStore, ExecutionMode, MemoryStore, QueryExecutor, StoreError};
use qshape_expr::{
    parse_query, Closure, DataType, EvalError, Expr, ParseContext, QueryRoot, Record, SequenceSource, Value,
};
use qshape_ir::{EntityType, Model, QueryModel};

/// In-memory store that counts how often it is asked to compile
pub struct CountingStore {
    inner: MemoryStore,
    compiles: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            compiles: AtomicUsize::new(0),
        }
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl DataStore for CountingStore {
    fn model_identity(&self) -> &str {
        self.inner.model_identity()
    }

    fn compile(
        &self,
        query: &QueryModel,
        element_type: &DataType,
        mode: ExecutionMode,
    ) -> Result<QueryExecutor, StoreError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.inner.compile(query, element_type, mode)
    }
}

pub fn model() -> Model {
    Model::new()
        .with_entity(
            EntityType::new("Person", "people")
                .property("Id", DataType::Int)
                .property("Name", DataType::String)
                .property("Age", DataType::Int),
        )
        .with_entity(
            EntityType::new("Order", "orders")
                .property("Id", DataType::Int)
                .property("PersonId", DataType::Int)
                .property("Total", DataType::Float),
        )
        .with_set("people", "Person")
        .with_set("orders", "Order")
}

fn person(id: i64, name: &str, age: i64) -> Value {
    Value::Record(Record::new().with("Id", id).with("Name", name).with("Age", age))
}

fn order(id: i64, person_id: i64, total: f64) -> Value {
    Value::Record(Record::new().with("Id", id).with("PersonId", person_id).with("Total", total))
}

pub fn rows() -> HashMap<String, Vec<Value>> {
    HashMap::from([
        (
            "people".to_string(),
            vec![
                person(1, "Ann", 34),
                person(2, "Bob", 17),
                person(3, "Cid", 21),
                person(4, "Dee", 19),
            ],
        ),
        (
            "orders".to_string(),
            vec![order(10, 1, 25.5), order(11, 3, 8.0), order(12, 1, 4.25)],
        ),
    ])
}

pub fn counting_store() -> Arc<CountingStore> {
    let store = MemoryStore::new(model());
    for (set, rows) in rows() {
        store.insert(&set, rows).unwrap();
    }
    Arc::new(CountingStore::new(store))
}

/// Rows for direct evaluation of an uncompiled query
pub struct Fixture(pub HashMap<String, Vec<Value>>);

impl SequenceSource for Fixture {
    fn scan(&self, root: &QueryRoot) -> Result<Vec<Value>, EvalError> {
        Ok(self.0.get(&root.set).cloned().unwrap_or_default())
    }
}

pub fn closure() -> Closure {
    Closure::new("<>c__DisplayClass0_0")
}

/// Parse `source` with `captured` as the enclosing closure
pub fn query(source: &str, captured: Closure) -> Expr {
    let model = model();
    let ctx = ParseContext::new(&model).with_closure(Arc::new(captured));
    parse_query(source, &ctx).unwrap()
}
