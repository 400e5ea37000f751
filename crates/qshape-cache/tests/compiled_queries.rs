//! End-to-end behavior of the compiled-query cache over the in-memory store

mod common;

use std::sync::Arc;

use common::{closure, counting_store, query, rows, Fixture};
use qshape_cache::memory::MemoryStoreError;
use qshape_cache::{extract, ExecutionMode, QueryCompiler, QueryContext, QueryError};
use qshape_expr::{methods, BinOp, Closure, DataType, Evaluator, Expr, ParamDecl, ParameterValues, QueryRoot, Value};
use qshape_registry::{
    default_node_types, CompoundNodeTypeProvider, MethodNameBasedNodeTypeRegistry, ParseError, QueryParser,
};

const ADULT_NAMES: &str = "people.Where(p => p.Age > min_age).Select(p => p.Name)";

fn person() -> DataType {
    DataType::Entity("Person".into())
}

fn people() -> Expr {
    Expr::constant(Value::Query(QueryRoot {
        entity: "Person".into(),
        set: "people".into(),
    }))
}

/// `people.Where(p => p.<member> > bound)` built without the text front end
fn where_member_gt(member: &str, ty: DataType, bound: Expr) -> Expr {
    let predicate = Expr::lambda(
        vec![ParamDecl { name: "p".into(), ty: person() }],
        Expr::binary(BinOp::Gt, Expr::member(Expr::parameter("p", person()), member, ty), bound),
    );
    Expr::call(methods::WHERE, vec![people(), predicate], DataType::queryable(person()))
}

fn names(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

#[test]
fn test_structurally_identical_calls_compile_once() {
    let store = counting_store();
    let compiler = QueryCompiler::new(store.clone());

    for min_age in [16, 18, 20, 30, 40] {
        let expr = query(ADULT_NAMES, closure().with("min_age", min_age));
        compiler.execute(&expr, &mut QueryContext::new()).unwrap();
    }

    assert_eq!(store.compiles(), 1);
    let stats = compiler.cache().stats();
    assert_eq!((stats.hits, stats.misses), (4, 1));
}

#[test]
fn test_different_members_produce_different_keys() {
    let store = counting_store();
    let compiler = QueryCompiler::new(store.clone());

    let by_name = query("people.Where(p => p.Name == value)", closure().with("value", "Ann"));
    let by_id = query("people.Where(p => p.Id == value)", closure().with("value", 1));

    let first = compiler
        .compile_and_get(&by_name, &mut QueryContext::new(), ExecutionMode::Sync)
        .unwrap();
    let second = compiler
        .compile_and_get(&by_id, &mut QueryContext::new(), ExecutionMode::Sync)
        .unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(store.compiles(), 2);
}

#[test]
fn test_captured_values_share_one_artifact() {
    let store = counting_store();
    let compiler = QueryCompiler::new(store.clone());

    let mut first_ctx = QueryContext::new();
    let eighteen = query(ADULT_NAMES, closure().with("min_age", 18));
    let first = compiler
        .compile_and_get(&eighteen, &mut first_ctx, ExecutionMode::Sync)
        .unwrap();

    let mut second_ctx = QueryContext::new();
    let twenty_one = query(ADULT_NAMES, closure().with("min_age", 21));
    let second = compiler
        .compile_and_get(&twenty_one, &mut second_ctx, ExecutionMode::Sync)
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first_ctx.parameters().get("__min_age_0"), Some(&Value::Int(18)));
    assert_eq!(second_ctx.parameters().get("__min_age_0"), Some(&Value::Int(21)));

    let rows = compiler.execute(&eighteen, &mut QueryContext::new()).unwrap();
    assert_eq!(rows, names(&["Ann", "Cid", "Dee"]));
    let rows = compiler.execute(&twenty_one, &mut QueryContext::new()).unwrap();
    assert_eq!(rows, names(&["Ann"]));

    assert_eq!(store.compiles(), 1);
}

#[test]
fn test_execution_mode_is_part_of_the_key() {
    let store = counting_store();
    let compiler = QueryCompiler::new(store.clone());
    let expr = query(ADULT_NAMES, closure().with("min_age", 18));

    compiler.execute(&expr, &mut QueryContext::new()).unwrap();
    compiler.execute_stream(&expr, &mut QueryContext::new()).unwrap();

    assert_eq!(store.compiles(), 2);
}

#[test]
fn test_compiled_results_match_direct_evaluation() {
    let compiler = QueryCompiler::new(counting_store());
    let fixture = Fixture(rows());

    let sources = [
        "people.Where(p => p.Age >= min_age).OrderBy(p => p.Name).Select(p => p.Name)",
        "people.Where(p => p.Age > min_age).Count()",
        "people.OrderByDescending(p => p.Age).ThenBy(p => p.Name).Skip(1).Take(2)",
        "people.Join(orders, p => p.Id, o => o.PersonId, (p, o) => new { p.Name, o.Total })",
        "people.Select(p => new { p.Name, Squared = Math.Pow(p.Age, 2) })",
        "people.Any(p => p.Name.StartsWith(\"C\"))",
        "people.Where(p => p.Age + 1 > min_age * 2).Select(p => p.Name.ToUpper())",
    ];

    for source in sources {
        let expr = query(source, closure().with("min_age", 18));
        let direct = Evaluator::new().with_source(&fixture).evaluate(&expr).unwrap();

        match direct {
            Value::List(expected) => {
                let actual = compiler.execute(&expr, &mut QueryContext::new()).unwrap();
                assert_eq!(actual, expected, "{}", source);
            }
            expected => {
                let actual = compiler.execute_scalar(&expr, &mut QueryContext::new()).unwrap();
                assert_eq!(actual, expected, "{}", source);
            }
        }
    }
}

#[test]
fn test_new_guid_runs_on_every_execution() {
    let store = counting_store();
    let compiler = QueryCompiler::new(store.clone());
    let expr = query("people.Select(p => new { p.Name, Token = Guid.NewGuid() })", closure());

    let mut tokens = Vec::new();
    for _ in 0..2 {
        for row in compiler.execute(&expr, &mut QueryContext::new()).unwrap() {
            let Value::Record(record) = row else {
                panic!("expected a record row");
            };
            match record.get("Token") {
                Some(Value::Uuid(token)) => tokens.push(*token),
                other => panic!("expected a uuid token, found {:?}", other),
            }
        }
    }

    assert_eq!(tokens.len(), 8);
    let mut unique = tokens.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), tokens.len());
    assert_eq!(store.compiles(), 1);
}

#[test]
fn test_datetime_now_is_read_per_execution() {
    let store = counting_store();
    let compiler = QueryCompiler::new(store.clone());
    let expr = query("people.Select(p => DateTime.Now())", closure());

    let mut runs = Vec::new();
    for _ in 0..2 {
        let stamps: Vec<_> = compiler
            .execute(&expr, &mut QueryContext::new())
            .unwrap()
            .into_iter()
            .map(|row| match row {
                Value::Timestamp(stamp) => stamp,
                other => panic!("expected a timestamp, found {:?}", other),
            })
            .collect();
        assert_eq!(stamps.len(), 4);
        runs.push(stamps);
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    let first_run_latest = runs[0].iter().max().unwrap();
    let second_run_earliest = runs[1].iter().min().unwrap();
    assert!(first_run_latest < second_run_earliest);
    assert_eq!(store.compiles(), 1);
}

#[test]
fn test_unclassified_operation_is_rejected() {
    let store = counting_store();
    let compiler = QueryCompiler::new(store.clone());
    let expr = Expr::call(
        methods::query_operator("Frobnicate"),
        vec![people()],
        DataType::queryable(person()),
    );

    let err = compiler.execute(&expr, &mut QueryContext::new()).unwrap_err();
    match err {
        QueryError::Parse(ParseError::UnclassifiedOperation { method }) => {
            assert_eq!(method.name(), "Frobnicate");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.compiles(), 0);
}

#[test]
fn test_store_compile_error_is_transparent() {
    let mut extensions = MethodNameBasedNodeTypeRegistry::new();
    extensions.register_custom(&["Frobnicate"]);
    let node_types = CompoundNodeTypeProvider::new(vec![Arc::new(default_node_types()), Arc::new(extensions)]);

    let compiler = QueryCompiler::new(counting_store()).with_parser(QueryParser::new(Arc::new(node_types)));
    let expr = Expr::call(
        methods::query_operator("Frobnicate"),
        vec![people()],
        DataType::queryable(person()),
    );

    let err = compiler.execute(&expr, &mut QueryContext::new()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Operation 'Frobnicate' is not supported by the in-memory store"
    );
    let QueryError::TargetCompilation(source) = err else {
        panic!("expected a store compilation error");
    };
    assert!(matches!(
        source.downcast_ref::<MemoryStoreError>(),
        Some(MemoryStoreError::UnsupportedOperation(_))
    ));
}

#[test]
fn test_failed_member_read_reports_expression() {
    let store = counting_store();
    let compiler = QueryCompiler::new(store.clone());

    let customer = Expr::member(
        Expr::constant(closure().with("customer", Value::Null)),
        "customer",
        DataType::Object,
    );
    let expr = where_member_gt("Id", DataType::Int, Expr::member(customer, "Id", DataType::Int));

    let err = compiler.execute(&expr, &mut QueryContext::new()).unwrap_err();
    match err {
        QueryError::Parameterization { expression, .. } => {
            assert_eq!(expression, "value(<>c__DisplayClass0_0).customer.Id");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.compiles(), 0);
}

#[test]
fn test_nested_closure_placeholder_name() {
    let compiler = QueryCompiler::new(counting_store());
    let inner = closure().with("min_age", 18);
    let outer = Closure::new("<>c__DisplayClass0_1").with("<>8__locals1", inner);
    let expr = query("people.Where(p => p.Age > min_age).Select(p => p.Name)", outer);

    let mut ctx = QueryContext::new();
    let rows = compiler.execute(&expr, &mut ctx).unwrap();

    assert_eq!(rows, names(&["Ann", "Cid", "Dee"]));
    assert_eq!(
        ctx.parameters().names().collect::<Vec<_>>(),
        vec!["__8__locals1_min_age_0"]
    );
}

#[test]
fn test_object_typed_capture_is_converted_back() {
    let threshold = Expr::member(
        Expr::constant(closure().with_typed("threshold", DataType::Object, 18)),
        "threshold",
        DataType::Object,
    );
    let expr = where_member_gt("Age", DataType::Int, threshold);

    let mut params = ParameterValues::new();
    let shape = extract::extract(&expr, &mut params).unwrap();
    assert!(shape
        .to_string()
        .contains("(p.Age > Convert<int, object>(__threshold_0))"));

    let compiler = QueryCompiler::new(counting_store());
    let rows = compiler.execute(&expr, &mut QueryContext::new()).unwrap();
    assert_eq!(rows.len(), 3);
}

#[test]
fn test_concurrent_callers_share_the_cache() {
    let store = counting_store();
    let compiler = QueryCompiler::new(store.clone());

    std::thread::scope(|scope| {
        for min_age in 15..23 {
            let compiler = &compiler;
            scope.spawn(move || {
                let expr = query(ADULT_NAMES, closure().with("min_age", min_age));
                let rows = compiler.execute(&expr, &mut QueryContext::new()).unwrap();
                let expected = [("Ann", 34), ("Bob", 17), ("Cid", 21), ("Dee", 19)]
                    .iter()
                    .filter(|(_, age)| *age > min_age)
                    .count();
                assert_eq!(rows.len(), expected);
            });
        }
    });

    // Racing misses may each compile; only one artifact is kept
    assert!(store.compiles() >= 1);
    assert_eq!(compiler.cache().stats().size, 1);
}

#[tokio::test]
async fn test_execute_scalar_async() {
    let compiler = QueryCompiler::new(counting_store());
    let expr = query("people.Count(p => p.Age > min_age)", closure().with("min_age", 18));

    let count = compiler
        .execute_scalar_async(&expr, &mut QueryContext::new(), std::future::pending())
        .await
        .unwrap();
    assert_eq!(count, Value::Int(3));

    let (cancel, cancelled) = tokio::sync::oneshot::channel::<()>();
    drop(cancel);
    let err = compiler
        .execute_scalar_async(&expr, &mut QueryContext::new(), async {
            cancelled.await.ok();
        })
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Cancelled));
}
