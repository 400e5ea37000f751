//! Query-shape parser: call chain -> [`QueryModel`]

use std::sync::Arc;

use qshape_expr::{DataType, Expr, MethodId, Value};
use qshape_ir::{QueryModel, QueryOperation, ResultShape};

use crate::nodes::{default_node_types, NodeTypeProvider};
use crate::ParseError;

#[derive(Clone)]
pub struct QueryParser {
    node_types: Arc<dyn NodeTypeProvider>,
}

impl QueryParser {
    pub fn new(node_types: Arc<dyn NodeTypeProvider>) -> Self {
        Self { node_types }
    }

    /// Walk the call chain down to its queryable source, classifying every
    /// call on a queryable receiver.
    pub fn parse(&self, shape: &Expr) -> Result<QueryModel, ParseError> {
        let mut calls: Vec<(&MethodId, &[Expr])> = Vec::new();
        let mut current = shape;

        let source = loop {
            match current {
                Expr::Call { method, instance: None, args, .. }
                    if args.first().is_some_and(|receiver| receiver.ty().is_queryable()) =>
                {
                    calls.push((method, &args[1..]));
                    current = &args[0];
                }
                Expr::Constant { value: Value::Query(root), .. } => break root.clone(),
                other => return Err(ParseError::MissingSource(other.to_string())),
            }
        };

        let mut operations: Vec<QueryOperation> = Vec::with_capacity(calls.len());
        for (method, args) in calls.into_iter().rev() {
            let builder = self
                .node_types
                .node_type(method)
                .ok_or_else(|| ParseError::UnclassifiedOperation { method: method.clone() })?;
            operations.push(builder.build(method, args)?);
        }

        let shape_ty = shape.ty();
        let result = match operations.last() {
            Some(op) if op.is_terminal() => ResultShape::Single(shape_ty),
            _ => ResultShape::Sequence(shape_ty.element_type().cloned().unwrap_or(DataType::Unknown)),
        };

        Ok(QueryModel { source, operations, result })
    }
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new(Arc::new(default_node_types()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_expr::{methods, parse_query, Closure, ParseContext};
    use qshape_ir::{EntityType, Model};

    fn model() -> Model {
        Model::new()
            .with_entity(
                EntityType::new("Person", "person")
                    .property("Name", DataType::String)
                    .property("Age", DataType::Int),
            )
            .with_set("people", "Person")
    }

    fn shape(text: &str) -> Expr {
        let model = model();
        let closure = Arc::new(Closure::new("<>c__DisplayClass0_0").with("min_age", 18));
        parse_query(text, &ParseContext::new(&model).with_closure(closure)).unwrap()
    }

    #[test]
    fn test_parse_chain_in_source_order() {
        let query = QueryParser::default()
            .parse(&shape("people.Where(p => p.Age > min_age).OrderByDescending(p => p.Age).Select(p => p.Name)"))
            .unwrap();

        assert_eq!(query.source.set, "people");
        let names: Vec<&str> = query.operations.iter().map(QueryOperation::name).collect();
        assert_eq!(names, vec!["Where", "OrderByDescending", "Select"]);
        assert_eq!(query.result, ResultShape::Sequence(DataType::String));
    }

    #[test]
    fn test_terminal_result_is_single() {
        let query = QueryParser::default().parse(&shape("people.Count(p => p.Age > 3)")).unwrap();
        assert_eq!(query.result, ResultShape::Single(DataType::Int));
    }

    #[test]
    fn test_extension_operations_are_custom() {
        let query = QueryParser::default()
            .parse(&shape("people.TagWith(\"dashboard\").Take(3)"))
            .unwrap();
        assert_eq!(
            query.operations[0],
            QueryOperation::Custom {
                name: "TagWith".into(),
                arguments: vec![Expr::constant("dashboard")],
            }
        );
    }

    #[test]
    fn test_unclassified_operation() {
        let err = QueryParser::default()
            .parse(&shape("people.Frobnicate(p => p.Age)"))
            .unwrap_err();
        match err {
            ParseError::UnclassifiedOperation { method } => {
                assert_eq!(method, methods::query_operator("Frobnicate"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_chain_on_terminal_result_has_no_source() {
        let first = Expr::call(
            methods::FIRST,
            vec![shape("people")],
            DataType::Entity("Person".into()),
        );
        // a terminal result is not queryable, so nothing can chain onto it
        let chained = Expr::call(methods::TAKE, vec![first, Expr::constant(1)], DataType::Unknown);
        assert!(matches!(
            QueryParser::default().parse(&chained),
            Err(ParseError::MissingSource(_))
        ));
    }
}
