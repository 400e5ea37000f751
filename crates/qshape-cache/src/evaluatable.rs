//! Evaluatability analysis
//!
//! Computes, for every node, whether it can be evaluated on the client
//! before the query runs. The result is a tree parallel to the expression,
//! children in [`Expr::children`] order.

use qshape_expr::Expr;

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluability {
    pub evaluatable: bool,
    pub children: Vec<Evaluability>,
}

/// A node is evaluatable when it references no parameter, carries no
/// non-determinism tag, is not a queryable constant, and every child is
/// evaluatable.
pub fn analyze(expr: &Expr) -> Evaluability {
    let mut children: Vec<Evaluability> = expr.children().into_iter().map(analyze).collect();

    let own = match expr {
        Expr::NonDeterministic(_) => {
            // The tagged call itself is opaque; its arguments are not
            for child in &mut children {
                child.evaluatable = false;
            }
            false
        }
        Expr::Parameter { .. } => false,
        Expr::Constant { ty, .. } => !ty.is_queryable(),
        _ => true,
    };

    Evaluability {
        evaluatable: own && children.iter().all(|c| c.evaluatable),
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_expr::{methods, BinOp, Closure, DataType, ParamDecl, QueryRoot, Value};

    #[test]
    fn test_captured_member_inside_lambda() {
        let closure = Closure::new("<>c__DisplayClass0_0").with("min_age", 18);
        let captured = Expr::member(Expr::constant(closure), "min_age", DataType::Int);
        let p = Expr::parameter("p", DataType::Entity("Person".into()));
        let lambda = Expr::lambda(
            vec![ParamDecl { name: "p".into(), ty: DataType::Entity("Person".into()) }],
            Expr::binary(BinOp::Gt, Expr::member(p, "Age", DataType::Int), captured),
        );

        let result = analyze(&lambda);
        assert!(!result.evaluatable);

        let body = &result.children[0];
        assert!(!body.evaluatable);
        assert!(!body.children[0].evaluatable);
        assert!(body.children[1].evaluatable);
    }

    #[test]
    fn test_tagged_and_queryable_are_opaque() {
        let tagged = Expr::NonDeterministic(Box::new(Expr::call(methods::GUID_NEW_GUID, vec![], DataType::Uuid)));
        let result = analyze(&tagged);
        assert!(!result.evaluatable);
        assert!(!result.children[0].evaluatable);

        let root = Expr::constant(Value::Query(QueryRoot {
            entity: "Person".into(),
            set: "people".into(),
        }));
        assert!(!analyze(&root).evaluatable);

        let pow = Expr::call(methods::MATH_POW, vec![Expr::constant(2), Expr::constant(8)], DataType::Float);
        assert!(analyze(&pow).evaluatable);
    }
}
