//! Non-determinism tagging
//!
//! Calls such as `Guid.NewGuid()` look like closed expressions but must run
//! on every execution. Wrapping them in [`Expr::NonDeterministic`] makes
//! them opaque to evaluatability analysis so they are never folded into a
//! parameter value and cached as part of the plan.

use std::collections::HashSet;

use qshape_expr::{methods, Expr, MethodId};

#[derive(Debug, Clone)]
pub struct NonDeterministicFunctions {
    methods: HashSet<MethodId>,
}

impl Default for NonDeterministicFunctions {
    fn default() -> Self {
        Self {
            methods: HashSet::from([
                methods::GUID_NEW_GUID,
                methods::DATETIME_NOW,
                methods::DATETIME_UTC_NOW,
            ]),
        }
    }
}

impl NonDeterministicFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: MethodId) {
        self.methods.insert(method);
    }

    pub fn contains(&self, method: &MethodId) -> bool {
        self.methods.contains(method)
    }

    /// Wrap every registered call that is not bound to a queryable receiver or argument
    pub fn tag(&self, expr: &Expr) -> Expr {
        let rebuilt = expr.map_children(|child| self.tag(child));

        let wrap = match &rebuilt {
            Expr::Call { method, instance, args, .. } => {
                self.contains(method)
                    && !instance.iter().any(|i| i.ty().is_queryable())
                    && !args.iter().any(|a| a.ty().is_queryable())
            }
            _ => false,
        };

        if wrap {
            Expr::NonDeterministic(Box::new(rebuilt))
        } else {
            rebuilt
        }
    }
}

/// Remove every tag, restoring the original calls
pub fn untag(expr: &Expr) -> Expr {
    match expr {
        Expr::NonDeterministic(inner) => untag(inner),
        other => other.map_children(untag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_expr::{BinOp, DataType};

    fn new_guid() -> Expr {
        Expr::call(methods::GUID_NEW_GUID, vec![], DataType::Uuid)
    }

    #[test]
    fn test_tag_and_untag() {
        let expr = Expr::binary(BinOp::Eq, Expr::parameter("id", DataType::Uuid), new_guid());
        let tagged = NonDeterministicFunctions::new().tag(&expr);

        assert!(tagged.any(&|e| matches!(e, Expr::NonDeterministic(_))));
        assert_eq!(untag(&tagged), expr);
    }

    #[test]
    fn test_registered_function_is_tagged() {
        let random = MethodId::new("Random", "Next");
        let call = Expr::call(random.clone(), vec![], DataType::Int);

        let mut functions = NonDeterministicFunctions::new();
        assert_eq!(functions.tag(&call), call);

        functions.register(random);
        assert!(matches!(functions.tag(&call), Expr::NonDeterministic(_)));
    }

    #[test]
    fn test_queryable_argument_is_not_tagged() {
        let sample = MethodId::new("Queryable", "Now");
        let mut functions = NonDeterministicFunctions::new();
        functions.register(sample.clone());

        let source = Expr::parameter("people", DataType::queryable(DataType::Entity("Person".into())));
        let call = Expr::call(sample, vec![source], DataType::Timestamp);
        assert_eq!(functions.tag(&call), call);
    }
}
