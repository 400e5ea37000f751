//! Node classification registries
//!
//! A [`NodeTypeProvider`] maps a query call's method identity to the builder
//! of its [`QueryOperation`]. Exact identities are probed first, then method
//! names, so extension operations declared on other owners still classify.

use std::collections::HashMap;
use std::sync::Arc;

use qshape_expr::{methods, Expr, MethodId, Value};
use qshape_ir::QueryOperation;

use crate::ParseError;

/// Builds a classified operation from a call's arguments (source excluded)
pub trait OperationBuilder: Send + Sync {
    fn build(&self, method: &MethodId, args: &[Expr]) -> Result<QueryOperation, ParseError>;
}

impl<F> OperationBuilder for F
where
    F: Fn(&MethodId, &[Expr]) -> Result<QueryOperation, ParseError> + Send + Sync,
{
    fn build(&self, method: &MethodId, args: &[Expr]) -> Result<QueryOperation, ParseError> {
        self(method, args)
    }
}

/// Wrap a closure as an [`OperationBuilder`]
pub fn operation<F>(build: F) -> Arc<dyn OperationBuilder>
where
    F: Fn(&MethodId, &[Expr]) -> Result<QueryOperation, ParseError> + Send + Sync + 'static,
{
    Arc::new(build)
}

pub trait NodeTypeProvider: Send + Sync {
    fn node_type(&self, method: &MethodId) -> Option<Arc<dyn OperationBuilder>>;
}

/// Classification by exact method identity
#[derive(Clone, Default)]
pub struct MethodInfoBasedNodeTypeRegistry {
    builders: HashMap<MethodId, Arc<dyn OperationBuilder>>,
}

impl MethodInfoBasedNodeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the standard query operators
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    pub fn register(&mut self, methods: &[MethodId], builder: Arc<dyn OperationBuilder>) {
        for method in methods {
            self.builders.insert(method.clone(), builder.clone());
        }
    }

    fn register_builtins(&mut self) {
        self.register(
            &[methods::WHERE],
            operation(|m, args| {
                let [predicate] = exact::<1>(m, args)?;
                Ok(QueryOperation::Where { predicate: predicate.clone() })
            }),
        );
        self.register(
            &[methods::SELECT],
            operation(|m, args| {
                let [selector] = exact::<1>(m, args)?;
                Ok(QueryOperation::Select { selector: selector.clone() })
            }),
        );
        self.register(
            &[methods::ORDER_BY, methods::ORDER_BY_DESCENDING],
            operation(|m, args| {
                let [key] = exact::<1>(m, args)?;
                Ok(QueryOperation::OrderBy {
                    key: key.clone(),
                    descending: *m == methods::ORDER_BY_DESCENDING,
                })
            }),
        );
        self.register(
            &[methods::THEN_BY, methods::THEN_BY_DESCENDING],
            operation(|m, args| {
                let [key] = exact::<1>(m, args)?;
                Ok(QueryOperation::ThenBy {
                    key: key.clone(),
                    descending: *m == methods::THEN_BY_DESCENDING,
                })
            }),
        );
        self.register(
            &[methods::SKIP],
            operation(|m, args| {
                let [count] = exact::<1>(m, args)?;
                Ok(QueryOperation::Skip { count: count.clone() })
            }),
        );
        self.register(
            &[methods::TAKE],
            operation(|m, args| {
                let [count] = exact::<1>(m, args)?;
                Ok(QueryOperation::Take { count: count.clone() })
            }),
        );
        self.register(
            &[methods::DISTINCT],
            operation(|m, args| {
                let [] = exact::<0>(m, args)?;
                Ok(QueryOperation::Distinct)
            }),
        );
        self.register(
            &[methods::JOIN],
            operation(|m, args| {
                let [inner, outer_key, inner_key, result] = exact::<4>(m, args)?;
                let inner = match inner {
                    Expr::Constant { value: Value::Query(root), .. } => root.clone(),
                    other => return Err(ParseError::UnsupportedJoinSource(other.to_string())),
                };
                Ok(QueryOperation::Join {
                    inner,
                    outer_key: outer_key.clone(),
                    inner_key: inner_key.clone(),
                    result: result.clone(),
                })
            }),
        );
        self.register(
            &[methods::COUNT],
            operation(|m, args| {
                Ok(QueryOperation::Count { predicate: optional(m, args)? })
            }),
        );
        self.register(
            &[methods::ANY],
            operation(|m, args| {
                Ok(QueryOperation::Any { predicate: optional(m, args)? })
            }),
        );
        self.register(
            &[methods::FIRST, methods::FIRST_OR_DEFAULT],
            operation(|m, args| {
                Ok(QueryOperation::First {
                    predicate: optional(m, args)?,
                    or_default: *m == methods::FIRST_OR_DEFAULT,
                })
            }),
        );
        self.register(
            &[methods::SINGLE],
            operation(|m, args| {
                Ok(QueryOperation::Single { predicate: optional(m, args)? })
            }),
        );
    }
}

impl NodeTypeProvider for MethodInfoBasedNodeTypeRegistry {
    fn node_type(&self, method: &MethodId) -> Option<Arc<dyn OperationBuilder>> {
        self.builders.get(method).cloned()
    }
}

/// Classification by method name alone, ignoring the declaring owner
#[derive(Clone, Default)]
pub struct MethodNameBasedNodeTypeRegistry {
    builders: HashMap<String, Arc<dyn OperationBuilder>>,
}

impl MethodNameBasedNodeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, names: &[&str], builder: Arc<dyn OperationBuilder>) {
        for name in names {
            self.builders.insert((*name).to_string(), builder.clone());
        }
    }

    /// Register names whose calls become [`QueryOperation::Custom`] with their arguments
    pub fn register_custom(&mut self, names: &[&str]) {
        self.register(names, Arc::new(custom_operation));
    }
}

impl NodeTypeProvider for MethodNameBasedNodeTypeRegistry {
    fn node_type(&self, method: &MethodId) -> Option<Arc<dyn OperationBuilder>> {
        self.builders.get(method.name()).cloned()
    }
}

/// Probes providers in order; the first one that classifies wins
#[derive(Clone, Default)]
pub struct CompoundNodeTypeProvider {
    providers: Vec<Arc<dyn NodeTypeProvider>>,
}

impl CompoundNodeTypeProvider {
    pub fn new(providers: Vec<Arc<dyn NodeTypeProvider>>) -> Self {
        Self { providers }
    }

    pub fn push(&mut self, provider: Arc<dyn NodeTypeProvider>) {
        self.providers.push(provider);
    }
}

impl NodeTypeProvider for CompoundNodeTypeProvider {
    fn node_type(&self, method: &MethodId) -> Option<Arc<dyn OperationBuilder>> {
        self.providers.iter().find_map(|p| p.node_type(method))
    }
}

/// Standard operators by identity, then the `Include`, `ThenInclude` and `TagWith`
/// extensions by name
pub fn default_node_types() -> CompoundNodeTypeProvider {
    let mut extensions = MethodNameBasedNodeTypeRegistry::new();
    extensions.register_custom(&[
        methods::INCLUDE.name(),
        methods::THEN_INCLUDE.name(),
        methods::TAG_WITH.name(),
    ]);

    CompoundNodeTypeProvider::new(vec![
        Arc::new(MethodInfoBasedNodeTypeRegistry::with_builtins()),
        Arc::new(extensions),
    ])
}

fn custom_operation(method: &MethodId, args: &[Expr]) -> Result<QueryOperation, ParseError> {
    Ok(QueryOperation::Custom {
        name: method.name().to_string(),
        arguments: args.to_vec(),
    })
}

fn exact<'e, const N: usize>(method: &MethodId, args: &'e [Expr]) -> Result<&'e [Expr; N], ParseError> {
    args.try_into().map_err(|_| ParseError::Arity {
        method: method.clone(),
        expected: N,
        actual: args.len(),
    })
}

fn optional(method: &MethodId, args: &[Expr]) -> Result<Option<Expr>, ParseError> {
    match args {
        [] => Ok(None),
        [predicate] => Ok(Some(predicate.clone())),
        _ => Err(ParseError::Arity {
            method: method.clone(),
            expected: 1,
            actual: args.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_registry_classifies_builtins() {
        let registry = MethodInfoBasedNodeTypeRegistry::with_builtins();
        let builder = registry.node_type(&methods::TAKE).unwrap();
        let op = builder.build(&methods::TAKE, &[Expr::constant(5)]).unwrap();
        assert_eq!(op, QueryOperation::Take { count: Expr::constant(5) });

        assert!(registry.node_type(&methods::INCLUDE).is_none());
    }

    #[test]
    fn test_name_registry_ignores_owner() {
        let mut registry = MethodNameBasedNodeTypeRegistry::new();
        registry.register_custom(&["AsNoTracking"]);

        let method = MethodId::new("EntityFrameworkQueryableExtensions", "AsNoTracking");
        let op = registry.node_type(&method).unwrap().build(&method, &[]).unwrap();
        assert_eq!(op.name(), "AsNoTracking");
    }

    #[test]
    fn test_compound_first_match_wins() {
        let mut overriding = MethodInfoBasedNodeTypeRegistry::new();
        overriding.register(
            &[methods::DISTINCT],
            operation(|_, _| Ok(QueryOperation::Custom { name: "Unique".into(), arguments: vec![] })),
        );
        let provider = CompoundNodeTypeProvider::new(vec![
            Arc::new(overriding),
            Arc::new(MethodInfoBasedNodeTypeRegistry::with_builtins()),
        ]);

        let op = provider.node_type(&methods::DISTINCT).unwrap().build(&methods::DISTINCT, &[]).unwrap();
        assert_eq!(op.name(), "Unique");
    }

    #[test]
    fn test_default_includes_extensions() {
        let provider = default_node_types();
        let tag = Expr::constant("report");
        let op = provider
            .node_type(&methods::TAG_WITH)
            .unwrap()
            .build(&methods::TAG_WITH, std::slice::from_ref(&tag))
            .unwrap();
        assert_eq!(op, QueryOperation::Custom { name: "TagWith".into(), arguments: vec![tag] });

        let take = provider.node_type(&methods::TAKE).unwrap();
        let err = take.build(&methods::TAKE, &[]).unwrap_err();
        assert!(matches!(err, ParseError::Arity { expected: 1, actual: 0, .. }));
    }
}
