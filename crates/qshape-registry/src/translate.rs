//! Method call translation contract
//!
//! Translators lower a host-level function call, whose receiver and
//! arguments are already lowered, into a [`TargetExpr`]. The registry keeps
//! them in registration order and the first translator that accepts a call
//! wins.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use qshape_expr::{BinOp, DataType, MethodId, UnOp, Value};

use crate::translators;

/// Target-side expression, independent of any particular SQL dialect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TargetExpr {
    Column {
        table: String,
        column: String,
    },
    /// Named placeholder bound at execution time
    Parameter {
        name: String,
    },
    Literal(Value),
    Function {
        name: String,
        args: Vec<TargetExpr>,
        ty: DataType,
    },
    Binary {
        op: BinOp,
        left: Box<TargetExpr>,
        right: Box<TargetExpr>,
    },
    Unary {
        op: UnOp,
        operand: Box<TargetExpr>,
    },
    Cast {
        operand: Box<TargetExpr>,
        ty: DataType,
    },
}

impl TargetExpr {
    pub fn function(name: impl Into<String>, args: Vec<TargetExpr>, ty: DataType) -> Self {
        TargetExpr::Function {
            name: name.into(),
            args,
            ty,
        }
    }
}

/// A host call with its receiver and arguments lowered
#[derive(Debug, Clone)]
pub struct MethodCall<'a> {
    pub method: &'a MethodId,
    pub instance: Option<TargetExpr>,
    pub args: Vec<TargetExpr>,
    pub return_type: &'a DataType,
}

/// Lowers one family of host calls. Must be pure: same call, same result.
pub trait MethodCallTranslator: Send + Sync {
    fn translate(&self, call: &MethodCall<'_>) -> Option<TargetExpr>;
}

#[derive(Clone, Default)]
pub struct MethodTranslatorRegistry {
    translators: Vec<Arc<dyn MethodCallTranslator>>,
}

impl MethodTranslatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in translators
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.add(Arc::new(translators::MathPowTranslator));
        registry.add(Arc::new(translators::MathAbsTranslator));
        registry.add(Arc::new(translators::StringMethodTranslator));
        registry.add(Arc::new(translators::NonDeterministicFunctionTranslator));
        registry
    }

    /// Append a translator; earlier registrations take precedence
    pub fn add(&mut self, translator: Arc<dyn MethodCallTranslator>) {
        self.translators.push(translator);
    }

    pub fn translate(&self, call: &MethodCall<'_>) -> Option<TargetExpr> {
        self.translators.iter().find_map(|t| t.translate(call))
    }

    pub fn len(&self) -> usize {
        self.translators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_expr::methods;

    struct FixedTranslator(&'static str);

    impl MethodCallTranslator for FixedTranslator {
        fn translate(&self, call: &MethodCall<'_>) -> Option<TargetExpr> {
            (*call.method == methods::MATH_POW)
                .then(|| TargetExpr::function(self.0, call.args.clone(), call.return_type.clone()))
        }
    }

    fn pow_call<'a>(method: &'a MethodId, ty: &'a DataType) -> MethodCall<'a> {
        MethodCall {
            method,
            instance: None,
            args: vec![TargetExpr::Literal(Value::Int(2)), TargetExpr::Literal(Value::Int(3))],
            return_type: ty,
        }
    }

    #[test]
    fn test_first_registered_wins() {
        let (method, ty) = (methods::MATH_POW, DataType::Float);
        let mut registry = MethodTranslatorRegistry::new();
        registry.add(Arc::new(FixedTranslator("pow_first")));
        registry.add(Arc::new(FixedTranslator("pow_second")));

        match registry.translate(&pow_call(&method, &ty)) {
            Some(TargetExpr::Function { name, .. }) => assert_eq!(name, "pow_first"),
            other => panic!("unexpected translation: {other:?}"),
        }
    }

    #[test]
    fn test_defaults_translate_pow() {
        let (method, ty) = (methods::MATH_POW, DataType::Float);
        let registry = MethodTranslatorRegistry::with_defaults();
        let translated = registry.translate(&pow_call(&method, &ty)).unwrap();
        assert_eq!(
            translated,
            TargetExpr::function(
                "POWER",
                vec![TargetExpr::Literal(Value::Int(2)), TargetExpr::Literal(Value::Int(3))],
                DataType::Float,
            )
        );
    }

    #[test]
    fn test_unknown_call_is_not_translated() {
        let ty = DataType::Int;
        let method = MethodId::new("Math", "Floor");
        let call = MethodCall {
            method: &method,
            instance: None,
            args: vec![TargetExpr::Literal(Value::Float(1.5))],
            return_type: &ty,
        };
        assert!(MethodTranslatorRegistry::with_defaults().translate(&call).is_none());
    }
}
