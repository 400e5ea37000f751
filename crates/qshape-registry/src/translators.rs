//! Built-in method translators

use qshape_expr::{methods, DataType};

use crate::translate::{MethodCall, MethodCallTranslator, TargetExpr};

/// `Math.Pow(a, b)` -> `POWER(a, b)`
pub struct MathPowTranslator;

impl MethodCallTranslator for MathPowTranslator {
    fn translate(&self, call: &MethodCall<'_>) -> Option<TargetExpr> {
        if *call.method != methods::MATH_POW || call.args.len() != 2 {
            return None;
        }
        Some(TargetExpr::function("POWER", call.args.clone(), call.return_type.clone()))
    }
}

pub struct MathAbsTranslator;

impl MethodCallTranslator for MathAbsTranslator {
    fn translate(&self, call: &MethodCall<'_>) -> Option<TargetExpr> {
        if *call.method != methods::MATH_ABS {
            return None;
        }
        Some(TargetExpr::function("abs", call.args.clone(), call.return_type.clone()))
    }
}

/// Instance methods on strings
pub struct StringMethodTranslator;

impl MethodCallTranslator for StringMethodTranslator {
    fn translate(&self, call: &MethodCall<'_>) -> Option<TargetExpr> {
        let receiver = call.instance.clone()?;
        let name = if *call.method == methods::STRING_TO_UPPER {
            "upper"
        } else if *call.method == methods::STRING_TO_LOWER {
            "lower"
        } else if *call.method == methods::STRING_CONTAINS {
            "contains"
        } else if *call.method == methods::STRING_STARTS_WITH {
            "starts_with"
        } else {
            return None;
        };

        let mut args = Vec::with_capacity(call.args.len() + 1);
        args.push(receiver);
        args.extend(call.args.iter().cloned());
        Some(TargetExpr::function(name, args, call.return_type.clone()))
    }
}

/// Functions evaluated fresh by the target on every execution
pub struct NonDeterministicFunctionTranslator;

impl MethodCallTranslator for NonDeterministicFunctionTranslator {
    fn translate(&self, call: &MethodCall<'_>) -> Option<TargetExpr> {
        if *call.method == methods::GUID_NEW_GUID {
            return Some(TargetExpr::function("gen_random_uuid", Vec::new(), DataType::Uuid));
        }
        if *call.method == methods::DATETIME_NOW || *call.method == methods::DATETIME_UTC_NOW {
            return Some(TargetExpr::Cast {
                operand: Box::new(TargetExpr::function("now", Vec::new(), DataType::Timestamp)),
                ty: DataType::Timestamp,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_expr::{MethodId, Value};

    fn column(name: &str) -> TargetExpr {
        TargetExpr::Column {
            table: "t0".to_string(),
            column: name.to_string(),
        }
    }

    #[test]
    fn test_pow_requires_two_arguments() {
        let ty = DataType::Float;
        let call = MethodCall {
            method: &methods::MATH_POW,
            instance: None,
            args: vec![column("base")],
            return_type: &ty,
        };
        assert!(MathPowTranslator.translate(&call).is_none());
    }

    #[test]
    fn test_string_receiver_becomes_first_argument() {
        let ty = DataType::Bool;
        let method = methods::STRING_STARTS_WITH;
        let call = MethodCall {
            method: &method,
            instance: Some(column("name")),
            args: vec![TargetExpr::Literal(Value::String("A".into()))],
            return_type: &ty,
        };
        assert_eq!(
            StringMethodTranslator.translate(&call),
            Some(TargetExpr::function(
                "starts_with",
                vec![column("name"), TargetExpr::Literal(Value::String("A".into()))],
                DataType::Bool,
            ))
        );
    }

    #[test]
    fn test_new_guid() {
        let ty = DataType::Uuid;
        let method = MethodId::new("Guid", "NewGuid");
        let call = MethodCall {
            method: &method,
            instance: None,
            args: vec![],
            return_type: &ty,
        };
        assert!(matches!(
            NonDeterministicFunctionTranslator.translate(&call),
            Some(TargetExpr::Function { ref name, .. }) if name == "gen_random_uuid"
        ));
    }
}
