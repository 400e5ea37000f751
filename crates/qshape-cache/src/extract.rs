//! Parameter extraction
//!
//! Replaces every maximal client-evaluable, non-queryable sub-expression with
//! a named placeholder and records its value. What remains is the query's
//! shape: identical for all calls that differ only in captured data.

use qshape_expr::{DataType, Evaluator, Expr, ParameterValues, Value};

use crate::evaluatable::{self, Evaluability};
use crate::QueryError;

/// Rewrite `expr` into its shape, appending extracted values to `parameters`
pub fn extract(expr: &Expr, parameters: &mut ParameterValues) -> Result<Expr, QueryError> {
    let analysis = evaluatable::analyze(expr);
    ParameterExtractor { parameters }.visit(expr, &analysis)
}

struct ParameterExtractor<'p> {
    parameters: &'p mut ParameterValues,
}

impl ParameterExtractor<'_> {
    fn visit(&mut self, expr: &Expr, analysis: &Evaluability) -> Result<Expr, QueryError> {
        if is_eligible(expr, analysis) {
            return self.parameterize(expr);
        }

        let mut child_analyses = analysis.children.iter();
        expr.try_map_children(|child| match child_analyses.next() {
            Some(child_analysis) => self.visit(child, child_analysis),
            None => self.visit(child, &evaluatable::analyze(child)),
        })
    }

    fn parameterize(&mut self, expr: &Expr) -> Result<Expr, QueryError> {
        let (value, name) = value_of(expr)?;

        let name = name.unwrap_or_else(|| "p".to_string());
        // Compiler-generated names carry a `<...>` prefix
        let base = match name.rfind('>') {
            Some(i) => &name[i + 1..],
            None => name.as_str(),
        };
        let placeholder = format!("__{}_{}", base, self.parameters.len());

        let apparent = expr.ty();
        let natural = value.data_type();
        let node = if !value.is_null() && natural != apparent {
            Expr::convert(Expr::parameter(placeholder.clone(), natural), apparent)
        } else {
            Expr::parameter(placeholder.clone(), apparent)
        };

        tracing::trace!(placeholder = %placeholder, expression = %expr, "extracted query parameter");
        self.parameters.add(placeholder, value);
        Ok(node)
    }
}

fn is_eligible(expr: &Expr, analysis: &Evaluability) -> bool {
    if !analysis.evaluatable || expr.is_lambda() {
        return false;
    }
    let stripped = strip_lifting_convert(expr);
    !matches!(stripped, Expr::Constant { .. }) && !stripped.ty().is_queryable()
}

/// Peel a conversion to `T?` of a `T` operand, or to `object`
fn strip_lifting_convert(expr: &Expr) -> &Expr {
    match expr {
        Expr::Convert { operand, ty } if is_nullable_of(ty, operand) || *ty == DataType::Object => operand,
        other => other,
    }
}

fn is_nullable_of(ty: &DataType, operand: &Expr) -> bool {
    matches!(ty, DataType::Nullable(inner) if **inner == operand.ty())
}

/// Value of an eligible node plus the name its placeholder derives from
fn value_of(expr: &Expr) -> Result<(Value, Option<String>), QueryError> {
    match expr {
        Expr::Member { target, member, .. } => {
            let (target_value, parent) = value_of(target)?;
            let name = match parent {
                Some(parent) => format!("{}_{}", parent, member),
                None => member.clone(),
            };
            let value = match Evaluator::read_member(&target_value, member) {
                Ok(value) => value,
                Err(_) => evaluate(expr)?,
            };
            Ok((value, Some(name)))
        }
        Expr::Constant { value, .. } => Ok((value.clone(), None)),
        Expr::Call { method, .. } => Ok((evaluate(expr)?, Some(method.name().to_string()))),
        Expr::Convert { operand, ty } if is_nullable_of(ty, operand) => value_of(operand),
        _ => Ok((evaluate(expr)?, Some("p".to_string()))),
    }
}

fn evaluate(expr: &Expr) -> Result<Value, QueryError> {
    Evaluator::new()
        .evaluate(expr)
        .map_err(|source| QueryError::Parameterization {
            expression: expr.to_string(),
            source,
        })
}
