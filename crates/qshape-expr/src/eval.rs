//! Tree-walking evaluator for query expressions
//!
//! Evaluates closed sub-expressions during parameter extraction, runs
//! lambdas for in-memory stores, and gives query operators their
//! LINQ-to-objects meaning over sequences. Each evaluation is independent;
//! nothing is cached between calls.

use chrono::{Datelike, Timelike, Utc};
use std::cmp::Ordering;
use thiserror::Error;
use uuid::Uuid;

use crate::expr::{BinOp, Expr, UnOp};
use crate::methods::{self, MethodId};
use crate::params::ParameterValues;
use crate::types::DataType;
use crate::value::{QueryRoot, Record, Value};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Unbound parameter: {0}")]
    UnboundParameter(String),

    #[error("Member '{member}' not found on {target}")]
    MissingMember { member: String, target: String },

    #[error("Null reference while reading '{0}'")]
    NullReference(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Integer overflow in '{0}'")]
    Overflow(&'static str),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(MethodId),

    #[error("No data source available for entity set '{0}'")]
    NoSource(String),

    #[error("Sequence contains no elements")]
    EmptySequence,

    #[error("Sequence contains more than one element")]
    MultipleElements,
}

/// Supplies rows for queryable roots during in-memory evaluation
pub trait SequenceSource: Send + Sync {
    fn scan(&self, root: &QueryRoot) -> Result<Vec<Value>, EvalError>;
}

/// One ordering key: a key-selector lambda plus direction
#[derive(Debug, Clone, Copy)]
pub struct SortKey<'e> {
    pub selector: &'e Expr,
    pub descending: bool,
}

type Scope = [(String, Value)];

#[derive(Clone, Copy, Default)]
pub struct Evaluator<'a> {
    parameters: Option<&'a ParameterValues>,
    source: Option<&'a dyn SequenceSource>,
}

impl<'a> Evaluator<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve extracted placeholders from `parameters`
    pub fn with_parameters(mut self, parameters: &'a ParameterValues) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Resolve queryable roots through `source`
    pub fn with_source(mut self, source: &'a dyn SequenceSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn evaluate(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval(expr, &[])
    }

    /// Apply a lambda to argument values
    pub fn invoke(&self, lambda: &Expr, args: Vec<Value>) -> Result<Value, EvalError> {
        self.invoke_in(lambda, args, &[])
    }

    /// Direct field read on an already-evaluated value
    pub fn read_member(target: &Value, member: &str) -> Result<Value, EvalError> {
        match target {
            Value::Record(record) => record.get(member).cloned().ok_or_else(|| EvalError::MissingMember {
                member: member.to_string(),
                target: "record".to_string(),
            }),
            Value::Closure(closure) => closure
                .field(member)
                .map(|f| f.value.clone())
                .ok_or_else(|| EvalError::MissingMember {
                    member: member.to_string(),
                    target: closure.class_name.clone(),
                }),
            Value::Null => Err(EvalError::NullReference(member.to_string())),
            other => Err(EvalError::MissingMember {
                member: member.to_string(),
                target: other.data_type().to_string(),
            }),
        }
    }

    /// Apply one query operator to an already materialized sequence.
    ///
    /// `args` are the operator's arguments after the source.
    pub fn apply(&self, method: &MethodId, items: Vec<Value>, args: &[Expr]) -> Result<Value, EvalError> {
        self.apply_in(method, items, args, &[])
    }

    /// Stable sort by composite keys, first key most significant
    pub fn order(&self, items: Vec<Value>, keys: &[SortKey<'_>]) -> Result<Vec<Value>, EvalError> {
        self.order_in(items, keys, &[])
    }

    fn eval(&self, expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
        match expr {
            Expr::Constant { value, .. } => Ok(value.clone()),
            Expr::Parameter { name, .. } => {
                if let Some((_, value)) = scope.iter().rev().find(|(n, _)| n == name) {
                    return Ok(value.clone());
                }
                self.parameters
                    .and_then(|p| p.get(name))
                    .cloned()
                    .ok_or_else(|| EvalError::UnboundParameter(name.clone()))
            }
            Expr::Member { target, member, .. } => {
                let target = self.eval(target, scope)?;
                match Self::read_member(&target, member) {
                    Err(err @ EvalError::MissingMember { .. }) => computed_member(&target, member).ok_or(err),
                    read => read,
                }
            }
            Expr::Call { method, instance, args, .. } => {
                if methods::is_query_operator(method) {
                    return self.eval_query_operator(expr, method, args, scope);
                }
                let instance = match instance {
                    Some(i) => Some(self.eval(i, scope)?),
                    None => None,
                };
                let args = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_function(method, instance, args)
            }
            Expr::Lambda { .. } => Err(EvalError::TypeMismatch(
                "a lambda has no value outside a query operator".to_string(),
            )),
            Expr::Convert { operand, ty } => Ok(convert(self.eval(operand, scope)?, ty)),
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, scope),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                match (op, value) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow("-")),
                    (UnOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (op, other) => Err(EvalError::TypeMismatch(format!(
                        "cannot apply {:?} to {}",
                        op,
                        other.data_type()
                    ))),
                }
            }
            Expr::Record { fields } => {
                let mut record = Record::new();
                for (name, field) in fields {
                    record.fields.push((name.clone(), self.eval(field, scope)?));
                }
                Ok(Value::Record(record))
            }
            Expr::NonDeterministic(inner) => self.eval(inner, scope),
        }
    }

    fn invoke_in(&self, lambda: &Expr, args: Vec<Value>, scope: &Scope) -> Result<Value, EvalError> {
        let Expr::Lambda { params, body } = lambda else {
            return Err(EvalError::TypeMismatch(format!("expected a lambda, found {}", lambda)));
        };
        if params.len() != args.len() {
            return Err(EvalError::TypeMismatch(format!(
                "lambda takes {} arguments, {} given",
                params.len(),
                args.len()
            )));
        }
        let mut inner = scope.to_vec();
        inner.extend(params.iter().map(|p| p.name.clone()).zip(args));
        self.eval(body, &inner)
    }

    fn predicate(&self, lambda: &Expr, item: Value, scope: &Scope) -> Result<bool, EvalError> {
        match self.invoke_in(lambda, vec![item], scope)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(EvalError::TypeMismatch(format!(
                "predicate returned {}",
                other.data_type()
            ))),
        }
    }

    fn eval_binary(&self, op: BinOp, left: &Expr, right: &Expr, scope: &Scope) -> Result<Value, EvalError> {
        if op.is_logical() {
            let lhs = truthy(self.eval(left, scope)?)?;
            return match (op, lhs) {
                (BinOp::And, false) => Ok(Value::Bool(false)),
                (BinOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(truthy(self.eval(right, scope)?)?)),
            };
        }

        let lhs = self.eval(left, scope)?;
        let rhs = self.eval(right, scope)?;

        if op.is_comparison() {
            let result = match op {
                BinOp::Eq => lhs.loose_eq(&rhs),
                BinOp::Ne => !lhs.loose_eq(&rhs),
                // Lifted comparisons: anything against null is false
                _ if lhs.is_null() || rhs.is_null() => false,
                _ => {
                    let ordering = lhs.compare(&rhs).ok_or_else(|| {
                        EvalError::TypeMismatch(format!(
                            "cannot compare {} with {}",
                            lhs.data_type(),
                            rhs.data_type()
                        ))
                    })?;
                    match op {
                        BinOp::Lt => ordering == Ordering::Less,
                        BinOp::Le => ordering != Ordering::Greater,
                        BinOp::Gt => ordering == Ordering::Greater,
                        _ => ordering != Ordering::Less,
                    }
                }
            };
            return Ok(Value::Bool(result));
        }

        arithmetic(op, lhs, rhs)
    }

    /// Scalar functions with a client-side implementation
    pub fn call_function(
        &self,
        method: &MethodId,
        instance: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        match (method.owner(), method.name(), instance, args.as_slice()) {
            ("Math", "Pow", None, [base, exp]) => match (base.as_f64(), exp.as_f64()) {
                (Some(b), Some(e)) => Ok(Value::Float(b.powf(e))),
                _ => Ok(Value::Null),
            },
            ("Math", "Abs", None, [Value::Int(i)]) => i.checked_abs().map(Value::Int).ok_or(EvalError::Overflow("Abs")),
            ("Math", "Abs", None, [Value::Float(f)]) => Ok(Value::Float(f.abs())),
            ("String", name, Some(Value::Null), _) => Err(EvalError::NullReference(name.to_string())),
            ("String", "ToUpper", Some(Value::String(s)), []) => Ok(Value::String(s.to_uppercase())),
            ("String", "ToLower", Some(Value::String(s)), []) => Ok(Value::String(s.to_lowercase())),
            ("String", "Contains", Some(Value::String(s)), [Value::String(needle)]) => {
                Ok(Value::Bool(s.contains(needle.as_str())))
            }
            ("String", "StartsWith", Some(Value::String(s)), [Value::String(prefix)]) => {
                Ok(Value::Bool(s.starts_with(prefix.as_str())))
            }
            ("Guid", "NewGuid", None, []) => Ok(Value::Uuid(Uuid::new_v4())),
            ("DateTime", "Now", None, []) | ("DateTime", "UtcNow", None, []) => Ok(Value::Timestamp(Utc::now())),
            _ => Err(EvalError::UnsupportedMethod(method.clone())),
        }
    }

    fn eval_sequence(&self, expr: &Expr, scope: &Scope) -> Result<Vec<Value>, EvalError> {
        match self.eval(expr, scope)? {
            Value::List(items) => Ok(items),
            Value::Query(root) => self
                .source
                .ok_or_else(|| EvalError::NoSource(root.set.clone()))?
                .scan(&root),
            Value::Null => Err(EvalError::NullReference("sequence".to_string())),
            other => Err(EvalError::TypeMismatch(format!(
                "expected a sequence, found {}",
                other.data_type()
            ))),
        }
    }

    fn eval_query_operator(
        &self,
        call: &Expr,
        method: &MethodId,
        args: &[Expr],
        scope: &Scope,
    ) -> Result<Value, EvalError> {
        let Some((source, rest)) = args.split_first() else {
            return Err(EvalError::TypeMismatch(format!("{} needs a source sequence", method)));
        };

        if matches!(
            method.name(),
            "OrderBy" | "OrderByDescending" | "ThenBy" | "ThenByDescending"
        ) {
            let (base, keys) = ordering_chain(call)?;
            let items = self.eval_sequence(base, scope)?;
            return Ok(Value::List(self.order_in(items, &keys, scope)?));
        }

        let items = self.eval_sequence(source, scope)?;
        self.apply_in(method, items, rest, scope)
    }

    fn apply_in(&self, method: &MethodId, items: Vec<Value>, args: &[Expr], scope: &Scope) -> Result<Value, EvalError> {
        match (method.name(), args) {
            ("Where", [pred]) => {
                let mut kept = Vec::new();
                for item in items {
                    if self.predicate(pred, item.clone(), scope)? {
                        kept.push(item);
                    }
                }
                Ok(Value::List(kept))
            }
            ("Select", [selector]) => items
                .into_iter()
                .map(|item| self.invoke_in(selector, vec![item], scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            ("OrderBy", [selector]) | ("OrderByDescending", [selector]) => {
                let key = SortKey {
                    selector,
                    descending: method.name() == "OrderByDescending",
                };
                Ok(Value::List(self.order_in(items, &[key], scope)?))
            }
            ("Skip", [count]) => {
                let n = self.count_arg(count, scope)?;
                Ok(Value::List(items.into_iter().skip(n).collect()))
            }
            ("Take", [count]) => {
                let n = self.count_arg(count, scope)?;
                Ok(Value::List(items.into_iter().take(n).collect()))
            }
            ("Distinct", []) => {
                let mut unique: Vec<Value> = Vec::new();
                for item in items {
                    if !unique.iter().any(|u| u.loose_eq(&item)) {
                        unique.push(item);
                    }
                }
                Ok(Value::List(unique))
            }
            ("Count", []) => Ok(Value::Int(items.len() as i64)),
            ("Any", []) => Ok(Value::Bool(!items.is_empty())),
            ("First", []) | ("FirstOrDefault", []) | ("Single", []) => single_result(method.name(), items),
            ("Count", [pred]) | ("Any", [pred]) | ("First", [pred]) | ("FirstOrDefault", [pred]) | ("Single", [pred]) => {
                let filtered = self.apply_in(&methods::WHERE, items, std::slice::from_ref(pred), scope)?;
                let Value::List(filtered) = filtered else {
                    return Err(EvalError::TypeMismatch("Where returned a non-sequence".to_string()));
                };
                self.apply_in(method, filtered, &[], scope)
            }
            ("Join", [inner, outer_key, inner_key, result]) => {
                let inner_items = self.eval_sequence(inner, scope)?;
                let inner_keys = inner_items
                    .iter()
                    .map(|i| self.invoke_in(inner_key, vec![i.clone()], scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut joined = Vec::new();
                for outer in items {
                    let key = self.invoke_in(outer_key, vec![outer.clone()], scope)?;
                    if key.is_null() {
                        continue;
                    }
                    for (candidate, candidate_key) in inner_items.iter().zip(&inner_keys) {
                        if key.loose_eq(candidate_key) {
                            joined.push(self.invoke_in(result, vec![outer.clone(), candidate.clone()], scope)?);
                        }
                    }
                }
                Ok(Value::List(joined))
            }
            // Loading hints and annotations do not change in-memory results
            ("Include", [_]) | ("ThenInclude", [_]) | ("TagWith", [_]) => Ok(Value::List(items)),
            _ => Err(EvalError::UnsupportedMethod(method.clone())),
        }
    }

    fn count_arg(&self, count: &Expr, scope: &Scope) -> Result<usize, EvalError> {
        match self.eval(count, scope)? {
            Value::Int(n) if n >= 0 => Ok(n as usize),
            Value::Int(_) => Ok(0),
            other => Err(EvalError::TypeMismatch(format!(
                "expected an integer count, found {}",
                other.data_type()
            ))),
        }
    }

    fn order_in(&self, items: Vec<Value>, keys: &[SortKey<'_>], scope: &Scope) -> Result<Vec<Value>, EvalError> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let key_values = keys
                .iter()
                .map(|k| self.invoke_in(k.selector, vec![item.clone()], scope))
                .collect::<Result<Vec<_>, _>>()?;
            keyed.push((key_values, item));
        }

        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), key) in a.iter().zip(b).zip(keys) {
                let ordering = x.compare(y).unwrap_or(Ordering::Equal);
                let ordering = if key.descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Ok(keyed.into_iter().map(|(_, item)| item).collect())
    }
}

/// Walk `ThenBy*` calls down to the `OrderBy*` that starts the chain
fn ordering_chain(call: &Expr) -> Result<(&Expr, Vec<SortKey<'_>>), EvalError> {
    let mut keys = Vec::new();
    let mut current = call;
    loop {
        let Expr::Call { method, args, .. } = current else {
            return Err(EvalError::TypeMismatch("ThenBy requires an ordered sequence".to_string()));
        };
        let [source, selector] = args.as_slice() else {
            return Err(EvalError::TypeMismatch(format!("{} takes a key selector", method)));
        };
        let descending = method.name().ends_with("Descending");
        keys.push(SortKey { selector, descending });
        match method.name() {
            "ThenBy" | "ThenByDescending" => current = source,
            "OrderBy" | "OrderByDescending" => {
                keys.reverse();
                return Ok((source, keys));
            }
            _ => return Err(EvalError::TypeMismatch("ThenBy requires an ordered sequence".to_string())),
        }
    }
}

fn single_result(operator: &str, items: Vec<Value>) -> Result<Value, EvalError> {
    let mut iter = items.into_iter();
    let first = iter.next();
    match (operator, first) {
        ("FirstOrDefault", first) => Ok(first.unwrap_or(Value::Null)),
        (_, None) => Err(EvalError::EmptySequence),
        ("Single", Some(_)) if iter.next().is_some() => Err(EvalError::MultipleElements),
        (_, Some(first)) => Ok(first),
    }
}

fn truthy(value: Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(EvalError::TypeMismatch(format!(
            "expected bool, found {}",
            other.data_type()
        ))),
    }
}

fn convert(value: Value, ty: &DataType) -> Value {
    match (value, ty.unwrap_nullable()) {
        (Value::Int(i), DataType::Float) => Value::Float(i as f64),
        (Value::Float(f), DataType::Int) => Value::Int(f as i64),
        (value, _) => value,
    }
}

fn arithmetic(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div | BinOp::Mod if b == 0 => return Err(EvalError::DivisionByZero),
                BinOp::Div => a.checked_div(b),
                BinOp::Mod => a.checked_rem(b),
                _ => unreachable!("comparison and logical operators are handled by the caller"),
            };
            result.map(Value::Int).ok_or(EvalError::Overflow(op.symbol()))
        }
        (Value::String(a), b) if op == BinOp::Add => Ok(Value::String(format!("{}{}", a, display_plain(&b)))),
        (a, Value::String(b)) if op == BinOp::Add => Ok(Value::String(format!("{}{}", display_plain(&a), b))),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Float(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Mod => x % y,
                _ => unreachable!("comparison and logical operators are handled by the caller"),
            })),
            _ => Err(EvalError::TypeMismatch(format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                a.data_type(),
                b.data_type()
            ))),
        },
    }
}

fn display_plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Properties derived from a scalar value rather than stored on it
fn computed_member(target: &Value, member: &str) -> Option<Value> {
    let value = match (target, member) {
        (Value::String(s), "Length") => Value::Int(s.chars().count() as i64),
        (Value::List(items), "Count") => Value::Int(items.len() as i64),
        (Value::Timestamp(t), "Year") => Value::Int(t.year().into()),
        (Value::Timestamp(t), "Month") => Value::Int(t.month().into()),
        (Value::Timestamp(t), "Day") => Value::Int(t.day().into()),
        (Value::Timestamp(t), "Hour") => Value::Int(t.hour().into()),
        (Value::Timestamp(t), "Minute") => Value::Int(t.minute().into()),
        (Value::Timestamp(t), "Second") => Value::Int(t.second().into()),
        _ => return None,
    };
    Some(value)
}
