//! Pest-based parser for query shape text
//!
//! Builds typed [`Expr`] trees. Identifiers resolve, in order, to lambda
//! parameters, entity sets, captured closure variables (searching hoisted
//! nested closures), and finally static type names such as `Math`.

use pest::Parser;
use pest_derive::Parser;
use std::sync::Arc;
use thiserror::Error;

use crate::expr::{BinOp, Expr, ParamDecl, UnOp};
use crate::methods;
use crate::types::{DataType, TypeLookup};
use crate::value::{Closure, QueryRoot, Value};

#[derive(Parser)]
#[grammar = "qshape.pest"]
pub struct QueryShapeParser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Pest error: {0}")]
    Pest(#[from] pest::error::Error<Rule>),

    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("Type {ty} has no member '{member}'")]
    UnknownMember { ty: String, member: String },

    #[error("No method '{method}' on {receiver}")]
    UnknownMethod { receiver: String, method: String },
}

/// Everything identifiers can resolve against
pub struct ParseContext<'a> {
    types: &'a dyn TypeLookup,
    closure: Option<Arc<Closure>>,
}

impl<'a> ParseContext<'a> {
    pub fn new(types: &'a dyn TypeLookup) -> Self {
        Self { types, closure: None }
    }

    /// Free identifiers not bound by a lambda resolve against this closure
    pub fn with_closure(mut self, closure: Arc<Closure>) -> Self {
        self.closure = Some(closure);
        self
    }
}

/// Parse query text into a typed expression tree
pub fn parse_query(source: &str, ctx: &ParseContext<'_>) -> Result<Expr, SyntaxError> {
    let mut pairs = QueryShapeParser::parse(Rule::query, source)?;
    let query = pairs
        .next()
        .ok_or_else(|| SyntaxError::Syntax("Empty input".to_string()))?;
    let expr = query
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| SyntaxError::Syntax("Missing expression".to_string()))?;

    let mut builder = Builder { ctx, scope: Vec::new() };
    builder.expr(expr, &[])
}

struct Builder<'c, 'a> {
    ctx: &'c ParseContext<'a>,
    scope: Vec<ParamDecl>,
}

impl Builder<'_, '_> {
    /// `lambda_types` seeds parameter types when the expression is a lambda argument
    fn expr(&mut self, pair: Pair<'_>, lambda_types: &[DataType]) -> Result<Expr, SyntaxError> {
        let inner = first_inner(pair)?;
        match inner.as_rule() {
            Rule::lambda => self.lambda(inner, lambda_types),
            _ => self.node(inner),
        }
    }

    fn node(&mut self, pair: Pair<'_>) -> Result<Expr, SyntaxError> {
        match pair.as_rule() {
            Rule::expr => self.expr(pair, &[]),
            Rule::or_expr | Rule::and_expr | Rule::cmp_expr | Rule::add_expr | Rule::mul_expr => {
                self.chain(pair)
            }
            Rule::unary_expr => self.unary(pair),
            Rule::postfix => self.postfix(pair),
            Rule::lambda => self.lambda(pair, &[]),
            other => Err(SyntaxError::Syntax(format!("Cannot build expression from {:?}", other))),
        }
    }

    fn lambda(&mut self, pair: Pair<'_>, types: &[DataType]) -> Result<Expr, SyntaxError> {
        let mut inner = pair.into_inner();
        let params_pair = next_pair(&mut inner, "lambda parameters")?;
        let params: Vec<ParamDecl> = params_pair
            .into_inner()
            .enumerate()
            .map(|(i, ident)| ParamDecl {
                name: ident.as_str().to_string(),
                ty: types.get(i).cloned().unwrap_or(DataType::Unknown),
            })
            .collect();

        let depth = self.scope.len();
        self.scope.extend(params.iter().cloned());
        let body = self.expr(next_pair(&mut inner, "lambda body")?, &[]);
        self.scope.truncate(depth);

        Ok(Expr::lambda(params, body?))
    }

    // operand (op operand)*, left associative
    fn chain(&mut self, pair: Pair<'_>) -> Result<Expr, SyntaxError> {
        let mut inner = pair.into_inner();
        let mut left = self.node(next_pair(&mut inner, "operand")?)?;

        while let Some(op) = inner.next() {
            let op = binary_op(op.as_str())?;
            let right = self.node(next_pair(&mut inner, "right operand")?)?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn unary(&mut self, pair: Pair<'_>) -> Result<Expr, SyntaxError> {
        let mut ops = Vec::new();
        let mut operand = None;
        for child in pair.into_inner() {
            match child.as_rule() {
                Rule::unary_op => ops.push(child.as_str().to_string()),
                _ => operand = Some(self.node(child)?),
            }
        }
        let mut expr = operand.ok_or_else(|| SyntaxError::Syntax("Missing operand".to_string()))?;

        for op in ops.iter().rev() {
            expr = match (op.as_str(), expr) {
                ("-", Expr::Constant { value: Value::Int(i), ty }) => Expr::Constant { value: Value::Int(-i), ty },
                ("-", Expr::Constant { value: Value::Float(f), ty }) => {
                    Expr::Constant { value: Value::Float(-f), ty }
                }
                ("-", operand) => Expr::Unary { op: UnOp::Neg, operand: Box::new(operand) },
                (_, operand) => Expr::Unary { op: UnOp::Not, operand: Box::new(operand) },
            };
        }

        Ok(expr)
    }

    fn postfix(&mut self, pair: Pair<'_>) -> Result<Expr, SyntaxError> {
        let mut inner = pair.into_inner();
        let primary = first_inner(next_pair(&mut inner, "primary")?)?;

        let mut current = if primary.as_rule() == Rule::ident {
            let name = primary.as_str();
            match self.resolve(name) {
                Some(expr) => expr,
                None => match inner.next() {
                    Some(suffix) if suffix.as_rule() == Rule::call_suffix => self.static_call(name, suffix)?,
                    _ => return Err(SyntaxError::UnknownIdentifier(name.to_string())),
                },
            }
        } else {
            self.primary(primary)?
        };

        for suffix in inner {
            current = match suffix.as_rule() {
                Rule::call_suffix => self.call(current, suffix)?,
                _ => self.member(current, suffix)?,
            };
        }

        Ok(current)
    }

    fn primary(&mut self, pair: Pair<'_>) -> Result<Expr, SyntaxError> {
        match pair.as_rule() {
            Rule::literal => literal(pair),
            Rule::paren => self.expr(first_inner(pair)?, &[]),
            Rule::record => self.record(pair),
            other => Err(SyntaxError::Syntax(format!("Invalid primary: {:?}", other))),
        }
    }

    fn resolve(&self, name: &str) -> Option<Expr> {
        if let Some(param) = self.scope.iter().rev().find(|p| p.name == name) {
            return Some(Expr::parameter(name, param.ty.clone()));
        }

        if let Some(entity) = self.ctx.types.entity_set(name) {
            return Some(Expr::constant(Value::Query(QueryRoot {
                entity,
                set: name.to_string(),
            })));
        }

        let closure = self.ctx.closure.as_ref()?;
        capture(closure, Expr::constant(Value::Closure(closure.clone())), name)
    }

    fn static_call(&mut self, owner: &str, suffix: Pair<'_>) -> Result<Expr, SyntaxError> {
        let (name, arg_pairs) = call_parts(suffix)?;
        let args = arg_pairs
            .into_iter()
            .map(|a| self.expr(a, &[]))
            .collect::<Result<Vec<_>, _>>()?;
        let arg_types: Vec<DataType> = args.iter().map(Expr::ty).collect();

        let (method, ty) = methods::resolve_static(owner, &name, &arg_types).ok_or_else(|| {
            SyntaxError::UnknownMethod {
                receiver: owner.to_string(),
                method: name.clone(),
            }
        })?;
        Ok(Expr::call(method, args, ty))
    }

    fn call(&mut self, receiver: Expr, suffix: Pair<'_>) -> Result<Expr, SyntaxError> {
        let (name, arg_pairs) = call_parts(suffix)?;
        let receiver_ty = receiver.ty();

        if receiver_ty.is_sequence() {
            let element = receiver_ty.element_type().cloned().unwrap_or(DataType::Unknown);
            let mut args = Vec::with_capacity(arg_pairs.len());
            for (i, arg) in arg_pairs.into_iter().enumerate() {
                let types = lambda_param_types(&name, i, &element, &args);
                args.push(self.expr(arg, &types)?);
            }
            let ty = operator_result_type(&name, &receiver_ty, &element, &args);

            let mut operands = Vec::with_capacity(args.len() + 1);
            operands.push(receiver);
            operands.extend(args);
            return Ok(Expr::call(methods::query_operator(&name), operands, ty));
        }

        let args = arg_pairs
            .into_iter()
            .map(|a| self.expr(a, &[]))
            .collect::<Result<Vec<_>, _>>()?;
        let arg_types: Vec<DataType> = args.iter().map(Expr::ty).collect();

        let (method, ty) = methods::resolve_instance(&receiver_ty, &name, &arg_types).ok_or_else(|| {
            SyntaxError::UnknownMethod {
                receiver: receiver_ty.to_string(),
                method: name.clone(),
            }
        })?;
        Ok(Expr::Call {
            method,
            instance: Some(Box::new(receiver)),
            args,
            ty,
        })
    }

    fn member(&mut self, target: Expr, suffix: Pair<'_>) -> Result<Expr, SyntaxError> {
        let member = first_inner(suffix)?.as_str().to_string();
        let target_ty = target.ty();
        let ty = target_ty
            .member_type(&member, self.ctx.types)
            .ok_or_else(|| SyntaxError::UnknownMember {
                ty: target_ty.to_string(),
                member: member.clone(),
            })?;
        Ok(Expr::member(target, member, ty))
    }

    fn record(&mut self, pair: Pair<'_>) -> Result<Expr, SyntaxError> {
        let mut fields = Vec::new();
        for field in pair.into_inner() {
            let parts: Vec<Pair<'_>> = field.into_inner().collect();
            let (name, expr) = match parts.as_slice() {
                [name, value] => (name.as_str().to_string(), self.expr(value.clone(), &[])?),
                [value] => {
                    let expr = self.expr(value.clone(), &[])?;
                    let name = match &expr {
                        Expr::Member { member, .. } => member.clone(),
                        Expr::Parameter { name, .. } => name.clone(),
                        _ => {
                            return Err(SyntaxError::Syntax(format!(
                                "Anonymous field needs a name: {}",
                                value.as_str()
                            )))
                        }
                    };
                    (name, expr)
                }
                _ => return Err(SyntaxError::Syntax("Invalid record field".to_string())),
            };
            fields.push((name, expr));
        }
        Ok(Expr::Record { fields })
    }
}

/// Resolve a captured variable, descending into hoisted closures (fields named with `>`)
fn capture(closure: &Closure, target: Expr, name: &str) -> Option<Expr> {
    if let Some(field) = closure.field(name) {
        return Some(Expr::member(target, name, field.data_type.clone()));
    }

    closure.fields.iter().find_map(|field| match &field.value {
        Value::Closure(inner) if field.name.contains('>') => capture(
            inner,
            Expr::member(target.clone(), field.name.clone(), field.data_type.clone()),
            name,
        ),
        _ => None,
    })
}

fn lambda_param_types(operator: &str, index: usize, element: &DataType, previous: &[Expr]) -> Vec<DataType> {
    match (operator, index) {
        ("Join", 0) => Vec::new(),
        ("Join", 1) => vec![element.clone()],
        ("Join", 2) => vec![inner_element(previous)],
        ("Join", 3) => vec![element.clone(), inner_element(previous)],
        ("ThenInclude", _) => vec![DataType::Unknown],
        _ => vec![element.clone()],
    }
}

fn inner_element(previous: &[Expr]) -> DataType {
    previous
        .first()
        .and_then(|inner| inner.ty().element_type().cloned())
        .unwrap_or(DataType::Unknown)
}

fn operator_result_type(operator: &str, receiver: &DataType, element: &DataType, args: &[Expr]) -> DataType {
    let rewrap = |element: DataType| match receiver {
        DataType::Sequence(_) => DataType::Sequence(Box::new(element)),
        _ => DataType::queryable(element),
    };

    match operator {
        "Select" => rewrap(args.first().map(lambda_return).unwrap_or(DataType::Unknown)),
        "Join" => rewrap(args.get(3).map(lambda_return).unwrap_or(DataType::Unknown)),
        "Count" => DataType::Int,
        "Any" => DataType::Bool,
        "First" | "FirstOrDefault" | "Single" => element.clone(),
        _ => receiver.clone(),
    }
}

fn lambda_return(expr: &Expr) -> DataType {
    match expr {
        Expr::Lambda { body, .. } => body.ty(),
        other => other.ty(),
    }
}

/// Binary node with implicit conversions: `T` lifts to `T?` against a nullable,
/// `int` widens to `float` against a float
fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    if op.is_logical() {
        return Expr::binary(op, left, right);
    }

    let (lt, rt) = (left.ty(), right.ty());
    let (left, right) = match (&lt, &rt) {
        (DataType::Nullable(inner), other) if **inner == *other => (left, Expr::convert(right, lt.clone())),
        (other, DataType::Nullable(inner)) if **inner == *other => (Expr::convert(left, rt.clone()), right),
        (DataType::Int, DataType::Float) => (Expr::convert(left, DataType::Float), right),
        (DataType::Float, DataType::Int) => (left, Expr::convert(right, DataType::Float)),
        _ => (left, right),
    };
    Expr::binary(op, left, right)
}

fn binary_op(symbol: &str) -> Result<BinOp, SyntaxError> {
    let op = match symbol {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "&&" => BinOp::And,
        "||" => BinOp::Or,
        other => return Err(SyntaxError::Syntax(format!("Unknown operator: {}", other))),
    };
    Ok(op)
}

fn literal(pair: Pair<'_>) -> Result<Expr, SyntaxError> {
    let inner = first_inner(pair)?;
    let text = inner.as_str();
    let value = match inner.as_rule() {
        Rule::null_lit => return Ok(Expr::Constant { value: Value::Null, ty: DataType::Null }),
        Rule::bool_lit => Value::Bool(text == "true"),
        Rule::int => Value::Int(
            text.parse()
                .map_err(|e| SyntaxError::Syntax(format!("Invalid integer '{}': {}", text, e)))?,
        ),
        Rule::float => Value::Float(
            text.parse()
                .map_err(|e| SyntaxError::Syntax(format!("Invalid number '{}': {}", text, e)))?,
        ),
        Rule::string => Value::String(unescape(&text[1..text.len() - 1])),
        other => return Err(SyntaxError::Syntax(format!("Invalid literal: {:?}", other))),
    };
    Ok(Expr::constant(value))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn call_parts(suffix: Pair<'_>) -> Result<(String, Vec<Pair<'_>>), SyntaxError> {
    let mut inner = suffix.into_inner();
    let name = next_pair(&mut inner, "method name")?.as_str().to_string();
    let args = match inner.next() {
        Some(list) => list.into_inner().collect(),
        None => Vec::new(),
    };
    Ok((name, args))
}

fn first_inner(pair: Pair<'_>) -> Result<Pair<'_>, SyntaxError> {
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| SyntaxError::Syntax(format!("Empty {:?}", rule)))
}

fn next_pair<'i>(
    pairs: &mut pest::iterators::Pairs<'i, Rule>,
    what: &str,
) -> Result<Pair<'i>, SyntaxError> {
    pairs
        .next()
        .ok_or_else(|| SyntaxError::Syntax(format!("Missing {}", what)))
}
