//! Query expression tree
//!
//! A tagged-variant AST. Nodes are never mutated in place; rewrites build new
//! trees through [`Expr::try_map_children`]. The `Display` impl is the
//! canonical rendering used for cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::methods::MethodId;
use crate::types::{DataType, FieldType};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant {
        value: Value,
        ty: DataType,
    },
    /// Lambda parameter or extracted placeholder
    Parameter {
        name: String,
        ty: DataType,
    },
    Member {
        target: Box<Expr>,
        member: String,
        ty: DataType,
    },
    Call {
        method: MethodId,
        instance: Option<Box<Expr>>,
        args: Vec<Expr>,
        ty: DataType,
    },
    Lambda {
        params: Vec<ParamDecl>,
        body: Box<Expr>,
    },
    Convert {
        operand: Box<Expr>,
        ty: DataType,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    /// Anonymous object construction: `new { Name = .., Age = .. }`
    Record {
        fields: Vec<(String, Expr)>,
    },
    /// Transparent marker around a call that must run fresh on every execution
    NonDeterministic(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub ty: DataType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    // Arithmetic
    Add, Sub, Mul, Div, Mod,
    // Comparison
    Eq, Ne, Lt, Le, Gt, Ge,
    // Logical
    And, Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    fn result_type(self, left: &DataType, right: &DataType) -> DataType {
        if self.is_comparison() || self.is_logical() {
            return DataType::Bool;
        }
        match (left.unwrap_nullable(), right.unwrap_nullable()) {
            (DataType::Float, _) | (_, DataType::Float) => DataType::Float,
            (DataType::String, _) | (_, DataType::String) => DataType::String,
            (l, _) => l.clone(),
        }
    }
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = value.data_type();
        Expr::Constant { value, ty }
    }

    pub fn parameter(name: impl Into<String>, ty: DataType) -> Self {
        Expr::Parameter {
            name: name.into(),
            ty,
        }
    }

    pub fn member(target: Expr, member: impl Into<String>, ty: DataType) -> Self {
        Expr::Member {
            target: Box::new(target),
            member: member.into(),
            ty,
        }
    }

    pub fn call(method: MethodId, args: Vec<Expr>, ty: DataType) -> Self {
        Expr::Call {
            method,
            instance: None,
            args,
            ty,
        }
    }

    pub fn lambda(params: Vec<ParamDecl>, body: Expr) -> Self {
        Expr::Lambda {
            params,
            body: Box::new(body),
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn convert(operand: Expr, ty: DataType) -> Self {
        Expr::Convert {
            operand: Box::new(operand),
            ty,
        }
    }

    /// Static type of the node
    pub fn ty(&self) -> DataType {
        match self {
            Expr::Constant { ty, .. }
            | Expr::Parameter { ty, .. }
            | Expr::Member { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::Convert { ty, .. } => ty.clone(),
            Expr::Lambda { params, body } => DataType::Function {
                params: params.iter().map(|p| p.ty.clone()).collect(),
                ret: Box::new(body.ty()),
            },
            Expr::Binary { op, left, right } => op.result_type(&left.ty(), &right.ty()),
            Expr::Unary { op: UnOp::Not, .. } => DataType::Bool,
            Expr::Unary { op: UnOp::Neg, operand } => operand.ty(),
            Expr::Record { fields } => DataType::Struct(
                fields
                    .iter()
                    .map(|(name, expr)| FieldType {
                        name: name.clone(),
                        data_type: expr.ty(),
                    })
                    .collect(),
            ),
            Expr::NonDeterministic(inner) => inner.ty(),
        }
    }

    pub fn is_lambda(&self) -> bool {
        matches!(self, Expr::Lambda { .. })
    }

    /// Direct children in a fixed order (instance before arguments)
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Constant { .. } | Expr::Parameter { .. } => Vec::new(),
            Expr::Member { target, .. } => vec![&**target],
            Expr::Call { instance, args, .. } => instance
                .iter()
                .map(|i| &**i)
                .chain(args.iter())
                .collect(),
            Expr::Lambda { body, .. } => vec![&**body],
            Expr::Convert { operand, .. } | Expr::Unary { operand, .. } => vec![&**operand],
            Expr::Binary { left, right, .. } => vec![&**left, &**right],
            Expr::Record { fields } => fields.iter().map(|(_, e)| e).collect(),
            Expr::NonDeterministic(inner) => vec![&**inner],
        }
    }

    /// Rebuild this node with every child replaced by `f(child)`, in [`Expr::children`] order
    pub fn try_map_children<E, F>(&self, mut f: F) -> Result<Expr, E>
    where
        F: FnMut(&Expr) -> Result<Expr, E>,
    {
        let mapped = match self {
            Expr::Constant { .. } | Expr::Parameter { .. } => self.clone(),
            Expr::Member { target, member, ty } => Expr::Member {
                target: Box::new(f(target)?),
                member: member.clone(),
                ty: ty.clone(),
            },
            Expr::Call { method, instance, args, ty } => {
                let instance = match instance {
                    Some(i) => Some(Box::new(f(i)?)),
                    None => None,
                };
                Expr::Call {
                    method: method.clone(),
                    instance,
                    args: args.iter().map(&mut f).collect::<Result<_, _>>()?,
                    ty: ty.clone(),
                }
            }
            Expr::Lambda { params, body } => Expr::Lambda {
                params: params.clone(),
                body: Box::new(f(body)?),
            },
            Expr::Convert { operand, ty } => Expr::Convert {
                operand: Box::new(f(operand)?),
                ty: ty.clone(),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(f(left)?),
                right: Box::new(f(right)?),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(f(operand)?),
            },
            Expr::Record { fields } => Expr::Record {
                fields: fields
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), f(e)?)))
                    .collect::<Result<_, E>>()?,
            },
            Expr::NonDeterministic(inner) => Expr::NonDeterministic(Box::new(f(inner)?)),
        };
        Ok(mapped)
    }

    pub fn map_children<F>(&self, mut f: F) -> Expr
    where
        F: FnMut(&Expr) -> Expr,
    {
        match self.try_map_children::<std::convert::Infallible, _>(|e| Ok(f(e))) {
            Ok(expr) => expr,
            Err(never) => match never {},
        }
    }

    /// True if any node in the tree satisfies `pred`
    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { value, .. } => write!(f, "{}", value),
            Expr::Parameter { name, .. } => write!(f, "{}", name),
            Expr::Member { target, member, .. } => write!(f, "{}.{}", target, member),
            Expr::Call { method, instance: Some(instance), args, .. } => {
                write!(f, "{}.{}(", instance, method.name())?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Expr::Call { method, instance: None, args, .. } => {
                write!(f, "{}(", method)?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Expr::Lambda { params, body } => {
                if params.len() == 1 {
                    write!(f, "{} => {}", params[0].name, body)
                } else {
                    let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
                    write!(f, "({}) => {}", names.join(", "), body)
                }
            }
            Expr::Convert { operand, ty } => write!(f, "Convert<{}, {}>({})", operand.ty(), ty, operand),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Unary { op: UnOp::Not, operand } => write!(f, "!{}", operand),
            Expr::Unary { op: UnOp::Neg, operand } => write!(f, "-{}", operand),
            Expr::Record { fields } => {
                write!(f, "new {{ ")?;
                for (i, (name, expr)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, expr)?;
                }
                write!(f, " }}")
            }
            Expr::NonDeterministic(inner) => write!(f, "{}", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods;

    fn age_filter(bound: Expr) -> Expr {
        let x = Expr::parameter("x", DataType::Entity("Person".into()));
        Expr::lambda(
            vec![ParamDecl { name: "x".into(), ty: DataType::Entity("Person".into()) }],
            Expr::binary(BinOp::Gt, Expr::member(x, "Age", DataType::Int), bound),
        )
    }

    #[test]
    fn test_render_lambda() {
        let lambda = age_filter(Expr::constant(18));
        assert_eq!(lambda.to_string(), "x => (x.Age > 18)");
        assert_eq!(
            lambda.ty(),
            DataType::Function {
                params: vec![DataType::Entity("Person".into())],
                ret: Box::new(DataType::Bool),
            }
        );
    }

    #[test]
    fn test_map_children_preserves_order() {
        let call = Expr::call(
            methods::MATH_POW,
            vec![Expr::constant(2), Expr::constant(3)],
            DataType::Float,
        );
        let mut seen = Vec::new();
        let rebuilt = call.map_children(|child| {
            seen.push(child.to_string());
            child.clone()
        });
        assert_eq!(seen, vec!["2", "3"]);
        assert_eq!(rebuilt, call);
    }

    #[test]
    fn test_non_deterministic_is_transparent() {
        let call = Expr::call(methods::GUID_NEW_GUID, vec![], DataType::Uuid);
        let tagged = Expr::NonDeterministic(Box::new(call.clone()));
        assert_eq!(tagged.ty(), DataType::Uuid);
        assert_eq!(tagged.to_string(), call.to_string());
    }
}
