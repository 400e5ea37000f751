//! Lowering of classified queries to DuckDB SQL
//!
//! A [`QueryModel`] becomes a single `SELECT`. Lambda parameters are bound
//! to the row shape flowing through the pipeline, so a `Where` after a
//! `Select` is inlined against the projected expressions instead of
//! nesting a subquery.

use qshape_expr::{BinOp, DataType, Expr, QueryRoot, TypeLookup, UnOp, Value};
use qshape_ir::{Model, Property, QueryModel, QueryOperation};
use qshape_registry::{MethodCall, MethodTranslatorRegistry, TargetExpr};

use crate::DuckStoreError;

/// Statement text plus what the executor needs to bind and decode it
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    /// Placeholder names in `?` order; a name repeats when it is used twice
    pub parameters: Vec<String>,
    pub columns: Columns,
    pub cardinality: Cardinality,
}

/// How result columns map back to values
#[derive(Debug, Clone, PartialEq)]
pub enum Columns {
    Scalar(DataType),
    /// One column per field, decoded into a record
    Record(Vec<(String, DataType)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Many,
    First { or_default: bool },
    Count,
    Exists,
}

/// Row shape flowing between operators
#[derive(Debug, Clone)]
enum Shape {
    Row { alias: String, entity: String },
    Scalar { expr: TargetExpr, ty: DataType },
    Record(Vec<(String, Shape)>),
}

type Scope = [(String, Shape)];

struct Join {
    table: String,
    alias: String,
    outer_key: TargetExpr,
    inner_key: TargetExpr,
}

pub fn lower(
    model: &Model,
    translators: &MethodTranslatorRegistry,
    query: &QueryModel,
) -> Result<SqlQuery, DuckStoreError> {
    let mut select = SelectBuilder::new(model, translators, &query.source)?;
    for op in &query.operations {
        select.apply(op)?;
    }
    select.finish()
}

struct SelectBuilder<'a> {
    model: &'a Model,
    translators: &'a MethodTranslatorRegistry,
    table: String,
    join: Option<Join>,
    filters: Vec<TargetExpr>,
    order: Vec<(TargetExpr, bool)>,
    /// Keys introduced by the latest OrderBy and its ThenBy calls
    primary_keys: usize,
    limit: Option<TargetExpr>,
    offset: Option<TargetExpr>,
    distinct: bool,
    comments: Vec<String>,
    current: Shape,
    cardinality: Cardinality,
}

impl<'a> SelectBuilder<'a> {
    fn new(
        model: &'a Model,
        translators: &'a MethodTranslatorRegistry,
        source: &QueryRoot,
    ) -> Result<Self, DuckStoreError> {
        let (table, entity) = resolve_table(model, source)?;
        Ok(Self {
            model,
            translators,
            table,
            join: None,
            filters: Vec::new(),
            order: Vec::new(),
            primary_keys: 0,
            limit: None,
            offset: None,
            distinct: false,
            comments: Vec::new(),
            current: Shape::Row {
                alias: "t0".to_string(),
                entity,
            },
            cardinality: Cardinality::Many,
        })
    }

    fn apply(&mut self, op: &QueryOperation) -> Result<(), DuckStoreError> {
        if self.cardinality != Cardinality::Many {
            return Err(unsupported(format!("{} after a terminal operation", op.name())));
        }

        match op {
            QueryOperation::Where { predicate } => self.filter(predicate, "Where")?,
            QueryOperation::Select { selector } => {
                if self.distinct {
                    return Err(unsupported("Select after Distinct"));
                }
                self.current = self.lambda(selector, vec![self.current.clone()])?;
            }
            QueryOperation::OrderBy { key, descending } => {
                self.require_unbounded("OrderBy")?;
                let key = self.lambda_scalar(key, vec![self.current.clone()])?;
                self.order.insert(0, (key, *descending));
                self.primary_keys = 1;
            }
            QueryOperation::ThenBy { key, descending } => {
                self.require_unbounded("ThenBy")?;
                if self.order.is_empty() {
                    return Err(unsupported("ThenBy without OrderBy"));
                }
                let key = self.lambda_scalar(key, vec![self.current.clone()])?;
                self.order.insert(self.primary_keys, (key, *descending));
                self.primary_keys += 1;
            }
            QueryOperation::Skip { count } => {
                if self.limit.is_some() {
                    return Err(unsupported("Skip after Take"));
                }
                let count = self.scalar(count, &[])?;
                self.offset = Some(match self.offset.take() {
                    Some(previous) => binary(BinOp::Add, previous, count),
                    None => count,
                });
            }
            QueryOperation::Take { count } => {
                let count = self.scalar(count, &[])?;
                self.take(count);
            }
            QueryOperation::Distinct => {
                if self.limit.is_some() || self.offset.is_some() {
                    return Err(unsupported("Distinct after Skip or Take"));
                }
                self.distinct = true;
            }
            QueryOperation::Join {
                inner,
                outer_key,
                inner_key,
                result,
            } => {
                self.require_unbounded("Join")?;
                if self.join.is_some() {
                    return Err(unsupported("more than one Join"));
                }
                let (table, entity) = resolve_table(self.model, inner)?;
                let alias = "t1".to_string();
                let inner_row = Shape::Row {
                    alias: alias.clone(),
                    entity,
                };

                let outer_key = self.lambda_scalar(outer_key, vec![self.current.clone()])?;
                let inner_key = self.lambda_scalar(inner_key, vec![inner_row.clone()])?;
                self.current = self.lambda(result, vec![self.current.clone(), inner_row])?;
                self.join = Some(Join {
                    table,
                    alias,
                    outer_key,
                    inner_key,
                });
            }
            QueryOperation::Count { predicate } => {
                if let Some(predicate) = predicate {
                    self.filter(predicate, "Count")?;
                }
                self.cardinality = Cardinality::Count;
            }
            QueryOperation::Any { predicate } => {
                if let Some(predicate) = predicate {
                    self.filter(predicate, "Any")?;
                }
                self.cardinality = Cardinality::Exists;
            }
            QueryOperation::First { predicate, or_default } => {
                if let Some(predicate) = predicate {
                    self.filter(predicate, op.name())?;
                }
                self.take(TargetExpr::Literal(Value::Int(1)));
                self.cardinality = Cardinality::First {
                    or_default: *or_default,
                };
            }
            QueryOperation::Single { .. } => return Err(unsupported("Single is not supported by the DuckDB store")),
            QueryOperation::Custom { name, arguments } => match (name.as_str(), arguments.as_slice()) {
                ("TagWith", [Expr::Constant { value: Value::String(tag), .. }]) => {
                    self.comments.push(tag.replace("*/", "* /"));
                }
                ("TagWith", _) => return Err(unsupported("TagWith requires a literal tag")),
                (other, _) => {
                    return Err(unsupported(format!("{} is not supported by the DuckDB store", other)));
                }
            },
        }
        Ok(())
    }

    fn filter(&mut self, predicate: &Expr, op: &str) -> Result<(), DuckStoreError> {
        self.require_unbounded(op)?;
        let condition = self.lambda_scalar(predicate, vec![self.current.clone()])?;
        self.filters.push(condition);
        Ok(())
    }

    fn take(&mut self, count: TargetExpr) {
        self.limit = Some(match self.limit.take() {
            Some(previous) => TargetExpr::function("LEAST", vec![previous, count], DataType::Int),
            None => count,
        });
    }

    fn require_unbounded(&self, op: &str) -> Result<(), DuckStoreError> {
        if self.limit.is_some() || self.offset.is_some() || self.distinct {
            return Err(unsupported(format!("{} after Skip, Take or Distinct", op)));
        }
        Ok(())
    }

    fn lambda(&self, lambda: &Expr, args: Vec<Shape>) -> Result<Shape, DuckStoreError> {
        let Expr::Lambda { params, body } = lambda else {
            return Err(unsupported(format!("expected a lambda, found {}", lambda)));
        };
        if params.len() != args.len() {
            return Err(unsupported(format!(
                "lambda takes {} parameters, {} bound",
                params.len(),
                args.len()
            )));
        }
        let scope: Vec<(String, Shape)> = params.iter().map(|p| p.name.clone()).zip(args).collect();
        self.shape(body, &scope)
    }

    fn lambda_scalar(&self, lambda: &Expr, args: Vec<Shape>) -> Result<TargetExpr, DuckStoreError> {
        into_scalar(self.lambda(lambda, args)?)
    }

    fn shape(&self, expr: &Expr, scope: &Scope) -> Result<Shape, DuckStoreError> {
        match expr {
            Expr::Parameter { name, ty } => match scope.iter().rev().find(|(n, _)| n == name) {
                Some((_, shape)) => Ok(shape.clone()),
                None => Ok(Shape::Scalar {
                    expr: placeholder(name, ty),
                    ty: ty.clone(),
                }),
            },
            Expr::Member { target, member, ty } => match self.shape(target, scope)? {
                Shape::Row { alias, entity } => {
                    let property = self.property(&entity, member)?;
                    Ok(Shape::Scalar {
                        expr: TargetExpr::Column {
                            table: alias,
                            column: property.column.clone(),
                        },
                        ty: ty.clone(),
                    })
                }
                Shape::Record(fields) => fields
                    .into_iter()
                    .find(|(name, _)| name == member)
                    .map(|(_, shape)| shape)
                    .ok_or_else(|| unsupported(format!("projected record has no field '{}'", member))),
                Shape::Scalar { .. } => Err(unsupported(format!("member '{}' of a scalar value", member))),
            },
            Expr::Record { fields } => fields
                .iter()
                .map(|(name, field)| Ok((name.clone(), self.shape(field, scope)?)))
                .collect::<Result<Vec<_>, DuckStoreError>>()
                .map(Shape::Record),
            Expr::NonDeterministic(inner) => self.shape(inner, scope),
            Expr::Convert { operand, ty } if is_representation_only(operand, ty) => self.shape(operand, scope),
            other => Ok(Shape::Scalar {
                expr: self.scalar(other, scope)?,
                ty: other.ty(),
            }),
        }
    }

    fn scalar(&self, expr: &Expr, scope: &Scope) -> Result<TargetExpr, DuckStoreError> {
        match expr {
            Expr::Constant {
                value: Value::Query(root),
                ..
            } => Err(unsupported(format!("nested query over '{}'", root.set))),
            Expr::Constant { value, .. } => Ok(TargetExpr::Literal(value.clone())),
            Expr::Call {
                method,
                instance,
                args,
                ty,
            } => {
                let instance = instance
                    .as_deref()
                    .map(|i| self.scalar(i, scope))
                    .transpose()?;
                let args = args
                    .iter()
                    .map(|a| self.scalar(a, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let call = MethodCall {
                    method,
                    instance,
                    args,
                    return_type: ty,
                };
                self.translators
                    .translate(&call)
                    .ok_or_else(|| DuckStoreError::UntranslatableMethod(method.clone()))
            }
            Expr::Convert { operand, ty } => {
                let inner = self.scalar(operand, scope)?;
                if is_representation_only(operand, ty) {
                    Ok(inner)
                } else {
                    Ok(TargetExpr::Cast {
                        operand: Box::new(inner),
                        ty: ty.clone(),
                    })
                }
            }
            Expr::Binary { op, left, right } => {
                // SQL `+` and `/` disagree with host semantics on strings and integers
                let (left_ty, right_ty) = (left.ty(), right.ty());
                let diverges = match op {
                    BinOp::Add => is_string(&left_ty) || is_string(&right_ty),
                    BinOp::Div => is_int(&left_ty) && is_int(&right_ty),
                    _ => false,
                };
                if diverges {
                    return Err(unsupported(format!("{} on {} and {}", op.symbol(), left_ty, right_ty)));
                }
                Ok(binary(*op, self.scalar(left, scope)?, self.scalar(right, scope)?))
            }
            Expr::Unary { op, operand } => Ok(TargetExpr::Unary {
                op: *op,
                operand: Box::new(self.scalar(operand, scope)?),
            }),
            Expr::Lambda { .. } => Err(unsupported("lambda outside a query operator")),
            Expr::Parameter { .. } | Expr::Member { .. } | Expr::Record { .. } | Expr::NonDeterministic(_) => {
                into_scalar(self.shape(expr, scope)?)
            }
        }
    }

    fn property(&self, entity: &str, member: &str) -> Result<&'a Property, DuckStoreError> {
        self.model
            .entity(entity)
            .and_then(|e| e.find_property(member))
            .ok_or_else(|| DuckStoreError::UnknownProperty {
                entity: entity.to_string(),
                property: member.to_string(),
            })
    }

    fn finish(self) -> Result<SqlQuery, DuckStoreError> {
        let mut parameters = Vec::new();
        let mut sql = String::new();

        for comment in &self.comments {
            sql.push_str(&format!("/* {} */\n", comment));
        }

        let (select_list, columns) = self.projection(&mut parameters)?;
        sql.push_str("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&select_list);
        sql.push_str(&format!(" FROM {} AS t0", quote(&self.table)));

        if let Some(join) = &self.join {
            let outer = render(&join.outer_key, &mut parameters)?;
            let inner = render(&join.inner_key, &mut parameters)?;
            sql.push_str(&format!(
                " JOIN {} AS {} ON {} = {}",
                quote(&join.table),
                join.alias,
                outer,
                inner
            ));
        }

        if !self.filters.is_empty() {
            let conditions = self
                .filters
                .iter()
                .map(|f| render(f, &mut parameters))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }

        if !self.order.is_empty() {
            let keys = self
                .order
                .iter()
                .map(|(key, descending)| {
                    let direction = if *descending { "DESC NULLS LAST" } else { "ASC NULLS FIRST" };
                    Ok(format!("{} {}", render(key, &mut parameters)?, direction))
                })
                .collect::<Result<Vec<_>, DuckStoreError>>()?;
            sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
        }

        if let Some(limit) = &self.limit {
            sql.push_str(&format!(" LIMIT {}", render(limit, &mut parameters)?));
        }
        if let Some(offset) = &self.offset {
            sql.push_str(&format!(" OFFSET {}", render(offset, &mut parameters)?));
        }

        let (sql, columns) = match self.cardinality {
            Cardinality::Count => (
                format!("SELECT COUNT(*) AS \"value\" FROM ({}) AS q", sql),
                Columns::Scalar(DataType::Int),
            ),
            Cardinality::Exists => (
                format!("SELECT EXISTS ({}) AS \"value\"", sql),
                Columns::Scalar(DataType::Bool),
            ),
            _ => (sql, columns),
        };

        Ok(SqlQuery {
            sql,
            parameters,
            columns,
            cardinality: self.cardinality,
        })
    }

    fn projection(&self, parameters: &mut Vec<String>) -> Result<(String, Columns), DuckStoreError> {
        match &self.current {
            Shape::Row { alias, entity } => {
                let entity_type = self
                    .model
                    .entity(entity)
                    .ok_or_else(|| DuckStoreError::UnknownEntitySet(entity.clone()))?;
                let mut items = Vec::with_capacity(entity_type.properties.len());
                let mut columns = Vec::with_capacity(entity_type.properties.len());
                for property in &entity_type.properties {
                    let column = TargetExpr::Column {
                        table: alias.clone(),
                        column: property.column.clone(),
                    };
                    items.push(select_item(&column, &property.data_type, &property.name, parameters)?);
                    columns.push((property.name.clone(), property.data_type.clone()));
                }
                Ok((items.join(", "), Columns::Record(columns)))
            }
            Shape::Scalar { expr, ty } => Ok((select_item(expr, ty, "value", parameters)?, Columns::Scalar(ty.clone()))),
            Shape::Record(fields) => {
                let mut items = Vec::with_capacity(fields.len());
                let mut columns = Vec::with_capacity(fields.len());
                for (name, shape) in fields {
                    let Shape::Scalar { expr, ty } = shape else {
                        return Err(unsupported(format!("field '{}' projects a whole entity", name)));
                    };
                    items.push(select_item(expr, ty, name, parameters)?);
                    columns.push((name.clone(), ty.clone()));
                }
                Ok((items.join(", "), Columns::Record(columns)))
            }
        }
    }
}

fn resolve_table(model: &Model, root: &QueryRoot) -> Result<(String, String), DuckStoreError> {
    model
        .entity_set(&root.set)
        .and_then(|name| model.entity(&name))
        .map(|entity| (entity.table.clone(), entity.name.clone()))
        .ok_or_else(|| DuckStoreError::UnknownEntitySet(root.set.clone()))
}

fn select_item(
    expr: &TargetExpr,
    ty: &DataType,
    name: &str,
    parameters: &mut Vec<String>,
) -> Result<String, DuckStoreError> {
    let rendered = render(expr, parameters)?;
    // UUIDs travel as text and are parsed back on decode
    let rendered = match ty.unwrap_nullable() {
        DataType::Uuid => format!("CAST({} AS VARCHAR)", rendered),
        _ => rendered,
    };
    Ok(format!("{} AS {}", rendered, quote(name)))
}

fn placeholder(name: &str, ty: &DataType) -> TargetExpr {
    let parameter = TargetExpr::Parameter { name: name.to_string() };
    match sql_type(ty) {
        Some(_) => TargetExpr::Cast {
            operand: Box::new(parameter),
            ty: ty.clone(),
        },
        None => parameter,
    }
}

fn into_scalar(shape: Shape) -> Result<TargetExpr, DuckStoreError> {
    match shape {
        Shape::Scalar { expr, .. } => Ok(expr),
        Shape::Row { entity, .. } => Err(unsupported(format!("whole {} row used as a value", entity))),
        Shape::Record(_) => Err(unsupported("record used as a value")),
    }
}

/// Conversions that do not change the stored value: lifting to nullable or boxing to object
fn is_representation_only(operand: &Expr, ty: &DataType) -> bool {
    let from = operand.ty();
    *ty == DataType::Object || ty.unwrap_nullable() == from.unwrap_nullable()
}

fn is_string(ty: &DataType) -> bool {
    *ty.unwrap_nullable() == DataType::String
}

fn is_int(ty: &DataType) -> bool {
    *ty.unwrap_nullable() == DataType::Int
}

fn binary(op: BinOp, left: TargetExpr, right: TargetExpr) -> TargetExpr {
    TargetExpr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn unsupported(message: impl Into<String>) -> DuckStoreError {
    DuckStoreError::Unsupported(message.into())
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn sql_type(ty: &DataType) -> Option<&'static str> {
    match ty {
        DataType::Bool => Some("BOOLEAN"),
        DataType::Int => Some("BIGINT"),
        DataType::Float => Some("DOUBLE"),
        DataType::String => Some("VARCHAR"),
        DataType::Uuid => Some("UUID"),
        DataType::Timestamp => Some("TIMESTAMP"),
        DataType::Nullable(inner) => sql_type(inner),
        _ => None,
    }
}

/// Render a target expression, recording placeholder names in text order
pub fn render(expr: &TargetExpr, parameters: &mut Vec<String>) -> Result<String, DuckStoreError> {
    Ok(match expr {
        TargetExpr::Column { table, column } => format!("{}.{}", table, quote(column)),
        TargetExpr::Parameter { name } => {
            parameters.push(name.clone());
            "?".to_string()
        }
        TargetExpr::Literal(value) => literal(value)?,
        TargetExpr::Function { name, args, .. } => {
            let args = args
                .iter()
                .map(|a| render(a, parameters))
                .collect::<Result<Vec<_>, _>>()?;
            format!("{}({})", name, args.join(", "))
        }
        TargetExpr::Binary { op, left, right } => {
            let lhs = render(left, parameters)?;
            let rhs = render(right, parameters)?;
            let op = match op {
                // Null-safe, matching host equality where null equals null
                BinOp::Eq => "IS NOT DISTINCT FROM",
                BinOp::Ne => "IS DISTINCT FROM",
                BinOp::And => "AND",
                BinOp::Or => "OR",
                other => other.symbol(),
            };
            format!("({} {} {})", lhs, op, rhs)
        }
        TargetExpr::Unary { op, operand } => {
            let operand = render(operand, parameters)?;
            match op {
                UnOp::Not => format!("(NOT {})", operand),
                UnOp::Neg => format!("(-{})", operand),
            }
        }
        TargetExpr::Cast { operand, ty } => {
            let target = sql_type(ty).ok_or_else(|| unsupported(format!("cast to {}", ty)))?;
            format!("CAST({} AS {})", render(operand, parameters)?, target)
        }
    })
}

fn literal(value: &Value) -> Result<String, DuckStoreError> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format!("CAST('{}' AS DOUBLE)", f),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Uuid(u) => format!("CAST('{}' AS UUID)", u),
        Value::Timestamp(t) => format!("CAST('{}' AS TIMESTAMP)", t.format("%Y-%m-%d %H:%M:%S%.6f")),
        other => return Err(unsupported(format!("literal of type {}", other.data_type()))),
    })
}
