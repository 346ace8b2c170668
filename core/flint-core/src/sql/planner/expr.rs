//! Expression helpers: type inference, naming and tree rewriting.

use crate::batch::ScalarValue;
use crate::error::{FlintError, FlintResult};
use crate::sql::planner::schema::{Column, PlanField, PlanSchema};
use crate::sql::planner::types::{AggregateFunction, BinaryOperator, Expr, ScalarFunction};
use arrow::datatypes::{DataType, Field};
use std::collections::HashSet;

impl Expr {
    pub fn col(column: Column) -> Self {
        Expr::Column(column)
    }

    pub fn lit(value: ScalarValue) -> Self {
        Expr::Literal(value)
    }

    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::binary(self, BinaryOperator::And, other)
    }

    pub fn alias(self, name: impl Into<String>) -> Self {
        Expr::Alias {
            expr: Box::new(self.unalias()),
            name: name.into(),
        }
    }

    /// Strip a top-level alias.
    pub fn unalias(self) -> Self {
        match self {
            Expr::Alias { expr, .. } => *expr,
            other => other,
        }
    }

    /// Name of the output column this expression produces.
    pub fn output_name(&self) -> String {
        match self {
            Expr::Alias { name, .. } => name.clone(),
            Expr::Column(col) => col.name.clone(),
            other => other.to_string(),
        }
    }

    /// Result type against `schema`.
    pub fn data_type(&self, schema: &PlanSchema) -> FlintResult<DataType> {
        match self {
            Expr::Column(col) => {
                let idx = schema.index_of(col)?;
                Ok(schema.field(idx).field.data_type().clone())
            }
            Expr::Literal(value) => Ok(value.data_type()),
            Expr::BinaryOp { left, op, .. } => {
                if op.is_arithmetic() {
                    left.data_type(schema)
                } else {
                    Ok(DataType::Boolean)
                }
            }
            Expr::Not(_) | Expr::IsNull(_) | Expr::IsNotNull(_) => Ok(DataType::Boolean),
            Expr::Negative(expr) => expr.data_type(schema),
            Expr::Cast { data_type, .. } => Ok(data_type.clone()),
            Expr::ScalarFunction { func, args } => {
                let arg_types = args
                    .iter()
                    .map(|a| a.data_type(schema))
                    .collect::<FlintResult<Vec<_>>>()?;
                scalar_return_type(*func, &arg_types)
            }
            Expr::Aggregate { func, arg } => {
                let arg_type = match arg {
                    Some(arg) => Some(arg.data_type(schema)?),
                    None => None,
                };
                aggregate_return_type(*func, arg_type.as_ref())
            }
            Expr::Alias { expr, .. } => expr.data_type(schema),
        }
    }

    pub fn nullable(&self, schema: &PlanSchema) -> FlintResult<bool> {
        match self {
            Expr::Column(col) => {
                let idx = schema.index_of(col)?;
                Ok(schema.field(idx).field.is_nullable())
            }
            Expr::Literal(value) => Ok(value.is_null()),
            Expr::BinaryOp { left, right, .. } => {
                Ok(left.nullable(schema)? || right.nullable(schema)?)
            }
            Expr::Not(expr) | Expr::Negative(expr) => expr.nullable(schema),
            Expr::IsNull(_) | Expr::IsNotNull(_) => Ok(false),
            Expr::Cast { expr, .. } => expr.nullable(schema),
            Expr::ScalarFunction { args, .. } => {
                for arg in args {
                    if arg.nullable(schema)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expr::Aggregate { func, .. } => Ok(*func != AggregateFunction::Count),
            Expr::Alias { expr, .. } => expr.nullable(schema),
        }
    }

    /// The plan field this expression produces when projected.
    pub fn to_field(&self, schema: &PlanSchema) -> FlintResult<PlanField> {
        let qualifier = match self {
            Expr::Column(col) => col.relation.clone(),
            _ => None,
        };
        Ok(PlanField::new(
            qualifier,
            Field::new(
                self.output_name(),
                self.data_type(schema)?,
                self.nullable(schema)?,
            ),
        ))
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column(_) | Expr::Literal(_) => vec![],
            Expr::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Not(e)
            | Expr::Negative(e)
            | Expr::IsNull(e)
            | Expr::IsNotNull(e)
            | Expr::Cast { expr: e, .. }
            | Expr::Alias { expr: e, .. } => vec![e.as_ref()],
            Expr::ScalarFunction { args, .. } => args.iter().collect(),
            Expr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
        }
    }

    /// Add every referenced column to `out`.
    pub fn collect_columns(&self, out: &mut HashSet<Column>) {
        if let Expr::Column(col) = self {
            out.insert(col.clone());
        }
        for child in self.children() {
            child.collect_columns(out);
        }
    }

    pub fn columns(&self) -> HashSet<Column> {
        let mut out = HashSet::new();
        self.collect_columns(&mut out);
        out
    }

    pub fn contains_aggregate(&self) -> bool {
        matches!(self, Expr::Aggregate { .. })
            || self.children().iter().any(|c| c.contains_aggregate())
    }

    /// Append every distinct aggregate call in this tree to `out`.
    pub fn collect_aggregates(&self, out: &mut Vec<Expr>) {
        if let Expr::Aggregate { .. } = self {
            if !out.contains(self) {
                out.push(self.clone());
            }
            return;
        }
        for child in self.children() {
            child.collect_aggregates(out);
        }
    }

    /// Rebuild the node with children mapped through `f`.
    pub fn map_children<F>(self, f: &mut F) -> FlintResult<Expr>
    where
        F: FnMut(Expr) -> FlintResult<Expr>,
    {
        Ok(match self {
            e @ (Expr::Column(_) | Expr::Literal(_)) => e,
            Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: boxed(left, f)?,
                op,
                right: boxed(right, f)?,
            },
            Expr::Not(e) => Expr::Not(boxed(e, f)?),
            Expr::Negative(e) => Expr::Negative(boxed(e, f)?),
            Expr::IsNull(e) => Expr::IsNull(boxed(e, f)?),
            Expr::IsNotNull(e) => Expr::IsNotNull(boxed(e, f)?),
            Expr::Cast { expr, data_type } => Expr::Cast {
                expr: boxed(expr, f)?,
                data_type,
            },
            Expr::ScalarFunction { func, args } => Expr::ScalarFunction {
                func,
                args: args.into_iter().map(&mut *f).collect::<FlintResult<_>>()?,
            },
            Expr::Aggregate { func, arg } => Expr::Aggregate {
                func,
                arg: match arg {
                    Some(a) => Some(boxed(a, f)?),
                    None => None,
                },
            },
            Expr::Alias { expr, name } => Expr::Alias {
                expr: boxed(expr, f)?,
                name,
            },
        })
    }

    /// Post-order rewrite: children first, then `f` on the rebuilt node.
    pub fn transform_up<F>(self, f: &mut F) -> FlintResult<Expr>
    where
        F: FnMut(Expr) -> FlintResult<Expr>,
    {
        let rebuilt = self.map_children(&mut |child| child.transform_up(&mut *f))?;
        f(rebuilt)
    }

    /// Pre-order rewrite: `f` returns `Some` to replace a subtree without descending.
    pub fn transform_down<F>(self, f: &mut F) -> FlintResult<Expr>
    where
        F: FnMut(&Expr) -> FlintResult<Option<Expr>>,
    {
        if let Some(replacement) = f(&self)? {
            return Ok(replacement);
        }
        self.map_children(&mut |child| child.transform_down(&mut *f))
    }
}

fn boxed<F>(expr: Box<Expr>, f: &mut F) -> FlintResult<Box<Expr>>
where
    F: FnMut(Expr) -> FlintResult<Expr>,
{
    Ok(Box::new(f(*expr)?))
}

/// Split `a AND b AND c` into its conjuncts.
pub fn split_conjunction(expr: Expr) -> Vec<Expr> {
    let mut out = Vec::new();
    split_into(expr, &mut out);
    out
}

fn split_into(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            split_into(*left, out);
            split_into(*right, out);
        }
        Expr::Alias { expr, .. } => split_into(*expr, out),
        other => out.push(other),
    }
}

/// AND the expressions together; `None` for an empty list.
pub fn conjunction(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(Expr::and)
}

/// Rank of a numeric type in the widening order; `None` for non-numeric.
pub fn numeric_rank(data_type: &DataType) -> Option<u8> {
    match data_type {
        DataType::Int8 => Some(1),
        DataType::Int16 => Some(2),
        DataType::Int32 => Some(3),
        DataType::Int64 => Some(4),
        DataType::Float32 => Some(5),
        DataType::Float64 => Some(6),
        _ => None,
    }
}

pub fn is_numeric(data_type: &DataType) -> bool {
    numeric_rank(data_type).is_some()
}

pub fn is_string(data_type: &DataType) -> bool {
    matches!(data_type, DataType::Utf8 | DataType::LargeUtf8)
}

/// Common type of two numeric operands.
pub fn wider_numeric(left: &DataType, right: &DataType) -> Option<DataType> {
    let (l, r) = (numeric_rank(left)?, numeric_rank(right)?);
    Some(if l >= r { left.clone() } else { right.clone() })
}

fn scalar_return_type(func: ScalarFunction, args: &[DataType]) -> FlintResult<DataType> {
    match func {
        ScalarFunction::Upper
        | ScalarFunction::Lower
        | ScalarFunction::Trim
        | ScalarFunction::Concat => Ok(DataType::Utf8),
        ScalarFunction::Length => Ok(DataType::Int32),
        ScalarFunction::Abs => args
            .first()
            .cloned()
            .ok_or_else(|| FlintError::Plan("abs expects one argument".to_string())),
        ScalarFunction::Round
        | ScalarFunction::Ceil
        | ScalarFunction::Floor
        | ScalarFunction::Sqrt => Ok(DataType::Float64),
    }
}

pub(crate) fn aggregate_return_type(
    func: AggregateFunction,
    arg: Option<&DataType>,
) -> FlintResult<DataType> {
    match (func, arg) {
        (AggregateFunction::Count, _) => Ok(DataType::Int64),
        (_, None) => Err(FlintError::Plan(format!("{func}(*) is not valid"))),
        (AggregateFunction::Sum, Some(dt)) => match dt {
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                Ok(DataType::Int64)
            }
            DataType::Float32 | DataType::Float64 => Ok(DataType::Float64),
            DataType::Null => Ok(DataType::Int64),
            other => Err(FlintError::type_mismatch("numeric argument to sum", other)),
        },
        (AggregateFunction::Avg, Some(dt)) => {
            if is_numeric(dt) || *dt == DataType::Null {
                Ok(DataType::Float64)
            } else {
                Err(FlintError::type_mismatch("numeric argument to avg", dt))
            }
        }
        (AggregateFunction::Min | AggregateFunction::Max, Some(dt)) => Ok(dt.clone()),
    }
}
