//! Physical Expression Evaluation

use crate::error::{FlintError, FlintResult};
use crate::sql::planner::{BinaryOperator, PhysicalExpr, ScalarFunction};
use arrow::array::*;
use arrow::compute::kernels::{cmp, numeric};
use arrow::compute::{self, CastOptions};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
};
use arrow::error::ArrowError;
use arrow::util::display::FormatOptions;
use std::sync::Arc;

/// Casts fail on unrepresentable values instead of producing nulls.
const STRICT_CAST: CastOptions<'static> = CastOptions {
    safe: false,
    format_options: FormatOptions::new(),
};

/// Evaluate a PhysicalExpr against a RecordBatch, producing an ArrayRef.
pub fn evaluate_expr(expr: &PhysicalExpr, batch: &RecordBatch) -> FlintResult<ArrayRef> {
    match expr {
        PhysicalExpr::Column(idx) => {
            if *idx >= batch.num_columns() {
                return Err(FlintError::Internal(format!(
                    "column index {idx} out of range ({})",
                    batch.num_columns()
                )));
            }
            Ok(Arc::clone(batch.column(*idx)))
        }
        PhysicalExpr::Literal(scalar) => Ok(scalar.to_array(batch.num_rows())),
        PhysicalExpr::BinaryOp { left, op, right } => {
            let left = evaluate_expr(left, batch)?;
            let right = evaluate_expr(right, batch)?;
            evaluate_binary_op(&left, *op, &right)
        }
        PhysicalExpr::Not(expr) => {
            let array = evaluate_expr(expr, batch)?;
            Ok(Arc::new(compute::not(as_boolean(&array, "NOT")?)?))
        }
        PhysicalExpr::Negative(expr) => {
            let array = evaluate_expr(expr, batch)?;
            Ok(numeric::neg(&array)?)
        }
        PhysicalExpr::IsNull(expr) => {
            let array = evaluate_expr(expr, batch)?;
            Ok(Arc::new(compute::is_null(&array)?))
        }
        PhysicalExpr::IsNotNull(expr) => {
            let array = evaluate_expr(expr, batch)?;
            Ok(Arc::new(compute::is_not_null(&array)?))
        }
        PhysicalExpr::Cast { expr, data_type } => {
            let array = evaluate_expr(expr, batch)?;
            Ok(compute::cast_with_options(&array, data_type, &STRICT_CAST)?)
        }
        PhysicalExpr::ScalarFunc { func, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate_expr(arg, batch))
                .collect::<FlintResult<Vec<_>>>()?;
            evaluate_scalar_func(*func, &args, batch.num_rows())
        }
    }
}

/// Evaluate a predicate; null results count as false downstream.
pub fn evaluate_predicate(expr: &PhysicalExpr, batch: &RecordBatch) -> FlintResult<BooleanArray> {
    let array = evaluate_expr(expr, batch)?;
    Ok(as_boolean(&array, "predicate")?.clone())
}

fn as_boolean<'a>(array: &'a ArrayRef, context: &str) -> FlintResult<&'a BooleanArray> {
    array.as_boolean_opt().ok_or_else(|| {
        FlintError::type_mismatch(format!("Boolean for {context}"), array.data_type())
    })
}

fn evaluate_binary_op(
    left: &ArrayRef,
    op: BinaryOperator,
    right: &ArrayRef,
) -> FlintResult<ArrayRef> {
    if left.data_type() != right.data_type() {
        return Err(FlintError::Internal(format!(
            "operands of '{op}' have different types {:?} and {:?}",
            left.data_type(),
            right.data_type()
        )));
    }
    match op {
        BinaryOperator::Eq
        | BinaryOperator::NotEq
        | BinaryOperator::Lt
        | BinaryOperator::LtEq
        | BinaryOperator::Gt
        | BinaryOperator::GtEq => comparison_op(left, right, op),

        BinaryOperator::And | BinaryOperator::Or => logical_op(left, right, op),

        BinaryOperator::Plus
        | BinaryOperator::Minus
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo => arithmetic_op(left, right, op),
    }
}

/// Comparison operations on arrays of one type.
fn comparison_op(left: &ArrayRef, right: &ArrayRef, op: BinaryOperator) -> FlintResult<ArrayRef> {
    let result = match op {
        BinaryOperator::Eq => cmp::eq(left, right)?,
        BinaryOperator::NotEq => cmp::neq(left, right)?,
        BinaryOperator::Lt => cmp::lt(left, right)?,
        BinaryOperator::LtEq => cmp::lt_eq(left, right)?,
        BinaryOperator::Gt => cmp::gt(left, right)?,
        BinaryOperator::GtEq => cmp::gt_eq(left, right)?,
        _ => return Err(FlintError::Internal(format!("'{op}' is not a comparison"))),
    };
    Ok(Arc::new(result))
}

/// Checked arithmetic; integer division by zero surfaces as `DivisionByZero`.
fn arithmetic_op(left: &ArrayRef, right: &ArrayRef, op: BinaryOperator) -> FlintResult<ArrayRef> {
    let result = match op {
        BinaryOperator::Plus => numeric::add(left, right),
        BinaryOperator::Minus => numeric::sub(left, right),
        BinaryOperator::Multiply => numeric::mul(left, right),
        BinaryOperator::Divide => numeric::div(left, right),
        BinaryOperator::Modulo => numeric::rem(left, right),
        _ => return Err(FlintError::Internal(format!("'{op}' is not arithmetic"))),
    };
    Ok(result?)
}

/// Three-valued AND / OR.
fn logical_op(left: &ArrayRef, right: &ArrayRef, op: BinaryOperator) -> FlintResult<ArrayRef> {
    let l = as_boolean(left, "logical operator")?;
    let r = as_boolean(right, "logical operator")?;
    let result = match op {
        BinaryOperator::And => compute::and_kleene(l, r)?,
        BinaryOperator::Or => compute::or_kleene(l, r)?,
        _ => return Err(FlintError::Internal(format!("'{op}' is not logical"))),
    };
    Ok(Arc::new(result))
}

fn string_arg<'a>(array: &'a ArrayRef, func: ScalarFunction) -> FlintResult<&'a StringArray> {
    array.as_string_opt::<i32>().ok_or_else(|| {
        FlintError::type_mismatch(format!("Utf8 argument to {func}"), array.data_type())
    })
}

fn float_arg(array: &ArrayRef, func: ScalarFunction) -> FlintResult<&Float64Array> {
    array.as_primitive_opt::<Float64Type>().ok_or_else(|| {
        FlintError::type_mismatch(format!("Float64 argument to {func}"), array.data_type())
    })
}

fn arg(args: &[ArrayRef], idx: usize, func: ScalarFunction) -> FlintResult<&ArrayRef> {
    args.get(idx)
        .ok_or_else(|| FlintError::Internal(format!("{func} is missing argument {idx}")))
}

macro_rules! checked_abs {
    ($array:expr, $t:ty) => {{
        let result: PrimitiveArray<$t> = $array.as_primitive::<$t>().try_unary(|v| {
            v.checked_abs()
                .ok_or_else(|| ArrowError::ComputeError(format!("abs overflow for {v}")))
        })?;
        Arc::new(result) as ArrayRef
    }};
}

/// Evaluate a scalar function.
fn evaluate_scalar_func(
    func: ScalarFunction,
    args: &[ArrayRef],
    num_rows: usize,
) -> FlintResult<ArrayRef> {
    match func {
        // --- String Functions ---
        ScalarFunction::Upper => {
            let array = string_arg(arg(args, 0, func)?, func)?;
            let result: StringArray = array.iter().map(|s| s.map(str::to_uppercase)).collect();
            Ok(Arc::new(result))
        }
        ScalarFunction::Lower => {
            let array = string_arg(arg(args, 0, func)?, func)?;
            let result: StringArray = array.iter().map(|s| s.map(str::to_lowercase)).collect();
            Ok(Arc::new(result))
        }
        ScalarFunction::Trim => {
            let array = string_arg(arg(args, 0, func)?, func)?;
            let result: StringArray = array.iter().map(|s| s.map(str::trim)).collect();
            Ok(Arc::new(result))
        }
        ScalarFunction::Length => {
            let array = string_arg(arg(args, 0, func)?, func)?;
            let result: Int32Array = array
                .iter()
                .map(|s| s.map(|v| v.chars().count() as i32))
                .collect();
            Ok(Arc::new(result))
        }
        ScalarFunction::Concat => {
            // NULL arguments are skipped, so the result is never NULL
            let arrays = args
                .iter()
                .map(|a| string_arg(a, func))
                .collect::<FlintResult<Vec<_>>>()?;
            let mut builder = StringBuilder::with_capacity(num_rows, num_rows * 8);
            let mut joined = String::new();
            for row in 0..num_rows {
                joined.clear();
                for array in &arrays {
                    if array.is_valid(row) {
                        joined.push_str(array.value(row));
                    }
                }
                builder.append_value(&joined);
            }
            Ok(Arc::new(builder.finish()))
        }

        // --- Math Functions ---
        ScalarFunction::Abs => {
            let array = arg(args, 0, func)?;
            match array.data_type() {
                DataType::Int8 => Ok(checked_abs!(array, Int8Type)),
                DataType::Int16 => Ok(checked_abs!(array, Int16Type)),
                DataType::Int32 => Ok(checked_abs!(array, Int32Type)),
                DataType::Int64 => Ok(checked_abs!(array, Int64Type)),
                DataType::Float32 => {
                    let result: Float32Array =
                        array.as_primitive::<Float32Type>().unary(f32::abs);
                    Ok(Arc::new(result))
                }
                DataType::Float64 => {
                    let result: Float64Array =
                        array.as_primitive::<Float64Type>().unary(f64::abs);
                    Ok(Arc::new(result))
                }
                dt => Err(FlintError::type_mismatch("numeric argument to abs", dt)),
            }
        }
        ScalarFunction::Round => {
            let values = float_arg(arg(args, 0, func)?, func)?;
            match args.get(1) {
                None => Ok(Arc::new(values.unary::<_, Float64Type>(f64::round))),
                Some(digits) => {
                    let digits = digits.as_primitive_opt::<Int64Type>().ok_or_else(|| {
                        FlintError::type_mismatch("Int64 digits for round", digits.data_type())
                    })?;
                    let result: Float64Array = values
                        .iter()
                        .zip(digits.iter())
                        .map(|(v, d)| match (v, d) {
                            (Some(v), Some(d)) => {
                                let factor = 10f64.powi(d.clamp(-308, 308) as i32);
                                Some((v * factor).round() / factor)
                            }
                            _ => None,
                        })
                        .collect();
                    Ok(Arc::new(result))
                }
            }
        }
        ScalarFunction::Ceil => {
            let values = float_arg(arg(args, 0, func)?, func)?;
            Ok(Arc::new(values.unary::<_, Float64Type>(f64::ceil)))
        }
        ScalarFunction::Floor => {
            let values = float_arg(arg(args, 0, func)?, func)?;
            Ok(Arc::new(values.unary::<_, Float64Type>(f64::floor)))
        }
        ScalarFunction::Sqrt => {
            let values = float_arg(arg(args, 0, func)?, func)?;
            Ok(Arc::new(values.unary::<_, Float64Type>(f64::sqrt)))
        }
    }
}
