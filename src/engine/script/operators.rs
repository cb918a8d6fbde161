use std::cmp::Ordering;

use super::parser::BinaryOp;
use crate::{
    engine::{EngineError, EngineResult},
    value::Value,
};

/// Upper bound for `string * n` results, in bytes.
const MAX_REPEAT_LEN: usize = 64 * 1024 * 1024;

/// Applies a binary operator. The left operand decides the flavour of the
/// operation: strings concatenate and compare as text, lists append, and
/// everything else is numeric.
pub fn apply(op: BinaryOp, lhs: Value, rhs: Value) -> EngineResult<Value> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(op, lhs, rhs),
        BinaryOp::Eq => Ok(Value::Boolean(compare(&lhs, &rhs) == Some(Ordering::Equal))),
        BinaryOp::Ne => Ok(Value::Boolean(compare(&lhs, &rhs) != Some(Ordering::Equal))),
        BinaryOp::Lt => ordered(&lhs, &rhs, |o| o == Ordering::Less),
        BinaryOp::Le => ordered(&lhs, &rhs, |o| o != Ordering::Greater),
        BinaryOp::Gt => ordered(&lhs, &rhs, |o| o == Ordering::Greater),
        BinaryOp::Ge => ordered(&lhs, &rhs, |o| o != Ordering::Less),
    }
}

fn arithmetic(op: BinaryOp, lhs: Value, rhs: Value) -> EngineResult<Value> {
    match (op, lhs) {
        (BinaryOp::Add, Value::String(s)) => Ok(Value::String(format!("{}{}", s, rhs))),
        (BinaryOp::Add, Value::List(mut items)) => {
            match rhs {
                Value::List(more) => items.extend(more),
                other => items.push(other),
            }
            Ok(Value::List(items))
        }
        (BinaryOp::Mul, Value::String(s)) => {
            let count = rhs
                .as_i64()
                .filter(|n| *n >= 0)
                .ok_or_else(|| operand_error(op, &rhs))?;
            let count = usize::try_from(count)
                .ok()
                .filter(|count| {
                    s.len()
                        .checked_mul(*count)
                        .is_some_and(|len| len <= MAX_REPEAT_LEN)
                })
                .ok_or_else(|| {
                    EngineError::runtime(format!(
                        "Repeating a string of length {} by {} exceeds the maximum string length.",
                        s.len(),
                        count
                    ))
                })?;
            Ok(Value::String(s.repeat(count)))
        }
        (op, Value::Null) => arithmetic(op, Value::Integer(0), rhs),
        (op, lhs) => numeric(op, &lhs, &rhs),
    }
}

fn numeric(op: BinaryOp, lhs: &Value, rhs: &Value) -> EngineResult<Value> {
    let integral = |v: &Value| !matches!(v, Value::Float(_)) && v.as_i64().is_some();
    if integral(lhs) && (integral(rhs) || matches!(rhs, Value::Null)) {
        let a = lhs.as_i64().unwrap_or_default();
        let b = rhs.as_i64().unwrap_or_default();
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            _ => {
                if b == 0 {
                    return Err(EngineError::runtime("Attempted to divide by zero."));
                }
                if a % b != 0 {
                    return Ok(Value::Float(a as f64 / b as f64));
                }
                a.checked_div(b)
            }
        };
        // overflow falls through to floating point
        if let Some(result) = result {
            return Ok(Value::Integer(result));
        }
    }

    let a = lhs.as_f64().ok_or_else(|| operand_error(op, lhs))?;
    let b = match rhs {
        Value::Null => 0.0,
        other => other.as_f64().ok_or_else(|| operand_error(op, rhs))?,
    };
    Ok(Value::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        _ => {
            if b == 0.0 {
                return Err(EngineError::runtime("Attempted to divide by zero."));
            }
            a / b
        }
    }))
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(a), b) => Some(a.to_lowercase().cmp(&b.to_string().to_lowercase())),
        (Value::Boolean(a), b) => Some(a.cmp(&b.is_truthy())),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => (a == b).then_some(Ordering::Equal),
        },
    }
}

fn ordered(lhs: &Value, rhs: &Value, test: impl Fn(Ordering) -> bool) -> EngineResult<Value> {
    Ok(Value::Boolean(compare(lhs, rhs).map_or(false, test)))
}

fn operand_error(op: BinaryOp, value: &Value) -> EngineError {
    EngineError::runtime(format!(
        "Operator {:?} cannot be applied to a value of type {}.",
        op,
        value.type_name()
    ))
}
