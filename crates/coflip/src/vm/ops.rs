//! Operators and indexing on runtime values.
use std::cmp::Ordering;

use crate::{
    ast::{BinaryOp, UnaryOp},
    value::Value,
};

use super::error::{ExceptionKind, RuntimeError};

pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt => compare(op, lhs, rhs).map(|o| Value::Bool(o == Ordering::Less)),
        BinaryOp::Lte => compare(op, lhs, rhs).map(|o| Value::Bool(o != Ordering::Greater)),
        BinaryOp::Gt => compare(op, lhs, rhs).map(|o| Value::Bool(o == Ordering::Greater)),
        BinaryOp::Gte => compare(op, lhs, rhs).map(|o| Value::Bool(o != Ordering::Less)),
        BinaryOp::Add => add(lhs, rhs),
        BinaryOp::Sub => arithmetic(op, lhs, rhs, i64::checked_sub),
        BinaryOp::Mul => mul(lhs, rhs),
        BinaryOp::Div => {
            check_divisor(rhs)?;
            arithmetic(op, lhs, rhs, floor_div)
        }
        BinaryOp::Mod => {
            check_divisor(rhs)?;
            arithmetic(op, lhs, rhs, floor_mod)
        }
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, RuntimeError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Neg => match operand.as_int() {
            Some(n) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
            None => Err(RuntimeError::type_error(format!(
                "bad operand type for unary -: '{}'",
                operand.type_name()
            ))),
        },
    }
}

pub fn subscript(container: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let at = normalize_index(container, index, items.len())?;
            Ok(items[at].clone())
        }
        Value::Tuple(items) => {
            let at = normalize_index(container, index, items.len())?;
            Ok(items[at].clone())
        }
        Value::Str(s) => {
            let at = normalize_index(container, index, s.chars().count())?;
            Ok(s.chars()
                .nth(at)
                .map(|c| Value::str(c.to_string()))
                .unwrap_or(Value::None))
        }
        _ => Err(RuntimeError::type_error(format!(
            "'{}' object is not subscriptable",
            container.type_name()
        ))),
    }
}

pub fn store_subscript(container: &Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
    match container {
        Value::List(items) => {
            let len = items.borrow().len();
            let at = normalize_index(container, index, len)?;
            items.borrow_mut()[at] = value;
            Ok(())
        }
        _ => Err(RuntimeError::type_error(format!(
            "'{}' object does not support item assignment",
            container.type_name()
        ))),
    }
}

/// Resolves a possibly negative index against `len`.
pub fn normalize_index(container: &Value, index: &Value, len: usize) -> Result<usize, RuntimeError> {
    let index = index.as_int().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "{} indices must be integers, not '{}'",
            container.type_name(),
            index.type_name()
        ))
    })?;
    let resolved = if index < 0 {
        (len as i64).checked_add(index)
    } else {
        Some(index)
    };
    resolved
        .filter(|at| (0..len as i64).contains(at))
        .map(|at| at as usize)
        .ok_or_else(|| {
            RuntimeError::new(
                ExceptionKind::IndexError,
                format!("{} index out of range", container.type_name()),
            )
        })
}

fn overflow() -> RuntimeError {
    RuntimeError::new(ExceptionKind::ValueError, "integer overflow")
}

fn unsupported(op: BinaryOp, lhs: &Value, rhs: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op,
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn check_divisor(rhs: &Value) -> Result<(), RuntimeError> {
    match rhs.as_int() {
        Some(0) => Err(RuntimeError::new(
            ExceptionKind::ZeroDivisionError,
            "integer division or modulo by zero",
        )),
        _ => Ok(()),
    }
}

fn arithmetic(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    f: fn(i64, i64) -> Option<i64>,
) -> Result<Value, RuntimeError> {
    match (lhs.as_int(), rhs.as_int()) {
        (Some(a), Some(b)) => f(a, b).map(Value::Int).ok_or_else(overflow),
        _ => Err(unsupported(op, lhs, rhs)),
    }
}

// Division and remainder round towards negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn add(lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
        (Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => arithmetic(BinaryOp::Add, lhs, rhs, i64::checked_add),
    }
}

fn mul(lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    match (lhs, rhs) {
        (Value::Str(s), n) | (n, Value::Str(s)) if n.as_int().is_some() => {
            let times = n.as_int().unwrap_or_default().max(0) as usize;
            Ok(Value::str(s.repeat(times)))
        }
        (Value::List(items), n) | (n, Value::List(items)) if n.as_int().is_some() => {
            let times = n.as_int().unwrap_or_default().max(0) as usize;
            let items = items.borrow();
            Ok(Value::list(
                std::iter::repeat_n(items.iter(), times)
                    .flatten()
                    .cloned()
                    .collect(),
            ))
        }
        _ => arithmetic(BinaryOp::Mul, lhs, rhs, i64::checked_mul),
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Ordering, RuntimeError> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => compare_items(op, &a.borrow(), &b.borrow()),
        (Value::Tuple(a), Value::Tuple(b)) => compare_items(op, a, b),
        _ => match (lhs.as_int(), rhs.as_int()) {
            (Some(a), Some(b)) => Ok(a.cmp(&b)),
            _ => Err(RuntimeError::type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op,
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn compare_items(op: BinaryOp, lhs: &[Value], rhs: &[Value]) -> Result<Ordering, RuntimeError> {
    for (a, b) in lhs.iter().zip(rhs) {
        if a != b {
            return compare(op, a, b);
        }
    }
    Ok(lhs.len().cmp(&rhs.len()))
}
