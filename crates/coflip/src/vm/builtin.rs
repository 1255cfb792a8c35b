use std::{cell::RefCell, rc::Rc};

use smol_str::SmolStr;

use crate::{
    ident::Ident,
    value::{IterState, Value},
};

use super::{
    Vm,
    error::{ExceptionKind, RuntimeError},
};

/// Functions every routine can call without defining them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Int,
    Invertible,
    Iter,
    Len,
    List,
    Next,
    Range,
    Str,
    Tuple,
}

impl Builtin {
    pub const ALL: [Builtin; 9] = [
        Builtin::Int,
        Builtin::Invertible,
        Builtin::Iter,
        Builtin::Len,
        Builtin::List,
        Builtin::Next,
        Builtin::Range,
        Builtin::Str,
        Builtin::Tuple,
    ];

    pub fn lookup(name: Ident) -> Option<Builtin> {
        name.resolve_with(|name| {
            Self::ALL
                .into_iter()
                .find(|builtin| builtin.name() == name)
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Int => "int",
            Builtin::Invertible => "invertible",
            Builtin::Iter => "iter",
            Builtin::Len => "len",
            Builtin::List => "list",
            Builtin::Next => "next",
            Builtin::Range => "range",
            Builtin::Str => "str",
            Builtin::Tuple => "tuple",
        }
    }

    pub fn call(self, vm: &Vm, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match (self, args.as_slice()) {
            (Builtin::Iter, [value]) => vm.iterate(value),
            (Builtin::Next, [iterator]) => vm
                .next_value(iterator)?
                .ok_or_else(RuntimeError::stop_iteration),
            (Builtin::Next, [iterator, default]) => {
                Ok(vm.next_value(iterator)?.unwrap_or_else(|| default.clone()))
            }
            (Builtin::Len, [value]) => len(value).map(Value::Int),
            (Builtin::Str, [value]) => Ok(Value::Str(SmolStr::new(value.to_string()))),
            (Builtin::Int, [value]) => int(value),
            (Builtin::List, []) => Ok(Value::list(Vec::new())),
            (Builtin::List, [value]) => vm.collect(value).map(Value::list),
            (Builtin::Tuple, []) => Ok(Value::tuple(Vec::new())),
            (Builtin::Tuple, [value]) => vm.collect(value).map(Value::tuple),
            (Builtin::Range, [stop]) => range(0, stop.as_int(), 1),
            (Builtin::Range, [start, stop]) => match start.as_int() {
                Some(start) => range(start, stop.as_int(), 1),
                None => Err(invalid_types(self, &args)),
            },
            (Builtin::Range, [start, stop, step]) => match (start.as_int(), step.as_int()) {
                (Some(_), Some(0)) => Err(RuntimeError::new(
                    ExceptionKind::ValueError,
                    "range() step must not be zero",
                )),
                (Some(start), Some(step)) => range(start, stop.as_int(), step),
                _ => Err(invalid_types(self, &args)),
            },
            (Builtin::Invertible, [function]) => Ok(function.clone()),
            _ => Err(RuntimeError::type_error(format!(
                "{}() got {} arguments",
                self.name(),
                args.len()
            ))),
        }
    }
}

fn invalid_types(builtin: Builtin, args: &[Value]) -> RuntimeError {
    RuntimeError::type_error(format!(
        "invalid types for {}(): {}",
        builtin.name(),
        args.iter().map(Value::type_name).collect::<Vec<_>>().join(", ")
    ))
}

fn len(value: &Value) -> Result<i64, RuntimeError> {
    let len = match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        _ => {
            return Err(RuntimeError::type_error(format!(
                "object of type '{}' has no len()",
                value.type_name()
            )));
        }
    };
    Ok(len as i64)
}

fn int(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Int(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            RuntimeError::new(
                ExceptionKind::ValueError,
                format!("invalid literal for int(): {}", value.repr()),
            )
        }),
        _ => Err(RuntimeError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            value.type_name()
        ))),
    }
}

fn range(start: i64, stop: Option<i64>, step: i64) -> Result<Value, RuntimeError> {
    let stop = stop.ok_or_else(|| RuntimeError::type_error("range() bounds must be integers"))?;
    Ok(Value::Iterator(Rc::new(RefCell::new(IterState::Range {
        next: start,
        stop,
        step,
    }))))
}
