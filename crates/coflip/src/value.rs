use std::{
    cell::RefCell,
    fmt::{self, Display},
    rc::{Rc, Weak},
};

use itertools::Itertools;
use smol_str::SmolStr;

use crate::{
    compiler::Code,
    coroutine::{CoroutineHandle, Generator, Receiver},
    ident::Ident,
    vm::{
        builtin::Builtin,
        namespace::{Captures, Namespace},
    },
};

pub type SharedList = Rc<RefCell<Vec<Value>>>;

/// A runtime value.
///
/// Lists are shared and mutable; everything else is either immutable or a handle
/// to state owned elsewhere.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(SmolStr),
    List(SharedList),
    Tuple(Rc<[Value]>),
    Function(Rc<Function>),
    Native(Builtin),
    Iterator(Rc<RefCell<IterState>>),
    Generator(Rc<Generator>),
    Coroutine(CoroutineHandle),
    Receiver(Rc<dyn Receiver>),
    Invertible(Rc<Invertible>),
}

/// A compiled routine together with the names it closes over.
pub struct Function {
    pub name: Ident,
    pub code: Rc<Code>,
    pub globals: Namespace,
    pub captures: Captures,
    /// Set on materialized functions: their own name resolves here, ahead of
    /// `globals`.
    pub own: Weak<Function>,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("kind", &self.code.kind)
            .field("params", &self.code.params)
            .finish()
    }
}

/// A pull-form routine and its push-form counterpart.
///
/// Calling it calls `original`; the attribute `co` is `inverted`.
#[derive(Debug)]
pub struct Invertible {
    pub original: Value,
    pub inverted: Rc<Function>,
}

/// Cursor over a built-in sequence.
#[derive(Debug)]
pub enum IterState {
    List { items: SharedList, index: usize },
    Tuple { items: Rc<[Value]>, index: usize },
    Str { value: SmolStr, offset: usize },
    Range { next: i64, stop: i64, step: i64 },
}

impl IterState {
    pub fn next_value(&mut self) -> Option<Value> {
        match self {
            IterState::List { items, index } => {
                let value = items.borrow().get(*index).cloned();
                if value.is_some() {
                    *index += 1;
                }
                value
            }
            IterState::Tuple { items, index } => {
                let value = items.get(*index).cloned();
                if value.is_some() {
                    *index += 1;
                }
                value
            }
            IterState::Str { value, offset } => {
                let c = value[*offset..].chars().next()?;
                *offset += c.len_utf8();
                Some(Value::Str(SmolStr::new(c.encode_utf8(&mut [0; 4]))))
            }
            IterState::Range { next, stop, step } => {
                let exhausted = if *step > 0 { *next >= *stop } else { *next <= *stop };
                if exhausted {
                    return None;
                }
                let value = *next;
                *next = next.saturating_add(*step);
                Some(Value::Int(value))
            }
        }
    }
}

impl Value {
    pub const TRUE: Value = Value::Bool(true);
    pub const FALSE: Value = Value::Bool(false);

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::from(items))
    }

    pub fn str(value: impl AsRef<str>) -> Self {
        Value::Str(SmolStr::new(value))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin_function",
            Value::Iterator(_) => "iterator",
            Value::Generator(_) => "generator",
            Value::Coroutine(_) => "coroutine",
            Value::Receiver(_) => "receiver",
            Value::Invertible(_) => "invertible",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// Integer view; `bool` counts as `0`/`1`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Source-like rendering, quoting strings.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            _ => self.to_string(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => write!(f, "[{}]", items.borrow().iter().map(Value::repr).join(", ")),
            Value::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0].repr()),
            Value::Tuple(items) => write!(f, "({})", items.iter().map(Value::repr).join(", ")),
            Value::Function(function) => write!(f, "<function {}>", function.name),
            Value::Native(builtin) => write!(f, "<built-in function {}>", builtin.name()),
            Value::Iterator(_) => write!(f, "<iterator>"),
            Value::Generator(generator) => write!(f, "<generator {}>", generator.name()),
            Value::Coroutine(handle) => write!(f, "<coroutine {}>", handle.name()),
            Value::Receiver(_) => write!(f, "<receiver>"),
            Value::Invertible(invertible) => write!(f, "<invertible {}>", invertible.inverted.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::Generator(a), Value::Generator(b)) => Rc::ptr_eq(a, b),
            (Value::Coroutine(a), Value::Coroutine(b)) => a.ptr_eq(b),
            (Value::Receiver(a), Value::Receiver(b)) => Rc::ptr_eq(a, b),
            (Value::Invertible(a), Value::Invertible(b)) => Rc::ptr_eq(a, b),
            (a, b) => match (a.as_int(), b.as_int()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Value::None, "None")]
    #[case(Value::TRUE, "True")]
    #[case(Value::Int(-3), "-3")]
    #[case(Value::str("a'b"), "'a\\'b'")]
    #[case(Value::tuple(vec![Value::Int(1)]), "(1,)")]
    #[case(Value::tuple(vec![Value::Int(1), Value::Int(2)]), "(1, 2)")]
    #[case(Value::list(vec![Value::str("x"), Value::None]), "['x', None]")]
    fn test_repr(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(value.repr(), expected);
    }

    #[rstest]
    #[case(Value::None, false)]
    #[case(Value::Int(0), false)]
    #[case(Value::Int(2), true)]
    #[case(Value::str(""), false)]
    #[case(Value::list(vec![]), false)]
    #[case(Value::tuple(vec![Value::None]), true)]
    fn test_truthiness(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(value.is_truthy(), expected);
    }

    #[test]
    fn test_bool_equals_int() {
        assert_eq!(Value::TRUE, Value::Int(1));
        assert_ne!(Value::FALSE, Value::None);
    }

    #[test]
    fn test_iter_state() {
        let mut range = IterState::Range {
            next: 3,
            stop: 0,
            step: -1,
        };
        let values = std::iter::from_fn(|| range.next_value()).collect::<Vec<_>>();
        assert_eq!(values, vec![Value::Int(3), Value::Int(2), Value::Int(1)]);

        let mut chars = IterState::Str {
            value: SmolStr::new("hé"),
            offset: 0,
        };
        assert_eq!(chars.next_value(), Some(Value::str("h")));
        assert_eq!(chars.next_value(), Some(Value::str("é")));
        assert_eq!(chars.next_value(), None);
    }
}
