use std::fmt::{self, Display};

use thiserror::Error;

use crate::{ident::Ident, range::Range};

/// Kind of a language-level exception; `except Kind { }` matches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    AttributeError,
    IndexError,
    NameError,
    RecursionError,
    RuntimeError,
    StopIteration,
    TypeError,
    ValueError,
    ZeroDivisionError,
}

impl ExceptionKind {
    /// Name that catches every kind.
    pub const CATCH_ALL: &'static str = "Exception";

    pub fn name(&self) -> &'static str {
        match self {
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::RecursionError => "RecursionError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::StopIteration => "StopIteration",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
        }
    }

    pub fn matches(&self, name: Ident) -> bool {
        name.resolve_with(|name| name == Self::CATCH_ALL || name == self.name())
    }
}

impl Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An exception raised while running code.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: ExceptionKind,
    pub message: String,
    pub range: Option<Range>,
}

impl RuntimeError {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            range: None,
        }
    }

    pub fn stop_iteration() -> Self {
        Self::new(ExceptionKind::StopIteration, "no more values")
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn not_defined(name: Ident) -> Self {
        Self::new(ExceptionKind::NameError, format!("\"{}\" is not defined", name))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::RuntimeError, message)
    }

    pub fn recursion(max_depth: u32) -> Self {
        Self::new(
            ExceptionKind::RecursionError,
            format!("maximum call depth {} exceeded", max_depth),
        )
    }

    #[inline]
    pub fn is_stop_iteration(&self) -> bool {
        self.kind == ExceptionKind::StopIteration
    }

    /// Attaches `range` unless the error already points somewhere.
    pub fn or_at(mut self, range: Range) -> Self {
        if self.range.is_none() {
            self.range = Some(range);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ExceptionKind::StopIteration, "StopIteration", true)]
    #[case(ExceptionKind::StopIteration, "Exception", true)]
    #[case(ExceptionKind::TypeError, "StopIteration", false)]
    #[case(ExceptionKind::ZeroDivisionError, "ZeroDivisionError", true)]
    fn test_matches(#[case] kind: ExceptionKind, #[case] name: &str, #[case] expected: bool) {
        assert_eq!(kind.matches(Ident::new(name)), expected);
    }

    #[test]
    fn test_or_at_keeps_first_range() {
        let first = Range::default();
        let second = Range {
            start: crate::range::Position::new(2, 1),
            end: crate::range::Position::new(2, 4),
        };
        let err = RuntimeError::stop_iteration().or_at(first).or_at(second);
        assert_eq!(err.range, Some(first));
        assert_eq!(err.to_string(), "StopIteration: no more values");
    }
}
