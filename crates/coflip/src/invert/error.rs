use thiserror::Error;

use crate::{compiler::error::CompileError, ident::Ident, range::Range};

#[derive(Error, Debug, PartialEq, Clone)]
pub enum InversionError {
    #[error("\"{0}\" never iterates or steps one of its parameters")]
    NoPullSource(Ident),
    #[error("\"{function}\" pulls from both \"{first}\" and \"{second}\"")]
    MultipleSources {
        function: Ident,
        first: Ident,
        second: Ident,
        range: Range,
    },
    #[error("Cannot invert {0}")]
    UnsupportedConstruct(Unsupported),
    #[error("Failed to rebuild the inverted routine: {0}")]
    Rematerialization(#[from] CompileError),
}

impl InversionError {
    pub fn range(&self) -> Option<Range> {
        match self {
            InversionError::NoPullSource(_) => None,
            InversionError::MultipleSources { range, .. } => Some(*range),
            InversionError::UnsupportedConstruct(unsupported) => unsupported.range,
            InversionError::Rematerialization(err) => err.range(),
        }
    }

    pub(crate) fn unsupported(reason: UnsupportedReason, range: Option<Range>) -> Self {
        InversionError::UnsupportedConstruct(Unsupported { reason, range })
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Unsupported {
    pub reason: UnsupportedReason,
    pub range: Option<Range>,
}

impl std::fmt::Display for Unsupported {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.range {
            Some(range) => write!(
                f,
                "{} at {}:{}",
                self.reason, range.start.line, range.start.column
            ),
            None => write!(f, "{}", self.reason),
        }
    }
}

#[derive(Error, Debug, PartialEq, Clone)]
pub enum UnsupportedReason {
    #[error("a read of the pull source \"{0}\" outside a loop header or iterator binding")]
    SourceRead(Ident),
    #[error("rebinding the pull source \"{0}\"")]
    SourceRebound(Ident),
    #[error("`yield` used as a value")]
    YieldExpression,
    #[error("a loop over the pull source that binds a subscript")]
    SubscriptLoopTarget,
    #[error("a routine that never receives from \"{0}\"")]
    NoReceivePoint(Ident),
}
