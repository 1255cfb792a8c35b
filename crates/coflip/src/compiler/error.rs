use thiserror::Error;

use crate::{ident::Ident, range::Range};

#[derive(Error, Debug, PartialEq, Clone)]
pub enum CompileError {
    #[error("\"{name}\" both yields and receives")]
    MixedSuspension { name: Ident, range: Range },
    #[error("`receive loop` outside an `on_close` block")]
    LoopReceiveOutsideOnClose(Range),
    #[error("`receive` outside a function")]
    ReceiveOutsideFunction(Range),
    #[error("`yield` outside a function")]
    YieldOutsideFunction(Range),
    #[error("`return` outside a function")]
    ReturnOutsideFunction(Range),
    #[error("`break` outside a loop")]
    BreakOutsideLoop(Range),
    #[error("`continue` outside a loop")]
    ContinueOutsideLoop(Range),
    #[error("Too many {what} in \"{name}\"")]
    TooMany { what: &'static str, name: Ident },
}

impl CompileError {
    pub fn range(&self) -> Option<Range> {
        match self {
            CompileError::MixedSuspension { range, .. }
            | CompileError::LoopReceiveOutsideOnClose(range)
            | CompileError::ReceiveOutsideFunction(range)
            | CompileError::YieldOutsideFunction(range)
            | CompileError::ReturnOutsideFunction(range)
            | CompileError::BreakOutsideLoop(range)
            | CompileError::ContinueOutsideLoop(range) => Some(*range),
            CompileError::TooMany { .. } => None,
        }
    }
}
