use miette::{Diagnostic, SourceOffset, SourceSpan};

use crate::{
    ast::error::ParseError,
    compiler::error::CompileError,
    coroutine::error::CoroutineError,
    invert::error::InversionError,
    lexer::error::LexerError,
    range::Range,
    vm::error::RuntimeError,
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InnerError {
    #[error(transparent)]
    Lexer(#[from] LexerError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Inversion(#[from] InversionError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Coroutine(#[from] CoroutineError),
}

impl InnerError {
    fn range(&self) -> Option<Range> {
        match self {
            InnerError::Lexer(LexerError::UnexpectedToken(token)) => Some(token.range),
            InnerError::Lexer(LexerError::UnexpectedEOFDetected) => None,
            InnerError::Parse(err) => err.range(),
            InnerError::Compile(err) => err.range(),
            InnerError::Inversion(err) => err.range(),
            InnerError::Runtime(err) => err.range,
            InnerError::Coroutine(CoroutineError::Runtime(err)) => err.range,
            InnerError::Coroutine(_) => None,
        }
    }

    fn is_eof(&self) -> bool {
        matches!(
            self,
            InnerError::Lexer(LexerError::UnexpectedEOFDetected)
                | InnerError::Parse(ParseError::UnexpectedEOFDetected)
        )
    }
}

/// Represents a high-level error with diagnostic information for the user.
#[derive(PartialEq, Debug, thiserror::Error)]
#[error("{cause}")]
pub struct Error {
    /// The underlying cause of the error.
    pub cause: InnerError,
    /// The source code related to the error.
    pub source_code: String,
    /// The location in the source code for diagnostics.
    pub location: SourceSpan,
}

impl Error {
    pub fn from_error(source_code: impl Into<String>, cause: impl Into<InnerError>) -> Self {
        let source_code = source_code.into();
        let cause = cause.into();

        let location = match cause.range() {
            Some(range) => {
                let start = SourceOffset::from_location(
                    &source_code,
                    range.start.line as usize,
                    range.start.column,
                );
                let end = SourceOffset::from_location(
                    &source_code,
                    range.end.line as usize,
                    range.end.column,
                );
                SourceSpan::new(
                    start,
                    std::cmp::max(end.offset().saturating_sub(start.offset()), 1),
                )
            }
            None if cause.is_eof() => {
                let lines = source_code.lines();
                let line = lines.clone().count();
                let column = lines.last().map(|line| line.len()).unwrap_or(0);
                SourceSpan::new(SourceOffset::from_location(&source_code, line, column), 1)
            }
            None => SourceSpan::new(SourceOffset::from_location(&source_code, 0, 0), 1),
        };

        Self {
            cause,
            source_code,
            location,
        }
    }
}

impl Diagnostic for Error {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let c = match &self.cause {
            InnerError::Lexer(LexerError::UnexpectedToken(_)) => "LexerError::UnexpectedToken",
            InnerError::Lexer(LexerError::UnexpectedEOFDetected) => {
                "LexerError::UnexpectedEOFDetected"
            }
            InnerError::Parse(ParseError::UnexpectedToken(_)) => "ParseError::UnexpectedToken",
            InnerError::Parse(ParseError::UnexpectedEOFDetected) => {
                "ParseError::UnexpectedEOFDetected"
            }
            InnerError::Parse(ParseError::ExpectedClosingParen(_)) => {
                "ParseError::ExpectedClosingParen"
            }
            InnerError::Parse(ParseError::ExpectedClosingBrace(_)) => {
                "ParseError::ExpectedClosingBrace"
            }
            InnerError::Parse(ParseError::ExpectedClosingBracket(_)) => {
                "ParseError::ExpectedClosingBracket"
            }
            InnerError::Parse(ParseError::ExpectedSemiColon(_)) => "ParseError::ExpectedSemiColon",
            InnerError::Parse(ParseError::InvalidAssignmentTarget(_)) => {
                "ParseError::InvalidAssignmentTarget"
            }
            InnerError::Compile(CompileError::MixedSuspension { .. }) => {
                "CompileError::MixedSuspension"
            }
            InnerError::Compile(CompileError::LoopReceiveOutsideOnClose(_)) => {
                "CompileError::LoopReceiveOutsideOnClose"
            }
            InnerError::Compile(CompileError::ReceiveOutsideFunction(_)) => {
                "CompileError::ReceiveOutsideFunction"
            }
            InnerError::Compile(CompileError::YieldOutsideFunction(_)) => {
                "CompileError::YieldOutsideFunction"
            }
            InnerError::Compile(CompileError::ReturnOutsideFunction(_)) => {
                "CompileError::ReturnOutsideFunction"
            }
            InnerError::Compile(CompileError::BreakOutsideLoop(_)) => "CompileError::BreakOutsideLoop",
            InnerError::Compile(CompileError::ContinueOutsideLoop(_)) => {
                "CompileError::ContinueOutsideLoop"
            }
            InnerError::Compile(CompileError::TooMany { .. }) => "CompileError::TooMany",
            InnerError::Inversion(InversionError::NoPullSource(_)) => "InversionError::NoPullSource",
            InnerError::Inversion(InversionError::MultipleSources { .. }) => {
                "InversionError::MultipleSources"
            }
            InnerError::Inversion(InversionError::UnsupportedConstruct(_)) => {
                "InversionError::UnsupportedConstruct"
            }
            InnerError::Inversion(InversionError::Rematerialization(_)) => {
                "InversionError::Rematerialization"
            }
            InnerError::Runtime(err) | InnerError::Coroutine(CoroutineError::Runtime(err)) => {
                return Some(Box::new(format!("RuntimeError::{}", err.kind)));
            }
            InnerError::Coroutine(CoroutineError::AlreadyClosed) => "CoroutineError::AlreadyClosed",
            InnerError::Coroutine(CoroutineError::Finished) => "CoroutineError::Finished",
            InnerError::Coroutine(CoroutineError::AlreadyRunning) => {
                "CoroutineError::AlreadyRunning"
            }
        };

        Some(Box::new(c))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let msg = match &self.cause {
            InnerError::Lexer(_) => {
                Some("Check for unexpected or misplaced characters in your input.".to_string())
            }
            InnerError::Parse(ParseError::UnexpectedEOFDetected)
            | InnerError::Parse(ParseError::ExpectedClosingBrace(_)) => Some(
                "Input ended unexpectedly. Check for missing closing braces or incomplete statements."
                    .to_string(),
            ),
            InnerError::Parse(ParseError::ExpectedSemiColon(_)) => {
                Some("Simple statements end with `;`.".to_string())
            }
            InnerError::Parse(_) => Some("Check for syntax errors or misplaced tokens.".to_string()),
            InnerError::Inversion(InversionError::NoPullSource(name)) => Some(format!(
                "\"{name}\" must loop over one of its parameters, or step it with `next`."
            )),
            InnerError::Inversion(InversionError::MultipleSources { .. }) => Some(
                "Only one parameter can be pulled from; merge the sources before the call."
                    .to_string(),
            ),
            InnerError::Inversion(InversionError::UnsupportedConstruct(_)) => Some(
                "Use the pull source only as a loop header or in `iter(...)` and `next(...)`."
                    .to_string(),
            ),
            InnerError::Coroutine(CoroutineError::Finished) => {
                Some("The coroutine already ran to completion; stop sending values.".to_string())
            }
            InnerError::Coroutine(CoroutineError::AlreadyClosed) => {
                Some("The coroutine was closed; create a new one to send more values.".to_string())
            }
            InnerError::Runtime(err) | InnerError::Coroutine(CoroutineError::Runtime(err))
                if err.kind == crate::vm::error::ExceptionKind::RecursionError =>
            {
                Some("Raise the maximum call depth or check for unbounded recursion.".to_string())
            }
            _ => None,
        };

        msg.map(|m| Box::new(m) as Box<dyn std::fmt::Display>)
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.source_code)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(
            miette::LabeledSpan::new_with_span(Some(self.cause.to_string()), self.location),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ident::Ident,
        lexer::token::{Token, TokenKind},
        range::Position,
        vm::error::ExceptionKind,
    };
    use rstest::rstest;

    fn range(line: u32, start: usize, end: usize) -> Range {
        Range {
            start: Position::new(line, start),
            end: Position::new(line, end),
        }
    }

    #[rstest]
    #[case(
        InnerError::Parse(ParseError::UnexpectedToken(Token { range: range(1, 5, 6), kind: TokenKind::Comma })),
        "ParseError::UnexpectedToken",
        4
    )]
    #[case(
        InnerError::Compile(CompileError::BreakOutsideLoop(range(2, 1, 7))),
        "CompileError::BreakOutsideLoop",
        10
    )]
    #[case(
        InnerError::Runtime(RuntimeError::not_defined(Ident::new("y")).or_at(range(2, 5, 6))),
        "RuntimeError::NameError",
        14
    )]
    #[case(
        InnerError::Inversion(InversionError::NoPullSource(Ident::new("f"))),
        "InversionError::NoPullSource",
        0
    )]
    fn test_from_error(#[case] cause: InnerError, #[case] code: &str, #[case] offset: usize) {
        let err = Error::from_error("x = 1, 2;\nbreak;", cause);
        assert_eq!(err.code().map(|c| c.to_string()), Some(code.to_string()));
        assert_eq!(err.location.offset(), offset);
        assert!(err.location.len() >= 1);
    }

    #[test]
    fn test_runtime_error_code_uses_kind() {
        let err = Error::from_error(
            "",
            CoroutineError::Runtime(RuntimeError::new(ExceptionKind::RecursionError, "too deep")),
        );
        assert_eq!(err.code().unwrap().to_string(), "RuntimeError::RecursionError");
        assert!(err.help().is_some());
        assert_eq!(err.to_string(), "RecursionError: too deep");
    }
}
