//! `coflip` turns pull-based generators into push-based coroutines.
//!
//! Routines are written in a small brace-delimited language. A routine that
//! iterates one of its parameters and yields results is rewritten so that the
//! values arrive one at a time through [`CoroutineHandle::send`] and results are
//! sent to the same parameter, now bound to a downstream [`Receiver`].
//!
//! ## Examples
//!
//! ```rust
//! use std::rc::Rc;
//! use coflip::{Engine, Receiver, RecordingSink, Value};
//!
//! let mut engine = Engine::default();
//! engine
//!     .load(
//!         "@invertible
//!          def pairs(source) {
//!              buf = [];
//!              for elem in source {
//!                  buf.append(elem);
//!                  if len(buf) >= 2 { yield tuple(buf); buf = []; }
//!              }
//!          }",
//!     )
//!     .unwrap();
//!
//! let sink = Rc::new(RecordingSink::new());
//! let handle = engine
//!     .activate("pairs", vec![Value::Receiver(Rc::clone(&sink) as Rc<dyn Receiver>)])
//!     .unwrap();
//! coflip::push_all((1..=5).map(Value::Int), &handle).unwrap();
//!
//! assert_eq!(
//!     *sink.values(),
//!     vec![
//!         Value::tuple(vec![Value::Int(1), Value::Int(2)]),
//!         Value::tuple(vec![Value::Int(3), Value::Int(4)]),
//!     ]
//! );
//!
//! // The rewritten tree can be printed back as source.
//! let module = coflip::parse("def f(xs) { for x in xs { yield x; } }").unwrap();
//! let def = module.function("f").unwrap().clone();
//! let inverted = coflip::invert_def(def, &coflip::InvertOptions::default()).unwrap();
//! assert!(inverted.to_code().contains("receive loop"));
//! ```
pub mod ast;
pub mod compiler;
pub mod coroutine;
pub mod engine;
pub mod error;
pub mod ident;
pub mod invert;
pub mod lexer;
pub mod range;
pub mod value;
pub mod vm;

use ast::parser::Parser;
use error::InnerError;
use lexer::Lexer;

pub use ast::{FunctionDef, Module};
pub use compiler::{Code, CodeKind, CompileError, Materializer};
pub use coroutine::{
    Activator, CoroutineError, CoroutineHandle, Generator, Receiver, RecordingSink, push_all,
};
pub use engine::Engine;
pub use error::Error;
pub use ident::Ident;
pub use invert::{
    AnalysisResult, Analyzer, InversionError, Options as InvertOptions, Transformer, invert,
    invert_def,
};
pub use lexer::Options as LexerOptions;
pub use lexer::token::{Token, TokenKind};
pub use range::{Position, Range};
pub use value::{Function, Invertible, Value};
pub use vm::{
    Vm,
    error::{ExceptionKind, RuntimeError},
    namespace::{Captures, Namespace},
};

#[allow(clippy::result_large_err)]
pub fn parse(code: &str) -> Result<Module, Error> {
    let tokens = tokenize(code, LexerOptions::default())?;
    Parser::new(tokens.iter())
        .parse()
        .map_err(|e| Error::from_error(code, InnerError::Parse(e)))
}

#[allow(clippy::result_large_err)]
pub fn tokenize(code: &str, options: LexerOptions) -> Result<Vec<Token>, Error> {
    Lexer::new(options)
        .tokenize(code)
        .map_err(|e| Error::from_error(code, InnerError::Lexer(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reports_location() {
        let err = parse("x = 1\ny = 2;").unwrap_err();
        assert!(matches!(err.cause, InnerError::Parse(_)));
        assert_eq!(err.source_code, "x = 1\ny = 2;");
    }

    #[test]
    fn test_tokenize_with_comments() {
        let tokens = tokenize(
            "# note\nx = 1;",
            LexerOptions {
                include_comments: true,
            },
        )
        .unwrap();
        assert!(matches!(tokens[0].kind, TokenKind::Comment(_)));
        assert!(tokens.last().unwrap().is_eof());
    }
}
