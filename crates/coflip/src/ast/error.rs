use thiserror::Error;

use crate::{lexer::token::Token, range::Range};

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Unexpected token `{}`", if .0.is_eof() { "EOF".to_string() } else { .0.to_string() })]
    UnexpectedToken(Token),
    #[error("Unexpected EOF detected")]
    UnexpectedEOFDetected,
    #[error("Expected a closing parenthesis `)` but got `{}` delimiter", if .0.is_eof() { "EOF".to_string() } else { .0.to_string() })]
    ExpectedClosingParen(Token),
    #[error("Expected a closing brace `}}` but got `{}` delimiter", if .0.is_eof() { "EOF".to_string() } else { .0.to_string() })]
    ExpectedClosingBrace(Token),
    #[error("Expected a closing bracket `]` but got `{}` delimiter", if .0.is_eof() { "EOF".to_string() } else { .0.to_string() })]
    ExpectedClosingBracket(Token),
    #[error("Expected `;` but got `{}`", if .0.is_eof() { "EOF".to_string() } else { .0.to_string() })]
    ExpectedSemiColon(Token),
    #[error("Cannot assign to this expression")]
    InvalidAssignmentTarget(Range),
}

impl ParseError {
    pub fn range(&self) -> Option<Range> {
        match self {
            ParseError::UnexpectedToken(token)
            | ParseError::ExpectedClosingParen(token)
            | ParseError::ExpectedClosingBrace(token)
            | ParseError::ExpectedClosingBracket(token)
            | ParseError::ExpectedSemiColon(token) => Some(token.range),
            ParseError::InvalidAssignmentTarget(range) => Some(*range),
            ParseError::UnexpectedEOFDetected => None,
        }
    }
}
