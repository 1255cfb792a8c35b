use std::fmt::{self, Display, Formatter};

use smol_str::SmolStr;

use crate::range::Range;

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone)]
pub struct Token {
    pub range: Range,
    pub kind: TokenKind,
}

impl Token {
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone)]
pub enum TokenKind {
    And,
    Asterisk,
    At,
    BoolLiteral(bool),
    Break,
    Colon,
    Comma,
    Comment(String),
    Continue,
    Def,
    Dot,
    Elif,
    Else,
    Eof,
    Equal,
    EqEq,
    Except,
    For,
    Gt,
    Gte,
    Ident(SmolStr),
    If,
    In,
    IntLiteral(i64),
    LBrace,
    LBracket,
    LParen,
    Lt,
    Lte,
    Minus,
    NeEq,
    None,
    Not,
    Or,
    Pass,
    Percent,
    Plus,
    RBrace,
    RBracket,
    Return,
    RParen,
    SemiColon,
    Slash,
    StringLiteral(String),
    Try,
    While,
    Yield,
}

impl TokenKind {
    /// Maps a reserved word to its keyword token.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "and" => TokenKind::And,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "def" => TokenKind::Def,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "except" => TokenKind::Except,
            "False" => TokenKind::BoolLiteral(false),
            "for" => TokenKind::For,
            "if" => TokenKind::If,
            "in" => TokenKind::In,
            "None" => TokenKind::None,
            "not" => TokenKind::Not,
            "or" => TokenKind::Or,
            "pass" => TokenKind::Pass,
            "return" => TokenKind::Return,
            "True" => TokenKind::BoolLiteral(true),
            "try" => TokenKind::Try,
            "while" => TokenKind::While,
            "yield" => TokenKind::Yield,
            _ => return None,
        };
        Some(kind)
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}", self.kind)
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match &self {
            TokenKind::And => write!(f, "and"),
            TokenKind::Asterisk => write!(f, "*"),
            TokenKind::At => write!(f, "@"),
            TokenKind::BoolLiteral(true) => write!(f, "True"),
            TokenKind::BoolLiteral(false) => write!(f, "False"),
            TokenKind::Break => write!(f, "break"),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Comment(comment) => write!(f, "# {}", comment.trim()),
            TokenKind::Continue => write!(f, "continue"),
            TokenKind::Def => write!(f, "def"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Elif => write!(f, "elif"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::Eof => write!(f, ""),
            TokenKind::Equal => write!(f, "="),
            TokenKind::EqEq => write!(f, "=="),
            TokenKind::Except => write!(f, "except"),
            TokenKind::For => write!(f, "for"),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::Gte => write!(f, ">="),
            TokenKind::Ident(ident) => write!(f, "{}", ident),
            TokenKind::If => write!(f, "if"),
            TokenKind::In => write!(f, "in"),
            TokenKind::IntLiteral(n) => write!(f, "{}", n),
            TokenKind::LBrace => write!(f, "{{"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::LParen => write!(f, "("),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Lte => write!(f, "<="),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::NeEq => write!(f, "!="),
            TokenKind::None => write!(f, "None"),
            TokenKind::Not => write!(f, "not"),
            TokenKind::Or => write!(f, "or"),
            TokenKind::Pass => write!(f, "pass"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::RBrace => write!(f, "}}"),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::Return => write!(f, "return"),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::SemiColon => write!(f, ";"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::StringLiteral(s) => write!(f, "{:?}", s),
            TokenKind::Try => write!(f, "try"),
            TokenKind::While => write!(f, "while"),
            TokenKind::Yield => write!(f, "yield"),
        }
    }
}
