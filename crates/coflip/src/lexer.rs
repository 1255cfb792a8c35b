pub mod error;
pub mod token;

use error::LexerError;
use nom::Parser;
use nom::bytes::complete::take_till;
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{escaped_transform, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, none_of},
    combinator::{map, map_res, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
};
use nom_locate::position;
use smol_str::SmolStr;
use token::{Token, TokenKind};

use crate::range::{Range, Span};

macro_rules! define_token_parser {
    ($name:ident, $tag:expr, $kind:expr) => {
        fn $name(input: Span) -> IResult<Span, Token> {
            map(tag($tag), |span: Span| Token {
                range: span.into(),
                kind: $kind,
            })
            .parse(input)
        }
    };
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub include_comments: bool,
}

pub struct Lexer {
    options: Options,
}

impl Lexer {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn tokenize(&self, input: &str) -> Result<Vec<Token>, LexerError> {
        match tokens(Span::new(input)) {
            Ok((span, tokens)) => {
                if !span.fragment().is_empty() {
                    return Err(LexerError::UnexpectedToken(Token {
                        range: start_of(span.into()),
                        kind: TokenKind::Eof,
                    }));
                }

                let eof: Range = span.into();
                let mut tokens = tokens
                    .into_iter()
                    .filter(|token| {
                        self.options.include_comments
                            || !matches!(token.kind, TokenKind::Comment(_))
                    })
                    .collect::<Vec<_>>();
                tokens.push(Token {
                    range: eof,
                    kind: TokenKind::Eof,
                });
                Ok(tokens)
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                Err(LexerError::UnexpectedToken(Token {
                    range: start_of(e.input.into()),
                    kind: TokenKind::Eof,
                }))
            }
            Err(nom::Err::Incomplete(_)) => Err(LexerError::UnexpectedEOFDetected),
        }
    }
}

fn start_of(range: Range) -> Range {
    Range {
        start: range.start,
        end: range.start,
    }
}

fn inline_comment(input: Span) -> IResult<Span, Token> {
    map(
        preceded(char('#'), take_till(|c| c == '\n' || c == '\r')),
        |span: Span| Token {
            kind: TokenKind::Comment(span.fragment().to_string()),
            range: span.into(),
        },
    )
    .parse(input)
}

define_token_parser!(eq_eq, "==", TokenKind::EqEq);
define_token_parser!(ne_eq, "!=", TokenKind::NeEq);
define_token_parser!(lte, "<=", TokenKind::Lte);
define_token_parser!(gte, ">=", TokenKind::Gte);
define_token_parser!(lt, "<", TokenKind::Lt);
define_token_parser!(gt, ">", TokenKind::Gt);
define_token_parser!(equal, "=", TokenKind::Equal);
define_token_parser!(plus, "+", TokenKind::Plus);
define_token_parser!(minus, "-", TokenKind::Minus);
define_token_parser!(asterisk, "*", TokenKind::Asterisk);
define_token_parser!(slash, "/", TokenKind::Slash);
define_token_parser!(percent, "%", TokenKind::Percent);

define_token_parser!(l_paren, "(", TokenKind::LParen);
define_token_parser!(r_paren, ")", TokenKind::RParen);
define_token_parser!(l_bracket, "[", TokenKind::LBracket);
define_token_parser!(r_bracket, "]", TokenKind::RBracket);
define_token_parser!(l_brace, "{", TokenKind::LBrace);
define_token_parser!(r_brace, "}", TokenKind::RBrace);
define_token_parser!(comma, ",", TokenKind::Comma);
define_token_parser!(semi_colon, ";", TokenKind::SemiColon);
define_token_parser!(colon, ":", TokenKind::Colon);
define_token_parser!(dot, ".", TokenKind::Dot);
define_token_parser!(at, "@", TokenKind::At);
define_token_parser!(
    empty_string,
    "\"\"",
    TokenKind::StringLiteral(String::new())
);
define_token_parser!(
    empty_single_quoted,
    "''",
    TokenKind::StringLiteral(String::new())
);

fn operators(input: Span) -> IResult<Span, Token> {
    alt((
        eq_eq, ne_eq, lte, gte, lt, gt, equal, plus, minus, asterisk, slash, percent,
    ))
    .parse(input)
}

fn punctuations(input: Span) -> IResult<Span, Token> {
    alt((
        l_paren, r_paren, l_bracket, r_bracket, l_brace, r_brace, comma, semi_colon, colon, dot,
        at,
    ))
    .parse(input)
}

fn int_literal(input: Span) -> IResult<Span, Token> {
    map_res(digit1, |span: Span| {
        str::parse::<i64>(span.fragment()).map(|n| Token {
            range: span.into(),
            kind: TokenKind::IntLiteral(n),
        })
    })
    .parse(input)
}

fn string_literal(input: Span) -> IResult<Span, Token> {
    alt((quoted('"', "\"\\"), quoted('\'', "'\\"))).parse(input)
}

fn quoted(
    quote: char,
    excluded: &'static str,
) -> impl FnMut(Span) -> IResult<Span, Token> {
    move |input: Span| {
        let (span, start) = position(input)?;
        let (span, s) = delimited(
            char(quote),
            escaped_transform(
                none_of(excluded),
                '\\',
                alt((
                    value('\\', char('\\')),
                    value('\"', char('\"')),
                    value('\'', char('\'')),
                    value('\r', char('r')),
                    value('\n', char('n')),
                    value('\t', char('t')),
                )),
            ),
            char(quote),
        )
        .parse(span)?;
        let (span, end) = position(span)?;

        Ok((
            span,
            Token {
                range: Range {
                    start: start.into(),
                    end: end.into(),
                },
                kind: TokenKind::StringLiteral(s.to_string()),
            },
        ))
    }
}

fn literals(input: Span) -> IResult<Span, Token> {
    alt((int_literal, empty_string, empty_single_quoted, string_literal)).parse(input)
}

fn ident(input: Span) -> IResult<Span, Token> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
        |span: Span| {
            let kind = TokenKind::keyword(span.fragment())
                .unwrap_or_else(|| TokenKind::Ident(SmolStr::new(span.fragment())));
            Token {
                range: span.into(),
                kind,
            }
        },
    )
    .parse(input)
}

fn token(input: Span) -> IResult<Span, Token> {
    alt((inline_comment, operators, punctuations, literals, ident)).parse(input)
}

fn tokens(input: Span) -> IResult<Span, Vec<Token>> {
    preceded(multispace0, many0(delimited(multispace0, token, multispace0))).parse(input)
}

#[cfg(test)]
mod tests {
    use crate::range::Position;

    use super::*;
    use rstest::rstest;

    fn kinds(code: &str) -> Vec<TokenKind> {
        Lexer::new(Options::default())
            .tokenize(code)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[rstest]
    #[case("for elem in source {",
        vec![
            TokenKind::For,
            TokenKind::Ident(SmolStr::new("elem")),
            TokenKind::In,
            TokenKind::Ident(SmolStr::new("source")),
            TokenKind::LBrace,
            TokenKind::Eof,
        ])]
    #[case("len(buf) >= 2",
        vec![
            TokenKind::Ident(SmolStr::new("len")),
            TokenKind::LParen,
            TokenKind::Ident(SmolStr::new("buf")),
            TokenKind::RParen,
            TokenKind::Gte,
            TokenKind::IntLiteral(2),
            TokenKind::Eof,
        ])]
    #[case("x == None != True",
        vec![
            TokenKind::Ident(SmolStr::new("x")),
            TokenKind::EqEq,
            TokenKind::None,
            TokenKind::NeEq,
            TokenKind::BoolLiteral(true),
            TokenKind::Eof,
        ])]
    #[case("@invertible\ndef f(a, b) {}",
        vec![
            TokenKind::At,
            TokenKind::Ident(SmolStr::new("invertible")),
            TokenKind::Def,
            TokenKind::Ident(SmolStr::new("f")),
            TokenKind::LParen,
            TokenKind::Ident(SmolStr::new("a")),
            TokenKind::Comma,
            TokenKind::Ident(SmolStr::new("b")),
            TokenKind::RParen,
            TokenKind::LBrace,
            TokenKind::RBrace,
            TokenKind::Eof,
        ])]
    #[case("yield \"first: \" + str(val);",
        vec![
            TokenKind::Yield,
            TokenKind::StringLiteral("first: ".to_string()),
            TokenKind::Plus,
            TokenKind::Ident(SmolStr::new("str")),
            TokenKind::LParen,
            TokenKind::Ident(SmolStr::new("val")),
            TokenKind::RParen,
            TokenKind::SemiColon,
            TokenKind::Eof,
        ])]
    #[case("\"\" \"a\\nb\"",
        vec![
            TokenKind::StringLiteral(String::new()),
            TokenKind::StringLiteral("a\nb".to_string()),
            TokenKind::Eof,
        ])]
    #[case("'' 'it' 'a\\'b'",
        vec![
            TokenKind::StringLiteral(String::new()),
            TokenKind::StringLiteral("it".to_string()),
            TokenKind::StringLiteral("a'b".to_string()),
            TokenKind::Eof,
        ])]
    #[case("iterable.__next__() # step\n", vec![
            TokenKind::Ident(SmolStr::new("iterable")),
            TokenKind::Dot,
            TokenKind::Ident(SmolStr::new("__next__")),
            TokenKind::LParen,
            TokenKind::RParen,
            TokenKind::Eof,
        ])]
    #[case("", vec![TokenKind::Eof])]
    fn test_tokenize(#[case] code: &str, #[case] expected: Vec<TokenKind>) {
        assert_eq!(kinds(code), expected);
    }

    #[test]
    fn test_tokenize_keeps_comments_when_asked() {
        let tokens = Lexer::new(Options {
            include_comments: true,
        })
        .tokenize("# hello\npass;")
        .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Comment(" hello".to_string()));
        assert_eq!(tokens[1].kind, TokenKind::Pass);
    }

    #[test]
    fn test_token_range() {
        let tokens = Lexer::new(Options::default())
            .tokenize("def\n  pairs")
            .unwrap();
        assert_eq!(
            tokens[1].range,
            Range {
                start: Position::new(2, 3),
                end: Position::new(2, 8),
            }
        );
    }

    #[rstest]
    #[case("x = $;")]
    #[case("\"unterminated")]
    #[case("a ! b")]
    fn test_tokenize_error(#[case] code: &str) {
        assert!(matches!(
            Lexer::new(Options::default()).tokenize(code),
            Err(LexerError::UnexpectedToken(_))
        ));
    }
}
