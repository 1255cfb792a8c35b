use std::iter::Peekable;

use crate::ident::Ident;
use crate::lexer::token::{Token, TokenKind};
use crate::range::Range;

use super::error::ParseError;
use super::node::{
    Args, BinaryOp, Block, BoolOp, ExceptHandler, Expr, ExprKind, FunctionDef, Literal, Module,
    NodeId, ReceiveKind, Stmt, StmtKind, Target, UnaryOp,
};

const ON_CLOSE: &str = "on_close";
const HANDLE: &str = "handle";
const RECEIVE: &str = "receive";

pub struct Parser<'a> {
    tokens: Peekable<core::slice::Iter<'a, Token>>,
    next_id: u32,
    last_range: Range,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: core::slice::Iter<'a, Token>) -> Self {
        Self {
            tokens: tokens.peekable(),
            next_id: 0,
            last_range: Range::default(),
        }
    }

    pub fn parse(&mut self) -> Result<Module, ParseError> {
        let mut body = Vec::new();

        loop {
            match self.peek_kind() {
                Some(TokenKind::Eof) | None => break,
                Some(TokenKind::Comment(_)) => {
                    self.advance()?;
                }
                Some(_) => body.push(self.parse_stmt()?),
            }
        }

        Ok(Module { body })
    }

    fn node_id(&mut self) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        id
    }

    #[inline(always)]
    fn peek_kind(&mut self) -> Option<&'a TokenKind> {
        self.tokens.peek().copied().map(|token| &token.kind)
    }

    /// Kind of the token after the next one.
    fn peek_second_kind(&self) -> Option<&'a TokenKind> {
        self.tokens.clone().nth(1).map(|token| &token.kind)
    }

    #[inline(always)]
    fn peek_is(&mut self, kind: &TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn advance(&mut self) -> Result<&'a Token, ParseError> {
        match self.tokens.next() {
            Some(token) if token.is_eof() => Err(ParseError::UnexpectedEOFDetected),
            Some(token) => {
                self.last_range = token.range;
                Ok(token)
            }
            None => Err(ParseError::UnexpectedEOFDetected),
        }
    }

    fn expect<F>(&mut self, kind: &TokenKind, on_mismatch: F) -> Result<&'a Token, ParseError>
    where
        F: FnOnce(Token) -> ParseError,
    {
        match self.tokens.peek().copied() {
            Some(token) if &token.kind == kind => self.advance(),
            Some(token) => Err(on_mismatch(token.clone())),
            None => Err(ParseError::UnexpectedEOFDetected),
        }
    }

    fn expect_semi_colon(&mut self) -> Result<(), ParseError> {
        self.expect(&TokenKind::SemiColon, ParseError::ExpectedSemiColon)
            .map(|_| ())
    }

    fn expect_ident(&mut self) -> Result<(Ident, Range), ParseError> {
        let token = self.advance()?;
        match &token.kind {
            TokenKind::Ident(name) => Ok((Ident::new(name), token.range)),
            _ => Err(ParseError::UnexpectedToken(token.clone())),
        }
    }

    fn since(&self, start: Range) -> Range {
        start.to(&self.last_range)
    }

    fn stmt(&mut self, kind: StmtKind, range: Range) -> Stmt {
        Stmt {
            id: self.node_id(),
            range,
            kind,
        }
    }

    fn expr(&mut self, kind: ExprKind, range: Range) -> Expr {
        Expr {
            id: self.node_id(),
            range,
            kind,
        }
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(&TokenKind::LBrace, ParseError::UnexpectedToken)?;
        let mut block = Vec::new();

        loop {
            match self.peek_kind() {
                Some(TokenKind::RBrace) => {
                    self.advance()?;
                    return Ok(block);
                }
                Some(TokenKind::Eof) | None => {
                    let token = self.tokens.peek().map(|t| (*t).clone());
                    return Err(token
                        .map(ParseError::ExpectedClosingBrace)
                        .unwrap_or(ParseError::UnexpectedEOFDetected));
                }
                Some(TokenKind::Comment(_)) => {
                    self.advance()?;
                }
                Some(_) => block.push(self.parse_stmt()?),
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::At) | Some(TokenKind::Def) => self.parse_def(),
            Some(TokenKind::For) => self.parse_for(),
            Some(TokenKind::While) => self.parse_while(),
            Some(TokenKind::If) => self.parse_if(),
            Some(TokenKind::Try) => self.parse_try(),
            Some(TokenKind::Return) => self.parse_return(),
            Some(TokenKind::Break) => self.parse_keyword_stmt(StmtKind::Break),
            Some(TokenKind::Continue) => self.parse_keyword_stmt(StmtKind::Continue),
            Some(TokenKind::Pass) => self.parse_keyword_stmt(StmtKind::Pass),
            Some(TokenKind::Ident(name))
                if name == ON_CLOSE && self.peek_second_kind() == Some(&TokenKind::LBrace) =>
            {
                self.parse_on_close()
            }
            Some(TokenKind::Eof) | None => Err(ParseError::UnexpectedEOFDetected),
            Some(_) => self.parse_simple_stmt(),
        }
    }

    // `on_close { } handle { }` and `receive loop|step` are contextual so that
    // pull-form code may still use these words as names.
    fn parse_on_close(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance()?.range;
        let body = self.parse_block()?;
        let token = self.advance()?;
        match &token.kind {
            TokenKind::Ident(name) if name == HANDLE => {}
            _ => return Err(ParseError::UnexpectedToken(token.clone())),
        }
        let handler = self.parse_block()?;
        let range = self.since(start);
        Ok(self.stmt(StmtKind::OnClose { body, handler }, range))
    }

    fn parse_receive(&mut self, start: Range) -> Result<Expr, ParseError> {
        let token = self.advance()?;
        let kind = match &token.kind {
            TokenKind::Ident(name) if name == "loop" => ReceiveKind::Loop,
            TokenKind::Ident(name) if name == "step" => ReceiveKind::Step,
            _ => return Err(ParseError::UnexpectedToken(token.clone())),
        };
        let range = self.since(start);
        Ok(self.expr(ExprKind::Receive(kind), range))
    }

    fn parse_keyword_stmt(&mut self, kind: StmtKind) -> Result<Stmt, ParseError> {
        let start = self.advance()?.range;
        self.expect_semi_colon()?;
        let range = self.since(start);
        Ok(self.stmt(kind, range))
    }

    fn parse_decorators(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut decorators = Vec::new();
        while self.peek_is(&TokenKind::At) {
            self.advance()?;
            decorators.push(self.parse_postfix_expr()?);
        }
        Ok(decorators)
    }

    fn parse_def(&mut self) -> Result<Stmt, ParseError> {
        let start = self
            .tokens
            .peek()
            .map(|token| token.range)
            .unwrap_or_default();
        let decorators = self.parse_decorators()?;
        self.expect(&TokenKind::Def, ParseError::UnexpectedToken)?;
        let (name, _) = self.expect_ident()?;
        self.expect(&TokenKind::LParen, ParseError::UnexpectedToken)?;

        let mut params = Vec::new();
        while !self.peek_is(&TokenKind::RParen) {
            let (param, _) = self.expect_ident()?;
            params.push(param);
            if !self.peek_is(&TokenKind::Comma) {
                break;
            }
            self.advance()?;
        }
        self.expect(&TokenKind::RParen, ParseError::ExpectedClosingParen)?;

        let body = self.parse_block()?;
        let range = self.since(start);
        let def = FunctionDef {
            name,
            params,
            decorators,
            body,
            range,
        };
        Ok(self.stmt(StmtKind::FunctionDef(Box::new(def)), range))
    }

    fn parse_orelse(&mut self) -> Result<Block, ParseError> {
        if self.peek_is(&TokenKind::Else) {
            self.advance()?;
            self.parse_block()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance()?.range;
        let target = self.parse_target_list()?;
        self.expect(&TokenKind::In, ParseError::UnexpectedToken)?;
        let iter = self.parse_expr()?;
        let body = self.parse_block()?;
        let orelse = self.parse_orelse()?;
        let range = self.since(start);
        Ok(self.stmt(
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            range,
        ))
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance()?.range;
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        let orelse = self.parse_orelse()?;
        let range = self.since(start);
        Ok(self.stmt(StmtKind::While { test, body, orelse }, range))
    }

    // `elif` chains nest into the `orelse` of the preceding branch.
    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance()?.range;
        let test = self.parse_expr()?;
        let body = self.parse_block()?;

        let orelse = match self.peek_kind() {
            Some(TokenKind::Elif) => vec![self.parse_if()?],
            Some(TokenKind::Else) => {
                self.advance()?;
                self.parse_block()?
            }
            _ => Vec::new(),
        };

        let range = self.since(start);
        Ok(self.stmt(StmtKind::If { test, body, orelse }, range))
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance()?.range;
        let body = self.parse_block()?;
        let mut handlers = Vec::new();

        while self.peek_is(&TokenKind::Except) {
            let handler_start = self.advance()?.range;
            let kind = match self.peek_kind() {
                Some(TokenKind::Ident(_)) => Some(self.expect_ident()?.0),
                _ => None,
            };
            let body = self.parse_block()?;
            handlers.push(ExceptHandler {
                kind,
                body,
                range: self.since(handler_start),
            });
        }

        if handlers.is_empty() {
            return Err(match self.tokens.peek() {
                Some(token) => ParseError::UnexpectedToken((*token).clone()),
                None => ParseError::UnexpectedEOFDetected,
            });
        }

        let range = self.since(start);
        Ok(self.stmt(StmtKind::Try { body, handlers }, range))
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        let start = self.advance()?.range;
        let value = if self.peek_is(&TokenKind::SemiColon) {
            None
        } else {
            Some(self.parse_expr_list()?)
        };
        self.expect_semi_colon()?;
        let range = self.since(start);
        Ok(self.stmt(StmtKind::Return(value), range))
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self
            .tokens
            .peek()
            .map(|token| token.range)
            .unwrap_or_default();

        if self.peek_is(&TokenKind::Yield) {
            let value = self.parse_yield()?;
            self.expect_semi_colon()?;
            let range = self.since(start);
            return Ok(self.stmt(StmtKind::Expr(value), range));
        }

        let expr = self.parse_expr_list()?;

        if self.peek_is(&TokenKind::Equal) {
            self.advance()?;
            let target = Self::to_target(expr)?;
            let value = if self.peek_is(&TokenKind::Yield) {
                self.parse_yield()?
            } else {
                self.parse_expr_list()?
            };
            self.expect_semi_colon()?;
            let range = self.since(start);
            return Ok(self.stmt(StmtKind::Assign { target, value }, range));
        }

        self.expect_semi_colon()?;
        let range = self.since(start);
        Ok(self.stmt(StmtKind::Expr(expr), range))
    }

    fn to_target(expr: Expr) -> Result<Target, ParseError> {
        match expr.kind {
            ExprKind::Name(name) => Ok(Target::Name(name)),
            ExprKind::Tuple(items) | ExprKind::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(Self::to_target)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            ExprKind::Subscript { value, index } => Ok(Target::Subscript { value, index }),
            _ => Err(ParseError::InvalidAssignmentTarget(expr.range)),
        }
    }

    fn parse_target_list(&mut self) -> Result<Target, ParseError> {
        let first = self.parse_postfix_expr()?;
        if !self.peek_is(&TokenKind::Comma) {
            return Self::to_target(first);
        }

        let start = first.range;
        let mut items = vec![first];
        while self.peek_is(&TokenKind::Comma) {
            self.advance()?;
            if self.peek_is(&TokenKind::In) {
                break;
            }
            items.push(self.parse_postfix_expr()?);
        }
        let range = self.since(start);
        let tuple = self.expr(ExprKind::Tuple(items), range);
        Self::to_target(tuple)
    }

    fn parse_yield(&mut self) -> Result<Expr, ParseError> {
        let start = self.advance()?.range;
        let value = match self.peek_kind() {
            Some(TokenKind::SemiColon) | Some(TokenKind::RParen) => None,
            _ => Some(Box::new(self.parse_expr_list()?)),
        };
        let range = self.since(start);
        Ok(self.expr(ExprKind::Yield(value), range))
    }

    /// `a, b` parses as a tuple; a single expression stays as is.
    fn parse_expr_list(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_expr()?;
        if !self.peek_is(&TokenKind::Comma) {
            return Ok(first);
        }

        let start = first.range;
        let mut items = vec![first];
        while self.peek_is(&TokenKind::Comma) {
            self.advance()?;
            if matches!(
                self.peek_kind(),
                Some(TokenKind::SemiColon) | Some(TokenKind::Equal) | Some(TokenKind::RParen)
            ) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        let range = self.since(start);
        Ok(self.expr(ExprKind::Tuple(items), range))
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and_expr()?;
        while self.peek_is(&TokenKind::Or) {
            self.advance()?;
            let rhs = self.parse_and_expr()?;
            let range = lhs.range.to(&rhs.range);
            lhs = self.expr(
                ExprKind::BoolOp {
                    op: BoolOp::Or,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                range,
            );
        }
        Ok(lhs)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not_expr()?;
        while self.peek_is(&TokenKind::And) {
            self.advance()?;
            let rhs = self.parse_not_expr()?;
            let range = lhs.range.to(&rhs.range);
            lhs = self.expr(
                ExprKind::BoolOp {
                    op: BoolOp::And,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                range,
            );
        }
        Ok(lhs)
    }

    fn parse_not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.peek_is(&TokenKind::Not) {
            let start = self.advance()?.range;
            let operand = self.parse_not_expr()?;
            let range = start.to(&operand.range);
            return Ok(self.expr(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                range,
            ));
        }
        self.parse_binary_expr(1)
    }

    #[inline(always)]
    fn binary_op(kind: &TokenKind) -> Option<(BinaryOp, u8)> {
        let op = match kind {
            TokenKind::EqEq => (BinaryOp::Eq, 1),
            TokenKind::NeEq => (BinaryOp::Ne, 1),
            TokenKind::Lt => (BinaryOp::Lt, 1),
            TokenKind::Lte => (BinaryOp::Lte, 1),
            TokenKind::Gt => (BinaryOp::Gt, 1),
            TokenKind::Gte => (BinaryOp::Gte, 1),
            TokenKind::Plus => (BinaryOp::Add, 2),
            TokenKind::Minus => (BinaryOp::Sub, 2),
            TokenKind::Asterisk => (BinaryOp::Mul, 3),
            TokenKind::Slash => (BinaryOp::Div, 3),
            TokenKind::Percent => (BinaryOp::Mod, 3),
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary_expr(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary_expr()?;

        while let Some((op, prec)) = self.peek_kind().and_then(Self::binary_op) {
            if prec < min_prec {
                break;
            }
            self.advance()?;
            let rhs = self.parse_binary_expr(prec + 1)?;
            let range = lhs.range.to(&rhs.range);
            lhs = self.expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                range,
            );
        }

        Ok(lhs)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, ParseError> {
        if self.peek_is(&TokenKind::Minus) {
            let start = self.advance()?.range;
            let operand = self.parse_unary_expr()?;
            let range = start.to(&operand.range);
            return Ok(self.expr(
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                range,
            ));
        }
        self.parse_postfix_expr()
    }

    fn parse_postfix_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary_expr()?;

        loop {
            match self.peek_kind() {
                Some(TokenKind::LParen) => {
                    self.advance()?;
                    let args = self.parse_args()?;
                    let range = self.since(expr.range);
                    expr = self.expr(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                        range,
                    );
                }
                Some(TokenKind::LBracket) => {
                    self.advance()?;
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket, ParseError::ExpectedClosingBracket)?;
                    let range = self.since(expr.range);
                    expr = self.expr(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        range,
                    );
                }
                Some(TokenKind::Dot) => {
                    self.advance()?;
                    let (attr, _) = self.expect_ident()?;
                    let range = self.since(expr.range);
                    expr = self.expr(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        range,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_args(&mut self) -> Result<Args, ParseError> {
        let mut args = Vec::new();
        while !self.peek_is(&TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if !self.peek_is(&TokenKind::Comma) {
                break;
            }
            self.advance()?;
        }
        self.expect(&TokenKind::RParen, ParseError::ExpectedClosingParen)?;
        Ok(args)
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance()?;
        let range = token.range;

        match &token.kind {
            TokenKind::IntLiteral(n) => Ok(self.expr(ExprKind::Literal(Literal::Int(*n)), range)),
            TokenKind::StringLiteral(s) => {
                Ok(self.expr(ExprKind::Literal(Literal::String(s.clone())), range))
            }
            TokenKind::BoolLiteral(b) => Ok(self.expr(ExprKind::Literal(Literal::Bool(*b)), range)),
            TokenKind::None => Ok(self.expr(ExprKind::Literal(Literal::None), range)),
            TokenKind::Ident(name)
                if name == RECEIVE
                    && matches!(self.peek_kind(), Some(TokenKind::Ident(kind)) if kind == "loop" || kind == "step") =>
            {
                self.parse_receive(range)
            }
            TokenKind::Ident(name) => Ok(self.expr(ExprKind::Name(Ident::new(name)), range)),
            TokenKind::LParen => self.parse_paren(range),
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.peek_is(&TokenKind::RBracket) {
                    items.push(self.parse_expr()?);
                    if !self.peek_is(&TokenKind::Comma) {
                        break;
                    }
                    self.advance()?;
                }
                self.expect(&TokenKind::RBracket, ParseError::ExpectedClosingBracket)?;
                let range = self.since(range);
                Ok(self.expr(ExprKind::List(items), range))
            }
            _ => Err(ParseError::UnexpectedToken(token.clone())),
        }
    }

    fn parse_paren(&mut self, start: Range) -> Result<Expr, ParseError> {
        if self.peek_is(&TokenKind::RParen) {
            self.advance()?;
            let range = self.since(start);
            return Ok(self.expr(ExprKind::Tuple(Vec::new()), range));
        }

        let mut inner = if self.peek_is(&TokenKind::Yield) {
            self.parse_yield()?
        } else {
            self.parse_expr_list()?
        };

        self.expect(&TokenKind::RParen, ParseError::ExpectedClosingParen)?;

        // `(x,)` is a one-element tuple; keep it distinct from `(x)`.
        if let ExprKind::Tuple(_) = inner.kind {
            inner.range = self.since(start);
        }
        Ok(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{Lexer, Options};
    use rstest::rstest;

    fn parse(code: &str) -> Result<Module, ParseError> {
        let tokens = Lexer::new(Options::default()).tokenize(code).unwrap();
        Parser::new(tokens.iter()).parse()
    }

    fn first_function(code: &str) -> FunctionDef {
        match parse(code).unwrap().body.remove(0).kind {
            StmtKind::FunctionDef(def) => *def,
            kind => panic!("expected a function, got {:?}", kind),
        }
    }

    #[test]
    fn test_parse_function_with_decorator() {
        let def = first_function("@invertible\ndef pairs(source) { pass; }");
        assert_eq!(def.name, Ident::new("pairs"));
        assert_eq!(def.params, vec![Ident::new("source")]);
        assert_eq!(def.decorators.len(), 1);
        assert!(def.has_decorator(Ident::new("invertible")));
        assert!(matches!(def.body[0].kind, StmtKind::Pass));
    }

    #[test]
    fn test_parse_for_else() {
        let def = first_function("def f(xs) { for x in xs { yield x; } else { yield 0; } }");
        match &def.body[0].kind {
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                assert_eq!(*target, Target::Name(Ident::new("x")));
                assert_eq!(iter.name(), Some(Ident::new("xs")));
                assert_eq!(body.len(), 1);
                assert_eq!(orelse.len(), 1);
            }
            kind => panic!("expected a for loop, got {:?}", kind),
        }
    }

    #[test]
    fn test_parse_tuple_target() {
        let def = first_function("def f(xs) { for a, b in xs { pass; } }");
        assert!(matches!(
            &def.body[0].kind,
            StmtKind::For { target: Target::Tuple(items), .. } if items.len() == 2
        ));
    }

    #[test]
    fn test_parse_elif_nests() {
        let def = first_function("def f(x) { if x == 0 { pass; } elif x == 1 { pass; } else { pass; } }");
        match &def.body[0].kind {
            StmtKind::If { orelse, .. } => {
                assert!(matches!(orelse[0].kind, StmtKind::If { ref orelse, .. } if orelse.len() == 1));
            }
            kind => panic!("expected if, got {:?}", kind),
        }
    }

    #[test]
    fn test_parse_try_except() {
        let def = first_function(
            "def f(it) { try { while True { yield next(it); } } except StopIteration { pass; } }",
        );
        match &def.body[0].kind {
            StmtKind::Try { handlers, .. } => {
                assert_eq!(handlers[0].kind, Some(Ident::new("StopIteration")));
            }
            kind => panic!("expected try, got {:?}", kind),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let module = parse("x = 1 + 2 * 3 == 7 and not False;").unwrap();
        match &module.body[0].kind {
            StmtKind::Assign { value, .. } => match &value.kind {
                ExprKind::BoolOp { op, lhs, rhs } => {
                    assert_eq!(*op, BoolOp::And);
                    assert!(matches!(lhs.kind, ExprKind::Binary { op: BinaryOp::Eq, .. }));
                    assert!(matches!(rhs.kind, ExprKind::Unary { op: UnaryOp::Not, .. }));
                }
                kind => panic!("expected and, got {:?}", kind),
            },
            kind => panic!("expected assign, got {:?}", kind),
        }
    }

    #[test]
    fn test_parse_method_call_and_subscript() {
        let module = parse("buf.append(xs[0]);").unwrap();
        match &module.body[0].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Call { func, args },
                ..
            }) => {
                assert!(matches!(func.kind, ExprKind::Attribute { .. }));
                assert!(matches!(args[0].kind, ExprKind::Subscript { .. }));
            }
            kind => panic!("expected call, got {:?}", kind),
        }
    }

    #[test]
    fn test_parse_yield_forms() {
        let def = first_function("def f(xs) { yield; yield 1, 2; x = yield; y = (yield 3); }");
        assert!(matches!(&def.body[0].kind, StmtKind::Expr(Expr { kind: ExprKind::Yield(None), .. })));
        assert!(matches!(
            &def.body[1].kind,
            StmtKind::Expr(Expr { kind: ExprKind::Yield(Some(value)), .. }) if matches!(value.kind, ExprKind::Tuple(_))
        ));
        assert!(matches!(&def.body[2].kind, StmtKind::Assign { value: Expr { kind: ExprKind::Yield(None), .. }, .. }));
        assert!(matches!(&def.body[3].kind, StmtKind::Assign { value: Expr { kind: ExprKind::Yield(Some(_)), .. }, .. }));
    }

    #[test]
    fn test_parse_push_form() {
        let def = first_function(
            "def f(out) { on_close { while go { x = receive loop; y = receive step; } } handle { go = False; } }",
        );
        let StmtKind::OnClose { body, handler } = &def.body[0].kind else {
            panic!("expected on_close");
        };
        assert_eq!(handler.len(), 1);
        let StmtKind::While { body, .. } = &body[0].kind else {
            panic!("expected while");
        };
        assert!(matches!(
            &body[0].kind,
            StmtKind::Assign { value: Expr { kind: ExprKind::Receive(ReceiveKind::Loop), .. }, .. }
        ));
        assert!(matches!(
            &body[1].kind,
            StmtKind::Assign { value: Expr { kind: ExprKind::Receive(ReceiveKind::Step), .. }, .. }
        ));
    }

    #[test]
    fn test_contextual_words_stay_names() {
        let def = first_function("def f(receive, handle) { on_close = receive + handle; }");
        assert_eq!(def.params, vec![Ident::new("receive"), Ident::new("handle")]);
        assert!(matches!(
            &def.body[0].kind,
            StmtKind::Assign { target: Target::Name(name), value: Expr { kind: ExprKind::Binary { .. }, .. } } if *name == Ident::new("on_close")
        ));
    }

    #[test]
    fn test_node_ids_are_unique() {
        let module = parse("def f(xs) { for x in xs { yield x; } }").unwrap();
        let def = module.function("f").unwrap();
        let loop_id = def.body[0].id;
        let outer_id = module.body[0].id;
        assert_ne!(loop_id, outer_id);
        assert_ne!(loop_id, NodeId::SYNTHESIZED);
    }

    #[test]
    fn test_parse_unclosed_block() {
        assert!(matches!(
            parse("def f(x) { pass; "),
            Err(ParseError::ExpectedClosingBrace(token)) if token.is_eof()
        ));
    }

    #[test]
    fn test_parse_missing_semi_colon() {
        assert!(matches!(
            parse("x = 1"),
            Err(ParseError::ExpectedSemiColon(token)) if token.is_eof()
        ));
    }

    #[test]
    fn test_parse_try_without_handler() {
        assert!(matches!(
            parse("try { pass; }"),
            Err(ParseError::UnexpectedToken(token)) if token.is_eof()
        ));
    }

    #[rstest]
    #[case("1 = x;")]
    #[case("f() = 2;")]
    #[case("for 1 in xs { pass; }")]
    fn test_parse_invalid_target(#[case] code: &str) {
        assert!(matches!(parse(code), Err(ParseError::InvalidAssignmentTarget(_))));
    }

    #[rstest]
    #[case("x = (1;")]
    #[case("pass pass;")]
    #[case("def (x) {}")]
    fn test_parse_unexpected_token(#[case] code: &str) {
        assert!(parse(code).is_err());
    }
}
