use std::fmt::{self, Display, Write};

use super::node::{
    BinaryOp, Block, BoolOp, Expr, ExprKind, FunctionDef, Literal, Module, ReceiveKind, Stmt,
    StmtKind, Target, UnaryOp,
};

const INDENT: &str = "    ";

impl Module {
    /// Renders the module back to source text.
    ///
    /// Trees produced by the parser render to text that parses back to the same
    /// structure. Inverted trees also contain `on_close` and `receive`, which only
    /// the printer knows about.
    pub fn to_code(&self) -> String {
        let mut buf = String::new();
        for (i, stmt) in self.body.iter().enumerate() {
            if i > 0 && matches!(stmt.kind, StmtKind::FunctionDef(_)) {
                buf.push('\n');
            }
            stmt.format_to_code(&mut buf, 0);
        }
        buf
    }
}

impl FunctionDef {
    pub fn to_code(&self) -> String {
        let mut buf = String::new();
        self.format_to_code(&mut buf, 0);
        buf
    }

    fn format_to_code(&self, buf: &mut String, indent: usize) {
        for decorator in &self.decorators {
            push_indent(buf, indent);
            buf.push('@');
            decorator.format_to_code(buf);
            buf.push('\n');
        }
        push_indent(buf, indent);
        write!(buf, "def {}(", self.name).unwrap();
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                buf.push_str(", ");
            }
            write!(buf, "{}", param).unwrap();
        }
        buf.push_str(") ");
        format_block(&self.body, buf, indent);
        buf.push('\n');
    }
}

impl Stmt {
    pub fn to_code(&self) -> String {
        let mut buf = String::new();
        self.format_to_code(&mut buf, 0);
        buf
    }

    fn format_to_code(&self, buf: &mut String, indent: usize) {
        if let StmtKind::FunctionDef(def) = &self.kind {
            def.format_to_code(buf, indent);
            return;
        }

        push_indent(buf, indent);

        match &self.kind {
            StmtKind::FunctionDef(_) => unreachable!(),
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                buf.push_str("for ");
                format_target(target, buf);
                buf.push_str(" in ");
                iter.format_to_code(buf);
                buf.push(' ');
                format_block(body, buf, indent);
                format_orelse(orelse, buf, indent);
            }
            StmtKind::While { test, body, orelse } => {
                buf.push_str("while ");
                test.format_to_code(buf);
                buf.push(' ');
                format_block(body, buf, indent);
                format_orelse(orelse, buf, indent);
            }
            StmtKind::If { test, body, orelse } => {
                format_if(test, body, orelse, buf, indent);
            }
            StmtKind::Try { body, handlers } => {
                buf.push_str("try ");
                format_block(body, buf, indent);
                for handler in handlers {
                    buf.push_str(" except ");
                    if let Some(kind) = handler.kind {
                        write!(buf, "{} ", kind).unwrap();
                    }
                    format_block(&handler.body, buf, indent);
                }
            }
            StmtKind::OnClose { body, handler } => {
                buf.push_str("on_close ");
                format_block(body, buf, indent);
                buf.push_str(" handle ");
                format_block(handler, buf, indent);
            }
            StmtKind::Assign { target, value } => {
                format_target(target, buf);
                buf.push_str(" = ");
                value.format_to_code(buf);
                buf.push(';');
            }
            StmtKind::Expr(expr) => {
                // Statement-level yields are written without parentheses.
                if let ExprKind::Yield(value) = &expr.kind {
                    format_yield(value.as_deref(), buf);
                } else {
                    expr.format_to_code(buf);
                }
                buf.push(';');
            }
            StmtKind::Return(None) => buf.push_str("return;"),
            StmtKind::Return(Some(value)) => {
                buf.push_str("return ");
                value.format_to_code(buf);
                buf.push(';');
            }
            StmtKind::Break => buf.push_str("break;"),
            StmtKind::Continue => buf.push_str("continue;"),
            StmtKind::Pass => buf.push_str("pass;"),
        }

        buf.push('\n');
    }
}

impl Expr {
    pub fn to_code(&self) -> String {
        let mut buf = String::new();
        self.format_to_code(&mut buf);
        buf
    }

    fn format_to_code(&self, buf: &mut String) {
        match &self.kind {
            ExprKind::Literal(literal) => format_literal(literal, buf),
            ExprKind::Name(name) => write!(buf, "{}", name).unwrap(),
            ExprKind::Tuple(items) => {
                buf.push('(');
                format_items(items, buf);
                if items.len() == 1 {
                    buf.push(',');
                }
                buf.push(')');
            }
            ExprKind::List(items) => {
                buf.push('[');
                format_items(items, buf);
                buf.push(']');
            }
            ExprKind::Call { func, args } => {
                func.format_operand(buf);
                buf.push('(');
                format_items(args, buf);
                buf.push(')');
            }
            ExprKind::Attribute { value, attr } => {
                value.format_operand(buf);
                write!(buf, ".{}", attr).unwrap();
            }
            ExprKind::Subscript { value, index } => {
                value.format_operand(buf);
                buf.push('[');
                index.format_to_code(buf);
                buf.push(']');
            }
            ExprKind::Binary { op, lhs, rhs } => {
                lhs.format_operand(buf);
                write!(buf, " {} ", op).unwrap();
                rhs.format_operand(buf);
            }
            ExprKind::Unary { op, operand } => {
                match op {
                    UnaryOp::Neg => buf.push('-'),
                    UnaryOp::Not => buf.push_str("not "),
                }
                operand.format_operand(buf);
            }
            ExprKind::BoolOp { op, lhs, rhs } => {
                lhs.format_operand(buf);
                write!(buf, " {} ", op).unwrap();
                rhs.format_operand(buf);
            }
            ExprKind::Yield(value) => {
                buf.push('(');
                format_yield(value.as_deref(), buf);
                buf.push(')');
            }
            ExprKind::Receive(kind) => write!(buf, "receive {}", kind).unwrap(),
        }
    }

    /// Compound operands are parenthesized so the printed text keeps the tree shape.
    fn format_operand(&self, buf: &mut String) {
        match self.kind {
            ExprKind::Binary { .. } | ExprKind::BoolOp { .. } | ExprKind::Unary { .. } => {
                buf.push('(');
                self.format_to_code(buf);
                buf.push(')');
            }
            _ => self.format_to_code(buf),
        }
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_code())
    }
}

impl Display for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_code())
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
        };
        f.write_str(op)
    }
}

impl Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoolOp::And => f.write_str("and"),
            BoolOp::Or => f.write_str("or"),
        }
    }
}

impl Display for ReceiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveKind::Loop => f.write_str("loop"),
            ReceiveKind::Step => f.write_str("step"),
        }
    }
}

fn push_indent(buf: &mut String, indent: usize) {
    for _ in 0..indent {
        buf.push_str(INDENT);
    }
}

fn format_block(block: &Block, buf: &mut String, indent: usize) {
    buf.push_str("{\n");
    for stmt in block {
        stmt.format_to_code(buf, indent + 1);
    }
    push_indent(buf, indent);
    buf.push('}');
}

fn format_orelse(orelse: &Block, buf: &mut String, indent: usize) {
    if !orelse.is_empty() {
        buf.push_str(" else ");
        format_block(orelse, buf, indent);
    }
}

fn format_if(test: &Expr, body: &Block, orelse: &Block, buf: &mut String, indent: usize) {
    buf.push_str("if ");
    test.format_to_code(buf);
    buf.push(' ');
    format_block(body, buf, indent);

    match orelse.as_slice() {
        [] => {}
        [
            Stmt {
                kind:
                    StmtKind::If {
                        test,
                        body,
                        orelse,
                    },
                ..
            },
        ] => {
            buf.push_str(" el");
            format_if(test, body, orelse, buf, indent);
        }
        _ => format_orelse(orelse, buf, indent),
    }
}

fn format_yield(value: Option<&Expr>, buf: &mut String) {
    buf.push_str("yield");
    if let Some(value) = value {
        buf.push(' ');
        match &value.kind {
            ExprKind::Tuple(items) if !items.is_empty() => format_items(items, buf),
            _ => value.format_to_code(buf),
        }
    }
}

fn format_target(target: &Target, buf: &mut String) {
    match target {
        Target::Name(name) => write!(buf, "{}", name).unwrap(),
        Target::Tuple(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push_str(", ");
                }
                if let Target::Tuple(_) = item {
                    buf.push('(');
                    format_target(item, buf);
                    buf.push(')');
                } else {
                    format_target(item, buf);
                }
            }
        }
        Target::Subscript { value, index } => {
            value.format_operand(buf);
            buf.push('[');
            index.format_to_code(buf);
            buf.push(']');
        }
    }
}

fn format_items(items: &[Expr], buf: &mut String) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            buf.push_str(", ");
        }
        item.format_to_code(buf);
    }
}

fn format_literal(literal: &Literal, buf: &mut String) {
    match literal {
        Literal::Int(n) => write!(buf, "{}", n).unwrap(),
        Literal::Bool(true) => buf.push_str("True"),
        Literal::Bool(false) => buf.push_str("False"),
        Literal::None => buf.push_str("None"),
        Literal::String(s) => {
            buf.push('"');
            for c in s.chars() {
                match c {
                    '"' => buf.push_str("\\\""),
                    '\\' => buf.push_str("\\\\"),
                    '\n' => buf.push_str("\\n"),
                    '\r' => buf.push_str("\\r"),
                    '\t' => buf.push_str("\\t"),
                    _ => buf.push(c),
                }
            }
            buf.push('"');
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::parser::Parser;
    use crate::lexer::{Lexer, Options};
    use rstest::rstest;

    use super::*;

    fn parse(code: &str) -> Module {
        let tokens = Lexer::new(Options::default()).tokenize(code).unwrap();
        Parser::new(tokens.iter()).parse().unwrap()
    }

    #[rstest]
    #[case("x = 1 + (2 * 3);\n")]
    #[case("x = \"a\\\"b\\n\";\n")]
    #[case("a, b = (b, a);\n")]
    #[case("t = (1,);\n")]
    #[case("if x {\n    pass;\n} elif y {\n    pass;\n} else {\n    pass;\n}\n")]
    #[case("try {\n    x = next(it);\n} except StopIteration {\n    return;\n}\n")]
    #[case("@invertible\ndef f(source, out) {\n    for x in source {\n        yield x, 1;\n    } else {\n        yield;\n    }\n}\n")]
    #[case("def g(xs) {\n    y = (yield xs[0]);\n    buf.append(not (y == None));\n}\n")]
    fn test_to_code_is_stable(#[case] code: &str) {
        let module = parse(code);
        assert_eq!(module.to_code(), code);
        assert_eq!(parse(&module.to_code()).to_code(), code);
    }

    #[test]
    fn test_receive_and_on_close() {
        let receive = Expr::synthesized(
            ExprKind::Receive(ReceiveKind::Loop),
            Default::default(),
        );
        let stmt = Stmt::synthesized(
            StmtKind::OnClose {
                body: vec![Stmt::synthesized(
                    StmtKind::Assign {
                        target: Target::Name("x".into()),
                        value: receive,
                    },
                    Default::default(),
                )],
                handler: vec![Stmt::synthesized(StmtKind::Pass, Default::default())],
            },
            Default::default(),
        );
        assert_eq!(
            stmt.to_code(),
            "on_close {\n    x = receive loop;\n} handle {\n    pass;\n}\n"
        );
    }
}
