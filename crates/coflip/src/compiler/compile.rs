use std::rc::Rc;

use itertools::Itertools;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::{
    ast::{
        BoolOp, Expr, ExprKind, FunctionDef, Literal, Params, ReceiveKind, Stmt, StmtKind, Target,
    },
    ident::Ident,
    range::Range,
    value::Value,
};

use super::{
    Code, CodeKind,
    error::CompileError,
    instruction::{CaptureList, CaptureSource, Instruction},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Module,
    Function,
}

/// Handler entries that `break` and `continue` have to pop when leaving them.
#[derive(Debug, Clone, Copy)]
enum Unwind {
    Block,
    Exception,
}

#[derive(Debug)]
struct LoopContext {
    unwind_depth: usize,
    continue_target: usize,
    breaks: Vec<usize>,
    /// `for` loops keep their iterator on the operand stack.
    holds_iterator: bool,
}

/// Single-pass compiler for one code object.
#[derive(Debug)]
pub struct Compiler {
    scope: Scope,
    name: Ident,
    params: Params,
    instructions: Vec<Instruction>,
    ranges: Vec<Range>,
    constants: Vec<Value>,
    slots: FxHashMap<Ident, u16>,
    locals: Vec<Ident>,
    loops: Vec<LoopContext>,
    unwind: Vec<Unwind>,
    on_close_depth: usize,
    yield_at: Option<Range>,
    receive_at: Option<Range>,
}

impl Compiler {
    fn new(scope: Scope, name: Ident, params: Params) -> Self {
        Self {
            scope,
            name,
            params,
            instructions: Vec::new(),
            ranges: Vec::new(),
            constants: Vec::new(),
            slots: FxHashMap::default(),
            locals: Vec::new(),
            loops: Vec::new(),
            unwind: Vec::new(),
            on_close_depth: 0,
            yield_at: None,
            receive_at: None,
        }
    }

    /// Compiles top-level statements; names resolve through the namespace.
    pub fn compile_module(body: &[Stmt], name: Ident) -> Result<Rc<Code>, CompileError> {
        let mut compiler = Self::new(Scope::Module, name, Vec::new());
        compiler.compile_block(body)?;
        compiler.finish(Range::default())
    }

    /// Compiles a function body. Parameters and every name the body binds get
    /// a local slot.
    pub fn compile_function(def: &FunctionDef) -> Result<Rc<Code>, CompileError> {
        let mut compiler = Self::new(Scope::Function, def.name, def.params.clone());
        for param in &def.params {
            compiler.slot(*param)?;
        }
        for name in def.local_names() {
            compiler.slot(name)?;
        }

        compiler.compile_block(&def.body)?;
        compiler.finish(def.range)
    }

    fn finish(mut self, range: Range) -> Result<Rc<Code>, CompileError> {
        let kind = match self.scope {
            Scope::Module => CodeKind::Module,
            Scope::Function => match (self.yield_at, self.receive_at) {
                (Some(_), Some(range)) => {
                    return Err(CompileError::MixedSuspension {
                        name: self.name,
                        range,
                    });
                }
                (Some(_), None) => CodeKind::Generator,
                (None, Some(_)) => CodeKind::Coroutine,
                (None, None) => CodeKind::Plain,
            },
        };

        let none = self.constant(Value::None)?;
        self.emit(Instruction::LoadConst(none), range);
        self.emit(Instruction::Return, range);

        trace!(
            name = %self.name,
            ?kind,
            instructions = self.instructions.len(),
            locals = self.locals.len(),
            "compiled"
        );

        Ok(Rc::new(Code {
            name: self.name,
            kind,
            params: self.params,
            locals: self.locals,
            instructions: self.instructions,
            ranges: self.ranges,
            constants: self.constants,
        }))
    }

    #[inline]
    fn here(&self) -> usize {
        self.instructions.len()
    }

    fn emit(&mut self, instruction: Instruction, range: Range) -> usize {
        self.instructions.push(instruction);
        self.ranges.push(range);
        self.instructions.len() - 1
    }

    /// Points the jump at `at` to the next instruction to be emitted.
    fn patch(&mut self, at: usize) {
        let target = self.here();
        self.instructions[at].patch(target);
    }

    fn too_many(&self, what: &'static str) -> CompileError {
        CompileError::TooMany {
            what,
            name: self.name,
        }
    }

    fn constant(&mut self, value: Value) -> Result<u16, CompileError> {
        let index = u16::try_from(self.constants.len()).map_err(|_| self.too_many("constants"))?;
        self.constants.push(value);
        Ok(index)
    }

    fn slot(&mut self, name: Ident) -> Result<u16, CompileError> {
        if let Some(slot) = self.slots.get(&name) {
            return Ok(*slot);
        }
        let slot = u16::try_from(self.locals.len()).map_err(|_| self.too_many("locals"))?;
        self.locals.push(name);
        self.slots.insert(name, slot);
        Ok(slot)
    }

    fn load_name(&mut self, name: Ident, range: Range) {
        match self.slots.get(&name) {
            Some(slot) => self.emit(Instruction::LoadLocal(*slot), range),
            None => self.emit(Instruction::LoadName(name), range),
        };
    }

    fn store_name(&mut self, name: Ident, range: Range) -> Result<(), CompileError> {
        match self.scope {
            Scope::Function => {
                let slot = self.slot(name)?;
                self.emit(Instruction::StoreLocal(slot), range);
            }
            Scope::Module => {
                self.emit(Instruction::StoreName(name), range);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &[Stmt]) -> Result<(), CompileError> {
        block.iter().try_for_each(|stmt| self.compile_stmt(stmt))
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        let range = stmt.range;

        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                for decorator in &def.decorators {
                    self.compile_expr(decorator)?;
                }
                let code = Self::compile_function(def)?;
                let captures = self.captures_for(def);
                self.emit(Instruction::MakeFunction { code, captures }, range);
                for _ in &def.decorators {
                    self.emit(Instruction::Call(1), range);
                }
                self.store_name(def.name, range)?;
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.compile_expr(iter)?;
                self.emit(Instruction::GetIter, iter.range);
                let start = self.emit(Instruction::ForIter(0), range);
                self.store_target(target, range)?;
                let breaks = self.compile_loop_body(body, start, true)?;
                self.emit(Instruction::Jump(start), range);
                self.patch(start);
                self.compile_block(orelse)?;
                breaks.into_iter().for_each(|at| self.patch(at));
            }
            StmtKind::While { test, body, orelse } => {
                let start = self.here();
                self.compile_expr(test)?;
                let exit = self.emit(Instruction::JumpIfFalse(0), test.range);
                let breaks = self.compile_loop_body(body, start, false)?;
                self.emit(Instruction::Jump(start), range);
                self.patch(exit);
                self.compile_block(orelse)?;
                breaks.into_iter().for_each(|at| self.patch(at));
            }
            StmtKind::If { test, body, orelse } => {
                self.compile_expr(test)?;
                let otherwise = self.emit(Instruction::JumpIfFalse(0), test.range);
                self.compile_block(body)?;
                if orelse.is_empty() {
                    self.patch(otherwise);
                } else {
                    let end = self.emit(Instruction::Jump(0), range);
                    self.patch(otherwise);
                    self.compile_block(orelse)?;
                    self.patch(end);
                }
            }
            StmtKind::Try { body, handlers } => {
                let setup = self.emit(Instruction::SetupExcept(0), range);
                self.unwind.push(Unwind::Block);
                self.compile_block(body)?;
                self.unwind.pop();
                self.emit(Instruction::PopBlock, range);
                let mut ends = vec![self.emit(Instruction::Jump(0), range)];

                self.patch(setup);
                for handler in handlers {
                    let next = self.emit(
                        Instruction::MatchException {
                            kind: handler.kind,
                            otherwise: 0,
                        },
                        handler.range,
                    );
                    self.unwind.push(Unwind::Exception);
                    self.compile_block(&handler.body)?;
                    self.unwind.pop();
                    self.emit(Instruction::PopException, handler.range);
                    ends.push(self.emit(Instruction::Jump(0), handler.range));
                    self.patch(next);
                }
                self.emit(Instruction::Reraise, range);
                ends.into_iter().for_each(|at| self.patch(at));
            }
            StmtKind::OnClose { body, handler } => {
                let setup = self.emit(Instruction::SetupOnClose(0), range);
                self.unwind.push(Unwind::Block);
                self.on_close_depth += 1;
                let result = self.compile_block(body);
                self.on_close_depth -= 1;
                self.unwind.pop();
                result?;
                self.emit(Instruction::PopBlock, range);
                let end = self.emit(Instruction::Jump(0), range);
                self.patch(setup);
                self.compile_block(handler)?;
                self.patch(end);
            }
            StmtKind::Assign { target, value } => {
                self.compile_expr(value)?;
                self.store_target(target, range)?;
            }
            StmtKind::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(Instruction::Pop, range);
            }
            StmtKind::Return(value) => {
                if self.scope == Scope::Module {
                    return Err(CompileError::ReturnOutsideFunction(range));
                }
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.load_constant(Value::None, range)?,
                }
                self.emit(Instruction::Return, range);
            }
            StmtKind::Break => {
                let (depth, holds_iterator) = match self.loops.last() {
                    Some(context) => (context.unwind_depth, context.holds_iterator),
                    None => return Err(CompileError::BreakOutsideLoop(range)),
                };
                self.emit_unwind(depth, range);
                if holds_iterator {
                    self.emit(Instruction::Pop, range);
                }
                let at = self.emit(Instruction::Jump(0), range);
                if let Some(context) = self.loops.last_mut() {
                    context.breaks.push(at);
                }
            }
            StmtKind::Continue => {
                let (depth, target) = match self.loops.last() {
                    Some(context) => (context.unwind_depth, context.continue_target),
                    None => return Err(CompileError::ContinueOutsideLoop(range)),
                };
                self.emit_unwind(depth, range);
                self.emit(Instruction::Jump(target), range);
            }
            StmtKind::Pass => {}
        }

        Ok(())
    }

    /// Compiles a loop body and returns the placeholder jumps of its `break`s.
    fn compile_loop_body(
        &mut self,
        body: &[Stmt],
        continue_target: usize,
        holds_iterator: bool,
    ) -> Result<Vec<usize>, CompileError> {
        self.loops.push(LoopContext {
            unwind_depth: self.unwind.len(),
            continue_target,
            breaks: Vec::new(),
            holds_iterator,
        });
        let result = self.compile_block(body);
        let context = self.loops.pop();
        result?;
        Ok(context.map(|context| context.breaks).unwrap_or_default())
    }

    fn emit_unwind(&mut self, depth: usize, range: Range) {
        for index in (depth..self.unwind.len()).rev() {
            let instruction = match self.unwind[index] {
                Unwind::Block => Instruction::PopBlock,
                Unwind::Exception => Instruction::PopException,
            };
            self.emit(instruction, range);
        }
    }

    fn store_target(&mut self, target: &Target, range: Range) -> Result<(), CompileError> {
        match target {
            Target::Name(name) => self.store_name(*name, range),
            Target::Tuple(targets) => {
                let len = u16::try_from(targets.len()).map_err(|_| self.too_many("targets"))?;
                self.emit(Instruction::Unpack(len), range);
                targets
                    .iter()
                    .try_for_each(|target| self.store_target(target, range))
            }
            Target::Subscript { value, index } => {
                self.compile_expr(value)?;
                self.compile_expr(index)?;
                self.emit(Instruction::StoreSubscript, range);
                Ok(())
            }
        }
    }

    /// Names a nested definition may read from this scope, resolved when the
    /// function object is created.
    fn captures_for(&self, def: &FunctionDef) -> CaptureList {
        if self.scope == Scope::Module {
            return CaptureList::new();
        }

        def.referenced_names()
            .into_iter()
            .filter(|name| !def.params.contains(name))
            .sorted_by_key(|name| name.as_str())
            .map(|name| match self.slots.get(&name) {
                Some(slot) => CaptureSource::Local { name, slot: *slot },
                None => CaptureSource::Inherited(name),
            })
            .collect()
    }

    fn load_constant(&mut self, value: Value, range: Range) -> Result<(), CompileError> {
        let index = self.constant(value)?;
        self.emit(Instruction::LoadConst(index), range);
        Ok(())
    }

    fn compile_exprs(&mut self, exprs: &[Expr]) -> Result<(), CompileError> {
        exprs.iter().try_for_each(|expr| self.compile_expr(expr))
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let range = expr.range;

        match &expr.kind {
            ExprKind::Literal(literal) => {
                let value = match literal {
                    Literal::Int(n) => Value::Int(*n),
                    Literal::String(s) => Value::str(s),
                    Literal::Bool(b) => Value::Bool(*b),
                    Literal::None => Value::None,
                };
                self.load_constant(value, range)?;
            }
            ExprKind::Name(name) => self.load_name(*name, range),
            ExprKind::Tuple(items) => {
                self.compile_exprs(items)?;
                let len = u16::try_from(items.len()).map_err(|_| self.too_many("tuple items"))?;
                self.emit(Instruction::BuildTuple(len), range);
            }
            ExprKind::List(items) => {
                self.compile_exprs(items)?;
                let len = u16::try_from(items.len()).map_err(|_| self.too_many("list items"))?;
                self.emit(Instruction::BuildList(len), range);
            }
            ExprKind::Call { func, args } => {
                let argc = u8::try_from(args.len()).map_err(|_| self.too_many("arguments"))?;
                match &func.kind {
                    ExprKind::Attribute { value, attr } => {
                        self.compile_expr(value)?;
                        self.compile_exprs(args)?;
                        self.emit(Instruction::CallMethod(*attr, argc), range);
                    }
                    _ => {
                        self.compile_expr(func)?;
                        self.compile_exprs(args)?;
                        self.emit(Instruction::Call(argc), range);
                    }
                }
            }
            ExprKind::Attribute { value, attr } => {
                self.compile_expr(value)?;
                self.emit(Instruction::LoadAttr(*attr), range);
            }
            ExprKind::Subscript { value, index } => {
                self.compile_expr(value)?;
                self.compile_expr(index)?;
                self.emit(Instruction::LoadSubscript, range);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.emit(Instruction::Binary(*op), range);
            }
            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.emit(Instruction::Unary(*op), range);
            }
            ExprKind::BoolOp { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                let short_circuit = match op {
                    BoolOp::And => self.emit(Instruction::JumpIfFalseOrPop(0), range),
                    BoolOp::Or => self.emit(Instruction::JumpIfTrueOrPop(0), range),
                };
                self.compile_expr(rhs)?;
                self.patch(short_circuit);
            }
            ExprKind::Yield(value) => {
                if self.scope == Scope::Module {
                    return Err(CompileError::YieldOutsideFunction(range));
                }
                self.yield_at.get_or_insert(range);
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.load_constant(Value::None, range)?,
                }
                self.emit(Instruction::Yield, range);
            }
            ExprKind::Receive(kind) => {
                if self.scope == Scope::Module {
                    return Err(CompileError::ReceiveOutsideFunction(range));
                }
                if *kind == ReceiveKind::Loop && self.on_close_depth == 0 {
                    return Err(CompileError::LoopReceiveOutsideOnClose(range));
                }
                self.receive_at.get_or_insert(range);
                self.emit(Instruction::Receive(*kind), range);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::StmtKind, parse};
    use rstest::rstest;

    fn def(code: &str) -> FunctionDef {
        match parse(code).unwrap().body.remove(0).kind {
            StmtKind::FunctionDef(def) => *def,
            _ => panic!("expected a function"),
        }
    }

    #[rstest]
    #[case("def f(x) { return x; }", CodeKind::Plain)]
    #[case("def f(xs) { for x in xs { yield x; } }", CodeKind::Generator)]
    #[case("def f(out) { x = receive step; }", CodeKind::Coroutine)]
    #[case(
        "def f(out) { on_close { while go { x = receive loop; } } handle { go = False; } }",
        CodeKind::Coroutine
    )]
    // A nested generator does not make its parent one.
    #[case("def f() { def g() { yield 1; } return g; }", CodeKind::Plain)]
    fn test_classification(#[case] code: &str, #[case] expected: CodeKind) {
        assert_eq!(Compiler::compile_function(&def(code)).unwrap().kind, expected);
    }

    #[test]
    fn test_params_take_first_slots() {
        let code = Compiler::compile_function(&def(
            "def f(a, b) { c = a; for (d, e) in b { pass; } def g() { h = 1; } }",
        ))
        .unwrap();
        assert_eq!(
            code.locals,
            ["a", "b", "c", "d", "e", "g"].map(Ident::new).to_vec()
        );
        assert_eq!(code.slot_of(Ident::new("b")), Some(1));
        assert_eq!(code.slot_of(Ident::new("h")), None);
    }

    #[rstest]
    #[case("def f(out) { yield receive step; }", "MixedSuspension")]
    #[case("def f(out) { while True { x = receive loop; } }", "LoopReceiveOutsideOnClose")]
    #[case("def f() { break; }", "BreakOutsideLoop")]
    #[case("def f() { def g() { continue; } }", "ContinueOutsideLoop")]
    fn test_function_errors(#[case] code: &str, #[case] expected: &str) {
        let err = Compiler::compile_function(&def(code)).unwrap_err();
        assert!(format!("{:?}", err).starts_with(expected), "{:?}", err);
    }

    #[rstest]
    #[case("return 1;", "ReturnOutsideFunction")]
    #[case("yield 1;", "YieldOutsideFunction")]
    #[case("x = receive step;", "ReceiveOutsideFunction")]
    fn test_module_errors(#[case] code: &str, #[case] expected: &str) {
        let module = parse(code).unwrap();
        let err = Compiler::compile_module(&module.body, Ident::new("<module>")).unwrap_err();
        assert!(format!("{:?}", err).starts_with(expected), "{:?}", err);
    }

    #[test]
    fn test_module_uses_names() {
        let module = parse("x = 1; y = x;").unwrap();
        let code = Compiler::compile_module(&module.body, Ident::new("<module>")).unwrap();
        assert_eq!(code.kind, CodeKind::Module);
        assert!(code.locals.is_empty());
        assert_eq!(
            code.instructions,
            vec![
                Instruction::LoadConst(0),
                Instruction::StoreName(Ident::new("x")),
                Instruction::LoadName(Ident::new("x")),
                Instruction::StoreName(Ident::new("y")),
                Instruction::LoadConst(1),
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn test_break_pops_iterator_and_handlers() {
        let code = Compiler::compile_function(&def(
            "def f(xs) { for x in xs { try { break; } except { pass; } } }",
        ))
        .unwrap();
        let position = code
            .instructions
            .iter()
            .position(|instruction| matches!(instruction, Instruction::SetupExcept(_)))
            .unwrap();
        // break: leave the try block, drop the iterator, jump past the loop.
        assert_eq!(code.instructions[position + 1], Instruction::PopBlock);
        assert_eq!(code.instructions[position + 2], Instruction::Pop);
        assert!(matches!(code.instructions[position + 3], Instruction::Jump(_)));
    }

    #[test]
    fn test_nested_captures() {
        let code = Compiler::compile_function(&def(
            "def outer(scale) { def inner(x) { return x * scale + offset; } return inner; }",
        ))
        .unwrap();
        let captures = code
            .instructions
            .iter()
            .find_map(|instruction| match instruction {
                Instruction::MakeFunction { captures, .. } => Some(captures.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            captures.into_vec(),
            vec![
                CaptureSource::Local {
                    name: Ident::new("inner"),
                    slot: 1
                },
                CaptureSource::Inherited(Ident::new("offset")),
                CaptureSource::Local {
                    name: Ident::new("scale"),
                    slot: 0
                },
            ]
        );
    }
}
