use std::rc::Rc;

use crate::{
    ast::ReceiveKind,
    compiler::Code,
    value::{Function, Value},
};

use super::{error::RuntimeError, namespace::Namespace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// `try` block; catches runtime errors.
    Except,
    /// `on_close` block; catches the termination signal at loop receives.
    OnClose,
}

/// An active handler block.
#[derive(Debug, Clone, Copy)]
pub struct Handler {
    pub kind: HandlerKind,
    pub target: usize,
    /// Operand stack height when the block was entered.
    pub stack_depth: usize,
    /// Number of exceptions being handled when the block was entered.
    pub exception_depth: usize,
}

/// Where a frame stopped and what it expects to be resumed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    Yield,
    Receive(ReceiveKind),
}

/// Execution state of one activation of a code object.
#[derive(Debug)]
pub struct Frame {
    pub code: Rc<Code>,
    pub globals: Namespace,
    pub function: Option<Rc<Function>>,
    pub pc: usize,
    pub stack: Vec<Value>,
    pub locals: Vec<Option<Value>>,
    pub handlers: Vec<Handler>,
    /// Exceptions whose `except` bodies are running, innermost last.
    pub exceptions: Vec<RuntimeError>,
    /// Set once the termination signal arrived; later receives observe it at once.
    pub closed: bool,
    pub suspended: Option<Suspension>,
}

impl Frame {
    pub fn module(code: Rc<Code>, globals: Namespace) -> Self {
        Self::with_locals(code, globals, None, Vec::new())
    }

    /// Binds `args` to the parameters of `function`.
    pub fn for_call(function: Rc<Function>, args: Vec<Value>) -> Result<Self, RuntimeError> {
        let code = Rc::clone(&function.code);
        if args.len() != code.params.len() {
            return Err(RuntimeError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                function.name,
                code.params.len(),
                args.len()
            )));
        }

        let mut locals = vec![None; code.locals.len()];
        for (param, arg) in code.params.iter().zip(args) {
            if let Some(slot) = code.slot_of(*param) {
                locals[slot] = Some(arg);
            }
        }

        let globals = function.globals.clone();
        Ok(Self::with_locals(code, globals, Some(function), locals))
    }

    fn with_locals(
        code: Rc<Code>,
        globals: Namespace,
        function: Option<Rc<Function>>,
        locals: Vec<Option<Value>>,
    ) -> Self {
        Self {
            code,
            globals,
            function,
            pc: 0,
            stack: Vec::with_capacity(8),
            locals,
            handlers: Vec::new(),
            exceptions: Vec::new(),
            closed: false,
            suspended: None,
        }
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::internal("operand stack underflow"))
    }

    #[inline]
    pub fn top(&self) -> Result<&Value, RuntimeError> {
        self.stack
            .last()
            .ok_or_else(|| RuntimeError::internal("operand stack underflow"))
    }

    /// Pops the top `n` values, oldest first.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| RuntimeError::internal("operand stack underflow"))?;
        Ok(self.stack.split_off(at))
    }

    pub fn setup(&mut self, kind: HandlerKind, target: usize) {
        self.handlers.push(Handler {
            kind,
            target,
            stack_depth: self.stack.len(),
            exception_depth: self.exceptions.len(),
        });
    }

    /// Leaves handler blocks down to and including `handler`, restoring the
    /// stack as it was when the block was entered, and jumps to its target.
    fn enter_handler(&mut self, index: usize) -> Handler {
        let handler = self.handlers[index];
        self.handlers.truncate(index);
        self.stack.truncate(handler.stack_depth);
        self.exceptions.truncate(handler.exception_depth);
        self.pc = handler.target;
        handler
    }

    /// Moves control to the innermost `except` handler; `on_close` blocks on the
    /// way are left. Returns the error back when nothing catches it.
    pub fn catch(&mut self, err: RuntimeError) -> Result<(), RuntimeError> {
        match self
            .handlers
            .iter()
            .rposition(|handler| handler.kind == HandlerKind::Except)
        {
            Some(index) => {
                self.enter_handler(index);
                self.exceptions.push(err);
                Ok(())
            }
            None => Err(err),
        }
    }

    /// Delivers the termination signal at a receive point.
    pub fn close_at(&mut self, kind: ReceiveKind) -> Result<(), RuntimeError> {
        self.closed = true;
        match kind {
            ReceiveKind::Step => Err(RuntimeError::stop_iteration()),
            ReceiveKind::Loop => match self
                .handlers
                .iter()
                .rposition(|handler| handler.kind == HandlerKind::OnClose)
            {
                Some(index) => {
                    self.enter_handler(index);
                    Ok(())
                }
                None => Err(RuntimeError::internal("loop receive outside an on_close block")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compiler::Compiler, ident::Ident, parse, vm::error::ExceptionKind};

    fn frame() -> Frame {
        let module = parse("x = 1;").unwrap();
        let code = Compiler::compile_module(&module.body, Ident::new("<module>")).unwrap();
        Frame::module(code, Namespace::new())
    }

    #[test]
    fn test_catch_skips_on_close_blocks() {
        let mut frame = frame();
        frame.setup(HandlerKind::Except, 10);
        frame.push(Value::Int(1));
        frame.setup(HandlerKind::OnClose, 20);
        frame.push(Value::Int(2));

        frame.catch(RuntimeError::stop_iteration()).unwrap();

        assert_eq!(frame.pc, 10);
        assert!(frame.handlers.is_empty());
        assert!(frame.stack.is_empty());
        assert_eq!(frame.exceptions.len(), 1);
    }

    #[test]
    fn test_catch_without_handler() {
        let mut frame = frame();
        frame.setup(HandlerKind::OnClose, 20);
        let err = frame.catch(RuntimeError::type_error("boom")).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    }

    #[test]
    fn test_close_at() {
        let mut frame = frame();
        frame.push(Value::None);
        frame.setup(HandlerKind::OnClose, 7);
        frame.setup(HandlerKind::Except, 3);
        frame.push(Value::Int(1));

        frame.close_at(ReceiveKind::Loop).unwrap();
        assert!(frame.closed);
        assert_eq!(frame.pc, 7);
        assert_eq!(frame.stack, vec![Value::None]);
        assert!(frame.handlers.is_empty());

        assert!(frame.close_at(ReceiveKind::Step).unwrap_err().is_stop_iteration());
        assert_eq!(
            frame.close_at(ReceiveKind::Loop).unwrap_err().kind,
            ExceptionKind::RuntimeError
        );
    }

    #[test]
    fn test_pop_n() {
        let mut frame = frame();
        frame.push(Value::Int(1));
        frame.push(Value::Int(2));
        frame.push(Value::Int(3));
        assert_eq!(frame.pop_n(2).unwrap(), vec![Value::Int(2), Value::Int(3)]);
        assert!(frame.pop_n(2).is_err());
    }
}
