//! Stack-based bytecode interpreter.
//!
//! One [`Frame`] holds the state of one activation. [`Vm::execute`] runs a frame
//! until it returns or suspends, so generators and coroutines keep their frame
//! between resumptions and re-enter it later.
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::{
    ast::ReceiveKind,
    compiler::{CaptureSource, Code, CodeKind, Instruction},
    coroutine::{Activator, Generator},
    ident::Ident,
    value::{Function, IterState, Value},
};

pub mod builtin;
pub mod call_depth;
pub mod error;
pub mod frame;
pub mod namespace;
pub mod ops;

use builtin::Builtin;
use call_depth::{CallDepth, DEFAULT_MAX_CALL_DEPTH};
use error::{ExceptionKind, RuntimeError};
use frame::{Frame, HandlerKind, Suspension};
use namespace::Namespace;

#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of nested frames, counting suspended ones being resumed.
    pub max_call_depth: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// How a frame is entered.
#[derive(Debug, Clone)]
pub enum Resume {
    /// First entry.
    Start,
    /// Continue from a suspension with the value of the suspending expression.
    Value(Value),
    /// Deliver the termination signal at the current receive point.
    Close,
}

/// Why [`Vm::execute`] gave control back.
#[derive(Debug, Clone, PartialEq)]
pub enum Suspend {
    Yielded(Value),
    Receiving(ReceiveKind),
    Returned(Value),
}

/// Cloning shares the call depth counter.
#[derive(Debug, Clone, Default)]
pub struct Vm {
    pub(crate) options: Options,
    depth: CallDepth,
}

impl Vm {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            depth: CallDepth::default(),
        }
    }

    pub fn set_max_call_depth(&mut self, max_call_depth: u32) {
        self.options.max_call_depth = max_call_depth;
    }

    /// Runs module-level code against `globals`.
    pub fn run_module(&self, code: Rc<Code>, globals: &Namespace) -> Result<Value, RuntimeError> {
        let mut frame = Frame::module(code, globals.clone());
        match self.execute(&mut frame, Resume::Start)? {
            Suspend::Returned(value) => Ok(value),
            _ => Err(RuntimeError::internal("module code suspended")),
        }
    }

    /// Runs `frame` until it returns or suspends.
    pub fn execute(&self, frame: &mut Frame, resume: Resume) -> Result<Suspend, RuntimeError> {
        let _guard = self.depth.enter(self.options.max_call_depth)?;

        let entered = match (resume, frame.suspended.take()) {
            (Resume::Start, None) => Ok(()),
            (Resume::Value(value), Some(_)) => {
                frame.push(value);
                Ok(())
            }
            (Resume::Close, Some(Suspension::Receive(kind))) => {
                trace!(code = %frame.code.name, ?kind, "termination signal");
                let at = frame.code.range_at(frame.pc.saturating_sub(1));
                frame.close_at(kind).map_err(|err| err.or_at(at))
            }
            (Resume::Close, _) => return Ok(Suspend::Returned(Value::None)),
            (Resume::Start, Some(_)) => {
                return Err(RuntimeError::internal("frame has already started"));
            }
            (Resume::Value(_), None) => {
                return Err(RuntimeError::internal("frame has not started"));
            }
        };

        if let Err(err) = entered {
            if let Some(suspend) = self.unwind(frame, err)? {
                return Ok(suspend);
            }
        }

        loop {
            match self.step(frame) {
                Ok(None) => {}
                Ok(Some(suspend)) => return Ok(suspend),
                Err(err) => {
                    if let Some(suspend) = self.unwind(frame, err)? {
                        return Ok(suspend);
                    }
                }
            }
        }
    }

    /// Hands `err` to the innermost `except` block. Uncaught `StopIteration`
    /// ends a generator or coroutine normally.
    fn unwind(&self, frame: &mut Frame, err: RuntimeError) -> Result<Option<Suspend>, RuntimeError> {
        match frame.catch(err) {
            Ok(()) => Ok(None),
            Err(err)
                if err.is_stop_iteration()
                    && matches!(frame.code.kind, CodeKind::Generator | CodeKind::Coroutine) =>
            {
                Ok(Some(Suspend::Returned(Value::None)))
            }
            Err(err) => Err(err),
        }
    }

    fn step(&self, frame: &mut Frame) -> Result<Option<Suspend>, RuntimeError> {
        let code = Rc::clone(&frame.code);
        let pc = frame.pc;
        let instruction = code
            .instructions
            .get(pc)
            .ok_or_else(|| RuntimeError::internal("ran past the end of the code"))?;
        frame.pc += 1;

        self.dispatch(frame, &code, instruction)
            .map_err(|err| err.or_at(code.range_at(pc)))
    }

    fn dispatch(
        &self,
        frame: &mut Frame,
        code: &Code,
        instruction: &Instruction,
    ) -> Result<Option<Suspend>, RuntimeError> {
        match instruction {
            Instruction::LoadConst(index) => {
                let value = code
                    .constants
                    .get(*index as usize)
                    .cloned()
                    .ok_or_else(|| RuntimeError::internal("constant out of range"))?;
                frame.push(value);
            }
            Instruction::LoadLocal(slot) => {
                let value = frame.locals[*slot as usize].clone().ok_or_else(|| {
                    RuntimeError::new(
                        ExceptionKind::NameError,
                        format!(
                            "local variable \"{}\" referenced before assignment",
                            code.locals[*slot as usize]
                        ),
                    )
                })?;
                frame.push(value);
            }
            Instruction::StoreLocal(slot) => {
                let value = frame.pop()?;
                frame.locals[*slot as usize] = Some(value);
            }
            Instruction::LoadName(name) => {
                let value = self.lookup(frame, *name)?;
                frame.push(value);
            }
            Instruction::StoreName(name) => {
                let value = frame.pop()?;
                frame.globals.define(*name, value);
            }
            Instruction::LoadAttr(name) => {
                let value = frame.pop()?;
                frame.push(self.load_attr(&value, *name)?);
            }
            Instruction::LoadSubscript => {
                let index = frame.pop()?;
                let container = frame.pop()?;
                frame.push(ops::subscript(&container, &index)?);
            }
            Instruction::StoreSubscript => {
                let index = frame.pop()?;
                let container = frame.pop()?;
                let value = frame.pop()?;
                ops::store_subscript(&container, &index, value)?;
            }
            Instruction::BuildTuple(n) => {
                let items = frame.pop_n(*n as usize)?;
                frame.push(Value::tuple(items));
            }
            Instruction::BuildList(n) => {
                let items = frame.pop_n(*n as usize)?;
                frame.push(Value::list(items));
            }
            Instruction::Unpack(n) => {
                let sequence = frame.pop()?;
                let items = self.collect(&sequence)?;
                if items.len() != *n as usize {
                    return Err(RuntimeError::new(
                        ExceptionKind::ValueError,
                        format!("expected {} values to unpack, got {}", n, items.len()),
                    ));
                }
                frame.stack.extend(items.into_iter().rev());
            }
            Instruction::Call(argc) => {
                let args = frame.pop_n(*argc as usize)?;
                let callee = frame.pop()?;
                frame.push(self.call(&callee, args)?);
            }
            Instruction::CallMethod(name, argc) => {
                let args = frame.pop_n(*argc as usize)?;
                let receiver = frame.pop()?;
                frame.push(self.call_method(&receiver, *name, args)?);
            }
            Instruction::Binary(op) => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.push(ops::binary(*op, &lhs, &rhs)?);
            }
            Instruction::Unary(op) => {
                let operand = frame.pop()?;
                frame.push(ops::unary(*op, &operand)?);
            }
            Instruction::Jump(target) => frame.pc = *target,
            Instruction::JumpIfFalse(target) => {
                if !frame.pop()?.is_truthy() {
                    frame.pc = *target;
                }
            }
            Instruction::JumpIfFalseOrPop(target) => {
                if frame.top()?.is_truthy() {
                    frame.pop()?;
                } else {
                    frame.pc = *target;
                }
            }
            Instruction::JumpIfTrueOrPop(target) => {
                if frame.top()?.is_truthy() {
                    frame.pc = *target;
                } else {
                    frame.pop()?;
                }
            }
            Instruction::GetIter => {
                let value = frame.pop()?;
                frame.push(self.iterate(&value)?);
            }
            Instruction::ForIter(exit) => {
                let iterator = frame.top()?.clone();
                match self.next_value(&iterator)? {
                    Some(value) => frame.push(value),
                    None => {
                        frame.pop()?;
                        frame.pc = *exit;
                    }
                }
            }
            Instruction::Pop => {
                frame.pop()?;
            }
            Instruction::Return => return Ok(Some(Suspend::Returned(frame.pop()?))),
            Instruction::Yield => {
                let value = frame.pop()?;
                frame.suspended = Some(Suspension::Yield);
                return Ok(Some(Suspend::Yielded(value)));
            }
            Instruction::Receive(kind) => {
                if frame.closed {
                    frame.close_at(*kind)?;
                } else {
                    frame.suspended = Some(Suspension::Receive(*kind));
                    return Ok(Some(Suspend::Receiving(*kind)));
                }
            }
            Instruction::SetupExcept(target) => frame.setup(HandlerKind::Except, *target),
            Instruction::SetupOnClose(target) => frame.setup(HandlerKind::OnClose, *target),
            Instruction::PopBlock => {
                frame.handlers.pop();
            }
            Instruction::MatchException { kind, otherwise } => {
                let current = frame
                    .exceptions
                    .last()
                    .ok_or_else(|| RuntimeError::internal("no exception is being handled"))?;
                let matched = kind.is_none_or(|kind| current.kind.matches(kind));
                if !matched {
                    frame.pc = *otherwise;
                }
            }
            Instruction::PopException => {
                frame.exceptions.pop();
            }
            Instruction::Reraise => {
                return Err(frame
                    .exceptions
                    .pop()
                    .unwrap_or_else(|| RuntimeError::internal("no exception to re-raise")));
            }
            Instruction::MakeFunction { code, captures } => {
                let function = self.make_function(frame, code, captures);
                frame.push(Value::Function(Rc::new(function)));
            }
        }

        Ok(None)
    }

    fn make_function(&self, frame: &Frame, code: &Rc<Code>, captures: &[CaptureSource]) -> Function {
        let mut values = FxHashMap::default();
        for source in captures {
            let (name, value) = match source {
                CaptureSource::Local { name, slot } => {
                    (*name, frame.locals.get(*slot as usize).cloned().flatten())
                }
                CaptureSource::Inherited(name) => (
                    *name,
                    frame
                        .function
                        .as_ref()
                        .and_then(|function| function.captures.get(name).cloned()),
                ),
            };
            if let Some(value) = value {
                values.insert(name, value);
            }
        }

        Function {
            name: code.name,
            code: Rc::clone(code),
            globals: frame.globals.clone(),
            captures: values,
            own: Weak::new(),
        }
    }

    fn lookup(&self, frame: &Frame, name: Ident) -> Result<Value, RuntimeError> {
        if let Some(value) = frame
            .function
            .as_ref()
            .and_then(|function| function.captures.get(&name))
        {
            return Ok(value.clone());
        }
        if let Some(own) = frame
            .function
            .as_ref()
            .filter(|function| function.name == name)
            .and_then(|function| function.own.upgrade())
        {
            return Ok(Value::Function(own));
        }

        frame
            .globals
            .get(name)
            .or_else(|| Builtin::lookup(name).map(Value::Native))
            .ok_or_else(|| RuntimeError::not_defined(name))
    }

    /// Calls any callable value.
    pub fn call(&self, callee: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match callee {
            Value::Native(builtin) => builtin.call(self, args),
            Value::Function(function) => self.call_function(function, args),
            Value::Invertible(invertible) => self.call(&invertible.original, args),
            _ => Err(RuntimeError::type_error(format!(
                "'{}' object is not callable",
                callee.type_name()
            ))),
        }
    }

    /// Plain functions run to completion; generator functions return a
    /// generator and coroutine functions return a primed handle.
    pub fn call_function(&self, function: &Rc<Function>, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match function.code.kind {
            CodeKind::Plain | CodeKind::Module => {
                let mut frame = Frame::for_call(Rc::clone(function), args)?;
                match self.execute(&mut frame, Resume::Start)? {
                    Suspend::Returned(value) => Ok(value),
                    _ => Err(RuntimeError::internal("plain function suspended")),
                }
            }
            CodeKind::Generator => {
                let frame = Frame::for_call(Rc::clone(function), args)?;
                Ok(Value::Generator(Rc::new(Generator::new(frame, self.clone()))))
            }
            CodeKind::Coroutine => Activator::new(Rc::clone(function))
                .with_vm(self.clone())
                .start(args)
                .map(Value::Coroutine)
                .map_err(RuntimeError::from),
        }
    }

    fn call_method(&self, receiver: &Value, name: Ident, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let method = name.as_str();

        match (receiver, method.as_str(), args.as_slice()) {
            (Value::List(items), "append", [value]) => {
                items.borrow_mut().push(value.clone());
                Ok(Value::None)
            }
            (Value::List(items), "pop", []) => items
                .borrow_mut()
                .pop()
                .ok_or_else(|| RuntimeError::new(ExceptionKind::IndexError, "pop from empty list")),
            (Value::List(items), "pop", [index]) => {
                let len = items.borrow().len();
                let at = ops::normalize_index(receiver, index, len)?;
                Ok(items.borrow_mut().remove(at))
            }
            (Value::Str(s), "upper", []) => Ok(Value::str(s.to_uppercase())),
            (Value::Str(s), "lower", []) => Ok(Value::str(s.to_lowercase())),
            (Value::Receiver(downstream), "send", [value]) => {
                downstream.send(value.clone())?;
                Ok(Value::None)
            }
            (Value::Receiver(downstream), "close", []) => {
                downstream.close()?;
                Ok(Value::None)
            }
            (Value::Coroutine(handle), "send", [value]) => {
                handle.send(value.clone())?;
                Ok(Value::None)
            }
            (Value::Coroutine(handle), "close", []) => {
                handle.close()?;
                Ok(Value::None)
            }
            (Value::Generator(generator), "send", [value]) => generator
                .resume(value.clone())?
                .ok_or_else(RuntimeError::stop_iteration),
            (Value::Generator(generator), "close", []) => {
                generator.close()?;
                Ok(Value::None)
            }
            (Value::Generator(_) | Value::Iterator(_), "__next__", []) => self
                .next_value(receiver)?
                .ok_or_else(RuntimeError::stop_iteration),
            (
                Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Iterator(_) | Value::Generator(_),
                "__iter__",
                [],
            ) => self.iterate(receiver),
            _ => {
                let attribute = self.load_attr(receiver, name)?;
                self.call(&attribute, args)
            }
        }
    }

    fn load_attr(&self, value: &Value, name: Ident) -> Result<Value, RuntimeError> {
        let attribute = name.as_str();
        match (value, attribute.as_str()) {
            (Value::Invertible(invertible), "co") => Ok(Value::Function(Rc::clone(&invertible.inverted))),
            (Value::Invertible(invertible), "original") => Ok(invertible.original.clone()),
            (Value::Function(function), "__name__") => Ok(Value::str(function.name.as_str())),
            _ => Err(RuntimeError::new(
                ExceptionKind::AttributeError,
                format!("'{}' object has no attribute '{}'", value.type_name(), attribute),
            )),
        }
    }

    /// Returns an iterator over `value`.
    pub fn iterate(&self, value: &Value) -> Result<Value, RuntimeError> {
        let state = match value {
            Value::Iterator(_) | Value::Generator(_) => return Ok(value.clone()),
            Value::List(items) => IterState::List {
                items: Rc::clone(items),
                index: 0,
            },
            Value::Tuple(items) => IterState::Tuple {
                items: Rc::clone(items),
                index: 0,
            },
            Value::Str(s) => IterState::Str {
                value: s.clone(),
                offset: 0,
            },
            _ => {
                return Err(RuntimeError::type_error(format!(
                    "'{}' object is not iterable",
                    value.type_name()
                )));
            }
        };
        Ok(Value::Iterator(Rc::new(RefCell::new(state))))
    }

    /// Advances an iterator; `None` once it is exhausted.
    pub fn next_value(&self, iterator: &Value) -> Result<Option<Value>, RuntimeError> {
        match iterator {
            Value::Iterator(state) => Ok(state.borrow_mut().next_value()),
            Value::Generator(generator) => generator.resume(Value::None),
            _ => Err(RuntimeError::type_error(format!(
                "'{}' object is not an iterator",
                iterator.type_name()
            ))),
        }
    }

    /// Drains any iterable into a vector.
    pub fn collect(&self, value: &Value) -> Result<Vec<Value>, RuntimeError> {
        match value {
            Value::List(items) => return Ok(items.borrow().clone()),
            Value::Tuple(items) => return Ok(items.to_vec()),
            _ => {}
        }

        let iterator = self.iterate(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.next_value(&iterator)? {
            items.push(item);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compiler::Compiler, parse};
    use rstest::rstest;

    fn run(code: &str) -> Result<Namespace, RuntimeError> {
        let module = parse(code).unwrap();
        let code = Compiler::compile_module(&module.body, Ident::new("<module>")).unwrap();
        let globals = Namespace::new();
        Vm::default().run_module(code, &globals)?;
        Ok(globals)
    }

    fn eval(code: &str) -> Value {
        run(code).unwrap().get(Ident::new("result")).unwrap()
    }

    #[rstest]
    #[case("result = 1 + 2 * 3;", Value::Int(7))]
    #[case("result = (1, 2)[1];", Value::Int(2))]
    #[case("x = [1, 2]; x[0] = 5; result = x;", Value::list(vec![Value::Int(5), Value::Int(2)]))]
    #[case("a, b = (1, 2); result = (b, a);", Value::tuple(vec![Value::Int(2), Value::Int(1)]))]
    #[case("result = 0 or 'x';", Value::str("x"))]
    #[case("result = 1 and 0;", Value::Int(0))]
    #[case("result = not [];", Value::TRUE)]
    #[case("result = len('abc') == 3;", Value::TRUE)]
    #[case("result = 'ab'.upper();", Value::str("AB"))]
    #[case("def sq(x) { return x * x; } result = sq(7);", Value::Int(49))]
    #[case("def f() { pass; } result = f();", Value::None)]
    #[case("result = list(range(3));", Value::list(vec![Value::Int(0), Value::Int(1), Value::Int(2)]))]
    fn test_eval(#[case] code: &str, #[case] expected: Value) {
        assert_eq!(eval(code), expected);
    }

    #[test]
    fn test_loops_with_else_and_break() {
        let code = "
            result = [];
            for x in [1, 2, 3] {
                if x == 2 { continue; }
                result.append(x);
            } else {
                result.append('done');
            }
            i = 0;
            while True {
                i = i + 1;
                if i > 3 { break; }
            } else {
                result.append('unreachable');
            }
            result.append(i);
        ";
        assert_eq!(
            eval(code),
            Value::list(vec![Value::Int(1), Value::Int(3), Value::str("done"), Value::Int(4)])
        );
    }

    #[test]
    fn test_generator() {
        let code = "
            def evens(xs) {
                for x in xs {
                    if x % 2 == 0 { yield x; }
                }
                yield 'end';
            }
            result = list(evens([1, 2, 3, 4]));
        ";
        assert_eq!(
            eval(code),
            Value::list(vec![Value::Int(2), Value::Int(4), Value::str("end")])
        );
    }

    #[test]
    fn test_generator_send_and_next() {
        let code = "
            def echo() {
                x = yield 'ready';
                while True { x = yield x * 2; }
            }
            g = echo();
            result = [next(g), g.send(3), g.send(5)];
            g.close();
            try { next(g); } except StopIteration { result.append('closed'); }
        ";
        assert_eq!(
            eval(code),
            Value::list(vec![Value::str("ready"), Value::Int(6), Value::Int(10), Value::str("closed")])
        );
    }

    #[test]
    fn test_try_except() {
        let code = "
            result = [];
            it = iter([1]);
            try {
                result.append(next(it));
                result.append(next(it));
            } except StopIteration {
                result.append('stop');
            }
            try {
                x = 1 / 0;
            } except TypeError {
                result.append('wrong');
            } except Exception {
                result.append('zero');
            }
            for x in [1, 2] {
                try { break; } except { pass; }
            }
            result.append(x);
        ";
        assert_eq!(
            eval(code),
            Value::list(vec![Value::Int(1), Value::str("stop"), Value::str("zero"), Value::Int(1)])
        );
    }

    #[test]
    fn test_unhandled_error_is_reraised() {
        let err = run("try { x = [][0]; } except TypeError { pass; }").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IndexError);
        assert_eq!(err.range.map(|range| range.start.line), Some(1));
    }

    #[test]
    fn test_stop_iteration_ends_generator() {
        let code = "
            def firsts(xs) {
                it = iter(xs);
                while True { yield next(it); }
            }
            result = list(firsts([1, 2]));
        ";
        assert_eq!(eval(code), Value::list(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_closures_capture_by_value() {
        let code = "
            def outer(scale) {
                def inner(x) { return x * scale; }
                return inner;
            }
            result = outer(3)(5);
        ";
        assert_eq!(eval(code), Value::Int(15));
    }

    #[rstest]
    #[case("x = undefined;", ExceptionKind::NameError)]
    #[case("x = 1(2);", ExceptionKind::TypeError)]
    #[case("a, b = [1];", ExceptionKind::ValueError)]
    #[case("x = (1).co;", ExceptionKind::AttributeError)]
    #[case("def f(x) { return x; } f();", ExceptionKind::TypeError)]
    #[case("def f() { return y; y = 1; } f();", ExceptionKind::NameError)]
    fn test_runtime_errors(#[case] code: &str, #[case] expected: ExceptionKind) {
        assert_eq!(run(code).unwrap_err().kind, expected);
    }

    #[test]
    fn test_recursion_limit() {
        let module = parse("def f(n) { return f(n + 1); } f(0);").unwrap();
        let code = Compiler::compile_module(&module.body, Ident::new("<module>")).unwrap();
        let vm = Vm::new(Options { max_call_depth: 16 });
        let err = vm.run_module(code, &Namespace::new()).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::RecursionError);
        assert_eq!(vm.depth.current(), 0);
    }
}
