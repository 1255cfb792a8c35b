//! Suspended routines and the handles that drive them.
//!
//! A [`Generator`] is resumed by whoever pulls from it. A coroutine is started
//! by an [`Activator`], which runs it to its first receive point, and is then
//! driven through its [`CoroutineHandle`]: every [`CoroutineHandle::send`]
//! resumes it with one value, [`CoroutineHandle::close`] delivers the
//! termination signal.
use std::{
    cell::{Cell, Ref, RefCell},
    fmt,
    rc::Rc,
};

use tracing::debug;

use crate::{
    compiler::CodeKind,
    ident::Ident,
    value::{Function, Value},
    vm::{
        Resume, Suspend, Vm,
        error::{ExceptionKind, RuntimeError},
        frame::Frame,
    },
};

pub mod error;

pub use error::CoroutineError;

/// Something values can be pushed into.
pub trait Receiver: fmt::Debug {
    fn send(&self, value: Value) -> Result<(), RuntimeError>;

    fn close(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// A host-side receiver that keeps everything sent to it.
///
/// Values sent after [`Receiver::close`] are kept apart in
/// [`RecordingSink::late_values`].
#[derive(Debug, Default)]
pub struct RecordingSink {
    values: RefCell<Vec<Value>>,
    late_values: RefCell<Vec<Value>>,
    closed: Cell<bool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> Ref<'_, Vec<Value>> {
        self.values.borrow()
    }

    pub fn late_values(&self) -> Ref<'_, Vec<Value>> {
        self.late_values.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Receiver for RecordingSink {
    fn send(&self, value: Value) -> Result<(), RuntimeError> {
        if self.closed.get() {
            self.late_values.borrow_mut().push(value);
        } else {
            self.values.borrow_mut().push(value);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), RuntimeError> {
        self.closed.set(true);
        Ok(())
    }
}

#[derive(Debug)]
struct GeneratorState {
    /// `None` once the generator has finished or was closed.
    frame: Option<Frame>,
    started: bool,
}

/// A running pull-form routine.
#[derive(Debug)]
pub struct Generator {
    name: Ident,
    vm: Vm,
    state: RefCell<GeneratorState>,
}

impl Generator {
    pub fn new(frame: Frame, vm: Vm) -> Self {
        Self {
            name: frame.code.name,
            vm,
            state: RefCell::new(GeneratorState {
                frame: Some(frame),
                started: false,
            }),
        }
    }

    pub fn name(&self) -> Ident {
        self.name
    }

    /// Runs to the next `yield`. `None` once the generator is exhausted.
    pub fn resume(&self, value: Value) -> Result<Option<Value>, RuntimeError> {
        let mut state = self.state.try_borrow_mut().map_err(|_| {
            RuntimeError::new(ExceptionKind::ValueError, "generator already executing")
        })?;

        let resume = if state.started {
            Resume::Value(value)
        } else if value == Value::None {
            Resume::Start
        } else {
            return Err(RuntimeError::type_error(
                "can't send non-None value to a just-started generator",
            ));
        };

        let Some(frame) = state.frame.as_mut() else {
            return Ok(None);
        };
        let result = self.vm.execute(frame, resume);
        state.started = true;

        match result {
            Ok(Suspend::Yielded(value)) => Ok(Some(value)),
            Ok(Suspend::Returned(_)) => {
                state.frame = None;
                Ok(None)
            }
            Ok(Suspend::Receiving(_)) => {
                state.frame = None;
                Err(RuntimeError::internal("generator reached a receive point"))
            }
            Err(err) => {
                state.frame = None;
                Err(err)
            }
        }
    }

    /// Discards the suspended frame; later resumptions report exhaustion.
    pub fn close(&self) -> Result<(), RuntimeError> {
        let mut state = self.state.try_borrow_mut().map_err(|_| {
            RuntimeError::new(ExceptionKind::ValueError, "generator already executing")
        })?;
        state.frame = None;
        Ok(())
    }
}

#[derive(Debug)]
struct CoroutineState {
    /// `None` once the coroutine has run to completion.
    frame: Option<Frame>,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    name: Ident,
    vm: Vm,
    state: RefCell<CoroutineState>,
}

/// Handle to a primed coroutine. Clones drive the same coroutine.
#[derive(Clone)]
pub struct CoroutineHandle {
    inner: Rc<Inner>,
}

impl fmt::Debug for CoroutineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroutineHandle")
            .field("name", &self.inner.name)
            .field("finished", &self.is_finished())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CoroutineHandle {
    fn new(name: Ident, vm: Vm, frame: Option<Frame>) -> Self {
        Self {
            inner: Rc::new(Inner {
                name,
                vm,
                state: RefCell::new(CoroutineState {
                    frame,
                    closed: false,
                }),
            }),
        }
    }

    pub fn name(&self) -> Ident {
        self.inner.name
    }

    pub fn ptr_eq(&self, other: &CoroutineHandle) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// True once the coroutine ran to completion or was closed.
    pub fn is_finished(&self) -> bool {
        self.inner
            .state
            .try_borrow()
            .map(|state| state.frame.is_none())
            .unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .state
            .try_borrow()
            .map(|state| state.closed)
            .unwrap_or(false)
    }

    /// Resumes the coroutine with `value` and runs it to its next receive point.
    pub fn send(&self, value: Value) -> Result<(), CoroutineError> {
        let mut state = self
            .inner
            .state
            .try_borrow_mut()
            .map_err(|_| CoroutineError::AlreadyRunning)?;
        if state.closed {
            return Err(CoroutineError::AlreadyClosed);
        }
        let Some(frame) = state.frame.as_mut() else {
            return Err(CoroutineError::Finished);
        };

        match self.inner.vm.execute(frame, Resume::Value(value)) {
            Ok(Suspend::Receiving(_)) => Ok(()),
            Ok(Suspend::Returned(_)) => {
                state.frame = None;
                debug!(coroutine = %self.inner.name, "finished");
                Ok(())
            }
            Ok(Suspend::Yielded(_)) => {
                state.frame = None;
                Err(RuntimeError::internal("coroutine yielded").into())
            }
            Err(err) => {
                state.frame = None;
                Err(err.into())
            }
        }
    }

    /// Delivers the termination signal and lets the coroutine run to completion.
    /// Closing an already closed handle does nothing.
    pub fn close(&self) -> Result<(), CoroutineError> {
        let mut state = self
            .inner
            .state
            .try_borrow_mut()
            .map_err(|_| CoroutineError::AlreadyRunning)?;
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let Some(mut frame) = state.frame.take() else {
            return Ok(());
        };
        debug!(coroutine = %self.inner.name, "closing");

        // Receives after the signal observe it at once, so the frame never
        // suspends again.
        match self.inner.vm.execute(&mut frame, Resume::Close)? {
            Suspend::Returned(_) => Ok(()),
            _ => Err(RuntimeError::internal("coroutine suspended after close").into()),
        }
    }
}

/// Starts push-form routines.
#[derive(Debug)]
pub struct Activator {
    function: Rc<Function>,
    vm: Vm,
}

impl Activator {
    pub fn new(function: Rc<Function>) -> Self {
        Self {
            function,
            vm: Vm::default(),
        }
    }

    /// Runs the coroutine on `vm`, sharing its call depth limit.
    pub fn with_vm(mut self, vm: Vm) -> Self {
        self.vm = vm;
        self
    }

    /// Creates the coroutine and runs it to its first receive point.
    pub fn start(self, args: Vec<Value>) -> Result<CoroutineHandle, CoroutineError> {
        let name = self.function.name;
        if self.function.code.kind != CodeKind::Coroutine {
            return Err(RuntimeError::type_error(format!("\"{}\" is not a coroutine", name)).into());
        }

        let mut frame = Frame::for_call(Rc::clone(&self.function), args)?;
        let frame = match self.vm.execute(&mut frame, Resume::Start)? {
            Suspend::Receiving(_) => Some(frame),
            Suspend::Returned(_) => None,
            Suspend::Yielded(_) => {
                return Err(RuntimeError::internal("coroutine yielded").into());
            }
        };

        debug!(coroutine = %name, finished = frame.is_none(), "primed");
        Ok(CoroutineHandle::new(name, self.vm, frame))
    }
}

/// Sends every value to `handle`, stopping early once it finishes, then closes it.
pub fn push_all<I>(values: I, handle: &CoroutineHandle) -> Result<(), CoroutineError>
where
    I: IntoIterator<Item = Value>,
{
    for value in values {
        if handle.is_finished() {
            break;
        }
        handle.send(value)?;
    }
    handle.close()
}
