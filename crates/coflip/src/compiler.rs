//! Lowers syntax trees to bytecode for the [`crate::vm::Vm`].
//!
//! Every function body becomes one [`Code`] object. Module-level statements are
//! compiled the same way into a code object of kind [`CodeKind::Module`].
use std::{fmt::Write, rc::Rc};

use tracing::debug;

use crate::{
    ast::{FunctionDef, Params},
    ident::Ident,
    range::Range,
    value::{Function, Value},
    vm::namespace::{Captures, Namespace},
};

pub mod compile;
pub mod error;
pub mod instruction;

pub use compile::Compiler;
pub use error::CompileError;
pub use instruction::{CaptureList, CaptureSource, Instruction};

/// How a code object runs when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// Top-level statements.
    Module,
    /// Runs to completion and returns a value.
    Plain,
    /// Contains `yield`; calling it returns a generator.
    Generator,
    /// Contains `receive`; calling it returns a primed coroutine handle.
    Coroutine,
}

/// A compiled routine body.
#[derive(Debug, PartialEq)]
pub struct Code {
    pub name: Ident,
    pub kind: CodeKind,
    pub params: Params,
    /// Slot names; parameters come first.
    pub locals: Vec<Ident>,
    pub instructions: Vec<Instruction>,
    /// Source range of each instruction, index for index.
    pub ranges: Vec<Range>,
    pub constants: Vec<Value>,
}

impl Code {
    #[inline]
    pub fn slot_of(&self, name: Ident) -> Option<usize> {
        self.locals.iter().position(|local| *local == name)
    }

    #[inline]
    pub fn range_at(&self, pc: usize) -> Range {
        self.ranges.get(pc).copied().unwrap_or_default()
    }

    /// Human-readable listing, one instruction per line.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        writeln!(out, "{} ({:?})", self.name, self.kind).unwrap();
        for (pc, instruction) in self.instructions.iter().enumerate() {
            match instruction {
                Instruction::LoadConst(index) => writeln!(
                    out,
                    "{:>4} {} ({})",
                    pc,
                    instruction,
                    self.constants
                        .get(*index as usize)
                        .map(Value::repr)
                        .unwrap_or_default()
                )
                .unwrap(),
                _ => writeln!(out, "{:>4} {}", pc, instruction).unwrap(),
            }
        }
        out
    }
}

/// Turns a rewritten definition back into something callable.
#[derive(Debug, Default)]
pub struct Materializer;

impl Materializer {
    pub fn new() -> Self {
        Self
    }

    /// Compiles `def` against a snapshot of `namespace` extended with `captures`.
    /// Inside the function its own name refers to itself, through a weak link.
    ///
    /// `namespace` itself is never modified.
    pub fn materialize(
        &self,
        def: &FunctionDef,
        namespace: &Namespace,
        captures: Captures,
    ) -> Result<Rc<Function>, CompileError> {
        let code = Compiler::compile_function(def)?;

        let globals = namespace.snapshot();
        globals.extend(captures);

        let function = Rc::new_cyclic(|own| Function {
            name: def.name,
            code,
            globals,
            captures: Captures::default(),
            own: own.clone(),
        });

        debug!(function = %def.name, kind = ?function.code.kind, "materialized");
        Ok(function)
    }
}
