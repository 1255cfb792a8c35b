//! Instruction set of the bytecode VM.
//!
//! Jump targets are absolute instruction indices within the same [`super::Code`].
use std::{fmt, rc::Rc};

use smallvec::SmallVec;

use crate::{
    ast::{BinaryOp, ReceiveKind, UnaryOp},
    ident::Ident,
};

use super::Code;

/// Where a closure gets one of its captured values when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// A local slot of the defining frame.
    Local { name: Ident, slot: u16 },
    /// A value the defining function captured itself.
    Inherited(Ident),
}

pub type CaptureList = SmallVec<[CaptureSource; 4]>;

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    LoadConst(u16),
    LoadLocal(u16),
    StoreLocal(u16),
    /// Captures, then globals, then builtins.
    LoadName(Ident),
    StoreName(Ident),
    LoadAttr(Ident),
    LoadSubscript,
    /// Pops index, container and value, in that order.
    StoreSubscript,
    BuildTuple(u16),
    BuildList(u16),
    /// Pops a sequence and pushes its items last to first.
    Unpack(u16),
    Call(u8),
    CallMethod(Ident, u8),
    Binary(BinaryOp),
    Unary(UnaryOp),
    Jump(usize),
    JumpIfFalse(usize),
    JumpIfFalseOrPop(usize),
    JumpIfTrueOrPop(usize),
    GetIter,
    /// Pushes the next item of the iterator on top, or pops it and jumps.
    ForIter(usize),
    Pop,
    Return,
    Yield,
    Receive(ReceiveKind),
    SetupExcept(usize),
    SetupOnClose(usize),
    PopBlock,
    MatchException { kind: Option<Ident>, otherwise: usize },
    PopException,
    Reraise,
    MakeFunction { code: Rc<Code>, captures: CaptureList },
}

impl Instruction {
    /// Rewrites the jump target of a placeholder emitted before its target was known.
    pub(crate) fn patch(&mut self, target: usize) {
        match self {
            Instruction::Jump(at)
            | Instruction::JumpIfFalse(at)
            | Instruction::JumpIfFalseOrPop(at)
            | Instruction::JumpIfTrueOrPop(at)
            | Instruction::ForIter(at)
            | Instruction::SetupExcept(at)
            | Instruction::SetupOnClose(at)
            | Instruction::MatchException { otherwise: at, .. } => *at = target,
            _ => unreachable!("patched a non-jump instruction: {}", self),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::LoadConst(index) => write!(f, "LOAD_CONST {}", index),
            Instruction::LoadLocal(slot) => write!(f, "LOAD_LOCAL {}", slot),
            Instruction::StoreLocal(slot) => write!(f, "STORE_LOCAL {}", slot),
            Instruction::LoadName(name) => write!(f, "LOAD_NAME {}", name),
            Instruction::StoreName(name) => write!(f, "STORE_NAME {}", name),
            Instruction::LoadAttr(name) => write!(f, "LOAD_ATTR {}", name),
            Instruction::LoadSubscript => write!(f, "LOAD_SUBSCRIPT"),
            Instruction::StoreSubscript => write!(f, "STORE_SUBSCRIPT"),
            Instruction::BuildTuple(n) => write!(f, "BUILD_TUPLE {}", n),
            Instruction::BuildList(n) => write!(f, "BUILD_LIST {}", n),
            Instruction::Unpack(n) => write!(f, "UNPACK {}", n),
            Instruction::Call(argc) => write!(f, "CALL {}", argc),
            Instruction::CallMethod(name, argc) => write!(f, "CALL_METHOD {} {}", name, argc),
            Instruction::Binary(op) => write!(f, "BINARY {}", op),
            Instruction::Unary(op) => write!(f, "UNARY {:?}", op),
            Instruction::Jump(at) => write!(f, "JUMP {}", at),
            Instruction::JumpIfFalse(at) => write!(f, "JUMP_IF_FALSE {}", at),
            Instruction::JumpIfFalseOrPop(at) => write!(f, "JUMP_IF_FALSE_OR_POP {}", at),
            Instruction::JumpIfTrueOrPop(at) => write!(f, "JUMP_IF_TRUE_OR_POP {}", at),
            Instruction::GetIter => write!(f, "GET_ITER"),
            Instruction::ForIter(at) => write!(f, "FOR_ITER {}", at),
            Instruction::Pop => write!(f, "POP"),
            Instruction::Return => write!(f, "RETURN"),
            Instruction::Yield => write!(f, "YIELD"),
            Instruction::Receive(kind) => write!(f, "RECEIVE {}", kind),
            Instruction::SetupExcept(at) => write!(f, "SETUP_EXCEPT {}", at),
            Instruction::SetupOnClose(at) => write!(f, "SETUP_ON_CLOSE {}", at),
            Instruction::PopBlock => write!(f, "POP_BLOCK"),
            Instruction::MatchException { kind, otherwise } => match kind {
                Some(kind) => write!(f, "MATCH_EXCEPTION {} {}", kind, otherwise),
                None => write!(f, "MATCH_EXCEPTION * {}", otherwise),
            },
            Instruction::PopException => write!(f, "POP_EXCEPTION"),
            Instruction::Reraise => write!(f, "RERAISE"),
            Instruction::MakeFunction { code, captures } => {
                write!(f, "MAKE_FUNCTION {} {}", code.name, captures.len())
            }
        }
    }
}
