pub mod code;
pub mod error;
pub mod node;
pub mod parser;

pub use node::{
    Args, BinaryOp, Block, BoolOp, ExceptHandler, Expr, ExprKind, FunctionDef, Literal, Module,
    NodeId, Params, ReceiveKind, Stmt, StmtKind, Target, UnaryOp,
};
