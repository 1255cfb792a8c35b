#[cfg(feature = "ast-json")]
use serde::{Deserialize, Serialize};

use rustc_hash::FxHashSet;

use crate::{ident::Ident, range::Range};

pub type Args = Vec<Expr>;
pub type Block = Vec<Stmt>;
pub type Params = Vec<Ident>;

/// Identity of a node inside one parsed module.
///
/// Analysis results refer to loops and call sites by id, so ids must stay stable
/// while the transformer moves nodes around.
#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Id carried by nodes the transformer creates.
    pub const SYNTHESIZED: NodeId = NodeId(u32::MAX);

    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn id(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A parsed source unit: the top-level statements in order.
#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Debug, Clone, Default)]
pub struct Module {
    pub body: Block,
}

impl Module {
    /// Returns the top-level function definition called `name`.
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        let name = Ident::new(name);
        self.body.iter().find_map(|stmt| match &stmt.kind {
            StmtKind::FunctionDef(def) if def.name == name => Some(def.as_ref()),
            _ => None,
        })
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Debug, Clone)]
pub struct FunctionDef {
    pub name: Ident,
    pub params: Params,
    pub decorators: Vec<Expr>,
    pub body: Block,
    pub range: Range,
}

impl FunctionDef {
    /// Every identifier this definition mentions: its name, parameters, decorators
    /// and everything read or bound in its body, nested definitions included.
    pub fn referenced_names(&self) -> FxHashSet<Ident> {
        let mut names = FxHashSet::default();
        collect_def_names(self, &mut names);
        names
    }

    /// Names bound directly in the body: assignment and loop targets and nested
    /// definition names. Nested bodies bind in their own scope.
    pub fn local_names(&self) -> Vec<Ident> {
        let mut names = Vec::new();
        collect_bound_names(&self.body, &mut names);
        names
    }

    /// Names the body reads without binding them, nested definitions included.
    /// A closure over this definition takes exactly these from its enclosing scope.
    pub fn free_names(&self) -> FxHashSet<Ident> {
        let mut reads = FxHashSet::default();
        collect_block_reads(&self.body, &mut reads);
        let locals = self.local_names();
        reads.retain(|name| !self.params.contains(name) && !locals.contains(name));
        reads
    }

    /// True when any decorator is the bare name `marker` or a call of it.
    pub fn has_decorator(&self, marker: Ident) -> bool {
        self.decorators
            .iter()
            .any(|decorator| decorator.is_decorator(marker))
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Debug, Clone)]
pub struct Stmt {
    pub id: NodeId,
    pub range: Range,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn synthesized(kind: StmtKind, range: Range) -> Self {
        Self {
            id: NodeId::SYNTHESIZED,
            range,
            kind,
        }
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Debug, Clone)]
pub enum StmtKind {
    FunctionDef(Box<FunctionDef>),
    For {
        target: Target,
        iter: Expr,
        body: Block,
        orelse: Block,
    },
    While {
        test: Expr,
        body: Block,
        orelse: Block,
    },
    If {
        test: Expr,
        body: Block,
        orelse: Block,
    },
    Try {
        body: Block,
        handlers: Vec<ExceptHandler>,
    },
    /// Runs `body`; a termination signal delivered at a loop receive inside it
    /// transfers control to `handler`, after which execution continues past the
    /// statement. Only produced by inversion.
    OnClose {
        body: Block,
        handler: Block,
    },
    Assign {
        target: Target,
        value: Expr,
    },
    Expr(Expr),
    Return(Option<Expr>),
    Break,
    Continue,
    Pass,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Debug, Clone)]
pub struct ExceptHandler {
    /// Error kind to match; `None` matches every error.
    pub kind: Option<Ident>,
    pub body: Block,
    pub range: Range,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Debug, Clone)]
pub enum Target {
    Name(Ident),
    Tuple(Vec<Target>),
    Subscript { value: Box<Expr>, index: Box<Expr> },
}

impl Target {
    /// Every name this target binds.
    pub fn names(&self) -> Vec<Ident> {
        match self {
            Target::Name(name) => vec![*name],
            Target::Tuple(targets) => targets.iter().flat_map(Target::names).collect(),
            Target::Subscript { .. } => Vec::new(),
        }
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub range: Range,
    pub kind: ExprKind,
}

impl Expr {
    pub fn synthesized(kind: ExprKind, range: Range) -> Self {
        Self {
            id: NodeId::SYNTHESIZED,
            range,
            kind,
        }
    }

    pub fn name(&self) -> Option<Ident> {
        match self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }

    /// True for `@marker` and `@marker(...)`.
    pub fn is_decorator(&self, marker: Ident) -> bool {
        match &self.kind {
            ExprKind::Name(name) => *name == marker,
            ExprKind::Call { func, .. } => func.name() == Some(marker),
            _ => false,
        }
    }
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Name(Ident),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Call {
        func: Box<Expr>,
        args: Args,
    },
    Attribute {
        value: Box<Expr>,
        attr: Ident,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Yield(Option<Box<Expr>>),
    /// Suspends until the driver pushes a value. Only produced by inversion.
    Receive(ReceiveKind),
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Debug, Clone)]
pub enum Literal {
    Int(i64),
    String(String),
    Bool(bool),
    None,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum BoolOp {
    And,
    Or,
}

/// How a receive point reacts to the termination signal.
#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum ReceiveKind {
    /// Head of a rewritten loop: control moves to the enclosing `OnClose` handler.
    Loop,
    /// Replacement for an explicit `next`: raises `StopIteration` in place.
    Step,
}

fn collect_def_names(def: &FunctionDef, names: &mut FxHashSet<Ident>) {
    names.insert(def.name);
    names.extend(def.params.iter().copied());
    def.decorators
        .iter()
        .for_each(|decorator| collect_expr_names(decorator, names));
    collect_block_names(&def.body, names);
}

fn collect_block_names(block: &Block, names: &mut FxHashSet<Ident>) {
    for stmt in block {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => collect_def_names(def, names),
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                collect_target_names(target, names);
                collect_expr_names(iter, names);
                collect_block_names(body, names);
                collect_block_names(orelse, names);
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                collect_expr_names(test, names);
                collect_block_names(body, names);
                collect_block_names(orelse, names);
            }
            StmtKind::Try { body, handlers } => {
                collect_block_names(body, names);
                for handler in handlers {
                    collect_block_names(&handler.body, names);
                }
            }
            StmtKind::OnClose { body, handler } => {
                collect_block_names(body, names);
                collect_block_names(handler, names);
            }
            StmtKind::Assign { target, value } => {
                collect_target_names(target, names);
                collect_expr_names(value, names);
            }
            StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => collect_expr_names(expr, names),
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
        }
    }
}

fn collect_target_names(target: &Target, names: &mut FxHashSet<Ident>) {
    match target {
        Target::Name(name) => {
            names.insert(*name);
        }
        Target::Tuple(targets) => targets
            .iter()
            .for_each(|target| collect_target_names(target, names)),
        Target::Subscript { value, index } => {
            collect_expr_names(value, names);
            collect_expr_names(index, names);
        }
    }
}

fn collect_expr_names(expr: &Expr, names: &mut FxHashSet<Ident>) {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Receive(_) => {}
        ExprKind::Name(name) => {
            names.insert(*name);
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => items
            .iter()
            .for_each(|item| collect_expr_names(item, names)),
        ExprKind::Call { func, args } => {
            collect_expr_names(func, names);
            args.iter().for_each(|arg| collect_expr_names(arg, names));
        }
        ExprKind::Attribute { value, .. } => collect_expr_names(value, names),
        ExprKind::Subscript { value, index } => {
            collect_expr_names(value, names);
            collect_expr_names(index, names);
        }
        ExprKind::Binary { lhs, rhs, .. } | ExprKind::BoolOp { lhs, rhs, .. } => {
            collect_expr_names(lhs, names);
            collect_expr_names(rhs, names);
        }
        ExprKind::Unary { operand, .. } => collect_expr_names(operand, names),
        ExprKind::Yield(value) => {
            if let Some(value) = value {
                collect_expr_names(value, names);
            }
        }
    }
}

fn collect_bound_names(block: &Block, names: &mut Vec<Ident>) {
    for stmt in block {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => names.push(def.name),
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                names.extend(target.names());
                collect_bound_names(body, names);
                collect_bound_names(orelse, names);
            }
            StmtKind::While { body, orelse, .. } | StmtKind::If { body, orelse, .. } => {
                collect_bound_names(body, names);
                collect_bound_names(orelse, names);
            }
            StmtKind::Try { body, handlers } => {
                collect_bound_names(body, names);
                for handler in handlers {
                    collect_bound_names(&handler.body, names);
                }
            }
            StmtKind::OnClose { body, handler } => {
                collect_bound_names(body, names);
                collect_bound_names(handler, names);
            }
            StmtKind::Assign { target, .. } => names.extend(target.names()),
            StmtKind::Expr(_)
            | StmtKind::Return(_)
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass => {}
        }
    }
}

fn collect_block_reads(block: &Block, reads: &mut FxHashSet<Ident>) {
    for stmt in block {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                def.decorators
                    .iter()
                    .for_each(|decorator| collect_expr_names(decorator, reads));
                reads.extend(def.free_names());
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                collect_target_reads(target, reads);
                collect_expr_names(iter, reads);
                collect_block_reads(body, reads);
                collect_block_reads(orelse, reads);
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                collect_expr_names(test, reads);
                collect_block_reads(body, reads);
                collect_block_reads(orelse, reads);
            }
            StmtKind::Try { body, handlers } => {
                collect_block_reads(body, reads);
                for handler in handlers {
                    collect_block_reads(&handler.body, reads);
                }
            }
            StmtKind::OnClose { body, handler } => {
                collect_block_reads(body, reads);
                collect_block_reads(handler, reads);
            }
            StmtKind::Assign { target, value } => {
                collect_target_reads(target, reads);
                collect_expr_names(value, reads);
            }
            StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => collect_expr_names(expr, reads),
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
        }
    }
}

/// Only subscript targets read anything.
fn collect_target_reads(target: &Target, reads: &mut FxHashSet<Ident>) {
    match target {
        Target::Name(_) => {}
        Target::Tuple(targets) => targets
            .iter()
            .for_each(|target| collect_target_reads(target, reads)),
        Target::Subscript { value, index } => {
            collect_expr_names(value, reads);
            collect_expr_names(index, reads);
        }
    }
}
