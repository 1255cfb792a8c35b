use tracing::{debug, trace};

use crate::{
    ast::{
        Block, ExceptHandler, Expr, ExprKind, FunctionDef, Literal, NodeId, ReceiveKind, Stmt,
        StmtKind, Target,
    },
    ident::Ident,
    range::Range,
};

use super::{
    Options,
    analysis::{AnalysisResult, ReferenceKind},
    analyzer::Analyzer,
    decorators::strip_decorators,
    error::{InversionError, UnsupportedReason},
};

const SEND: &str = "send";

/// Rewrites a pull-form definition into its push form in one pass.
///
/// Statement order is kept; every rewritten loop keeps the id of the loop it
/// replaces so diagnostics still point at user code.
pub struct Transformer<'a> {
    analysis: &'a AnalysisResult,
    options: &'a Options,
    send: Ident,
    receives: usize,
}

impl<'a> Transformer<'a> {
    pub fn new(analysis: &'a AnalysisResult, options: &'a Options) -> Self {
        Self {
            analysis,
            options,
            send: Ident::new(SEND),
            receives: 0,
        }
    }

    pub fn transform(mut self, mut def: FunctionDef) -> Result<FunctionDef, InversionError> {
        if self.options.strip_decorators {
            strip_decorators(&mut def);
        }

        if let Some(stray) = self.analysis.strays.first() {
            let reason = match stray.kind {
                ReferenceKind::Read => UnsupportedReason::SourceRead(stray.name),
                ReferenceKind::Bind => UnsupportedReason::SourceRebound(stray.name),
            };
            return Err(InversionError::unsupported(reason, Some(stray.range)));
        }

        let body = std::mem::take(&mut def.body);
        let mut inverted = Vec::with_capacity(body.len() + 1);
        inverted.push(self.set_flag(true, def.range));
        inverted.extend(self.transform_block(body)?);

        if self.receives == 0 {
            return Err(InversionError::unsupported(
                UnsupportedReason::NoReceivePoint(self.analysis.pull_target),
                Some(def.range),
            ));
        }

        debug!(
            function = %def.name,
            receives = self.receives,
            liveness_flag = %self.analysis.liveness_flag,
            "inverted routine"
        );

        def.body = inverted;
        Ok(def)
    }

    fn transform_block(&mut self, block: Block) -> Result<Block, InversionError> {
        block
            .into_iter()
            .map(|stmt| self.transform_stmt(stmt))
            .collect()
    }

    fn transform_stmt(&mut self, stmt: Stmt) -> Result<Stmt, InversionError> {
        let Stmt { id, range, kind } = stmt;

        let kind = match kind {
            StmtKind::FunctionDef(def) => {
                StmtKind::FunctionDef(Box::new(self.transform_nested(*def)?))
            }
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } if self.analysis.is_convertible(id) => {
                return self.convert_loop(id, range, target, body, orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => StmtKind::For {
                target: self.transform_target(target)?,
                iter: self.transform_expr(iter)?,
                body: self.transform_block(body)?,
                orelse: self.transform_block(orelse)?,
            },
            StmtKind::While { test, body, orelse } => StmtKind::While {
                test: self.transform_expr(test)?,
                body: self.transform_block(body)?,
                orelse: self.transform_block(orelse)?,
            },
            StmtKind::If { test, body, orelse } => StmtKind::If {
                test: self.transform_expr(test)?,
                body: self.transform_block(body)?,
                orelse: self.transform_block(orelse)?,
            },
            StmtKind::Try { body, handlers } => StmtKind::Try {
                body: self.transform_block(body)?,
                handlers: handlers
                    .into_iter()
                    .map(|handler| {
                        Ok(ExceptHandler {
                            kind: handler.kind,
                            body: self.transform_block(handler.body)?,
                            range: handler.range,
                        })
                    })
                    .collect::<Result<Vec<_>, InversionError>>()?,
            },
            StmtKind::OnClose { body, handler } => StmtKind::OnClose {
                body: self.transform_block(body)?,
                handler: self.transform_block(handler)?,
            },
            StmtKind::Assign { .. } if self.analysis.is_iterator_binding(id) => {
                trace!(stmt = %id, "dropped iterator binding");
                StmtKind::Pass
            }
            StmtKind::Assign { target, value } => StmtKind::Assign {
                target: self.transform_target(target)?,
                value: self.transform_expr(value)?,
            },
            StmtKind::Expr(Expr {
                kind: ExprKind::Yield(value),
                range: yield_range,
                ..
            }) => StmtKind::Expr(self.send_downstream(value, yield_range)?),
            StmtKind::Expr(expr) => StmtKind::Expr(self.transform_expr(expr)?),
            StmtKind::Return(value) => {
                StmtKind::Return(value.map(|value| self.transform_expr(value)).transpose()?)
            }
            kind @ (StmtKind::Break | StmtKind::Continue | StmtKind::Pass) => kind,
        };

        Ok(Stmt { id, range, kind })
    }

    /// `for t in src { body } else { orelse }` becomes
    /// `on_close { while flag { t = receive loop; body } else { orelse } } handle { flag = False; orelse }`.
    fn convert_loop(
        &mut self,
        id: NodeId,
        range: Range,
        target: Target,
        body: Block,
        orelse: Block,
    ) -> Result<Stmt, InversionError> {
        if let Target::Subscript { .. } = target {
            return Err(InversionError::unsupported(
                UnsupportedReason::SubscriptLoopTarget,
                Some(range),
            ));
        }

        trace!(loop_id = %id, "converting loop");
        self.receives += 1;

        let receive = Expr::synthesized(ExprKind::Receive(ReceiveKind::Loop), range);
        let mut loop_body = Vec::with_capacity(body.len() + 1);
        loop_body.push(Stmt::synthesized(
            StmtKind::Assign {
                target,
                value: receive,
            },
            range,
        ));
        loop_body.extend(self.transform_block(body)?);

        let orelse = self.transform_block(orelse)?;
        let test = Expr::synthesized(ExprKind::Name(self.analysis.liveness_flag), range);
        let guarded = Stmt::synthesized(
            StmtKind::While {
                test,
                body: loop_body,
                orelse: orelse.clone(),
            },
            range,
        );

        let mut handler = Vec::with_capacity(orelse.len() + 1);
        handler.push(self.set_flag(false, range));
        handler.extend(orelse);

        Ok(Stmt {
            id,
            range,
            kind: StmtKind::OnClose {
                body: vec![guarded],
                handler,
            },
        })
    }

    /// Inverts a nested definition on its own; one without a pull source stays as is.
    fn transform_nested(&self, def: FunctionDef) -> Result<FunctionDef, InversionError> {
        let analysis = match Analyzer::new(&def, self.options).analyze() {
            Ok(analysis) => analysis,
            Err(InversionError::NoPullSource(name)) => {
                trace!(function = %name, "nested definition left unchanged");
                return Ok(def);
            }
            Err(err) => return Err(err),
        };
        Transformer::new(&analysis, self.options).transform(def)
    }

    /// `yield v;` becomes `<pull target>.send(v);`.
    fn send_downstream(
        &mut self,
        value: Option<Box<Expr>>,
        range: Range,
    ) -> Result<Expr, InversionError> {
        let value = match value {
            Some(value) => self.transform_expr(*value)?,
            None => Expr::synthesized(ExprKind::Literal(Literal::None), range),
        };
        let receiver = Expr::synthesized(ExprKind::Name(self.analysis.pull_target), range);
        let func = Expr::synthesized(
            ExprKind::Attribute {
                value: Box::new(receiver),
                attr: self.send,
            },
            range,
        );
        Ok(Expr::synthesized(
            ExprKind::Call {
                func: Box::new(func),
                args: vec![value],
            },
            range,
        ))
    }

    fn set_flag(&self, value: bool, range: Range) -> Stmt {
        Stmt::synthesized(
            StmtKind::Assign {
                target: Target::Name(self.analysis.liveness_flag),
                value: Expr::synthesized(ExprKind::Literal(Literal::Bool(value)), range),
            },
            range,
        )
    }

    fn transform_target(&mut self, target: Target) -> Result<Target, InversionError> {
        match target {
            Target::Name(_) => Ok(target),
            Target::Tuple(targets) => Ok(Target::Tuple(
                targets
                    .into_iter()
                    .map(|target| self.transform_target(target))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Target::Subscript { value, index } => Ok(Target::Subscript {
                value: Box::new(self.transform_expr(*value)?),
                index: Box::new(self.transform_expr(*index)?),
            }),
        }
    }

    fn transform_boxed(&mut self, expr: Box<Expr>) -> Result<Box<Expr>, InversionError> {
        self.transform_expr(*expr).map(Box::new)
    }

    fn transform_exprs(&mut self, exprs: Vec<Expr>) -> Result<Vec<Expr>, InversionError> {
        exprs
            .into_iter()
            .map(|expr| self.transform_expr(expr))
            .collect()
    }

    fn transform_expr(&mut self, expr: Expr) -> Result<Expr, InversionError> {
        let Expr { id, range, kind } = expr;

        let kind = match kind {
            ExprKind::Call { .. } if self.analysis.is_step(id) => {
                trace!(call = %id, "step receive");
                self.receives += 1;
                ExprKind::Receive(ReceiveKind::Step)
            }
            ExprKind::Call { func, args } => ExprKind::Call {
                func: self.transform_boxed(func)?,
                args: self.transform_exprs(args)?,
            },
            ExprKind::Yield(_) => {
                return Err(InversionError::unsupported(
                    UnsupportedReason::YieldExpression,
                    Some(range),
                ));
            }
            ExprKind::Tuple(items) => ExprKind::Tuple(self.transform_exprs(items)?),
            ExprKind::List(items) => ExprKind::List(self.transform_exprs(items)?),
            ExprKind::Attribute { value, attr } => ExprKind::Attribute {
                value: self.transform_boxed(value)?,
                attr,
            },
            ExprKind::Subscript { value, index } => ExprKind::Subscript {
                value: self.transform_boxed(value)?,
                index: self.transform_boxed(index)?,
            },
            ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op,
                lhs: self.transform_boxed(lhs)?,
                rhs: self.transform_boxed(rhs)?,
            },
            ExprKind::BoolOp { op, lhs, rhs } => ExprKind::BoolOp {
                op,
                lhs: self.transform_boxed(lhs)?,
                rhs: self.transform_boxed(rhs)?,
            },
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op,
                operand: self.transform_boxed(operand)?,
            },
            kind @ (ExprKind::Literal(_) | ExprKind::Name(_) | ExprKind::Receive(_)) => kind,
        };

        Ok(Expr { id, range, kind })
    }
}
