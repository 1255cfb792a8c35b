use crate::ast::{Block, FunctionDef, StmtKind};

/// Removes the decorators of `def` and of every definition nested in it.
pub fn strip_decorators(def: &mut FunctionDef) {
    def.decorators.clear();
    strip_block(&mut def.body);
}

fn strip_block(block: &mut Block) {
    for stmt in block.iter_mut() {
        match &mut stmt.kind {
            StmtKind::FunctionDef(def) => strip_decorators(def),
            StmtKind::For { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::If { body, orelse, .. } => {
                strip_block(body);
                strip_block(orelse);
            }
            StmtKind::Try { body, handlers } => {
                strip_block(body);
                for handler in handlers.iter_mut() {
                    strip_block(&mut handler.body);
                }
            }
            StmtKind::OnClose { body, handler } => {
                strip_block(body);
                strip_block(handler);
            }
            StmtKind::Assign { .. }
            | StmtKind::Expr(_)
            | StmtKind::Return(_)
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass => {}
        }
    }
}
