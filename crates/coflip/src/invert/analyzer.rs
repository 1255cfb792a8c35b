use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::{
    ast::{Block, Expr, ExprKind, FunctionDef, NodeId, Stmt, StmtKind, Target},
    ident::Ident,
    range::Range,
};

use super::{
    Options,
    analysis::{AnalysisResult, ExplicitIteratorBinding, NameReference, ReferenceKind},
    error::InversionError,
    naming::fresh_ident,
};

const ITER: &str = "iter";
const NEXT: &str = "next";
const DUNDER_ITER: &str = "__iter__";
const DUNDER_NEXT: &str = "__next__";

/// Read-only pass over one function definition.
///
/// Nested definitions are only scanned for names; the transformer analyses them
/// on their own when it reaches them.
pub struct Analyzer<'a> {
    def: &'a FunctionDef,
    options: &'a Options,
    pull_target: Option<Ident>,
    convertible_loops: FxHashSet<NodeId>,
    explicit_iterators: Vec<ExplicitIteratorBinding>,
    names: FxHashSet<Ident>,
    references: Vec<NameReference>,
    iter_name: Ident,
    next_name: Ident,
    dunder_iter: Ident,
    dunder_next: Ident,
}

impl<'a> Analyzer<'a> {
    pub fn new(def: &'a FunctionDef, options: &'a Options) -> Self {
        Self {
            def,
            options,
            pull_target: None,
            convertible_loops: FxHashSet::default(),
            explicit_iterators: Vec::new(),
            names: FxHashSet::default(),
            references: Vec::new(),
            iter_name: Ident::new(ITER),
            next_name: Ident::new(NEXT),
            dunder_iter: Ident::new(DUNDER_ITER),
            dunder_next: Ident::new(DUNDER_NEXT),
        }
    }

    pub fn analyze(mut self) -> Result<AnalysisResult, InversionError> {
        self.names.insert(self.def.name);
        self.names.extend(self.def.params.iter().copied());
        let def = self.def;
        self.visit_block(&def.body)?;

        let Some(pull_target) = self.pull_target else {
            return Err(InversionError::NoPullSource(self.def.name));
        };

        let aliases = self
            .explicit_iterators
            .iter()
            .map(|binding| binding.alias)
            .collect::<FxHashSet<_>>();
        let strays = self
            .references
            .into_iter()
            .filter(|reference| reference.name == pull_target || aliases.contains(&reference.name))
            .collect::<Vec<_>>();

        let liveness_flag = fresh_ident(&self.options.liveness_base, &self.names);

        debug!(
            function = %self.def.name,
            pull_target = %pull_target,
            loops = self.convertible_loops.len(),
            explicit_iterators = self.explicit_iterators.len(),
            strays = strays.len(),
            liveness_flag = %liveness_flag,
            "analyzed routine"
        );

        Ok(AnalysisResult {
            function: self.def.name,
            params: self.def.params.clone(),
            pull_target,
            convertible_loops: self.convertible_loops,
            explicit_iterators: self.explicit_iterators,
            liveness_flag,
            names: self.names,
            strays,
        })
    }

    #[inline(always)]
    fn is_param(&self, name: Ident) -> bool {
        self.def.params.contains(&name)
    }

    #[inline(always)]
    fn is_alias(&self, name: Ident) -> bool {
        self.explicit_iterators
            .iter()
            .any(|binding| binding.alias == name)
    }

    fn alias_binding(&mut self, name: Ident) -> Option<&mut ExplicitIteratorBinding> {
        self.explicit_iterators
            .iter_mut()
            .rev()
            .find(|binding| binding.alias == name)
    }

    fn set_pull_target(&mut self, name: Ident, range: Range) -> Result<(), InversionError> {
        match self.pull_target {
            None => {
                self.pull_target = Some(name);
                Ok(())
            }
            Some(current) if current == name => Ok(()),
            Some(current) => Err(InversionError::MultipleSources {
                function: self.def.name,
                first: current,
                second: name,
                range,
            }),
        }
    }

    fn visit_block(&mut self, block: &Block) -> Result<(), InversionError> {
        for stmt in block {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), InversionError> {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                self.bind(def.name, stmt.range);
                self.names.extend(def.referenced_names());
                // A closure reading the source or an alias sees the receiver in
                // the push form, so those reads count as strays here.
                let mut free = def.free_names().into_iter().collect::<Vec<_>>();
                free.sort_by_key(|name| name.as_str());
                for name in free {
                    self.references.push(NameReference {
                        name,
                        kind: ReferenceKind::Read,
                        range: def.range,
                    });
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                match iter.name() {
                    Some(name) if self.is_param(name) => {
                        self.set_pull_target(name, iter.range)?;
                        self.mark_convertible(stmt.id, name);
                    }
                    Some(name) if self.is_alias(name) => {
                        self.mark_convertible(stmt.id, name);
                    }
                    _ => self.visit_expr(iter),
                }
                self.visit_target(target, stmt.range);
                self.visit_block(body)?;
                self.visit_block(orelse)?;
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                self.visit_expr(test);
                self.visit_block(body)?;
                self.visit_block(orelse)?;
            }
            StmtKind::Try { body, handlers } => {
                self.visit_block(body)?;
                for handler in handlers {
                    self.visit_block(&handler.body)?;
                }
            }
            StmtKind::OnClose { body, handler } => {
                self.visit_block(body)?;
                self.visit_block(handler)?;
            }
            StmtKind::Assign { target, value } => {
                if let Some((alias, source)) = self.iterator_binding(target, value) {
                    self.set_pull_target(source, value.range)?;
                    trace!(alias = %alias, source = %source, "explicit iterator binding");
                    self.names.insert(alias);
                    self.names.insert(source);
                    self.explicit_iterators.push(ExplicitIteratorBinding {
                        alias,
                        source,
                        binding: stmt.id,
                        steps: Vec::new(),
                    });
                } else {
                    self.visit_expr(value);
                    self.visit_target(target, stmt.range);
                }
            }
            StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => self.visit_expr(expr),
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
        }

        Ok(())
    }

    fn mark_convertible(&mut self, id: NodeId, source: Ident) {
        trace!(loop_id = %id, source = %source, "convertible loop");
        self.names.insert(source);
        self.convertible_loops.insert(id);
    }

    /// Matches `alias = iter(param)` and `alias = param.__iter__()`.
    fn iterator_binding(&self, target: &Target, value: &Expr) -> Option<(Ident, Ident)> {
        let Target::Name(alias) = target else {
            return None;
        };
        let ExprKind::Call { func, args } = &value.kind else {
            return None;
        };

        let source = match (&func.kind, args.as_slice()) {
            (ExprKind::Name(name), [arg]) if *name == self.iter_name => arg.name()?,
            (ExprKind::Attribute { value: receiver, attr }, []) if *attr == self.dunder_iter => {
                receiver.name()?
            }
            _ => return None,
        };

        self.is_param(source).then_some((*alias, source))
    }

    /// Matches `next(alias)` and `alias.__next__()` on a bound alias.
    fn step_alias(&self, func: &Expr, args: &[Expr]) -> Option<Ident> {
        let alias = match (&func.kind, args) {
            (ExprKind::Name(name), [arg]) if *name == self.next_name => arg.name()?,
            (ExprKind::Attribute { value: receiver, attr }, []) if *attr == self.dunder_next => {
                receiver.name()?
            }
            _ => return None,
        };

        self.is_alias(alias).then_some(alias)
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Receive(_) => {}
            ExprKind::Name(name) => self.read(*name, expr.range),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                items.iter().for_each(|item| self.visit_expr(item));
            }
            ExprKind::Call { func, args } => {
                if let Some(alias) = self.step_alias(func, args) {
                    trace!(alias = %alias, call = %expr.id, "explicit step");
                    self.names.insert(alias);
                    if let ExprKind::Name(next) = func.kind {
                        self.names.insert(next);
                    }
                    if let Some(binding) = self.alias_binding(alias) {
                        binding.steps.push(expr.id);
                    }
                    return;
                }
                self.visit_expr(func);
                args.iter().for_each(|arg| self.visit_expr(arg));
            }
            ExprKind::Attribute { value, .. } => self.visit_expr(value),
            ExprKind::Subscript { value, index } => {
                self.visit_expr(value);
                self.visit_expr(index);
            }
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::BoolOp { lhs, rhs, .. } => {
                self.visit_expr(lhs);
                self.visit_expr(rhs);
            }
            ExprKind::Unary { operand, .. } => self.visit_expr(operand),
            ExprKind::Yield(value) => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
        }
    }

    fn visit_target(&mut self, target: &Target, range: Range) {
        match target {
            Target::Name(name) => self.bind(*name, range),
            Target::Tuple(targets) => targets
                .iter()
                .for_each(|target| self.visit_target(target, range)),
            Target::Subscript { value, index } => {
                self.visit_expr(value);
                self.visit_expr(index);
            }
        }
    }

    fn read(&mut self, name: Ident, range: Range) {
        self.names.insert(name);
        self.references.push(NameReference {
            name,
            kind: ReferenceKind::Read,
            range,
        });
    }

    fn bind(&mut self, name: Ident, range: Range) {
        self.names.insert(name);
        self.references.push(NameReference {
            name,
            kind: ReferenceKind::Bind,
            range,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use rstest::rstest;

    fn analyze(code: &str) -> Result<AnalysisResult, InversionError> {
        let module = parse(code).unwrap();
        let def = match &module.body[0].kind {
            StmtKind::FunctionDef(def) => def.as_ref().clone(),
            _ => panic!("expected a function"),
        };
        let options = Options::default();
        Analyzer::new(&def, &options).analyze()
    }

    #[test]
    fn test_single_loop() {
        let result = analyze("def f(source) { for x in source { yield x; } }").unwrap();
        assert_eq!(result.pull_target, Ident::new("source"));
        assert_eq!(result.convertible_loops.len(), 1);
        assert!(result.strays.is_empty());
        assert_eq!(result.liveness_flag, Ident::new("more_values_available"));
    }

    #[test]
    fn test_sequential_loops() {
        let result = analyze(
            "def f(source) { for x in source { break; } for y in source { yield y; } }",
        )
        .unwrap();
        assert_eq!(result.convertible_loops.len(), 2);
        assert_eq!(result.receive_points(), 2);
    }

    #[test]
    fn test_loop_over_local_is_not_convertible() {
        let result = analyze(
            "def f(source) { xs = [1, 2]; for x in xs { yield x; } for y in source { yield y; } }",
        )
        .unwrap();
        assert_eq!(result.convertible_loops.len(), 1);
    }

    #[rstest]
    #[case("def f(source) { it = iter(source); yield next(it); }")]
    #[case("def f(source) { it = source.__iter__(); yield it.__next__(); }")]
    fn test_explicit_iterator(#[case] code: &str) {
        let result = analyze(code).unwrap();
        assert_eq!(result.pull_target, Ident::new("source"));
        assert!(result.convertible_loops.is_empty());
        assert_eq!(result.explicit_iterators.len(), 1);
        let binding = &result.explicit_iterators[0];
        assert_eq!(binding.alias, Ident::new("it"));
        assert_eq!(binding.source, Ident::new("source"));
        assert_eq!(binding.steps.len(), 1);
        assert!(result.is_iterator_binding(binding.binding));
        assert!(result.strays.is_empty());
    }

    #[test]
    fn test_loop_over_alias_is_convertible() {
        let result = analyze(
            "def f(source) { it = iter(source); for x in it { y = next(it); yield x + y; } }",
        )
        .unwrap();
        assert_eq!(result.convertible_loops.len(), 1);
        assert_eq!(result.receive_points(), 2);
    }

    #[test]
    fn test_multiple_sources() {
        let err = analyze("def f(a, b) { for x in a { yield x; } for y in b { yield y; } }")
            .unwrap_err();
        assert!(matches!(
            err,
            InversionError::MultipleSources { first, second, .. }
                if first == Ident::new("a") && second == Ident::new("b")
        ));
    }

    #[test]
    fn test_multiple_sources_through_alias() {
        let err = analyze("def f(a, b) { it = iter(b); for x in a { yield next(it); } }")
            .unwrap_err();
        assert!(matches!(err, InversionError::MultipleSources { .. }));
    }

    #[rstest]
    #[case("def f(xs) { ys = [1]; for y in ys { yield y; } }")]
    #[case("def f(xs) { yield len(xs); }")]
    #[case("def f() { yield 1; }")]
    fn test_no_pull_source(#[case] code: &str) {
        assert_eq!(
            analyze(code).unwrap_err(),
            InversionError::NoPullSource(Ident::new("f"))
        );
    }

    #[rstest]
    #[case("def f(source) { n = len(source); for x in source { yield n; } }", ReferenceKind::Read)]
    #[case("def f(source) { for x in source { yield source[0]; } }", ReferenceKind::Read)]
    #[case("def f(source) { it = iter(source); it = 1; yield next(it); }", ReferenceKind::Bind)]
    #[case("def f(source) { for source in source { yield 1; } }", ReferenceKind::Bind)]
    fn test_strays(#[case] code: &str, #[case] kind: ReferenceKind) {
        let result = analyze(code).unwrap();
        assert_eq!(result.strays.len(), 1);
        assert_eq!(result.strays[0].kind, kind);
    }

    #[rstest]
    #[case::loop_in_closure(
        "def f(source) { def g() { for y in source { return y; } } for x in source { yield (x, g()); } }",
        "source"
    )]
    #[case::step_in_closure(
        "def f(source) { it = iter(source); def g() { return next(it); } for x in it { yield (x, g()); } }",
        "it"
    )]
    #[case::deeper_closure(
        "def f(source) { def g() { def h() { return len(source); } return h; } for x in source { yield x; } }",
        "source"
    )]
    fn test_closure_reads_are_strays(#[case] code: &str, #[case] name: &str) {
        let result = analyze(code).unwrap();
        assert_eq!(result.strays.len(), 1);
        assert_eq!(result.strays[0].name, Ident::new(name));
        assert_eq!(result.strays[0].kind, ReferenceKind::Read);
    }

    #[test]
    fn test_closure_with_own_source_is_not_a_stray() {
        let result = analyze(
            "def f(source) { def g(source) { for y in source { yield y; } } def h() { source = 1; return source; } for x in source { yield x; } }",
        )
        .unwrap();
        assert!(result.strays.is_empty());
    }

    #[test]
    fn test_liveness_flag_avoids_nested_names() {
        let result = analyze(
            "def f(source) {\n\
             more_values_available = 1;\n\
             def g(more_values_available1) { return more_values_available2; }\n\
             for x in source { yield x; }\n\
             }",
        )
        .unwrap();
        assert_eq!(result.liveness_flag, Ident::new("more_values_available3"));
    }

    #[test]
    fn test_nested_loops_are_not_scanned() {
        let result = analyze(
            "def f(source) { def g(items) { for i in items { yield i; } } for x in source { yield g(x); } }",
        )
        .unwrap();
        assert_eq!(result.convertible_loops.len(), 1);
        assert!(result.names.contains(&Ident::new("items")));
    }
}
