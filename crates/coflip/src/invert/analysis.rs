use rustc_hash::FxHashSet;

use crate::{
    ast::{NodeId, Params},
    ident::Ident,
    range::Range,
};

/// A local bound to an iterator over a parameter, e.g. `it = iter(source);`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplicitIteratorBinding {
    pub alias: Ident,
    pub source: Ident,
    /// The binding assignment; it becomes `pass;` in the push form.
    pub binding: NodeId,
    /// Every `next(alias)` / `alias.__next__()` call after the binding.
    pub steps: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Read,
    Bind,
}

/// A use of a parameter or alias name the rewrite has no rule for.
#[derive(Debug, Clone, PartialEq)]
pub struct NameReference {
    pub name: Ident,
    pub kind: ReferenceKind,
    pub range: Range,
}

/// Everything the transformer needs to know about one routine.
///
/// Built once by [`super::analyzer::Analyzer`] and only read afterwards.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub function: Ident,
    pub params: Params,
    pub pull_target: Ident,
    pub convertible_loops: FxHashSet<NodeId>,
    pub explicit_iterators: Vec<ExplicitIteratorBinding>,
    pub liveness_flag: Ident,
    /// Every identifier read or bound in the routine, nested definitions included.
    pub names: FxHashSet<Ident>,
    /// References to the pull target or an alias outside the recognised shapes.
    pub strays: Vec<NameReference>,
}

impl AnalysisResult {
    #[inline]
    pub fn is_convertible(&self, id: NodeId) -> bool {
        self.convertible_loops.contains(&id)
    }

    #[inline]
    pub fn is_iterator_binding(&self, id: NodeId) -> bool {
        self.explicit_iterators
            .iter()
            .any(|binding| binding.binding == id)
    }

    #[inline]
    pub fn is_step(&self, id: NodeId) -> bool {
        self.explicit_iterators
            .iter()
            .any(|binding| binding.steps.contains(&id))
    }

    pub fn aliases(&self) -> impl Iterator<Item = Ident> + '_ {
        self.explicit_iterators.iter().map(|binding| binding.alias)
    }

    /// Number of places the push form will wait for a value.
    pub fn receive_points(&self) -> usize {
        self.convertible_loops.len()
            + self
                .explicit_iterators
                .iter()
                .map(|binding| binding.steps.len())
                .sum::<usize>()
    }
}
