//! Generator to coroutine inversion.
//!
//! A routine that pulls values from one of its parameters and yields results is
//! rewritten into a routine that receives those values one at a time and sends
//! results to the same parameter, now bound to a downstream receiver.
//!
//! The work happens in two passes over an owned tree:
//!
//! 1. [`Analyzer`] finds the pull target, the loops over it, explicit iterator
//!    bindings and every identifier in use.
//! 2. [`Transformer`] rewrites loops, yields and `next` calls in one
//!    order-preserving pass.
//!
//! [`invert`] then rebuilds a callable through the [`Materializer`].
use std::rc::Rc;

use smol_str::SmolStr;
use tracing::debug;

use crate::{
    ast::FunctionDef,
    compiler::Materializer,
    value::Function,
    vm::namespace::{Captures, Namespace},
};

pub mod analysis;
pub mod analyzer;
pub mod decorators;
pub mod error;
pub mod naming;
pub mod transformer;

pub use analysis::{AnalysisResult, ExplicitIteratorBinding, NameReference, ReferenceKind};
pub use analyzer::Analyzer;
pub use error::{InversionError, Unsupported, UnsupportedReason};
pub use transformer::Transformer;

/// Base name of the synthesized liveness flag.
pub const DEFAULT_LIVENESS_BASE: &str = "more_values_available";

#[derive(Debug, Clone)]
pub struct Options {
    /// Base for the liveness flag; digits are appended until it is unused.
    pub liveness_base: SmolStr,
    pub strip_decorators: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            liveness_base: SmolStr::new_static(DEFAULT_LIVENESS_BASE),
            strip_decorators: true,
        }
    }
}

/// Runs both passes and returns the push-form tree.
pub fn invert_def(def: FunctionDef, options: &Options) -> Result<FunctionDef, InversionError> {
    let analysis = Analyzer::new(&def, options).analyze()?;
    Transformer::new(&analysis, options).transform(def)
}

/// Inverts `def` and binds the result into a snapshot of `namespace`.
///
/// Nothing is materialized when either pass fails.
pub fn invert(
    def: FunctionDef,
    namespace: &Namespace,
    captures: Captures,
    options: &Options,
) -> Result<Rc<Function>, InversionError> {
    let name = def.name;
    let inverted = invert_def(def, options)?;
    let function = Materializer::new().materialize(&inverted, namespace, captures)?;
    debug!(function = %name, kind = ?function.code.kind, "materialized inverted routine");
    Ok(function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::StmtKind,
        compiler::{CodeKind, CompileError},
        ident::Ident,
        parse,
    };

    fn def(code: &str) -> FunctionDef {
        match parse(code).unwrap().body.remove(0).kind {
            StmtKind::FunctionDef(def) => *def,
            _ => panic!("expected a function"),
        }
    }

    #[test]
    fn test_invert_materializes_coroutine() {
        let namespace = Namespace::default();
        let function = invert(
            def("def pairs(source) { for x in source { yield x; } }"),
            &namespace,
            Captures::default(),
            &Options::default(),
        )
        .unwrap();

        assert_eq!(function.code.kind, CodeKind::Coroutine);
        assert!(!namespace.contains(Ident::new("pairs")));

        let own = Rc::downgrade(&function);
        drop(function);
        assert!(own.upgrade().is_none());
    }

    #[test]
    fn test_invert_rematerialization_failure() {
        let namespace = Namespace::default();
        let result = invert(
            def("def f(source) { break; for x in source { yield x; } }"),
            &namespace,
            Captures::default(),
            &Options::default(),
        );

        assert!(matches!(
            result,
            Err(InversionError::Rematerialization(CompileError::BreakOutsideLoop(_)))
        ));
        assert!(namespace.is_empty());
    }

    #[test]
    fn test_invert_multiple_sources_produces_nothing() {
        let namespace = Namespace::default();
        let result = invert(
            def("def f(a, b) { for x in a { yield x; } for y in b { yield y; } }"),
            &namespace,
            Captures::default(),
            &Options::default(),
        );

        assert!(matches!(result, Err(InversionError::MultipleSources { .. })));
        assert!(namespace.is_empty());
    }

    #[test]
    fn test_custom_liveness_base() {
        let options = Options {
            liveness_base: SmolStr::new("alive"),
            ..Options::default()
        };
        let inverted =
            invert_def(def("def f(source) { for x in source { yield x; } }"), &options).unwrap();
        assert!(inverted.to_code().contains("alive = True;"));
    }
}
