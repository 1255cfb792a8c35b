use std::{cell::RefCell, fmt, rc::Rc};

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::{ident::Ident, value::Value};

/// Explicit free-variable bindings handed to a materialized routine.
pub type Captures = FxHashMap<Ident, Value>;

/// Global bindings of running code.
///
/// Cloning shares the same bindings; [`Namespace::snapshot`] copies them.
#[derive(Clone, Default)]
pub struct Namespace {
    bindings: Rc<RefCell<FxHashMap<Ident, Value>>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// A detached copy; later definitions in either side are not seen by the other.
    pub fn snapshot(&self) -> Self {
        Self {
            bindings: Rc::new(RefCell::new(self.bindings.borrow().clone())),
        }
    }

    pub fn define(&self, name: Ident, value: Value) {
        self.bindings.borrow_mut().insert(name, value);
    }

    pub fn extend(&self, captures: Captures) {
        self.bindings.borrow_mut().extend(captures);
    }

    #[inline]
    pub fn get(&self, name: Ident) -> Option<Value> {
        self.bindings.borrow().get(&name).cloned()
    }

    #[inline]
    pub fn contains(&self, name: Ident) -> bool {
        self.bindings.borrow().contains_key(&name)
    }

    pub fn remove(&self, name: Ident) -> Option<Value> {
        self.bindings.borrow_mut().remove(&name)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.borrow().is_empty()
    }

    pub fn names(&self) -> Vec<Ident> {
        self.bindings
            .borrow()
            .keys()
            .copied()
            .sorted_by_key(|name| name.as_str())
            .collect()
    }

    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Rc::ptr_eq(&self.bindings, &other.bindings)
    }
}

// Bindings can hold functions whose globals are this namespace, so only names are printed.
impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_bindings() {
        let namespace = Namespace::new();
        let shared = namespace.clone();
        shared.define(Ident::new("x"), Value::Int(1));
        assert_eq!(namespace.get(Ident::new("x")), Some(Value::Int(1)));
        assert!(namespace.ptr_eq(&shared));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let namespace = Namespace::new();
        namespace.define(Ident::new("x"), Value::Int(1));

        let snapshot = namespace.snapshot();
        snapshot.define(Ident::new("y"), Value::Int(2));
        namespace.define(Ident::new("z"), Value::Int(3));

        assert!(snapshot.contains(Ident::new("x")));
        assert!(!namespace.contains(Ident::new("y")));
        assert!(!snapshot.contains(Ident::new("z")));
        assert!(!namespace.ptr_eq(&snapshot));
    }

    #[test]
    fn test_extend_with_captures() {
        let namespace = Namespace::new();
        let mut captures = Captures::default();
        captures.insert(Ident::new("scale"), Value::Int(10));
        namespace.extend(captures);
        assert_eq!(namespace.get(Ident::new("scale")), Some(Value::Int(10)));
        assert_eq!(namespace.names(), vec![Ident::new("scale")]);
        assert_eq!(namespace.remove(Ident::new("scale")), Some(Value::Int(10)));
        assert!(namespace.is_empty());
    }
}
