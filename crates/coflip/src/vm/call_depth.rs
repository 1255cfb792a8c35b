//! Bounds how deeply frames may nest.
//!
//! Plain calls and generator or coroutine resumptions all run on the host stack,
//! so each one holds a [`CallDepth::enter`] guard for as long as it runs.
use std::{cell::Cell, rc::Rc};

use scopeguard::ScopeGuard;

use super::error::RuntimeError;

/// Default maximum number of nested frames.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 1024;

/// Shared depth counter; clones count against the same limit.
#[derive(Debug, Clone, Default)]
pub struct CallDepth {
    depth: Rc<Cell<u32>>,
}

impl CallDepth {
    /// Counts one more frame until the returned guard is dropped.
    pub fn enter(
        &self,
        max_depth: u32,
    ) -> Result<ScopeGuard<Rc<Cell<u32>>, impl FnOnce(Rc<Cell<u32>>)>, RuntimeError> {
        let current = self.depth.get();
        if current >= max_depth {
            return Err(RuntimeError::recursion(max_depth));
        }

        self.depth.set(current + 1);
        Ok(scopeguard::guard(Rc::clone(&self.depth), |depth| {
            depth.set(depth.get().saturating_sub(1))
        }))
    }

    #[inline]
    pub fn current(&self) -> u32 {
        self.depth.get()
    }
}
