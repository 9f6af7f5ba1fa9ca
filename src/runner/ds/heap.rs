//! Unit allocation for the runtime.
//!
//! This module hands out function units with fresh identities and tracks how
//! many are alive, with an optional limit.

use std::cell::Cell;
use std::rc::Rc;

use crate::runner::ds::closure::{ClosureCell, FunctionRef, UnitId};
use crate::runner::ds::error::RuntimeError;

/// Configuration for the heap manager.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Maximum number of live units. None means unlimited.
    pub max_units: Option<usize>,
}

impl HeapConfig {
    /// Create a new heap configuration with no unit limit.
    pub fn unlimited() -> Self {
        HeapConfig { max_units: None }
    }

    /// Create a new heap configuration with a unit limit.
    pub fn with_limit(max_units: usize) -> Self {
        HeapConfig {
            max_units: Some(max_units),
        }
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Held by every unit; decrements the live count when the unit is freed.
pub(crate) struct LiveToken(Rc<Cell<usize>>);

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Heap manager for function units.
#[derive(Debug)]
pub struct Heap {
    config: HeapConfig,
    next_id: u64,
    live: Rc<Cell<usize>>,
    total_allocations: u64,
}

impl Heap {
    /// Create a new heap with the given configuration.
    pub fn new(config: HeapConfig) -> Self {
        Heap {
            config,
            next_id: 1,
            live: Rc::new(Cell::new(0)),
            total_allocations: 0,
        }
    }

    /// Allocate a unit holding `cell`.
    ///
    /// `what` names the operation for the error if the limit is reached.
    pub fn allocate(&mut self, cell: ClosureCell, what: &str) -> Result<FunctionRef, RuntimeError> {
        if !self.can_allocate() {
            return Err(RuntimeError::AllocationFailure(what.to_string()));
        }
        let id = UnitId(self.next_id);
        self.next_id += 1;
        self.total_allocations += 1;
        self.live.set(self.live.get() + 1);
        Ok(FunctionRef::from_parts(id, cell, LiveToken(self.live.clone())))
    }

    /// Change the unit limit. Units already alive are unaffected.
    pub fn set_limit(&mut self, max_units: Option<usize>) {
        self.config.max_units = max_units;
    }

    /// Number of units currently alive.
    pub fn live_units(&self) -> usize {
        self.live.get()
    }

    pub fn total_allocations(&self) -> u64 {
        self.total_allocations
    }

    pub fn can_allocate(&self) -> bool {
        match self.config.max_units {
            Some(max) => self.live.get() < max,
            None => true,
        }
    }

    /// Get the remaining unit budget, if limited.
    pub fn available_units(&self) -> Option<usize> {
        self.config
            .max_units
            .map(|max| max.saturating_sub(self.live.get()))
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ds::closure::NativeClosure;
    use crate::runner::ds::table::Table;
    use crate::runner::plugin::types::{NativeCall, NativeOutcome};
    use crate::runner::api::Runtime;
    use crate::runner::ds::value::Value;

    fn noop(
        _rt: &mut Runtime,
        _call: &NativeCall,
        _args: Vec<Value>,
    ) -> Result<NativeOutcome, RuntimeError> {
        Ok(NativeOutcome::Return(vec![]))
    }

    fn cell() -> ClosureCell {
        ClosureCell::native(NativeClosure::new(noop, "noop"), Table::new_ref())
    }

    #[test]
    fn test_heap_unlimited() {
        let mut heap = Heap::new(HeapConfig::unlimited());
        let a = heap.allocate(cell(), "test").unwrap();
        let b = heap.allocate(cell(), "test").unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(heap.live_units(), 2);
        assert_eq!(heap.available_units(), None);
    }

    #[test]
    fn test_heap_limited() {
        let mut heap = Heap::new(HeapConfig::with_limit(2));
        let _a = heap.allocate(cell(), "test").unwrap();
        let _b = heap.allocate(cell(), "test").unwrap();

        let result = heap.allocate(cell(), "clonefunction");
        match result {
            Err(RuntimeError::AllocationFailure(what)) => assert_eq!(what, "clonefunction"),
            other => panic!("expected allocation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_heap_frees_on_drop() {
        let mut heap = Heap::new(HeapConfig::with_limit(1));
        let a = heap.allocate(cell(), "test").unwrap();
        assert!(!heap.can_allocate());
        drop(a);
        assert_eq!(heap.live_units(), 0);
        assert!(heap.allocate(cell(), "test").is_ok());
        assert_eq!(heap.total_allocations(), 2);
    }

    #[test]
    fn test_heap_available_units() {
        let mut heap = Heap::new(HeapConfig::with_limit(3));
        assert_eq!(heap.available_units(), Some(3));
        let _a = heap.allocate(cell(), "test").unwrap();
        assert_eq!(heap.available_units(), Some(2));
    }
}
