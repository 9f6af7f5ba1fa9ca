//! Strong anchors for units referenced from the closure side tables.
//!
//! The side tables only hold weak references. Any unit that appears in them
//! as a key or value is anchored here, at most once, so that the tables can
//! never dangle. Anchors are released when the unit leaves every table.

use std::collections::HashMap;

use crate::runner::ds::closure::{FunctionRef, UnitId};
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::ref_registry::{RefHandle, RefRegistry};
use crate::runner::ds::value::Value;

#[derive(Debug, Default)]
pub struct AnchorRegistry {
    handles: HashMap<UnitId, RefHandle>,
}

impl AnchorRegistry {
    pub fn new() -> Self {
        AnchorRegistry::default()
    }

    /// Anchor `unit` unless it already is. Returns true if a new anchor was taken.
    pub fn anchor(&mut self, unit: &FunctionRef, refs: &mut RefRegistry) -> bool {
        if self.handles.contains_key(&unit.id()) {
            return false;
        }
        let handle = refs.reference(Value::Function(unit.clone()));
        self.handles.insert(unit.id(), handle);
        true
    }

    /// Release the anchor for `id`, if any. Returns true if one was released.
    pub fn release(&mut self, id: UnitId, refs: &mut RefRegistry) -> Result<bool, RuntimeError> {
        match self.handles.remove(&id) {
            Some(handle) => {
                refs.unreference(handle)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_anchored(&self, id: UnitId) -> bool {
        self.handles.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn release_all(&mut self, refs: &mut RefRegistry) -> Result<usize, RuntimeError> {
        let mut released = 0;
        for (_, handle) in self.handles.drain() {
            refs.unreference(handle)?;
            released += 1;
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::api::Runtime;
    use crate::runner::ds::closure::{ClosureCell, NativeClosure};
    use crate::runner::ds::heap::{Heap, HeapConfig};
    use crate::runner::ds::table::Table;
    use crate::runner::plugin::types::{NativeCall, NativeOutcome};

    fn noop(_rt: &mut Runtime, _call: &NativeCall, _args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
        Ok(NativeOutcome::Return(vec![]))
    }

    fn unit(heap: &mut Heap) -> FunctionRef {
        let cell = ClosureCell::native(NativeClosure::new(noop, "noop"), Table::new_ref());
        heap.allocate(cell, "test").unwrap()
    }

    #[test]
    fn test_anchor_is_idempotent() {
        let mut heap = Heap::new(HeapConfig::unlimited());
        let mut refs = RefRegistry::new();
        let mut anchors = AnchorRegistry::new();
        let f = unit(&mut heap);

        assert!(anchors.anchor(&f, &mut refs));
        assert!(!anchors.anchor(&f, &mut refs));
        assert_eq!(anchors.len(), 1);
        assert_eq!(refs.live_count(), 1);
    }

    #[test]
    fn test_anchor_keeps_unit_alive() {
        let mut heap = Heap::new(HeapConfig::unlimited());
        let mut refs = RefRegistry::new();
        let mut anchors = AnchorRegistry::new();
        let f = unit(&mut heap);
        let id = f.id();
        let weak = f.downgrade();
        anchors.anchor(&f, &mut refs);
        drop(f);

        assert!(weak.upgrade().is_some());
        assert!(anchors.release(id, &mut refs).unwrap());
        assert!(weak.upgrade().is_none());
        assert_eq!(heap.live_units(), 0);
    }

    #[test]
    fn test_release_twice_is_noop() {
        let mut heap = Heap::new(HeapConfig::unlimited());
        let mut refs = RefRegistry::new();
        let mut anchors = AnchorRegistry::new();
        let f = unit(&mut heap);
        anchors.anchor(&f, &mut refs);

        assert!(anchors.release(f.id(), &mut refs).unwrap());
        assert!(!anchors.release(f.id(), &mut refs).unwrap());
        assert!(anchors.is_empty());
        assert_eq!(refs.live_count(), 0);
    }

    #[test]
    fn test_release_all() {
        let mut heap = Heap::new(HeapConfig::unlimited());
        let mut refs = RefRegistry::new();
        let mut anchors = AnchorRegistry::new();
        for _ in 0..3 {
            let f = unit(&mut heap);
            anchors.anchor(&f, &mut refs);
        }
        assert_eq!(heap.live_units(), 3);
        assert_eq!(anchors.release_all(&mut refs).unwrap(), 3);
        assert_eq!(heap.live_units(), 0);
        assert_eq!(refs.live_count(), 0);
    }
}
