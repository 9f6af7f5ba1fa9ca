//! Registry of natively-implemented library functions.
//!
//! Membership is tracked two ways: by unit identity, and by native entry
//! address. The address set lets a unit that was patched to run a
//! registered entry still be recognised as library code.

use std::collections::{BTreeMap, HashSet};

use log::debug;

use super::types::{native_fn_addr, NativeFn};
use crate::runner::ds::closure::{FunctionRef, UnitId, WeakFunctionRef};

/// One registered name.
#[derive(Debug, Clone)]
pub struct RegisteredFunction {
    pub name: String,
    pub unit: WeakFunctionRef,
}

#[derive(Debug, Default)]
pub struct LibraryRegistry {
    identities: HashSet<UnitId>,
    entry_points: HashSet<usize>,
    functions: BTreeMap<String, RegisteredFunction>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        LibraryRegistry::default()
    }

    /// Record a named library function.
    pub fn record(&mut self, name: &str, unit: &FunctionRef, f: NativeFn) {
        debug!("registering library function {} as {}", name, unit.id());
        self.identities.insert(unit.id());
        self.entry_points.insert(native_fn_addr(f));
        self.functions.insert(
            name.to_string(),
            RegisteredFunction {
                name: name.to_string(),
                unit: unit.downgrade(),
            },
        );
    }

    /// Record an anonymous identity, e.g. a freshly minted wrapper.
    pub fn record_identity(&mut self, unit: &FunctionRef) {
        self.identities.insert(unit.id());
    }

    /// Drop an identity recorded for a unit that has been freed.
    pub fn forget_identity(&mut self, id: UnitId) -> bool {
        self.identities.remove(&id)
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn is_registered(&self, id: UnitId, f: NativeFn) -> bool {
        self.identities.contains(&id) || self.entry_points.contains(&native_fn_addr(f))
    }

    pub fn lookup(&self, name: &str) -> Option<FunctionRef> {
        self.functions.get(name).and_then(|r| r.unit.upgrade())
    }

    pub fn name_of(&self, id: UnitId) -> Option<&str> {
        self.functions
            .values()
            .find(|r| r.unit.id() == id)
            .map(|r| r.name.as_str())
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::api::Runtime;
    use crate::runner::ds::closure::{ClosureCell, NativeClosure};
    use crate::runner::ds::error::RuntimeError;
    use crate::runner::ds::heap::{Heap, HeapConfig};
    use crate::runner::ds::table::Table;
    use crate::runner::ds::value::Value;
    use crate::runner::plugin::types::{NativeCall, NativeOutcome};

    fn first(_rt: &mut Runtime, _call: &NativeCall, _args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
        Ok(NativeOutcome::Return(vec![Value::Number(1.0)]))
    }

    fn second(_rt: &mut Runtime, _call: &NativeCall, _args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
        Ok(NativeOutcome::Return(vec![Value::Number(2.0)]))
    }

    fn unit(heap: &mut Heap, f: NativeFn) -> FunctionRef {
        let cell = ClosureCell::native(NativeClosure::new(f, "test"), Table::new_ref());
        heap.allocate(cell, "test").unwrap()
    }

    #[test]
    fn test_membership_by_identity_or_entry() {
        let mut heap = Heap::new(HeapConfig::unlimited());
        let mut registry = LibraryRegistry::new();
        let registered = unit(&mut heap, first);
        registry.record("first", &registered, first);

        let same_entry = unit(&mut heap, first);
        let other = unit(&mut heap, second);
        assert!(registry.is_registered(registered.id(), first));
        assert!(registry.is_registered(same_entry.id(), first));
        assert!(!registry.is_registered(other.id(), second));

        registry.record_identity(&other);
        assert!(registry.is_registered(other.id(), second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_forget_identity() {
        let mut heap = Heap::new(HeapConfig::unlimited());
        let mut registry = LibraryRegistry::new();
        let wrapper = unit(&mut heap, second);
        registry.record_identity(&wrapper);
        assert_eq!(registry.identity_count(), 1);

        assert!(registry.forget_identity(wrapper.id()));
        assert!(!registry.forget_identity(wrapper.id()));
        assert!(!registry.is_registered(wrapper.id(), second));
        assert_eq!(registry.identity_count(), 0);
    }

    #[test]
    fn test_lookup_and_name() {
        let mut heap = Heap::new(HeapConfig::unlimited());
        let mut registry = LibraryRegistry::new();
        let f = unit(&mut heap, first);
        registry.record("first", &f, first);

        assert!(registry.lookup("first").unwrap().ptr_eq(&f));
        assert!(registry.lookup("missing").is_none());
        assert_eq!(registry.name_of(f.id()), Some("first"));

        drop(f);
        assert!(registry.lookup("first").is_none());
    }
}
