//! Closure wrapping, hooking and provenance.
//!
//! The engine keeps two side tables keyed by unit identity:
//!
//! - the **wrapper table** maps a wrapper unit to the unit it forwards to;
//! - the **hook table** maps a hooked unit to the backup that preserves its
//!   pre-hook behavior.
//!
//! Both tables hold weak references. Every unit that appears in either
//! table, as key or value, is anchored in the [`AnchorRegistry`] so entries
//! never dangle. An anchor is dropped as soon as its unit leaves both
//! tables, or when the runtime sweeps entries whose keys are otherwise
//! unreachable.
//!
//! The operations live in submodules and take the [`Runtime`](crate::runner::api::Runtime):
//!
//! - [`wrap`]: `newcclosure`, `newlclosure`, `clonefunction` and the wrapper trampoline
//! - [`hook`]: `hookfunction`, `restorefunction`
//! - [`provenance`]: `checkcaller`, `isexecutorclosure`

pub mod anchor;
pub mod classify;
pub mod hook;
pub mod provenance;
pub mod wrap;

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::runner::ds::closure::{FunctionRef, UnitId, WeakFunctionRef};
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::ref_registry::RefRegistry;

pub use anchor::AnchorRegistry;
pub use classify::{classify, ClosureKind};
pub use hook::{hookfunction, restorefunction};
pub use provenance::{checkcaller, isexecutorclosure};
pub use wrap::{clonefunction, newcclosure, newlclosure};

#[derive(Debug, Clone)]
struct WrapEntry {
    wrapper: WeakFunctionRef,
    inner: WeakFunctionRef,
}

#[derive(Debug, Clone)]
struct HookRecord {
    original: WeakFunctionRef,
    backup: WeakFunctionRef,
}

/// What a sweep or teardown gave back.
#[derive(Debug, Default)]
pub struct Reclaimed {
    /// Table entries removed by a sweep, or anchors released by a teardown.
    pub count: usize,
    /// Wrappers that were freed along the way.
    pub dead_wrappers: Vec<UnitId>,
}

/// Wrappers whose trampoline is currently on the native stack.
#[derive(Debug, Default)]
pub struct ReentryGuard {
    active: Vec<UnitId>,
}

impl ReentryGuard {
    pub fn contains(&self, id: UnitId) -> bool {
        self.active.contains(&id)
    }

    pub fn enter(&mut self, id: UnitId) {
        self.active.push(id);
    }

    pub fn exit(&mut self, id: UnitId) {
        if let Some(pos) = self.active.iter().rposition(|active| *active == id) {
            self.active.remove(pos);
        }
    }

    pub fn depth(&self) -> usize {
        self.active.len()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

#[derive(Debug, Default)]
pub struct ClosureEngine {
    wraps: HashMap<UnitId, WrapEntry>,
    hooks: HashMap<UnitId, HookRecord>,
    anchors: AnchorRegistry,
    pub(crate) reentry: ReentryGuard,
}

impl ClosureEngine {
    pub fn new() -> Self {
        ClosureEngine::default()
    }

    pub fn anchors(&self) -> &AnchorRegistry {
        &self.anchors
    }

    pub fn wrap_count(&self) -> usize {
        self.wraps.len()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_wrapper(&self, id: UnitId) -> bool {
        self.wraps.contains_key(&id)
    }

    pub fn is_hooked(&self, id: UnitId) -> bool {
        self.hooks.contains_key(&id)
    }

    /// The unit a wrapper forwards to. `Ok(None)` when `id` is not a wrapper.
    pub fn wrapped_inner(&self, id: UnitId) -> Result<Option<FunctionRef>, RuntimeError> {
        match self.wraps.get(&id) {
            None => Ok(None),
            Some(entry) => entry.inner.upgrade().map(Some).ok_or_else(|| {
                RuntimeError::InternalConsistency(format!(
                    "wrapper {} forwards to a freed unit {}",
                    id,
                    entry.inner.id()
                ))
            }),
        }
    }

    /// The oldest live wrapper forwarding to `inner`. Hooked units that
    /// were turned into wrappers do not count, since a restore turns them
    /// back.
    pub fn find_wrapper_of(&self, inner: UnitId) -> Option<FunctionRef> {
        self.wraps
            .iter()
            .filter(|(id, entry)| entry.inner.id() == inner && !self.hooks.contains_key(id))
            .filter_map(|(_, entry)| entry.wrapper.upgrade())
            .min_by_key(|wrapper| wrapper.id())
    }

    /// True when following wrapper entries from `from` reaches `target`.
    pub fn forwards_to(&self, from: UnitId, target: UnitId) -> bool {
        let mut seen = HashSet::new();
        let mut current = from;
        loop {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                return false;
            }
            match self.wraps.get(&current) {
                Some(entry) => current = entry.inner.id(),
                None => return false,
            }
        }
    }

    /// Map `wrapper` to `inner`, anchoring both.
    pub(crate) fn set_wrap(
        &mut self,
        refs: &mut RefRegistry,
        wrapper: &FunctionRef,
        inner: &FunctionRef,
    ) -> Result<(), RuntimeError> {
        let previous = self.wraps.insert(
            wrapper.id(),
            WrapEntry {
                wrapper: wrapper.downgrade(),
                inner: inner.downgrade(),
            },
        );
        self.anchors.anchor(wrapper, refs);
        self.anchors.anchor(inner, refs);
        if let Some(previous) = previous {
            if previous.inner.id() != inner.id() {
                self.release_if_unreferenced(refs, previous.inner.id())?;
            }
        }
        debug!("wrapper {} -> {}", wrapper.id(), inner.id());
        Ok(())
    }

    pub(crate) fn remove_wrap(&mut self, refs: &mut RefRegistry, id: UnitId) -> Result<(), RuntimeError> {
        if let Some(entry) = self.wraps.remove(&id) {
            self.release_if_unreferenced(refs, id)?;
            self.release_if_unreferenced(refs, entry.inner.id())?;
        }
        Ok(())
    }

    pub fn hook_backup(&self, id: UnitId) -> Result<Option<FunctionRef>, RuntimeError> {
        match self.hooks.get(&id) {
            None => Ok(None),
            Some(record) => record.backup.upgrade().map(Some).ok_or_else(|| {
                RuntimeError::InternalConsistency(format!("backup of {} was freed", id))
            }),
        }
    }

    pub(crate) fn insert_hook(&mut self, refs: &mut RefRegistry, original: &FunctionRef, backup: &FunctionRef) {
        self.hooks.insert(
            original.id(),
            HookRecord {
                original: original.downgrade(),
                backup: backup.downgrade(),
            },
        );
        self.anchors.anchor(original, refs);
        self.anchors.anchor(backup, refs);
    }

    pub(crate) fn remove_hook(&mut self, refs: &mut RefRegistry, id: UnitId) -> Result<(), RuntimeError> {
        if let Some(record) = self.hooks.remove(&id) {
            self.release_if_unreferenced(refs, record.original.id())?;
            self.release_if_unreferenced(refs, record.backup.id())?;
        }
        Ok(())
    }

    /// True while `id` is a key or value in either table.
    pub fn is_referenced(&self, id: UnitId) -> bool {
        self.wraps.contains_key(&id) || self.hooks.contains_key(&id) || self.is_table_value(id)
    }

    fn is_table_value(&self, id: UnitId) -> bool {
        self.wraps.values().any(|e| e.inner.id() == id)
            || self.hooks.values().any(|r| r.backup.id() == id)
    }

    fn release_if_unreferenced(&mut self, refs: &mut RefRegistry, id: UnitId) -> Result<(), RuntimeError> {
        if !self.is_referenced(id) && self.anchors.release(id, refs)? {
            debug!("released anchor for {}", id);
        }
        Ok(())
    }

    /// A key is collectable when nothing but its own anchor keeps it alive
    /// and no other entry points at it.
    fn collectable(&self, id: UnitId, key: &WeakFunctionRef) -> bool {
        let strong = key.strong_count();
        let only_anchor = strong == 0 || (strong == 1 && self.anchors.is_anchored(id));
        only_anchor && !self.is_table_value(id)
    }

    pub(crate) fn sweep(&mut self, refs: &mut RefRegistry) -> Result<Reclaimed, RuntimeError> {
        let mut reclaimed = Reclaimed::default();
        loop {
            let wrap_victims: Vec<(UnitId, WeakFunctionRef)> = self
                .wraps
                .iter()
                .filter(|(id, entry)| self.collectable(**id, &entry.wrapper))
                .map(|(id, entry)| (*id, entry.wrapper.clone()))
                .collect();
            let hook_victims: Vec<UnitId> = self
                .hooks
                .iter()
                .filter(|(id, record)| self.collectable(**id, &record.original))
                .map(|(id, _)| *id)
                .collect();
            if wrap_victims.is_empty() && hook_victims.is_empty() {
                break;
            }
            for id in hook_victims {
                self.remove_hook(refs, id)?;
                reclaimed.count += 1;
            }
            for (id, wrapper) in wrap_victims {
                self.remove_wrap(refs, id)?;
                reclaimed.count += 1;
                if wrapper.strong_count() == 0 {
                    reclaimed.dead_wrappers.push(id);
                }
            }
        }
        Ok(reclaimed)
    }

    pub(crate) fn teardown(&mut self, refs: &mut RefRegistry) -> Result<Reclaimed, RuntimeError> {
        let wrappers: Vec<WeakFunctionRef> = self.wraps.values().map(|e| e.wrapper.clone()).collect();
        self.wraps.clear();
        self.hooks.clear();
        self.reentry.clear();
        let count = self.anchors.release_all(refs)?;
        let dead_wrappers = wrappers
            .iter()
            .filter(|w| w.strong_count() == 0)
            .map(|w| w.id())
            .collect();
        Ok(Reclaimed { count, dead_wrappers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reentry_guard_is_a_stack() {
        let mut guard = ReentryGuard::default();
        let (a, b) = (UnitId(1), UnitId(2));
        guard.enter(a);
        guard.enter(b);
        guard.enter(a);
        assert_eq!(guard.depth(), 3);

        guard.exit(a);
        assert!(guard.contains(a));
        guard.exit(a);
        assert!(!guard.contains(a));
        assert!(guard.contains(b));
    }

    #[test]
    fn test_reentry_guard_exit_unknown() {
        let mut guard = ReentryGuard::default();
        guard.exit(UnitId(7));
        assert_eq!(guard.depth(), 0);
    }

    #[test]
    fn test_empty_engine() {
        let engine = ClosureEngine::new();
        assert_eq!(engine.wrap_count(), 0);
        assert_eq!(engine.hook_count(), 0);
        assert!(engine.wrapped_inner(UnitId(1)).unwrap().is_none());
        assert!(engine.hook_backup(UnitId(1)).unwrap().is_none());
        assert!(engine.find_wrapper_of(UnitId(1)).is_none());
    }
}
