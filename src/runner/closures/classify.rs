use std::fmt;

use super::wrap::is_trampoline;
use super::ClosureEngine;
use crate::runner::ds::closure::FunctionRef;

/// Hooking-relevant kind of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureKind {
    /// Native unit that is not a wrapper.
    Native,
    Interpreted,
    /// A unit recorded in the wrapper table.
    Wrapped,
}

impl fmt::Display for ClosureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClosureKind::Native => "native",
            ClosureKind::Interpreted => "interpreted",
            ClosureKind::Wrapped => "wrapped",
        };
        write!(f, "{}", name)
    }
}

/// A unit is wrapped when it runs the trampoline and has a wrapper table entry.
pub fn classify(engine: &ClosureEngine, unit: &FunctionRef) -> ClosureKind {
    match unit.native_fn() {
        None => ClosureKind::Interpreted,
        Some(f) if is_trampoline(f) && engine.is_wrapper(unit.id()) => ClosureKind::Wrapped,
        Some(_) => ClosureKind::Native,
    }
}
