//! Function units.
//!
//! Every callable value is a *unit*: a heap cell with a stable identity
//! ([`UnitId`]) whose contents can be patched in place. Patching never
//! changes identity, so every reference held by script code observes the
//! new behavior.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::heap::LiveToken;
use crate::runner::ds::table::TableRef;
use crate::runner::ds::value::Value;
use crate::runner::plugin::types::{ContinuationFn, NativeFn};
use crate::runner::vm::bytecode::Prototype;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub(crate) u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Native,
    Interpreted,
}

/// Body of a native unit.
#[derive(Clone)]
pub struct NativeClosure {
    pub f: NativeFn,
    pub continuation: Option<ContinuationFn>,
    pub debug_name: Rc<str>,
    pub upvalues: Vec<Value>,
}

impl NativeClosure {
    pub fn new(f: NativeFn, debug_name: &str) -> Self {
        NativeClosure {
            f,
            continuation: None,
            debug_name: Rc::from(debug_name),
            upvalues: Vec::new(),
        }
    }
}

impl fmt::Debug for NativeClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeClosure")
            .field("debug_name", &self.debug_name)
            .field("f", &(self.f as usize as *const ()))
            .field("nupvalues", &self.upvalues.len())
            .finish()
    }
}

/// Body of an interpreted unit. Upvalues are captured by value.
#[derive(Debug, Clone)]
pub struct InterpretedClosure {
    pub proto: Rc<Prototype>,
    pub upvalues: Vec<Value>,
}

#[derive(Debug, Clone)]
pub enum ClosureBody {
    Native(NativeClosure),
    Interpreted(InterpretedClosure),
}

/// The patchable contents of a unit.
#[derive(Debug, Clone)]
pub struct ClosureCell {
    body: ClosureBody,
    env: TableRef,
    /// Upvalue slots allocated when the unit was created. Patching may only
    /// install bodies whose upvalue count fits.
    capacity: usize,
}

impl ClosureCell {
    pub fn native(native: NativeClosure, env: TableRef) -> Self {
        let capacity = native.upvalues.len();
        ClosureCell {
            body: ClosureBody::Native(native),
            env,
            capacity,
        }
    }

    pub fn interpreted(closure: InterpretedClosure, env: TableRef) -> Self {
        let capacity = closure.upvalues.len();
        ClosureCell {
            body: ClosureBody::Interpreted(closure),
            env,
            capacity,
        }
    }

    /// Reserve upvalue slots beyond the current count.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(self.nupvalues());
        self
    }

    pub fn body(&self) -> &ClosureBody {
        &self.body
    }

    pub fn env(&self) -> &TableRef {
        &self.env
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn representation(&self) -> Representation {
        match self.body {
            ClosureBody::Native(_) => Representation::Native,
            ClosureBody::Interpreted(_) => Representation::Interpreted,
        }
    }

    pub fn upvalues(&self) -> &[Value] {
        match &self.body {
            ClosureBody::Native(n) => &n.upvalues,
            ClosureBody::Interpreted(c) => &c.upvalues,
        }
    }

    pub fn nupvalues(&self) -> usize {
        self.upvalues().len()
    }

    pub fn set_upvalue(&mut self, index: usize, value: Value) -> bool {
        let upvalues = match &mut self.body {
            ClosureBody::Native(n) => &mut n.upvalues,
            ClosureBody::Interpreted(c) => &mut c.upvalues,
        };
        match upvalues.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Copy with a capacity equal to the current upvalue count.
    pub fn duplicate(&self) -> ClosureCell {
        ClosureCell {
            body: self.body.clone(),
            env: self.env.clone(),
            capacity: self.nupvalues(),
        }
    }

    pub(crate) fn check_capacity(&self, function: &str, needed: usize) -> Result<(), RuntimeError> {
        if needed > self.capacity {
            return Err(RuntimeError::UpvalueCapacity {
                function: function.to_string(),
                needed,
                available: self.capacity,
            });
        }
        Ok(())
    }

    /// Install another native body. The target keeps its debug name.
    pub(crate) fn patch_native(&mut self, src: &NativeClosure, env: TableRef) -> Result<(), RuntimeError> {
        self.check_capacity("hookfunction", src.upvalues.len())?;
        match &mut self.body {
            ClosureBody::Native(dst) => {
                dst.f = src.f;
                dst.continuation = src.continuation;
                dst.upvalues = src.upvalues.clone();
            }
            ClosureBody::Interpreted(_) => {
                return Err(RuntimeError::UnsupportedCombination("hookfunction".to_string()))
            }
        }
        self.env = env;
        Ok(())
    }

    pub(crate) fn patch_interpreted(
        &mut self,
        src: &InterpretedClosure,
        env: TableRef,
    ) -> Result<(), RuntimeError> {
        self.check_capacity("hookfunction", src.upvalues.len())?;
        match &mut self.body {
            ClosureBody::Interpreted(dst) => {
                dst.proto = src.proto.clone();
                dst.upvalues = src.upvalues.clone();
            }
            ClosureBody::Native(_) => {
                return Err(RuntimeError::UnsupportedCombination("hookfunction".to_string()))
            }
        }
        self.env = env;
        Ok(())
    }

    /// Point a native unit's entry at the wrapper trampoline.
    pub(crate) fn repurpose_as_trampoline(
        &mut self,
        f: NativeFn,
        continuation: ContinuationFn,
    ) -> Result<(), RuntimeError> {
        match &mut self.body {
            ClosureBody::Native(dst) => {
                dst.f = f;
                dst.continuation = Some(continuation);
                Ok(())
            }
            ClosureBody::Interpreted(_) => {
                Err(RuntimeError::UnsupportedCombination("hookfunction".to_string()))
            }
        }
    }

    /// Put back every field captured in `backup`, debug name included.
    pub(crate) fn restore_from(&mut self, backup: &ClosureCell) -> Result<(), RuntimeError> {
        if backup.representation() != self.representation() {
            return Err(RuntimeError::InternalConsistency(
                "restorefunction: backup representation differs from the hooked unit".to_string(),
            ));
        }
        self.check_capacity("restorefunction", backup.nupvalues())?;
        self.body = backup.body.clone();
        self.env = backup.env.clone();
        Ok(())
    }
}

pub(crate) struct UnitBox {
    id: UnitId,
    cell: RefCell<ClosureCell>,
    _token: LiveToken,
}

/// Strong reference to a unit.
#[derive(Clone)]
pub struct FunctionRef(Rc<UnitBox>);

impl FunctionRef {
    pub(crate) fn from_parts(id: UnitId, cell: ClosureCell, token: LiveToken) -> Self {
        FunctionRef(Rc::new(UnitBox {
            id,
            cell: RefCell::new(cell),
            _token: token,
        }))
    }

    pub fn id(&self) -> UnitId {
        self.0.id
    }

    pub fn borrow(&self) -> Ref<'_, ClosureCell> {
        self.0.cell.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, ClosureCell> {
        self.0.cell.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &FunctionRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakFunctionRef {
        WeakFunctionRef {
            id: self.0.id,
            inner: Rc::downgrade(&self.0),
        }
    }

    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn representation(&self) -> Representation {
        self.borrow().representation()
    }

    pub fn is_native(&self) -> bool {
        self.representation() == Representation::Native
    }

    pub fn nupvalues(&self) -> usize {
        self.borrow().nupvalues()
    }

    pub fn capacity(&self) -> usize {
        self.borrow().capacity()
    }

    pub fn upvalues(&self) -> Vec<Value> {
        self.borrow().upvalues().to_vec()
    }

    pub fn env(&self) -> TableRef {
        self.borrow().env().clone()
    }

    pub fn native_fn(&self) -> Option<NativeFn> {
        match self.borrow().body() {
            ClosureBody::Native(n) => Some(n.f),
            ClosureBody::Interpreted(_) => None,
        }
    }

    pub fn proto(&self) -> Option<Rc<Prototype>> {
        match self.borrow().body() {
            ClosureBody::Native(_) => None,
            ClosureBody::Interpreted(c) => Some(c.proto.clone()),
        }
    }

    pub fn debug_name(&self) -> Option<String> {
        match self.borrow().body() {
            ClosureBody::Native(n) => Some(n.debug_name.to_string()),
            ClosureBody::Interpreted(c) => c.proto.debug_name.clone(),
        }
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef({}, {:?})", self.id(), self.representation())
    }
}

/// Non-owning reference to a unit. Side tables hold these; liveness is
/// provided by anchors.
#[derive(Clone)]
pub struct WeakFunctionRef {
    id: UnitId,
    inner: Weak<UnitBox>,
}

impl WeakFunctionRef {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn upgrade(&self) -> Option<FunctionRef> {
        self.inner.upgrade().map(FunctionRef)
    }

    pub fn strong_count(&self) -> usize {
        self.inner.strong_count()
    }
}

impl fmt::Debug for WeakFunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakFunctionRef({})", self.id)
    }
}
