use std::rc::{Rc, Weak};

use uuid::Uuid;

use crate::runner::ds::closure::FunctionRef;
use crate::runner::ds::table::TableRef;
use crate::runner::ds::value::Value;
use crate::runner::plugin::types::{ContinuationFn, NativeCall};
use crate::runner::vm::bytecode::{Prototype, ResultMode};
use crate::runner::vm::capability::Capability;

/// Index of an execution context inside its runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) usize);

/// A host-side script object an execution context is bound to.
#[derive(Debug)]
pub struct HostScript {
    pub name: String,
}

impl HostScript {
    pub fn new(name: &str) -> Rc<HostScript> {
        Rc::new(HostScript {
            name: name.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    Ready,
    Running,
    Suspended,
    Dead,
}

impl ContextStatus {
    pub fn name(self) -> &'static str {
        match self {
            ContextStatus::Ready => "ready",
            ContextStatus::Running => "running",
            ContextStatus::Suspended => "suspended",
            ContextStatus::Dead => "dead",
        }
    }
}

/// A value-stack slot. Multi-value results stay grouped until consumed by
/// a call or return that expands them.
#[derive(Debug, Clone)]
pub enum Slot {
    One(Value),
    Many(Vec<Value>),
}

pub struct ScriptFrame {
    pub function: FunctionRef,
    /// The prototype that was installed when the frame was entered.
    pub proto: Rc<Prototype>,
    pub upvalues: Vec<Value>,
    pub env: TableRef,
    pub ip: usize,
    pub locals: Vec<Value>,
    pub stack: Vec<Slot>,
    pub varargs: Vec<Value>,
    pub result_mode: ResultMode,
}

pub struct NativeFrame {
    pub function: FunctionRef,
}

pub enum CallFrame {
    Script(ScriptFrame),
    Native(NativeFrame),
}

impl CallFrame {
    pub fn function(&self) -> &FunctionRef {
        match self {
            CallFrame::Script(f) => &f.function,
            CallFrame::Native(f) => &f.function,
        }
    }
}

/// A native call that suspended its context and is waiting to be resumed.
pub struct PendingContinuation {
    pub call: NativeCall,
    pub continuation: Option<ContinuationFn>,
    pub result_mode: ResultMode,
}

pub struct ExecutionContext {
    pub id: ContextId,
    pub uuid: Uuid,
    pub globals: TableRef,
    pub capability: Capability,
    /// `None` for the tool context; a dead weak pointer means the host
    /// script has been destroyed.
    pub script: Option<Weak<HostScript>>,
    pub frames: Vec<CallFrame>,
    /// Nesting depth of native-to-script re-entries.
    pub native_depth: usize,
    pub status: ContextStatus,
    pub pending: Option<PendingContinuation>,
}

impl ExecutionContext {
    pub fn new(id: ContextId, globals: TableRef, capability: Capability) -> Self {
        ExecutionContext {
            id,
            uuid: Uuid::new_v4(),
            globals,
            capability,
            script: None,
            frames: Vec::new(),
            native_depth: 0,
            status: ContextStatus::Ready,
            pending: None,
        }
    }

    pub fn bound_to(mut self, script: &Rc<HostScript>) -> Self {
        self.script = Some(Rc::downgrade(script));
        self
    }

    /// True when the context was bound to a host script that no longer exists.
    pub fn script_expired(&self) -> bool {
        match &self.script {
            Some(weak) => weak.upgrade().is_none(),
            None => false,
        }
    }

    /// Frames from innermost (level 0) outwards.
    pub fn frame_at_level(&self, level: usize) -> Option<&CallFrame> {
        let len = self.frames.len();
        if level < len {
            self.frames.get(len - 1 - level)
        } else {
            None
        }
    }
}
