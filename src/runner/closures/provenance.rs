//! Is the running code, or a given unit, tool code?

use std::rc::Rc;

use super::classify::{classify, ClosureKind};
use crate::runner::api::Runtime;
use crate::runner::ds::closure::{ClosureBody, FunctionRef};
use crate::runner::ds::execution_context::CallFrame;
use crate::runner::vm::capability::Capability;

fn is_wrapped(rt: &Runtime, unit: &FunctionRef) -> bool {
    classify(&rt.closures, unit) == ClosureKind::Wrapped
}

fn tool_frame(rt: &Runtime, frame: &CallFrame) -> bool {
    let unit = frame.function();
    if is_wrapped(rt, unit) {
        return true;
    }
    match frame {
        // The prototype the frame entered with, not whatever is patched in now.
        CallFrame::Script(script) => rt.config.is_reserved_source(&script.proto.source),
        CallFrame::Native(_) => match unit.native_fn() {
            Some(f) => rt.library.is_registered(unit.id(), f),
            None => false,
        },
    }
}

/// True when the running context belongs to the tool, or when a tool frame
/// appears among the callers of the running native.
///
/// Contexts that were never bound to a host script count as tool contexts,
/// as do bound contexts whose script has since been destroyed.
pub fn checkcaller(rt: &Runtime) -> bool {
    let ctx = rt.ctx();
    if ctx.id == rt.tool_context() || Rc::ptr_eq(&ctx.globals, &rt.tool_globals()) {
        return true;
    }
    if ctx.capability == Capability::MAX || ctx.script_expired() {
        return true;
    }
    // Level 0 is the native asking.
    let first = match ctx.frames.last() {
        Some(CallFrame::Native(_)) => 1,
        _ => 0,
    };
    let depth = rt.config.caller_walk_depth;
    (first..first + depth)
        .map_while(|level| ctx.frame_at_level(level))
        .any(|frame| tool_frame(rt, frame))
}

/// True when `unit` was produced by or belongs to the tool.
pub fn isexecutorclosure(rt: &Runtime, unit: &FunctionRef) -> bool {
    if is_wrapped(rt, unit) {
        return true;
    }
    let cell = unit.borrow();
    match cell.body() {
        ClosureBody::Native(n) => rt.library.is_registered(unit.id(), n.f),
        ClosureBody::Interpreted(c) => {
            rt.config.is_reserved_source(&c.proto.source)
                || Rc::ptr_eq(cell.env(), &rt.tool_globals())
        }
    }
}
