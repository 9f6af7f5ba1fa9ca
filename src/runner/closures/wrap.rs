//! Minting wrappers and copies.

use std::rc::Rc;

use log::{debug, warn};

use crate::runner::api::Runtime;
use crate::runner::ds::closure::{ClosureCell, FunctionRef, NativeClosure};
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::table::Table;
use crate::runner::ds::value::Value;
use crate::runner::plugin::types::{native_fn_addr, NativeCall, NativeFn, NativeOutcome};
use crate::runner::vm::capability::Capability;
use crate::runner::vm::interpreter::CallOutcome;

pub const DEFAULT_WRAPPER_NAME: &str = "newcclosure";
pub const NEWLCLOSURE_SOURCE: &str = "return wrapped_func(...)";
pub const NEWLCLOSURE_CHUNK: &str = "=newlclosure";

/// True when `f` is the wrapper trampoline.
pub fn is_trampoline(f: NativeFn) -> bool {
    native_fn_addr(f) == native_fn_addr(dispatch_trampoline)
}

/// Return a native-representation unit that forwards to `src`.
///
/// Native units are returned unchanged. An interpreted unit that already
/// has a wrapper gets that wrapper back.
pub fn newcclosure(
    rt: &mut Runtime,
    src: &FunctionRef,
    debug_name: Option<&str>,
) -> Result<FunctionRef, RuntimeError> {
    if src.is_native() {
        return Ok(src.clone());
    }
    if let Some(existing) = rt.closures.find_wrapper_of(src.id()) {
        return Ok(existing);
    }
    let native = NativeClosure {
        f: dispatch_trampoline,
        continuation: Some(trampoline_continuation),
        debug_name: Rc::from(debug_name.unwrap_or(DEFAULT_WRAPPER_NAME)),
        upvalues: Vec::new(),
    };
    let wrapper = rt
        .heap
        .allocate(ClosureCell::native(native, src.env()), "newcclosure")?;
    rt.closures.set_wrap(&mut rt.refs, &wrapper, src)?;
    rt.library.record_identity(&wrapper);
    debug!("newcclosure {} wraps {}", wrapper.id(), src.id());
    Ok(wrapper)
}

/// Return an interpreted-representation unit that forwards to `src`.
///
/// Interpreted units are returned unchanged. Native units get a fresh forwarding
/// script whose environment proxies reads and writes to `src`'s
/// environment.
pub fn newlclosure(rt: &mut Runtime, src: &FunctionRef) -> Result<FunctionRef, RuntimeError> {
    if !src.is_native() {
        return Ok(src.clone());
    }
    let env = Table::with_proxy(src.env(), true);
    env.borrow_mut()
        .raw_set("wrapped_func", Value::Function(src.clone()));
    let proto = rt
        .compile(NEWLCLOSURE_SOURCE, NEWLCLOSURE_CHUNK)
        .map_err(|e| RuntimeError::Script(format!("Failed to create newlclosure: {}", e)))?;
    rt.assign_capability(&proto, Capability::MAX);
    let unit = rt.instantiate(proto, env).map_err(|e| match e {
        RuntimeError::AllocationFailure(_) => RuntimeError::AllocationFailure("newlclosure".to_string()),
        other => other,
    })?;
    debug!("newlclosure {} forwards to {}", unit.id(), src.id());
    Ok(unit)
}

/// Copy `src` into a new unit. A copy of a wrapper is itself a wrapper for
/// the same inner unit.
pub fn clonefunction(rt: &mut Runtime, src: &FunctionRef) -> Result<FunctionRef, RuntimeError> {
    let cell = src.borrow().duplicate();
    let clone = rt.heap.allocate(cell, "clonefunction")?;
    if let Some(inner) = rt.closures.wrapped_inner(src.id())? {
        rt.closures.set_wrap(&mut rt.refs, &clone, &inner)?;
    }
    Ok(clone)
}

/// Map the inner call's result onto what the wrapper returns.
fn forward_result(result: Result<CallOutcome, RuntimeError>) -> Result<NativeOutcome, RuntimeError> {
    match result {
        Ok(CallOutcome::Returned(values)) => Ok(NativeOutcome::Return(values)),
        Ok(CallOutcome::Yielded(values)) => Ok(NativeOutcome::Yield(values)),
        Err(e) if e.is_yield_across_boundary() => Ok(NativeOutcome::Yield(Vec::new())),
        Err(e) => Err(e),
    }
}

fn guarded_call(
    rt: &mut Runtime,
    wrapper: &FunctionRef,
    target: &FunctionRef,
    args: Vec<Value>,
) -> Result<CallOutcome, RuntimeError> {
    rt.closures.reentry.enter(wrapper.id());
    let result = rt.call_value(target, args);
    rt.closures.reentry.exit(wrapper.id());
    result
}

/// Entry point shared by every wrapper.
pub(crate) fn dispatch_trampoline(
    rt: &mut Runtime,
    call: &NativeCall,
    args: Vec<Value>,
) -> Result<NativeOutcome, RuntimeError> {
    let wrapper = &call.callee;
    if rt.closures.reentry.contains(wrapper.id()) {
        return match rt.closures.hook_backup(wrapper.id())? {
            Some(backup) => forward_result(guarded_call(rt, wrapper, &backup, args)),
            None => {
                warn!("re-entrant call to wrapper {} with no backup ignored", wrapper.id());
                Ok(NativeOutcome::Return(Vec::new()))
            }
        };
    }
    let inner = rt.closures.wrapped_inner(wrapper.id())?.ok_or_else(|| {
        RuntimeError::InternalConsistency(format!("wrapper {} has no wrapper table entry", wrapper.id()))
    })?;
    forward_result(guarded_call(rt, wrapper, &inner, args))
}

/// Runs when a context that suspended inside a wrapper is resumed.
pub(crate) fn trampoline_continuation(
    _rt: &mut Runtime,
    _call: &NativeCall,
    status: Result<Vec<Value>, RuntimeError>,
) -> Result<NativeOutcome, RuntimeError> {
    forward_result(status.map(CallOutcome::Returned))
}
