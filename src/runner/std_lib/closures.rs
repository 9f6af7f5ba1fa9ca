//! Closure library: wrapping, hooking, provenance and loading.

use std::collections::HashSet;
use std::rc::Rc;

use crate::runner::api::Runtime;
use crate::runner::closures::{self, classify, ClosureKind};
use crate::runner::ds::closure::{ClosureBody, FunctionRef};
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::value::Value;
use crate::runner::plugin::types::{
    check_function, check_string, native_fn_addr, opt_string, NativeCall, NativeOutcome,
};
use crate::runner::vm::capability::Capability;

pub fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    rt.register("newcclosure", closure_newcclosure)?;
    rt.register("newlclosure", closure_newlclosure)?;
    rt.register("clonefunction", closure_clonefunction)?;
    rt.register_aliases(&["hookfunction", "hookfunc", "replaceclosure"], closure_hookfunction)?;
    rt.register("restorefunction", closure_restorefunction)?;
    rt.register("checkcaller", closure_checkcaller)?;
    rt.register_aliases(
        &["isexecutorclosure", "isourclosure", "checkclosure"],
        closure_isexecutorclosure,
    )?;
    rt.register("iscclosure", closure_iscclosure)?;
    rt.register("islclosure", closure_islclosure)?;
    rt.register("isnewcclosure", closure_isnewcclosure)?;
    rt.register("loadstring", closure_loadstring)?;
    rt.register_aliases(
        &["comparefunctions", "comparefunction", "comparefuncs"],
        closure_comparefunctions,
    )?;
    Ok(())
}

fn returning(value: Value) -> Result<NativeOutcome, RuntimeError> {
    Ok(NativeOutcome::Return(vec![value]))
}

fn closure_newcclosure(rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let src = check_function(&args, 0, "newcclosure")?;
    let name = opt_string(&args, 1, "newcclosure")?;
    let wrapper = closures::newcclosure(rt, &src, name.as_deref())?;
    returning(Value::Function(wrapper))
}

fn closure_newlclosure(rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let src = check_function(&args, 0, "newlclosure")?;
    returning(Value::Function(closures::newlclosure(rt, &src)?))
}

fn closure_clonefunction(rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let src = check_function(&args, 0, "clonefunction")?;
    returning(Value::Function(closures::clonefunction(rt, &src)?))
}

fn closure_hookfunction(rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let original = check_function(&args, 0, "hookfunction")?;
    let hook = check_function(&args, 1, "hookfunction")?;
    returning(Value::Function(closures::hookfunction(rt, &original, &hook)?))
}

fn closure_restorefunction(rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let original = check_function(&args, 0, "restorefunction")?;
    returning(Value::Boolean(closures::restorefunction(rt, &original)?))
}

fn closure_checkcaller(rt: &mut Runtime, _call: &NativeCall, _args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    returning(Value::Boolean(closures::checkcaller(rt)))
}

fn closure_isexecutorclosure(rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let unit = check_function(&args, 0, "isexecutorclosure")?;
    returning(Value::Boolean(closures::isexecutorclosure(rt, &unit)))
}

fn closure_iscclosure(_rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let unit = check_function(&args, 0, "iscclosure")?;
    returning(Value::Boolean(unit.is_native()))
}

fn closure_islclosure(_rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let unit = check_function(&args, 0, "islclosure")?;
    returning(Value::Boolean(!unit.is_native()))
}

fn closure_isnewcclosure(rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let unit = check_function(&args, 0, "isnewcclosure")?;
    returning(Value::Boolean(classify(rt.closures(), &unit) == ClosureKind::Wrapped))
}

/// Compile a chunk into a tool unit. Compile errors are returned as
/// `nil, message` instead of being raised.
fn closure_loadstring(rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let source = check_string(&args, 0, "loadstring")?;
    let chunk_name = match opt_string(&args, 1, "loadstring")? {
        Some(name) => name,
        None => rt.config().loadstring_chunk_name.clone(),
    };
    let proto = match rt.compile(&source, &chunk_name) {
        Ok(proto) => proto,
        Err(e) => return Ok(NativeOutcome::Return(vec![Value::Nil, Value::from(e.to_string())])),
    };
    rt.assign_capability(&proto, Capability::MAX);
    let env = rt.tool_globals();
    returning(Value::Function(rt.instantiate(proto, env)?))
}

/// Same identity, or the same behavior: same entry point or prototype and
/// equal upvalues. Two wrappers match when they forward to the same unit.
/// Wrapper chains that loop back on themselves never match.
pub fn same_behavior(rt: &Runtime, a: &FunctionRef, b: &FunctionRef) -> Result<bool, RuntimeError> {
    let engine = rt.closures();
    let (mut a, mut b) = (a.clone(), b.clone());
    let mut visited = HashSet::new();
    loop {
        if a.ptr_eq(&b) {
            return Ok(true);
        }
        if classify(engine, &a) != ClosureKind::Wrapped || classify(engine, &b) != ClosureKind::Wrapped {
            break;
        }
        if !visited.insert((a.id(), b.id())) {
            return Ok(false);
        }
        match (engine.wrapped_inner(a.id())?, engine.wrapped_inner(b.id())?) {
            (Some(x), Some(y)) => {
                a = x;
                b = y;
            }
            _ => return Ok(false),
        }
    }
    let (x, y) = (a.borrow(), b.borrow());
    let same_code = match (x.body(), y.body()) {
        (ClosureBody::Native(p), ClosureBody::Native(q)) => native_fn_addr(p.f) == native_fn_addr(q.f),
        (ClosureBody::Interpreted(p), ClosureBody::Interpreted(q)) => Rc::ptr_eq(&p.proto, &q.proto),
        _ => false,
    };
    let same = same_code && x.upvalues() == y.upvalues();
    Ok(same)
}

fn closure_comparefunctions(rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let a = check_function(&args, 0, "comparefunctions")?;
    let b = check_function(&args, 1, "comparefunctions")?;
    returning(Value::Boolean(same_behavior(rt, &a, &b)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapper(rt: &mut Runtime, source: &str) -> FunctionRef {
        let values = rt.exec(source).unwrap();
        let inner = values[0].as_function().unwrap().clone();
        closures::newcclosure(rt, &inner, None).unwrap()
    }

    #[test]
    fn test_same_behavior_wrappers_by_inner() {
        let mut rt = Runtime::new();
        let w = wrapper(&mut rt, "return function() return 1 end");
        let inner = rt.closures.wrapped_inner(w.id()).unwrap().unwrap();
        let copy = closures::clonefunction(&mut rt, &w).unwrap();
        let other = wrapper(&mut rt, "return function() return 1 end");
        assert!(same_behavior(&rt, &w, &copy).unwrap());
        assert!(!same_behavior(&rt, &w, &other).unwrap());
        assert!(!same_behavior(&rt, &w, &inner).unwrap());
    }

    #[test]
    fn test_same_behavior_stops_on_self_loops() {
        let mut rt = Runtime::new();
        let n = wrapper(&mut rt, "return function() return 1 end");
        let m = wrapper(&mut rt, "return function() return 2 end");
        rt.closures.set_wrap(&mut rt.refs, &n, &n).unwrap();
        rt.closures.set_wrap(&mut rt.refs, &m, &m).unwrap();
        assert!(!same_behavior(&rt, &n, &m).unwrap());
        assert!(same_behavior(&rt, &n, &n).unwrap());
    }

    #[test]
    fn test_same_behavior_stops_on_two_cycles() {
        let mut rt = Runtime::new();
        let a = wrapper(&mut rt, "return function() return 1 end");
        let b = wrapper(&mut rt, "return function() return 2 end");
        rt.closures.set_wrap(&mut rt.refs, &a, &b).unwrap();
        rt.closures.set_wrap(&mut rt.refs, &b, &a).unwrap();
        assert!(!same_behavior(&rt, &a, &b).unwrap());
    }
}
