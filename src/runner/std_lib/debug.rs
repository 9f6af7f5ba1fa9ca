//! Upvalue inspection, bound both globally and in the `debug` table.

use crate::runner::api::Runtime;
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::table::Table;
use crate::runner::ds::value::Value;
use crate::runner::plugin::types::{check_function, check_index, NativeCall, NativeFn, NativeOutcome};

const FUNCTIONS: [(&str, NativeFn); 3] = [
    ("getupvalues", debug_getupvalues),
    ("getupvalue", debug_getupvalue),
    ("setupvalue", debug_setupvalue),
];

pub fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    let debug = Table::new_ref();
    for (name, f) in FUNCTIONS.iter() {
        rt.register(name, *f)?;
        rt.register_in(&debug, name, &format!("debug.{}", name), *f)?;
    }
    rt.tool_globals()
        .borrow_mut()
        .raw_set("debug", Value::Table(debug));
    Ok(())
}

fn debug_getupvalues(_rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let unit = check_function(&args, 0, "getupvalues")?;
    let table = Table::new_ref();
    for value in unit.upvalues() {
        table.borrow_mut().push(value);
    }
    Ok(NativeOutcome::Return(vec![Value::Table(table)]))
}

fn debug_getupvalue(_rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let unit = check_function(&args, 0, "getupvalue")?;
    let index = check_index(&args, 1, "getupvalue")?;
    let value = unit.upvalues().get(index).cloned().unwrap_or(Value::Nil);
    Ok(NativeOutcome::Return(vec![value]))
}

fn debug_setupvalue(_rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let unit = check_function(&args, 0, "setupvalue")?;
    if unit.nupvalues() == 0 {
        return Err(RuntimeError::Argument {
            function: "setupvalue".to_string(),
            index: 1,
            message: "function has no upvalues".to_string(),
        });
    }
    let index = check_index(&args, 1, "setupvalue")?;
    let value = args.get(2).cloned().unwrap_or(Value::Nil);
    if !unit.borrow_mut().set_upvalue(index, value) {
        return Err(RuntimeError::Argument {
            function: "setupvalue".to_string(),
            index: 2,
            message: "index out of range".to_string(),
        });
    }
    Ok(NativeOutcome::Return(Vec::new()))
}
