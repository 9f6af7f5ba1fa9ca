//! Access to the two global namespaces.

use crate::runner::api::Runtime;
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::value::Value;
use crate::runner::plugin::types::{NativeCall, NativeOutcome};

pub fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    rt.register("getgenv", env_getgenv)?;
    rt.register("getrenv", env_getrenv)?;
    Ok(())
}

/// The tool's own globals.
fn env_getgenv(rt: &mut Runtime, _call: &NativeCall, _args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    Ok(NativeOutcome::Return(vec![Value::Table(rt.tool_globals())]))
}

/// The globals shared by host scripts.
fn env_getrenv(rt: &mut Runtime, _call: &NativeCall, _args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    Ok(NativeOutcome::Return(vec![Value::Table(rt.host_globals())]))
}
