//! Core types for native functions.

use crate::runner::api::Runtime;
use crate::runner::ds::closure::FunctionRef;
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::execution_context::ContextId;
use crate::runner::ds::table::TableRef;
use crate::runner::ds::value::Value;

/// The invocation a native function is serving.
#[derive(Debug, Clone)]
pub struct NativeCall {
    /// The unit being called. For a wrapper this is the wrapper itself.
    pub callee: FunctionRef,
    pub context: ContextId,
}

/// What a native function hands back to the interpreter.
#[derive(Debug, Clone)]
pub enum NativeOutcome {
    Return(Vec<Value>),
    /// Suspend the running context, passing these values to whoever resumed it.
    Yield(Vec<Value>),
}

/// Function signature for native functions.
pub type NativeFn = fn(
    rt: &mut Runtime,
    call: &NativeCall,
    args: Vec<Value>,
) -> Result<NativeOutcome, RuntimeError>;

/// Invoked when a context suspended inside a native call is resumed. The
/// status is `Ok` with the resume values, or the error it was resumed with.
pub type ContinuationFn = fn(
    rt: &mut Runtime,
    call: &NativeCall,
    status: Result<Vec<Value>, RuntimeError>,
) -> Result<NativeOutcome, RuntimeError>;

/// Address of a native entry point, used for registry membership checks.
pub fn native_fn_addr(f: NativeFn) -> usize {
    f as usize
}

pub fn check_function(args: &[Value], index: usize, function: &str) -> Result<FunctionRef, RuntimeError> {
    match args.get(index) {
        Some(Value::Function(f)) => Ok(f.clone()),
        other => Err(RuntimeError::bad_argument(
            function,
            index + 1,
            "function",
            other.map(|v| v.type_name()).unwrap_or("no value"),
        )),
    }
}

pub fn check_table(args: &[Value], index: usize, function: &str) -> Result<TableRef, RuntimeError> {
    match args.get(index) {
        Some(Value::Table(t)) => Ok(t.clone()),
        other => Err(RuntimeError::bad_argument(
            function,
            index + 1,
            "table",
            other.map(|v| v.type_name()).unwrap_or("no value"),
        )),
    }
}

pub fn check_string(args: &[Value], index: usize, function: &str) -> Result<String, RuntimeError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.to_string()),
        Some(Value::Number(n)) => Ok(Value::Number(*n).to_string()),
        other => Err(RuntimeError::bad_argument(
            function,
            index + 1,
            "string",
            other.map(|v| v.type_name()).unwrap_or("no value"),
        )),
    }
}

pub fn opt_string(args: &[Value], index: usize, function: &str) -> Result<Option<String>, RuntimeError> {
    match args.get(index) {
        None | Some(Value::Nil) => Ok(None),
        Some(_) => check_string(args, index, function).map(Some),
    }
}

/// 1-based index argument, returned 0-based.
pub fn check_index(args: &[Value], index: usize, function: &str) -> Result<usize, RuntimeError> {
    match args.get(index) {
        Some(Value::Number(n)) if n.fract() == 0.0 && *n >= 1.0 => Ok(*n as usize - 1),
        Some(Value::Number(_)) => Err(RuntimeError::Argument {
            function: function.to_string(),
            index: index + 1,
            message: "index out of range".to_string(),
        }),
        other => Err(RuntimeError::bad_argument(
            function,
            index + 1,
            "number",
            other.map(|v| v.type_name()).unwrap_or("no value"),
        )),
    }
}
