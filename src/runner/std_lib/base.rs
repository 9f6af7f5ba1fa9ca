//! Base functions shared by host and tool code.

use crate::runner::api::Runtime;
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::value::Value;
use crate::runner::plugin::types::{NativeCall, NativeOutcome};

pub fn register(rt: &mut Runtime) -> Result<(), RuntimeError> {
    rt.register_host_function("print", base_print)?;
    rt.register_host_function("error", base_error)?;
    rt.register_host_function("yield", base_yield)?;
    rt.register_host_function("type", base_type)?;
    rt.register_host_function("tostring", base_tostring)?;
    Ok(())
}

/// Format all arguments for output.
fn format_args(args: &[Value]) -> String {
    args.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn base_print(rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let line = format_args(&args);
    rt.write_output(line);
    Ok(NativeOutcome::Return(Vec::new()))
}

fn base_error(_rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let message = args.first().cloned().unwrap_or(Value::Nil);
    Err(RuntimeError::Script(message.to_string()))
}

/// Suspend the calling context. The values passed to `resume` become the
/// results of the call.
fn base_yield(_rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    Ok(NativeOutcome::Yield(args))
}

fn base_type(_rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let name = match args.first() {
        Some(v) => v.type_name(),
        None => {
            return Err(RuntimeError::bad_argument("type", 1, "value", "no value"));
        }
    };
    Ok(NativeOutcome::Return(vec![Value::from(name)]))
}

fn base_tostring(_rt: &mut Runtime, _call: &NativeCall, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
    let value = args.first().cloned().unwrap_or(Value::Nil);
    Ok(NativeOutcome::Return(vec![Value::from(value.to_string())]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_args_joins_with_spaces() {
        let args = vec![Value::from("a"), Value::from(1.0), Value::Nil, Value::from(true)];
        assert_eq!(format_args(&args), "a 1 nil true");
    }

    #[test]
    fn test_format_args_empty() {
        assert_eq!(format_args(&[]), "");
    }
}
