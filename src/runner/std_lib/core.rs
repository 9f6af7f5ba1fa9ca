//! Core library registration.

use crate::runner::api::Runtime;
use crate::runner::ds::error::RuntimeError;

use super::base;
use super::closures;
use super::debug;
use super::env;

/// Register every built-in function with the runtime.
pub fn register_core_library(rt: &mut Runtime) -> Result<(), RuntimeError> {
    // Host functions first so the tool namespace can shadow them.
    base::register(rt)?;
    env::register(rt)?;
    closures::register(rt)?;
    debug::register(rt)?;
    Ok(())
}
