//! In-place hooking of function units.
//!
//! `hookfunction` makes every existing reference to a unit run the hook
//! from now on and hands back a backup that still runs the old behavior.
//! How the unit is patched depends on the kinds of the target and the hook:
//!
//! | target \ hook | native            | interpreted          | wrapped                    |
//! |---------------|-------------------|----------------------|----------------------------|
//! | native        | copy native body  | turn into wrapper    | wrapper to hook's inner    |
//! | interpreted   | copy forwarder    | copy script body     | copy inner (or forwarder)  |
//! | wrapped       | retarget wrapper  | retarget wrapper     | retarget to hook's inner   |
//!
//! Every input is validated before the target or any table is touched.

use log::debug;

use super::classify::{classify, ClosureKind};
use super::wrap::{clonefunction, dispatch_trampoline, newlclosure, trampoline_continuation};
use crate::runner::api::Runtime;
use crate::runner::ds::closure::{ClosureBody, FunctionRef, InterpretedClosure, NativeClosure};
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::table::TableRef;

enum Patch {
    /// Overwrite a native target's body.
    Native(NativeClosure, TableRef),
    /// Overwrite an interpreted target's body.
    Interpreted(InterpretedClosure, TableRef),
    /// Make a native target a wrapper forwarding to `inner`.
    Repurpose { inner: FunctionRef },
    /// Point an existing wrapper at `inner`.
    Retarget { inner: FunctionRef },
}

fn unwrap_hook(rt: &Runtime, hook: &FunctionRef) -> Result<FunctionRef, RuntimeError> {
    rt.closures.wrapped_inner(hook.id())?.ok_or_else(|| {
        RuntimeError::InternalConsistency(format!("wrapped hook {} has no inner unit", hook.id()))
    })
}

fn native_snapshot(unit: &FunctionRef) -> Result<(NativeClosure, TableRef), RuntimeError> {
    let cell = unit.borrow();
    match cell.body() {
        ClosureBody::Native(n) => Ok((n.clone(), cell.env().clone())),
        ClosureBody::Interpreted(_) => {
            Err(RuntimeError::UnsupportedCombination("hookfunction".to_string()))
        }
    }
}

fn interpreted_snapshot(unit: &FunctionRef) -> Result<(InterpretedClosure, TableRef), RuntimeError> {
    let cell = unit.borrow();
    match cell.body() {
        ClosureBody::Interpreted(c) => Ok((c.clone(), cell.env().clone())),
        ClosureBody::Native(_) => {
            Err(RuntimeError::UnsupportedCombination("hookfunction".to_string()))
        }
    }
}

/// Interpreted body that runs `source`, via a forwarder when `source` is native.
fn interpreted_body_for(
    rt: &mut Runtime,
    source: &FunctionRef,
) -> Result<(InterpretedClosure, TableRef), RuntimeError> {
    if source.is_native() {
        let forwarder = newlclosure(rt, source)?;
        interpreted_snapshot(&forwarder)
    } else {
        interpreted_snapshot(source)
    }
}

fn plan(
    rt: &mut Runtime,
    original: &FunctionRef,
    hook: &FunctionRef,
) -> Result<Patch, RuntimeError> {
    let target_kind = classify(&rt.closures, original);
    let hook_kind = classify(&rt.closures, hook);
    debug!(
        "hookfunction {} ({}) with {} ({})",
        original.id(),
        target_kind,
        hook.id(),
        hook_kind
    );
    let patch = match (target_kind, hook_kind) {
        (ClosureKind::Native, ClosureKind::Native) => {
            let (body, env) = native_snapshot(hook)?;
            Patch::Native(body, env)
        }
        (ClosureKind::Native, ClosureKind::Interpreted) => Patch::Repurpose {
            inner: hook.clone(),
        },
        (ClosureKind::Native, ClosureKind::Wrapped) => Patch::Repurpose {
            inner: unwrap_hook(rt, hook)?,
        },
        (ClosureKind::Interpreted, ClosureKind::Native) => {
            let (body, env) = interpreted_body_for(rt, hook)?;
            Patch::Interpreted(body, env)
        }
        (ClosureKind::Interpreted, ClosureKind::Interpreted) => {
            let (body, env) = interpreted_snapshot(hook)?;
            Patch::Interpreted(body, env)
        }
        (ClosureKind::Interpreted, ClosureKind::Wrapped) => {
            let inner = unwrap_hook(rt, hook)?;
            let (body, env) = interpreted_body_for(rt, &inner)?;
            Patch::Interpreted(body, env)
        }
        (ClosureKind::Wrapped, ClosureKind::Wrapped) => Patch::Retarget {
            inner: unwrap_hook(rt, hook)?,
        },
        (ClosureKind::Wrapped, _) => Patch::Retarget {
            inner: hook.clone(),
        },
    };
    if let Patch::Repurpose { inner } | Patch::Retarget { inner } = &patch {
        if rt.closures.forwards_to(inner.id(), original.id()) {
            return Err(RuntimeError::Argument {
                function: "hookfunction".to_string(),
                index: 2,
                message: "hook forwards back to the target".to_string(),
            });
        }
    }
    let needed = match &patch {
        Patch::Native(body, _) => body.upvalues.len(),
        Patch::Interpreted(body, _) => body.upvalues.len(),
        Patch::Repurpose { .. } | Patch::Retarget { .. } => 0,
    };
    original.borrow().check_capacity("hookfunction", needed)?;
    Ok(patch)
}

fn apply(rt: &mut Runtime, original: &FunctionRef, patch: Patch) -> Result<(), RuntimeError> {
    match patch {
        Patch::Native(body, env) => original.borrow_mut().patch_native(&body, env),
        Patch::Interpreted(body, env) => original.borrow_mut().patch_interpreted(&body, env),
        Patch::Repurpose { inner } => {
            original
                .borrow_mut()
                .repurpose_as_trampoline(dispatch_trampoline, trampoline_continuation)?;
            rt.closures.set_wrap(&mut rt.refs, original, &inner)
        }
        Patch::Retarget { inner } => rt.closures.set_wrap(&mut rt.refs, original, &inner),
    }
}

/// Redirect `original` to `hook` in place and return the backup.
///
/// Hooking a unit that is already hooked keeps the first backup, so the
/// result always runs the behavior from before the first hook.
pub fn hookfunction(
    rt: &mut Runtime,
    original: &FunctionRef,
    hook: &FunctionRef,
) -> Result<FunctionRef, RuntimeError> {
    let patch = plan(rt, original, hook)?;
    let backup = match rt.closures.hook_backup(original.id())? {
        Some(backup) => backup,
        None => {
            let backup = clonefunction(rt, original)?;
            rt.closures.insert_hook(&mut rt.refs, original, &backup);
            backup
        }
    };
    apply(rt, original, patch)?;
    debug!("hooked {}, backup {}", original.id(), backup.id());
    Ok(backup)
}

/// Undo every hook on `original`. Returns false when it was not hooked.
pub fn restorefunction(rt: &mut Runtime, original: &FunctionRef) -> Result<bool, RuntimeError> {
    let backup = match rt.closures.hook_backup(original.id())? {
        Some(backup) => backup,
        None => return Ok(false),
    };
    let saved = backup.borrow().clone();
    original.borrow_mut().restore_from(&saved)?;
    match rt.closures.wrapped_inner(backup.id())? {
        Some(inner) => rt.closures.set_wrap(&mut rt.refs, original, &inner)?,
        None => rt.closures.remove_wrap(&mut rt.refs, original.id())?,
    }
    rt.closures.remove_hook(&mut rt.refs, original.id())?;
    debug!("restored {} from {}", original.id(), backup.id());
    Ok(true)
}
