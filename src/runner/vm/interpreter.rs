//! Bytecode interpreter.
//!
//! Script-to-script calls push frames onto the running context without
//! recursing in Rust. A native function that calls back into script code
//! goes through [`Runtime::call_value`], which runs a nested dispatch loop
//! and bumps the context's native depth. Suspension is only legal at native
//! depth zero.

use log::{log_enabled, trace, Level};

use crate::runner::api::{ResumeOutcome, Runtime};
use crate::runner::ds::closure::{ClosureBody, ClosureCell, FunctionRef, InterpretedClosure};
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::execution_context::{
    CallFrame, ContextId, ContextStatus, NativeFrame, PendingContinuation, ScriptFrame, Slot,
};
use crate::runner::ds::value::Value;
use crate::runner::plugin::types::{ContinuationFn, NativeCall, NativeOutcome};

use super::bytecode::{CallFlags, Instruction, OpCode, ResultMode, UpvalueDesc};

const MAX_NATIVE_DEPTH: usize = 200;
const MAX_FRAMES: usize = 16_000;

/// Result of a nested call made from Rust.
#[derive(Debug)]
pub enum CallOutcome {
    Returned(Vec<Value>),
    /// A native callee asked to yield; the caller decides whether that is legal.
    Yielded(Vec<Value>),
}

enum ExecOutcome {
    Returned(Vec<Value>),
    Suspended(Vec<Value>),
}

fn pop_one(frame: &mut ScriptFrame) -> Result<Value, RuntimeError> {
    match frame.stack.pop() {
        Some(Slot::One(v)) => Ok(v),
        Some(Slot::Many(vs)) => Ok(vs.into_iter().next().unwrap_or(Value::Nil)),
        None => Err(RuntimeError::InternalConsistency(
            "value stack underflow".to_string(),
        )),
    }
}

/// Pop `fixed` single slots plus an optional trailing multi slot, in order.
fn pop_values(frame: &mut ScriptFrame, fixed: u32, last_multi: bool) -> Result<Vec<Value>, RuntimeError> {
    let n = fixed as usize + last_multi as usize;
    if frame.stack.len() < n {
        return Err(RuntimeError::InternalConsistency(
            "value stack underflow".to_string(),
        ));
    }
    let start = frame.stack.len() - n;
    let mut values = Vec::with_capacity(n);
    for slot in frame.stack.drain(start..) {
        match slot {
            Slot::One(v) => values.push(v),
            Slot::Many(vs) => values.extend(vs),
        }
    }
    Ok(values)
}

fn push_results(frame: &mut ScriptFrame, values: Vec<Value>, mode: ResultMode) {
    match mode {
        ResultMode::Discard => {}
        ResultMode::Single => frame
            .stack
            .push(Slot::One(values.into_iter().next().unwrap_or(Value::Nil))),
        ResultMode::Multi => frame.stack.push(Slot::Many(values)),
    }
}

fn continuation_of(f: &FunctionRef) -> Option<ContinuationFn> {
    match f.borrow().body() {
        ClosureBody::Native(n) => n.continuation,
        ClosureBody::Interpreted(_) => None,
    }
}

fn concat_operand(v: &Value) -> Result<String, RuntimeError> {
    match v {
        Value::String(_) | Value::Number(_) => Ok(v.to_string()),
        other => Err(RuntimeError::Type(format!(
            "attempt to concatenate a {} value",
            other.type_name()
        ))),
    }
}

impl Runtime {
    /// Call `f` on the current context and return all its results. A yield
    /// inside `f` is an error.
    pub fn call(&mut self, f: &FunctionRef, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        match self.call_value(f, args)? {
            CallOutcome::Returned(values) => Ok(values),
            CallOutcome::Yielded(_) => Err(RuntimeError::YieldAcrossBoundary),
        }
    }

    /// Call `f` with `context` as the running context.
    pub fn call_on(
        &mut self,
        context: ContextId,
        f: &FunctionRef,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, RuntimeError> {
        let status = self.context_status(context)?;
        if status == ContextStatus::Suspended {
            return Err(RuntimeError::ContextState {
                action: "call into",
                state: status.name(),
            });
        }
        let previous = std::mem::replace(&mut self.current, context);
        let result = self.call(f, args);
        self.current = previous;
        result
    }

    /// Run `f` as the body of `context`. The context may suspend; continue
    /// it with [`Runtime::resume`].
    pub fn start(
        &mut self,
        context: ContextId,
        f: &FunctionRef,
        args: Vec<Value>,
    ) -> Result<ResumeOutcome, RuntimeError> {
        {
            let ctx = self.context_mut(context)?;
            match ctx.status {
                ContextStatus::Ready | ContextStatus::Dead => {}
                other => {
                    return Err(RuntimeError::ContextState {
                        action: "start",
                        state: other.name(),
                    })
                }
            }
            ctx.status = ContextStatus::Running;
            ctx.frames.clear();
            ctx.native_depth = 0;
            ctx.pending = None;
        }
        let previous = std::mem::replace(&mut self.current, context);
        let result = self.run_base(f, args);
        self.current = previous;
        self.finish_run(context, result)
    }

    pub fn resume(&mut self, context: ContextId, args: Vec<Value>) -> Result<ResumeOutcome, RuntimeError> {
        self.resume_with(context, Ok(args))
    }

    /// Resume a suspended context by raising `error` at its suspension point.
    pub fn resume_with_error(
        &mut self,
        context: ContextId,
        error: RuntimeError,
    ) -> Result<ResumeOutcome, RuntimeError> {
        self.resume_with(context, Err(error))
    }

    fn resume_with(
        &mut self,
        context: ContextId,
        status: Result<Vec<Value>, RuntimeError>,
    ) -> Result<ResumeOutcome, RuntimeError> {
        let pending = {
            let ctx = self.context_mut(context)?;
            if ctx.status != ContextStatus::Suspended {
                return Err(RuntimeError::ContextState {
                    action: "resume",
                    state: ctx.status.name(),
                });
            }
            ctx.status = ContextStatus::Running;
            ctx.pending.take()
        };
        let pending = pending.ok_or_else(|| {
            RuntimeError::InternalConsistency(
                "suspended context has no pending continuation".to_string(),
            )
        })?;
        let previous = std::mem::replace(&mut self.current, context);
        let result = self.continue_after_resume(pending, status);
        self.current = previous;
        self.finish_run(context, result)
    }

    fn finish_run(
        &mut self,
        context: ContextId,
        result: Result<ExecOutcome, RuntimeError>,
    ) -> Result<ResumeOutcome, RuntimeError> {
        let ctx = self.context_mut(context)?;
        match result {
            Ok(ExecOutcome::Returned(values)) => {
                ctx.status = ContextStatus::Dead;
                ctx.frames.clear();
                Ok(ResumeOutcome::Finished(values))
            }
            Ok(ExecOutcome::Suspended(values)) => {
                ctx.status = ContextStatus::Suspended;
                Ok(ResumeOutcome::Suspended(values))
            }
            Err(e) => {
                ctx.status = ContextStatus::Dead;
                ctx.frames.clear();
                ctx.pending = None;
                ctx.native_depth = 0;
                Err(e)
            }
        }
    }

    fn run_base(&mut self, f: &FunctionRef, args: Vec<Value>) -> Result<ExecOutcome, RuntimeError> {
        if f.is_native() {
            return match self.invoke_native(f, args)? {
                NativeOutcome::Return(values) => Ok(ExecOutcome::Returned(values)),
                NativeOutcome::Yield(values) => {
                    self.suspend_at(f.clone(), ResultMode::Multi);
                    Ok(ExecOutcome::Suspended(values))
                }
            };
        }
        let frame = self.enter_script(f, args, ResultMode::Multi)?;
        self.ctx_mut().frames.push(CallFrame::Script(frame));
        self.execute(0)
    }

    fn suspend_at(&mut self, callee: FunctionRef, result_mode: ResultMode) {
        let continuation = continuation_of(&callee);
        let context = self.current;
        self.ctx_mut().pending = Some(PendingContinuation {
            call: NativeCall { callee, context },
            continuation,
            result_mode,
        });
    }

    fn continue_after_resume(
        &mut self,
        pending: PendingContinuation,
        status: Result<Vec<Value>, RuntimeError>,
    ) -> Result<ExecOutcome, RuntimeError> {
        let PendingContinuation {
            call,
            continuation,
            result_mode,
        } = pending;
        let values = match continuation {
            Some(cont) => {
                self.ctx_mut().frames.push(CallFrame::Native(NativeFrame {
                    function: call.callee.clone(),
                }));
                let outcome = cont(self, &call, status);
                self.ctx_mut().frames.pop();
                match outcome? {
                    NativeOutcome::Return(values) => values,
                    NativeOutcome::Yield(values) => {
                        self.suspend_at(call.callee, result_mode);
                        return Ok(ExecOutcome::Suspended(values));
                    }
                }
            }
            None => status?,
        };
        if self.ctx().frames.is_empty() {
            return Ok(ExecOutcome::Returned(values));
        }
        let frame = self.top_script_frame()?;
        push_results(frame, values, result_mode);
        self.execute(0)
    }

    /// Call `f` from Rust, running a nested dispatch loop for script callees.
    pub(crate) fn call_value(&mut self, f: &FunctionRef, args: Vec<Value>) -> Result<CallOutcome, RuntimeError> {
        if f.is_native() {
            return match self.invoke_native(f, args)? {
                NativeOutcome::Return(values) => Ok(CallOutcome::Returned(values)),
                NativeOutcome::Yield(values) => Ok(CallOutcome::Yielded(values)),
            };
        }
        if self.ctx().native_depth >= MAX_NATIVE_DEPTH {
            return Err(RuntimeError::Script("C stack overflow".to_string()));
        }
        let base = self.ctx().frames.len();
        let frame = self.enter_script(f, args, ResultMode::Multi)?;
        self.ctx_mut().frames.push(CallFrame::Script(frame));
        self.ctx_mut().native_depth += 1;
        let result = self.execute(base);
        self.ctx_mut().native_depth -= 1;
        match result {
            Ok(ExecOutcome::Returned(values)) => Ok(CallOutcome::Returned(values)),
            Ok(ExecOutcome::Suspended(_)) => {
                self.ctx_mut().frames.truncate(base);
                Err(RuntimeError::InternalConsistency(
                    "nested call suspended its context".to_string(),
                ))
            }
            Err(e) => {
                self.ctx_mut().frames.truncate(base);
                Err(e)
            }
        }
    }

    fn invoke_native(&mut self, f: &FunctionRef, args: Vec<Value>) -> Result<NativeOutcome, RuntimeError> {
        let entry = f.native_fn().ok_or_else(|| {
            RuntimeError::InternalConsistency("native call on an interpreted unit".to_string())
        })?;
        if log_enabled!(Level::Trace) {
            match self.library.name_of(f.id()) {
                Some(name) => trace!("env function called: {}", name),
                None => trace!("native call {} ({})", f.debug_name().unwrap_or_default(), f.id()),
            }
        }
        let call = NativeCall {
            callee: f.clone(),
            context: self.current,
        };
        self.ctx_mut().frames.push(CallFrame::Native(NativeFrame {
            function: f.clone(),
        }));
        let result = entry(self, &call, args);
        self.ctx_mut().frames.pop();
        result
    }

    fn enter_script(
        &mut self,
        f: &FunctionRef,
        args: Vec<Value>,
        result_mode: ResultMode,
    ) -> Result<ScriptFrame, RuntimeError> {
        if self.ctx().frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::Script("stack overflow".to_string()));
        }
        let (proto, upvalues, env) = {
            let cell = f.borrow();
            match cell.body() {
                ClosureBody::Interpreted(c) => (c.proto.clone(), c.upvalues.clone(), cell.env().clone()),
                ClosureBody::Native(_) => {
                    return Err(RuntimeError::InternalConsistency(
                        "script call on a native unit".to_string(),
                    ))
                }
            }
        };
        let nparams = proto.num_params as usize;
        let mut locals = vec![Value::Nil; proto.num_locals().max(nparams)];
        let mut args = args.into_iter();
        for slot in locals.iter_mut().take(nparams) {
            *slot = args.next().unwrap_or(Value::Nil);
        }
        let varargs = if proto.is_vararg {
            args.collect()
        } else {
            Vec::new()
        };
        Ok(ScriptFrame {
            function: f.clone(),
            proto,
            upvalues,
            env,
            ip: 0,
            locals,
            stack: Vec::new(),
            varargs,
            result_mode,
        })
    }

    fn top_script_frame(&mut self) -> Result<&mut ScriptFrame, RuntimeError> {
        match self.ctx_mut().frames.last_mut() {
            Some(CallFrame::Script(frame)) => Ok(frame),
            _ => Err(RuntimeError::InternalConsistency(
                "interpreter expected a script frame".to_string(),
            )),
        }
    }

    /// Dispatch loop. Returns when the frame at index `base` returns or the
    /// context suspends.
    fn execute(&mut self, base: usize) -> Result<ExecOutcome, RuntimeError> {
        loop {
            let instr = {
                let frame = self.top_script_frame()?;
                match frame.proto.chunk.code.get(frame.ip) {
                    Some(instr) => {
                        let instr = instr.clone();
                        frame.ip += 1;
                        instr
                    }
                    None => Instruction::with_two_operands(OpCode::Return, 0, 0),
                }
            };

            match instr.op {
                OpCode::Constant => {
                    let frame = self.top_script_frame()?;
                    let value = frame
                        .proto
                        .chunk
                        .constants
                        .get(instr.operand as usize)
                        .cloned()
                        .unwrap_or(Value::Nil);
                    frame.stack.push(Slot::One(value));
                }
                OpCode::Nil => self.top_script_frame()?.stack.push(Slot::One(Value::Nil)),
                OpCode::True => self
                    .top_script_frame()?
                    .stack
                    .push(Slot::One(Value::Boolean(true))),
                OpCode::False => self
                    .top_script_frame()?
                    .stack
                    .push(Slot::One(Value::Boolean(false))),
                OpCode::GetLocal => {
                    let frame = self.top_script_frame()?;
                    let value = frame
                        .locals
                        .get(instr.operand as usize)
                        .cloned()
                        .unwrap_or(Value::Nil);
                    frame.stack.push(Slot::One(value));
                }
                OpCode::SetLocal => {
                    let frame = self.top_script_frame()?;
                    let value = pop_one(frame)?;
                    if let Some(slot) = frame.locals.get_mut(instr.operand as usize) {
                        *slot = value;
                    }
                }
                OpCode::GetUpvalue => {
                    let frame = self.top_script_frame()?;
                    let value = frame
                        .upvalues
                        .get(instr.operand as usize)
                        .cloned()
                        .unwrap_or(Value::Nil);
                    frame.stack.push(Slot::One(value));
                }
                OpCode::GetGlobal => {
                    let frame = self.top_script_frame()?;
                    let value = frame
                        .env
                        .borrow()
                        .get(frame.proto.chunk.get_name(instr.operand));
                    frame.stack.push(Slot::One(value));
                }
                OpCode::SetGlobal => {
                    let frame = self.top_script_frame()?;
                    let value = pop_one(frame)?;
                    let env = frame.env.clone();
                    let result = env
                        .borrow_mut()
                        .set(frame.proto.chunk.get_name(instr.operand), value);
                    result?;
                }
                OpCode::GetField => {
                    let frame = self.top_script_frame()?;
                    let object = pop_one(frame)?;
                    let name = frame.proto.chunk.get_name(instr.operand);
                    let value = match &object {
                        Value::Table(t) => t.borrow().get(name),
                        other => {
                            return Err(RuntimeError::Type(format!(
                                "attempt to index a {} value (field '{}')",
                                other.type_name(),
                                name
                            )))
                        }
                    };
                    frame.stack.push(Slot::One(value));
                }
                OpCode::Vararg => {
                    let frame = self.top_script_frame()?;
                    let values = frame.varargs.clone();
                    push_results(frame, values, ResultMode::decode(instr.operand));
                }
                OpCode::Concat => {
                    let frame = self.top_script_frame()?;
                    let rhs = pop_one(frame)?;
                    let lhs = pop_one(frame)?;
                    let joined = format!("{}{}", concat_operand(&lhs)?, concat_operand(&rhs)?);
                    frame.stack.push(Slot::One(Value::from(joined)));
                }
                OpCode::Equal | OpCode::NotEqual => {
                    let frame = self.top_script_frame()?;
                    let rhs = pop_one(frame)?;
                    let lhs = pop_one(frame)?;
                    let equal = lhs == rhs;
                    let result = if instr.op == OpCode::Equal { equal } else { !equal };
                    frame.stack.push(Slot::One(Value::Boolean(result)));
                }
                OpCode::Not => {
                    let frame = self.top_script_frame()?;
                    let value = pop_one(frame)?;
                    frame
                        .stack
                        .push(Slot::One(Value::Boolean(!value.is_truthy())));
                }
                OpCode::Jump => {
                    self.top_script_frame()?.ip = instr.operand as usize;
                }
                OpCode::JumpIfFalse => {
                    let frame = self.top_script_frame()?;
                    if !pop_one(frame)?.is_truthy() {
                        frame.ip = instr.operand as usize;
                    }
                }
                OpCode::Pop => {
                    self.top_script_frame()?.stack.pop();
                }
                OpCode::Closure => self.op_closure(instr.operand)?,
                OpCode::Call => {
                    let flags = CallFlags::decode(instr.operand2);
                    if let Some(suspended) = self.op_call(instr.operand, flags)? {
                        return Ok(suspended);
                    }
                }
                OpCode::Return => {
                    let values = {
                        let frame = self.top_script_frame()?;
                        pop_values(frame, instr.operand, instr.operand2 == 1)?
                    };
                    if let Some(values) = self.op_return(base, values)? {
                        return Ok(ExecOutcome::Returned(values));
                    }
                }
            }
        }
    }

    fn op_closure(&mut self, index: u32) -> Result<(), RuntimeError> {
        let (proto, upvalues, env) = {
            let frame = self.top_script_frame()?;
            let child = frame
                .proto
                .protos
                .get(index as usize)
                .cloned()
                .ok_or_else(|| {
                    RuntimeError::InternalConsistency(format!("missing nested prototype {}", index))
                })?;
            let upvalues = child
                .upvalue_descs
                .iter()
                .map(|desc| match desc {
                    UpvalueDesc::Local(slot) => frame.locals.get(*slot as usize).cloned(),
                    UpvalueDesc::Upvalue(idx) => frame.upvalues.get(*idx as usize).cloned(),
                })
                .map(|v| v.unwrap_or(Value::Nil))
                .collect();
            (child, upvalues, frame.env.clone())
        };
        let cell = ClosureCell::interpreted(InterpretedClosure { proto, upvalues }, env);
        let unit = self.heap.allocate(cell, "closure")?;
        self.top_script_frame()?
            .stack
            .push(Slot::One(Value::Function(unit)));
        Ok(())
    }

    fn op_call(&mut self, argc: u32, flags: CallFlags) -> Result<Option<ExecOutcome>, RuntimeError> {
        let (callee, args) = {
            let frame = self.top_script_frame()?;
            let args = pop_values(frame, argc, flags.last_is_multi)?;
            (pop_one(frame)?, args)
        };
        let func = match callee {
            Value::Function(f) => f,
            other => {
                return Err(RuntimeError::Type(format!(
                    "attempt to call a {} value",
                    other.type_name()
                )))
            }
        };
        if !func.is_native() {
            let frame = self.enter_script(&func, args, flags.result_mode)?;
            self.ctx_mut().frames.push(CallFrame::Script(frame));
            return Ok(None);
        }
        match self.invoke_native(&func, args)? {
            NativeOutcome::Return(values) => {
                let frame = self.top_script_frame()?;
                push_results(frame, values, flags.result_mode);
                Ok(None)
            }
            NativeOutcome::Yield(values) => {
                if self.ctx().native_depth > 0 {
                    return Err(RuntimeError::YieldAcrossBoundary);
                }
                self.suspend_at(func, flags.result_mode);
                Ok(Some(ExecOutcome::Suspended(values)))
            }
        }
    }

    fn op_return(&mut self, base: usize, values: Vec<Value>) -> Result<Option<Vec<Value>>, RuntimeError> {
        let result_mode = match self.ctx_mut().frames.pop() {
            Some(CallFrame::Script(frame)) => frame.result_mode,
            _ => {
                return Err(RuntimeError::InternalConsistency(
                    "return without a script frame".to_string(),
                ))
            }
        };
        if self.ctx().frames.len() <= base {
            return Ok(Some(values));
        }
        let frame = self.top_script_frame()?;
        push_results(frame, values, result_mode);
        Ok(None)
    }
}
