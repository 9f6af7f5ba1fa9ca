//! The embedding surface: a [`Runtime`] owns every execution context, the
//! unit heap, the library registry and the closure engine's side tables.

use std::rc::Rc;

use log::{error, info};

use crate::runner::closures::ClosureEngine;
use crate::runner::ds::closure::{ClosureCell, FunctionRef, InterpretedClosure, NativeClosure};
use crate::runner::ds::error::RuntimeError;
use crate::runner::ds::execution_context::{
    ContextId, ContextStatus, ExecutionContext, HostScript,
};
use crate::runner::ds::heap::{Heap, HeapConfig};
use crate::runner::ds::ref_registry::RefRegistry;
use crate::runner::ds::table::{Table, TableRef};
use crate::runner::ds::value::Value;
use crate::runner::plugin::config::EngineConfig;
use crate::runner::plugin::registry::LibraryRegistry;
use crate::runner::plugin::types::NativeFn;
use crate::runner::std_lib::register_core_library;
use crate::runner::vm::bytecode::Prototype;
use crate::runner::vm::capability::{Capability, CapabilityAssigner, ProtoCapabilityAssigner};
use crate::runner::vm::compiler::{ScriptCompiler, SnippetCompiler};

/// How a started or resumed context stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    Finished(Vec<Value>),
    Suspended(Vec<Value>),
}

pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) refs: RefRegistry,
    pub(crate) closures: ClosureEngine,
    pub(crate) library: LibraryRegistry,
    pub(crate) contexts: Vec<ExecutionContext>,
    pub(crate) current: ContextId,
    tool_context: ContextId,
    host_globals: TableRef,
    tool_globals: TableRef,
    compiler: Box<dyn ScriptCompiler>,
    capabilities: Box<dyn CapabilityAssigner>,
    pub(crate) config: EngineConfig,
    output: Vec<String>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_collaborators(
            config,
            Box::new(SnippetCompiler),
            Box::new(ProtoCapabilityAssigner),
        )
    }

    /// Build a runtime around a custom compiler and capability assigner.
    pub fn with_collaborators(
        config: EngineConfig,
        compiler: Box<dyn ScriptCompiler>,
        capabilities: Box<dyn CapabilityAssigner>,
    ) -> Self {
        let host_globals = Table::new_ref();
        // Tool code sees the host namespace but writes stay private.
        let tool_globals = Table::with_proxy(host_globals.clone(), false);
        let tool_context = ContextId(0);
        let contexts = vec![ExecutionContext::new(
            tool_context,
            tool_globals.clone(),
            Capability::MAX,
        )];
        let mut rt = Runtime {
            heap: Heap::new(HeapConfig::unlimited()),
            refs: RefRegistry::new(),
            closures: ClosureEngine::new(),
            library: LibraryRegistry::new(),
            contexts,
            current: tool_context,
            tool_context,
            host_globals,
            tool_globals,
            compiler,
            capabilities,
            config,
            output: Vec::new(),
        };
        if let Err(e) = register_core_library(&mut rt) {
            error!("failed to register the core library: {}", e);
        }
        // The library itself never counts against the unit limit.
        let baseline = rt.heap.live_units();
        rt.heap.set_limit(rt.config.max_units.map(|max| max + baseline));
        info!(
            "runtime ready: {} library functions, {} units",
            rt.library.len(),
            rt.heap.live_units()
        );
        rt
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host_globals(&self) -> TableRef {
        self.host_globals.clone()
    }

    pub fn tool_globals(&self) -> TableRef {
        self.tool_globals.clone()
    }

    pub fn library(&self) -> &LibraryRegistry {
        &self.library
    }

    pub fn closures(&self) -> &ClosureEngine {
        &self.closures
    }

    // ── Execution contexts ───────────────────────────────────

    pub fn tool_context(&self) -> ContextId {
        self.tool_context
    }

    pub fn current_context(&self) -> ContextId {
        self.current
    }

    /// Create a host context bound to `script`, sharing the host namespace.
    pub fn spawn_host_context(&mut self, script: &Rc<HostScript>, capability: Capability) -> ContextId {
        let id = ContextId(self.contexts.len());
        let ctx = ExecutionContext::new(id, self.host_globals.clone(), capability).bound_to(script);
        self.contexts.push(ctx);
        id
    }

    /// Create another context that shares the tool namespace.
    pub fn spawn_tool_context(&mut self, capability: Capability) -> ContextId {
        let id = ContextId(self.contexts.len());
        self.contexts
            .push(ExecutionContext::new(id, self.tool_globals.clone(), capability));
        id
    }

    pub fn context(&self, id: ContextId) -> Result<&ExecutionContext, RuntimeError> {
        self.contexts.get(id.0).ok_or_else(|| {
            RuntimeError::InternalConsistency(format!("unknown execution context {}", id.0))
        })
    }

    pub(crate) fn context_mut(&mut self, id: ContextId) -> Result<&mut ExecutionContext, RuntimeError> {
        self.contexts.get_mut(id.0).ok_or_else(|| {
            RuntimeError::InternalConsistency(format!("unknown execution context {}", id.0))
        })
    }

    pub fn context_status(&self, id: ContextId) -> Result<ContextStatus, RuntimeError> {
        Ok(self.context(id)?.status)
    }

    pub(crate) fn ctx(&self) -> &ExecutionContext {
        &self.contexts[self.current.0]
    }

    pub(crate) fn ctx_mut(&mut self) -> &mut ExecutionContext {
        &mut self.contexts[self.current.0]
    }

    // ── Loading code ─────────────────────────────────────────

    /// Compile `source` into a unit whose environment is the current
    /// context's namespace.
    pub fn load(&mut self, source: &str, chunk_name: &str) -> Result<FunctionRef, RuntimeError> {
        let context = self.current;
        self.load_in(context, source, chunk_name)
    }

    pub fn load_in(
        &mut self,
        context: ContextId,
        source: &str,
        chunk_name: &str,
    ) -> Result<FunctionRef, RuntimeError> {
        let (globals, capability) = {
            let ctx = self.context(context)?;
            (ctx.globals.clone(), ctx.capability)
        };
        let proto = self.compile(source, chunk_name)?;
        self.capabilities.assign(&proto, capability);
        self.instantiate(proto, globals)
    }

    pub(crate) fn compile(&mut self, source: &str, chunk_name: &str) -> Result<Rc<Prototype>, RuntimeError> {
        self.compiler
            .compile(source, chunk_name)
            .map_err(RuntimeError::Compile)
    }

    pub(crate) fn assign_capability(&self, proto: &Rc<Prototype>, capability: Capability) {
        self.capabilities.assign(proto, capability);
    }

    pub(crate) fn instantiate(&mut self, proto: Rc<Prototype>, env: TableRef) -> Result<FunctionRef, RuntimeError> {
        let cell = ClosureCell::interpreted(
            InterpretedClosure {
                proto,
                upvalues: Vec::new(),
            },
            env,
        );
        self.heap.allocate(cell, "load")
    }

    /// Compile and run `source` on the tool context.
    pub fn exec(&mut self, source: &str) -> Result<Vec<Value>, RuntimeError> {
        let context = self.tool_context;
        let chunk_name = self.config.loadstring_chunk_name.clone();
        let f = self.load_in(context, source, &chunk_name)?;
        self.call_on(context, &f, Vec::new())
    }

    // ── Native functions ─────────────────────────────────────

    /// Mint an unregistered native unit in the current namespace.
    pub fn new_native(&mut self, f: NativeFn, debug_name: &str) -> Result<FunctionRef, RuntimeError> {
        self.new_native_with_upvalues(f, debug_name, Vec::new())
    }

    pub fn new_native_with_upvalues(
        &mut self,
        f: NativeFn,
        debug_name: &str,
        upvalues: Vec<Value>,
    ) -> Result<FunctionRef, RuntimeError> {
        let mut native = NativeClosure::new(f, debug_name);
        native.upvalues = upvalues;
        let env = self.ctx().globals.clone();
        self.heap.allocate(ClosureCell::native(native, env), debug_name)
    }

    /// Register a library function under `name` in the tool namespace.
    pub fn register(&mut self, name: &str, f: NativeFn) -> Result<FunctionRef, RuntimeError> {
        let table = self.tool_globals.clone();
        self.register_in(&table, name, name, f)
    }

    /// Register `f` under several names. Each name gets its own unit.
    pub fn register_aliases(&mut self, names: &[&str], f: NativeFn) -> Result<(), RuntimeError> {
        for name in names {
            self.register(name, f)?;
        }
        Ok(())
    }

    /// Register a library function as a field of `table`, recorded as `qualified_name`.
    pub fn register_in(
        &mut self,
        table: &TableRef,
        field: &str,
        qualified_name: &str,
        f: NativeFn,
    ) -> Result<FunctionRef, RuntimeError> {
        let native = NativeClosure::new(f, field);
        let unit = self
            .heap
            .allocate(ClosureCell::native(native, self.tool_globals.clone()), qualified_name)?;
        table.borrow_mut().raw_set(field, Value::Function(unit.clone()));
        self.library.record(qualified_name, &unit, f);
        Ok(unit)
    }

    /// Bind a host (non-library) native function in the host namespace.
    pub fn register_host_function(&mut self, name: &str, f: NativeFn) -> Result<FunctionRef, RuntimeError> {
        let native = NativeClosure::new(f, name);
        let unit = self
            .heap
            .allocate(ClosureCell::native(native, self.host_globals.clone()), name)?;
        self.host_globals
            .borrow_mut()
            .raw_set(name, Value::Function(unit.clone()));
        Ok(unit)
    }

    // ── Output ───────────────────────────────────────────────

    pub fn write_output(&mut self, line: String) {
        if self.config.echo_output {
            println!("{}", line);
        }
        self.output.push(line);
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    // ── Lifetime ─────────────────────────────────────────────

    pub fn live_units(&self) -> usize {
        self.heap.live_units()
    }

    /// Number of strong anchors held in the reference registry.
    pub fn live_anchors(&self) -> usize {
        self.refs.live_count()
    }

    /// Drop side-table entries whose keys are only kept alive by their own
    /// anchors. Returns how many entries were removed.
    pub fn collect_garbage(&mut self) -> Result<usize, RuntimeError> {
        let reclaimed = self.closures.sweep(&mut self.refs)?;
        for id in &reclaimed.dead_wrappers {
            self.library.forget_identity(*id);
        }
        if reclaimed.count > 0 {
            info!("collected {} closure table entries", reclaimed.count);
        }
        Ok(reclaimed.count)
    }

    /// Release every anchor and clear every side table.
    pub fn shutdown(&mut self) -> Result<usize, RuntimeError> {
        let reclaimed = self.closures.teardown(&mut self.refs)?;
        for id in &reclaimed.dead_wrappers {
            self.library.forget_identity(*id);
        }
        let released = reclaimed.count;
        for ctx in &mut self.contexts {
            ctx.frames.clear();
            ctx.pending = None;
            ctx.status = ContextStatus::Dead;
        }
        info!("runtime shut down, released {} anchors", released);
        Ok(released)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
