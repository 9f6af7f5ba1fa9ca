//! AST-to-bytecode compiler.
//!
//! Walks the AST once per function and emits a [`Prototype`]. Names resolve
//! to locals, upvalues captured from enclosing functions, or environment
//! lookups, in that order.

use std::cell::Cell;
use std::rc::Rc;

use crate::parser::ast::{Block, Chunk as AstChunk, Expr, FunctionBody, Stat};
use crate::parser::parse_chunk;
use crate::runner::ds::value::Value;
use crate::runner::vm::capability::Capability;

use super::bytecode::{CallFlags, Chunk, Instruction, OpCode, Prototype, ResultMode, UpvalueDesc};

/// Turns source text into an executable prototype.
pub trait ScriptCompiler {
    fn compile(&self, source: &str, chunk_name: &str) -> Result<Rc<Prototype>, String>;
}

/// Compiler for the built-in snippet language.
#[derive(Debug, Default)]
pub struct SnippetCompiler;

impl ScriptCompiler for SnippetCompiler {
    fn compile(&self, source: &str, chunk_name: &str) -> Result<Rc<Prototype>, String> {
        let ast = parse_chunk(source).map_err(|e| format!("{}: {}", chunk_name, e))?;
        Compiler::new(chunk_name)
            .compile_chunk(&ast)
            .map_err(|e| format!("{}: {}", chunk_name, e))
    }
}

enum Resolved {
    Local(u32),
    Upvalue(u32),
    Global,
}

struct LocalVar {
    name: String,
    slot: u32,
}

/// Per-function compilation state.
struct FunctionState {
    chunk: Chunk,
    protos: Vec<Rc<Prototype>>,
    /// Visible locals, innermost last.
    active: Vec<LocalVar>,
    /// `active` lengths at each open block.
    block_marks: Vec<usize>,
    upvalues: Vec<(String, UpvalueDesc)>,
    num_params: u32,
    is_vararg: bool,
    debug_name: Option<String>,
}

impl FunctionState {
    fn new(debug_name: Option<String>, is_vararg: bool) -> Self {
        FunctionState {
            chunk: Chunk::new(),
            protos: Vec::new(),
            active: Vec::new(),
            block_marks: Vec::new(),
            upvalues: Vec::new(),
            num_params: 0,
            is_vararg,
            debug_name,
        }
    }

    fn find_local(&self, name: &str) -> Option<u32> {
        self.active
            .iter()
            .rev()
            .find(|local| local.name == name)
            .map(|local| local.slot)
    }

    fn declare_local(&mut self, name: &str) -> u32 {
        let name_idx = self.chunk.add_name(name);
        let slot = self.chunk.add_local(name_idx);
        self.active.push(LocalVar {
            name: name.to_string(),
            slot,
        });
        slot
    }

    fn add_upvalue(&mut self, name: &str, desc: UpvalueDesc) -> u32 {
        if let Some(idx) = self.upvalues.iter().position(|(n, _)| n == name) {
            return idx as u32;
        }
        self.upvalues.push((name.to_string(), desc));
        (self.upvalues.len() - 1) as u32
    }
}

/// The bytecode compiler.
pub struct Compiler {
    source: Rc<str>,
    functions: Vec<FunctionState>,
}

impl Compiler {
    pub fn new(chunk_name: &str) -> Self {
        Compiler {
            source: Rc::from(chunk_name),
            functions: Vec::new(),
        }
    }

    pub fn compile_chunk(mut self, ast: &AstChunk) -> Result<Rc<Prototype>, String> {
        self.functions.push(FunctionState::new(None, true));
        self.compile_block(&ast.block)?;
        self.emit_final_return();
        self.finish_function()
    }

    fn current(&mut self) -> &mut FunctionState {
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.current().chunk
    }

    fn emit_final_return(&mut self) {
        self.chunk()
            .emit(Instruction::with_two_operands(OpCode::Return, 0, 0));
    }

    fn finish_function(&mut self) -> Result<Rc<Prototype>, String> {
        let state = self
            .functions
            .pop()
            .ok_or_else(|| "function state stack underflow".to_string())?;
        Ok(Rc::new(Prototype {
            chunk: state.chunk,
            protos: state.protos,
            upvalue_descs: state.upvalues.into_iter().map(|(_, d)| d).collect(),
            num_params: state.num_params,
            is_vararg: state.is_vararg,
            source: self.source.clone(),
            debug_name: state.debug_name,
            capability: Cell::new(Capability::NONE),
        }))
    }

    fn resolve(&mut self, depth: usize, name: &str) -> Resolved {
        if let Some(slot) = self.functions[depth].find_local(name) {
            return Resolved::Local(slot);
        }
        if depth == 0 {
            return Resolved::Global;
        }
        match self.resolve(depth - 1, name) {
            Resolved::Local(slot) => {
                Resolved::Upvalue(self.functions[depth].add_upvalue(name, UpvalueDesc::Local(slot)))
            }
            Resolved::Upvalue(idx) => {
                Resolved::Upvalue(self.functions[depth].add_upvalue(name, UpvalueDesc::Upvalue(idx)))
            }
            Resolved::Global => Resolved::Global,
        }
    }

    fn resolve_current(&mut self, name: &str) -> Resolved {
        let depth = self.functions.len() - 1;
        self.resolve(depth, name)
    }

    fn compile_block(&mut self, block: &Block) -> Result<(), String> {
        let mark = self.current().active.len();
        self.current().block_marks.push(mark);
        for stat in &block.stats {
            self.compile_stat(stat)?;
        }
        if let Some(values) = &block.ret {
            self.compile_return(values)?;
        }
        let state = self.current();
        if let Some(mark) = state.block_marks.pop() {
            state.active.truncate(mark);
        }
        Ok(())
    }

    fn compile_stat(&mut self, stat: &Stat) -> Result<(), String> {
        match stat {
            Stat::Local { name, value } => {
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => {
                        self.chunk().emit_op(OpCode::Nil);
                    }
                }
                // Declared after the initializer so `local x = x` reads the outer x.
                let slot = self.current().declare_local(name);
                self.chunk().emit_with(OpCode::SetLocal, slot);
            }
            Stat::Assign { name, value } => {
                self.compile_expr(value)?;
                self.compile_store(name)?;
            }
            Stat::Function { name, body } => {
                self.compile_function(body)?;
                self.compile_store(name)?;
            }
            Stat::Call(expr) => match expr {
                Expr::Call(callee, args) => self.compile_call(callee, args, ResultMode::Discard)?,
                _ => return Err("expression statement is not a call".to_string()),
            },
            Stat::If {
                cond,
                then_block,
                else_block,
            } => {
                self.compile_expr(cond)?;
                let jump_false = self.chunk().emit_with(OpCode::JumpIfFalse, 0);
                self.compile_block(then_block)?;
                match else_block {
                    Some(else_block) => {
                        let jump_end = self.chunk().emit_with(OpCode::Jump, 0);
                        self.chunk().patch_jump(jump_false);
                        self.compile_block(else_block)?;
                        self.chunk().patch_jump(jump_end);
                    }
                    None => self.chunk().patch_jump(jump_false),
                }
            }
        }
        Ok(())
    }

    fn compile_store(&mut self, name: &str) -> Result<(), String> {
        match self.resolve_current(name) {
            Resolved::Local(slot) => {
                self.chunk().emit_with(OpCode::SetLocal, slot);
            }
            Resolved::Upvalue(_) => {
                return Err(format!(
                    "cannot assign to captured variable '{}'; upvalues are captured by value",
                    name
                ))
            }
            Resolved::Global => {
                let idx = self.chunk().add_name(name);
                self.chunk().emit_with(OpCode::SetGlobal, idx);
            }
        }
        Ok(())
    }

    fn compile_return(&mut self, values: &[Expr]) -> Result<(), String> {
        let mut last_multi = false;
        for (i, value) in values.iter().enumerate() {
            if i + 1 == values.len() && value.is_multi() {
                self.compile_multi(value)?;
                last_multi = true;
            } else {
                self.compile_expr(value)?;
            }
        }
        let fixed = values.len() as u32 - last_multi as u32;
        self.chunk().emit(Instruction::with_two_operands(
            OpCode::Return,
            fixed,
            last_multi as u32,
        ));
        Ok(())
    }

    fn compile_function(&mut self, body: &FunctionBody) -> Result<(), String> {
        let mut state = FunctionState::new(body.name.clone(), body.is_vararg);
        state.block_marks.push(0);
        for param in &body.params {
            state.declare_local(param);
        }
        state.num_params = body.params.len() as u32;
        self.functions.push(state);
        self.compile_block(&body.block)?;
        self.emit_final_return();
        let proto = self.finish_function()?;
        let parent = self.current();
        parent.protos.push(proto);
        let idx = (parent.protos.len() - 1) as u32;
        self.chunk().emit_with(OpCode::Closure, idx);
        Ok(())
    }

    /// Compile an expression that may leave several values in one slot.
    fn compile_multi(&mut self, expr: &Expr) -> Result<(), String> {
        match expr {
            Expr::Call(callee, args) => self.compile_call(callee, args, ResultMode::Multi),
            Expr::Vararg => self.compile_vararg(ResultMode::Multi),
            other => self.compile_expr(other),
        }
    }

    fn compile_vararg(&mut self, mode: ResultMode) -> Result<(), String> {
        if !self.current().is_vararg {
            return Err("cannot use '...' outside a vararg function".to_string());
        }
        self.chunk().emit_with(OpCode::Vararg, mode.encode());
        Ok(())
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], mode: ResultMode) -> Result<(), String> {
        self.compile_expr(callee)?;
        let mut last_is_multi = false;
        for (i, arg) in args.iter().enumerate() {
            if i + 1 == args.len() && arg.is_multi() {
                self.compile_multi(arg)?;
                last_is_multi = true;
            } else {
                self.compile_expr(arg)?;
            }
        }
        let fixed = args.len() as u32 - last_is_multi as u32;
        let flags = CallFlags {
            last_is_multi,
            result_mode: mode,
        };
        self.chunk().emit(Instruction::with_two_operands(
            OpCode::Call,
            fixed,
            flags.encode(),
        ));
        Ok(())
    }

    /// Compile an expression that leaves exactly one value.
    fn compile_expr(&mut self, expr: &Expr) -> Result<(), String> {
        match expr {
            Expr::Nil => {
                self.chunk().emit_op(OpCode::Nil);
            }
            Expr::True => {
                self.chunk().emit_op(OpCode::True);
            }
            Expr::False => {
                self.chunk().emit_op(OpCode::False);
            }
            Expr::Number(n) => {
                let idx = self.chunk().add_constant(Value::Number(*n));
                self.chunk().emit_with(OpCode::Constant, idx);
            }
            Expr::Str(s) => {
                let idx = self.chunk().add_constant(Value::from(s.as_str()));
                self.chunk().emit_with(OpCode::Constant, idx);
            }
            Expr::Vararg => self.compile_vararg(ResultMode::Single)?,
            Expr::Function(body) => self.compile_function(body)?,
            Expr::Name(name) => match self.resolve_current(name) {
                Resolved::Local(slot) => {
                    self.chunk().emit_with(OpCode::GetLocal, slot);
                }
                Resolved::Upvalue(idx) => {
                    self.chunk().emit_with(OpCode::GetUpvalue, idx);
                }
                Resolved::Global => {
                    let idx = self.chunk().add_name(name);
                    self.chunk().emit_with(OpCode::GetGlobal, idx);
                }
            },
            Expr::Paren(inner) => self.compile_expr(inner)?,
            Expr::Field(obj, field) => {
                self.compile_expr(obj)?;
                let idx = self.chunk().add_name(field);
                self.chunk().emit_with(OpCode::GetField, idx);
            }
            Expr::Call(callee, args) => self.compile_call(callee, args, ResultMode::Single)?,
            Expr::Not(inner) => {
                self.compile_expr(inner)?;
                self.chunk().emit_op(OpCode::Not);
            }
            Expr::Concat(lhs, rhs) => self.compile_binary(lhs, rhs, OpCode::Concat)?,
            Expr::Equal(lhs, rhs) => self.compile_binary(lhs, rhs, OpCode::Equal)?,
            Expr::NotEqual(lhs, rhs) => self.compile_binary(lhs, rhs, OpCode::NotEqual)?,
        }
        Ok(())
    }

    fn compile_binary(&mut self, lhs: &Expr, rhs: &Expr, op: OpCode) -> Result<(), String> {
        self.compile_expr(lhs)?;
        self.compile_expr(rhs)?;
        self.chunk().emit_op(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> Rc<Prototype> {
        SnippetCompiler.compile(source, "=test").unwrap()
    }

    #[test]
    fn test_globals_and_locals() {
        let proto = compile("local x = 1 y = x");
        let ops: Vec<OpCode> = proto.chunk.code.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![
                OpCode::Constant,
                OpCode::SetLocal,
                OpCode::GetLocal,
                OpCode::SetGlobal,
                OpCode::Return
            ]
        );
        assert_eq!(proto.num_locals(), 1);
        assert_eq!(&*proto.source, "=test");
    }

    #[test]
    fn test_upvalue_capture_through_two_levels() {
        let proto = compile("local a = 1 return function() return function() return a end end");
        let middle = &proto.protos[0];
        let inner = &middle.protos[0];
        assert_eq!(middle.upvalue_descs, vec![UpvalueDesc::Local(0)]);
        assert_eq!(inner.upvalue_descs, vec![UpvalueDesc::Upvalue(0)]);
    }

    #[test]
    fn test_assigning_captured_variable_is_rejected() {
        let err = SnippetCompiler
            .compile("local a = 1 f = function() a = 2 end", "=test")
            .unwrap_err();
        assert!(err.contains("cannot assign to captured variable 'a'"));
    }

    #[test]
    fn test_vararg_outside_vararg_function() {
        let err = SnippetCompiler
            .compile("f = function() return ... end", "=test")
            .unwrap_err();
        assert!(err.contains("'...'"));
    }

    #[test]
    fn test_forwarding_call_is_multi() {
        let proto = compile("return wrapped_func(...)");
        let call = proto
            .chunk
            .code
            .iter()
            .find(|i| i.op == OpCode::Call)
            .unwrap();
        let flags = CallFlags::decode(call.operand2);
        assert_eq!(call.operand, 0);
        assert!(flags.last_is_multi);
        assert_eq!(flags.result_mode, ResultMode::Multi);
        assert!(proto.disassemble("forward").contains("GetGlobal  \"wrapped_func\""));
    }

    #[test]
    fn test_block_scoping_hides_inner_locals() {
        let proto = compile("if true then local x = 1 end return x");
        assert!(proto
            .chunk
            .code
            .iter()
            .any(|i| i.op == OpCode::GetGlobal));
    }
}
