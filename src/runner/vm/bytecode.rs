//! Bytecode instruction set and function prototypes.
//!
//! Defines a flat, stack-based bytecode IR that the compiler emits
//! and the interpreter executes.

use std::cell::Cell;
use std::rc::Rc;

use crate::runner::ds::value::Value;
use crate::runner::vm::capability::Capability;

/// Bytecode opcodes for the stack-based interpreter.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum OpCode {
    // ── Constants & Literals ──────────────────────────────────
    /// Push a constant from the constant pool onto the stack.
    Constant,
    /// Push `nil` onto the stack.
    Nil,
    /// Push `true` onto the stack.
    True,
    /// Push `false` onto the stack.
    False,

    // ── Variables ────────────────────────────────────────────
    /// Get a local slot by index (operand: local slot index).
    GetLocal,
    /// Pop into a local slot (operand: local slot index).
    SetLocal,
    /// Push a captured value (operand: upvalue index).
    GetUpvalue,
    /// Look a name up in the function environment (operand: name index).
    GetGlobal,
    /// Pop into the function environment (operand: name index).
    SetGlobal,
    /// Pop a table, push table.name (operand: name index).
    GetField,
    /// Push the extra arguments (operand: result mode).
    Vararg,

    // ── Operators ────────────────────────────────────────────
    /// Pop two values, push their string concatenation.
    Concat,
    /// Pop two values, push `a == b`.
    Equal,
    /// Pop two values, push `a ~= b`.
    NotEqual,
    /// Logical NOT.
    Not,

    // ── Control Flow ─────────────────────────────────────────
    /// Unconditional jump (operand: absolute offset).
    Jump,
    /// Jump if top of stack is falsy (operand: absolute offset). Pops the value.
    JumpIfFalse,

    // ── Functions ────────────────────────────────────────────
    /// Instantiate a nested prototype (operand: index into `protos`).
    Closure,
    /// Call a function. Operand: fixed argument count.
    /// Operand2: [`CallFlags`] bits.
    /// Stack: [callee, arg_1, ..., arg_n]
    Call,
    /// Return from the current function. Operand: fixed value count.
    /// Operand2: 1 when the last value is a multi-value slot.
    Return,

    // ── Stack manipulation ───────────────────────────────────
    /// Pop and discard the top of the stack.
    Pop,
}

/// How many results a call or vararg expression leaves on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    Discard,
    Single,
    Multi,
}

impl ResultMode {
    pub fn encode(self) -> u32 {
        match self {
            ResultMode::Discard => 0,
            ResultMode::Single => 1,
            ResultMode::Multi => 2,
        }
    }

    pub fn decode(bits: u32) -> ResultMode {
        match bits & 0b11 {
            0 => ResultMode::Discard,
            1 => ResultMode::Single,
            _ => ResultMode::Multi,
        }
    }
}

/// Packed second operand of [`OpCode::Call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFlags {
    pub last_is_multi: bool,
    pub result_mode: ResultMode,
}

impl CallFlags {
    pub fn encode(self) -> u32 {
        (self.result_mode.encode() << 1) | self.last_is_multi as u32
    }

    pub fn decode(bits: u32) -> CallFlags {
        CallFlags {
            last_is_multi: bits & 1 == 1,
            result_mode: ResultMode::decode(bits >> 1),
        }
    }
}

/// A single bytecode instruction with optional operands.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: OpCode,
    pub operand: u32,
    pub operand2: u32,
}

impl Instruction {
    pub fn simple(op: OpCode) -> Self {
        Instruction { op, operand: 0, operand2: 0 }
    }

    pub fn with_operand(op: OpCode, operand: u32) -> Self {
        Instruction { op, operand, operand2: 0 }
    }

    pub fn with_two_operands(op: OpCode, operand: u32, operand2: u32) -> Self {
        Instruction { op, operand, operand2 }
    }
}

/// Where a closure captures each of its upvalues from, relative to the
/// enclosing function at instantiation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueDesc {
    Local(u32),
    Upvalue(u32),
}

/// A compiled chunk of bytecode with its constant pool.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<Instruction>,
    /// Constant pool of literal values.
    pub constants: Vec<Value>,
    /// Deduplicated name table for global and field names.
    pub names: Vec<String>,
    /// Local slots table. Each entry stores an index into `names`.
    pub locals: Vec<u32>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    /// Emit an instruction and return its index.
    pub fn emit(&mut self, instr: Instruction) -> usize {
        let idx = self.code.len();
        self.code.push(instr);
        idx
    }

    pub fn emit_op(&mut self, op: OpCode) -> usize {
        self.emit(Instruction::simple(op))
    }

    pub fn emit_with(&mut self, op: OpCode, operand: u32) -> usize {
        self.emit(Instruction::with_operand(op, operand))
    }

    pub fn add_constant(&mut self, value: Value) -> u32 {
        let idx = self.constants.len();
        self.constants.push(value);
        idx as u32
    }

    /// Add a name to the deduplicated name table and return its index.
    pub fn add_name(&mut self, s: &str) -> u32 {
        for (i, existing) in self.names.iter().enumerate() {
            if existing == s {
                return i as u32;
            }
        }
        let idx = self.names.len();
        self.names.push(s.to_string());
        idx as u32
    }

    /// Add a local slot for a name index and return its slot index.
    pub fn add_local(&mut self, name_idx: u32) -> u32 {
        let slot = self.locals.len();
        self.locals.push(name_idx);
        slot as u32
    }

    #[inline]
    pub fn get_local_name(&self, slot: u32) -> &str {
        let name_idx = self.locals[slot as usize];
        self.get_name(name_idx)
    }

    #[inline]
    pub fn get_name(&self, idx: u32) -> &str {
        &self.names[idx as usize]
    }

    /// Patch a jump instruction's operand to point to the current code position.
    pub fn patch_jump(&mut self, jump_idx: usize) {
        self.code[jump_idx].operand = self.code.len() as u32;
    }

    pub fn current_pos(&self) -> usize {
        self.code.len()
    }
}

/// An executable function body produced by the compiler.
#[derive(Debug)]
pub struct Prototype {
    pub chunk: Chunk,
    pub protos: Vec<Rc<Prototype>>,
    pub upvalue_descs: Vec<UpvalueDesc>,
    pub num_params: u32,
    pub is_vararg: bool,
    /// Source tag of the chunk this prototype was compiled from.
    pub source: Rc<str>,
    pub debug_name: Option<String>,
    /// Capability stamped on the prototype and, recursively, its children.
    pub capability: Cell<Capability>,
}

impl Prototype {
    pub fn num_locals(&self) -> usize {
        self.chunk.locals.len()
    }

    pub fn nupvalues(&self) -> usize {
        self.upvalue_descs.len()
    }

    /// Disassemble the prototype and its children for debugging.
    pub fn disassemble(&self, name: &str) -> String {
        let chunk = &self.chunk;
        let mut out = format!("== {} ({}) ==\n", name, self.source);
        for (i, instr) in chunk.code.iter().enumerate() {
            out.push_str(&format!("{:04}  {:?}", i, instr.op));
            match instr.op {
                OpCode::Constant => {
                    let val = &chunk.constants[instr.operand as usize];
                    out.push_str(&format!("  {} ({:?})", instr.operand, val));
                }
                OpCode::GetGlobal | OpCode::SetGlobal | OpCode::GetField => {
                    out.push_str(&format!("  \"{}\"", chunk.get_name(instr.operand)));
                }
                OpCode::GetLocal | OpCode::SetLocal => {
                    let name_str = chunk.get_local_name(instr.operand);
                    out.push_str(&format!("  slot={} \"{}\"", instr.operand, name_str));
                }
                OpCode::GetUpvalue => {
                    out.push_str(&format!("  upvalue={}", instr.operand));
                }
                OpCode::Jump | OpCode::JumpIfFalse => {
                    out.push_str(&format!("  -> {:04}", instr.operand));
                }
                OpCode::Call => {
                    let flags = CallFlags::decode(instr.operand2);
                    out.push_str(&format!(
                        "  argc={}{} results={:?}",
                        instr.operand,
                        if flags.last_is_multi { "+" } else { "" },
                        flags.result_mode
                    ));
                }
                OpCode::Return => {
                    out.push_str(&format!(
                        "  count={}{}",
                        instr.operand,
                        if instr.operand2 == 1 { "+" } else { "" }
                    ));
                }
                OpCode::Closure => {
                    out.push_str(&format!("  proto={}", instr.operand));
                }
                _ => {}
            }
            out.push('\n');
        }
        for (i, child) in self.protos.iter().enumerate() {
            out.push_str(&child.disassemble(&format!("{}/{}", name, i)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_flags_pack() {
        let flags = CallFlags {
            last_is_multi: true,
            result_mode: ResultMode::Single,
        };
        assert_eq!(CallFlags::decode(flags.encode()), flags);
        let flags = CallFlags {
            last_is_multi: false,
            result_mode: ResultMode::Discard,
        };
        assert_eq!(CallFlags::decode(flags.encode()), flags);
    }

    #[test]
    fn test_names_are_deduplicated() {
        let mut chunk = Chunk::new();
        assert_eq!(chunk.add_name("print"), 0);
        assert_eq!(chunk.add_name("x"), 1);
        assert_eq!(chunk.add_name("print"), 0);
    }
}
