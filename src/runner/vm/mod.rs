//! Bytecode, the snippet compiler and the interpreter loop.

pub mod bytecode;
pub mod capability;
pub mod compiler;
pub mod interpreter;
