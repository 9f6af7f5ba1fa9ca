//! Syntax tree for the snippet language.

use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stats: Vec<Stat>,
    /// Values of a trailing `return`, if present.
    pub ret: Option<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stat {
    Local {
        name: String,
        value: Option<Expr>,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Function {
        name: String,
        body: Rc<FunctionBody>,
    },
    /// An expression statement; always a call.
    Call(Expr),
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub block: Block,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Nil,
    True,
    False,
    Number(f64),
    Str(String),
    Vararg,
    Function(Rc<FunctionBody>),
    Name(String),
    /// Parenthesised expression; truncates multiple results to one.
    Paren(Box<Expr>),
    Field(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    Not(Box<Expr>),
    Concat(Box<Expr>, Box<Expr>),
    Equal(Box<Expr>, Box<Expr>),
    NotEqual(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Calls and `...` can produce any number of values.
    pub fn is_multi(&self) -> bool {
        matches!(self, Expr::Call(..) | Expr::Vararg)
    }
}
