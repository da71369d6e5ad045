//! Syntax tree of a compiled script.
//!
//! Trees are immutable once parsed and shared through `Arc`, so one
//! compiled chunk can be cached and run by any number of invocations.

use bytes::Bytes;
use std::sync::Arc;

pub type Block = Vec<Stmt>;

/// A compiled script or library.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub body: Block,
}

/// Parameters and body of a function literal.
#[derive(Debug)]
pub struct FuncBody {
    pub params: Vec<String>,
    pub variadic: bool,
    pub body: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Nil,
    True,
    False,
    Number(f64),
    Str(Bytes),
    VarArgs,
    Name(String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Method(Box<Expr>, String, Vec<Expr>),
    Function(Arc<FuncBody>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Table(Vec<Field>),
    /// A parenthesized expression; truncates multiple results to one.
    Paren(Box<Expr>),
}

impl Expr {
    /// Calls and `...` may produce several values in the last list position.
    pub fn is_multi(&self) -> bool {
        matches!(self, Expr::Call(..) | Expr::Method(..) | Expr::VarArgs)
    }
}

#[derive(Debug, Clone)]
pub enum Field {
    Positional(Expr),
    Keyed(Expr, Expr),
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Local(Vec<String>, Vec<Expr>),
    Assign(Vec<Expr>, Vec<Expr>),
    Call(Expr),
    Do(Block),
    While(Expr, Block),
    Repeat(Block, Expr),
    If(Vec<(Expr, Block)>, Option<Block>),
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        vars: Vec<String>,
        exprs: Vec<Expr>,
        body: Block,
    },
    /// `function a.b.c()` / `function a:m()`; the target is a Name or Index.
    Function(Expr, Arc<FuncBody>),
    LocalFunction(String, Arc<FuncBody>),
    Return(Vec<Expr>),
    Break,
}
