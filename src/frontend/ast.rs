//! Typed AST handed to the back end.
//!
//! The scanner, parser, and semantic checker live outside this crate; what
//! arrives here is assumed well-formed and type-correct (one top-level
//! class, declared-before-use names, int/bool-correct operators). The
//! flattener turns this tree into flat IR without re-checking any of it.

/// Declared types. Arrays are always arrays of `Int` at class level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Int,
    Boolean,
    Void,
}

/// The single top-level class.
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
}

/// One class-level field: a global scalar, or a global array when `length`
/// is present.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Type,
    pub length: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub return_type: Type,
    pub params: Vec<Param>,
    pub body: Block,
}

/// A braced block: local declarations then statements.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub decls: Vec<VarDecl>,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
}

/// An assignable place: a scalar or an indexed array field.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: String,
    pub index: Option<Box<Expr>>,
}

impl Location {
    pub fn scalar(name: &str) -> Location {
        Location { name: name.to_string(), index: None }
    }

    pub fn indexed(name: &str, index: Expr) -> Location {
        Location { name: name.to_string(), index: Some(Box::new(index)) }
    }
}

#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign { target: Location, value: Expr },
    If { cond: Expr, then_block: Block, else_block: Option<Block> },
    /// `for v = init, end { body }`: v runs from init up to (excluding)
    /// end, incremented by one each iteration.
    For { var: String, init: Expr, end: Expr, body: Block },
    Call(MethodCall),
    Return(Option<Expr>),
    Break,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLiteral(i64),
    BoolLiteral(bool),
    Location(Location),
    Call(MethodCall),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
}

impl Expr {
    pub fn int(v: i64) -> Expr {
        Expr::IntLiteral(v)
    }

    pub fn var(name: &str) -> Expr {
        Expr::Location(Location::scalar(name))
    }

    pub fn index(name: &str, index: Expr) -> Expr {
        Expr::Location(Location::indexed(name, index))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Expr {
        Expr::Unary { op, expr: Box::new(expr) }
    }

    pub fn call(method: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(MethodCall { method: method.to_string(), args })
    }
}

impl Stmt {
    pub fn assign(target: Location, value: Expr) -> Stmt {
        Stmt::Assign { target, value }
    }
}
