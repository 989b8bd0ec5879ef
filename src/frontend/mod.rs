pub mod ast; // typed AST handed to the flattener

pub use ast::{Block, ClassDecl, Expr, FieldDecl, Location, MethodCall, MethodDecl, Param, Stmt, Type, VarDecl};
