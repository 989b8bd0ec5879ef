pub mod cfg; // basic blocks, per-method and whole-program IR containers
pub mod lowering; // AST flattening into LIR
pub mod name; // operand names and the per-method slot table
pub mod statement; // LIR statement forms

pub use cfg::{build_program_cfg, BlockId, BlockRef, CfgBlock, MethodId, MethodIr, ProgramIr, StmtId, StmtRef};
pub use lowering::flatten_program;
pub use name::{Label, LoopId, Name, NameId, NameTable, Register};
pub use statement::{JumpCond, LirStatement, QuadOp};
