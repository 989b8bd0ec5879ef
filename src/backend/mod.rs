//! Code generation: webs, register assignment, assembly emission.

pub mod emit; // AT&T x86-64 rendering of the optimized IR
pub mod regalloc; // linear scan over webs
pub mod web; // def-use webs, the allocatable units

pub use emit::emit_program;
pub use regalloc::{allocate_program, assign_registers};
pub use web::{build_method_webs, Web};
