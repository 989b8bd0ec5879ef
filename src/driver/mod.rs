//! Compile entry points.
//!
//! The pipeline: flatten the class to LIR, partition into CFGs, run the
//! reaching-definitions fixed point, then the gated phases (constant
//! propagation, loop-invariant detection, register allocation), and render
//! assembly. One reaching-definitions analysis serves every downstream
//! phase; constant propagation leaves definition slots untouched, so the
//! facts stay valid across the whole run.

use std::io::Write;

use tracing::debug;

use crate::backend::emit::emit_program;
use crate::backend::regalloc::allocate_program;
use crate::common::error::{CompileError, Result};
use crate::frontend::ast::ClassDecl;
use crate::ir::cfg::build_program_cfg;
use crate::ir::lowering::flatten_program;
use crate::passes::constant_prop::propagate_constants;
use crate::passes::loop_invariants::LoopInvariants;
use crate::passes::reaching_defs::ReachingDefs;

/// Phase toggles. The analyses always run; these gate the transformations
/// built on top of them.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub constant_propagation: bool,
    pub loop_invariants: bool,
    pub register_allocation: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            constant_propagation: true,
            loop_invariants: true,
            register_allocation: true,
        }
    }
}

/// Compile a class to assembly text with the default options.
pub fn compile(class: &ClassDecl) -> Result<String> {
    compile_with(class, Options::default())
}

/// Compile a class to assembly text.
pub fn compile_with(class: &ClassDecl, options: Options) -> Result<String> {
    let mut out = Vec::new();
    compile_to(class, options, &mut out)?;
    Ok(String::from_utf8(out).expect("emitted assembly is valid UTF-8"))
}

/// Compile a class and write the assembly to `out`.
pub fn compile_to<W: Write>(class: &ClassDecl, options: Options, out: &mut W) -> Result<()> {
    if class.name != "Program" {
        return Err(CompileError::WrongClassName(class.name.clone()));
    }

    let mut program = flatten_program(class)?;
    build_program_cfg(&mut program);
    debug!(methods = program.methods.len(), "flattened");

    let rd = ReachingDefs::analyze(&program);
    debug!(defs = rd.num_defs(), "reaching definitions converged");

    if options.constant_propagation {
        let rewrites = propagate_constants(&mut program, &rd);
        debug!(rewrites, "constant propagation");
    }
    if options.loop_invariants {
        let invariants = LoopInvariants::analyze(&program, &rd);
        debug!(invariant = invariants.num_invariant(), "loop-invariant detection");
    }
    if options.register_allocation {
        allocate_program(&mut program, &rd);
    }

    emit_program(&program, out)?;
    Ok(())
}
