//! Global constant propagation.
//!
//! A quadruplet operand naming a scalar variable is rewritten to a literal
//! when every definition of that variable reaching the statement is a move
//! of one and the same constant. Destination slots are never touched, so
//! reaching-definition facts stay valid after the rewrite.

use tracing::debug;

use crate::ir::cfg::{MethodId, MethodIr, ProgramIr, StmtId, StmtRef};
use crate::ir::name::{Name, NameId};
use crate::ir::statement::{LirStatement, QuadOp};
use crate::passes::reaching_defs::{DefId, ReachingDefs};

/// Rewrite agreeing constant uses across the whole program. Returns the
/// number of operand slots rewritten.
pub fn propagate_constants(program: &mut ProgramIr, rd: &ReachingDefs) -> usize {
    let mut rewrites = 0;
    for mi in 0..program.methods.len() {
        let mid = MethodId(mi as u32);
        if !program.is_analyzed(mid) {
            continue;
        }

        // (statement index, rewrite arg2 rather than arg1, value)
        let mut planned: Vec<(u32, bool, i64)> = Vec::new();
        let method = program.method(mid);
        for (si, stmt) in method.stmts.iter().enumerate() {
            let LirStatement::Quad { arg1, arg2, .. } = stmt else { continue };
            let site = StmtRef { method: mid, stmt: StmtId(si as u32) };
            if let Some(v) = agreed_constant(program, rd, method, *arg1, site) {
                planned.push((si as u32, false, v));
            }
            if let Some(arg2) = arg2 {
                if let Some(v) = agreed_constant(program, rd, method, *arg2, site) {
                    planned.push((si as u32, true, v));
                }
            }
        }

        let method = &mut program.methods[mi];
        for (si, is_arg2, value) in planned {
            let slot = method.names.alloc(Name::Constant(value));
            if let LirStatement::Quad { arg1, arg2, .. } = &mut method.stmts[si as usize] {
                if is_arg2 {
                    *arg2 = Some(slot);
                } else {
                    *arg1 = slot;
                }
            }
            rewrites += 1;
        }
    }
    debug!(rewrites, "constant propagation done");
    rewrites
}

/// The constant value all reaching definitions of this operand agree on,
/// if the operand is a scalar variable and they do.
fn agreed_constant(
    program: &ProgramIr,
    rd: &ReachingDefs,
    method: &MethodIr,
    slot: NameId,
    at: StmtRef,
) -> Option<i64> {
    let name = method.names.name(slot);
    if !matches!(name, Name::Var { .. }) {
        return None;
    }
    let reaching = rd.reaching_defs_of(name, at);
    if reaching.is_empty() {
        return None;
    }
    let mut agreed: Option<i64> = None;
    for def in reaching {
        let value = constant_moved_by(program, rd, def)?;
        match agreed {
            None => agreed = Some(value),
            Some(prev) if prev == value => {}
            Some(_) => return None,
        }
    }
    agreed
}

/// The literal a definition moves, if it is a plain constant move.
fn constant_moved_by(program: &ProgramIr, rd: &ReachingDefs, def: DefId) -> Option<i64> {
    let site = rd.def_site(def);
    let method = program.method(site.method);
    match method.stmt(site.stmt) {
        LirStatement::Quad { op: QuadOp::Move, arg1, arg2: None, .. } => {
            match method.names.name(*arg1) {
                Name::Constant(v) => Some(*v),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cfg::build_program_cfg;
    use crate::ir::name::Label;
    use crate::ir::statement::JumpCond;

    fn konst(m: &mut MethodIr, v: i64) -> NameId {
        m.names.alloc(Name::Constant(v))
    }

    fn local(m: &mut MethodIr, id: &str) -> NameId {
        m.names.alloc(Name::local(id, 0))
    }

    fn assign_const(m: &mut MethodIr, id: &str, v: i64) {
        let src = konst(m, v);
        let dest = local(m, id);
        m.stmts.push(LirStatement::Quad { dest: Some(dest), op: QuadOp::Move, arg1: src, arg2: None });
    }

    fn program_of(main: MethodIr) -> ProgramIr {
        let mut program = ProgramIr::new();
        program.methods.push(main);
        build_program_cfg(&mut program);
        program
    }

    /// cmp c, 1; jne L0; x = <a>; jmp L1; L0: x = <b>; L1: y = x + 1
    fn diamond(a: i64, b: i64) -> ProgramIr {
        let mut main = MethodIr::new("main");
        let c = local(&mut main, "c");
        let one = konst(&mut main, 1);
        main.stmts.push(LirStatement::Cmp { arg1: c, arg2: one });
        main.stmts.push(LirStatement::Jump { cond: JumpCond::Neq, target: Label::Local(0) });
        assign_const(&mut main, "x", a);
        main.stmts.push(LirStatement::Jump { cond: JumpCond::Always, target: Label::Local(1) });
        main.stmts.push(LirStatement::Label(Label::Local(0)));
        assign_const(&mut main, "x", b);
        main.stmts.push(LirStatement::Label(Label::Local(1)));
        let x = local(&mut main, "x");
        let one = konst(&mut main, 1);
        let y = local(&mut main, "y");
        main.stmts.push(LirStatement::Quad {
            dest: Some(y),
            op: QuadOp::Add,
            arg1: x,
            arg2: Some(one),
        });
        program_of(main)
    }

    fn use_arg1(program: &ProgramIr, stmt: usize) -> Name {
        let main = program.method_by_name("main").unwrap();
        match &main.stmts[stmt] {
            LirStatement::Quad { arg1, .. } => main.names.name(*arg1).clone(),
            other => panic!("expected quad, got {other:?}"),
        }
    }

    #[test]
    fn rewrites_use_when_all_reaching_defs_agree() {
        let mut program = diamond(5, 5);
        let rd = ReachingDefs::analyze(&program);
        let rewrites = propagate_constants(&mut program, &rd);
        assert_eq!(rewrites, 1);
        assert_eq!(use_arg1(&program, 7), Name::Constant(5));
    }

    #[test]
    fn no_rewrite_when_reaching_defs_disagree() {
        let mut program = diamond(5, 6);
        let rd = ReachingDefs::analyze(&program);
        assert_eq!(propagate_constants(&mut program, &rd), 0);
        assert_eq!(use_arg1(&program, 7), Name::local("x", 0));
    }

    #[test]
    fn only_the_reaching_def_counts() {
        // x = 5; | x = 7; | y = x + 0: only the second def reaches.
        let mut main = MethodIr::new("main");
        assign_const(&mut main, "x", 5);
        main.stmts.push(LirStatement::Label(Label::Local(0)));
        assign_const(&mut main, "x", 7);
        main.stmts.push(LirStatement::Label(Label::Local(1)));
        let x = local(&mut main, "x");
        let zero = konst(&mut main, 0);
        let y = local(&mut main, "y");
        main.stmts.push(LirStatement::Quad {
            dest: Some(y),
            op: QuadOp::Add,
            arg1: x,
            arg2: Some(zero),
        });
        let mut program = program_of(main);

        let rd = ReachingDefs::analyze(&program);
        assert_eq!(propagate_constants(&mut program, &rd), 1);
        assert_eq!(use_arg1(&program, 4), Name::Constant(7));
    }

    #[test]
    fn call_blocks_propagation_of_globals() {
        // g = 5; call f; y = g + 1: the call invalidates g's def.
        let mut main = MethodIr::new("main");
        let five = konst(&mut main, 5);
        let g = main.names.alloc(Name::global("g"));
        main.stmts.push(LirStatement::Quad { dest: Some(g), op: QuadOp::Move, arg1: five, arg2: None });
        main.stmts.push(LirStatement::Call { method: "f".into() });
        let g_use = main.names.alloc(Name::global("g"));
        let one = konst(&mut main, 1);
        let y = local(&mut main, "y");
        main.stmts.push(LirStatement::Quad {
            dest: Some(y),
            op: QuadOp::Add,
            arg1: g_use,
            arg2: Some(one),
        });
        let mut program = program_of(main);

        let rd = ReachingDefs::analyze(&program);
        assert_eq!(propagate_constants(&mut program, &rd), 0);
        assert_eq!(use_arg1(&program, 2), Name::global("g"));
    }

    #[test]
    fn non_move_defs_block_propagation() {
        // x = a + b; y = x: the def is not a constant move.
        let mut main = MethodIr::new("main");
        let a = local(&mut main, "a");
        let b = local(&mut main, "b");
        let x = local(&mut main, "x");
        main.stmts.push(LirStatement::Quad { dest: Some(x), op: QuadOp::Add, arg1: a, arg2: Some(b) });
        let x_use = local(&mut main, "x");
        let y = local(&mut main, "y");
        main.stmts.push(LirStatement::Quad { dest: Some(y), op: QuadOp::Move, arg1: x_use, arg2: None });
        let mut program = program_of(main);

        let rd = ReachingDefs::analyze(&program);
        assert_eq!(propagate_constants(&mut program, &rd), 0);
    }

    #[test]
    fn dest_slots_are_never_rewritten() {
        // x = 5; x = x + 1: the use is rewritten, the dest is not.
        let mut main = MethodIr::new("main");
        assign_const(&mut main, "x", 5);
        main.stmts.push(LirStatement::Label(Label::Local(0)));
        let x_use = local(&mut main, "x");
        let one = konst(&mut main, 1);
        let x_dest = local(&mut main, "x");
        main.stmts.push(LirStatement::Quad {
            dest: Some(x_dest),
            op: QuadOp::Add,
            arg1: x_use,
            arg2: Some(one),
        });
        let mut program = program_of(main);

        let rd = ReachingDefs::analyze(&program);
        assert_eq!(propagate_constants(&mut program, &rd), 1);
        let main = program.method_by_name("main").unwrap();
        match &main.stmts[2] {
            LirStatement::Quad { dest: Some(d), arg1, .. } => {
                assert_eq!(main.names.name(*d), &Name::local("x", 0));
                assert_eq!(main.names.name(*arg1), &Name::Constant(5));
            }
            other => panic!("expected quad, got {other:?}"),
        }
    }
}
