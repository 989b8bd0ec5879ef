//! Loop-invariant statement detection.
//!
//! Loop membership comes straight from the structured labels the flattener
//! emits: a walk over each method's statement list pushes on `.forN.init`
//! and pops on `.forN.end`, so every statement knows the full stack of
//! loops enclosing it. A quadruplet inside one or more loops is a candidate
//! for each enclosing loop separately; statements that touch a physical
//! register are never candidates.
//!
//! A candidate is invariant with respect to a loop when every source
//! operand is a constant, has no definitions anywhere, or has all its
//! reaching definitions outside that loop's body. Array operands require
//! the same of their index operand independently. The result is a
//! classification only; no code motion is performed here.

use tracing::debug;

use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::ir::cfg::{MethodId, MethodIr, ProgramIr, StmtId, StmtRef};
use crate::ir::name::{Label, LoopId, Name};
use crate::ir::statement::LirStatement;
use crate::passes::reaching_defs::ReachingDefs;

pub struct LoopInvariants {
    /// Statements lexically inside each loop's body, all statement kinds.
    members: FxHashMap<(MethodId, LoopId), FxHashSet<StmtRef>>,
    invariant: FxHashSet<(StmtRef, LoopId)>,
}

impl LoopInvariants {
    pub fn analyze(program: &ProgramIr, rd: &ReachingDefs) -> LoopInvariants {
        let mut members: FxHashMap<(MethodId, LoopId), FxHashSet<StmtRef>> = FxHashMap::default();
        let mut candidates: Vec<(StmtRef, LoopId)> = Vec::new();

        for (mi, method) in program.methods.iter().enumerate() {
            let mid = MethodId(mi as u32);
            if !program.is_analyzed(mid) {
                continue;
            }
            let mut active: Vec<LoopId> = Vec::new();
            for (si, stmt) in method.stmts.iter().enumerate() {
                match stmt {
                    LirStatement::Label(Label::ForInit(id)) => active.push(*id),
                    LirStatement::Label(Label::ForEnd(id)) => {
                        let popped = active.pop();
                        assert_eq!(popped, Some(*id), "unbalanced loop labels in '{}'", method.name);
                    }
                    _ if !active.is_empty() => {
                        let site = StmtRef { method: mid, stmt: StmtId(si as u32) };
                        let candidate = matches!(stmt, LirStatement::Quad { .. })
                            && !touches_register(method, stmt);
                        for &loop_id in &active {
                            members.entry((mid, loop_id)).or_default().insert(site);
                            if candidate {
                                candidates.push((site, loop_id));
                            }
                        }
                    }
                    _ => {}
                }
            }
            assert!(active.is_empty(), "unterminated loop in '{}'", method.name);
        }

        let mut invariant: FxHashSet<(StmtRef, LoopId)> = FxHashSet::default();
        for &(site, loop_id) in &candidates {
            let body = &members[&(site.method, loop_id)];
            if stmt_is_invariant(program, rd, body, site) {
                invariant.insert((site, loop_id));
            }
        }

        debug!(
            loops = members.len(),
            invariant = invariant.len(),
            "loop-invariant detection done"
        );
        LoopInvariants { members, invariant }
    }

    pub fn is_invariant(&self, stmt: StmtRef, loop_id: LoopId) -> bool {
        self.invariant.contains(&(stmt, loop_id))
    }

    pub fn invariant_pairs(&self) -> impl Iterator<Item = (StmtRef, LoopId)> + '_ {
        self.invariant.iter().copied()
    }

    pub fn num_invariant(&self) -> usize {
        self.invariant.len()
    }

    pub fn loop_members(&self, method: MethodId, loop_id: LoopId) -> Option<&FxHashSet<StmtRef>> {
        self.members.get(&(method, loop_id))
    }
}

fn touches_register(method: &MethodIr, stmt: &LirStatement) -> bool {
    let mut touched = false;
    if let Some(dest) = stmt.dest() {
        touched |= method.names.name(dest).is_register();
    }
    stmt.for_each_use_slot(|slot| touched |= method.names.name(slot).is_register());
    touched
}

fn stmt_is_invariant(
    program: &ProgramIr,
    rd: &ReachingDefs,
    body: &FxHashSet<StmtRef>,
    site: StmtRef,
) -> bool {
    let method = program.method(site.method);
    let LirStatement::Quad { arg1, arg2, .. } = method.stmt(site.stmt) else {
        return false;
    };
    if !name_is_invariant(rd, body, method.names.name(*arg1), site) {
        return false;
    }
    match arg2 {
        Some(arg2) => name_is_invariant(rd, body, method.names.name(*arg2), site),
        None => true,
    }
}

/// Constant, or definition-free, or only reached by definitions outside the
/// loop body. Array names test their index with the same predicate first.
fn name_is_invariant(rd: &ReachingDefs, body: &FxHashSet<StmtRef>, name: &Name, at: StmtRef) -> bool {
    if name.is_constant() {
        return true;
    }
    if let Name::Array { index, .. } = name {
        if !name_is_invariant(rd, body, index, at) {
            return false;
        }
    }
    if rd.defs_of(name).is_empty() {
        return true;
    }
    rd.reaching_defs_of(name, at)
        .iter()
        .all(|def| !body.contains(&rd.def_site(*def)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cfg::build_program_cfg;
    use crate::ir::name::{NameId, Register};
    use crate::ir::statement::{JumpCond, QuadOp};

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

    fn add(m: &mut MethodIr, dest: &str, lhs: &str, rhs: i64) {
        let a = local(m, lhs);
        let b = konst(m, rhs);
        let d = local(m, dest);
        m.stmts.push(LirStatement::Quad { dest: Some(d), op: QuadOp::Add, arg1: a, arg2: Some(b) });
    }

    /// `.forN.init: cmp var, 10; jge .forN.end`
    fn begin_loop(m: &mut MethodIr, id: u32, var: &str) {
        m.stmts.push(LirStatement::Label(Label::ForInit(LoopId(id))));
        let v = local(m, var);
        let bound = konst(m, 10);
        m.stmts.push(LirStatement::Cmp { arg1: v, arg2: bound });
        m.stmts.push(LirStatement::Jump { cond: JumpCond::Gte, target: Label::ForEnd(LoopId(id)) });
    }

    /// `.forN.incr: var = var + 1; jmp .forN.init; .forN.end:`
    fn end_loop(m: &mut MethodIr, id: u32, var: &str) {
        m.stmts.push(LirStatement::Label(Label::ForIncr(LoopId(id))));
        add(m, var, var, 1);
        m.stmts.push(LirStatement::Jump { cond: JumpCond::Always, target: Label::ForInit(LoopId(id)) });
        m.stmts.push(LirStatement::Label(Label::ForEnd(LoopId(id))));
    }

    fn analyzed(main: MethodIr) -> (ProgramIr, ReachingDefs) {
        let mut program = ProgramIr::new();
        program.methods.push(main);
        build_program_cfg(&mut program);
        let rd = ReachingDefs::analyze(&program);
        (program, rd)
    }

    fn site(stmt: u32) -> StmtRef {
        StmtRef { method: MethodId(0), stmt: StmtId(stmt) }
    }

    #[test]
    fn defined_before_loop_admits_invariance() {
        // 0: x = 1
        // 1: i = 0
        // 2-4: loop header
        // 5: y = x + 1
        // 6-9: loop footer
        let mut main = MethodIr::new("main");
        assign_const(&mut main, "x", 1);
        assign_const(&mut main, "i", 0);
        begin_loop(&mut main, 0, "i");
        add(&mut main, "y", "x", 1);
        end_loop(&mut main, 0, "i");
        let (program, rd) = analyzed(main);

        let inv = LoopInvariants::analyze(&program, &rd);
        assert!(inv.is_invariant(site(5), LoopId(0)));
    }

    #[test]
    fn reassignment_inside_loop_blocks_invariance() {
        // 0: x = 1
        // 1: i = 0
        // 2-4: loop header
        // 5: x = x + 1
        // 6: y = x + 1
        // 7-10: loop footer
        let mut main = MethodIr::new("main");
        assign_const(&mut main, "x", 1);
        assign_const(&mut main, "i", 0);
        begin_loop(&mut main, 0, "i");
        add(&mut main, "x", "x", 1);
        add(&mut main, "y", "x", 1);
        end_loop(&mut main, 0, "i");
        let (program, rd) = analyzed(main);

        let inv = LoopInvariants::analyze(&program, &rd);
        assert!(!inv.is_invariant(site(6), LoopId(0)));
        assert!(!inv.is_invariant(site(5), LoopId(0)), "x = x + 1 reaches itself");
    }

    #[test]
    fn nested_loops_are_tested_independently() {
        // 0: i = 0
        // 1-3: outer header
        // 4: w = 5
        // 5: j = 0
        // 6-8: inner header
        // 9: z = w + 1
        // 10-13: inner footer
        // 14-17: outer footer
        let mut main = MethodIr::new("main");
        assign_const(&mut main, "i", 0);
        begin_loop(&mut main, 0, "i");
        assign_const(&mut main, "w", 5);
        assign_const(&mut main, "j", 0);
        begin_loop(&mut main, 1, "j");
        add(&mut main, "z", "w", 1);
        end_loop(&mut main, 1, "j");
        end_loop(&mut main, 0, "i");
        let (program, rd) = analyzed(main);

        let inv = LoopInvariants::analyze(&program, &rd);
        // w is assigned inside the outer body but outside the inner body.
        assert!(inv.is_invariant(site(9), LoopId(1)));
        assert!(!inv.is_invariant(site(9), LoopId(0)));
        // Membership sets nest accordingly.
        let outer = inv.loop_members(MethodId(0), LoopId(0)).unwrap();
        let inner = inv.loop_members(MethodId(0), LoopId(1)).unwrap();
        assert!(inner.iter().all(|s| outer.contains(s)));
        assert!(outer.contains(&site(4)) && !inner.contains(&site(4)));
    }

    #[test]
    fn register_statements_are_never_candidates() {
        // 0: i = 0
        // 1-3: loop header
        // 4: t = %rax
        // 5: u = 1 + 2
        let mut main = MethodIr::new("main");
        assign_const(&mut main, "i", 0);
        begin_loop(&mut main, 0, "i");
        let rax = main.names.alloc(Name::Register(Register::Rax));
        let t = local(&mut main, "t");
        main.stmts.push(LirStatement::Quad { dest: Some(t), op: QuadOp::Move, arg1: rax, arg2: None });
        let one = konst(&mut main, 1);
        let two = konst(&mut main, 2);
        let u = local(&mut main, "u");
        main.stmts.push(LirStatement::Quad { dest: Some(u), op: QuadOp::Add, arg1: one, arg2: Some(two) });
        end_loop(&mut main, 0, "i");
        let (program, rd) = analyzed(main);

        let inv = LoopInvariants::analyze(&program, &rd);
        assert!(!inv.is_invariant(site(4), LoopId(0)), "register move is excluded");
        assert!(inv.is_invariant(site(5), LoopId(0)), "constant-only quad is invariant");
    }

    #[test]
    fn array_operand_requires_invariant_index() {
        // 0: k = 3
        // 1: i = 0
        // 2-4: loop header
        // 5: y = A[k] + 0
        // 6: z = A[i] + 0
        // 7-10: loop footer
        let mut main = MethodIr::new("main");
        assign_const(&mut main, "k", 3);
        assign_const(&mut main, "i", 0);
        begin_loop(&mut main, 0, "i");
        let a_k = main.names.alloc(Name::Array {
            id: "A".into(),
            index: Box::new(Name::local("k", 0)),
        });
        let zero = konst(&mut main, 0);
        let y = local(&mut main, "y");
        main.stmts.push(LirStatement::Quad { dest: Some(y), op: QuadOp::Add, arg1: a_k, arg2: Some(zero) });
        let a_i = main.names.alloc(Name::Array {
            id: "A".into(),
            index: Box::new(Name::local("i", 0)),
        });
        let zero = konst(&mut main, 0);
        let z = local(&mut main, "z");
        main.stmts.push(LirStatement::Quad { dest: Some(z), op: QuadOp::Add, arg1: a_i, arg2: Some(zero) });
        end_loop(&mut main, 0, "i");
        let (program, rd) = analyzed(main);

        let inv = LoopInvariants::analyze(&program, &rd);
        assert!(inv.is_invariant(site(5), LoopId(0)), "constant-index element, index set before loop");
        assert!(!inv.is_invariant(site(6), LoopId(0)), "loop variable index varies");
    }

    #[test]
    fn statements_outside_any_loop_are_not_tracked() {
        let mut main = MethodIr::new("main");
        assign_const(&mut main, "x", 1);
        add(&mut main, "y", "x", 1);
        let (program, rd) = analyzed(main);

        let inv = LoopInvariants::analyze(&program, &rd);
        assert_eq!(inv.num_invariant(), 0);
        assert!(!inv.is_invariant(site(1), LoopId(0)));
    }
}
