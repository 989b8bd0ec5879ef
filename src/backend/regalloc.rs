//! Linear scan register assignment over webs.
//!
//! Webs are sorted by the start of their live range and scanned once; each
//! web takes the first free register from the callee-saved pool, or stays
//! memory-resident when every pool member is claimed by an overlapping web.
//! Callee-saved registers keep values live across calls without save and
//! restore around every call site.
//!
//! Ranges are inclusive on both ends and a web is only expired once the
//! scan has moved strictly past its last statement, so two webs touching at
//! one statement never share a register. A validation pass rechecks every
//! pair after assignment; a shared register on overlapping webs is an
//! allocator bug and panics.

use tracing::debug;

use crate::backend::web::{build_method_webs, Web};
use crate::common::fx_hash::FxHashSet;
use crate::ir::cfg::{MethodId, MethodIr, ProgramIr};
use crate::ir::name::Register;
use crate::passes::reaching_defs::ReachingDefs;

/// Assign registers to one method's webs. Returns the number of webs that
/// received a register; the rest stay memory-resident.
pub fn assign_registers(method: &mut MethodIr, webs: &mut [Web]) -> usize {
    let mut order: Vec<usize> = (0..webs.len()).collect();
    order.sort_by_key(|&i| (webs[i].first, webs[i].last));

    let mut active: Vec<usize> = Vec::new();
    let mut assigned = 0;
    for &i in &order {
        // A web with no definition carries a value that only exists in
        // memory (a stack-passed parameter or an uninitialized read), so a
        // register would never be filled.
        if webs[i].defs.is_empty() {
            continue;
        }
        let start = webs[i].first;
        active.retain(|&a| webs[a].last >= start);

        let in_use: FxHashSet<Register> =
            active.iter().filter_map(|&a| webs[a].register).collect();
        let Some(reg) = Register::ALLOCATABLE.iter().copied().find(|r| !in_use.contains(r))
        else {
            continue;
        };
        webs[i].set_register(method, reg);
        active.push(i);
        assigned += 1;
    }

    validate_assignment(webs);
    assigned
}

/// Overlapping webs must never share a register. Violations are allocator
/// bugs, not input errors.
fn validate_assignment(webs: &[Web]) {
    for i in 0..webs.len() {
        for j in i + 1..webs.len() {
            let (a, b) = (&webs[i], &webs[j]);
            if !a.overlaps(b) {
                continue;
            }
            if let (Some(ra), Some(rb)) = (a.register, b.register) {
                if ra == rb {
                    panic!(
                        "register {ra} assigned to overlapping webs of '{}' and '{}'",
                        a.variable, b.variable
                    );
                }
            }
        }
    }
}

/// Build webs and assign registers for every method except the exception
/// handler. Returns the total number of webs given a register.
pub fn allocate_program(program: &mut ProgramIr, rd: &ReachingDefs) -> usize {
    let mut total = 0;
    for mi in 0..program.methods.len() {
        let mid = MethodId(mi as u32);
        if !program.is_analyzed(mid) {
            continue;
        }
        let method = &mut program.methods[mi];
        let mut webs = build_method_webs(method, mid, rd);
        let assigned = assign_registers(method, &mut webs);
        debug!(method = %method.name, webs = webs.len(), assigned, "registers assigned");
        total += assigned;
    }
    total
}
