//! Reaching-definitions analysis.
//!
//! Classic iterative bit-vector dataflow over the per-method CFGs. Every
//! `Quad` with a destination is a definition and gets a dense program-wide
//! `DefId`. Per block we compute `gen`, `kill`, `in`, and `out` sets over
//! definition IDs; `kill` bits are only set for definitions present in the
//! block's `in` set, so `kill ⊆ in` holds by construction, and
//! `out = (in \ kill) ∪ gen`.
//!
//! Kill aliasing rules:
//!
//! - a definition kills every other definition of the same name value;
//! - a write to `A[k]` with constant `k` kills definitions of `A` under any
//!   non-constant index (a variable index may equal `k`); a write under a
//!   non-constant index kills every definition of any element of `A`;
//! - a write to `D` kills definitions of any array element indexed by `D`;
//! - a call invalidates the argument-passing registers, the return-value
//!   register, all global scalars, and all array elements. Calls to the
//!   bounds-check exception handler invalidate nothing.
//!
//! The worklist is seeded with every block of every analyzed method, the
//! entry block of `main` first with an empty in-set. After the fixed point,
//! a refinement walk advances each block's in-set statement by statement and
//! records the set of definitions reaching every individual statement; those
//! per-statement sets are what constant propagation, loop-invariant
//! detection, and web construction consume.

use std::collections::VecDeque;

use tracing::debug;

use crate::common::bitset::BitSet;
use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::ir::cfg::{BlockRef, CfgBlock, MethodId, MethodIr, ProgramIr, StmtId, StmtRef, EXCEPTION_HANDLER};
use crate::ir::name::{Name, Register};
use crate::ir::statement::LirStatement;

/// Dense identifier of one definition site, assigned in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefId(pub u32);

impl DefId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-block dataflow facts. All four sets are sized to the program's total
/// definition count.
#[derive(Debug, Clone)]
pub struct BlockDataFlowState {
    pub gen: BitSet,
    pub kill: BitSet,
    pub in_set: BitSet,
    pub out_set: BitSet,
}

impl BlockDataFlowState {
    fn new(num_defs: usize) -> Self {
        BlockDataFlowState {
            gen: BitSet::new(num_defs),
            kill: BitSet::new(num_defs),
            in_set: BitSet::new(num_defs),
            out_set: BitSet::new(num_defs),
        }
    }
}

/// Whole-program reaching-definitions results.
pub struct ReachingDefs {
    def_sites: Vec<StmtRef>,
    def_dests: Vec<Name>,
    name_defs: FxHashMap<Name, Vec<DefId>>,
    stmt_def: FxHashMap<StmtRef, DefId>,
    block_states: FxHashMap<BlockRef, BlockDataFlowState>,
    stmt_reaching: FxHashMap<StmtRef, BitSet>,
}

impl ReachingDefs {
    /// Run the analysis over every method except the exception handler.
    /// A program with zero definitions short-circuits to empty results.
    pub fn analyze(program: &ProgramIr) -> ReachingDefs {
        let mut rd = ReachingDefs {
            def_sites: Vec::new(),
            def_dests: Vec::new(),
            name_defs: FxHashMap::default(),
            stmt_def: FxHashMap::default(),
            block_states: FxHashMap::default(),
            stmt_reaching: FxHashMap::default(),
        };
        rd.index_definitions(program);
        if rd.def_sites.is_empty() {
            return rd;
        }
        rd.solve(program);
        rd.refine_statements(program);
        debug!(
            defs = rd.def_sites.len(),
            blocks = rd.block_states.len(),
            "reaching definitions converged"
        );
        rd
    }

    pub fn num_defs(&self) -> usize {
        self.def_sites.len()
    }

    pub fn def_site(&self, def: DefId) -> StmtRef {
        self.def_sites[def.index()]
    }

    pub fn def_dest(&self, def: DefId) -> &Name {
        &self.def_dests[def.index()]
    }

    /// All definitions of a name value, in ID order.
    pub fn defs_of(&self, name: &Name) -> &[DefId] {
        self.name_defs.get(name).map_or(&[], |defs| defs.as_slice())
    }

    /// The DefId of a definition statement, if the statement is one.
    pub fn def_at(&self, stmt: StmtRef) -> Option<DefId> {
        self.stmt_def.get(&stmt).copied()
    }

    pub fn block_state(&self, block: BlockRef) -> Option<&BlockDataFlowState> {
        self.block_states.get(&block)
    }

    /// Definitions reaching the given statement (the state just before it).
    pub fn reaching(&self, stmt: StmtRef) -> Option<&BitSet> {
        self.stmt_reaching.get(&stmt)
    }

    /// Definitions of `name` that reach `at`.
    pub fn reaching_defs_of(&self, name: &Name, at: StmtRef) -> Vec<DefId> {
        match self.reaching(at) {
            Some(set) => self
                .defs_of(name)
                .iter()
                .copied()
                .filter(|d| set.contains(d.index()))
                .collect(),
            None => Vec::new(),
        }
    }

    // ── Initialization ───────────────────────────────────────────────────────

    fn index_definitions(&mut self, program: &ProgramIr) {
        for (mi, method) in program.methods.iter().enumerate() {
            let mid = MethodId(mi as u32);
            if !program.is_analyzed(mid) {
                continue;
            }
            for (si, stmt) in method.stmts.iter().enumerate() {
                if !stmt.is_definition() {
                    continue;
                }
                let dest = stmt.dest().expect("definition has a destination");
                let id = DefId(self.def_sites.len() as u32);
                let site = StmtRef { method: mid, stmt: StmtId(si as u32) };
                self.def_sites.push(site);
                let name = method.names.name(dest).clone();
                self.name_defs.entry(name.clone()).or_default().push(id);
                self.def_dests.push(name);
                self.stmt_def.insert(site, id);
            }
        }
    }

    // ── Fixed point ──────────────────────────────────────────────────────────

    fn solve(&mut self, program: &ProgramIr) {
        let num_defs = self.def_sites.len();
        let mut queue: VecDeque<BlockRef> = VecDeque::new();
        let mut queued: FxHashSet<BlockRef> = FxHashSet::default();

        let enqueue = |queue: &mut VecDeque<BlockRef>, queued: &mut FxHashSet<BlockRef>, b| {
            if queued.insert(b) {
                queue.push_back(b);
            }
        };

        if let Some(main) = program.method_index("main") {
            if !program.method(main).blocks.is_empty() {
                let entry = BlockRef { method: main, block: program.method(main).blocks[0].index };
                enqueue(&mut queue, &mut queued, entry);
            }
        }
        for (mi, method) in program.methods.iter().enumerate() {
            let mid = MethodId(mi as u32);
            if !program.is_analyzed(mid) {
                continue;
            }
            for block in &method.blocks {
                enqueue(&mut queue, &mut queued, BlockRef { method: mid, block: block.index });
            }
        }

        while let Some(bref) = queue.pop_front() {
            queued.remove(&bref);
            let method = program.method(bref.method);
            let block = method.block(bref.block);

            let mut in_set = BitSet::new(num_defs);
            for &pred in &block.preds {
                if let Some(state) = self.block_states.get(&BlockRef { method: bref.method, block: pred }) {
                    in_set.union_with(&state.out_set);
                }
            }

            let (gen, kill) = self.block_gen_kill(method, bref.method, block, &in_set);

            let changed = match self.block_states.get_mut(&bref) {
                Some(state) => {
                    state.gen = gen;
                    state.kill = kill;
                    state.in_set = in_set;
                    state
                        .out_set
                        .assign_gen_union_in_minus_kill(&state.gen, &state.in_set, &state.kill)
                }
                None => {
                    let mut state = BlockDataFlowState::new(num_defs);
                    state.gen = gen;
                    state.kill = kill;
                    state.in_set = in_set;
                    state
                        .out_set
                        .assign_gen_union_in_minus_kill(&state.gen, &state.in_set, &state.kill);
                    self.block_states.insert(bref, state);
                    true
                }
            };

            if changed {
                for &succ in &block.succs {
                    enqueue(&mut queue, &mut queued, BlockRef { method: bref.method, block: succ });
                }
            }
        }
    }

    /// Recompute gen and kill for one block against the given in-set. Kill
    /// bits are taken only from `in_set`, never from bits generated earlier
    /// in the same block; the refinement walk restores within-block
    /// precision for the per-statement results.
    fn block_gen_kill(
        &self,
        method: &MethodIr,
        mid: MethodId,
        block: &CfgBlock,
        in_set: &BitSet,
    ) -> (BitSet, BitSet) {
        let num_defs = self.def_sites.len();
        let mut gen = BitSet::new(num_defs);
        let mut kill = BitSet::new(num_defs);

        for si in block.start..block.end {
            let stmt = &method.stmts[si as usize];
            match stmt {
                LirStatement::Quad { dest: Some(_), .. } => {
                    let site = StmtRef { method: mid, stmt: StmtId(si) };
                    let id = self.stmt_def[&site];
                    let dest = &self.def_dests[id.index()];
                    self.for_each_killed_def(dest, |killed| {
                        if killed != id && in_set.contains(killed.index()) {
                            kill.insert(killed.index());
                        }
                    });
                    gen.insert(id.index());
                }
                LirStatement::Call { method: callee } if callee != EXCEPTION_HANDLER => {
                    // Unlike a later same-name definition, a call also
                    // clears gen bits: an invalidated definition must not
                    // leak past the end of the block.
                    self.for_each_call_killed(|killed| {
                        if in_set.contains(killed.index()) {
                            kill.insert(killed.index());
                        }
                        gen.remove(killed.index());
                    });
                }
                _ => {}
            }
        }
        (gen, kill)
    }

    /// Enumerate the definitions a write to `dest` kills: same-name
    /// definitions, aliasing array elements, and elements indexed by `dest`.
    fn for_each_killed_def(&self, dest: &Name, mut f: impl FnMut(DefId)) {
        if let Some(defs) = self.name_defs.get(dest) {
            for &d in defs {
                f(d);
            }
        }
        for (name, defs) in &self.name_defs {
            if name == dest {
                continue;
            }
            let Name::Array { id, index } = name else { continue };
            let aliased = match dest {
                Name::Array { id: dest_id, index: dest_index } if id == dest_id => {
                    if dest_index.is_constant() {
                        !index.is_constant()
                    } else {
                        true
                    }
                }
                _ => false,
            };
            if aliased || **index == *dest {
                for &d in defs {
                    f(d);
                }
            }
        }
    }

    /// Definitions a (non-handler) call invalidates.
    fn for_each_call_killed(&self, mut f: impl FnMut(DefId)) {
        for (name, defs) in &self.name_defs {
            let invalidated = match name {
                Name::Register(r) => {
                    Register::ARGUMENT_REGS.contains(r) || *r == Register::RETURN_REG
                }
                Name::Var { block: None, .. } => true,
                Name::Array { .. } => true,
                _ => false,
            };
            if invalidated {
                for &d in defs {
                    f(d);
                }
            }
        }
    }

    // ── Per-statement refinement ─────────────────────────────────────────────

    fn refine_statements(&mut self, program: &ProgramIr) {
        let num_defs = self.def_sites.len();
        for (mi, method) in program.methods.iter().enumerate() {
            let mid = MethodId(mi as u32);
            if !program.is_analyzed(mid) {
                continue;
            }
            for block in &method.blocks {
                let bref = BlockRef { method: mid, block: block.index };
                let mut current = match self.block_states.get(&bref) {
                    Some(state) => state.in_set.clone(),
                    None => BitSet::new(num_defs),
                };
                for si in block.start..block.end {
                    let site = StmtRef { method: mid, stmt: StmtId(si) };
                    self.stmt_reaching.insert(site, current.clone());
                    match &method.stmts[si as usize] {
                        LirStatement::Quad { dest: Some(_), .. } => {
                            let id = self.stmt_def[&site];
                            let dest = &self.def_dests[id.index()];
                            self.for_each_killed_def(dest, |killed| {
                                current.remove(killed.index());
                            });
                            current.insert(id.index());
                        }
                        LirStatement::Call { method: callee } if callee != EXCEPTION_HANDLER => {
                            self.for_each_call_killed(|killed| {
                                current.remove(killed.index());
                            });
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
