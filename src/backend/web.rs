//! Def-use webs.
//!
//! A web is one allocatable entity for the register allocator: a maximal
//! set of definitions and uses of a single local scalar variable that must
//! agree on a storage location. Webs are built from the reaching-definitions
//! results with a union-find over this method's definition sites: every use
//! joins the webs of all definitions reaching it, plus one virtual entry
//! node per variable for uses nothing reaches (the incoming-memory value).
//!
//! Each web owns a canonical slot in the method's name table. Recording a
//! definition or use rewrites the statement's matching slots to that
//! canonical slot, so a register bound to the slot later is visible at every
//! site at once. A use site where the variable occurs only inside an array
//! index has no slot to rewrite; it is still recorded so the live range
//! covers it.

use crate::common::fx_hash::FxHashMap;
use crate::common::fx_hash::FxHashSet;
use crate::ir::cfg::{MethodId, MethodIr, StmtId, StmtRef};
use crate::ir::name::{Name, NameId, Register};
use crate::ir::statement::LirStatement;
use crate::passes::reaching_defs::{DefId, ReachingDefs};

/// One register-allocation web: a variable, its canonical name-table slot,
/// and the statement indexes of its definitions and uses.
#[derive(Debug, Clone)]
pub struct Web {
    pub variable: Name,
    pub canonical: NameId,
    pub defs: FxHashSet<u32>,
    pub uses: FxHashSet<u32>,
    /// Live range over statement indexes, inclusive on both ends.
    pub first: u32,
    pub last: u32,
    pub register: Option<Register>,
}

impl Web {
    fn new(variable: Name, canonical: NameId) -> Web {
        Web {
            variable,
            canonical,
            defs: FxHashSet::default(),
            uses: FxHashSet::default(),
            first: u32::MAX,
            last: 0,
            register: None,
        }
    }

    /// Record a defining statement, rewriting its destination slot to the
    /// canonical slot. Repeat calls for the same index are no-ops.
    pub fn add_definition(&mut self, method: &mut MethodIr, stmt: u32) {
        if !self.defs.insert(stmt) {
            return;
        }
        self.expand_range(stmt);
        match &mut method.stmts[stmt as usize] {
            LirStatement::Quad { dest: Some(dest), .. } => *dest = self.canonical,
            LirStatement::Load { var } => *var = self.canonical,
            other => panic!("web definition on non-defining statement: {other:?}"),
        }
    }

    /// Record a using statement, rewriting every operand slot that names
    /// this web's variable to the canonical slot. A statement with no
    /// matching slot (the variable appears only as an array index) is still
    /// recorded.
    pub fn add_use(&mut self, method: &mut MethodIr, stmt: u32) {
        if !self.uses.insert(stmt) {
            return;
        }
        self.expand_range(stmt);
        let MethodIr { stmts, names, .. } = method;
        let repoint = |slot: &mut NameId| {
            if names.name(*slot) == &self.variable {
                *slot = self.canonical;
            }
        };
        match &mut stmts[stmt as usize] {
            LirStatement::Quad { arg1, arg2, .. } => {
                repoint(arg1);
                if let Some(arg2) = arg2 {
                    repoint(arg2);
                }
            }
            LirStatement::Cmp { arg1, arg2 } => {
                repoint(arg1);
                repoint(arg2);
            }
            LirStatement::Push { operand } | LirStatement::Pop { operand } => repoint(operand),
            LirStatement::Store { var } => repoint(var),
            other => panic!("web use on statement without operands: {other:?}"),
        }
    }

    /// Fold another web of the same variable into this one. Slots recorded
    /// by `other` are repointed to this web's canonical slot.
    pub fn combine_web(&mut self, method: &mut MethodIr, other: &Web) {
        for &def in &other.defs {
            self.add_definition(method, def);
        }
        for &use_site in &other.uses {
            self.add_use(method, use_site);
        }
    }

    /// Bind a register to the canonical slot, making it visible at every
    /// recorded definition and use.
    pub fn set_register(&mut self, method: &mut MethodIr, reg: Register) {
        self.register = Some(reg);
        method.names.set_register(self.canonical, reg);
    }

    pub fn overlaps(&self, other: &Web) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    fn expand_range(&mut self, stmt: u32) {
        self.first = self.first.min(stmt);
        self.last = self.last.max(stmt);
    }
}

fn is_allocatable(name: &Name) -> bool {
    matches!(name, Name::Var { block: Some(_), .. })
}

/// The local-variable use sites of one statement: top-level operand slots
/// naming a local scalar, plus local scalars appearing as array indexes in
/// any operand or destination. `f` is told whether the use came from an
/// array index.
fn local_uses(method: &MethodIr, stmt: &LirStatement, mut f: impl FnMut(Name, bool)) {
    let mut visit = |slot: NameId| {
        match method.names.name(slot) {
            name @ Name::Var { block: Some(_), .. } => f(name.clone(), false),
            Name::Array { index, .. } if is_allocatable(index) => f((**index).clone(), true),
            _ => {}
        }
    };
    stmt.for_each_use_slot(&mut visit);
    // An array-destination write reads its index.
    if let Some(dest) = stmt.dest() {
        if let Name::Array { index, .. } = method.names.name(dest) {
            if is_allocatable(index) {
                f((**index).clone(), true);
            }
        }
    }
}

/// Build the webs for one method. Statement slots are rewritten to each
/// web's canonical slot as a side effect; same-variable webs with
/// overlapping live ranges are combined before returning.
pub fn build_method_webs(method: &mut MethodIr, mid: MethodId, rd: &ReachingDefs) -> Vec<Web> {
    // Definition nodes for this method's allocatable destinations.
    let mut def_node: FxHashMap<DefId, u32> = FxHashMap::default();
    let mut def_list: Vec<(DefId, u32, Name)> = Vec::new();
    for si in 0..method.stmts.len() as u32 {
        let site = StmtRef { method: mid, stmt: StmtId(si) };
        if let Some(def) = rd.def_at(site) {
            let dest = rd.def_dest(def);
            if is_allocatable(dest) {
                def_node.insert(def, def_list.len() as u32);
                def_list.push((def, si, dest.clone()));
            }
        }
    }

    // Use sites, in statement order. Variables that appear as array indexes
    // are rendered by name rather than by slot, so all their webs must end
    // up sharing one location.
    let mut use_list: Vec<(u32, Name)> = Vec::new();
    let mut index_vars: FxHashSet<Name> = FxHashSet::default();
    for (si, stmt) in method.stmts.iter().enumerate() {
        local_uses(method, stmt, |name, from_index| {
            if from_index {
                index_vars.insert(name.clone());
            }
            use_list.push((si as u32, name));
        });
    }

    // One virtual entry node per variable, after the definition nodes.
    let mut entry_node: FxHashMap<Name, u32> = FxHashMap::default();
    let mut node_count = def_list.len() as u32;
    for (_, name) in &use_list {
        entry_node.entry(name.clone()).or_insert_with(|| {
            let node = node_count;
            node_count += 1;
            node
        });
    }

    let mut uf = UnionFind::new(node_count);
    let mut resolved_uses: Vec<(u32, Name, u32)> = Vec::with_capacity(use_list.len());
    for (si, name) in use_list {
        let site = StmtRef { method: mid, stmt: StmtId(si) };
        let reaching: Vec<u32> = rd
            .reaching_defs_of(&name, site)
            .into_iter()
            .filter_map(|d| def_node.get(&d).copied())
            .collect();
        let node = match reaching.first() {
            Some(&first) => {
                for &other in &reaching[1..] {
                    uf.union(first, other);
                }
                first
            }
            None => entry_node[&name],
        };
        resolved_uses.push((si, name, node));
    }

    // Materialize webs per union-find root, definitions first so web order
    // follows definition order.
    let mut root_web: FxHashMap<u32, usize> = FxHashMap::default();
    let mut webs: Vec<Web> = Vec::new();
    let web_for = |root: u32,
                   name: &Name,
                   method: &mut MethodIr,
                   webs: &mut Vec<Web>,
                   root_web: &mut FxHashMap<u32, usize>| {
        *root_web.entry(root).or_insert_with(|| {
            let canonical = method.names.alloc(name.clone());
            webs.push(Web::new(name.clone(), canonical));
            webs.len() - 1
        })
    };

    for (def, si, name) in &def_list {
        let root = uf.find(def_node[def]);
        let idx = web_for(root, name, method, &mut webs, &mut root_web);
        webs[idx].add_definition(method, *si);
    }
    for (si, name, node) in &resolved_uses {
        let root = uf.find(*node);
        let idx = web_for(root, name, method, &mut webs, &mut root_web);
        webs[idx].add_use(method, *si);
    }

    combine_overlapping(method, webs, &index_vars)
}

/// Same-variable webs whose live ranges overlap must share a location.
/// Index variables are combined unconditionally.
fn combine_overlapping(
    method: &mut MethodIr,
    mut webs: Vec<Web>,
    index_vars: &FxHashSet<Name>,
) -> Vec<Web> {
    let mut by_var: FxHashMap<Name, Vec<usize>> = FxHashMap::default();
    for (i, web) in webs.iter().enumerate() {
        by_var.entry(web.variable.clone()).or_default().push(i);
    }

    let mut dead = vec![false; webs.len()];
    for (var, mut group) in by_var {
        group.sort_by_key(|&i| webs[i].first);
        let force = index_vars.contains(&var);
        let mut current = group[0];
        for &next in &group[1..] {
            if force || webs[next].first <= webs[current].last {
                let absorbed = webs[next].clone();
                webs[current].combine_web(method, &absorbed);
                dead[next] = true;
            } else {
                current = next;
            }
        }
    }

    let mut kept = Vec::with_capacity(webs.len());
    for (i, web) in webs.into_iter().enumerate() {
        if !dead[i] {
            kept.push(web);
        }
    }
    kept
}

struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    fn new(n: u32) -> UnionFind {
        UnionFind { parent: (0..n).collect() }
    }

    fn find(&mut self, x: u32) -> u32 {
        let mut x = x;
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra as usize] = rb;
        }
    }
}
