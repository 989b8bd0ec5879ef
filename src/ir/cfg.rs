//! Method/program IR containers and CFG construction.
//!
//! A `MethodIr` owns the full ordered statement list for one method plus its
//! name table, and partitions the statements into basic blocks. Blocks hold
//! statement index ranges, not statements; all cross-references are dense
//! index handles (`MethodId`, `BlockId`, `StmtId`), so analyses can hold
//! results keyed by handle while passes mutate statement operands.
//!
//! Block boundaries (leaders): the first statement, every label, and every
//! statement following a jump, a call, or a leave. Edges: unconditional
//! jumps have one successor; conditional jumps have the target plus
//! fall-through; `Leave` has none; everything else falls through. Calls do
//! not create interprocedural edges; their effects enter the dataflow as
//! kills.

use crate::common::fx_hash::FxHashMap;
use crate::ir::name::{Label, Name, NameTable};
use crate::ir::statement::{JumpCond, LirStatement};

/// Synthetic method the flattener appends for failed array bounds checks.
/// The dataflow analyses skip its body, and calls to it invalidate nothing.
pub const EXCEPTION_HANDLER: &str = "__exception_handler";

// ── Handles ──────────────────────────────────────────────────────────────────

/// Index of a method in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

/// Index of a block within its method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Index of a statement within its method's statement list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub u32);

/// Program-wide statement handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtRef {
    pub method: MethodId,
    pub stmt: StmtId,
}

/// Program-wide block handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef {
    pub method: MethodId,
    pub block: BlockId,
}

// ── Blocks and methods ───────────────────────────────────────────────────────

/// One basic block: a half-open statement range plus graph edges. Edges are
/// block indices within the same method; they never imply ownership.
#[derive(Debug, Clone)]
pub struct CfgBlock {
    pub index: BlockId,
    /// First statement (inclusive).
    pub start: u32,
    /// Past-the-end statement (exclusive).
    pub end: u32,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

impl CfgBlock {
    pub fn stmt_ids(&self) -> impl Iterator<Item = StmtId> {
        (self.start..self.end).map(StmtId)
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// IR for one method: flat statement list, operand slot table, CFG.
#[derive(Debug, Clone)]
pub struct MethodIr {
    pub name: String,
    pub stmts: Vec<LirStatement>,
    pub names: NameTable,
    /// Filled by `build_cfg`; empty until then.
    pub blocks: Vec<CfgBlock>,
    /// Parameter names in declaration order, for stack-slot assignment of
    /// arguments beyond the register-passed six.
    pub params: Vec<Name>,
}

impl MethodIr {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stmts: Vec::new(),
            names: NameTable::new(),
            blocks: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn stmt(&self, id: StmtId) -> &LirStatement {
        &self.stmts[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &CfgBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn block_stmts(&self, id: BlockId) -> &[LirStatement] {
        let b = &self.blocks[id.0 as usize];
        &self.stmts[b.start as usize..b.end as usize]
    }
}

/// Whole-program IR: methods in program order plus global data statements.
#[derive(Debug, Clone, Default)]
pub struct ProgramIr {
    pub methods: Vec<MethodIr>,
    /// `LirStatement::Data` entries for the `.data` section.
    pub data: Vec<LirStatement>,
}

impl ProgramIr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method_index(&self, name: &str) -> Option<MethodId> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .map(|i| MethodId(i as u32))
    }

    pub fn method(&self, id: MethodId) -> &MethodIr {
        &self.methods[id.0 as usize]
    }

    pub fn method_by_name(&self, name: &str) -> Option<&MethodIr> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Methods the analyses look at: everything except the synthetic
    /// exception handler.
    pub fn is_analyzed(&self, id: MethodId) -> bool {
        self.methods[id.0 as usize].name != EXCEPTION_HANDLER
    }
}

// ── CFG construction ─────────────────────────────────────────────────────────

/// Partition a method's statements into basic blocks and wire the edges.
/// Rebuilds from scratch; any previous partition is discarded.
pub fn build_cfg(method: &mut MethodIr) {
    method.blocks.clear();
    let num_stmts = method.stmts.len();

    if num_stmts == 0 {
        method.blocks.push(CfgBlock {
            index: BlockId(0),
            start: 0,
            end: 0,
            preds: Vec::new(),
            succs: Vec::new(),
        });
        return;
    }

    // Mark leaders.
    let mut leader = vec![false; num_stmts];
    leader[0] = true;
    for (i, stmt) in method.stmts.iter().enumerate() {
        match stmt {
            LirStatement::Label(_) => leader[i] = true,
            LirStatement::Jump { .. } | LirStatement::Call { .. } | LirStatement::Leave => {
                if i + 1 < num_stmts {
                    leader[i + 1] = true;
                }
            }
            _ => {}
        }
    }

    // Cut blocks at leaders.
    let mut start = 0usize;
    for i in 1..=num_stmts {
        if i == num_stmts || leader[i] {
            let index = BlockId(method.blocks.len() as u32);
            method.blocks.push(CfgBlock {
                index,
                start: start as u32,
                end: i as u32,
                preds: Vec::new(),
                succs: Vec::new(),
            });
            start = i;
        }
    }

    // Map each label to the block it starts.
    let mut label_to_block: FxHashMap<Label, BlockId> = FxHashMap::default();
    for block in &method.blocks {
        if let Some(label) = method.stmts[block.start as usize].as_label() {
            label_to_block.insert(label.clone(), block.index);
        }
    }

    // Wire edges off each block's final statement.
    let num_blocks = method.blocks.len();
    let mut edges: Vec<(BlockId, BlockId)> = Vec::new();
    for block in &method.blocks {
        let from = block.index;
        let fallthrough = if (from.0 as usize) + 1 < num_blocks {
            Some(BlockId(from.0 + 1))
        } else {
            None
        };
        match &method.stmts[block.end as usize - 1] {
            LirStatement::Jump { cond, target } => {
                let to = *label_to_block.get(target).unwrap_or_else(|| {
                    panic!("jump to unknown label {target} in method '{}'", method.name)
                });
                edges.push((from, to));
                if *cond != JumpCond::Always {
                    if let Some(next) = fallthrough {
                        edges.push((from, next));
                    }
                }
            }
            LirStatement::Leave => {}
            _ => {
                if let Some(next) = fallthrough {
                    edges.push((from, next));
                }
            }
        }
    }
    for (from, to) in edges {
        // A conditional jump whose target is also its fall-through yields
        // one edge, not two.
        let succs = &mut method.blocks[from.0 as usize].succs;
        if !succs.contains(&to) {
            succs.push(to);
            method.blocks[to.0 as usize].preds.push(from);
        }
    }
}

/// Build CFGs for every method in the program, including the exception
/// handler (it is skipped by analyses, not by construction).
pub fn build_program_cfg(program: &mut ProgramIr) {
    for method in &mut program.methods {
        build_cfg(method);
    }
}
