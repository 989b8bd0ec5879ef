//! Operand names for the low-level IR.
//!
//! A `Name` is the value-level identity of an operand: a literal constant, a
//! physical register, a scalar variable, or an array element. Names compare
//! and hash structurally; the dataflow analyses key their tables on Name
//! values (e.g. "all definitions of `x`").
//!
//! Statements do not embed Names directly. Each operand slot holds a
//! `NameId` into the owning method's `NameTable`, and each table slot pairs
//! the Name value with an optional register binding. Lowering allocates one
//! slot per textual occurrence, so two occurrences of `x` start out as
//! distinct slots; register allocation later repoints all occurrences in a
//! web at one canonical slot, making a register binding on that slot visible
//! everywhere at once.

use std::fmt;

// ── Physical registers ───────────────────────────────────────────────────────

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Register {
    /// Registers that carry the first six call arguments, in order.
    pub const ARGUMENT_REGS: [Register; 6] = [
        Register::Rdi,
        Register::Rsi,
        Register::Rdx,
        Register::Rcx,
        Register::R8,
        Register::R9,
    ];

    /// Register that carries a call's return value.
    pub const RETURN_REG: Register = Register::Rax;

    /// Callee-saved registers handed out by the register allocator. Values
    /// kept here survive calls, so webs never need call-crossing analysis.
    pub const ALLOCATABLE: [Register; 5] = [
        Register::Rbx,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Register::Rax => "%rax",
            Register::Rbx => "%rbx",
            Register::Rcx => "%rcx",
            Register::Rdx => "%rdx",
            Register::Rsp => "%rsp",
            Register::Rbp => "%rbp",
            Register::Rsi => "%rsi",
            Register::Rdi => "%rdi",
            Register::R8 => "%r8",
            Register::R9 => "%r9",
            Register::R10 => "%r10",
            Register::R11 => "%r11",
            Register::R12 => "%r12",
            Register::R13 => "%r13",
            Register::R14 => "%r14",
            Register::R15 => "%r15",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Labels ───────────────────────────────────────────────────────────────────

/// Identifies one `for` loop. Dense and program-unique, assigned by the
/// flattener in lowering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub u32);

/// A structured jump target. Loop labels carry their LoopId directly, so
/// loop analyses read loop structure off the label statement instead of
/// parsing label text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    /// Method entry; the label text is the method name.
    Method(String),
    /// Top of a `for` loop, before the bound check. Pushes the loop on the
    /// active-loop stack during loop-membership scanning.
    ForInit(LoopId),
    /// Target of `continue`: the induction-variable increment.
    ForIncr(LoopId),
    /// First statement after the loop. Pops the active-loop stack.
    ForEnd(LoopId),
    /// Compiler-internal control label (if/else joins, bounds-check
    /// continuations), from a program-wide counter.
    Local(u32),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Method(name) => write!(f, "{name}"),
            Label::ForInit(id) => write!(f, ".for{}.init", id.0),
            Label::ForIncr(id) => write!(f, ".for{}.incr", id.0),
            Label::ForEnd(id) => write!(f, ".for{}.end", id.0),
            Label::Local(n) => write!(f, ".L{n}"),
        }
    }
}

// ── Names ────────────────────────────────────────────────────────────────────

/// Value-level operand identity. Structural equality throughout: two
/// occurrences of variable `x` are equal Names even though they occupy
/// distinct table slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Name {
    /// Literal integer (booleans lower to 1/0).
    Constant(i64),
    /// Physical register operand, introduced by the call convention.
    Register(Register),
    /// Scalar variable. `block` is the declaring scope; `None` means global.
    Var { id: String, block: Option<u32> },
    /// Array element; the index is itself a Name (constant, variable, or
    /// register), never another array.
    Array { id: String, index: Box<Name> },
}

impl Name {
    /// Shorthand for a global scalar.
    pub fn global(id: &str) -> Name {
        Name::Var { id: id.to_string(), block: None }
    }

    /// Shorthand for a block-scoped scalar.
    pub fn local(id: &str, block: u32) -> Name {
        Name::Var { id: id.to_string(), block: Some(block) }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Name::Constant(_))
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Name::Register(_))
    }

    /// Global scalar variable (declared at class level, lives in `.data`).
    pub fn is_global_var(&self) -> bool {
        matches!(self, Name::Var { block: None, .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Name::Array { .. })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Constant(v) => write!(f, "${v}"),
            Name::Register(r) => write!(f, "{r}"),
            Name::Var { id, block: None } => write!(f, "{id}"),
            Name::Var { id, block: Some(b) } => write!(f, "{id}@{b}"),
            Name::Array { id, index } => write!(f, "{id}[{index}]"),
        }
    }
}

// ── Name table ───────────────────────────────────────────────────────────────

/// Handle to one operand slot in a method's `NameTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameId(pub u32);

/// One operand slot: the Name value plus the register binding filled in by
/// register allocation (None means the operand lives in memory).
#[derive(Debug, Clone)]
pub struct NameSlot {
    pub name: Name,
    pub register: Option<Register>,
}

/// Arena of operand slots for one method. Slots are never deduplicated at
/// allocation; sharing is introduced deliberately when webs repoint
/// statement operands at a canonical slot.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    slots: Vec<NameSlot>,
}

impl NameTable {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Allocate a fresh slot holding `name`, with no register binding.
    pub fn alloc(&mut self, name: Name) -> NameId {
        let id = NameId(self.slots.len() as u32);
        self.slots.push(NameSlot { name, register: None });
        id
    }

    pub fn name(&self, id: NameId) -> &Name {
        &self.slots[id.0 as usize].name
    }

    pub fn register(&self, id: NameId) -> Option<Register> {
        self.slots[id.0 as usize].register
    }

    pub fn set_register(&mut self, id: NameId, reg: Register) {
        self.slots[id.0 as usize].register = Some(reg);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NameId, &NameSlot)> {
        self.slots.iter().enumerate().map(|(i, s)| (NameId(i as u32), s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_equality_is_structural() {
        assert_eq!(Name::local("x", 1), Name::local("x", 1));
        assert_ne!(Name::local("x", 1), Name::local("x", 2));
        assert_ne!(Name::local("x", 1), Name::global("x"));
        let a = Name::Array { id: "a".into(), index: Box::new(Name::Constant(3)) };
        let b = Name::Array { id: "a".into(), index: Box::new(Name::Constant(3)) };
        assert_eq!(a, b);
    }

    #[test]
    fn table_slots_are_distinct_until_shared() {
        let mut table = NameTable::new();
        let first = table.alloc(Name::local("x", 0));
        let second = table.alloc(Name::local("x", 0));
        assert_ne!(first, second);
        assert_eq!(table.name(first), table.name(second));

        table.set_register(first, Register::Rbx);
        assert_eq!(table.register(first), Some(Register::Rbx));
        assert_eq!(table.register(second), None, "binding must not leak across slots");
    }

    #[test]
    fn label_rendering() {
        assert_eq!(Label::Method("main".into()).to_string(), "main");
        assert_eq!(Label::ForInit(LoopId(3)).to_string(), ".for3.init");
        assert_eq!(Label::ForEnd(LoopId(3)).to_string(), ".for3.end");
        assert_eq!(Label::Local(7).to_string(), ".L7");
    }
}
