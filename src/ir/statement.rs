//! Low-level IR statements.
//!
//! The LIR is a flat three-address form: one `Vec<LirStatement>` per method,
//! with explicit labels, compare-and-jump control flow, and the x86-64 call
//! convention already spelled out (argument-register moves, pushes for
//! overflow arguments). Every analysis matches on the statement enum
//! exhaustively; adding a variant is a compile error everywhere it matters.
//!
//! Operand slots are `NameId` handles into the owning method's `NameTable`,
//! never inline `Name`s. See `ir::name` for the aliasing rules.

use crate::ir::name::{Label, NameId, NameTable};

/// Quadruplet operators. `Move` and the unary ops (`Not`, `Neg`) take a
/// single source; everything else is `dest = arg1 op arg2`. Relational ops
/// produce 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuadOp {
    Move,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    Not,
    Neg,
}

impl QuadOp {
    pub fn is_unary(self) -> bool {
        matches!(self, QuadOp::Move | QuadOp::Not | QuadOp::Neg)
    }

    pub fn is_relational(self) -> bool {
        matches!(
            self,
            QuadOp::Lt | QuadOp::Lte | QuadOp::Gt | QuadOp::Gte | QuadOp::Eq | QuadOp::Neq
        )
    }
}

/// Condition under which a `Jump` is taken, matching the flags left by the
/// preceding `Cmp` (arg1 relative to arg2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpCond {
    Always,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Unsigned below; negative values compare above any bound.
    Ult,
}

/// One flat-IR statement.
#[derive(Debug, Clone, PartialEq)]
pub enum LirStatement {
    /// Jump target. Loop labels carry structured loop identity.
    Label(Label),
    /// Method prologue: frame setup reserving `slots` 8-byte locals.
    Enter { slots: u32 },
    /// Method epilogue and return point. Ends its block with no successors.
    Leave,
    /// The quadruplet family: `dest = arg1 op arg2`, unary, or move. The
    /// only statement kind that creates reaching definitions.
    Quad { dest: Option<NameId>, op: QuadOp, arg1: NameId, arg2: Option<NameId> },
    /// Flag-setting compare of arg1 against arg2.
    Cmp { arg1: NameId, arg2: NameId },
    /// Conditional or unconditional jump to an intra-method label.
    Jump { cond: JumpCond, target: Label },
    /// Direct call by method label. No interprocedural CFG edge; the
    /// reaching-definitions engine models its side effects as kills.
    Call { method: String },
    /// Push an operand (overflow call arguments, callee-saved saves).
    Push { operand: NameId },
    /// Pop into an operand.
    Pop { operand: NameId },
    /// Memory-to-register traffic for one named location.
    Load { var: NameId },
    /// Register-to-memory traffic for one named location.
    Store { var: NameId },
    /// Global data declaration; lives in the program's data list, never in
    /// a method body.
    Data { name: String, words: u64 },
}

impl LirStatement {
    /// The slot this statement writes, if any: a quadruplet's destination,
    /// or the variable a `Load` brings into its register.
    pub fn dest(&self) -> Option<NameId> {
        match self {
            LirStatement::Quad { dest, .. } => *dest,
            LirStatement::Load { var } => Some(*var),
            _ => None,
        }
    }

    /// True for statements that create a reaching definition.
    pub fn is_definition(&self) -> bool {
        matches!(self, LirStatement::Quad { dest: Some(_), .. })
    }

    /// Visit every operand slot this statement reads: quadruplet and
    /// compare sources, push/pop operands, and the variable a `Store`
    /// writes back from its register.
    pub fn for_each_use_slot(&self, mut f: impl FnMut(NameId)) {
        match self {
            LirStatement::Quad { arg1, arg2, .. } => {
                f(*arg1);
                if let Some(arg2) = arg2 {
                    f(*arg2);
                }
            }
            LirStatement::Cmp { arg1, arg2 } => {
                f(*arg1);
                f(*arg2);
            }
            LirStatement::Push { operand } | LirStatement::Pop { operand } => f(*operand),
            LirStatement::Store { var } => f(*var),
            LirStatement::Label(_)
            | LirStatement::Enter { .. }
            | LirStatement::Leave
            | LirStatement::Jump { .. }
            | LirStatement::Call { .. }
            | LirStatement::Load { .. }
            | LirStatement::Data { .. } => {}
        }
    }

    pub fn as_label(&self) -> Option<&Label> {
        match self {
            LirStatement::Label(label) => Some(label),
            _ => None,
        }
    }

    /// Readable one-line form for debugging and test assertions, resolving
    /// slots through the method's name table.
    pub fn pretty(&self, names: &NameTable) -> String {
        let n = |id: &NameId| names.name(*id).to_string();
        match self {
            LirStatement::Label(label) => format!("{label}:"),
            LirStatement::Enter { slots } => format!("enter {slots}"),
            LirStatement::Leave => "leave".to_string(),
            LirStatement::Quad { dest, op, arg1, arg2 } => {
                let lhs = match dest {
                    Some(d) => format!("{} = ", n(d)),
                    None => String::new(),
                };
                match (op, arg2) {
                    (QuadOp::Move, _) => format!("{lhs}{}", n(arg1)),
                    (QuadOp::Not, _) => format!("{lhs}!{}", n(arg1)),
                    (QuadOp::Neg, _) => format!("{lhs}-{}", n(arg1)),
                    (_, Some(arg2)) => format!("{lhs}{} {} {}", n(arg1), op_symbol(*op), n(arg2)),
                    (_, None) => format!("{lhs}{} {}", op_symbol(*op), n(arg1)),
                }
            }
            LirStatement::Cmp { arg1, arg2 } => format!("cmp {}, {}", n(arg1), n(arg2)),
            LirStatement::Jump { cond: JumpCond::Always, target } => format!("jmp {target}"),
            LirStatement::Jump { cond, target } => format!("j{} {target}", cond_suffix(*cond)),
            LirStatement::Call { method } => format!("call {method}"),
            LirStatement::Push { operand } => format!("push {}", n(operand)),
            LirStatement::Pop { operand } => format!("pop {}", n(operand)),
            LirStatement::Load { var } => format!("load {}", n(var)),
            LirStatement::Store { var } => format!("store {}", n(var)),
            LirStatement::Data { name, words } => format!(".data {name}, {words}"),
        }
    }
}

fn op_symbol(op: QuadOp) -> &'static str {
    match op {
        QuadOp::Move => "=",
        QuadOp::Add => "+",
        QuadOp::Sub => "-",
        QuadOp::Mul => "*",
        QuadOp::Div => "/",
        QuadOp::Mod => "%",
        QuadOp::Lt => "<",
        QuadOp::Lte => "<=",
        QuadOp::Gt => ">",
        QuadOp::Gte => ">=",
        QuadOp::Eq => "==",
        QuadOp::Neq => "!=",
        QuadOp::Not => "!",
        QuadOp::Neg => "neg",
    }
}

pub(crate) fn cond_suffix(cond: JumpCond) -> &'static str {
    match cond {
        JumpCond::Always => "mp",
        JumpCond::Eq => "e",
        JumpCond::Neq => "ne",
        JumpCond::Lt => "l",
        JumpCond::Lte => "le",
        JumpCond::Gt => "g",
        JumpCond::Gte => "ge",
        JumpCond::Ult => "b",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::name::{Name, NameTable};

    #[test]
    fn dest_and_use_slots() {
        let mut names = NameTable::new();
        let x = names.alloc(Name::local("x", 0));
        let a = names.alloc(Name::local("a", 0));
        let b = names.alloc(Name::local("b", 0));

        let quad = LirStatement::Quad { dest: Some(x), op: QuadOp::Add, arg1: a, arg2: Some(b) };
        assert_eq!(quad.dest(), Some(x));
        assert!(quad.is_definition());
        let mut uses = Vec::new();
        quad.for_each_use_slot(|id| uses.push(id));
        assert_eq!(uses, vec![a, b]);

        let load = LirStatement::Load { var: x };
        assert_eq!(load.dest(), Some(x));
        assert!(!load.is_definition(), "loads are not reaching definitions");

        let store = LirStatement::Store { var: x };
        assert_eq!(store.dest(), None);
        let mut uses = Vec::new();
        store.for_each_use_slot(|id| uses.push(id));
        assert_eq!(uses, vec![x]);
    }

    #[test]
    fn pretty_forms() {
        let mut names = NameTable::new();
        let x = names.alloc(Name::local("x", 1));
        let five = names.alloc(Name::Constant(5));

        let mv = LirStatement::Quad { dest: Some(x), op: QuadOp::Move, arg1: five, arg2: None };
        assert_eq!(mv.pretty(&names), "x@1 = $5");

        let jmp = LirStatement::Jump { cond: JumpCond::Gte, target: Label::ForEnd(crate::ir::name::LoopId(0)) };
        assert_eq!(jmp.pretty(&names), "jge .for0.end");
    }
}
