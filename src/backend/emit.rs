//! AT&T x86-64 assembly emission.
//!
//! Renders the optimized flat IR as one assembly module: a `.data` section
//! with zero-initialized storage for the globals, then `.text` with every
//! method in program order. Emission is a single forward walk over each
//! method's statements; stack slots and saved registers are derived from
//! the name table up front, so no statement needs lookahead.
//!
//! Scratch conventions: %rax is the working accumulator for quadruplets,
//! %r10 stages second operands with no direct addressing form, and %r11
//! holds computed array indexes. Allocated webs live only in callee-saved
//! registers, so all three scratch registers are dead between statements.
//! Addressing is non-PIC: globals are absolute symbols, array elements
//! `sym(,%r11,8)`.

use std::io::{self, Write};

use crate::common::fx_hash::FxHashMap;
use crate::ir::cfg::{MethodIr, ProgramIr};
use crate::ir::name::{Name, NameId, Register};
use crate::ir::statement::{cond_suffix, LirStatement, QuadOp};

/// Write the whole program as one assembly module.
pub fn emit_program<W: Write>(program: &ProgramIr, out: &mut W) -> io::Result<()> {
    if !program.data.is_empty() {
        writeln!(out, ".data")?;
        for data in &program.data {
            let LirStatement::Data { name, words } = data else {
                panic!("non-data statement in program data list: {data:?}");
            };
            writeln!(out, "{name}:")?;
            writeln!(out, "    .zero {}", 8 * words)?;
        }
        writeln!(out)?;
    }
    writeln!(out, ".text")?;
    writeln!(out, ".globl main")?;
    for method in &program.methods {
        writeln!(out)?;
        MethodEmitter::new(method).emit(out)?;
    }
    Ok(())
}

/// Frame decisions for one method, fixed before any statement is rendered.
struct FrameLayout {
    /// rbp-relative home of every addressable scalar: negative offsets for
    /// locals, positive for stack-passed parameters.
    offsets: FxHashMap<Name, i32>,
    /// Register binding per variable, for operands that appear by value
    /// (array indexes) rather than through a slot. Index variables always
    /// share a single web, so one binding per name is enough.
    bindings: FxHashMap<Name, Register>,
    frame_bytes: u32,
    /// Callee-saved registers the allocator handed out, in pool order.
    saved: Vec<Register>,
}

impl FrameLayout {
    fn of(method: &MethodIr) -> FrameLayout {
        let mut offsets = FxHashMap::default();
        // Arguments beyond the register-passed six sit above the return
        // address: 16(%rbp), 24(%rbp), and so on.
        let in_regs = Register::ARGUMENT_REGS.len();
        for (i, param) in method.params.iter().enumerate().skip(in_regs) {
            offsets.insert(param.clone(), 16 + 8 * (i - in_regs) as i32);
        }

        let mut bindings = FxHashMap::default();
        let mut locals = 0u32;
        for (_, slot) in method.names.iter() {
            if let Some(reg) = slot.register {
                bindings.entry(slot.name.clone()).or_insert(reg);
            }
            if let Name::Var { block: Some(_), .. } = &slot.name {
                if !offsets.contains_key(&slot.name) {
                    locals += 1;
                    offsets.insert(slot.name.clone(), -8 * locals as i32);
                }
            }
        }

        let frame_bytes = (8 * locals + 15) & !15;
        let saved: Vec<Register> = Register::ALLOCATABLE
            .iter()
            .copied()
            .filter(|r| bindings.values().any(|b| b == r))
            .collect();
        FrameLayout { offsets, bindings, frame_bytes, saved }
    }
}

struct MethodEmitter<'a> {
    method: &'a MethodIr,
    layout: FrameLayout,
}

impl<'a> MethodEmitter<'a> {
    fn new(method: &'a MethodIr) -> MethodEmitter<'a> {
        MethodEmitter { method, layout: FrameLayout::of(method) }
    }

    fn emit<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for stmt in &self.method.stmts {
            self.emit_stmt(out, stmt)?;
        }
        Ok(())
    }

    fn emit_stmt<W: Write>(&self, out: &mut W, stmt: &LirStatement) -> io::Result<()> {
        match stmt {
            LirStatement::Label(label) => writeln!(out, "{label}:"),
            LirStatement::Enter { .. } => {
                writeln!(out, "    enter ${}, $0", self.layout.frame_bytes)?;
                for reg in &self.layout.saved {
                    writeln!(out, "    push {reg}")?;
                }
                Ok(())
            }
            LirStatement::Leave => {
                // main returns 0 regardless of what its body computed.
                if self.method.name == "main" {
                    writeln!(out, "    mov $0, %rax")?;
                }
                for reg in self.layout.saved.iter().rev() {
                    writeln!(out, "    pop {reg}")?;
                }
                writeln!(out, "    leave")?;
                writeln!(out, "    ret")
            }
            LirStatement::Quad { dest, op, arg1, arg2 } => {
                self.emit_quad(out, *dest, *op, *arg1, *arg2)
            }
            LirStatement::Cmp { arg1, arg2 } => {
                self.load(out, *arg1, "%rax")?;
                let rhs = self.rhs(out, *arg2)?;
                writeln!(out, "    cmp {rhs}, %rax")
            }
            LirStatement::Jump { cond, target } => {
                writeln!(out, "    j{} {target}", cond_suffix(*cond))
            }
            LirStatement::Call { method } => writeln!(out, "    call {method}"),
            LirStatement::Push { operand } => match self.slot_location(*operand) {
                Some(loc) => writeln!(out, "    push {loc}"),
                None => {
                    self.load(out, *operand, "%rax")?;
                    writeln!(out, "    push %rax")
                }
            },
            LirStatement::Pop { operand } => match self.slot_location(*operand) {
                Some(loc) => writeln!(out, "    pop {loc}"),
                None => {
                    writeln!(out, "    pop %rax")?;
                    self.store(out, *operand, "%rax")
                }
            },
            LirStatement::Load { var } => {
                let home = self.scalar_home(self.method.names.name(*var));
                match self.slot_location(*var) {
                    Some(loc) if loc != home => writeln!(out, "    mov {home}, {loc}"),
                    _ => Ok(()),
                }
            }
            LirStatement::Store { var } => {
                let home = self.scalar_home(self.method.names.name(*var));
                match self.slot_location(*var) {
                    Some(loc) if loc != home => writeln!(out, "    mov {loc}, {home}"),
                    _ => Ok(()),
                }
            }
            LirStatement::Data { .. } => {
                panic!("data statement inside method body '{}'", self.method.name)
            }
        }
    }

    fn emit_quad<W: Write>(
        &self,
        out: &mut W,
        dest: Option<NameId>,
        op: QuadOp,
        arg1: NameId,
        arg2: Option<NameId>,
    ) -> io::Result<()> {
        match op {
            QuadOp::Move => {
                self.load(out, arg1, "%rax")?;
                self.store_opt(out, dest, "%rax")
            }
            QuadOp::Add | QuadOp::Sub => {
                let arg2 = required(arg2, op);
                let mnemonic = if op == QuadOp::Add { "add" } else { "sub" };
                // `dest = dest op x` with dest in a register renders in
                // place. The stack adjustment after a call (rsp += n) must
                // leave %rax alone while it still holds the call result.
                if let Some(d) = dest {
                    if let (Some(dloc), Some(a1loc), Some(rhs)) = (
                        self.slot_location(d),
                        self.slot_location(arg1),
                        self.slot_location(arg2),
                    ) {
                        if dloc == a1loc && dloc.starts_with('%') {
                            return writeln!(out, "    {mnemonic} {rhs}, {dloc}");
                        }
                    }
                }
                self.load(out, arg1, "%rax")?;
                let rhs = self.rhs(out, arg2)?;
                writeln!(out, "    {mnemonic} {rhs}, %rax")?;
                self.store_opt(out, dest, "%rax")
            }
            QuadOp::Mul => {
                let arg2 = required(arg2, op);
                self.load(out, arg1, "%rax")?;
                // imul takes no immediate in its two-operand form.
                let rhs = match self.slot_location(arg2) {
                    Some(loc) if !loc.starts_with('$') => loc,
                    _ => {
                        self.load(out, arg2, "%r10")?;
                        "%r10".to_string()
                    }
                };
                writeln!(out, "    imul {rhs}, %rax")?;
                self.store_opt(out, dest, "%rax")
            }
            QuadOp::Div | QuadOp::Mod => {
                let arg2 = required(arg2, op);
                self.load(out, arg1, "%rax")?;
                self.load(out, arg2, "%r10")?;
                writeln!(out, "    cqto")?;
                writeln!(out, "    idiv %r10")?;
                let result = if op == QuadOp::Div { "%rax" } else { "%rdx" };
                self.store_opt(out, dest, result)
            }
            QuadOp::Lt | QuadOp::Lte | QuadOp::Gt | QuadOp::Gte | QuadOp::Eq | QuadOp::Neq => {
                let arg2 = required(arg2, op);
                self.load(out, arg1, "%rax")?;
                let rhs = self.rhs(out, arg2)?;
                writeln!(out, "    cmp {rhs}, %rax")?;
                writeln!(out, "    set{} %al", relational_suffix(op))?;
                writeln!(out, "    movzbq %al, %rax")?;
                self.store_opt(out, dest, "%rax")
            }
            QuadOp::Not => {
                self.load(out, arg1, "%rax")?;
                writeln!(out, "    xor $1, %rax")?;
                self.store_opt(out, dest, "%rax")
            }
            QuadOp::Neg => {
                self.load(out, arg1, "%rax")?;
                writeln!(out, "    neg %rax")?;
                self.store_opt(out, dest, "%rax")
            }
        }
    }

    /// Emit instructions leaving the slot's value in `target`.
    fn load<W: Write>(&self, out: &mut W, slot: NameId, target: &str) -> io::Result<()> {
        if let Some(loc) = self.slot_location(slot) {
            if loc != target {
                writeln!(out, "    mov {loc}, {target}")?;
            }
            return Ok(());
        }
        let name = self.method.names.name(slot);
        let Name::Array { id, index } = name else {
            unreachable!("scalar operand with no direct location: {name}")
        };
        match index.as_ref() {
            Name::Constant(k) => writeln!(out, "    mov {}, {target}", element(id, *k)),
            idx => {
                writeln!(out, "    mov {}, %r11", self.index_location(idx))?;
                writeln!(out, "    mov {id}(,%r11,8), {target}")
            }
        }
    }

    /// Emit instructions writing `src` (a register) into the slot's
    /// location.
    fn store<W: Write>(&self, out: &mut W, slot: NameId, src: &str) -> io::Result<()> {
        if let Some(loc) = self.slot_location(slot) {
            if loc != src {
                writeln!(out, "    mov {src}, {loc}")?;
            }
            return Ok(());
        }
        let name = self.method.names.name(slot);
        let Name::Array { id, index } = name else {
            unreachable!("scalar destination with no direct location: {name}")
        };
        match index.as_ref() {
            Name::Constant(k) => writeln!(out, "    mov {src}, {}", element(id, *k)),
            idx => {
                writeln!(out, "    mov {}, %r11", self.index_location(idx))?;
                writeln!(out, "    mov {src}, {id}(,%r11,8)")
            }
        }
    }

    fn store_opt<W: Write>(&self, out: &mut W, dest: Option<NameId>, src: &str) -> io::Result<()> {
        match dest {
            Some(d) => self.store(out, d, src),
            None => Ok(()),
        }
    }

    /// Second-operand string for a two-source instruction: the direct
    /// location when there is one, otherwise the value staged through %r10.
    fn rhs<W: Write>(&self, out: &mut W, slot: NameId) -> io::Result<String> {
        match self.slot_location(slot) {
            Some(loc) => Ok(loc),
            None => {
                self.load(out, slot, "%r10")?;
                Ok("%r10".to_string())
            }
        }
    }

    /// Where a slot's value lives, as a single operand string. None for
    /// array elements, which need scratch-register addressing.
    fn slot_location(&self, slot: NameId) -> Option<String> {
        if let Some(reg) = self.method.names.register(slot) {
            return Some(reg.as_str().to_string());
        }
        match self.method.names.name(slot) {
            Name::Constant(v) => Some(format!("${v}")),
            Name::Register(r) => Some(r.as_str().to_string()),
            name @ Name::Var { .. } => Some(self.scalar_home(name)),
            Name::Array { .. } => None,
        }
    }

    /// Memory home of a scalar: a global symbol or an rbp-relative slot.
    fn scalar_home(&self, name: &Name) -> String {
        match name {
            Name::Var { id, block: None } => id.clone(),
            _ => match self.layout.offsets.get(name) {
                Some(off) => format!("{off}(%rbp)"),
                None => panic!("no stack home for {name}"),
            },
        }
    }

    /// Operand string for an array index, which appears by value rather
    /// than through a slot.
    fn index_location(&self, index: &Name) -> String {
        match index {
            Name::Constant(v) => format!("${v}"),
            Name::Register(r) => r.as_str().to_string(),
            Name::Var { .. } => match self.layout.bindings.get(index) {
                Some(reg) => reg.as_str().to_string(),
                None => self.scalar_home(index),
            },
            Name::Array { .. } => panic!("array index is itself an array: {index}"),
        }
    }
}

/// Direct address of an array element with a constant index.
fn element(id: &str, k: i64) -> String {
    if k == 0 {
        id.to_string()
    } else {
        format!("{id}{:+}", 8 * k)
    }
}

fn required(arg2: Option<NameId>, op: QuadOp) -> NameId {
    match arg2 {
        Some(id) => id,
        None => panic!("binary {op:?} missing its second operand"),
    }
}

fn relational_suffix(op: QuadOp) -> &'static str {
    match op {
        QuadOp::Lt => "l",
        QuadOp::Lte => "le",
        QuadOp::Gt => "g",
        QuadOp::Gte => "ge",
        QuadOp::Eq => "e",
        QuadOp::Neq => "ne",
        other => panic!("not a relational operator: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::regalloc::allocate_program;
    use crate::ir::cfg::build_program_cfg;
    use crate::ir::name::{Label, LoopId};
    use crate::ir::statement::JumpCond;
    use crate::passes::reaching_defs::ReachingDefs;

    fn render(program: &ProgramIr) -> String {
        let mut out = Vec::new();
        emit_program(program, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn konst(m: &mut MethodIr, v: i64) -> NameId {
        m.names.alloc(Name::Constant(v))
    }

    fn local(m: &mut MethodIr, id: &str) -> NameId {
        m.names.alloc(Name::local(id, 1))
    }

    fn quad(m: &mut MethodIr, dest: NameId, op: QuadOp, arg1: NameId, arg2: Option<NameId>) {
        m.stmts.push(LirStatement::Quad { dest: Some(dest), op, arg1, arg2 });
    }

    fn program_of(method: MethodIr) -> ProgramIr {
        let mut program = ProgramIr::new();
        program.methods.push(method);
        program
    }

    #[test]
    fn skeleton_and_main_return_zero() {
        let mut m = MethodIr::new("main");
        m.stmts.push(LirStatement::Label(Label::Method("main".into())));
        m.stmts.push(LirStatement::Enter { slots: 0 });
        m.stmts.push(LirStatement::Leave);

        let asm = render(&program_of(m));
        assert!(asm.contains(".text\n.globl main\n"), "missing text header:\n{asm}");
        assert!(
            asm.contains("main:\n    enter $0, $0\n    mov $0, %rax\n    leave\n    ret\n"),
            "main must return 0:\n{asm}"
        );
    }

    #[test]
    fn data_section_reserves_zeroed_words() {
        let mut program = ProgramIr::new();
        program.data.push(LirStatement::Data { name: "g".into(), words: 1 });
        program.data.push(LirStatement::Data { name: "A".into(), words: 10 });

        let asm = render(&program);
        assert!(asm.starts_with(".data\ng:\n    .zero 8\nA:\n    .zero 80\n"), "{asm}");
        assert!(asm.contains(".text\n.globl main"));
    }

    #[test]
    fn arithmetic_renders_through_the_accumulator() {
        let mut m = MethodIr::new("f");
        let one = konst(&mut m, 1);
        let x = local(&mut m, "x");
        quad(&mut m, x, QuadOp::Move, one, None);
        let x_use = local(&mut m, "x");
        let two = konst(&mut m, 2);
        let y = local(&mut m, "y");
        quad(&mut m, y, QuadOp::Add, x_use, Some(two));

        let asm = render(&program_of(m));
        assert!(asm.contains("    mov $1, %rax\n    mov %rax, -8(%rbp)\n"), "{asm}");
        assert!(
            asm.contains("    mov -8(%rbp), %rax\n    add $2, %rax\n    mov %rax, -16(%rbp)\n"),
            "{asm}"
        );
    }

    #[test]
    fn relational_sets_and_widens() {
        let mut m = MethodIr::new("f");
        let x = local(&mut m, "x");
        let y = local(&mut m, "y");
        let b = local(&mut m, "b");
        quad(&mut m, b, QuadOp::Lt, x, Some(y));

        let asm = render(&program_of(m));
        assert!(
            asm.contains(
                "    mov -8(%rbp), %rax\n    cmp -16(%rbp), %rax\n    setl %al\n    movzbq %al, %rax\n    mov %rax, -24(%rbp)\n"
            ),
            "{asm}"
        );
    }

    #[test]
    fn division_splits_quotient_and_remainder() {
        let mut m = MethodIr::new("f");
        let a = local(&mut m, "a");
        let b = local(&mut m, "b");
        let q = local(&mut m, "q");
        quad(&mut m, q, QuadOp::Div, a, Some(b));
        let a2 = local(&mut m, "a");
        let b2 = local(&mut m, "b");
        let r = local(&mut m, "r");
        quad(&mut m, r, QuadOp::Mod, a2, Some(b2));

        let asm = render(&program_of(m));
        assert!(
            asm.contains("    cqto\n    idiv %r10\n    mov %rax, -24(%rbp)\n"),
            "quotient comes from %rax:\n{asm}"
        );
        assert!(
            asm.contains("    cqto\n    idiv %r10\n    mov %rdx, -32(%rbp)\n"),
            "remainder comes from %rdx:\n{asm}"
        );
    }

    #[test]
    fn array_access_uses_scratch_index() {
        let mut m = MethodIr::new("f");
        let zero = konst(&mut m, 0);
        let i = local(&mut m, "i");
        quad(&mut m, i, QuadOp::Move, zero, None);

        let elem = Name::Array { id: "A".into(), index: Box::new(Name::local("i", 1)) };
        let elem_use = m.names.alloc(elem.clone());
        let zero2 = konst(&mut m, 0);
        let y = local(&mut m, "y");
        quad(&mut m, y, QuadOp::Add, elem_use, Some(zero2));

        let y_use = local(&mut m, "y");
        let elem_dest = m.names.alloc(elem);
        quad(&mut m, elem_dest, QuadOp::Move, y_use, None);

        let third = m.names.alloc(Name::Array { id: "A".into(), index: Box::new(Name::Constant(3)) });
        let x = local(&mut m, "x");
        quad(&mut m, x, QuadOp::Move, third, None);

        let asm = render(&program_of(m));
        assert!(
            asm.contains("    mov -8(%rbp), %r11\n    mov A(,%r11,8), %rax\n"),
            "element read:\n{asm}"
        );
        assert!(
            asm.contains("    mov -16(%rbp), %rax\n    mov -8(%rbp), %r11\n    mov %rax, A(,%r11,8)\n"),
            "element write:\n{asm}"
        );
        assert!(asm.contains("    mov A+24, %rax\n"), "constant index folds:\n{asm}");
    }

    #[test]
    fn bound_webs_render_in_registers() {
        let mut m = MethodIr::new("f");
        m.stmts.push(LirStatement::Label(Label::Method("f".into())));
        m.stmts.push(LirStatement::Enter { slots: 2 });
        let one = konst(&mut m, 1);
        let x = local(&mut m, "x");
        quad(&mut m, x, QuadOp::Move, one, None);
        let x_use = local(&mut m, "x");
        let one2 = konst(&mut m, 1);
        let y = local(&mut m, "y");
        quad(&mut m, y, QuadOp::Add, x_use, Some(one2));
        m.stmts.push(LirStatement::Leave);

        let mut program = program_of(m);
        build_program_cfg(&mut program);
        let rd = ReachingDefs::analyze(&program);
        allocate_program(&mut program, &rd);

        let asm = render(&program);
        assert!(
            asm.contains("    enter $16, $0\n    push %rbx\n    push %r12\n"),
            "saved registers follow the prologue:\n{asm}"
        );
        assert!(asm.contains("    mov $1, %rax\n    mov %rax, %rbx\n"), "{asm}");
        assert!(
            asm.contains("    mov %rbx, %rax\n    add $1, %rax\n    mov %rax, %r12\n"),
            "{asm}"
        );
        assert!(
            asm.contains("    pop %r12\n    pop %rbx\n    leave\n    ret\n"),
            "restores mirror the saves:\n{asm}"
        );
    }

    #[test]
    fn stack_passed_parameters_read_above_the_frame() {
        let mut m = MethodIr::new("g");
        for i in 0..8 {
            m.params.push(Name::local(&format!("p{i}"), 1));
        }
        let p7 = m.names.alloc(Name::local("p7", 1));
        let zero = konst(&mut m, 0);
        let y = local(&mut m, "y");
        quad(&mut m, y, QuadOp::Add, p7, Some(zero));

        let asm = render(&program_of(m));
        assert!(
            asm.contains("    mov 24(%rbp), %rax\n    add $0, %rax\n    mov %rax, -8(%rbp)\n"),
            "{asm}"
        );
    }

    #[test]
    fn stack_adjustment_never_touches_the_accumulator() {
        let mut m = MethodIr::new("f");
        let five = konst(&mut m, 5);
        m.stmts.push(LirStatement::Push { operand: five });
        m.stmts.push(LirStatement::Call { method: "h".into() });
        let rsp_use = m.names.alloc(Name::Register(Register::Rsp));
        let amount = konst(&mut m, 8);
        let rsp_dest = m.names.alloc(Name::Register(Register::Rsp));
        quad(&mut m, rsp_dest, QuadOp::Add, rsp_use, Some(amount));
        let rax = m.names.alloc(Name::Register(Register::Rax));
        let t = local(&mut m, "t");
        quad(&mut m, t, QuadOp::Move, rax, None);

        let asm = render(&program_of(m));
        assert!(
            asm.contains("    push $5\n    call h\n    add $8, %rsp\n    mov %rax, -8(%rbp)\n"),
            "rsp adjusts in place while %rax holds the result:\n{asm}"
        );
    }

    #[test]
    fn compare_and_jump_forms() {
        let mut m = MethodIr::new("f");
        let x = local(&mut m, "x");
        let ten = konst(&mut m, 10);
        m.stmts.push(LirStatement::Cmp { arg1: x, arg2: ten });
        m.stmts
            .push(LirStatement::Jump { cond: JumpCond::Gte, target: Label::ForEnd(LoopId(0)) });
        m.stmts
            .push(LirStatement::Jump { cond: JumpCond::Always, target: Label::ForInit(LoopId(0)) });
        m.stmts.push(LirStatement::Jump { cond: JumpCond::Ult, target: Label::Local(0) });

        let asm = render(&program_of(m));
        assert!(
            asm.contains("    mov -8(%rbp), %rax\n    cmp $10, %rax\n    jge .for0.end\n    jmp .for0.init\n    jb .L0\n"),
            "{asm}"
        );
    }
}
