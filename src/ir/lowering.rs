//! AST-to-LIR flattening.
//!
//! Lowers the typed AST into per-method flat statement lists. The flattener
//! is deliberately naive: every intermediate value gets a temporary, every
//! call argument is materialized before the register moves, and no
//! simplification happens here. The dataflow passes downstream exist to
//! clean this output up.
//!
//! Loop labels are structured: each `for` gets a program-unique `LoopId`
//! stamped into its `ForInit`/`ForIncr`/`ForEnd` labels, which is the only
//! loop metadata the loop-invariant analysis needs.
//!
//! Calling convention: the first six arguments travel in the argument
//! registers, the rest are pushed right-to-left and popped off with an rsp
//! adjustment after the call; results come back in the return register.
//! Array accesses are preceded by a bounds check that calls the synthetic
//! exception-handler method on failure.

use crate::common::error::{CompileError, Result};
use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::frontend::ast::{
    BinOp, Block, ClassDecl, Expr, Location, MethodCall, MethodDecl, Stmt, UnaryOp,
};
use crate::ir::cfg::{MethodIr, ProgramIr, EXCEPTION_HANDLER};
use crate::ir::name::{Label, LoopId, Name, NameId, Register};
use crate::ir::statement::{JumpCond, LirStatement, QuadOp};

/// Lower a class to whole-program IR: one MethodIr per declared method in
/// declaration order, the synthetic exception handler appended last, and
/// one data statement per class field.
pub fn flatten_program(class: &ClassDecl) -> Result<ProgramIr> {
    let mut fields: FxHashMap<String, Option<u64>> = FxHashMap::default();
    for field in &class.fields {
        fields.insert(field.name.clone(), field.length);
    }

    let mut flattener = Flattener {
        fields,
        loop_counter: 0,
        label_counter: 0,
        scope_counter: 0,
        method: MethodIr::new(""),
        scopes: Vec::new(),
        frame_vars: Vec::new(),
        temp_counter: 0,
        method_scope: 0,
        loop_stack: Vec::new(),
    };

    let mut program = ProgramIr::new();
    for field in &class.fields {
        program.data.push(LirStatement::Data {
            name: field.name.clone(),
            words: field.length.unwrap_or(1),
        });
    }

    let mut seen: FxHashSet<&str> = FxHashSet::default();
    seen.insert(EXCEPTION_HANDLER);
    for decl in &class.methods {
        if !seen.insert(&decl.name) {
            return Err(CompileError::DuplicateMethod(decl.name.clone()));
        }
        program.methods.push(flattener.lower_method(decl));
    }
    program.methods.push(flattener.exception_handler());

    Ok(program)
}

struct Flattener {
    /// Class fields: None = scalar, Some(n) = array of n words.
    fields: FxHashMap<String, Option<u64>>,
    /// Program-wide counters, never reset between methods.
    loop_counter: u32,
    label_counter: u32,
    scope_counter: u32,
    // Per-method state, reset by lower_method.
    method: MethodIr,
    scopes: Vec<(u32, FxHashSet<String>)>,
    frame_vars: Vec<Name>,
    temp_counter: u32,
    method_scope: u32,
    loop_stack: Vec<LoopId>,
}

impl Flattener {
    fn lower_method(&mut self, decl: &MethodDecl) -> MethodIr {
        self.method = MethodIr::new(decl.name.clone());
        self.scopes.clear();
        self.frame_vars.clear();
        self.temp_counter = 0;
        self.loop_stack.clear();

        self.push(LirStatement::Label(Label::Method(decl.name.clone())));
        self.push(LirStatement::Enter { slots: 0 });

        self.push_scope();
        self.method_scope = self.scopes.last().expect("method scope just pushed").0;
        for (i, param) in decl.params.iter().enumerate() {
            let name = self.declare(&param.name);
            self.method.params.push(name.clone());
            if let Some(&reg) = Register::ARGUMENT_REGS.get(i) {
                let src = self.reg_slot(reg);
                self.move_into(name, src);
            }
            // Arguments beyond the sixth stay in their incoming stack
            // slots; the emitter addresses them relative to %rbp.
        }

        self.lower_block(&decl.body);
        self.pop_scope();

        if !matches!(self.method.stmts.last(), Some(LirStatement::Leave)) {
            self.push(LirStatement::Leave);
        }

        let slots = self.frame_vars.len() as u32;
        if let LirStatement::Enter { slots: s } = &mut self.method.stmts[1] {
            *s = slots;
        }

        std::mem::replace(&mut self.method, MethodIr::new(""))
    }

    /// The bounds-check failure target: sets an exit code and calls the
    /// runtime's exit. Calls to this method are transparent to the dataflow
    /// analyses.
    fn exception_handler(&mut self) -> MethodIr {
        self.method = MethodIr::new(EXCEPTION_HANDLER);
        self.push(LirStatement::Label(Label::Method(EXCEPTION_HANDLER.into())));
        self.push(LirStatement::Enter { slots: 0 });
        let code = self.method.names.alloc(Name::Constant(1));
        let rdi = self.reg_slot(Register::Rdi);
        self.method.stmts.push(LirStatement::Quad {
            dest: Some(rdi),
            op: QuadOp::Move,
            arg1: code,
            arg2: None,
        });
        self.push(LirStatement::Call { method: "exit".into() });
        self.push(LirStatement::Leave);
        std::mem::replace(&mut self.method, MethodIr::new(""))
    }

    // ── Statements ───────────────────────────────────────────────────────────

    fn lower_block(&mut self, block: &Block) {
        self.push_scope();
        for decl in &block.decls {
            self.declare(&decl.name);
        }
        for stmt in &block.stmts {
            self.lower_stmt(stmt);
        }
        self.pop_scope();
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign { target, value } => self.lower_assign(target, value),
            Stmt::If { cond, then_block, else_block } => {
                let cond_slot = self.lower_expr(cond);
                let one = self.method.names.alloc(Name::Constant(1));
                self.push(LirStatement::Cmp { arg1: cond_slot, arg2: one });
                let end = self.fresh_local_label();
                match else_block {
                    None => {
                        self.push(LirStatement::Jump { cond: JumpCond::Neq, target: end.clone() });
                        self.lower_block(then_block);
                    }
                    Some(else_block) => {
                        let else_label = self.fresh_local_label();
                        self.push(LirStatement::Jump {
                            cond: JumpCond::Neq,
                            target: else_label.clone(),
                        });
                        self.lower_block(then_block);
                        self.push(LirStatement::Jump { cond: JumpCond::Always, target: end.clone() });
                        self.push(LirStatement::Label(else_label));
                        self.lower_block(else_block);
                    }
                }
                self.push(LirStatement::Label(end));
            }
            Stmt::For { var, init, end, body } => self.lower_for(var, init, end, body),
            Stmt::Call(call) => {
                self.lower_call(call, false);
            }
            Stmt::Return(expr) => {
                if let Some(expr) = expr {
                    let value = self.lower_expr(expr);
                    let rax = self.reg_slot(Register::RETURN_REG);
                    self.method.stmts.push(LirStatement::Quad {
                        dest: Some(rax),
                        op: QuadOp::Move,
                        arg1: value,
                        arg2: None,
                    });
                }
                self.push(LirStatement::Leave);
            }
            Stmt::Break => {
                let loop_id = *self.loop_stack.last().expect("break outside of a loop");
                self.push(LirStatement::Jump {
                    cond: JumpCond::Always,
                    target: Label::ForEnd(loop_id),
                });
            }
            Stmt::Continue => {
                let loop_id = *self.loop_stack.last().expect("continue outside of a loop");
                self.push(LirStatement::Jump {
                    cond: JumpCond::Always,
                    target: Label::ForIncr(loop_id),
                });
            }
        }
    }

    fn lower_assign(&mut self, target: &Location, value: &Expr) {
        match &target.index {
            None => {
                let name = self.resolve_scalar(&target.name);
                let value_slot = self.lower_expr(value);
                self.move_into(name, value_slot);
            }
            Some(index) => {
                let index_name = self.lower_index(&target.name, index);
                let value_slot = self.lower_expr(value);
                let dest = Name::Array { id: target.name.clone(), index: Box::new(index_name) };
                self.move_into(dest, value_slot);
            }
        }
    }

    fn lower_for(&mut self, var: &str, init: &Expr, end: &Expr, body: &Block) {
        let loop_id = LoopId(self.loop_counter);
        self.loop_counter += 1;

        // The init expression is evaluated outside the loop variable's scope.
        let init_slot = self.lower_expr(init);
        self.push_scope();
        let loop_var = self.declare(var);
        self.move_into(loop_var.clone(), init_slot);

        self.push(LirStatement::Label(Label::ForInit(loop_id)));
        // Bound recomputed each iteration, inside the loop body proper.
        let end_slot = self.lower_expr(end);
        let var_slot = self.method.names.alloc(loop_var.clone());
        self.push(LirStatement::Cmp { arg1: var_slot, arg2: end_slot });
        self.push(LirStatement::Jump { cond: JumpCond::Gte, target: Label::ForEnd(loop_id) });

        self.loop_stack.push(loop_id);
        self.lower_block(body);
        self.loop_stack.pop();

        self.push(LirStatement::Label(Label::ForIncr(loop_id)));
        let var_use = self.method.names.alloc(loop_var.clone());
        let one = self.method.names.alloc(Name::Constant(1));
        let var_dest = self.method.names.alloc(loop_var);
        self.method.stmts.push(LirStatement::Quad {
            dest: Some(var_dest),
            op: QuadOp::Add,
            arg1: var_use,
            arg2: Some(one),
        });
        self.push(LirStatement::Jump { cond: JumpCond::Always, target: Label::ForInit(loop_id) });
        self.push(LirStatement::Label(Label::ForEnd(loop_id)));
        self.pop_scope();
    }

    // ── Expressions ──────────────────────────────────────────────────────────

    /// Lower an expression; the returned slot is ready to use as a source
    /// operand. Every occurrence gets its own slot.
    fn lower_expr(&mut self, expr: &Expr) -> NameId {
        match expr {
            Expr::IntLiteral(v) => self.method.names.alloc(Name::Constant(*v)),
            Expr::BoolLiteral(b) => self.method.names.alloc(Name::Constant(i64::from(*b))),
            Expr::Location(loc) => match &loc.index {
                None => {
                    let name = self.resolve_scalar(&loc.name);
                    self.method.names.alloc(name)
                }
                Some(index) => {
                    let index_name = self.lower_index(&loc.name, index);
                    self.method.names.alloc(Name::Array {
                        id: loc.name.clone(),
                        index: Box::new(index_name),
                    })
                }
            },
            Expr::Call(call) => self.lower_call(call, true).expect("value call returns a slot"),
            Expr::Binary { op: BinOp::And, lhs, rhs } => self.lower_short_circuit(lhs, rhs, true),
            Expr::Binary { op: BinOp::Or, lhs, rhs } => self.lower_short_circuit(lhs, rhs, false),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs);
                let rhs = self.lower_expr(rhs);
                self.define_temp(bin_quad_op(*op), lhs, Some(rhs))
            }
            Expr::Unary { op, expr } => {
                let src = self.lower_expr(expr);
                let op = match op {
                    UnaryOp::Not => QuadOp::Not,
                    UnaryOp::Neg => QuadOp::Neg,
                };
                self.define_temp(op, src, None)
            }
        }
    }

    /// `a && b` / `a || b` with the usual short-circuit shape: evaluate the
    /// left side into the result temp, conditionally skip the right side.
    fn lower_short_circuit(&mut self, lhs: &Expr, rhs: &Expr, is_and: bool) -> NameId {
        let result = self.fresh_temp_name();
        let lhs_slot = self.lower_expr(lhs);
        self.move_into(result.clone(), lhs_slot);

        let probe = self.method.names.alloc(result.clone());
        let one = self.method.names.alloc(Name::Constant(1));
        self.push(LirStatement::Cmp { arg1: probe, arg2: one });
        let end = self.fresh_local_label();
        let cond = if is_and { JumpCond::Neq } else { JumpCond::Eq };
        self.push(LirStatement::Jump { cond, target: end.clone() });

        let rhs_slot = self.lower_expr(rhs);
        self.move_into(result.clone(), rhs_slot);
        self.push(LirStatement::Label(end));

        self.method.names.alloc(result)
    }

    /// Lower `args`, move the first six into the argument registers, push
    /// the rest right-to-left, call, and clean the stack back up. Each
    /// argument is materialized into a temporary first so a call in a later
    /// argument cannot clobber an earlier one's register.
    fn lower_call(&mut self, call: &MethodCall, want_result: bool) -> Option<NameId> {
        let mut arg_slots = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let value = self.lower_expr(arg);
            let temp = self.fresh_temp_name();
            self.move_into(temp.clone(), value);
            arg_slots.push(self.method.names.alloc(temp));
        }

        for (i, &slot) in arg_slots.iter().enumerate().take(Register::ARGUMENT_REGS.len()) {
            let reg = self.reg_slot(Register::ARGUMENT_REGS[i]);
            self.method.stmts.push(LirStatement::Quad {
                dest: Some(reg),
                op: QuadOp::Move,
                arg1: slot,
                arg2: None,
            });
        }
        let overflow = arg_slots.len().saturating_sub(Register::ARGUMENT_REGS.len());
        for &slot in arg_slots.iter().skip(Register::ARGUMENT_REGS.len()).rev() {
            self.push(LirStatement::Push { operand: slot });
        }

        self.push(LirStatement::Call { method: call.method.clone() });

        if overflow > 0 {
            let rsp_use = self.reg_slot(Register::Rsp);
            let amount = self.method.names.alloc(Name::Constant(8 * overflow as i64));
            let rsp_dest = self.reg_slot(Register::Rsp);
            self.method.stmts.push(LirStatement::Quad {
                dest: Some(rsp_dest),
                op: QuadOp::Add,
                arg1: rsp_use,
                arg2: Some(amount),
            });
        }

        if want_result {
            let rax = self.reg_slot(Register::RETURN_REG);
            Some(self.define_temp(QuadOp::Move, rax, None))
        } else {
            None
        }
    }

    /// Lower an array index expression and guard it: unless the index is
    /// below the array length as an unsigned value (a negative index is
    /// not), control transfers to the exception handler. Returns the index
    /// Name for embedding in the Array operand.
    fn lower_index(&mut self, array: &str, index: &Expr) -> Name {
        let length = match self.fields.get(array) {
            Some(Some(length)) => *length,
            Some(None) => panic!("field '{array}' is scalar but indexed"),
            None => panic!("undeclared array '{array}'"),
        };
        let index_slot = self.lower_expr(index);
        let mut index_name = self.method.names.name(index_slot).clone();
        // A nested element read (a[b[i]]) lands in a temporary first; an
        // embedded index Name is never itself an array.
        if index_name.is_array() {
            let temp = self.fresh_temp_name();
            self.move_into(temp.clone(), index_slot);
            index_name = temp;
        }

        let probe = self.method.names.alloc(index_name.clone());
        let bound = self.method.names.alloc(Name::Constant(length as i64));
        self.push(LirStatement::Cmp { arg1: probe, arg2: bound });
        let ok = self.fresh_local_label();
        self.push(LirStatement::Jump { cond: JumpCond::Ult, target: ok.clone() });
        self.push(LirStatement::Call { method: EXCEPTION_HANDLER.into() });
        self.push(LirStatement::Label(ok));

        index_name
    }

    // ── Environment ──────────────────────────────────────────────────────────

    fn push_scope(&mut self) {
        let id = self.scope_counter;
        self.scope_counter += 1;
        self.scopes.push((id, FxHashSet::default()));
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str) -> Name {
        let (scope, names) = self.scopes.last_mut().expect("declaration outside any scope");
        names.insert(name.to_string());
        let var = Name::Var { id: name.to_string(), block: Some(*scope) };
        self.frame_vars.push(var.clone());
        var
    }

    /// Innermost declaration wins; otherwise the name must be a scalar
    /// class field.
    fn resolve_scalar(&mut self, name: &str) -> Name {
        for (scope, names) in self.scopes.iter().rev() {
            if names.contains(name) {
                return Name::Var { id: name.to_string(), block: Some(*scope) };
            }
        }
        match self.fields.get(name) {
            Some(None) => Name::global(name),
            Some(Some(_)) => panic!("array field '{name}' used without an index"),
            None => panic!("undeclared variable '{name}'"),
        }
    }

    // ── Emission helpers ─────────────────────────────────────────────────────

    fn push(&mut self, stmt: LirStatement) {
        self.method.stmts.push(stmt);
    }

    fn reg_slot(&mut self, reg: Register) -> NameId {
        self.method.names.alloc(Name::Register(reg))
    }

    fn fresh_temp_name(&mut self) -> Name {
        let n = self.temp_counter;
        self.temp_counter += 1;
        let name = Name::Var { id: format!(".t{n}"), block: Some(self.method_scope) };
        self.frame_vars.push(name.clone());
        name
    }

    fn fresh_local_label(&mut self) -> Label {
        let n = self.label_counter;
        self.label_counter += 1;
        Label::Local(n)
    }

    /// Emit `temp = arg1 op arg2` and hand back a fresh use slot for the
    /// temp.
    fn define_temp(&mut self, op: QuadOp, arg1: NameId, arg2: Option<NameId>) -> NameId {
        let temp = self.fresh_temp_name();
        let dest = self.method.names.alloc(temp.clone());
        self.method.stmts.push(LirStatement::Quad { dest: Some(dest), op, arg1, arg2 });
        self.method.names.alloc(temp)
    }

    /// Emit `name = src`.
    fn move_into(&mut self, name: Name, src: NameId) {
        let dest = self.method.names.alloc(name);
        self.method.stmts.push(LirStatement::Quad {
            dest: Some(dest),
            op: QuadOp::Move,
            arg1: src,
            arg2: None,
        });
    }
}

fn bin_quad_op(op: BinOp) -> QuadOp {
    match op {
        BinOp::Add => QuadOp::Add,
        BinOp::Sub => QuadOp::Sub,
        BinOp::Mul => QuadOp::Mul,
        BinOp::Div => QuadOp::Div,
        BinOp::Mod => QuadOp::Mod,
        BinOp::Lt => QuadOp::Lt,
        BinOp::Lte => QuadOp::Lte,
        BinOp::Gt => QuadOp::Gt,
        BinOp::Gte => QuadOp::Gte,
        BinOp::Eq => QuadOp::Eq,
        BinOp::Neq => QuadOp::Neq,
        BinOp::And | BinOp::Or => unreachable!("short-circuit ops lower through control flow"),
    }
}
