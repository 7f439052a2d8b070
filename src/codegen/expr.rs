//! Expression lowering.
//!
//! Expression generation takes an explicit output destination (a symbolic
//! variable, or none to discard the value) and an evaluation mode: lvalue
//! produces an address, rvalue produces a value. The same expression kind
//! dispatches differently by mode.
//!
//! Symbolic variables are block-local, so any value that must survive a
//! block-splitting sub-expression is staged into a physical register and
//! protected across the split with push/pop. Booleans cross blocks only in
//! the accumulator.

use super::FuncCodegen;
use crate::ast::{BinOp, Expr, Type, UnOp};
use crate::block::BlockId;
use crate::error::{CompileError, CompileResult};
use crate::instruction::{Cond, Inst, Op};
use crate::session::RuntimeRoutine;
use crate::value::{Reg, SymVar, Value, Width};

/// Evaluation mode for expression generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Produce the expression's value.
    RValue,
    /// Produce the address of the expression's storage.
    LValue,
}

/// Leaf expressions evaluate in the current block without touching the
/// staging registers; everything else gets push/pop protection.
fn is_leaf(e: &Expr) -> bool {
    matches!(e, Expr::IntLit { .. } | Expr::StrLit(_) | Expr::Ident { .. })
}

impl<'s, 'a> FuncCodegen<'s, 'a> {
    /// Evaluate an expression into `dst` (or discard), in the given mode.
    /// Returns the block evaluation continues in.
    pub(super) fn eval(
        &mut self,
        cur: BlockId,
        e: &Expr,
        dst: Option<SymVar>,
        mode: EvalMode,
    ) -> CompileResult<BlockId> {
        if mode == EvalMode::LValue {
            return self.eval_lvalue(cur, e, dst);
        }
        match e {
            Expr::IntLit { value, .. } => {
                if let Some(d) = dst {
                    self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), Value::imm(*value)]));
                }
                Ok(cur)
            }

            Expr::StrLit(text) => {
                if let Some(d) = dst {
                    let label = self.session.string_label(text);
                    self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), Value::Label(label)]));
                }
                Ok(cur)
            }

            Expr::Ident { name, .. } => {
                if let Some(d) = dst {
                    let binding = self.lookup(name)?;
                    self.emit(
                        cur,
                        Inst::new(
                            Op::Ld,
                            vec![Value::Sym(d), Value::Frame(binding.slot.clone())],
                        ),
                    );
                }
                Ok(cur)
            }

            Expr::Unary { op, expr, ty } => self.eval_unary(cur, *op, expr, ty, dst),

            Expr::Binary { op, lhs, rhs, ty } => match op {
                BinOp::LogAnd | BinOp::LogOr => self.eval_logical(cur, *op, lhs, rhs, ty, dst),
                op if op.is_comparison() => self.eval_comparison(cur, *op, lhs, rhs, ty, dst),
                op => self.eval_arith(cur, *op, lhs, rhs, ty, dst),
            },

            Expr::Assign { target, value, ty } => self.eval_assign(cur, target, value, ty, dst),

            Expr::Call { callee, args, ty } => self.eval_call(cur, callee, args, ty, dst),
        }
    }

    pub(super) fn eval_discard(&mut self, cur: BlockId, e: &Expr) -> CompileResult<BlockId> {
        self.eval(cur, e, None, EvalMode::RValue)
    }

    /// Lvalue mode: the destination receives an address.
    fn eval_lvalue(
        &mut self,
        cur: BlockId,
        e: &Expr,
        dst: Option<SymVar>,
    ) -> CompileResult<BlockId> {
        match e {
            Expr::Ident { name, .. } => {
                if let Some(d) = dst {
                    let binding = self.lookup(name)?;
                    self.emit(
                        cur,
                        Inst::new(
                            Op::Lea,
                            vec![Value::Sym(d), Value::Frame(binding.slot.clone())],
                        ),
                    );
                }
                Ok(cur)
            }
            // The address of a dereference is the pointer's value.
            Expr::Unary {
                op: UnOp::Deref,
                expr,
                ..
            } => self.eval(cur, expr, dst, EvalMode::RValue),
            _ => Err(CompileError::CodeGeneration {
                reason: "expression is not an lvalue".to_string(),
            }),
        }
    }

    fn eval_unary(
        &mut self,
        cur: BlockId,
        op: UnOp,
        inner: &Expr,
        ty: &Type,
        dst: Option<SymVar>,
    ) -> CompileResult<BlockId> {
        match op {
            UnOp::Addr => self.eval(cur, inner, dst, EvalMode::LValue),

            UnOp::Deref => {
                let addr = self.new_forced_sym(Width::Long);
                let cur = self.eval(cur, inner, Some(addr), EvalMode::RValue)?;
                if let Some(d) = dst {
                    // Loads through a pointer go via hl; (hl) is the only
                    // register-indirect form that reaches every register.
                    self.emit(
                        cur,
                        Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::Sym(addr)]),
                    );
                    self.emit(
                        cur,
                        Inst::new(
                            Op::Ld,
                            vec![
                                Value::Sym(d),
                                Value::Mem(Box::new(Value::Reg(Reg::Hl)), ty.width()),
                            ],
                        ),
                    );
                }
                Ok(cur)
            }

            UnOp::Neg => {
                let w = self.arith_width(ty, "negate")?;
                let t = self.new_sym(w);
                let cur = self.eval(cur, inner, Some(t), EvalMode::RValue)?;
                let d = dst.unwrap_or_else(|| self.new_sym(w));
                match w {
                    Width::Byte => {
                        self.emit(cur, Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::imm(0)]));
                        self.emit(
                            cur,
                            Inst::new(Op::Sub, vec![Value::Reg(Reg::A), Value::Sym(t)]),
                        );
                        self.emit(
                            cur,
                            Inst::new(Op::Ld, vec![Value::Sym(d), Value::Reg(Reg::A)]),
                        );
                    }
                    _ => {
                        self.emit(
                            cur,
                            Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::imm(0)]),
                        );
                        self.emit(
                            cur,
                            Inst::new(Op::Or, vec![Value::Reg(Reg::A), Value::Reg(Reg::A)]),
                        );
                        self.emit(
                            cur,
                            Inst::new(Op::Sbc, vec![Value::Reg(Reg::Hl), Value::Sym(t)]),
                        );
                        self.emit(
                            cur,
                            Inst::new(Op::Ld, vec![Value::Sym(d), Value::Reg(Reg::Hl)]),
                        );
                    }
                }
                Ok(cur)
            }

            UnOp::BitNot => {
                let w = self.arith_width(ty, "complement")?;
                let t = self.new_sym(w);
                let cur = self.eval(cur, inner, Some(t), EvalMode::RValue)?;
                let d = dst.unwrap_or_else(|| self.new_sym(w));
                match w {
                    Width::Byte => {
                        self.emit(
                            cur,
                            Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::Sym(t)]),
                        );
                        self.emit(
                            cur,
                            Inst::new(Op::Xor, vec![Value::Reg(Reg::A), Value::imm(255)]),
                        );
                        self.emit(
                            cur,
                            Inst::new(Op::Ld, vec![Value::Sym(d), Value::Reg(Reg::A)]),
                        );
                    }
                    _ => {
                        self.emit(
                            cur,
                            Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::Sym(t)]),
                        );
                        self.emit(
                            cur,
                            Inst::new(Op::Ld, vec![Value::Reg(Reg::De), Value::imm(-1)]),
                        );
                        let label = self.session.runtime_label(RuntimeRoutine::IXor);
                        self.emit(cur, Inst::new(Op::Call, vec![Value::Label(label)]));
                        self.emit(
                            cur,
                            Inst::new(Op::Ld, vec![Value::Sym(d), Value::Reg(Reg::Hl)]),
                        );
                    }
                }
                Ok(cur)
            }

            UnOp::Not => {
                let cur = self.emit_tested(cur, inner)?;
                self.materialize_flag(cur, Cond::Z, dst, ty.width())
            }
        }
    }

    /// Stage the left operand for a two-operand template. Returns the block
    /// the template continues in, with the left value in the staging
    /// register (a for byte, hl for wide) and the right value in `t2`.
    fn stage_operands(
        &mut self,
        cur: BlockId,
        w: Width,
        lhs: &Expr,
        rhs: &Expr,
        t2: SymVar,
    ) -> CompileResult<BlockId> {
        let staging = if w == Width::Byte { Reg::A } else { Reg::Hl };
        let guard = if w == Width::Byte { Reg::Af } else { Reg::Hl };
        let t1 = self.new_sym(w);
        let mut cur = self.eval(cur, lhs, Some(t1), EvalMode::RValue)?;
        if is_leaf(rhs) {
            cur = self.eval(cur, rhs, Some(t2), EvalMode::RValue)?;
            self.emit(
                cur,
                Inst::new(Op::Ld, vec![Value::Reg(staging), Value::Sym(t1)]),
            );
        } else {
            // The right operand may split blocks or clobber the staging
            // register; park the left value on the stack meanwhile.
            self.emit(
                cur,
                Inst::new(Op::Ld, vec![Value::Reg(staging), Value::Sym(t1)]),
            );
            self.emit(cur, Inst::new(Op::Push, vec![Value::Reg(guard)]));
            cur = self.eval(cur, rhs, Some(t2), EvalMode::RValue)?;
            self.emit(cur, Inst::new(Op::Pop, vec![Value::Reg(guard)]));
        }
        Ok(cur)
    }

    fn eval_arith(
        &mut self,
        cur: BlockId,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        ty: &Type,
        dst: Option<SymVar>,
    ) -> CompileResult<BlockId> {
        let w = self.arith_width(ty, "arithmetic")?;
        let t2 = self.new_sym(w);
        let cur = self.stage_operands(cur, w, lhs, rhs, t2)?;
        let d = dst.unwrap_or_else(|| self.new_sym(w));
        match w {
            Width::Byte => self.arith_byte(cur, op, t2, d),
            _ => self.arith_long(cur, op, t2, d),
        }?;
        Ok(cur)
    }

    /// Byte operator templates; left operand staged in a.
    fn arith_byte(&mut self, cur: BlockId, op: BinOp, t2: SymVar, d: SymVar) -> CompileResult<()> {
        let a = Value::Reg(Reg::A);
        match op {
            BinOp::Add | BinOp::Sub | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                let mnemonic = match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Sub,
                    BinOp::BitAnd => Op::And,
                    BinOp::BitOr => Op::Or,
                    _ => Op::Xor,
                };
                self.emit(cur, Inst::new(mnemonic, vec![a.clone(), Value::Sym(t2)]));
                self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), a]));
            }
            BinOp::Mul => {
                // mlt multiplies b by c into bc; the byte product is in c.
                self.emit(cur, Inst::new(Op::Ld, vec![Value::Reg(Reg::B), a]));
                self.emit(
                    cur,
                    Inst::new(Op::Ld, vec![Value::Reg(Reg::C), Value::Sym(t2)]),
                );
                self.emit(cur, Inst::new(Op::Mlt, vec![Value::Reg(Reg::Bc)]));
                self.emit(
                    cur,
                    Inst::new(Op::Ld, vec![Value::Sym(d), Value::Reg(Reg::C)]),
                );
            }
            BinOp::Div | BinOp::Rem => {
                let routine = if op == BinOp::Div {
                    RuntimeRoutine::BDivS
                } else {
                    RuntimeRoutine::BRemS
                };
                self.emit(cur, Inst::new(Op::Ld, vec![Value::Reg(Reg::B), a.clone()]));
                self.emit(
                    cur,
                    Inst::new(Op::Ld, vec![Value::Reg(Reg::C), Value::Sym(t2)]),
                );
                let label = self.session.runtime_label(routine);
                self.emit(cur, Inst::new(Op::Call, vec![Value::Label(label)]));
                self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), a]));
            }
            BinOp::Shl | BinOp::Shr => {
                let routine = if op == BinOp::Shl {
                    RuntimeRoutine::BShl
                } else {
                    RuntimeRoutine::BShr
                };
                self.emit(
                    cur,
                    Inst::new(Op::Ld, vec![Value::Reg(Reg::B), Value::Sym(t2)]),
                );
                let label = self.session.runtime_label(routine);
                self.emit(cur, Inst::new(Op::Call, vec![Value::Label(label)]));
                self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), a]));
            }
            _ => {
                return Err(CompileError::CodeGeneration {
                    reason: format!("operator {op:?} is not an arithmetic operator"),
                })
            }
        }
        Ok(())
    }

    /// Long operator templates; left operand staged in hl.
    fn arith_long(&mut self, cur: BlockId, op: BinOp, t2: SymVar, d: SymVar) -> CompileResult<()> {
        let hl = Value::Reg(Reg::Hl);
        match op {
            BinOp::Add => {
                self.emit(cur, Inst::new(Op::Add, vec![hl.clone(), Value::Sym(t2)]));
                self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), hl]));
            }
            BinOp::Sub => {
                self.emit(
                    cur,
                    Inst::new(Op::Or, vec![Value::Reg(Reg::A), Value::Reg(Reg::A)]),
                );
                self.emit(cur, Inst::new(Op::Sbc, vec![hl.clone(), Value::Sym(t2)]));
                self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), hl]));
            }
            BinOp::Mul
            | BinOp::Div
            | BinOp::Rem
            | BinOp::BitAnd
            | BinOp::BitOr
            | BinOp::BitXor
            | BinOp::Shl
            | BinOp::Shr => {
                let routine = match op {
                    BinOp::Mul => RuntimeRoutine::IMul,
                    BinOp::Div => RuntimeRoutine::IDivS,
                    BinOp::Rem => RuntimeRoutine::IRemS,
                    BinOp::BitAnd => RuntimeRoutine::IAnd,
                    BinOp::BitOr => RuntimeRoutine::IOr,
                    BinOp::BitXor => RuntimeRoutine::IXor,
                    BinOp::Shl => RuntimeRoutine::IShl,
                    _ => RuntimeRoutine::IShrS,
                };
                self.emit(
                    cur,
                    Inst::new(Op::Ld, vec![Value::Reg(Reg::De), Value::Sym(t2)]),
                );
                let label = self.session.runtime_label(routine);
                self.emit(cur, Inst::new(Op::Call, vec![Value::Label(label)]));
                self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), hl]));
            }
            _ => {
                return Err(CompileError::CodeGeneration {
                    reason: format!("operator {op:?} is not an arithmetic operator"),
                })
            }
        }
        Ok(())
    }

    fn eval_comparison(
        &mut self,
        cur: BlockId,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        ty: &Type,
        dst: Option<SymVar>,
    ) -> CompileResult<BlockId> {
        let w = self.arith_width(&lhs.ty(), "comparison")?;
        // Gt and Le compare the swapped operands so a single condition
        // code decides the outcome.
        let swapped = matches!(op, BinOp::Gt | BinOp::Le);
        let cc = match op {
            BinOp::Eq => Cond::Z,
            BinOp::Ne => Cond::Nz,
            BinOp::Lt | BinOp::Gt => Cond::C,
            _ => Cond::Nc,
        };

        let t2 = self.new_sym(w);
        let cur = self.stage_operands(cur, w, lhs, rhs, t2)?;
        match w {
            Width::Byte => {
                if swapped {
                    self.emit(
                        cur,
                        Inst::new(Op::Ld, vec![Value::Reg(Reg::B), Value::Reg(Reg::A)]),
                    );
                    self.emit(
                        cur,
                        Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::Sym(t2)]),
                    );
                    self.emit(
                        cur,
                        Inst::new(Op::Cp, vec![Value::Reg(Reg::A), Value::Reg(Reg::B)]),
                    );
                } else {
                    self.emit(
                        cur,
                        Inst::new(Op::Cp, vec![Value::Reg(Reg::A), Value::Sym(t2)]),
                    );
                }
            }
            _ => {
                self.emit(
                    cur,
                    Inst::new(Op::Ld, vec![Value::Reg(Reg::De), Value::Sym(t2)]),
                );
                if swapped {
                    self.emit(
                        cur,
                        Inst::new(Op::Ex, vec![Value::Reg(Reg::De), Value::Reg(Reg::Hl)]),
                    );
                }
                self.emit(
                    cur,
                    Inst::new(Op::Or, vec![Value::Reg(Reg::A), Value::Reg(Reg::A)]),
                );
                self.emit(
                    cur,
                    Inst::new(Op::Sbc, vec![Value::Reg(Reg::Hl), Value::Reg(Reg::De)]),
                );
            }
        }
        self.materialize_flag(cur, cc, dst, ty.width())
    }

    fn eval_logical(
        &mut self,
        cur: BlockId,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        ty: &Type,
        dst: Option<SymVar>,
    ) -> CompileResult<BlockId> {
        let rhs_blk = self.new_block();
        let true_blk = self.new_block();
        let false_blk = self.new_block();

        match op {
            BinOp::LogAnd => self.emit_predicate(cur, lhs, rhs_blk, false_blk)?,
            _ => self.emit_predicate(cur, lhs, true_blk, rhs_blk)?,
        }
        self.emit_predicate(rhs_blk, rhs, true_blk, false_blk)?;

        self.finish_bool(true_blk, false_blk, dst, ty.width())
    }

    /// Evaluate a boolean expression and set the flags: NZ means true.
    /// Returns the block holding the test; callers attach the conditional
    /// transitions that consume the implicit flag state.
    fn emit_tested(&mut self, cur: BlockId, e: &Expr) -> CompileResult<BlockId> {
        let w = self.arith_width(&e.ty(), "condition")?;
        let t = self.new_sym(w);
        let cur = self.eval(cur, e, Some(t), EvalMode::RValue)?;
        match w {
            Width::Byte => {
                self.emit(
                    cur,
                    Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::Sym(t)]),
                );
                self.emit(
                    cur,
                    Inst::new(Op::Or, vec![Value::Reg(Reg::A), Value::Reg(Reg::A)]),
                );
            }
            _ => {
                self.emit(
                    cur,
                    Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::Sym(t)]),
                );
                self.emit(
                    cur,
                    Inst::new(Op::Ld, vec![Value::Reg(Reg::De), Value::imm(0)]),
                );
                self.emit(
                    cur,
                    Inst::new(Op::Or, vec![Value::Reg(Reg::A), Value::Reg(Reg::A)]),
                );
                self.emit(
                    cur,
                    Inst::new(Op::Sbc, vec![Value::Reg(Reg::Hl), Value::Reg(Reg::De)]),
                );
            }
        }
        Ok(cur)
    }

    /// The unified control-flow primitive: evaluate a boolean expression
    /// into a temporary, test it nonzero, then transition NZ to `taken`
    /// and Z to `not_taken`.
    pub(super) fn emit_predicate(
        &mut self,
        cur: BlockId,
        e: &Expr,
        taken: BlockId,
        not_taken: BlockId,
    ) -> CompileResult<()> {
        let cur = self.emit_tested(cur, e)?;
        let block = self.graph.block_mut(cur);
        block.jump_if(Cond::Nz, taken);
        block.jump_if(Cond::Z, not_taken);
        Ok(())
    }

    /// Turn the current flag state into a 0/1 value.
    fn materialize_flag(
        &mut self,
        cur: BlockId,
        cc: Cond,
        dst: Option<SymVar>,
        width: Width,
    ) -> CompileResult<BlockId> {
        let true_blk = self.new_block();
        let false_blk = self.new_block();
        let block = self.graph.block_mut(cur);
        block.jump_if(cc, true_blk);
        block.jump_if(cc.negate(), false_blk);
        self.finish_bool(true_blk, false_blk, dst, width)
    }

    /// Shared tail of boolean materialization: the true and false blocks
    /// load 1/0 into the accumulator and meet in a join block that moves
    /// the result to its destination. Only the accumulator crosses blocks.
    fn finish_bool(
        &mut self,
        true_blk: BlockId,
        false_blk: BlockId,
        dst: Option<SymVar>,
        width: Width,
    ) -> CompileResult<BlockId> {
        let join = self.new_block();
        self.emit(
            true_blk,
            Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::imm(1)]),
        );
        self.graph.block_mut(true_blk).jump_to(join);
        self.emit(
            false_blk,
            Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::imm(0)]),
        );
        self.graph.block_mut(false_blk).jump_to(join);

        if let Some(d) = dst {
            match width {
                Width::Byte => {
                    self.emit(
                        join,
                        Inst::new(Op::Ld, vec![Value::Sym(d), Value::Reg(Reg::A)]),
                    );
                }
                _ => {
                    self.emit(
                        join,
                        Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::imm(0)]),
                    );
                    self.emit(
                        join,
                        Inst::new(Op::Ld, vec![Value::Reg(Reg::L), Value::Reg(Reg::A)]),
                    );
                    self.emit(
                        join,
                        Inst::new(Op::Ld, vec![Value::Sym(d), Value::Reg(Reg::Hl)]),
                    );
                }
            }
        }
        Ok(join)
    }

    /// Store an evaluated expression into a direct location (frame slot).
    /// Returns the continuation block and the value's temporary for
    /// assignment-expression forwarding.
    pub(super) fn store_to(
        &mut self,
        cur: BlockId,
        location: Value<'a>,
        ty: &Type,
        e: &Expr,
    ) -> CompileResult<BlockId> {
        let t = self.new_sym(ty.width());
        let cur = self.eval(cur, e, Some(t), EvalMode::RValue)?;
        self.emit(cur, Inst::new(Op::Ld, vec![location, Value::Sym(t)]));
        Ok(cur)
    }

    fn eval_assign(
        &mut self,
        cur: BlockId,
        target: &Expr,
        value: &Expr,
        ty: &Type,
        dst: Option<SymVar>,
    ) -> CompileResult<BlockId> {
        match target {
            Expr::Ident { name, .. } => {
                let binding = self.lookup(name)?;
                let t = self.new_sym(ty.width());
                let cur = self.eval(cur, value, Some(t), EvalMode::RValue)?;
                self.emit(
                    cur,
                    Inst::new(
                        Op::Ld,
                        vec![Value::Frame(binding.slot.clone()), Value::Sym(t)],
                    ),
                );
                if let Some(d) = dst {
                    self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), Value::Sym(t)]));
                }
                Ok(cur)
            }

            Expr::Unary {
                op: UnOp::Deref,
                expr: pointer,
                ..
            } => {
                let addr = self.new_forced_sym(Width::Long);
                let mut cur = self.eval(cur, pointer, Some(addr), EvalMode::RValue)?;
                let t = self.new_sym(ty.width());
                self.emit(
                    cur,
                    Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::Sym(addr)]),
                );
                if is_leaf(value) {
                    cur = self.eval(cur, value, Some(t), EvalMode::RValue)?;
                } else {
                    self.emit(cur, Inst::new(Op::Push, vec![Value::Reg(Reg::Hl)]));
                    cur = self.eval(cur, value, Some(t), EvalMode::RValue)?;
                    self.emit(cur, Inst::new(Op::Pop, vec![Value::Reg(Reg::Hl)]));
                }
                self.emit(
                    cur,
                    Inst::new(
                        Op::Ld,
                        vec![
                            Value::Mem(Box::new(Value::Reg(Reg::Hl)), ty.width()),
                            Value::Sym(t),
                        ],
                    ),
                );
                if let Some(d) = dst {
                    self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), Value::Sym(t)]));
                }
                Ok(cur)
            }

            _ => Err(CompileError::CodeGeneration {
                reason: "assignment target is not an lvalue".to_string(),
            }),
        }
    }

    fn eval_call(
        &mut self,
        cur: BlockId,
        callee: &str,
        args: &[Expr],
        ty: &Type,
        dst: Option<SymVar>,
    ) -> CompileResult<BlockId> {
        let mut cur = cur;
        // Arguments are pushed right to left, promoted to long; each one
        // is pushed as soon as it is evaluated so no temporary has to
        // survive another argument's block structure.
        for arg in args.iter().rev() {
            let w = self.arith_width(&arg.ty(), "argument")?;
            let t = self.new_sym(w);
            cur = self.eval(cur, arg, Some(t), EvalMode::RValue)?;
            match w {
                Width::Byte => {
                    self.emit(
                        cur,
                        Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::imm(0)]),
                    );
                    self.emit(
                        cur,
                        Inst::new(Op::Ld, vec![Value::Reg(Reg::L), Value::Sym(t)]),
                    );
                }
                _ => {
                    self.emit(
                        cur,
                        Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::Sym(t)]),
                    );
                }
            }
            self.emit(cur, Inst::new(Op::Push, vec![Value::Reg(Reg::Hl)]));
        }

        let label = self.session.function_label(callee);
        self.emit(cur, Inst::new(Op::Call, vec![Value::Label(label)]));

        // Caller cleanup: one pop per 3-byte argument slot.
        for _ in args {
            self.emit(cur, Inst::new(Op::Pop, vec![Value::Reg(Reg::Bc)]));
        }

        if let Some(d) = dst {
            let src = if ty.width() == Width::Byte {
                Reg::A
            } else {
                Reg::Hl
            };
            self.emit(cur, Inst::new(Op::Ld, vec![Value::Sym(d), Value::Reg(src)]));
        }
        Ok(cur)
    }
}
