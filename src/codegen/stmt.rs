//! Statement lowering.
//!
//! Every statement takes the current block, allocates whatever auxiliary
//! blocks it needs, wires transitions between them, and returns the new
//! current block. Nested control structures become a block graph this way.

use super::expr::EvalMode;
use super::{FuncCodegen, LoopCtx};
use crate::ast::Stmt;
use crate::block::{BlockId, Transition};
use crate::error::{CompileError, CompileResult};
use crate::instruction::{Inst, Op};
use crate::value::{Reg, Value};

impl<'s, 'a> FuncCodegen<'s, 'a> {
    /// Lower one statement; returns the block subsequent statements
    /// continue in.
    pub(super) fn stmt(&mut self, cur: BlockId, stmt: &Stmt) -> CompileResult<BlockId> {
        match stmt {
            Stmt::Expr(e) => self.eval_discard(cur, e),

            Stmt::Local { name, ty, init } => {
                let slot = self.frame.add_local(ty.size());
                self.bind(name, slot.clone(), ty.clone())?;
                match init {
                    Some(e) => self.store_to(cur, Value::Frame(slot), ty, e),
                    None => Ok(cur),
                }
            }

            Stmt::If {
                cond,
                then_body,
                else_body,
            } => self.stmt_if(cur, cond, then_body, else_body.as_deref()),

            Stmt::While { label, cond, body } => self.stmt_while(cur, label.as_deref(), cond, body),

            Stmt::For {
                init,
                cond,
                step,
                body,
            } => self.stmt_for(cur, init.as_ref(), cond.as_ref(), step.as_ref(), body),

            Stmt::Loop { label, body } => self.stmt_loop(cur, label.as_deref(), body),

            Stmt::Break => {
                let ctx = self.innermost_loop("break")?;
                self.graph.block_mut(cur).jump_to(ctx.exit);
                Ok(self.new_block())
            }

            Stmt::Continue => {
                let ctx = self.innermost_loop("continue")?;
                self.graph.block_mut(cur).jump_to(ctx.entry);
                Ok(self.new_block())
            }

            Stmt::Goto(label) => {
                let target = self
                    .loops
                    .iter()
                    .rev()
                    .find(|ctx| ctx.label.as_deref() == Some(label.as_str()))
                    .map(|ctx| ctx.entry)
                    .ok_or_else(|| CompileError::UnknownLabel {
                        name: label.clone(),
                    })?;
                self.graph.block_mut(cur).jump_to(target);
                Ok(self.new_block())
            }

            Stmt::Return(value) => self.stmt_return(cur, value.as_ref()),

            Stmt::Block(body) => {
                self.scopes.push(Default::default());
                let mut cur = cur;
                for stmt in body {
                    cur = self.stmt(cur, stmt)?;
                }
                self.scopes.pop();
                Ok(cur)
            }
        }
    }

    fn stmt_if(
        &mut self,
        cur: BlockId,
        cond: &crate::ast::Expr,
        then_body: &[Stmt],
        else_body: Option<&[Stmt]>,
    ) -> CompileResult<BlockId> {
        let then_blk = self.new_block();
        let join = self.new_block();

        match else_body {
            Some(else_body) => {
                let else_blk = self.new_block();
                self.emit_predicate(cur, cond, then_blk, else_blk)?;

                let then_end = self.stmts(then_blk, then_body)?;
                self.graph.block_mut(then_end).jump_to(join);

                let else_end = self.stmts(else_blk, else_body)?;
                self.graph.block_mut(else_end).jump_to(join);
            }
            None => {
                self.emit_predicate(cur, cond, then_blk, join)?;
                let then_end = self.stmts(then_blk, then_body)?;
                self.graph.block_mut(then_end).jump_to(join);
            }
        }
        Ok(join)
    }

    fn stmt_while(
        &mut self,
        cur: BlockId,
        label: Option<&str>,
        cond: &crate::ast::Expr,
        body: &[Stmt],
    ) -> CompileResult<BlockId> {
        let cond_blk = self.new_block();
        let body_blk = self.new_block();
        let exit = self.new_block();

        self.graph.block_mut(cur).jump_to(cond_blk);
        self.emit_predicate(cond_blk, cond, body_blk, exit)?;

        self.loops.push(LoopCtx {
            label: label.map(str::to_string),
            entry: cond_blk,
            exit,
        });
        let body_end = self.stmts(body_blk, body)?;
        self.loops.pop();

        self.graph.block_mut(body_end).jump_to(cond_blk);
        Ok(exit)
    }

    fn stmt_for(
        &mut self,
        cur: BlockId,
        init: Option<&crate::ast::Expr>,
        cond: Option<&crate::ast::Expr>,
        step: Option<&crate::ast::Expr>,
        body: &[Stmt],
    ) -> CompileResult<BlockId> {
        let mut cur = cur;
        if let Some(init) = init {
            cur = self.eval_discard(cur, init)?;
        }

        let cond_blk = self.new_block();
        let body_blk = self.new_block();
        let step_blk = self.new_block();
        let exit = self.new_block();

        self.graph.block_mut(cur).jump_to(cond_blk);
        match cond {
            Some(cond) => {
                self.emit_predicate(cond_blk, cond, body_blk, exit)?;
            }
            None => self.graph.block_mut(cond_blk).jump_to(body_blk),
        }

        // Continue re-enters at the step block.
        self.loops.push(LoopCtx {
            label: None,
            entry: step_blk,
            exit,
        });
        let body_end = self.stmts(body_blk, body)?;
        self.loops.pop();
        self.graph.block_mut(body_end).jump_to(step_blk);

        let step_end = match step {
            Some(step) => self.eval_discard(step_blk, step)?,
            None => step_blk,
        };
        self.graph.block_mut(step_end).jump_to(cond_blk);
        Ok(exit)
    }

    fn stmt_loop(
        &mut self,
        cur: BlockId,
        label: Option<&str>,
        body: &[Stmt],
    ) -> CompileResult<BlockId> {
        let body_blk = self.new_block();
        let exit = self.new_block();
        self.graph.block_mut(cur).jump_to(body_blk);

        self.loops.push(LoopCtx {
            label: label.map(str::to_string),
            entry: body_blk,
            exit,
        });
        let body_end = self.stmts(body_blk, body)?;
        self.loops.pop();

        self.graph.block_mut(body_end).jump_to(body_blk);
        Ok(exit)
    }

    fn stmt_return(
        &mut self,
        cur: BlockId,
        value: Option<&crate::ast::Expr>,
    ) -> CompileResult<BlockId> {
        let mut cur = cur;
        if let Some(e) = value {
            let width = self.arith_width(&self.ret_ty.clone(), "return")?;
            let t = self.new_sym(width);
            cur = self.eval(cur, e, Some(t), EvalMode::RValue)?;
            let ret_reg = if width.is_wide() { Reg::Hl } else { Reg::A };
            self.emit(
                cur,
                Inst::new(Op::Ld, vec![Value::Reg(ret_reg), Value::Sym(t)]),
            );
        }
        self.graph
            .block_mut(cur)
            .exits
            .push(Transition::Ret { cond: None });
        // Statements after a return land in a fresh, transition-less block.
        Ok(self.new_block())
    }

    fn stmts(&mut self, mut cur: BlockId, body: &[Stmt]) -> CompileResult<BlockId> {
        for stmt in body {
            cur = self.stmt(cur, stmt)?;
        }
        Ok(cur)
    }

    fn innermost_loop(&self, what: &'static str) -> CompileResult<LoopCtx> {
        self.loops
            .last()
            .cloned()
            .ok_or_else(|| CompileError::CodeGeneration {
                reason: format!("{what} outside of a loop reached the backend"),
            })
    }
}
