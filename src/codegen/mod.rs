// This module provides the code-generation walker that lowers the typed AST into the
// block IR. FuncCodegen is the per-function driver: it owns the growing block graph, the
// stack frame, the scope stack mapping names to frame slots, the loop-context stack used
// by break/continue/goto, and the symbolic-variable counter. Statements thread a current
// block through the walk (codegen/stmt.rs); expressions evaluate into explicit symbolic
// destinations in lvalue or rvalue mode (codegen/expr.rs). The prologue is spliced into
// the entry block only after the whole body has been walked, when the frame size is
// final, and the epilogue block carries the single teardown sequence every return
// placeholder later resolves to.

//! AST walker: lowers declarations, statements and expressions into blocks.

mod expr;
mod stmt;

use hashbrown::HashMap;
use log::debug;

use crate::ast::{Function, Type};
use crate::block::{BlockGraph, BlockId, FunctionImpl, StackFrame, Transition};
use crate::error::{CompileError, CompileResult};
use crate::instruction::{Inst, Op};
use crate::session::CodegenSession;
use crate::value::{FrameSlot, Reg, SymVar, Value, Width};

/// Name binding inside the walker: frame slot plus resolved type.
#[derive(Debug, Clone)]
struct Binding {
    slot: FrameSlot,
    ty: Type,
}

/// Loop context consulted by break/continue/goto. Pushed when entering a
/// loop construct, popped on exit.
#[derive(Debug, Clone)]
struct LoopCtx {
    label: Option<String>,
    /// Continue/goto target.
    entry: BlockId,
    /// Break target.
    exit: BlockId,
}

/// Per-function code generator.
pub struct FuncCodegen<'s, 'a> {
    session: &'s CodegenSession<'a>,
    graph: BlockGraph<'a>,
    frame: StackFrame,
    scopes: Vec<HashMap<String, Binding>>,
    loops: Vec<LoopCtx>,
    next_sym: u32,
    epilogue: BlockId,
    ret_ty: Type,
}

impl<'s, 'a> FuncCodegen<'s, 'a> {
    pub fn new(session: &'s CodegenSession<'a>, f: &Function) -> Self {
        let mut graph = BlockGraph::new();
        let entry = graph.add_block(session.function_label(&f.name));
        debug_assert_eq!(entry, BlockId(0));
        let epilogue = graph.add_block(session.new_block_label());
        session.record_block_created();
        session.record_block_created();
        Self {
            session,
            graph,
            frame: StackFrame::new(),
            scopes: vec![HashMap::new()],
            loops: Vec::new(),
            next_sym: 0,
            epilogue,
            ret_ty: f.ret.clone(),
        }
    }

    /// Lower a whole function into its block graph.
    pub fn lower_function(mut self, f: &Function) -> CompileResult<FunctionImpl<'a>> {
        debug!("lowering function {}", f.name);
        let entry = BlockId(0);

        for param in &f.params {
            let slot = self.frame.add_arg(param.ty.size());
            self.bind(&param.name, slot, param.ty.clone())?;
        }

        let mut cur = entry;
        for stmt in &f.body {
            cur = self.stmt(cur, stmt)?;
        }
        // Implicit return at the end of the body.
        if self.graph.block(cur).exits.is_empty() {
            self.graph
                .block_mut(cur)
                .exits
                .push(Transition::Ret { cond: None });
        }

        self.emit_epilogue();
        self.splice_prologue(entry);

        self.session.record_function_compiled();
        Ok(FunctionImpl {
            name: self.graph.block(entry).label,
            entry,
            epilogue: self.epilogue,
            frame_bytes: self.frame.frame_bytes() as u32,
            graph: self.graph,
        })
    }

    /// Single teardown sequence; every return resolves here.
    fn emit_epilogue(&mut self) {
        let epi = self.epilogue;
        self.emit(
            epi,
            Inst::new(Op::Ld, vec![Value::Reg(Reg::Sp), Value::Reg(Reg::Ix)]),
        );
        self.emit(epi, Inst::new(Op::Pop, vec![Value::Reg(Reg::Ix)]));
        self.emit(epi, Inst::new(Op::Ret, vec![]));
    }

    /// Splice the prologue at index 0 of the entry block once the frame
    /// size is final.
    fn splice_prologue(&mut self, entry: BlockId) {
        let locals = self.frame.locals_bytes();
        let mut prologue = vec![
            Inst::new(Op::Push, vec![Value::Reg(Reg::Ix)]),
            Inst::new(Op::Ld, vec![Value::Reg(Reg::Ix), Value::imm(0)]),
            Inst::new(Op::Add, vec![Value::Reg(Reg::Ix), Value::Reg(Reg::Sp)]),
        ];
        if locals > 0 {
            prologue.push(Inst::new(
                Op::Ld,
                vec![Value::Reg(Reg::Hl), Value::imm(-locals)],
            ));
            prologue.push(Inst::new(
                Op::Add,
                vec![Value::Reg(Reg::Hl), Value::Reg(Reg::Sp)],
            ));
            prologue.push(Inst::new(
                Op::Ld,
                vec![Value::Reg(Reg::Sp), Value::Reg(Reg::Hl)],
            ));
        }
        for _ in &prologue {
            self.session.record_instruction_emitted();
        }
        let block = self.graph.block_mut(entry);
        block.insts.splice(0..0, prologue);
    }

    /// Fresh symbolic variable.
    fn new_sym(&mut self, width: Width) -> SymVar {
        let id = self.next_sym;
        self.next_sym += 1;
        SymVar {
            id,
            width,
            force_reg: false,
        }
    }

    /// Fresh symbolic variable the allocator must place in a register
    /// (address temporaries dereferenced through a register pair).
    fn new_forced_sym(&mut self, width: Width) -> SymVar {
        let mut v = self.new_sym(width);
        v.force_reg = true;
        v
    }

    /// Fresh block with a generated label.
    fn new_block(&mut self) -> BlockId {
        self.session.record_block_created();
        self.graph.add_block(self.session.new_block_label())
    }

    fn emit(&mut self, block: BlockId, inst: Inst<'a>) {
        self.session.record_instruction_emitted();
        self.graph.block_mut(block).push(inst);
    }

    fn bind(&mut self, name: &str, slot: FrameSlot, ty: Type) -> CompileResult<()> {
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| CompileError::CodeGeneration {
                reason: format!("no open scope to bind '{name}'"),
            })?;
        scope.insert(name.to_string(), Binding { slot, ty });
        Ok(())
    }

    fn lookup(&self, name: &str) -> CompileResult<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .cloned()
            .ok_or_else(|| CompileError::CodeGeneration {
                reason: format!("unresolved identifier '{name}' reached the backend"),
            })
    }

    /// Width dispatch for operators: word arithmetic is unimplemented and
    /// must fail fast rather than emit wrong code.
    fn arith_width(&self, ty: &Type, operation: &'static str) -> CompileResult<Width> {
        match ty.width() {
            Width::Word => Err(CompileError::UnsupportedWidth {
                operation,
                width: Width::Word.bits(),
            }),
            w => Ok(w),
        }
    }
}
