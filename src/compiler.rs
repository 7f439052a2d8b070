// This module drives the whole backend pipeline. One Compiler borrows the session and
// processes a translation unit function by function: lower the AST into a block graph,
// allocate registers per block, expand the pseudo register-pair moves, run the peephole
// catalog, resolve the return placeholders into epilogue jumps, and serialize. Passes
// run in exactly this order on each block and never interleave.

//! Compilation pipeline.

use log::{debug, info};
use std::mem;

use crate::ast::Program;
use crate::block::FunctionImpl;
use crate::codegen::FuncCodegen;
use crate::emit;
use crate::error::CompileResult;
use crate::instruction::Inst;
use crate::peephole;
use crate::register_alloc::allocate_block;
use crate::session::CodegenSession;

pub struct Compiler<'s, 'a> {
    session: &'s CodegenSession<'a>,
}

impl<'s, 'a> Compiler<'s, 'a> {
    pub fn new(session: &'s CodegenSession<'a>) -> Self {
        Self { session }
    }

    /// Compile a whole translation unit to assembly text.
    pub fn compile(&self, program: &Program) -> CompileResult<String> {
        let mut out = String::new();
        for f in &program.functions {
            let lowered = self.compile_function(f)?;
            out.push_str(&emit::serialize_function(&lowered)?);
        }
        out.push_str(&emit::serialize_strings(self.session));
        info!("compiled {} function(s)", program.functions.len());
        Ok(out)
    }

    /// Run every per-block pass over one function, in pipeline order.
    pub fn compile_function(&self, f: &crate::ast::Function) -> CompileResult<FunctionImpl<'a>> {
        debug!("compiling function {}", f.name);
        let mut lowered = FuncCodegen::new(self.session, f).lower_function(f)?;
        let roots = lowered.roots();

        for id in lowered.graph.traversal(&roots) {
            allocate_block(self.session, lowered.graph.block_mut(id))?;
        }

        // Expand pseudo moves between register pairs before the peephole
        // pass so the resulting push/pop sequences can fold.
        lowered.graph.for_each_block(&roots, |_, block| {
            let insts = mem::take(&mut block.insts);
            block.insts = insts.into_iter().flat_map(Inst::resolve).collect();
        });

        lowered.graph.for_each_block(&roots, |_, block| {
            peephole::run_block(self.session, block);
        });

        lowered.resolve_returns();
        Ok(lowered)
    }
}
