//! ez80cc - C-subset backend for the eZ80.
//!
//! This crate is the code-generating half of a small C compiler targeting
//! the eZ80 in ADL mode. It consumes a typed AST produced by an external
//! frontend and emits assembly text through a fixed pipeline: lower to a
//! basic-block IR over symbolic variables, allocate registers per block by
//! interval scanning, expand pseudo instructions, run a peephole catalog,
//! and serialize.
//!
//! # Primary Usage
//!
//! ```ignore
//! use ez80cc::{CodegenSession, Compiler};
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let session = CodegenSession::new(&arena);
//! let asm = Compiler::new(&session).compile(&program)?;
//! ```
//!
//! # Architecture
//!
//! - [`ast`] - Typed input AST (the frontend boundary)
//! - [`value`] - Operand model and structural matching
//! - [`instruction`] - Instruction model and templates
//! - [`block`] - Basic blocks, transitions, stack frames
//! - [`codegen`] - AST walker producing the block graph
//! - [`register_alloc`] - Per-block interval allocation
//! - [`peephole`] - Post-allocation rewrite catalog
//! - [`emit`] - Assembly text serialization
//! - [`session`] - Label interning, string pool, statistics

pub mod ast;
pub mod block;
pub mod codegen;
pub mod compiler;
pub mod emit;
pub mod error;
pub mod instruction;
pub mod peephole;
pub mod register_alloc;
pub mod session;
pub mod value;

pub use ast::{BinOp, Expr, Function, Param, Program, Stmt, Type, UnOp};
pub use block::{Block, BlockGraph, BlockId, FunctionImpl, StackFrame, Transition};
pub use compiler::Compiler;
pub use error::{CompileError, CompileResult};
pub use instruction::{Cond, Inst, InstPattern, Op};
pub use session::{CodegenSession, RuntimeRoutine, SessionStats};
pub use value::{Reg, SymVar, Value, ValuePattern, Width};
