// This module implements the basic-block control-flow graph: blocks with interned labels,
// stable-index instruction vectors and ordered outgoing transitions; jump and
// return-placeholder transitions; an id-indexed block arena that never deletes blocks
// (their lifetime is the compilation run); traversal rooted at both the entry and the
// epilogue block with a visited set so cyclic graphs are safe; the per-function container
// binding entry, epilogue and frame size together; and the monotonically growing stack
// frame that assigns local and argument slots during code generation.

//! Basic blocks, transitions and graph traversal.

use hashbrown::HashSet;

use crate::instruction::{Cond, Inst};
use crate::value::FrameSlot;

/// Stable handle to a block in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Outgoing edge of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Jump to another block, optionally conditional.
    Jump {
        target: BlockId,
        cond: Option<Cond>,
    },
    /// Deferred return: resolved into a jump to the function's single
    /// epilogue block before serialization.
    Ret { cond: Option<Cond> },
}

/// One basic block. Instructions keep stable indices: passes replace or
/// splice at recorded indices, never rearrange.
#[derive(Debug)]
pub struct Block<'a> {
    pub label: &'a str,
    pub insts: Vec<Inst<'a>>,
    pub exits: Vec<Transition>,
}

impl<'a> Block<'a> {
    pub fn new(label: &'a str) -> Self {
        Self {
            label,
            insts: Vec::new(),
            exits: Vec::new(),
        }
    }

    /// A block with no outgoing transitions is dead: nothing escapes it.
    /// This is only a superficial signal, not dead-code elimination.
    pub fn is_live(&self) -> bool {
        !self.exits.is_empty()
    }

    pub fn push(&mut self, inst: Inst<'a>) {
        self.insts.push(inst);
    }

    /// Wire an unconditional jump out of this block.
    pub fn jump_to(&mut self, target: BlockId) {
        self.exits.push(Transition::Jump { target, cond: None });
    }

    /// Wire a conditional jump out of this block.
    pub fn jump_if(&mut self, cond: Cond, target: BlockId) {
        self.exits.push(Transition::Jump {
            target,
            cond: Some(cond),
        });
    }
}

/// Id-indexed arena of blocks. Blocks are created during code generation,
/// mutated by every later pass, and never deleted.
#[derive(Debug, Default)]
pub struct BlockGraph<'a> {
    blocks: Vec<Block<'a>>,
}

impl<'a> BlockGraph<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, label: &'a str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(label));
        id
    }

    pub fn block(&self, id: BlockId) -> &Block<'a> {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block<'a> {
        &mut self.blocks[id.0 as usize]
    }

    /// Reachable blocks in traversal order: depth-first from each root in
    /// turn, following transition order, with a shared visited set. The
    /// epilogue is passed as a second root because before return-placeholder
    /// resolution nothing jumps to it explicitly. Safe on cyclic graphs.
    pub fn traversal(&self, roots: &[BlockId]) -> Vec<BlockId> {
        let mut order = Vec::new();
        let mut visited: HashSet<BlockId> = HashSet::new();
        let mut stack = Vec::new();
        for &root in roots {
            stack.push(root);
            while let Some(id) = stack.pop() {
                if !visited.insert(id) {
                    continue;
                }
                order.push(id);
                // Push successors in reverse so the first transition is
                // visited first.
                for t in self.block(id).exits.iter().rev() {
                    if let Transition::Jump { target, .. } = t {
                        if !visited.contains(target) {
                            stack.push(*target);
                        }
                    }
                }
            }
        }
        order
    }

    /// Visit every reachable block mutably in traversal order.
    pub fn for_each_block<F>(&mut self, roots: &[BlockId], mut f: F)
    where
        F: FnMut(BlockId, &mut Block<'a>),
    {
        for id in self.traversal(roots) {
            f(id, self.block_mut(id));
        }
    }
}

/// A lowered function: its graph, entry and epilogue blocks, and the final
/// frame size in bytes.
#[derive(Debug)]
pub struct FunctionImpl<'a> {
    pub name: &'a str,
    pub graph: BlockGraph<'a>,
    pub entry: BlockId,
    pub epilogue: BlockId,
    pub frame_bytes: u32,
}

impl<'a> FunctionImpl<'a> {
    /// Traversal roots for passes: entry first, epilogue second.
    pub fn roots(&self) -> [BlockId; 2] {
        [self.entry, self.epilogue]
    }

    /// Resolve every return placeholder into a jump to the epilogue block.
    /// Centralizes teardown: one epilogue sequence per function regardless
    /// of how many `return` statements the source had.
    pub fn resolve_returns(&mut self) {
        let epilogue = self.epilogue;
        let roots = self.roots();
        self.graph.for_each_block(&roots, |_, block| {
            for t in &mut block.exits {
                if let Transition::Ret { cond } = t {
                    *t = Transition::Jump {
                        target: epilogue,
                        cond: *cond,
                    };
                }
            }
        });
    }
}

/// Stack frame layout bookkeeping. Saved frame pointer plus return address
/// occupy `BASE_BYTES`; locals and arguments grow monotonically as the
/// walker registers declarations.
#[derive(Debug, Default)]
pub struct StackFrame {
    local_sizes: Vec<i64>,
    arg_sizes: Vec<i64>,
}

impl StackFrame {
    /// `push ix` (3 bytes in ADL) plus the 3-byte return address.
    pub const BASE_BYTES: i64 = 6;

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local of `size` bytes; returns its frame slot below ix.
    pub fn add_local(&mut self, size: i64) -> FrameSlot {
        self.local_sizes.push(size);
        FrameSlot::new(self.local_sizes.clone(), self.local_sizes.len() - 1, true)
    }

    /// Register an argument of `size` bytes; returns its frame slot above
    /// the saved registers.
    pub fn add_arg(&mut self, size: i64) -> FrameSlot {
        let mut sizes = vec![Self::BASE_BYTES];
        sizes.extend_from_slice(&self.arg_sizes);
        self.arg_sizes.push(size);
        FrameSlot::new(sizes, self.arg_sizes.len() - 1, false)
    }

    pub fn locals_bytes(&self) -> i64 {
        self.local_sizes.iter().sum()
    }

    pub fn args_bytes(&self) -> i64 {
        self.arg_sizes.iter().sum()
    }

    /// Total frame size: base plus locals.
    pub fn frame_bytes(&self) -> i64 {
        Self::BASE_BYTES + self.locals_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Op;
    use crate::value::Value;

    #[test]
    fn test_traversal_follows_transition_order() {
        let mut g = BlockGraph::new();
        let entry = g.add_block("L0");
        let a = g.add_block("L1");
        let b = g.add_block("L2");
        let join = g.add_block("L3");
        g.block_mut(entry).jump_if(Cond::Nz, a);
        g.block_mut(entry).jump_if(Cond::Z, b);
        g.block_mut(a).jump_to(join);
        g.block_mut(b).jump_to(join);

        let order = g.traversal(&[entry]);
        assert_eq!(order, vec![entry, a, join, b]);
    }

    #[test]
    fn test_traversal_safe_on_cycles() {
        let mut g = BlockGraph::new();
        let head = g.add_block("L0");
        let body = g.add_block("L1");
        g.block_mut(head).jump_if(Cond::Nz, body);
        g.block_mut(body).jump_to(head);

        let order = g.traversal(&[head]);
        assert_eq!(order, vec![head, body]);
    }

    #[test]
    fn test_epilogue_needs_second_root() {
        let mut g = BlockGraph::new();
        let entry = g.add_block("_f");
        let epi = g.add_block("L1");
        g.block_mut(entry).exits.push(Transition::Ret { cond: None });
        g.block_mut(epi).push(Inst::new(Op::Ret, vec![]));

        assert_eq!(g.traversal(&[entry]), vec![entry]);
        assert_eq!(g.traversal(&[entry, epi]), vec![entry, epi]);
    }

    #[test]
    fn test_resolve_returns() {
        let mut g = BlockGraph::new();
        let entry = g.add_block("_f");
        let epi = g.add_block("L1");
        g.block_mut(entry).exits.push(Transition::Ret { cond: None });
        let mut f = FunctionImpl {
            name: "_f",
            graph: g,
            entry,
            epilogue: epi,
            frame_bytes: 6,
        };
        f.resolve_returns();
        assert_eq!(
            f.graph.block(entry).exits,
            vec![Transition::Jump {
                target: epi,
                cond: None
            }]
        );
    }

    #[test]
    fn test_frame_growth() {
        let mut frame = StackFrame::new();
        let a0 = frame.add_arg(3);
        let a1 = frame.add_arg(3);
        let l0 = frame.add_local(3);
        let l1 = frame.add_local(1);

        assert_eq!(Value::Frame(a0).to_string(), "(ix+6)");
        assert_eq!(Value::Frame(a1).to_string(), "(ix+9)");
        assert_eq!(Value::Frame(l0).to_string(), "(ix-3)");
        assert_eq!(Value::Frame(l1).to_string(), "(ix-4)");
        assert_eq!(frame.locals_bytes(), 4);
        assert_eq!(frame.args_bytes(), 6);
        assert_eq!(frame.frame_bytes(), 10);
    }

    #[test]
    fn test_liveness_signal() {
        let mut g = BlockGraph::new();
        let b = g.add_block("L0");
        assert!(!g.block(b).is_live());
        g.block_mut(b).jump_to(b);
        assert!(g.block(b).is_live());
    }
}
