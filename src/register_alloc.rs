// This module implements the per-block interval register allocator. One forward pass
// over a block's instructions records def/use events per physical byte register and per
// symbolic variable at interleaved program points (use before def within an
// instruction), then derives maximal free intervals per register as the complement of
// its occupied runs. Variables are processed by ascending id; each first tries a
// physical register whose free intervals cover its live interval, preferring the
// candidate with the highest affinity to the surrounding loads, and otherwise falls
// back to a stack spill when its def and uses are plain register loads. Allocation is
// strictly block-local; nothing here reasons across transitions.

//! Per-block interval register allocation.

use hashbrown::HashMap;
use log::{debug, warn};

use crate::block::Block;
use crate::error::{CompileError, CompileResult};
use crate::instruction::{Inst, Op, OpKind};
use crate::session::CodegenSession;
use crate::value::{Reg, SymVar, Value, Width, BYTE_CANDIDATES, WIDE_CANDIDATES};

/// Every instruction owns two program points: its operand reads happen at
/// the even point, its writes at the following odd point. A value defined
/// by instruction `i` and last read by instruction `j` is live on
/// `[2i+1, 2j]`, so back-to-back def/use chains do not falsely overlap.
fn use_pos(idx: usize) -> u32 {
    2 * idx as u32
}

fn def_pos(idx: usize) -> u32 {
    2 * idx as u32 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Use,
    Def,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    pos: u32,
    kind: EventKind,
}

/// Closed range of program points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    begin: u32,
    end: u32,
}

impl Interval {
    fn contains(self, other: Interval) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    fn overlaps(self, other: Interval) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }
}

/// Live interval plus the instruction indices needed for rewriting.
#[derive(Debug)]
struct VarInfo {
    var: SymVar,
    live: Interval,
    def_idx: usize,
    def_count: usize,
    use_idxs: Vec<usize>,
}

/// Event streams for one block, keyed by byte register and by variable id.
#[derive(Debug, Default)]
struct EventScan {
    regs: HashMap<Reg, Vec<Event>>,
    vars: HashMap<u32, (SymVar, Vec<Event>)>,
}

impl EventScan {
    fn scan(insts: &[Inst<'_>]) -> Self {
        let mut scan = EventScan::default();
        let mut regs = Vec::new();
        let mut syms = Vec::new();
        for (idx, inst) in insts.iter().enumerate() {
            // A call reads nothing explicitly, but every register staged
            // before it (arguments, protected operands) must survive up
            // to the call itself.
            if inst.op.kind() == OpKind::Call {
                let live: Vec<Reg> = scan
                    .regs
                    .iter()
                    .filter(|(_, events)| events.iter().any(|e| e.kind == EventKind::Def))
                    .map(|(r, _)| *r)
                    .collect();
                for r in live {
                    scan.record_reg(r, use_pos(idx), EventKind::Use);
                }
            }
            let du = inst.def_use();
            for v in &du.uses {
                regs.clear();
                syms.clear();
                v.reg_parts(&mut regs);
                v.sym_parts(&mut syms);
                for &r in &regs {
                    scan.record_reg(r, use_pos(idx), EventKind::Use);
                }
                for &s in &syms {
                    scan.record_var(s, use_pos(idx), EventKind::Use);
                }
            }
            for v in &du.defs {
                regs.clear();
                syms.clear();
                v.reg_parts(&mut regs);
                v.sym_parts(&mut syms);
                for &r in &regs {
                    scan.record_reg(r, def_pos(idx), EventKind::Def);
                }
                for &s in &syms {
                    scan.record_var(s, def_pos(idx), EventKind::Def);
                }
            }
        }
        scan
    }

    fn record_reg(&mut self, r: Reg, pos: u32, kind: EventKind) {
        self.regs.entry(r).or_default().push(Event { pos, kind });
    }

    fn record_var(&mut self, s: SymVar, pos: u32, kind: EventKind) {
        self.vars
            .entry(s.id)
            .or_insert_with(|| (s, Vec::new()))
            .1
            .push(Event { pos, kind });
    }

    /// Variables in ascending-id order, with their live intervals.
    fn var_infos(&self) -> CompileResult<Vec<VarInfo>> {
        let mut ids: Vec<u32> = self.vars.keys().copied().collect();
        ids.sort_unstable();
        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            let (var, events) = &self.vars[&id];
            let first = events[0];
            if first.kind != EventKind::Def {
                return Err(CompileError::CodeGeneration {
                    reason: format!("variable %{id} is read before it is written"),
                });
            }
            let last = events[events.len() - 1];
            infos.push(VarInfo {
                var: *var,
                live: Interval {
                    begin: first.pos,
                    end: last.pos,
                },
                def_idx: (first.pos / 2) as usize,
                def_count: events.iter().filter(|e| e.kind == EventKind::Def).count(),
                use_idxs: events
                    .iter()
                    .filter(|e| e.kind == EventKind::Use)
                    .map(|e| (e.pos / 2) as usize)
                    .collect(),
            });
        }
        Ok(infos)
    }
}

/// Derive maximal free intervals from a register's event stream. An
/// occupied run starts at a def (or at the block head for a live-in use)
/// and extends through the last use before the next def.
fn free_intervals(events: &[Event], block_end: u32) -> Vec<Interval> {
    let mut occupied: Vec<Interval> = Vec::new();
    let mut i = 0;
    if i < events.len() && events[i].kind == EventKind::Use {
        let mut end = events[i].pos;
        while i < events.len() && events[i].kind == EventKind::Use {
            end = events[i].pos;
            i += 1;
        }
        occupied.push(Interval { begin: 0, end });
    }
    while i < events.len() {
        let begin = events[i].pos;
        let mut end = begin;
        i += 1;
        while i < events.len() && events[i].kind == EventKind::Use {
            end = events[i].pos;
            i += 1;
        }
        occupied.push(Interval { begin, end });
    }

    let mut free = Vec::new();
    let mut cursor = 0;
    for occ in occupied {
        if occ.begin > cursor {
            free.push(Interval {
                begin: cursor,
                end: occ.begin - 1,
            });
        }
        cursor = occ.end + 1;
    }
    if cursor <= block_end {
        free.push(Interval {
            begin: cursor,
            end: block_end,
        });
    }
    free
}

/// Allocation state for one block.
struct BlockAlloc<'s, 'a> {
    session: &'s CodegenSession<'a>,
    /// Free intervals per byte register; a missing entry is fully free.
    free: HashMap<Reg, Vec<Interval>>,
    /// Stack slots handed out so far; must stay nest-or-disjoint because
    /// the runtime stack is a single LIFO.
    spilled: Vec<Interval>,
    /// Spill re-pushes to splice in once all variables are placed.
    pending: Vec<(usize, Inst<'a>)>,
    block_end: u32,
}

impl<'s, 'a> BlockAlloc<'s, 'a> {
    fn covers(&self, r: Reg, live: Interval) -> bool {
        r.byte_parts().iter().all(|part| match self.free.get(part) {
            Some(intervals) => intervals.iter().any(|f| f.contains(live)),
            None => true,
        })
    }

    /// Remove `live` from every byte part's covering free interval,
    /// splitting it in two.
    fn reserve(&mut self, r: Reg, live: Interval) -> CompileResult<()> {
        for &part in r.byte_parts() {
            let intervals = self.free.entry(part).or_insert_with(|| {
                vec![Interval {
                    begin: 0,
                    end: self.block_end,
                }]
            });
            let at = intervals
                .iter()
                .position(|f| f.contains(live))
                .ok_or(CompileError::IntervalNotReserved {
                    reg: part.name(),
                    begin: live.begin,
                    end: live.end,
                })?;
            let f = intervals.remove(at);
            if live.end < f.end {
                intervals.insert(
                    at,
                    Interval {
                        begin: live.end + 1,
                        end: f.end,
                    },
                );
            }
            if f.begin < live.begin {
                intervals.insert(
                    at,
                    Interval {
                        begin: f.begin,
                        end: live.begin - 1,
                    },
                );
            }
        }
        Ok(())
    }

    /// Occurrence count of `candidate` as the def's source or a use's
    /// destination; reusing such a register turns the surrounding loads
    /// into self-moves the peephole pass then deletes.
    fn affinity(insts: &[Inst<'a>], info: &VarInfo, candidate: Reg) -> usize {
        let mut count = 0;
        if let Some(Value::Reg(src)) = insts[info.def_idx].ops.get(1) {
            if *src == candidate {
                count += 1;
            }
        }
        for &ui in &info.use_idxs {
            if let Some(Value::Reg(dst)) = insts[ui].ops.get(0) {
                if *dst == candidate {
                    count += 1;
                }
            }
        }
        count
    }

    fn try_register(&mut self, insts: &mut [Inst<'a>], info: &VarInfo) -> CompileResult<bool> {
        let candidates: &[Reg] = if info.var.width == Width::Byte {
            &BYTE_CANDIDATES
        } else {
            &WIDE_CANDIDATES
        };
        let best = candidates
            .iter()
            .filter(|&&r| self.covers(r, info.live))
            .map(|&r| (r, Self::affinity(insts, info, r)))
            // Ties break toward the lowest candidate index; max_by_key
            // keeps the last maximum, so scan candidates in reverse.
            .rev()
            .max_by_key(|&(_, score)| score);
        let Some((reg, _)) = best else {
            return Ok(false);
        };

        self.reserve(reg, info.live)?;
        for inst in insts.iter_mut() {
            inst.replace_var(info.var, &Value::Reg(reg));
        }
        debug!("%{} -> {} over [{}, {}]", info.var.id, reg, info.live.begin, info.live.end);
        self.session.record_register_allocated();
        Ok(true)
    }

    /// Stack fallback: the def becomes a push and every use a pop, with a
    /// re-push after each non-final use so the slot survives until the
    /// last one. Replacements happen in place; the re-push insertions are
    /// deferred so every variable's recorded indices stay valid until the
    /// whole block is done.
    fn try_spill(&mut self, insts: &mut [Inst<'a>], info: &VarInfo) -> CompileResult<bool> {
        if info.var.force_reg
            || !info.var.width.is_wide()
            || info.def_count != 1
            || info.use_idxs.is_empty()
        {
            return Ok(false);
        }
        let Some(src) = spill_def_shape(&insts[info.def_idx], info.var) else {
            return Ok(false);
        };
        let mut use_regs = Vec::with_capacity(info.use_idxs.len());
        for &ui in &info.use_idxs {
            match spill_use_shape(&insts[ui], info.var) {
                Some(reg) => use_regs.push(reg),
                None => return Ok(false),
            }
        }
        if self
            .spilled
            .iter()
            .any(|p| p.overlaps(info.live) && !p.contains(info.live) && !info.live.contains(*p))
        {
            return Ok(false);
        }
        self.spilled.push(info.live);

        insts[info.def_idx] = Inst::new(Op::Push, vec![Value::Reg(src)]);
        for (&ui, &reg) in info.use_idxs.iter().zip(&use_regs) {
            insts[ui] = Inst::new(Op::Pop, vec![Value::Reg(reg)]);
        }
        let last = info.use_idxs.len() - 1;
        for (&ui, &reg) in info.use_idxs.iter().zip(&use_regs).take(last) {
            self.pending
                .push((ui + 1, Inst::new(Op::Push, vec![Value::Reg(reg)])));
        }
        debug!(
            "%{} spilled over [{}, {}]",
            info.var.id, info.live.begin, info.live.end
        );
        self.session.record_spill_generated();
        Ok(true)
    }
}

/// `ld var, reg` — the only def shape the spill rewrite accepts.
fn spill_def_shape(inst: &Inst<'_>, var: SymVar) -> Option<Reg> {
    if inst.op != Op::Ld || inst.cond.is_some() {
        return None;
    }
    match &inst.ops[..] {
        [Value::Sym(v), Value::Reg(r)] if v.id == var.id => Some(*r),
        _ => None,
    }
}

/// `ld reg, var` — the only use shape the spill rewrite accepts.
fn spill_use_shape(inst: &Inst<'_>, var: SymVar) -> Option<Reg> {
    if inst.op != Op::Ld || inst.cond.is_some() {
        return None;
    }
    match &inst.ops[..] {
        [Value::Reg(r), Value::Sym(v)] if v.id == var.id => Some(*r),
        _ => None,
    }
}

/// Allocate every symbolic variable in one block, rewriting its
/// instructions in place.
pub fn allocate_block<'a>(
    session: &CodegenSession<'a>,
    block: &mut Block<'a>,
) -> CompileResult<()> {
    if block.insts.is_empty() {
        return Ok(());
    }
    let scan = EventScan::scan(&block.insts);
    let infos = scan.var_infos()?;
    if infos.is_empty() {
        return Ok(());
    }

    let block_end = def_pos(block.insts.len() - 1);
    let mut alloc = BlockAlloc {
        session,
        free: scan
            .regs
            .iter()
            .map(|(&r, events)| (r, free_intervals(events, block_end)))
            .collect(),
        spilled: Vec::new(),
        pending: Vec::new(),
        block_end,
    };

    for info in &infos {
        if alloc.try_register(&mut block.insts, info)? {
            continue;
        }
        if alloc.try_spill(&mut block.insts, info)? {
            continue;
        }
        if info.var.force_reg {
            return Err(CompileError::ForcedRegisterSpill { var: info.var.id });
        }
        warn!(
            "no register for %{} in block {}; left unallocated",
            info.var.id, block.label
        );
        session.record_unallocated_variable();
    }

    // Apply the spill splices back to front so earlier indices stay valid.
    alloc.pending.sort_by(|a, b| b.0.cmp(&a.0));
    for (at, inst) in alloc.pending {
        block.insts.insert(at, inst);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use bumpalo::Bump;

    fn sym(id: u32, width: Width) -> SymVar {
        SymVar {
            id,
            width,
            force_reg: false,
        }
    }

    fn ld<'a>(dst: Value<'a>, src: Value<'a>) -> Inst<'a> {
        Inst::new(Op::Ld, vec![dst, src])
    }

    #[test]
    fn free_intervals_complement_occupied_runs() {
        // def at 3, uses at 6 and 8: occupied [3, 8].
        let events = [
            Event { pos: 3, kind: EventKind::Def },
            Event { pos: 6, kind: EventKind::Use },
            Event { pos: 8, kind: EventKind::Use },
        ];
        assert_eq!(
            free_intervals(&events, 11),
            vec![Interval { begin: 0, end: 2 }, Interval { begin: 9, end: 11 }]
        );
    }

    #[test]
    fn live_in_use_occupies_from_block_start() {
        let events = [Event { pos: 4, kind: EventKind::Use }];
        assert_eq!(
            free_intervals(&events, 7),
            vec![Interval { begin: 5, end: 7 }]
        );
    }

    #[test]
    fn affinity_picks_the_use_destination() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let v = sym(0, Width::Byte);
        let mut block = Block::new("t");
        block.push(ld(Value::Sym(v), Value::imm(1)));
        block.push(ld(Value::Reg(Reg::E), Value::Sym(v)));
        allocate_block(&session, &mut block).unwrap();
        assert_eq!(block.insts[0].ops[0], Value::Reg(Reg::E));
        assert_eq!(block.insts[1].ops[1], Value::Reg(Reg::E));
    }

    #[test]
    fn overlapping_variables_get_distinct_registers() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let v0 = sym(0, Width::Long);
        let v1 = sym(1, Width::Long);
        let mut block = Block::new("t");
        block.push(ld(Value::Sym(v0), Value::imm(1)));
        block.push(ld(Value::Sym(v1), Value::imm(2)));
        block.push(ld(Value::Reg(Reg::Hl), Value::Sym(v0)));
        block.push(ld(Value::Reg(Reg::De), Value::Sym(v1)));
        allocate_block(&session, &mut block).unwrap();
        let r0 = match block.insts[0].ops[0] {
            Value::Reg(r) => r,
            ref other => panic!("unallocated: {other}"),
        };
        let r1 = match block.insts[1].ops[0] {
            Value::Reg(r) => r,
            ref other => panic!("unallocated: {other}"),
        };
        assert_ne!(r0, r1);
    }

    #[test]
    fn ties_break_to_the_lowest_candidate_index() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let v = sym(0, Width::Long);
        let mut block = Block::new("t");
        // No affinity anywhere: the first wide candidate wins.
        block.push(ld(Value::Sym(v), Value::imm(9)));
        block.push(Inst::new(Op::Push, vec![Value::Sym(v)]));
        allocate_block(&session, &mut block).unwrap();
        assert_eq!(block.insts[0].ops[0], Value::Reg(Reg::Bc));
    }

    #[test]
    fn exhausted_wide_registers_fall_back_to_the_stack() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let v = sym(0, Width::Long);
        let mut block = Block::new("t");
        block.push(ld(Value::Sym(v), Value::Reg(Reg::Hl)));
        block.push(ld(Value::Reg(Reg::Bc), Value::imm(1)));
        block.push(ld(Value::Reg(Reg::De), Value::imm(2)));
        block.push(ld(Value::Reg(Reg::Hl), Value::imm(3)));
        block.push(Inst::new(Op::Push, vec![Value::Reg(Reg::Bc)]));
        block.push(ld(Value::Reg(Reg::De), Value::Sym(v)));
        allocate_block(&session, &mut block).unwrap();
        assert_eq!(
            block.insts[0],
            Inst::new(Op::Push, vec![Value::Reg(Reg::Hl)])
        );
        assert_eq!(
            block.insts[5],
            Inst::new(Op::Pop, vec![Value::Reg(Reg::De)])
        );
    }

    #[test]
    fn non_final_uses_push_the_slot_back() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let v = sym(0, Width::Long);
        let mut block = Block::new("t");
        block.push(ld(Value::Sym(v), Value::Reg(Reg::Hl)));
        // Wide registers all busy across the whole range.
        block.push(ld(Value::Reg(Reg::Bc), Value::imm(1)));
        block.push(ld(Value::Reg(Reg::De), Value::imm(2)));
        block.push(ld(Value::Reg(Reg::Hl), Value::imm(3)));
        block.push(ld(Value::Reg(Reg::De), Value::Sym(v)));
        block.push(Inst::new(Op::Push, vec![Value::Reg(Reg::Bc)]));
        block.push(ld(Value::Reg(Reg::Bc), Value::Sym(v)));
        allocate_block(&session, &mut block).unwrap();
        // def push, first use pop + re-push, final use pop.
        assert_eq!(
            block.insts[0],
            Inst::new(Op::Push, vec![Value::Reg(Reg::Hl)])
        );
        assert_eq!(
            block.insts[4],
            Inst::new(Op::Pop, vec![Value::Reg(Reg::De)])
        );
        assert_eq!(
            block.insts[5],
            Inst::new(Op::Push, vec![Value::Reg(Reg::De)])
        );
        assert_eq!(
            block.insts[7],
            Inst::new(Op::Pop, vec![Value::Reg(Reg::Bc)])
        );
    }

    #[test]
    fn partially_overlapping_spill_candidates_stay_on_one_slot() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let v0 = sym(0, Width::Long);
        let v1 = sym(1, Width::Long);
        let mut block = Block::new("t");
        // v0 lives over [1, 10], v1 over [3, 12]: they overlap without
        // nesting, so popping v1's slot would tear v0's out from under it.
        block.push(ld(Value::Sym(v0), Value::Reg(Reg::Hl)));
        block.push(ld(Value::Sym(v1), Value::Reg(Reg::De)));
        block.push(ld(Value::Reg(Reg::Bc), Value::imm(1)));
        block.push(ld(Value::Reg(Reg::De), Value::imm(2)));
        block.push(ld(Value::Reg(Reg::Hl), Value::imm(3)));
        block.push(ld(Value::Reg(Reg::Bc), Value::Sym(v0)));
        block.push(ld(Value::Reg(Reg::Bc), Value::Sym(v1)));
        allocate_block(&session, &mut block).unwrap();
        // v0 takes the stack; v1 is rejected and left symbolic.
        assert_eq!(
            block.insts[0],
            Inst::new(Op::Push, vec![Value::Reg(Reg::Hl)])
        );
        assert_eq!(
            block.insts[5],
            Inst::new(Op::Pop, vec![Value::Reg(Reg::Bc)])
        );
        assert_eq!(block.insts[1].ops[0], Value::Sym(v1));
        assert_eq!(block.insts[6].ops[1], Value::Sym(v1));
        let stats = session.stats();
        assert_eq!(stats.spills_generated, 1);
        assert_eq!(stats.unallocated_variables, 1);
    }

    #[test]
    fn forced_variable_without_a_register_is_fatal() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let v = SymVar {
            id: 0,
            width: Width::Long,
            force_reg: true,
        };
        let mut block = Block::new("t");
        block.push(ld(Value::Sym(v), Value::Reg(Reg::Hl)));
        block.push(ld(Value::Reg(Reg::Bc), Value::imm(1)));
        block.push(ld(Value::Reg(Reg::De), Value::imm(2)));
        block.push(ld(Value::Reg(Reg::Hl), Value::imm(3)));
        block.push(ld(Value::Reg(Reg::De), Value::Sym(v)));
        let err = allocate_block(&session, &mut block).unwrap_err();
        assert!(matches!(err, CompileError::ForcedRegisterSpill { var: 0 }));
    }

    #[test]
    fn call_keeps_previously_defined_registers_alive() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let v = sym(0, Width::Long);
        let mut block = Block::new("t");
        // de is staged before the call; v must not land in it even though
        // no instruction reads de explicitly afterwards.
        block.push(ld(Value::Reg(Reg::De), Value::imm(7)));
        block.push(ld(Value::Sym(v), Value::imm(1)));
        block.push(Inst::new(Op::Call, vec![Value::Label("_f")]));
        block.push(Inst::new(Op::Push, vec![Value::Sym(v)]));
        allocate_block(&session, &mut block).unwrap();
        assert_eq!(block.insts[1].ops[0], Value::Reg(Reg::Bc));
    }
}
