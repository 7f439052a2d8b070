// This module implements the peephole optimizer: a fixed, ordered catalog of
// independent rewrite rules applied to each block's post-allocation instruction
// stream. Every rule is one function from an instruction window to an optional
// (consumed, replacement) pair; the driver runs each rule once over each block as a
// single left-to-right non-overlapping scan, resuming after a replacement. The catalog
// is not iterated to a fixed point, and each rule's output must not re-match its own
// pattern, so running the catalog twice on its own output is a no-op.

//! Post-allocation peephole rewriting.

use log::trace;

use crate::block::Block;
use crate::instruction::{Inst, InstPattern, Op};
use crate::session::CodegenSession;
use crate::value::{MatchEnv, Reg, RegClass, Value, ValuePattern};

/// One catalog entry. `apply` inspects the window starting at the scan
/// position and either consumes a fixed number of instructions, yielding
/// their replacement, or declines.
struct Rule {
    name: &'static str,
    apply: for<'a> fn(&[Inst<'a>]) -> Option<(usize, Vec<Inst<'a>>)>,
}

/// Order matters: indexed-load folding must see the `lea` before the
/// push/pop rules get a chance to tear the sequence apart.
const CATALOG: [Rule; 4] = [
    Rule {
        name: "indexed-ld",
        apply: fold_indexed_ld,
    },
    Rule {
        name: "push-pop",
        apply: fold_push_pop,
    },
    Rule {
        name: "pea",
        apply: fold_pea,
    },
    Rule {
        name: "self-move",
        apply: drop_self_move,
    },
];

/// Run the whole catalog over one block.
pub fn run_block<'a>(session: &CodegenSession<'a>, block: &mut Block<'a>) {
    for rule in &CATALOG {
        let mut i = 0;
        while i < block.insts.len() {
            match (rule.apply)(&block.insts[i..]) {
                Some((consumed, replacement)) => {
                    trace!(
                        "peephole {} at {}:{}: {} -> {} instructions",
                        rule.name,
                        block.label,
                        i,
                        consumed,
                        replacement.len()
                    );
                    let advance = replacement.len();
                    block.insts.splice(i..i + consumed, replacement);
                    session.record_peephole_rewrite(rule.name);
                    i += advance;
                }
                None => i += 1,
            }
        }
    }
}

/// (a) `lea rr1, (ix+d)` ; `pop rr2` ; `ld (rr1), rr2` or `ld rr2, (rr1)`
/// → the pop plus one ld addressing `(ix+d)` directly.
fn fold_indexed_ld<'a>(insts: &[Inst<'a>]) -> Option<(usize, Vec<Inst<'a>>)> {
    if insts.len() < 3 {
        return None;
    }
    let mut env = MatchEnv::new();
    let lea = InstPattern::new(
        Op::Lea,
        vec![
            ValuePattern::AnyReg(RegClass::Wide, 0),
            ValuePattern::AnyFrameAddr(1),
        ],
    );
    let pop = InstPattern::new(Op::Pop, vec![ValuePattern::AnyReg(RegClass::Wide, 2)]);
    if !insts[0].matches(&lea, &mut env) || !insts[1].matches(&pop, &mut env) {
        return None;
    }
    let addr_reg = env.reg(0).ok()?;
    let val_reg = env.reg(2).ok()?;
    let frame = env.get(1).ok()?.clone();

    let third = &insts[2];
    if third.op != Op::Ld || third.cond.is_some() {
        return None;
    }
    let folded = match &third.ops[..] {
        // Store through the materialized address.
        [Value::Mem(addr, _), Value::Reg(src)]
            if **addr == Value::Reg(addr_reg) && *src == val_reg =>
        {
            Inst::new(Op::Ld, vec![frame, Value::Reg(val_reg)])
        }
        // Load through the materialized address.
        [Value::Reg(dst), Value::Mem(addr, _)]
            if **addr == Value::Reg(addr_reg) && *dst == val_reg =>
        {
            Inst::new(Op::Ld, vec![Value::Reg(val_reg), frame])
        }
        _ => return None,
    };
    Some((
        3,
        vec![Inst::new(Op::Pop, vec![Value::Reg(val_reg)]), folded],
    ))
}

/// (b) `push rr1` ; `pop rr2` → nothing when the registers are equal, one
/// `ex de, hl` when they are de and hl in either order. Other pairs stay.
fn fold_push_pop<'a>(insts: &[Inst<'a>]) -> Option<(usize, Vec<Inst<'a>>)> {
    if insts.len() < 2 {
        return None;
    }
    let mut env = MatchEnv::new();
    let push = InstPattern::new(Op::Push, vec![ValuePattern::AnyReg(RegClass::Any, 0)]);
    let pop = InstPattern::new(Op::Pop, vec![ValuePattern::AnyReg(RegClass::Any, 1)]);
    if !insts[0].matches(&push, &mut env) || !insts[1].matches(&pop, &mut env) {
        return None;
    }
    let src = env.reg(0).ok()?;
    let dst = env.reg(1).ok()?;
    if src == dst {
        return Some((2, Vec::new()));
    }
    if matches!((src, dst), (Reg::De, Reg::Hl) | (Reg::Hl, Reg::De)) {
        return Some((
            2,
            vec![Inst::new(
                Op::Ex,
                vec![Value::Reg(Reg::De), Value::Reg(Reg::Hl)],
            )],
        ));
    }
    None
}

/// (c) `lea rr, (ix+d)` ; `push rr` → `pea (ix+d)`.
fn fold_pea<'a>(insts: &[Inst<'a>]) -> Option<(usize, Vec<Inst<'a>>)> {
    if insts.len() < 2 {
        return None;
    }
    let mut env = MatchEnv::new();
    let lea = InstPattern::new(
        Op::Lea,
        vec![
            ValuePattern::AnyReg(RegClass::Wide, 0),
            ValuePattern::AnyFrameAddr(1),
        ],
    );
    let push = InstPattern::new(Op::Push, vec![ValuePattern::Bound(0)]);
    if !insts[0].matches(&lea, &mut env) || !insts[1].matches(&push, &mut env) {
        return None;
    }
    let frame = env.get(1).ok()?.clone();
    Some((2, vec![Inst::new(Op::Pea, vec![frame])]))
}

/// (d) `ld r, r` with identical source and destination → deleted.
fn drop_self_move<'a>(insts: &[Inst<'a>]) -> Option<(usize, Vec<Inst<'a>>)> {
    let first = insts.first()?;
    let mut env = MatchEnv::new();
    let pat = InstPattern::new(
        Op::Ld,
        vec![
            ValuePattern::AnyReg(RegClass::Any, 0),
            ValuePattern::Bound(0),
        ],
    );
    if first.matches(&pat, &mut env) {
        Some((1, Vec::new()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FrameSlot;
    use bumpalo::Bump;

    fn run(insts: Vec<Inst<'static>>) -> Vec<Inst<'static>> {
        let arena = Box::leak(Box::new(Bump::new()));
        let session = CodegenSession::new(arena);
        let mut block = Block::new("t");
        block.insts = insts;
        run_block(&session, &mut block);
        block.insts
    }

    fn push(r: Reg) -> Inst<'static> {
        Inst::new(Op::Push, vec![Value::Reg(r)])
    }

    fn pop(r: Reg) -> Inst<'static> {
        Inst::new(Op::Pop, vec![Value::Reg(r)])
    }

    fn local_slot() -> FrameSlot {
        FrameSlot::new(vec![3], 0, true)
    }

    #[test]
    fn push_pop_same_register_vanishes() {
        assert!(run(vec![push(Reg::Hl), pop(Reg::Hl)]).is_empty());
    }

    #[test]
    fn push_pop_de_hl_becomes_exchange() {
        let out = run(vec![push(Reg::De), pop(Reg::Hl)]);
        assert_eq!(
            out,
            vec![Inst::new(
                Op::Ex,
                vec![Value::Reg(Reg::De), Value::Reg(Reg::Hl)]
            )]
        );
    }

    #[test]
    fn push_pop_other_pairs_stay() {
        let out = run(vec![push(Reg::Bc), pop(Reg::De)]);
        assert_eq!(out, vec![push(Reg::Bc), pop(Reg::De)]);
    }

    #[test]
    fn self_moves_are_deleted() {
        let out = run(vec![
            Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::Reg(Reg::A)]),
            Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::Reg(Reg::Hl)]),
            Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::Reg(Reg::B)]),
        ]);
        assert_eq!(
            out,
            vec![Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::Reg(Reg::B)])]
        );
    }

    #[test]
    fn lea_push_becomes_pea() {
        let slot = local_slot();
        let out = run(vec![
            Inst::new(
                Op::Lea,
                vec![Value::Reg(Reg::Hl), Value::Frame(slot.clone())],
            ),
            push(Reg::Hl),
        ]);
        assert_eq!(out, vec![Inst::new(Op::Pea, vec![Value::Frame(slot)])]);
    }

    #[test]
    fn lea_push_of_a_different_register_stays() {
        let slot = local_slot();
        let out = run(vec![
            Inst::new(
                Op::Lea,
                vec![Value::Reg(Reg::Hl), Value::Frame(slot.clone())],
            ),
            push(Reg::De),
        ]);
        assert_eq!(
            out,
            vec![
                Inst::new(Op::Lea, vec![Value::Reg(Reg::Hl), Value::Frame(slot)]),
                push(Reg::De),
            ]
        );
    }

    #[test]
    fn indexed_store_folds_away_the_address() {
        let slot = local_slot();
        let out = run(vec![
            Inst::new(
                Op::Lea,
                vec![Value::Reg(Reg::Hl), Value::Frame(slot.clone())],
            ),
            pop(Reg::De),
            Inst::new(
                Op::Ld,
                vec![
                    Value::Mem(Box::new(Value::Reg(Reg::Hl)), crate::value::Width::Long),
                    Value::Reg(Reg::De),
                ],
            ),
        ]);
        assert_eq!(
            out,
            vec![
                pop(Reg::De),
                Inst::new(Op::Ld, vec![Value::Frame(slot), Value::Reg(Reg::De)]),
            ]
        );
    }

    #[test]
    fn indexed_load_folds_away_the_address() {
        let slot = local_slot();
        let out = run(vec![
            Inst::new(
                Op::Lea,
                vec![Value::Reg(Reg::Bc), Value::Frame(slot.clone())],
            ),
            pop(Reg::De),
            Inst::new(
                Op::Ld,
                vec![
                    Value::Reg(Reg::De),
                    Value::Mem(Box::new(Value::Reg(Reg::Bc)), crate::value::Width::Long),
                ],
            ),
        ]);
        assert_eq!(
            out,
            vec![
                pop(Reg::De),
                Inst::new(Op::Ld, vec![Value::Reg(Reg::De), Value::Frame(slot)]),
            ]
        );
    }

    #[test]
    fn catalog_is_idempotent() {
        let slot = local_slot();
        let input = vec![
            Inst::new(
                Op::Lea,
                vec![Value::Reg(Reg::Hl), Value::Frame(slot.clone())],
            ),
            pop(Reg::De),
            Inst::new(
                Op::Ld,
                vec![
                    Value::Mem(Box::new(Value::Reg(Reg::Hl)), crate::value::Width::Long),
                    Value::Reg(Reg::De),
                ],
            ),
            push(Reg::De),
            pop(Reg::Hl),
            Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::Reg(Reg::A)]),
        ];
        let once = run(input);
        let twice = run(once.clone());
        assert_eq!(once, twice);
    }
}
