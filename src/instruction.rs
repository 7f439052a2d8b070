// This module implements the machine/pseudo instruction model: the closed mnemonic set
// the code generator may emit, execution conditions, per-family def/use contributions
// used by the register allocator, structural equality and template matching over
// operands, the mandatory pre-emission rewrite for wide register-to-register moves
// (the eZ80 cannot move between two register pairs directly), and operand substitution
// for the allocator. Instructions are created once during code generation or lowering
// and mutated in place by later passes; they are never logically duplicated.

//! Instruction model: mnemonics, def/use sets, matching and lowering.

use std::fmt;

use crate::value::{MatchEnv, Reg, SymVar, Value, ValuePattern};

/// Instruction mnemonic. Every member belongs to exactly one def/use family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Ld,
    Lea,
    Pea,
    Push,
    Pop,
    Ex,
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Or,
    Xor,
    Mlt,
    Cp,
    Inc,
    Dec,
    Call,
    Ret,
}

/// Def/use family of a mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Writes dst, reads dst and src.
    BinaryArith,
    /// Writes and reads its single operand.
    Unary,
    /// Writes dst, reads src; a memory dst is additionally read (its
    /// address must be computed).
    Load,
    /// Writes the two fixed return-value registers, reads nothing explicit.
    Call,
    /// Reads its operand, writes nothing.
    Push,
    /// Writes its operand, reads nothing.
    Pop,
    /// Reads both operands; the result lives in the implicit flag state
    /// consumed by the next conditional transition.
    Compare,
    /// Reads and writes both operands.
    Exchange,
    /// No explicit operands.
    Return,
}

impl Op {
    pub fn name(self) -> &'static str {
        match self {
            Op::Ld => "ld",
            Op::Lea => "lea",
            Op::Pea => "pea",
            Op::Push => "push",
            Op::Pop => "pop",
            Op::Ex => "ex",
            Op::Add => "add",
            Op::Adc => "adc",
            Op::Sub => "sub",
            Op::Sbc => "sbc",
            Op::And => "and",
            Op::Or => "or",
            Op::Xor => "xor",
            Op::Mlt => "mlt",
            Op::Cp => "cp",
            Op::Inc => "inc",
            Op::Dec => "dec",
            Op::Call => "call",
            Op::Ret => "ret",
        }
    }

    pub fn kind(self) -> OpKind {
        match self {
            Op::Ld | Op::Lea => OpKind::Load,
            Op::Pea | Op::Push => OpKind::Push,
            Op::Pop => OpKind::Pop,
            Op::Ex => OpKind::Exchange,
            Op::Add | Op::Adc | Op::Sub | Op::Sbc | Op::And | Op::Or | Op::Xor => {
                OpKind::BinaryArith
            }
            // mlt multiplies the halves of one register pair in place.
            Op::Mlt | Op::Inc | Op::Dec => OpKind::Unary,
            Op::Cp => OpKind::Compare,
            Op::Call => OpKind::Call,
            Op::Ret => OpKind::Return,
        }
    }
}

/// Execution condition, rendered in jump transitions and conditional calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Nz,
    Z,
    Nc,
    C,
    Po,
    Pe,
    P,
    M,
}

impl Cond {
    pub fn name(self) -> &'static str {
        match self {
            Cond::Nz => "nz",
            Cond::Z => "z",
            Cond::Nc => "nc",
            Cond::C => "c",
            Cond::Po => "po",
            Cond::Pe => "pe",
            Cond::P => "p",
            Cond::M => "m",
        }
    }

    /// Condition selecting the complementary paths out of a block.
    pub fn negate(self) -> Cond {
        match self {
            Cond::Nz => Cond::Z,
            Cond::Z => Cond::Nz,
            Cond::Nc => Cond::C,
            Cond::C => Cond::Nc,
            Cond::Po => Cond::Pe,
            Cond::Pe => Cond::Po,
            Cond::P => Cond::M,
            Cond::M => Cond::P,
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Explicit def/use contribution of one instruction. Values are reported
/// whole; the allocator expands registers to byte constituents.
#[derive(Debug, Default)]
pub struct DefUse<'a> {
    pub defs: Vec<Value<'a>>,
    pub uses: Vec<Value<'a>>,
}

/// One machine or pseudo instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst<'a> {
    pub op: Op,
    pub cond: Option<Cond>,
    pub ops: Vec<Value<'a>>,
}

impl<'a> Inst<'a> {
    pub fn new(op: Op, ops: Vec<Value<'a>>) -> Self {
        Self {
            op,
            cond: None,
            ops,
        }
    }

    /// Explicit def/use sets per the mnemonic family.
    pub fn def_use(&self) -> DefUse<'a> {
        let mut du = DefUse::default();
        match self.op.kind() {
            OpKind::Load => {
                let dst = &self.ops[0];
                let src = &self.ops[1];
                if dst.is_memory() {
                    // A memory destination's address computation is a use.
                    du.uses.push(dst.clone());
                } else {
                    du.defs.push(dst.clone());
                }
                du.uses.push(src.clone());
            }
            OpKind::BinaryArith => {
                du.defs.push(self.ops[0].clone());
                du.uses.push(self.ops[0].clone());
                du.uses.push(self.ops[1].clone());
            }
            OpKind::Unary => {
                du.defs.push(self.ops[0].clone());
                du.uses.push(self.ops[0].clone());
            }
            OpKind::Push => {
                du.uses.push(self.ops[0].clone());
            }
            OpKind::Pop => {
                du.defs.push(self.ops[0].clone());
            }
            OpKind::Compare => {
                du.uses.push(self.ops[0].clone());
                du.uses.push(self.ops[1].clone());
            }
            OpKind::Exchange => {
                for op in &self.ops {
                    du.defs.push(op.clone());
                    du.uses.push(op.clone());
                }
            }
            OpKind::Call => {
                du.defs.push(Value::Reg(Reg::A));
                du.defs.push(Value::Reg(Reg::Hl));
            }
            OpKind::Return => {}
        }
        du
    }

    /// Substitute every operand occurrence of `var`, including occurrences
    /// inside memory references. Used exclusively by the register allocator.
    pub fn replace_var(&mut self, var: SymVar, with: &Value<'a>) {
        for op in &mut self.ops {
            op.replace_var(var, with);
        }
    }

    /// Match against a template with possibly-unbound operand slots.
    /// The environment must be fresh for each attempt.
    pub fn matches(&self, pat: &InstPattern<'a>, env: &mut MatchEnv<'a>) -> bool {
        if self.op != pat.op || self.cond != pat.cond || self.ops.len() != pat.ops.len() {
            return false;
        }
        self.ops
            .iter()
            .zip(pat.ops.iter())
            .all(|(op, p)| p.matches(op, env))
    }

    /// Pre-emission rewrite. The eZ80 has no move between two register
    /// pairs, so `ld rr1, rr2` becomes `push rr2` / `pop rr1` unless the
    /// destination is the stack pointer.
    pub fn resolve(self) -> Vec<Inst<'a>> {
        if self.op == Op::Ld && self.cond.is_none() {
            if let [Value::Reg(dst), Value::Reg(src)] = &self.ops[..] {
                if dst.is_wide() && src.is_wide() && *dst != Reg::Sp {
                    return vec![
                        Inst::new(Op::Push, vec![Value::Reg(*src)]),
                        Inst::new(Op::Pop, vec![Value::Reg(*dst)]),
                    ];
                }
            }
        }
        vec![self]
    }
}

impl fmt::Display for Inst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\t{}", self.op.name())?;
        if self.ops.is_empty() && self.cond.is_none() {
            return Ok(());
        }
        f.write_str("\t")?;
        let mut first = true;
        if let Some(cc) = self.cond {
            write!(f, "{cc}")?;
            first = false;
        }
        for op in &self.ops {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{op}")?;
            first = false;
        }
        Ok(())
    }
}

/// Instruction template for the peephole matcher.
#[derive(Debug, Clone)]
pub struct InstPattern<'a> {
    pub op: Op,
    pub cond: Option<Cond>,
    pub ops: Vec<ValuePattern<'a>>,
}

impl<'a> InstPattern<'a> {
    pub fn new(op: Op, ops: Vec<ValuePattern<'a>>) -> Self {
        Self {
            op,
            cond: None,
            ops,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{RegClass, Width};

    fn sym(id: u32, width: Width) -> SymVar {
        SymVar {
            id,
            width,
            force_reg: false,
        }
    }

    #[test]
    fn test_eq_reflexive_symmetric() {
        let insts = vec![
            Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::imm(1)]),
            Inst::new(Op::Add, vec![Value::Reg(Reg::Hl), Value::Reg(Reg::De)]),
            Inst::new(Op::Push, vec![Value::Reg(Reg::Bc)]),
            Inst::new(Op::Call, vec![Value::Label("_f")]),
            Inst::new(Op::Ret, vec![]),
            Inst::new(Op::Cp, vec![Value::Reg(Reg::A), Value::imm(0)]),
        ];
        for i in &insts {
            assert_eq!(i, i);
        }
        let a = insts[0].clone();
        assert_eq!(insts[0] == a, a == insts[0]);
    }

    #[test]
    fn test_match_fully_bound_self() {
        // Match(i, i) succeeds for any fully-bound instruction.
        let i = Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::Indexed(Reg::Ix, -2)]);
        let pat = InstPattern::new(
            Op::Ld,
            vec![
                ValuePattern::Exact(Value::Reg(Reg::A)),
                ValuePattern::Exact(Value::Indexed(Reg::Ix, -2)),
            ],
        );
        let mut env = MatchEnv::new();
        assert!(i.matches(&pat, &mut env));
    }

    #[test]
    fn test_match_binds_slots_across_operands() {
        // ld r, r with identical source and destination.
        let pat = InstPattern::new(
            Op::Ld,
            vec![
                ValuePattern::AnyReg(RegClass::Any, 0),
                ValuePattern::Bound(0),
            ],
        );
        let same = Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::Reg(Reg::Hl)]);
        let diff = Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::Reg(Reg::De)]);
        assert!(same.matches(&pat, &mut MatchEnv::new()));
        assert!(!diff.matches(&pat, &mut MatchEnv::new()));
    }

    #[test]
    fn test_load_def_use() {
        let v = sym(1, Width::Byte);
        let i = Inst::new(Op::Ld, vec![Value::Sym(v), Value::Reg(Reg::A)]);
        let du = i.def_use();
        assert_eq!(du.defs, vec![Value::Sym(v)]);
        assert_eq!(du.uses, vec![Value::Reg(Reg::A)]);

        // A memory destination is read, not written.
        let store = Inst::new(
            Op::Ld,
            vec![
                Value::Mem(Box::new(Value::Reg(Reg::Hl)), Width::Byte),
                Value::Reg(Reg::A),
            ],
        );
        let du = store.def_use();
        assert!(du.defs.is_empty());
        assert_eq!(du.uses.len(), 2);
    }

    #[test]
    fn test_call_defs_return_registers() {
        let i = Inst::new(Op::Call, vec![Value::Label("__imul")]);
        let du = i.def_use();
        assert_eq!(du.defs, vec![Value::Reg(Reg::A), Value::Reg(Reg::Hl)]);
        assert!(du.uses.is_empty());
    }

    #[test]
    fn test_resolve_wide_move() {
        let i = Inst::new(Op::Ld, vec![Value::Reg(Reg::Hl), Value::Reg(Reg::De)]);
        let out = i.resolve();
        assert_eq!(
            out,
            vec![
                Inst::new(Op::Push, vec![Value::Reg(Reg::De)]),
                Inst::new(Op::Pop, vec![Value::Reg(Reg::Hl)]),
            ]
        );

        // Stack pointer destination stays a plain load.
        let sp = Inst::new(Op::Ld, vec![Value::Reg(Reg::Sp), Value::Reg(Reg::Ix)]);
        assert_eq!(sp.clone().resolve(), vec![sp]);

        // Byte moves are untouched.
        let b = Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::Reg(Reg::B)]);
        assert_eq!(b.clone().resolve(), vec![b]);
    }

    #[test]
    fn test_replace_var() {
        let v = sym(9, Width::Long);
        let mut i = Inst::new(
            Op::Ld,
            vec![
                Value::Mem(Box::new(Value::Sym(v)), Width::Byte),
                Value::Sym(v),
            ],
        );
        i.replace_var(v, &Value::Reg(Reg::Hl));
        assert_eq!(
            i.ops,
            vec![
                Value::Mem(Box::new(Value::Reg(Reg::Hl)), Width::Byte),
                Value::Reg(Reg::Hl),
            ]
        );
    }

    #[test]
    fn test_display_format() {
        let i = Inst::new(Op::Ld, vec![Value::Reg(Reg::A), Value::Indexed(Reg::Ix, 6)]);
        assert_eq!(i.to_string(), "\tld\ta,(ix+6)");

        let mut c = Inst::new(Op::Call, vec![Value::Label("_f")]);
        c.cond = Some(Cond::Nz);
        assert_eq!(c.to_string(), "\tcall\tnz,_f");

        assert_eq!(Inst::new(Op::Ret, vec![]).to_string(), "\tret");
    }
}
