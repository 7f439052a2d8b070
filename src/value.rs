// This module implements the operand model of the backend: machine registers of the eZ80
// in ADL mode, operand widths (byte/word/long), the Value enum covering every operand
// representation the code generator and the optimizer exchange (immediates, registers,
// memory references, labels, indexed addressing, frame slots, symbolic variables), the
// address-offset operation used by lowering, and the structural template matcher used by
// instruction lowering and the peephole catalog. Patterns are a distinct type from
// concrete values; in-progress bindings live in a MatchEnv scoped to a single match
// attempt and are discarded wholesale when an attempt fails.

//! Operand model: registers, widths, values and template matching.

use std::fmt;

use crate::error::{CompileError, CompileResult};

/// Operand width. Fixed at construction for every value that carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// 8-bit.
    Byte,
    /// 16-bit. Loads and stores work; arithmetic is unimplemented and fatal.
    Word,
    /// 24-bit, the native ADL register size. C `int` and all pointers.
    Long,
}

impl Width {
    /// Size of the width in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Long => 3,
        }
    }

    /// Width in bits, for error reporting.
    pub fn bits(self) -> u32 {
        self.bytes() * 8
    }

    /// Smallest width that can represent `v`.
    pub fn fitting(v: i64) -> Width {
        if (-128..=255).contains(&v) {
            Width::Byte
        } else if (-32768..=65535).contains(&v) {
            Width::Word
        } else {
            Width::Long
        }
    }

    /// True for the multi-byte widths that live in register pairs.
    pub fn is_wide(self) -> bool {
        !matches!(self, Width::Byte)
    }
}

/// Physical register. The enum order fixes the deterministic allocation
/// tie-break: lower index wins among equal-affinity candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reg {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    Bc,
    De,
    Hl,
    Ix,
    Iy,
    Sp,
    /// Accumulator/flags pair; push/pop only.
    Af,
}

/// Byte registers eligible to host byte-width variables, in tie-break order.
pub const BYTE_CANDIDATES: [Reg; 7] = [Reg::A, Reg::B, Reg::C, Reg::D, Reg::E, Reg::H, Reg::L];

/// Wide registers eligible to host word/long variables, in tie-break order.
pub const WIDE_CANDIDATES: [Reg; 3] = [Reg::Bc, Reg::De, Reg::Hl];

impl Reg {
    /// Assembly name.
    pub fn name(self) -> &'static str {
        match self {
            Reg::A => "a",
            Reg::B => "b",
            Reg::C => "c",
            Reg::D => "d",
            Reg::E => "e",
            Reg::H => "h",
            Reg::L => "l",
            Reg::Bc => "bc",
            Reg::De => "de",
            Reg::Hl => "hl",
            Reg::Ix => "ix",
            Reg::Iy => "iy",
            Reg::Sp => "sp",
            Reg::Af => "af",
        }
    }

    /// Constituent byte registers whose allocation events this register
    /// contributes to. Index registers and sp have no allocatable parts.
    pub fn byte_parts(self) -> &'static [Reg] {
        match self {
            Reg::A => &[Reg::A],
            Reg::B => &[Reg::B],
            Reg::C => &[Reg::C],
            Reg::D => &[Reg::D],
            Reg::E => &[Reg::E],
            Reg::H => &[Reg::H],
            Reg::L => &[Reg::L],
            Reg::Bc => &[Reg::B, Reg::C],
            Reg::De => &[Reg::D, Reg::E],
            Reg::Hl => &[Reg::H, Reg::L],
            Reg::Af => &[Reg::A],
            Reg::Ix | Reg::Iy | Reg::Sp => &[],
        }
    }

    /// True for the 24-bit register pairs and index registers.
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            Reg::Bc | Reg::De | Reg::Hl | Reg::Ix | Reg::Iy | Reg::Sp
        )
    }

}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Symbolic variable: an infinite-supply pseudo-register emitted by code
/// generation and eliminated by the register allocator. Defined exactly once
/// and used only within its defining block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymVar {
    pub id: u32,
    pub width: Width,
    /// The allocator must place this variable in a register or abort.
    pub force_reg: bool,
}

/// Frame-relative slot: an ordered list of slot sizes, a position in that
/// list and a sign. The rendered displacement is the signed sum of the sizes
/// up to and including the position, so offsetting the value inserts a new
/// displacement after the position instead of mutating a flat number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSlot {
    pub sizes: Vec<i64>,
    pub pos: usize,
    pub negative: bool,
}

impl FrameSlot {
    pub fn new(sizes: Vec<i64>, pos: usize, negative: bool) -> Self {
        Self {
            sizes,
            pos,
            negative,
        }
    }

    /// Signed displacement from the frame pointer.
    pub fn displacement(&self) -> i64 {
        let sum: i64 = self.sizes[..=self.pos].iter().sum();
        if self.negative {
            -sum
        } else {
            sum
        }
    }
}

/// Tagged operand representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'a> {
    /// Immediate constant; width picked as the smallest that fits.
    Imm(Width, i64),
    /// Physical register.
    Reg(Reg),
    /// Memory reference through an address value.
    Mem(Box<Value<'a>>, Width),
    /// Assembly label.
    Label(&'a str),
    /// Label plus a constant byte offset.
    LabelOff(&'a str, i64),
    /// Base register plus a signed 8-bit displacement.
    Indexed(Reg, i8),
    /// Frame-pointer-relative slot.
    Frame(FrameSlot),
    /// Symbolic variable awaiting allocation.
    Sym(SymVar),
}

impl<'a> Value<'a> {
    /// Immediate with the smallest fitting width.
    pub fn imm(v: i64) -> Value<'a> {
        Value::Imm(Width::fitting(v), v)
    }

    /// Indexed operand; the displacement must fit a signed byte.
    pub fn indexed(base: Reg, disp: i64) -> CompileResult<Value<'a>> {
        let disp = i8::try_from(disp).map_err(|_| CompileError::DisplacementOverflow { disp })?;
        Ok(Value::Indexed(base, disp))
    }

    /// Return a new value addressing `k` bytes further.
    ///
    /// Memory references cannot be offset (their address is already a
    /// value); frame slots re-check the signed 8-bit displacement range.
    pub fn add(&self, k: i64) -> CompileResult<Value<'a>> {
        match self {
            Value::Imm(_, v) => Ok(Value::imm(v + k)),
            Value::Label(name) => Ok(Value::LabelOff(name, k)),
            Value::LabelOff(name, off) => Ok(Value::LabelOff(name, off + k)),
            Value::Reg(r) => Value::indexed(*r, k),
            Value::Indexed(r, d) => Value::indexed(*r, *d as i64 + k),
            Value::Frame(slot) => {
                let mut slot = slot.clone();
                slot.sizes.insert(slot.pos + 1, k);
                slot.pos += 1;
                let disp = slot.displacement();
                if !(-128..=127).contains(&disp) {
                    return Err(CompileError::DisplacementOverflow { disp });
                }
                Ok(Value::Frame(slot))
            }
            Value::Mem(..) => Err(CompileError::NotOffsettable { what: "memory" }),
            Value::Sym(_) => Err(CompileError::NotOffsettable {
                what: "symbolic variable",
            }),
        }
    }

    /// Physical byte registers read when this value is used as a source or
    /// as a memory destination (address computation counts as a use).
    pub fn reg_parts(&self, out: &mut Vec<Reg>) {
        match self {
            Value::Reg(r) => out.extend_from_slice(r.byte_parts()),
            Value::Indexed(r, _) => out.extend_from_slice(r.byte_parts()),
            Value::Mem(addr, _) => addr.reg_parts(out),
            _ => {}
        }
    }

    /// Symbolic variables occurring anywhere in this value.
    pub fn sym_parts(&self, out: &mut Vec<SymVar>) {
        match self {
            Value::Sym(v) => out.push(*v),
            Value::Mem(addr, _) => addr.sym_parts(out),
            _ => {}
        }
    }

    /// Replace every occurrence of `var` with `with`, descending into
    /// memory references.
    pub fn replace_var(&mut self, var: SymVar, with: &Value<'a>) {
        match self {
            Value::Sym(v) if v.id == var.id => *self = with.clone(),
            Value::Mem(addr, _) => addr.replace_var(var, with),
            _ => {}
        }
    }

    /// True for operands that denote a memory location.
    pub fn is_memory(&self) -> bool {
        matches!(self, Value::Mem(..) | Value::Indexed(..) | Value::Frame(_))
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Imm(_, v) => write!(f, "{v}"),
            Value::Reg(r) => f.write_str(r.name()),
            Value::Mem(addr, _) => write!(f, "({addr})"),
            Value::Label(name) => f.write_str(name),
            Value::LabelOff(name, off) => {
                if *off >= 0 {
                    write!(f, "{name}+{off}")
                } else {
                    write!(f, "{name}{off}")
                }
            }
            Value::Indexed(r, d) => {
                if *d >= 0 {
                    write!(f, "({r}+{d})")
                } else {
                    write!(f, "({r}{d})")
                }
            }
            Value::Frame(slot) => {
                let d = slot.displacement();
                if d >= 0 {
                    write!(f, "(ix+{d})")
                } else {
                    write!(f, "(ix{d})")
                }
            }
            Value::Sym(v) => write!(f, "%{}", v.id),
        }
    }
}

/// Register class constraint for pattern slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegClass {
    Byte,
    Wide,
    Any,
}

impl RegClass {
    fn admits(self, r: Reg) -> bool {
        match self {
            RegClass::Byte => !r.is_wide(),
            RegClass::Wide => r.is_wide(),
            RegClass::Any => true,
        }
    }
}

/// Template operand: a pattern value with possibly-unbound placeholder
/// slots. Kept distinct from `Value` so matching never mutates production
/// objects.
#[derive(Debug, Clone)]
pub enum ValuePattern<'a> {
    /// Structural equality against a fully concrete value.
    Exact(Value<'a>),
    /// Any value at all; binds the whole value to the slot.
    Any(usize),
    /// Any register of the given class; binds the whole value.
    AnyReg(RegClass, usize),
    /// Any frame slot or indexed operand; binds the whole value.
    AnyFrameAddr(usize),
    /// Must compare equal to the value already bound to the slot.
    Bound(usize),
}

/// Binding environment for one match attempt. A failed field comparison
/// aborts the whole attempt; callers discard the environment rather than
/// unwinding partial bindings.
#[derive(Debug, Default)]
pub struct MatchEnv<'a> {
    slots: Vec<Option<Value<'a>>>,
}

impl<'a> MatchEnv<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(&mut self, slot: usize, value: &Value<'a>) {
        if self.slots.len() <= slot {
            self.slots.resize(slot + 1, None);
        }
        self.slots[slot] = Some(value.clone());
    }

    fn bound(&self, slot: usize) -> Option<&Value<'a>> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    /// Fetch a binding after a successful match. Reading an unbound slot
    /// means the environment leaked out of its match attempt.
    pub fn get(&self, slot: usize) -> CompileResult<&Value<'a>> {
        self.bound(slot).ok_or(CompileError::UnboundSlot { slot })
    }

    /// Register bound to `slot`, if the binding is a plain register.
    pub fn reg(&self, slot: usize) -> CompileResult<Reg> {
        match self.get(slot)? {
            Value::Reg(r) => Ok(*r),
            other => Err(CompileError::CodeGeneration {
                reason: format!("slot {slot} bound to non-register {other}"),
            }),
        }
    }
}

impl<'a> ValuePattern<'a> {
    /// Unify this pattern against a concrete value. On first encounter of
    /// an unbound slot, bind it and succeed; on subsequent encounters,
    /// compare by equality.
    pub fn matches(&self, concrete: &Value<'a>, env: &mut MatchEnv<'a>) -> bool {
        match self {
            ValuePattern::Exact(v) => v == concrete,
            ValuePattern::Any(slot) => {
                match env.bound(*slot) {
                    Some(prev) => prev == concrete,
                    None => {
                        env.bind(*slot, concrete);
                        true
                    }
                }
            }
            ValuePattern::AnyReg(class, slot) => match concrete {
                Value::Reg(r) if class.admits(*r) => match env.bound(*slot) {
                    Some(prev) => prev == concrete,
                    None => {
                        env.bind(*slot, concrete);
                        true
                    }
                },
                _ => false,
            },
            ValuePattern::AnyFrameAddr(slot) => match concrete {
                Value::Frame(_) | Value::Indexed(..) => match env.bound(*slot) {
                    Some(prev) => prev == concrete,
                    None => {
                        env.bind(*slot, concrete);
                        true
                    }
                },
                _ => false,
            },
            ValuePattern::Bound(slot) => match env.bound(*slot) {
                Some(prev) => prev == concrete,
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imm_width_fitting() {
        assert_eq!(Value::imm(0), Value::Imm(Width::Byte, 0));
        assert_eq!(Value::imm(255), Value::Imm(Width::Byte, 255));
        assert_eq!(Value::imm(-128), Value::Imm(Width::Byte, -128));
        assert_eq!(Value::imm(256), Value::Imm(Width::Word, 256));
        assert_eq!(Value::imm(65536), Value::Imm(Width::Long, 65536));
    }

    #[test]
    fn test_add_shifts_location() {
        let v = Value::imm(10).add(4).unwrap();
        assert_eq!(v, Value::Imm(Width::Byte, 14));

        let v = Value::Label("_tab").add(3).unwrap();
        assert_eq!(v, Value::LabelOff("_tab", 3));
        let v = v.add(-1).unwrap();
        assert_eq!(v, Value::LabelOff("_tab", 2));

        let v = Value::Reg(Reg::Hl).add(5).unwrap();
        assert_eq!(v, Value::Indexed(Reg::Hl, 5));
        let v = v.add(2).unwrap();
        assert_eq!(v, Value::Indexed(Reg::Hl, 7));
    }

    #[test]
    fn test_add_memory_fails() {
        let m = Value::Mem(Box::new(Value::Reg(Reg::Hl)), Width::Byte);
        assert!(m.add(1).is_err());
    }

    #[test]
    fn test_indexed_displacement_range() {
        assert!(Value::indexed(Reg::Ix, 127).is_ok());
        assert!(Value::indexed(Reg::Ix, -128).is_ok());
        assert!(Value::indexed(Reg::Ix, 128).is_err());
        let v = Value::Indexed(Reg::Ix, 120);
        assert!(v.add(10).is_err());
    }

    #[test]
    fn test_frame_slot_add_inserts_displacement() {
        // Second local of sizes 3,1: ix-4.
        let slot = FrameSlot::new(vec![3, 1], 1, true);
        let v = Value::Frame(slot);
        assert_eq!(v.to_string(), "(ix-4)");

        let v = v.add(2).unwrap();
        assert_eq!(v.to_string(), "(ix-6)");

        // Argument slot: base 6 plus one 3-byte argument before it.
        let arg = Value::Frame(FrameSlot::new(vec![6, 3], 1, false));
        assert_eq!(arg.to_string(), "(ix+9)");

        let big = Value::Frame(FrameSlot::new(vec![120], 0, true));
        assert!(big.add(20).is_err());
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Value::Reg(Reg::Bc).to_string(), "bc");
        assert_eq!(
            Value::Mem(Box::new(Value::Reg(Reg::Hl)), Width::Byte).to_string(),
            "(hl)"
        );
        assert_eq!(Value::Indexed(Reg::Ix, -3).to_string(), "(ix-3)");
        assert_eq!(Value::LabelOff("S0", -2).to_string(), "S0-2");
        assert_eq!(
            Value::Sym(SymVar {
                id: 7,
                width: Width::Long,
                force_reg: false
            })
            .to_string(),
            "%7"
        );
    }

    #[test]
    fn test_match_binds_then_compares() {
        let mut env = MatchEnv::new();
        let pat = ValuePattern::AnyReg(RegClass::Wide, 0);
        assert!(pat.matches(&Value::Reg(Reg::Hl), &mut env));
        // Subsequent encounter of the same slot compares by equality.
        assert!(ValuePattern::Bound(0).matches(&Value::Reg(Reg::Hl), &mut env));
        assert!(!ValuePattern::Bound(0).matches(&Value::Reg(Reg::De), &mut env));
        assert_eq!(env.reg(0).unwrap(), Reg::Hl);
    }

    #[test]
    fn test_match_class_constraints() {
        let mut env = MatchEnv::new();
        assert!(!ValuePattern::AnyReg(RegClass::Wide, 0).matches(&Value::Reg(Reg::A), &mut env));
        assert!(!ValuePattern::AnyReg(RegClass::Byte, 0).matches(&Value::Reg(Reg::Hl), &mut env));
        assert!(ValuePattern::AnyFrameAddr(1).matches(&Value::Indexed(Reg::Ix, 4), &mut env));
        assert!(!ValuePattern::AnyFrameAddr(2).matches(&Value::Reg(Reg::Hl), &mut env));
    }

    #[test]
    fn test_failed_attempt_leaves_no_bindings() {
        // A fresh environment per attempt is the scoping rule: a failed
        // attempt's environment is discarded by the caller.
        let mut env = MatchEnv::new();
        assert!(ValuePattern::Any(0).matches(&Value::Reg(Reg::B), &mut env));
        assert!(!ValuePattern::Bound(0).matches(&Value::Reg(Reg::C), &mut env));
        drop(env);
        let env = MatchEnv::new();
        assert!(env.get(0).is_err());
    }

    #[test]
    fn test_replace_var_descends_into_memory() {
        let var = SymVar {
            id: 3,
            width: Width::Long,
            force_reg: true,
        };
        let mut v = Value::Mem(Box::new(Value::Sym(var)), Width::Byte);
        v.replace_var(var, &Value::Reg(Reg::Hl));
        assert_eq!(v, Value::Mem(Box::new(Value::Reg(Reg::Hl)), Width::Byte));
    }

    #[test]
    fn test_reg_parts_propagation() {
        let mut parts = Vec::new();
        Value::Reg(Reg::Bc).reg_parts(&mut parts);
        assert_eq!(parts, vec![Reg::B, Reg::C]);

        parts.clear();
        Value::Mem(Box::new(Value::Indexed(Reg::Hl, 2)), Width::Byte).reg_parts(&mut parts);
        assert_eq!(parts, vec![Reg::H, Reg::L]);

        parts.clear();
        Value::Frame(FrameSlot::new(vec![3], 0, true)).reg_parts(&mut parts);
        assert!(parts.is_empty());
    }
}
