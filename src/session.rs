// This module provides arena-based codegen session management using the bumpalo crate.
// CodegenSession is the central hub of a compilation run: it owns the arena that backs
// every interned label in the IR, the generated-label counter, the string-constant table
// (deduplicated by content so each unique literal gets one data section), the fixed-name
// runtime-routine label table used by the long and byte operator templates, and the
// compilation statistics reported by the driver. All module-level globals of a classic
// compiler backend (label counters, string tables, routine names) live here as fields
// and are threaded through every component call.

//! Arena-based codegen session management.
//!
//! All labels in the IR are `&'arena str` interned here, so values and
//! instructions are plain data with a single compilation lifetime.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::{Cell, RefCell};
use std::fmt;

/// Fixed-name runtime routines the operator templates call into.
///
/// Contract: long routines take their operands in hl and de and return in
/// hl; byte divide/remainder take b and c and return in a; byte shifts take
/// the value in a and the count in b. All other registers are preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeRoutine {
    IMul,
    IDivS,
    IDivU,
    IRemS,
    IRemU,
    IAnd,
    IOr,
    IXor,
    IShl,
    IShrS,
    IShrU,
    BDivS,
    BDivU,
    BRemS,
    BRemU,
    BShl,
    BShr,
}

impl RuntimeRoutine {
    pub fn label(self) -> &'static str {
        match self {
            RuntimeRoutine::IMul => "__imul",
            RuntimeRoutine::IDivS => "__idivs",
            RuntimeRoutine::IDivU => "__idivu",
            RuntimeRoutine::IRemS => "__irems",
            RuntimeRoutine::IRemU => "__iremu",
            RuntimeRoutine::IAnd => "__iand",
            RuntimeRoutine::IOr => "__ior",
            RuntimeRoutine::IXor => "__ixor",
            RuntimeRoutine::IShl => "__ishl",
            RuntimeRoutine::IShrS => "__ishrs",
            RuntimeRoutine::IShrU => "__ishru",
            RuntimeRoutine::BDivS => "__bdivs",
            RuntimeRoutine::BDivU => "__bdivu",
            RuntimeRoutine::BRemS => "__brems",
            RuntimeRoutine::BRemU => "__bremu",
            RuntimeRoutine::BShl => "__bshl",
            RuntimeRoutine::BShr => "__bshr",
        }
    }
}

/// Central session state for one compilation run.
pub struct CodegenSession<'arena> {
    /// Arena allocator; owns every interned label.
    arena: &'arena Bump,

    /// Counter behind generated block labels.
    next_label: Cell<u32>,

    /// Interned strings, so repeated labels share storage.
    interned: RefCell<HashMap<String, &'arena str>>,

    /// String literals in emission order: (label, contents).
    strings: RefCell<Vec<(&'arena str, String)>>,

    /// Content -> label, for string deduplication.
    string_labels: RefCell<HashMap<String, &'arena str>>,

    /// Compilation statistics.
    stats: RefCell<SessionStats>,
}

impl<'arena> CodegenSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            next_label: Cell::new(0),
            interned: RefCell::new(HashMap::new()),
            strings: RefCell::new(Vec::new()),
            string_labels: RefCell::new(HashMap::new()),
            stats: RefCell::new(SessionStats::default()),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut interned = self.interned.borrow_mut();
        if let Some(&existing) = interned.get(s) {
            return existing;
        }
        let stored = self.arena.alloc_str(s);
        interned.insert(s.to_string(), stored);
        stored
    }

    /// Fresh generated block label.
    pub fn new_block_label(&self) -> &'arena str {
        let n = self.next_label.get();
        self.next_label.set(n + 1);
        self.intern_str(&format!("L_{n}"))
    }

    /// Function entry label: leading underscore, linker-visible.
    pub fn function_label(&self, name: &str) -> &'arena str {
        self.intern_str(&format!("_{name}"))
    }

    /// Label of a runtime routine.
    pub fn runtime_label(&self, routine: RuntimeRoutine) -> &'arena str {
        self.intern_str(routine.label())
    }

    /// Label for a string literal; identical contents share one label.
    pub fn string_label(&self, contents: &str) -> &'arena str {
        if let Some(&label) = self.string_labels.borrow().get(contents) {
            return label;
        }
        let n = self.next_label.get();
        self.next_label.set(n + 1);
        let label = self.intern_str(&format!("S_{n}"));
        self.string_labels
            .borrow_mut()
            .insert(contents.to_string(), label);
        self.strings
            .borrow_mut()
            .push((label, contents.to_string()));
        label
    }

    /// String constants in emission order.
    pub fn strings(&self) -> Vec<(&'arena str, String)> {
        self.strings.borrow().clone()
    }

    pub fn record_function_compiled(&self) {
        self.stats.borrow_mut().functions_compiled += 1;
    }

    pub fn record_block_created(&self) {
        self.stats.borrow_mut().blocks_created += 1;
    }

    pub fn record_instruction_emitted(&self) {
        self.stats.borrow_mut().instructions_emitted += 1;
    }

    pub fn record_register_allocated(&self) {
        self.stats.borrow_mut().registers_allocated += 1;
    }

    pub fn record_spill_generated(&self) {
        self.stats.borrow_mut().spills_generated += 1;
    }

    pub fn record_unallocated_variable(&self) {
        self.stats.borrow_mut().unallocated_variables += 1;
    }

    pub fn record_peephole_rewrite(&self, rule: &'static str) {
        let mut stats = self.stats.borrow_mut();
        stats.peephole_rewrites += 1;
        *stats.peephole_by_rule.entry(rule).or_insert(0) += 1;
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation statistics, printed by the driver in verbose mode.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub functions_compiled: usize,
    pub blocks_created: usize,
    pub instructions_emitted: usize,
    pub registers_allocated: usize,
    pub spills_generated: usize,
    pub unallocated_variables: usize,
    pub peephole_rewrites: usize,
    pub peephole_by_rule: HashMap<&'static str, usize>,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Codegen Session Statistics:")?;
        writeln!(f, "  Functions compiled: {}", self.functions_compiled)?;
        writeln!(f, "  Blocks created: {}", self.blocks_created)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        writeln!(f, "  Registers allocated: {}", self.registers_allocated)?;
        writeln!(f, "  Spills generated: {}", self.spills_generated)?;
        writeln!(
            f,
            "  Unallocated variables: {}",
            self.unallocated_variables
        )?;
        writeln!(f, "  Peephole rewrites: {}", self.peephole_rewrites)?;
        if !self.peephole_by_rule.is_empty() {
            let mut rules: Vec<_> = self.peephole_by_rule.iter().collect();
            rules.sort();
            for (rule, count) in rules {
                writeln!(f, "    {rule}: {count}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_generation() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        assert_eq!(session.new_block_label(), "L_0");
        assert_eq!(session.new_block_label(), "L_1");
        assert_eq!(session.function_label("main"), "_main");
    }

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let a = session.intern_str("hello");
        let b = session.intern_str("hello");
        assert_eq!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn test_string_constants_dedup() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let l1 = session.string_label("abc");
        let l2 = session.string_label("abc");
        let l3 = session.string_label("xyz");
        assert_eq!(l1, l2);
        assert_ne!(l1, l3);
        assert_eq!(session.strings().len(), 2);
    }

    #[test]
    fn test_runtime_labels_fixed() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        assert_eq!(session.runtime_label(RuntimeRoutine::IMul), "__imul");
        assert_eq!(session.runtime_label(RuntimeRoutine::BShr), "__bshr");
    }

    #[test]
    fn test_statistics() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        session.record_function_compiled();
        session.record_register_allocated();
        session.record_register_allocated();
        session.record_spill_generated();
        session.record_peephole_rewrite("push-pop");

        let stats = session.stats();
        assert_eq!(stats.functions_compiled, 1);
        assert_eq!(stats.registers_allocated, 2);
        assert_eq!(stats.spills_generated, 1);
        assert_eq!(stats.peephole_by_rule["push-pop"], 1);

        let shown = format!("{stats}");
        assert!(shown.contains("Registers allocated: 2"));
        assert!(shown.contains("push-pop: 1"));
    }
}
