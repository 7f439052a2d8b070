// This module serializes lowered functions into assembly text. Per function the
// reachable blocks are printed in traversal order, each as a label line followed by one
// instruction per line with tab-separated mnemonic and operands, then the block's
// transitions as jp lines. Return placeholders must have been resolved to epilogue
// jumps before serialization; finding one here is fatal. After all functions, every
// unique string literal gets one .db section.

//! Assembly text output.

use crate::block::{FunctionImpl, Transition};
use crate::error::{CompileError, CompileResult};
use crate::session::CodegenSession;

/// Serialize one function's reachable blocks.
pub fn serialize_function(f: &FunctionImpl<'_>) -> CompileResult<String> {
    let mut out = String::new();
    for id in f.graph.traversal(&f.roots()) {
        let block = f.graph.block(id);
        out.push_str(block.label);
        out.push_str(":\n");
        for inst in &block.insts {
            out.push_str(&format!("{inst}\n"));
        }
        for t in &block.exits {
            match t {
                Transition::Jump { target, cond } => {
                    let label = f.graph.block(*target).label;
                    match cond {
                        Some(cc) => out.push_str(&format!("\tjp\t{cc},{label}\n")),
                        None => out.push_str(&format!("\tjp\t{label}\n")),
                    }
                }
                Transition::Ret { .. } => {
                    return Err(CompileError::UnresolvedReturn {
                        label: block.label.to_string(),
                    })
                }
            }
        }
    }
    Ok(out)
}

/// One `.db` section per unique string literal, in first-use order.
pub fn serialize_strings(session: &CodegenSession<'_>) -> String {
    let mut out = String::new();
    for (label, text) in session.strings() {
        out.push_str(label);
        out.push_str(":\n\t.db\t");
        out.push_str(&db_literal(&text));
        out.push_str(",0\n");
    }
    out
}

/// Render string contents as a .db operand list: printable runs quoted
/// with `"` and `\` escaped, everything else as a numeric byte.
fn db_literal(text: &str) -> String {
    let mut out = String::new();
    let mut in_quotes = false;
    for b in text.bytes() {
        let printable = (0x20..0x7f).contains(&b);
        if printable {
            if !in_quotes {
                if !out.is_empty() {
                    out.push(',');
                }
                out.push('"');
                in_quotes = true;
            }
            if b == b'"' || b == b'\\' {
                out.push('\\');
            }
            out.push(b as char);
        } else {
            if in_quotes {
                out.push('"');
                in_quotes = false;
            }
            if !out.is_empty() {
                out.push(',');
            }
            out.push_str(&b.to_string());
        }
    }
    if in_quotes {
        out.push('"');
    }
    if out.is_empty() {
        out.push_str("\"\"");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockGraph;
    use crate::instruction::{Cond, Inst, Op};
    use crate::value::{Reg, Value};

    #[test]
    fn db_literal_quotes_printable_runs() {
        assert_eq!(db_literal("hi"), "\"hi\"");
        assert_eq!(db_literal("a\nb"), "\"a\",10,\"b\"");
        assert_eq!(db_literal("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(db_literal(""), "\"\"");
    }

    #[test]
    fn function_blocks_render_labels_instructions_and_jumps() {
        let mut graph = BlockGraph::new();
        let entry = graph.add_block("_f");
        let epi = graph.add_block("L_0");
        graph.block_mut(entry).push(Inst::new(
            Op::Ld,
            vec![Value::Reg(Reg::A), Value::imm(1)],
        ));
        graph.block_mut(entry).jump_if(Cond::Nz, epi);
        graph.block_mut(entry).jump_to(epi);
        graph.block_mut(epi).push(Inst::new(Op::Ret, vec![]));
        let f = FunctionImpl {
            name: "_f",
            graph,
            entry,
            epilogue: epi,
            frame_bytes: 6,
        };
        let text = serialize_function(&f).unwrap();
        assert_eq!(
            text,
            "_f:\n\tld\ta,1\n\tjp\tnz,L_0\n\tjp\tL_0\nL_0:\n\tret\n"
        );
    }

    #[test]
    fn unresolved_return_is_fatal() {
        let mut graph = BlockGraph::new();
        let entry = graph.add_block("_f");
        let epi = graph.add_block("L_0");
        graph
            .block_mut(entry)
            .exits
            .push(Transition::Ret { cond: None });
        let f = FunctionImpl {
            name: "_f",
            graph,
            entry,
            epilogue: epi,
            frame_bytes: 6,
        };
        assert!(matches!(
            serialize_function(&f),
            Err(CompileError::UnresolvedReturn { .. })
        ));
    }
}
