//! Graphviz rendering of a function's CFG, edge kinds colored the way the
//! rest of the tooling labels them.

use hlb::{disasm, Function, Module};

use crate::cfg::{Cfg, EdgeKind};

pub fn cfg_dot(m: &Module, f: &Function, cfg: &Cfg) -> String {
    let mut dot = String::new();
    dot.push_str("digraph G {\n");
    dot.push_str("  labelloc=\"t\";\n");
    dot.push_str(&format!(
        "  label=\"CFG for {}\";\n",
        disasm::func_header(m, f).replace('"', "\\\"")
    ));
    dot.push_str("  node [shape=box, fontname=\"Courier\"];\n");
    dot.push_str("  edge [fontname=\"Courier\", fontsize=9];\n");

    for b in &cfg.blocks {
        let mut label = String::new();
        for pc in b.start..=b.end {
            label.push_str(&disasm::pseudo_op(m, f, &f.ops()[pc], pc));
            label.push_str("\\n");
        }
        let style = if b.id == 0 {
            "style=filled, fillcolor=pink1"
        } else if b.successors.is_empty() {
            "style=filled, fillcolor=aquamarine"
        } else {
            "style=filled, fillcolor=lightblue"
        };
        dot.push_str(&format!(
            "  n{} [label=\"{}\", {style}, xlabel=\"{}.\"];\n",
            b.id,
            label.replace('"', "\\\""),
            b.start
        ));
    }

    for b in &cfg.blocks {
        for (succ, kind) in &b.successors {
            let style = match kind {
                EdgeKind::True => "color=\"green\", label=\"true\"".to_string(),
                EdgeKind::False => "color=\"crimson\", label=\"false\"".to_string(),
                EdgeKind::Switch(i) => format!("color=\"purple\", label=\"case {i}\""),
                EdgeKind::Trap => "color=\"yellow3\", label=\"trap\"".to_string(),
                EdgeKind::Unconditional => "color=\"cornflowerblue\"".to_string(),
            };
            dot.push_str(&format!("  n{} -> n{} [{style}];\n", b.id, succ));
        }
    }

    dot.push_str("}\n");
    dot
}
