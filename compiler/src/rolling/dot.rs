//! Graphviz rendering of aligned graphs
//!
//! Nodes are boxes labelled with their kind, green when classified and red
//! for mismatches. Edges point from a child to the node that consumes it.
//! Users outside the graph show up as yellow boxes named after their opcode.

use super::graph::AlignedGraph;
use crate::ir::{IrFunction, IrId, IrModule, IrValue};
use fxhash::FxHashMap;
use std::fmt::Write;

const MATCHED_COLOR: &str = "#8ae18a";
const MISMATCH_COLOR: &str = "#ff6671";
const EXTERNAL_COLOR: &str = "#f2eb5c";

/// Render `graph` in dot syntax
pub fn dot_string(graph: &AlignedGraph, module: &IrModule, function: &IrFunction) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph VTree {{");

    for (id, node) in graph.nodes() {
        let color = if node.is_mismatch() { MISMATCH_COLOR } else { MATCHED_COLOR };
        let _ = writeln!(
            out,
            "{} [label=\"{}\", style=\"filled\" , fillcolor=\"{}\", shape=box];",
            id.index(),
            escape(&node.label(module, function)),
            color
        );
    }

    for (id, node) in graph.nodes() {
        for child in &node.children {
            let _ = writeln!(out, "{}->{}", child.index(), id.index());
        }
    }

    // External users are numbered after the graph's own nodes
    let mut external: FxHashMap<IrId, usize> = FxHashMap::default();
    let mut next = graph.len();
    for (id, node) in graph.nodes() {
        for lane in 0..node.size() {
            let Some(inst) = node.valid_instruction(function, lane) else {
                continue;
            };
            let Some(user) = function
                .users(IrValue::Inst(inst))
                .into_iter()
                .find(|&user| !graph.contains_instruction(user))
            else {
                continue;
            };
            let target = *external.entry(user).or_insert_with(|| {
                let name = function
                    .instruction(user)
                    .map(|i| i.opcode().name())
                    .unwrap_or("user");
                let _ = writeln!(
                    out,
                    "{} [label=\"{}\", style=\"filled\" , fillcolor=\"{}\", shape=box];",
                    next, name, EXTERNAL_COLOR
                );
                next += 1;
                next - 1
            });
            let _ = writeln!(out, "{}->{}", id.index(), target);
        }
    }

    let _ = writeln!(out, "}}");
    out
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RollingConfig;
    use crate::ir::stride::InductionStrideOracle;
    use crate::ir::{BinaryOp, IrBuilder, IrFunctionSignature, IrType};
    use crate::rolling::classify::LaneScope;
    use crate::rolling::graph::GraphContext;
    use crate::rolling::matching::intern_neutral_elements;

    #[test]
    fn test_dot_marks_mismatches_and_external_users() {
        let mut module = IrModule::new("m");
        intern_neutral_elements(&mut module);
        let f = module.declare_function(
            "f",
            IrFunctionSignature::new(vec![IrType::Ptr, IrType::I32, IrType::I32, IrType::I32], IrType::I32),
        );
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let mut stores = Vec::new();
        let mut first = None;
        for (k, arg) in [1, 2, 3].into_iter().enumerate() {
            let v = b.build_binop(BinaryOp::Mul, IrValue::Arg(arg), IrValue::Arg(arg));
            first.get_or_insert(v);
            let idx = b.const_int(IrType::I64, k as i64);
            let p = b.build_gep(IrType::I32, IrValue::Arg(0), vec![idx]);
            stores.push(b.build_store(v, p));
        }
        let out = first.unwrap();
        b.build_return(Some(out));

        let func = module.function(f).unwrap();
        let config = RollingConfig::default();
        let oracle = InductionStrideOracle::new();
        let cx = GraphContext {
            module: &module,
            function: func,
            config: &config,
            oracle: &oracle,
            block: entry,
            scope: LaneScope::Block(entry),
        };
        let graph = AlignedGraph::build(&cx, stores);
        let dot = dot_string(&graph, &module, func);

        assert!(dot.starts_with("digraph VTree {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains(MATCHED_COLOR));
        assert!(dot.contains(MISMATCH_COLOR));
        assert!(dot.contains(&format!("label=\"ret\", style=\"filled\" , fillcolor=\"{}\"", EXTERNAL_COLOR)));
        assert!(dot.contains("1->0"));
    }
}
