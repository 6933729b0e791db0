//! Schedulability
//!
//! Rolling moves every lane of a node to one place inside the loop body. That
//! is only legal when no input of the graph is computed from a value the loop
//! replaces, when no instruction outside the graph that touches memory sits
//! between aligned lanes, and when the memory-ordered nodes appear in the
//! same relative order in every lane.

use super::graph::AlignedGraph;
use super::node::NodeId;
use crate::ir::{IrBlockId, IrFunction, IrId, IrInstruction, IrModule, IrValue};
use fxhash::FxHashSet;
use log::debug;

impl AlignedGraph {
    /// Check the graph can be collapsed into one loop over `block`, and
    /// record the order the loop body emits the nodes in
    pub fn is_schedulable(&mut self, module: &IrModule, function: &IrFunction, block: IrBlockId) -> bool {
        let mut visited = FxHashSet::default();
        for &input in self.inputs() {
            if self.input_depends_on_graph(function, block, input, &mut visited) {
                debug!("input {} is computed from a rolled instruction", input);
                return false;
            }
        }

        let width = self.width();
        let mut pending: FxHashSet<IrId> = self.values_in_node().clone();
        let mut order: Vec<Vec<NodeId>> = vec![Vec::new(); width];

        let insts = function.block_instructions(block);
        let Some(first) = insts.iter().position(|id| pending.contains(id)) else {
            return false;
        };
        let terminator = function.terminator(block);
        for &inst in &insts[first..] {
            if pending.is_empty() || Some(inst) == terminator {
                break;
            }
            let node = self.find_instruction(inst);
            let claimed = node.filter(|&n| !self.node(n).is_mismatch());
            let Some(node_id) = claimed else {
                if module.may_read_or_write_memory(function, inst) || module.may_have_side_effects(function, inst) {
                    debug!("{} touches memory between aligned lanes", inst);
                    return false;
                }
                continue;
            };
            pending.remove(&inst);
            let node = self.node(node_id);
            for (lane, lane_order) in order.iter_mut().enumerate() {
                if node.valid_instruction(function, lane) == Some(inst) && !lane_order.contains(&node_id) {
                    lane_order.push(node_id);
                }
            }
        }

        if !self.lanes_keep_memory_order(module, function, &order) {
            debug!("memory operations are ordered differently across lanes");
            return false;
        }
        self.scheduling_order = order.into_iter().next().unwrap_or_default();
        true
    }

    /// `value` is (transitively, inside `block`) computed from an
    /// instruction the graph replaces
    fn input_depends_on_graph(
        &self,
        function: &IrFunction,
        block: IrBlockId,
        value: IrValue,
        visited: &mut FxHashSet<IrId>,
    ) -> bool {
        let mut stack = vec![value];
        while let Some(value) = stack.pop() {
            let Some(id) = value.as_inst() else {
                continue;
            };
            if !visited.insert(id) {
                continue;
            }
            let Some(inst) = function.instruction(id) else {
                continue;
            };
            if matches!(inst, IrInstruction::Phi { .. }) {
                continue;
            }
            if self.contains_instruction(id) {
                return true;
            }
            if function.parent(id) == Some(block) {
                stack.extend(inst.operands());
            }
        }
        false
    }

    /// Every lane visits the order-sensitive nodes in the same sequence
    fn lanes_keep_memory_order(&self, module: &IrModule, function: &IrFunction, order: &[Vec<NodeId>]) -> bool {
        let Some((reference, others)) = order.split_first() else {
            return true;
        };
        let must_keep = |id: NodeId| self.node(id).must_keep_order(module, function);
        let mut cursors = vec![0usize; others.len()];
        for &node in reference.iter().filter(|&&n| must_keep(n)) {
            for (lane, cursor) in others.iter().zip(cursors.iter_mut()) {
                while *cursor < lane.len() && !must_keep(lane[*cursor]) {
                    *cursor += 1;
                }
                if *cursor >= lane.len() || lane[*cursor] != node {
                    return false;
                }
                *cursor += 1;
            }
        }
        others
            .iter()
            .zip(&cursors)
            .all(|(lane, &cursor)| lane[cursor.min(lane.len())..].iter().all(|&n| !must_keep(n)))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RollingConfig;
    use crate::ir::stride::InductionStrideOracle;
    use crate::ir::{BinaryOp, IrBuilder, IrFunctionSignature, IrModule, IrType, IrValue};
    use crate::rolling::classify::LaneScope;
    use crate::rolling::graph::{AlignedGraph, GraphContext};
    use crate::rolling::matching::intern_neutral_elements;

    fn schedulable(build: impl FnOnce(&mut IrBuilder) -> Vec<IrValue>) -> bool {
        let mut module = IrModule::new("m");
        intern_neutral_elements(&mut module);
        let f = module.declare_function(
            "f",
            IrFunctionSignature::new(vec![IrType::Ptr, IrType::Ptr], IrType::Void),
        );
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let seeds = build(&mut b);
        b.build_return(None);

        let config = RollingConfig::default();
        let oracle = InductionStrideOracle::new();
        let func = module.function(f).unwrap();
        let cx = GraphContext {
            module: &module,
            function: func,
            config: &config,
            oracle: &oracle,
            block: entry,
            scope: LaneScope::Block(entry),
        };
        let mut graph = AlignedGraph::build(&cx, seeds);
        graph.is_schedulable(&module, func, entry)
    }

    #[test]
    fn test_independent_stores_are_schedulable() {
        assert!(schedulable(|b| {
            (0..4)
                .map(|k| {
                    let idx = b.const_int(IrType::I64, k);
                    let v = b.const_int(IrType::I32, 7);
                    let p = b.build_gep(IrType::I32, IrValue::Arg(0), vec![idx]);
                    b.build_store(v, p)
                })
                .collect()
        }));
    }

    #[test]
    fn test_foreign_store_between_lanes_blocks_rolling() {
        assert!(!schedulable(|b| {
            let mut stores = Vec::new();
            for k in 0..3 {
                let idx = b.const_int(IrType::I64, k);
                let v = b.const_int(IrType::I32, 7);
                let p = b.build_gep(IrType::I32, IrValue::Arg(0), vec![idx]);
                stores.push(b.build_store(v, p));
                if k == 0 {
                    // A store to the other buffer that is not part of the group
                    let w = b.const_int(IrType::I32, 9);
                    b.build_store(w, IrValue::Arg(1));
                }
            }
            stores
        }));
    }

    #[test]
    fn test_lane_input_computed_from_rolled_value() {
        // Lane 1 uses a different operator, so its operand becomes an input
        // that reads memory written through a rolled pointer
        assert!(!schedulable(|b| {
            let mut stores = Vec::new();
            let mut prev = b.build_load(IrType::I32, IrValue::Arg(1));
            for k in 0..3 {
                let idx = b.const_int(IrType::I64, k);
                let p = b.build_gep(IrType::I32, IrValue::Arg(0), vec![idx]);
                let one = b.const_int(IrType::I32, 1 + k);
                let value = if k == 1 {
                    b.build_binop(BinaryOp::Shl, prev, one)
                } else {
                    b.build_binop(BinaryOp::Xor, prev, one)
                };
                let store = b.build_store(value, p);
                stores.push(store);
                prev = b.build_load(IrType::I32, p);
            }
            stores
        }));
    }
}
