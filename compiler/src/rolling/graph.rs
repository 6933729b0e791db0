//! Aligned Graph
//!
//! The aligned graph explains how every lane of a seed group can be computed
//! by one loop body. It is grown top-down from a root tuple: each node's
//! operand tuples become child nodes, reusing an existing node whenever the
//! same tuple was already classified.
//!
//! Bookkeeping kept alongside the arena:
//! - `node_map`: lane-0 value to the nodes starting with it (tuple lookup)
//! - `inst_map`: instruction to the nodes replacing it (schedulability)
//! - `values_in_node`: every instruction the rolled loop makes redundant
//! - `inputs`: values the loop consumes from outside the graph

use super::classify::{minmax_node, phi_incoming_tuples, reduction_node, LaneScope};
use super::node::{Node, NodeId, NodeKind};
use crate::config::RollingConfig;
use crate::ir::stride::StrideOracle;
use crate::ir::{IrBlockId, IrFunction, IrId, IrInstruction, IrModule, IrValue};
use fxhash::{FxHashMap, FxHashSet};
use indexmap::{IndexMap, IndexSet};
use log::trace;
use smallvec::SmallVec;

/// Everything classification reads while a graph is built
pub struct GraphContext<'a> {
    pub module: &'a IrModule,
    pub function: &'a IrFunction,
    pub config: &'a RollingConfig,
    pub oracle: &'a dyn StrideOracle,
    /// Block whose straight-line code is rolled (the first lane's block for regions)
    pub block: IrBlockId,
    pub scope: LaneScope<'a>,
}

/// Arena of nodes plus the lookup tables described in the module docs
#[derive(Debug, Default, Clone)]
pub struct AlignedGraph {
    nodes: Vec<Node>,
    root: Option<NodeId>,
    node_map: FxHashMap<IrValue, SmallVec<[NodeId; 2]>>,
    inst_map: FxHashMap<IrId, SmallVec<[NodeId; 2]>>,
    values_in_node: FxHashSet<IrId>,
    inputs: IndexSet<IrValue>,
    pub(crate) scheduling_order: Vec<NodeId>,
}

impl AlignedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph rooted at one lane tuple
    pub fn build(cx: &GraphContext<'_>, values: Vec<IrValue>) -> Self {
        let mut graph = Self::new();
        let root = graph.add_root(cx, values);
        graph.root = Some(root);
        graph
    }

    /// Graph rolling several independent groups in one loop
    pub fn build_multi(cx: &GraphContext<'_>, groups: Vec<Vec<IrValue>>) -> Self {
        let mut graph = Self::new();
        let root = graph.add_node(cx.function, Node::new(NodeKind::Multi { groups }, Vec::new()));
        graph.grow(cx, root);
        graph.root = Some(root);
        graph
    }

    /// Graph for the associative chain rooted at `value`, consumed by `user`
    pub fn build_reduction(cx: &GraphContext<'_>, value: IrValue, user: IrId) -> Option<Self> {
        let node = reduction_node(cx, value, user)?;
        let mut graph = Self::new();
        if let NodeKind::Reduction { phi: Some(phi), .. } = &node.kind {
            graph.add_input(IrValue::Inst(*phi));
        }
        let root = graph.add_node(cx.function, node);
        graph.grow(cx, root);
        graph.root = Some(root);
        Some(graph)
    }

    /// Graph for the min/max chain rooted at `value`, without its last
    /// `skip` links
    pub fn build_minmax(cx: &GraphContext<'_>, value: IrValue, skip: usize) -> Option<Self> {
        let node = minmax_node(cx, value, skip)?;
        let mut graph = Self::new();
        if let NodeKind::MinMax { start, .. } = &node.kind {
            graph.add_input(*start);
        }
        let root = graph.add_node(cx.function, node);
        graph.grow(cx, root);
        graph.root = Some(root);
        Some(graph)
    }

    /// Classify `values`, add the node and grow it
    pub(crate) fn add_root(&mut self, cx: &GraphContext<'_>, values: Vec<IrValue>) -> NodeId {
        let node = self.create_node(cx, values);
        let id = self.add_node(cx.function, node);
        self.grow(cx, id);
        id
    }

    pub(crate) fn add_input(&mut self, value: IrValue) {
        self.inputs.insert(value);
    }

    /// Put a node into the arena and index it
    pub(crate) fn add_node(&mut self, function: &IrFunction, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        if !node.kind.is_transparent() {
            for inst in node.owned_instructions(function) {
                self.values_in_node.insert(inst);
                self.inst_map.entry(inst).or_default().push(id);
            }
        }
        if let Some(first) = node.value(0) {
            self.node_map.entry(first).or_default().push(id);
        }
        self.nodes.push(node);
        id
    }

    /// Attach children to `from` and to everything created below it
    pub(crate) fn grow(&mut self, cx: &GraphContext<'_>, from: NodeId) {
        let mut stack = vec![from];
        let mut visited = FxHashSet::default();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let mut children = Vec::new();
            for tuple in self.child_tuples(cx, id) {
                let child = match self.find(&tuple) {
                    Some(existing) => existing,
                    None => {
                        let node = self.create_node(cx, tuple);
                        let created = self.add_node(cx.function, node);
                        stack.push(created);
                        created
                    }
                };
                children.push(child);
            }
            let mut labels = Vec::new();
            if matches!(self.node(id).kind, NodeKind::Phi { .. }) {
                let values = self.node(id).values.clone();
                for (_, label_values) in phi_incoming_tuples(cx, &values) {
                    let label = match self.find(&label_values) {
                        Some(existing) => existing,
                        None => {
                            let node = self.create_node(cx, label_values);
                            self.add_node(cx.function, node)
                        }
                    };
                    labels.push(label);
                }
            }
            let node = &mut self.nodes[id.index()];
            node.children.extend(children);
            if let NodeKind::Phi { labels: slot } = &mut node.kind {
                *slot = labels;
            }
        }
    }

    /// Operand tuples the children of a node are built from
    fn child_tuples(&self, cx: &GraphContext<'_>, id: NodeId) -> Vec<Vec<IrValue>> {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Multi { groups } => groups.clone(),
            NodeKind::Reduction { operands, .. } | NodeKind::MinMax { operands, .. } => {
                vec![operands.clone()]
            }
            NodeKind::GepSequence { indices, .. } => vec![indices.clone()],
            NodeKind::BinOpSequence { left, right, .. } => vec![left.clone(), right.clone()],
            NodeKind::ConstantExpr => {
                let exprs: Vec<_> = node
                    .values
                    .iter()
                    .filter_map(|&v| cx.module.constants.const_expr(v))
                    .collect();
                let arity = exprs.first().map_or(0, |e| e.operands.len());
                (0..arity)
                    .map(|k| exprs.iter().map(|e| e.operands[k]).collect())
                    .collect()
            }
            NodeKind::Matching => {
                let lanes: Vec<Vec<IrValue>> = (0..node.size())
                    .filter_map(|lane| node.valid_instruction(cx.function, lane))
                    .filter_map(|inst| cx.function.instruction(inst))
                    .map(|inst| inst.operands())
                    .collect();
                if lanes.len() != node.size() {
                    return Vec::new();
                }
                let arity = lanes.first().map_or(0, |ops| ops.len());
                (0..arity)
                    .map(|k| lanes.iter().map(|ops| ops[k]).collect())
                    .collect()
            }
            NodeKind::Phi { .. } => phi_incoming_tuples(cx, &node.values)
                .into_iter()
                .map(|(tuple, _)| tuple)
                .collect(),
            _ => Vec::new(),
        }
    }

    // === Queries ===

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with their ids, in creation order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId::new(i as u32), n))
    }

    /// Nodes whose first lane is `value`
    pub(crate) fn nodes_starting_with(&self, value: IrValue) -> Vec<NodeId> {
        self.node_map
            .get(&value)
            .map(|ids| ids.to_vec())
            .unwrap_or_default()
    }

    /// Node built for exactly this tuple
    pub fn find(&self, values: &[IrValue]) -> Option<NodeId> {
        let first = values.first()?;
        self.node_map.get(first)?.iter().copied().find(|&id| {
            let node = self.node(id);
            node.size() == values.len() && node.values == values
        })
    }

    /// The node replacing `inst`; `None` when no node or several non-mismatch
    /// nodes claim it
    pub fn find_instruction(&self, inst: IrId) -> Option<NodeId> {
        let mut found = None;
        for &id in self.inst_map.get(&inst)? {
            if self.node(id).is_mismatch() {
                continue;
            }
            if found.is_some() {
                return None;
            }
            found = Some(id);
        }
        found
    }

    /// Number of lanes, i.e. loop iterations
    pub fn width(&self) -> usize {
        let Some(root) = self.root else {
            return 0;
        };
        let node = self.node(root);
        match (&node.kind, node.children.first()) {
            (NodeKind::Multi { .. }, Some(&child)) => self.node(child).size(),
            _ => node.size(),
        }
    }

    pub fn inputs(&self) -> &IndexSet<IrValue> {
        &self.inputs
    }

    pub fn contains_instruction(&self, inst: IrId) -> bool {
        self.values_in_node.contains(&inst)
    }

    pub fn values_in_node(&self) -> &FxHashSet<IrId> {
        &self.values_in_node
    }

    pub fn scheduling_order(&self) -> &[NodeId] {
        &self.scheduling_order
    }

    pub fn mismatch_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_mismatch()).count()
    }

    /// Node counts per kind, for statistics
    pub fn kind_counts(&self) -> IndexMap<&'static str, usize> {
        let mut counts = IndexMap::new();
        for node in &self.nodes {
            *counts.entry(node.kind.name()).or_insert(0) += 1;
        }
        counts
    }

    /// Instructions the root lanes stand for
    pub fn root_instructions(&self, function: &IrFunction) -> Vec<IrId> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        let node = self.node(root);
        let lanes_of = |node: &Node| -> Vec<IrId> {
            (0..node.size())
                .filter_map(|lane| node.valid_instruction(function, lane))
                .collect()
        };
        match node.kind {
            NodeKind::Multi { .. } => node
                .children
                .iter()
                .flat_map(|&child| lanes_of(self.node(child)))
                .collect(),
            _ => lanes_of(node),
        }
    }

    /// The root lanes use `value`, directly or through other instructions of
    /// their block (phis end the search)
    pub fn depends_on(&self, function: &IrFunction, value: IrValue) -> bool {
        let mut stack = self.root_instructions(function);
        let mut visited = FxHashSet::default();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(inst) = function.instruction(id) else {
                continue;
            };
            for operand in inst.operands() {
                if operand == value {
                    return true;
                }
                let Some(op_id) = operand.as_inst() else {
                    continue;
                };
                let same_block = function.parent(op_id).is_some() && function.parent(op_id) == function.parent(id);
                let is_phi = matches!(function.instruction(op_id), Some(IrInstruction::Phi { .. }));
                if same_block && !is_phi {
                    stack.push(op_id);
                }
            }
        }
        false
    }

    /// Trace-level dump of every node
    pub fn log_nodes(&self, module: &IrModule, function: &IrFunction) {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }
        for (id, node) in self.nodes() {
            let children: Vec<String> = node.children.iter().map(|c| c.to_string()).collect();
            trace!(
                "{} [{}] values {:?} children [{}]",
                id,
                node.label(module, function),
                node.values,
                children.join(", ")
            );
        }
    }
}
