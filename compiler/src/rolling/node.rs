//! Aligned Graph Nodes
//!
//! A node describes how one tuple of lane values (one value per unrolled
//! iteration) can be produced by a single value inside the rolled loop.
//! Nodes live in the arena of an `AlignedGraph` and refer to each other by
//! `NodeId`.

use crate::ir::{BinaryOp, IrFunction, IrId, IrInstruction, IrModule, IrValue};
use std::fmt;

/// Index of a node in its graph's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Direction of a min/max reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinMaxKind {
    Min,
    Max,
}

impl MinMaxKind {
    pub fn name(&self) -> &'static str {
        match self {
            MinMaxKind::Min => "min",
            MinMaxKind::Max => "max",
        }
    }
}

/// Classification of a lane tuple, with what code generation needs
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Every lane is the same value
    Identical,

    /// Isomorphic instructions, one per lane
    Matching,

    /// Nothing in common; lanes are materialized as a table
    Mismatch,

    /// Block labels of one aligned block (region rolling)
    Label,

    /// Constant expressions of the same shape
    ConstantExpr,

    /// Integer constants `start + step * i`
    IntSequence { start: i64, step: i64 },

    /// Two values repeating `a, b, a, b, ...`
    AltSequence { first: IrValue, second: IrValue },

    /// Lane `i` is the value lane `i - 1` of the child produced
    Recurrence { start: IrValue },

    /// Pointer offsets from one base, indexed by the child
    GepSequence {
        reference: IrId,
        /// Base pointer for single-index offsets; `None` when the lanes share
        /// all but their last index
        pointer: Option<IrValue>,
        indices: Vec<IrValue>,
    },

    /// Lanes computed by one operator, padded with neutral operands
    BinOpSequence {
        op: BinaryOp,
        reference: IrId,
        left: Vec<IrValue>,
        right: Vec<IrValue>,
        /// Lanes produced by the operator itself
        matched: Vec<bool>,
    },

    /// Associative chain folded into one accumulator
    Reduction {
        op: BinaryOp,
        phi: Option<IrId>,
        root: IrId,
        binops: Vec<IrId>,
        start: IrValue,
        /// Values folded into the accumulator, in source order
        operands: Vec<IrValue>,
    },

    /// `select(cmp)` chain computing a minimum or maximum
    MinMax {
        kind: MinMaxKind,
        start: IrValue,
        /// The accumulator is the select's true value in every link
        acc_selected: bool,
        /// The accumulator is the left operand of every compare
        acc_compared_first: bool,
        root: IrId,
        selects: Vec<IrId>,
        compares: Vec<IrId>,
        /// Value compared against the accumulator in each lane
        operands: Vec<IrValue>,
    },

    /// Independent groups rolled into one loop
    Multi { groups: Vec<Vec<IrValue>> },

    /// Phis of one aligned block (region rolling)
    Phi { labels: Vec<NodeId> },
}

impl NodeKind {
    /// Short name used for statistics
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Identical => "identical",
            NodeKind::Matching => "match",
            NodeKind::Mismatch => "mismatch",
            NodeKind::Label => "label",
            NodeKind::ConstantExpr => "constexpr",
            NodeKind::IntSequence { .. } => "intseq",
            NodeKind::AltSequence { .. } => "altseq",
            NodeKind::Recurrence { .. } => "recurrence",
            NodeKind::GepSequence { .. } => "gepseq",
            NodeKind::BinOpSequence { .. } => "binopseq",
            NodeKind::Reduction { .. } => "reduction",
            NodeKind::MinMax { .. } => "minmax",
            NodeKind::Multi { .. } => "multi",
            NodeKind::Phi { .. } => "phi",
        }
    }

    /// Kinds whose lanes are not owned by the node
    pub fn is_transparent(&self) -> bool {
        matches!(
            self,
            NodeKind::Mismatch | NodeKind::Multi { .. } | NodeKind::Identical | NodeKind::Recurrence { .. }
        )
    }
}

/// A node of the aligned graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    /// One value per lane
    pub values: Vec<IrValue>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn new(kind: NodeKind, values: Vec<IrValue>) -> Self {
        Self {
            kind,
            values,
            children: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, lane: usize) -> Option<IrValue> {
        self.values.get(lane).copied()
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self.kind, NodeKind::Mismatch)
    }

    /// The instruction this node replaces in `lane`, if any
    pub fn valid_instruction(&self, function: &IrFunction, lane: usize) -> Option<IrId> {
        match &self.kind {
            NodeKind::Matching | NodeKind::Phi { .. } => self.value(lane)?.as_inst(),
            NodeKind::BinOpSequence {
                op, matched, ..
            } => {
                if !matched.get(lane).copied().unwrap_or(false) {
                    return None;
                }
                let id = self.value(lane)?.as_inst()?;
                match function.instruction(id)? {
                    IrInstruction::BinOp { op: lane_op, .. } if lane_op == op => Some(id),
                    _ => None,
                }
            }
            NodeKind::GepSequence {
                reference, pointer, ..
            } => {
                let id = self.value(lane)?.as_inst()?;
                let IrInstruction::GetElementPtr { ptr, indices, .. } = function.instruction(id)? else {
                    return None;
                };
                let reference_len = match function.instruction(*reference)? {
                    IrInstruction::GetElementPtr { indices, .. } => indices.len(),
                    _ => return None,
                };
                if indices.len() != reference_len {
                    return None;
                }
                match pointer {
                    Some(base) if base != ptr => None,
                    _ => Some(id),
                }
            }
            NodeKind::Reduction { binops, .. } => binops.get(lane).copied(),
            NodeKind::MinMax { selects, .. } => selects.get(lane).copied(),
            _ => None,
        }
    }

    /// Every instruction the rolled loop makes redundant
    pub fn owned_instructions(&self, function: &IrFunction) -> Vec<IrId> {
        let mut owned: Vec<IrId> = (0..self.size())
            .filter_map(|lane| self.valid_instruction(function, lane))
            .collect();
        if let NodeKind::MinMax { compares, .. } = &self.kind {
            owned.extend(compares.iter().copied());
        }
        owned
    }

    /// Lanes touch memory or have side effects, so their relative order
    /// must survive rolling
    pub fn must_keep_order(&self, module: &IrModule, function: &IrFunction) -> bool {
        if !matches!(self.kind, NodeKind::Matching | NodeKind::Multi { .. }) {
            return false;
        }
        (0..self.size())
            .filter_map(|lane| self.valid_instruction(function, lane))
            .any(|id| {
                module.may_read_or_write_memory(function, id) || module.may_have_side_effects(function, id)
            })
    }

    /// Tag shown in dumps and logs
    pub fn label(&self, module: &IrModule, function: &IrFunction) -> String {
        match &self.kind {
            NodeKind::Identical => "identical".to_string(),
            NodeKind::Matching => {
                let Some(inst) = self
                    .value(0)
                    .and_then(|v| v.as_inst())
                    .and_then(|id| function.instruction(id))
                else {
                    return "match".to_string();
                };
                match module.direct_callee(inst) {
                    Some(callee) => format!("{}: {}", inst.opcode().name(), callee.name),
                    None => inst.opcode().name().to_string(),
                }
            }
            NodeKind::Mismatch => {
                if self.values.iter().all(|v| v.is_constant()) {
                    "constant mismatch".to_string()
                } else {
                    "mismatch".to_string()
                }
            }
            NodeKind::Label => "label".to_string(),
            NodeKind::ConstantExpr => "constexpr".to_string(),
            NodeKind::IntSequence { start, step } => {
                let last = start.wrapping_add(step.wrapping_mul(self.size().saturating_sub(1) as i64));
                format!("{}..{}, {}", start, last, step)
            }
            NodeKind::AltSequence { first, second } => format!("alt: {}, {}", first, second),
            NodeKind::Recurrence { .. } => "recurrence".to_string(),
            NodeKind::GepSequence { .. } => "GEP seq.".to_string(),
            NodeKind::BinOpSequence { op, .. } => format!("{} seq.", op.name()),
            NodeKind::Reduction { op, .. } => format!("{} red.", op.name()),
            NodeKind::MinMax { kind, .. } => format!(" {} red.", kind.name()),
            NodeKind::Multi { .. } => "multi flow".to_string(),
            NodeKind::Phi { .. } => "phi".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, IrFunctionSignature, IrType};

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new(7).to_string(), "n7");
        assert_eq!(NodeId::new(7).index(), 7);
    }

    #[test]
    fn test_binop_sequence_valid_lanes() {
        let mut module = IrModule::new("m");
        let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::I32], IrType::Void));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let one = b.const_int(IrType::I32, 1);
        let add = b.build_binop(BinaryOp::Add, IrValue::Arg(0), one);
        let mul = b.build_binop(BinaryOp::Mul, IrValue::Arg(0), one);
        b.build_return(None);

        let node = Node::new(
            NodeKind::BinOpSequence {
                op: BinaryOp::Add,
                reference: add.as_inst().unwrap(),
                left: vec![IrValue::Arg(0), mul, IrValue::Arg(0)],
                right: vec![one, one, one],
                matched: vec![true, false, false],
            },
            vec![add, mul, IrValue::Arg(0)],
        );
        let func = module.function(f).unwrap();
        assert_eq!(node.valid_instruction(func, 0), add.as_inst());
        assert_eq!(node.valid_instruction(func, 1), None);
        assert_eq!(node.valid_instruction(func, 2), None);
        assert_eq!(node.label(&module, func), "add seq.");
        assert!(!node.must_keep_order(&module, func));
    }

    #[test]
    fn test_labels() {
        let module = IrModule::new("m");
        let func = IrFunction::new(
            crate::ir::IrFunctionId(0),
            "f".to_string(),
            IrFunctionSignature::new(vec![], IrType::Void),
        );
        let seq = Node::new(
            NodeKind::IntSequence { start: 2, step: 3 },
            vec![IrValue::Arg(0); 4],
        );
        assert_eq!(seq.label(&module, &func), "2..11, 3");
        assert_eq!(seq.kind.name(), "intseq");
        let mismatch = Node::new(NodeKind::Mismatch, vec![IrValue::Arg(0), IrValue::Arg(1)]);
        assert_eq!(mismatch.label(&module, &func), "mismatch");
        assert!(NodeKind::Mismatch.is_transparent());
        assert!(!NodeKind::Matching.is_transparent());
    }
}
