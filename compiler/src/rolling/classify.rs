//! Node classification
//!
//! Decides which kind of node explains a tuple of lane values. Classifiers
//! are tried from the most specific (identical values, isomorphic
//! instructions) to the catch-all mismatch node, which materializes the
//! lanes as a table.

use super::graph::{AlignedGraph, GraphContext};
use super::matching::{
    const_gep_shapes_match, find_int, gep_type_before_last, is_equivalent_op, reduction_neutral,
    reorder_operands, sequence_neutral, values_match,
};
use super::node::{MinMaxKind, Node, NodeKind};
use super::region::AlignedBlock;
use crate::ir::{
    sext_to_width, BinaryOp, CompareOp, ConstExprOp, IrBlockId, IrConstant, IrFunction, IrId,
    IrInstruction, IrType, IrValue,
};
use fxhash::{FxHashMap, FxHashSet};
use log::trace;

/// Where lane instructions may live
#[derive(Debug, Clone, Copy)]
pub enum LaneScope<'a> {
    /// All lanes come from one straight-line block
    Block(IrBlockId),
    /// Lane `i` comes from block `i` of some aligned block
    Region(&'a [AlignedBlock]),
}

impl<'a> LaneScope<'a> {
    pub fn is_region(&self) -> bool {
        matches!(self, LaneScope::Region(_))
    }

    /// The instruction may stand in `lane`
    pub fn contains(&self, function: &IrFunction, lane: usize, id: IrId) -> bool {
        let Some(parent) = function.parent(id) else {
            return false;
        };
        match self {
            LaneScope::Block(block) => parent == *block,
            LaneScope::Region(blocks) => blocks.iter().any(|ab| ab.blocks.get(lane) == Some(&parent)),
        }
    }

    /// Every lane instruction sits in the same aligned position
    pub fn same_position(&self, function: &IrFunction, ids: &[IrId]) -> bool {
        match self {
            LaneScope::Block(block) => ids.iter().all(|&id| function.parent(id) == Some(*block)),
            LaneScope::Region(blocks) => blocks.iter().any(|ab| {
                ab.blocks.len() == ids.len()
                    && ids
                        .iter()
                        .zip(&ab.blocks)
                        .all(|(&id, &block)| function.parent(id) == Some(block))
            }),
        }
    }

    /// Aligned block whose lane 0 is `block`
    pub fn aligned_block_of(&self, block: IrBlockId) -> Option<&'a AlignedBlock> {
        match self {
            LaneScope::Block(_) => None,
            LaneScope::Region(blocks) => blocks.iter().find(|ab| ab.blocks.first() == Some(&block)),
        }
    }
}

/// Associative operators a reduction chain may use
pub(crate) const REDUCTION_OPS: [BinaryOp; 7] = [
    BinaryOp::Add,
    BinaryOp::FAdd,
    BinaryOp::Mul,
    BinaryOp::FMul,
    BinaryOp::Or,
    BinaryOp::And,
    BinaryOp::Xor,
];

fn all_unique(values: &[IrValue]) -> bool {
    let mut seen = FxHashSet::default();
    values.iter().all(|v| seen.insert(*v))
}

fn same_types(cx: &GraphContext<'_>, values: &[IrValue]) -> bool {
    let Some(&first) = values.first() else {
        return true;
    };
    let ty = cx.module.value_type(cx.function, first);
    values
        .iter()
        .all(|&v| cx.module.value_type(cx.function, v) == ty)
}

impl AlignedGraph {
    /// Classify a lane tuple into a fresh node. Inputs of the node are
    /// recorded on the graph.
    pub(crate) fn create_node(&mut self, cx: &GraphContext<'_>, values: Vec<IrValue>) -> Node {
        let node = self.classify(cx, values);
        trace!("classified {:?} as {}", node.values, node.kind.name());
        node
    }

    fn classify(&mut self, cx: &GraphContext<'_>, values: Vec<IrValue>) -> Node {
        if values.iter().all(|v| Some(v) == values.first()) {
            if let Some(&first) = values.first() {
                self.add_input(first);
            }
            return Node::new(NodeKind::Identical, values);
        }
        if cx.scope.is_region() && values.iter().all(|v| v.is_block()) {
            return Node::new(NodeKind::Label, values);
        }
        if is_matching(cx, &values) {
            return Node::new(NodeKind::Matching, values);
        }
        if let Some(kind) = gep_sequence_from_base(cx, &values) {
            if let NodeKind::GepSequence {
                pointer: Some(base), ..
            } = &kind
            {
                self.add_input(*base);
            }
            return Node::new(kind, values);
        }
        if let Some((kind, shared)) = gep_sequence_by_last_index(cx, &values) {
            for value in shared {
                self.add_input(value);
            }
            return Node::new(kind, values);
        }
        if let Some(kind) = binop_sequence(cx, &values) {
            return Node::new(kind, values);
        }
        if let Some(node) = self.recurrence(cx, &values) {
            if let NodeKind::Recurrence { start } = node.kind {
                self.add_input(start);
            }
            return node;
        }
        if let Some(kind) = int_sequence(cx, &values) {
            return Node::new(kind, values);
        }
        if let Some(kind) = alt_sequence(cx, &values) {
            if let NodeKind::AltSequence { first, second } = kind {
                self.add_input(first);
                self.add_input(second);
            }
            return Node::new(kind, values);
        }
        if is_constant_expr(cx, &values) {
            return Node::new(NodeKind::ConstantExpr, values);
        }
        if cx.scope.is_region() && is_phi_tuple(cx, &values) {
            return Node::new(NodeKind::Phi { labels: Vec::new() }, values);
        }
        for &value in &values {
            self.add_input(value);
        }
        Node::new(NodeKind::Mismatch, values)
    }

    /// Lane `i` is lane `i - 1` of exactly one existing matching node
    fn recurrence(&self, cx: &GraphContext<'_>, values: &[IrValue]) -> Option<Node> {
        if values.len() < 2 || !same_types(cx, values) {
            return None;
        }
        let candidates: Vec<_> = self
            .nodes_starting_with(values[1])
            .into_iter()
            .filter(|&id| {
                let node = self.node(id);
                (2..values.len()).all(|i| {
                    node.valid_instruction(cx.function, i - 1) == values[i].as_inst()
                        && values[i].is_inst()
                })
            })
            .collect();
        let [child] = candidates.as_slice() else {
            return None;
        };
        let node = self.node(*child);
        if node.size() != values.len() || !matches!(node.kind, NodeKind::Matching) {
            return None;
        }
        if !(1..values.len()).all(|i| node.value(i - 1) == Some(values[i])) {
            return None;
        }
        let mut rec = Node::new(NodeKind::Recurrence { start: values[0] }, values.to_vec());
        rec.children.push(*child);
        Some(rec)
    }
}

/// Isomorphic instructions, one per lane, all in scope
fn is_matching(cx: &GraphContext<'_>, values: &[IrValue]) -> bool {
    let Some(ids) = values.iter().map(|v| v.as_inst()).collect::<Option<Vec<_>>>() else {
        return false;
    };
    if !values
        .windows(2)
        .all(|w| values_match(cx.module, cx.function, w[0], w[1], cx.config.match_alignment))
    {
        return false;
    }
    if !cx.scope.same_position(cx.function, &ids) {
        return false;
    }
    let side_effects = ids
        .iter()
        .any(|&id| cx.module.may_have_side_effects(cx.function, id));
    !side_effects || all_unique(values)
}

fn single_index_gep(function: &IrFunction, value: IrValue) -> Option<(&IrType, IrValue, IrValue)> {
    match function.instruction(value.as_inst()?)? {
        IrInstruction::GetElementPtr {
            source_ty,
            ptr,
            indices,
        } if indices.len() == 1 => Some((source_ty, *ptr, indices[0])),
        _ => None,
    }
}

/// Single-index offsets from one base pointer; a lane equal to the base
/// stands for offset zero
fn gep_sequence_from_base(cx: &GraphContext<'_>, values: &[IrValue]) -> Option<NodeKind> {
    let first = *values.first()?;
    if !cx.module.value_type(cx.function, first).is_pointer() {
        return None;
    }
    let reference = values
        .iter()
        .find_map(|&v| single_index_gep(cx.function, v).map(|_| v))?;
    let (source_ty, base, ref_index) = single_index_gep(cx.function, reference)?;
    let index_ty = cx.module.value_type(cx.function, ref_index);
    let zero = find_int(cx.module, &index_ty, 0)?;

    let mut indices = Vec::with_capacity(values.len());
    let mut has_base = false;
    for (lane, &value) in values.iter().enumerate() {
        if value == base {
            indices.push(zero);
            has_base = true;
            continue;
        }
        let (ty, ptr, index) = single_index_gep(cx.function, value)?;
        let in_scope = value
            .as_inst()
            .is_some_and(|id| cx.scope.contains(cx.function, lane, id));
        if ty != source_ty
            || ptr != base
            || cx.module.value_type(cx.function, index) != index_ty
            || !in_scope
        {
            return None;
        }
        indices.push(index);
    }
    if !has_base {
        return None;
    }
    Some(NodeKind::GepSequence {
        reference: reference.as_inst()?,
        pointer: Some(base),
        indices,
    })
}

/// GEPs on one pointer that agree on every index but the last. Returns the
/// node and the shared operands.
fn gep_sequence_by_last_index(cx: &GraphContext<'_>, values: &[IrValue]) -> Option<(NodeKind, Vec<IrValue>)> {
    let mut lanes = Vec::with_capacity(values.len());
    for (lane, &value) in values.iter().enumerate() {
        let id = value.as_inst()?;
        if !cx.scope.contains(cx.function, lane, id) {
            return None;
        }
        let inst = cx.function.instruction(id)?;
        let IrInstruction::GetElementPtr { ptr, indices, .. } = inst else {
            return None;
        };
        lanes.push((inst, *ptr, indices));
    }
    let (ref_inst, ref_ptr, ref_indices) = *lanes.first()?;
    let prefix_len = ref_indices.len().checked_sub(1)?;
    let mut last_type = None;
    for &(inst, ptr, indices) in &lanes {
        let ty = gep_type_before_last(cx.module, ref_inst, inst)?;
        if ptr != ref_ptr
            || indices.len() != ref_indices.len()
            || indices[..prefix_len] != ref_indices[..prefix_len]
        {
            return None;
        }
        last_type = Some(ty);
    }
    let last_indices: Vec<IrValue> = lanes.iter().map(|(_, _, indices)| indices[prefix_len]).collect();

    match last_type? {
        IrType::Array(..) => {}
        ty @ IrType::Struct(_) if ty.is_homogeneous_struct() => {}
        IrType::Struct(fields) => {
            // Only a leading run of same-typed fields is laid out like an array
            for (i, &index) in last_indices.iter().enumerate() {
                if cx.module.int_value(index) != Some(i as i64) {
                    return None;
                }
            }
            let first = fields.first()?;
            if fields.len() < last_indices.len() || !fields[..last_indices.len()].iter().all(|f| f == first) {
                return None;
            }
        }
        _ => return None,
    }

    let mut shared = vec![ref_ptr];
    shared.extend(ref_indices[..prefix_len].iter().copied());
    Some((
        NodeKind::GepSequence {
            reference: values[0].as_inst()?,
            pointer: None,
            indices: last_indices,
        },
        shared,
    ))
}

/// The lane's binary operator, when it may be replaced in that lane
fn lane_binop<'a>(cx: &GraphContext<'a>, lane: usize, value: IrValue) -> Option<(IrId, &'a IrInstruction)> {
    let id = value.as_inst()?;
    if !cx.scope.contains(cx.function, lane, id) {
        return None;
    }
    let function: &'a IrFunction = cx.function;
    let inst = function.instruction(id)?;
    matches!(inst, IrInstruction::BinOp { .. }).then_some((id, inst))
}

/// Integer lanes computed by the most frequent binary operator; other lanes
/// pass through with a neutral right operand
fn binop_sequence(cx: &GraphContext<'_>, values: &[IrValue]) -> Option<NodeKind> {
    let ty = cx.module.value_type(cx.function, *values.first()?);
    if !ty.is_integer() || !same_types(cx, values) {
        return None;
    }

    let mut frequency: Vec<(BinaryOp, usize)> = Vec::new();
    for (lane, &value) in values.iter().enumerate() {
        if let Some((_, IrInstruction::BinOp { op, .. })) = lane_binop(cx, lane, value) {
            match frequency.iter_mut().find(|(o, _)| o == op) {
                Some((_, count)) => *count += 1,
                None => frequency.push((*op, 1)),
            }
        }
    }
    let mut op = None;
    let mut best = 0;
    for &(candidate, count) in &frequency {
        if count > best {
            best = count;
            op = Some(candidate);
        }
    }
    let op = op?;
    let neutral = sequence_neutral(cx.module, op, &ty)?;
    let reference = values.iter().enumerate().find_map(|(lane, &v)| match lane_binop(cx, lane, v) {
        Some((id, IrInstruction::BinOp { op: o, .. })) if *o == op => Some(id),
        _ => None,
    })?;

    let mut left = Vec::with_capacity(values.len());
    let mut right = Vec::with_capacity(values.len());
    let mut matched = Vec::with_capacity(values.len());
    for (lane, &value) in values.iter().enumerate() {
        match lane_binop(cx, lane, value) {
            Some((_, inst @ IrInstruction::BinOp { left: l, right: r, .. }))
                if is_equivalent_op(cx.module, cx.function, cx.oracle, inst, op) =>
            {
                let (mut l, mut r) = (*l, *r);
                if op.is_commutative() && cx.module.is_literal(l) && !cx.module.is_literal(r) {
                    std::mem::swap(&mut l, &mut r);
                }
                left.push(l);
                right.push(r);
                matched.push(true);
            }
            _ => {
                left.push(value);
                right.push(neutral);
                matched.push(false);
            }
        }
    }
    Some(NodeKind::BinOpSequence {
        op,
        reference,
        left,
        right,
        matched,
    })
}

/// Integer constants with a constant step, wrapping at the type width
fn int_sequence(cx: &GraphContext<'_>, values: &[IrValue]) -> Option<NodeKind> {
    let mut ints = Vec::with_capacity(values.len());
    let mut ty = None;
    for &value in values {
        let Some(IrConstant::Int { ty: t, value: v }) = cx.module.constant(value) else {
            return None;
        };
        match &ty {
            Some(prev) if prev != t => return None,
            Some(_) => {}
            None => ty = Some(t.clone()),
        }
        ints.push(*v);
    }
    let width = ty?.bit_width()?;
    let start = *ints.first()?;
    let step = match ints.get(1) {
        Some(&second) => sext_to_width(second.wrapping_sub(start), width),
        None => 0,
    };
    let consistent = ints
        .windows(2)
        .all(|w| sext_to_width(w[1].wrapping_sub(w[0]), width) == step);
    consistent.then_some(NodeKind::IntSequence { start, step })
}

/// Two values repeating `a, b, a, b, ...`
fn alt_sequence(cx: &GraphContext<'_>, values: &[IrValue]) -> Option<NodeKind> {
    if values.len() < 2 || !same_types(cx, values) {
        return None;
    }
    let alternates = values.iter().enumerate().all(|(i, v)| *v == values[i % 2]);
    alternates.then_some(NodeKind::AltSequence {
        first: values[0],
        second: values[1],
    })
}

/// Constant expressions of the same operation and operand types
fn is_constant_expr(cx: &GraphContext<'_>, values: &[IrValue]) -> bool {
    let Some(exprs) = values
        .iter()
        .map(|&v| cx.module.constants.const_expr(v))
        .collect::<Option<Vec<_>>>()
    else {
        return false;
    };
    let Some(first) = exprs.first() else {
        return false;
    };
    let operand_types = |operands: &[IrValue]| -> Vec<IrType> {
        operands
            .iter()
            .map(|&op| cx.module.value_type(cx.function, op))
            .collect()
    };
    let first_types = operand_types(&first.operands);
    let shapes_agree = exprs.iter().zip(values).all(|(expr, &value)| {
        expr.op == first.op
            && expr.ty == first.ty
            && expr.operands.len() == first.operands.len()
            && operand_types(&expr.operands) == first_types
            && match expr.op {
                ConstExprOp::GetElementPtr { .. } => {
                    const_gep_shapes_match(cx.module, cx.function, values[0], value)
                }
                _ => true,
            }
    });
    shapes_agree && all_unique(values)
}

/// Phis of one aligned position whose incoming blocks are all aligned
fn is_phi_tuple(cx: &GraphContext<'_>, values: &[IrValue]) -> bool {
    let Some(ids) = values.iter().map(|v| v.as_inst()).collect::<Option<Vec<_>>>() else {
        return false;
    };
    if !same_types(cx, values) || !cx.scope.same_position(cx.function, &ids) {
        return false;
    }
    let mut incomings = Vec::with_capacity(ids.len());
    for &id in &ids {
        match cx.function.instruction(id) {
            Some(IrInstruction::Phi { incoming }) => incomings.push(incoming),
            _ => return false,
        }
    }
    let Some(&reference) = incomings.first() else {
        return false;
    };
    if incomings.iter().any(|inc| inc.len() != reference.len()) {
        return false;
    }
    reference.iter().all(|&(_, block)| {
        let Some(ab) = cx.scope.aligned_block_of(block) else {
            return false;
        };
        incomings
            .iter()
            .enumerate()
            .all(|(lane, inc)| ab.blocks.get(lane).is_some_and(|b| inc.iter().any(|(_, ib)| ib == b)))
    })
}

/// Operands folded by an associative chain rooted at `root`, in source order.
pub(crate) fn reduction_node(cx: &GraphContext<'_>, value: IrValue, user: IrId) -> Option<Node> {
    enum Work {
        Visit(IrId),
        Leaf(IrValue),
    }

    let root = value.as_inst()?;
    if cx.function.parent(root) != Some(cx.block) {
        return None;
    }
    let Some(IrInstruction::BinOp { op, .. }) = cx.function.instruction(root) else {
        return None;
    };
    let op = *op;
    if !REDUCTION_OPS.contains(&op) {
        return None;
    }
    let phi = cx
        .function
        .instruction(user)
        .is_some_and(|inst| inst.is_phi())
        .then_some(IrValue::Inst(user));

    let mut binops = Vec::new();
    let mut operands = Vec::new();
    let mut phi_uses = 0;
    let mut stack = vec![Work::Visit(root)];
    while let Some(work) = stack.pop() {
        match work {
            Work::Visit(id) => {
                if binops.contains(&id) {
                    return None;
                }
                binops.push(id);
                let Some(IrInstruction::BinOp { left, right, .. }) = cx.function.instruction(id) else {
                    return None;
                };
                for &operand in [*right, *left].iter() {
                    let chained = operand.as_inst().filter(|&o| {
                        cx.function.parent(o) == Some(cx.block)
                            && matches!(cx.function.instruction(o), Some(IrInstruction::BinOp { op: o_op, .. }) if *o_op == op)
                    });
                    match chained {
                        Some(o) => stack.push(Work::Visit(o)),
                        None => stack.push(Work::Leaf(operand)),
                    }
                }
            }
            Work::Leaf(operand) if Some(operand) == phi => phi_uses += 1,
            Work::Leaf(operand) => operands.push(operand),
        }
    }
    if binops.len() <= 1 || phi_uses > 1 {
        return None;
    }
    let phi = phi.filter(|_| phi_uses == 1).and_then(|p| p.as_inst());
    reorder_operands(cx.module, cx.function, &mut operands, cx.block);

    let ty = cx.function.inst_type(root);
    let start = match phi {
        Some(phi) => IrValue::Inst(phi),
        None => reduction_neutral(cx.module, op, &ty)?,
    };
    let mut values: Vec<IrValue> = binops.iter().map(|&b| IrValue::Inst(b)).collect();
    while values.len() < operands.len() {
        values.push(start);
    }
    Some(Node::new(
        NodeKind::Reduction {
            op,
            phi,
            root,
            binops,
            start,
            operands,
        },
        values,
    ))
}

/// `select(cmp)` chain rooted at `value` computing a running min or max.
/// `skip` drops that many links at the far end of the chain; the first
/// dropped link then provides the start value.
pub(crate) fn minmax_node(cx: &GraphContext<'_>, value: IrValue, skip: usize) -> Option<Node> {
    let root = value.as_inst()?;
    if cx.function.parent(root) != Some(cx.block) {
        return None;
    }
    let mut selects = Vec::new();
    let mut compares = Vec::new();
    let mut lane_values = Vec::new();
    let mut kind = None;
    let mut predicate: Option<CompareOp> = None;
    let mut start = None;
    let mut last_from_true = false;
    // (accumulator is the select's true value, accumulator is the compare's left operand)
    let mut orientation: Option<(bool, bool)> = None;
    let mut next = Some(root);

    let is_select = |v: &IrValue| {
        v.as_inst()
            .is_some_and(|id| matches!(cx.function.instruction(id), Some(IrInstruction::Select { .. })))
    };
    while let Some(sel) = next.take() {
        let Some(IrInstruction::Select {
            condition,
            true_value,
            false_value,
        }) = cx.function.instruction(sel)
        else {
            break;
        };
        if cx.function.parent(sel) != Some(cx.block) {
            start = Some(IrValue::Inst(sel));
            break;
        }
        let cmp = condition.as_inst()?;
        let Some(IrInstruction::Cmp { op, left, right }) = cx.function.instruction(cmp) else {
            return None;
        };
        if cx.function.num_uses(*condition) > 1 {
            return None;
        }
        let forward = *left == *true_value && *right == *false_value;
        let backward = *left == *false_value && *right == *true_value;
        let link = if op.is_less_than() {
            match (forward, backward) {
                (true, _) => MinMaxKind::Min,
                (_, true) => MinMaxKind::Max,
                _ => return None,
            }
        } else if op.is_greater_than() {
            match (forward, backward) {
                (true, _) => MinMaxKind::Max,
                (_, true) => MinMaxKind::Min,
                _ => return None,
            }
        } else {
            return None;
        };
        let acc_true = if is_select(true_value) {
            true
        } else if is_select(false_value) {
            false
        } else {
            !last_from_true
        };
        let acc_left = if acc_true { forward } else { backward };
        if kind.is_some_and(|k| k != link)
            || predicate.is_some_and(|p| p != *op)
            || orientation.is_some_and(|o| o != (acc_true, acc_left))
        {
            // The rest of the chain feeds the rolled part
            start = Some(IrValue::Inst(sel));
            break;
        }
        kind = Some(link);
        predicate = Some(*op);
        orientation = Some((acc_true, acc_left));

        selects.push(sel);
        compares.push(cmp);
        if is_select(true_value) {
            lane_values.push(*false_value);
            last_from_true = false;
            next = true_value.as_inst();
        } else if is_select(false_value) {
            lane_values.push(*true_value);
            last_from_true = true;
            next = false_value.as_inst();
        } else if last_from_true {
            lane_values.push(*true_value);
            start = Some(*false_value);
        } else {
            lane_values.push(*false_value);
            start = Some(*true_value);
        }
    }

    if skip >= selects.len() {
        return None;
    }
    if skip > 0 {
        let n = selects.len() - skip;
        start = Some(IrValue::Inst(selects[n]));
        selects.truncate(n);
        compares.truncate(n);
        lane_values.truncate(n);
    }
    if selects.len() <= 1 {
        return None;
    }
    let start = start?;
    let kind = kind?;
    let (acc_selected, acc_compared_first) = orientation?;

    // Lanes run in source order, innermost link first
    selects.reverse();
    compares.reverse();
    lane_values.reverse();
    let values = selects.iter().map(|&s| IrValue::Inst(s)).collect();
    Some(Node::new(
        NodeKind::MinMax {
            kind,
            start,
            acc_selected,
            acc_compared_first,
            root,
            selects,
            compares,
            operands: lane_values,
        },
        values,
    ))
}

/// Children of a phi tuple: for every incoming edge of lane 0, the values
/// flowing in from the matching block of each lane, and the aligned block
/// the edge comes from
pub(crate) fn phi_incoming_tuples(cx: &GraphContext<'_>, values: &[IrValue]) -> Vec<(Vec<IrValue>, Vec<IrValue>)> {
    let mut tuples = Vec::new();
    let Some(reference) = values
        .first()
        .and_then(|v| v.as_inst())
        .and_then(|id| cx.function.instruction(id))
    else {
        return tuples;
    };
    let IrInstruction::Phi { incoming } = reference else {
        return tuples;
    };
    let lane_incoming: Vec<FxHashMap<IrBlockId, IrValue>> = values
        .iter()
        .map(|v| match v.as_inst().and_then(|id| cx.function.instruction(id)) {
            Some(IrInstruction::Phi { incoming }) => incoming.iter().map(|&(v, b)| (b, v)).collect(),
            _ => FxHashMap::default(),
        })
        .collect();
    for &(_, block) in incoming {
        let Some(ab) = cx.scope.aligned_block_of(block) else {
            continue;
        };
        let tuple: Option<Vec<IrValue>> = lane_incoming
            .iter()
            .enumerate()
            .map(|(lane, inc)| ab.blocks.get(lane).and_then(|b| inc.get(b).copied()))
            .collect();
        if let Some(tuple) = tuple {
            let labels = ab.blocks.iter().map(|&b| IrValue::Block(b)).collect();
            tuples.push((tuple, labels));
        }
    }
    tuples
}
