//! Flat loop code generation
//!
//! Turns a schedulable aligned graph over one block into a counted loop:
//!
//! ```text
//! BB:           code the graph depends on
//!               br rolled.pre
//! rolled.pre:   loop-invariant setup (tables, base pointers)
//!               br rolled.loop
//! rolled.loop:  iv = phi i8 [0, rolled.pre], [iv.next, rolled.loop]
//!               one copy of every node
//!               condbr (iv.next != width), rolled.loop, rolled.exit
//! rolled.exit:  lane values used after the loop, then the rest of BB
//! ```
//!
//! Nothing in BB changes until the size estimate accepts the loop. A rejected
//! loop is rolled back: the three blocks, any constant tables and any stack
//! slots are removed again.

use super::cost::{estimate_block, estimate_instructions};
use super::graph::AlignedGraph;
use super::matching::gep_type_before_last;
use super::node::{NodeId, NodeKind};
use super::seeds::SeedGroups;
use crate::config::RollingConfig;
use crate::error::{RollError, RollResult};
use crate::ir::{
    sext_to_width, BinaryOp, CompareOp, ConstExprOp, IrBlockId, IrBuilder, IrConstant, IrFunction,
    IrFunctionId, IrGlobalId, IrId, IrInstruction, IrModule, IrType, IrValue,
};
use fxhash::{FxHashMap, FxHashSet};
use indexmap::{IndexMap, IndexSet};
use log::{debug, info};

/// The induction variable is an `i8`, so a loop has at most this many
/// iterations
pub const MAX_WIDTH: usize = 127;

/// Summary of a committed loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolledLoop {
    pub pre_header: IrBlockId,
    pub header: IrBlockId,
    pub exit: IrBlockId,
    pub width: usize,
    pub original_cost: i64,
    pub rolled_cost: i64,
}

/// What `roll` learns about BB before touching it
struct Plan {
    width: usize,
    successors: Vec<IrBlockId>,
    /// Instructions after the first rolled one that the loop does not need
    moved: Vec<IrId>,
}

enum Step {
    Enter(NodeId),
    Finish(NodeId),
}

/// Emits the loop for one aligned graph.
///
/// Node code goes to `body`, the block currently being filled. Values that
/// only depend on the induction variable (casts, sequences, tables) go to
/// `header`, which dominates every body block. Loop-carried phis take their
/// back edge from `latch`. A flat loop uses one block for all three.
pub struct CodeGenerator<'a> {
    pub(super) module: &'a mut IrModule,
    pub(super) func: IrFunctionId,
    pub(super) graph: &'a AlignedGraph,
    pub(super) config: &'a RollingConfig,
    block: IrBlockId,
    pub(super) pre_header: IrBlockId,
    pub(super) header: IrBlockId,
    pub(super) body: IrBlockId,
    pub(super) latch: IrBlockId,
    pub(super) exit: IrBlockId,
    pub(super) ind_var: IrValue,
    pub(super) width: usize,

    pub(super) node_values: FxHashMap<NodeId, IrValue>,
    entered: FxHashSet<NodeId>,
    /// Lane instruction to the value replacing it after the loop
    pub(super) extracted: IndexMap<IrId, IrValue>,
    pub(super) garbage: IndexSet<IrId>,
    pub(super) created_globals: Vec<IrGlobalId>,
    pub(super) entry_allocas: Vec<IrId>,
    recurrences: Vec<(IrId, NodeId)>,

    /// Blocks standing for label nodes
    pub(super) labels: FxHashMap<NodeId, IrBlockId>,
    /// Phi nodes whose incoming values are filled in once every block exists
    pub(super) deferred_phis: Vec<NodeId>,
    /// Cloned terminators, placed after everything else in their block
    pub(super) terminators: Vec<(IrId, IrBlockId)>,

    casts: FxHashMap<IrType, IrValue>,
    rem2: FxHashMap<IrType, IrValue>,
    alt_cmp: Option<IrValue>,
    tables: Vec<(Vec<IrValue>, IrValue)>,
}

/// Blocks a generator emits into
pub(super) struct Skeleton {
    pub block: IrBlockId,
    pub pre_header: IrBlockId,
    pub header: IrBlockId,
    pub latch: IrBlockId,
    pub exit: IrBlockId,
    pub ind_var: IrValue,
}

impl<'a> CodeGenerator<'a> {
    /// Roll `graph` over `block`. On success the straight-line lanes are
    /// gone and the loop is in place; on failure the function is unchanged.
    pub fn roll(
        module: &'a mut IrModule,
        func: IrFunctionId,
        block: IrBlockId,
        graph: &'a AlignedGraph,
        config: &'a RollingConfig,
        seeds: &mut SeedGroups,
    ) -> RollResult<RolledLoop> {
        let plan = {
            let function = module
                .function(func)
                .ok_or_else(|| RollError::InvalidGraph(format!("unknown function {}", func)))?;
            plan(function, block, graph)?
        };

        let function = module
            .function_mut(func)
            .ok_or_else(|| RollError::InvalidGraph(format!("unknown function {}", func)))?;
        let pre_header = function.create_block(Some("rolled.pre"));
        let header = function.create_block(Some("rolled.loop"));
        let exit = function.create_block(Some("rolled.exit"));
        let iv = function.insert_at(header, 0, IrInstruction::Phi { incoming: Vec::new() }, IrType::I8);
        function.set_name(iv, "rolled.iv");

        let skeleton = Skeleton {
            block,
            pre_header,
            header,
            latch: header,
            exit,
            ind_var: IrValue::Inst(iv),
        };
        let mut generator = CodeGenerator::new(module, func, graph, config, skeleton, plan.width);

        let latch = match generator.emit_loop() {
            Ok(latch) => latch,
            Err(err) => {
                generator.rollback();
                return Err(err);
            }
        };
        let (original, rolled) = generator.costs()?;
        let profitable = config.always_roll
            || (original > rolled + config.size_threshold && graph.mismatch_count() < config.max_mismatches);
        if !profitable {
            debug!("rolling {} is not profitable: {} vs {}", block, original, rolled);
            generator.rollback();
            return Err(RollError::Unprofitable { original, rolled });
        }
        generator.commit(plan, latch, seeds)?;
        Ok(RolledLoop {
            pre_header,
            header,
            exit,
            width: generator.width,
            original_cost: original,
            rolled_cost: rolled,
        })
    }

    pub(super) fn new(
        module: &'a mut IrModule,
        func: IrFunctionId,
        graph: &'a AlignedGraph,
        config: &'a RollingConfig,
        skeleton: Skeleton,
        width: usize,
    ) -> Self {
        CodeGenerator {
            module,
            func,
            graph,
            config,
            block: skeleton.block,
            pre_header: skeleton.pre_header,
            header: skeleton.header,
            body: skeleton.header,
            latch: skeleton.latch,
            exit: skeleton.exit,
            ind_var: skeleton.ind_var,
            width,
            node_values: FxHashMap::default(),
            entered: FxHashSet::default(),
            extracted: IndexMap::new(),
            garbage: IndexSet::new(),
            created_globals: Vec::new(),
            entry_allocas: Vec::new(),
            recurrences: Vec::new(),
            labels: FxHashMap::default(),
            deferred_phis: Vec::new(),
            terminators: Vec::new(),
            casts: FxHashMap::default(),
            rem2: FxHashMap::default(),
            alt_cmp: None,
            tables: Vec::new(),
        }
    }

    pub(super) fn function(&self) -> RollResult<&IrFunction> {
        self.module
            .function(self.func)
            .ok_or_else(|| RollError::InvalidGraph(format!("unknown function {}", self.func)))
    }

    pub(super) fn function_mut(&mut self) -> RollResult<&mut IrFunction> {
        let func = self.func;
        self.module
            .function_mut(func)
            .ok_or_else(|| RollError::InvalidGraph(format!("unknown function {}", func)))
    }

    pub(super) fn builder_at(&mut self, block: IrBlockId) -> IrBuilder<'_> {
        let mut builder = IrBuilder::new(&mut *self.module, self.func);
        builder.position_at_end(block);
        builder
    }

    pub(super) fn type_of(&self, value: IrValue) -> IrType {
        match self.module.function(self.func) {
            Some(function) => self.module.value_type(function, value),
            None => IrType::Void,
        }
    }

    pub(super) fn value_of(&self, node: NodeId) -> RollResult<IrValue> {
        self.node_values
            .get(&node)
            .copied()
            .ok_or(RollError::MissingValue(node))
    }

    pub(super) fn int(&mut self, ty: IrType, value: i64) -> IrValue {
        self.module.constants.int(ty, value)
    }

    // === Loop body ===

    /// Emit every node, the lane extraction and the induction update.
    /// Returns the incremented induction variable and the exit condition.
    fn emit_loop(&mut self) -> RollResult<(IrValue, IrValue)> {
        let root = self
            .graph
            .root()
            .ok_or_else(|| RollError::InvalidGraph("graph has no root".to_string()))?;
        for &node in self.graph.scheduling_order() {
            self.emit(node)?;
        }
        self.emit(root)?;

        self.close_recurrences()?;

        {
            let function = self.function()?;
            let garbage: Vec<IrId> = self
                .graph
                .nodes()
                .filter(|(_, node)| !node.kind.is_transparent())
                .flat_map(|(_, node)| node.owned_instructions(function))
                .collect();
            self.garbage.extend(garbage);
        }
        self.extract_lanes()?;

        let (iv, width, header) = (self.ind_var, self.width, self.header);
        let one = self.int(IrType::I8, 1);
        let limit = self.int(IrType::I8, width as i64);
        let alt_cmp = self.alt_cmp.filter(|_| width == 2);
        let mut b = self.builder_at(header);
        let next = b.build_binop(BinaryOp::Add, iv, one);
        b.name_value(next, "rolled.iv.next");
        let condition = match alt_cmp {
            Some(cmp) => cmp,
            None => b.build_cmp(CompareOp::Ne, next, limit),
        };
        Ok((next, condition))
    }

    /// Give recurrence phis their back-edge value
    pub(super) fn close_recurrences(&mut self) -> RollResult<()> {
        for (phi, child) in std::mem::take(&mut self.recurrences) {
            let value = self.value_of(child)?;
            let latch = self.latch;
            if let Some(IrInstruction::Phi { incoming }) = self.function_mut()?.instruction_mut(phi) {
                incoming.push((value, latch));
            }
        }
        Ok(())
    }

    /// Generate `start` and everything below it, children first. The
    /// children of a phi are generated later, in their incoming blocks.
    pub(super) fn emit(&mut self, start: NodeId) -> RollResult<()> {
        let mut stack = vec![Step::Enter(start)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(id) => {
                    if self.node_values.contains_key(&id) || !self.entered.insert(id) {
                        continue;
                    }
                    self.enter(id)?;
                    stack.push(Step::Finish(id));
                    let node = self.graph.node(id);
                    if matches!(node.kind, NodeKind::Phi { .. }) {
                        continue;
                    }
                    for &child in node.children.iter().rev() {
                        stack.push(Step::Enter(child));
                    }
                }
                Step::Finish(id) => self.finish(id)?,
            }
        }
        Ok(())
    }

    /// Register values that children may refer back to before they exist
    fn enter(&mut self, id: NodeId) -> RollResult<()> {
        let graph = self.graph;
        let node = graph.node(id);
        match &node.kind {
            NodeKind::Matching => {
                let reference = node
                    .value(0)
                    .and_then(|v| v.as_inst())
                    .ok_or_else(|| RollError::InvalidGraph(format!("{} has no instruction", id)))?;
                let function = self.function()?;
                let inst = function
                    .instruction(reference)
                    .cloned()
                    .ok_or_else(|| RollError::InvalidGraph(format!("{} refers to a dead instruction", id)))?;
                let ty = function.inst_type(reference);
                let clone = self.function_mut()?.create_detached(inst, ty);
                self.node_values.insert(id, IrValue::Inst(clone));
            }
            NodeKind::ConstantExpr => {
                let expr = node
                    .value(0)
                    .and_then(|v| self.module.constants.const_expr(v))
                    .cloned()
                    .ok_or_else(|| RollError::InvalidGraph(format!("{} is not a constant expression", id)))?;
                let inst = match expr.op {
                    ConstExprOp::GetElementPtr { source_ty } => {
                        let (ptr, indices) = expr
                            .operands
                            .split_first()
                            .ok_or_else(|| RollError::InvalidGraph("constant GEP without pointer".to_string()))?;
                        IrInstruction::GetElementPtr {
                            source_ty,
                            ptr: *ptr,
                            indices: indices.to_vec(),
                        }
                    }
                    ConstExprOp::Cast(op) => IrInstruction::Cast {
                        op,
                        value: expr.operands.first().copied().ok_or_else(|| {
                            RollError::InvalidGraph("constant cast without operand".to_string())
                        })?,
                    },
                    ConstExprOp::BinOp(op) => match expr.operands.as_slice() {
                        [left, right] => IrInstruction::BinOp {
                            op,
                            left: *left,
                            right: *right,
                        },
                        _ => return Err(RollError::InvalidGraph("constant binop arity".to_string())),
                    },
                };
                let clone = self.function_mut()?.create_detached(inst, expr.ty);
                self.node_values.insert(id, IrValue::Inst(clone));
            }
            NodeKind::Recurrence { start } => {
                let start = *start;
                let ty = self.type_of(start);
                let (header, pre_header) = (self.header, self.pre_header);
                let function = self.function_mut()?;
                let index = function.phis(header).len();
                let phi = function.insert_at(
                    header,
                    index,
                    IrInstruction::Phi {
                        incoming: vec![(start, pre_header)],
                    },
                    ty,
                );
                let child = node
                    .children
                    .first()
                    .copied()
                    .ok_or_else(|| RollError::InvalidGraph(format!("recurrence {} has no child", id)))?;
                self.recurrences.push((phi, child));
                self.node_values.insert(id, IrValue::Inst(phi));
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(&mut self, id: NodeId) -> RollResult<()> {
        let graph = self.graph;
        let node = graph.node(id);
        let (header, body, latch) = (self.header, self.body, self.latch);
        let child_value = |this: &Self, k: usize| -> RollResult<IrValue> {
            let child = node
                .children
                .get(k)
                .copied()
                .ok_or_else(|| RollError::InvalidGraph(format!("{} lacks child {}", id, k)))?;
            this.value_of(child)
        };

        let value = match &node.kind {
            NodeKind::Identical => node.value(0),
            NodeKind::Multi { .. } | NodeKind::Recurrence { .. } => None,
            NodeKind::Matching | NodeKind::ConstantExpr => {
                let clone = self.value_of(id)?.as_inst().ok_or(RollError::MissingValue(id))?;
                let operands = (0..node.children.len())
                    .map(|k| child_value(self, k))
                    .collect::<RollResult<Vec<_>>>()?;
                let match_alignment = self.config.match_alignment;
                let target = if matches!(node.kind, NodeKind::Matching) { body } else { header };
                let function = self.function_mut()?;
                let mut is_terminator = false;
                if let Some(inst) = function.instruction_mut(clone) {
                    for (k, operand) in operands.into_iter().enumerate() {
                        inst.set_operand(k, operand);
                    }
                    if !match_alignment {
                        if let IrInstruction::Load { align, .. } | IrInstruction::Store { align, .. } = inst {
                            *align = None;
                        }
                    }
                    is_terminator = inst.is_terminator();
                }
                if is_terminator {
                    self.terminators.push((clone, target));
                } else {
                    function.move_to_end(clone, target);
                }
                None
            }
            NodeKind::GepSequence {
                reference, pointer, ..
            } => {
                let index = child_value(self, 0)?;
                Some(self.gep_sequence(*reference, *pointer, index)?)
            }
            NodeKind::BinOpSequence { op, .. } => {
                let left = child_value(self, 0)?;
                let right = child_value(self, 1)?;
                Some(self.builder_at(body).build_binop(*op, left, right))
            }
            NodeKind::Reduction { op, root, start, .. } => {
                let operand = child_value(self, 0)?;
                let (op, root, start, pre_header) = (*op, *root, *start, self.pre_header);
                let ty = self.type_of(IrValue::Inst(root));
                let mut b = self.builder_at(body);
                let acc = b.build_phi(ty);
                b.add_incoming(acc, start, pre_header);
                let next = b.build_binop(op, acc, operand);
                b.add_incoming(acc, next, latch);
                self.extracted.insert(root, next);
                Some(next)
            }
            NodeKind::MinMax {
                start,
                root,
                compares,
                acc_selected,
                acc_compared_first,
                ..
            } => {
                let operand = child_value(self, 0)?;
                let predicate = compares
                    .first()
                    .and_then(|&c| self.function().ok()?.instruction(c))
                    .and_then(|c| match c {
                        IrInstruction::Cmp { op, .. } => Some(*op),
                        _ => None,
                    })
                    .ok_or_else(|| RollError::InvalidGraph(format!("{} has no compare", id)))?;
                // Operands keep the sides they had in every link
                let (root, start, pre_header) = (*root, *start, self.pre_header);
                let (acc_selected, acc_compared_first) = (*acc_selected, *acc_compared_first);
                let ty = self.type_of(IrValue::Inst(root));
                let mut b = self.builder_at(body);
                let acc = b.build_phi(ty);
                b.add_incoming(acc, start, pre_header);
                let cmp = if acc_compared_first {
                    b.build_cmp(predicate, acc, operand)
                } else {
                    b.build_cmp(predicate, operand, acc)
                };
                let select = if acc_selected {
                    b.build_select(cmp, acc, operand)
                } else {
                    b.build_select(cmp, operand, acc)
                };
                b.add_incoming(acc, select, latch);
                self.extracted.insert(root, select);
                Some(select)
            }
            NodeKind::IntSequence { start, step } => {
                let ty = node
                    .value(0)
                    .map(|v| self.type_of(v))
                    .ok_or_else(|| RollError::InvalidGraph(format!("{} is empty", id)))?;
                Some(self.int_sequence(ty, *start, *step))
            }
            NodeKind::AltSequence { first, second } => Some(self.alt_sequence(*first, *second)?),
            NodeKind::Mismatch => Some(self.mismatch(&node.values)?),
            NodeKind::Label => {
                let block = self.labels.get(&id).copied().ok_or_else(|| {
                    RollError::InvalidGraph(format!("label {} has no block outside a region", id))
                })?;
                Some(IrValue::Block(block))
            }
            NodeKind::Phi { .. } => {
                if self.labels.is_empty() {
                    return Err(RollError::InvalidGraph(format!("phi node {} outside a region", id)));
                }
                let ty = node
                    .value(0)
                    .map(|v| self.type_of(v))
                    .ok_or_else(|| RollError::InvalidGraph(format!("{} is empty", id)))?;
                let phi = self.builder_at(body).build_phi(ty);
                self.deferred_phis.push(id);
                Some(phi)
            }
        };
        if let Some(value) = value {
            self.node_values.insert(id, value);
        }
        Ok(())
    }

    /// Offsets from one base. With a base pointer the child indexes it
    /// directly; otherwise the shared prefix is computed once in the
    /// pre-header and the child indexes the element type below it.
    fn gep_sequence(&mut self, reference: IrId, pointer: Option<IrValue>, index: IrValue) -> RollResult<IrValue> {
        let function = self.function()?;
        let inst = function
            .instruction(reference)
            .cloned()
            .ok_or_else(|| RollError::InvalidGraph(format!("dead GEP {}", reference)))?;
        let IrInstruction::GetElementPtr {
            source_ty,
            ptr,
            indices,
        } = &inst
        else {
            return Err(RollError::InvalidGraph(format!("{} is not a GEP", reference)));
        };
        let body = self.body;

        if let Some(base) = pointer {
            return Ok(self.builder_at(body).build_gep(source_ty.clone(), base, vec![index]));
        }

        let elem_ty = if indices.len() == 1 {
            source_ty.clone()
        } else {
            match gep_type_before_last(self.module, &inst, &inst) {
                Some(IrType::Array(elem, _)) => *elem,
                Some(IrType::Struct(fields)) => fields
                    .first()
                    .cloned()
                    .ok_or_else(|| RollError::InvalidGraph("empty struct".to_string()))?,
                _ => return Err(RollError::InvalidGraph(format!("{} does not index an aggregate", reference))),
            }
        };
        let last_ty = indices
            .last()
            .map(|&i| self.type_of(i))
            .ok_or_else(|| RollError::InvalidGraph(format!("{} has no index", reference)))?;
        let zero = self.int(last_ty, 0);
        let mut base_indices = indices.clone();
        if let Some(last) = base_indices.last_mut() {
            *last = zero;
        }
        let pre_header = self.pre_header;
        let base = self
            .builder_at(pre_header)
            .build_gep(source_ty.clone(), *ptr, base_indices);
        Ok(self.builder_at(body).build_gep(elem_ty, base, vec![index]))
    }

    /// The induction variable as `ty`, emitted once per type
    fn cast_iv(&mut self, ty: IrType) -> IrValue {
        if let Some(&cast) = self.casts.get(&ty) {
            return cast;
        }
        let (iv, header) = (self.ind_var, self.header);
        let cast = self.builder_at(header).build_zext_or_trunc(iv, ty.clone());
        self.casts.insert(ty, cast);
        cast
    }

    /// `iv % 2` as `ty`, emitted once per type. Two-lane loops and `i1`
    /// already count modulo two.
    fn rem2(&mut self, ty: IrType) -> IrValue {
        if let Some(&rem) = self.rem2.get(&ty) {
            return rem;
        }
        let cast = self.cast_iv(ty.clone());
        let rem = if self.width > 2 && ty.bit_width().is_some_and(|w| w > 1) {
            let two = self.int(ty.clone(), 2);
            let header = self.header;
            self.builder_at(header).build_binop(BinaryOp::URem, cast, two)
        } else {
            cast
        };
        self.rem2.insert(ty, rem);
        rem
    }

    fn int_sequence(&mut self, ty: IrType, start: i64, step: i64) -> IrValue {
        if step == 0 {
            return self.int(ty, start);
        }
        let mut value = self.cast_iv(ty.clone());
        let header = self.header;
        if step != 1 {
            let step = self.int(ty.clone(), step);
            value = self.builder_at(header).build_binop(BinaryOp::Mul, value, step);
        }
        if start != 0 {
            let start = self.int(ty, start);
            value = self.builder_at(header).build_binop(BinaryOp::Add, value, start);
        }
        value
    }

    fn alt_sequence(&mut self, first: IrValue, second: IrValue) -> RollResult<IrValue> {
        let ty = self.type_of(first);
        let header = self.header;
        let ints = match (self.module.constant(first), self.module.constant(second)) {
            (Some(IrConstant::Int { value: a, .. }), Some(IrConstant::Int { value: b, .. })) => Some((*a, *b)),
            _ => None,
        };

        if ints == Some((0, 1)) {
            return Ok(self.rem2(ty));
        }
        if self.is_negation(first, second) {
            let (pre_header, latch) = (self.pre_header, self.latch);
            let zero = self.int(ty.clone(), 0);
            let mut b = self.builder_at(header);
            let phi = b.build_phi(ty);
            b.add_incoming(phi, first, pre_header);
            let negated = b.build_binop(BinaryOp::Sub, zero, phi);
            b.add_incoming(phi, negated, latch);
            return Ok(phi);
        }
        if let (Some((a, b)), Some(width)) = (ints, ty.bit_width()) {
            let mut value = self.rem2(ty.clone());
            let diff = sext_to_width(b.wrapping_sub(a), width);
            if diff != 1 {
                let diff = self.int(ty.clone(), diff);
                value = self.builder_at(header).build_binop(BinaryOp::Mul, value, diff);
            }
            if a != 0 {
                let a = self.int(ty, a);
                value = self.builder_at(header).build_binop(BinaryOp::Add, value, a);
            }
            return Ok(value);
        }

        let condition = match self.alt_cmp {
            Some(cmp) => cmp,
            None => {
                let rem = self.rem2(IrType::I8);
                let zero = self.int(IrType::I8, 0);
                let cmp = self.builder_at(header).build_cmp(CompareOp::Eq, rem, zero);
                self.alt_cmp = Some(cmp);
                cmp
            }
        };
        Ok(self.builder_at(header).build_select(condition, first, second))
    }

    /// `second` is the wrapping negation of `first`
    fn is_negation(&self, first: IrValue, second: IrValue) -> bool {
        if let (Some(IrConstant::Int { ty, value: a }), Some(IrConstant::Int { value: b, .. })) =
            (self.module.constant(first), self.module.constant(second))
        {
            return match ty.bit_width() {
                Some(width) => a != b && sext_to_width(a.wrapping_neg(), width) == sext_to_width(*b, width),
                None => false,
            };
        }
        let Some(function) = self.module.function(self.func) else {
            return false;
        };
        match second.as_inst().and_then(|id| function.instruction(id)) {
            Some(IrInstruction::BinOp {
                op: BinaryOp::Sub,
                left,
                right,
            }) => self.module.int_value(*left) == Some(0) && *right == first,
            _ => false,
        }
    }

    /// Lanes with nothing in common: a constant table when every lane is a
    /// constant, a stack array filled before the loop otherwise
    fn mismatch(&mut self, values: &[IrValue]) -> RollResult<IrValue> {
        let first = *values
            .first()
            .ok_or_else(|| RollError::InvalidGraph("empty mismatch".to_string()))?;
        if values.iter().all(|&v| v == first) {
            return Ok(first);
        }
        let ty = self.type_of(first);
        let (iv, header) = (self.ind_var, self.header);
        let len = values.len();

        if values.iter().all(|v| v.is_constant()) {
            if let Some((_, loaded)) = self.tables.iter().find(|(elems, _)| elems.as_slice() == values) {
                return Ok(*loaded);
            }
            let zero = self.int(IrType::I8, 0);
            let mut b = self.builder_at(header);
            let table = b.global_constant_array(ty.clone(), values.to_vec());
            let ptr = b.build_gep(IrType::array(ty.clone(), len as u64), IrValue::Global(table), vec![zero, iv]);
            let loaded = b.build_load(ty, ptr);
            self.created_globals.push(table);
            self.tables.push((values.to_vec(), loaded));
            return Ok(loaded);
        }

        let slots = self.entry_alloca(ty.clone())?;
        let pre_header = self.pre_header;
        for (lane, &value) in values.iter().enumerate() {
            let index = self.int(IrType::I8, lane as i64);
            let mut b = self.builder_at(pre_header);
            let ptr = b.build_gep(ty.clone(), slots, vec![index]);
            b.build_store(value, ptr);
        }
        let mut b = self.builder_at(header);
        let ptr = b.build_gep(ty.clone(), slots, vec![iv]);
        Ok(b.build_load(ty, ptr))
    }

    /// Stack array with one `ty` per lane, at the top of the entry block
    pub(super) fn entry_alloca(&mut self, ty: IrType) -> RollResult<IrValue> {
        let count = self.int(IrType::I8, self.width as i64);
        let function = self.function_mut()?;
        let entry = function
            .entry_block()
            .ok_or_else(|| RollError::InvalidGraph("function has no entry block".to_string()))?;
        let slot = function.insert_at(
            entry,
            0,
            IrInstruction::Alloca {
                allocated_ty: ty,
                count,
            },
            IrType::Ptr,
        );
        self.entry_allocas.push(slot);
        Ok(IrValue::Inst(slot))
    }

    /// Lanes still used outside the graph are stored per iteration and
    /// reloaded in the exit block
    fn extract_lanes(&mut self) -> RollResult<()> {
        let graph = self.graph;
        let mut work: Vec<(NodeId, Vec<(usize, IrId)>)> = Vec::new();
        {
            let function = self.function()?;
            let used_outside = |id: IrId| {
                function.parent(id) == Some(self.block)
                    && function
                        .users(IrValue::Inst(id))
                        .into_iter()
                        .any(|user| !graph.contains_instruction(user))
            };
            for (id, node) in graph.nodes() {
                if node.kind.is_transparent() {
                    continue;
                }
                let lanes: Vec<(usize, IrId)> = (0..node.size())
                    .filter_map(|lane| node.valid_instruction(function, lane).map(|inst| (lane, inst)))
                    .filter(|&(_, inst)| used_outside(inst) && !self.extracted.contains_key(&inst))
                    .collect();
                if lanes.is_empty() {
                    continue;
                }
                if let NodeKind::Reduction { root, .. } | NodeKind::MinMax { root, .. } = &node.kind {
                    if lanes.iter().all(|&(_, inst)| inst == *root) {
                        continue;
                    }
                    return Err(RollError::InvalidGraph(format!(
                        "intermediate value of {} is used outside the chain",
                        id
                    )));
                }
                work.push((id, lanes));
            }
        }

        for (id, lanes) in work {
            let value = self.value_of(id)?;
            let ty = self.type_of(value);
            let slots = self.entry_alloca(ty.clone())?;
            let (iv, header, exit) = (self.ind_var, self.header, self.exit);
            {
                let mut b = self.builder_at(header);
                let ptr = b.build_gep(ty.clone(), slots, vec![iv]);
                b.build_store(value, ptr);
            }
            for (lane, inst) in lanes {
                if self.extracted.contains_key(&inst) {
                    continue;
                }
                let index = self.int(IrType::I8, lane as i64);
                let mut b = self.builder_at(exit);
                let ptr = b.build_gep(ty.clone(), slots, vec![index]);
                let loaded = b.build_load(ty.clone(), ptr);
                self.extracted.insert(inst, loaded);
            }
        }
        Ok(())
    }

    // === Decision ===

    fn costs(&self) -> RollResult<(i64, i64)> {
        let function = self.function()?;
        let original = estimate_instructions(self.module, function, self.garbage.iter());
        let rolled = 4 * estimate_block(self.module, function, self.pre_header)
            + estimate_block(self.module, function, self.header)
            + 2 * estimate_block(self.module, function, self.exit)
            + self.created_globals.len() as i64;
        Ok((original, rolled))
    }

    fn rollback(&mut self) {
        let blocks = [self.pre_header, self.header, self.exit];
        let allocas = std::mem::take(&mut self.entry_allocas);
        if let Ok(function) = self.function_mut() {
            for block in blocks {
                function.remove_block(block);
            }
            for slot in allocas {
                function.erase(slot);
            }
        }
        for global in std::mem::take(&mut self.created_globals) {
            self.module.remove_global(global);
        }
    }

    /// Wire the loop into the function and delete the replaced lanes
    fn commit(&mut self, plan: Plan, latch: (IrValue, IrValue), seeds: &mut SeedGroups) -> RollResult<()> {
        let (next, condition) = latch;
        let (iv, block, pre_header, header, exit) =
            (self.ind_var, self.block, self.pre_header, self.header, self.exit);
        let zero = self.int(IrType::I8, 0);
        {
            let mut b = self.builder_at(header);
            b.add_incoming(iv, zero, pre_header);
            b.add_incoming(iv, next, header);
            b.build_cond_br(condition, header, exit);
            b.position_at_end(pre_header);
            b.build_br(header);
        }

        let extracted = std::mem::take(&mut self.extracted);
        let garbage = std::mem::take(&mut self.garbage);
        let function = self.function_mut()?;
        let terminator = function.terminator(block);
        for id in plan.moved {
            function.move_to_end(id, exit);
        }
        if let Some(terminator) = terminator {
            function.move_to_end(terminator, exit);
        }
        function.append(block, IrInstruction::Branch { target: pre_header }, IrType::Void);

        for (&inst, &value) in &extracted {
            function.replace_all_uses(IrValue::Inst(inst), value);
        }
        for &inst in garbage.iter().rev() {
            function.erase(inst);
            seeds.remove(inst);
        }
        for succ in plan.successors {
            for phi in function.phis(succ) {
                if let Some(inst) = function.instruction_mut(phi) {
                    inst.replace_incoming_block(block, exit);
                }
            }
        }
        info!(
            "rolled {} lanes of {} in {} ({} instructions replaced)",
            plan.width,
            block,
            function.name,
            garbage.len()
        );
        Ok(())
    }
}

/// Checks that need no mutation, and the instructions that leave BB
fn plan(function: &IrFunction, block: IrBlockId, graph: &AlignedGraph) -> RollResult<Plan> {
    let root = graph
        .root()
        .ok_or_else(|| RollError::InvalidGraph("graph has no root".to_string()))?;
    let root_node = graph.node(root);
    if root_node.is_mismatch() {
        return Err(RollError::InvalidGraph("root is a mismatch".to_string()));
    }
    if matches!(root_node.kind, NodeKind::Multi { .. })
        && root_node.children.iter().any(|&c| graph.node(c).is_mismatch())
    {
        return Err(RollError::InvalidGraph("multi root over a mismatch".to_string()));
    }
    let width = graph.width();
    if !(2..=MAX_WIDTH).contains(&width) {
        return Err(RollError::InvalidGraph(format!("unsupported width {}", width)));
    }

    let insts = function.block_instructions(block);
    let split = insts
        .iter()
        .position(|id| graph.contains_instruction(*id))
        .ok_or_else(|| RollError::InvalidGraph(format!("nothing to roll in {}", block)))?;
    let terminator = function.terminator(block);
    let moved = insts[split..]
        .iter()
        .copied()
        .filter(|&id| Some(id) != terminator)
        .filter(|&id| !function.instruction(id).is_some_and(|inst| inst.is_phi()))
        .filter(|&id| !graph.depends_on(function, IrValue::Inst(id)))
        .collect();
    Ok(Plan {
        width,
        successors: function.successors(block),
        moved,
    })
}
