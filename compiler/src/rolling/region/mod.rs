//! Region rolling
//!
//! A chain of isomorphic single-entry/single-exit regions, where the exit of
//! one region is the entry of the next, is rolled into a loop whose body is
//! one copy of the region. Each lane is one region:
//!
//! ```text
//!   E0 -> {T0, F0} -> E1 -> {T1, F1} -> E2 ...
//!   lane 0 = (E0 .. E1), lane 1 = (E1 .. E2), ...
//! ```
//!
//! Blocks that sit at the same position of every region form an
//! `AlignedBlock`. Instructions are aligned per aligned block by walking the
//! blocks backwards in lock step, and the resulting nodes are grown into one
//! aligned graph shared by the whole region.

pub mod codegen;

pub use codegen::{RegionCodeGenerator, RolledRegion};

use super::classify::LaneScope;
use super::graph::{AlignedGraph, GraphContext};
use super::node::{NodeId, NodeKind};
use crate::config::RollingConfig;
use crate::error::{RollError, RollResult};
use crate::ir::dominance::{DominanceFrontier, DominatorTree, PostDominatorTree};
use crate::ir::stride::StrideOracle;
use crate::ir::{IrBlockId, IrFunction, IrFunctionId, IrId, IrInstruction, IrModule, IrValue};
use fxhash::{FxHashMap, FxHashSet};
use indexmap::IndexMap;
use log::{debug, trace};

/// One block position of the region, with the block each lane has there
#[derive(Debug, Clone, Default)]
pub struct AlignedBlock {
    /// Block of every lane
    pub blocks: Vec<IrBlockId>,
    /// Aligned blocks reached from this one, by successor position
    pub successors: Vec<usize>,
    pub is_entry: bool,
    pub is_exit: bool,
    /// Nodes the loop body emits for this block, in program order
    pub scheduled: Vec<NodeId>,
}

/// A chain of isomorphic regions and the graph aligning them
#[derive(Debug, Clone, Default)]
pub struct AlignedRegion {
    pub entry_blocks: Vec<IrBlockId>,
    pub exit_blocks: Vec<IrBlockId>,
    pub aligned_blocks: Vec<AlignedBlock>,
    pub graph: AlignedGraph,
    /// Label node of every aligned block
    pub label_nodes: Vec<NodeId>,
}

/// Single-entry/single-exit regions of a function as `(entry, exit)`, the
/// smallest one per entry block, in layout order
pub fn discover_regions(function: &IrFunction) -> Vec<(IrBlockId, IrBlockId)> {
    let domtree = DominatorTree::compute(function);
    let postdom = PostDominatorTree::compute(function);
    let frontier = DominanceFrontier::compute(function, &domtree);

    let mut regions = Vec::new();
    for entry in function.block_ids() {
        if !domtree.is_reachable(entry) {
            continue;
        }
        let successors = function.successors(entry);
        let mut candidate = postdom.ipdom(entry);
        while let Some(exit) = candidate {
            let trivial = successors.len() <= 1 && successors.first() == Some(&exit);
            if !trivial && domtree.dominates(entry, exit) && is_region(&domtree, &frontier, entry, exit) {
                regions.push((entry, exit));
                break;
            }
            candidate = postdom.ipdom(exit);
        }
    }
    regions
}

/// Control leaves the blocks dominated by `entry` only through `exit`
fn is_region(domtree: &DominatorTree, frontier: &DominanceFrontier, entry: IrBlockId, exit: IrBlockId) -> bool {
    let entry_frontier_ok = frontier
        .frontier(entry)
        .map_or(true, |f| f.iter().all(|&b| b == entry || b == exit));
    let exit_frontier_ok = frontier
        .frontier(exit)
        .map_or(true, |f| f.iter().all(|&b| b == entry || !domtree.strictly_dominates(entry, b)));
    entry_frontier_ok && exit_frontier_ok
}

/// Branch successors of a block; blocks ending otherwise have none
fn branch_successors(function: &IrFunction, block: IrBlockId) -> Option<Vec<IrBlockId>> {
    let terminator = function.terminator(block)?;
    match function.instruction(terminator)? {
        inst @ (IrInstruction::Branch { .. } | IrInstruction::CondBranch { .. }) => Some(inst.successors()),
        _ => None,
    }
}

/// Walks two regions in lock step, comparing their shapes
struct IsomorphismWalk<'a> {
    function: &'a IrFunction,
    exits: (IrBlockId, IrBlockId),
    /// Block of the reference region to the block visited with it
    paired: FxHashMap<IrBlockId, IrBlockId>,
    visited: FxHashSet<IrBlockId>,
}

impl<'a> IsomorphismWalk<'a> {
    fn new(function: &'a IrFunction, exit1: IrBlockId, exit2: IrBlockId) -> Self {
        Self {
            function,
            exits: (exit1, exit2),
            paired: FxHashMap::default(),
            visited: FxHashSet::default(),
        }
    }

    /// Compare the regions from `b1` and `b2`. With `aligned`, every block of
    /// the second region is appended to the aligned block of its position.
    fn walk(&mut self, b1: IrBlockId, b2: IrBlockId, at: Option<usize>, aligned: &mut Option<&mut Vec<AlignedBlock>>) -> bool {
        match (self.paired.get(&b1), self.visited.contains(&b2)) {
            (Some(&seen), true) => return seen == b2,
            (Some(_), false) | (None, true) => return false,
            (None, false) => {}
        }
        self.paired.insert(b1, b2);
        self.visited.insert(b2);
        if let (Some(blocks), Some(index)) = (aligned.as_deref_mut(), at) {
            if let Some(ab) = blocks.get_mut(index) {
                ab.blocks.push(b2);
            }
        }

        let (exit1, exit2) = self.exits;
        match (b1 == exit1, b2 == exit2) {
            (true, true) => return true,
            (true, false) | (false, true) => return false,
            (false, false) => {}
        }
        let (Some(succ1), Some(succ2)) = (
            branch_successors(self.function, b1),
            branch_successors(self.function, b2),
        ) else {
            return false;
        };
        if succ1.len() != succ2.len() {
            return false;
        }
        let next: Vec<Option<usize>> = (0..succ1.len())
            .map(|i| {
                let blocks = aligned.as_deref()?;
                blocks.get(at?)?.successors.get(i).copied()
            })
            .collect();
        succ1
            .into_iter()
            .zip(succ2)
            .zip(next)
            .all(|((s1, s2), n)| self.walk(s1, s2, n, aligned))
    }
}

/// The region `(entry1, exit1)` has the same shape as `(entry2, exit2)`
pub fn is_isomorphic(function: &IrFunction, entry1: IrBlockId, exit1: IrBlockId, entry2: IrBlockId, exit2: IrBlockId) -> bool {
    IsomorphismWalk::new(function, exit1, exit2).walk(entry1, entry2, None, &mut None)
}

impl AlignedRegion {
    /// Aligned blocks of the reference region `(entry, exit)`, one lane
    fn from_reference(function: &IrFunction, entry: IrBlockId, exit: IrBlockId) -> Self {
        let mut region = AlignedRegion {
            entry_blocks: vec![entry],
            exit_blocks: vec![exit],
            ..Default::default()
        };
        let mut index_of: FxHashMap<IrBlockId, usize> = FxHashMap::default();
        // Preorder, so every block comes after the blocks dominating it
        let mut stack = vec![(entry, None::<usize>)];
        let mut edges: Vec<(usize, IrBlockId)> = Vec::new();
        while let Some((block, parent)) = stack.pop() {
            if let Some(from) = parent {
                edges.push((from, block));
            }
            if index_of.contains_key(&block) {
                continue;
            }
            let index = region.aligned_blocks.len();
            index_of.insert(block, index);
            region.aligned_blocks.push(AlignedBlock {
                blocks: vec![block],
                is_entry: index == 0,
                is_exit: block == exit,
                ..Default::default()
            });
            if block == exit {
                continue;
            }
            if let Some(successors) = branch_successors(function, block) {
                for succ in successors.into_iter().rev() {
                    stack.push((succ, Some(index)));
                }
            }
        }
        // Successor lists keep branch order
        let mut by_parent: IndexMap<usize, Vec<usize>> = IndexMap::new();
        for (from, to) in edges {
            if let Some(&target) = index_of.get(&to) {
                by_parent.entry(from).or_default().push(target);
            }
        }
        for (from, successors) in by_parent {
            region.aligned_blocks[from].successors = successors;
        }
        region
    }

    /// Starting from the reference region, append every following region of
    /// the same shape as a new lane
    pub fn chain(
        function: &IrFunction,
        entry: IrBlockId,
        exit: IrBlockId,
        regions_by_entry: &IndexMap<IrBlockId, Vec<IrBlockId>>,
    ) -> Self {
        let mut region = Self::from_reference(function, entry, exit);
        let mut link = Some(exit);
        let mut seen = FxHashSet::default();
        while let Some(link_block) = link.take() {
            if !seen.insert(link_block) {
                break;
            }
            let Some(exits) = regions_by_entry.get(&link_block) else {
                break;
            };
            for &next_exit in exits {
                if !is_isomorphic(function, entry, exit, link_block, next_exit) {
                    continue;
                }
                trace!("region {} -> {} is isomorphic to {} -> {}", link_block, next_exit, entry, exit);
                let mut blocks = Some(&mut region.aligned_blocks);
                IsomorphismWalk::new(function, exit, next_exit).walk(entry, link_block, Some(0), &mut blocks);
                region.entry_blocks.push(link_block);
                region.exit_blocks.push(next_exit);
                link = Some(next_exit);
                break;
            }
        }
        region
    }

    pub fn num_regions(&self) -> usize {
        self.entry_blocks.len()
    }

    pub fn num_label_nodes(&self) -> usize {
        self.graph
            .nodes()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Label))
            .count()
    }

    /// Nodes that are neither labels nor mismatches
    pub fn num_good_nodes(&self) -> usize {
        self.graph
            .nodes()
            .filter(|(_, n)| !matches!(n.kind, NodeKind::Label | NodeKind::Mismatch))
            .count()
    }

    /// Region without its first `skip` lanes
    pub fn remove_first(&self, skip: usize) -> Self {
        self.slice_lanes(skip, self.num_regions())
    }

    /// Region without its last `skip` lanes
    pub fn remove_last(&self, skip: usize) -> Self {
        self.slice_lanes(0, self.num_regions().saturating_sub(skip))
    }

    fn slice_lanes(&self, from: usize, to: usize) -> Self {
        if from >= to {
            return Self::default();
        }
        let aligned_blocks = self
            .aligned_blocks
            .iter()
            .map(|ab| AlignedBlock {
                blocks: ab.blocks.get(from..to).map(|b| b.to_vec()).unwrap_or_default(),
                successors: ab.successors.clone(),
                is_entry: ab.is_entry,
                is_exit: ab.is_exit,
                scheduled: Vec::new(),
            })
            .collect();
        AlignedRegion {
            entry_blocks: self.entry_blocks.get(from..to).map(|b| b.to_vec()).unwrap_or_default(),
            exit_blocks: self.exit_blocks.get(from..to).map(|b| b.to_vec()).unwrap_or_default(),
            aligned_blocks,
            graph: AlignedGraph::new(),
            label_nodes: Vec::new(),
        }
    }

    /// Align the instructions of every aligned block into one graph
    pub fn align(
        &mut self,
        module: &IrModule,
        function: &IrFunction,
        config: &RollingConfig,
        oracle: &dyn StrideOracle,
    ) -> RollResult<()> {
        if self.num_regions() <= 1 {
            return Err(RollError::InvalidGraph("a single region".to_string()));
        }
        let lanes = self.num_regions();
        let Some(&first_entry) = self.entry_blocks.first() else {
            return Err(RollError::InvalidGraph("region without entry".to_string()));
        };
        let AlignedRegion {
            aligned_blocks,
            graph,
            label_nodes,
            ..
        } = self;
        if aligned_blocks.iter().any(|ab| ab.blocks.len() != lanes) {
            return Err(RollError::InvalidGraph("aligned block with missing lanes".to_string()));
        }
        let cx = GraphContext {
            module,
            function,
            config,
            oracle,
            block: first_entry,
            scope: LaneScope::Region(aligned_blocks.as_slice()),
        };

        label_nodes.clear();
        for ab in aligned_blocks.iter() {
            let values: Vec<IrValue> = ab.blocks.iter().map(|&b| IrValue::Block(b)).collect();
            let node = graph.create_node(&cx, values);
            label_nodes.push(graph.add_node(function, node));
        }

        let mut schedules: Vec<Vec<NodeId>> = Vec::with_capacity(aligned_blocks.len());
        for ab in aligned_blocks.iter() {
            let scheduled = align_block(&cx, graph, ab, lanes);
            for &id in &scheduled {
                let node = graph.node(id);
                if matches!(
                    node.kind,
                    NodeKind::Recurrence { .. } | NodeKind::Reduction { .. } | NodeKind::AltSequence { .. }
                ) {
                    return Err(RollError::InvalidGraph(format!(
                        "{} node {} scheduled in a region",
                        node.kind.name(),
                        id
                    )));
                }
                let bad_child = node.children.iter().find(|&&c| {
                    matches!(
                        graph.node(c).kind,
                        NodeKind::Recurrence { .. } | NodeKind::Reduction { .. }
                    )
                });
                if let Some(child) = bad_child {
                    return Err(RollError::InvalidGraph(format!(
                        "{} has a {} operand",
                        id,
                        graph.node(*child).kind.name()
                    )));
                }
            }
            schedules.push(scheduled);
        }
        drop(cx);

        for (ab, scheduled) in self.aligned_blocks.iter_mut().zip(schedules) {
            ab.scheduled = scheduled;
        }

        for (id, node) in self.graph.nodes() {
            if !node.is_mismatch() {
                continue;
            }
            let aligned = node
                .values
                .iter()
                .filter_map(|v| v.as_inst())
                .find(|&inst| self.graph.contains_instruction(inst));
            if let Some(inst) = aligned {
                return Err(RollError::InvalidGraph(format!(
                    "mismatch {} takes the aligned instruction {} as input",
                    id, inst
                )));
            }
        }
        self.validate_alignment(function)
    }

    /// Every instruction between the first entry and the last exit has a
    /// node, and so does every phi of the last exit
    pub fn validate_alignment(&self, function: &IrFunction) -> RollResult<()> {
        let mut visited: FxHashSet<IrBlockId> = FxHashSet::default();
        visited.extend(self.entry_blocks.first().copied());
        visited.extend(self.exit_blocks.last().copied());

        let unaligned = |block: IrBlockId, insts: &[IrId]| -> RollResult<()> {
            match insts.iter().find(|&&i| self.graph.find_instruction(i).is_none()) {
                Some(inst) => Err(RollError::InvalidGraph(format!(
                    "instruction {} in {} is not aligned",
                    inst, block
                ))),
                None => Ok(()),
            }
        };
        for ab in &self.aligned_blocks {
            if ab.is_exit {
                if let Some(&last) = ab.blocks.last() {
                    unaligned(last, &function.phis(last))?;
                }
                continue;
            }
            for &block in &ab.blocks {
                if visited.insert(block) {
                    unaligned(block, function.block_instructions(block))?;
                }
            }
        }
        Ok(())
    }
}

/// Walk the lanes of one aligned block backwards, creating or reusing a node
/// per instruction tuple. Returns the nodes in program order.
fn align_block(cx: &GraphContext<'_>, graph: &mut AlignedGraph, ab: &AlignedBlock, lanes: usize) -> Vec<NodeId> {
    let insts: Vec<Vec<IrId>> = ab
        .blocks
        .iter()
        .map(|&b| cx.function.block_instructions(b).to_vec())
        .collect();
    // Instructions not yet visited per lane; the cursor is the last of them
    let mut remaining: Vec<usize> = insts.iter().map(|i| i.len()).collect();
    let current = |remaining: &[usize], lane: usize| -> Option<IrId> {
        remaining[lane].checked_sub(1).map(|i| insts[lane][i])
    };
    let tuple = |remaining: &[usize]| -> Vec<IrValue> {
        (0..lanes)
            .filter_map(|lane| current(remaining, lane))
            .map(IrValue::Inst)
            .collect()
    };

    if ab.is_exit {
        // Exit blocks start where the next region's entry stopped
        for r in remaining.iter_mut() {
            *r = r.saturating_sub(1);
        }
        let last = lanes - 1;
        for lane in 0..last {
            while let Some(inst) = current(&remaining, lane) {
                if graph.find_instruction(inst).is_none() {
                    break;
                }
                remaining[lane] -= 1;
            }
            if remaining[lane] == 0 {
                return Vec::new();
            }
        }
        // The last exit block is not a region entry: find its first aligned
        // instruction from the end
        while remaining[last] > 0 {
            let mut trial = graph.clone();
            if !trial.create_node(cx, tuple(&remaining)).is_mismatch() {
                break;
            }
            remaining[last] -= 1;
        }
        if remaining[last] == 0 {
            return Vec::new();
        }
    }

    let mut scheduled = Vec::new();
    loop {
        let values = tuple(&remaining);
        if values.is_empty() {
            break;
        }
        let advance_all = |remaining: &mut Vec<usize>| {
            for r in remaining.iter_mut() {
                *r = r.saturating_sub(1);
            }
        };
        if values.len() == lanes {
            if let Some(found) = graph.find(&values) {
                trace!("aligned {:?} with existing {}", values, found);
                scheduled.push(found);
                advance_all(&mut remaining);
                continue;
            }
        }

        // Lanes of one offset sequence may be spread over the blocks
        let mut reference = None;
        let mut same_gep = true;
        for lane in 0..lanes {
            let Some(id) = current(&remaining, lane).and_then(|i| graph.find_instruction(i)) else {
                continue;
            };
            if matches!(graph.node(id).kind, NodeKind::GepSequence { .. }) {
                match reference {
                    None => reference = Some(id),
                    Some(r) if r != id => same_gep = false,
                    Some(_) => {}
                }
            }
        }
        if let (true, Some(gep)) = (same_gep, reference) {
            for lane in 0..lanes {
                let is_gep = current(&remaining, lane)
                    .and_then(|i| graph.find_instruction(i))
                    .is_some_and(|id| matches!(graph.node(id).kind, NodeKind::GepSequence { .. }));
                if is_gep {
                    remaining[lane] -= 1;
                }
            }
            scheduled.push(gep);
            continue;
        }

        if values.len() < lanes {
            trace!("incomplete tuple {:?}", values);
            break;
        }
        let node = graph.create_node(cx, values);
        if node.is_mismatch() {
            break;
        }
        let id = graph.add_node(cx.function, node);
        graph.grow(cx, id);
        scheduled.push(id);
        advance_all(&mut remaining);
    }
    scheduled.reverse();
    scheduled
}

/// Try every region chain of the function, first the full chain, then with
/// lanes dropped from the end and from both ends. Stops at the first rolled
/// chain.
pub fn roll_regions(
    module: &mut IrModule,
    func: IrFunctionId,
    config: &RollingConfig,
    oracle: &dyn StrideOracle,
    generated: &FxHashSet<IrBlockId>,
) -> RollResult<Option<RolledRegion>> {
    let candidates: Vec<AlignedRegion> = {
        let Some(function) = module.function(func) else {
            return Ok(None);
        };
        // Loops rolled earlier are never taken apart again
        let regions: Vec<_> = discover_regions(function)
            .into_iter()
            .filter(|(entry, exit)| !generated.contains(entry) && !generated.contains(exit))
            .collect();
        let mut by_entry: IndexMap<IrBlockId, Vec<IrBlockId>> = IndexMap::new();
        for &(entry, exit) in &regions {
            by_entry.entry(entry).or_default().push(exit);
        }
        regions
            .iter()
            .map(|&(entry, exit)| AlignedRegion::chain(function, entry, exit, &by_entry))
            .filter(|r| r.num_regions() > 1 && r.aligned_blocks.len() > 1)
            .collect()
    };

    for region in candidates {
        let lanes = region.num_regions();
        debug!(
            "region chain from {}: {} regions of {} blocks",
            region.entry_blocks[0],
            lanes,
            region.aligned_blocks.len()
        );
        if let Some(rolled) = try_region(module, func, region.clone(), config, oracle)? {
            return Ok(Some(rolled));
        }
        for skip in 1..lanes.saturating_sub(1) {
            let narrowed = region.remove_last(skip);
            if let Some(rolled) = try_region(module, func, narrowed.clone(), config, oracle)? {
                return Ok(Some(rolled));
            }
            for skip_first in 1..narrowed.num_regions().saturating_sub(1) {
                let inner = narrowed.remove_first(skip_first);
                if let Some(rolled) = try_region(module, func, inner, config, oracle)? {
                    return Ok(Some(rolled));
                }
            }
        }
    }
    Ok(None)
}

/// Align and generate one chain. Failures that leave the function untouched
/// are reported as `None`.
fn try_region(
    module: &mut IrModule,
    func: IrFunctionId,
    mut region: AlignedRegion,
    config: &RollingConfig,
    oracle: &dyn StrideOracle,
) -> RollResult<Option<RolledRegion>> {
    {
        let Some(function) = module.function(func) else {
            return Ok(None);
        };
        if let Err(err) = region.align(module, function, config, oracle) {
            debug!("region alignment failed: {}", err);
            return Ok(None);
        }
        region.graph.log_nodes(module, function);
    }
    match RegionCodeGenerator::roll(module, func, &region, config) {
        Ok(rolled) => Ok(Some(rolled)),
        Err(err) => {
            debug!("region not rolled: {}", err);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CompareOp, IrBuilder, IrFunctionSignature, IrType};
    use crate::rolling::matching::intern_neutral_elements;
    use crate::ir::stride::InductionStrideOracle;

    /// `for i in 0..n: B[i] = if A[i] > 0 { 1 } else { 2 }`, fully unrolled
    /// into chained diamonds. Returns the entry and join blocks.
    pub(crate) fn chained_diamonds(module: &mut IrModule, n: i64) -> (IrFunctionId, Vec<IrBlockId>) {
        intern_neutral_elements(module);
        let a = module.add_global("A", IrType::array(IrType::I32, n as u64), None, false);
        let out = module.add_global("B", IrType::array(IrType::I32, n as u64), None, false);
        let f = module.declare_function("f", IrFunctionSignature::new(vec![], IrType::Void));
        let mut b = IrBuilder::new(module, f);
        let mut joins = vec![b.create_block("entry")];
        let zero = b.const_int(IrType::I64, 0);
        let zero32 = b.const_int(IrType::I32, 0);
        let one = b.const_int(IrType::I32, 1);
        let two = b.const_int(IrType::I32, 2);
        for i in 0..n {
            let head = joins[i as usize];
            let then_block = b.create_block(&format!("then{}", i));
            let else_block = b.create_block(&format!("else{}", i));
            let join = b.create_block(&format!("join{}", i));
            b.position_at_end(head);
            let idx = b.const_int(IrType::I64, i);
            let p = b.build_gep(IrType::array(IrType::I32, n as u64), IrValue::Global(a), vec![zero, idx]);
            let v = b.build_load(IrType::I32, p);
            let c = b.build_cmp(CompareOp::SGt, v, zero32);
            b.build_cond_br(c, then_block, else_block);
            b.position_at_end(then_block);
            b.build_br(join);
            b.position_at_end(else_block);
            b.build_br(join);
            b.position_at_end(join);
            let phi = b.build_phi(IrType::I32);
            b.add_incoming(phi, one, then_block);
            b.add_incoming(phi, two, else_block);
            let q = b.build_gep(IrType::array(IrType::I32, n as u64), IrValue::Global(out), vec![zero, idx]);
            b.build_store(phi, q);
            joins.push(join);
        }
        if let Some(&last) = joins.last() {
            b.position_at_end(last);
            b.build_return(None);
        }
        (f, joins)
    }

    #[test]
    fn test_discover_diamond_regions() {
        let mut module = IrModule::new("m");
        let (f, joins) = chained_diamonds(&mut module, 3);
        let func = module.function(f).unwrap();
        let regions = discover_regions(func);
        assert_eq!(
            regions,
            vec![(joins[0], joins[1]), (joins[1], joins[2]), (joins[2], joins[3])]
        );
        assert!(is_isomorphic(func, joins[0], joins[1], joins[1], joins[2]));
        assert!(!is_isomorphic(func, joins[0], joins[1], joins[1], joins[3]));
    }

    #[test]
    fn test_chain_and_slices() {
        let mut module = IrModule::new("m");
        let (f, joins) = chained_diamonds(&mut module, 4);
        let func = module.function(f).unwrap();
        let mut by_entry = IndexMap::new();
        for (entry, exit) in discover_regions(func) {
            by_entry.entry(entry).or_insert_with(Vec::new).push(exit);
        }
        let region = AlignedRegion::chain(func, joins[0], joins[1], &by_entry);
        assert_eq!(region.num_regions(), 4);
        assert_eq!(region.entry_blocks, joins[..4].to_vec());
        assert_eq!(region.exit_blocks, joins[1..].to_vec());
        // entry, then, join (exit), else
        assert_eq!(region.aligned_blocks.len(), 4);
        assert!(region.aligned_blocks[0].is_entry);
        assert_eq!(region.aligned_blocks[0].successors, vec![1, 3]);
        assert!(region.aligned_blocks[2].is_exit);
        assert_eq!(region.aligned_blocks[2].blocks, joins[1..].to_vec());

        let last = region.remove_last(1);
        assert_eq!(last.entry_blocks, joins[..3].to_vec());
        assert!(last.aligned_blocks.iter().all(|ab| ab.blocks.len() == 3));
        let first = last.remove_first(1);
        assert_eq!(first.entry_blocks, joins[1..3].to_vec());
        assert_eq!(first.aligned_blocks[0].blocks, joins[1..3].to_vec());
        assert_eq!(region.remove_last(4).num_regions(), 0);
    }

    #[test]
    fn test_align_chained_diamonds() {
        let mut module = IrModule::new("m");
        let (f, joins) = chained_diamonds(&mut module, 4);
        let func = module.function(f).unwrap();
        let mut by_entry = IndexMap::new();
        for (entry, exit) in discover_regions(func) {
            by_entry.entry(entry).or_insert_with(Vec::new).push(exit);
        }
        let mut region = AlignedRegion::chain(func, joins[0], joins[1], &by_entry);
        let config = RollingConfig::with_extensions();
        let oracle = InductionStrideOracle::new();
        region.align(&module, func, &config, &oracle).unwrap();

        assert_eq!(region.num_label_nodes(), 4);
        let entry = &region.aligned_blocks[0];
        // gep, load, compare, branch
        assert_eq!(entry.scheduled.len(), 4);
        let exit = &region.aligned_blocks[2];
        let kinds: Vec<&str> = exit
            .scheduled
            .iter()
            .map(|&id| region.graph.node(id).kind.name())
            .collect();
        assert_eq!(kinds, vec!["phi", "match", "match"]);
        assert!(region.validate_alignment(func).is_ok());
    }
}
