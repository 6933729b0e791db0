//! Rolling driver
//!
//! Walks the blocks of a function and tries the seed groups of each block in
//! a fixed order, from the widest candidates (several store or call groups
//! rolled together) down to single reductions. After every rolled loop the
//! scan starts over, since the rolled block was split and its seeds moved.
//! With the extensions switched on, min/max chains and whole region chains
//! are tried as well.

use super::classify::LaneScope;
use super::codegen::CodeGenerator;
use super::dot::dot_string;
use super::graph::{AlignedGraph, GraphContext};
use super::matching::{intern_neutral_elements, values_match};
use super::region::roll_regions;
use super::seeds::SeedGroups;
use crate::config::RollingConfig;
use crate::ir::stride::StrideOracle;
use crate::ir::{IrBlockId, IrFunction, IrFunctionId, IrId, IrInstruction, IrModule, IrValue};
use fxhash::FxHashSet;
use indexmap::IndexMap;
use log::{debug, info, warn};

/// Rescans of one function before the driver gives up
const MAX_ROUNDS: usize = 256;

/// Counters of one driver run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollStats {
    /// Schedulable graphs handed to code generation
    pub attempts: usize,
    pub rolled_loops: usize,
    pub rolled_regions: usize,
    /// Node kinds of every rolled graph
    pub node_kinds: IndexMap<&'static str, usize>,
}

impl RollStats {
    pub fn merge(&mut self, other: &RollStats) {
        self.attempts += other.attempts;
        self.rolled_loops += other.rolled_loops;
        self.rolled_regions += other.rolled_regions;
        for (&kind, &count) in &other.node_kinds {
            *self.node_kinds.entry(kind).or_insert(0) += count;
        }
    }

    fn record(&mut self, graph: &AlignedGraph) {
        for (kind, count) in graph.kind_counts() {
            *self.node_kinds.entry(kind).or_insert(0) += count;
        }
    }
}

/// Rolls one function
pub struct LoopRoller<'a> {
    module: &'a mut IrModule,
    func: IrFunctionId,
    config: &'a RollingConfig,
    oracle: &'a dyn StrideOracle,
    stats: RollStats,
    dumped: usize,
    /// Pre-headers and loop blocks created by earlier rolls. Their code is
    /// already rolled and is not scanned again.
    generated: FxHashSet<IrBlockId>,
}

impl<'a> LoopRoller<'a> {
    pub fn new(
        module: &'a mut IrModule,
        func: IrFunctionId,
        config: &'a RollingConfig,
        oracle: &'a dyn StrideOracle,
    ) -> Self {
        LoopRoller {
            module,
            func,
            config,
            oracle,
            stats: RollStats::default(),
            dumped: 0,
            generated: FxHashSet::default(),
        }
    }

    /// Roll until nothing changes
    pub fn run(mut self) -> RollStats {
        intern_neutral_elements(self.module);
        let Some(name) = self.function().map(|f| f.name.clone()) else {
            return self.stats;
        };
        let mut rounds = 0;
        while self.roll_once() {
            rounds += 1;
            if rounds == MAX_ROUNDS {
                warn!("{}: giving up after {} rolling rounds", name, rounds);
                break;
            }
        }
        if self.stats.attempts == 0 && self.stats.rolled_regions == 0 {
            debug!("nothing to roll in {}", name);
        } else {
            info!(
                "{}: rolled {} loops and {} regions in {} attempts",
                name, self.stats.rolled_loops, self.stats.rolled_regions, self.stats.attempts
            );
        }
        self.stats
    }

    fn function(&self) -> Option<&IrFunction> {
        self.module.function(self.func)
    }

    /// One scan over the function, stopping at the first change
    fn roll_once(&mut self) -> bool {
        let Some(blocks) = self.function().map(|f| f.block_ids()) else {
            return false;
        };
        for block in blocks {
            if self.generated.contains(&block) {
                continue;
            }
            if self.roll_block(block) {
                return true;
            }
        }
        if self.config.extensions {
            match roll_regions(self.module, self.func, self.config, self.oracle, &self.generated) {
                Ok(Some(rolled)) => {
                    self.stats.rolled_regions += 1;
                    self.generated
                        .extend([rolled.pre_header, rolled.header, rolled.latch, rolled.exit]);
                    self.generated.extend(rolled.body.iter().copied());
                    debug!("rolled region chain of {} regions", rolled.regions);
                    return true;
                }
                Ok(None) => {}
                Err(err) => debug!("region rolling failed: {}", err),
            }
        }
        false
    }

    fn roll_block(&mut self, block: IrBlockId) -> bool {
        let mut seeds = {
            let Some(function) = self.function() else {
                return false;
            };
            if function.block(block).is_none() {
                return false;
            }
            SeedGroups::collect(self.module, function, block)
        };
        if seeds.is_empty() {
            return false;
        }

        let store_groups: Vec<Vec<IrId>> = seeds.stores.values().cloned().collect();
        let call_groups: Vec<Vec<IrId>> = seeds.calls.values().cloned().collect();

        for root in &store_groups {
            if self.roll_multi(block, root, &mut seeds) {
                return true;
            }
        }
        for root in &call_groups {
            if self.roll_multi(block, root, &mut seeds) {
                return true;
            }
        }
        for group in &store_groups {
            if self.roll_stores(block, group, &mut seeds) {
                return true;
            }
        }
        if self.roll_reductions(block, true, &mut seeds) {
            return true;
        }
        for group in &call_groups {
            if group.len() > 1 && !self.has_uses(group) && self.roll_lanes(block, group, &mut seeds) {
                return true;
            }
        }
        if self.roll_reductions(block, false, &mut seeds) {
            return true;
        }
        self.config.extensions && self.roll_minmax(block, &mut seeds)
    }

    fn has_uses(&self, group: &[IrId]) -> bool {
        self.function()
            .is_some_and(|f| group.iter().any(|&id| f.num_uses(IrValue::Inst(id)) > 0))
    }

    /// `root` together with every same-sized group that starts between its
    /// first and second lane
    fn roll_multi(&mut self, block: IrBlockId, root: &[IrId], seeds: &mut SeedGroups) -> bool {
        if root.len() < 2 || self.has_uses(root) {
            return false;
        }
        let groups: Vec<Vec<IrId>> = {
            let Some(function) = self.function() else {
                return false;
            };
            let insts = function.block_instructions(block);
            let (Some(start), Some(end)) = (
                insts.iter().position(|&id| id == root[0]),
                insts.iter().position(|&id| id == root[1]),
            ) else {
                return false;
            };
            let mut groups = vec![root.to_vec()];
            for &inst in insts.iter().take(end).skip(start + 1) {
                if function.instruction(inst).is_some_and(|i| i.is_terminator()) {
                    break;
                }
                let Some(group) = seeds.group_containing(inst) else {
                    continue;
                };
                if group.len() == root.len() && group[0] == inst && !self.has_uses(group) {
                    groups.push(group.to_vec());
                }
            }
            groups
        };
        if groups.len() < 2 {
            return false;
        }
        let lanes: Vec<Vec<IrValue>> = groups
            .iter()
            .map(|g| g.iter().map(|&id| IrValue::Inst(id)).collect())
            .collect();
        self.attempt(block, seeds, |cx| Some(AlignedGraph::build_multi(cx, lanes)))
    }

    /// A store group, then its prefixes of stores whose pointers match the
    /// first one
    fn roll_stores(&mut self, block: IrBlockId, group: &[IrId], seeds: &mut SeedGroups) -> bool {
        if group.len() < 2 {
            return false;
        }
        if self.roll_lanes(block, group, seeds) {
            return true;
        }
        let mut saved = group.to_vec();
        while !saved.is_empty() {
            let prefix = {
                let Some(function) = self.function() else {
                    return false;
                };
                let pointer_of = |id: IrId| match function.instruction(id) {
                    Some(IrInstruction::Store { ptr, .. }) => Some(*ptr),
                    _ => None,
                };
                let Some(first) = pointer_of(saved[0]) else {
                    return false;
                };
                let matching = saved
                    .iter()
                    .skip(1)
                    .take_while(|&&id| {
                        pointer_of(id).is_some_and(|p| {
                            values_match(self.module, function, first, p, self.config.match_alignment)
                        })
                    })
                    .count();
                saved.drain(..=matching).collect::<Vec<_>>()
            };
            if prefix.len() > 1 && prefix.len() < group.len() {
                debug!("retrying {} stores of a group of {}", prefix.len(), group.len());
                if self.roll_lanes(block, &prefix, seeds) {
                    return true;
                }
            }
        }
        false
    }

    fn roll_lanes(&mut self, block: IrBlockId, lanes: &[IrId], seeds: &mut SeedGroups) -> bool {
        let values: Vec<IrValue> = lanes.iter().map(|&id| IrValue::Inst(id)).collect();
        self.attempt(block, seeds, |cx| Some(AlignedGraph::build(cx, values)))
    }

    /// Reduction chains consumed by a terminator, or by anything else
    fn roll_reductions(&mut self, block: IrBlockId, by_terminator: bool, seeds: &mut SeedGroups) -> bool {
        let candidates: Vec<(IrId, IrId)> = {
            let Some(function) = self.function() else {
                return false;
            };
            seeds
                .reductions
                .iter()
                .filter_map(|(&root, &user)| Some((root, user?)))
                .filter(|&(_, user)| {
                    function.instruction(user).is_some_and(|i| i.is_terminator()) == by_terminator
                })
                .collect()
        };
        for (root, user) in candidates {
            if self.attempt(block, seeds, |cx| {
                AlignedGraph::build_reduction(cx, IrValue::Inst(root), user)
            }) {
                return true;
            }
        }
        false
    }

    /// Min/max chains, dropping trailing links until a split rolls
    fn roll_minmax(&mut self, block: IrBlockId, seeds: &mut SeedGroups) -> bool {
        let roots: Vec<IrId> = seeds
            .minmax
            .iter()
            .filter(|(_, user)| user.is_some())
            .map(|(&root, _)| root)
            .collect();
        for root in roots {
            let mut skip = 0;
            loop {
                let graph = {
                    let Some(function) = self.module.function(self.func) else {
                        return false;
                    };
                    let cx = self.context(function, block);
                    AlignedGraph::build_minmax(&cx, IrValue::Inst(root), skip)
                };
                let Some(graph) = graph else {
                    break;
                };
                if self.attempt(block, seeds, |_| Some(graph)) {
                    return true;
                }
                skip += 1;
            }
        }
        false
    }

    fn context<'f>(&'f self, function: &'f IrFunction, block: IrBlockId) -> GraphContext<'f> {
        GraphContext {
            module: self.module,
            function,
            config: self.config,
            oracle: self.oracle,
            block,
            scope: LaneScope::Block(block),
        }
    }

    /// Build a graph, check it and hand it to code generation
    fn attempt<F>(&mut self, block: IrBlockId, seeds: &mut SeedGroups, build: F) -> bool
    where
        F: FnOnce(&GraphContext<'_>) -> Option<AlignedGraph>,
    {
        let graph = {
            let Some(function) = self.module.function(self.func) else {
                return false;
            };
            let cx = self.context(function, block);
            let Some(mut graph) = build(&cx) else {
                return false;
            };
            let schedulable = graph.is_schedulable(self.module, function, block);
            self.dump(&graph, function, block, self.dumped);
            self.dumped += 1;
            if !schedulable {
                debug!("graph over {} is not schedulable", block);
                return false;
            }
            graph.log_nodes(self.module, function);
            graph
        };
        self.stats.attempts += 1;
        match CodeGenerator::roll(self.module, self.func, block, &graph, self.config, seeds) {
            Ok(rolled) => {
                debug!(
                    "rolled {} lanes of {}: cost {} -> {}",
                    rolled.width, block, rolled.original_cost, rolled.rolled_cost
                );
                self.stats.rolled_loops += 1;
                self.stats.record(&graph);
                // The exit block holds the rest of the original block and
                // stays a candidate
                self.generated.extend([rolled.pre_header, rolled.header]);
                true
            }
            Err(err) => {
                debug!("{} not rolled: {}", block, err);
                false
            }
        }
    }

    /// Write the graph to the dump directory, if one is configured
    fn dump(&self, graph: &AlignedGraph, function: &IrFunction, block: IrBlockId, index: usize) {
        let Some(dir) = &self.config.dump_graphs else {
            return;
        };
        let path = dir.join(format!("{}.{}.{}.dot", function.name, block, index));
        let text = dot_string(graph, self.module, function);
        if let Err(e) = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, text)) {
            warn!("failed to write {}: {}", path.display(), e);
        }
    }
}

/// Roll one function of `module`
pub fn roll_function(
    module: &mut IrModule,
    func: IrFunctionId,
    config: &RollingConfig,
    oracle: &dyn StrideOracle,
) -> RollStats {
    LoopRoller::new(module, func, config, oracle).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::interpreter::{Interpreter, NoHost, RuntimeValue};
    use crate::ir::stride::InductionStrideOracle;
    use crate::ir::validation::validate_function;
    use crate::ir::{BinaryOp, IrBuilder, IrFunctionSignature, IrType};

    fn memory(module: &IrModule, global: &str, n: u64) -> Vec<i64> {
        let mut interp = Interpreter::new(module, NoHost).unwrap();
        interp.run("f", &[RuntimeValue::Int(3)]).unwrap();
        let base = interp.global_by_name(global).unwrap();
        (0..n)
            .map(|k| interp.memory.load(base + 4 * k, &IrType::I32).unwrap().as_int().unwrap())
            .collect()
    }

    /// `A[k] = x + k; B[k] = x * k` interleaved for four lanes
    fn interleaved() -> (IrModule, IrFunctionId) {
        let mut module = IrModule::new("m");
        let a = module.add_global("A", IrType::array(IrType::I32, 4), None, false);
        let bg = module.add_global("B", IrType::array(IrType::I32, 4), None, false);
        let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::I32], IrType::Void));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let zero = b.const_int(IrType::I64, 0);
        for k in 0..4 {
            let c = b.const_int(IrType::I32, k);
            let idx = b.const_int(IrType::I64, k);
            let sum = b.build_binop(BinaryOp::Add, IrValue::Arg(0), c);
            let p = b.build_gep(IrType::array(IrType::I32, 4), IrValue::Global(a), vec![zero, idx]);
            b.build_store(sum, p);
            let prod = b.build_binop(BinaryOp::Mul, IrValue::Arg(0), c);
            let q = b.build_gep(IrType::array(IrType::I32, 4), IrValue::Global(bg), vec![zero, idx]);
            b.build_store(prod, q);
        }
        b.build_return(None);
        (module, f)
    }

    #[test]
    fn test_interleaved_groups_roll_as_one_loop() {
        let (mut module, f) = interleaved();
        let a_before = memory(&module, "A", 4);
        let b_before = memory(&module, "B", 4);
        assert_eq!(a_before, vec![3, 4, 5, 6]);
        assert_eq!(b_before, vec![0, 3, 6, 9]);

        let config = RollingConfig::default();
        let stats = roll_function(&mut module, f, &config, &InductionStrideOracle::new());
        assert_eq!(stats.rolled_loops, 1);
        assert_eq!(stats.node_kinds.get("multi"), Some(&1));

        let func = module.function(f).unwrap();
        assert!(validate_function(&module, func).is_ok());
        assert_eq!(func.block_ids().len(), 4);
        assert_eq!(memory(&module, "A", 4), a_before);
        assert_eq!(memory(&module, "B", 4), b_before);
    }

    #[test]
    fn test_forced_roll_leaves_generated_blocks_alone() {
        // `A[k] = arg_k`: the argument tuple becomes a table filled in the
        // pre-header, which must not be picked up as a new store group
        let mut module = IrModule::new("m");
        let a = module.add_global("A", IrType::array(IrType::I32, 4), None, false);
        let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::I32; 4], IrType::Void));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let zero = b.const_int(IrType::I64, 0);
        for k in 0..4 {
            let idx = b.const_int(IrType::I64, k);
            let p = b.build_gep(IrType::array(IrType::I32, 4), IrValue::Global(a), vec![zero, idx]);
            b.build_store(IrValue::Arg(k as u32), p);
        }
        b.build_return(None);
        let args: Vec<RuntimeValue> = [5, -1, 7, 0].into_iter().map(RuntimeValue::Int).collect();
        let run = |module: &IrModule| {
            let mut interp = Interpreter::new(module, NoHost).unwrap();
            interp.run("f", &args).unwrap();
            let base = interp.global_by_name("A").unwrap();
            (0..4)
                .map(|k| interp.memory.load(base + 4 * k, &IrType::I32).unwrap().as_int().unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(&module), vec![5, -1, 7, 0]);

        let config = RollingConfig {
            always_roll: true,
            ..RollingConfig::default()
        };
        let stats = roll_function(&mut module, f, &config, &InductionStrideOracle::new());
        assert_eq!(stats.rolled_loops, 1);
        assert_eq!(stats.node_kinds.get("mismatch"), Some(&1));

        let func = module.function(f).unwrap();
        assert!(validate_function(&module, func).is_ok());
        assert_eq!(func.block_ids().len(), 4);
        assert_eq!(run(&module), vec![5, -1, 7, 0]);
    }

    #[test]
    fn test_calls_with_used_results_stay_unrolled() {
        // `g(0); g(1); g(2); g(3)` where the first result is returned
        let mut module = IrModule::new("m");
        let g = module.declare_function("g", IrFunctionSignature::new(vec![IrType::I32], IrType::I32));
        let f = module.declare_function("f", IrFunctionSignature::new(vec![], IrType::I32));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let mut results = Vec::new();
        for k in 0..4 {
            let arg = b.const_int(IrType::I32, k);
            results.push(b.build_call(IrValue::Function(g), vec![arg]));
        }
        b.build_return(Some(results[0]));
        let count = module.function(f).unwrap().instruction_count();

        let config = RollingConfig {
            always_roll: true,
            ..RollingConfig::default()
        };
        let stats = roll_function(&mut module, f, &config, &InductionStrideOracle::new());
        assert_eq!(stats.rolled_loops, 0);
        assert_eq!(stats.attempts, 0);
        let func = module.function(f).unwrap();
        assert_eq!(func.block_ids(), vec![entry]);
        assert_eq!(func.instruction_count(), count);
    }

    #[test]
    fn test_nothing_to_roll() {
        let mut module = IrModule::new("m");
        let a = module.add_global("A", IrType::array(IrType::I32, 4), None, false);
        let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::I32], IrType::Void));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        b.build_store(IrValue::Arg(0), IrValue::Global(a));
        b.build_return(None);
        let count = module.function(f).unwrap().instruction_count();

        let stats = roll_function(&mut module, f, &RollingConfig::default(), &InductionStrideOracle::new());
        assert_eq!(stats, RollStats::default());
        assert_eq!(module.function(f).unwrap().instruction_count(), count);
    }

    #[test]
    fn test_dump_directory_receives_graphs() {
        let (mut module, f) = interleaved();
        let dir = std::env::temp_dir().join(format!("roller-dot-{}", std::process::id()));
        let config = RollingConfig {
            dump_graphs: Some(dir.clone()),
            ..RollingConfig::default()
        };
        roll_function(&mut module, f, &config, &InductionStrideOracle::new());
        let dumped = std::fs::read_dir(&dir).unwrap().count();
        assert!(dumped >= 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
