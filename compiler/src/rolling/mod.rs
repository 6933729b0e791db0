//! Loop rolling
//!
//! Collapses repeated straight-line code into loops. The pipeline per
//! candidate is:
//! - `seeds`: find groups of stores, calls and reduction chains in a block
//! - `graph` / `classify`: align the lanes of a group into a graph of nodes
//! - `schedule`: check the lanes can run one after another in a loop
//! - `codegen` / `cost`: emit the loop and keep it only when it is smaller
//!
//! `region` does the same for chains of isomorphic control-flow regions, and
//! `roller` drives all of it over a function.

pub mod node;
pub mod matching;
pub mod classify;
pub mod graph;
pub mod schedule;
pub mod cost;
pub mod seeds;
pub mod codegen;
pub mod region;
pub mod roller;
pub mod dot;

pub use codegen::{CodeGenerator, RolledLoop};
pub use graph::{AlignedGraph, GraphContext};
pub use node::{Node, NodeId, NodeKind};
pub use region::{AlignedRegion, RegionCodeGenerator, RolledRegion};
pub use roller::{roll_function, LoopRoller, RollStats};
pub use seeds::SeedGroups;

use crate::config::RollingConfig;
use crate::ir::optimization::{OptimizationPass, OptimizationResult};
use crate::ir::stride::InductionStrideOracle;
use crate::ir::IrModule;

/// Loop rolling as a module pass
#[derive(Debug, Default)]
pub struct LoopRollingPass {
    config: RollingConfig,
    oracle: InductionStrideOracle,
    stats: RollStats,
}

impl LoopRollingPass {
    pub fn new(config: RollingConfig) -> Self {
        Self {
            config,
            oracle: InductionStrideOracle::new(),
            stats: RollStats::default(),
        }
    }

    pub fn config(&self) -> &RollingConfig {
        &self.config
    }

    /// Counters accumulated over every run of the pass
    pub fn stats(&self) -> &RollStats {
        &self.stats
    }
}

impl OptimizationPass for LoopRollingPass {
    fn name(&self) -> &'static str {
        "loop-rolling"
    }

    fn run_on_module(&mut self, module: &mut IrModule) -> OptimizationResult {
        let mut result = OptimizationResult::unchanged();

        for id in module.defined_functions() {
            let (before, blocks_before) = match module.function(id) {
                Some(f) => (f.instruction_count(), f.block_ids().len()),
                None => continue,
            };
            let stats = roll_function(module, id, &self.config, &self.oracle);
            if stats.rolled_loops + stats.rolled_regions > 0 {
                result.modified = true;
                if let Some(f) = module.function(id) {
                    result.instructions_eliminated += before.saturating_sub(f.instruction_count());
                    result.blocks_eliminated += blocks_before.saturating_sub(f.block_ids().len());
                }
            }
            result.add_stat("rolling.attempts", stats.attempts);
            result.add_stat("rolling.loops", stats.rolled_loops);
            result.add_stat("rolling.regions", stats.rolled_regions);
            for (kind, count) in &stats.node_kinds {
                result.add_stat(&format!("nodes.{}", kind), *count);
            }
            self.stats.merge(&stats);
        }

        result
    }
}
