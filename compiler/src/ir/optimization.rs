//! Optimization Passes
//!
//! This module defines the pass interface and the pass manager. Passes can be
//! run independently or as a pipeline that iterates to a fixed point.

use super::IrModule;
use log::debug;
use std::collections::HashMap;

/// Upper bound on pipeline rounds before the manager gives up on a fixed point
const MAX_PIPELINE_ROUNDS: usize = 64;

/// Optimization pass trait
pub trait OptimizationPass {
    /// Get the name of this pass
    fn name(&self) -> &'static str;

    /// Run the pass on a module
    fn run_on_module(&mut self, module: &mut IrModule) -> OptimizationResult;
}

/// Result of an optimization pass
#[derive(Debug, Clone, Default)]
pub struct OptimizationResult {
    /// Whether the IR was modified
    pub modified: bool,

    /// Number of instructions eliminated
    pub instructions_eliminated: usize,

    /// Number of blocks eliminated
    pub blocks_eliminated: usize,

    /// Other statistics
    pub stats: HashMap<String, usize>,
}

impl OptimizationResult {
    /// Create a result indicating no changes
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Create a result indicating changes
    pub fn changed() -> Self {
        Self {
            modified: true,
            ..Self::default()
        }
    }

    /// Bump a named counter
    pub fn add_stat(&mut self, key: &str, amount: usize) {
        *self.stats.entry(key.to_string()).or_insert(0) += amount;
    }

    pub fn stat(&self, key: &str) -> usize {
        self.stats.get(key).copied().unwrap_or(0)
    }

    /// Combine results
    pub fn combine(mut self, other: OptimizationResult) -> Self {
        self.modified |= other.modified;
        self.instructions_eliminated += other.instructions_eliminated;
        self.blocks_eliminated += other.blocks_eliminated;

        for (key, value) in other.stats {
            *self.stats.entry(key).or_insert(0) += value;
        }

        self
    }

    /// Statistics sorted by name, for reports
    pub fn sorted_stats(&self) -> Vec<(&str, usize)> {
        let mut stats: Vec<_> = self.stats.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        stats.sort();
        stats
    }
}

/// Optimization pass manager
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl PassManager {
    /// Create a new pass manager
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Add a pass to the manager
    pub fn add_pass<P: OptimizationPass + 'static>(&mut self, pass: P) {
        self.passes.push(Box::new(pass));
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run all passes until none of them changes the module
    pub fn run(&mut self, module: &mut IrModule) -> OptimizationResult {
        let mut total_result = OptimizationResult::unchanged();

        for round in 0..MAX_PIPELINE_ROUNDS {
            let mut changed = false;

            for pass in &mut self.passes {
                let result = pass.run_on_module(module);
                if result.modified {
                    debug!("round {}: {} changed the module", round, pass.name());
                    changed = true;
                }
                total_result = total_result.combine(result);
            }

            if !changed {
                break;
            }
        }

        total_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_combine() {
        let mut a = OptimizationResult::changed();
        a.add_stat("rolled", 1);
        let mut b = OptimizationResult::unchanged();
        b.add_stat("rolled", 2);
        b.add_stat("attempts", 3);
        let c = a.combine(b);
        assert!(c.modified);
        assert_eq!(c.stat("rolled"), 3);
        assert_eq!(c.sorted_stats()[0], ("attempts", 3));
    }
}
