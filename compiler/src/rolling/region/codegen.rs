//! Region loop code generation
//!
//! ```text
//! first entry:       code before the aligned part, br rolled.reg.pre
//! rolled.reg.pre:    loop-invariant setup
//! rolled.reg.loop:   iv = phi i8 [0, pre], [iv.next, latch]; br <entry copy>
//! rolled.reg.bb:     one copy per aligned block, branching between each other
//! rolled.reg.latch:  iv.next = iv + 1; condbr (iv.next != regions), loop, exit
//! rolled.reg.exit:   lane values used later; br <last exit>
//! ```
//!
//! The copy of the exit aligned block holds the merging phis and falls
//! through to the latch. All region blocks except the first entry and the
//! last exit are deleted once the loop is committed.

use super::AlignedRegion;
use crate::config::RollingConfig;
use crate::error::{RollError, RollResult};
use crate::ir::{BinaryOp, CompareOp, IrBlockId, IrFunctionId, IrId, IrInstruction, IrModule, IrType, IrValue};
use crate::rolling::codegen::{CodeGenerator, Skeleton, MAX_WIDTH};
use crate::rolling::cost::{estimate_block, estimate_instructions};
use crate::rolling::node::NodeKind;
use fxhash::FxHashSet;
use log::{debug, info};

/// Summary of a committed region loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolledRegion {
    pub pre_header: IrBlockId,
    pub header: IrBlockId,
    pub latch: IrBlockId,
    pub exit: IrBlockId,
    /// Loop body block per aligned block
    pub body: Vec<IrBlockId>,
    pub regions: usize,
    pub original_cost: i64,
    pub rolled_cost: i64,
}

/// Emits one loop for an aligned region
pub struct RegionCodeGenerator<'a> {
    inner: CodeGenerator<'a>,
    region: &'a AlignedRegion,
    /// Copy of each aligned block
    body: Vec<IrBlockId>,
    exit_body: IrBlockId,
}

impl<'a> RegionCodeGenerator<'a> {
    /// Roll `region`. On failure the function is unchanged.
    pub fn roll(
        module: &'a mut IrModule,
        func: IrFunctionId,
        region: &'a AlignedRegion,
        config: &'a RollingConfig,
    ) -> RollResult<RolledRegion> {
        let lanes = region.num_regions();
        if !(2..=MAX_WIDTH).contains(&lanes) {
            return Err(RollError::InvalidGraph(format!("unsupported region count {}", lanes)));
        }
        let (Some(&first_entry), Some(&last_exit)) = (region.entry_blocks.first(), region.exit_blocks.last()) else {
            return Err(RollError::InvalidGraph("region without lanes".to_string()));
        };
        if region.label_nodes.len() != region.aligned_blocks.len() {
            return Err(RollError::InvalidGraph("region is not aligned".to_string()));
        }

        let function = module
            .function_mut(func)
            .ok_or_else(|| RollError::InvalidGraph(format!("unknown function {}", func)))?;
        let pre_header = function.create_block(Some("rolled.reg.pre"));
        let header = function.create_block(Some("rolled.reg.loop"));
        let iv = function.insert_at(header, 0, IrInstruction::Phi { incoming: Vec::new() }, IrType::I8);
        function.set_name(iv, "rolled.reg.iv");
        let body: Vec<IrBlockId> = region
            .aligned_blocks
            .iter()
            .map(|_| function.create_block(Some("rolled.reg.bb")))
            .collect();
        let latch = function.create_block(Some("rolled.reg.latch"));
        let loop_exit = function.create_block(Some("rolled.reg.exit"));
        let exit_body = region
            .aligned_blocks
            .iter()
            .position(|ab| ab.is_exit)
            .and_then(|i| body.get(i).copied())
            .unwrap_or(latch);

        let skeleton = Skeleton {
            block: first_entry,
            pre_header,
            header,
            latch,
            exit: loop_exit,
            ind_var: IrValue::Inst(iv),
        };
        let mut inner = CodeGenerator::new(module, func, &region.graph, config, skeleton, lanes);
        for (&label, &block) in region.label_nodes.iter().zip(&body) {
            inner.labels.insert(label, block);
        }
        let mut generator = RegionCodeGenerator {
            inner,
            region,
            body,
            exit_body,
        };

        let latch_values = match generator.emit_body() {
            Ok(values) => values,
            Err(err) => {
                generator.rollback();
                return Err(err);
            }
        };
        let (original, rolled) = generator.costs()?;
        let profitable = config.always_roll || rolled + 1 < original;
        debug!(
            "region cost original {} rolled {} ({} regions, {} labels, {} good nodes)",
            original,
            rolled,
            lanes,
            region.num_label_nodes(),
            region.num_good_nodes()
        );
        if !profitable {
            generator.rollback();
            return Err(RollError::Unprofitable { original, rolled });
        }
        generator.commit(latch_values, first_entry, last_exit)?;
        Ok(RolledRegion {
            pre_header,
            header,
            latch,
            exit: loop_exit,
            body: generator.body.clone(),
            regions: lanes,
            original_cost: original,
            rolled_cost: rolled,
        })
    }

    /// Generate every aligned block, then the phi incomings, the lane
    /// extraction and the latch arithmetic
    fn emit_body(&mut self) -> RollResult<(IrValue, IrValue)> {
        let region = self.region;
        for (ab, &block) in region.aligned_blocks.iter().zip(&self.body) {
            self.inner.body = block;
            for &node in &ab.scheduled {
                self.inner.emit(node)?;
            }
        }
        self.inner.close_recurrences()?;
        self.fill_phis()?;

        {
            let function = self.inner.function()?;
            let garbage: Vec<IrId> = region
                .graph
                .nodes()
                .filter(|(_, node)| !node.kind.is_transparent())
                .flat_map(|(_, node)| node.owned_instructions(function))
                .collect();
            self.inner.garbage.extend(garbage);
        }
        self.extract_lanes()?;

        let terminators = std::mem::take(&mut self.inner.terminators);
        let function = self.inner.function_mut()?;
        for (terminator, block) in terminators {
            function.move_to_end(terminator, block);
        }

        let (iv, latch, lanes) = (self.inner.ind_var, self.inner.latch, self.inner.width);
        let one = self.inner.int(IrType::I8, 1);
        let limit = self.inner.int(IrType::I8, lanes as i64);
        let mut b = self.inner.builder_at(latch);
        let next = b.build_binop(BinaryOp::Add, iv, one);
        b.name_value(next, "rolled.reg.iv.next");
        let condition = b.build_cmp(CompareOp::Ne, next, limit);
        Ok((next, condition))
    }

    /// Incoming values of generated phis, computed in their incoming block
    fn fill_phis(&mut self) -> RollResult<()> {
        let graph = &self.region.graph;
        while !self.inner.deferred_phis.is_empty() {
            for id in std::mem::take(&mut self.inner.deferred_phis) {
                let node = graph.node(id);
                let NodeKind::Phi { labels } = &node.kind else {
                    continue;
                };
                let phi = self.inner.value_of(id)?;
                for (&child, &label) in node.children.iter().zip(labels) {
                    let block = self
                        .inner
                        .labels
                        .get(&label)
                        .copied()
                        .ok_or_else(|| RollError::InvalidGraph(format!("label {} has no block", label)))?;
                    self.inner.body = block;
                    self.inner.emit(child)?;
                    let value = self.inner.value_of(child)?;
                    self.inner.builder_at(block).add_incoming(phi, value, block);
                }
            }
        }
        Ok(())
    }

    /// Lane values used after the region are stored per iteration and
    /// reloaded in the loop exit
    fn extract_lanes(&mut self) -> RollResult<()> {
        let graph = &self.region.graph;
        let mut work = Vec::new();
        {
            let function = self.inner.function()?;
            let garbage = &self.inner.garbage;
            for (id, node) in graph.nodes() {
                if node.kind.is_transparent() {
                    continue;
                }
                let lanes: Vec<(usize, IrId)> = (0..node.size())
                    .filter_map(|lane| node.valid_instruction(function, lane).map(|inst| (lane, inst)))
                    .filter(|&(_, inst)| {
                        function
                            .users(IrValue::Inst(inst))
                            .into_iter()
                            .any(|user| !garbage.contains(&user))
                    })
                    .collect();
                if !lanes.is_empty() {
                    work.push((id, lanes));
                }
            }
        }

        let (iv, loop_exit, header) = (self.inner.ind_var, self.inner.exit, self.inner.header);
        for (id, lanes) in work {
            let value = self.inner.value_of(id)?;
            let ty = self.inner.type_of(value);
            let defined_in = match value.as_inst() {
                Some(inst) => self.inner.function()?.parent(inst).unwrap_or(header),
                None => header,
            };
            let slots = self.inner.entry_alloca(ty.clone())?;
            {
                let mut b = self.inner.builder_at(defined_in);
                let ptr = b.build_gep(ty.clone(), slots, vec![iv]);
                b.build_store(value, ptr);
            }
            for (lane, inst) in lanes {
                let index = self.inner.int(IrType::I8, lane as i64);
                let mut b = self.inner.builder_at(loop_exit);
                let ptr = b.build_gep(ty.clone(), slots, vec![index]);
                let loaded = b.build_load(ty.clone(), ptr);
                self.inner.extracted.insert(inst, loaded);
            }
        }
        Ok(())
    }

    fn costs(&self) -> RollResult<(i64, i64)> {
        let module = &*self.inner.module;
        let function = self.inner.function()?;
        let original = estimate_instructions(module, function, self.inner.garbage.iter());
        let mut blocks: FxHashSet<IrBlockId> = self.body.iter().copied().collect();
        blocks.insert(self.inner.header);
        blocks.insert(self.inner.latch);
        blocks.insert(self.exit_body);
        let rolled = blocks
            .into_iter()
            .map(|b| estimate_block(module, function, b))
            .sum::<i64>()
            + 4 * estimate_block(module, function, self.inner.pre_header)
            + 3 * estimate_block(module, function, self.inner.exit)
            + self.inner.created_globals.len() as i64;
        Ok((original, rolled))
    }

    fn rollback(&mut self) {
        let mut blocks = vec![self.inner.pre_header, self.inner.header, self.inner.latch, self.inner.exit];
        blocks.extend(self.body.iter().copied());
        let allocas = std::mem::take(&mut self.inner.entry_allocas);
        if let Ok(function) = self.inner.function_mut() {
            for block in blocks {
                function.remove_block(block);
            }
            for slot in allocas {
                function.erase(slot);
            }
        }
        for global in std::mem::take(&mut self.inner.created_globals) {
            self.inner.module.remove_global(global);
        }
    }

    fn commit(&mut self, latch_values: (IrValue, IrValue), first_entry: IrBlockId, last_exit: IrBlockId) -> RollResult<()> {
        let (next, condition) = latch_values;
        let (iv, pre_header, header, latch, loop_exit) = (
            self.inner.ind_var,
            self.inner.pre_header,
            self.inner.header,
            self.inner.latch,
            self.inner.exit,
        );
        let entry_body = self
            .body
            .first()
            .copied()
            .ok_or_else(|| RollError::InvalidGraph("region without blocks".to_string()))?;
        let exit_body = self.exit_body;
        let zero = self.inner.int(IrType::I8, 0);
        {
            let mut b = self.inner.builder_at(header);
            b.add_incoming(iv, zero, pre_header);
            b.add_incoming(iv, next, latch);
            b.build_br(entry_body);
            b.position_at_end(latch);
            b.build_cond_br(condition, header, loop_exit);
            b.position_at_end(pre_header);
            b.build_br(header);
            b.position_at_end(loop_exit);
            b.build_br(last_exit);
            if exit_body != latch {
                b.position_at_end(exit_body);
                b.build_br(latch);
            }
        }

        let extracted = std::mem::take(&mut self.inner.extracted);
        let garbage = std::mem::take(&mut self.inner.garbage);
        let undefs: Vec<(IrId, IrValue)> = {
            let function = self.inner.function()?;
            let types: Vec<(IrId, IrType)> = garbage
                .iter()
                .map(|&inst| (inst, function.inst_type(inst)))
                .filter(|(_, ty)| *ty != IrType::Void)
                .collect();
            types
                .into_iter()
                .map(|(inst, ty)| (inst, self.inner.module.constants.undef(ty)))
                .collect()
        };

        let mut doomed: FxHashSet<IrBlockId> = self
            .region
            .aligned_blocks
            .iter()
            .flat_map(|ab| ab.blocks.iter().copied())
            .collect();
        doomed.remove(&first_entry);
        doomed.remove(&last_exit);

        let width = self.inner.width;
        let function = self.inner.function_mut()?;
        for (&inst, &value) in &extracted {
            function.replace_all_uses(IrValue::Inst(inst), value);
        }
        for (inst, undef) in undefs {
            function.replace_all_uses(IrValue::Inst(inst), undef);
        }
        for &inst in garbage.iter().rev() {
            function.erase(inst);
        }
        let mut doomed: Vec<IrBlockId> = doomed.into_iter().collect();
        doomed.sort();
        for block in doomed {
            function.remove_block(block);
        }
        if let Some(terminator) = function.terminator(first_entry) {
            function.erase(terminator);
        }
        function.append(first_entry, IrInstruction::Branch { target: pre_header }, IrType::Void);
        info!(
            "rolled {} regions from {} in {} ({} instructions replaced)",
            width,
            first_entry,
            function.name,
            garbage.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::interpreter::{Interpreter, NoHost, RuntimeValue};
    use crate::ir::stride::InductionStrideOracle;
    use crate::ir::validation::validate_function;
    use crate::rolling::region::tests::chained_diamonds;
    use crate::rolling::region::{discover_regions, AlignedRegion};
    use indexmap::IndexMap;

    fn outputs(module: &IrModule, input: &[i64]) -> Vec<i64> {
        let mut interp = Interpreter::new(module, NoHost).unwrap();
        let a = interp.global_by_name("A").unwrap();
        for (k, &v) in input.iter().enumerate() {
            interp
                .memory
                .store(a + 4 * k as u64, &IrType::I32, RuntimeValue::Int(v))
                .unwrap();
        }
        interp.run("f", &[]).unwrap();
        let out = interp.global_by_name("B").unwrap();
        (0..input.len() as u64)
            .map(|k| interp.memory.load(out + 4 * k, &IrType::I32).unwrap().as_int().unwrap())
            .collect()
    }

    fn aligned_region(module: &IrModule, f: IrFunctionId, config: &RollingConfig) -> AlignedRegion {
        let func = module.function(f).unwrap();
        let mut by_entry = IndexMap::new();
        for (entry, exit) in discover_regions(func) {
            by_entry.entry(entry).or_insert_with(Vec::new).push(exit);
        }
        let entry = func.entry_block().unwrap();
        let exit = by_entry[&entry][0];
        let mut region = AlignedRegion::chain(func, entry, exit, &by_entry);
        region
            .align(module, func, config, &InductionStrideOracle::new())
            .unwrap();
        region
    }

    #[test]
    fn test_roll_chained_diamonds() {
        let mut module = IrModule::new("m");
        let (f, joins) = chained_diamonds(&mut module, 4);
        let input = [3, -1, 0, 7];
        assert_eq!(outputs(&module, &input), vec![1, 2, 2, 1]);

        let config = RollingConfig::with_extensions();
        let region = aligned_region(&module, f, &config);
        let rolled = RegionCodeGenerator::roll(&mut module, f, &region, &config).unwrap();
        assert_eq!(rolled.regions, 4);
        assert!(rolled.rolled_cost + 1 < rolled.original_cost);

        let func = module.function(f).unwrap();
        assert!(validate_function(&module, func).is_ok());
        assert_eq!(func.successors(joins[0]), vec![rolled.pre_header]);
        assert_eq!(func.successors(rolled.exit), vec![joins[4]]);
        assert!(func.block(joins[1]).is_none());
        assert_eq!(outputs(&module, &input), vec![1, 2, 2, 1]);
    }

    #[test]
    fn test_unlabelled_region_is_rejected() {
        let mut module = IrModule::new("m");
        let (f, _) = chained_diamonds(&mut module, 4);
        let config = RollingConfig::with_extensions();
        let mut region = aligned_region(&module, f, &config);
        region.label_nodes.pop();
        let blocks = module.function(f).unwrap().block_ids();
        let count = module.function(f).unwrap().instruction_count();

        let err = RegionCodeGenerator::roll(&mut module, f, &region, &config).unwrap_err();
        assert!(matches!(err, RollError::InvalidGraph(_)));
        let func = module.function(f).unwrap();
        assert_eq!(func.block_ids(), blocks);
        assert_eq!(func.instruction_count(), count);
    }
}
