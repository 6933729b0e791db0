//! Seed collection
//!
//! Seeds are the instructions an aligned graph is grown from. One scan over a
//! block groups them by what the lanes share:
//! - stores by the object their pointer is based on
//! - calls by their direct callee
//! - associative chains and min/max chains by their root, together with the
//!   instruction consuming the result

use crate::ir::{IrBlockId, IrFunction, IrFunctionId, IrId, IrInstruction, IrModule, IrValue};
use indexmap::IndexMap;

use super::classify::REDUCTION_OPS;

/// Seed instructions of one block
#[derive(Debug, Default, Clone)]
pub struct SeedGroups {
    /// Stores keyed by underlying object, in block order
    pub stores: IndexMap<IrValue, Vec<IrId>>,
    /// Calls keyed by direct callee, in block order
    pub calls: IndexMap<IrFunctionId, Vec<IrId>>,
    /// Root of an associative chain to its consumer (`None` once consumed)
    pub reductions: IndexMap<IrId, Option<IrId>>,
    /// Root select of a min/max chain to its consumer
    pub minmax: IndexMap<IrId, Option<IrId>>,
}

impl SeedGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `block` once
    pub fn collect(module: &IrModule, function: &IrFunction, block: IrBlockId) -> Self {
        let mut seeds = Self::new();
        for &id in function.block_instructions(block) {
            let Some(inst) = function.instruction(id) else {
                continue;
            };
            let consumed: Vec<IrValue> = match inst {
                IrInstruction::Store { value, ptr, .. } => {
                    seeds.add_store(module, function, id, *value, *ptr);
                    vec![*value]
                }
                IrInstruction::Call { args, .. } => {
                    if let Some(callee) = module.direct_callee(inst) {
                        if !callee.signature.varargs && !callee.is_lifetime_marker() {
                            seeds.calls.entry(callee.id).or_default().push(id);
                        }
                    }
                    args.clone()
                }
                IrInstruction::CondBranch { condition, .. } => vec![*condition],
                IrInstruction::Return { value: Some(value) } => vec![*value],
                IrInstruction::Phi { incoming } => incoming
                    .iter()
                    .filter(|(_, from)| *from == block)
                    .map(|(value, _)| *value)
                    .collect(),
                _ => Vec::new(),
            };
            for value in consumed {
                if let Some(root) = possible_reduction(function, value) {
                    seeds.reductions.insert(root, Some(id));
                }
                if let Some(root) = possible_minmax(function, value) {
                    seeds.minmax.insert(root, Some(id));
                }
            }
        }
        seeds
    }

    fn add_store(&mut self, module: &IrModule, function: &IrFunction, id: IrId, value: IrValue, ptr: IrValue) {
        let object = module.underlying_object(function, ptr);
        let value_ty = module.value_type(function, value);
        let group = self.stores.entry(object).or_default();
        let valid = match group.first().and_then(|&first| function.instruction(first)) {
            Some(IrInstruction::Store { value: first, .. }) => module.value_type(function, *first) == value_ty,
            Some(_) => false,
            None => true,
        };
        if valid {
            group.push(id);
        }
    }

    /// Forget `inst` everywhere it is recorded
    pub fn remove(&mut self, inst: IrId) {
        for group in self.stores.values_mut().chain(self.calls.values_mut()) {
            group.retain(|&i| i != inst);
        }
        for chains in [&mut self.reductions, &mut self.minmax] {
            if let Some(user) = chains.get_mut(&inst) {
                *user = None;
            }
            for user in chains.values_mut() {
                if *user == Some(inst) {
                    *user = None;
                }
            }
        }
    }

    /// The store or call group holding `inst`
    pub fn group_containing(&self, inst: IrId) -> Option<&[IrId]> {
        self.stores
            .values()
            .chain(self.calls.values())
            .find(|group| group.contains(&inst))
            .map(|group| group.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.stores.values().all(|g| g.len() < 2)
            && self.calls.values().all(|g| g.len() < 2)
            && self.reductions.values().all(|u| u.is_none())
            && self.minmax.values().all(|u| u.is_none())
    }
}

/// `value` is an associative operator with an operand computed by the same
/// operator
fn possible_reduction(function: &IrFunction, value: IrValue) -> Option<IrId> {
    let id = value.as_inst()?;
    let IrInstruction::BinOp { op, left, right } = function.instruction(id)? else {
        return None;
    };
    if !REDUCTION_OPS.contains(op) {
        return None;
    }
    let chained = |operand: &IrValue| {
        operand
            .as_inst()
            .and_then(|o| function.instruction(o))
            .is_some_and(|inst| matches!(inst, IrInstruction::BinOp { op: o, .. } if o == op))
    };
    (chained(left) || chained(right)).then_some(id)
}

/// `value` is a compare-driven select choosing between another select and a
/// fresh value
fn possible_minmax(function: &IrFunction, value: IrValue) -> Option<IrId> {
    let id = value.as_inst()?;
    let IrInstruction::Select {
        condition,
        true_value,
        false_value,
    } = function.instruction(id)?
    else {
        return None;
    };
    let is_cmp = condition
        .as_inst()
        .and_then(|c| function.instruction(c))
        .is_some_and(|c| matches!(c, IrInstruction::Cmp { .. }));
    let is_select = |v: &IrValue| {
        v.as_inst()
            .and_then(|s| function.instruction(s))
            .is_some_and(|s| matches!(s, IrInstruction::Select { .. }))
    };
    (is_cmp && (is_select(true_value) || is_select(false_value))).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, CompareOp, IrBuilder, IrFunctionSignature, IrType};

    #[test]
    fn test_groups_by_object_and_callee() {
        let mut module = IrModule::new("m");
        let a = module.add_global("A", IrType::array(IrType::I32, 4), None, false);
        let callee = module.declare_function("dummy", IrFunctionSignature::new(vec![], IrType::I32));
        let vararg = module.declare_function("printf", IrFunctionSignature::new(vec![IrType::Ptr], IrType::I32).variadic());
        let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::Ptr], IrType::Void));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let zero = b.const_int(IrType::I64, 0);
        let mut stores = Vec::new();
        for k in 0..3 {
            let t = b.build_call(IrValue::Function(callee), vec![]);
            let idx = b.const_int(IrType::I64, k);
            let p = b.build_gep(IrType::array(IrType::I32, 4), IrValue::Global(a), vec![zero, idx]);
            stores.push(b.build_store(t, p).as_inst().unwrap());
        }
        // Different value type: same object, but not part of the group
        let wide = b.const_int(IrType::I64, 1);
        b.build_store(wide, IrValue::Global(a));
        b.build_store(zero, IrValue::Arg(0));
        b.build_call(IrValue::Function(vararg), vec![IrValue::Arg(0)]);
        b.build_return(None);

        let func = module.function(f).unwrap();
        let mut seeds = SeedGroups::collect(&module, func, entry);
        assert_eq!(seeds.stores.get(&IrValue::Global(a)), Some(&stores));
        assert_eq!(seeds.stores.get(&IrValue::Arg(0)).map(|g| g.len()), Some(1));
        assert_eq!(seeds.calls.get(&callee).map(|g| g.len()), Some(3));
        assert!(!seeds.calls.contains_key(&vararg));
        assert_eq!(seeds.group_containing(stores[1]), Some(stores.as_slice()));

        seeds.remove(stores[1]);
        assert_eq!(seeds.stores.get(&IrValue::Global(a)).map(|g| g.len()), Some(2));
        assert!(seeds.group_containing(stores[1]).is_none());
    }

    #[test]
    fn test_reduction_and_minmax_candidates() {
        let mut module = IrModule::new("m");
        let f = module.declare_function(
            "f",
            IrFunctionSignature::new(vec![IrType::I32, IrType::I32, IrType::I32, IrType::Ptr], IrType::I32),
        );
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let s1 = b.build_binop(BinaryOp::Add, IrValue::Arg(0), IrValue::Arg(1));
        let s2 = b.build_binop(BinaryOp::Add, s1, IrValue::Arg(2));
        let c1 = b.build_cmp(CompareOp::SLt, IrValue::Arg(0), IrValue::Arg(1));
        let m1 = b.build_select(c1, IrValue::Arg(0), IrValue::Arg(1));
        let c2 = b.build_cmp(CompareOp::SLt, m1, IrValue::Arg(2));
        let m2 = b.build_select(c2, m1, IrValue::Arg(2));
        let out = b.build_binop(BinaryOp::Sub, s2, m2);
        let ret = b.build_return(Some(out));
        b.position_before(ret.as_inst().unwrap());
        let sink = b.build_store(m2, IrValue::Arg(3));
        let sum_sink = b.build_store(s2, IrValue::Arg(3));

        let func = module.function(f).unwrap();
        let mut seeds = SeedGroups::collect(&module, func, entry);
        assert_eq!(seeds.reductions.get(&s2.as_inst().unwrap()), Some(&sum_sink.as_inst()));
        assert_eq!(seeds.minmax.get(&m2.as_inst().unwrap()), Some(&sink.as_inst()));
        assert!(!seeds.reductions.contains_key(&s1.as_inst().unwrap()));

        seeds.remove(sink.as_inst().unwrap());
        assert_eq!(seeds.minmax.get(&m2.as_inst().unwrap()), Some(&None));
    }
}
