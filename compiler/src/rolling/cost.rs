//! Size estimation
//!
//! A rough per-instruction code size used to decide whether a rolled loop is
//! smaller than the straight-line code it replaces. Phis and allocas are
//! free, casts cost one, memory operations two, and binary operators with a
//! wide immediate pay for encoding it.

use crate::ir::{IrBlockId, IrFunction, IrId, IrInstruction, IrModule, IrValue};

/// Estimated size of one instruction
pub fn estimate_instruction(module: &IrModule, function: &IrFunction, id: IrId) -> i64 {
    let Some(inst) = function.instruction(id) else {
        return 0;
    };
    match inst {
        IrInstruction::Phi { .. } | IrInstruction::Alloca { .. } => 0,
        IrInstruction::Cast { .. } => 1,
        IrInstruction::Call { args, .. } => 1 + args.len() as i64,
        IrInstruction::GetElementPtr { .. } => {
            let base = module.underlying_object(function, IrValue::Inst(id));
            if matches!(base, IrValue::Global(_)) {
                2
            } else {
                1
            }
        }
        IrInstruction::Load { .. } | IrInstruction::Store { .. } => 2,
        IrInstruction::BinOp { left, right, .. } => {
            let mut size = 1;
            if left.is_constant() || right.is_constant() {
                let width = function.inst_type(id).bit_width().unwrap_or(0);
                if width >= 32 {
                    size += 1;
                }
                if width >= 64 {
                    size += 1;
                }
            }
            size
        }
        _ => 1,
    }
}

/// Estimated size of a value: instructions as above, globals one, other
/// values nothing
pub fn estimate_value(module: &IrModule, function: &IrFunction, value: IrValue) -> i64 {
    match value {
        IrValue::Inst(id) => estimate_instruction(module, function, id),
        IrValue::Global(_) => 1,
        _ => 0,
    }
}

/// Sum over a list of instructions
pub fn estimate_instructions<'a>(
    module: &IrModule,
    function: &IrFunction,
    ids: impl IntoIterator<Item = &'a IrId>,
) -> i64 {
    ids.into_iter()
        .map(|&id| estimate_instruction(module, function, id))
        .sum()
}

/// Sum over every instruction of a block
pub fn estimate_block(module: &IrModule, function: &IrFunction, block: IrBlockId) -> i64 {
    estimate_instructions(module, function, function.block_instructions(block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, IrBuilder, IrFunctionSignature, IrType};

    #[test]
    fn test_instruction_weights() {
        let mut module = IrModule::new("m");
        let g = module.add_global("A", IrType::array(IrType::I64, 4), None, false);
        let callee = module.declare_function("g", IrFunctionSignature::new(vec![IrType::I32, IrType::I32], IrType::Void));
        let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::Ptr, IrType::I64], IrType::Void));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let zero = b.const_int(IrType::I64, 0);
        let seven = b.const_int(IrType::I64, 7);
        let small = b.const_int(IrType::I32, 7);
        let wide = b.build_binop(BinaryOp::Add, IrValue::Arg(1), seven);
        let plain = b.build_binop(BinaryOp::Add, IrValue::Arg(1), IrValue::Arg(1));
        let narrow = b.build_cast(crate::ir::CastOp::Trunc, IrValue::Arg(1), IrType::I32);
        let narrow_add = b.build_binop(BinaryOp::Mul, narrow, small);
        let local = b.build_gep(IrType::I64, IrValue::Arg(0), vec![seven]);
        let global = b.build_gep(IrType::array(IrType::I64, 4), IrValue::Global(g), vec![zero, seven]);
        let load = b.build_load(IrType::I64, global);
        let store = b.build_store(load, local);
        let call = b.build_call(IrValue::Function(callee), vec![small, small]);
        let phi = b.build_phi(IrType::I64);
        b.build_return(None);

        let func = module.function(f).unwrap();
        let cost = |v: IrValue| estimate_value(&module, func, v);
        assert_eq!(cost(wide), 3);
        assert_eq!(cost(plain), 1);
        assert_eq!(cost(narrow), 1);
        assert_eq!(cost(narrow_add), 2);
        assert_eq!(cost(local), 1);
        assert_eq!(cost(global), 2);
        assert_eq!(cost(load), 2);
        assert_eq!(cost(store), 2);
        assert_eq!(cost(call), 3);
        assert_eq!(cost(phi), 0);
        assert_eq!(cost(IrValue::Global(g)), 1);
        assert_eq!(cost(zero), 0);
        assert_eq!(estimate_block(&module, func, entry), 3 + 1 + 1 + 2 + 1 + 2 + 2 + 2 + 3 + 1);
    }
}
