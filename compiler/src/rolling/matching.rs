//! Value matching
//!
//! Predicates deciding when two lane values can be produced by the same
//! instruction, plus the operand helpers shared by the classifiers.

use crate::ir::stride::StrideOracle;
use crate::ir::{
    BinaryOp, ConstExprOp, IrBlockId, IrConstant, IrFunction, IrInstruction, IrModule, IrType,
    IrValue,
};

/// Integer types neutral elements are interned for
const INTEGER_TYPES: [IrType; 5] = [IrType::Bool, IrType::I8, IrType::I16, IrType::I32, IrType::I64];

/// Whether `a` and `b` can be the same instruction in two different lanes
pub fn values_match(
    module: &IrModule,
    function: &IrFunction,
    a: IrValue,
    b: IrValue,
    match_alignment: bool,
) -> bool {
    if module.value_type(function, a) != module.value_type(function, b) {
        return false;
    }
    let (Some(ia), Some(ib)) = (a.as_inst(), b.as_inst()) else {
        return a == b;
    };
    let (Some(inst_a), Some(inst_b)) = (function.instruction(ia), function.instruction(ib)) else {
        return false;
    };
    if inst_a.opcode() != inst_b.opcode() || inst_a.num_operands() != inst_b.num_operands() {
        return false;
    }
    let (ops_a, ops_b) = (inst_a.operands(), inst_b.operands());
    let same_operand_types = ops_a
        .iter()
        .zip(&ops_b)
        .all(|(&x, &y)| module.value_type(function, x) == module.value_type(function, y));
    if !same_operand_types {
        return false;
    }

    match (inst_a, inst_b) {
        (IrInstruction::Alloca { .. }, _) | (IrInstruction::Phi { .. }, _) => false,
        (IrInstruction::Call { callee: ca, .. }, IrInstruction::Call { callee: cb, .. }) => {
            let IrValue::Function(_) = ca else {
                return false;
            };
            ca == cb
                && module
                    .direct_callee(inst_a)
                    .is_some_and(|f| !f.signature.varargs)
        }
        (
            IrInstruction::Load {
                align: aa,
                volatile: va,
                ..
            },
            IrInstruction::Load {
                align: ab,
                volatile: vb,
                ..
            },
        )
        | (
            IrInstruction::Store {
                align: aa,
                volatile: va,
                ..
            },
            IrInstruction::Store {
                align: ab,
                volatile: vb,
                ..
            },
        ) => va == vb && (!match_alignment || aa == ab),
        (IrInstruction::GetElementPtr { .. }, IrInstruction::GetElementPtr { .. }) => {
            gep_shapes_match(module, inst_a, inst_b)
        }
        _ => true,
    }
}

/// Index list and source type of an instruction or constant-expression GEP
fn gep_parts<'a>(module: &'a IrModule, value: IrValue, function: &'a IrFunction) -> Option<(&'a IrType, Vec<IrValue>)> {
    if let Some(id) = value.as_inst() {
        return match function.instruction(id)? {
            IrInstruction::GetElementPtr {
                source_ty, indices, ..
            } => Some((source_ty, indices.clone())),
            _ => None,
        };
    }
    let expr = module.constants.const_expr(value)?;
    match &expr.op {
        ConstExprOp::GetElementPtr { source_ty } => Some((source_ty, expr.operands.get(1..)?.to_vec())),
        _ => None,
    }
}

/// Two GEPs walk the same types: equal source types, equal index counts
/// and identical struct field indices
pub fn gep_shapes_match(module: &IrModule, a: &IrInstruction, b: &IrInstruction) -> bool {
    let (
        IrInstruction::GetElementPtr {
            source_ty: ta,
            indices: xa,
            ..
        },
        IrInstruction::GetElementPtr {
            source_ty: tb,
            indices: xb,
            ..
        },
    ) = (a, b)
    else {
        return false;
    };
    gep_indices_match(module, ta, xa, tb, xb, xa.len()).is_some()
}

/// Constant-expression flavour of `gep_shapes_match`
pub fn const_gep_shapes_match(module: &IrModule, function: &IrFunction, a: IrValue, b: IrValue) -> bool {
    match (gep_parts(module, a, function), gep_parts(module, b, function)) {
        (Some((ta, xa)), Some((tb, xb))) => gep_indices_match(module, ta, &xa, tb, &xb, xa.len()).is_some(),
        _ => false,
    }
}

/// Type indexed by the last index of two GEPs that agree on everything
/// before it. `None` when they disagree.
pub fn gep_type_before_last(module: &IrModule, a: &IrInstruction, b: &IrInstruction) -> Option<IrType> {
    let (
        IrInstruction::GetElementPtr {
            source_ty: ta,
            indices: xa,
            ..
        },
        IrInstruction::GetElementPtr {
            source_ty: tb,
            indices: xb,
            ..
        },
    ) = (a, b)
    else {
        return None;
    };
    if xa.is_empty() {
        return None;
    }
    gep_indices_match(module, ta, xa, tb, xb, xa.len() - 1)
}

/// Walk the first `depth` indices of two GEPs in lock step. The first index
/// steps over the pointer, the others step into aggregates. Returns the type
/// reached.
fn gep_indices_match(
    module: &IrModule,
    ta: &IrType,
    xa: &[IrValue],
    tb: &IrType,
    xb: &[IrValue],
    depth: usize,
) -> Option<IrType> {
    if ta != tb || xa.len() != xb.len() {
        return None;
    }
    let mut ty = ta.clone();
    for i in 1..depth {
        if ty.is_struct() && xa[i] != xb[i] {
            return None;
        }
        ty = ty.type_at_index(module.int_value(xa[i]))?;
    }
    Some(ty)
}

/// Neutral right operand of a binary-operator sequence
pub fn sequence_neutral(module: &IrModule, op: BinaryOp, ty: &IrType) -> Option<IrValue> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Or | BinaryOp::Xor => find_int(module, ty, 0),
        BinaryOp::Mul | BinaryOp::UDiv | BinaryOp::SDiv => find_int(module, ty, 1),
        BinaryOp::And => find_int(module, ty, -1),
        _ => None,
    }
}

/// Start value of a reduction that has no accumulator phi
pub fn reduction_neutral(module: &IrModule, op: BinaryOp, ty: &IrType) -> Option<IrValue> {
    match op {
        BinaryOp::Add | BinaryOp::Or | BinaryOp::Xor => find_int(module, ty, 0),
        BinaryOp::Mul => find_int(module, ty, 1),
        BinaryOp::And => find_int(module, ty, -1),
        BinaryOp::FAdd => find_float(module, ty, 0.0),
        BinaryOp::FMul => find_float(module, ty, 1.0),
        _ => None,
    }
}

/// Intern the constants classification may need, so the classifiers can
/// work on a shared borrow of the module
pub fn intern_neutral_elements(module: &mut IrModule) {
    for ty in INTEGER_TYPES {
        for value in [-1, 0, 1] {
            module.constants.int(ty.clone(), value);
        }
    }
    for ty in [IrType::F32, IrType::F64] {
        module.constants.float(ty.clone(), 0.0);
        module.constants.float(ty, 1.0);
    }
}

pub fn find_int(module: &IrModule, ty: &IrType, value: i64) -> Option<IrValue> {
    let width = ty.bit_width()?;
    module.constants.lookup(&IrConstant::Int {
        ty: ty.clone(),
        value: crate::ir::sext_to_width(value, width),
    })
}

fn find_float(module: &IrModule, ty: &IrType, value: f64) -> Option<IrValue> {
    let value = if *ty == IrType::F32 { value as f32 as f64 } else { value };
    module.constants.lookup(&IrConstant::Float {
        ty: ty.clone(),
        bits: value.to_bits(),
    })
}

/// `op` appears as `expected`: either literally, or an `or` that adds
/// because its constant bits never overlap an induction variable's
pub fn is_equivalent_op(
    module: &IrModule,
    function: &IrFunction,
    oracle: &dyn StrideOracle,
    inst: &IrInstruction,
    expected: BinaryOp,
) -> bool {
    let IrInstruction::BinOp { op, left, right } = inst else {
        return false;
    };
    if *op == expected {
        return true;
    }
    expected == BinaryOp::Add && *op == BinaryOp::Or && or_is_addition(module, function, oracle, *left, *right)
}

fn or_is_addition(
    module: &IrModule,
    function: &IrFunction,
    oracle: &dyn StrideOracle,
    left: IrValue,
    right: IrValue,
) -> bool {
    let Some(c) = module.int_value(right) else {
        return false;
    };
    let Some(rec) = oracle.affine_recurrence(module, function, left) else {
        return false;
    };
    let step = rec.step.unsigned_abs();
    step.is_power_of_two() && c >= 0 && step >= c as u64 && rec.start & c == 0
}

/// Sort operands the way they appear: instructions of `block` by position,
/// integer constants by value, everything else last
pub fn reorder_operands(module: &IrModule, function: &IrFunction, values: &mut [IrValue], block: IrBlockId) {
    let key = |v: &IrValue| -> i64 {
        if let Some(id) = v.as_inst() {
            if function.parent(id) == Some(block) {
                return function.position(id).map_or(i64::MAX, |p| p as i64);
            }
        }
        module.int_value(*v).unwrap_or(i64::MAX)
    };
    values.sort_by_key(key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::stride::InductionStrideOracle;
    use crate::ir::{CompareOp, IrBuilder, IrFunctionSignature};

    fn function_with(params: Vec<IrType>) -> (IrModule, crate::ir::IrFunctionId) {
        let mut module = IrModule::new("m");
        let f = module.declare_function("f", IrFunctionSignature::new(params, IrType::Void));
        (module, f)
    }

    #[test]
    fn test_binops_match_on_opcode_and_types() {
        let (mut module, f) = function_with(vec![IrType::I32, IrType::I64]);
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let one = b.const_int(IrType::I32, 1);
        let two = b.const_int(IrType::I32, 2);
        let a = b.build_binop(BinaryOp::Add, IrValue::Arg(0), one);
        let c = b.build_binop(BinaryOp::Add, IrValue::Arg(0), two);
        let s = b.build_binop(BinaryOp::Sub, IrValue::Arg(0), two);
        let cmp = b.build_cmp(CompareOp::SLt, a, c);
        let cmp2 = b.build_cmp(CompareOp::SGt, a, c);
        b.build_return(None);
        let func = module.function(f).unwrap();
        assert!(values_match(&module, func, a, c, false));
        assert!(!values_match(&module, func, a, s, false));
        assert!(!values_match(&module, func, cmp, cmp2, false));
        assert!(!values_match(&module, func, one, two, false));
        assert!(values_match(&module, func, one, one, false));
    }

    #[test]
    fn test_load_alignment_is_optional() {
        let (mut module, f) = function_with(vec![IrType::Ptr]);
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let l1 = b.build_load(IrType::I32, IrValue::Arg(0));
        let l2 = b.build_load(IrType::I32, IrValue::Arg(0));
        b.build_return(None);
        if let Some(IrInstruction::Load { align, .. }) = b
            .function_mut()
            .and_then(|func| func.instruction_mut(l2.as_inst().unwrap()))
        {
            *align = Some(16);
        }
        let func = module.function(f).unwrap();
        assert!(values_match(&module, func, l1, l2, false));
        assert!(!values_match(&module, func, l1, l2, true));
    }

    #[test]
    fn test_struct_gep_indices_must_agree() {
        let (mut module, f) = function_with(vec![IrType::Ptr]);
        let pair = IrType::Struct(vec![IrType::I32, IrType::I32]);
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let zero = b.const_int(IrType::I32, 0);
        let one = b.const_int(IrType::I32, 1);
        let g0 = b.build_gep(pair.clone(), IrValue::Arg(0), vec![zero, zero]);
        let g1 = b.build_gep(pair.clone(), IrValue::Arg(0), vec![one, zero]);
        let g2 = b.build_gep(pair, IrValue::Arg(0), vec![zero, one]);
        b.build_return(None);
        let func = module.function(f).unwrap();
        let inst = |v: IrValue| func.instruction(v.as_inst().unwrap()).unwrap();
        assert!(values_match(&module, func, g0, g1, false));
        assert!(!values_match(&module, func, g0, g2, false));
        assert_eq!(
            gep_type_before_last(&module, inst(g0), inst(g2)),
            Some(IrType::Struct(vec![IrType::I32, IrType::I32]))
        );
    }

    #[test]
    fn test_or_as_add_on_induction_variable() {
        let (mut module, f) = function_with(vec![]);
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        b.position_at_end(entry);
        b.build_br(body);
        b.position_at_end(body);
        let i = b.build_phi(IrType::I64);
        let zero = b.const_int(IrType::I64, 0);
        let four = b.const_int(IrType::I64, 4);
        let three = b.const_int(IrType::I64, 3);
        let five = b.const_int(IrType::I64, 5);
        let or3 = b.build_binop(BinaryOp::Or, i, three);
        let or5 = b.build_binop(BinaryOp::Or, i, five);
        let next = b.build_binop(BinaryOp::Add, i, four);
        let cond = b.build_cmp(CompareOp::Ne, next, five);
        b.build_cond_br(cond, body, exit);
        b.add_incoming(i, zero, entry);
        b.add_incoming(i, next, body);
        b.position_at_end(exit);
        b.build_return(None);

        let func = module.function(f).unwrap();
        let oracle = InductionStrideOracle::new();
        let inst = |v: IrValue| func.instruction(v.as_inst().unwrap()).unwrap();
        assert!(is_equivalent_op(&module, func, &oracle, inst(or3), BinaryOp::Add));
        assert!(!is_equivalent_op(&module, func, &oracle, inst(or5), BinaryOp::Add));
        assert!(is_equivalent_op(&module, func, &oracle, inst(or5), BinaryOp::Or));
    }

    #[test]
    fn test_neutral_elements_and_ordering() {
        let (mut module, f) = function_with(vec![IrType::I32]);
        intern_neutral_elements(&mut module);
        assert_eq!(
            module.int_value(sequence_neutral(&module, BinaryOp::And, &IrType::I8).unwrap()),
            Some(-1)
        );
        assert!(sequence_neutral(&module, BinaryOp::Shl, &IrType::I32).is_none());
        assert!(reduction_neutral(&module, BinaryOp::FMul, &IrType::F64).is_some());

        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let seven = b.const_int(IrType::I32, 7);
        let x = b.build_binop(BinaryOp::Add, IrValue::Arg(0), seven);
        let y = b.build_binop(BinaryOp::Mul, IrValue::Arg(0), seven);
        b.build_return(None);
        let three = module.constants.int(IrType::I32, 3);
        let func = module.function(f).unwrap();
        let mut values = vec![IrValue::Arg(0), y, seven, x, three];
        reorder_operands(&module, func, &mut values, entry);
        assert_eq!(values, vec![x, y, three, seven, IrValue::Arg(0)]);
    }
}
