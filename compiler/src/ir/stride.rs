//! Stride Oracle
//!
//! Answers whether a value is an affine recurrence `{start,+,step}` with
//! constant start and step. The rolling pattern matcher only uses it to
//! recognise `or`s that behave like `add`s on induction variables.

use super::{BinaryOp, IrFunction, IrInstruction, IrModule, IrValue};

/// Constant-start, constant-step recurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffineRecurrence {
    pub start: i64,
    pub step: i64,
}

/// Source of stride facts about values
pub trait StrideOracle {
    fn affine_recurrence(
        &self,
        module: &IrModule,
        function: &IrFunction,
        value: IrValue,
    ) -> Option<AffineRecurrence>;
}

/// Recognises the phi of a simple counted loop:
/// `%i = phi [C0, outside], [%next, latch]` with `%next = add %i, C1`
/// (or `sub %i, C1`).
#[derive(Debug, Clone, Copy, Default)]
pub struct InductionStrideOracle;

impl InductionStrideOracle {
    pub fn new() -> Self {
        Self
    }
}

impl StrideOracle for InductionStrideOracle {
    fn affine_recurrence(
        &self,
        module: &IrModule,
        function: &IrFunction,
        value: IrValue,
    ) -> Option<AffineRecurrence> {
        let phi_id = value.as_inst()?;
        let IrInstruction::Phi { incoming } = function.instruction(phi_id)? else {
            return None;
        };
        if incoming.len() != 2 {
            return None;
        }

        let mut start = None;
        let mut step = None;
        for &(v, _) in incoming {
            if let Some(c) = module.int_value(v) {
                start = Some(c);
                continue;
            }
            let next = v.as_inst().and_then(|id| function.instruction(id))?;
            let IrInstruction::BinOp { op, left, right } = next else {
                return None;
            };
            let delta = match (*op, *left == value, *right == value) {
                (BinaryOp::Add, true, _) => module.int_value(*right)?,
                (BinaryOp::Add, _, true) => module.int_value(*left)?,
                (BinaryOp::Sub, true, _) => module.int_value(*right)?.wrapping_neg(),
                _ => return None,
            };
            step = Some(delta);
        }

        Some(AffineRecurrence {
            start: start?,
            step: step?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, IrFunctionSignature, IrType};

    #[test]
    fn test_counted_loop_phi() {
        let mut module = IrModule::new("m");
        let f = module.declare_function("f", IrFunctionSignature::new(vec![], IrType::Void));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        let header = b.create_block("header");
        let exit = b.create_block("exit");
        b.position_at_end(entry);
        b.build_br(header);
        b.position_at_end(header);
        let phi = b.build_phi(IrType::I32);
        let four = b.const_int(IrType::I32, 4);
        let zero = b.const_int(IrType::I32, 0);
        let next = b.build_binop(BinaryOp::Add, phi, four);
        let limit = b.const_int(IrType::I32, 64);
        let cond = b.build_cmp(crate::ir::CompareOp::SLt, next, limit);
        b.build_cond_br(cond, header, exit);
        b.add_incoming(phi, zero, entry);
        b.add_incoming(phi, next, header);
        b.position_at_end(exit);
        b.build_return(None);

        let func = module.function(f).unwrap();
        let oracle = InductionStrideOracle::new();
        assert_eq!(
            oracle.affine_recurrence(&module, func, phi),
            Some(AffineRecurrence { start: 0, step: 4 })
        );
        assert_eq!(oracle.affine_recurrence(&module, func, next), None);
    }
}
