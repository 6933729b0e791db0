//! IR Validation
//!
//! Structural checks run after every rolling attempt: each block ends in
//! exactly one terminator, phis sit at the top of their block, operands refer
//! to live definitions that dominate their uses, branch targets exist and phi
//! incoming blocks match the block's predecessors.

use super::dominance::DominatorTree;
use super::{IrBlockId, IrFunction, IrFunctionId, IrId, IrInstruction, IrModule, IrValue};
use std::collections::HashSet;
use std::fmt;

/// Validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub function: Option<IrFunctionId>,
    pub block: Option<IrBlockId>,
    pub instruction: Option<IrId>,
}

/// Types of validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationErrorKind {
    /// Block does not end in a terminator
    MissingTerminator,

    /// Terminator followed by more instructions
    UnreachableCode,

    /// Phi below a non-phi instruction
    MisplacedPhi,

    /// Operand refers to an erased or unknown value
    InvalidOperand { operand: IrValue },

    /// Definition does not dominate the use
    UseBeforeDefine { operand: IrValue },

    /// Branch to a block that does not exist
    InvalidControlFlow { target: IrBlockId },

    /// Phi incoming list disagrees with the predecessors
    InvalidPhiNode { reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(func) = self.function {
            write!(f, " in {}", func)?;
        }
        if let Some(block) = self.block {
            write!(f, " at {}", block)?;
        }
        if let Some(inst) = self.instruction {
            write!(f, " ({})", inst)?;
        }
        Ok(())
    }
}

struct ValidationContext<'a> {
    module: &'a IrModule,
    function: &'a IrFunction,
    domtree: DominatorTree,
    errors: Vec<ValidationError>,
}

impl<'a> ValidationContext<'a> {
    fn new(module: &'a IrModule, function: &'a IrFunction) -> Self {
        Self {
            module,
            function,
            domtree: DominatorTree::compute(function),
            errors: Vec::new(),
        }
    }

    fn add_error(&mut self, kind: ValidationErrorKind, block: IrBlockId, instruction: Option<IrId>) {
        self.errors.push(ValidationError {
            kind,
            function: Some(self.function.id),
            block: Some(block),
            instruction,
        });
    }

    /// `def` is available at the end of `block`, or right before `user`
    fn dominates_use(&self, def: IrId, block: IrBlockId, user: Option<IrId>) -> bool {
        let Some(def_block) = self.function.parent(def) else {
            return false;
        };
        if !self.domtree.is_reachable(block) {
            return true;
        }
        if def_block == block {
            return match user {
                Some(user) => self.function.comes_before(def, user),
                None => true,
            };
        }
        self.domtree.dominates(def_block, block)
    }

    fn check_value_exists(&mut self, value: IrValue, block: IrBlockId, inst: IrId) -> bool {
        let exists = match value {
            IrValue::Inst(id) => self.function.is_live(id),
            IrValue::Arg(n) => (n as usize) < self.function.signature.parameters.len(),
            IrValue::Const(c) => self.module.constants.get(c).is_some(),
            IrValue::Global(g) => self.module.global(g).is_some(),
            IrValue::Function(f) => self.module.function(f).is_some(),
            IrValue::Block(b) => self.function.block(b).is_some(),
        };
        if !exists {
            let kind = match value {
                IrValue::Block(target) => ValidationErrorKind::InvalidControlFlow { target },
                operand => ValidationErrorKind::InvalidOperand { operand },
            };
            self.add_error(kind, block, Some(inst));
        }
        exists
    }

    fn validate_block(&mut self, block: IrBlockId) {
        let function = self.function;
        let insts = function.block_instructions(block);

        match insts.last().and_then(|&i| function.instruction(i)) {
            Some(last) if last.is_terminator() => {}
            _ => self.add_error(ValidationErrorKind::MissingTerminator, block, None),
        }

        let mut seen_non_phi = false;
        for (i, &id) in insts.iter().enumerate() {
            let Some(inst) = function.instruction(id) else {
                continue;
            };

            if inst.is_terminator() && i + 1 < insts.len() {
                self.add_error(ValidationErrorKind::UnreachableCode, block, Some(id));
            }
            if inst.is_phi() {
                if seen_non_phi {
                    self.add_error(ValidationErrorKind::MisplacedPhi, block, Some(id));
                }
                self.validate_phi(block, id, inst);
                continue;
            }
            seen_non_phi = true;

            for op in inst.operands() {
                if !self.check_value_exists(op, block, id) {
                    continue;
                }
                if let IrValue::Inst(def) = op {
                    if !self.dominates_use(def, block, Some(id)) {
                        self.add_error(ValidationErrorKind::UseBeforeDefine { operand: op }, block, Some(id));
                    }
                }
            }
        }
    }

    fn validate_phi(&mut self, block: IrBlockId, id: IrId, inst: &IrInstruction) {
        let IrInstruction::Phi { incoming } = inst else {
            return;
        };
        let preds: HashSet<IrBlockId> = self.function.predecessors(block).into_iter().collect();
        let mut covered = HashSet::new();

        for &(value, from) in incoming {
            if !preds.contains(&from) {
                self.add_error(
                    ValidationErrorKind::InvalidPhiNode {
                        reason: format!("{} is not a predecessor", from),
                    },
                    block,
                    Some(id),
                );
                continue;
            }
            covered.insert(from);
            if !self.check_value_exists(value, block, id) {
                continue;
            }
            if let IrValue::Inst(def) = value {
                if !self.dominates_use(def, from, None) {
                    self.add_error(ValidationErrorKind::UseBeforeDefine { operand: value }, block, Some(id));
                }
            }
        }

        for pred in preds {
            if !covered.contains(&pred) {
                self.add_error(
                    ValidationErrorKind::InvalidPhiNode {
                        reason: format!("no incoming value for {}", pred),
                    },
                    block,
                    Some(id),
                );
            }
        }
    }
}

/// Validate one function
pub fn validate_function(module: &IrModule, function: &IrFunction) -> Result<(), Vec<ValidationError>> {
    let mut ctx = ValidationContext::new(module, function);
    for block in function.block_ids() {
        ctx.validate_block(block);
    }

    if ctx.errors.is_empty() {
        Ok(())
    } else {
        Err(ctx.errors)
    }
}

/// Validate every defined function of a module
pub fn validate_module(module: &IrModule) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    for function in module.functions.values() {
        if function.is_declaration() {
            continue;
        }
        if let Err(mut errs) = validate_function(module, function) {
            errors.append(&mut errs);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, CompareOp, IrBuilder, IrFunctionSignature, IrType};

    #[test]
    fn test_validate_simple_function() {
        let mut module = IrModule::new("m");
        let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::I32], IrType::I32));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        let then = b.create_block("then");
        let exit = b.create_block("exit");
        b.position_at_end(entry);
        let zero = b.const_int(IrType::I32, 0);
        let cond = b.build_cmp(CompareOp::SGt, IrValue::Arg(0), zero);
        b.build_cond_br(cond, then, exit);
        b.position_at_end(then);
        let neg = b.build_binop(BinaryOp::Sub, zero, IrValue::Arg(0));
        b.build_br(exit);
        b.position_at_end(exit);
        let phi = b.build_phi(IrType::I32);
        b.add_incoming(phi, IrValue::Arg(0), entry);
        b.add_incoming(phi, neg, then);
        b.build_return(Some(phi));

        assert!(validate_module(&module).is_ok());
    }

    #[test]
    fn test_missing_terminator_and_erased_operand() {
        let mut module = IrModule::new("m");
        let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::I32], IrType::I32));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let one = b.const_int(IrType::I32, 1);
        let add = b.build_binop(BinaryOp::Add, IrValue::Arg(0), one);
        let ret = b.build_return(Some(add));

        {
            let func = module.function_mut(f).unwrap();
            func.erase(add.as_inst().unwrap());
        }
        let errors = validate_module(&module).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ValidationErrorKind::InvalidOperand { .. })));

        module.function_mut(f).unwrap().erase(ret.as_inst().unwrap());
        let errors = validate_module(&module).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.kind == ValidationErrorKind::MissingTerminator));
    }

    #[test]
    fn test_use_before_define_in_block() {
        let mut module = IrModule::new("m");
        let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::I32], IrType::I32));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let one = b.const_int(IrType::I32, 1);
        let first = b.build_binop(BinaryOp::Add, IrValue::Arg(0), one);
        let second = b.build_binop(BinaryOp::Mul, first, one);
        let ret = b.build_return(Some(second));

        let func = module.function_mut(f).unwrap();
        func.move_before(second.as_inst().unwrap(), first.as_inst().unwrap());
        let _ = ret;
        let errors = validate_module(&module).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].kind,
            ValidationErrorKind::UseBeforeDefine { operand } if operand == first
        ));
    }

    #[test]
    fn test_phi_without_entry_for_predecessor() {
        let mut module = IrModule::new("m");
        let f = module.declare_function("f", IrFunctionSignature::new(vec![IrType::Bool], IrType::I32));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        let other = b.create_block("other");
        let exit = b.create_block("exit");
        b.position_at_end(entry);
        b.build_cond_br(IrValue::Arg(0), other, exit);
        b.position_at_end(other);
        b.build_br(exit);
        b.position_at_end(exit);
        let phi = b.build_phi(IrType::I32);
        let zero = b.const_int(IrType::I32, 0);
        b.add_incoming(phi, zero, entry);
        b.build_return(Some(phi));

        let errors = validate_module(&module).unwrap_err();
        assert!(matches!(errors[0].kind, ValidationErrorKind::InvalidPhiNode { .. }));
    }
}
