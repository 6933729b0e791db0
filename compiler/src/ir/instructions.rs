//! IR Instructions
//!
//! Defines the instruction set for the intermediate representation.
//! Every instruction exposes its operands positionally through `operands()` and
//! `set_operand()`, which is what the rolling alignment walks.

use super::{IrBlockId, IrType, IrValue};
use serde::{Deserialize, Serialize};

/// IR instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrInstruction {
    // === Arithmetic Operations ===

    /// Binary arithmetic operation
    BinOp {
        op: BinaryOp,
        left: IrValue,
        right: IrValue,
    },

    /// Compare operation, produces a Bool
    Cmp {
        op: CompareOp,
        left: IrValue,
        right: IrValue,
    },

    /// Value conversion
    Cast { op: CastOp, value: IrValue },

    /// Choose between two values
    Select {
        condition: IrValue,
        true_value: IrValue,
        false_value: IrValue,
    },

    // === Memory Operations ===

    /// Load value from memory
    Load {
        ptr: IrValue,
        align: Option<u32>,
        volatile: bool,
    },

    /// Store value to memory
    Store {
        value: IrValue,
        ptr: IrValue,
        align: Option<u32>,
        volatile: bool,
    },

    /// Pointer arithmetic over an element type
    GetElementPtr {
        source_ty: IrType,
        ptr: IrValue,
        indices: Vec<IrValue>,
    },

    /// Stack allocation of `count` elements
    Alloca { allocated_ty: IrType, count: IrValue },

    // === Function Calls ===

    /// Call through a function value (direct when `callee` is a `Function`)
    Call { callee: IrValue, args: Vec<IrValue> },

    // === SSA ===

    /// Merge values flowing in from predecessors
    Phi { incoming: Vec<(IrValue, IrBlockId)> },

    // === Terminators ===

    /// Unconditional jump
    Branch { target: IrBlockId },

    /// Two-way branch on a Bool
    CondBranch {
        condition: IrValue,
        true_target: IrBlockId,
        false_target: IrBlockId,
    },

    /// Return from function
    Return { value: Option<IrValue> },

    /// Unreachable code
    Unreachable,
}

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinaryOp {
    // Integer arithmetic
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,

    // Bitwise
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,

    // Floating point
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

/// Comparison predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompareOp {
    // Integer comparisons
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,

    // Unsigned comparisons
    ULt,
    ULe,
    UGt,
    UGe,

    // Ordered floating point comparisons
    FEq,
    FNe,
    FLt,
    FLe,
    FGt,
    FGe,
}

/// Conversion operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FPToSI,
    FPToUI,
    SIToFP,
    UIToFP,
    FPTrunc,
    FPExt,
    PtrToInt,
    IntToPtr,
    BitCast,
}

/// Operation identity used when deciding whether two instructions do the
/// same thing. The operator or predicate is part of the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    BinOp(BinaryOp),
    Cmp(CompareOp),
    Cast(CastOp),
    Select,
    Load,
    Store,
    GetElementPtr,
    Alloca,
    Call,
    Phi,
    Branch,
    CondBranch,
    Return,
    Unreachable,
}

/// What an instruction or callee may do to memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemoryEffects {
    /// Does not touch memory
    None,
    /// Only reads memory
    ReadOnly,
    /// Only writes memory
    WriteOnly,
    /// Arbitrary access
    #[default]
    ReadWrite,
}

impl MemoryEffects {
    pub fn may_read(&self) -> bool {
        matches!(self, MemoryEffects::ReadOnly | MemoryEffects::ReadWrite)
    }

    pub fn may_write(&self) -> bool {
        matches!(self, MemoryEffects::WriteOnly | MemoryEffects::ReadWrite)
    }
}

impl BinaryOp {
    /// Operand order does not matter
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
                | BinaryOp::FAdd
                | BinaryOp::FMul
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv | BinaryOp::FRem
        )
    }

    /// Lowercase mnemonic
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::UDiv => "udiv",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::URem => "urem",
            BinaryOp::SRem => "srem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
            BinaryOp::FAdd => "fadd",
            BinaryOp::FSub => "fsub",
            BinaryOp::FMul => "fmul",
            BinaryOp::FDiv => "fdiv",
            BinaryOp::FRem => "frem",
        }
    }
}

impl CompareOp {
    pub fn name(&self) -> &'static str {
        match self {
            CompareOp::Eq => "icmp eq",
            CompareOp::Ne => "icmp ne",
            CompareOp::SLt => "icmp slt",
            CompareOp::SLe => "icmp sle",
            CompareOp::SGt => "icmp sgt",
            CompareOp::SGe => "icmp sge",
            CompareOp::ULt => "icmp ult",
            CompareOp::ULe => "icmp ule",
            CompareOp::UGt => "icmp ugt",
            CompareOp::UGe => "icmp uge",
            CompareOp::FEq => "fcmp oeq",
            CompareOp::FNe => "fcmp one",
            CompareOp::FLt => "fcmp olt",
            CompareOp::FLe => "fcmp ole",
            CompareOp::FGt => "fcmp ogt",
            CompareOp::FGe => "fcmp oge",
        }
    }

    /// `<` or `<=` in any domain
    pub fn is_less_than(&self) -> bool {
        matches!(
            self,
            CompareOp::SLt
                | CompareOp::SLe
                | CompareOp::ULt
                | CompareOp::ULe
                | CompareOp::FLt
                | CompareOp::FLe
        )
    }

    /// `>` or `>=` in any domain
    pub fn is_greater_than(&self) -> bool {
        matches!(
            self,
            CompareOp::SGt
                | CompareOp::SGe
                | CompareOp::UGt
                | CompareOp::UGe
                | CompareOp::FGt
                | CompareOp::FGe
        )
    }
}

impl CastOp {
    pub fn name(&self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::FPToSI => "fptosi",
            CastOp::FPToUI => "fptoui",
            CastOp::SIToFP => "sitofp",
            CastOp::UIToFP => "uitofp",
            CastOp::FPTrunc => "fptrunc",
            CastOp::FPExt => "fpext",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
            CastOp::BitCast => "bitcast",
        }
    }
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::BinOp(op) => op.name(),
            Opcode::Cmp(op) => op.name(),
            Opcode::Cast(op) => op.name(),
            Opcode::Select => "select",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::GetElementPtr => "getelementptr",
            Opcode::Alloca => "alloca",
            Opcode::Call => "call",
            Opcode::Phi => "phi",
            Opcode::Branch | Opcode::CondBranch => "br",
            Opcode::Return => "ret",
            Opcode::Unreachable => "unreachable",
        }
    }
}

impl IrInstruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            IrInstruction::BinOp { op, .. } => Opcode::BinOp(*op),
            IrInstruction::Cmp { op, .. } => Opcode::Cmp(*op),
            IrInstruction::Cast { op, .. } => Opcode::Cast(*op),
            IrInstruction::Select { .. } => Opcode::Select,
            IrInstruction::Load { .. } => Opcode::Load,
            IrInstruction::Store { .. } => Opcode::Store,
            IrInstruction::GetElementPtr { .. } => Opcode::GetElementPtr,
            IrInstruction::Alloca { .. } => Opcode::Alloca,
            IrInstruction::Call { .. } => Opcode::Call,
            IrInstruction::Phi { .. } => Opcode::Phi,
            IrInstruction::Branch { .. } => Opcode::Branch,
            IrInstruction::CondBranch { .. } => Opcode::CondBranch,
            IrInstruction::Return { .. } => Opcode::Return,
            IrInstruction::Unreachable => Opcode::Unreachable,
        }
    }

    /// Operands in positional order. Calls list the callee last; branches list
    /// their targets as block values.
    pub fn operands(&self) -> Vec<IrValue> {
        match self {
            IrInstruction::BinOp { left, right, .. } | IrInstruction::Cmp { left, right, .. } => {
                vec![*left, *right]
            }
            IrInstruction::Cast { value, .. } => vec![*value],
            IrInstruction::Select {
                condition,
                true_value,
                false_value,
            } => vec![*condition, *true_value, *false_value],
            IrInstruction::Load { ptr, .. } => vec![*ptr],
            IrInstruction::Store { value, ptr, .. } => vec![*value, *ptr],
            IrInstruction::GetElementPtr { ptr, indices, .. } => {
                let mut ops = Vec::with_capacity(indices.len() + 1);
                ops.push(*ptr);
                ops.extend(indices.iter().copied());
                ops
            }
            IrInstruction::Alloca { count, .. } => vec![*count],
            IrInstruction::Call { callee, args } => {
                let mut ops = args.clone();
                ops.push(*callee);
                ops
            }
            IrInstruction::Phi { incoming } => incoming.iter().map(|(v, _)| *v).collect(),
            IrInstruction::Branch { target } => vec![IrValue::Block(*target)],
            IrInstruction::CondBranch {
                condition,
                true_target,
                false_target,
            } => vec![
                *condition,
                IrValue::Block(*true_target),
                IrValue::Block(*false_target),
            ],
            IrInstruction::Return { value } => value.iter().copied().collect(),
            IrInstruction::Unreachable => Vec::new(),
        }
    }

    pub fn num_operands(&self) -> usize {
        match self {
            IrInstruction::BinOp { .. } | IrInstruction::Cmp { .. } => 2,
            IrInstruction::Cast { .. } | IrInstruction::Load { .. } => 1,
            IrInstruction::Select { .. } => 3,
            IrInstruction::Store { .. } => 2,
            IrInstruction::GetElementPtr { indices, .. } => indices.len() + 1,
            IrInstruction::Alloca { .. } => 1,
            IrInstruction::Call { args, .. } => args.len() + 1,
            IrInstruction::Phi { incoming } => incoming.len(),
            IrInstruction::Branch { .. } => 1,
            IrInstruction::CondBranch { .. } => 3,
            IrInstruction::Return { value } => usize::from(value.is_some()),
            IrInstruction::Unreachable => 0,
        }
    }

    pub fn operand(&self, index: usize) -> Option<IrValue> {
        self.operands().get(index).copied()
    }

    /// Replace the operand at `index`. Returns false when the position does
    /// not exist or a block slot is given a non-block value.
    pub fn set_operand(&mut self, index: usize, new: IrValue) -> bool {
        let slot: &mut IrValue = match self {
            IrInstruction::BinOp { left, right, .. } | IrInstruction::Cmp { left, right, .. } => {
                match index {
                    0 => left,
                    1 => right,
                    _ => return false,
                }
            }
            IrInstruction::Cast { value, .. } if index == 0 => value,
            IrInstruction::Select {
                condition,
                true_value,
                false_value,
            } => match index {
                0 => condition,
                1 => true_value,
                2 => false_value,
                _ => return false,
            },
            IrInstruction::Load { ptr, .. } if index == 0 => ptr,
            IrInstruction::Store { value, ptr, .. } => match index {
                0 => value,
                1 => ptr,
                _ => return false,
            },
            IrInstruction::GetElementPtr { ptr, indices, .. } => {
                if index == 0 {
                    ptr
                } else if let Some(idx) = indices.get_mut(index - 1) {
                    idx
                } else {
                    return false;
                }
            }
            IrInstruction::Alloca { count, .. } if index == 0 => count,
            IrInstruction::Call { callee, args } => {
                if index == args.len() {
                    callee
                } else if let Some(arg) = args.get_mut(index) {
                    arg
                } else {
                    return false;
                }
            }
            IrInstruction::Phi { incoming } => match incoming.get_mut(index) {
                Some((value, _)) => value,
                None => return false,
            },
            IrInstruction::Branch { target } if index == 0 => {
                return match new.as_block() {
                    Some(block) => {
                        *target = block;
                        true
                    }
                    None => false,
                };
            }
            IrInstruction::CondBranch {
                condition,
                true_target,
                false_target,
            } => match index {
                0 => condition,
                1 | 2 => {
                    let Some(block) = new.as_block() else {
                        return false;
                    };
                    if index == 1 {
                        *true_target = block;
                    } else {
                        *false_target = block;
                    }
                    return true;
                }
                _ => return false,
            },
            IrInstruction::Return { value: Some(value) } if index == 0 => value,
            _ => return false,
        };
        *slot = new;
        true
    }

    /// Replace every use of `old` with `new`, returning the number of rewrites
    pub fn replace_uses(&mut self, old: IrValue, new: IrValue) -> usize {
        let ops = self.operands();
        let mut count = 0;
        for (i, op) in ops.iter().enumerate() {
            if *op == old && self.set_operand(i, new) {
                count += 1;
            }
        }
        count
    }

    /// Check if this is a terminator instruction
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            IrInstruction::Branch { .. }
                | IrInstruction::CondBranch { .. }
                | IrInstruction::Return { .. }
                | IrInstruction::Unreachable
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, IrInstruction::Phi { .. })
    }

    /// Successor blocks of a terminator
    pub fn successors(&self) -> Vec<IrBlockId> {
        match self {
            IrInstruction::Branch { target } => vec![*target],
            IrInstruction::CondBranch {
                true_target,
                false_target,
                ..
            } => vec![*true_target, *false_target],
            _ => Vec::new(),
        }
    }

    /// Memory behaviour, given the effects of the callee for calls
    pub fn memory_effects(&self, callee: MemoryEffects) -> MemoryEffects {
        match self {
            IrInstruction::Load { volatile, .. } => {
                if *volatile {
                    MemoryEffects::ReadWrite
                } else {
                    MemoryEffects::ReadOnly
                }
            }
            IrInstruction::Store { .. } => MemoryEffects::WriteOnly,
            IrInstruction::Call { .. } => callee,
            _ => MemoryEffects::None,
        }
    }

    /// Rewrite the incoming block of phi entries
    pub fn replace_incoming_block(&mut self, old: IrBlockId, new: IrBlockId) {
        if let IrInstruction::Phi { incoming } = self {
            for (_, block) in incoming.iter_mut() {
                if *block == old {
                    *block = new;
                }
            }
        }
    }

    /// Rewrite a successor of a terminator
    pub fn replace_successor(&mut self, old: IrBlockId, new: IrBlockId) {
        match self {
            IrInstruction::Branch { target } if *target == old => *target = new,
            IrInstruction::CondBranch {
                true_target,
                false_target,
                ..
            } => {
                if *true_target == old {
                    *true_target = new;
                }
                if *false_target == old {
                    *false_target = new;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBlockId, IrId};

    fn reg(n: u32) -> IrValue {
        IrValue::Inst(IrId::new(n))
    }

    #[test]
    fn test_instruction_properties() {
        let add = IrInstruction::BinOp {
            op: BinaryOp::Add,
            left: reg(2),
            right: reg(3),
        };

        assert_eq!(add.operands(), vec![reg(2), reg(3)]);
        assert_eq!(add.opcode(), Opcode::BinOp(BinaryOp::Add));
        assert!(!add.is_terminator());
        assert_eq!(add.memory_effects(MemoryEffects::ReadWrite), MemoryEffects::None);

        let ret = IrInstruction::Return { value: Some(reg(1)) };
        assert!(ret.is_terminator());
        assert_eq!(ret.operands(), vec![reg(1)]);
    }

    #[test]
    fn test_call_operand_order() {
        let mut call = IrInstruction::Call {
            callee: IrValue::Function(crate::ir::IrFunctionId(4)),
            args: vec![reg(1), reg(2)],
        };
        assert_eq!(call.num_operands(), 3);
        assert_eq!(
            call.operand(2),
            Some(IrValue::Function(crate::ir::IrFunctionId(4)))
        );
        assert!(call.set_operand(1, reg(9)));
        assert_eq!(call.operand(1), Some(reg(9)));
        assert!(!call.set_operand(5, reg(9)));
    }

    #[test]
    fn test_branch_targets_are_operands() {
        let mut br = IrInstruction::CondBranch {
            condition: reg(1),
            true_target: IrBlockId::new(1),
            false_target: IrBlockId::new(2),
        };
        assert!(br.set_operand(2, IrValue::Block(IrBlockId::new(7))));
        assert!(!br.set_operand(1, reg(3)));
        assert_eq!(br.successors(), vec![IrBlockId::new(1), IrBlockId::new(7)]);
    }

    #[test]
    fn test_replace_uses() {
        let mut store = IrInstruction::Store {
            value: reg(1),
            ptr: reg(1),
            align: None,
            volatile: false,
        };
        assert_eq!(store.replace_uses(reg(1), reg(5)), 2);
        assert_eq!(store.operands(), vec![reg(5), reg(5)]);
    }
}
