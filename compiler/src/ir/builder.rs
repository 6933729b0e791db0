//! IR Builder
//!
//! This module provides a builder interface for constructing IR in a convenient way.
//! The builder keeps an insertion point (end of a block, or right before an
//! existing instruction) and computes result types from the operands.

use tracing::debug;

use super::{
    BinaryOp, CastOp, CompareOp, IrBlockId, IrFunction, IrFunctionId, IrGlobalId, IrId,
    IrInstruction, IrModule, IrType, IrValue,
};

/// Builder for instructions inside one function of a module
pub struct IrBuilder<'m> {
    /// The module being edited
    pub module: &'m mut IrModule,

    /// Function receiving new instructions
    func: IrFunctionId,

    /// Current block being built
    block: Option<IrBlockId>,

    /// Insert before this instruction instead of appending
    before: Option<IrId>,
}

impl<'m> IrBuilder<'m> {
    /// Create a builder for `func`
    pub fn new(module: &'m mut IrModule, func: IrFunctionId) -> Self {
        Self {
            module,
            func,
            block: None,
            before: None,
        }
    }

    pub fn function_id(&self) -> IrFunctionId {
        self.func
    }

    /// The function being built
    pub fn function(&self) -> Option<&IrFunction> {
        self.module.function(self.func)
    }

    pub fn function_mut(&mut self) -> Option<&mut IrFunction> {
        self.module.function_mut(self.func)
    }

    // === Block Building ===

    /// Append a new labelled block to the function
    pub fn create_block(&mut self, label: &str) -> IrBlockId {
        match self.module.function_mut(self.func) {
            Some(f) => f.create_block(Some(label)),
            None => IrBlockId::new(u32::MAX),
        }
    }

    /// Append subsequent instructions to the end of `block`
    pub fn position_at_end(&mut self, block: IrBlockId) {
        self.block = Some(block);
        self.before = None;
    }

    /// Insert subsequent instructions right before `inst`
    pub fn position_before(&mut self, inst: IrId) {
        self.block = self.function().and_then(|f| f.parent(inst));
        self.before = Some(inst);
    }

    /// Current block being built
    pub fn current_block(&self) -> Option<IrBlockId> {
        self.block
    }

    // === Constants ===

    pub fn const_int(&mut self, ty: IrType, value: i64) -> IrValue {
        self.module.constants.int(ty, value)
    }

    pub fn const_float(&mut self, ty: IrType, value: f64) -> IrValue {
        self.module.constants.float(ty, value)
    }

    pub fn const_null(&mut self) -> IrValue {
        self.module.constants.null()
    }

    pub fn undef(&mut self, ty: IrType) -> IrValue {
        self.module.constants.undef(ty)
    }

    /// Private read-only global initialized with a constant array
    pub fn global_constant_array(&mut self, elem_ty: IrType, elements: Vec<IrValue>) -> IrGlobalId {
        let len = elements.len() as u64;
        let init = self.module.constants.array(elem_ty.clone(), elements);
        let name = format!("rolled.table.{}", self.module.next_global_id);
        self.module
            .add_global(name, IrType::array(elem_ty, len), Some(init), true)
    }

    pub fn type_of(&self, value: IrValue) -> IrType {
        match self.function() {
            Some(f) => self.module.value_type(f, value),
            None => IrType::Void,
        }
    }

    // === Instruction Building ===

    /// Insert an instruction at the insertion point
    pub fn insert(&mut self, inst: IrInstruction, ty: IrType) -> IrValue {
        let (block, before) = (self.block, self.before);
        let Some(func) = self.module.function_mut(self.func) else {
            debug!("builder has no function {}", self.func);
            return IrValue::Inst(IrId::invalid());
        };
        let id = match (before, block) {
            (Some(before), _) if func.is_live(before) => func.insert_before(before, inst, ty),
            (_, Some(block)) => Some(func.append(block, inst, ty)),
            _ => None,
        };
        match id {
            Some(id) => IrValue::Inst(id),
            None => {
                debug!("builder has no insertion point");
                IrValue::Inst(IrId::invalid())
            }
        }
    }

    pub fn build_binop(&mut self, op: BinaryOp, left: IrValue, right: IrValue) -> IrValue {
        let ty = self.type_of(left);
        self.insert(IrInstruction::BinOp { op, left, right }, ty)
    }

    pub fn build_cmp(&mut self, op: CompareOp, left: IrValue, right: IrValue) -> IrValue {
        self.insert(IrInstruction::Cmp { op, left, right }, IrType::Bool)
    }

    pub fn build_cast(&mut self, op: CastOp, value: IrValue, ty: IrType) -> IrValue {
        self.insert(IrInstruction::Cast { op, value }, ty)
    }

    /// Integer cast choosing trunc/sext/no-op from the widths involved
    pub fn build_int_cast(&mut self, value: IrValue, ty: IrType) -> IrValue {
        let from = self.type_of(value);
        match (from.bit_width(), ty.bit_width()) {
            (Some(a), Some(b)) if a == b => value,
            (Some(a), Some(b)) if a > b => self.build_cast(CastOp::Trunc, value, ty),
            _ => self.build_cast(CastOp::SExt, value, ty),
        }
    }

    /// Integer cast for unsigned values: trunc, zext or no-op
    pub fn build_zext_or_trunc(&mut self, value: IrValue, ty: IrType) -> IrValue {
        let from = self.type_of(value);
        match (from.bit_width(), ty.bit_width()) {
            (Some(a), Some(b)) if a == b => value,
            (Some(a), Some(b)) if a > b => self.build_cast(CastOp::Trunc, value, ty),
            _ => self.build_cast(CastOp::ZExt, value, ty),
        }
    }

    pub fn build_select(&mut self, condition: IrValue, true_value: IrValue, false_value: IrValue) -> IrValue {
        let ty = self.type_of(true_value);
        self.insert(
            IrInstruction::Select {
                condition,
                true_value,
                false_value,
            },
            ty,
        )
    }

    pub fn build_load(&mut self, ty: IrType, ptr: IrValue) -> IrValue {
        self.insert(
            IrInstruction::Load {
                ptr,
                align: None,
                volatile: false,
            },
            ty,
        )
    }

    pub fn build_store(&mut self, value: IrValue, ptr: IrValue) -> IrValue {
        self.insert(
            IrInstruction::Store {
                value,
                ptr,
                align: None,
                volatile: false,
            },
            IrType::Void,
        )
    }

    pub fn build_gep(&mut self, source_ty: IrType, ptr: IrValue, indices: Vec<IrValue>) -> IrValue {
        self.insert(
            IrInstruction::GetElementPtr {
                source_ty,
                ptr,
                indices,
            },
            IrType::Ptr,
        )
    }

    pub fn build_alloca(&mut self, allocated_ty: IrType, count: IrValue) -> IrValue {
        self.insert(IrInstruction::Alloca { allocated_ty, count }, IrType::Ptr)
    }

    /// Call a function value; the result type comes from a direct callee
    pub fn build_call(&mut self, callee: IrValue, args: Vec<IrValue>) -> IrValue {
        let ty = match callee {
            IrValue::Function(f) => self
                .module
                .function(f)
                .map(|f| f.signature.return_type.clone())
                .unwrap_or(IrType::Void),
            _ => IrType::Void,
        };
        self.insert(IrInstruction::Call { callee, args }, ty)
    }

    /// Empty phi placed after the phis already at the top of the block
    pub fn build_phi(&mut self, ty: IrType) -> IrValue {
        let Some(block) = self.block else {
            return IrValue::Inst(IrId::invalid());
        };
        let Some(func) = self.module.function_mut(self.func) else {
            return IrValue::Inst(IrId::invalid());
        };
        let index = func.phis(block).len();
        let id = func.insert_at(block, index, IrInstruction::Phi { incoming: Vec::new() }, ty);
        IrValue::Inst(id)
    }

    pub fn add_incoming(&mut self, phi: IrValue, value: IrValue, block: IrBlockId) {
        let Some(id) = phi.as_inst() else { return };
        if let Some(IrInstruction::Phi { incoming }) =
            self.function_mut().and_then(|f| f.instruction_mut(id))
        {
            incoming.push((value, block));
        }
    }

    pub fn build_br(&mut self, target: IrBlockId) -> IrValue {
        self.insert(IrInstruction::Branch { target }, IrType::Void)
    }

    pub fn build_cond_br(&mut self, condition: IrValue, true_target: IrBlockId, false_target: IrBlockId) -> IrValue {
        self.insert(
            IrInstruction::CondBranch {
                condition,
                true_target,
                false_target,
            },
            IrType::Void,
        )
    }

    pub fn build_return(&mut self, value: Option<IrValue>) -> IrValue {
        self.insert(IrInstruction::Return { value }, IrType::Void)
    }

    pub fn build_unreachable(&mut self) -> IrValue {
        self.insert(IrInstruction::Unreachable, IrType::Void)
    }

    /// Give the last built value a name for dumps
    pub fn name_value(&mut self, value: IrValue, name: &str) {
        if let Some(id) = value.as_inst() {
            if let Some(func) = self.function_mut() {
                func.set_name(id, name);
            }
        }
    }
}
