//! IR Modules
//!
//! The module is the top-level unit: functions, global variables and the
//! constant pool. It also answers the value-level queries that need more than
//! one function's worth of information (types of constants and globals,
//! callee attributes, underlying objects).

use super::{
    ConstExprOp, ConstantPool, IrConstant, IrFunction, IrFunctionId, IrFunctionSignature,
    IrGlobalId, IrId, IrInstruction, IrType, IrValue, CastOp, MemoryEffects,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Maximum number of pointer hops when looking for an underlying object
const MAX_UNDERLYING_LOOKUP: usize = 6;

/// IR module - represents a compilation unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrModule {
    /// Module name
    pub name: String,

    /// Functions, defined and declared
    pub functions: IndexMap<IrFunctionId, IrFunction>,

    /// Global variables
    pub globals: IndexMap<IrGlobalId, IrGlobal>,

    /// Uniqued constants
    pub constants: ConstantPool,

    /// Next available IDs
    pub next_function_id: u32,
    pub next_global_id: u32,
}

/// Linkage type for symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    /// Private to the module
    Private,
    /// Publicly exported
    Public,
    /// External symbol (defined elsewhere)
    External,
}

/// Global variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrGlobal {
    pub id: IrGlobalId,
    pub name: String,
    /// Type of the stored value
    pub ty: IrType,
    pub initializer: Option<IrValue>,
    /// Read-only after initialization
    pub constant: bool,
    pub linkage: Linkage,
}

impl IrModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: IndexMap::new(),
            globals: IndexMap::new(),
            constants: ConstantPool::new(),
            next_function_id: 0,
            next_global_id: 0,
        }
    }

    /// Parse a module from its JSON form
    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("Failed to parse module: {}", e))
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("Failed to serialize module: {}", e))
    }

    // === Functions ===

    /// Add a function without a body
    pub fn declare_function(&mut self, name: impl Into<String>, signature: IrFunctionSignature) -> IrFunctionId {
        let id = IrFunctionId(self.next_function_id);
        self.next_function_id += 1;
        self.functions
            .insert(id, IrFunction::new(id, name.into(), signature));
        id
    }

    pub fn function(&self, id: IrFunctionId) -> Option<&IrFunction> {
        self.functions.get(&id)
    }

    pub fn function_mut(&mut self, id: IrFunctionId) -> Option<&mut IrFunction> {
        self.functions.get_mut(&id)
    }

    pub fn function_by_name(&self, name: &str) -> Option<&IrFunction> {
        self.functions.values().find(|f| f.name == name)
    }

    /// Ids of functions that have a body
    pub fn defined_functions(&self) -> Vec<IrFunctionId> {
        self.functions
            .values()
            .filter(|f| !f.is_declaration())
            .map(|f| f.id)
            .collect()
    }

    // === Globals ===

    pub fn add_global(
        &mut self,
        name: impl Into<String>,
        ty: IrType,
        initializer: Option<IrValue>,
        constant: bool,
    ) -> IrGlobalId {
        let id = IrGlobalId(self.next_global_id);
        self.next_global_id += 1;
        self.globals.insert(
            id,
            IrGlobal {
                id,
                name: name.into(),
                ty,
                initializer,
                constant,
                linkage: if constant {
                    Linkage::Private
                } else {
                    Linkage::Public
                },
            },
        );
        id
    }

    pub fn remove_global(&mut self, id: IrGlobalId) {
        self.globals.shift_remove(&id);
    }

    pub fn global(&self, id: IrGlobalId) -> Option<&IrGlobal> {
        self.globals.get(&id)
    }

    // === Value queries ===

    /// Type of any value as seen from `func`
    pub fn value_type(&self, func: &IrFunction, value: IrValue) -> IrType {
        match value {
            IrValue::Inst(id) => func.inst_type(id),
            IrValue::Arg(n) => func.param_type(n),
            IrValue::Const(c) => self
                .constants
                .get(c)
                .map(|c| c.ty())
                .unwrap_or(IrType::Void),
            IrValue::Global(_) | IrValue::Function(_) => IrType::Ptr,
            IrValue::Block(_) => IrType::Label,
        }
    }

    pub fn constant(&self, value: IrValue) -> Option<&IrConstant> {
        self.constants.get(value.as_const()?)
    }

    pub fn int_value(&self, value: IrValue) -> Option<i64> {
        self.constants.int_value(value)
    }

    /// Plain literal (not a constant expression, global or function)
    pub fn is_literal(&self, value: IrValue) -> bool {
        matches!(
            self.constant(value),
            Some(c) if c.as_expr().is_none()
        )
    }

    pub fn is_const_expr(&self, value: IrValue) -> bool {
        self.constants.const_expr(value).is_some()
    }

    /// The function called directly by a call instruction
    pub fn direct_callee(&self, inst: &IrInstruction) -> Option<&IrFunction> {
        match inst {
            IrInstruction::Call {
                callee: IrValue::Function(f),
                ..
            } => self.function(*f),
            _ => None,
        }
    }

    /// Memory behaviour of an instruction, including what its callee does
    pub fn memory_effects(&self, func: &IrFunction, id: IrId) -> MemoryEffects {
        let Some(inst) = func.instruction(id) else {
            return MemoryEffects::None;
        };
        let callee = self
            .direct_callee(inst)
            .map(|f| f.attributes.memory)
            .unwrap_or(MemoryEffects::ReadWrite);
        inst.memory_effects(callee)
    }

    pub fn may_read_or_write_memory(&self, func: &IrFunction, id: IrId) -> bool {
        self.memory_effects(func, id) != MemoryEffects::None
    }

    /// Writes memory or may unwind
    pub fn may_have_side_effects(&self, func: &IrFunction, id: IrId) -> bool {
        if self.memory_effects(func, id).may_write() {
            return true;
        }
        match func.instruction(id) {
            Some(inst @ IrInstruction::Call { .. }) => !self
                .direct_callee(inst)
                .is_some_and(|f| f.attributes.nounwind),
            Some(IrInstruction::Load { volatile: true, .. }) => true,
            _ => false,
        }
    }

    /// Strip pointer offsets and bitcasts to find the object a pointer is
    /// based on
    pub fn underlying_object(&self, func: &IrFunction, mut value: IrValue) -> IrValue {
        for _ in 0..MAX_UNDERLYING_LOOKUP {
            let next = match value {
                IrValue::Inst(id) => match func.instruction(id) {
                    Some(IrInstruction::GetElementPtr { ptr, .. }) => *ptr,
                    Some(IrInstruction::Cast {
                        op: CastOp::BitCast,
                        value,
                    }) => *value,
                    _ => return value,
                },
                IrValue::Const(_) => match self.constants.const_expr(value) {
                    Some(expr) => match expr.op {
                        ConstExprOp::GetElementPtr { .. } | ConstExprOp::Cast(CastOp::BitCast) => {
                            match expr.operands.first() {
                                Some(op) => *op,
                                None => return value,
                            }
                        }
                        _ => return value,
                    },
                    None => return value,
                },
                _ => return value,
            };
            value = next;
        }
        value
    }

    /// Stored value type behind a pointer-valued global
    pub fn global_value_type(&self, value: IrValue) -> Option<&IrType> {
        match value {
            IrValue::Global(g) => self.global(g).map(|g| &g.ty),
            _ => None,
        }
    }
}
