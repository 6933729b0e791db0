//! Constant Pool
//!
//! Literals and constant expressions are uniqued per module: interning the same
//! constant twice yields the same `ConstId`. Pattern matchers rely on this to
//! treat value identity as constant equality.

use super::{BinaryOp, CastOp, IrType, IrValue};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a constant in the module's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstId(pub u32);

impl fmt::Display for ConstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A compile-time constant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrConstant {
    /// Integer, stored sign-extended from its bit width
    Int { ty: IrType, value: i64 },

    /// Floating point value as raw bits (f32 values are widened to f64 bits)
    Float { ty: IrType, bits: u64 },

    /// Null pointer
    Null,

    /// Undefined value of a type
    Undef(IrType),

    /// Constant array (global initializers)
    Array { elem_ty: IrType, elements: Vec<IrValue> },

    /// Operation folded at compile time
    Expr(ConstExpr),
}

/// Constant expression: an instruction whose operands are all constants
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstExpr {
    pub op: ConstExprOp,
    pub ty: IrType,
    pub operands: Vec<IrValue>,
}

/// Operation performed by a constant expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstExprOp {
    /// operands = [pointer, indices...]
    GetElementPtr { source_ty: IrType },
    /// operands = [value]
    Cast(CastOp),
    /// operands = [left, right]
    BinOp(BinaryOp),
}

/// Sign-extend the low `width` bits of `value`
pub fn sext_to_width(value: i64, width: u32) -> i64 {
    if width >= 64 || width == 0 {
        value
    } else {
        let shift = 64 - width;
        (value << shift) >> shift
    }
}

/// Zero-extend the low `width` bits of `value`
pub fn zext_to_width(value: i64, width: u32) -> u64 {
    if width >= 64 {
        value as u64
    } else {
        (value as u64) & ((1u64 << width) - 1)
    }
}

impl IrConstant {
    /// Type of the constant
    pub fn ty(&self) -> IrType {
        match self {
            IrConstant::Int { ty, .. } | IrConstant::Float { ty, .. } => ty.clone(),
            IrConstant::Null => IrType::Ptr,
            IrConstant::Undef(ty) => ty.clone(),
            IrConstant::Array { elem_ty, elements } => {
                IrType::array(elem_ty.clone(), elements.len() as u64)
            }
            IrConstant::Expr(expr) => expr.ty.clone(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            IrConstant::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            IrConstant::Float { bits, .. } => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn as_expr(&self) -> Option<&ConstExpr> {
        match self {
            IrConstant::Expr(expr) => Some(expr),
            _ => None,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, IrConstant::Undef(_))
    }
}

/// Uniquing table of module constants
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantPool {
    constants: IndexSet<IrConstant>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a constant, returning the existing id when already present
    pub fn intern(&mut self, constant: IrConstant) -> ConstId {
        let (index, _) = self.constants.insert_full(constant);
        ConstId(index as u32)
    }

    /// Value of an already interned constant
    pub fn lookup(&self, constant: &IrConstant) -> Option<IrValue> {
        self.constants
            .get_index_of(constant)
            .map(|index| IrValue::Const(ConstId(index as u32)))
    }

    pub fn get(&self, id: ConstId) -> Option<&IrConstant> {
        self.constants.get_index(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Integer constant of the given type, normalized to the type's width
    pub fn int(&mut self, ty: IrType, value: i64) -> IrValue {
        let width = ty.bit_width().unwrap_or(64);
        let value = sext_to_width(value, width);
        IrValue::Const(self.intern(IrConstant::Int { ty, value }))
    }

    pub fn float(&mut self, ty: IrType, value: f64) -> IrValue {
        let value = if ty == IrType::F32 {
            value as f32 as f64
        } else {
            value
        };
        IrValue::Const(self.intern(IrConstant::Float {
            ty,
            bits: value.to_bits(),
        }))
    }

    pub fn null(&mut self) -> IrValue {
        IrValue::Const(self.intern(IrConstant::Null))
    }

    pub fn undef(&mut self, ty: IrType) -> IrValue {
        IrValue::Const(self.intern(IrConstant::Undef(ty)))
    }

    pub fn array(&mut self, elem_ty: IrType, elements: Vec<IrValue>) -> IrValue {
        IrValue::Const(self.intern(IrConstant::Array { elem_ty, elements }))
    }

    pub fn expr(&mut self, op: ConstExprOp, ty: IrType, operands: Vec<IrValue>) -> IrValue {
        IrValue::Const(self.intern(IrConstant::Expr(ConstExpr { op, ty, operands })))
    }

    /// Integer payload of a value, if it is an integer constant
    pub fn int_value(&self, value: IrValue) -> Option<i64> {
        self.get(value.as_const()?)?.as_int()
    }

    /// Constant expression behind a value, if any
    pub fn const_expr(&self, value: IrValue) -> Option<&ConstExpr> {
        self.get(value.as_const()?)?.as_expr()
    }
}
