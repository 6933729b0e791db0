//! IR Type System
//!
//! Defines the type system for the rolling IR. Integers are signless (the
//! operation decides how the bits are interpreted) and pointers are opaque,
//! so a pointer-offset instruction carries the element type it walks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// IR type representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IrType {
    /// Void type (no value)
    Void,

    /// One-bit integer used for comparisons and branch conditions
    Bool,

    /// Integer types
    I8,
    I16,
    I32,
    I64,

    /// Floating point types
    F32,
    F64,

    /// Opaque pointer
    Ptr,

    /// Array type with known length
    Array(Box<IrType>, u64),

    /// Literal structure type (fields laid out with natural alignment)
    Struct(Vec<IrType>),

    /// Basic block label
    Label,
}

impl IrType {
    /// Create an array type
    pub fn array(elem: IrType, len: u64) -> Self {
        IrType::Array(Box::new(elem), len)
    }

    /// Get the size of the type in bytes
    pub fn size(&self) -> u64 {
        match self {
            IrType::Void | IrType::Label => 0,
            IrType::Bool | IrType::I8 => 1,
            IrType::I16 => 2,
            IrType::I32 | IrType::F32 => 4,
            IrType::I64 | IrType::F64 | IrType::Ptr => 8,
            IrType::Array(elem, len) => elem.size() * len,
            IrType::Struct(fields) => {
                let mut offset = 0;
                for field in fields {
                    offset = align_to(offset, field.align()) + field.size();
                }
                align_to(offset, self.align())
            }
        }
    }

    /// Get the alignment requirement of the type
    pub fn align(&self) -> u64 {
        match self {
            IrType::Void | IrType::Label => 1,
            IrType::Bool | IrType::I8 => 1,
            IrType::I16 => 2,
            IrType::I32 | IrType::F32 => 4,
            IrType::I64 | IrType::F64 | IrType::Ptr => 8,
            IrType::Array(elem, _) => elem.align(),
            IrType::Struct(fields) => fields.iter().map(|f| f.align()).max().unwrap_or(1),
        }
    }

    /// Byte offset of a struct field
    pub fn field_offset(&self, index: usize) -> Option<u64> {
        let IrType::Struct(fields) = self else {
            return None;
        };
        if index >= fields.len() {
            return None;
        }
        let mut offset = 0;
        for (i, field) in fields.iter().enumerate() {
            offset = align_to(offset, field.align());
            if i == index {
                return Some(offset);
            }
            offset += field.size();
        }
        None
    }

    /// Type reached by indexing into an aggregate. Struct indices must be constants,
    /// so the caller passes the already-resolved field number.
    pub fn type_at_index(&self, index: Option<i64>) -> Option<IrType> {
        match self {
            IrType::Array(elem, _) => Some((**elem).clone()),
            IrType::Struct(fields) => {
                let index = usize::try_from(index?).ok()?;
                fields.get(index).cloned()
            }
            _ => None,
        }
    }

    /// Bit width of integer types (Bool is one bit)
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            IrType::Bool => Some(1),
            IrType::I8 => Some(8),
            IrType::I16 => Some(16),
            IrType::I32 => Some(32),
            IrType::I64 => Some(64),
            _ => None,
        }
    }

    /// Integer type with the given bit width
    pub fn int_with_width(width: u32) -> Option<IrType> {
        match width {
            1 => Some(IrType::Bool),
            8 => Some(IrType::I8),
            16 => Some(IrType::I16),
            32 => Some(IrType::I32),
            64 => Some(IrType::I64),
            _ => None,
        }
    }

    /// Check if this is an integer type
    pub fn is_integer(&self) -> bool {
        self.bit_width().is_some()
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    /// Check if this is a pointer type
    pub fn is_pointer(&self) -> bool {
        matches!(self, IrType::Ptr)
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, IrType::Struct(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, IrType::Void)
    }

    /// A structure whose fields all share one type
    pub fn is_homogeneous_struct(&self) -> bool {
        match self {
            IrType::Struct(fields) => fields.windows(2).all(|w| w[0] == w[1]),
            _ => false,
        }
    }
}

/// Round `offset` up to a multiple of `align`
pub fn align_to(offset: u64, align: u64) -> u64 {
    if align <= 1 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Bool => write!(f, "i1"),
            IrType::I8 => write!(f, "i8"),
            IrType::I16 => write!(f, "i16"),
            IrType::I32 => write!(f, "i32"),
            IrType::I64 => write!(f, "i64"),
            IrType::F32 => write!(f, "float"),
            IrType::F64 => write!(f, "double"),
            IrType::Ptr => write!(f, "ptr"),
            IrType::Array(ty, len) => write!(f, "[{} x {}]", len, ty),
            IrType::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, " }}")
            }
            IrType::Label => write!(f, "label"),
        }
    }
}
