//! Intermediate Representation (IR) for the loop roller
//!
//! This module defines the SSA representation the rolling transformation reads
//! and rewrites. It is deliberately close to a classic compiler IR:
//! - Values are small `Copy` handles (instruction results, arguments, uniqued
//!   constants, globals, functions and block labels)
//! - Instructions expose a uniform operand view so pattern matching can align
//!   operand positions without knowing the instruction kind
//! - Blocks are ordered instruction lists ending in a terminator
//! - Everything serializes with serde so modules can be stored as JSON

pub mod types;
pub mod constants;
pub mod instructions;
pub mod blocks;
pub mod functions;
pub mod modules;
pub mod builder;
pub mod dominance;
pub mod stride;
pub mod optimization;
pub mod validation;
pub mod interpreter;
pub mod dump;

pub use types::*;
pub use constants::*;
pub use instructions::*;
pub use blocks::*;
pub use functions::*;
pub use modules::*;
pub use builder::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an instruction inside its function's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrId(u32);

impl IrId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn invalid() -> Self {
        Self(u32::MAX)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for IrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Function identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrFunctionId(pub u32);

impl fmt::Display for IrFunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Global variable identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrGlobalId(pub u32);

impl fmt::Display for IrGlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// An operand. Constants are uniqued in the module's pool, so two equal
/// literals are always the same `IrValue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IrValue {
    /// Result of an instruction
    Inst(IrId),
    /// Function parameter by position
    Arg(u32),
    /// Literal or constant expression
    Const(ConstId),
    /// Address of a global variable
    Global(IrGlobalId),
    /// Address of a function
    Function(IrFunctionId),
    /// Basic block label (branch targets)
    Block(IrBlockId),
}

impl IrValue {
    pub fn as_inst(&self) -> Option<IrId> {
        match self {
            IrValue::Inst(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<ConstId> {
        match self {
            IrValue::Const(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<IrBlockId> {
        match self {
            IrValue::Block(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_inst(&self) -> bool {
        matches!(self, IrValue::Inst(_))
    }

    pub fn is_block(&self) -> bool {
        matches!(self, IrValue::Block(_))
    }

    /// Constants, constant expressions, globals and functions
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            IrValue::Const(_) | IrValue::Global(_) | IrValue::Function(_)
        )
    }
}

impl fmt::Display for IrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrValue::Inst(id) => write!(f, "{}", id),
            IrValue::Arg(n) => write!(f, "%arg{}", n),
            IrValue::Const(c) => write!(f, "{}", c),
            IrValue::Global(g) => write!(f, "@{}", g),
            IrValue::Function(func) => write!(f, "@{}", func),
            IrValue::Block(b) => write!(f, "{}", b),
        }
    }
}
