//! IR Functions
//!
//! A function owns an arena of instructions addressed by `IrId` and a list of
//! basic blocks in layout order. Erasing an instruction detaches it from its
//! block; ids are never reused, so stale handles are detectable.

use super::{
    IrBasicBlock, IrBlockId, IrFunctionId, IrId, IrInstruction, IrType, IrValue, MemoryEffects,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// IR function representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrFunction {
    /// Unique identifier for this function
    pub id: IrFunctionId,

    /// Function name
    pub name: String,

    /// Function signature
    pub signature: IrFunctionSignature,

    /// Function attributes
    pub attributes: FunctionAttributes,

    /// Instruction arena (detached entries have no block)
    pub instructions: Vec<IrInstructionData>,

    /// Basic blocks in layout order; the first one is the entry
    pub blocks: IndexMap<IrBlockId, IrBasicBlock>,

    /// Next available block ID
    pub next_block_id: u32,
}

/// An instruction together with its result type and placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrInstructionData {
    pub inst: IrInstruction,

    /// Result type (`Void` for instructions without a result)
    pub ty: IrType,

    /// Owning block, `None` once erased
    pub block: Option<IrBlockId>,

    /// Optional name for dumps
    pub name: Option<String>,
}

/// Function signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrFunctionSignature {
    /// Parameter types and names
    pub parameters: Vec<IrParameter>,

    /// Return type
    pub return_type: IrType,

    /// Accepts extra arguments after the fixed parameters
    pub varargs: bool,
}

/// Function parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrParameter {
    /// Parameter name
    pub name: String,

    /// Parameter type
    pub ty: IrType,
}

/// Function attributes consulted by memory and side-effect queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionAttributes {
    /// What calls to this function may do to memory
    pub memory: MemoryEffects,

    /// Calls never unwind
    pub nounwind: bool,

    /// Compiler-known function
    pub intrinsic: Option<Intrinsic>,
}

impl Default for FunctionAttributes {
    fn default() -> Self {
        Self {
            memory: MemoryEffects::ReadWrite,
            nounwind: false,
            intrinsic: None,
        }
    }
}

/// Functions with special meaning to the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intrinsic {
    LifetimeStart,
    LifetimeEnd,
}

impl IrFunctionSignature {
    pub fn new(params: Vec<IrType>, return_type: IrType) -> Self {
        Self {
            parameters: params
                .into_iter()
                .enumerate()
                .map(|(i, ty)| IrParameter {
                    name: format!("arg{}", i),
                    ty,
                })
                .collect(),
            return_type,
            varargs: false,
        }
    }

    pub fn variadic(mut self) -> Self {
        self.varargs = true;
        self
    }
}

impl IrFunction {
    /// Create a function without a body
    pub fn new(id: IrFunctionId, name: String, signature: IrFunctionSignature) -> Self {
        Self {
            id,
            name,
            signature,
            attributes: FunctionAttributes::default(),
            instructions: Vec::new(),
            blocks: IndexMap::new(),
            next_block_id: 0,
        }
    }

    /// A function with no blocks is an external declaration
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_lifetime_marker(&self) -> bool {
        matches!(
            self.attributes.intrinsic,
            Some(Intrinsic::LifetimeStart | Intrinsic::LifetimeEnd)
        )
    }

    // === Blocks ===

    /// Append a new block to the layout
    pub fn create_block(&mut self, label: Option<&str>) -> IrBlockId {
        let id = IrBlockId::new(self.next_block_id);
        self.next_block_id += 1;
        let block = match label {
            Some(label) => IrBasicBlock::with_label(id, label),
            None => IrBasicBlock::new(id),
        };
        self.blocks.insert(id, block);
        id
    }

    pub fn entry_block(&self) -> Option<IrBlockId> {
        self.blocks.keys().next().copied()
    }

    pub fn block(&self, id: IrBlockId) -> Option<&IrBasicBlock> {
        self.blocks.get(&id)
    }

    pub fn block_mut(&mut self, id: IrBlockId) -> Option<&mut IrBasicBlock> {
        self.blocks.get_mut(&id)
    }

    /// Block ids in layout order
    pub fn block_ids(&self) -> Vec<IrBlockId> {
        self.blocks.keys().copied().collect()
    }

    /// Delete a block and every instruction in it
    pub fn remove_block(&mut self, id: IrBlockId) {
        if let Some(block) = self.blocks.shift_remove(&id) {
            for inst in block.instructions {
                if let Some(data) = self.instructions.get_mut(inst.index()) {
                    data.block = None;
                }
            }
        }
    }

    /// Instructions of a block in program order
    pub fn block_instructions(&self, id: IrBlockId) -> &[IrId] {
        self.blocks
            .get(&id)
            .map(|b| b.instructions.as_slice())
            .unwrap_or(&[])
    }

    /// The block's terminator, if it has one
    pub fn terminator(&self, block: IrBlockId) -> Option<IrId> {
        let last = *self.block(block)?.instructions.last()?;
        self.instruction(last)
            .filter(|inst| inst.is_terminator())
            .map(|_| last)
    }

    pub fn successors(&self, block: IrBlockId) -> Vec<IrBlockId> {
        self.terminator(block)
            .and_then(|t| self.instruction(t))
            .map(|t| t.successors())
            .unwrap_or_default()
    }

    /// Predecessors in layout order, without duplicates
    pub fn predecessors(&self, block: IrBlockId) -> Vec<IrBlockId> {
        let mut preds = Vec::new();
        for &id in self.blocks.keys() {
            if self.successors(id).contains(&block) && !preds.contains(&id) {
                preds.push(id);
            }
        }
        preds
    }

    /// Phi nodes at the top of a block
    pub fn phis(&self, block: IrBlockId) -> Vec<IrId> {
        self.block_instructions(block)
            .iter()
            .copied()
            .take_while(|&i| self.instruction(i).is_some_and(|inst| inst.is_phi()))
            .collect()
    }

    // === Instructions ===

    pub fn data(&self, id: IrId) -> Option<&IrInstructionData> {
        self.instructions.get(id.index())
    }

    pub fn instruction(&self, id: IrId) -> Option<&IrInstruction> {
        self.instructions.get(id.index()).map(|d| &d.inst)
    }

    pub fn instruction_mut(&mut self, id: IrId) -> Option<&mut IrInstruction> {
        self.instructions.get_mut(id.index()).map(|d| &mut d.inst)
    }

    /// Result type of an instruction
    pub fn inst_type(&self, id: IrId) -> IrType {
        self.data(id).map(|d| d.ty.clone()).unwrap_or(IrType::Void)
    }

    /// Block holding a live instruction
    pub fn parent(&self, id: IrId) -> Option<IrBlockId> {
        self.data(id).and_then(|d| d.block)
    }

    pub fn is_live(&self, id: IrId) -> bool {
        self.parent(id).is_some()
    }

    /// Index of an instruction inside its block
    pub fn position(&self, id: IrId) -> Option<usize> {
        let block = self.parent(id)?;
        self.block(block)?.position(id)
    }

    /// `a` precedes `b` in the same block
    pub fn comes_before(&self, a: IrId, b: IrId) -> bool {
        match (self.parent(a), self.parent(b)) {
            (Some(ba), Some(bb)) if ba == bb => self.position(a) < self.position(b),
            _ => false,
        }
    }

    /// Create an instruction that is not yet placed in a block
    pub fn create_detached(&mut self, inst: IrInstruction, ty: IrType) -> IrId {
        let id = IrId::new(self.instructions.len() as u32);
        self.instructions.push(IrInstructionData {
            inst,
            ty,
            block: None,
            name: None,
        });
        id
    }

    /// Append an instruction to the end of a block
    pub fn append(&mut self, block: IrBlockId, inst: IrInstruction, ty: IrType) -> IrId {
        let id = self.create_detached(inst, ty);
        self.place_at(id, block, usize::MAX);
        id
    }

    /// Insert an instruction right before `before`
    pub fn insert_before(&mut self, before: IrId, inst: IrInstruction, ty: IrType) -> Option<IrId> {
        let block = self.parent(before)?;
        let index = self.position(before)?;
        let id = self.create_detached(inst, ty);
        self.place_at(id, block, index);
        Some(id)
    }

    /// Insert an instruction at `index` of a block (clamped to the end)
    pub fn insert_at(&mut self, block: IrBlockId, index: usize, inst: IrInstruction, ty: IrType) -> IrId {
        let id = self.create_detached(inst, ty);
        self.place_at(id, block, index);
        id
    }

    /// Put an existing instruction at `index` of `block`, detaching it first
    pub fn place_at(&mut self, id: IrId, block: IrBlockId, index: usize) {
        self.detach(id);
        if let Some(b) = self.blocks.get_mut(&block) {
            let index = index.min(b.instructions.len());
            b.instructions.insert(index, id);
            if let Some(data) = self.instructions.get_mut(id.index()) {
                data.block = Some(block);
            }
        }
    }

    /// Move an instruction to the end of a block
    pub fn move_to_end(&mut self, id: IrId, block: IrBlockId) {
        self.place_at(id, block, usize::MAX);
    }

    /// Move an instruction right before `before`
    pub fn move_before(&mut self, id: IrId, before: IrId) {
        self.detach(id);
        if let (Some(block), Some(index)) = (self.parent(before), self.position(before)) {
            self.place_at(id, block, index);
        }
    }

    fn detach(&mut self, id: IrId) {
        if let Some(block) = self.parent(id) {
            if let Some(b) = self.blocks.get_mut(&block) {
                b.instructions.retain(|&i| i != id);
            }
            if let Some(data) = self.instructions.get_mut(id.index()) {
                data.block = None;
            }
        }
    }

    /// Remove an instruction from its block
    pub fn erase(&mut self, id: IrId) {
        self.detach(id);
    }

    pub fn set_name(&mut self, id: IrId, name: impl Into<String>) {
        if let Some(data) = self.instructions.get_mut(id.index()) {
            data.name = Some(name.into());
        }
    }

    // === Uses ===

    /// Live instructions in layout order
    pub fn live_instructions(&self) -> impl Iterator<Item = IrId> + '_ {
        self.blocks
            .values()
            .flat_map(|b| b.instructions.iter().copied())
    }

    /// Number of live instructions
    pub fn instruction_count(&self) -> usize {
        self.blocks.values().map(|b| b.instructions.len()).sum()
    }

    /// Live instructions that use `value`, each listed once
    pub fn users(&self, value: IrValue) -> Vec<IrId> {
        self.live_instructions()
            .filter(|&i| {
                self.instruction(i)
                    .is_some_and(|inst| inst.operands().contains(&value))
            })
            .collect()
    }

    /// Number of operand slots holding `value`
    pub fn num_uses(&self, value: IrValue) -> usize {
        self.live_instructions()
            .filter_map(|i| self.instruction(i))
            .map(|inst| inst.operands().iter().filter(|&&op| op == value).count())
            .sum()
    }

    pub fn has_uses(&self, value: IrValue) -> bool {
        self.live_instructions().any(|i| {
            self.instruction(i)
                .is_some_and(|inst| inst.operands().contains(&value))
        })
    }

    /// Rewrite every use of `old` in live instructions
    pub fn replace_all_uses(&mut self, old: IrValue, new: IrValue) -> usize {
        let users = self.users(old);
        let mut count = 0;
        for user in users {
            if let Some(inst) = self.instruction_mut(user) {
                count += inst.replace_uses(old, new);
            }
        }
        count
    }

    /// Type of a function parameter
    pub fn param_type(&self, index: u32) -> IrType {
        self.signature
            .parameters
            .get(index as usize)
            .map(|p| p.ty.clone())
            .unwrap_or(IrType::Void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinaryOp;

    fn sample() -> (IrFunction, IrBlockId) {
        let sig = IrFunctionSignature::new(vec![IrType::I32], IrType::I32);
        let mut func = IrFunction::new(IrFunctionId(0), "f".to_string(), sig);
        let entry = func.create_block(Some("entry"));
        (func, entry)
    }

    #[test]
    fn test_append_and_users() {
        let (mut func, entry) = sample();
        let add = func.append(
            entry,
            IrInstruction::BinOp {
                op: BinaryOp::Add,
                left: IrValue::Arg(0),
                right: IrValue::Arg(0),
            },
            IrType::I32,
        );
        let ret = func.append(
            entry,
            IrInstruction::Return {
                value: Some(IrValue::Inst(add)),
            },
            IrType::Void,
        );

        assert_eq!(func.users(IrValue::Arg(0)), vec![add]);
        assert_eq!(func.num_uses(IrValue::Arg(0)), 2);
        assert_eq!(func.terminator(entry), Some(ret));
        assert!(func.comes_before(add, ret));
        assert_eq!(func.instruction_count(), 2);
    }

    #[test]
    fn test_erase_and_move() {
        let (mut func, entry) = sample();
        let other = func.create_block(None);
        let a = func.append(entry, IrInstruction::Unreachable, IrType::Void);
        let b = func.append(entry, IrInstruction::Unreachable, IrType::Void);

        func.move_to_end(a, other);
        assert_eq!(func.parent(a), Some(other));
        assert_eq!(func.block_instructions(entry), &[b]);

        func.erase(b);
        assert!(!func.is_live(b));
        assert_eq!(func.instruction_count(), 1);

        func.remove_block(other);
        assert!(!func.is_live(a));
        assert_eq!(func.block_ids(), vec![entry]);
    }

    #[test]
    fn test_predecessors() {
        let (mut func, entry) = sample();
        let next = func.create_block(None);
        func.append(entry, IrInstruction::Branch { target: next }, IrType::Void);
        func.append(next, IrInstruction::Return { value: None }, IrType::Void);
        assert_eq!(func.predecessors(next), vec![entry]);
        assert_eq!(func.successors(entry), vec![next]);
        assert!(func.predecessors(entry).is_empty());
    }
}
