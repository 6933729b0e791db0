//! Reference Interpreter
//!
//! Executes IR over concrete inputs with a flat byte-addressed memory. Calls
//! to declared (bodiless) functions are forwarded to a host hook, which lets
//! tests observe side effects in order. Used to check that a rolled function
//! computes the same results as the original.

use super::{
    sext_to_width, zext_to_width, BinaryOp, CastOp, CompareOp, ConstExprOp, IrBlockId, IrConstant,
    IrFunction, IrFunctionId, IrGlobalId, IrId, IrInstruction, IrModule, IrType, IrValue,
};
use log::trace;
use std::collections::HashMap;

/// Addresses at or above this value name functions
const FUNCTION_BASE: u64 = 1 << 48;

/// First address handed out by the allocator (0 stays null)
const HEAP_BASE: u64 = 64;

/// Default instruction budget for one `run`
const DEFAULT_MAX_STEPS: usize = 1_000_000;

/// A runtime value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeValue {
    /// Integer, sign-extended from its width
    Int(i64),
    Float(f64),
    Ptr(u64),
    Undef,
}

impl RuntimeValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RuntimeValue::Int(v) => Some(*v),
            RuntimeValue::Ptr(p) => Some(*p as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            RuntimeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<u64> {
        match self {
            RuntimeValue::Ptr(p) => Some(*p),
            RuntimeValue::Int(v) => Some(*v as u64),
            _ => None,
        }
    }
}

/// Flat little-endian memory
#[derive(Debug, Clone, Default)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; HEAP_BASE as usize],
        }
    }

    /// Reserve zeroed bytes and return their address
    pub fn allocate(&mut self, size: u64, align: u64) -> u64 {
        let addr = super::align_to(self.bytes.len() as u64, align.max(1));
        let end = addr + size.max(1);
        self.bytes.resize(end as usize, 0);
        addr
    }

    fn range(&self, addr: u64, size: u64) -> Result<std::ops::Range<usize>, String> {
        let end = addr.checked_add(size).ok_or("address overflow")?;
        if addr < HEAP_BASE || end > self.bytes.len() as u64 {
            return Err(format!("out-of-bounds access at {:#x} ({} bytes)", addr, size));
        }
        Ok(addr as usize..end as usize)
    }

    pub fn load(&self, addr: u64, ty: &IrType) -> Result<RuntimeValue, String> {
        let size = ty.size();
        let range = self.range(addr, size)?;
        let mut raw = [0u8; 8];
        raw[..size as usize].copy_from_slice(&self.bytes[range]);
        let bits = u64::from_le_bytes(raw);
        Ok(match ty {
            IrType::F32 => RuntimeValue::Float(f32::from_bits(bits as u32) as f64),
            IrType::F64 => RuntimeValue::Float(f64::from_bits(bits)),
            IrType::Ptr => RuntimeValue::Ptr(bits),
            _ => match ty.bit_width() {
                Some(width) => RuntimeValue::Int(sext_to_width(bits as i64, width)),
                None => return Err(format!("cannot load a value of type {}", ty)),
            },
        })
    }

    pub fn store(&mut self, addr: u64, ty: &IrType, value: RuntimeValue) -> Result<(), String> {
        let size = ty.size();
        let range = self.range(addr, size)?;
        let bits: u64 = match (ty, value) {
            (IrType::F32, RuntimeValue::Float(f)) => (f as f32).to_bits() as u64,
            (IrType::F64, RuntimeValue::Float(f)) => f.to_bits(),
            (_, RuntimeValue::Undef) => 0,
            (_, v) => v
                .as_int()
                .ok_or_else(|| format!("cannot store {:?} as {}", v, ty))? as u64,
        };
        let raw = bits.to_le_bytes();
        self.bytes[range].copy_from_slice(&raw[..size as usize]);
        Ok(())
    }
}

/// Handles calls to functions without a body
pub trait HostEnvironment {
    fn call(&mut self, name: &str, args: &[RuntimeValue], memory: &mut Memory) -> Result<RuntimeValue, String>;
}

impl<F> HostEnvironment for F
where
    F: FnMut(&str, &[RuntimeValue], &mut Memory) -> Result<RuntimeValue, String>,
{
    fn call(&mut self, name: &str, args: &[RuntimeValue], memory: &mut Memory) -> Result<RuntimeValue, String> {
        self(name, args, memory)
    }
}

/// Host that rejects every external call
#[derive(Debug, Default)]
pub struct NoHost;

impl HostEnvironment for NoHost {
    fn call(&mut self, name: &str, _args: &[RuntimeValue], _memory: &mut Memory) -> Result<RuntimeValue, String> {
        Err(format!("call to external function '{}'", name))
    }
}

/// Interpreter over one module
pub struct Interpreter<'m, H: HostEnvironment> {
    module: &'m IrModule,
    host: H,
    pub memory: Memory,
    globals: HashMap<IrGlobalId, u64>,
    steps: usize,
    max_steps: usize,
}

impl<'m, H: HostEnvironment> Interpreter<'m, H> {
    /// Lay out and initialize every global
    pub fn new(module: &'m IrModule, host: H) -> Result<Self, String> {
        let mut interp = Self {
            module,
            host,
            memory: Memory::new(),
            globals: HashMap::new(),
            steps: 0,
            max_steps: DEFAULT_MAX_STEPS,
        };

        for global in module.globals.values() {
            let addr = interp.memory.allocate(global.ty.size(), global.ty.align());
            interp.globals.insert(global.id, addr);
        }
        for global in module.globals.values() {
            if let (Some(init), Some(&addr)) = (global.initializer, interp.globals.get(&global.id)) {
                interp.write_initializer(addr, &global.ty, init)?;
            }
        }

        Ok(interp)
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn global_address(&self, id: IrGlobalId) -> Option<u64> {
        self.globals.get(&id).copied()
    }

    /// Address of a global by name
    pub fn global_by_name(&self, name: &str) -> Option<u64> {
        let global = self.module.globals.values().find(|g| g.name == name)?;
        self.global_address(global.id)
    }

    /// Run a function by name
    pub fn run(&mut self, name: &str, args: &[RuntimeValue]) -> Result<RuntimeValue, String> {
        let id = self
            .module
            .function_by_name(name)
            .map(|f| f.id)
            .ok_or_else(|| format!("unknown function '{}'", name))?;
        self.steps = 0;
        self.call_function(id, args)
    }

    fn write_initializer(&mut self, addr: u64, ty: &IrType, init: IrValue) -> Result<(), String> {
        let module = self.module;
        if let Some(IrConstant::Array { elem_ty, elements }) = module.constant(init) {
            let stride = elem_ty.size();
            for (i, &element) in elements.iter().enumerate() {
                self.write_initializer(addr + stride * i as u64, elem_ty, element)?;
            }
            return Ok(());
        }
        let value = self.eval_constant(init)?;
        self.memory.store(addr, ty, value)
    }

    fn call_function(&mut self, id: IrFunctionId, args: &[RuntimeValue]) -> Result<RuntimeValue, String> {
        let module = self.module;
        let function = module
            .function(id)
            .ok_or_else(|| format!("unknown function {}", id))?;

        if function.is_lifetime_marker() {
            return Ok(RuntimeValue::Undef);
        }
        if function.is_declaration() {
            return self.host.call(&function.name, args, &mut self.memory);
        }
        trace!("enter {}", function.name);
        self.execute(function, args)
    }

    fn execute(&mut self, function: &'m IrFunction, args: &[RuntimeValue]) -> Result<RuntimeValue, String> {
        let mut frame: HashMap<IrId, RuntimeValue> = HashMap::new();
        let mut prev: Option<IrBlockId> = None;
        let mut block = function
            .entry_block()
            .ok_or_else(|| format!("'{}' has no body", function.name))?;

        loop {
            let insts = function.block_instructions(block);

            // Phis read their inputs before any of them is updated
            let mut phi_values = Vec::new();
            for &id in insts {
                let Some(IrInstruction::Phi { incoming }) = function.instruction(id) else {
                    break;
                };
                let from = prev.ok_or("phi in entry block")?;
                let (value, _) = incoming
                    .iter()
                    .find(|(_, b)| *b == from)
                    .ok_or_else(|| format!("phi {} has no entry for {}", id, from))?;
                phi_values.push((id, self.eval_value(function, &frame, args, *value)?));
            }
            frame.extend(phi_values);

            let mut next = None;
            for &id in insts {
                let Some(inst) = function.instruction(id) else {
                    continue;
                };
                if inst.is_phi() {
                    continue;
                }
                self.steps += 1;
                if self.steps > self.max_steps {
                    return Err("step limit exceeded".to_string());
                }

                match inst {
                    IrInstruction::Branch { target } => {
                        next = Some(*target);
                        break;
                    }
                    IrInstruction::CondBranch {
                        condition,
                        true_target,
                        false_target,
                    } => {
                        let cond = self.eval_int(function, &frame, args, *condition)?;
                        next = Some(if cond != 0 { *true_target } else { *false_target });
                        break;
                    }
                    IrInstruction::Return { value } => {
                        return match value {
                            Some(v) => self.eval_value(function, &frame, args, *v),
                            None => Ok(RuntimeValue::Undef),
                        };
                    }
                    IrInstruction::Unreachable => return Err("reached unreachable".to_string()),
                    _ => {
                        let result = self.execute_instruction(function, &frame, args, id, inst)?;
                        frame.insert(id, result);
                    }
                }
            }

            prev = Some(block);
            block = next.ok_or_else(|| format!("block {} fell through", block))?;
        }
    }

    fn execute_instruction(
        &mut self,
        function: &'m IrFunction,
        frame: &HashMap<IrId, RuntimeValue>,
        args: &[RuntimeValue],
        id: IrId,
        inst: &IrInstruction,
    ) -> Result<RuntimeValue, String> {
        let ty = function.inst_type(id);
        match inst {
            IrInstruction::BinOp { op, left, right } => {
                let l = self.eval_value(function, frame, args, *left)?;
                let r = self.eval_value(function, frame, args, *right)?;
                eval_binop(*op, &ty, l, r)
            }
            IrInstruction::Cmp { op, left, right } => {
                let operand_ty = self.module.value_type(function, *left);
                let l = self.eval_value(function, frame, args, *left)?;
                let r = self.eval_value(function, frame, args, *right)?;
                eval_cmp(*op, &operand_ty, l, r)
            }
            IrInstruction::Cast { op, value } => {
                let from = self.module.value_type(function, *value);
                let v = self.eval_value(function, frame, args, *value)?;
                eval_cast(*op, &from, &ty, v)
            }
            IrInstruction::Select {
                condition,
                true_value,
                false_value,
            } => {
                let cond = self.eval_int(function, frame, args, *condition)?;
                let chosen = if cond != 0 { *true_value } else { *false_value };
                self.eval_value(function, frame, args, chosen)
            }
            IrInstruction::Load { ptr, .. } => {
                let addr = self.eval_ptr(function, frame, args, *ptr)?;
                self.memory.load(addr, &ty)
            }
            IrInstruction::Store { value, ptr, .. } => {
                let value_ty = self.module.value_type(function, *value);
                let v = self.eval_value(function, frame, args, *value)?;
                let addr = self.eval_ptr(function, frame, args, *ptr)?;
                self.memory.store(addr, &value_ty, v)?;
                Ok(RuntimeValue::Undef)
            }
            IrInstruction::GetElementPtr {
                source_ty,
                ptr,
                indices,
            } => {
                let base = self.eval_ptr(function, frame, args, *ptr)?;
                let mut idx = Vec::with_capacity(indices.len());
                for &index in indices {
                    idx.push(self.eval_int(function, frame, args, index)?);
                }
                Ok(RuntimeValue::Ptr(gep_address(base, source_ty, &idx)?))
            }
            IrInstruction::Alloca { allocated_ty, count } => {
                let count = self.eval_int(function, frame, args, *count)?.max(1) as u64;
                let addr = self
                    .memory
                    .allocate(allocated_ty.size() * count, allocated_ty.align());
                Ok(RuntimeValue::Ptr(addr))
            }
            IrInstruction::Call { callee, args: call_args } => {
                let mut values = Vec::with_capacity(call_args.len());
                for &arg in call_args {
                    values.push(self.eval_value(function, frame, args, arg)?);
                }
                let target = match *callee {
                    IrValue::Function(f) => f,
                    other => {
                        let addr = self.eval_ptr(function, frame, args, other)?;
                        if addr < FUNCTION_BASE {
                            return Err(format!("call through non-function pointer {:#x}", addr));
                        }
                        IrFunctionId((addr - FUNCTION_BASE) as u32)
                    }
                };
                self.call_function(target, &values)
            }
            other => Err(format!("cannot execute {}", other.opcode().name())),
        }
    }

    fn eval_value(
        &mut self,
        _function: &IrFunction,
        frame: &HashMap<IrId, RuntimeValue>,
        args: &[RuntimeValue],
        value: IrValue,
    ) -> Result<RuntimeValue, String> {
        match value {
            IrValue::Inst(id) => frame
                .get(&id)
                .copied()
                .ok_or_else(|| format!("{} used before it was computed", id)),
            IrValue::Arg(n) => args
                .get(n as usize)
                .copied()
                .ok_or_else(|| format!("missing argument {}", n)),
            IrValue::Block(b) => Err(format!("block {} used as a value", b)),
            _ => self.eval_constant(value),
        }
    }

    fn eval_int(
        &mut self,
        function: &IrFunction,
        frame: &HashMap<IrId, RuntimeValue>,
        args: &[RuntimeValue],
        value: IrValue,
    ) -> Result<i64, String> {
        let v = self.eval_value(function, frame, args, value)?;
        v.as_int().ok_or_else(|| format!("expected an integer, got {:?}", v))
    }

    fn eval_ptr(
        &mut self,
        function: &IrFunction,
        frame: &HashMap<IrId, RuntimeValue>,
        args: &[RuntimeValue],
        value: IrValue,
    ) -> Result<u64, String> {
        let v = self.eval_value(function, frame, args, value)?;
        v.as_ptr().ok_or_else(|| format!("expected a pointer, got {:?}", v))
    }

    fn eval_constant(&self, value: IrValue) -> Result<RuntimeValue, String> {
        match value {
            IrValue::Global(g) => self
                .global_address(g)
                .map(RuntimeValue::Ptr)
                .ok_or_else(|| format!("unknown global {}", g)),
            IrValue::Function(f) => Ok(RuntimeValue::Ptr(FUNCTION_BASE + f.0 as u64)),
            IrValue::Const(_) => {
                let constant = self
                    .module
                    .constant(value)
                    .ok_or_else(|| format!("unknown constant {}", value))?;
                match constant {
                    IrConstant::Int { value, .. } => Ok(RuntimeValue::Int(*value)),
                    IrConstant::Float { bits, .. } => Ok(RuntimeValue::Float(f64::from_bits(*bits))),
                    IrConstant::Null => Ok(RuntimeValue::Ptr(0)),
                    IrConstant::Undef(_) => Ok(RuntimeValue::Undef),
                    IrConstant::Array { .. } => Err("array constant used as a value".to_string()),
                    IrConstant::Expr(expr) => {
                        let mut ops = Vec::with_capacity(expr.operands.len());
                        for &op in &expr.operands {
                            ops.push(self.eval_constant(op)?);
                        }
                        match &expr.op {
                            ConstExprOp::GetElementPtr { source_ty } => {
                                let base = ops
                                    .first()
                                    .and_then(|v| v.as_ptr())
                                    .ok_or("constant getelementptr without base")?;
                                let idx: Vec<i64> = ops[1..].iter().filter_map(|v| v.as_int()).collect();
                                Ok(RuntimeValue::Ptr(gep_address(base, source_ty, &idx)?))
                            }
                            ConstExprOp::Cast(op) => {
                                let (&source, &v) = expr.operands.first().zip(ops.first()).ok_or("empty constant cast")?;
                                let from = match source {
                                    IrValue::Const(_) => self.module.constant(source).map(|c| c.ty()).unwrap_or(IrType::Ptr),
                                    _ => IrType::Ptr,
                                };
                                eval_cast(*op, &from, &expr.ty, v)
                            }
                            ConstExprOp::BinOp(op) => match ops.as_slice() {
                                [l, r] => eval_binop(*op, &expr.ty, *l, *r),
                                _ => Err("malformed constant binary operator".to_string()),
                            },
                        }
                    }
                }
            }
            other => Err(format!("{} is not a constant", other)),
        }
    }
}

/// Address computed by a getelementptr
fn gep_address(base: u64, source_ty: &IrType, indices: &[i64]) -> Result<u64, String> {
    let Some((&first, rest)) = indices.split_first() else {
        return Ok(base);
    };
    let mut offset = first.wrapping_mul(source_ty.size() as i64);
    let mut current = source_ty.clone();
    for &index in rest {
        match &current {
            IrType::Struct(_) => {
                offset += current
                    .field_offset(index as usize)
                    .ok_or_else(|| format!("bad field index {}", index))? as i64;
            }
            IrType::Array(elem, _) => offset += index.wrapping_mul(elem.size() as i64),
            other => return Err(format!("cannot index into {}", other)),
        }
        current = current
            .type_at_index(Some(index))
            .ok_or_else(|| format!("cannot index into {}", current))?;
    }
    Ok(base.wrapping_add(offset as u64))
}

fn eval_binop(op: BinaryOp, ty: &IrType, l: RuntimeValue, r: RuntimeValue) -> Result<RuntimeValue, String> {
    if matches!(l, RuntimeValue::Undef) || matches!(r, RuntimeValue::Undef) {
        return Ok(RuntimeValue::Undef);
    }
    if op.is_float() {
        let (a, b) = (
            l.as_float().ok_or("float operand expected")?,
            r.as_float().ok_or("float operand expected")?,
        );
        let v = match op {
            BinaryOp::FAdd => a + b,
            BinaryOp::FSub => a - b,
            BinaryOp::FMul => a * b,
            BinaryOp::FDiv => a / b,
            _ => a % b,
        };
        let v = if *ty == IrType::F32 { v as f32 as f64 } else { v };
        return Ok(RuntimeValue::Float(v));
    }

    let width = ty.bit_width().unwrap_or(64);
    let (a, b) = (
        l.as_int().ok_or("integer operand expected")?,
        r.as_int().ok_or("integer operand expected")?,
    );
    let (ua, ub) = (zext_to_width(a, width), zext_to_width(b, width));
    let shift = (ub % width.max(1) as u64) as u32;
    let v = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::UDiv | BinaryOp::URem | BinaryOp::SDiv | BinaryOp::SRem if b == 0 => {
            return Err("division by zero".to_string())
        }
        BinaryOp::UDiv => (ua / ub) as i64,
        BinaryOp::URem => (ua % ub) as i64,
        BinaryOp::SDiv => a.wrapping_div(b),
        BinaryOp::SRem => a.wrapping_rem(b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => ((ua << shift) & u64::MAX) as i64,
        BinaryOp::LShr => (ua >> shift) as i64,
        BinaryOp::AShr => a >> shift,
        _ => return Err(format!("unsupported integer operator {}", op.name())),
    };
    Ok(RuntimeValue::Int(sext_to_width(v, width)))
}

fn eval_cmp(op: CompareOp, ty: &IrType, l: RuntimeValue, r: RuntimeValue) -> Result<RuntimeValue, String> {
    let result = match op {
        CompareOp::FEq | CompareOp::FNe | CompareOp::FLt | CompareOp::FLe | CompareOp::FGt | CompareOp::FGe => {
            let (a, b) = (
                l.as_float().ok_or("float operand expected")?,
                r.as_float().ok_or("float operand expected")?,
            );
            match op {
                CompareOp::FEq => a == b,
                CompareOp::FNe => a != b,
                CompareOp::FLt => a < b,
                CompareOp::FLe => a <= b,
                CompareOp::FGt => a > b,
                _ => a >= b,
            }
        }
        _ => {
            let width = ty.bit_width().unwrap_or(64);
            let (a, b) = (
                l.as_int().ok_or("integer operand expected")?,
                r.as_int().ok_or("integer operand expected")?,
            );
            let (ua, ub) = (zext_to_width(a, width), zext_to_width(b, width));
            match op {
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
                CompareOp::SLt => a < b,
                CompareOp::SLe => a <= b,
                CompareOp::SGt => a > b,
                CompareOp::SGe => a >= b,
                CompareOp::ULt => ua < ub,
                CompareOp::ULe => ua <= ub,
                CompareOp::UGt => ua > ub,
                _ => ua >= ub,
            }
        }
    };
    Ok(RuntimeValue::Int(if result { -1 } else { 0 }))
}

fn eval_cast(op: CastOp, from: &IrType, to: &IrType, v: RuntimeValue) -> Result<RuntimeValue, String> {
    if matches!(v, RuntimeValue::Undef) {
        return Ok(RuntimeValue::Undef);
    }
    let to_width = to.bit_width().unwrap_or(64);
    let from_width = from.bit_width().unwrap_or(64);
    let int = |v: RuntimeValue| v.as_int().ok_or_else(|| format!("integer expected, got {:?}", v));
    let float = |v: RuntimeValue| v.as_float().ok_or_else(|| format!("float expected, got {:?}", v));
    Ok(match op {
        CastOp::Trunc | CastOp::SExt => RuntimeValue::Int(sext_to_width(int(v)?, to_width)),
        CastOp::ZExt => RuntimeValue::Int(sext_to_width(zext_to_width(int(v)?, from_width) as i64, to_width)),
        CastOp::FPToSI => RuntimeValue::Int(sext_to_width(float(v)? as i64, to_width)),
        CastOp::FPToUI => RuntimeValue::Int(sext_to_width(float(v)? as u64 as i64, to_width)),
        CastOp::SIToFP => RuntimeValue::Float(int(v)? as f64),
        CastOp::UIToFP => RuntimeValue::Float(zext_to_width(int(v)?, from_width) as f64),
        CastOp::FPTrunc => RuntimeValue::Float(float(v)? as f32 as f64),
        CastOp::FPExt => RuntimeValue::Float(float(v)?),
        CastOp::PtrToInt => RuntimeValue::Int(sext_to_width(int(v)?, to_width)),
        CastOp::IntToPtr => RuntimeValue::Ptr(zext_to_width(int(v)?, from_width)),
        CastOp::BitCast => match (from, to) {
            (IrType::F64, t) if t.is_integer() => RuntimeValue::Int(float(v)?.to_bits() as i64),
            (IrType::F32, t) if t.is_integer() => RuntimeValue::Int((float(v)? as f32).to_bits() as i32 as i64),
            (IrType::I64, IrType::F64) => RuntimeValue::Float(f64::from_bits(int(v)? as u64)),
            (IrType::I32, IrType::F32) => RuntimeValue::Float(f32::from_bits(int(v)? as u32) as f64),
            _ => v,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, IrFunctionSignature};

    #[test]
    fn test_loop_sums_array() {
        let mut module = IrModule::new("m");
        let init: Vec<IrValue> = (1..=4).map(|v| module.constants.int(IrType::I32, v)).collect();
        let table = module.constants.array(IrType::I32, init);
        let g = module.add_global("T", IrType::array(IrType::I32, 4), Some(table), true);
        let f = module.declare_function("sum", IrFunctionSignature::new(vec![], IrType::I32));

        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        b.position_at_end(entry);
        b.build_br(body);
        b.position_at_end(body);
        let i = b.build_phi(IrType::I64);
        let acc = b.build_phi(IrType::I32);
        let zero64 = b.const_int(IrType::I64, 0);
        let zero = b.const_int(IrType::I32, 0);
        let one = b.const_int(IrType::I64, 1);
        let four = b.const_int(IrType::I64, 4);
        let p = b.build_gep(IrType::array(IrType::I32, 4), IrValue::Global(g), vec![zero64, i]);
        let v = b.build_load(IrType::I32, p);
        let next_acc = b.build_binop(BinaryOp::Add, acc, v);
        let next_i = b.build_binop(BinaryOp::Add, i, one);
        let cond = b.build_cmp(CompareOp::Ne, next_i, four);
        b.build_cond_br(cond, body, exit);
        b.add_incoming(i, zero64, entry);
        b.add_incoming(i, next_i, body);
        b.add_incoming(acc, zero, entry);
        b.add_incoming(acc, next_acc, body);
        b.position_at_end(exit);
        b.build_return(Some(next_acc));

        let mut interp = Interpreter::new(&module, NoHost).unwrap();
        assert_eq!(interp.run("sum", &[]).unwrap(), RuntimeValue::Int(10));
    }

    #[test]
    fn test_host_calls_and_wrapping() {
        let mut module = IrModule::new("m");
        let ext = module.declare_function("next", IrFunctionSignature::new(vec![], IrType::I8));
        let f = module.declare_function("f", IrFunctionSignature::new(vec![], IrType::I8));
        let mut b = IrBuilder::new(&mut module, f);
        let entry = b.create_block("entry");
        b.position_at_end(entry);
        let a = b.build_call(IrValue::Function(ext), vec![]);
        let c = b.build_call(IrValue::Function(ext), vec![]);
        let sum = b.build_binop(BinaryOp::Add, a, c);
        b.build_return(Some(sum));

        let mut counter = 0i64;
        let host = move |_: &str, _: &[RuntimeValue], _: &mut Memory| {
            counter += 100;
            Ok::<_, String>(RuntimeValue::Int(counter))
        };
        let mut interp = Interpreter::new(&module, host).unwrap();
        // 100 + 200 wraps at 8 bits
        assert_eq!(interp.run("f", &[]).unwrap(), RuntimeValue::Int(44));
    }

    #[test]
    fn test_struct_gep_offsets() {
        let s = IrType::Struct(vec![IrType::I8, IrType::I32, IrType::I64]);
        assert_eq!(gep_address(1000, &s, &[0, 1]).unwrap(), 1004);
        assert_eq!(gep_address(1000, &s, &[1, 2]).unwrap(), 1000 + 16 + 8);
    }
}
