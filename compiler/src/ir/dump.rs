//! IR Dump Utility
//!
//! Pretty-prints IR in a human-readable format similar to LLVM IR.
//! Used by the driver's `dump` command and by debug logging of rolled code.

use super::{
    ConstExprOp, IrBlockId, IrConstant, IrFunction, IrId, IrInstruction, IrModule, IrType, IrValue,
};
use std::fmt::Write;

/// Dump an entire module to a string.
pub fn dump_module(module: &IrModule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; Module: {}", module.name);

    for global in module.globals.values() {
        let init = match global.initializer {
            Some(init) => format!(" {}", dump_value(module, None, init)),
            None => String::new(),
        };
        let kind = if global.constant { "constant" } else { "global" };
        let _ = writeln!(out, "@{} = {} {}{}", global.name, kind, global.ty, init);
    }
    if !module.globals.is_empty() {
        let _ = writeln!(out);
    }

    for func in module.functions.values() {
        let _ = writeln!(out, "{}", dump_function(module, func));
    }

    out
}

/// Dump a single function to a string.
pub fn dump_function(module: &IrModule, func: &IrFunction) -> String {
    let mut out = String::new();

    let mut params: Vec<String> = func
        .signature
        .parameters
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{} %arg{}", p.ty, i))
        .collect();
    if func.signature.varargs {
        params.push("...".to_string());
    }

    if func.is_declaration() {
        let _ = writeln!(
            out,
            "declare {} @{}({})",
            func.signature.return_type,
            func.name,
            params.join(", ")
        );
        return out;
    }

    let _ = writeln!(
        out,
        "define {} @{}({}) {{",
        func.signature.return_type,
        func.name,
        params.join(", ")
    );

    for (i, block) in func.blocks.keys().enumerate() {
        if i > 0 {
            let _ = writeln!(out);
        }
        out.push_str(&dump_block(module, func, *block));
    }

    let _ = writeln!(out, "}}");
    out
}

/// Dump a basic block to a string.
pub fn dump_block(module: &IrModule, func: &IrFunction, block: IrBlockId) -> String {
    let mut out = String::new();
    let Some(bb) = func.block(block) else {
        return out;
    };

    let preds: Vec<String> = func
        .predecessors(block)
        .iter()
        .map(|p| format!("%{}", block_name(func, *p)))
        .collect();
    if preds.is_empty() {
        let _ = writeln!(out, "{}:", bb.name());
    } else {
        let _ = writeln!(out, "{}:{:>30}; preds = {}", bb.name(), "", preds.join(", "));
    }

    for &id in &bb.instructions {
        let _ = writeln!(out, "  {}", dump_instruction(module, func, id));
    }

    out
}

fn block_name(func: &IrFunction, block: IrBlockId) -> String {
    func.block(block)
        .map(|b| b.name())
        .unwrap_or_else(|| block.to_string())
}

fn inst_name(func: &IrFunction, id: IrId) -> String {
    match func.data(id).and_then(|d| d.name.as_ref()) {
        Some(name) => format!("%{}.{}", name, id.index()),
        None => id.to_string(),
    }
}

/// Render an operand
pub fn dump_value(module: &IrModule, func: Option<&IrFunction>, value: IrValue) -> String {
    match value {
        IrValue::Inst(id) => match func {
            Some(f) => inst_name(f, id),
            None => id.to_string(),
        },
        IrValue::Arg(n) => format!("%arg{}", n),
        IrValue::Global(g) => match module.global(g) {
            Some(global) => format!("@{}", global.name),
            None => format!("@{}", g),
        },
        IrValue::Function(f) => match module.function(f) {
            Some(function) => format!("@{}", function.name),
            None => format!("@{}", f),
        },
        IrValue::Block(b) => match func {
            Some(f) => format!("label %{}", block_name(f, b)),
            None => format!("label %{}", b),
        },
        IrValue::Const(_) => match module.constant(value) {
            Some(c) => dump_constant(module, func, c),
            None => "<bad constant>".to_string(),
        },
    }
}

fn dump_constant(module: &IrModule, func: Option<&IrFunction>, constant: &IrConstant) -> String {
    match constant {
        IrConstant::Int { value, .. } => value.to_string(),
        IrConstant::Float { bits, .. } => format!("{:?}", f64::from_bits(*bits)),
        IrConstant::Null => "null".to_string(),
        IrConstant::Undef(_) => "undef".to_string(),
        IrConstant::Array { elem_ty, elements } => {
            let elems: Vec<String> = elements
                .iter()
                .map(|e| format!("{} {}", elem_ty, dump_value(module, func, *e)))
                .collect();
            format!("[{}]", elems.join(", "))
        }
        IrConstant::Expr(expr) => {
            let ops: Vec<String> = expr
                .operands
                .iter()
                .map(|o| typed(module, func, *o))
                .collect();
            match &expr.op {
                ConstExprOp::GetElementPtr { source_ty } => {
                    format!("getelementptr ({}, {})", source_ty, ops.join(", "))
                }
                ConstExprOp::Cast(op) => format!("{} ({} to {})", op.name(), ops.join(", "), expr.ty),
                ConstExprOp::BinOp(op) => format!("{} ({})", op.name(), ops.join(", ")),
            }
        }
    }
}

fn typed(module: &IrModule, func: Option<&IrFunction>, value: IrValue) -> String {
    let ty = match (value, func) {
        (IrValue::Block(_), _) => return dump_value(module, func, value),
        (_, Some(f)) => module.value_type(f, value),
        (IrValue::Const(c), None) => module.constants.get(c).map(|c| c.ty()).unwrap_or(IrType::Void),
        _ => IrType::Ptr,
    };
    format!("{} {}", ty, dump_value(module, func, value))
}

/// Dump a single instruction to a string.
pub fn dump_instruction(module: &IrModule, func: &IrFunction, id: IrId) -> String {
    let Some(inst) = func.instruction(id) else {
        return format!("<erased {}>", id);
    };
    let ty = func.inst_type(id);
    let v = |value: IrValue| dump_value(module, Some(func), value);
    let t = |value: IrValue| typed(module, Some(func), value);

    let body = match inst {
        IrInstruction::BinOp { op, left, right } => {
            format!("{} {} {}, {}", op.name(), ty, v(*left), v(*right))
        }
        IrInstruction::Cmp { op, left, right } => {
            format!("{} {}, {}", op.name(), t(*left), v(*right))
        }
        IrInstruction::Cast { op, value } => format!("{} {} to {}", op.name(), t(*value), ty),
        IrInstruction::Select {
            condition,
            true_value,
            false_value,
        } => format!("select {}, {}, {}", t(*condition), t(*true_value), t(*false_value)),
        IrInstruction::Load { ptr, align, volatile } => {
            let mut s = format!("load{} {}, {}", if *volatile { " volatile" } else { "" }, ty, t(*ptr));
            if let Some(a) = align {
                let _ = write!(s, ", align {}", a);
            }
            s
        }
        IrInstruction::Store {
            value,
            ptr,
            align,
            volatile,
        } => {
            let mut s = format!(
                "store{} {}, {}",
                if *volatile { " volatile" } else { "" },
                t(*value),
                t(*ptr)
            );
            if let Some(a) = align {
                let _ = write!(s, ", align {}", a);
            }
            s
        }
        IrInstruction::GetElementPtr {
            source_ty,
            ptr,
            indices,
        } => {
            let idx: Vec<String> = indices.iter().map(|i| t(*i)).collect();
            format!("getelementptr {}, {}, {}", source_ty, t(*ptr), idx.join(", "))
        }
        IrInstruction::Alloca { allocated_ty, count } => {
            format!("alloca {}, {}", allocated_ty, t(*count))
        }
        IrInstruction::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(|a| t(*a)).collect();
            format!("call {} {}({})", ty, v(*callee), args.join(", "))
        }
        IrInstruction::Phi { incoming } => {
            let entries: Vec<String> = incoming
                .iter()
                .map(|(value, block)| format!("[ {}, %{} ]", v(*value), block_name(func, *block)))
                .collect();
            format!("phi {} {}", ty, entries.join(", "))
        }
        IrInstruction::Branch { target } => format!("br label %{}", block_name(func, *target)),
        IrInstruction::CondBranch {
            condition,
            true_target,
            false_target,
        } => format!(
            "br {}, label %{}, label %{}",
            t(*condition),
            block_name(func, *true_target),
            block_name(func, *false_target)
        ),
        IrInstruction::Return { value } => match value {
            Some(value) => format!("ret {}", t(*value)),
            None => "ret void".to_string(),
        },
        IrInstruction::Unreachable => "unreachable".to_string(),
    };

    if ty.is_void() {
        body
    } else {
        format!("{} = {}", inst_name(func, id), body)
    }
}
