//! LLVM-flavored textual form of a module, for dumps and golden tests.

use std::fmt;

use super::types::TypeKind;
use super::{
    BinOp, Callee, CastKind, CmpOp, Constant, FCmpOp, Endian, Function, InstKind, Instruction,
    Module, Operand, Terminator,
};

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_module(f, self)
    }
}

fn write_module(f: &mut fmt::Formatter<'_>, module: &Module) -> fmt::Result {
    writeln!(f, "; ModuleID = '{}'", module.name)?;
    let endian = match module.layout.endian {
        Endian::Little => "e",
        Endian::Big => "E",
    };
    writeln!(
        f,
        "target datalayout = \"{}-p:{}\"",
        endian,
        module.layout.ptr_bytes * 8
    )?;

    if !module.globals.is_empty() {
        writeln!(f)?;
    }
    for global in &module.globals {
        let kind = if global.constant { "constant" } else { "global" };
        match &global.init {
            Some(init) => writeln!(
                f,
                "@{} = {} {} {}",
                global.name,
                kind,
                module.types.type_to_string(global.ty),
                const_to_string(module, init)
            )?,
            None => writeln!(
                f,
                "@{} = external {} {}",
                global.name,
                kind,
                module.types.type_to_string(global.ty)
            )?,
        }
    }

    for func in &module.funcs {
        writeln!(f)?;
        write_function(f, module, func)?;
    }
    Ok(())
}

fn write_function(f: &mut fmt::Formatter<'_>, module: &Module, func: &Function) -> fmt::Result {
    let ret = module.types.type_to_string(func.sig.ret);
    let params: Vec<String> = func
        .sig
        .params
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("{} %{}", module.types.type_to_string(*ty), i))
        .collect();
    if func.is_declaration() {
        return writeln!(f, "declare {} @{}({})", ret, func.name, params.join(", "));
    }

    writeln!(f, "define {} @{}({}) {{", ret, func.name, params.join(", "))?;
    for (i, block) in func.blocks.iter().enumerate() {
        if i > 0 {
            writeln!(f)?;
        }
        writeln!(f, "{}:", block.name)?;
        for inst in &block.insts {
            writeln!(f, "  {}", inst_to_string(module, func, inst))?;
        }
        writeln!(f, "  {}", term_to_string(module, func, &block.term))?;
    }
    writeln!(f, "}}")
}

fn op_to_string(module: &Module, op: &Operand) -> String {
    match op {
        Operand::Value(id) => format!("%{}", id.0),
        Operand::Const(c) => const_to_string(module, c),
    }
}

fn const_to_string(module: &Module, c: &Constant) -> String {
    match c {
        Constant::Undef(_) => "undef".to_string(),
        Constant::Zero(_) => "zeroinitializer".to_string(),
        Constant::Int { value, .. } => format!("{}", value),
        Constant::Float { ty, bits } => match module.types.kind(*ty) {
            TypeKind::Float { bits: 32 } => format!("{:e}", f32::from_bits(*bits as u32)),
            _ => format!("{:e}", f64::from_bits(*bits)),
        },
        Constant::Null(_) => "null".to_string(),
        Constant::Bytes { data, .. } => {
            let mut out = String::from("c\"");
            for b in data {
                if b.is_ascii_graphic() || *b == b' ' {
                    out.push(*b as char);
                } else {
                    out.push_str(&format!("\\{:02X}", b));
                }
            }
            out.push('"');
            out
        }
        Constant::Aggregate { ty, fields } => {
            let inner: Vec<String> = fields
                .iter()
                .map(|field| {
                    format!(
                        "{} {}",
                        const_ty_string(module, field),
                        const_to_string(module, field)
                    )
                })
                .collect();
            match module.types.kind(*ty) {
                TypeKind::Array { .. } => format!("[{}]", inner.join(", ")),
                _ => format!("{{ {} }}", inner.join(", ")),
            }
        }
        Constant::GlobalAddr { global, offset } => {
            let name = &module.global(*global).name;
            if *offset == 0 {
                format!("@{}", name)
            } else {
                format!("getelementptr (@{}, {})", name, offset)
            }
        }
        Constant::FuncAddr { func } => format!("@{}", module.func(*func).name),
    }
}

/// Display type of a nested constant; address constants print as `ptr`.
fn const_ty_string(module: &Module, c: &Constant) -> String {
    match c {
        Constant::Undef(ty)
        | Constant::Zero(ty)
        | Constant::Int { ty, .. }
        | Constant::Float { ty, .. }
        | Constant::Null(ty)
        | Constant::Bytes { ty, .. }
        | Constant::Aggregate { ty, .. } => module.types.type_to_string(*ty),
        Constant::GlobalAddr { .. } | Constant::FuncAddr { .. } => "ptr".to_string(),
    }
}

fn inst_to_string(module: &Module, func: &Function, inst: &Instruction) -> String {
    let result = match inst.result {
        Some(def) => format!("%{} = ", def.id.0),
        None => String::new(),
    };
    let body = match &inst.kind {
        InstKind::BinOp { op, lhs, rhs } => format!(
            "{} {}, {}",
            binop_name(*op),
            op_to_string(module, lhs),
            op_to_string(module, rhs)
        ),
        InstKind::ICmp { op, lhs, rhs } => format!(
            "icmp {} {}, {}",
            cmp_name(*op),
            op_to_string(module, lhs),
            op_to_string(module, rhs)
        ),
        InstKind::FCmp { op, lhs, rhs } => format!(
            "fcmp {} {}, {}",
            fcmp_name(*op),
            op_to_string(module, lhs),
            op_to_string(module, rhs)
        ),
        InstKind::Select {
            cond,
            then_value,
            else_value,
        } => format!(
            "select {}, {}, {}",
            op_to_string(module, cond),
            op_to_string(module, then_value),
            op_to_string(module, else_value)
        ),
        InstKind::Cast { kind, value, ty } => format!(
            "{} {} to {}",
            cast_name(*kind),
            op_to_string(module, value),
            module.types.type_to_string(*ty)
        ),
        InstKind::Alloca { ty } => format!("alloca {}", module.types.type_to_string(*ty)),
        InstKind::Load { ty, ptr } => format!(
            "load {}, ptr {}",
            module.types.type_to_string(*ty),
            op_to_string(module, ptr)
        ),
        InstKind::Store { ty, value, ptr } => format!(
            "store {} {}, ptr {}",
            module.types.type_to_string(*ty),
            op_to_string(module, value),
            op_to_string(module, ptr)
        ),
        InstKind::Gep {
            pointee,
            base,
            indices,
        } => {
            let idx: Vec<String> = indices.iter().map(|op| op_to_string(module, op)).collect();
            format!(
                "getelementptr {}, ptr {}, {}",
                module.types.type_to_string(*pointee),
                op_to_string(module, base),
                idx.join(", ")
            )
        }
        InstKind::Call { callee, args } => {
            let target = match callee {
                Callee::Direct(func) => format!("@{}", module.func(*func).name),
                Callee::Indirect(op) => op_to_string(module, op),
            };
            let args: Vec<String> = args.iter().map(|op| op_to_string(module, op)).collect();
            format!("call {}({})", target, args.join(", "))
        }
        InstKind::Phi { incoming, .. } => {
            let inner: Vec<String> = incoming
                .iter()
                .map(|(block, op)| {
                    format!(
                        "[ {}, %{} ]",
                        op_to_string(module, op),
                        func.block(*block).name
                    )
                })
                .collect();
            format!("phi {}", inner.join(", "))
        }
    };
    format!("{}{}", result, body)
}

fn term_to_string(module: &Module, func: &Function, term: &Terminator) -> String {
    match term {
        Terminator::Ret { value: None } => "ret void".to_string(),
        Terminator::Ret { value: Some(op) } => format!("ret {}", op_to_string(module, op)),
        Terminator::Br { target } => format!("br label %{}", func.block(*target).name),
        Terminator::CondBr {
            cond,
            then_b,
            else_b,
        } => format!(
            "br {}, label %{}, label %{}",
            op_to_string(module, cond),
            func.block(*then_b).name,
            func.block(*else_b).name
        ),
        Terminator::Switch {
            value,
            cases,
            default,
        } => {
            let inner: Vec<String> = cases
                .iter()
                .map(|case| format!("{}, label %{}", case.value, func.block(case.target).name))
                .collect();
            format!(
                "switch {}, label %{} [ {} ]",
                op_to_string(module, value),
                func.block(*default).name,
                inner.join("  ")
            )
        }
        Terminator::Unreachable => "unreachable".to_string(),
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::UDiv => "udiv",
        BinOp::SDiv => "sdiv",
        BinOp::URem => "urem",
        BinOp::SRem => "srem",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::Shl => "shl",
        BinOp::LShr => "lshr",
        BinOp::AShr => "ashr",
    }
}

fn cmp_name(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "eq",
        CmpOp::Ne => "ne",
        CmpOp::ULt => "ult",
        CmpOp::ULe => "ule",
        CmpOp::UGt => "ugt",
        CmpOp::UGe => "uge",
        CmpOp::SLt => "slt",
        CmpOp::SLe => "sle",
        CmpOp::SGt => "sgt",
        CmpOp::SGe => "sge",
    }
}

fn fcmp_name(op: FCmpOp) -> &'static str {
    match op {
        FCmpOp::OEq => "oeq",
        FCmpOp::ONe => "one",
        FCmpOp::OLt => "olt",
        FCmpOp::OLe => "ole",
        FCmpOp::OGt => "ogt",
        FCmpOp::OGe => "oge",
    }
}

fn cast_name(kind: CastKind) -> &'static str {
    match kind {
        CastKind::Trunc => "trunc",
        CastKind::ZExt => "zext",
        CastKind::SExt => "sext",
        CastKind::Bitcast => "bitcast",
        CastKind::PtrToInt => "ptrtoint",
        CastKind::IntToPtr => "inttoptr",
        CastKind::SIToFP => "sitofp",
        CastKind::UIToFP => "uitofp",
    }
}

#[cfg(test)]
#[path = "../tests/t_print.rs"]
mod tests;
