use std::collections::{HashMap, HashSet};
use std::fmt;

use super::types::{TypeKind, TypeTable};
use super::{
    Block, BlockId, Callee, Constant, Function, InstKind, Module, Operand, Terminator, ValueId,
};

#[derive(Debug, Clone)]
pub struct VerifyError {
    message: String,
}

impl VerifyError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for VerifyError {}

fn err(func: &str, block: Option<BlockId>, message: String) -> VerifyError {
    match block {
        Some(block) => VerifyError::new(format!("{}/bb{}: {}", func, block.0, message)),
        None => VerifyError::new(format!("{}: {}", func, message)),
    }
}

/// Structural validity of a whole module: block numbering, value
/// definitions and uses, terminator targets, call signatures, phi
/// predecessors, and constant/global references.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for global in &module.globals {
        if let Some(init) = &global.init {
            verify_constant(module, &global.name, init)?;
            if !constant_fits(&module.types, init, global.ty) {
                return Err(VerifyError::new(format!(
                    "@{}: initializer does not match declared type",
                    global.name
                )));
            }
        }
    }
    for func in &module.funcs {
        if !func.is_declaration() {
            verify_function(module, func)?;
        }
    }
    Ok(())
}

fn verify_function(module: &Module, func: &Function) -> Result<(), VerifyError> {
    let name = func.name.as_str();

    let mut blocks: HashMap<BlockId, &Block> = HashMap::new();
    for (i, block) in func.blocks.iter().enumerate() {
        if block.id.index() != i {
            return Err(err(
                name,
                None,
                format!("block {:?} out of position", block.id),
            ));
        }
        blocks.insert(block.id, block);
    }

    let mut defined: HashSet<ValueId> = HashSet::new();
    for i in 0..func.sig.params.len() {
        defined.insert(ValueId(i as u32));
    }
    for block in &func.blocks {
        for inst in &block.insts {
            if let Some(result) = inst.result {
                if result.id.index() >= func.next_value as usize {
                    return Err(err(
                        name,
                        Some(block.id),
                        format!("value {:?} beyond next_value", result.id),
                    ));
                }
                if !defined.insert(result.id) {
                    return Err(err(
                        name,
                        Some(block.id),
                        format!("duplicate value {:?}", result.id),
                    ));
                }
            }
        }
    }

    let preds = predecessors(func);
    for block in &func.blocks {
        for inst in &block.insts {
            let mut check = |op: &Operand| -> Result<(), VerifyError> {
                match op {
                    Operand::Value(id) => {
                        if !defined.contains(id) {
                            return Err(err(
                                name,
                                Some(block.id),
                                format!("use of undefined value {:?}", id),
                            ));
                        }
                    }
                    Operand::Const(c) => verify_constant(module, name, c)?,
                }
                Ok(())
            };
            for_each_operand(&inst.kind, &mut check)?;

            match &inst.kind {
                InstKind::Call {
                    callee: Callee::Direct(target),
                    args,
                } => {
                    if target.index() >= module.funcs.len() {
                        return Err(err(name, Some(block.id), "call to unknown function".into()));
                    }
                    let sig = &module.func(*target).sig;
                    if sig.params.len() != args.len() {
                        return Err(err(
                            name,
                            Some(block.id),
                            format!(
                                "call to {} with {} args, expected {}",
                                module.func(*target).name,
                                args.len(),
                                sig.params.len()
                            ),
                        ));
                    }
                }
                InstKind::Phi { incoming, .. } => {
                    let expected = preds.get(&block.id).cloned().unwrap_or_default();
                    for (from, _) in incoming {
                        if !expected.contains(from) {
                            return Err(err(
                                name,
                                Some(block.id),
                                format!("phi incoming from non-predecessor {:?}", from),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        verify_terminator(module, name, block, &blocks)?;
    }

    Ok(())
}

fn verify_terminator(
    module: &Module,
    name: &str,
    block: &Block,
    blocks: &HashMap<BlockId, &Block>,
) -> Result<(), VerifyError> {
    let target_ok = |id: BlockId| -> Result<(), VerifyError> {
        if blocks.contains_key(&id) {
            Ok(())
        } else {
            Err(err(
                name,
                Some(block.id),
                format!("branch to unknown block {:?}", id),
            ))
        }
    };
    match &block.term {
        Terminator::Ret { value } => {
            if let Some(Operand::Const(c)) = value {
                verify_constant(module, name, c)?;
            }
            Ok(())
        }
        Terminator::Br { target } => target_ok(*target),
        Terminator::CondBr { then_b, else_b, .. } => {
            target_ok(*then_b)?;
            target_ok(*else_b)
        }
        Terminator::Switch { cases, default, .. } => {
            for case in cases {
                target_ok(case.target)?;
            }
            target_ok(*default)
        }
        Terminator::Unreachable => Ok(()),
    }
}

fn verify_constant(module: &Module, name: &str, c: &Constant) -> Result<(), VerifyError> {
    match c {
        Constant::GlobalAddr { global, offset } => {
            if global.index() >= module.globals.len() {
                return Err(VerifyError::new(format!(
                    "{}: address of unknown global",
                    name
                )));
            }
            let target = module.global(*global);
            let size = module.layout.size_of(&module.types, target.ty);
            if *offset > size {
                return Err(VerifyError::new(format!(
                    "{}: address offset {} past the end of @{}",
                    name, offset, target.name
                )));
            }
            Ok(())
        }
        Constant::FuncAddr { func } => {
            if func.index() >= module.funcs.len() {
                return Err(VerifyError::new(format!(
                    "{}: address of unknown function",
                    name
                )));
            }
            Ok(())
        }
        Constant::Aggregate { fields, .. } => {
            for field in fields {
                verify_constant(module, name, field)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Shallow shape check of an initializer against a declared type.
fn constant_fits(types: &TypeTable, c: &Constant, ty: super::TypeId) -> bool {
    match c {
        Constant::Undef(t) | Constant::Zero(t) => types.same(*t, ty),
        Constant::Int { ty: t, .. } | Constant::Float { ty: t, .. } => types.same(*t, ty),
        Constant::Null(_) | Constant::GlobalAddr { .. } | Constant::FuncAddr { .. } => {
            matches!(types.kind(ty), TypeKind::Ptr)
        }
        Constant::Bytes { data, .. } => {
            matches!(types.kind(ty), TypeKind::Array { elem, len }
                if *len == data.len() as u64
                    && matches!(types.kind(*elem), TypeKind::Int { bits: 8 }))
        }
        Constant::Aggregate { fields, .. } => match types.kind(ty) {
            TypeKind::Array { elem, len } => {
                *len == fields.len() as u64
                    && fields.iter().all(|f| constant_fits(types, f, *elem))
            }
            TypeKind::Struct { fields: field_tys } => {
                field_tys.len() == fields.len()
                    && fields
                        .iter()
                        .zip(field_tys.iter())
                        .all(|(f, t)| constant_fits(types, f, *t))
            }
            _ => false,
        },
    }
}

fn predecessors(func: &Function) -> HashMap<BlockId, HashSet<BlockId>> {
    let mut preds: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for block in &func.blocks {
        let mut add = |target: BlockId| {
            preds.entry(target).or_default().insert(block.id);
        };
        match &block.term {
            Terminator::Br { target } => add(*target),
            Terminator::CondBr { then_b, else_b, .. } => {
                add(*then_b);
                add(*else_b);
            }
            Terminator::Switch { cases, default, .. } => {
                for case in cases {
                    add(case.target);
                }
                add(*default);
            }
            Terminator::Ret { .. } | Terminator::Unreachable => {}
        }
    }
    preds
}

/// Visits every operand of an instruction.
fn for_each_operand<E>(
    kind: &InstKind,
    f: &mut impl FnMut(&Operand) -> Result<(), E>,
) -> Result<(), E> {
    match kind {
        InstKind::BinOp { lhs, rhs, .. }
        | InstKind::ICmp { lhs, rhs, .. }
        | InstKind::FCmp { lhs, rhs, .. } => {
            f(lhs)?;
            f(rhs)
        }
        InstKind::Select {
            cond,
            then_value,
            else_value,
        } => {
            f(cond)?;
            f(then_value)?;
            f(else_value)
        }
        InstKind::Cast { value, .. } => f(value),
        InstKind::Alloca { .. } => Ok(()),
        InstKind::Load { ptr, .. } => f(ptr),
        InstKind::Store { value, ptr, .. } => {
            f(value)?;
            f(ptr)
        }
        InstKind::Gep { base, indices, .. } => {
            f(base)?;
            for index in indices {
                f(index)?;
            }
            Ok(())
        }
        InstKind::Call { callee, args } => {
            if let Callee::Indirect(op) = callee {
                f(op)?;
            }
            for arg in args {
                f(arg)?;
            }
            Ok(())
        }
        InstKind::Phi { incoming, .. } => {
            for (_, op) in incoming {
                f(op)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "../tests/t_verify.rs"]
mod tests;
