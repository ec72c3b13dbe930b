//! Rematerialization of evaluated state.
//!
//! Every global in the dirty set gets its initializer replaced by a
//! constant decoded from abstract-memory bytes. Compile-time heap objects
//! reachable from those constants become fresh module globals.

use std::collections::HashMap;

use crate::ir::{Constant, Global, GlobalId, TypeId, TypeKind};

use super::errors::{malformed, EvalError};
use super::memory::{ByteState, ObjectId, ObjectKind, RelocTarget};
use super::Eval;

pub(super) fn write_back(ev: &mut Eval) -> Result<(), EvalError> {
    let dirty: Vec<GlobalId> = ev.mem.dirty_globals().collect();
    let mut minted: HashMap<ObjectId, GlobalId> = HashMap::new();
    for global in dirty {
        let object = ev
            .mem
            .existing_global_object(global)
            .ok_or_else(|| malformed("dirty global without a shadow object"))?;
        let ty = ev.module.global(global).ty;
        let init = materialize(ev, &mut minted, object, ty, 0)?;
        ev.module.global_mut(global).init = Some(init);
        let name = ev.module.global(global).name.clone();
        ev.trace(0, &format!("materialize @{}", name));
    }
    Ok(())
}

/// Decodes the object bytes at `offset` as a constant of type `ty`.
fn materialize(
    ev: &mut Eval,
    minted: &mut HashMap<ObjectId, GlobalId>,
    object: ObjectId,
    ty: TypeId,
    offset: u64,
) -> Result<Constant, EvalError> {
    let kind = ev.module.types.kind(ty).clone();
    match kind {
        TypeKind::Void => Ok(Constant::Zero(ty)),
        TypeKind::Int { bits } => {
            let size = u64::from(bits).div_ceil(8);
            scalar_bytes(ev, object, offset, size)?
                .map_or(Ok(Constant::Undef(ty)), |value| Ok(Constant::Int { ty, value }))
        }
        TypeKind::Float { bits } => {
            let size = u64::from(bits) / 8;
            scalar_bytes(ev, object, offset, size)?
                .map_or(Ok(Constant::Undef(ty)), |value| Ok(Constant::Float { ty, bits: value }))
        }
        TypeKind::Ptr => {
            if let Some(reloc) = ev.mem.object(object).relocs.get(&offset).copied() {
                return match reloc.target {
                    RelocTarget::Object(target) => {
                        let global = materialize_object(ev, minted, target)?;
                        Ok(Constant::GlobalAddr {
                            global,
                            offset: reloc.addend,
                        })
                    }
                    RelocTarget::Func(func) => Ok(Constant::FuncAddr { func }),
                };
            }
            match scalar_bytes(ev, object, offset, ev.mem.layout().ptr_bytes)? {
                None => Ok(Constant::Undef(ty)),
                Some(0) => Ok(Constant::Null(ty)),
                Some(_) => Err(malformed("pointer global holds a non-null integer")),
            }
        }
        TypeKind::Array { elem, len } => {
            let stride = {
                let module = &ev.module;
                module.layout.stride_of(&module.types, elem)
            };
            if region_is_zero(ev, object, offset, stride * len)? {
                return Ok(Constant::Zero(ty));
            }
            // Byte arrays print as strings when fully concrete.
            if matches!(ev.module.types.kind(elem), TypeKind::Int { bits: 8 })
                && region_is_known(ev, object, offset, len)
            {
                let obj = ev.mem.object(object);
                let data = obj.bytes[offset as usize..(offset + len) as usize].to_vec();
                return Ok(Constant::Bytes { ty, data });
            }
            let mut fields = Vec::with_capacity(len as usize);
            for i in 0..len {
                fields.push(materialize(ev, minted, object, elem, offset + i * stride)?);
            }
            Ok(Constant::Aggregate { ty, fields })
        }
        TypeKind::Struct { fields } => {
            let size = {
                let module = &ev.module;
                module.layout.size_of(&module.types, ty)
            };
            if region_is_zero(ev, object, offset, size)? {
                return Ok(Constant::Zero(ty));
            }
            let mut values = Vec::with_capacity(fields.len());
            for (i, field_ty) in fields.iter().enumerate() {
                let field_off = {
                    let module = &ev.module;
                    module.layout.field_offset(&module.types, ty, i)
                };
                values.push(materialize(ev, minted, object, *field_ty, offset + field_off)?);
            }
            Ok(Constant::Aggregate { ty, fields: values })
        }
    }
}

/// The scalar bytes at `offset`, or `None` when entirely uninitialized.
/// Symbolic bytes here violate the writeback invariant: the driver rolls
/// back any init that leaves them in a dirty global.
fn scalar_bytes(
    ev: &Eval,
    object: ObjectId,
    offset: u64,
    size: u64,
) -> Result<Option<u64>, EvalError> {
    let obj = ev.mem.object(object);
    let range = offset as usize..(offset + size) as usize;
    let states = &obj.state[range.clone()];
    if states.iter().any(|s| *s == ByteState::Symbolic) {
        return Err(malformed("symbolic bytes survived to writeback"));
    }
    if states.iter().any(|s| *s == ByteState::Ptr) {
        return Err(malformed("pointer bytes read at non-pointer type"));
    }
    if states.iter().all(|s| *s == ByteState::Uninit) {
        return Ok(None);
    }
    Ok(Some(ev.mem.layout().decode_int(&obj.bytes[range])))
}

fn region_is_zero(
    ev: &Eval,
    object: ObjectId,
    offset: u64,
    size: u64,
) -> Result<bool, EvalError> {
    let obj = ev.mem.object(object);
    // Struct tail padding may reach past an untyped allocation's end.
    let end = (offset + size).min(obj.size);
    let range = offset as usize..end as usize;
    if obj.state[range.clone()]
        .iter()
        .any(|s| *s == ByteState::Symbolic)
    {
        return Err(malformed("symbolic bytes survived to writeback"));
    }
    let has_reloc = obj.relocs.range(offset..end).next().is_some();
    Ok(!has_reloc
        && obj.state[range.clone()].iter().all(|s| *s == ByteState::Known)
        && obj.bytes[range].iter().all(|b| *b == 0))
}

fn region_is_known(ev: &Eval, object: ObjectId, offset: u64, size: u64) -> bool {
    let obj = ev.mem.object(object);
    let end = (offset + size).min(obj.size);
    let range = offset as usize..end as usize;
    obj.state[range].iter().all(|s| *s == ByteState::Known)
}

/// The module global backing an object, minting one for compile-time heap
/// allocations.
fn materialize_object(
    ev: &mut Eval,
    minted: &mut HashMap<ObjectId, GlobalId>,
    object: ObjectId,
) -> Result<GlobalId, EvalError> {
    match ev.mem.object(object).kind {
        ObjectKind::Global(global) => Ok(global),
        ObjectKind::Stack { .. } => Err(EvalError::EscapingAllocation),
        ObjectKind::Heap => {
            if let Some(global) = minted.get(&object) {
                return Ok(*global);
            }
            let ty = heap_global_type(ev, object)?;
            let name = unique_global_name(ev, &ev.mem.object(object).name.clone());
            let global = ev.module.add_global(Global {
                name,
                ty,
                init: None,
                constant: false,
            });
            // Mint before decoding: heap objects may reference each other.
            minted.insert(object, global);
            let init = materialize(ev, minted, object, ty, 0)?;
            ev.module.global_mut(global).init = Some(init);
            Ok(global)
        }
    }
}

/// Heap allocations are untyped; shape a type around their contents: a
/// plain byte array, or a struct interleaving byte runs with pointer
/// fields where relocations live.
fn heap_global_type(ev: &mut Eval, object: ObjectId) -> Result<TypeId, EvalError> {
    let (size, reloc_offsets): (u64, Vec<u64>) = {
        let obj = ev.mem.object(object);
        (obj.size, obj.relocs.keys().copied().collect())
    };
    let ptr_bytes = ev.mem.layout().ptr_bytes;
    let i8_ty = ev.module.types.add(TypeKind::Int { bits: 8 });
    if reloc_offsets.is_empty() {
        return Ok(ev.module.types.add(TypeKind::Array {
            elem: i8_ty,
            len: size,
        }));
    }

    let mut fields = Vec::new();
    let mut end = 0u64;
    for off in reloc_offsets {
        if off % ptr_bytes != 0 {
            return Err(malformed("unaligned pointer in compile-time allocation"));
        }
        if off > end {
            fields.push(ev.module.types.add(TypeKind::Array {
                elem: i8_ty,
                len: off - end,
            }));
        }
        fields.push(ev.module.types.add(TypeKind::Ptr));
        end = off + ptr_bytes;
    }
    if size > end {
        fields.push(ev.module.types.add(TypeKind::Array {
            elem: i8_ty,
            len: size - end,
        }));
    }
    Ok(ev.module.types.add(TypeKind::Struct { fields }))
}

fn unique_global_name(ev: &Eval, base: &str) -> String {
    if ev.module.global_by_name(base).is_none() {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}.{}", base, n);
        if ev.module.global_by_name(&candidate).is_none() {
            return candidate;
        }
        n += 1;
    }
}
