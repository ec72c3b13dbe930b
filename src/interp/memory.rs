//! Abstract memory: the interpreter's shadow view of program storage.
//!
//! Each object mirrors one global variable, one stack allocation, or one
//! compile-time heap allocation. Storage is byte-addressable with explicit
//! initialization state per byte; pointer-sized ranges written with pointer
//! values are tracked as relocations so they survive copies and can be
//! rematerialized as address constants during writeback.

use std::collections::BTreeMap;
use std::collections::HashMap;

use indexmap::IndexSet;

use crate::ir::{DataLayout, FuncId, GlobalId, Module, TypeId, TypeKind, TypeTable};

use super::errors::{malformed, EvalError};
use super::value::{Pointer, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u32);

impl ObjectId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Shadow of a module global; created lazily from its initializer.
    Global(GlobalId),
    /// A stack allocation owned by the frame at the given depth.
    Stack { frame: u32 },
    /// A compile-time allocation minted by a runtime builtin; becomes a new
    /// module global during writeback.
    Heap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteState {
    Uninit,
    /// Concrete data byte.
    Known,
    /// Part of a pointer-sized relocation.
    Ptr,
    /// Written from a `Local` handle; contents unknown until runtime.
    Symbolic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocTarget {
    Object(ObjectId),
    Func(FuncId),
}

/// A pointer value occupying `ptr_bytes` bytes at its key offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reloc {
    pub target: RelocTarget,
    pub addend: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub kind: ObjectKind,
    /// Declared type, where one exists (globals and allocas).
    pub ty: Option<TypeId>,
    pub size: u64,
    pub bytes: Vec<u8>,
    pub state: Vec<ByteState>,
    pub relocs: BTreeMap<u64, Reloc>,
    pub dirty: bool,
    pub readonly: bool,
    pub freed: bool,
    /// Name for diagnostics and for globals minted at writeback.
    pub name: String,
}

impl Object {
    fn new(kind: ObjectKind, ty: Option<TypeId>, size: u64, name: String) -> Self {
        Self {
            kind,
            ty,
            size,
            bytes: vec![0; size as usize],
            state: vec![ByteState::Uninit; size as usize],
            relocs: BTreeMap::new(),
            dirty: false,
            readonly: false,
            freed: false,
            name,
        }
    }

    pub fn has_symbolic_bytes(&self) -> bool {
        self.state.iter().any(|s| *s == ByteState::Symbolic)
    }

    fn range(&self, offset: u64, len: u64) -> Result<std::ops::Range<usize>, EvalError> {
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(EvalError::Unevaluable);
        }
        Ok(offset as usize..(offset + len) as usize)
    }
}

/// Snapshot of all abstract-memory state, taken by the driver before each
/// top-level initializer so a failed evaluation can be rolled back.
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    objects: Vec<Object>,
    by_global: HashMap<GlobalId, ObjectId>,
    dirty: IndexSet<GlobalId>,
    generation: u64,
}

#[derive(Debug)]
pub struct Memory {
    layout: DataLayout,
    objects: Vec<Object>,
    by_global: HashMap<GlobalId, ObjectId>,
    /// Globals written through abstract stores, in first-write order.
    dirty: IndexSet<GlobalId>,
    /// Bumped whenever a new global enters the dirty set; the side-effect
    /// cache discards itself when it observes a new generation.
    generation: u64,
}

impl Memory {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            layout,
            objects: Vec::new(),
            by_global: HashMap::new(),
            dirty: IndexSet::new(),
            generation: 0,
        }
    }

    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    pub fn object(&self, id: ObjectId) -> &Object {
        &self.objects[id.index()]
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dirty_globals(&self) -> impl Iterator<Item = GlobalId> + '_ {
        self.dirty.iter().copied()
    }

    pub fn is_dirty(&self, global: GlobalId) -> bool {
        self.dirty.contains(&global)
    }

    /// The shadow object for a global, if it has been touched.
    pub fn existing_global_object(&self, global: GlobalId) -> Option<ObjectId> {
        self.by_global.get(&global).copied()
    }

    /// The shadow object for a global, created from its initializer on
    /// first touch.
    pub fn global_object(&mut self, module: &Module, global: GlobalId) -> Result<ObjectId, EvalError> {
        if let Some(id) = self.by_global.get(&global) {
            return Ok(*id);
        }
        let decl = module.global(global);
        let size = module.layout.size_of(&module.types, decl.ty);
        let mut obj = Object::new(
            ObjectKind::Global(global),
            Some(decl.ty),
            size,
            decl.name.clone(),
        );
        obj.readonly = decl.constant;
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(obj);
        self.by_global.insert(global, id);
        if let Some(init) = module.global(global).init.clone() {
            self.encode_constant(module, id, 0, &init)?;
        }
        Ok(id)
    }

    pub fn alloc_stack(&mut self, ty: TypeId, size: u64, frame: u32) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(Object::new(
            ObjectKind::Stack { frame },
            Some(ty),
            size,
            String::new(),
        ));
        id
    }

    /// A zero-filled compile-time heap allocation (runtime builtins zero
    /// their storage).
    pub fn alloc_heap(&mut self, size: u64, name: String) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        let mut obj = Object::new(ObjectKind::Heap, None, size, name);
        obj.state.fill(ByteState::Known);
        self.objects.push(obj);
        id
    }

    /// Drops a frame's stack objects on frame exit. Escape analysis has
    /// already rejected any pointer that would outlive them.
    pub fn free_stack(&mut self, ids: &[ObjectId]) {
        for id in ids {
            self.objects[id.index()].freed = true;
        }
    }

    pub fn mark_dirty(&mut self, global: GlobalId) {
        if self.dirty.insert(global) {
            self.generation += 1;
        }
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            objects: self.objects.clone(),
            by_global: self.by_global.clone(),
            dirty: self.dirty.clone(),
            generation: self.generation,
        }
    }

    pub fn restore(&mut self, snapshot: MemorySnapshot) {
        self.objects = snapshot.objects;
        self.by_global = snapshot.by_global;
        self.dirty = snapshot.dirty;
        // The generation keeps rising so the side-effect cache cannot
        // confuse pre- and post-rollback states.
        self.generation = self.generation.max(snapshot.generation) + 1;
    }

    /// Any dirty global still holding symbolic bytes cannot be
    /// rematerialized; the driver treats this as an unevaluable init.
    pub fn dirty_global_with_symbolic_bytes(&self) -> Option<GlobalId> {
        self.dirty.iter().copied().find(|g| {
            self.by_global
                .get(g)
                .is_some_and(|id| self.object(*id).has_symbolic_bytes())
        })
    }

    // --- reads ---

    /// Reads a typed value from an object. Fails if any byte of the region
    /// is uninitialized, symbolic, or part of a relocation that does not
    /// line up with a pointer-typed read.
    pub fn read_typed(
        &self,
        types: &TypeTable,
        id: ObjectId,
        offset: u64,
        ty: TypeId,
    ) -> Result<Value, EvalError> {
        let obj = self.object(id);
        if obj.freed {
            return Err(EvalError::Unevaluable);
        }
        match types.kind(ty) {
            TypeKind::Void => Ok(Value::Undef),
            TypeKind::Int { bits } => {
                let size = u64::from(*bits).div_ceil(8);
                let range = obj.range(offset, size)?;
                self.require_known(obj, range.clone())?;
                Ok(Value::Int {
                    bits: *bits,
                    value: self.layout.decode_int(&obj.bytes[range]),
                })
            }
            TypeKind::Float { bits } => {
                let size = u64::from(*bits) / 8;
                let range = obj.range(offset, size)?;
                self.require_known(obj, range.clone())?;
                Ok(Value::Float {
                    bits: *bits,
                    raw: self.layout.decode_int(&obj.bytes[range]),
                })
            }
            TypeKind::Ptr => {
                let size = self.layout.ptr_bytes;
                let range = obj.range(offset, size)?;
                if let Some(reloc) = obj.relocs.get(&offset) {
                    return Ok(match reloc.target {
                        RelocTarget::Object(target) => Value::Pointer(Pointer {
                            object: target,
                            offset: reloc.addend,
                        }),
                        RelocTarget::Func(func) => Value::FuncPtr(func),
                    });
                }
                // No relocation here: a stored null or integer pattern.
                self.require_known(obj, range.clone())?;
                Ok(Value::Int {
                    bits: (size * 8) as u32,
                    value: self.layout.decode_int(&obj.bytes[range]),
                })
            }
            TypeKind::Array { elem, len } => {
                let stride = self.layout.stride_of(types, *elem);
                let mut fields = Vec::with_capacity(*len as usize);
                for i in 0..*len {
                    fields.push(self.read_typed(types, id, offset + i * stride, *elem)?);
                }
                Ok(Value::Aggregate(fields))
            }
            TypeKind::Struct { fields } => {
                let field_tys = fields.clone();
                let mut values = Vec::with_capacity(field_tys.len());
                for (i, field_ty) in field_tys.iter().enumerate() {
                    let field_off = self.layout.field_offset(types, ty, i);
                    values.push(self.read_typed(types, id, offset + field_off, *field_ty)?);
                }
                Ok(Value::Aggregate(values))
            }
        }
    }

    fn require_known(&self, obj: &Object, range: std::ops::Range<usize>) -> Result<(), EvalError> {
        if obj.state[range].iter().all(|s| *s == ByteState::Known) {
            Ok(())
        } else {
            Err(EvalError::Unevaluable)
        }
    }

    // --- writes ---

    /// Writes a typed value into an object, committing known scalars as
    /// target-endian bytes, pointers as relocations, and `Local` handles as
    /// symbolic bytes. Stores into read-only globals are fatal.
    pub fn write_typed(
        &mut self,
        types: &TypeTable,
        id: ObjectId,
        offset: u64,
        value: &Value,
        ty: TypeId,
    ) -> Result<(), EvalError> {
        {
            let obj = self.object(id);
            if obj.freed {
                return Err(EvalError::Unevaluable);
            }
            if obj.readonly {
                return Err(EvalError::WriteToConstant(obj.name.clone()));
            }
        }
        self.write_inner(types, id, offset, value, ty)?;
        let obj = &mut self.objects[id.index()];
        obj.dirty = true;
        if let ObjectKind::Global(global) = obj.kind {
            self.mark_dirty(global);
        }
        Ok(())
    }

    fn write_inner(
        &mut self,
        types: &TypeTable,
        id: ObjectId,
        offset: u64,
        value: &Value,
        ty: TypeId,
    ) -> Result<(), EvalError> {
        let size = self.layout.size_of(types, ty);
        match value {
            Value::Int { value, .. } => {
                let range = self.object(id).range(offset, size)?;
                self.clobber(id, offset, size);
                let obj = &mut self.objects[id.index()];
                let layout = self.layout;
                layout.encode_int(&mut obj.bytes[range.clone()], *value);
                obj.state[range].fill(ByteState::Known);
            }
            Value::Float { raw, .. } => {
                let range = self.object(id).range(offset, size)?;
                self.clobber(id, offset, size);
                let obj = &mut self.objects[id.index()];
                let layout = self.layout;
                layout.encode_int(&mut obj.bytes[range.clone()], *raw);
                obj.state[range].fill(ByteState::Known);
            }
            Value::Pointer(ptr) => {
                self.write_reloc(id, offset, RelocTarget::Object(ptr.object), ptr.offset)?
            }
            Value::Map(target) | Value::Chan(target) => {
                self.write_reloc(id, offset, RelocTarget::Object(*target), 0)?
            }
            Value::FuncPtr(func) => self.write_reloc(id, offset, RelocTarget::Func(*func), 0)?,
            Value::Aggregate(values) => match types.kind(ty) {
                TypeKind::Array { elem, len } => {
                    if values.len() != *len as usize {
                        return Err(malformed("aggregate length mismatch in store"));
                    }
                    let elem = *elem;
                    let stride = self.layout.stride_of(types, elem);
                    for (i, v) in values.iter().enumerate() {
                        self.write_inner(types, id, offset + i as u64 * stride, v, elem)?;
                    }
                }
                TypeKind::Struct { fields } => {
                    if values.len() != fields.len() {
                        return Err(malformed("aggregate arity mismatch in store"));
                    }
                    let field_tys = fields.clone();
                    for (i, (v, field_ty)) in values.iter().zip(field_tys.iter()).enumerate() {
                        let field_off = self.layout.field_offset(types, ty, i);
                        self.write_inner(types, id, offset + field_off, v, *field_ty)?;
                    }
                }
                _ => return Err(malformed("aggregate store into scalar type")),
            },
            Value::Undef => {
                // Undef stores commit as zeros.
                let range = self.object(id).range(offset, size)?;
                self.clobber(id, offset, size);
                let obj = &mut self.objects[id.index()];
                obj.bytes[range.clone()].fill(0);
                obj.state[range].fill(ByteState::Known);
            }
            Value::Local(_) => {
                let range = self.object(id).range(offset, size)?;
                self.clobber(id, offset, size);
                self.objects[id.index()].state[range].fill(ByteState::Symbolic);
            }
        }
        Ok(())
    }

    fn write_reloc(
        &mut self,
        id: ObjectId,
        offset: u64,
        target: RelocTarget,
        addend: u64,
    ) -> Result<(), EvalError> {
        let size = self.layout.ptr_bytes;
        let range = self.object(id).range(offset, size)?;
        self.clobber(id, offset, size);
        let obj = &mut self.objects[id.index()];
        obj.bytes[range.clone()].fill(0);
        obj.state[range].fill(ByteState::Ptr);
        obj.relocs.insert(offset, Reloc { target, addend });
        Ok(())
    }

    /// Removes any relocation overlapping `[offset, offset+len)`. Bytes of
    /// a half-overwritten pointer lose all meaning and become symbolic.
    fn clobber(&mut self, id: ObjectId, offset: u64, len: u64) {
        let ptr_bytes = self.layout.ptr_bytes;
        let obj = &mut self.objects[id.index()];
        let start = offset.saturating_sub(ptr_bytes - 1);
        let end = offset + len;
        let overlapping: Vec<u64> = obj
            .relocs
            .range(start..end)
            .map(|(off, _)| *off)
            .collect();
        for reloc_off in overlapping {
            obj.relocs.remove(&reloc_off);
            let reloc_end = reloc_off + ptr_bytes;
            for b in reloc_off..reloc_end {
                if b < offset || b >= end {
                    obj.state[b as usize] = ByteState::Symbolic;
                }
            }
        }
    }

    // --- bulk operations ---

    /// `memcpy`: copies bytes, states, and any relocations fully inside the
    /// source range. A relocation straddling either end of the range cannot
    /// be represented and makes the copy unevaluable.
    pub fn copy(
        &mut self,
        dst: ObjectId,
        dst_off: u64,
        src: ObjectId,
        src_off: u64,
        len: u64,
    ) -> Result<(), EvalError> {
        if len == 0 {
            return Ok(());
        }
        {
            let dst_obj = self.object(dst);
            if dst_obj.freed {
                return Err(EvalError::Unevaluable);
            }
            if dst_obj.readonly {
                return Err(EvalError::WriteToConstant(dst_obj.name.clone()));
            }
            dst_obj.range(dst_off, len)?;
        }
        let ptr_bytes = self.layout.ptr_bytes;
        let (bytes, state, relocs) = {
            let src_obj = self.object(src);
            if src_obj.freed {
                return Err(EvalError::Unevaluable);
            }
            let range = src_obj.range(src_off, len)?;
            let straddles = src_obj
                .relocs
                .range(src_off.saturating_sub(ptr_bytes - 1)..src_off + len)
                .any(|(off, _)| *off < src_off || off + ptr_bytes > src_off + len);
            if straddles {
                return Err(EvalError::Unevaluable);
            }
            let relocs: Vec<(u64, Reloc)> = src_obj
                .relocs
                .range(src_off..src_off + len)
                .map(|(off, r)| (*off, *r))
                .collect();
            (
                src_obj.bytes[range.clone()].to_vec(),
                src_obj.state[range].to_vec(),
                relocs,
            )
        };
        if !matches!(self.object(dst).kind, ObjectKind::Stack { .. }) {
            for (_, reloc) in &relocs {
                if let RelocTarget::Object(target) = reloc.target {
                    if matches!(self.object(target).kind, ObjectKind::Stack { .. }) {
                        return Err(EvalError::EscapingAllocation);
                    }
                }
            }
        }
        self.clobber(dst, dst_off, len);
        let dst_obj = &mut self.objects[dst.index()];
        let range = dst_off as usize..(dst_off + len) as usize;
        dst_obj.bytes[range.clone()].copy_from_slice(&bytes);
        dst_obj.state[range].copy_from_slice(&state);
        for (off, reloc) in relocs {
            dst_obj.relocs.insert(off - src_off + dst_off, reloc);
        }
        dst_obj.dirty = true;
        if let ObjectKind::Global(global) = dst_obj.kind {
            self.mark_dirty(global);
        }
        Ok(())
    }

    /// `memset`: fills a range with a known byte.
    pub fn fill(&mut self, id: ObjectId, offset: u64, byte: u8, len: u64) -> Result<(), EvalError> {
        {
            let obj = self.object(id);
            if obj.freed {
                return Err(EvalError::Unevaluable);
            }
            if obj.readonly {
                return Err(EvalError::WriteToConstant(obj.name.clone()));
            }
            obj.range(offset, len)?;
        }
        self.clobber(id, offset, len);
        let obj = &mut self.objects[id.index()];
        let range = offset as usize..(offset + len) as usize;
        obj.bytes[range.clone()].fill(byte);
        obj.state[range].fill(ByteState::Known);
        obj.dirty = true;
        if let ObjectKind::Global(global) = obj.kind {
            self.mark_dirty(global);
        }
        Ok(())
    }

    // --- initializer encoding ---

    /// Seeds an object's backing store from an IR constant.
    fn encode_constant(
        &mut self,
        module: &Module,
        id: ObjectId,
        offset: u64,
        init: &crate::ir::Constant,
    ) -> Result<(), EvalError> {
        use crate::ir::Constant;
        let types = &module.types;
        match init {
            Constant::Undef(_) => Ok(()),
            Constant::Zero(ty) => {
                let size = self.layout.size_of(types, *ty);
                let obj = &mut self.objects[id.index()];
                let range = offset as usize..(offset + size) as usize;
                obj.bytes[range.clone()].fill(0);
                obj.state[range].fill(ByteState::Known);
                Ok(())
            }
            Constant::Int { ty, value } => {
                let size = self.layout.size_of(types, *ty);
                let layout = self.layout;
                let obj = &mut self.objects[id.index()];
                let range = offset as usize..(offset + size) as usize;
                layout.encode_int(&mut obj.bytes[range.clone()], *value);
                obj.state[range].fill(ByteState::Known);
                Ok(())
            }
            Constant::Float { ty, bits } => {
                let size = self.layout.size_of(types, *ty);
                let layout = self.layout;
                let obj = &mut self.objects[id.index()];
                let range = offset as usize..(offset + size) as usize;
                layout.encode_int(&mut obj.bytes[range.clone()], *bits);
                obj.state[range].fill(ByteState::Known);
                Ok(())
            }
            Constant::Null(_) => {
                let size = self.layout.ptr_bytes;
                let obj = &mut self.objects[id.index()];
                let range = offset as usize..(offset + size) as usize;
                obj.bytes[range.clone()].fill(0);
                obj.state[range].fill(ByteState::Known);
                Ok(())
            }
            Constant::Bytes { data, .. } => {
                let obj = &mut self.objects[id.index()];
                let range = offset as usize..offset as usize + data.len();
                obj.bytes[range.clone()].copy_from_slice(data);
                obj.state[range].fill(ByteState::Known);
                Ok(())
            }
            Constant::Aggregate { ty, fields } => match types.kind(*ty) {
                TypeKind::Array { elem, .. } => {
                    let elem = *elem;
                    let stride = self.layout.stride_of(types, elem);
                    for (i, field) in fields.iter().enumerate() {
                        self.encode_constant(module, id, offset + i as u64 * stride, field)?;
                    }
                    Ok(())
                }
                TypeKind::Struct { .. } => {
                    let ty = *ty;
                    for (i, field) in fields.iter().enumerate() {
                        let field_off = self.layout.field_offset(types, ty, i);
                        self.encode_constant(module, id, offset + field_off, field)?;
                    }
                    Ok(())
                }
                _ => Err(malformed("aggregate initializer for scalar type")),
            },
            Constant::GlobalAddr { global, offset: addend } => {
                let target = self.global_object(module, *global)?;
                self.write_reloc(id, offset, RelocTarget::Object(target), *addend)
            }
            Constant::FuncAddr { func } => {
                self.write_reloc(id, offset, RelocTarget::Func(*func), 0)
            }
        }
    }
}

#[cfg(test)]
#[path = "../tests/t_memory.rs"]
mod tests;
