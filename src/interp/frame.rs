//! Per-call activation records.
//!
//! A frame owns the local value bindings for one function activation, walks
//! its basic blocks under constant-folded control flow, and interprets each
//! instruction against the value model and abstract memory. Calls dispatch
//! either to a nested frame (when the side-effect scan allows it), to a
//! whitelisted runtime builtin, or fail as unevaluable and leave the work
//! to runtime.

use std::collections::HashMap;

use crate::ir::{
    BlockId, Callee, FuncId, InstKind, Instruction, Operand, Terminator, TypeId, TypeKind, ValueId,
};

use super::builtins::{self, Builtin};
use super::errors::{malformed, EvalError};
use super::memory::{ObjectId, ObjectKind};
use super::scan::EffectKind;
use super::value::{self, Pointer, Value};
use super::{Eval, DEPTH_LIMIT};

pub(super) struct Frame<'e, 'm> {
    ev: &'e mut Eval<'m>,
    func: FuncId,
    depth: u32,
    locals: HashMap<ValueId, Value>,
    allocas: Vec<ObjectId>,
}

enum BlockOutcome {
    Jump(BlockId),
    Return(Option<Value>),
}

impl<'e, 'm> Frame<'e, 'm> {
    /// Evaluates one activation of `func`. Local errors abort only this
    /// activation (and its callers up to the driver); fatal errors abort
    /// the pass.
    pub fn run(
        ev: &'e mut Eval<'m>,
        func: FuncId,
        params: Vec<Value>,
        depth: u32,
    ) -> Result<Option<Value>, EvalError> {
        if depth >= DEPTH_LIMIT {
            return Err(EvalError::RecursionLimit);
        }
        {
            let f = ev.module.func(func);
            if f.is_declaration() {
                return Err(EvalError::Unevaluable);
            }
            if f.sig.params.len() != params.len() {
                return Err(malformed(format!("arity mismatch calling {}", f.name)));
            }
            if ev.debug {
                let name = f.name.clone();
                ev.trace(depth, &format!("enter {}", name));
            }
        }

        let mut frame = Frame {
            ev,
            func,
            depth,
            locals: HashMap::new(),
            allocas: Vec::new(),
        };
        for (i, param) in params.into_iter().enumerate() {
            frame.locals.insert(ValueId(i as u32), param);
        }

        let result = frame.exec();
        if result.is_ok() {
            let allocas = std::mem::take(&mut frame.allocas);
            frame.ev.mem.free_stack(&allocas);
        }
        result
    }

    fn exec(&mut self) -> Result<Option<Value>, EvalError> {
        let mut prev: Option<BlockId> = None;
        let mut current = BlockId(0);
        loop {
            match self.eval_block(current, prev)? {
                BlockOutcome::Jump(next) => {
                    prev = Some(current);
                    current = next;
                }
                BlockOutcome::Return(result) => {
                    if let Some(v) = &result {
                        if self.frame_local_pointer(v) {
                            return Err(EvalError::EscapingAllocation);
                        }
                    }
                    self.ev.trace(self.depth, "return");
                    return Ok(result);
                }
            }
        }
    }

    fn eval_block(
        &mut self,
        block: BlockId,
        prev: Option<BlockId>,
    ) -> Result<BlockOutcome, EvalError> {
        let count = self.ev.module.func(self.func).block(block).insts.len();
        for i in 0..count {
            let inst = self.ev.module.func(self.func).block(block).insts[i].clone();
            self.eval_inst(&inst, prev)?;
        }

        let term = self.ev.module.func(self.func).block(block).term.clone();
        match term {
            Terminator::Ret { value } => {
                let result = match value {
                    Some(op) => Some(self.resolve(&op)?),
                    None => None,
                };
                Ok(BlockOutcome::Return(result))
            }
            Terminator::Br { target } => Ok(BlockOutcome::Jump(target)),
            Terminator::CondBr {
                cond,
                then_b,
                else_b,
            } => match self.resolve(&cond)?.as_int()? {
                (1, 0) => Ok(BlockOutcome::Jump(else_b)),
                (1, _) => Ok(BlockOutcome::Jump(then_b)),
                _ => Err(EvalError::Unevaluable),
            },
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                let (_, v) = self.resolve(&value)?.as_int()?;
                let target = cases
                    .iter()
                    .find(|case| case.value == v)
                    .map(|case| case.target)
                    .unwrap_or(default);
                Ok(BlockOutcome::Jump(target))
            }
            Terminator::Unreachable => Err(EvalError::Unreachable),
        }
    }

    fn eval_inst(&mut self, inst: &Instruction, prev: Option<BlockId>) -> Result<(), EvalError> {
        let result: Option<Value> = match &inst.kind {
            InstKind::BinOp { op, lhs, rhs } => {
                let a = self.resolve(lhs)?;
                let b = self.resolve(rhs)?;
                Some(value::binop(*op, &a, &b)?)
            }
            InstKind::ICmp { op, lhs, rhs } => {
                let a = self.resolve(lhs)?;
                let b = self.resolve(rhs)?;
                Some(value::icmp(*op, &a, &b)?)
            }
            InstKind::FCmp { op, lhs, rhs } => {
                let a = self.resolve(lhs)?;
                let b = self.resolve(rhs)?;
                Some(value::fcmp(*op, &a, &b)?)
            }
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => {
                let c = self.resolve(cond)?;
                let t = self.resolve(then_value)?;
                let e = self.resolve(else_value)?;
                Some(value::select(&c, &t, &e)?)
            }
            InstKind::Cast { kind, value, ty } => {
                let v = self.resolve(value)?;
                let to_bits = self.scalar_bits(*ty)?;
                Some(value::cast(*kind, &v, to_bits)?)
            }
            InstKind::Alloca { ty } => {
                let size = {
                    let module = &self.ev.module;
                    module.layout.size_of(&module.types, *ty)
                };
                let obj = self.ev.mem.alloc_stack(*ty, size, self.depth);
                self.allocas.push(obj);
                Some(Value::Pointer(Pointer { object: obj, offset: 0 }))
            }
            InstKind::Load { ty, ptr } => {
                let p = self.resolve(ptr)?.as_pointer()?;
                let Eval { module, mem, .. } = &mut *self.ev;
                Some(mem.read_typed(&module.types, p.object, p.offset, *ty)?)
            }
            InstKind::Store { ty, value, ptr } => {
                let v = self.resolve(value)?;
                let p = self.resolve(ptr)?.as_pointer()?;
                if self.store_escapes(p.object, &v) {
                    return Err(EvalError::EscapingAllocation);
                }
                {
                    let Eval { module, mem, .. } = &mut *self.ev;
                    mem.write_typed(&module.types, p.object, p.offset, &v, *ty)?;
                }
                if self.ev.debug {
                    let name = self.ev.mem.object(p.object).name.clone();
                    if !name.is_empty() {
                        self.ev
                            .trace(self.depth, &format!("store to @{} (dirty)", name));
                    }
                }
                None
            }
            InstKind::Gep {
                pointee,
                base,
                indices,
            } => Some(self.eval_gep(*pointee, base, indices)?),
            InstKind::Call { callee, args } => self.eval_call(callee, args, inst)?,
            InstKind::Phi { incoming, .. } => {
                let prev = prev.ok_or_else(|| malformed("phi in entry block"))?;
                let (_, op) = incoming
                    .iter()
                    .find(|(block, _)| *block == prev)
                    .ok_or_else(|| malformed("phi has no incoming for predecessor"))?;
                let op = op.clone();
                Some(self.resolve(&op)?)
            }
        };

        if let Some(def) = inst.result {
            let v = result.ok_or_else(|| malformed("void instruction with a result"))?;
            self.locals.insert(def.id, v);
        }
        Ok(())
    }

    fn eval_gep(
        &mut self,
        pointee: TypeId,
        base: &Operand,
        indices: &[Operand],
    ) -> Result<Value, EvalError> {
        let base_value = self.resolve(base)?;
        let Value::Pointer(ptr) = base_value else {
            return Err(EvalError::Unevaluable);
        };
        let mut resolved = Vec::with_capacity(indices.len());
        for index in indices {
            resolved.push(self.resolve(index)?.as_index()?);
        }
        if resolved.is_empty() {
            return Err(malformed("gep without indices"));
        }

        let module = &self.ev.module;
        let types = &module.types;
        let layout = module.layout;
        let mut delta = i128::from(resolved[0]) * i128::from(layout.stride_of(types, pointee));
        let mut current = pointee;
        for index in &resolved[1..] {
            match types.kind(current) {
                TypeKind::Struct { fields } => {
                    let field = usize::try_from(*index)
                        .ok()
                        .filter(|i| *i < fields.len())
                        .ok_or_else(|| malformed("gep struct index out of range"))?;
                    delta += i128::from(layout.field_offset(types, current, field));
                    current = fields[field];
                }
                TypeKind::Array { elem, .. } => {
                    delta += i128::from(*index) * i128::from(layout.stride_of(types, *elem));
                    current = *elem;
                }
                _ => return Err(malformed("gep index into scalar type")),
            }
        }

        let offset = i128::from(ptr.offset) + delta;
        let size = self.ev.mem.object(ptr.object).size;
        if offset < 0 || offset as u64 > size {
            return Err(EvalError::Unevaluable);
        }
        Ok(Value::Pointer(Pointer {
            object: ptr.object,
            offset: offset as u64,
        }))
    }

    fn eval_call(
        &mut self,
        callee: &Callee,
        args: &[Operand],
        inst: &Instruction,
    ) -> Result<Option<Value>, EvalError> {
        let target = match callee {
            Callee::Direct(func) => *func,
            Callee::Indirect(_) => return Err(EvalError::Unevaluable),
        };
        let mut resolved = Vec::with_capacity(args.len());
        for arg in args {
            resolved.push(self.resolve(arg)?);
        }

        let name = self.ev.module.func(target).name.clone();
        if let Some(builtin) = builtins::recognize(&name) {
            return self.eval_builtin(builtin, &resolved, inst);
        }
        if self.ev.module.func(target).is_declaration() {
            return Err(EvalError::Unevaluable);
        }

        let record = {
            let Eval {
                module, mem, scan, ..
            } = &mut *self.ev;
            scan.classify(&**module, mem.generation(), target)
        };
        match record.kind {
            EffectKind::Pure | EffectKind::WritesParams => {}
            EffectKind::WritesGlobals => {
                for global in &record.globals {
                    let evaluable = self.ev.mem.is_dirty(*global)
                        || self.ev.module.global(*global).init.is_some();
                    if !evaluable {
                        return Err(EvalError::Unevaluable);
                    }
                }
            }
            EffectKind::Impure | EffectKind::UnknownRecursive => {
                return Err(EvalError::Unevaluable)
            }
        }

        Frame::run(&mut *self.ev, target, resolved, self.depth + 1)
    }

    fn eval_builtin(
        &mut self,
        builtin: Builtin,
        args: &[Value],
        inst: &Instruction,
    ) -> Result<Option<Value>, EvalError> {
        match builtin {
            Builtin::NoOp => Ok(None),
            Builtin::MemCpy => {
                let [dst, src, len, ..] = args else {
                    return Err(malformed("memcpy expects (dst, src, len)"));
                };
                let dst = dst.as_pointer()?;
                let src = src.as_pointer()?;
                let (_, len) = len.as_int()?;
                self.ev
                    .mem
                    .copy(dst.object, dst.offset, src.object, src.offset, len)?;
                Ok(None)
            }
            Builtin::MemSet => {
                let [dst, byte, len, ..] = args else {
                    return Err(malformed("memset expects (dst, byte, len)"));
                };
                let dst = dst.as_pointer()?;
                let (_, byte) = byte.as_int()?;
                let (_, len) = len.as_int()?;
                self.ev.mem.fill(dst.object, dst.offset, byte as u8, len)?;
                Ok(None)
            }
            Builtin::Alloc => {
                let [len] = args else {
                    return Err(malformed("alloc expects (size)"));
                };
                let (_, len) = len.as_int()?;
                let name = format!("{}$alloc", self.ev.pkg);
                let obj = self.ev.mem.alloc_heap(len, name);
                Ok(Some(Value::Pointer(Pointer { object: obj, offset: 0 })))
            }
            Builtin::HashmapMake => {
                let [key_size, value_size] = args else {
                    return Err(malformed("hashmapMake expects (keySize, valueSize)"));
                };
                let (_, key_size) = key_size.as_int()?;
                let (_, value_size) = value_size.as_int()?;
                if key_size > u64::from(u8::MAX) || value_size > u64::from(u8::MAX) {
                    return Err(EvalError::Unevaluable);
                }
                let ptr_bytes = self.ev.module.layout.ptr_bytes;
                let name = format!("{}$map", self.ev.pkg);
                let obj = self
                    .ev
                    .mem
                    .alloc_heap(builtins::hashmap_header_size(ptr_bytes), name);
                self.ev.mem.fill(obj, 3 * ptr_bytes, key_size as u8, 1)?;
                self.ev.mem.fill(obj, 3 * ptr_bytes + 1, value_size as u8, 1)?;
                Ok(Some(Value::Map(obj)))
            }
            Builtin::ChanMake => {
                let [_elem_size] = args else {
                    return Err(malformed("chanMake expects (elemSize)"));
                };
                let ptr_bytes = self.ev.module.layout.ptr_bytes;
                let name = format!("{}$chan", self.ev.pkg);
                let obj = self
                    .ev
                    .mem
                    .alloc_heap(builtins::chan_header_size(ptr_bytes), name);
                Ok(Some(Value::Chan(obj)))
            }
            Builtin::SliceCopy => {
                let [dst, src, count, elem_size] = args else {
                    return Err(malformed("sliceCopy expects (dst, src, n, elemSize)"));
                };
                let dst = dst.as_pointer()?;
                let src = src.as_pointer()?;
                let (count_bits, count) = count.as_int()?;
                let (_, elem_size) = elem_size.as_int()?;
                self.ev.mem.copy(
                    dst.object,
                    dst.offset,
                    src.object,
                    src.offset,
                    count * elem_size,
                )?;
                let bits = match inst.result {
                    Some(def) => self.scalar_bits(def.ty)?,
                    None => count_bits,
                };
                Ok(Some(Value::Int { bits, value: count }))
            }
        }
    }

    fn resolve(&mut self, operand: &Operand) -> Result<Value, EvalError> {
        match operand {
            Operand::Value(id) => self
                .locals
                .get(id)
                .cloned()
                .ok_or_else(|| malformed("use of a value with no binding")),
            Operand::Const(c) => self.resolve_const(c),
        }
    }

    fn resolve_const(&mut self, c: &crate::ir::Constant) -> Result<Value, EvalError> {
        use crate::ir::Constant;
        match c {
            Constant::Undef(_) => Ok(Value::Undef),
            Constant::Zero(ty) => self.zero_value(*ty),
            Constant::Int { ty, value } => {
                let bits = self.scalar_bits(*ty)?;
                Ok(Value::Int {
                    bits,
                    value: value::mask(*value, bits),
                })
            }
            Constant::Float { ty, bits } => {
                let width = self.scalar_bits(*ty)?;
                Ok(Value::Float {
                    bits: width,
                    raw: *bits,
                })
            }
            Constant::Null(_) => Ok(Value::Int {
                bits: (self.ev.module.layout.ptr_bytes * 8) as u32,
                value: 0,
            }),
            Constant::Bytes { data, .. } => Ok(Value::Aggregate(
                data.iter()
                    .map(|b| Value::Int {
                        bits: 8,
                        value: u64::from(*b),
                    })
                    .collect(),
            )),
            Constant::Aggregate { fields, .. } => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push(self.resolve_const(field)?);
                }
                Ok(Value::Aggregate(values))
            }
            Constant::GlobalAddr { global, offset } => {
                let Eval { module, mem, .. } = &mut *self.ev;
                let object = mem.global_object(&**module, *global)?;
                Ok(Value::Pointer(Pointer {
                    object,
                    offset: *offset,
                }))
            }
            Constant::FuncAddr { func } => Ok(Value::FuncPtr(*func)),
        }
    }

    fn zero_value(&self, ty: TypeId) -> Result<Value, EvalError> {
        let module = &self.ev.module;
        match module.types.kind(ty) {
            TypeKind::Void => Ok(Value::Undef),
            TypeKind::Int { bits } => Ok(Value::Int {
                bits: *bits,
                value: 0,
            }),
            TypeKind::Float { bits } => Ok(Value::Float {
                bits: *bits,
                raw: 0,
            }),
            TypeKind::Ptr => Ok(Value::Int {
                bits: (module.layout.ptr_bytes * 8) as u32,
                value: 0,
            }),
            TypeKind::Array { elem, len } => {
                let elem = *elem;
                let len = *len;
                let zero = self.zero_value(elem)?;
                Ok(Value::Aggregate(vec![zero; len as usize]))
            }
            TypeKind::Struct { fields } => {
                let fields = fields.clone();
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push(self.zero_value(field)?);
                }
                Ok(Value::Aggregate(values))
            }
        }
    }

    fn scalar_bits(&self, ty: TypeId) -> Result<u32, EvalError> {
        let module = &self.ev.module;
        match module.types.kind(ty) {
            TypeKind::Int { bits } => Ok(*bits),
            TypeKind::Float { bits } => Ok(*bits),
            TypeKind::Ptr => Ok((module.layout.ptr_bytes * 8) as u32),
            _ => Err(malformed("expected a scalar type")),
        }
    }

    /// True if storing `value` into `target` would let a pointer to a stack
    /// allocation outlive its frame.
    fn store_escapes(&self, target: ObjectId, value: &Value) -> bool {
        let Some(deepest) = self.deepest_stack_frame(value) else {
            return false;
        };
        match self.ev.mem.object(target).kind {
            ObjectKind::Global(_) | ObjectKind::Heap => true,
            ObjectKind::Stack { frame } => deepest > frame,
        }
    }

    fn deepest_stack_frame(&self, value: &Value) -> Option<u32> {
        match value {
            Value::Pointer(ptr) => match self.ev.mem.object(ptr.object).kind {
                ObjectKind::Stack { frame } => Some(frame),
                _ => None,
            },
            Value::Aggregate(values) => values
                .iter()
                .filter_map(|v| self.deepest_stack_frame(v))
                .max(),
            _ => None,
        }
    }

    /// True if the value points into one of this frame's own allocations.
    fn frame_local_pointer(&self, value: &Value) -> bool {
        match value {
            Value::Pointer(ptr) => self.allocas.contains(&ptr.object),
            Value::Aggregate(values) => values.iter().any(|v| self.frame_local_pointer(v)),
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "../tests/t_frame.rs"]
mod tests;
