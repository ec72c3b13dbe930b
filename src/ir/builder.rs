//! Programmatic construction of modules and functions.
//!
//! The function builder always starts with an entry block; other blocks can
//! be selected for emission at any time, and every block must be terminated
//! before `finish`.

use super::types::{TypeId, TypeKind};
use super::{
    BinOp, Block, BlockId, Callee, CastKind, CmpOp, Constant, DataLayout, FCmpOp, FuncId, Function,
    FunctionSig, Global, GlobalId, InstKind, Instruction, Module, Operand, SwitchCase, Terminator,
    ValueDef, ValueId,
};

pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>, layout: DataLayout) -> Self {
        Self {
            module: Module::new(name, layout),
        }
    }

    pub fn ty_void(&mut self) -> TypeId {
        self.module.types.add(TypeKind::Void)
    }

    pub fn ty_int(&mut self, bits: u32) -> TypeId {
        self.module.types.add(TypeKind::Int { bits })
    }

    pub fn ty_float(&mut self, bits: u32) -> TypeId {
        self.module.types.add(TypeKind::Float { bits })
    }

    pub fn ty_ptr(&mut self) -> TypeId {
        self.module.types.add(TypeKind::Ptr)
    }

    pub fn ty_array(&mut self, elem: TypeId, len: u64) -> TypeId {
        self.module.types.add(TypeKind::Array { elem, len })
    }

    pub fn ty_struct(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.module.types.add(TypeKind::Struct { fields })
    }

    pub fn global(
        &mut self,
        name: impl Into<String>,
        ty: TypeId,
        init: Option<Constant>,
        constant: bool,
    ) -> GlobalId {
        self.module.add_global(Global {
            name: name.into(),
            ty,
            init,
            constant,
        })
    }

    /// Adds a function without a body. Bodies are attached with
    /// [`ModuleBuilder::define_function`].
    pub fn declare_function(&mut self, name: impl Into<String>, sig: FunctionSig) -> FuncId {
        self.module.add_func(Function {
            name: name.into(),
            sig,
            blocks: Vec::new(),
            next_value: 0,
        })
    }

    pub fn define_function(&mut self, id: FuncId, built: BuiltBody) {
        let func = self.module.func_mut(id);
        debug_assert_eq!(built.param_count as usize, func.sig.params.len());
        func.blocks = built.blocks;
        func.next_value = built.next_value;
    }

    pub fn finish(self) -> Module {
        self.module
    }
}

/// A finished function body produced by [`FunctionBuilder::finish`].
pub struct BuiltBody {
    blocks: Vec<Block>,
    next_value: u32,
    param_count: u32,
}

pub struct FunctionBuilder {
    blocks: Vec<Block>,
    curr_block: BlockId,
    next_value: u32,
    param_count: u32,
    terminated: Vec<BlockId>,
}

/// Placeholder for a block that has not been terminated yet; `terminated`
/// tracks the real state and `finish` asserts every block appears there.
const UNTERMINATED: Terminator = Terminator::Unreachable;

impl FunctionBuilder {
    pub fn new(param_count: u32) -> Self {
        let entry = Block {
            id: BlockId(0),
            name: "entry".to_string(),
            insts: vec![],
            term: UNTERMINATED,
        };
        Self {
            blocks: vec![entry],
            curr_block: BlockId(0),
            next_value: param_count,
            param_count,
            terminated: Vec::new(),
        }
    }

    pub fn param(&self, index: u32) -> ValueId {
        debug_assert!(index < self.param_count);
        ValueId(index)
    }

    pub fn new_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            name: name.into(),
            insts: vec![],
            term: UNTERMINATED,
        });
        id
    }

    pub fn select_block(&mut self, id: BlockId) {
        assert!(id.index() < self.blocks.len(), "block not found: {:?}", id);
        self.curr_block = id;
    }

    fn new_value(&mut self, ty: TypeId) -> ValueDef {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        ValueDef { id, ty }
    }

    fn emit(&mut self, result: Option<ValueDef>, kind: InstKind) {
        self.blocks[self.curr_block.index()]
            .insts
            .push(Instruction { result, kind });
    }

    pub fn binop(&mut self, ty: TypeId, op: BinOp, lhs: Operand, rhs: Operand) -> ValueId {
        let def = self.new_value(ty);
        self.emit(Some(def), InstKind::BinOp { op, lhs, rhs });
        def.id
    }

    pub fn icmp(&mut self, bool_ty: TypeId, op: CmpOp, lhs: Operand, rhs: Operand) -> ValueId {
        let def = self.new_value(bool_ty);
        self.emit(Some(def), InstKind::ICmp { op, lhs, rhs });
        def.id
    }

    pub fn fcmp(&mut self, bool_ty: TypeId, op: FCmpOp, lhs: Operand, rhs: Operand) -> ValueId {
        let def = self.new_value(bool_ty);
        self.emit(Some(def), InstKind::FCmp { op, lhs, rhs });
        def.id
    }

    pub fn select(
        &mut self,
        ty: TypeId,
        cond: Operand,
        then_value: Operand,
        else_value: Operand,
    ) -> ValueId {
        let def = self.new_value(ty);
        self.emit(
            Some(def),
            InstKind::Select {
                cond,
                then_value,
                else_value,
            },
        );
        def.id
    }

    pub fn cast(&mut self, kind: CastKind, value: Operand, ty: TypeId) -> ValueId {
        let def = self.new_value(ty);
        self.emit(Some(def), InstKind::Cast { kind, value, ty });
        def.id
    }

    pub fn alloca(&mut self, ptr_ty: TypeId, ty: TypeId) -> ValueId {
        let def = self.new_value(ptr_ty);
        self.emit(Some(def), InstKind::Alloca { ty });
        def.id
    }

    pub fn load(&mut self, ty: TypeId, ptr: Operand) -> ValueId {
        let def = self.new_value(ty);
        self.emit(Some(def), InstKind::Load { ty, ptr });
        def.id
    }

    pub fn store(&mut self, ty: TypeId, value: Operand, ptr: Operand) {
        self.emit(None, InstKind::Store { ty, value, ptr });
    }

    pub fn gep(
        &mut self,
        ptr_ty: TypeId,
        pointee: TypeId,
        base: Operand,
        indices: Vec<Operand>,
    ) -> ValueId {
        let def = self.new_value(ptr_ty);
        self.emit(
            Some(def),
            InstKind::Gep {
                pointee,
                base,
                indices,
            },
        );
        def.id
    }

    /// Emits a call; `result_ty` is `None` for void callees.
    pub fn call(
        &mut self,
        result_ty: Option<TypeId>,
        callee: Callee,
        args: Vec<Operand>,
    ) -> Option<ValueId> {
        let def = result_ty.map(|ty| self.new_value(ty));
        self.emit(def, InstKind::Call { callee, args });
        def.map(|d| d.id)
    }

    pub fn phi(&mut self, ty: TypeId, incoming: Vec<(BlockId, Operand)>) -> ValueId {
        let def = self.new_value(ty);
        self.emit(Some(def), InstKind::Phi { ty, incoming });
        def.id
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.terminate(Terminator::Ret { value });
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br { target });
    }

    pub fn cond_br(&mut self, cond: Operand, then_b: BlockId, else_b: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            then_b,
            else_b,
        });
    }

    pub fn switch(&mut self, value: Operand, cases: Vec<SwitchCase>, default: BlockId) {
        self.terminate(Terminator::Switch {
            value,
            cases,
            default,
        });
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    fn terminate(&mut self, term: Terminator) {
        assert!(
            !self.terminated.contains(&self.curr_block),
            "block already terminated"
        );
        let block = &mut self.blocks[self.curr_block.index()];
        block.term = term;
        self.terminated.push(self.curr_block);
    }

    pub fn finish(self) -> BuiltBody {
        for block in &self.blocks {
            assert!(
                self.terminated.contains(&block.id),
                "block '{}' is not terminated",
                block.name
            );
        }
        BuiltBody {
            blocks: self.blocks,
            next_value: self.next_value,
            param_count: self.param_count,
        }
    }
}

/// Shorthand operand constructors used pervasively by tests.
pub fn int_op(ty: TypeId, value: u64) -> Operand {
    Operand::Const(Constant::Int { ty, value })
}

pub fn value_op(id: ValueId) -> Operand {
    Operand::Value(id)
}

#[cfg(test)]
#[path = "../tests/t_builder.rs"]
mod tests;
