//! Function-level side-effect classification.
//!
//! Decides whether a call may be evaluated abstractly by scanning the
//! callee (and its callees) for stores and classifying each by the root of
//! the pointer written through. Results are memoized per function; the
//! whole cache is discarded whenever a new global enters the dirty set,
//! since that can change what any cached classification means.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;

use crate::ir::{Callee, FuncId, Function, GlobalId, InstKind, Module, Operand, ValueId};

use super::builtins;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EffectKind {
    /// Reads its inputs, produces a value, writes nothing.
    Pure,
    /// Stores only through parameter-derived pointers.
    WritesParams,
    /// Stores to a known set of globals.
    WritesGlobals,
    /// Unanalyzable: external, indirect calls, or unknown pointer roots.
    Impure,
    /// Tentative result for a function in an active recursion cycle;
    /// replaced when the cycle closes.
    UnknownRecursive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectRecord {
    pub kind: EffectKind,
    /// For `WritesGlobals`, the globals that may be written.
    pub globals: IndexSet<GlobalId>,
}

impl SideEffectRecord {
    fn pure() -> Self {
        Self {
            kind: EffectKind::Pure,
            globals: IndexSet::new(),
        }
    }

    fn of(kind: EffectKind) -> Self {
        Self {
            kind,
            globals: IndexSet::new(),
        }
    }

    fn merge(&mut self, other: &SideEffectRecord) {
        // UnknownRecursive is neutral here: the cycle head accounts for the
        // member's own effects when its scan completes.
        if other.kind == EffectKind::UnknownRecursive {
            return;
        }
        self.kind = self.kind.max(other.kind);
        self.globals.extend(other.globals.iter().copied());
    }

    fn raise(&mut self, kind: EffectKind) {
        self.kind = self.kind.max(kind);
    }
}

/// The root an address expression resolves to, for store classification.
enum PointerRoot {
    Alloca,
    Param,
    Global(GlobalId),
    Unknown,
}

#[derive(Debug, Default)]
pub struct SideEffectCache {
    records: HashMap<FuncId, SideEffectRecord>,
    /// Dirty-set generation the cache was built against.
    generation: u64,
}

impl SideEffectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `func`, reusing memoized results when the dirty set has
    /// not grown since they were computed.
    pub fn classify(
        &mut self,
        module: &Module,
        generation: u64,
        func: FuncId,
    ) -> SideEffectRecord {
        if self.generation != generation {
            self.records.clear();
            self.generation = generation;
        }
        let mut active = HashSet::new();
        let (record, _) = self.scan(module, func, &mut active);
        record
    }

    /// Returns the record plus the set of still-active functions it
    /// depends on; records with live dependencies are not memoized.
    fn scan(
        &mut self,
        module: &Module,
        func: FuncId,
        active: &mut HashSet<FuncId>,
    ) -> (SideEffectRecord, HashSet<FuncId>) {
        if let Some(record) = self.records.get(&func) {
            return (record.clone(), HashSet::new());
        }
        if active.contains(&func) {
            let mut deps = HashSet::new();
            deps.insert(func);
            return (SideEffectRecord::of(EffectKind::UnknownRecursive), deps);
        }

        let f = module.func(func);
        if f.is_declaration() {
            let record = match builtins::declared_effect(&f.name) {
                Some(kind) => SideEffectRecord::of(kind),
                None => SideEffectRecord::of(EffectKind::Impure),
            };
            self.records.insert(func, record.clone());
            return (record, HashSet::new());
        }

        active.insert(func);
        let mut record = SideEffectRecord::pure();
        let mut deps: HashSet<FuncId> = HashSet::new();

        for block in &f.blocks {
            for inst in &block.insts {
                match &inst.kind {
                    InstKind::Store { ptr, .. } => match pointer_root(f, ptr) {
                        PointerRoot::Alloca => {}
                        PointerRoot::Param => record.raise(EffectKind::WritesParams),
                        PointerRoot::Global(g) => {
                            record.raise(EffectKind::WritesGlobals);
                            record.globals.insert(g);
                        }
                        PointerRoot::Unknown => record.raise(EffectKind::Impure),
                    },
                    InstKind::Call { callee, args } => match callee {
                        Callee::Direct(target) => {
                            let (callee_record, callee_deps) = self.scan(module, *target, active);
                            deps.extend(callee_deps);
                            if callee_record.kind == EffectKind::WritesParams {
                                // The callee writes through its parameters;
                                // classify those writes by our argument roots.
                                for arg in args {
                                    if !operand_is_ptr(module, f, arg) {
                                        continue;
                                    }
                                    match pointer_root(f, arg) {
                                        PointerRoot::Alloca => {}
                                        PointerRoot::Param => {
                                            record.raise(EffectKind::WritesParams)
                                        }
                                        PointerRoot::Global(g) => {
                                            record.raise(EffectKind::WritesGlobals);
                                            record.globals.insert(g);
                                        }
                                        PointerRoot::Unknown => record.raise(EffectKind::Impure),
                                    }
                                }
                            } else {
                                record.merge(&callee_record);
                            }
                        }
                        Callee::Indirect(_) => record.raise(EffectKind::Impure),
                    },
                    _ => {}
                }
            }
        }

        active.remove(&func);
        deps.remove(&func);
        if deps.is_empty() {
            self.records.insert(func, record.clone());
        }
        (record, deps)
    }
}

/// Traces an address operand back to its root through geps, casts, selects,
/// and phis.
fn pointer_root(f: &Function, operand: &Operand) -> PointerRoot {
    let mut visited = HashSet::new();
    pointer_root_inner(f, operand, &mut visited)
}

fn pointer_root_inner(
    f: &Function,
    operand: &Operand,
    visited: &mut HashSet<ValueId>,
) -> PointerRoot {
    match operand {
        Operand::Const(c) => match c {
            crate::ir::Constant::GlobalAddr { global, .. } => PointerRoot::Global(*global),
            crate::ir::Constant::Null(_) => PointerRoot::Unknown,
            _ => PointerRoot::Unknown,
        },
        Operand::Value(id) => {
            if id.index() < f.sig.params.len() {
                return PointerRoot::Param;
            }
            if !visited.insert(*id) {
                return PointerRoot::Unknown;
            }
            let Some(inst) = find_def(f, *id) else {
                return PointerRoot::Unknown;
            };
            match &inst.kind {
                InstKind::Alloca { .. } => PointerRoot::Alloca,
                InstKind::Gep { base, .. } => pointer_root_inner(f, base, visited),
                InstKind::Cast { value, .. } => pointer_root_inner(f, value, visited),
                InstKind::Select {
                    then_value,
                    else_value,
                    ..
                } => merge_roots(
                    pointer_root_inner(f, then_value, visited),
                    pointer_root_inner(f, else_value, visited),
                ),
                InstKind::Phi { incoming, .. } => {
                    let mut root = PointerRoot::Alloca;
                    for (_, op) in incoming {
                        root = merge_roots(root, pointer_root_inner(f, op, visited));
                        if matches!(root, PointerRoot::Unknown) {
                            break;
                        }
                    }
                    root
                }
                _ => PointerRoot::Unknown,
            }
        }
    }
}

/// Conservative join: identical roots survive, anything mixed is unknown.
fn merge_roots(a: PointerRoot, b: PointerRoot) -> PointerRoot {
    match (a, b) {
        (PointerRoot::Alloca, other) | (other, PointerRoot::Alloca) => other,
        (PointerRoot::Param, PointerRoot::Param) => PointerRoot::Param,
        (PointerRoot::Global(x), PointerRoot::Global(y)) if x == y => PointerRoot::Global(x),
        _ => PointerRoot::Unknown,
    }
}

fn find_def(f: &Function, id: ValueId) -> Option<&crate::ir::Instruction> {
    f.blocks
        .iter()
        .flat_map(|b| b.insts.iter())
        .find(|inst| inst.result.map(|r| r.id) == Some(id))
}

fn operand_is_ptr(module: &Module, f: &Function, operand: &Operand) -> bool {
    use crate::ir::{Constant, TypeKind};
    match operand {
        Operand::Const(c) => matches!(
            c,
            Constant::GlobalAddr { .. } | Constant::FuncAddr { .. } | Constant::Null(_)
        ),
        Operand::Value(id) => {
            let ty = if id.index() < f.sig.params.len() {
                f.sig.params[id.index()]
            } else {
                match find_def(f, *id).and_then(|inst| inst.result) {
                    Some(def) => def.ty,
                    None => return false,
                }
            };
            matches!(module.types.kind(ty), TypeKind::Ptr)
        }
    }
}

#[cfg(test)]
#[path = "../tests/t_scan.rs"]
mod tests;
