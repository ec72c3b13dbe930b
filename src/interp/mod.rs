//! Compile-time evaluation of package initializers.
//!
//! The driver locates the aggregated initializer function, evaluates its
//! package-init calls in source order against abstract memory, erases each
//! successfully evaluated call, and rematerializes every written global as
//! a constant initializer. Evaluation stops at the first instruction that
//! needs runtime information, leaving the remaining calls (and the module)
//! intact.

pub mod builtins;
pub mod errors;
pub mod frame;
pub mod memory;
pub mod scan;
pub mod value;
pub mod writeback;

use crate::ir::{Callee, FuncId, InstKind, Module, Terminator};

use errors::{malformed, EvalError};
use frame::Frame;
use memory::Memory;
use scan::SideEffectCache;
use value::{LocalRef, Value};

/// Well-known name of the aggregator emitted by the front end.
pub const INIT_ALL_NAME: &str = "runtime.initAll";

/// Frame ceiling for recursive evaluation. Exceeding it is a local error,
/// not a crash.
pub const DEPTH_LIMIT: u32 = 256;

/// Evaluates as many package initializers in `module` as possible,
/// mutating it in place. See the module docs for the contract.
pub fn run(module: &mut Module, debug: bool) -> Result<(), EvalError> {
    if debug {
        println!("[interp] compile-time evaluation of {}", module.name);
    }
    let mut ev = Eval::new(module, debug);
    ev.run_init_all()
}

pub(crate) struct Eval<'m> {
    pub(crate) module: &'m mut Module,
    pub(crate) debug: bool,
    pub(crate) mem: Memory,
    pub(crate) scan: SideEffectCache,
    next_local: u32,
    /// Package whose initializer is currently being evaluated; names the
    /// globals minted for compile-time allocations.
    pub(crate) pkg: String,
}

impl<'m> Eval<'m> {
    pub(crate) fn new(module: &'m mut Module, debug: bool) -> Self {
        let layout = module.layout;
        Eval {
            module,
            debug,
            mem: Memory::new(layout),
            scan: SideEffectCache::new(),
            next_local: 0,
            pkg: String::new(),
        }
    }

    pub(crate) fn trace(&self, depth: u32, msg: &str) {
        if self.debug {
            println!("[interp] {:indent$}{}", "", msg, indent = (depth as usize) * 2);
        }
    }

    fn fresh_local(&mut self) -> LocalRef {
        let id = self.next_local;
        self.next_local += 1;
        LocalRef(id)
    }

    fn run_init_all(&mut self) -> Result<(), EvalError> {
        let init_all = self
            .module
            .func_by_name(INIT_ALL_NAME)
            .ok_or_else(|| malformed(format!("no {} function", INIT_ALL_NAME)))?;
        let calls = self.collect_init_calls(init_all)?;

        for (target, pkg) in calls {
            // Erase the call before evaluating it, so a rewrite of the
            // callee cannot invalidate the instruction under our feet.
            let call = self.module.func_mut(init_all).blocks[0].remove_inst(0);
            let snapshot = self.mem.snapshot();
            self.pkg = pkg.clone();
            self.trace(0, &format!("package {}", pkg));

            let params: Vec<Value> = (0..self.module.func(target).sig.params.len())
                .map(|_| Value::Local(self.fresh_local()))
                .collect();
            let result = Frame::run(self, target, params, 0);

            match result {
                Ok(_) => {
                    if self.mem.dirty_global_with_symbolic_bytes().is_some() {
                        // A global kept runtime-only contents; this init
                        // must run at load time after all.
                        self.trace(0, &format!("package {}: symbolic global, rolled back", pkg));
                        self.mem.restore(snapshot);
                        self.module.func_mut(init_all).blocks[0].insert_inst(0, call);
                        break;
                    }
                }
                Err(EvalError::Unreachable) => {
                    self.trace(0, &format!("package {}: unreachable, stopping", pkg));
                    break;
                }
                Err(err) if err.is_local() => {
                    self.trace(0, &format!("package {}: {}, rolled back", pkg, err));
                    self.mem.restore(snapshot);
                    self.module.func_mut(init_all).blocks[0].insert_inst(0, call);
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        writeback::write_back(self)
    }

    /// Validates the aggregator's entry block and returns its init calls in
    /// source order.
    fn collect_init_calls(&self, init_all: FuncId) -> Result<Vec<(FuncId, String)>, EvalError> {
        let f = self.module.func(init_all);
        if f.is_declaration() {
            return Err(malformed(format!("{} has no body", INIT_ALL_NAME)));
        }
        let entry = f.entry();
        if !matches!(entry.term, Terminator::Ret { value: None }) {
            return Err(malformed(format!(
                "expected {} to end in ret void",
                INIT_ALL_NAME
            )));
        }

        let mut calls = Vec::with_capacity(entry.insts.len());
        for inst in &entry.insts {
            let InstKind::Call {
                callee: Callee::Direct(target),
                ..
            } = &inst.kind
            else {
                return Err(malformed(format!(
                    "expected all instructions in {} to be direct calls",
                    INIT_ALL_NAME
                )));
            };
            let name = &self.module.func(*target).name;
            let Some(pkg) = name.strip_suffix(".init") else {
                return Err(malformed(format!(
                    "expected all instructions in {} to be *.init() calls",
                    INIT_ALL_NAME
                )));
            };
            calls.push((*target, pkg.to_string()));
        }
        Ok(calls)
    }
}

#[cfg(test)]
#[path = "../tests/t_interp.rs"]
mod tests;
