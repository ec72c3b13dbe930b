use indoc::indoc;

use super::*;
use crate::interp::errors::EvalError;
use crate::ir::builder::{int_op, value_op, FunctionBuilder, ModuleBuilder};
use crate::ir::verify::verify_module;
use crate::ir::{
    BinOp, Callee, CastKind, Constant, DataLayout, FCmpOp, FuncId, FunctionSig, GlobalId, Module,
    Operand, TypeId,
};

// --- fuzzy IR comparison -------------------------------------------------

/// Keeps only the lines that matter when comparing printed IR: blanks,
/// comments, and source_filename headers are stripped.
fn relevant_lines(text: &str) -> Vec<&str> {
    text.lines()
        .filter(|line| {
            !line.is_empty()
                && !line.starts_with(';')
                && !line.starts_with("source_filename = ")
        })
        .collect()
}

fn fuzzy_equal_ir(a: &str, b: &str) -> bool {
    relevant_lines(a) == relevant_lines(b)
}

// --- module builders for the scenarios -----------------------------------

struct SliceTys {
    void: TypeId,
    i1: TypeId,
    i8_ty: TypeId,
    i32_ty: TypeId,
    i64_ty: TypeId,
    f64_ty: TypeId,
    ptr: TypeId,
    slice: TypeId,
}

fn common_tys(b: &mut ModuleBuilder) -> SliceTys {
    let void = b.ty_void();
    let i1 = b.ty_int(1);
    let i8_ty = b.ty_int(8);
    let i32_ty = b.ty_int(32);
    let i64_ty = b.ty_int(64);
    let f64_ty = b.ty_float(64);
    let ptr = b.ty_ptr();
    let slice = b.ty_struct(vec![ptr, i64_ty, i64_ty]);
    SliceTys {
        void,
        i1,
        i8_ty,
        i32_ty,
        i64_ty,
        f64_ty,
        ptr,
        slice,
    }
}

fn global_addr(global: GlobalId) -> Operand {
    Operand::Const(Constant::GlobalAddr { global, offset: 0 })
}

fn add_init_all(b: &mut ModuleBuilder, void: TypeId, inits: &[FuncId]) -> FuncId {
    let init_all = b.declare_function(
        INIT_ALL_NAME,
        FunctionSig {
            params: vec![],
            ret: void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    for init in inits {
        fb.call(None, Callee::Direct(*init), vec![]);
    }
    fb.ret(None);
    b.define_function(init_all, fb.finish());
    init_all
}

/// The "basic" scenario: scalar, struct, slice, map, float-compare, and
/// byte-string initialization in one package init.
fn basic_module() -> Module {
    let mut b = ModuleBuilder::new("basic", DataLayout::little_endian_64());
    let t = common_tys(&mut b);
    let pair = b.ty_struct(vec![t.i32_ty, t.i32_ty]);
    let arr4 = b.ty_array(t.i32_ty, 4);
    let foo_ty = b.ty_array(t.i8_ty, 3);

    let v1 = b.global("v1", t.i32_ty, Some(Constant::Zero(t.i32_ty)), false);
    let v2 = b.global("v2", pair, Some(Constant::Zero(pair)), false);
    let v3 = b.global("v3", t.slice, Some(Constant::Zero(t.slice)), false);
    let v5 = b.global("v5", t.ptr, Some(Constant::Null(t.ptr)), false);
    let v6 = b.global("v6", t.i1, Some(Constant::Zero(t.i1)), false);
    let v7 = b.global("v7", t.slice, Some(Constant::Zero(t.slice)), false);
    let str_foo = b.global(
        "str.foo",
        foo_ty,
        Some(Constant::Bytes {
            ty: foo_ty,
            data: b"foo".to_vec(),
        }),
        true,
    );

    let alloc = b.declare_function(
        "runtime.alloc",
        FunctionSig {
            params: vec![t.i64_ty],
            ret: t.ptr,
        },
    );
    let hashmap_make = b.declare_function(
        "runtime.hashmapMake",
        FunctionSig {
            params: vec![t.i64_ty, t.i64_ty],
            ret: t.ptr,
        },
    );
    let memcpy = b.declare_function(
        "llvm.memcpy.p0.p0.i64",
        FunctionSig {
            params: vec![t.ptr, t.ptr, t.i64_ty],
            ret: t.void,
        },
    );
    let main_init = b.declare_function(
        "main.init",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );

    let mut fb = FunctionBuilder::new(0);
    // v1 = 3
    fb.store(t.i32_ty, int_op(t.i32_ty, 3), global_addr(v1));
    // v2 = {2, 5}
    fb.store(
        pair,
        Operand::Const(Constant::Aggregate {
            ty: pair,
            fields: vec![
                Constant::Int { ty: t.i32_ty, value: 2 },
                Constant::Int { ty: t.i32_ty, value: 5 },
            ],
        }),
        global_addr(v2),
    );
    // v3 = []int{2, 3, 5, 7}
    let backing = fb
        .call(Some(t.ptr), Callee::Direct(alloc), vec![int_op(t.i64_ty, 16)])
        .unwrap();
    for (i, elem) in [2u64, 3, 5, 7].into_iter().enumerate() {
        let slot = fb.gep(
            t.ptr,
            arr4,
            value_op(backing),
            vec![int_op(t.i64_ty, 0), int_op(t.i64_ty, i as u64)],
        );
        fb.store(t.i32_ty, int_op(t.i32_ty, elem), value_op(slot));
    }
    let v3_ptr = fb.gep(
        t.ptr,
        t.slice,
        global_addr(v3),
        vec![int_op(t.i64_ty, 0), int_op(t.i32_ty, 0)],
    );
    fb.store(t.ptr, value_op(backing), value_op(v3_ptr));
    let v3_len = fb.gep(
        t.ptr,
        t.slice,
        global_addr(v3),
        vec![int_op(t.i64_ty, 0), int_op(t.i32_ty, 1)],
    );
    fb.store(t.i64_ty, int_op(t.i64_ty, 4), value_op(v3_len));
    let v3_cap = fb.gep(
        t.ptr,
        t.slice,
        global_addr(v3),
        vec![int_op(t.i64_ty, 0), int_op(t.i32_ty, 2)],
    );
    fb.store(t.i64_ty, int_op(t.i64_ty, 4), value_op(v3_cap));
    // v5 = map[string]int{}
    let map = fb
        .call(
            Some(t.ptr),
            Callee::Direct(hashmap_make),
            vec![int_op(t.i64_ty, 8), int_op(t.i64_ty, 8)],
        )
        .unwrap();
    fb.store(t.ptr, value_op(map), global_addr(v5));
    // v6 = float64(v1) < 2.6
    let v1_val = fb.load(t.i32_ty, global_addr(v1));
    let as_f64 = fb.cast(CastKind::SIToFP, value_op(v1_val), t.f64_ty);
    let cmp = fb.fcmp(
        t.i1,
        FCmpOp::OLt,
        value_op(as_f64),
        Operand::Const(Constant::Float {
            ty: t.f64_ty,
            bits: 2.6f64.to_bits(),
        }),
    );
    fb.store(t.i1, value_op(cmp), global_addr(v6));
    // v7 = []byte("foo")
    let bytes = fb
        .call(Some(t.ptr), Callee::Direct(alloc), vec![int_op(t.i64_ty, 3)])
        .unwrap();
    fb.call(
        None,
        Callee::Direct(memcpy),
        vec![value_op(bytes), global_addr(str_foo), int_op(t.i64_ty, 3)],
    );
    let v7_ptr = fb.gep(
        t.ptr,
        t.slice,
        global_addr(v7),
        vec![int_op(t.i64_ty, 0), int_op(t.i32_ty, 0)],
    );
    fb.store(t.ptr, value_op(bytes), value_op(v7_ptr));
    let v7_len = fb.gep(
        t.ptr,
        t.slice,
        global_addr(v7),
        vec![int_op(t.i64_ty, 0), int_op(t.i32_ty, 1)],
    );
    fb.store(t.i64_ty, int_op(t.i64_ty, 3), value_op(v7_len));
    let v7_cap = fb.gep(
        t.ptr,
        t.slice,
        global_addr(v7),
        vec![int_op(t.i64_ty, 0), int_op(t.i32_ty, 2)],
    );
    fb.store(t.i64_ty, int_op(t.i64_ty, 3), value_op(v7_cap));
    fb.ret(None);
    b.define_function(main_init, fb.finish());

    add_init_all(&mut b, t.void, &[main_init]);
    b.finish()
}

fn init_all_insts(module: &Module) -> usize {
    let init_all = module.func_by_name(INIT_ALL_NAME).unwrap();
    module.func(init_all).entry().insts.len()
}

fn global_init(module: &Module, name: &str) -> Constant {
    let id = module.global_by_name(name).unwrap();
    module.global(id).init.clone().unwrap()
}

// --- scenarios ------------------------------------------------------------

#[test]
fn test_basic_init_is_fully_evaluated() {
    let mut module = basic_module();
    run(&mut module, false).unwrap();
    verify_module(&module).unwrap();

    // Every init call is gone.
    assert_eq!(init_all_insts(&module), 0);

    assert!(matches!(
        global_init(&module, "v1"),
        Constant::Int { value: 3, .. }
    ));

    let Constant::Aggregate { fields, .. } = global_init(&module, "v2") else {
        panic!("v2 should materialize as a struct constant");
    };
    assert!(matches!(fields[0], Constant::Int { value: 2, .. }));
    assert!(matches!(fields[1], Constant::Int { value: 5, .. }));

    // v3 points at a minted backing array holding {2, 3, 5, 7}.
    let Constant::Aggregate { fields, .. } = global_init(&module, "v3") else {
        panic!("v3 should materialize as a slice constant");
    };
    let Constant::GlobalAddr { global, offset: 0 } = fields[0].clone() else {
        panic!("v3 data pointer should be a global address");
    };
    assert!(matches!(fields[1], Constant::Int { value: 4, .. }));
    assert!(matches!(fields[2], Constant::Int { value: 4, .. }));
    let backing_init = module.global(global).init.clone().unwrap();
    let Constant::Bytes { data, .. } = backing_init else {
        panic!("backing array should be concrete bytes");
    };
    assert_eq!(data, vec![2, 0, 0, 0, 3, 0, 0, 0, 5, 0, 0, 0, 7, 0, 0, 0]);

    // v5 points at a minted map header with the key/value sizes recorded.
    let Constant::GlobalAddr { global, offset: 0 } = global_init(&module, "v5") else {
        panic!("v5 should point at the minted map header");
    };
    let map_global = module.global(global);
    assert!(map_global.name.starts_with("main$map"));
    let map_init = map_global.init.clone().unwrap();
    let Constant::Bytes { data, .. } = map_init else {
        panic!("map header should be concrete bytes");
    };
    assert_eq!(data.len(), 26);
    assert_eq!(&data[24..], &[8, 8]);

    // float64(3) < 2.6 is false.
    assert!(matches!(
        global_init(&module, "v6"),
        Constant::Int { value: 0, .. }
    ));

    let Constant::Aggregate { fields, .. } = global_init(&module, "v7") else {
        panic!("v7 should materialize as a slice constant");
    };
    let Constant::GlobalAddr { global, offset: 0 } = fields[0].clone() else {
        panic!("v7 data pointer should be a global address");
    };
    assert_eq!(
        module.global(global).init.clone().unwrap(),
        Constant::Bytes {
            ty: module.global(global).ty,
            data: b"foo".to_vec(),
        }
    );
}

#[test]
fn test_pass_is_idempotent() {
    let mut module = basic_module();
    run(&mut module, false).unwrap();
    let first = module.to_string();
    run(&mut module, false).unwrap();
    let second = module.to_string();
    assert!(fuzzy_equal_ir(&first, &second));
}

#[test]
fn test_slice_copy() {
    let mut b = ModuleBuilder::new("slice-copy", DataLayout::little_endian_64());
    let t = common_tys(&mut b);
    let src_ty = b.ty_array(t.i8_ty, 2);

    let src_backing = b.global(
        "uint8SliceSrc.data",
        src_ty,
        Some(Constant::Bytes {
            ty: src_ty,
            data: vec![3, 100],
        }),
        true,
    );
    let dst = b.global("uint8SliceDst", t.slice, Some(Constant::Zero(t.slice)), false);

    let alloc = b.declare_function(
        "runtime.alloc",
        FunctionSig {
            params: vec![t.i64_ty],
            ret: t.ptr,
        },
    );
    let slice_copy = b.declare_function(
        "runtime.sliceCopy",
        FunctionSig {
            params: vec![t.ptr, t.ptr, t.i64_ty, t.i64_ty],
            ret: t.i64_ty,
        },
    );
    let main_init = b.declare_function(
        "main.init",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );

    let mut fb = FunctionBuilder::new(0);
    let backing = fb
        .call(Some(t.ptr), Callee::Direct(alloc), vec![int_op(t.i64_ty, 2)])
        .unwrap();
    fb.call(
        Some(t.i64_ty),
        Callee::Direct(slice_copy),
        vec![
            value_op(backing),
            global_addr(src_backing),
            int_op(t.i64_ty, 2),
            int_op(t.i64_ty, 1),
        ],
    );
    let dst_ptr = fb.gep(
        t.ptr,
        t.slice,
        global_addr(dst),
        vec![int_op(t.i64_ty, 0), int_op(t.i32_ty, 0)],
    );
    fb.store(t.ptr, value_op(backing), value_op(dst_ptr));
    let dst_len = fb.gep(
        t.ptr,
        t.slice,
        global_addr(dst),
        vec![int_op(t.i64_ty, 0), int_op(t.i32_ty, 1)],
    );
    fb.store(t.i64_ty, int_op(t.i64_ty, 2), value_op(dst_len));
    let dst_cap = fb.gep(
        t.ptr,
        t.slice,
        global_addr(dst),
        vec![int_op(t.i64_ty, 0), int_op(t.i32_ty, 2)],
    );
    fb.store(t.i64_ty, int_op(t.i64_ty, 2), value_op(dst_cap));
    fb.ret(None);
    b.define_function(main_init, fb.finish());

    add_init_all(&mut b, t.void, &[main_init]);
    let mut module = b.finish();

    run(&mut module, false).unwrap();
    verify_module(&module).unwrap();
    assert_eq!(init_all_insts(&module), 0);

    let Constant::Aggregate { fields, .. } = global_init(&module, "uint8SliceDst") else {
        panic!("dst should materialize as a slice constant");
    };
    let Constant::GlobalAddr { global, offset: 0 } = fields[0].clone() else {
        panic!("dst data pointer should be a global address");
    };
    assert_eq!(
        module.global(global).init.clone().unwrap(),
        Constant::Bytes {
            ty: module.global(global).ty,
            data: vec![3, 100],
        }
    );
}

#[test]
fn test_unreachable_init_stops_the_driver() {
    let mut b = ModuleBuilder::new("unreachable", DataLayout::little_endian_64());
    let t = common_tys(&mut b);
    let g = b.global("g", t.i32_ty, Some(Constant::Zero(t.i32_ty)), false);

    let a_init = b.declare_function(
        "a.init",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    fb.unreachable();
    b.define_function(a_init, fb.finish());

    let b_init = b.declare_function(
        "b.init",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    fb.store(t.i32_ty, int_op(t.i32_ty, 1), global_addr(g));
    fb.ret(None);
    b.define_function(b_init, fb.finish());

    add_init_all(&mut b, t.void, &[a_init, b_init]);
    let mut module = b.finish();

    run(&mut module, false).unwrap();
    verify_module(&module).unwrap();

    // The unreachable init is erased, but everything after it is left to
    // runtime untouched.
    assert_eq!(init_all_insts(&module), 1);
    assert!(matches!(global_init(&module, "g"), Constant::Zero(_)));
}

#[test]
fn test_store_to_constant_global_is_fatal() {
    let mut b = ModuleBuilder::new("write-to-constant", DataLayout::little_endian_64());
    let t = common_tys(&mut b);
    let c = b.global(
        "c",
        t.i32_ty,
        Some(Constant::Int { ty: t.i32_ty, value: 9 }),
        true,
    );

    let main_init = b.declare_function(
        "main.init",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    fb.store(t.i32_ty, int_op(t.i32_ty, 1), global_addr(c));
    fb.ret(None);
    b.define_function(main_init, fb.finish());

    add_init_all(&mut b, t.void, &[main_init]);
    let mut module = b.finish();

    assert_eq!(
        run(&mut module, false),
        Err(EvalError::WriteToConstant("c".to_string()))
    );
}

#[test]
fn test_recursive_init_rolls_back_to_identical_module() {
    let mut b = ModuleBuilder::new("recursive", DataLayout::little_endian_64());
    let t = common_tys(&mut b);
    let g = b.global("g", t.i32_ty, Some(Constant::Zero(t.i32_ty)), false);

    let spin = b.declare_function(
        "a.spin",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    fb.call(None, Callee::Direct(spin), vec![]);
    fb.ret(None);
    b.define_function(spin, fb.finish());

    let a_init = b.declare_function(
        "a.init",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    // A store that must be rolled back when the recursion gives up.
    fb.store(t.i32_ty, int_op(t.i32_ty, 42), global_addr(g));
    fb.call(None, Callee::Direct(spin), vec![]);
    fb.ret(None);
    b.define_function(a_init, fb.finish());

    add_init_all(&mut b, t.void, &[a_init]);
    let mut module = b.finish();

    let before = module.to_string();
    run(&mut module, false).unwrap();
    let after = module.to_string();

    // The init call is back in place and the partial store is gone.
    assert_eq!(before, after);
    assert_eq!(init_all_insts(&module), 1);
    assert!(matches!(global_init(&module, "g"), Constant::Zero(_)));
}

#[test]
fn test_phi_resolution_through_folded_branch() {
    let mut b = ModuleBuilder::new("phi", DataLayout::little_endian_64());
    let t = common_tys(&mut b);
    let g = b.global("g", t.i32_ty, Some(Constant::Zero(t.i32_ty)), false);

    let main_init = b.declare_function(
        "main.init",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    let then_b = fb.new_block("then");
    let else_b = fb.new_block("else");
    let merge = fb.new_block("merge");
    fb.cond_br(int_op(t.i1, 1), then_b, else_b);
    fb.select_block(then_b);
    fb.br(merge);
    fb.select_block(else_b);
    fb.br(merge);
    fb.select_block(merge);
    let phi = fb.phi(
        t.i32_ty,
        vec![(then_b, int_op(t.i32_ty, 7)), (else_b, int_op(t.i32_ty, 8))],
    );
    fb.store(t.i32_ty, value_op(phi), global_addr(g));
    fb.ret(None);
    b.define_function(main_init, fb.finish());

    add_init_all(&mut b, t.void, &[main_init]);
    let mut module = b.finish();

    run(&mut module, false).unwrap();
    verify_module(&module).unwrap();
    assert_eq!(init_all_insts(&module), 0);
    assert!(matches!(
        global_init(&module, "g"),
        Constant::Int { value: 7, .. }
    ));
}

#[test]
fn test_printed_output_matches_golden() {
    let mut b = ModuleBuilder::new("golden", DataLayout::little_endian_64());
    let void = b.ty_void();
    let i32_ty = b.ty_int(32);
    let v1 = b.global("v1", i32_ty, Some(Constant::Zero(i32_ty)), false);

    let main_init = b.declare_function(
        "main.init",
        FunctionSig {
            params: vec![],
            ret: void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    fb.store(i32_ty, int_op(i32_ty, 3), global_addr(v1));
    fb.ret(None);
    b.define_function(main_init, fb.finish());

    add_init_all(&mut b, void, &[main_init]);
    let mut module = b.finish();
    run(&mut module, false).unwrap();

    let expected = indoc! {r#"
        ; ModuleID = 'golden'
        target datalayout = "e-p:64"

        @v1 = global i32 3

        define void @main.init() {
        entry:
          store i32 3, ptr @v1
          ret void
        }

        define void @runtime.initAll() {
        entry:
          ret void
        }
    "#};
    assert!(
        fuzzy_equal_ir(&module.to_string(), expected),
        "output did not match golden:\n{}",
        module
    );
}

#[test]
fn test_channel_make_materializes_a_zeroed_header() {
    let mut b = ModuleBuilder::new("chan", DataLayout::little_endian_64());
    let t = common_tys(&mut b);
    let ch = b.global("ch", t.ptr, Some(Constant::Null(t.ptr)), false);

    let chan_make = b.declare_function(
        "runtime.chanMake",
        FunctionSig {
            params: vec![t.i64_ty],
            ret: t.ptr,
        },
    );
    let main_init = b.declare_function(
        "main.init",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    let header = fb
        .call(Some(t.ptr), Callee::Direct(chan_make), vec![int_op(t.i64_ty, 4)])
        .unwrap();
    fb.store(t.ptr, value_op(header), global_addr(ch));
    fb.ret(None);
    b.define_function(main_init, fb.finish());

    add_init_all(&mut b, t.void, &[main_init]);
    let mut module = b.finish();

    run(&mut module, false).unwrap();
    verify_module(&module).unwrap();
    assert_eq!(init_all_insts(&module), 0);

    let Constant::GlobalAddr { global, offset: 0 } = global_init(&module, "ch") else {
        panic!("ch should point at the minted channel header");
    };
    let header = module.global(global);
    assert!(header.name.starts_with("main$chan"));
    assert!(matches!(header.init.clone().unwrap(), Constant::Zero(_)));
}

#[test]
fn test_malformed_aggregator_is_rejected() {
    let mut b = ModuleBuilder::new("malformed", DataLayout::little_endian_64());
    let t = common_tys(&mut b);

    let init_all = b.declare_function(
        INIT_ALL_NAME,
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    // An arithmetic instruction does not belong in the aggregator.
    fb.binop(t.i32_ty, BinOp::Add, int_op(t.i32_ty, 1), int_op(t.i32_ty, 2));
    fb.ret(None);
    b.define_function(init_all, fb.finish());
    let mut module = b.finish();

    assert!(matches!(
        run(&mut module, false),
        Err(EvalError::MalformedIr(_))
    ));
}

#[test]
fn test_unevaluable_init_keeps_later_state_and_stops() {
    // First init succeeds, second is blocked by an unknown external call;
    // the first init's effects must survive while the second is left in
    // the IR for runtime.
    let mut b = ModuleBuilder::new("partial", DataLayout::little_endian_64());
    let t = common_tys(&mut b);
    let g1 = b.global("g1", t.i32_ty, Some(Constant::Zero(t.i32_ty)), false);
    let g2 = b.global("g2", t.i32_ty, Some(Constant::Zero(t.i32_ty)), false);

    let ext = b.declare_function(
        "runtime.nanotime",
        FunctionSig {
            params: vec![],
            ret: t.i64_ty,
        },
    );

    let a_init = b.declare_function(
        "a.init",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    fb.store(t.i32_ty, int_op(t.i32_ty, 10), global_addr(g1));
    fb.ret(None);
    b.define_function(a_init, fb.finish());

    let b_init = b.declare_function(
        "b.init",
        FunctionSig {
            params: vec![],
            ret: t.void,
        },
    );
    let mut fb = FunctionBuilder::new(0);
    fb.store(t.i32_ty, int_op(t.i32_ty, 20), global_addr(g2));
    fb.call(Some(t.i64_ty), Callee::Direct(ext), vec![]);
    fb.ret(None);
    b.define_function(b_init, fb.finish());

    add_init_all(&mut b, t.void, &[a_init, b_init]);
    let mut module = b.finish();

    run(&mut module, false).unwrap();
    verify_module(&module).unwrap();

    assert_eq!(init_all_insts(&module), 1);
    assert!(matches!(
        global_init(&module, "g1"),
        Constant::Int { value: 10, .. }
    ));
    // The second init's partial store was rolled back.
    assert!(matches!(global_init(&module, "g2"), Constant::Zero(_)));
}
