use indoc::indoc;

use crate::ir::builder::{int_op, value_op, FunctionBuilder, ModuleBuilder};
use crate::ir::{
    BinOp, Callee, CmpOp, Constant, DataLayout, FunctionSig, Operand, SwitchCase,
};

#[test]
fn test_module_printing() {
    let mut b = ModuleBuilder::new("print-test", DataLayout::little_endian_64());
    let void = b.ty_void();
    let i1 = b.ty_int(1);
    let i32_ty = b.ty_int(32);
    let i8_ty = b.ty_int(8);
    let arr = b.ty_array(i8_ty, 3);
    let pair = b.ty_struct(vec![i32_ty, i32_ty]);

    let g = b.global("g", i32_ty, Some(Constant::Int { ty: i32_ty, value: 7 }), false);
    b.global(
        "s",
        arr,
        Some(Constant::Bytes {
            ty: arr,
            data: b"abc".to_vec(),
        }),
        true,
    );
    b.global(
        "pair",
        pair,
        Some(Constant::Aggregate {
            ty: pair,
            fields: vec![
                Constant::Int { ty: i32_ty, value: 1 },
                Constant::Int { ty: i32_ty, value: 2 },
            ],
        }),
        false,
    );

    let ext = b.declare_function(
        "ext",
        FunctionSig {
            params: vec![i32_ty],
            ret: void,
        },
    );
    let f = b.declare_function(
        "f",
        FunctionSig {
            params: vec![i32_ty],
            ret: i32_ty,
        },
    );

    let mut fb = FunctionBuilder::new(1);
    let done = fb.new_block("done");
    let sum = fb.binop(
        i32_ty,
        BinOp::Add,
        value_op(fb.param(0)),
        int_op(i32_ty, 1),
    );
    let cmp = fb.icmp(i1, CmpOp::SGt, value_op(sum), int_op(i32_ty, 10));
    fb.call(None, Callee::Direct(ext), vec![value_op(sum)]);
    fb.cond_br(value_op(cmp), done, done);
    fb.select_block(done);
    let loaded = fb.load(
        i32_ty,
        Operand::Const(Constant::GlobalAddr { global: g, offset: 0 }),
    );
    fb.ret(Some(value_op(loaded)));
    b.define_function(f, fb.finish());

    let module = b.finish();
    let expected = indoc! {r#"
        ; ModuleID = 'print-test'
        target datalayout = "e-p:64"

        @g = global i32 7
        @s = constant [3 x i8] c"abc"
        @pair = global { i32, i32 } { i32 1, i32 2 }

        declare void @ext(i32 %0)

        define i32 @f(i32 %0) {
        entry:
          %1 = add %0, 1
          %2 = icmp sgt %1, 10
          call @ext(%1)
          br %2, label %done, label %done

        done:
          %3 = load i32, ptr @g
          ret %3
        }
    "#};
    assert_eq!(module.to_string(), expected);
}

#[test]
fn test_switch_and_unreachable_printing() {
    let mut b = ModuleBuilder::new("print-test", DataLayout::little_endian_64());
    let void = b.ty_void();
    let i32_ty = b.ty_int(32);
    let f = b.declare_function(
        "f",
        FunctionSig {
            params: vec![i32_ty],
            ret: void,
        },
    );

    let mut fb = FunctionBuilder::new(1);
    let one = fb.new_block("one");
    let dead = fb.new_block("dead");
    fb.switch(
        value_op(fb.param(0)),
        vec![SwitchCase {
            value: 1,
            target: one,
        }],
        dead,
    );
    fb.select_block(one);
    fb.ret(None);
    fb.select_block(dead);
    fb.unreachable();
    b.define_function(f, fb.finish());

    let module = b.finish();
    let text = module.to_string();
    assert!(text.contains("switch %0, label %dead [ 1, label %one ]"));
    assert!(text.contains("unreachable"));
}
