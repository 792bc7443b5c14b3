//! Assembly-emission assertions: prologue/epilogue shape, root-frame
//! discipline, safepoint spills, and lowering of the sugar forms.

use niflheim::codegen::emit_module;
use niflheim::codegen::ir::*;

fn expr(kind: ExprKind, ty: Ty) -> Expr {
    Expr { kind, ty }
}

fn int_lit(value: i64) -> Expr {
    expr(ExprKind::IntLit(value), Ty::I64)
}

fn module_with(functions: Vec<ResolvedFunction>) -> ResolvedModule {
    ResolvedModule {
        name: "test".into(),
        globals: vec![],
        classes: vec![],
        functions,
    }
}

fn func(name: &str, return_ty: Ty, body: Vec<Stmt>) -> ResolvedFunction {
    ResolvedFunction {
        name: name.into(),
        params: vec![],
        return_ty,
        body,
        is_export: false,
        is_static: false,
    }
}

#[test]
fn emits_intel_text_header() {
    let module = module_with(vec![func("f", Ty::Unit, vec![Stmt::Return(None)])]);
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains(".intel_syntax noprefix"));
    assert!(asm.contains(".text"));
}

#[test]
fn emits_sysv_prologue_and_epilogue() {
    let module = module_with(vec![func("f", Ty::Unit, vec![Stmt::Return(None)])]);
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains("f:"));
    assert!(asm.contains("    push rbp"));
    assert!(asm.contains("    mov rbp, rsp"));
    assert!(asm.contains(".Lf_epilogue:"));
    assert!(asm.contains("    mov rsp, rbp"));
    assert!(asm.contains("    pop rbp"));
    assert!(asm.contains("    ret"));
}

#[test]
fn every_return_jumps_to_a_single_epilogue() {
    let module = module_with(vec![func(
        "f",
        Ty::Unit,
        vec![Stmt::Return(None), Stmt::Return(None)],
    )]);
    let asm = emit_module(&module).unwrap();
    assert_eq!(asm.matches("jmp .Lf_epilogue").count(), 2);
    assert_eq!(asm.matches(".Lf_epilogue:").count(), 1);
}

#[test]
fn exported_functions_are_marked_global() {
    let mut public = func("pubf", Ty::Unit, vec![Stmt::Return(None)]);
    public.is_export = true;
    let private = func("privf", Ty::Unit, vec![Stmt::Return(None)]);
    let module = module_with(vec![public, private]);
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains(".globl pubf"));
    assert!(!asm.contains(".globl privf"));
}

#[test]
fn primitive_functions_skip_the_root_frame() {
    let module = module_with(vec![func(
        "f",
        Ty::I64,
        vec![Stmt::Return(Some(int_lit(3)))],
    )]);
    let asm = emit_module(&module).unwrap();
    assert!(!asm.contains("rt_root_frame_init"));
    assert!(!asm.contains("rt_push_roots"));
    assert!(!asm.contains("rt_pop_roots"));
}

#[test]
fn reference_locals_get_a_pushed_and_popped_frame() {
    let module = module_with(vec![func(
        "f",
        Ty::Unit,
        vec![Stmt::VarDecl {
            name: "v".into(),
            ty: Ty::Vec,
            init: Some(expr(
                ExprKind::New {
                    class: "Vec".into(),
                    args: vec![],
                },
                Ty::Vec,
            )),
        }],
    )]);
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains("call rt_thread_state"));
    assert!(asm.contains("call rt_root_frame_init"));
    assert!(asm.contains("call rt_push_roots"));
    assert!(asm.contains("call rt_pop_roots"));
    assert!(asm.contains("call rt_vec_new"));
    // Push and pop balance on the only path through the function.
    assert_eq!(asm.matches("call rt_push_roots").count(), 1);
    assert_eq!(asm.matches("call rt_pop_roots").count(), 1);
}

#[test]
fn reference_arguments_are_spilled_to_root_slots_before_the_call() {
    // f(v: Vec) { v.push(v.get(0)); } needs both the receiver and the
    // argument, all references, to ride root slots around the safepoint.
    let v_local = expr(ExprKind::Local("v".into()), Ty::Vec);
    let get = expr(
        ExprKind::MethodCall {
            receiver: Box::new(v_local.clone()),
            method: "get".into(),
            args: vec![int_lit(0)],
        },
        Ty::Obj,
    );
    let push = expr(
        ExprKind::MethodCall {
            receiver: Box::new(v_local),
            method: "push".into(),
            args: vec![get],
        },
        Ty::Unit,
    );
    let module = module_with(vec![ResolvedFunction {
        name: "f".into(),
        params: vec![ResolvedParam {
            name: "v".into(),
            ty: Ty::Vec,
        }],
        return_ty: Ty::Unit,
        body: vec![Stmt::Expr(push)],
        is_export: false,
        is_static: false,
    }]);
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains("call rt_vec_get"));
    assert!(asm.contains("call rt_vec_push"));
    // The reference argument is loaded back out of a root slot, never kept
    // in a register across the call.
    assert!(asm.contains("mov rsi, qword ptr [rbp - "));
}

#[test]
fn index_sugar_canonicalizes_by_element_kind() {
    // a[1] on u8[] lowers to rt_array_get_u8; a[1] = 2 to rt_array_set_u8;
    // a[0:1] to rt_array_slice_u8.
    let array_ty = Ty::Array(Box::new(Ty::U8));
    let a_local = expr(ExprKind::Local("a".into()), array_ty.clone());
    let module = module_with(vec![ResolvedFunction {
        name: "f".into(),
        params: vec![ResolvedParam {
            name: "a".into(),
            ty: array_ty.clone(),
        }],
        return_ty: Ty::Unit,
        body: vec![
            Stmt::Expr(expr(
                ExprKind::Index {
                    object: Box::new(a_local.clone()),
                    index: Box::new(int_lit(1)),
                },
                Ty::U8,
            )),
            Stmt::Assign {
                target: AssignTarget::Index {
                    object: a_local.clone(),
                    index: int_lit(1),
                },
                value: int_lit(2),
            },
            Stmt::Expr(expr(
                ExprKind::Slice {
                    object: Box::new(a_local),
                    start: Box::new(int_lit(0)),
                    end: Box::new(int_lit(1)),
                },
                array_ty,
            )),
        ],
        is_export: false,
        is_static: false,
    }]);
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains("call rt_array_get_u8"));
    assert!(asm.contains("call rt_array_set_u8"));
    assert!(asm.contains("call rt_array_slice_u8"));
}

#[test]
fn downcast_lowers_to_checked_cast() {
    let obj = expr(ExprKind::Local("o".into()), Ty::Obj);
    let module = module_with(vec![ResolvedFunction {
        name: "f".into(),
        params: vec![ResolvedParam {
            name: "o".into(),
            ty: Ty::Obj,
        }],
        return_ty: Ty::Unit,
        body: vec![Stmt::Expr(expr(
            ExprKind::Cast {
                operand: Box::new(obj),
                target: Ty::Str,
            },
            Ty::Str,
        ))],
        is_export: false,
        is_static: false,
    }]);
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains("lea rsi, [rip + rt_type_str_desc]"));
    assert!(asm.contains("call rt_checked_cast"));
}

#[test]
fn field_and_method_access_emit_null_checks() {
    let class = ResolvedClass {
        name: "Counter".into(),
        fields: vec![ResolvedField {
            name: "count".into(),
            ty: Ty::I64,
        }],
        methods: vec![ResolvedFunction {
            name: "bump".into(),
            params: vec![],
            return_ty: Ty::Unit,
            body: vec![],
            is_export: false,
            is_static: false,
        }],
    };
    let c_local = expr(ExprKind::Local("c".into()), Ty::Class("Counter".into()));
    let module = ResolvedModule {
        name: "test".into(),
        globals: vec![],
        classes: vec![class],
        functions: vec![ResolvedFunction {
            name: "f".into(),
            params: vec![ResolvedParam {
                name: "c".into(),
                ty: Ty::Class("Counter".into()),
            }],
            return_ty: Ty::I64,
            body: vec![
                Stmt::Expr(expr(
                    ExprKind::MethodCall {
                        receiver: Box::new(c_local.clone()),
                        method: "bump".into(),
                        args: vec![],
                    },
                    Ty::Unit,
                )),
                Stmt::Return(Some(expr(
                    ExprKind::FieldAccess {
                        object: Box::new(c_local),
                        field: "count".into(),
                    },
                    Ty::I64,
                ))),
            ],
            is_export: false,
            is_static: false,
        }],
    };
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains("je .Lf_null_deref"));
    assert!(asm.contains(".Lf_null_deref:"));
    assert!(asm.contains("call rt_panic_null_deref"));
    assert!(asm.contains("call Counter_bump"));
}

#[test]
fn classes_get_descriptor_records_with_pointer_offsets() {
    let class = ResolvedClass {
        name: "Pair".into(),
        fields: vec![
            ResolvedField {
                name: "left".into(),
                ty: Ty::Obj,
            },
            ResolvedField {
                name: "tag".into(),
                ty: Ty::I64,
            },
            ResolvedField {
                name: "right".into(),
                ty: Ty::Obj,
            },
        ],
        methods: vec![],
    };
    let module = ResolvedModule {
        name: "test".into(),
        globals: vec![],
        classes: vec![class],
        functions: vec![],
    };
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains("nif_type_Pair:"));
    assert!(asm.contains("Pair_new:"));
    assert!(asm.contains("call rt_alloc_obj"));
    // Reference fields at header + 0 and header + 16.
    assert!(asm.contains(".long 24, 40"));
    // Fixed size = 24-byte header + three 8-byte fields.
    assert!(asm.contains(".quad 48"));
    assert!(asm.contains(".asciz \"Pair\""));
}

#[test]
fn main_gets_a_lifecycle_wrapper() {
    let module = module_with(vec![ResolvedFunction {
        name: "main".into(),
        params: vec![],
        return_ty: Ty::I64,
        body: vec![Stmt::Return(Some(int_lit(0)))],
        is_export: true,
        is_static: false,
    }]);
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains(".globl main"));
    assert!(asm.contains("nif_main:"));
    assert!(asm.contains("call rt_init"));
    assert!(asm.contains("call nif_main"));
    assert!(asm.contains("call rt_shutdown"));
}

#[test]
fn reference_globals_register_and_unregister() {
    let module = ResolvedModule {
        name: "test".into(),
        globals: vec![
            ResolvedGlobal {
                name: "cache".into(),
                ty: Ty::Obj,
            },
            ResolvedGlobal {
                name: "hits".into(),
                ty: Ty::I64,
            },
        ],
        classes: vec![],
        functions: vec![ResolvedFunction {
            name: "main".into(),
            params: vec![],
            return_ty: Ty::I64,
            body: vec![Stmt::Return(Some(int_lit(0)))],
            is_export: true,
            is_static: false,
        }],
    };
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains("lea rdi, [rip + nif_g_cache]"));
    assert!(asm.contains("call rt_gc_register_global_root"));
    assert!(asm.contains("call rt_gc_unregister_global_root"));
    assert!(asm.contains("nif_g_cache:"));
    assert!(asm.contains("nif_g_hits:"));
    // Only the reference global is registered as a root.
    assert_eq!(asm.matches("call rt_gc_register_global_root").count(), 1);
}

#[test]
fn string_literals_are_pooled_in_rodata() {
    let s = expr(ExprKind::StrLit("hi\n".into()), Ty::Str);
    let module = module_with(vec![func(
        "f",
        Ty::Unit,
        vec![
            Stmt::Expr(s.clone()),
            Stmt::Expr(s),
        ],
    )]);
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains(".section .rodata"));
    assert!(asm.contains(".ascii \"hi\\n\""));
    // The same literal is pooled once.
    assert_eq!(asm.matches(".Lstr0:").count(), 1);
    assert_eq!(asm.matches("lea rsi, [rip + .Lstr0]").count(), 2);
    assert!(asm.contains("call rt_str_from_bytes"));
}

#[test]
fn println_dispatches_to_the_typed_entry() {
    let module = module_with(vec![func(
        "f",
        Ty::Unit,
        vec![Stmt::Expr(expr(
            ExprKind::Call {
                callee: "println".into(),
                args: vec![int_lit(5)],
            },
            Ty::Unit,
        ))],
    )]);
    let asm = emit_module(&module).unwrap();
    assert!(asm.contains("call rt_println_i64"));
}

#[test]
fn too_many_integer_arguments_is_an_error() {
    let args: Vec<Expr> = (0..7).map(int_lit).collect();
    let callee = ResolvedFunction {
        name: "wide".into(),
        params: (0..7)
            .map(|i| ResolvedParam {
                name: format!("p{}", i),
                ty: Ty::I64,
            })
            .collect(),
        return_ty: Ty::Unit,
        body: vec![],
        is_export: false,
        is_static: false,
    };
    let module = module_with(vec![
        callee,
        func(
            "f",
            Ty::Unit,
            vec![Stmt::Expr(expr(
                ExprKind::Call {
                    callee: "wide".into(),
                    args,
                },
                Ty::Unit,
            ))],
        ),
    ]);
    assert!(emit_module(&module).is_err());
}
