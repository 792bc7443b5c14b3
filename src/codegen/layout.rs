//! Per-function activation-frame layout.
//!
//! Every function gets a fixed-size frame carved below `rbp`: the saved
//! thread-state pointer, a return-value save slot, the shadow-stack frame
//! descriptor, the root-slot array (named slots for reference locals followed
//! by a fixed block of temp slots for references in flight around calls),
//! one 8-byte home per primitive local, and a staging area for incoming
//! arguments. Reference locals have no register or stack home outside their
//! root slot, which is what makes every call site a valid safepoint.

use std::collections::HashMap;

use super::ir::{Expr, ExprKind, ResolvedFunction, ResolvedParam, Stmt, Ty};

/// Temp root slots reserved per frame for call-argument references.
pub const TEMP_ROOT_SLOT_COUNT: u32 = 6;

/// Argument-staging slots (enough for 6 integer plus 8 float registers).
pub const ARG_STAGE_SLOTS: u32 = 14;

/// Computed frame layout for one function.
///
/// Offsets are positive byte distances below `rbp`; a value at offset `o`
/// lives at `[rbp - o]`.
#[derive(Debug, Clone, Default)]
pub struct FunctionLayout {
    /// Saved `rt_thread_state()` result.
    pub ts_offset: i64,
    /// Return-value save across the epilogue's `rt_pop_roots`.
    pub ret_save_offset: i64,
    /// Base of the 24-byte `RtRootFrame` descriptor.
    pub frame_offset: i64,
    /// Address of root slot 0; slot `i` lives at `[rbp - (base - 8*i)]`.
    pub roots_base_offset: i64,
    /// Named reference slots followed by the temp block.
    pub root_slot_count: u32,
    /// Reference local/param name to root-slot index.
    pub named_root_slots: HashMap<String, u32>,
    /// First temp root slot index.
    pub temp_root_start: u32,
    /// Primitive local/param name to frame offset.
    pub prim_slot_offsets: HashMap<String, i64>,
    /// Declared type of every named local and parameter.
    pub local_types: HashMap<String, Ty>,
    /// Offset of argument-staging slot 0; slot `k` at `[rbp - (base - 8*k)]`.
    pub arg_stage_offset: i64,
    /// Total `sub rsp` amount, 16-byte aligned.
    pub frame_size: i64,
    /// Whether the function maintains a shadow-stack frame at all.
    pub has_root_frame: bool,
}

impl FunctionLayout {
    /// Frame offset of root slot `index`.
    pub fn root_slot_offset(&self, index: u32) -> i64 {
        self.roots_base_offset - 8 * index as i64
    }

    /// Frame offset of argument-staging slot `index`.
    pub fn arg_stage_slot_offset(&self, index: u32) -> i64 {
        self.arg_stage_offset - 8 * index as i64
    }
}

/// Walk a function and decide its frame shape.
pub fn layout_function(func: &ResolvedFunction, receiver: Option<&Ty>) -> Result<FunctionLayout, String> {
    let mut layout = FunctionLayout::default();

    let mut names: Vec<(String, Ty)> = Vec::new();
    if let Some(receiver_ty) = receiver {
        names.push(("self".to_string(), receiver_ty.clone()));
    }
    for ResolvedParam { name, ty } in &func.params {
        names.push((name.clone(), ty.clone()));
    }
    collect_local_decls(&func.body, &mut names)?;

    for (name, ty) in &names {
        if layout.local_types.insert(name.clone(), ty.clone()).is_some() {
            return Err(format!(
                "codegen: duplicate local '{}' in function '{}'",
                name, func.name
            ));
        }
    }

    layout.has_root_frame = names.iter().any(|(_, ty)| ty.is_reference())
        || func.body.iter().any(stmt_touches_references);

    // Named root slots in declaration order, temp block after.
    if layout.has_root_frame {
        let mut next_slot = 0u32;
        for (name, ty) in &names {
            if ty.is_reference() {
                layout.named_root_slots.insert(name.clone(), next_slot);
                next_slot += 1;
            }
        }
        layout.temp_root_start = next_slot;
        layout.root_slot_count = next_slot + TEMP_ROOT_SLOT_COUNT;
    }

    // Carve the frame top-down from rbp.
    let mut cursor: i64 = 0;
    let mut take = |bytes: i64| {
        cursor += bytes;
        cursor
    };

    layout.ts_offset = take(8);
    layout.ret_save_offset = take(8);
    if layout.has_root_frame {
        layout.frame_offset = take(24);
        layout.roots_base_offset = take(8 * layout.root_slot_count as i64);
    }
    for (name, ty) in &names {
        if !ty.is_reference() {
            let offset = take(8);
            layout.prim_slot_offsets.insert(name.clone(), offset);
        }
    }
    layout.arg_stage_offset = take(8 * ARG_STAGE_SLOTS as i64);

    layout.frame_size = (cursor + 15) & !15;
    Ok(layout)
}

fn collect_local_decls(body: &[Stmt], out: &mut Vec<(String, Ty)>) -> Result<(), String> {
    for stmt in body {
        match stmt {
            Stmt::VarDecl { name, ty, .. } => out.push((name.clone(), ty.clone())),
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_local_decls(then_body, out)?;
                collect_local_decls(else_body, out)?;
            }
            Stmt::While { body, .. } => collect_local_decls(body, out)?,
            Stmt::Block(inner) => collect_local_decls(inner, out)?,
            _ => {}
        }
    }
    Ok(())
}

fn stmt_touches_references(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::VarDecl { ty, init, .. } => {
            ty.is_reference() || init.as_ref().is_some_and(expr_touches_references)
        }
        Stmt::Assign { target, value } => {
            let target_refs = match target {
                super::ir::AssignTarget::Local(_) | super::ir::AssignTarget::Global(_) => false,
                super::ir::AssignTarget::Field { object, .. } => expr_touches_references(object),
                super::ir::AssignTarget::Index { object, index } => {
                    expr_touches_references(object) || expr_touches_references(index)
                }
            };
            target_refs || expr_touches_references(value)
        }
        Stmt::Expr(expr) => expr_touches_references(expr),
        Stmt::Return(value) => value.as_ref().is_some_and(expr_touches_references),
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            expr_touches_references(cond)
                || then_body.iter().any(stmt_touches_references)
                || else_body.iter().any(stmt_touches_references)
        }
        Stmt::While { cond, body } => {
            expr_touches_references(cond) || body.iter().any(stmt_touches_references)
        }
        Stmt::Block(inner) => inner.iter().any(stmt_touches_references),
    }
}

fn expr_touches_references(expr: &Expr) -> bool {
    if expr.ty.is_reference() {
        return true;
    }
    match &expr.kind {
        ExprKind::Unary { operand, .. } => expr_touches_references(operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            expr_touches_references(lhs) || expr_touches_references(rhs)
        }
        ExprKind::Call { args, .. } => args.iter().any(expr_touches_references),
        ExprKind::MethodCall { receiver, args, .. } => {
            expr_touches_references(receiver) || args.iter().any(expr_touches_references)
        }
        ExprKind::StaticCall { args, .. } => args.iter().any(expr_touches_references),
        ExprKind::New { args, .. } => args.iter().any(expr_touches_references),
        ExprKind::ArrayNew { len, .. } => expr_touches_references(len),
        ExprKind::FieldAccess { object, .. } => expr_touches_references(object),
        ExprKind::Index { object, index } => {
            expr_touches_references(object) || expr_touches_references(index)
        }
        ExprKind::Slice { object, start, end } => {
            expr_touches_references(object)
                || expr_touches_references(start)
                || expr_touches_references(end)
        }
        ExprKind::Cast { operand, .. } => expr_touches_references(operand),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::super::ir::*;
    use super::*;

    fn unit_fn(name: &str, params: Vec<ResolvedParam>, body: Vec<Stmt>) -> ResolvedFunction {
        ResolvedFunction {
            name: name.into(),
            params,
            return_ty: Ty::Unit,
            body,
            is_export: false,
            is_static: false,
        }
    }

    #[test]
    fn primitive_only_function_gets_no_root_frame() {
        let func = unit_fn(
            "f",
            vec![ResolvedParam {
                name: "x".into(),
                ty: Ty::I64,
            }],
            vec![Stmt::Return(None)],
        );
        let layout = layout_function(&func, None).unwrap();
        assert!(!layout.has_root_frame);
        assert_eq!(layout.root_slot_count, 0);
        assert!(layout.prim_slot_offsets.contains_key("x"));
        assert_eq!(layout.frame_size % 16, 0);
    }

    #[test]
    fn reference_locals_get_named_slots_plus_temp_block() {
        let func = unit_fn(
            "g",
            vec![ResolvedParam {
                name: "a".into(),
                ty: Ty::Obj,
            }],
            vec![Stmt::VarDecl {
                name: "b".into(),
                ty: Ty::Str,
                init: None,
            }],
        );
        let layout = layout_function(&func, None).unwrap();
        assert!(layout.has_root_frame);
        assert_eq!(layout.named_root_slots["a"], 0);
        assert_eq!(layout.named_root_slots["b"], 1);
        assert_eq!(layout.temp_root_start, 2);
        assert_eq!(layout.root_slot_count, 2 + TEMP_ROOT_SLOT_COUNT);
    }

    #[test]
    fn reference_temporaries_force_a_frame() {
        // No reference locals, but a Str expression flows through the body.
        let func = unit_fn(
            "h",
            vec![],
            vec![Stmt::Expr(Expr {
                kind: ExprKind::MethodCall {
                    receiver: Box::new(Expr {
                        kind: ExprKind::StrLit("hi".into()),
                        ty: Ty::Str,
                    }),
                    method: "len".into(),
                    args: vec![],
                },
                ty: Ty::I64,
            })],
        );
        let layout = layout_function(&func, None).unwrap();
        assert!(layout.has_root_frame);
        assert_eq!(layout.root_slot_count, TEMP_ROOT_SLOT_COUNT);
    }

    #[test]
    fn duplicate_locals_are_rejected() {
        let func = unit_fn(
            "dup",
            vec![],
            vec![
                Stmt::VarDecl {
                    name: "x".into(),
                    ty: Ty::I64,
                    init: None,
                },
                Stmt::VarDecl {
                    name: "x".into(),
                    ty: Ty::I64,
                    init: None,
                },
            ],
        );
        assert!(layout_function(&func, None).is_err());
    }

    #[test]
    fn slot_offsets_step_by_eight() {
        let func = unit_fn(
            "s",
            vec![
                ResolvedParam {
                    name: "a".into(),
                    ty: Ty::Obj,
                },
                ResolvedParam {
                    name: "b".into(),
                    ty: Ty::Obj,
                },
            ],
            vec![],
        );
        let layout = layout_function(&func, None).unwrap();
        let a = layout.root_slot_offset(layout.named_root_slots["a"]);
        let b = layout.root_slot_offset(layout.named_root_slots["b"]);
        assert_eq!(a - b, 8);
    }
}
