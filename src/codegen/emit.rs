//! SysV x86-64 assembly emission for resolved modules.
//!
//! Every function body follows one discipline, frozen for v0.1:
//!
//! - Reference locals and parameters are homed in shadow-stack root slots;
//!   they have no register home, so they are always spilled at a safepoint.
//! - Reference temporaries that must survive a call (arguments in flight,
//!   the left side of a reference comparison, a field-store target) are
//!   parked in the frame's temp root slots for exactly that window.
//! - Primitive temporaries ride the machine stack; the emitter tracks the
//!   push depth and pads `rsp` so every `call` sees 16-byte alignment.
//!
//! The prologue builds and pushes the frame's root-slot region; a single
//! shared epilogue per function pops it on every exit path. Runtime calls,
//! user calls, and constructor calls all go through the same staging path,
//! so every call site is a valid safepoint by construction.

use std::collections::HashMap;

use super::asm::{AsmBuffer, escape_asm_bytes};
use super::ir::{
    AssignTarget, BinaryOp, Expr, ExprKind, ResolvedClass, ResolvedFunction, ResolvedModule, Stmt,
    Ty, UnaryOp,
};
use super::layout::{FunctionLayout, layout_function};
use super::runtime_abi::{
    array_constructor, builtin_constructor, builtin_function, builtin_method,
    builtin_static_method, builtin_type_desc_symbol,
};

const INT_ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const FLOAT_ARG_REG_COUNT: usize = 8;

/// Object-header size; field 0 of a class payload sits at this offset.
const HEADER_BYTES: u64 = 24;

/// Emit one module as an Intel-syntax `.s` translation unit.
pub fn emit_module(module: &ResolvedModule) -> Result<String, String> {
    Emitter::new(module)?.emit()
}

struct MethodInfo {
    label: String,
    is_static: bool,
}

struct ClassLayout {
    type_symbol: String,
    name_label: String,
    offsets_label: String,
    ctor_label: String,
    type_id: u32,
    payload_bytes: u64,
    fields: Vec<(String, Ty)>,
    field_offsets: HashMap<String, (u64, Ty)>,
    ref_field_offsets: Vec<u64>,
    methods: HashMap<String, MethodInfo>,
}

/// Where a staged call argument waits between evaluation and register load.
enum Staged {
    /// Reference parked in a temp root slot.
    TempRoot(u32),
    /// Primitive pushed on the machine stack.
    Stack,
}

struct StagedArg {
    loc: Staged,
    is_float: bool,
    reg_index: usize,
}

struct Emitter<'m> {
    module: &'m ResolvedModule,
    asm: AsmBuffer,
    classes: HashMap<String, ClassLayout>,
    class_order: Vec<String>,
    function_labels: HashMap<String, String>,
    globals: HashMap<String, (String, Ty)>,
    global_order: Vec<String>,
    string_pool: Vec<(String, Vec<u8>)>,
    string_index: HashMap<String, usize>,

    // Per-function state, reset by emit_function.
    layout: FunctionLayout,
    fn_stem: String,
    epilogue_label: String,
    null_deref_label: String,
    null_check_used: bool,
    return_ty: Ty,
    saves_ts: bool,
    temp_roots_in_use: u32,
    push_depth: u32,
}

impl<'m> Emitter<'m> {
    fn new(module: &'m ResolvedModule) -> Result<Self, String> {
        let mut classes = HashMap::new();
        let mut class_order = Vec::new();
        for (index, class) in module.classes.iter().enumerate() {
            if builtin_constructor(&class.name).is_some() {
                return Err(format!(
                    "codegen: class '{}' shadows a built-in type",
                    class.name
                ));
            }
            classes.insert(class.name.clone(), build_class_layout(class, index)?);
            class_order.push(class.name.clone());
        }

        let mut function_labels = HashMap::new();
        for func in &module.functions {
            let label = if func.name == "main" {
                "nif_main".to_string()
            } else {
                func.name.clone()
            };
            if function_labels.insert(func.name.clone(), label).is_some() {
                return Err(format!("codegen: duplicate function '{}'", func.name));
            }
        }

        let mut globals = HashMap::new();
        let mut global_order = Vec::new();
        for global in &module.globals {
            let symbol = format!("nif_g_{}", global.name);
            if globals
                .insert(global.name.clone(), (symbol, global.ty.clone()))
                .is_some()
            {
                return Err(format!("codegen: duplicate global '{}'", global.name));
            }
            global_order.push(global.name.clone());
        }

        let mut emitter = Self {
            module,
            asm: AsmBuffer::new(),
            classes,
            class_order,
            function_labels,
            globals,
            global_order,
            string_pool: Vec::new(),
            string_index: HashMap::new(),
            layout: FunctionLayout::default(),
            fn_stem: String::new(),
            epilogue_label: String::new(),
            null_deref_label: String::new(),
            null_check_used: false,
            return_ty: Ty::Unit,
            saves_ts: false,
            temp_roots_in_use: 0,
            push_depth: 0,
        };
        emitter.collect_strings();
        Ok(emitter)
    }

    fn emit(mut self) -> Result<String, String> {
        let module = self.module;
        for func in &module.functions {
            self.emit_function(func, None)?;
        }
        for class in &module.classes {
            for method in &class.methods {
                self.emit_function(method, Some(&class.name))?;
            }
            self.emit_constructor(class)?;
        }

        if self.function_labels.contains_key("main") {
            self.emit_main_wrapper()?;
        }
        if !self.global_order.is_empty() {
            self.emit_globals_routines();
        }

        self.emit_data_sections();
        Ok(self.asm.finish())
    }

    // ==================== string pool ====================

    fn collect_strings(&mut self) {
        let mut literals = Vec::new();
        for func in &self.module.functions {
            collect_strings_from_body(&func.body, &mut literals);
        }
        for class in &self.module.classes {
            for method in &class.methods {
                collect_strings_from_body(&method.body, &mut literals);
            }
        }

        for literal in literals {
            if self.string_index.contains_key(&literal) {
                continue;
            }
            let label = format!(".Lstr{}", self.string_pool.len());
            self.string_index
                .insert(literal.clone(), self.string_pool.len());
            self.string_pool.push((label, literal.into_bytes()));
        }
    }

    // ==================== formatting helpers ====================

    fn mem(&self, offset: i64) -> String {
        format!("qword ptr [rbp - {}]", offset)
    }

    fn root_slot_mem(&self, index: u32) -> String {
        self.mem(self.layout.root_slot_offset(index))
    }

    fn ins(&mut self, instruction: &str) {
        self.asm.ins(instruction);
    }

    fn insf(&mut self, instruction: String) {
        self.asm.ins(&instruction);
    }

    /// `call` with the 16-byte alignment restored when an odd number of
    /// 8-byte temporaries is pending on the machine stack.
    fn aligned_call(&mut self, symbol: &str) {
        let misaligned = self.push_depth % 2 == 1;
        if misaligned {
            self.ins("sub rsp, 8");
        }
        self.insf(format!("call {}", symbol));
        if misaligned {
            self.ins("add rsp, 8");
        }
    }

    fn alloc_temp_root(&mut self) -> Result<u32, String> {
        if self.temp_roots_in_use >= super::layout::TEMP_ROOT_SLOT_COUNT {
            return Err(format!(
                "codegen: function '{}' exhausts its temp root slots (expression too deeply nested)",
                self.fn_stem
            ));
        }
        let index = self.layout.temp_root_start + self.temp_roots_in_use;
        self.temp_roots_in_use += 1;
        Ok(index)
    }

    /// Release the most recent `count` temp slots, clearing them so the
    /// collector never sees a stale reference claimed as live.
    fn release_temp_roots(&mut self, count: u32) {
        for _ in 0..count {
            self.temp_roots_in_use -= 1;
            let index = self.layout.temp_root_start + self.temp_roots_in_use;
            let slot = self.root_slot_mem(index);
            self.insf(format!("mov {}, 0", slot));
        }
    }

    fn null_check_rax(&mut self) {
        self.null_check_used = true;
        self.ins("test rax, rax");
        self.insf(format!("je {}", self.null_deref_label));
    }

    fn null_check_r10(&mut self) {
        self.null_check_used = true;
        self.ins("test r10, r10");
        self.insf(format!("je {}", self.null_deref_label));
    }

    // ==================== functions ====================

    fn emit_function(&mut self, func: &ResolvedFunction, class: Option<&str>) -> Result<(), String> {
        let receiver_ty = match class {
            Some(name) if !func.is_static => Some(Ty::Class(name.to_string())),
            _ => None,
        };
        let label = match class {
            Some(name) => format!("{}_{}", name, func.name),
            None => self
                .function_labels
                .get(&func.name)
                .cloned()
                .unwrap_or_else(|| func.name.clone()),
        };

        self.begin_function(func, receiver_ty.as_ref(), &label, func.is_export && class.is_none())?;

        // Parameters: receiver (if any) then declared parameters, stashed by
        // the prologue; move them to their homes now.
        self.emit_param_moves(func, receiver_ty.as_ref())?;

        for stmt in &func.body {
            self.emit_stmt(stmt)?;
        }

        self.end_function();
        Ok(())
    }

    fn begin_function(
        &mut self,
        func: &ResolvedFunction,
        receiver: Option<&Ty>,
        label: &str,
        export: bool,
    ) -> Result<(), String> {
        self.layout = layout_function(func, receiver)?;
        self.fn_stem = label.replace('.', "_");
        self.epilogue_label = format!(".L{}_epilogue", self.fn_stem);
        self.null_deref_label = format!(".L{}_null_deref", self.fn_stem);
        self.null_check_used = false;
        self.return_ty = func.return_ty.clone();
        self.saves_ts = self.layout.has_root_frame;
        self.temp_roots_in_use = 0;
        self.push_depth = 0;

        self.asm.blank();
        if export {
            self.asm.global(label);
        }
        self.asm.label(label);
        self.ins("push rbp");
        self.ins("mov rbp, rsp");
        if self.layout.frame_size > 0 {
            self.insf(format!("sub rsp, {}", self.layout.frame_size));
        }

        // Stash incoming argument registers before any call clobbers them.
        let (int_params, float_params) = classify_params(func, receiver)?;
        for (stage_slot, reg) in &int_params {
            let offset = self.layout.arg_stage_slot_offset(*stage_slot);
            let mem = self.mem(offset);
            self.insf(format!("mov {}, {}", mem, reg));
        }
        for (stage_slot, xmm) in &float_params {
            let offset = self.layout.arg_stage_slot_offset(*stage_slot);
            let mem = self.mem(offset);
            self.insf(format!("movsd {}, xmm{}", mem, xmm));
        }

        if self.saves_ts {
            self.ins("call rt_thread_state");
            let ts = self.mem(self.layout.ts_offset);
            self.insf(format!("mov {}, rax", ts));
        }

        if self.layout.has_root_frame {
            let frame = self.layout.frame_offset;
            let roots = self.layout.roots_base_offset;
            self.insf(format!("lea rdi, [rbp - {}]", frame));
            self.insf(format!("lea rsi, [rbp - {}]", roots));
            self.insf(format!("mov edx, {}", self.layout.root_slot_count));
            self.ins("call rt_root_frame_init");
            let ts = self.mem(self.layout.ts_offset);
            self.insf(format!("mov rdi, {}", ts));
            self.insf(format!("lea rsi, [rbp - {}]", frame));
            self.ins("call rt_push_roots");
        }
        Ok(())
    }

    fn emit_param_moves(
        &mut self,
        func: &ResolvedFunction,
        receiver: Option<&Ty>,
    ) -> Result<(), String> {
        let mut names: Vec<(String, Ty)> = Vec::new();
        if let Some(receiver_ty) = receiver {
            names.push(("self".to_string(), receiver_ty.clone()));
        }
        for param in &func.params {
            names.push((param.name.clone(), param.ty.clone()));
        }

        for (stage_slot, (name, ty)) in names.iter().enumerate() {
            let stage = self.mem(self.layout.arg_stage_slot_offset(stage_slot as u32));
            if ty.is_reference() {
                let slot_index = *self
                    .layout
                    .named_root_slots
                    .get(name)
                    .ok_or_else(|| format!("codegen: missing root slot for '{}'", name))?;
                let slot = self.root_slot_mem(slot_index);
                self.insf(format!("mov rax, {}", stage));
                self.insf(format!("mov {}, rax", slot));
            } else if ty.is_float() {
                let home = self.prim_home(name)?;
                self.insf(format!("movsd xmm0, {}", stage));
                self.insf(format!("movsd {}, xmm0", home));
            } else if !matches!(ty, Ty::Unit) {
                let home = self.prim_home(name)?;
                self.insf(format!("mov rax, {}", stage));
                self.insf(format!("mov {}, rax", home));
            }
        }
        Ok(())
    }

    fn end_function(&mut self) {
        // Fallthrough return value: unit functions return nothing, and the
        // type checker guarantees non-unit bodies end in `return`.
        self.ins("xor eax, eax");
        self.asm.label(&self.epilogue_label.clone());

        if self.layout.has_root_frame {
            let ret_save = self.mem(self.layout.ret_save_offset);
            match self.return_ty {
                Ty::Unit => {}
                Ty::Double => self.insf(format!("movsd {}, xmm0", ret_save)),
                _ => self.insf(format!("mov {}, rax", ret_save)),
            }

            let ts = self.mem(self.layout.ts_offset);
            self.insf(format!("mov rdi, {}", ts));
            self.ins("call rt_pop_roots");

            match self.return_ty {
                Ty::Unit => {}
                Ty::Double => self.insf(format!("movsd xmm0, {}", ret_save)),
                _ => self.insf(format!("mov rax, {}", ret_save)),
            }
        }

        self.ins("mov rsp, rbp");
        self.ins("pop rbp");
        self.ins("ret");

        if self.null_check_used {
            self.asm.label(&self.null_deref_label.clone());
            // Reached from arbitrary spill depths; restore alignment first.
            self.ins("and rsp, -16");
            self.ins("call rt_panic_null_deref");
        }
    }

    // ==================== statements ====================

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), String> {
        match stmt {
            Stmt::VarDecl { name, ty, init } => {
                match init {
                    Some(expr) => {
                        self.emit_expr(expr)?;
                        self.store_local(name, ty)?;
                    }
                    None => {
                        // Re-zero on every execution; a declaration inside a
                        // loop must not observe the previous iteration.
                        if ty.is_reference() {
                            let slot_index = *self
                                .layout
                                .named_root_slots
                                .get(name)
                                .ok_or_else(|| format!("codegen: missing root slot for '{}'", name))?;
                            let slot = self.root_slot_mem(slot_index);
                            self.insf(format!("mov {}, 0", slot));
                        } else if !matches!(ty, Ty::Unit) {
                            let home = self.prim_home(name)?;
                            self.insf(format!("mov {}, 0", home));
                        }
                    }
                }
                Ok(())
            }
            Stmt::Assign { target, value } => self.emit_assign(target, value),
            Stmt::Expr(expr) => self.emit_expr(expr),
            Stmt::Return(value) => {
                if let Some(expr) = value {
                    self.emit_expr(expr)?;
                }
                self.insf(format!("jmp {}", self.epilogue_label));
                Ok(())
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let else_label = self.asm.fresh_label(&format!("{}_else", self.fn_stem));
                let end_label = self.asm.fresh_label(&format!("{}_endif", self.fn_stem));

                self.emit_expr(cond)?;
                self.ins("test rax, rax");
                self.insf(format!("je {}", else_label));
                for stmt in then_body {
                    self.emit_stmt(stmt)?;
                }
                self.insf(format!("jmp {}", end_label));
                self.asm.label(&else_label);
                for stmt in else_body {
                    self.emit_stmt(stmt)?;
                }
                self.asm.label(&end_label);
                Ok(())
            }
            Stmt::While { cond, body } => {
                let head_label = self.asm.fresh_label(&format!("{}_while", self.fn_stem));
                let end_label = self.asm.fresh_label(&format!("{}_endwhile", self.fn_stem));

                self.asm.label(&head_label);
                self.emit_expr(cond)?;
                self.ins("test rax, rax");
                self.insf(format!("je {}", end_label));
                for stmt in body {
                    self.emit_stmt(stmt)?;
                }
                self.insf(format!("jmp {}", head_label));
                self.asm.label(&end_label);
                Ok(())
            }
            Stmt::Block(body) => {
                for stmt in body {
                    self.emit_stmt(stmt)?;
                }
                Ok(())
            }
        }
    }

    fn emit_assign(&mut self, target: &AssignTarget, value: &Expr) -> Result<(), String> {
        match target {
            AssignTarget::Local(name) => {
                self.emit_expr(value)?;
                let ty = self
                    .layout
                    .local_types
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("codegen: unknown local '{}'", name))?;
                self.store_local(name, &ty)
            }
            AssignTarget::Global(name) => {
                self.emit_expr(value)?;
                let (symbol, ty) = self
                    .globals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("codegen: unknown global '{}'", name))?;
                if ty.is_float() {
                    self.insf(format!("movsd qword ptr [rip + {}], xmm0", symbol));
                } else {
                    self.insf(format!("mov qword ptr [rip + {}], rax", symbol));
                }
                Ok(())
            }
            AssignTarget::Field { object, field } => {
                let class_name = match &object.ty {
                    Ty::Class(name) => name.clone(),
                    other => {
                        return Err(format!(
                            "codegen: field store on non-class type {:?}",
                            other
                        ));
                    }
                };
                let (offset, field_ty) = self
                    .classes
                    .get(&class_name)
                    .and_then(|c| c.field_offsets.get(field))
                    .cloned()
                    .ok_or_else(|| {
                        format!("codegen: unknown field '{}.{}'", class_name, field)
                    })?;

                // The object must survive evaluation of the value, which may
                // allocate; park it in a temp root slot.
                self.emit_expr(object)?;
                let temp = self.alloc_temp_root()?;
                let temp_mem = self.root_slot_mem(temp);
                self.insf(format!("mov {}, rax", temp_mem));

                self.emit_expr(value)?;
                self.insf(format!("mov r10, {}", temp_mem));
                self.null_check_r10();
                if field_ty.is_float() {
                    self.insf(format!("movsd qword ptr [r10 + {}], xmm0", offset));
                } else {
                    self.insf(format!("mov qword ptr [r10 + {}], rax", offset));
                }
                self.release_temp_roots(1);
                Ok(())
            }
            AssignTarget::Index { object, index } => {
                // `x[i] = v` canonicalizes to `x.set(i, v)`.
                let args = [index.clone(), value.clone()];
                self.emit_method_call(object, "set", &args)
            }
        }
    }

    fn store_local(&mut self, name: &str, ty: &Ty) -> Result<(), String> {
        if ty.is_reference() {
            let slot_index = *self
                .layout
                .named_root_slots
                .get(name)
                .ok_or_else(|| format!("codegen: missing root slot for '{}'", name))?;
            let slot = self.root_slot_mem(slot_index);
            self.insf(format!("mov {}, rax", slot));
        } else if ty.is_float() {
            let home = self.prim_home(name)?;
            self.insf(format!("movsd {}, xmm0", home));
        } else if !matches!(ty, Ty::Unit) {
            let home = self.prim_home(name)?;
            self.insf(format!("mov {}, rax", home));
        }
        Ok(())
    }

    fn prim_home(&self, name: &str) -> Result<String, String> {
        let offset = *self
            .layout
            .prim_slot_offsets
            .get(name)
            .ok_or_else(|| format!("codegen: unknown local '{}'", name))?;
        Ok(self.mem(offset))
    }

    // ==================== expressions ====================

    /// Emit `expr`, leaving the value in `rax` (integers, references) or
    /// `xmm0` (doubles). Unit expressions leave nothing.
    fn emit_expr(&mut self, expr: &Expr) -> Result<(), String> {
        match &expr.kind {
            ExprKind::IntLit(value) => {
                if *value == 0 {
                    self.ins("xor eax, eax");
                } else {
                    self.insf(format!("mov rax, {}", value));
                }
                Ok(())
            }
            ExprKind::FloatLit(value) => {
                let bits = value.to_bits();
                if bits == 0 {
                    self.ins("xorpd xmm0, xmm0");
                } else {
                    self.insf(format!("mov rax, 0x{:016x}", bits));
                    self.ins("movq xmm0, rax");
                }
                Ok(())
            }
            ExprKind::BoolLit(value) => {
                if *value {
                    self.ins("mov eax, 1");
                } else {
                    self.ins("xor eax, eax");
                }
                Ok(())
            }
            ExprKind::Null => {
                self.ins("xor eax, eax");
                Ok(())
            }
            ExprKind::StrLit(text) => {
                let index = *self
                    .string_index
                    .get(text)
                    .ok_or_else(|| "codegen: string literal missing from pool".to_string())?;
                let (label, bytes) = &self.string_pool[index];
                let label = label.clone();
                let len = bytes.len();
                let ts = self.mem(self.layout.ts_offset);
                self.insf(format!("mov rdi, {}", ts));
                self.insf(format!("lea rsi, [rip + {}]", label));
                self.insf(format!("mov rdx, {}", len));
                self.aligned_call("rt_str_from_bytes");
                Ok(())
            }
            ExprKind::Local(name) => {
                let ty = self
                    .layout
                    .local_types
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("codegen: unknown local '{}'", name))?;
                if ty.is_reference() {
                    let slot_index = *self
                        .layout
                        .named_root_slots
                        .get(name)
                        .ok_or_else(|| format!("codegen: missing root slot for '{}'", name))?;
                    let slot = self.root_slot_mem(slot_index);
                    self.insf(format!("mov rax, {}", slot));
                } else if ty.is_float() {
                    let home = self.prim_home(name)?;
                    self.insf(format!("movsd xmm0, {}", home));
                } else {
                    let home = self.prim_home(name)?;
                    self.insf(format!("mov rax, {}", home));
                }
                Ok(())
            }
            ExprKind::Global(name) => {
                let (symbol, ty) = self
                    .globals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("codegen: unknown global '{}'", name))?;
                if ty.is_float() {
                    self.insf(format!("movsd xmm0, qword ptr [rip + {}]", symbol));
                } else {
                    self.insf(format!("mov rax, qword ptr [rip + {}]", symbol));
                }
                Ok(())
            }
            ExprKind::Unary { op, operand } => self.emit_unary(*op, operand),
            ExprKind::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs, &expr.ty),
            ExprKind::Call { callee, args } => self.emit_free_call(callee, args),
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => self.emit_method_call(receiver, method, args),
            ExprKind::StaticCall {
                class,
                method,
                args,
            } => {
                if let Some(call) = builtin_static_method(class, method) {
                    return self.emit_call(call.symbol, None, args, call.needs_thread_state);
                }
                let label = self
                    .classes
                    .get(class)
                    .and_then(|c| c.methods.get(method))
                    .filter(|m| m.is_static)
                    .map(|m| m.label.clone())
                    .ok_or_else(|| {
                        format!("codegen: unknown static method '{}.{}'", class, method)
                    })?;
                self.emit_call(&label, None, args, false)
            }
            ExprKind::New { class, args } => {
                if let Some(call) = builtin_constructor(class) {
                    return self.emit_call(call.symbol, None, args, call.needs_thread_state);
                }
                let label = self
                    .classes
                    .get(class)
                    .map(|c| c.ctor_label.clone())
                    .ok_or_else(|| format!("codegen: unknown class '{}'", class))?;
                self.emit_call(&label, None, args, false)
            }
            ExprKind::ArrayNew { elem, len } => {
                let call = array_constructor(elem)
                    .ok_or_else(|| format!("codegen: array of {:?} is not constructible", elem))?;
                let args = [(*len.clone())];
                self.emit_call(call.symbol, None, &args, call.needs_thread_state)
            }
            ExprKind::FieldAccess { object, field } => {
                let class_name = match &object.ty {
                    Ty::Class(name) => name.clone(),
                    other => {
                        return Err(format!(
                            "codegen: field access on non-class type {:?}",
                            other
                        ));
                    }
                };
                let (offset, field_ty) = self
                    .classes
                    .get(&class_name)
                    .and_then(|c| c.field_offsets.get(field))
                    .cloned()
                    .ok_or_else(|| {
                        format!("codegen: unknown field '{}.{}'", class_name, field)
                    })?;

                self.emit_expr(object)?;
                self.null_check_rax();
                if field_ty.is_float() {
                    self.insf(format!("movsd xmm0, qword ptr [rax + {}]", offset));
                } else {
                    self.insf(format!("mov rax, qword ptr [rax + {}]", offset));
                }
                Ok(())
            }
            ExprKind::Index { object, index } => {
                // `x[i]` canonicalizes to `x.get(i)`.
                let args = [(**index).clone()];
                self.emit_method_call(object, "get", &args)
            }
            ExprKind::Slice { object, start, end } => {
                // `x[a:b]` canonicalizes to `x.slice(a, b)`.
                let args = [(**start).clone(), (**end).clone()];
                self.emit_method_call(object, "slice", &args)
            }
            ExprKind::Cast { operand, target } => self.emit_cast(operand, target),
        }
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<(), String> {
        self.emit_expr(operand)?;
        match (op, operand.ty.is_float()) {
            (UnaryOp::Neg, false) => self.ins("neg rax"),
            (UnaryOp::Neg, true) => {
                // Flip the sign bit.
                self.ins("mov rax, 0x8000000000000000");
                self.ins("movq xmm1, rax");
                self.ins("xorpd xmm0, xmm1");
            }
            (UnaryOp::Not, _) => {
                self.ins("test rax, rax");
                self.ins("sete al");
                self.ins("movzx eax, al");
            }
        }
        Ok(())
    }

    fn emit_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        result_ty: &Ty,
    ) -> Result<(), String> {
        if op.is_logical() {
            return self.emit_logical(op, lhs, rhs);
        }

        if lhs.ty.is_reference() {
            return self.emit_ref_compare(op, lhs, rhs);
        }

        if lhs.ty.is_float() {
            return self.emit_float_binary(op, lhs, rhs);
        }

        // Integer path: lhs rides the machine stack across rhs evaluation.
        self.emit_expr(lhs)?;
        self.ins("push rax");
        self.push_depth += 1;
        self.emit_expr(rhs)?;
        self.ins("mov rcx, rax");
        self.ins("pop rax");
        self.push_depth -= 1;

        let unsigned = lhs.ty.is_unsigned();
        match op {
            BinaryOp::Add => self.ins("add rax, rcx"),
            BinaryOp::Sub => self.ins("sub rax, rcx"),
            BinaryOp::Mul => self.ins("imul rax, rcx"),
            BinaryOp::Div => {
                if unsigned {
                    self.ins("xor edx, edx");
                    self.ins("div rcx");
                } else {
                    self.ins("cqo");
                    self.ins("idiv rcx");
                }
            }
            BinaryOp::Rem => {
                if unsigned {
                    self.ins("xor edx, edx");
                    self.ins("div rcx");
                } else {
                    self.ins("cqo");
                    self.ins("idiv rcx");
                }
                self.ins("mov rax, rdx");
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt
            | BinaryOp::Ge => {
                self.ins("cmp rax, rcx");
                let set = match (op, unsigned) {
                    (BinaryOp::Eq, _) => "sete",
                    (BinaryOp::Ne, _) => "setne",
                    (BinaryOp::Lt, false) => "setl",
                    (BinaryOp::Le, false) => "setle",
                    (BinaryOp::Gt, false) => "setg",
                    (BinaryOp::Ge, false) => "setge",
                    (BinaryOp::Lt, true) => "setb",
                    (BinaryOp::Le, true) => "setbe",
                    (BinaryOp::Gt, true) => "seta",
                    (BinaryOp::Ge, true) => "setae",
                    _ => unreachable!(),
                };
                self.insf(format!("{} al", set));
                self.ins("movzx eax, al");
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }

        // Narrow u8 arithmetic back into range.
        if matches!(result_ty, Ty::U8) && !op.is_comparison() {
            self.ins("movzx eax, al");
        }
        Ok(())
    }

    fn emit_logical(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<(), String> {
        let short_label = self.asm.fresh_label(&format!("{}_sc", self.fn_stem));
        let end_label = self.asm.fresh_label(&format!("{}_scend", self.fn_stem));

        self.emit_expr(lhs)?;
        self.ins("test rax, rax");
        match op {
            BinaryOp::And => self.insf(format!("je {}", short_label)),
            BinaryOp::Or => self.insf(format!("jne {}", short_label)),
            _ => unreachable!(),
        }
        self.emit_expr(rhs)?;
        self.ins("test rax, rax");
        self.ins("setne al");
        self.ins("movzx eax, al");
        self.insf(format!("jmp {}", end_label));
        self.asm.label(&short_label);
        match op {
            BinaryOp::And => self.ins("xor eax, eax"),
            BinaryOp::Or => self.ins("mov eax, 1"),
            _ => unreachable!(),
        }
        self.asm.label(&end_label);
        Ok(())
    }

    fn emit_ref_compare(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<(), String> {
        if !matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            return Err("codegen: references only support == and !=".to_string());
        }

        // The left reference must survive the right side, which may allocate.
        self.emit_expr(lhs)?;
        let temp = self.alloc_temp_root()?;
        let temp_mem = self.root_slot_mem(temp);
        self.insf(format!("mov {}, rax", temp_mem));

        self.emit_expr(rhs)?;
        self.insf(format!("mov r10, {}", temp_mem));
        self.ins("cmp r10, rax");
        match op {
            BinaryOp::Eq => self.ins("sete al"),
            BinaryOp::Ne => self.ins("setne al"),
            _ => unreachable!(),
        }
        self.ins("movzx eax, al");
        self.release_temp_roots(1);
        Ok(())
    }

    fn emit_float_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<(), String> {
        self.emit_expr(lhs)?;
        self.ins("movq rax, xmm0");
        self.ins("push rax");
        self.push_depth += 1;
        self.emit_expr(rhs)?;
        self.ins("pop rax");
        self.push_depth -= 1;
        self.ins("movq xmm1, rax");
        // xmm1 = lhs, xmm0 = rhs.

        match op {
            BinaryOp::Add => {
                self.ins("addsd xmm1, xmm0");
                self.ins("movapd xmm0, xmm1");
            }
            BinaryOp::Sub => {
                self.ins("subsd xmm1, xmm0");
                self.ins("movapd xmm0, xmm1");
            }
            BinaryOp::Mul => {
                self.ins("mulsd xmm1, xmm0");
                self.ins("movapd xmm0, xmm1");
            }
            BinaryOp::Div => {
                self.ins("divsd xmm1, xmm0");
                self.ins("movapd xmm0, xmm1");
            }
            BinaryOp::Rem => {
                return Err("codegen: % is not defined for double".to_string());
            }
            BinaryOp::Eq => {
                self.ins("ucomisd xmm1, xmm0");
                self.ins("sete al");
                self.ins("setnp cl");
                self.ins("and al, cl");
                self.ins("movzx eax, al");
            }
            BinaryOp::Ne => {
                self.ins("ucomisd xmm1, xmm0");
                self.ins("setne al");
                self.ins("setp cl");
                self.ins("or al, cl");
                self.ins("movzx eax, al");
            }
            BinaryOp::Gt => {
                self.ins("ucomisd xmm1, xmm0");
                self.ins("seta al");
                self.ins("movzx eax, al");
            }
            BinaryOp::Ge => {
                self.ins("ucomisd xmm1, xmm0");
                self.ins("setae al");
                self.ins("movzx eax, al");
            }
            BinaryOp::Lt => {
                self.ins("ucomisd xmm0, xmm1");
                self.ins("seta al");
                self.ins("movzx eax, al");
            }
            BinaryOp::Le => {
                self.ins("ucomisd xmm0, xmm1");
                self.ins("setae al");
                self.ins("movzx eax, al");
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
        Ok(())
    }

    fn emit_cast(&mut self, operand: &Expr, target: &Ty) -> Result<(), String> {
        self.emit_expr(operand)?;
        let source = &operand.ty;

        if source.is_reference() && target.is_reference() {
            if matches!(target, Ty::Obj) || source == target {
                return Ok(());
            }
            let symbol = match target {
                Ty::Class(name) => self
                    .classes
                    .get(name)
                    .map(|c| c.type_symbol.clone())
                    .ok_or_else(|| format!("codegen: unknown class '{}'", name))?,
                other => builtin_type_desc_symbol(other)
                    .ok_or_else(|| format!("codegen: no descriptor for cast target {:?}", other))?,
            };
            // rt_checked_cast(obj, expected); the argument does not cross any
            // other call between evaluation and this one.
            self.ins("mov rdi, rax");
            self.insf(format!("lea rsi, [rip + {}]", symbol));
            self.aligned_call("rt_checked_cast");
            return Ok(());
        }

        if source.is_reference() != target.is_reference() {
            return Err(format!(
                "codegen: cannot cast between {:?} and {:?}",
                source, target
            ));
        }

        match (source, target) {
            (Ty::Double, Ty::Double) => {}
            (Ty::Double, Ty::U8) => {
                self.ins("cvttsd2si rax, xmm0");
                self.ins("movzx eax, al");
            }
            (Ty::Double, _) => self.ins("cvttsd2si rax, xmm0"),
            (_, Ty::Double) => self.ins("cvtsi2sd xmm0, rax"),
            (_, Ty::U8) => self.ins("movzx eax, al"),
            (_, Ty::Bool) => {
                self.ins("test rax, rax");
                self.ins("setne al");
                self.ins("movzx eax, al");
            }
            _ => {}
        }
        Ok(())
    }

    // ==================== calls ====================

    fn emit_free_call(&mut self, callee: &str, args: &[Expr]) -> Result<(), String> {
        let arg_tys: Vec<&Ty> = args.iter().map(|a| &a.ty).collect();
        if let Some(call) = builtin_function(callee, &arg_tys) {
            return self.emit_call(call.symbol, None, args, call.needs_thread_state);
        }

        let label = self
            .function_labels
            .get(callee)
            .cloned()
            .ok_or_else(|| format!("codegen: unknown function '{}'", callee))?;
        self.emit_call(&label, None, args, false)
    }

    fn emit_method_call(
        &mut self,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<(), String> {
        if let Some(call) = builtin_method(&receiver.ty, method) {
            return self.emit_call(call.symbol, Some(receiver), args, call.needs_thread_state);
        }

        let class_name = match &receiver.ty {
            Ty::Class(name) => name.clone(),
            other => {
                return Err(format!(
                    "codegen: no method '{}' on type {:?}",
                    method, other
                ));
            }
        };
        let label = self
            .classes
            .get(&class_name)
            .and_then(|c| c.methods.get(method))
            .filter(|m| !m.is_static)
            .map(|m| m.label.clone())
            .ok_or_else(|| format!("codegen: unknown method '{}.{}'", class_name, method))?;
        self.emit_call(&label, Some(receiver), args, false)
    }

    /// The one call path: stage arguments (references into temp root slots,
    /// primitives onto the machine stack), load registers in reverse, align,
    /// call, release and clear the temp slots.
    fn emit_call(
        &mut self,
        symbol: &str,
        receiver: Option<&Expr>,
        args: &[Expr],
        needs_thread_state: bool,
    ) -> Result<(), String> {
        let mut int_index = needs_thread_state as usize;
        let mut float_index = 0usize;
        let mut staged: Vec<StagedArg> = Vec::new();
        let mut temps_used = 0u32;

        let all_args: Vec<&Expr> = receiver.into_iter().chain(args.iter()).collect();
        for expr in &all_args {
            if expr.ty.is_float() {
                float_index += 1;
            } else {
                int_index += 1;
            }
        }
        if int_index > INT_ARG_REGS.len() {
            return Err(format!(
                "codegen: call to '{}' needs {} integer registers (max {})",
                symbol,
                int_index,
                INT_ARG_REGS.len()
            ));
        }
        if float_index > FLOAT_ARG_REG_COUNT {
            return Err(format!(
                "codegen: call to '{}' needs {} float registers (max {})",
                symbol, float_index, FLOAT_ARG_REG_COUNT
            ));
        }

        // Evaluation pass, left to right.
        let mut int_index = needs_thread_state as usize;
        let mut float_index = 0usize;
        for (position, &expr) in all_args.iter().enumerate() {
            self.emit_expr(expr)?;
            let is_receiver = receiver.is_some() && position == 0;
            if expr.ty.is_reference() {
                if is_receiver {
                    self.null_check_rax();
                }
                let temp = self.alloc_temp_root()?;
                temps_used += 1;
                let temp_mem = self.root_slot_mem(temp);
                self.insf(format!("mov {}, rax", temp_mem));
                staged.push(StagedArg {
                    loc: Staged::TempRoot(temp),
                    is_float: false,
                    reg_index: int_index,
                });
                int_index += 1;
            } else if expr.ty.is_float() {
                self.ins("movq rax, xmm0");
                self.ins("push rax");
                self.push_depth += 1;
                staged.push(StagedArg {
                    loc: Staged::Stack,
                    is_float: true,
                    reg_index: float_index,
                });
                float_index += 1;
            } else {
                self.ins("push rax");
                self.push_depth += 1;
                staged.push(StagedArg {
                    loc: Staged::Stack,
                    is_float: false,
                    reg_index: int_index,
                });
                int_index += 1;
            }
        }

        // Load pass, right to left so the stack pops line up.
        for arg in staged.iter().rev() {
            match (&arg.loc, arg.is_float) {
                (Staged::Stack, false) => {
                    self.asm.ins(&format!("pop {}", INT_ARG_REGS[arg.reg_index]));
                    self.push_depth -= 1;
                }
                (Staged::Stack, true) => {
                    self.ins("pop r10");
                    self.push_depth -= 1;
                    self.asm.ins(&format!("movq xmm{}, r10", arg.reg_index));
                }
                (Staged::TempRoot(slot), _) => {
                    let slot_mem = self.root_slot_mem(*slot);
                    self.asm
                        .ins(&format!("mov {}, {}", INT_ARG_REGS[arg.reg_index], slot_mem));
                }
            }
        }

        if needs_thread_state {
            let ts = self.mem(self.layout.ts_offset);
            self.insf(format!("mov rdi, {}", ts));
        }

        self.aligned_call(symbol);
        self.release_temp_roots(temps_used);
        Ok(())
    }

    // ==================== synthesized functions ====================

    fn emit_constructor(&mut self, class: &ResolvedClass) -> Result<(), String> {
        let layout_fn = ResolvedFunction {
            name: format!("{}_new", class.name),
            params: class
                .fields
                .iter()
                .map(|f| super::ir::ResolvedParam {
                    name: f.name.clone(),
                    ty: f.ty.clone(),
                })
                .collect(),
            return_ty: Ty::Class(class.name.clone()),
            body: Vec::new(),
            is_export: false,
            is_static: true,
        };

        let (type_symbol, ctor_label, payload_bytes, fields) = {
            let info = self
                .classes
                .get(&class.name)
                .ok_or_else(|| format!("codegen: unknown class '{}'", class.name))?;
            (
                info.type_symbol.clone(),
                info.ctor_label.clone(),
                info.payload_bytes,
                info.fields.clone(),
            )
        };

        self.begin_function(&layout_fn, None, &ctor_label, false)?;
        // The constructor allocates even when it roots nothing.
        if !self.saves_ts {
            self.saves_ts = true;
            self.ins("call rt_thread_state");
            let ts = self.mem(self.layout.ts_offset);
            self.insf(format!("mov {}, rax", ts));
        }
        self.emit_param_moves(&layout_fn, None)?;

        let ts = self.mem(self.layout.ts_offset);
        self.insf(format!("mov rdi, {}", ts));
        self.insf(format!("lea rsi, [rip + {}]", type_symbol));
        self.insf(format!("mov rdx, {}", payload_bytes));
        self.aligned_call("rt_alloc_obj");

        // Field stores cross no safepoint; the fresh object can stay in rax.
        for (index, (name, ty)) in fields.iter().enumerate() {
            let offset = HEADER_BYTES + 8 * index as u64;
            if ty.is_reference() {
                let slot_index = *self
                    .layout
                    .named_root_slots
                    .get(name)
                    .ok_or_else(|| format!("codegen: missing root slot for '{}'", name))?;
                let slot = self.root_slot_mem(slot_index);
                self.insf(format!("mov r10, {}", slot));
                self.insf(format!("mov qword ptr [rax + {}], r10", offset));
            } else if ty.is_float() {
                let home = self.prim_home(name)?;
                self.insf(format!("movsd xmm1, {}", home));
                self.insf(format!("movsd qword ptr [rax + {}], xmm1", offset));
            } else {
                let home = self.prim_home(name)?;
                self.insf(format!("mov r10, {}", home));
                self.insf(format!("mov qword ptr [rax + {}], r10", offset));
            }
        }

        self.insf(format!("jmp {}", self.epilogue_label));
        self.end_function();
        Ok(())
    }

    fn emit_main_wrapper(&mut self) -> Result<(), String> {
        let module = self.module;
        let main_fn = module
            .functions
            .iter()
            .find(|f| f.name == "main")
            .ok_or_else(|| "codegen: missing main".to_string())?;
        let returns_value = !matches!(main_fn.return_ty, Ty::Unit);

        self.asm.blank();
        self.asm.global("main");
        self.asm.label("main");
        self.ins("push rbp");
        self.ins("mov rbp, rsp");
        self.ins("sub rsp, 16");
        self.ins("call rt_init");
        if !self.global_order.is_empty() {
            self.ins("call .Lniflheim_globals_init");
        }
        self.ins("call nif_main");
        if returns_value {
            self.ins("mov qword ptr [rbp - 8], rax");
        } else {
            self.ins("mov qword ptr [rbp - 8], 0");
        }
        if !self.global_order.is_empty() {
            self.ins("call .Lniflheim_globals_teardown");
        }
        self.ins("call rt_shutdown");
        self.ins("mov rax, qword ptr [rbp - 8]");
        self.ins("mov rsp, rbp");
        self.ins("pop rbp");
        self.ins("ret");
        Ok(())
    }

    fn emit_globals_routines(&mut self) {
        let ref_globals: Vec<String> = self
            .global_order
            .iter()
            .filter_map(|name| {
                let (symbol, ty) = &self.globals[name];
                ty.is_reference().then(|| symbol.clone())
            })
            .collect();

        self.asm.blank();
        self.asm.label(".Lniflheim_globals_init");
        self.ins("push rbp");
        self.ins("mov rbp, rsp");
        for symbol in &ref_globals {
            self.insf(format!("lea rdi, [rip + {}]", symbol));
            self.ins("call rt_gc_register_global_root");
        }
        self.ins("pop rbp");
        self.ins("ret");

        self.asm.blank();
        self.asm.label(".Lniflheim_globals_teardown");
        self.ins("push rbp");
        self.ins("mov rbp, rsp");
        for symbol in &ref_globals {
            self.insf(format!("lea rdi, [rip + {}]", symbol));
            self.ins("call rt_gc_unregister_global_root");
        }
        self.ins("pop rbp");
        self.ins("ret");
    }

    // ==================== data sections ====================

    fn emit_data_sections(&mut self) {
        if !self.string_pool.is_empty() || !self.class_order.is_empty() {
            self.asm.blank();
            self.asm.raw(".section .rodata");
            for (label, bytes) in &self.string_pool.clone() {
                self.asm.label(label);
                if !bytes.is_empty() {
                    self.insf(format!(".ascii \"{}\"", escape_asm_bytes(bytes)));
                }
            }
            for class_name in &self.class_order.clone() {
                let info = &self.classes[class_name];
                let name_label = info.name_label.clone();
                let escaped = escape_asm_bytes(class_name.as_bytes());
                self.asm.label(&name_label);
                self.insf(format!(".asciz \"{}\"", escaped));
            }
        }

        if !self.class_order.is_empty() {
            self.asm.blank();
            self.asm.raw(".section .data");
            self.asm.raw(".align 8");
            for class_name in &self.class_order.clone() {
                let info = &self.classes[class_name];
                let type_symbol = info.type_symbol.clone();
                let name_label = info.name_label.clone();
                let offsets_label = info.offsets_label.clone();
                let type_id = info.type_id;
                let fixed_size = HEADER_BYTES + info.payload_bytes;
                let ref_offsets = info.ref_field_offsets.clone();
                // HAS_REFS when any field is a reference, LEAF otherwise.
                let flags: u32 = if ref_offsets.is_empty() { 0x4 } else { 0x1 };

                self.asm.label(&type_symbol);
                self.insf(format!(".long 0x{:08x}", type_id));
                self.insf(format!(".long {}", flags));
                self.ins(".long 1");
                self.ins(".long 8");
                self.insf(format!(".quad {}", fixed_size));
                self.insf(format!(".quad {}", name_label));
                self.ins(".quad 0");
                if ref_offsets.is_empty() {
                    self.ins(".quad 0");
                } else {
                    self.insf(format!(".quad {}", offsets_label));
                }
                self.insf(format!(".long {}", ref_offsets.len()));
                self.ins(".long 0");
                if !ref_offsets.is_empty() {
                    self.asm.label(&offsets_label);
                    let list = ref_offsets
                        .iter()
                        .map(|o| o.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.insf(format!(".long {}", list));
                    self.asm.raw(".align 8");
                }
            }
        }

        if !self.global_order.is_empty() {
            self.asm.blank();
            self.asm.raw(".section .bss");
            self.asm.raw(".align 8");
            for name in &self.global_order.clone() {
                let (symbol, _) = &self.globals[name];
                let symbol = symbol.clone();
                self.asm.label(&symbol);
                self.ins(".zero 8");
            }
        }
    }
}

fn build_class_layout(class: &ResolvedClass, index: usize) -> Result<ClassLayout, String> {
    let mut field_offsets = HashMap::new();
    let mut ref_field_offsets = Vec::new();
    let mut fields = Vec::new();
    for (i, field) in class.fields.iter().enumerate() {
        let offset = HEADER_BYTES + 8 * i as u64;
        if field_offsets
            .insert(field.name.clone(), (offset, field.ty.clone()))
            .is_some()
        {
            return Err(format!(
                "codegen: duplicate field '{}.{}'",
                class.name, field.name
            ));
        }
        if field.ty.is_reference() {
            ref_field_offsets.push(offset);
        }
        fields.push((field.name.clone(), field.ty.clone()));
    }

    let mut methods = HashMap::new();
    for method in &class.methods {
        let label = format!("{}_{}", class.name, method.name);
        if methods
            .insert(
                method.name.clone(),
                MethodInfo {
                    label,
                    is_static: method.is_static,
                },
            )
            .is_some()
        {
            return Err(format!(
                "codegen: duplicate method '{}.{}'",
                class.name, method.name
            ));
        }
    }

    Ok(ClassLayout {
        type_symbol: format!("nif_type_{}", class.name),
        name_label: format!(".Lnif_type_{}_name", class.name),
        offsets_label: format!(".Lnif_type_{}_offsets", class.name),
        ctor_label: format!("{}_new", class.name),
        type_id: 0x4E46_0000 | (index as u32 + 1),
        payload_bytes: 8 * class.fields.len() as u64,
        fields,
        field_offsets,
        ref_field_offsets,
        methods,
    })
}

fn collect_strings_from_body(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        collect_strings_from_stmt(stmt, out);
    }
}

fn collect_strings_from_stmt(stmt: &Stmt, out: &mut Vec<String>) {
    match stmt {
        Stmt::VarDecl { init, .. } => {
            if let Some(expr) = init {
                collect_strings_from_expr(expr, out);
            }
        }
        Stmt::Assign { target, value } => {
            match target {
                AssignTarget::Field { object, .. } => collect_strings_from_expr(object, out),
                AssignTarget::Index { object, index } => {
                    collect_strings_from_expr(object, out);
                    collect_strings_from_expr(index, out);
                }
                _ => {}
            }
            collect_strings_from_expr(value, out);
        }
        Stmt::Expr(expr) => collect_strings_from_expr(expr, out),
        Stmt::Return(Some(expr)) => collect_strings_from_expr(expr, out),
        Stmt::Return(None) => {}
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            collect_strings_from_expr(cond, out);
            collect_strings_from_body(then_body, out);
            collect_strings_from_body(else_body, out);
        }
        Stmt::While { cond, body } => {
            collect_strings_from_expr(cond, out);
            collect_strings_from_body(body, out);
        }
        Stmt::Block(body) => collect_strings_from_body(body, out),
    }
}

fn collect_strings_from_expr(expr: &Expr, out: &mut Vec<String>) {
    match &expr.kind {
        ExprKind::StrLit(text) => out.push(text.clone()),
        ExprKind::Unary { operand, .. } => collect_strings_from_expr(operand, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_strings_from_expr(lhs, out);
            collect_strings_from_expr(rhs, out);
        }
        ExprKind::Call { args, .. }
        | ExprKind::StaticCall { args, .. }
        | ExprKind::New { args, .. } => {
            for arg in args {
                collect_strings_from_expr(arg, out);
            }
        }
        ExprKind::MethodCall { receiver, args, .. } => {
            collect_strings_from_expr(receiver, out);
            for arg in args {
                collect_strings_from_expr(arg, out);
            }
        }
        ExprKind::ArrayNew { len, .. } => collect_strings_from_expr(len, out),
        ExprKind::FieldAccess { object, .. } => collect_strings_from_expr(object, out),
        ExprKind::Index { object, index } => {
            collect_strings_from_expr(object, out);
            collect_strings_from_expr(index, out);
        }
        ExprKind::Slice { object, start, end } => {
            collect_strings_from_expr(object, out);
            collect_strings_from_expr(start, out);
            collect_strings_from_expr(end, out);
        }
        ExprKind::Cast { operand, .. } => collect_strings_from_expr(operand, out),
        _ => {}
    }
}

/// Classify parameters into staged integer and float registers, in the same
/// order a caller assigns them. Returns `(stage_slot, reg)` pairs.
fn classify_params(
    func: &ResolvedFunction,
    receiver: Option<&Ty>,
) -> Result<(Vec<(u32, &'static str)>, Vec<(u32, usize)>), String> {
    let mut int_params = Vec::new();
    let mut float_params = Vec::new();
    let mut int_index = 0usize;
    let mut float_index = 0usize;
    let mut stage_slot = 0u32;

    let mut push = |ty: &Ty, stage_slot: u32| -> Result<(), String> {
        if ty.is_float() {
            if float_index >= FLOAT_ARG_REG_COUNT {
                return Err(format!(
                    "codegen: function '{}' has too many float parameters",
                    func.name
                ));
            }
            float_params.push((stage_slot, float_index));
            float_index += 1;
        } else if !matches!(ty, Ty::Unit) {
            if int_index >= INT_ARG_REGS.len() {
                return Err(format!(
                    "codegen: function '{}' has too many parameters",
                    func.name
                ));
            }
            int_params.push((stage_slot, INT_ARG_REGS[int_index]));
            int_index += 1;
        }
        Ok(())
    };

    if let Some(receiver_ty) = receiver {
        push(receiver_ty, stage_slot)?;
        stage_slot += 1;
    }
    for param in &func.params {
        push(&param.ty, stage_slot)?;
        stage_slot += 1;
    }

    Ok((int_params, float_params))
}
