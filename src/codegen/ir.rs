//! Resolved, typed IR consumed by the emitter.
//!
//! This is the contract with the out-of-scope front end: the lexer, parser,
//! type checker, and module resolver produce a `ResolvedModule` (serialized
//! as JSON for the CLI, or constructed directly in-process). Every expression
//! arrives annotated with its checked type; the emitter never re-infers.

use serde::{Deserialize, Serialize};

/// Checked type of a value. Primitives live in registers and never occupy
/// root slots; every other variant is a reference type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ty {
    I64,
    U64,
    U8,
    Bool,
    Double,
    Unit,
    /// The top reference type; any object, including null.
    Obj,
    Str,
    StrBuf,
    Vec,
    BoxI64,
    BoxU64,
    BoxU8,
    BoxBool,
    BoxDouble,
    /// Fixed-length array of the element type.
    Array(Box<Ty>),
    /// User-defined class by name.
    Class(String),
}

impl Ty {
    /// Reference types occupy root slots; primitives never do.
    pub fn is_reference(&self) -> bool {
        !matches!(
            self,
            Ty::I64 | Ty::U64 | Ty::U8 | Ty::Bool | Ty::Double | Ty::Unit
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Ty::Double)
    }

    /// Unsigned integer kinds compare and divide unsigned.
    pub fn is_unsigned(&self) -> bool {
        matches!(self, Ty::U64 | Ty::U8)
    }
}

/// A whole module after resolution and type checking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedModule {
    pub name: String,
    #[serde(default)]
    pub globals: Vec<ResolvedGlobal>,
    #[serde(default)]
    pub classes: Vec<ResolvedClass>,
    pub functions: Vec<ResolvedFunction>,
}

/// Module-level variable. Reference-typed globals are registered with the
/// collector's global-root registry by the emitted module-init routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedGlobal {
    pub name: String,
    pub ty: Ty,
}

/// User-defined class: fields in declaration order plus methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedClass {
    pub name: String,
    pub fields: Vec<ResolvedField>,
    #[serde(default)]
    pub methods: Vec<ResolvedFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedField {
    pub name: String,
    pub ty: Ty,
}

/// Free function, or method when owned by a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedFunction {
    pub name: String,
    pub params: Vec<ResolvedParam>,
    pub return_ty: Ty,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub is_export: bool,
    /// Methods only: no receiver parameter when set.
    #[serde(default)]
    pub is_static: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedParam {
    pub name: String,
    pub ty: Ty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    VarDecl {
        name: String,
        ty: Ty,
        init: Option<Expr>,
    },
    Assign {
        target: AssignTarget,
        value: Expr,
    },
    Expr(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        #[serde(default)]
        else_body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssignTarget {
    Local(String),
    Global(String),
    Field {
        object: Expr,
        field: String,
    },
    /// `x[i] = v`; canonicalizes to `x.set(i, v)`.
    Index {
        object: Expr,
        index: Expr,
    },
}

/// Typed expression node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Ty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    StrLit(String),
    Null,
    Local(String),
    Global(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Free-function call by resolved name.
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    /// Instance or builtin method call; `x[i]` and `x[a:b]` arrive
    /// pre-canonicalized or as `Index`/`Slice` below.
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    /// Static method call on a class, no receiver.
    StaticCall {
        class: String,
        method: String,
        args: Vec<Expr>,
    },
    /// Constructor: builtins dispatch to runtime entry points, user classes
    /// to their synthesized constructor.
    New {
        class: String,
        args: Vec<Expr>,
    },
    /// `new elem[len]`.
    ArrayNew {
        elem: Ty,
        len: Box<Expr>,
    },
    FieldAccess {
        object: Box<Expr>,
        field: String,
    },
    /// `x[i]`; canonicalizes to `x.get(i)`.
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// `x[a:b]`; canonicalizes to `x.slice(a, b)`.
    Slice {
        object: Box<Expr>,
        start: Box<Expr>,
        end: Box<Expr>,
    },
    /// Downcast (or primitive conversion); reference casts lower to
    /// `rt_checked_cast`.
    Cast {
        operand: Box<Expr>,
        target: Ty,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_typing() {
        assert!(!Ty::I64.is_reference());
        assert!(!Ty::Unit.is_reference());
        assert!(Ty::Obj.is_reference());
        assert!(Ty::Str.is_reference());
        assert!(Ty::Array(Box::new(Ty::U8)).is_reference());
        assert!(Ty::Class("Point".into()).is_reference());
    }

    #[test]
    fn module_round_trips_through_json() {
        let module = ResolvedModule {
            name: "demo".into(),
            globals: vec![ResolvedGlobal {
                name: "cache".into(),
                ty: Ty::Obj,
            }],
            classes: vec![],
            functions: vec![ResolvedFunction {
                name: "main".into(),
                params: vec![],
                return_ty: Ty::I64,
                body: vec![Stmt::Return(Some(Expr {
                    kind: ExprKind::IntLit(0),
                    ty: Ty::I64,
                }))],
                is_export: true,
                is_static: false,
            }],
        };

        let json = serde_json::to_string(&module).unwrap();
        let back: ResolvedModule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "demo");
        assert_eq!(back.functions.len(), 1);
        assert!(back.functions[0].is_export);
    }
}
