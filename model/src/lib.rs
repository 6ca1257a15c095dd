//! In-memory representation of a typed translation unit.
//!
//! The front end builds a [`Program`] and hands it to the optimizer,
//! which mutates it in place; the back end consumes the same shape.
//! Functions live in a flat vector and are addressed by [`FuncId`]
//! indices; calls in the AST refer to callees by *name*, so removing a
//! function only requires rebuilding the derived call graph, never
//! patching stored indices.
//!
//! The linker side of the toolchain shares this symbol model: a
//! relocation with symbol value `S`, addend `A`, and patch address `P`
//! patches in `S + A - P` truncated to the relocation's width. That
//! contract belongs to the linker and is only documented here.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub mod target;

pub use target::SimdProfile;

/// Index of a function within [`Program::functions`]. Stable for the
/// lifetime of one call-graph generation.
pub type FuncId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<Function>,
    /// Declared-but-undefined functions (runtime shims, I/O). Calls to
    /// these are never optimized and count as externally visible
    /// side effects.
    pub externs: BTreeSet<String>,
}

impl Program {
    pub fn new() -> Self {
        Program {
            functions: Vec::new(),
            externs: BTreeSet::new(),
        }
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// The designated entry point, if the unit defines one.
    pub fn entry(&self) -> Option<FuncId> {
        self.find_function("main")
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub body: Vec<Stmt>,
    /// True for the entry function and anything externally visible or
    /// address-taken. Never flips back to true once cleared.
    pub used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    /// Derived by scanning the body; recomputed before dead-argument
    /// elimination.
    pub used: bool,
}

impl Param {
    pub fn new(name: &str, ty: Type) -> Self {
        Param {
            name: name.to_string(),
            ty,
            used: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Decl {
        name: String,
        ty: Type,
        init: Option<Expr>,
    },
    Expr(Expr),
    Assign {
        target: Expr,
        value: Expr,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Vec<Stmt>,
        /// Set by the vectorizer; the back end emits one packed
        /// instruction of `width` lanes per iteration.
        vec: Option<VecInfo>,
    },
    Return(Option<Expr>),
    Block(Vec<Stmt>),
}

/// Tag on a `For` loop the vectorizer has rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VecInfo {
    pub width: usize,
    pub op: BinaryOp,
    pub elem: Type,
    pub mode: VecMode,
}

/// Which packed shape the back end should emit for a tagged loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VecMode {
    /// `dest[i] = lhs[i] OP rhs[i]`
    Elementwise,
    /// `acc = acc OP arr[i]`, horizontal fold at loop exit
    Reduction,
    /// `arr[i] = <affine in i>`
    ArrayInit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    /// Static type inferred by the front end. The optimizer never
    /// changes it.
    pub ty: Type,
    /// Known-constant annotation derived by the optimizer. Purging all
    /// annotations and re-optimizing reproduces an equivalent program.
    pub konst: Option<ConstVal>,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Expr {
            kind,
            ty,
            konst: None,
        }
    }

    pub fn int(value: i64, ty: Type) -> Self {
        Expr {
            kind: ExprKind::IntLit(value),
            ty,
            konst: Some(ConstVal::Int(value)),
        }
    }

    pub fn float(value: f64, ty: Type) -> Self {
        Expr {
            kind: ExprKind::FloatLit(value),
            ty,
            konst: Some(ConstVal::Float(value)),
        }
    }

    pub fn var(name: &str, ty: Type) -> Self {
        Expr::new(ExprKind::Var(name.to_string()), ty)
    }

    /// The literal value of this node, if it is one.
    pub fn as_const(&self) -> Option<ConstVal> {
        match self.kind {
            ExprKind::IntLit(v) => Some(ConstVal::Int(v)),
            ExprKind::FloatLit(v) => Some(ConstVal::Float(v)),
            _ => None,
        }
    }

    /// Whether evaluating this expression can change observable state.
    pub fn has_side_effects(&self) -> bool {
        match &self.kind {
            ExprKind::IntLit(_) | ExprKind::FloatLit(_) | ExprKind::Var(_) => false,
            ExprKind::Unary { operand, .. } | ExprKind::Cast(operand) => {
                operand.has_side_effects()
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.has_side_effects() || rhs.has_side_effects()
            }
            ExprKind::Call { .. } => true,
            ExprKind::Index { base, index } => {
                base.has_side_effects() || index.has_side_effects()
            }
            ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
                base.has_side_effects()
            }
            ExprKind::Assign { .. } | ExprKind::CompoundAssign { .. } => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    Var(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        field: String,
    },
    PtrMember {
        base: Box<Expr>,
        field: String,
    },
    Cast(Box<Expr>),
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    CompoundAssign {
        op: BinaryOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
}

/// A value known at compile time. Integers are stored sign-extended at
/// the owning node's static width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConstVal {
    Int(i64),
    Float(f64),
}

impl ConstVal {
    pub fn is_truthy(&self) -> bool {
        match self {
            ConstVal::Int(v) => *v != 0,
            ConstVal::Float(v) => *v != 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    BitNot,
    LogicalNot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Void,
    Pointer(Box<Type>),
    Array(Box<Type>, usize),
    Struct(String),
}

impl Type {
    pub fn bit_width(&self) -> u32 {
        match self {
            Type::I8 | Type::U8 => 8,
            Type::I16 | Type::U16 => 16,
            Type::I32 | Type::U32 | Type::F32 => 32,
            Type::I64 | Type::U64 | Type::F64 | Type::Pointer(_) => 64,
            Type::Void | Type::Array(..) | Type::Struct(_) => 0,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, Type::U8 | Type::U16 | Type::U32 | Type::U64)
    }

    pub fn is_integer(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// Element type of an array or pointee of a pointer.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(elem, _) | Type::Pointer(elem) => Some(elem),
            _ => None,
        }
    }
}

/// Recompute every parameter's `used` flag by scanning the body.
pub fn mark_param_uses(func: &mut Function) {
    let mut used = vec![false; func.params.len()];
    for stmt in &func.body {
        scan_stmt(stmt, &func.params, &mut used);
    }
    for (param, seen) in func.params.iter_mut().zip(used) {
        param.used = seen;
    }
}

fn scan_stmt(stmt: &Stmt, params: &[Param], used: &mut [bool]) {
    match stmt {
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                scan_expr(init, params, used);
            }
        }
        Stmt::Expr(e) | Stmt::Return(Some(e)) => scan_expr(e, params, used),
        Stmt::Return(None) => {}
        Stmt::Assign { target, value } => {
            scan_expr(target, params, used);
            scan_expr(value, params, used);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            scan_expr(cond, params, used);
            for s in then_body.iter().chain(else_body) {
                scan_stmt(s, params, used);
            }
        }
        Stmt::While { cond, body } => {
            scan_expr(cond, params, used);
            for s in body {
                scan_stmt(s, params, used);
            }
        }
        Stmt::For {
            init,
            cond,
            step,
            body,
            ..
        } => {
            if let Some(init) = init {
                scan_stmt(init, params, used);
            }
            if let Some(cond) = cond {
                scan_expr(cond, params, used);
            }
            if let Some(step) = step {
                scan_stmt(step, params, used);
            }
            for s in body {
                scan_stmt(s, params, used);
            }
        }
        Stmt::Block(body) => {
            for s in body {
                scan_stmt(s, params, used);
            }
        }
    }
}

fn scan_expr(expr: &Expr, params: &[Param], used: &mut [bool]) {
    if let ExprKind::Var(name) = &expr.kind {
        if let Some(i) = params.iter().position(|p| &p.name == name) {
            used[i] = true;
        }
    }
    match &expr.kind {
        ExprKind::Unary { operand, .. } | ExprKind::Cast(operand) => {
            scan_expr(operand, params, used);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            scan_expr(lhs, params, used);
            scan_expr(rhs, params, used);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                scan_expr(a, params, used);
            }
        }
        ExprKind::Index { base, index } => {
            scan_expr(base, params, used);
            scan_expr(index, params, used);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            scan_expr(base, params, used);
        }
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            scan_expr(target, params, used);
            scan_expr(value, params, used);
        }
        _ => {}
    }
}
