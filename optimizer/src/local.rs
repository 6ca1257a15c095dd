//! The local optimizer: a per-function statement walk that applies
//! constant folding, algebraic simplification and strength reduction
//! bottom-up to every expression, threads assertion-derived facts
//! through straight-line code, eliminates constant-condition branches
//! and truncates unreachable statements after a return.
//!
//! Facts never cross a loop boundary: loop bodies and conditions are
//! optimized under an empty environment, since a fact established
//! before the loop may be invalidated by a later iteration.

use std::collections::HashSet;

use model::{ConstVal, Expr, ExprKind, Function, Stmt};

use crate::algebraic;
use crate::facts::FactEnv;
use crate::folding;
use crate::strength;
use crate::utils::truncate;

const MAX_ITERATIONS: usize = 10;

pub fn optimize_function(func: &mut Function) {
    for _ in 0..MAX_ITERATIONS {
        let before = func.body.clone();
        let mut env = FactEnv::default();
        opt_block(&mut func.body, &mut env);
        if func.body == before {
            return;
        }
    }
    log::warn!(
        "local optimizer did not converge on `{}` after {} passes",
        func.name,
        MAX_ITERATIONS
    );
}

enum Rewrite {
    Keep,
    Remove,
    Replace(Vec<Stmt>),
}

pub(crate) fn opt_block(stmts: &mut Vec<Stmt>, env: &mut FactEnv) {
    let old = std::mem::take(stmts);
    for mut stmt in old {
        match opt_stmt(&mut stmt, env) {
            Rewrite::Keep => stmts.push(stmt),
            Rewrite::Remove => {}
            Rewrite::Replace(list) => stmts.extend(list),
        }
        // nothing after a return is reachable
        if matches!(stmts.last(), Some(Stmt::Return(_))) {
            break;
        }
    }
}

fn opt_stmt(stmt: &mut Stmt, env: &mut FactEnv) -> Rewrite {
    match stmt {
        Stmt::Decl { name, init, .. } => {
            if let Some(init) = init {
                opt_expr(init, env);
                invalidate_writes(init, env);
            }
            env.invalidate(name);
            if let Some(c) = init.as_ref().and_then(Expr::as_const) {
                env.record_known(name, c);
            }
            Rewrite::Keep
        }
        Stmt::Expr(e) => {
            if let ExprKind::Call { callee, args } = &mut e.kind {
                if callee == "assert" && args.len() == 1 {
                    opt_expr(&mut args[0], env);
                    env.record_assert(&args[0]);
                    return Rewrite::Keep;
                }
            }
            opt_expr(e, env);
            invalidate_writes(e, env);
            if e.has_side_effects() {
                Rewrite::Keep
            } else {
                // a folded leftover with no effect
                Rewrite::Remove
            }
        }
        Stmt::Assign { target, value } => {
            opt_place(target, env);
            opt_expr(value, env);
            invalidate_writes(value, env);
            if let ExprKind::Var(name) = &target.kind {
                env.invalidate(name);
            }
            Rewrite::Keep
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            opt_expr(cond, env);
            invalidate_writes(cond, env);
            if let Some(c) = cond.as_const() {
                let taken = if c.is_truthy() { then_body } else { else_body };
                let mut body = std::mem::take(taken);
                let mut benv = env.clone();
                opt_block(&mut body, &mut benv);
                invalidate_assigned(&body, env);
                return if body.is_empty() {
                    Rewrite::Remove
                } else {
                    Rewrite::Replace(vec![Stmt::Block(body)])
                };
            }
            let mut tenv = env.clone();
            opt_block(then_body, &mut tenv);
            let mut eenv = env.clone();
            opt_block(else_body, &mut eenv);
            invalidate_assigned(then_body, env);
            invalidate_assigned(else_body, env);
            Rewrite::Keep
        }
        Stmt::While { cond, body } => {
            let no_facts = FactEnv::default();
            opt_expr(cond, &no_facts);
            if let Some(c) = cond.as_const() {
                if !c.is_truthy() {
                    return Rewrite::Remove;
                }
            }
            let mut lenv = FactEnv::default();
            opt_block(body, &mut lenv);
            invalidate_assigned(body, env);
            Rewrite::Keep
        }
        Stmt::For {
            init,
            cond,
            step,
            body,
            ..
        } => {
            let mut no_facts = FactEnv::default();
            if let Some(init) = init {
                let _ = opt_stmt(init.as_mut(), env);
                invalidate_stmt_writes(init, env);
            }
            if let Some(cond) = cond {
                opt_expr(cond, &no_facts);
            }
            if let Some(step) = step {
                let _ = opt_stmt(step.as_mut(), &mut no_facts);
            }
            let mut lenv = FactEnv::default();
            opt_block(body, &mut lenv);
            invalidate_assigned(body, env);
            Rewrite::Keep
        }
        Stmt::Return(e) => {
            if let Some(e) = e {
                opt_expr(e, env);
                invalidate_writes(e, env);
            }
            Rewrite::Keep
        }
        Stmt::Block(body) => {
            let mut benv = env.clone();
            opt_block(body, &mut benv);
            invalidate_assigned(body, env);
            if body.is_empty() {
                Rewrite::Remove
            } else {
                Rewrite::Keep
            }
        }
    }
}

/// Bottom-up expression rewrite under the current fact environment.
pub(crate) fn opt_expr(expr: &mut Expr, env: &FactEnv) {
    match &mut expr.kind {
        ExprKind::IntLit(_) | ExprKind::FloatLit(_) | ExprKind::Var(_) => {}
        ExprKind::Unary { operand, .. } => opt_expr(operand, env),
        ExprKind::Binary { lhs, rhs, .. } => {
            opt_expr(lhs, env);
            opt_expr(rhs, env);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                opt_expr(a, env);
            }
        }
        ExprKind::Index { base, index } => {
            opt_place(base, env);
            opt_expr(index, env);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            opt_place(base, env);
        }
        ExprKind::Cast(inner) => opt_expr(inner, env),
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            opt_place(target, env);
            opt_expr(value, env);
        }
    }

    let replacement = match &expr.kind {
        ExprKind::Var(name) => env.known(name).map(|c| const_expr(c, expr)),
        ExprKind::Binary { op, lhs, rhs } => {
            if let (Some(l), Some(r)) = (lhs.as_const(), rhs.as_const()) {
                folding::fold_binary(*op, &l, &r, &lhs.ty)
                    .map(|v| const_expr(v, expr))
            } else {
                None
            }
            .or_else(|| algebraic::simplify_binary(*op, lhs, rhs, &expr.ty))
            .or_else(|| strength::reduce_binary(*op, lhs, rhs, &expr.ty, env))
        }
        ExprKind::Unary { op, operand } => {
            if let Some(v) = operand.as_const() {
                folding::fold_unary(*op, &v, &expr.ty).map(|v| const_expr(v, expr))
            } else {
                algebraic::simplify_unary(*op, operand)
            }
        }
        ExprKind::Cast(inner) => fold_cast(inner, expr),
        _ => None,
    };
    if let Some(new) = replacement {
        *expr = new;
    }
    if expr.konst.is_none() {
        expr.konst = expr.as_const();
    }
}

/// Optimize the non-place parts of an lvalue: index expressions may be
/// rewritten, the assigned variable itself must not be substituted.
fn opt_place(place: &mut Expr, env: &FactEnv) {
    match &mut place.kind {
        ExprKind::Index { base, index } => {
            opt_place(base, env);
            opt_expr(index, env);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            opt_place(base, env);
        }
        _ => {}
    }
}

fn const_expr(v: ConstVal, original: &Expr) -> Expr {
    let kind = match v {
        ConstVal::Int(n) => ExprKind::IntLit(n),
        ConstVal::Float(f) => ExprKind::FloatLit(f),
    };
    Expr {
        kind,
        ty: original.ty.clone(),
        konst: Some(v),
    }
}

fn fold_cast(inner: &Expr, cast: &Expr) -> Option<Expr> {
    let v = inner.as_const()?;
    let folded = match (&v, cast.ty.is_integer(), cast.ty.is_float()) {
        (ConstVal::Int(n), true, _) => ConstVal::Int(truncate(&cast.ty, *n)),
        (ConstVal::Int(n), _, true) => ConstVal::Float(*n as f64),
        (ConstVal::Float(f), true, _) => ConstVal::Int(truncate(&cast.ty, *f as i64)),
        (ConstVal::Float(f), _, true) => {
            if cast.ty == model::Type::F32 {
                ConstVal::Float(f64::from(*f as f32))
            } else {
                ConstVal::Float(*f)
            }
        }
        _ => return None,
    };
    Some(const_expr(folded, cast))
}

/// Invalidate facts about every variable an embedded assignment inside
/// `expr` writes to.
fn invalidate_writes(expr: &Expr, env: &mut FactEnv) {
    let mut names = HashSet::new();
    collect_expr_writes(expr, &mut names);
    for name in names {
        env.invalidate(&name);
    }
}

fn invalidate_stmt_writes(stmt: &Stmt, env: &mut FactEnv) {
    let mut names = HashSet::new();
    collect_stmt_writes(stmt, &mut names);
    for name in names {
        env.invalidate(&name);
    }
}

fn invalidate_assigned(stmts: &[Stmt], env: &mut FactEnv) {
    let mut names = HashSet::new();
    for s in stmts {
        collect_stmt_writes(s, &mut names);
    }
    for name in names {
        env.invalidate(&name);
    }
}

/// Replace every read of `name` with `value`. Lvalue positions are
/// left alone; callers must ensure the statements never write `name`.
pub(crate) fn substitute_var_stmt(stmt: &mut Stmt, name: &str, value: &Expr, changed: &mut bool) {
    match stmt {
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                substitute_var_expr(init, name, value, changed);
            }
        }
        Stmt::Expr(e) | Stmt::Return(Some(e)) => substitute_var_expr(e, name, value, changed),
        Stmt::Return(None) => {}
        Stmt::Assign { target, value: v } => {
            substitute_var_place(target, name, value, changed);
            substitute_var_expr(v, name, value, changed);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            substitute_var_expr(cond, name, value, changed);
            for s in then_body.iter_mut().chain(else_body) {
                substitute_var_stmt(s, name, value, changed);
            }
        }
        Stmt::While { cond, body } => {
            substitute_var_expr(cond, name, value, changed);
            for s in body {
                substitute_var_stmt(s, name, value, changed);
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
                substitute_var_stmt(init, name, value, changed);
            }
            if let Some(cond) = cond {
                substitute_var_expr(cond, name, value, changed);
            }
            if let Some(step) = step {
                substitute_var_stmt(step, name, value, changed);
            }
            for s in body {
                substitute_var_stmt(s, name, value, changed);
            }
        }
        Stmt::Block(body) => {
            for s in body {
                substitute_var_stmt(s, name, value, changed);
            }
        }
    }
}

pub(crate) fn substitute_var_expr(expr: &mut Expr, name: &str, value: &Expr, changed: &mut bool) {
    if matches!(&expr.kind, ExprKind::Var(n) if n == name) {
        *expr = value.clone();
        *changed = true;
        return;
    }
    match &mut expr.kind {
        ExprKind::Unary { operand, .. } | ExprKind::Cast(operand) => {
            substitute_var_expr(operand, name, value, changed);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            substitute_var_expr(lhs, name, value, changed);
            substitute_var_expr(rhs, name, value, changed);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                substitute_var_expr(a, name, value, changed);
            }
        }
        ExprKind::Index { base, index } => {
            substitute_var_place(base, name, value, changed);
            substitute_var_expr(index, name, value, changed);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            substitute_var_place(base, name, value, changed);
        }
        ExprKind::Assign { target, value: v }
        | ExprKind::CompoundAssign { target, value: v, .. } => {
            substitute_var_place(target, name, value, changed);
            substitute_var_expr(v, name, value, changed);
        }
        _ => {}
    }
}

fn substitute_var_place(place: &mut Expr, name: &str, value: &Expr, changed: &mut bool) {
    match &mut place.kind {
        ExprKind::Index { base, index } => {
            substitute_var_place(base, name, value, changed);
            substitute_var_expr(index, name, value, changed);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            substitute_var_place(base, name, value, changed);
        }
        _ => {}
    }
}

/// Collect every variable name the statements write to (declarations,
/// assignments, compound assignments), recursively.
pub(crate) fn collect_stmt_writes(stmt: &Stmt, out: &mut HashSet<String>) {
    match stmt {
        Stmt::Decl { name, init, .. } => {
            out.insert(name.clone());
            if let Some(init) = init {
                collect_expr_writes(init, out);
            }
        }
        Stmt::Expr(e) | Stmt::Return(Some(e)) => collect_expr_writes(e, out),
        Stmt::Return(None) => {}
        Stmt::Assign { target, value } => {
            if let ExprKind::Var(name) = &target.kind {
                out.insert(name.clone());
            }
            collect_expr_writes(target, out);
            collect_expr_writes(value, out);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            collect_expr_writes(cond, out);
            for s in then_body.iter().chain(else_body) {
                collect_stmt_writes(s, out);
            }
        }
        Stmt::While { cond, body } => {
            collect_expr_writes(cond, out);
            for s in body {
                collect_stmt_writes(s, out);
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
                collect_stmt_writes(init, out);
            }
            if let Some(cond) = cond {
                collect_expr_writes(cond, out);
            }
            if let Some(step) = step {
                collect_stmt_writes(step, out);
            }
            for s in body {
                collect_stmt_writes(s, out);
            }
        }
        Stmt::Block(body) => {
            for s in body {
                collect_stmt_writes(s, out);
            }
        }
    }
}

fn collect_expr_writes(expr: &Expr, out: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            if let ExprKind::Var(name) = &target.kind {
                out.insert(name.clone());
            }
            collect_expr_writes(target, out);
            collect_expr_writes(value, out);
        }
        ExprKind::Unary { operand, .. } | ExprKind::Cast(operand) => {
            collect_expr_writes(operand, out);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_expr_writes(lhs, out);
            collect_expr_writes(rhs, out);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                collect_expr_writes(a, out);
            }
        }
        ExprKind::Index { base, index } => {
            collect_expr_writes(base, out);
            collect_expr_writes(index, out);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            collect_expr_writes(base, out);
        }
        _ => {}
    }
}
