//! Interprocedural passes driven by the call graph, iterated to a
//! bounded fixpoint: constant-argument propagation, dead-argument
//! elimination, return-value propagation and dead-function
//! elimination.
//!
//! Signature-changing passes only touch functions that are neither the
//! entry point nor externally visible (`used`), since outside callers
//! could pass anything. Hitting the iteration cap keeps the last
//! computed state; unexploited facts cost performance, not
//! correctness.

use std::collections::HashSet;

use model::{mark_param_uses, ConstVal, Expr, ExprKind, Function, Program, Stmt};

use crate::callgraph::CallGraph;
use crate::error::OptError;
use crate::local;

pub const MAX_FIXPOINT_ITERATIONS: usize = 10;

pub fn run(program: &mut Program) -> Result<(), OptError> {
    for _ in 0..MAX_FIXPOINT_ITERATIONS {
        // Rebuilt every round; within a round the passes only ever
        // remove call sites, so stale counts err on the keep side.
        let graph = CallGraph::build(program)?;
        let mut changed = false;
        changed |= propagate_constant_arguments(program, &graph);
        changed |= eliminate_dead_arguments(program);
        changed |= propagate_return_values(program, &graph);
        changed |= eliminate_dead_functions(program, &graph);
        if !changed {
            return Ok(());
        }
    }
    log::warn!(
        "interprocedural fixpoint cap ({}) reached, keeping last state",
        MAX_FIXPOINT_ITERATIONS
    );
    Ok(())
}

/// A parameter that receives the same literal at every call site is
/// substituted throughout the callee's body.
fn propagate_constant_arguments(program: &mut Program, graph: &CallGraph) -> bool {
    let entry = program.entry();
    let mut changed = false;
    for id in 0..program.functions.len() {
        if Some(id) == entry || program.functions[id].used || !graph.has_callers(id) {
            continue;
        }
        let mut writes = HashSet::new();
        for stmt in &program.functions[id].body {
            local::collect_stmt_writes(stmt, &mut writes);
        }
        for p in 0..program.functions[id].params.len() {
            let name = program.functions[id].params[p].name.clone();
            // A reassigned (or shadowed) parameter is not a constant.
            if writes.contains(&name) {
                continue;
            }
            let Some(value) = common_argument(program, &program.functions[id].name, p) else {
                continue;
            };
            let ty = program.functions[id].params[p].ty.clone();
            let lit = match value {
                ConstVal::Int(v) => Expr::int(v, ty),
                ConstVal::Float(v) => Expr::float(v, ty),
            };
            let mut substituted = false;
            let func = &mut program.functions[id];
            for stmt in &mut func.body {
                local::substitute_var_stmt(stmt, &name, &lit, &mut substituted);
            }
            if substituted {
                log::debug!(
                    "pinned parameter `{}` of `{}` to a constant",
                    name,
                    func.name
                );
                local::optimize_function(func);
                changed = true;
            }
        }
    }
    changed
}

/// The literal passed for parameter `p` at every call site of `callee`,
/// if all sites agree.
fn common_argument(program: &Program, callee: &str, p: usize) -> Option<ConstVal> {
    let mut common: Option<ConstVal> = None;
    for func in &program.functions {
        for stmt in &func.body {
            let mut ok = true;
            visit_calls_stmt(stmt, callee, &mut |args: &[Expr]| {
                match args.get(p).and_then(|a| a.as_const()) {
                    Some(v) if common.is_none() || common == Some(v) => common = Some(v),
                    _ => ok = false,
                }
            });
            if !ok {
                return None;
            }
        }
    }
    common
}

/// Parameters never read by the body are removed, together with the
/// matching argument at every call site. Processed right to left so
/// earlier indices stay valid; an argument with side effects at any
/// site keeps its parameter alive.
fn eliminate_dead_arguments(program: &mut Program) -> bool {
    let entry = program.entry();
    let mut changed = false;
    for id in 0..program.functions.len() {
        if Some(id) == entry || program.functions[id].used {
            continue;
        }
        mark_param_uses(&mut program.functions[id]);
        let name = program.functions[id].name.clone();
        for p in (0..program.functions[id].params.len()).rev() {
            if program.functions[id].params[p].used {
                continue;
            }
            let mut effectful = false;
            for func in &program.functions {
                for stmt in &func.body {
                    visit_calls_stmt(stmt, &name, &mut |args: &[Expr]| {
                        if args[p].has_side_effects() {
                            effectful = true;
                        }
                    });
                }
            }
            if effectful {
                continue;
            }
            program.functions[id].params.remove(p);
            for func in &mut program.functions {
                for stmt in &mut func.body {
                    rewrite_calls_stmt(stmt, &name, &mut |args: &mut Vec<Expr>| {
                        args.remove(p);
                    });
                }
            }
            log::debug!("removed dead parameter {} of `{}`", p, name);
            changed = true;
        }
    }
    changed
}

/// A function returning the same literal on every path, with no calls
/// in its body, has its call sites rewritten to that literal.
fn propagate_return_values(program: &mut Program, graph: &CallGraph) -> bool {
    let mut changed = false;
    for id in 0..program.functions.len() {
        if !graph.has_callers(id) {
            continue;
        }
        let func = &program.functions[id];
        let Some(value) = constant_return(func) else {
            continue;
        };
        let name = func.name.clone();
        let lit = match value {
            ConstVal::Int(v) => Expr::int(v, func.return_type.clone()),
            ConstVal::Float(v) => Expr::float(v, func.return_type.clone()),
        };
        for caller in 0..program.functions.len() {
            if caller == id {
                continue;
            }
            let body = &mut program.functions[caller].body;
            // effectful arguments are hoisted to their own statements
            hoist_effectful_calls(body, &name, &lit, &mut changed);
            for stmt in body.iter_mut() {
                replace_pure_calls_stmt(stmt, &name, &lit, &mut changed);
            }
        }
        if changed {
            log::debug!("propagated constant return of `{}` to call sites", name);
        }
    }
    changed
}

/// The single literal the function returns on all paths, if any.
fn constant_return(func: &Function) -> Option<ConstVal> {
    if func.return_type == model::Type::Void {
        return None;
    }
    // Any call (assertions included) is an effect the caller must keep.
    if func.body.iter().any(contains_call) || !definitely_returns(&func.body) {
        return None;
    }
    let mut returns = Vec::new();
    for stmt in &func.body {
        collect_returns(stmt, &mut returns);
    }
    let first = returns.first()?.as_ref()?.as_const()?;
    for r in &returns {
        if r.as_ref().and_then(|e| e.as_const()) != Some(first) {
            return None;
        }
    }
    Some(first)
}

fn collect_returns<'a>(stmt: &'a Stmt, out: &mut Vec<Option<&'a Expr>>) {
    match stmt {
        Stmt::Return(e) => out.push(e.as_ref()),
        Stmt::If {
            then_body,
            else_body,
            ..
        } => {
            for s in then_body.iter().chain(else_body) {
                collect_returns(s, out);
            }
        }
        Stmt::While { body, .. } | Stmt::For { body, .. } | Stmt::Block(body) => {
            for s in body {
                collect_returns(s, out);
            }
        }
        _ => {}
    }
}

fn definitely_returns(stmts: &[Stmt]) -> bool {
    match stmts.last() {
        Some(Stmt::Return(_)) => true,
        Some(Stmt::If {
            then_body,
            else_body,
            ..
        }) => definitely_returns(then_body) && definitely_returns(else_body),
        Some(Stmt::Block(body)) => definitely_returns(body),
        _ => false,
    }
}

fn contains_call(stmt: &Stmt) -> bool {
    let mut found = false;
    visit_calls_stmt(stmt, "", &mut |_: &[Expr]| found = true);
    found
}

/// Functions nobody calls, that are not externally visible and not the
/// entry point, are dropped from the program.
fn eliminate_dead_functions(program: &mut Program, graph: &CallGraph) -> bool {
    let entry = program.entry();
    let keep: Vec<bool> = (0..program.functions.len())
        .map(|id| Some(id) == entry || program.functions[id].used || graph.has_callers(id))
        .collect();
    if keep.iter().all(|&k| k) {
        return false;
    }
    for (id, kept) in keep.iter().enumerate() {
        if !kept {
            log::debug!("removing dead function `{}`", program.functions[id].name);
        }
    }
    let mut it = keep.iter();
    program.functions.retain(|_| *it.next().unwrap_or(&true));
    true
}

// ---- call-site visitors ----------------------------------------------

/// Invoke `f` with the argument list of every call to `callee`; an
/// empty `callee` matches every call.
fn visit_calls_stmt<'a>(stmt: &'a Stmt, callee: &str, f: &mut impl FnMut(&'a [Expr])) {
    match stmt {
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                visit_calls_expr(init, callee, f);
            }
        }
        Stmt::Expr(e) | Stmt::Return(Some(e)) => visit_calls_expr(e, callee, f),
        Stmt::Return(None) => {}
        Stmt::Assign { target, value } => {
            visit_calls_expr(target, callee, f);
            visit_calls_expr(value, callee, f);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            visit_calls_expr(cond, callee, f);
            for s in then_body.iter().chain(else_body) {
                visit_calls_stmt(s, callee, f);
            }
        }
        Stmt::While { cond, body } => {
            visit_calls_expr(cond, callee, f);
            for s in body {
                visit_calls_stmt(s, callee, f);
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
                visit_calls_stmt(init, callee, f);
            }
            if let Some(cond) = cond {
                visit_calls_expr(cond, callee, f);
            }
            if let Some(step) = step {
                visit_calls_stmt(step, callee, f);
            }
            for s in body {
                visit_calls_stmt(s, callee, f);
            }
        }
        Stmt::Block(body) => {
            for s in body {
                visit_calls_stmt(s, callee, f);
            }
        }
    }
}

fn visit_calls_expr<'a>(expr: &'a Expr, callee: &str, f: &mut impl FnMut(&'a [Expr])) {
    if let ExprKind::Call { callee: c, args } = &expr.kind {
        if callee.is_empty() || c == callee {
            f(args);
        }
    }
    match &expr.kind {
        ExprKind::Unary { operand, .. } | ExprKind::Cast(operand) => {
            visit_calls_expr(operand, callee, f);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            visit_calls_expr(lhs, callee, f);
            visit_calls_expr(rhs, callee, f);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                visit_calls_expr(a, callee, f);
            }
        }
        ExprKind::Index { base, index } => {
            visit_calls_expr(base, callee, f);
            visit_calls_expr(index, callee, f);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            visit_calls_expr(base, callee, f);
        }
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            visit_calls_expr(target, callee, f);
            visit_calls_expr(value, callee, f);
        }
        _ => {}
    }
}

fn rewrite_calls_stmt(stmt: &mut Stmt, callee: &str, f: &mut impl FnMut(&mut Vec<Expr>)) {
    match stmt {
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                rewrite_calls_expr(init, callee, f);
            }
        }
        Stmt::Expr(e) | Stmt::Return(Some(e)) => rewrite_calls_expr(e, callee, f),
        Stmt::Return(None) => {}
        Stmt::Assign { target, value } => {
            rewrite_calls_expr(target, callee, f);
            rewrite_calls_expr(value, callee, f);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            rewrite_calls_expr(cond, callee, f);
            for s in then_body.iter_mut().chain(else_body) {
                rewrite_calls_stmt(s, callee, f);
            }
        }
        Stmt::While { cond, body } => {
            rewrite_calls_expr(cond, callee, f);
            for s in body {
                rewrite_calls_stmt(s, callee, f);
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
                rewrite_calls_stmt(init, callee, f);
            }
            if let Some(cond) = cond {
                rewrite_calls_expr(cond, callee, f);
            }
            if let Some(step) = step {
                rewrite_calls_stmt(step, callee, f);
            }
            for s in body {
                rewrite_calls_stmt(s, callee, f);
            }
        }
        Stmt::Block(body) => {
            for s in body {
                rewrite_calls_stmt(s, callee, f);
            }
        }
    }
}

fn rewrite_calls_expr(expr: &mut Expr, callee: &str, f: &mut impl FnMut(&mut Vec<Expr>)) {
    match &mut expr.kind {
        ExprKind::Unary { operand, .. } | ExprKind::Cast(operand) => {
            rewrite_calls_expr(operand, callee, f);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            rewrite_calls_expr(lhs, callee, f);
            rewrite_calls_expr(rhs, callee, f);
        }
        ExprKind::Call { callee: c, args } => {
            for a in args.iter_mut() {
                rewrite_calls_expr(a, callee, f);
            }
            if c == callee {
                f(args);
            }
        }
        ExprKind::Index { base, index } => {
            rewrite_calls_expr(base, callee, f);
            rewrite_calls_expr(index, callee, f);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            rewrite_calls_expr(base, callee, f);
        }
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            rewrite_calls_expr(target, callee, f);
            rewrite_calls_expr(value, callee, f);
        }
        _ => {}
    }
}

/// Replace calls to `callee` whose arguments are all side-effect-free
/// with `lit`, anywhere in the tree.
fn replace_pure_calls_stmt(stmt: &mut Stmt, callee: &str, lit: &Expr, changed: &mut bool) {
    rewrite_stmt_exprs(stmt, &mut |e| replace_pure_calls(e, callee, lit, changed));
}

fn replace_pure_calls(expr: &mut Expr, callee: &str, lit: &Expr, changed: &mut bool) {
    // children first, so nested calls inside arguments are handled
    match &mut expr.kind {
        ExprKind::Unary { operand, .. } | ExprKind::Cast(operand) => {
            replace_pure_calls(operand, callee, lit, changed);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            replace_pure_calls(lhs, callee, lit, changed);
            replace_pure_calls(rhs, callee, lit, changed);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                replace_pure_calls(a, callee, lit, changed);
            }
        }
        ExprKind::Index { base, index } => {
            replace_pure_calls(base, callee, lit, changed);
            replace_pure_calls(index, callee, lit, changed);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            replace_pure_calls(base, callee, lit, changed);
        }
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            replace_pure_calls(target, callee, lit, changed);
            replace_pure_calls(value, callee, lit, changed);
        }
        _ => {}
    }
    if let ExprKind::Call { callee: c, args } = &expr.kind {
        if c == callee && args.iter().all(|a| !a.has_side_effects()) {
            *expr = lit.clone();
            *changed = true;
        }
    }
}

fn rewrite_stmt_exprs(stmt: &mut Stmt, f: &mut impl FnMut(&mut Expr)) {
    match stmt {
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                f(init);
            }
        }
        Stmt::Expr(e) | Stmt::Return(Some(e)) => f(e),
        Stmt::Return(None) => {}
        Stmt::Assign { target, value } => {
            f(target);
            f(value);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            f(cond);
            for s in then_body.iter_mut().chain(else_body) {
                rewrite_stmt_exprs(s, f);
            }
        }
        Stmt::While { cond, body } => {
            f(cond);
            for s in body {
                rewrite_stmt_exprs(s, f);
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
                rewrite_stmt_exprs(init, f);
            }
            if let Some(cond) = cond {
                f(cond);
            }
            if let Some(step) = step {
                rewrite_stmt_exprs(step, f);
            }
            for s in body {
                rewrite_stmt_exprs(s, f);
            }
        }
        Stmt::Block(body) => {
            for s in body {
                rewrite_stmt_exprs(s, f);
            }
        }
    }
}

/// Rewrite statements whose whole value is a call to `callee` with
/// effectful arguments: the arguments become their own statements
/// (still evaluated, in order) and the call's value becomes `lit`.
fn hoist_effectful_calls(stmts: &mut Vec<Stmt>, callee: &str, lit: &Expr, changed: &mut bool) {
    let old = std::mem::take(stmts);
    for mut stmt in old {
        match &mut stmt {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                hoist_effectful_calls(then_body, callee, lit, changed);
                hoist_effectful_calls(else_body, callee, lit, changed);
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } | Stmt::Block(body) => {
                hoist_effectful_calls(body, callee, lit, changed);
            }
            _ => {}
        }
        let top = match &mut stmt {
            Stmt::Expr(e) => Some(e),
            Stmt::Decl { init: Some(e), .. } => Some(e),
            Stmt::Assign { value, .. } => Some(value),
            Stmt::Return(Some(e)) => Some(e),
            _ => None,
        };
        if let Some(e) = top {
            if let ExprKind::Call { callee: c, args } = &mut e.kind {
                if c == callee && args.iter().any(|a| a.has_side_effects()) {
                    for a in args.drain(..) {
                        stmts.push(Stmt::Expr(a));
                    }
                    *e = lit.clone();
                    *changed = true;
                }
            }
        }
        stmts.push(stmt);
    }
}
