//! Policy-driven inlining. A call site is replaced by the callee's
//! body when the callee is small enough (or hot enough, with profile
//! data) and structurally safe: not on a call cycle, and with its only
//! `return` as the trailing statement. Arguments bind to fresh locals
//! in order, so side effects keep their evaluation order; every callee
//! local is renamed with a fresh prefix to avoid capture.

use std::collections::HashSet;

use model::{Expr, ExprKind, Function, Program, Stmt, Type};
use pgo::Profile;

use crate::callgraph::CallGraph;
use crate::local;

pub const INLINE_STMT_THRESHOLD: usize = 8;
pub const INLINE_HOT_STMT_THRESHOLD: usize = 20;

/// How many times the whole-program inlining pass repeats, to let
/// freshly inlined bodies expose further candidates.
pub const MAX_INLINE_ROUNDS: usize = 3;

/// One inlining sweep over every function. The caller rebuilds the
/// call graph and re-runs the local optimizer afterwards.
pub fn inline_functions(
    program: &mut Program,
    graph: &CallGraph,
    profile: Option<&Profile>,
    counter: &mut usize,
) -> bool {
    let mut changed = false;
    for caller in 0..program.functions.len() {
        let caller_name = program.functions[caller].name.clone();
        let mut body = std::mem::take(&mut program.functions[caller].body);
        inline_block(
            program,
            graph,
            profile,
            &caller_name,
            &mut body,
            counter,
            &mut changed,
        );
        program.functions[caller].body = body;
    }
    changed
}

#[allow(clippy::too_many_arguments)]
fn inline_block(
    program: &Program,
    graph: &CallGraph,
    profile: Option<&Profile>,
    caller: &str,
    stmts: &mut Vec<Stmt>,
    counter: &mut usize,
    changed: &mut bool,
) {
    let old = std::mem::take(stmts);
    for mut stmt in old {
        match &mut stmt {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                inline_block(program, graph, profile, caller, then_body, counter, changed);
                inline_block(program, graph, profile, caller, else_body, counter, changed);
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } | Stmt::Block(body) => {
                inline_block(program, graph, profile, caller, body, counter, changed);
            }
            _ => {}
        }

        let call = call_position(&stmt).and_then(|e| match &e.kind {
            ExprKind::Call { callee, args } => Some((callee.clone(), args.clone())),
            _ => None,
        });
        if let Some((callee_name, args)) = call {
            if let Some(expansion) =
                try_inline(program, graph, profile, caller, &callee_name, &args, counter)
            {
                let Expansion { prologue, result } = expansion;
                stmts.extend(prologue);
                match (stmt, result) {
                    // a void call in statement position disappears
                    (Stmt::Expr(_), None) => {}
                    (mut stmt, Some(result)) => {
                        if let Some(slot) = call_position_mut(&mut stmt) {
                            *slot = result;
                        }
                        stmts.push(stmt);
                    }
                    (stmt, None) => stmts.push(stmt),
                }
                *changed = true;
                continue;
            }
        }
        stmts.push(stmt);
    }
}

/// The expression slot holding a call that is this statement's whole
/// value, if any.
fn call_position(stmt: &Stmt) -> Option<&Expr> {
    let e = match stmt {
        Stmt::Expr(e) => e,
        Stmt::Decl { init: Some(e), .. } => e,
        Stmt::Assign { value, .. } => value,
        Stmt::Return(Some(e)) => e,
        _ => return None,
    };
    matches!(e.kind, ExprKind::Call { .. }).then_some(e)
}

fn call_position_mut(stmt: &mut Stmt) -> Option<&mut Expr> {
    match stmt {
        Stmt::Expr(e) => Some(e),
        Stmt::Decl { init: Some(e), .. } => Some(e),
        Stmt::Assign { value, .. } => Some(value),
        Stmt::Return(Some(e)) => Some(e),
        _ => None,
    }
}

struct Expansion {
    prologue: Vec<Stmt>,
    /// Expression replacing the call, `None` for void callees.
    result: Option<Expr>,
}

fn try_inline(
    program: &Program,
    graph: &CallGraph,
    profile: Option<&Profile>,
    caller: &str,
    callee_name: &str,
    args: &[Expr],
    counter: &mut usize,
) -> Option<Expansion> {
    let id = program.find_function(callee_name)?;
    if graph.in_cycle[id] {
        return None;
    }
    let callee = &program.functions[id];
    if callee.name == caller {
        return None;
    }

    let hot = profile.is_some_and(|p| p.site_is_hot(caller, callee_name));
    let threshold = if hot {
        INLINE_HOT_STMT_THRESHOLD
    } else {
        INLINE_STMT_THRESHOLD
    };
    if stmt_count(&callee.body) > threshold {
        return None;
    }

    let (inner, trailing_return) = split_trailing_return(callee)?;

    let n = *counter;
    *counter += 1;
    let prefix = format!("__inl{n}_");

    // every callee-local name gets the fresh prefix
    let mut names: HashSet<String> = callee.params.iter().map(|p| p.name.clone()).collect();
    for s in &callee.body {
        collect_decl_names(s, &mut names);
    }

    let mut prologue = Vec::new();
    for (param, arg) in callee.params.iter().zip(args) {
        prologue.push(Stmt::Decl {
            name: format!("{prefix}{}", param.name),
            ty: param.ty.clone(),
            init: Some(arg.clone()),
        });
    }
    for stmt in inner {
        let mut copy = stmt.clone();
        rename_stmt(&mut copy, &prefix, &names);
        prologue.push(copy);
    }

    let result = match trailing_return {
        Some(expr) => {
            let mut value = expr.clone();
            rename_expr(&mut value, &prefix, &names);
            let result_name = format!("{prefix}ret");
            prologue.push(Stmt::Decl {
                name: result_name.clone(),
                ty: callee.return_type.clone(),
                init: Some(value),
            });
            Some(Expr::var(&result_name, callee.return_type.clone()))
        }
        None => None,
    };

    log::debug!(
        "inlined `{}` into `{}`{}",
        callee_name,
        caller,
        if hot { " (hot)" } else { "" }
    );
    Some(Expansion { prologue, result })
}

/// Split the body into leading statements and the value of its single
/// trailing return. Bodies with early returns, or value-returning
/// bodies that can fall off the end, are not inlinable.
fn split_trailing_return(callee: &Function) -> Option<(&[Stmt], Option<&Expr>)> {
    match callee.body.last() {
        Some(Stmt::Return(e)) => {
            let inner = &callee.body[..callee.body.len() - 1];
            if inner.iter().any(contains_return) {
                return None;
            }
            match (e, &callee.return_type) {
                (Some(expr), ty) if *ty != Type::Void => Some((inner, Some(expr))),
                (None, Type::Void) => Some((inner, None)),
                _ => None,
            }
        }
        _ if callee.return_type == Type::Void => {
            if callee.body.iter().any(contains_return) {
                return None;
            }
            Some((&callee.body, None))
        }
        _ => None,
    }
}

fn contains_return(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return(_) => true,
        Stmt::If {
            then_body,
            else_body,
            ..
        } => then_body.iter().chain(else_body).any(contains_return),
        Stmt::While { body, .. } | Stmt::For { body, .. } | Stmt::Block(body) => {
            body.iter().any(contains_return)
        }
        _ => false,
    }
}

pub fn stmt_count(stmts: &[Stmt]) -> usize {
    stmts
        .iter()
        .map(|s| {
            1 + match s {
                Stmt::If {
                    then_body,
                    else_body,
                    ..
                } => stmt_count(then_body) + stmt_count(else_body),
                Stmt::While { body, .. } | Stmt::For { body, .. } | Stmt::Block(body) => {
                    stmt_count(body)
                }
                _ => 0,
            }
        })
        .sum()
}

fn collect_decl_names(stmt: &Stmt, out: &mut HashSet<String>) {
    match stmt {
        Stmt::Decl { name, .. } => {
            out.insert(name.clone());
        }
        Stmt::If {
            then_body,
            else_body,
            ..
        } => {
            for s in then_body.iter().chain(else_body) {
                collect_decl_names(s, out);
            }
        }
        Stmt::While { body, .. } | Stmt::Block(body) => {
            for s in body {
                collect_decl_names(s, out);
            }
        }
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_decl_names(init.as_ref(), out);
            }
            for s in body {
                collect_decl_names(s, out);
            }
        }
        _ => {}
    }
}

fn rename_stmt(stmt: &mut Stmt, prefix: &str, names: &HashSet<String>) {
    match stmt {
        Stmt::Decl { name, init, .. } => {
            if names.contains(name) {
                *name = format!("{prefix}{name}");
            }
            if let Some(init) = init {
                rename_expr(init, prefix, names);
            }
        }
        Stmt::Expr(e) | Stmt::Return(Some(e)) => rename_expr(e, prefix, names),
        Stmt::Return(None) => {}
        Stmt::Assign { target, value } => {
            rename_expr(target, prefix, names);
            rename_expr(value, prefix, names);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            rename_expr(cond, prefix, names);
            for s in then_body.iter_mut().chain(else_body) {
                rename_stmt(s, prefix, names);
            }
        }
        Stmt::While { cond, body } => {
            rename_expr(cond, prefix, names);
            for s in body {
                rename_stmt(s, prefix, names);
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
                rename_stmt(init.as_mut(), prefix, names);
            }
            if let Some(cond) = cond {
                rename_expr(cond, prefix, names);
            }
            if let Some(step) = step {
                rename_stmt(step.as_mut(), prefix, names);
            }
            for s in body {
                rename_stmt(s, prefix, names);
            }
        }
        Stmt::Block(body) => {
            for s in body {
                rename_stmt(s, prefix, names);
            }
        }
    }
}

fn rename_expr(expr: &mut Expr, prefix: &str, names: &HashSet<String>) {
    match &mut expr.kind {
        ExprKind::Var(name) => {
            if names.contains(name) {
                *name = format!("{prefix}{name}");
            }
        }
        ExprKind::Unary { operand, .. } | ExprKind::Cast(operand) => {
            rename_expr(operand, prefix, names);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            rename_expr(lhs, prefix, names);
            rename_expr(rhs, prefix, names);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                rename_expr(a, prefix, names);
            }
        }
        ExprKind::Index { base, index } => {
            rename_expr(base, prefix, names);
            rename_expr(index, prefix, names);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            rename_expr(base, prefix, names);
        }
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            rename_expr(target, prefix, names);
            rename_expr(value, prefix, names);
        }
        _ => {}
    }
}

/// The full inlining pass: repeated sweeps with call-graph rebuilds in
/// between, so transitively exposed candidates get their turn, bounded
/// to keep expansion finite.
pub fn run(
    program: &mut Program,
    profile: Option<&Profile>,
) -> Result<bool, crate::error::OptError> {
    let mut counter = 0;
    let mut any = false;
    for _ in 0..MAX_INLINE_ROUNDS {
        let graph = CallGraph::build(program)?;
        if !inline_functions(program, &graph, profile, &mut counter) {
            break;
        }
        any = true;
        for func in &mut program.functions {
            local::optimize_function(func);
        }
    }
    Ok(any)
}
