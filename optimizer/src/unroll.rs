//! Full unrolling of counted loops with small constant trip counts.
//! The body is replicated once per iteration with the induction
//! variable replaced by its concrete value; the local optimizer then
//! folds what the replication exposed. Both `for` loops and counted
//! `while` loops (initial value in the preceding statement, increment
//! as the last body statement) are handled.

use std::collections::HashSet;

use model::{Expr, Function, Stmt};

use crate::local;
use crate::loops::{analyze_for, analyze_while, LoopInfo};

pub const MAX_UNROLL_TRIP_COUNT: i64 = 8;

/// Unroll every eligible loop in the function. Returns true if
/// anything changed; the caller re-runs the local optimizer then.
pub fn unroll_loops(func: &mut Function) -> bool {
    let mut changed = false;
    unroll_block(&mut func.body, &mut changed);
    if changed {
        log::debug!("unrolled loops in `{}`", func.name);
    }
    changed
}

fn unroll_block(stmts: &mut Vec<Stmt>, changed: &mut bool) {
    let old = std::mem::take(stmts);
    for mut stmt in old {
        match &mut stmt {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                unroll_block(then_body, changed);
                unroll_block(else_body, changed);
            }
            Stmt::Block(body) => {
                unroll_block(body, changed);
            }
            Stmt::While { cond, body } => {
                unroll_block(body, changed);
                // the preceding (already processed) statement supplies
                // the initial value
                let info = analyze_while(stmts.last(), cond, body);
                if let Some(info) = info {
                    let payload = &body[..body.len() - 1];
                    if eligible(&info, payload) {
                        stmts.extend(expand(&info, payload, true));
                        *changed = true;
                        continue;
                    }
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                vec,
            } if vec.is_none() => {
                unroll_block(body, changed);
                let info = analyze_for(
                    init.as_deref(),
                    cond.as_ref(),
                    step.as_deref(),
                );
                if let Some(info) = info {
                    if eligible(&info, body) {
                        stmts.extend(expand(&info, body, !info.declared));
                        *changed = true;
                        continue;
                    }
                }
            }
            Stmt::For { body, .. } => {
                unroll_block(body, changed);
            }
            _ => {}
        }
        stmts.push(stmt);
    }
}

fn eligible(info: &LoopInfo, body: &[Stmt]) -> bool {
    if info.trip_count > MAX_UNROLL_TRIP_COUNT {
        return false;
    }
    // a body that writes the induction variable has its own ideas
    // about the iteration sequence
    let mut writes = HashSet::new();
    for s in body {
        local::collect_stmt_writes(s, &mut writes);
    }
    !writes.contains(&info.var)
}

/// One block per iteration, so body-local declarations keep their
/// scope. When the induction variable outlives the loop it is assigned
/// its exit value afterwards.
fn expand(info: &LoopInfo, body: &[Stmt], assign_exit: bool) -> Vec<Stmt> {
    let mut out = Vec::new();
    for iter in 0..info.trip_count {
        let value = Expr::int(info.start + iter * info.step, info.ty.clone());
        let mut copy: Vec<Stmt> = body.to_vec();
        for stmt in &mut copy {
            let mut subbed = false;
            local::substitute_var_stmt(stmt, &info.var, &value, &mut subbed);
        }
        out.push(Stmt::Block(copy));
    }
    if assign_exit {
        out.push(Stmt::Assign {
            target: Expr::var(&info.var, info.ty.clone()),
            value: Expr::int(info.exit_value(), info.ty.clone()),
        });
    }
    out
}
