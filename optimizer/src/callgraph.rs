//! Derived call-graph view of a program: call sites, caller/callee
//! adjacency by function index, and cycle marks. Always rebuilt from
//! scratch after a structural pass; never patched incrementally, so it
//! cannot drift from the program it was derived from.

use std::collections::BTreeSet;

use model::{Expr, ExprKind, FuncId, Program, Stmt};

use crate::error::OptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub caller: FuncId,
    pub callee: FuncId,
}

#[derive(Debug, Clone)]
pub struct CallGraph {
    pub sites: Vec<CallSite>,
    /// Outgoing edges per function, deduplicated.
    pub callees: Vec<BTreeSet<FuncId>>,
    /// Incoming edges per function.
    pub callers: Vec<BTreeSet<FuncId>>,
    /// Number of call sites targeting each function.
    pub site_count: Vec<usize>,
    /// Functions on some call cycle, including direct self-recursion.
    pub in_cycle: Vec<bool>,
}

impl CallGraph {
    pub fn build(program: &Program) -> Result<CallGraph, OptError> {
        let n = program.functions.len();
        let mut graph = CallGraph {
            sites: Vec::new(),
            callees: vec![BTreeSet::new(); n],
            callers: vec![BTreeSet::new(); n],
            site_count: vec![0; n],
            in_cycle: vec![false; n],
        };

        for (caller, func) in program.functions.iter().enumerate() {
            for stmt in &func.body {
                collect_stmt(program, caller, stmt, &mut graph)?;
            }
        }

        for id in 0..n {
            graph.in_cycle[id] = graph.reaches(id, id);
        }
        Ok(graph)
    }

    /// Whether `to` is reachable from `from` through one or more edges.
    fn reaches(&self, from: FuncId, to: FuncId) -> bool {
        let mut seen = vec![false; self.callees.len()];
        let mut stack: Vec<FuncId> = self.callees[from].iter().copied().collect();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen[id] {
                seen[id] = true;
                stack.extend(self.callees[id].iter().copied());
            }
        }
        false
    }

    pub fn has_callers(&self, id: FuncId) -> bool {
        self.site_count[id] > 0
    }
}

fn collect_stmt(
    program: &Program,
    caller: FuncId,
    stmt: &Stmt,
    graph: &mut CallGraph,
) -> Result<(), OptError> {
    match stmt {
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                collect_expr(program, caller, init, graph)?;
            }
        }
        Stmt::Expr(e) | Stmt::Return(Some(e)) => collect_expr(program, caller, e, graph)?,
        Stmt::Return(None) => {}
        Stmt::Assign { target, value } => {
            collect_expr(program, caller, target, graph)?;
            collect_expr(program, caller, value, graph)?;
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            collect_expr(program, caller, cond, graph)?;
            for s in then_body.iter().chain(else_body) {
                collect_stmt(program, caller, s, graph)?;
            }
        }
        Stmt::While { cond, body } => {
            collect_expr(program, caller, cond, graph)?;
            for s in body {
                collect_stmt(program, caller, s, graph)?;
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
                collect_stmt(program, caller, init, graph)?;
            }
            if let Some(cond) = cond {
                collect_expr(program, caller, cond, graph)?;
            }
            if let Some(step) = step {
                collect_stmt(program, caller, step, graph)?;
            }
            for s in body {
                collect_stmt(program, caller, s, graph)?;
            }
        }
        Stmt::Block(body) => {
            for s in body {
                collect_stmt(program, caller, s, graph)?;
            }
        }
    }
    Ok(())
}

fn collect_expr(
    program: &Program,
    caller: FuncId,
    expr: &Expr,
    graph: &mut CallGraph,
) -> Result<(), OptError> {
    if let ExprKind::Call { callee, args } = &expr.kind {
        // assertions are a language construct, externs are opaque
        if callee != "assert" && !program.externs.contains(callee) {
            let Some(id) = program.find_function(callee) else {
                return Err(OptError::UnknownCallee {
                    caller: program.functions[caller].name.clone(),
                    callee: callee.clone(),
                });
            };
            let expected = program.functions[id].params.len();
            if args.len() != expected {
                return Err(OptError::ArityMismatch {
                    caller: program.functions[caller].name.clone(),
                    callee: callee.clone(),
                    expected,
                    got: args.len(),
                });
            }
            graph.sites.push(CallSite { caller, callee: id });
            graph.callees[caller].insert(id);
            graph.callers[id].insert(caller);
            graph.site_count[id] += 1;
        }
    }
    match &expr.kind {
        ExprKind::Unary { operand, .. } | ExprKind::Cast(operand) => {
            collect_expr(program, caller, operand, graph)?;
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_expr(program, caller, lhs, graph)?;
            collect_expr(program, caller, rhs, graph)?;
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                collect_expr(program, caller, a, graph)?;
            }
        }
        ExprKind::Index { base, index } => {
            collect_expr(program, caller, base, graph)?;
            collect_expr(program, caller, index, graph)?;
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => {
            collect_expr(program, caller, base, graph)?;
        }
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            collect_expr(program, caller, target, graph)?;
            collect_expr(program, caller, value, graph)?;
        }
        _ => {}
    }
    Ok(())
}
