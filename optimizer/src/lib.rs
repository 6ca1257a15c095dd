//! Mid-end optimizer over the front end's tree representation.
//!
//! Passes are grouped by the level that enables them:
//! - O1: per-function simplification (folding, algebraic identities,
//!   strength reduction, assertion facts, dead code in straight-line
//!   control flow)
//! - O2: interprocedural propagation and pruning over the call graph
//! - O3: inlining, loop unrolling and vectorization
//!
//! Levels are cumulative. Each pass leaves a valid program behind, so
//! the pipeline can stop after any of them.

pub mod algebraic;
pub mod callgraph;
pub mod error;
pub mod facts;
pub mod folding;
pub mod inline;
pub mod ipo;
pub mod local;
pub mod loops;
pub mod strength;
pub mod unroll;
pub mod utils;
pub mod vectorize;

pub use error::OptError;

use model::{Expr, ExprKind, Program, SimdProfile, Stmt};
use pgo::Profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    O3,
}

impl OptLevel {
    pub fn from_number(n: u8) -> Option<OptLevel> {
        match n {
            0 => Some(OptLevel::O0),
            1 => Some(OptLevel::O1),
            2 => Some(OptLevel::O2),
            3 => Some(OptLevel::O3),
            _ => None,
        }
    }
}

pub struct OptOptions {
    pub level: OptLevel,
    pub simd: SimdProfile,
    pub profile: Option<Profile>,
}

impl Default for OptOptions {
    fn default() -> Self {
        OptOptions {
            level: OptLevel::O0,
            simd: SimdProfile::default(),
            profile: None,
        }
    }
}

/// Run the pipeline for `opts.level` over the whole program in place.
pub fn optimize(program: &mut Program, opts: &OptOptions) -> Result<(), OptError> {
    if opts.level < OptLevel::O1 {
        return Ok(());
    }
    for func in &mut program.functions {
        model::mark_param_uses(func);
        local::optimize_function(func);
    }

    if opts.level >= OptLevel::O2 {
        ipo::run(program)?;
    }

    if opts.level >= OptLevel::O3 {
        if inline::run(program, opts.profile.as_ref())? {
            // inlined bodies open new interprocedural opportunities
            ipo::run(program)?;
        }
        for func in &mut program.functions {
            if unroll::unroll_loops(func) {
                local::optimize_function(func);
            }
            vectorize::vectorize_function(func, opts.simd);
        }
    }
    Ok(())
}

/// Strip every derived constant annotation. Re-running the local
/// optimizer afterwards reproduces them.
pub fn purge_annotations(program: &mut Program) {
    for func in &mut program.functions {
        for stmt in &mut func.body {
            purge_stmt(stmt);
        }
    }
}

fn purge_stmt(stmt: &mut Stmt) {
    match stmt {
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                purge_expr(init);
            }
        }
        Stmt::Expr(e) | Stmt::Return(Some(e)) => purge_expr(e),
        Stmt::Return(None) => {}
        Stmt::Assign { target, value } => {
            purge_expr(target);
            purge_expr(value);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            purge_expr(cond);
            for s in then_body.iter_mut().chain(else_body) {
                purge_stmt(s);
            }
        }
        Stmt::While { cond, body } => {
            purge_expr(cond);
            for s in body {
                purge_stmt(s);
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
                purge_stmt(init.as_mut());
            }
            if let Some(cond) = cond {
                purge_expr(cond);
            }
            if let Some(step) = step {
                purge_stmt(step.as_mut());
            }
            for s in body {
                purge_stmt(s);
            }
        }
        Stmt::Block(body) => {
            for s in body {
                purge_stmt(s);
            }
        }
    }
}

fn purge_expr(expr: &mut Expr) {
    expr.konst = None;
    match &mut expr.kind {
        ExprKind::Unary { operand, .. } | ExprKind::Cast(operand) => purge_expr(operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            purge_expr(lhs);
            purge_expr(rhs);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                purge_expr(a);
            }
        }
        ExprKind::Index { base, index } => {
            purge_expr(base);
            purge_expr(index);
        }
        ExprKind::Member { base, .. } | ExprKind::PtrMember { base, .. } => purge_expr(base),
        ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
            purge_expr(target);
            purge_expr(value);
        }
        _ => {}
    }
}
