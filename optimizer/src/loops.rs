//! Recognition of counted loops: constant initial value, a
//! `<`/`<=`/`!=` comparison against a constant bound, and a constant
//! positive step. `for` loops carry all three clauses themselves; a
//! counted `while` loop takes its initial value from the statement
//! preceding it and its step from the last statement of its body.
//! Shared by the unroller and the vectorizer.

use model::{BinaryOp, Expr, ExprKind, Stmt, Type};

#[derive(Debug, Clone, PartialEq)]
pub struct LoopInfo {
    pub var: String,
    /// Static type of the induction variable.
    pub ty: Type,
    pub start: i64,
    pub step: i64,
    pub trip_count: i64,
    /// Whether the induction variable is declared by the loop itself
    /// (as opposed to assigning a pre-existing variable).
    pub declared: bool,
}

impl LoopInfo {
    /// Value of the induction variable after the loop exits.
    pub fn exit_value(&self) -> i64 {
        self.start + self.trip_count * self.step
    }
}

pub fn analyze_for(init: Option<&Stmt>, cond: Option<&Expr>, step: Option<&Stmt>) -> Option<LoopInfo> {
    let (var, ty, start, declared) = init_parts(init?)?;
    let (cmp, bound) = cond_parts(cond?, &var)?;

    let step_by = step_amount(step?, &var)?;
    if step_by <= 0 {
        return None;
    }

    let trip_count = trip_count(cmp, start, bound, step_by)?;
    Some(LoopInfo {
        var,
        ty,
        start,
        step: step_by,
        trip_count,
        declared,
    })
}

/// Recognize a counted `while` loop. `prev` is the statement
/// immediately before the loop in the enclosing block and must set the
/// induction variable to a constant; the last body statement must step
/// it by exactly 1.
pub fn analyze_while(prev: Option<&Stmt>, cond: &Expr, body: &[Stmt]) -> Option<LoopInfo> {
    // need at least one payload statement ahead of the increment
    if body.len() < 2 {
        return None;
    }
    let (var, ty, start, declared) = init_parts(prev?)?;
    let (cmp, bound) = cond_parts(cond, &var)?;
    if step_amount(body.last()?, &var)? != 1 {
        return None;
    }
    let trip_count = trip_count(cmp, start, bound, 1)?;
    if trip_count == 0 {
        return None;
    }
    Some(LoopInfo {
        var,
        ty,
        start,
        step: 1,
        trip_count,
        declared,
    })
}

fn init_parts(init: &Stmt) -> Option<(String, Type, i64, bool)> {
    match init {
        Stmt::Decl {
            name,
            ty,
            init: Some(e),
        } => Some((name.clone(), ty.clone(), int_lit(e)?, true)),
        Stmt::Assign { target, value } => match &target.kind {
            ExprKind::Var(name) => {
                Some((name.clone(), target.ty.clone(), int_lit(value)?, false))
            }
            _ => None,
        },
        _ => None,
    }
}

fn cond_parts(cond: &Expr, var: &str) -> Option<(BinaryOp, i64)> {
    match &cond.kind {
        ExprKind::Binary { op, lhs, rhs } => match (&lhs.kind, op) {
            (ExprKind::Var(name), BinaryOp::Lt | BinaryOp::Le | BinaryOp::Ne) if name == var => {
                Some((*op, int_lit(rhs)?))
            }
            _ => None,
        },
        _ => None,
    }
}

fn trip_count(cmp: BinaryOp, start: i64, bound: i64, step_by: i64) -> Option<i64> {
    let n = match cmp {
        BinaryOp::Lt => ceil_div(bound - start, step_by),
        BinaryOp::Le => ceil_div(bound + 1 - start, step_by),
        // i != bound only terminates if the steps land exactly on it
        BinaryOp::Ne => {
            if bound >= start && (bound - start) % step_by == 0 {
                (bound - start) / step_by
            } else {
                return None;
            }
        }
        _ => unreachable!(),
    };
    Some(n.max(0))
}

fn int_lit(e: &Expr) -> Option<i64> {
    match e.kind {
        ExprKind::IntLit(v) => Some(v),
        _ => None,
    }
}

fn ceil_div(n: i64, d: i64) -> i64 {
    if n <= 0 { 0 } else { (n + d - 1) / d }
}

/// Match `i += k`, `i = i + k` and the expression-statement forms.
fn step_amount(step: &Stmt, var: &str) -> Option<i64> {
    let expr = match step {
        Stmt::Expr(e) => e,
        Stmt::Assign { target, value } => {
            return match (&target.kind, &value.kind) {
                (
                    ExprKind::Var(t),
                    ExprKind::Binary {
                        op: BinaryOp::Add,
                        lhs,
                        rhs,
                    },
                ) if t == var => match (&lhs.kind, &rhs.kind) {
                    (ExprKind::Var(l), ExprKind::IntLit(k)) if l == var => Some(*k),
                    (ExprKind::IntLit(k), ExprKind::Var(r)) if r == var => Some(*k),
                    _ => None,
                },
                _ => None,
            };
        }
        _ => return None,
    };
    match &expr.kind {
        ExprKind::CompoundAssign {
            op: BinaryOp::Add,
            target,
            value,
        } => match (&target.kind, &value.kind) {
            (ExprKind::Var(t), ExprKind::IntLit(k)) if t == var => Some(*k),
            _ => None,
        },
        ExprKind::Assign { target, value } => {
            let fake = Stmt::Assign {
                target: (**target).clone(),
                value: (**value).clone(),
            };
            step_amount(&fake, var)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Type;

    fn decl_init(name: &str, v: i64) -> Stmt {
        Stmt::Decl {
            name: name.to_string(),
            ty: Type::I32,
            init: Some(Expr::int(v, Type::I32)),
        }
    }

    fn cond(op: BinaryOp, name: &str, bound: i64) -> Expr {
        Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(Expr::var(name, Type::I32)),
                rhs: Box::new(Expr::int(bound, Type::I32)),
            },
            Type::I32,
        )
    }

    fn inc(name: &str, k: i64) -> Stmt {
        Stmt::Expr(Expr::new(
            ExprKind::CompoundAssign {
                op: BinaryOp::Add,
                target: Box::new(Expr::var(name, Type::I32)),
                value: Box::new(Expr::int(k, Type::I32)),
            },
            Type::I32,
        ))
    }

    #[test]
    fn canonical_counted_loop() {
        let info = analyze_for(
            Some(&decl_init("i", 0)),
            Some(&cond(BinaryOp::Lt, "i", 10)),
            Some(&inc("i", 1)),
        )
        .unwrap();
        assert_eq!(info.var, "i");
        assert_eq!(info.trip_count, 10);
        assert_eq!(info.exit_value(), 10);
        assert!(info.declared);
    }

    #[test]
    fn inclusive_bound_and_wider_step() {
        let info = analyze_for(
            Some(&decl_init("i", 2)),
            Some(&cond(BinaryOp::Le, "i", 10)),
            Some(&inc("i", 3)),
        )
        .unwrap();
        // 2, 5, 8 (11 > 10)
        assert_eq!(info.trip_count, 3);
        assert_eq!(info.exit_value(), 11);
    }

    #[test]
    fn not_equal_requires_exact_landing() {
        let hit = analyze_for(
            Some(&decl_init("i", 0)),
            Some(&cond(BinaryOp::Ne, "i", 8)),
            Some(&inc("i", 2)),
        );
        assert_eq!(hit.unwrap().trip_count, 4);

        let miss = analyze_for(
            Some(&decl_init("i", 0)),
            Some(&cond(BinaryOp::Ne, "i", 7)),
            Some(&inc("i", 2)),
        );
        assert!(miss.is_none());
    }

    #[test]
    fn assignment_init_and_step_forms() {
        let init = Stmt::Assign {
            target: Expr::var("i", Type::I32),
            value: Expr::int(0, Type::I32),
        };
        let step = Stmt::Assign {
            target: Expr::var("i", Type::I32),
            value: Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Add,
                    lhs: Box::new(Expr::var("i", Type::I32)),
                    rhs: Box::new(Expr::int(1, Type::I32)),
                },
                Type::I32,
            ),
        };
        let info = analyze_for(Some(&init), Some(&cond(BinaryOp::Lt, "i", 4)), Some(&step)).unwrap();
        assert_eq!(info.trip_count, 4);
        assert!(!info.declared);
    }

    #[test]
    fn non_constant_pieces_rejected() {
        let init = Stmt::Decl {
            name: "i".to_string(),
            ty: Type::I32,
            init: Some(Expr::var("n", Type::I32)),
        };
        assert!(analyze_for(
            Some(&init),
            Some(&cond(BinaryOp::Lt, "i", 10)),
            Some(&inc("i", 1))
        )
        .is_none());
        // decreasing step never matches
        assert!(analyze_for(
            Some(&decl_init("i", 0)),
            Some(&cond(BinaryOp::Lt, "i", 10)),
            Some(&inc("i", -1))
        )
        .is_none());
    }

    #[test]
    fn while_loop_with_preceding_declaration() {
        // int i = 0; while (i < 6) { sum += i; i += 1; }
        let body = vec![inc("sum", 1), inc("i", 1)];
        let info = analyze_while(
            Some(&decl_init("i", 0)),
            &cond(BinaryOp::Lt, "i", 6),
            &body,
        )
        .unwrap();
        assert_eq!(info.var, "i");
        assert_eq!(info.trip_count, 6);
        assert_eq!(info.step, 1);
        assert!(info.declared);
    }

    #[test]
    fn while_loop_with_preceding_assignment() {
        let init = Stmt::Assign {
            target: Expr::var("i", Type::I64),
            value: Expr::int(2, Type::I64),
        };
        let body = vec![inc("sum", 1), inc("i", 1)];
        let info = analyze_while(Some(&init), &cond(BinaryOp::Le, "i", 5), &body).unwrap();
        assert_eq!(info.trip_count, 4);
        assert_eq!(info.ty, Type::I64);
        assert!(!info.declared);
    }

    #[test]
    fn while_loop_needs_init_step_and_iterations() {
        let body = vec![inc("sum", 1), inc("i", 1)];
        // unrelated preceding statement
        assert!(analyze_while(
            Some(&decl_init("j", 0)),
            &cond(BinaryOp::Lt, "i", 6),
            &body
        )
        .is_none());
        // step wider than 1
        let wide = vec![inc("sum", 1), inc("i", 2)];
        assert!(analyze_while(
            Some(&decl_init("i", 0)),
            &cond(BinaryOp::Lt, "i", 6),
            &wide
        )
        .is_none());
        // increment alone is not a loop body
        assert!(analyze_while(
            Some(&decl_init("i", 0)),
            &cond(BinaryOp::Lt, "i", 6),
            &[inc("i", 1)]
        )
        .is_none());
        // zero iterations
        assert!(analyze_while(
            Some(&decl_init("i", 6)),
            &cond(BinaryOp::Lt, "i", 6),
            &body
        )
        .is_none());
    }
}
