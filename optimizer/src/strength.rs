//! Strength reduction of multiply, divide and modulo by power-of-two
//! constants. Multiplication reduces for any integer type; division and
//! modulo shift only when the dividend is provably non-negative
//! (unsigned type, or a non-negativity fact from an assertion), since
//! the shift form rounds toward negative infinity where C division
//! rounds toward zero. Unguarded signed operands are never reduced.

use model::{BinaryOp, Expr, ExprKind, Type};

use crate::facts::FactEnv;
use crate::utils::{is_power_of_two, log2};

/// Try to reduce `lhs op rhs` to a cheaper form.
pub fn reduce_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ty: &Type,
    env: &FactEnv,
) -> Option<Expr> {
    if !ty.is_integer() {
        return None;
    }
    match op {
        BinaryOp::Mul => reduce_mul(lhs, rhs, ty),
        BinaryOp::Div => reduce_div(lhs, rhs, ty, env),
        BinaryOp::Mod => reduce_mod(lhs, rhs, ty, env),
        _ => None,
    }
}

fn pow2_of(expr: &Expr) -> Option<i64> {
    match expr.kind {
        ExprKind::IntLit(n) if is_power_of_two(n) => Some(n),
        _ => None,
    }
}

fn nonneg(expr: &Expr, ty: &Type, env: &FactEnv) -> bool {
    if ty.is_unsigned() {
        return true;
    }
    match &expr.kind {
        ExprKind::IntLit(v) => *v >= 0,
        ExprKind::Var(name) => env.is_nonneg(name),
        _ => false,
    }
}

// x * 2^n  =>  x << n   (either operand order)
fn reduce_mul(lhs: &Expr, rhs: &Expr, ty: &Type) -> Option<Expr> {
    let (var, k) = if let Some(k) = pow2_of(rhs) {
        (lhs, k)
    } else if let Some(k) = pow2_of(lhs) {
        (rhs, k)
    } else {
        return None;
    };
    // x * 1 is the algebraic pass's job
    if k == 1 {
        return None;
    }
    Some(shift_expr(BinaryOp::Shl, var, k, ty))
}

// x / 2^n  =>  x >> n   when x cannot be negative
fn reduce_div(lhs: &Expr, rhs: &Expr, ty: &Type, env: &FactEnv) -> Option<Expr> {
    let k = pow2_of(rhs)?;
    if k == 1 || !nonneg(lhs, ty, env) {
        return None;
    }
    Some(shift_expr(BinaryOp::Shr, lhs, k, ty))
}

// x % 2^n  =>  x & (2^n - 1)   when x cannot be negative
fn reduce_mod(lhs: &Expr, rhs: &Expr, ty: &Type, env: &FactEnv) -> Option<Expr> {
    let k = pow2_of(rhs)?;
    if !nonneg(lhs, ty, env) {
        return None;
    }
    Some(Expr::new(
        ExprKind::Binary {
            op: BinaryOp::BitAnd,
            lhs: Box::new(lhs.clone()),
            rhs: Box::new(Expr::int(k - 1, ty.clone())),
        },
        ty.clone(),
    ))
}

fn shift_expr(op: BinaryOp, operand: &Expr, k: i64, ty: &Type) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(operand.clone()),
            rhs: Box::new(Expr::int(i64::from(log2(k)), ty.clone())),
        },
        ty.clone(),
    )
}
