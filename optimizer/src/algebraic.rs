//! Algebraic identity simplification. Every rewrite here must be safe
//! for any runtime value of the non-constant operand; in particular
//! float multiply-by-zero is never folded (NaN and -0.0 would change),
//! and rewrites that discard an operand require it to be free of side
//! effects.

use model::{BinaryOp, ConstVal, Expr, ExprKind, Type, UnaryOp};

use crate::utils::truncate;

/// Try to simplify `lhs op rhs`. Returns the replacement expression.
pub fn simplify_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, ty: &Type) -> Option<Expr> {
    match op {
        BinaryOp::Add => simplify_add(lhs, rhs),
        BinaryOp::Sub => simplify_sub(lhs, rhs),
        BinaryOp::Mul => simplify_mul(lhs, rhs, ty),
        BinaryOp::Div => simplify_div(lhs, rhs, ty),
        BinaryOp::Mod => simplify_mod(lhs, rhs, ty),
        BinaryOp::BitAnd => simplify_and(lhs, rhs, ty),
        BinaryOp::BitOr => simplify_or(lhs, rhs),
        BinaryOp::BitXor => simplify_xor(lhs, rhs),
        BinaryOp::Shl | BinaryOp::Shr => simplify_shift(lhs, rhs),
        _ => None,
    }
}

fn is_int(expr: &Expr, v: i64) -> bool {
    matches!(expr.kind, ExprKind::IntLit(n) if n == v)
}

// x + 0, 0 + x
fn simplify_add(lhs: &Expr, rhs: &Expr) -> Option<Expr> {
    if is_int(rhs, 0) {
        return Some(lhs.clone());
    }
    if is_int(lhs, 0) {
        return Some(rhs.clone());
    }
    None
}

// x - 0
fn simplify_sub(lhs: &Expr, rhs: &Expr) -> Option<Expr> {
    if is_int(rhs, 0) {
        return Some(lhs.clone());
    }
    None
}

// x * 1, 1 * x; x * 0 for side-effect-free integer x only
fn simplify_mul(lhs: &Expr, rhs: &Expr, ty: &Type) -> Option<Expr> {
    if is_int(rhs, 1) {
        return Some(lhs.clone());
    }
    if is_int(lhs, 1) {
        return Some(rhs.clone());
    }
    if ty.is_integer() {
        if is_int(rhs, 0) && !lhs.has_side_effects() {
            return Some(Expr::int(0, ty.clone()));
        }
        if is_int(lhs, 0) && !rhs.has_side_effects() {
            return Some(Expr::int(0, ty.clone()));
        }
    }
    None
}

// x / 1; 0 / x for side-effect-free integer x
fn simplify_div(lhs: &Expr, rhs: &Expr, ty: &Type) -> Option<Expr> {
    if is_int(rhs, 1) {
        return Some(lhs.clone());
    }
    if ty.is_integer() && is_int(lhs, 0) && !rhs.has_side_effects() {
        return Some(Expr::int(0, ty.clone()));
    }
    None
}

// x % 1 is always zero
fn simplify_mod(lhs: &Expr, rhs: &Expr, ty: &Type) -> Option<Expr> {
    if ty.is_integer() && is_int(rhs, 1) && !lhs.has_side_effects() {
        return Some(Expr::int(0, ty.clone()));
    }
    None
}

// x & 0, x & all-ones
fn simplify_and(lhs: &Expr, rhs: &Expr, ty: &Type) -> Option<Expr> {
    let ones = truncate(ty, -1);
    if is_int(rhs, 0) && !lhs.has_side_effects() {
        return Some(Expr::int(0, ty.clone()));
    }
    if is_int(lhs, 0) && !rhs.has_side_effects() {
        return Some(Expr::int(0, ty.clone()));
    }
    if is_int(rhs, ones) {
        return Some(lhs.clone());
    }
    if is_int(lhs, ones) {
        return Some(rhs.clone());
    }
    None
}

// x | 0, 0 | x
fn simplify_or(lhs: &Expr, rhs: &Expr) -> Option<Expr> {
    if is_int(rhs, 0) {
        return Some(lhs.clone());
    }
    if is_int(lhs, 0) {
        return Some(rhs.clone());
    }
    None
}

// x ^ 0, 0 ^ x
fn simplify_xor(lhs: &Expr, rhs: &Expr) -> Option<Expr> {
    if is_int(rhs, 0) {
        return Some(lhs.clone());
    }
    if is_int(lhs, 0) {
        return Some(rhs.clone());
    }
    None
}

// x << 0, x >> 0
fn simplify_shift(lhs: &Expr, rhs: &Expr) -> Option<Expr> {
    if is_int(rhs, 0) {
        return Some(lhs.clone());
    }
    None
}

/// Double negation: `-(-x)` and `~~x` collapse to `x`.
pub fn simplify_unary(op: UnaryOp, operand: &Expr) -> Option<Expr> {
    if let ExprKind::Unary {
        op: inner_op,
        operand: inner,
    } = &operand.kind
    {
        if op == *inner_op && matches!(op, UnaryOp::Neg | UnaryOp::BitNot) {
            return Some((**inner).clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, ty: Type) -> Expr {
        Expr::var(name, ty)
    }

    #[test]
    fn additive_identities() {
        let x = var("x", Type::I32);
        let zero = Expr::int(0, Type::I32);
        assert_eq!(
            simplify_binary(BinaryOp::Add, &x, &zero, &Type::I32),
            Some(x.clone())
        );
        assert_eq!(
            simplify_binary(BinaryOp::Add, &zero, &x, &Type::I32),
            Some(x.clone())
        );
        assert_eq!(
            simplify_binary(BinaryOp::Sub, &x, &zero, &Type::I32),
            Some(x.clone())
        );
        // 0 - x is a real negation, not an identity
        assert_eq!(simplify_binary(BinaryOp::Sub, &zero, &x, &Type::I32), None);
    }

    #[test]
    fn multiplicative_identities() {
        let x = var("x", Type::I32);
        let one = Expr::int(1, Type::I32);
        let zero = Expr::int(0, Type::I32);
        assert_eq!(
            simplify_binary(BinaryOp::Mul, &x, &one, &Type::I32),
            Some(x.clone())
        );
        assert_eq!(
            simplify_binary(BinaryOp::Div, &x, &one, &Type::I32),
            Some(x.clone())
        );
        assert_eq!(
            simplify_binary(BinaryOp::Mul, &x, &zero, &Type::I32),
            Some(Expr::int(0, Type::I32))
        );
    }

    #[test]
    fn float_mul_by_zero_kept() {
        let x = var("x", Type::F64);
        let zero = Expr::float(0.0, Type::F64);
        assert_eq!(simplify_binary(BinaryOp::Mul, &x, &zero, &Type::F64), None);
        // float literals never match the integer identity patterns
        assert_eq!(
            simplify_binary(BinaryOp::Mul, &x, &Expr::float(1.0, Type::F64), &Type::F64),
            None
        );
    }

    #[test]
    fn effectful_operand_not_discarded() {
        let call = Expr::new(
            ExprKind::Call {
                callee: "f".to_string(),
                args: vec![],
            },
            Type::I32,
        );
        let zero = Expr::int(0, Type::I32);
        assert_eq!(simplify_binary(BinaryOp::Mul, &call, &zero, &Type::I32), None);
        // keeping the operand is fine
        assert_eq!(
            simplify_binary(BinaryOp::Add, &call, &zero, &Type::I32),
            Some(call.clone())
        );
    }

    #[test]
    fn bitwise_identities() {
        let x = var("x", Type::U8);
        let zero = Expr::int(0, Type::U8);
        assert_eq!(
            simplify_binary(BinaryOp::BitOr, &x, &zero, &Type::U8),
            Some(x.clone())
        );
        assert_eq!(
            simplify_binary(BinaryOp::BitXor, &zero, &x, &Type::U8),
            Some(x.clone())
        );
        assert_eq!(
            simplify_binary(BinaryOp::Shl, &x, &zero, &Type::U8),
            Some(x.clone())
        );
        // all-ones mask at the static width
        let ones = Expr::int(255, Type::U8);
        assert_eq!(
            simplify_binary(BinaryOp::BitAnd, &x, &ones, &Type::U8),
            Some(x.clone())
        );
    }

    #[test]
    fn double_negation() {
        let x = var("x", Type::I32);
        let neg = Expr::new(
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(x.clone()),
            },
            Type::I32,
        );
        assert_eq!(simplify_unary(UnaryOp::Neg, &neg), Some(x.clone()));
        assert_eq!(simplify_unary(UnaryOp::BitNot, &neg), None);
    }
}
