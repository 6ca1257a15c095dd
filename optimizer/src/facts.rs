//! Facts derived from runtime assertions.
//!
//! An `assert(x == 42)` makes `x` substitutable by `42` until the next
//! assignment to `x`; an `assert(x >= 0 && x <= n)` or the power-of-two
//! form `assert((x & (x - 1)) == 0)` proves `x` non-negative, which is
//! enough to permit the unsigned-only strength reductions on a
//! signed-typed variable without substituting a value.

use std::collections::{HashMap, HashSet};

use model::{BinaryOp, ConstVal, Expr, ExprKind};

#[derive(Debug, Clone, Default)]
pub struct FactEnv {
    known: HashMap<String, ConstVal>,
    nonneg: HashSet<String>,
}

impl FactEnv {
    pub fn known(&self, name: &str) -> Option<ConstVal> {
        self.known.get(name).copied()
    }

    pub fn is_nonneg(&self, name: &str) -> bool {
        if self.nonneg.contains(name) {
            return true;
        }
        matches!(self.known.get(name), Some(ConstVal::Int(v)) if *v >= 0)
    }

    /// A declaration or assignment gave `name` a literal value.
    pub fn record_known(&mut self, name: &str, value: ConstVal) {
        self.known.insert(name.to_string(), value);
        self.nonneg.remove(name);
    }

    /// Drop everything known about `name` (it was assigned).
    pub fn invalidate(&mut self, name: &str) {
        self.known.remove(name);
        self.nonneg.remove(name);
    }

    pub fn clear(&mut self) {
        self.known.clear();
        self.nonneg.clear();
    }

    /// Record what an asserted condition proves. Conjunctions are taken
    /// apart; unrecognized shapes prove nothing.
    pub fn record_assert(&mut self, cond: &Expr) {
        match &cond.kind {
            ExprKind::Binary {
                op: BinaryOp::LogicalAnd,
                lhs,
                rhs,
            } => {
                self.record_assert(lhs);
                self.record_assert(rhs);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.record_comparison(*op, lhs, rhs);
            }
            _ => {}
        }
    }

    fn record_comparison(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) {
        match op {
            BinaryOp::Eq => {
                // x == c, c == x
                if let (ExprKind::Var(name), ExprKind::IntLit(c)) = (&lhs.kind, &rhs.kind) {
                    self.known.insert(name.clone(), ConstVal::Int(*c));
                    return;
                }
                if let (ExprKind::IntLit(c), ExprKind::Var(name)) = (&lhs.kind, &rhs.kind) {
                    self.known.insert(name.clone(), ConstVal::Int(*c));
                    return;
                }
                // (x & (x - 1)) == 0, either operand order
                if let Some(name) = match_pow2(lhs, rhs).or_else(|| match_pow2(rhs, lhs)) {
                    self.nonneg.insert(name);
                }
            }
            // x >= c / x > c with c >= 0
            BinaryOp::Ge | BinaryOp::Gt => {
                if let (ExprKind::Var(name), ExprKind::IntLit(c)) = (&lhs.kind, &rhs.kind) {
                    if *c >= 0 {
                        self.nonneg.insert(name.clone());
                    }
                }
            }
            // c <= x / c < x with c >= 0
            BinaryOp::Le | BinaryOp::Lt => {
                if let (ExprKind::IntLit(c), ExprKind::Var(name)) = (&lhs.kind, &rhs.kind) {
                    if *c >= 0 {
                        self.nonneg.insert(name.clone());
                    }
                }
            }
            _ => {}
        }
    }
}

// Match `x & (x - 1)` against a zero literal on the other side.
fn match_pow2(masked: &Expr, zero: &Expr) -> Option<String> {
    if !matches!(zero.kind, ExprKind::IntLit(0)) {
        return None;
    }
    let ExprKind::Binary {
        op: BinaryOp::BitAnd,
        lhs,
        rhs,
    } = &masked.kind
    else {
        return None;
    };
    let as_var_minus_one = |e: &Expr| -> Option<String> {
        if let ExprKind::Binary {
            op: BinaryOp::Sub,
            lhs,
            rhs,
        } = &e.kind
        {
            if let (ExprKind::Var(name), ExprKind::IntLit(1)) = (&lhs.kind, &rhs.kind) {
                return Some(name.clone());
            }
        }
        None
    };
    // x on the left or on the right of the mask
    if let ExprKind::Var(name) = &lhs.kind {
        if as_var_minus_one(rhs).as_deref() == Some(name) {
            return Some(name.clone());
        }
    }
    if let ExprKind::Var(name) = &rhs.kind {
        if as_var_minus_one(lhs).as_deref() == Some(name) {
            return Some(name.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Type;

    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            Type::I32,
        )
    }

    fn x() -> Expr {
        Expr::var("x", Type::I32)
    }

    #[test]
    fn equality_assert_pins_a_constant() {
        let mut env = FactEnv::default();
        env.record_assert(&binary(BinaryOp::Eq, x(), Expr::int(42, Type::I32)));
        assert_eq!(env.known("x"), Some(ConstVal::Int(42)));
        assert!(env.is_nonneg("x"));

        env.invalidate("x");
        assert_eq!(env.known("x"), None);
    }

    #[test]
    fn reversed_equality_also_matches() {
        let mut env = FactEnv::default();
        env.record_assert(&binary(BinaryOp::Eq, Expr::int(7, Type::I32), x()));
        assert_eq!(env.known("x"), Some(ConstVal::Int(7)));
    }

    #[test]
    fn range_assert_proves_nonnegative() {
        let mut env = FactEnv::default();
        let range = binary(
            BinaryOp::LogicalAnd,
            binary(BinaryOp::Ge, x(), Expr::int(0, Type::I32)),
            binary(BinaryOp::Le, x(), Expr::int(100, Type::I32)),
        );
        env.record_assert(&range);
        assert!(env.is_nonneg("x"));
        assert_eq!(env.known("x"), None);
    }

    #[test]
    fn pow2_assert_proves_nonnegative() {
        let mut env = FactEnv::default();
        let mask = binary(
            BinaryOp::BitAnd,
            x(),
            binary(BinaryOp::Sub, x(), Expr::int(1, Type::I32)),
        );
        env.record_assert(&binary(BinaryOp::Eq, mask, Expr::int(0, Type::I32)));
        assert!(env.is_nonneg("x"));
    }

    #[test]
    fn unrelated_asserts_prove_nothing() {
        let mut env = FactEnv::default();
        env.record_assert(&binary(BinaryOp::Ne, x(), Expr::int(0, Type::I32)));
        env.record_assert(&binary(BinaryOp::Ge, x(), Expr::int(-5, Type::I32)));
        assert_eq!(env.known("x"), None);
        assert!(!env.is_nonneg("x"));
    }
}
