//! Constant folding: evaluate operators over literal operands at
//! compile time, at the operand type's width, signedness and float
//! semantics. Unfoldable combinations (division by zero, type
//! mismatches) return `None` and are left in place.

use model::{BinaryOp, ConstVal, Type, UnaryOp};

use crate::utils::{as_unsigned, truncate};

/// Fold a binary operation over two constants. `ty` is the static type
/// of the operands (comparisons yield an integer regardless).
pub fn fold_binary(op: BinaryOp, l: &ConstVal, r: &ConstVal, ty: &Type) -> Option<ConstVal> {
    match (l, r) {
        (ConstVal::Int(a), ConstVal::Int(b)) => fold_int(op, *a, *b, ty),
        (ConstVal::Float(a), ConstVal::Float(b)) => fold_float(op, *a, *b, ty),
        _ => None,
    }
}

fn fold_int(op: BinaryOp, a: i64, b: i64, ty: &Type) -> Option<ConstVal> {
    let bits = ty.bit_width().max(1);
    let value = match op {
        BinaryOp::Add => truncate(ty, a.wrapping_add(b)),
        BinaryOp::Sub => truncate(ty, a.wrapping_sub(b)),
        BinaryOp::Mul => truncate(ty, a.wrapping_mul(b)),
        BinaryOp::Div => {
            if b == 0 {
                return None;
            }
            if ty.is_unsigned() {
                truncate(ty, (as_unsigned(ty, a) / as_unsigned(ty, b)) as i64)
            } else {
                truncate(ty, a.wrapping_div(b))
            }
        }
        BinaryOp::Mod => {
            if b == 0 {
                return None;
            }
            if ty.is_unsigned() {
                truncate(ty, (as_unsigned(ty, a) % as_unsigned(ty, b)) as i64)
            } else {
                truncate(ty, a.wrapping_rem(b))
            }
        }
        BinaryOp::BitAnd => truncate(ty, a & b),
        BinaryOp::BitOr => truncate(ty, a | b),
        BinaryOp::BitXor => truncate(ty, a ^ b),
        BinaryOp::Shl => truncate(ty, a.wrapping_shl((b as u32) & (bits - 1))),
        BinaryOp::Shr => {
            let sh = (b as u32) & (bits - 1);
            if ty.is_unsigned() {
                truncate(ty, (as_unsigned(ty, a) >> sh) as i64)
            } else {
                truncate(ty, a.wrapping_shr(sh))
            }
        }
        BinaryOp::Eq => (a == b) as i64,
        BinaryOp::Ne => (a != b) as i64,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = if ty.is_unsigned() {
                as_unsigned(ty, a).cmp(&as_unsigned(ty, b))
            } else {
                a.cmp(&b)
            };
            let hit = match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            };
            hit as i64
        }
        BinaryOp::LogicalAnd => ((a != 0) && (b != 0)) as i64,
        BinaryOp::LogicalOr => ((a != 0) || (b != 0)) as i64,
    };
    Some(ConstVal::Int(value))
}

fn fold_float(op: BinaryOp, a: f64, b: f64, ty: &Type) -> Option<ConstVal> {
    // Single-precision operands are computed in single precision.
    let compute = |f: fn(f64, f64) -> f64| {
        if *ty == Type::F32 {
            f64::from(f(a, b) as f32)
        } else {
            f(a, b)
        }
    };
    let value = match op {
        BinaryOp::Add => compute(|x, y| x + y),
        BinaryOp::Sub => compute(|x, y| x - y),
        BinaryOp::Mul => compute(|x, y| x * y),
        BinaryOp::Div => compute(|x, y| x / y),
        BinaryOp::Eq => return Some(ConstVal::Int((a == b) as i64)),
        BinaryOp::Ne => return Some(ConstVal::Int((a != b) as i64)),
        BinaryOp::Lt => return Some(ConstVal::Int((a < b) as i64)),
        BinaryOp::Le => return Some(ConstVal::Int((a <= b) as i64)),
        BinaryOp::Gt => return Some(ConstVal::Int((a > b) as i64)),
        BinaryOp::Ge => return Some(ConstVal::Int((a >= b) as i64)),
        _ => return None,
    };
    Some(ConstVal::Float(value))
}

pub fn fold_unary(op: UnaryOp, v: &ConstVal, ty: &Type) -> Option<ConstVal> {
    match (op, v) {
        (UnaryOp::Neg, ConstVal::Int(a)) => Some(ConstVal::Int(truncate(ty, a.wrapping_neg()))),
        (UnaryOp::Neg, ConstVal::Float(a)) => Some(ConstVal::Float(-a)),
        (UnaryOp::BitNot, ConstVal::Int(a)) => Some(ConstVal::Int(truncate(ty, !a))),
        (UnaryOp::LogicalNot, ConstVal::Int(a)) => Some(ConstVal::Int((*a == 0) as i64)),
        (UnaryOp::LogicalNot, ConstVal::Float(a)) => Some(ConstVal::Int((*a == 0.0) as i64)),
        (UnaryOp::BitNot, ConstVal::Float(_)) => None,
    }
}
