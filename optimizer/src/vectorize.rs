//! Lowering of array loops to packed SIMD form.
//!
//! A loop `for (i = 0; i < N; i++) dest[i] = lhs[i] OP rhs[i]` over a
//! uniform 32-bit element type becomes a vector loop covering the
//! largest multiple of the lane width, tagged for the back end, plus a
//! scalar remainder loop for the final `N mod W` elements. The
//! remainder loop is emitted even when it covers zero elements, so the
//! two shapes can never diverge.
//!
//! Counted `while` loops get the same treatment in two further shapes:
//! a reduction `acc = acc + arr[i]` and an array initialization
//! `arr[i] = <affine in i>`.

use model::{BinaryOp, Expr, ExprKind, SimdProfile, Stmt, Type, VecInfo, VecMode};

use crate::loops::{analyze_for, analyze_while, LoopInfo};

pub fn vectorize_function(func: &mut model::Function, simd: SimdProfile) -> bool {
    let mut changed = false;
    vectorize_block(&mut func.body, simd, &mut changed);
    if changed {
        log::debug!("vectorized loops in `{}`", func.name);
    }
    changed
}

fn vectorize_block(stmts: &mut Vec<Stmt>, simd: SimdProfile, changed: &mut bool) {
    let old = std::mem::take(stmts);
    for mut stmt in old {
        match &mut stmt {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                vectorize_block(then_body, simd, changed);
                vectorize_block(else_body, simd, changed);
            }
            Stmt::Block(body) => {
                vectorize_block(body, simd, changed);
            }
            Stmt::While { cond, body } => {
                vectorize_block(body, simd, changed);
                // the preceding (already processed) statement supplies
                // the initial value
                if let Some(rewritten) =
                    try_vectorize_while(stmts.last(), cond, body, simd)
                {
                    stmts.push(rewritten);
                    *changed = true;
                    continue;
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                vec: None,
            } => {
                vectorize_block(body, simd, changed);
                if let Some(rewritten) = try_vectorize(
                    init.as_deref(),
                    cond.as_ref(),
                    step.as_deref(),
                    body,
                    simd,
                ) {
                    stmts.push(rewritten);
                    *changed = true;
                    continue;
                }
            }
            _ => {}
        }
        stmts.push(stmt);
    }
}

fn try_vectorize(
    init: Option<&Stmt>,
    cond: Option<&Expr>,
    step: Option<&Stmt>,
    body: &[Stmt],
    simd: SimdProfile,
) -> Option<Stmt> {
    let info = analyze_for(init, cond, step)?;
    if info.start != 0 || info.step != 1 {
        return None;
    }

    let elem = elementwise_shape(body, &info)?;
    split_loop(
        &info,
        body[0].clone(),
        simd,
        elem.op,
        elem.ty,
        VecMode::Elementwise,
        info.declared,
    )
}

/// Recognize and lower the two counted-`while` shapes: a reduction
/// `acc = acc + arr[i]` and an array initialization `arr[i] = f(i)`
/// with `f` affine in the induction variable. The body must be exactly
/// the payload statement plus the increment.
fn try_vectorize_while(
    prev: Option<&Stmt>,
    cond: &Expr,
    body: &[Stmt],
    simd: SimdProfile,
) -> Option<Stmt> {
    let info = analyze_while(prev, cond, body)?;
    if info.start != 0 || body.len() != 2 {
        return None;
    }
    let payload = &body[0];

    let (mode, elem) = if let Some(ty) = reduction_shape(payload, &info) {
        (VecMode::Reduction, ty)
    } else if let Some(ty) = init_shape(payload, &info) {
        (VecMode::ArrayInit, ty)
    } else {
        return None;
    };
    // the initializing statement before the loop stays in place, so
    // both emitted loops assign the existing variable
    split_loop(&info, payload.clone(), simd, BinaryOp::Add, elem, mode, false)
}

/// Emit the tagged vector loop over the largest lane-width multiple
/// plus the scalar remainder loop, both running the same payload.
fn split_loop(
    info: &LoopInfo,
    payload: Stmt,
    simd: SimdProfile,
    op: BinaryOp,
    elem: Type,
    mode: VecMode,
    declare: bool,
) -> Option<Stmt> {
    let n = info.trip_count;
    let width = simd.lane_width(&elem) as i64;
    if width == 0 || n < width {
        return None;
    }
    let main = n - n % width;

    let vector = Stmt::For {
        init: Some(Box::new(induction_init(info, 0, declare))),
        cond: Some(less_than(&info.var, main, &info.ty)),
        step: Some(Box::new(induction_step(&info.var, width, &info.ty))),
        body: vec![payload.clone()],
        vec: Some(VecInfo {
            width: width as usize,
            op,
            elem,
            mode,
        }),
    };
    let remainder = Stmt::For {
        init: Some(Box::new(induction_init(info, main, declare))),
        cond: Some(less_than(&info.var, n, &info.ty)),
        step: Some(Box::new(induction_step(&info.var, 1, &info.ty))),
        body: vec![payload],
        vec: None,
    };
    Some(Stmt::Block(vec![vector, remainder]))
}

struct Elementwise {
    op: BinaryOp,
    ty: Type,
}

/// Match the single-statement body `dest[i] = lhs[i] OP rhs[i]` with a
/// uniform 32-bit element type. Anything else stays scalar.
fn elementwise_shape(body: &[Stmt], info: &LoopInfo) -> Option<Elementwise> {
    let [Stmt::Assign { target, value }] = body else {
        return None;
    };
    let dest_ty = indexed_element(target, &info.var)?;
    let ExprKind::Binary { op, lhs, rhs } = &value.kind else {
        return None;
    };
    if !matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul) {
        return None;
    }
    let lhs_ty = indexed_element(lhs, &info.var)?;
    let rhs_ty = indexed_element(rhs, &info.var)?;
    // mixed element types disqualify the loop
    if dest_ty != lhs_ty || lhs_ty != rhs_ty {
        return None;
    }
    if !matches!(dest_ty, Type::I32 | Type::F32) {
        return None;
    }
    Some(Elementwise {
        op: *op,
        ty: dest_ty,
    })
}

/// Match `acc = acc + arr[i]` (either operand order) where `acc` is a
/// plain variable. Only addition reduces; the element type must be a
/// 32-bit lane type.
fn reduction_shape(payload: &Stmt, info: &LoopInfo) -> Option<Type> {
    let Stmt::Assign { target, value } = payload else {
        return None;
    };
    let ExprKind::Var(acc) = &target.kind else {
        return None;
    };
    let ExprKind::Binary {
        op: BinaryOp::Add,
        lhs,
        rhs,
    } = &value.kind
    else {
        return None;
    };
    let elem = match (&lhs.kind, &rhs.kind) {
        (ExprKind::Var(name), _) if name == acc => indexed_element(rhs, &info.var)?,
        (_, ExprKind::Var(name)) if name == acc => indexed_element(lhs, &info.var)?,
        _ => return None,
    };
    if !matches!(elem, Type::I32 | Type::F32) {
        return None;
    }
    Some(elem)
}

/// Match `arr[i] = f(i)` with `f` affine in the induction variable.
/// Integer elements only; the lanes are filled from a base vector plus
/// a per-lane stride, which has no float form here.
fn init_shape(payload: &Stmt, info: &LoopInfo) -> Option<Type> {
    let Stmt::Assign { target, value } = payload else {
        return None;
    };
    let elem = indexed_element(target, &info.var)?;
    if elem != Type::I32 {
        return None;
    }
    if !affine_value(value, &info.var) {
        return None;
    }
    Some(elem)
}

/// `K`, `i`, `i*K`, `K*i`, or either of those plus a constant.
fn affine_value(expr: &Expr, var: &str) -> bool {
    match &expr.kind {
        ExprKind::IntLit(_) => true,
        ExprKind::Binary {
            op: BinaryOp::Add,
            lhs,
            rhs,
        } => {
            (scaled_var(lhs, var) && matches!(rhs.kind, ExprKind::IntLit(_)))
                || (matches!(lhs.kind, ExprKind::IntLit(_)) && scaled_var(rhs, var))
        }
        _ => scaled_var(expr, var),
    }
}

fn scaled_var(expr: &Expr, var: &str) -> bool {
    match &expr.kind {
        ExprKind::Var(name) => name == var,
        ExprKind::Binary {
            op: BinaryOp::Mul,
            lhs,
            rhs,
        } => matches!(
            (&lhs.kind, &rhs.kind),
            (ExprKind::Var(n), ExprKind::IntLit(_)) if n == var
        ) || matches!(
            (&lhs.kind, &rhs.kind),
            (ExprKind::IntLit(_), ExprKind::Var(n)) if n == var
        ),
        _ => false,
    }
}

/// The element type of `array[i]` where the index is exactly the
/// induction variable and the base is a plain array variable.
fn indexed_element(expr: &Expr, var: &str) -> Option<Type> {
    let ExprKind::Index { base, index } = &expr.kind else {
        return None;
    };
    if !matches!(&base.kind, ExprKind::Var(_)) {
        return None;
    }
    if !matches!(&index.kind, ExprKind::Var(name) if name == var) {
        return None;
    }
    Some(expr.ty.clone())
}

fn induction_init(info: &LoopInfo, at: i64, declare: bool) -> Stmt {
    if declare {
        Stmt::Decl {
            name: info.var.clone(),
            ty: info.ty.clone(),
            init: Some(Expr::int(at, info.ty.clone())),
        }
    } else {
        Stmt::Assign {
            target: Expr::var(&info.var, info.ty.clone()),
            value: Expr::int(at, info.ty.clone()),
        }
    }
}

fn less_than(var: &str, bound: i64, ty: &Type) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op: BinaryOp::Lt,
            lhs: Box::new(Expr::var(var, ty.clone())),
            rhs: Box::new(Expr::int(bound, ty.clone())),
        },
        Type::I32,
    )
}

fn induction_step(var: &str, by: i64, ty: &Type) -> Stmt {
    Stmt::Expr(Expr::new(
        ExprKind::CompoundAssign {
            op: BinaryOp::Add,
            target: Box::new(Expr::var(var, ty.clone())),
            value: Box::new(Expr::int(by, ty.clone())),
        },
        ty.clone(),
    ))
}
