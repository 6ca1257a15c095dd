//! A small tree-walking evaluator used to check that optimized
//! programs compute the same results as their unoptimized forms.

use std::collections::HashMap;

use model::{BinaryOp, Expr, ExprKind, Program, Stmt, Type, UnaryOp};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Array(Vec<Value>),
    Void,
}

impl Value {
    fn as_int(&self) -> i64 {
        match self {
            Value::Int(v) => *v,
            other => panic!("expected integer, got {other:?}"),
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            other => panic!("{other:?} in condition"),
        }
    }

    fn zero_of(ty: &Type) -> Value {
        match ty {
            Type::F32 | Type::F64 => Value::Float(0.0),
            Type::Array(elem, n) => Value::Array(vec![Value::zero_of(elem); *n]),
            _ => Value::Int(0),
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
}

type Env = HashMap<String, Value>;

/// Evaluate `main` and return its integer result.
pub fn run_main(program: &Program) -> i64 {
    let id = program.entry().expect("program has no main");
    call(program, &program.functions[id].name, vec![]).as_int()
}

fn call(program: &Program, name: &str, args: Vec<Value>) -> Value {
    let id = program
        .find_function(name)
        .unwrap_or_else(|| panic!("call to unknown function `{name}`"));
    let func = &program.functions[id];
    assert_eq!(func.params.len(), args.len(), "arity mismatch calling `{name}`");
    let mut env: Env = func
        .params
        .iter()
        .zip(args)
        .map(|(p, v)| (p.name.clone(), v))
        .collect();
    match exec_block(program, &func.body, &mut env) {
        Flow::Return(v) => v,
        Flow::Normal => Value::Void,
    }
}

fn exec_block(program: &Program, stmts: &[Stmt], env: &mut Env) -> Flow {
    for stmt in stmts {
        if let Flow::Return(v) = exec_stmt(program, stmt, env) {
            return Flow::Return(v);
        }
    }
    Flow::Normal
}

fn exec_stmt(program: &Program, stmt: &Stmt, env: &mut Env) -> Flow {
    match stmt {
        Stmt::Decl { name, ty, init } => {
            let value = match init {
                Some(e) => eval(program, e, env),
                None => Value::zero_of(ty),
            };
            env.insert(name.clone(), value);
            Flow::Normal
        }
        Stmt::Expr(e) => {
            eval(program, e, env);
            Flow::Normal
        }
        Stmt::Assign { target, value } => {
            let v = eval(program, value, env);
            store(program, target, v, env);
            Flow::Normal
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            if eval(program, cond, env).is_truthy() {
                exec_block(program, then_body, env)
            } else {
                exec_block(program, else_body, env)
            }
        }
        Stmt::While { cond, body } => {
            while eval(program, cond, env).is_truthy() {
                if let Flow::Return(v) = exec_block(program, body, env) {
                    return Flow::Return(v);
                }
            }
            Flow::Normal
        }
        Stmt::For {
            init,
            cond,
            step,
            body,
            vec,
        } => {
            if let Some(init) = init {
                if let Flow::Return(v) = exec_stmt(program, init, env) {
                    return Flow::Return(v);
                }
            }
            loop {
                if let Some(cond) = cond {
                    if !eval(program, cond, env).is_truthy() {
                        break;
                    }
                }
                match vec {
                    // one pass of the body per lane, with the counter
                    // advanced to each lane's element
                    Some(info) => {
                        let var = step_variable(step.as_deref().expect("vectorized loop step"));
                        let base = env[&var].as_int();
                        for lane in 0..info.width {
                            env.insert(var.clone(), Value::Int(base + lane as i64));
                            if let Flow::Return(v) = exec_block(program, body, env) {
                                return Flow::Return(v);
                            }
                        }
                        env.insert(var, Value::Int(base));
                    }
                    None => {
                        if let Flow::Return(v) = exec_block(program, body, env) {
                            return Flow::Return(v);
                        }
                    }
                }
                if let Some(step) = step {
                    if let Flow::Return(v) = exec_stmt(program, step, env) {
                        return Flow::Return(v);
                    }
                }
            }
            Flow::Normal
        }
        Stmt::Return(e) => Flow::Return(match e {
            Some(e) => eval(program, e, env),
            None => Value::Void,
        }),
        Stmt::Block(body) => exec_block(program, body, env),
    }
}

fn step_variable(step: &Stmt) -> String {
    let target = match step {
        Stmt::Assign { target, .. } => target,
        Stmt::Expr(e) => match &e.kind {
            ExprKind::Assign { target, .. } | ExprKind::CompoundAssign { target, .. } => target,
            _ => panic!("unrecognized loop step"),
        },
        _ => panic!("unrecognized loop step"),
    };
    match &target.kind {
        ExprKind::Var(name) => name.clone(),
        _ => panic!("loop counter is not a variable"),
    }
}

fn eval(program: &Program, expr: &Expr, env: &mut Env) -> Value {
    match &expr.kind {
        ExprKind::IntLit(v) => Value::Int(*v),
        ExprKind::FloatLit(v) => Value::Float(*v),
        ExprKind::Var(name) => env
            .get(name)
            .unwrap_or_else(|| panic!("read of unbound `{name}`"))
            .clone(),
        ExprKind::Unary { op, operand } => {
            let v = eval(program, operand, env);
            match (op, v) {
                (UnaryOp::Neg, Value::Int(v)) => Value::Int(v.wrapping_neg()),
                (UnaryOp::Neg, Value::Float(v)) => Value::Float(-v),
                (UnaryOp::BitNot, Value::Int(v)) => Value::Int(!v),
                (UnaryOp::LogicalNot, v) => Value::Int(i64::from(!v.is_truthy())),
                (op, v) => panic!("bad operand {v:?} for {op:?}"),
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            // short-circuit forms evaluate the right side lazily
            match op {
                BinaryOp::LogicalAnd => {
                    let l = eval(program, lhs, env).is_truthy();
                    return Value::Int(i64::from(l && eval(program, rhs, env).is_truthy()));
                }
                BinaryOp::LogicalOr => {
                    let l = eval(program, lhs, env).is_truthy();
                    return Value::Int(i64::from(l || eval(program, rhs, env).is_truthy()));
                }
                _ => {}
            }
            let l = eval(program, lhs, env);
            let r = eval(program, rhs, env);
            binary(*op, l, r)
        }
        ExprKind::Call { callee, args } => {
            let values: Vec<Value> = args.iter().map(|a| eval(program, a, env)).collect();
            if callee == "assert" {
                assert!(
                    values.len() == 1 && values[0].is_truthy(),
                    "assertion failed"
                );
                return Value::Void;
            }
            call(program, callee, values)
        }
        ExprKind::Index { base, index } => {
            let i = eval(program, index, env).as_int() as usize;
            match eval(program, base, env) {
                Value::Array(elems) => elems[i].clone(),
                other => panic!("indexing into {other:?}"),
            }
        }
        ExprKind::Cast(inner) => {
            let v = eval(program, inner, env);
            match (&v, expr.ty.is_float()) {
                (Value::Int(n), true) => Value::Float(*n as f64),
                (Value::Float(f), false) => Value::Int(*f as i64),
                _ => v,
            }
        }
        ExprKind::Assign { target, value } => {
            let v = eval(program, value, env);
            store(program, target, v.clone(), env);
            v
        }
        ExprKind::CompoundAssign { op, target, value } => {
            let old = eval(program, target, env);
            let rhs = eval(program, value, env);
            let v = binary(*op, old, rhs);
            store(program, target, v.clone(), env);
            v
        }
        ExprKind::Member { .. } | ExprKind::PtrMember { .. } => {
            panic!("aggregate member access is not evaluated here")
        }
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Value {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let v = match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div => a.checked_div(b).expect("division by zero"),
                BinaryOp::Mod => a.checked_rem(b).expect("remainder by zero"),
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                BinaryOp::BitXor => a ^ b,
                BinaryOp::Shl => a.wrapping_shl(b as u32),
                BinaryOp::Shr => a.wrapping_shr(b as u32),
                BinaryOp::Eq => i64::from(a == b),
                BinaryOp::Ne => i64::from(a != b),
                BinaryOp::Lt => i64::from(a < b),
                BinaryOp::Le => i64::from(a <= b),
                BinaryOp::Gt => i64::from(a > b),
                BinaryOp::Ge => i64::from(a >= b),
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => unreachable!(),
            };
            Value::Int(v)
        }
        (Value::Float(a), Value::Float(b)) => match op {
            BinaryOp::Add => Value::Float(a + b),
            BinaryOp::Sub => Value::Float(a - b),
            BinaryOp::Mul => Value::Float(a * b),
            BinaryOp::Div => Value::Float(a / b),
            BinaryOp::Eq => Value::Int(i64::from(a == b)),
            BinaryOp::Ne => Value::Int(i64::from(a != b)),
            BinaryOp::Lt => Value::Int(i64::from(a < b)),
            BinaryOp::Le => Value::Int(i64::from(a <= b)),
            BinaryOp::Gt => Value::Int(i64::from(a > b)),
            BinaryOp::Ge => Value::Int(i64::from(a >= b)),
            op => panic!("{op:?} on floats"),
        },
        (l, r) => panic!("mixed operands {l:?} and {r:?}"),
    }
}

fn store(program: &Program, target: &Expr, value: Value, env: &mut Env) {
    match &target.kind {
        ExprKind::Var(name) => {
            env.insert(name.clone(), value);
        }
        ExprKind::Index { base, index } => {
            let i = eval(program, index, env).as_int() as usize;
            let ExprKind::Var(name) = &base.kind else {
                panic!("array store through a non-variable base");
            };
            match env.get_mut(name) {
                Some(Value::Array(elems)) => elems[i] = value,
                other => panic!("store into {other:?}"),
            }
        }
        other => panic!("unsupported store target {other:?}"),
    }
}
