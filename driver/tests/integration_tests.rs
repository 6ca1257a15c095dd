//! Whole-pipeline checks: every optimization level must preserve the
//! observable result of the program.

mod common;

use std::collections::BTreeSet;

use model::{BinaryOp, Expr, ExprKind, Function, Param, Program, Stmt, Type};
use optimizer::{OptLevel, OptOptions};
use pgo::Profile;

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let ty = match op {
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge
        | BinaryOp::LogicalAnd
        | BinaryOp::LogicalOr => Type::I32,
        _ => lhs.ty.clone(),
    };
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
    )
}

fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::new(
        ExprKind::Call {
            callee: name.to_string(),
            args,
        },
        Type::I32,
    )
}

fn int(v: i64) -> Expr {
    Expr::int(v, Type::I32)
}

fn var(name: &str) -> Expr {
    Expr::var(name, Type::I32)
}

fn function(name: &str, params: Vec<Param>, body: Vec<Stmt>) -> Function {
    Function {
        name: name.to_string(),
        params,
        return_type: Type::I32,
        body,
        used: name == "main",
    }
}

fn program(functions: Vec<Function>) -> Program {
    Program {
        functions,
        externs: BTreeSet::new(),
    }
}

/// `for name = start; name < limit; name += 1 { body }`
fn counting_for(name: &str, start: i64, limit: i64, body: Vec<Stmt>) -> Stmt {
    Stmt::For {
        init: Some(Box::new(Stmt::Decl {
            name: name.to_string(),
            ty: Type::I32,
            init: Some(int(start)),
        })),
        cond: Some(binary(BinaryOp::Lt, var(name), int(limit))),
        step: Some(Box::new(Stmt::Expr(Expr::new(
            ExprKind::CompoundAssign {
                op: BinaryOp::Add,
                target: Box::new(var(name)),
                value: Box::new(int(1)),
            },
            Type::I32,
        )))),
        body,
        vec: None,
    }
}

fn index(base: &str, idx: Expr, n: usize) -> Expr {
    Expr::new(
        ExprKind::Index {
            base: Box::new(Expr::var(
                base,
                Type::Array(Box::new(Type::I32), n),
            )),
            index: Box::new(idx),
        },
        Type::I32,
    )
}

fn at_level(p: &Program, level: OptLevel) -> Program {
    let mut q = p.clone();
    optimizer::optimize(
        &mut q,
        &OptOptions {
            level,
            ..OptOptions::default()
        },
    )
    .unwrap();
    q
}

fn results_at_all_levels(p: &Program) -> Vec<i64> {
    [OptLevel::O0, OptLevel::O1, OptLevel::O2, OptLevel::O3]
        .into_iter()
        .map(|level| common::run_main(&at_level(p, level)))
        .collect()
}

fn assert_equivalent(p: &Program, expected: i64) {
    assert_eq!(results_at_all_levels(p), vec![expected; 4]);
}

fn has_vectorized_loop(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|s| match s {
        Stmt::For { vec, body, .. } => vec.is_some() || has_vectorized_loop(body),
        Stmt::If {
            then_body,
            else_body,
            ..
        } => has_vectorized_loop(then_body) || has_vectorized_loop(else_body),
        Stmt::While { body, .. } | Stmt::Block(body) => has_vectorized_loop(body),
        _ => false,
    })
}

#[test]
fn interprocedural_constant_arguments_preserve_results() {
    // multiply is always called with b == 10
    let p = program(vec![
        function(
            "main",
            vec![],
            vec![Stmt::Return(Some(binary(
                BinaryOp::Add,
                call("multiply", vec![int(5), int(10)]),
                call("multiply", vec![int(3), int(10)]),
            )))],
        ),
        function(
            "multiply",
            vec![Param::new("a", Type::I32), Param::new("b", Type::I32)],
            vec![Stmt::Return(Some(binary(BinaryOp::Mul, var("a"), var("b"))))],
        ),
    ]);
    assert_equivalent(&p, 80);
}

#[test]
fn dead_argument_elimination_preserves_results() {
    // the middle argument is never read
    let p = program(vec![
        function(
            "main",
            vec![],
            vec![Stmt::Return(Some(binary(
                BinaryOp::Add,
                call("add_extra", vec![int(10), int(999), int(20)]),
                call("add_extra", vec![int(5), int(888), int(15)]),
            )))],
        ),
        function(
            "add_extra",
            vec![
                Param::new("a", Type::I32),
                Param::new("unused", Type::I32),
                Param::new("b", Type::I32),
            ],
            vec![Stmt::Return(Some(binary(BinaryOp::Add, var("a"), var("b"))))],
        ),
    ]);
    assert_equivalent(&p, 50);
}

#[test]
fn counted_loop_preserves_results() {
    // sum of 0..10
    let p = program(vec![function(
        "main",
        vec![],
        vec![
            Stmt::Decl {
                name: "sum".to_string(),
                ty: Type::I32,
                init: Some(int(0)),
            },
            counting_for(
                "i",
                0,
                10,
                vec![Stmt::Assign {
                    target: var("sum"),
                    value: binary(BinaryOp::Add, var("sum"), var("i")),
                }],
            ),
            Stmt::Return(Some(var("sum"))),
        ],
    )]);
    assert_equivalent(&p, 45);
}

#[test]
fn unrollable_loop_preserves_results() {
    // sum of 0..8, short enough to be fully expanded
    let p = program(vec![function(
        "main",
        vec![],
        vec![
            Stmt::Decl {
                name: "sum".to_string(),
                ty: Type::I32,
                init: Some(int(0)),
            },
            counting_for(
                "i",
                0,
                8,
                vec![Stmt::Assign {
                    target: var("sum"),
                    value: binary(BinaryOp::Add, var("sum"), var("i")),
                }],
            ),
            Stmt::Return(Some(var("sum"))),
        ],
    )]);
    assert_equivalent(&p, 28);
    // the loop is gone at O3
    let o3 = at_level(&p, OptLevel::O3);
    assert!(!o3.functions[0]
        .body
        .iter()
        .any(|s| matches!(s, Stmt::For { .. })));
}

/// `i = 0; while (i < limit) { body; i += 1; }`
fn counting_while(name: &str, limit: i64, mut body: Vec<Stmt>) -> Vec<Stmt> {
    body.push(Stmt::Expr(Expr::new(
        ExprKind::CompoundAssign {
            op: BinaryOp::Add,
            target: Box::new(var(name)),
            value: Box::new(int(1)),
        },
        Type::I32,
    )));
    vec![
        Stmt::Decl {
            name: name.to_string(),
            ty: Type::I32,
            init: Some(int(0)),
        },
        Stmt::While {
            cond: binary(BinaryOp::Lt, var(name), int(limit)),
            body,
        },
    ]
}

#[test]
fn counted_while_loop_preserves_results() {
    // sum of 0..4, plus the induction variable's exit value
    let mut body = vec![Stmt::Decl {
        name: "sum".to_string(),
        ty: Type::I32,
        init: Some(int(0)),
    }];
    body.extend(counting_while(
        "i",
        4,
        vec![Stmt::Assign {
            target: var("sum"),
            value: binary(BinaryOp::Add, var("sum"), var("i")),
        }],
    ));
    body.push(Stmt::Return(Some(binary(
        BinaryOp::Add,
        var("sum"),
        var("i"),
    ))));
    let p = program(vec![function("main", vec![], body)]);
    assert_equivalent(&p, 10);
    // the loop is gone at O3
    let o3 = at_level(&p, OptLevel::O3);
    assert!(!o3.functions[0]
        .body
        .iter()
        .any(|s| matches!(s, Stmt::While { .. })));
}

#[test]
fn while_reduction_preserves_results() {
    // sum of a[0..16] with a[i] = i + 1
    let n = 16usize;
    let mut body = vec![
        Stmt::Decl {
            name: "a".to_string(),
            ty: Type::Array(Box::new(Type::I32), n),
            init: None,
        },
        Stmt::Decl {
            name: "sum".to_string(),
            ty: Type::I32,
            init: Some(int(0)),
        },
        counting_for(
            "i",
            0,
            n as i64,
            vec![Stmt::Assign {
                target: index("a", var("i"), n),
                value: binary(BinaryOp::Add, var("i"), int(1)),
            }],
        ),
    ];
    body.extend(counting_while(
        "i",
        n as i64,
        vec![Stmt::Assign {
            target: var("sum"),
            value: binary(BinaryOp::Add, var("sum"), index("a", var("i"), n)),
        }],
    ));
    body.push(Stmt::Return(Some(var("sum"))));
    let p = program(vec![function("main", vec![], body)]);
    assert_equivalent(&p, 136);
    assert!(has_vectorized_loop(&at_level(&p, OptLevel::O3).functions[0].body));
    assert!(!has_vectorized_loop(&at_level(&p, OptLevel::O2).functions[0].body));
}

fn elementwise_add_program(n: usize) -> Program {
    let arr = |name: &str| Stmt::Decl {
        name: name.to_string(),
        ty: Type::Array(Box::new(Type::I32), n),
        init: None,
    };
    let fill = |name: &str| Stmt::Assign {
        target: index(name, var("i"), n),
        value: binary(BinaryOp::Add, var("i"), int(1)),
    };
    program(vec![function(
        "main",
        vec![],
        vec![
            arr("a"),
            arr("b"),
            arr("c"),
            counting_for("i", 0, n as i64, vec![fill("b"), fill("c")]),
            counting_for(
                "i",
                0,
                n as i64,
                vec![Stmt::Assign {
                    target: index("a", var("i"), n),
                    value: binary(
                        BinaryOp::Add,
                        index("b", var("i"), n),
                        index("c", var("i"), n),
                    ),
                }],
            ),
            Stmt::Return(Some(binary(
                BinaryOp::Add,
                index("a", int(0), n),
                index("a", int((n - 1) as i64), n),
            ))),
        ],
    )])
}

#[test]
fn vectorized_loop_preserves_results() {
    // a[0] = 2, a[15] = 32
    let p = elementwise_add_program(16);
    assert_equivalent(&p, 34);
    assert!(has_vectorized_loop(&at_level(&p, OptLevel::O3).functions[0].body));
    assert!(!has_vectorized_loop(&at_level(&p, OptLevel::O2).functions[0].body));
}

#[test]
fn vectorized_remainder_preserves_results() {
    // 13 elements: twelve in packed form, one left over
    let p = elementwise_add_program(13);
    assert_equivalent(&p, 28);
    assert!(has_vectorized_loop(&at_level(&p, OptLevel::O3).functions[0].body));
}

#[test]
fn profile_changes_decisions_not_results() {
    // helper is too big for default inlining but within the hot limit
    let mut body = vec![Stmt::Expr(call(
        "assert",
        vec![binary(BinaryOp::Ge, var("x"), int(0))],
    ))];
    body.extend((0..10).map(|i| Stmt::Decl {
        name: format!("t{i}"),
        ty: Type::I32,
        init: Some(int(i)),
    }));
    body.push(Stmt::Return(Some(binary(BinaryOp::Add, var("x"), int(1)))));
    let p = program(vec![
        function(
            "main",
            vec![],
            vec![Stmt::Return(Some(call("helper", vec![int(5)])))],
        ),
        function("helper", vec![Param::new("x", Type::I32)], body),
    ]);

    let mut data = Vec::new();
    data.extend_from_slice(b"PGO1");
    data.extend_from_slice(&2u32.to_le_bytes());
    for (name, count) in [("main", 1000u64), ("main:helper", 900u64)] {
        let mut buf = [0u8; 64];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        data.extend_from_slice(&buf);
        data.extend_from_slice(&count.to_le_bytes());
    }
    let profile = Profile::parse(&data).unwrap();

    let cold = at_level(&p, OptLevel::O3);
    let mut hot = p.clone();
    optimizer::optimize(
        &mut hot,
        &OptOptions {
            level: OptLevel::O3,
            profile: Some(profile),
            ..OptOptions::default()
        },
    )
    .unwrap();

    assert_eq!(common::run_main(&cold), 6);
    assert_eq!(common::run_main(&hot), 6);
    // the hot call was absorbed into main, the cold one was not
    assert!(cold.find_function("helper").is_some());
    assert!(hot.find_function("helper").is_none());
}

#[test]
fn level_zero_leaves_the_program_alone() {
    let p = elementwise_add_program(16);
    assert_eq!(at_level(&p, OptLevel::O0), p);
}
