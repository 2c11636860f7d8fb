#![allow(dead_code)]
use vesper_compiler::ast::{BinaryOp, Expr, ExprKind, Literal, LogicalOp};
use vesper_runtime::error::RuntimeError;
use vesper_runtime::value::Value;
use vesper_runtime::vm::Interpreter;
use vesper_runtime::{execute_program, execute_program_with};

/// Compile and run a program, panicking on any error.
pub fn run(program: &Expr) -> Value {
    execute_program(program).unwrap_or_else(|e| panic!("runtime error: {e}"))
}

/// Compile a program, configure the interpreter, run, and keep the
/// interpreter for host-side calls afterwards.
pub fn run_with(
    program: &Expr,
    setup: impl FnOnce(&mut Interpreter) -> Result<(), RuntimeError>,
) -> (Interpreter, Value) {
    execute_program_with(program, setup).unwrap_or_else(|e| panic!("runtime error: {e}"))
}

/// Compile and run a program, expecting a runtime error.
pub fn run_err(program: &Expr) -> RuntimeError {
    match execute_program(program) {
        Err(e) => e,
        Ok(v) => panic!("expected error, got {v:?}"),
    }
}

pub fn assert_num(v: &Value, expected: f64) {
    match v {
        Value::Num(n) => assert_eq!(*n, expected, "expected {expected}, got {n}"),
        other => panic!("expected number {expected}, got {other:?}"),
    }
}

pub fn assert_bool(v: &Value, expected: bool) {
    match v {
        Value::Bool(b) => assert_eq!(*b, expected),
        other => panic!("expected bool {expected}, got {other:?}"),
    }
}

pub fn assert_null(v: &Value) {
    assert!(matches!(v, Value::Null), "expected null, got {v:?}");
}

pub fn assert_str(v: &Value, interp: &Interpreter, expected: &str) {
    match v {
        Value::Str(id) => assert_eq!(interp.strings.get(*id), expected),
        other => panic!("expected string \"{expected}\", got {other:?}"),
    }
}

// ---- Expression builders ----

pub fn at(line: u32, kind: ExprKind) -> Expr {
    Expr::new(line, kind)
}

pub fn block(exprs: Vec<Expr>) -> Expr {
    Expr::new(1, ExprKind::Block(exprs))
}

pub fn num(n: f64) -> Expr {
    Expr::new(1, ExprKind::Literal(Literal::Num(n)))
}

pub fn str_lit(s: &str) -> Expr {
    Expr::new(1, ExprKind::Literal(Literal::Str(s.to_string())))
}

pub fn boolean(b: bool) -> Expr {
    Expr::new(1, ExprKind::Literal(Literal::Bool(b)))
}

pub fn null() -> Expr {
    Expr::new(1, ExprKind::Null)
}

pub fn this() -> Expr {
    Expr::new(1, ExprKind::This)
}

pub fn name(n: &str) -> Expr {
    Expr::new(1, ExprKind::Name(n.to_string()))
}

pub fn assign(n: &str, rhs: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::Assign {
            global: false,
            name: n.to_string(),
            rhs: rhs.into(),
        },
    )
}

pub fn assign_global(n: &str, rhs: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::Assign {
            global: true,
            name: n.to_string(),
            rhs: rhs.into(),
        },
    )
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::Binary {
            op,
            left: left.into(),
            right: right.into(),
        },
    )
}

pub fn add(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Add, left, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Lt, left, right)
}

pub fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::Logical {
            op,
            left: left.into(),
            right: right.into(),
        },
    )
}

pub fn if_else(condition: Expr, if_true: Expr, if_false: Option<Expr>) -> Expr {
    Expr::new(
        1,
        ExprKind::If {
            condition: condition.into(),
            if_true: if_true.into(),
            if_false: if_false.map(Into::into),
        },
    )
}

pub fn while_loop(condition: Expr, body: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::While {
            condition: condition.into(),
            body: body.into(),
        },
    )
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(
        1,
        ExprKind::Call {
            callee: callee.into(),
            args,
        },
    )
}

pub fn invoke(target: Expr, index: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(
        1,
        ExprKind::Invoke {
            target: target.into(),
            index: index.into(),
            args,
        },
    )
}

pub fn function(fname: Option<&str>, params: &[&str], body: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::Function {
            name: fname.map(str::to_string),
            params: params.iter().map(|p| p.to_string()).collect(),
            body: body.into(),
        },
    )
}

pub fn get(target: Expr, index: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::Get {
            target: target.into(),
            index: index.into(),
            strong: false,
        },
    )
}

pub fn get_strong(target: Expr, index: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::Get {
            target: target.into(),
            index: index.into(),
            strong: true,
        },
    )
}

pub fn set(target: Expr, index: Expr, value: Expr) -> Expr {
    Expr::new(
        1,
        ExprKind::Set {
            target: target.into(),
            index: index.into(),
            value: value.into(),
        },
    )
}

pub fn list(elems: Vec<Expr>) -> Expr {
    Expr::new(1, ExprKind::List(elems))
}

pub fn table(entries: Vec<(Expr, Expr)>) -> Expr {
    Expr::new(1, ExprKind::Table(entries))
}

pub fn ret(value: Expr) -> Expr {
    Expr::new(1, ExprKind::Return(value.into()))
}
