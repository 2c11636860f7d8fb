use super::helpers::*;
use vesper_runtime::error::RuntimeError;

// ---- Shared-cell upvalue aliasing ----

#[test]
fn test_incrementer_and_reader_share_one_cell() {
    // x = 0 in the program body; two closures capture it. After the program
    // returns, the host calls the incrementer once and the reader must see 1.
    let program = block(vec![
        assign("x", num(0.0)),
        assign_global("inc", function(Some("inc"), &[], assign("x", add(name("x"), num(1.0))))),
        assign_global("getx", function(Some("getx"), &[], name("x"))),
        null(),
    ]);
    let (mut interp, _) = run_with(&program, |_| Ok(()));
    let inc = interp.global("inc").unwrap();
    let getx = interp.global("getx").unwrap();
    interp.call_value(&inc, vec![]).unwrap();
    let v = interp.call_value(&getx, vec![]).unwrap();
    assert_num(&v, 1.0);
    interp.call_value(&inc, vec![]).unwrap();
    interp.call_value(&inc, vec![]).unwrap();
    assert_num(&interp.call_value(&getx, vec![]).unwrap(), 3.0);
}

#[test]
fn test_counters_are_independent_per_instantiation() {
    // make = fn() { n = 0; fn() { n = n + 1 } }; two instantiations must
    // not share state.
    let make = function(
        Some("make"),
        &[],
        block(vec![
            assign("n", num(0.0)),
            function(None, &[], assign("n", add(name("n"), num(1.0)))),
        ]),
    );
    let program = block(vec![
        assign("make", make),
        assign("c1", call(name("make"), vec![])),
        assign("c2", call(name("make"), vec![])),
        call(name("c1"), vec![]),
        call(name("c1"), vec![]),
        assign_global("a", call(name("c1"), vec![])),
        assign_global("b", call(name("c2"), vec![])),
        null(),
    ]);
    let (mut interp, _) = run_with(&program, |_| Ok(()));
    assert_num(&interp.global("a").unwrap(), 3.0);
    assert_num(&interp.global("b").unwrap(), 1.0);
}

#[test]
fn test_capture_outlives_enclosing_activation() {
    // The captured local survives `make` returning.
    let program = block(vec![
        assign(
            "make",
            function(
                Some("make"),
                &[],
                block(vec![
                    assign("secret", num(42.0)),
                    function(None, &[], name("secret")),
                ]),
            ),
        ),
        assign("f", call(name("make"), vec![])),
        call(name("f"), vec![]),
    ]);
    assert_num(&run(&program), 42.0);
}

#[test]
fn test_capture_of_parameter() {
    // adder = fn(n) fn(x) x + n
    let program = block(vec![
        assign(
            "adder",
            function(
                Some("adder"),
                &["n"],
                function(None, &["x"], add(name("x"), name("n"))),
            ),
        ),
        assign("add10", call(name("adder"), vec![num(10.0)])),
        call(name("add10"), vec![num(32.0)]),
    ]);
    assert_num(&run(&program), 42.0);
}

#[test]
fn test_transitive_capture_reads_outermost_local() {
    // Inner function reaches x through the middle function's upvalue.
    let program = block(vec![
        assign("x", num(5.0)),
        assign("mid", function(None, &[], function(None, &[], name("x")))),
        assign("inner", call(name("mid"), vec![])),
        call(name("inner"), vec![]),
    ]);
    assert_num(&run(&program), 5.0);
}

#[test]
fn test_transitive_mutation_is_shared() {
    // A deeply nested writer and a shallow reader observe the same cell.
    let program = block(vec![
        assign("x", num(0.0)),
        assign(
            "setter",
            function(None, &[], function(None, &["v"], assign("x", name("v")))),
        ),
        assign("set", call(name("setter"), vec![])),
        call(name("set"), vec![num(9.0)]),
        name("x"),
    ]);
    assert_num(&run(&program), 9.0);
}

#[test]
fn test_mutation_before_capture_close_is_visible() {
    // Writing through the still-open cell while the enclosing activation
    // runs: the enclosing local itself changes.
    let program = block(vec![
        assign("x", num(1.0)),
        assign("bump", function(None, &[], assign("x", num(2.0)))),
        call(name("bump"), vec![]),
        name("x"),
    ]);
    assert_num(&run(&program), 2.0);
}

// ---- Calls ----

#[test]
fn test_closure_arity_is_enforced() {
    let program = block(vec![
        assign("f", function(Some("f"), &["a", "b"], num(0.0))),
        call(name("f"), vec![num(1.0)]),
    ]);
    match run_err(&program) {
        RuntimeError::Arity {
            name,
            expected,
            got,
        } => {
            assert!(name.contains("fn f"));
            assert_eq!(expected, 2);
            assert_eq!(got, 1);
        }
        other => panic!("expected arity error, got {other}"),
    }
}

#[test]
fn test_host_call_arity_is_enforced() {
    let program = block(vec![
        assign_global("f", function(Some("f"), &["a"], name("a"))),
        null(),
    ]);
    let (mut interp, _) = run_with(&program, |_| Ok(()));
    let f = interp.global("f").unwrap();
    let err = interp.call_value(&f, vec![]).unwrap_err();
    assert!(matches!(err, RuntimeError::Arity { expected: 1, got: 0, .. }));
    // The interpreter survives an aborted call.
    assert_num(
        &interp.call_value(&f, vec![vesper_runtime::value::Value::Num(7.0)]).unwrap(),
        7.0,
    );
}

#[test]
fn test_host_invokes_a_script_method() {
    // The host drives call_value_invoking directly: the receiver travels as
    // argument 0 and binds to slot 0, where `this` reads it.
    let program = block(vec![
        assign_global(
            "m",
            function(Some("m"), &["self", "y"], add(get(this(), str_lit("base")), name("y"))),
        ),
        null(),
    ]);
    let (mut interp, _) = run_with(&program, |_| Ok(()));
    let m = interp.global("m").unwrap();
    let receiver = {
        let t = vesper_runtime::value::Value::new_table();
        if let vesper_runtime::value::Value::Table(inner) = &t {
            let key = vesper_runtime::table::TableKey::Str(interp.strings.intern("base"));
            inner
                .borrow_mut()
                .insert(key, vesper_runtime::value::Value::Num(40.0));
        }
        t
    };
    let v = interp
        .call_value_invoking(&m, vec![receiver, vesper_runtime::value::Value::Num(2.0)])
        .unwrap();
    assert_num(&v, 42.0);
}

#[test]
fn test_recursion_through_global() {
    // fib via a global binding, so the body can refer to itself.
    let fib_body = if_else(
        lt(name("n"), num(2.0)),
        name("n"),
        Some(add(
            call(name("fib"), vec![binary(
                vesper_compiler::ast::BinaryOp::Sub,
                name("n"),
                num(1.0),
            )]),
            call(name("fib"), vec![binary(
                vesper_compiler::ast::BinaryOp::Sub,
                name("n"),
                num(2.0),
            )]),
        )),
    );
    let program = block(vec![
        assign_global("fib", function(Some("fib"), &["n"], fib_body)),
        call(name("fib"), vec![num(10.0)]),
    ]);
    assert_num(&run(&program), 55.0);
}

#[test]
fn test_unbounded_recursion_overflows() {
    let program = block(vec![
        assign_global("loop", function(Some("loop"), &[], call(name("loop"), vec![]))),
        call(name("loop"), vec![]),
    ]);
    assert!(matches!(run_err(&program), RuntimeError::StackOverflow));
}

#[test]
fn test_return_expression_unwinds_the_call() {
    let program = block(vec![
        assign(
            "f",
            function(
                Some("f"),
                &[],
                block(vec![ret(num(1.0)), assign_global("after", num(1.0)), num(2.0)]),
            ),
        ),
        call(name("f"), vec![]),
    ]);
    let (mut interp, v) = run_with(&program, |_| Ok(()));
    assert_num(&v, 1.0);
    assert_null(&interp.global("after").unwrap_or(vesper_runtime::value::Value::Null));
}

#[test]
fn test_calling_a_non_callable_fails() {
    let err = run_err(&call(num(3.0), vec![]));
    match err {
        RuntimeError::Runtime { message, .. } => {
            assert!(message.contains("cannot call a number"));
        }
        other => panic!("unexpected error {other}"),
    }
}
