use super::helpers::*;
use vesper_compiler::compiler::compile;
use vesper_compiler::opcode::Op;

#[test]
fn test_function_literal_emits_constant_then_closure() {
    let (proto, _) = compile_ok(&function(None, &[], null()));
    assert_eq!(ops(&proto), vec![Op::Constant, Op::Closure, Op::Return]);
}

#[test]
fn test_prototype_metadata() {
    let (proto, _) = compile_ok(&at(
        3,
        vesper_compiler::ast::ExprKind::Function {
            name: Some("adder".to_string()),
            params: vec!["a".to_string(), "b".to_string()],
            body: binary(
                vesper_compiler::ast::BinaryOp::Add,
                name("a"),
                name("b"),
            )
            .into(),
        },
    ));
    let inner = nested_proto(&proto);
    assert_eq!(inner.name, "fn adder at test:3");
    assert_eq!(inner.param_count, 2);
    assert!(inner.upvalues.is_empty());
}

#[test]
fn test_anonymous_function_name() {
    let (proto, _) = compile_ok(&function(None, &[], null()));
    let inner = nested_proto(&proto);
    assert_eq!(inner.name, "fn <anon> at test:1");
}

#[test]
fn test_params_bind_to_leading_slots() {
    let (proto, _) = compile_ok(&function(None, &["a", "b", "c"], name("c")));
    let inner = nested_proto(&proto);
    assert_eq!(operands_of(&inner, Op::LoadLocal), vec![2]);
}

#[test]
fn test_this_is_slot_zero() {
    let (proto, _) = compile_ok(&function(
        None,
        &["self", "y"],
        at(1, vesper_compiler::ast::ExprKind::This),
    ));
    let inner = nested_proto(&proto);
    assert_eq!(ops(&inner), vec![Op::LoadLocal, Op::Return]);
    assert_eq!(operands_of(&inner, Op::LoadLocal), vec![0]);
}

#[test]
fn test_body_ends_with_return() {
    let (proto, _) = compile_ok(&function(None, &[], num(1.0)));
    let inner = nested_proto(&proto);
    assert_eq!(*ops(&inner).last().unwrap(), Op::Return);
}

#[test]
fn test_explicit_return_mid_body() {
    let (proto, _) = compile_ok(&function(
        None,
        &[],
        block(vec![ret(num(1.0)), num(2.0)]),
    ));
    let inner = nested_proto(&proto);
    // One RETURN from the return expression, one closing the body.
    assert_eq!(count_op(&inner, Op::Return), 2);
}

#[test]
fn test_non_block_body_with_assignment_declares_local() {
    // The body is scanned before lowering even when it is not a block, so a
    // first assignment still introduces a local.
    let (proto, _) = compile_ok(&function(None, &[], assign("tmp", num(1.0))));
    let inner = nested_proto(&proto);
    assert_eq!(
        ops(&inner),
        vec![Op::PushNull, Op::Constant, Op::SetLocal, Op::Return]
    );
}

#[test]
fn test_too_many_arguments_is_an_error() {
    let args: Vec<_> = (0..256).map(|i| num(i as f64)).collect();
    let err = compile(&call(name("f"), args), "test").unwrap_err();
    assert!(err.message.contains("too many arguments"));
}

#[test]
fn test_too_many_parameters_is_an_error() {
    let params: Vec<String> = (0..256).map(|i| format!("p{i}")).collect();
    let param_refs: Vec<&str> = params.iter().map(String::as_str).collect();
    let err = compile(&function(None, &param_refs, null()), "test").unwrap_err();
    assert!(err.message.contains("too many parameters"));
}

#[test]
fn test_compile_error_display_carries_line() {
    let args: Vec<_> = (0..256).map(|i| num(i as f64)).collect();
    let err = compile(&at(9, vesper_compiler::ast::ExprKind::Call {
        callee: name("f").into(),
        args,
    }), "test")
    .unwrap_err();
    assert_eq!(err.line, 9);
    assert!(format!("{err}").starts_with("9:"));
}
