//! Vesper runtime: values, closures, the native bridge, and the bytecode
//! interpreter.

pub mod cell;
pub mod closure;
pub mod coerce;
mod dispatch;
pub mod error;
pub mod frame;
pub mod native;
pub mod table;
pub mod value;
pub mod vm;

use error::RuntimeError;
use value::Value;
use vesper_compiler::ast::Expr;
use vm::Interpreter;

/// Compile and execute a program, returning its value.
pub fn execute_program(program: &Expr) -> Result<Value, RuntimeError> {
    let (_interp, result) = execute_program_with(program, |_| Ok(()))?;
    Ok(result)
}

/// Compile a program, let `setup` configure the interpreter (register
/// natives, bind globals, set a cost budget), then execute. Returns the
/// interpreter alongside the result so the host can inspect globals or keep
/// calling into compiled code.
pub fn execute_program_with(
    program: &Expr,
    setup: impl FnOnce(&mut Interpreter) -> Result<(), RuntimeError>,
) -> Result<(Interpreter, Value), RuntimeError> {
    let (proto, strings) =
        vesper_compiler::compiler::compile(program, "=input").map_err(|e| {
            RuntimeError::Runtime {
                message: format!("compile error: {}", e.message),
                line: e.line,
            }
        })?;
    let mut interp = Interpreter::new(strings);
    setup(&mut interp)?;
    let result = interp.run_program(proto)?;
    Ok((interp, result))
}
