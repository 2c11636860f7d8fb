//! The bytecode execution loop: fetch, decode by fixed operand width,
//! execute.
use std::rc::Rc;

use vesper_compiler::opcode::{Op, OperandKind};
use vesper_compiler::proto::Constant;

use crate::closure::Closure;
use crate::error::RuntimeError;
use crate::frame::CallFrame;
use crate::table::TableKey;
use crate::value::{format_num, Value};
use crate::vm::{Interpreter, MAX_CALL_DEPTH};

fn runtime(line: u32, message: String) -> RuntimeError {
    RuntimeError::Runtime { message, line }
}

/// Run until the frame at `entry_depth` returns, yielding its result.
/// Nested calls to closures execute inline on the same frame stack; calls to
/// natives dispatch through the bridge without a frame.
pub(crate) fn execute(
    interp: &mut Interpreter,
    entry_depth: usize,
) -> Result<Value, RuntimeError> {
    loop {
        interp.add_cost(1)?;

        let frame = interp.frames.last().expect("no active frame");
        let proto = Rc::clone(&frame.closure.proto);
        let base = frame.base;
        let op_pc = frame.pc;

        let op = Op::from_u8(proto.code[op_pc]).ok_or_else(|| {
            RuntimeError::msg(format!("invalid opcode {:#04x}", proto.code[op_pc]))
        })?;
        let operand = match op.operand_kind() {
            OperandKind::None => 0usize,
            OperandKind::Byte => proto.code[op_pc + 1] as usize,
            OperandKind::Short => {
                u16::from_be_bytes([proto.code[op_pc + 1], proto.code[op_pc + 2]]) as usize
            }
        };
        let next_pc = op_pc + 1 + op.operand_kind().len();
        interp.frames.last_mut().unwrap().pc = next_pc;
        let line = proto.line_at(op_pc);

        match op {
            Op::PushNull => interp.stack.push(Value::Null),
            Op::Pop => {
                interp.pop();
            }

            Op::Constant | Op::BigConstant => {
                let value = constant_value(&proto.constants[operand]);
                interp.stack.push(value);
            }

            // ---- Arithmetic ----
            Op::Add => {
                let b = interp.pop();
                let a = interp.pop();
                match (&a, &b) {
                    (Value::Num(x), Value::Num(y)) => interp.stack.push(Value::Num(x + y)),
                    _ if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) => {
                        let s = format!(
                            "{}{}",
                            a.display(&interp.strings),
                            b.display(&interp.strings)
                        );
                        let id = interp.strings.intern(&s);
                        interp.stack.push(Value::Str(id));
                    }
                    _ => {
                        return Err(runtime(
                            line,
                            format!("cannot add {} and {}", a.type_name(), b.type_name()),
                        ))
                    }
                }
            }
            Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                let b = interp.pop();
                let a = interp.pop();
                match (a.as_num(), b.as_num()) {
                    (Some(x), Some(y)) => {
                        let result = match op {
                            Op::Sub => x - y,
                            Op::Mul => x * y,
                            Op::Div => x / y,
                            _ => x % y,
                        };
                        interp.stack.push(Value::Num(result));
                    }
                    _ => {
                        return Err(runtime(
                            line,
                            format!(
                                "arithmetic on {} and {}",
                                a.type_name(),
                                b.type_name()
                            ),
                        ))
                    }
                }
            }
            Op::Negate => {
                let a = interp.pop();
                match a.as_num() {
                    Some(x) => interp.stack.push(Value::Num(-x)),
                    None => {
                        return Err(runtime(
                            line,
                            format!("cannot negate a {} value", a.type_name()),
                        ))
                    }
                }
            }

            // ---- Comparison and logic ----
            Op::Eq => {
                let b = interp.pop();
                let a = interp.pop();
                interp.stack.push(Value::Bool(a.equals(&b)));
            }
            Op::Neq => {
                let b = interp.pop();
                let a = interp.pop();
                interp.stack.push(Value::Bool(!a.equals(&b)));
            }
            Op::Lt | Op::Lte | Op::Gt | Op::Gte => {
                let b = interp.pop();
                let a = interp.pop();
                let ordering = match (&a, &b) {
                    (Value::Num(x), Value::Num(y)) => x.partial_cmp(y),
                    (Value::Str(x), Value::Str(y)) => {
                        Some(interp.strings.get(*x).cmp(interp.strings.get(*y)))
                    }
                    _ => {
                        return Err(runtime(
                            line,
                            format!("cannot compare {} and {}", a.type_name(), b.type_name()),
                        ))
                    }
                };
                let result = match (op, ordering) {
                    (Op::Lt, Some(o)) => o.is_lt(),
                    (Op::Lte, Some(o)) => o.is_le(),
                    (Op::Gt, Some(o)) => o.is_gt(),
                    (Op::Gte, Some(o)) => o.is_ge(),
                    // Incomparable numbers (NaN involved).
                    (_, None) => false,
                    _ => unreachable!(),
                };
                interp.stack.push(Value::Bool(result));
            }
            Op::Not => {
                let a = interp.pop();
                interp.stack.push(Value::Bool(!a.is_truthy()));
            }

            // ---- Locals ----
            Op::LoadLocal | Op::BigLoadLocal => {
                let value = interp.stack[base + operand].clone();
                interp.stack.push(value);
            }
            Op::SetLocal | Op::BigSetLocal => {
                // Assignment is an expression: the value stays on the stack.
                let value = interp.peek().clone();
                interp.stack[base + operand] = value;
            }

            // ---- Upvalues ----
            Op::LoadUpvalue | Op::BigLoadUpvalue => {
                let cell =
                    Rc::clone(&interp.frames.last().unwrap().closure.upvalues[operand]);
                let value = cell.get(&interp.stack);
                interp.stack.push(value);
            }
            Op::SetUpvalue | Op::BigSetUpvalue => {
                let cell =
                    Rc::clone(&interp.frames.last().unwrap().closure.upvalues[operand]);
                let value = interp.peek().clone();
                cell.set(&mut interp.stack, value);
            }

            // ---- Globals ----
            Op::LoadGlobal | Op::BigLoadGlobal => {
                let id = global_name(&proto.constants[operand], line)?;
                let value = interp.globals.get(&id).cloned().unwrap_or(Value::Null);
                interp.stack.push(value);
            }
            Op::SetGlobal | Op::BigSetGlobal => {
                let id = global_name(&proto.constants[operand], line)?;
                let value = interp.peek().clone();
                interp.globals.insert(id, value);
            }

            // ---- Jumps ----
            Op::Jump => {
                jump(interp, next_pc, operand);
            }
            Op::JumpIfFalse => {
                if !interp.peek().is_truthy() {
                    jump(interp, next_pc, operand);
                }
            }
            Op::JumpIfTrue => {
                if interp.peek().is_truthy() {
                    jump(interp, next_pc, operand);
                }
            }

            // ---- Calls ----
            Op::Call => {
                let argc = operand;
                let callee_pos = interp.stack.len() - argc - 1;
                let callee = interp.stack[callee_pos].clone();
                match callee {
                    Value::Closure(closure) => {
                        check_closure_call(interp, &closure, argc)?;
                        interp.frames.push(CallFrame {
                            closure,
                            base: callee_pos + 1,
                            ret_to: callee_pos,
                            pc: 0,
                        });
                    }
                    Value::Native(native) => {
                        let args = interp.stack.split_off(callee_pos + 1);
                        interp.pop();
                        interp.add_cost(native.cost_penalty(&args))?;
                        let result = native
                            .invoke(&mut interp.strings, args)
                            .map_err(|e| e.with_line(line))?;
                        interp.stack.push(result);
                    }
                    other => {
                        return Err(runtime(
                            line,
                            format!("cannot call a {} value", other.type_name()),
                        ))
                    }
                }
            }
            Op::Invoke => {
                let argc = operand;
                let args_start = interp.stack.len() - argc;
                let mut args = interp.stack.split_off(args_start);
                let index = interp.pop();
                let instance = interp.pop();
                // Method lookup is strong: a missing entry is an error, not
                // a null callee.
                let callee = index_value(interp, &instance, &index, true, line)?;
                let mut full_args = Vec::with_capacity(argc + 1);
                full_args.push(instance);
                full_args.append(&mut args);
                match callee {
                    Value::Closure(closure) => {
                        check_closure_call(interp, &closure, full_args.len())?;
                        let ret_to = interp.stack.len();
                        interp.stack.extend(full_args);
                        interp.frames.push(CallFrame {
                            closure,
                            base: ret_to,
                            ret_to,
                            pc: 0,
                        });
                    }
                    Value::Native(native) => {
                        interp.add_cost(native.cost_penalty(&full_args))?;
                        let result = native
                            .invoke(&mut interp.strings, full_args)
                            .map_err(|e| e.with_line(line))?;
                        interp.stack.push(result);
                    }
                    other => {
                        return Err(runtime(
                            line,
                            format!("cannot invoke a {} value", other.type_name()),
                        ))
                    }
                }
            }

            Op::Closure => {
                let child = match interp.pop() {
                    Value::Prototype(p) => p,
                    other => {
                        return Err(runtime(
                            line,
                            format!("CLOSURE expects a prototype, got {}", other.type_name()),
                        ))
                    }
                };
                let parent = Rc::clone(&interp.frames.last().unwrap().closure);
                let mut cells = Vec::with_capacity(child.upvalues.len());
                for desc in &child.upvalues {
                    let cell = if desc.from_parent_local {
                        // Capture the live slot of the executing activation.
                        interp.find_or_create_upvalue(base + desc.index as usize)
                    } else {
                        // Share the enclosing closure's own cell.
                        Rc::clone(&parent.upvalues[desc.index as usize])
                    };
                    cells.push(cell);
                }
                interp
                    .stack
                    .push(Value::Closure(Rc::new(Closure::new(child, cells))));
            }

            Op::Return => {
                let result = interp.pop();
                let frame = interp.frames.pop().expect("return without frame");
                interp.close_upvalues(frame.base);
                interp.stack.truncate(frame.ret_to);
                if interp.frames.len() == entry_depth {
                    return Ok(result);
                }
                interp.stack.push(result);
            }

            // ---- Containers ----
            Op::NewList => interp.stack.push(Value::new_list()),
            Op::ListAdd => {
                let value = interp.pop();
                match interp.peek() {
                    Value::List(l) => l.borrow_mut().push(value),
                    other => {
                        return Err(runtime(
                            line,
                            format!("LIST_ADD on a {} value", other.type_name()),
                        ))
                    }
                }
            }
            Op::NewTable => interp.stack.push(Value::new_table()),
            Op::TableSet => {
                // The constructor pushed value then key.
                let key = interp.pop();
                let value = interp.pop();
                let key = TableKey::from_value(&key).ok_or_else(|| {
                    runtime(line, format!("invalid table key of type {}", key.type_name()))
                })?;
                match interp.peek() {
                    Value::Table(t) => t.borrow_mut().insert(key, value),
                    other => {
                        return Err(runtime(
                            line,
                            format!("TABLE_SET on a {} value", other.type_name()),
                        ))
                    }
                }
            }
            Op::Get | Op::GetStrong => {
                let index = interp.pop();
                let target = interp.pop();
                let value = index_value(interp, &target, &index, op == Op::GetStrong, line)?;
                interp.stack.push(value);
            }
            Op::Set => {
                let value = interp.pop();
                let index = interp.pop();
                let target = interp.pop();
                store_index(&target, &index, value.clone(), line)?;
                interp.stack.push(value);
            }
        }
    }
}

fn constant_value(k: &Constant) -> Value {
    match k {
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Num(n) => Value::Num(*n),
        Constant::Str(id) => Value::Str(*id),
        Constant::Proto(p) => Value::Prototype(Rc::clone(p)),
    }
}

fn global_name(k: &Constant, line: u32) -> Result<vesper_core::string::StringId, RuntimeError> {
    match k {
        Constant::Str(id) => Ok(*id),
        _ => Err(runtime(
            line,
            "global name constant is not a string".to_string(),
        )),
    }
}

fn jump(interp: &mut Interpreter, next_pc: usize, operand: usize) {
    let rel = operand as u16 as i16;
    let frame = interp.frames.last_mut().unwrap();
    frame.pc = (next_pc as i64 + rel as i64) as usize;
}

fn check_closure_call(
    interp: &Interpreter,
    closure: &Closure,
    argc: usize,
) -> Result<(), RuntimeError> {
    if argc != closure.param_count() {
        return Err(RuntimeError::Arity {
            name: closure.name().to_string(),
            expected: closure.param_count(),
            got: argc,
        });
    }
    if interp.frames.len() >= MAX_CALL_DEPTH {
        return Err(RuntimeError::StackOverflow);
    }
    Ok(())
}

/// Look a value up in a container. Permissive lookup yields null for a
/// missing table entry; strong lookup makes it an error. List indexing is
/// always bounds-checked.
fn index_value(
    interp: &Interpreter,
    target: &Value,
    index: &Value,
    strong: bool,
    line: u32,
) -> Result<Value, RuntimeError> {
    match target {
        Value::Table(t) => {
            let key = TableKey::from_value(index).ok_or_else(|| {
                runtime(
                    line,
                    format!("invalid table key of type {}", index.type_name()),
                )
            })?;
            match t.borrow().get(&key) {
                Some(v) => Ok(v.clone()),
                None if strong => Err(runtime(
                    line,
                    format!("no such entry: {}", key.display(&interp.strings)),
                )),
                None => Ok(Value::Null),
            }
        }
        Value::List(l) => {
            let list = l.borrow();
            let i = list_index(list.len(), index, line)?;
            Ok(list[i].clone())
        }
        other => Err(runtime(
            line,
            format!("cannot index a {} value", other.type_name()),
        )),
    }
}

fn store_index(
    target: &Value,
    index: &Value,
    value: Value,
    line: u32,
) -> Result<(), RuntimeError> {
    match target {
        Value::Table(t) => {
            let key = TableKey::from_value(index).ok_or_else(|| {
                runtime(
                    line,
                    format!("invalid table key of type {}", index.type_name()),
                )
            })?;
            t.borrow_mut().insert(key, value);
            Ok(())
        }
        Value::List(l) => {
            let mut list = l.borrow_mut();
            let i = list_index(list.len(), index, line)?;
            list[i] = value;
            Ok(())
        }
        other => Err(runtime(
            line,
            format!("cannot index a {} value", other.type_name()),
        )),
    }
}

fn list_index(len: usize, index: &Value, line: u32) -> Result<usize, RuntimeError> {
    let n = index.as_num().ok_or_else(|| {
        runtime(
            line,
            format!("list index must be a number, got {}", index.type_name()),
        )
    })?;
    if n.fract() != 0.0 || n < 0.0 || n >= len as f64 {
        return Err(runtime(
            line,
            format!("list index {} out of range (len {len})", format_num(n)),
        ));
    }
    Ok(n as usize)
}
