/// Two-phase AST compiler: a declaration scan followed by code generation.
///
/// Vesper has no `let`: a local springs into existence the first time a
/// non-global name is assigned. The scan pass walks an expression before it
/// is lowered and registers such bindings, emitting one PUSH_NULL per new
/// local to reserve its stack slot. The lowering pass then emits the real
/// code, by which point every non-global assignment target must resolve to a
/// local or an upvalue.
///
/// Nested functions compile re-entrantly on a stack of per-function states
/// chained by parent index; upvalue resolution walks that chain.
pub mod scope;

use std::fmt;
use std::rc::Rc;

use crate::ast::{BinaryOp, Expr, ExprKind, Literal, LogicalOp, UnaryOp};
use crate::emitter::Emitter;
use crate::opcode::{Op, MAX_SHORT_ARG};
use crate::proto::{Constant, Proto, UpvalueDesc};
use scope::ScopeStack;
use vesper_core::string::{StringId, StringInterner};

/// Maximum arguments (and parameters) a call instruction can carry.
const MAX_CALL_ARGS: usize = u8::MAX as usize;

/// Compiler error, reported with the offending source line. Any error aborts
/// the whole unit: no partial prototypes are handed to the runtime.
#[derive(Clone, Debug)]
pub struct CompileError {
    pub message: String,
    pub line: u32,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

/// An upvalue recorded while compiling one function.
#[derive(Clone, Debug)]
struct UpvalueInfo {
    name: StringId,
    from_parent_local: bool,
    index: u16,
}

/// State for a single function being compiled.
struct FuncState {
    emitter: Emitter,
    scope: ScopeStack,
    upvalues: Vec<UpvalueInfo>,
    /// Index of the enclosing function's state, if any.
    parent: Option<usize>,
}

impl FuncState {
    fn new(parent: Option<usize>) -> Self {
        FuncState {
            emitter: Emitter::new(),
            scope: ScopeStack::new(),
            upvalues: Vec::new(),
            parent,
        }
    }
}

/// The compiler: interner plus the stack of nested function states.
pub struct Compiler {
    funcs: Vec<FuncState>,
    strings: StringInterner,
    source: String,
}

/// Compile a program into a prototype taking no parameters. Returns the
/// prototype together with the interner holding its names and string
/// literals.
pub fn compile(
    program: &Expr,
    source_name: &str,
) -> Result<(Rc<Proto>, StringInterner), CompileError> {
    let mut compiler = Compiler {
        funcs: vec![FuncState::new(None)],
        strings: StringInterner::new(),
        source: source_name.to_string(),
    };
    compiler.scan(program)?;
    compiler.lower(program)?;
    compiler.fs_mut().emitter.bytecode(Op::Return);
    let state = compiler.funcs.pop().expect("root function state");
    let proto = state
        .emitter
        .finish(source_name.to_string(), 0, Vec::new());
    Ok((proto, compiler.strings))
}

impl Compiler {
    fn fs(&self) -> &FuncState {
        self.funcs.last().unwrap()
    }

    fn fs_mut(&mut self) -> &mut FuncState {
        self.funcs.last_mut().unwrap()
    }

    fn error(&self, line: u32, msg: impl Into<String>) -> CompileError {
        CompileError {
            message: msg.into(),
            line,
        }
    }

    fn register_local(&mut self, name: StringId, line: u32) -> Result<usize, CompileError> {
        if self.fs().scope.num_locals() > MAX_SHORT_ARG {
            return Err(self.error(line, "too many local variables in one function"));
        }
        Ok(self.fs_mut().scope.register_local(name))
    }

    /// Resolve `name` as an upvalue of function `fi`, recording capture
    /// descriptors down the enclosing chain as needed. A repeated request
    /// for the same name returns the previously allocated index. `None`
    /// means the name is absent through the whole chain, so it is a global.
    fn index_of_upvalue(
        &mut self,
        fi: usize,
        name: StringId,
        line: u32,
    ) -> Result<Option<u16>, CompileError> {
        let parent = match self.funcs[fi].parent {
            Some(p) => p,
            None => return Ok(None),
        };
        if let Some(pos) = self.funcs[fi].upvalues.iter().position(|u| u.name == name) {
            return Ok(Some(pos as u16));
        }
        if let Some(slot) = self.funcs[parent].scope.index_of_local(name) {
            return self
                .add_upvalue(
                    fi,
                    UpvalueInfo {
                        name,
                        from_parent_local: true,
                        index: slot as u16,
                    },
                    line,
                )
                .map(Some);
        }
        if let Some(index) = self.index_of_upvalue(parent, name, line)? {
            return self
                .add_upvalue(
                    fi,
                    UpvalueInfo {
                        name,
                        from_parent_local: false,
                        index,
                    },
                    line,
                )
                .map(Some);
        }
        Ok(None)
    }

    fn add_upvalue(
        &mut self,
        fi: usize,
        info: UpvalueInfo,
        line: u32,
    ) -> Result<u16, CompileError> {
        let idx = self.funcs[fi].upvalues.len();
        if idx > MAX_SHORT_ARG {
            return Err(self.error(line, "too many upvalues in one function"));
        }
        self.funcs[fi].upvalues.push(info);
        Ok(idx as u16)
    }

    fn current_func(&self) -> usize {
        self.funcs.len() - 1
    }

    fn emit_indexed(&mut self, byte_op: Op, short_op: Op, index: usize) {
        self.fs_mut().emitter.bytecode_indexed(byte_op, short_op, index);
    }

    // ---- Declaration scan ----

    /// Walk `expr` before lowering it and register the implicit local
    /// bindings its assignments introduce. Purely additive: re-scanning an
    /// already-registered name finds the binding and does nothing, so the
    /// pass is idempotent. Nested blocks and function literals scan their
    /// own contents when they compile.
    pub fn scan(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Assign { global, name, rhs } => {
                if !global {
                    let id = self.strings.intern(name);
                    let fi = self.current_func();
                    if self.fs().scope.index_of_local(id).is_none()
                        && self.index_of_upvalue(fi, id, expr.line)?.is_none()
                    {
                        // The name exists nowhere yet: declare it here and
                        // reserve its slot's initial stack value.
                        self.register_local(id, expr.line)?;
                        self.fs_mut().emitter.bytecode(Op::PushNull);
                    }
                }
                self.scan(rhs)
            }
            ExprKind::If {
                condition,
                if_true,
                if_false,
            } => {
                self.scan(condition)?;
                self.scan(if_true)?;
                if let Some(e) = if_false {
                    self.scan(e)?;
                }
                Ok(())
            }
            ExprKind::While { condition, body } => {
                self.scan(condition)?;
                self.scan(body)
            }
            ExprKind::Logical { left, right, .. } | ExprKind::Binary { left, right, .. } => {
                self.scan(left)?;
                self.scan(right)
            }
            ExprKind::Unary { operand, .. } => self.scan(operand),
            ExprKind::Get { target, index, .. } => {
                self.scan(target)?;
                self.scan(index)
            }
            ExprKind::Set {
                target,
                index,
                value,
            } => {
                self.scan(target)?;
                self.scan(index)?;
                self.scan(value)
            }
            ExprKind::Call { callee, args } => {
                self.scan(callee)?;
                for arg in args {
                    self.scan(arg)?;
                }
                Ok(())
            }
            ExprKind::Invoke {
                target,
                index,
                args,
            } => {
                self.scan(target)?;
                self.scan(index)?;
                for arg in args {
                    self.scan(arg)?;
                }
                Ok(())
            }
            ExprKind::List(elems) => {
                for e in elems {
                    self.scan(e)?;
                }
                Ok(())
            }
            ExprKind::Table(entries) => {
                for (k, v) in entries {
                    self.scan(k)?;
                    self.scan(v)?;
                }
                Ok(())
            }
            ExprKind::Return(value) => self.scan(value),
            // Blocks scan their own statements when compiled; function
            // literals declare nothing in the enclosing function; the rest
            // cannot introduce bindings.
            ExprKind::Block(_)
            | ExprKind::Literal(_)
            | ExprKind::Null
            | ExprKind::This
            | ExprKind::Name(_)
            | ExprKind::Function { .. } => Ok(()),
        }
    }

    // ---- Code generation ----

    /// Emit code for `expr`, assuming every local it assigns was declared by
    /// the scan pass. Leaves exactly one value on the evaluation stack.
    pub fn lower(&mut self, expr: &Expr) -> Result<(), CompileError> {
        self.fs_mut().emitter.accept_line(expr.line);
        match &expr.kind {
            ExprKind::Block(exprs) => {
                if exprs.is_empty() {
                    self.fs_mut().emitter.bytecode(Op::PushNull);
                    return Ok(());
                }
                self.fs_mut().scope.begin_scope();
                for (i, e) in exprs.iter().enumerate() {
                    self.scan(e)?;
                    self.lower(e)?;
                    if i != exprs.len() - 1 {
                        self.fs_mut().emitter.bytecode(Op::Pop);
                    }
                }
                self.fs_mut().scope.end_scope();
                Ok(())
            }
            ExprKind::If {
                condition,
                if_true,
                if_false,
            } => {
                self.lower(condition)?;
                let jump_else = self.fs_mut().emitter.emit_jump(Op::JumpIfFalse);
                self.fs_mut().emitter.bytecode(Op::Pop);
                self.lower(if_true)?;
                let jump_out = self.fs_mut().emitter.emit_jump(Op::Jump);
                self.fs_mut().emitter.patch_jump(jump_else)?;
                self.fs_mut().emitter.bytecode(Op::Pop);
                match if_false {
                    Some(e) => self.lower(e)?,
                    None => self.fs_mut().emitter.bytecode(Op::PushNull),
                }
                self.fs_mut().emitter.patch_jump(jump_out)
            }
            ExprKind::While { condition, body } => {
                // The loop's value before any iteration has run.
                self.fs_mut().emitter.bytecode(Op::PushNull);
                let start = self.fs_mut().emitter.start_loop();
                self.lower(condition)?;
                let end_jump = self.fs_mut().emitter.emit_jump(Op::JumpIfFalse);
                self.fs_mut().emitter.bytecode(Op::Pop);
                self.fs_mut().emitter.bytecode(Op::Pop);
                self.lower(body)?;
                self.fs_mut().emitter.end_loop(start)?;
                self.fs_mut().emitter.patch_jump(end_jump)?;
                self.fs_mut().emitter.bytecode(Op::Pop);
                Ok(())
            }
            ExprKind::Logical { op, left, right } => {
                self.lower(left)?;
                let jump_op = match op {
                    LogicalOp::And => Op::JumpIfFalse,
                    LogicalOp::Or => Op::JumpIfTrue,
                };
                let short_circuit = self.fs_mut().emitter.emit_jump(jump_op);
                self.fs_mut().emitter.bytecode(Op::Pop);
                self.lower(right)?;
                self.fs_mut().emitter.patch_jump(short_circuit)
            }
            ExprKind::Binary { op, left, right } => {
                self.lower(left)?;
                self.lower(right)?;
                self.fs_mut().emitter.bytecode(binary_opcode(*op));
                Ok(())
            }
            ExprKind::Unary { op, operand } => {
                self.lower(operand)?;
                let opcode = match op {
                    UnaryOp::Not => Op::Not,
                    UnaryOp::Negate => Op::Negate,
                };
                self.fs_mut().emitter.bytecode(opcode);
                Ok(())
            }
            ExprKind::Literal(lit) => {
                let k = match lit {
                    Literal::Bool(b) => Constant::Bool(*b),
                    Literal::Num(n) => Constant::Num(*n),
                    Literal::Str(s) => Constant::Str(self.strings.intern(s)),
                };
                let idx = self.fs_mut().emitter.register_constant(k)?;
                self.emit_indexed(Op::Constant, Op::BigConstant, idx);
                Ok(())
            }
            ExprKind::Null => {
                self.fs_mut().emitter.bytecode(Op::PushNull);
                Ok(())
            }
            ExprKind::This => {
                self.fs_mut().emitter.bytecode_with_byte(Op::LoadLocal, 0);
                Ok(())
            }
            ExprKind::Name(name) => {
                let id = self.strings.intern(name);
                if let Some(slot) = self.fs().scope.index_of_local(id) {
                    self.emit_indexed(Op::LoadLocal, Op::BigLoadLocal, slot);
                } else {
                    let fi = self.current_func();
                    if let Some(idx) = self.index_of_upvalue(fi, id, expr.line)? {
                        self.emit_indexed(Op::LoadUpvalue, Op::BigLoadUpvalue, idx as usize);
                    } else {
                        let k = self.fs_mut().emitter.register_constant(Constant::Str(id))?;
                        self.emit_indexed(Op::LoadGlobal, Op::BigLoadGlobal, k);
                    }
                }
                Ok(())
            }
            ExprKind::Assign { global, name, rhs } => {
                let id = self.strings.intern(name);
                if *global {
                    let k = self.fs_mut().emitter.register_constant(Constant::Str(id))?;
                    self.lower(rhs)?;
                    self.emit_indexed(Op::SetGlobal, Op::BigSetGlobal, k);
                    return Ok(());
                }
                if let Some(slot) = self.fs().scope.index_of_local(id) {
                    self.lower(rhs)?;
                    self.emit_indexed(Op::SetLocal, Op::BigSetLocal, slot);
                    return Ok(());
                }
                let fi = self.current_func();
                match self.index_of_upvalue(fi, id, expr.line)? {
                    Some(idx) => {
                        self.lower(rhs)?;
                        self.emit_indexed(Op::SetUpvalue, Op::BigSetUpvalue, idx as usize);
                        Ok(())
                    }
                    // The declaration scan registers every assignable name,
                    // so this is unreachable from well-formed input.
                    None => Err(self.error(
                        expr.line,
                        format!("assignment target '{name}' resolved to neither local nor upvalue; compiler bug"),
                    )),
                }
            }
            ExprKind::Get {
                target,
                index,
                strong,
            } => {
                self.lower(target)?;
                self.lower(index)?;
                let opcode = if *strong { Op::GetStrong } else { Op::Get };
                self.fs_mut().emitter.bytecode(opcode);
                Ok(())
            }
            ExprKind::Set {
                target,
                index,
                value,
            } => {
                self.lower(target)?;
                self.lower(index)?;
                self.lower(value)?;
                self.fs_mut().emitter.bytecode(Op::Set);
                Ok(())
            }
            ExprKind::Call { callee, args } => {
                if args.len() > MAX_CALL_ARGS {
                    return Err(self.error(expr.line, "too many arguments in call"));
                }
                self.lower(callee)?;
                for arg in args {
                    self.lower(arg)?;
                }
                self.fs_mut()
                    .emitter
                    .bytecode_with_byte(Op::Call, args.len() as u8);
                Ok(())
            }
            ExprKind::Invoke {
                target,
                index,
                args,
            } => {
                if args.len() > MAX_CALL_ARGS {
                    return Err(self.error(expr.line, "too many arguments in invocation"));
                }
                self.lower(target)?;
                self.lower(index)?;
                for arg in args {
                    self.lower(arg)?;
                }
                self.fs_mut()
                    .emitter
                    .bytecode_with_byte(Op::Invoke, args.len() as u8);
                Ok(())
            }
            ExprKind::Function { name, params, body } => {
                self.lower_function(expr.line, name.as_deref(), params, body)
            }
            ExprKind::List(elems) => {
                self.fs_mut().emitter.bytecode(Op::NewList);
                for elem in elems {
                    self.lower(elem)?;
                    self.fs_mut().emitter.bytecode(Op::ListAdd);
                }
                Ok(())
            }
            ExprKind::Table(entries) => {
                self.fs_mut().emitter.bytecode(Op::NewTable);
                for (key, value) in entries {
                    // Value before key: the runtime pops the key first, then
                    // the value, then inserts into the table beneath them.
                    self.lower(value)?;
                    self.lower(key)?;
                    self.fs_mut().emitter.bytecode(Op::TableSet);
                }
                Ok(())
            }
            ExprKind::Return(value) => {
                self.lower(value)?;
                self.fs_mut().emitter.bytecode(Op::Return);
                Ok(())
            }
        }
    }

    /// Compile a function literal in a fresh function state chained to the
    /// enclosing one, then register the finished prototype as a constant of
    /// the enclosing function and emit the closure instruction.
    fn lower_function(
        &mut self,
        line: u32,
        name: Option<&str>,
        params: &[String],
        body: &Expr,
    ) -> Result<(), CompileError> {
        if params.len() > MAX_CALL_ARGS {
            return Err(self.error(line, "too many parameters"));
        }
        let parent = self.current_func();
        self.funcs.push(FuncState::new(Some(parent)));
        for param in params {
            let id = self.strings.intern(param);
            self.register_local(id, line)?;
        }
        self.scan(body)?;
        self.lower(body)?;
        self.fs_mut().emitter.bytecode(Op::Return);

        let display_name = match name {
            Some(n) => format!("fn {n} at {}:{line}", self.source),
            None => format!("fn <anon> at {}:{line}", self.source),
        };
        let state = self.funcs.pop().expect("nested function state");
        let upvalues = state
            .upvalues
            .iter()
            .map(|u| UpvalueDesc {
                name: u.name,
                from_parent_local: u.from_parent_local,
                index: u.index,
            })
            .collect();
        let proto = state
            .emitter
            .finish(display_name, params.len() as u8, upvalues);

        let idx = self
            .fs_mut()
            .emitter
            .register_constant(Constant::Proto(proto))?;
        self.emit_indexed(Op::Constant, Op::BigConstant, idx);
        self.fs_mut().emitter.bytecode(Op::Closure);
        Ok(())
    }
}

fn binary_opcode(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Mod => Op::Mod,
        BinaryOp::Eq => Op::Eq,
        BinaryOp::Neq => Op::Neq,
        BinaryOp::Lt => Op::Lt,
        BinaryOp::Lte => Op::Lte,
        BinaryOp::Gt => Op::Gt,
        BinaryOp::Gte => Op::Gte,
    }
}
