//! The interpreter: stack, frames, globals, upvalue bookkeeping, and the
//! uniform callable contract shared by closures and bridged natives.
use std::rc::Rc;

use indexmap::IndexMap;

use vesper_compiler::proto::Proto;
use vesper_core::string::{StringId, StringInterner};

use crate::cell::UpvalueCell;
use crate::closure::Closure;
use crate::dispatch;
use crate::error::RuntimeError;
use crate::frame::CallFrame;
use crate::native::{BridgeError, NativeFunction};
use crate::value::Value;

/// Maximum nested call depth.
pub const MAX_CALL_DEPTH: usize = 200;

pub struct Interpreter {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub globals: IndexMap<StringId, Value>,
    /// Cells still pointing at live stack slots, in creation order.
    pub(crate) open_upvalues: Vec<Rc<UpvalueCell>>,
    pub strings: StringInterner,
    cost: u64,
    max_cost: Option<u64>,
}

impl Interpreter {
    /// Create an interpreter around the interner the compiler produced.
    pub fn new(strings: StringInterner) -> Self {
        Interpreter {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: IndexMap::new(),
            open_upvalues: Vec::new(),
            strings,
            cost: 0,
            max_cost: None,
        }
    }

    /// Instantiate a top-level prototype (no upvalues) and run it.
    pub fn run_program(&mut self, proto: Rc<Proto>) -> Result<Value, RuntimeError> {
        let closure = Rc::new(Closure::new(proto, Vec::new()));
        self.call_closure(closure, Vec::new())
    }

    /// Call a closure with the given arguments, binding them to parameter
    /// slots 0..param_count-1 of a fresh activation.
    pub fn call_closure(
        &mut self,
        closure: Rc<Closure>,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if args.len() != closure.param_count() {
            return Err(RuntimeError::Arity {
                name: closure.name().to_string(),
                expected: closure.param_count(),
                got: args.len(),
            });
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(RuntimeError::StackOverflow);
        }
        let entry_frames = self.frames.len();
        let entry_stack = self.stack.len();
        let base = self.stack.len();
        self.stack.extend(args);
        self.frames.push(CallFrame {
            closure,
            base,
            ret_to: base,
            pc: 0,
        });
        match dispatch::execute(self, entry_frames) {
            Ok(v) => Ok(v),
            Err(e) => {
                // An error aborts only this call: unwind to the entry state.
                self.frames.truncate(entry_frames);
                self.close_upvalues(entry_stack);
                self.stack.truncate(entry_stack);
                Err(e)
            }
        }
    }

    /// Call any callable value through the uniform contract.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match callee {
            Value::Closure(c) => Rc::clone(c).call(self, args),
            Value::Native(n) => Rc::clone(n).call(self, args),
            other => Err(RuntimeError::msg(format!(
                "cannot call a {} value",
                other.type_name()
            ))),
        }
    }

    /// Method-style variant of [`Interpreter::call_value`]; `args[0]` is the
    /// receiver.
    pub fn call_value_invoking(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Closure(c) => Rc::clone(c).call_invoking(self, args),
            Value::Native(n) => Rc::clone(n).call_invoking(self, args),
            other => Err(RuntimeError::msg(format!(
                "cannot call a {} value",
                other.type_name()
            ))),
        }
    }

    /// Register a bridged native under its own name as a global. Registering
    /// a second native under the same name is a bridge error.
    pub fn register_native(&mut self, native: NativeFunction) -> Result<(), BridgeError> {
        let id = self.strings.intern(native.name());
        if self.globals.contains_key(&id) {
            return Err(BridgeError::AlreadyRegistered(native.name().to_string()));
        }
        self.globals.insert(id, Value::Native(Rc::new(native)));
        Ok(())
    }

    /// Bind a global by name.
    pub fn define_global(&mut self, name: &str, value: Value) {
        let id = self.strings.intern(name);
        self.globals.insert(id, value);
    }

    /// Look up a global by name.
    pub fn global(&mut self, name: &str) -> Option<Value> {
        let id = self.strings.intern(name);
        self.globals.get(&id).cloned()
    }

    /// Abstract cost spent so far.
    pub fn cost(&self) -> u64 {
        self.cost
    }

    /// Set or clear the abstract cost budget.
    pub fn set_max_cost(&mut self, limit: Option<u64>) {
        self.max_cost = limit;
    }

    pub(crate) fn add_cost(&mut self, amount: u64) -> Result<(), RuntimeError> {
        self.cost += amount;
        match self.max_cost {
            Some(limit) if self.cost > limit => Err(RuntimeError::CostLimit(limit)),
            _ => Ok(()),
        }
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("evaluation stack underflow")
    }

    pub(crate) fn peek(&self) -> &Value {
        self.stack.last().expect("evaluation stack underflow")
    }

    /// Find the open cell for a stack slot, or create one. Two captures of
    /// the same live local must share one cell.
    pub(crate) fn find_or_create_upvalue(&mut self, slot: usize) -> Rc<UpvalueCell> {
        for cell in &self.open_upvalues {
            if cell.open_slot() == Some(slot) {
                return Rc::clone(cell);
            }
        }
        let cell = UpvalueCell::open(slot);
        self.open_upvalues.push(Rc::clone(&cell));
        cell
    }

    /// Close every open cell at or above `from_slot`: the activation that
    /// owned those slots is returning.
    pub(crate) fn close_upvalues(&mut self, from_slot: usize) {
        let stack = &self.stack;
        self.open_upvalues.retain(|cell| match cell.open_slot() {
            Some(slot) if slot >= from_slot => {
                cell.close(stack);
                false
            }
            Some(_) => true,
            None => false,
        });
    }
}

/// The uniform callable contract: closures and bridged natives are invoked
/// identically, by plain call or by method-style invocation (receiver as
/// argument 0).
pub trait Callable {
    fn param_count(&self) -> usize;
    fn call(&self, interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError>;
    fn call_invoking(
        &self,
        interp: &mut Interpreter,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        self.call(interp, args)
    }
}

impl Callable for Rc<Closure> {
    fn param_count(&self) -> usize {
        Closure::param_count(self)
    }

    fn call(&self, interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
        interp.call_closure(Rc::clone(self), args)
    }
}

impl Callable for Rc<NativeFunction> {
    fn param_count(&self) -> usize {
        NativeFunction::param_count(self)
    }

    fn call(&self, interp: &mut Interpreter, args: Vec<Value>) -> Result<Value, RuntimeError> {
        interp.add_cost(self.cost_penalty(&args))?;
        self.invoke(&mut interp.strings, args)
    }
}
