//! Closures: a shared prototype bound to concrete upvalue cells.
use std::rc::Rc;

use vesper_compiler::proto::Proto;

use crate::cell::UpvalueCell;

/// A callable instantiation of a prototype. Created each time a function
/// literal is evaluated, so one prototype may back many closures with
/// different captured cells. The cell array is sized to the prototype's
/// upvalue descriptors, in first-capture order.
#[derive(Debug)]
pub struct Closure {
    pub proto: Rc<Proto>,
    pub upvalues: Vec<Rc<UpvalueCell>>,
}

impl Closure {
    pub fn new(proto: Rc<Proto>, upvalues: Vec<Rc<UpvalueCell>>) -> Self {
        debug_assert_eq!(proto.upvalues.len(), upvalues.len());
        Closure { proto, upvalues }
    }

    pub fn name(&self) -> &str {
        &self.proto.name
    }

    pub fn param_count(&self) -> usize {
        self.proto.param_count as usize
    }
}
