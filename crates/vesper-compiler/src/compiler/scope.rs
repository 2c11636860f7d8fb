/// Scope and local variable tracking for one function compilation.
use vesper_core::string::StringId;

/// A local variable binding in the current function.
#[derive(Clone, Debug)]
pub struct LocalVar {
    pub name: StringId,
    /// Stack slot index, assigned densely in declaration order.
    pub slot: usize,
}

/// Tracks the locals and lexical block boundaries of a single function.
/// Never crosses a function boundary: each nested function compilation owns
/// its own `ScopeStack`, chained through the compiler for upvalue capture.
pub struct ScopeStack {
    /// All locals currently in scope, in declaration order.
    locals: Vec<LocalVar>,
    /// Local count at each open block's entry, innermost last.
    marks: Vec<usize>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            locals: Vec::new(),
            marks: Vec::new(),
        }
    }

    /// Enter a lexical block.
    pub fn begin_scope(&mut self) {
        self.marks.push(self.locals.len());
    }

    /// Leave the innermost block, removing every local declared inside it.
    /// Emits no code: the freed slots are simply reusable by sibling blocks.
    pub fn end_scope(&mut self) {
        let mark = self.marks.pop().expect("end_scope without begin_scope");
        self.locals.truncate(mark);
    }

    /// Register a new local at the next free slot and return the slot.
    /// Re-registering a name that is already in scope shadows the earlier
    /// binding until this one goes out of scope.
    pub fn register_local(&mut self, name: StringId) -> usize {
        let slot = self.locals.len();
        self.locals.push(LocalVar { name, slot });
        slot
    }

    /// Look up a local by name, most recently declared first.
    pub fn index_of_local(&self, name: StringId) -> Option<usize> {
        self.locals.iter().rev().find(|v| v.name == name).map(|v| v.slot)
    }

    /// Number of locals currently in scope.
    pub fn num_locals(&self) -> usize {
        self.locals.len()
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}
