//! Upvalue cells: the language's only aliasing construct.
//!
//! A cell is shared (`Rc`) by every closure that captured the same enclosing
//! local, so a write through one captured reference is visible through all
//! others. While the enclosing activation is live the cell is *open* and
//! points at a stack slot; when that activation returns the cell is *closed*
//! and carries the value itself.
use std::cell::RefCell;
use std::rc::Rc;

use crate::value::Value;

#[derive(Debug)]
pub struct UpvalueCell {
    state: RefCell<CellState>,
}

#[derive(Debug)]
enum CellState {
    /// Points at an absolute stack slot of the running interpreter.
    Open(usize),
    /// The enclosing activation returned; the cell owns the value.
    Closed(Value),
}

impl UpvalueCell {
    /// Create an open cell pointing at `slot`.
    pub fn open(slot: usize) -> Rc<UpvalueCell> {
        Rc::new(UpvalueCell {
            state: RefCell::new(CellState::Open(slot)),
        })
    }

    /// The stack slot this cell points at, if still open.
    pub fn open_slot(&self) -> Option<usize> {
        match *self.state.borrow() {
            CellState::Open(slot) => Some(slot),
            CellState::Closed(_) => None,
        }
    }

    /// Read the cell's current value.
    pub fn get(&self, stack: &[Value]) -> Value {
        match &*self.state.borrow() {
            CellState::Open(slot) => stack[*slot].clone(),
            CellState::Closed(v) => v.clone(),
        }
    }

    /// Write the cell's value.
    pub fn set(&self, stack: &mut [Value], value: Value) {
        match &mut *self.state.borrow_mut() {
            CellState::Open(slot) => stack[*slot] = value,
            CellState::Closed(v) => *v = value,
        }
    }

    /// Close the cell, moving the slot's value into it.
    pub fn close(&self, stack: &[Value]) {
        let mut state = self.state.borrow_mut();
        if let CellState::Open(slot) = *state {
            *state = CellState::Closed(stack[slot].clone());
        }
    }
}
