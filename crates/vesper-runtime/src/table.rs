//! The table container: an insertion-ordered map.
use indexmap::IndexMap;

use crate::value::Value;
use vesper_core::string::{StringId, StringInterner};

/// A hashable table key. Only primitive values can be keys; numbers are
/// canonicalized so `-0.0` and `0.0` address the same entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TableKey {
    Bool(bool),
    /// Bit pattern of the canonicalized number.
    Num(u64),
    Str(StringId),
}

impl TableKey {
    /// Convert a value to a key. Returns None for null and for values with
    /// reference identity (lists, tables, callables).
    pub fn from_value(v: &Value) -> Option<TableKey> {
        match v {
            Value::Bool(b) => Some(TableKey::Bool(*b)),
            Value::Num(n) => {
                let n = if *n == 0.0 { 0.0 } else { *n };
                Some(TableKey::Num(n.to_bits()))
            }
            Value::Str(id) => Some(TableKey::Str(*id)),
            _ => None,
        }
    }

    /// Render the key for error messages.
    pub fn display(&self, strings: &StringInterner) -> String {
        match self {
            TableKey::Bool(b) => b.to_string(),
            TableKey::Num(bits) => crate::value::format_num(f64::from_bits(*bits)),
            TableKey::Str(id) => strings.get(*id).to_string(),
        }
    }
}

/// A table: key → value with deterministic insertion-order iteration.
#[derive(Debug, Default)]
pub struct Table {
    entries: IndexMap<TableKey, Value>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            entries: IndexMap::new(),
        }
    }

    pub fn get(&self, key: &TableKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: TableKey, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &Value)> {
        self.entries.iter()
    }
}
