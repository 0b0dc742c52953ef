//! Open-addressed, linear-probe hash table keyed by interned strings.
//!
//! One table variant backs every string-keyed store in the system: globals,
//! the module cache, module export tables, map objects, and the intern pool
//! itself. Keys carry a precomputed hash and are interned, so probing
//! compares by reference identity; [`Table::find_string`] is the only
//! content comparison and exists to bootstrap interning.
//!
//! Deletion leaves a tombstone (no key, value `true`) so probe chains stay
//! intact. Growth rehashes live entries and drops tombstones.

use std::rc::Rc;

use crate::value::{LangStr, Value};

const MAX_LOAD: f64 = 0.75;

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    key: Option<Rc<LangStr>>,
    value: Value,
}

impl Entry {
    fn empty() -> Entry {
        Entry {
            key: None,
            value: Value::Nil,
        }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

/// A string-keyed hash table. Capacity is always a power of two (or zero);
/// `count` includes tombstones so the load-factor check accounts for them.
#[derive(Debug, Default, PartialEq)]
pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Occupied slots, tombstones included.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Look up a key. Probing by identity is sound because every key is
    /// interned.
    pub fn get(&self, key: &Rc<LangStr>) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = &self.entries[find_slot(&self.entries, key)];
        entry.key.as_ref().map(|_| entry.value.clone())
    }

    /// Insert or overwrite. Returns `true` when the key was not already
    /// present.
    pub fn set(&mut self, key: Rc<LangStr>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            self.grow();
        }

        let slot = find_slot(&self.entries, &key);
        let entry = &mut self.entries[slot];
        let is_new = entry.key.is_none();
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new
    }

    /// Remove a key, leaving a tombstone. Returns whether it was present.
    pub fn delete(&mut self, key: &Rc<LangStr>) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let slot = find_slot(&self.entries, key);
        let entry = &mut self.entries[slot];
        if entry.key.is_none() {
            return false;
        }
        entry.key = None;
        entry.value = Value::Bool(true);
        true
    }

    /// Scan for a string with these exact bytes. Used by the intern pool to
    /// decide whether a canonical reference already exists.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<LangStr>> {
        if self.entries.is_empty() {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match &entry.key {
                None => {
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
                Some(key) => {
                    if key.hash == hash && key.as_str() == chars {
                        return Some(Rc::clone(key));
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Iterate live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&Rc<LangStr>, &Value)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.key.as_ref().map(|key| (key, &entry.value)))
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.len() < 8 {
            8
        } else {
            self.entries.len() * 2
        };
        let old = std::mem::replace(&mut self.entries, vec![Entry::empty(); new_capacity]);

        // Tombstones are dropped on the way over, so recount.
        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let slot = find_slot(&self.entries, &key);
                self.entries[slot] = Entry {
                    key: Some(key),
                    value: entry.value,
                };
                self.count += 1;
            }
        }
    }
}

/// Probe for the slot a key lives in (or should live in). Returns the first
/// matching slot, or the first tombstone passed on the way to an empty slot
/// so reinsertion reuses dead space.
fn find_slot(entries: &[Entry], key: &Rc<LangStr>) -> usize {
    let mask = entries.len() - 1;
    let mut index = key.hash as usize & mask;
    let mut tombstone: Option<usize> = None;
    loop {
        let entry = &entries[index];
        match &entry.key {
            None => {
                if entry.is_tombstone() {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                } else {
                    return tombstone.unwrap_or(index);
                }
            }
            Some(existing) => {
                if Rc::ptr_eq(existing, key) {
                    return index;
                }
            }
        }
        index = (index + 1) & mask;
    }
}
