use super::value::{ObjString, Value};
use std::rc::Rc;

const MAX_LOAD: f64 = 0.75;

#[derive(Clone)]
struct Entry {
    key: Option<Rc<ObjString>>,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Self {
            key: None,
            value: Value::Nil,
        }
    }

    // key None + value Nil is empty; key None + value Bool(true) is a
    // tombstone left behind by `delete` to keep probe chains intact
    fn is_tombstone(&self) -> bool {
        self.key.is_none() && !matches!(self.value, Value::Nil)
    }
}

/// Open addressing with linear probing, keyed by interned strings. Keys
/// compare by pointer; `find_string` is the one raw-bytes lookup and
/// exists so interning can probe before an `ObjString` is allocated.
pub struct Table {
    // live entries plus tombstones, for load-factor purposes
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Self {
            count: 0,
            entries: Vec::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry(entries: &[Entry], key: &Rc<ObjString>) -> usize {
        let capacity = entries.len();
        let mut index = key.hash() as usize % capacity;
        let mut tombstone = None;

        loop {
            let entry = &entries[index];
            match &entry.key {
                None => {
                    if !entry.is_tombstone() {
                        // a truly empty slot ends the probe chain; hand
                        // back the first tombstone passed so it is reused
                        return tombstone.unwrap_or(index);
                    }
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(k) => {
                    if Rc::ptr_eq(k, key) {
                        return index;
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![Entry::empty(); capacity]);

        // tombstones are dropped, so count is recomputed from live entries
        self.count = 0;
        for entry in old {
            if let Some(key) = &entry.key {
                let index = Self::find_entry(&self.entries, key);
                self.entries[index] = entry;
                self.count += 1;
            }
        }
    }

    pub fn get(&self, key: &Rc<ObjString>) -> Option<Value> {
        if self.count == 0 {
            return None;
        }

        let entry = &self.entries[Self::find_entry(&self.entries, key)];
        entry.key.as_ref().map(|_| entry.value.clone())
    }

    /// Returns true iff the entry is newly inserted.
    pub fn set(&mut self, key: Rc<ObjString>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            let capacity = if self.capacity() < 8 {
                8
            } else {
                self.capacity() * 2
            };
            self.adjust_capacity(capacity);
        }

        let index = Self::find_entry(&self.entries, &key);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }

        entry.key = Some(key);
        entry.value = value;
        is_new
    }

    pub fn delete(&mut self, key: &Rc<ObjString>) -> bool {
        if self.count == 0 {
            return false;
        }

        let index = Self::find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }

        entry.key = None;
        entry.value = Value::Bool(true);
        true
    }

    /// Bytewise lookup used during interning, when the caller holds raw
    /// characters rather than an `ObjString`.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<ObjString>> {
        if self.count == 0 {
            return None;
        }

        let capacity = self.capacity();
        let mut index = hash as usize % capacity;
        loop {
            let entry = &self.entries[index];
            match &entry.key {
                None => {
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
                Some(key) => {
                    if key.hash() == hash && key.as_str() == chars {
                        return Some(Rc::clone(key));
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// Bulk copy of live entries.
    pub fn add_all(&mut self, from: &Table) {
        for entry in from.entries.iter() {
            if let Some(key) = &entry.key {
                self.set(Rc::clone(key), entry.value.clone());
            }
        }
    }
}
