//! Per-column string dictionary
//!
//! String columns store a `StringId` per row and keep the distinct strings in
//! a dictionary owned by the column. Each entry is reference counted by the
//! rows that point at it; when the last row lets go, the slot is recycled.
//!
//! ```
//! use livepivot::StringDictionary;
//!
//! let mut dict = StringDictionary::new();
//! let a = dict.intern("east");
//! let b = dict.intern("west");
//! assert_eq!(dict.intern("east"), a);
//! assert_ne!(a, b);
//! assert_eq!(dict.resolve(a), Some("east"));
//! ```

use std::collections::HashMap;

/// Interned string ID type
pub type StringId = u32;

#[derive(Debug, Clone, Default)]
pub struct StringDictionary {
    ids: HashMap<String, StringId>,
    entries: Vec<Entry>,
    free: Vec<StringId>,
}

#[derive(Debug, Clone)]
struct Entry {
    text: String,
    refs: u32,
}

impl StringDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `s`, taking one reference on its entry.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.ids.get(s) {
            self.entries[id as usize].refs += 1;
            return id;
        }

        let entry = Entry { text: s.to_string(), refs: 1 };
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id as usize] = entry;
                id
            }
            None => {
                self.entries.push(entry);
                (self.entries.len() - 1) as StringId
            }
        };
        self.ids.insert(s.to_string(), id);
        id
    }

    /// Drop one reference; the slot is recycled at zero.
    pub fn release(&mut self, id: StringId) {
        let Some(entry) = self.entries.get_mut(id as usize) else {
            return;
        };
        if entry.refs == 0 {
            return;
        }
        entry.refs -= 1;
        if entry.refs == 0 {
            self.ids.remove(&entry.text);
            self.free.push(id);
        }
    }

    /// Resolve a live ID back to its string
    pub fn resolve(&self, id: StringId) -> Option<&str> {
        self.entries
            .get(id as usize)
            .filter(|e| e.refs > 0)
            .map(|e| e.text.as_str())
    }

    pub fn ref_count(&self, id: StringId) -> u32 {
        self.entries.get(id as usize).map(|e| e.refs).unwrap_or(0)
    }

    /// Number of distinct live strings
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn stats(&self) -> DictionaryStats {
        DictionaryStats {
            unique_strings: self.len(),
            total_references: self.entries.iter().map(|e| e.refs as u64).sum(),
            free_slots: self.free.len(),
        }
    }
}

/// Statistics about a string dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryStats {
    pub unique_strings: usize,
    pub total_references: u64,
    pub free_slots: usize,
}
