//! Stored pattern store
//!
//! Values written by `set(name)` and read back by `get(name)`. Evaluations
//! read from a snapshot; bindings produced by a statement are merged in when
//! its evaluation completes.

use crate::types::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct PatternStore {
    patterns: HashMap<String, Value>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.patterns.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.patterns.insert(name.to_string(), value);
    }

    /// Merge bindings produced by one evaluation
    pub fn merge<I: IntoIterator<Item = (String, Value)>>(&mut self, bindings: I) {
        self.patterns.extend(bindings);
    }

    pub fn clear(&mut self) {
        self.patterns.clear();
    }

    /// Sorted names, for display
    pub fn names(&self) -> Vec<&String> {
        let mut names: Vec<&String> = self.patterns.keys().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_merge() {
        let mut store = PatternStore::new();
        store.set("a", Value::seq([1.0, 2.0]));
        assert_eq!(store.get("a"), Some(&Value::seq([1.0, 2.0])));

        store.merge(vec![
            ("a".to_string(), Value::seq([3.0])),
            ("b".to_string(), Value::Number(4.0)),
        ]);
        assert_eq!(store.get("a"), Some(&Value::seq([3.0])));
        assert_eq!(store.names(), vec!["a", "b"]);

        store.clear();
        assert!(store.is_empty());
    }
}
