//! Variable bindings visible to expressions
//!
//! Two layers of scopes: process context (tempo, bars, pointer, note
//! lengths) at the bottom, stored `set` variables above it so a stored
//! pattern can shadow a context name.

use crate::types::Value;
use std::collections::HashMap;

/// Number of note-value constants (`n1` through `n128`)
pub const NOTE_VALUES: usize = 128;

/// Process-wide context injected into every evaluation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContextVars {
    pub bpm: f64,
    pub bars_elapsed: u64,
    pub mousex: f64,
    pub mousey: f64,
    pub time_num: f64,
    pub time_denom: f64,
    pub sample_rate: f64,
}

impl Default for ContextVars {
    fn default() -> Self {
        Self {
            bpm: 90.0,
            bars_elapsed: 0,
            mousex: 0.0,
            mousey: 0.0,
            time_num: 4.0,
            time_denom: 4.0,
            sample_rate: 44100.0,
        }
    }
}

impl ContextVars {
    /// Length in samples of a 1/`division` note at the current tempo
    pub fn note_value(&self, division: usize) -> f64 {
        if division == 0 || self.bpm <= 0.0 || self.time_denom == 0.0 {
            return 0.0;
        }
        let beat_ms = 60000.0 / self.bpm;
        let bar_ratio = self.time_num / (self.time_denom / 4.0);
        ((beat_ms / division as f64) * bar_ratio * (self.sample_rate * 0.001)).round()
    }
}

/// Scoped variable storage
#[derive(Debug, Clone)]
pub struct Environment {
    /// Stack of scopes (inner scopes shadow outer ones)
    scopes: Vec<HashMap<String, Value>>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            scopes: vec![HashMap::new()],
        }
    }

    /// Context bindings at the bottom, stored variables in a scope above
    pub fn from_context(vars: &ContextVars, stored: &[(String, Value)]) -> Self {
        let mut env = Environment::new();
        env.bind_context(vars);
        env.push_scope();
        for (name, value) in stored {
            env.define(name.clone(), value.clone());
        }
        env
    }

    /// (Re)bind context variables in the global scope
    pub fn bind_context(&mut self, vars: &ContextVars) {
        let Some(global) = self.scopes.first_mut() else {
            return;
        };
        let numbers = [
            ("bpm", vars.bpm),
            ("bars", vars.bars_elapsed as f64),
            ("mousex", vars.mousex),
            ("mousey", vars.mousey),
            ("time_num", vars.time_num),
            ("time_denom", vars.time_denom),
            ("sr", vars.sample_rate),
            ("pi", std::f64::consts::PI),
            ("e", std::f64::consts::E),
        ];
        for (name, value) in numbers {
            global.insert(name.to_string(), Value::Number(value));
        }
        for division in 1..=NOTE_VALUES {
            global.insert(
                format!("n{}", division),
                Value::Number(vars.note_value(division)),
            );
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Never pops the global scope
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Define a variable in the current scope
    pub fn define(&mut self, name: String, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, value);
        }
    }

    /// Look a variable up from the innermost scope outwards
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_values() {
        let vars = ContextVars {
            bpm: 120.0,
            ..ContextVars::default()
        };
        // whole bar at 120 bpm in 4/4 is 2 seconds
        assert_eq!(vars.note_value(1), 88200.0);
        assert_eq!(vars.note_value(4), 22050.0);
        assert_eq!(vars.note_value(0), 0.0);
    }

    #[test]
    fn test_context_bindings() {
        let vars = ContextVars {
            bpm: 100.0,
            bars_elapsed: 12,
            mousex: 0.25,
            ..ContextVars::default()
        };
        let env = Environment::from_context(&vars, &[]);
        assert_eq!(env.get("bpm"), Some(&Value::Number(100.0)));
        assert_eq!(env.get("bars"), Some(&Value::Number(12.0)));
        assert_eq!(env.get("mousex"), Some(&Value::Number(0.25)));
        assert!(env.is_defined("n128"));
        assert!(!env.is_defined("n129"));
    }

    #[test]
    fn test_stored_values_shadow_context() {
        let stored = vec![("bpm".to_string(), Value::seq([1.0, 2.0]))];
        let mut env = Environment::from_context(&ContextVars::default(), &stored);
        assert_eq!(env.get("bpm"), Some(&Value::seq([1.0, 2.0])));

        env.pop_scope();
        assert_eq!(env.get("bpm"), Some(&Value::Number(90.0)));
        env.pop_scope();
        assert_eq!(env.depth(), 1);
    }
}
