//! Pattern values
//!
//! A pattern value is a recursive numeric tree: either a single number or an
//! ordered sequence of values. Each bracket level in source text is one level
//! of sub-steps.

use std::fmt;

/// A recursive numeric tree. Leaves are always numbers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(untagged)
)]
pub enum Value {
    Number(f64),
    Sequence(Vec<Value>),
}

impl Value {
    /// Build a flat sequence from plain numbers
    pub fn seq<I: IntoIterator<Item = f64>>(items: I) -> Value {
        Value::Sequence(items.into_iter().map(Value::Number).collect())
    }

    pub fn empty() -> Value {
        Value::Sequence(Vec::new())
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Sequence(_) => None,
        }
    }

    /// Top-level items; a bare number is treated as a one-element sequence
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Value::Number(n) => vec![Value::Number(n)],
            Value::Sequence(items) => items,
        }
    }

    /// Wrap a bare number so the result is always a sequence
    pub fn into_sequence(self) -> Value {
        Value::Sequence(self.into_items())
    }

    /// Number of top-level items
    pub fn len(&self) -> usize {
        match self {
            Value::Number(_) => 1,
            Value::Sequence(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Sequence(items) if items.is_empty())
    }

    /// Nesting depth: 0 for a number, 1 for a flat sequence, and so on.
    pub fn depth(&self) -> usize {
        match self {
            Value::Number(_) => 0,
            Value::Sequence(items) => 1 + items.iter().map(Value::depth).max().unwrap_or(0),
        }
    }

    /// Number of sub-step levels below the top level (0 for a flat sequence)
    pub fn max_sub_steps(&self) -> usize {
        self.depth().saturating_sub(1)
    }

    /// All leaves in depth-first order
    pub fn leaves(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<f64>) {
        match self {
            Value::Number(n) => out.push(*n),
            Value::Sequence(items) => {
                for item in items {
                    item.collect_leaves(out);
                }
            }
        }
    }

    /// First leaf, if there is one
    pub fn first_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Sequence(items) => items.iter().find_map(Value::first_number),
        }
    }

    /// Apply a numeric rule to every leaf, keeping the tree shape.
    pub fn map_leaves<F: FnMut(f64) -> f64>(self, f: &mut F) -> Value {
        match self {
            Value::Number(n) => Value::Number(f(n)),
            Value::Sequence(items) => {
                Value::Sequence(items.into_iter().map(|v| v.map_leaves(f)).collect())
            }
        }
    }

    /// Numbers at this level only; nested sequences are skipped
    pub fn level_numbers(items: &[Value]) -> Vec<f64> {
        items.iter().filter_map(Value::as_number).collect()
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Vec<f64>> for Value {
    fn from(items: Vec<f64>) -> Self {
        Value::seq(items)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

/// Numbers print with up to four decimals and no trailing zeros, so the
/// output is valid literal syntax that the statement compiler reads back.
fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if !n.is_finite() {
        return write!(f, "0");
    }
    let text = format!("{:.4}", n);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" || trimmed.is_empty() {
        write!(f, "0")
    } else {
        write!(f, "{}", trimmed)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write_number(f, *n),
            Value::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> Value {
        Value::Sequence(vec![
            Value::Number(0.0),
            Value::Number(1.0),
            Value::seq([2.0, 4.0]),
            Value::seq([1.0, 2.0, 3.0, 4.0]),
        ])
    }

    #[test]
    fn test_depth() {
        assert_eq!(Value::Number(3.0).depth(), 0);
        assert_eq!(Value::seq([1.0, 2.0]).depth(), 1);
        assert_eq!(nested().depth(), 2);
        assert_eq!(nested().max_sub_steps(), 1);
        assert_eq!(Value::empty().max_sub_steps(), 0);
    }

    #[test]
    fn test_leaves_depth_first() {
        assert_eq!(
            nested().leaves(),
            vec![0.0, 1.0, 2.0, 4.0, 1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_map_leaves_keeps_shape() {
        let doubled = nested().map_leaves(&mut |n| n * 2.0);
        match &doubled {
            Value::Sequence(items) => {
                assert_eq!(items.len(), 4);
                assert_eq!(items[2], Value::seq([4.0, 8.0]));
            }
            _ => panic!("Expected Sequence"),
        }
    }

    #[test]
    fn test_display_is_literal_syntax() {
        assert_eq!(nested().to_string(), "[0,1,[2,4],[1,2,3,4]]");
        assert_eq!(Value::seq([0.5, -0.25, 1.0 / 3.0]).to_string(), "[0.5,-0.25,0.3333]");
        assert_eq!(Value::seq([f64::NAN, -0.0]).to_string(), "[0,0]");
    }

    #[test]
    fn test_into_sequence_wraps_numbers() {
        assert_eq!(Value::Number(5.0).into_sequence(), Value::seq([5.0]));
        assert_eq!(Value::seq([1.0]).into_sequence(), Value::seq([1.0]));
    }
}
