//! Buffer flattening and serialization
//!
//! A nested pattern value becomes a flat buffer where shallow leaves occupy
//! proportionally more slots than deeply nested ones: a leaf at depth `d` is
//! repeated `2^(max_depth - d)` times. The flat buffer is then clamped to
//! [`MAX_BUFFER_LEN`] with the reduce algorithm and serialized as a
//! space-delimited, four-decimal message.

use crate::algebra::resize::reduce;
use crate::types::Value;
use std::fmt;

/// Safety ceiling for flattened buffers
pub const MAX_BUFFER_LEN: usize = 1024;

/// Largest pattern an operation may build before flattening (about 47 s of
/// audio-rate data at 44.1 kHz)
pub const MAX_PATTERN_LEN: usize = 1 << 21;

/// Flatten a value honoring sub-step depth. Flat input is returned unchanged.
pub fn flatten(value: &Value) -> Vec<f64> {
    let max_sub_steps = value.max_sub_steps();
    let mut out = Vec::new();
    match value {
        Value::Number(n) => out.push(*n),
        Value::Sequence(items) => {
            for item in items {
                flatten_into(item, max_sub_steps, &mut out);
            }
        }
    }
    out
}

fn flatten_into(value: &Value, remaining: usize, out: &mut Vec<f64>) {
    match value {
        Value::Number(n) => {
            let copies = 1usize << remaining.min(16);
            out.extend(std::iter::repeat(*n).take(copies));
        }
        Value::Sequence(items) => {
            for item in items {
                flatten_into(item, remaining.saturating_sub(1), out);
            }
        }
    }
}

/// A flattened, size-clamped numeric buffer
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Buffer {
    samples: Vec<f64>,
}

impl Buffer {
    pub fn new(samples: Vec<f64>) -> Self {
        Self { samples }
    }

    /// Flatten `value` and clamp the result to `max_len` elements
    pub fn from_value(value: &Value, max_len: usize) -> Self {
        let flat = flatten(value);
        let samples = if flat.len() > max_len {
            reduce(&flat, max_len)
        } else {
            flat
        };
        Self { samples }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Space-delimited, four-decimal text. Non-finite values become `0`.
    pub fn serialize(&self) -> String {
        self.samples
            .iter()
            .map(|n| format_sample(*n))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse a serialized buffer back into samples; unreadable fields become 0
    pub fn parse(text: &str) -> Self {
        let samples = text
            .split_whitespace()
            .map(|field| field.parse::<f64>().unwrap_or(0.0))
            .collect();
        Self { samples }
    }
}

fn format_sample(n: f64) -> String {
    if !n.is_finite() {
        return "0".to_string();
    }
    // avoid "-0.0000"
    let n = if n == 0.0 { 0.0 } else { n };
    let text = format!("{:.4}", n);
    if text == "-0.0000" {
        "0.0000".to_string()
    } else {
        text
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_subdivisions() {
        let value = Value::Sequence(vec![
            Value::Number(0.0),
            Value::Number(1.0),
            Value::seq([2.0, 4.0]),
            Value::seq([1.0, 2.0, 3.0, 4.0]),
        ]);
        assert_eq!(
            flatten(&value),
            vec![0.0, 0.0, 1.0, 1.0, 2.0, 4.0, 1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_flatten_two_levels() {
        let value = Value::Sequence(vec![
            Value::Number(1.0),
            Value::Sequence(vec![Value::Number(2.0), Value::seq([3.0, 4.0])]),
        ]);
        // depth 0 -> 4 copies, depth 1 -> 2 copies, depth 2 -> 1 copy
        assert_eq!(
            flatten(&value),
            vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_clamp_to_ceiling() {
        let value = Value::seq((0..3000).map(|i| i as f64));
        let buffer = Buffer::from_value(&value, MAX_BUFFER_LEN);
        assert_eq!(buffer.len(), MAX_BUFFER_LEN);
        assert_eq!(buffer.samples()[0], 0.0);
    }

    #[test]
    fn test_serialize_coerces_non_finite() {
        let buffer = Buffer::new(vec![1.0, f64::NAN, f64::INFINITY, -0.0, -1.5]);
        assert_eq!(buffer.serialize(), "1.0000 0 0 0.0000 -1.5000");
    }

    #[test]
    fn test_parse_serialized() {
        let buffer = Buffer::parse("1.0000 0.5000 bogus");
        assert_eq!(buffer.samples(), &[1.0, 0.5, 0.0]);
    }
}
